// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use ::std::time::Duration;

//======================================================================================================================
// Constants
//======================================================================================================================

/// Floor of the retransmission timeout.
const MIN_RTO: Duration = Duration::from_millis(100);

/// Ceiling of the retransmission timeout.
const MAX_RTO: Duration = Duration::from_secs(60);

/// Clock granularity (G in RFC 6298).
const CLOCK_GRANULARITY: Duration = Duration::from_millis(1);

//======================================================================================================================
// Structures
//======================================================================================================================

/// Round-trip estimator of RFC 6298, kept in integer time units.
#[derive(Debug)]
pub struct RtoCalculator {
    /// SRTT and RTTVAR, present once the first sample arrives.
    estimate: Option<(Duration, Duration)>,
    rto: Duration,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl RtoCalculator {
    pub fn new(initial_rto: Duration) -> Self {
        Self {
            estimate: None,
            rto: initial_rto.clamp(MIN_RTO, MAX_RTO),
        }
    }

    /// Folds a round-trip sample into the estimate and recomputes the timeout.
    pub fn add_sample(&mut self, rtt: Duration) {
        let (srtt, rttvar): (Duration, Duration) = match self.estimate {
            None => (rtt, rtt / 2),
            Some((srtt, rttvar)) => {
                // RTTVAR <- 3/4 RTTVAR + 1/4 |SRTT - R|, SRTT <- 7/8 SRTT + 1/8 R.
                let deviation: Duration = if srtt > rtt { srtt - rtt } else { rtt - srtt };
                (srtt * 7 / 8 + rtt / 8, rttvar * 3 / 4 + deviation / 4)
            },
        };
        self.estimate = Some((srtt, rttvar));
        self.rto = (srtt + CLOCK_GRANULARITY.max(rttvar * 4)).clamp(MIN_RTO, MAX_RTO);
    }

    /// Doubles the timeout, saturating at the ceiling.
    pub fn back_off(&mut self) {
        self.rto = self.rto.saturating_mul(2).min(MAX_RTO);
    }

    pub fn rto(&self) -> Duration {
        self.rto
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
