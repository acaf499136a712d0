// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Structures
//======================================================================================================================

/// States of a TCP connection (RFC 793, Section 3.2).
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum State {
    Closed,
    Listen,
    SynSent,
    SynReceived,
    Established,
    FinWait1,
    FinWait2,
    CloseWait,
    Closing,
    LastAck,
    TimeWait,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl State {
    /// Checks if both ends have exchanged initial sequence numbers.
    pub fn is_synchronized(&self) -> bool {
        !matches!(self, State::Closed | State::Listen | State::SynSent | State::SynReceived)
    }

    /// Checks if the peer may still send us data.
    pub fn can_receive_data(&self) -> bool {
        matches!(self, State::Established | State::FinWait1 | State::FinWait2)
    }

    /// Checks if the application may still queue data for transmission.
    pub fn can_send_data(&self) -> bool {
        matches!(self, State::Established | State::CloseWait)
    }
}
