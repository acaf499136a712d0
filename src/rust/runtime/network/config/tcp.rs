// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use crate::runtime::{
    fail::Fail,
    network::consts::{
        DEFAULT_MAX_INTERFACES,
        DEFAULT_MAX_SOCKETS,
        DEFAULT_MSS,
        DEFAULT_WINDOW_SIZE,
        MAX_MSS,
        MIN_MSS,
        TCP_HANDSHAKE_TIMEOUT,
        TCP_MSL,
        TCP_RETRIES,
    },
};
use ::std::time::Duration;

//==============================================================================
// Structures
//==============================================================================

/// TCP Configuration Descriptor
#[derive(Clone, Debug)]
pub struct TcpConfig {
    /// Advertised Maximum Segment Size
    advertised_mss: usize,
    /// Number of Retransmissions Before a Connection is Reset
    retries: usize,
    /// Initial Retransmission Timeout
    handshake_timeout: Duration,
    /// Capacity of the Send and Receive Ring Buffers
    window_size: usize,
    /// Time Spent in TIME_WAIT Before a Connection is Closed
    time_wait_timeout: Duration,
    /// Number of Slots in the Socket Table
    max_sockets: usize,
    /// Number of Slots in the Interface Registry
    max_interfaces: usize,
    /// Skip Checksum Validation When Receiving?
    rx_checksum_offload: bool,
    /// Skip Checksum Computation When Sending?
    tx_checksum_offload: bool,
}

//==============================================================================
// Associate Functions
//==============================================================================

/// Associate Functions for TCP Configuration Descriptor
impl TcpConfig {
    /// Creates a TCP Configuration Descriptor. Unset values take their defaults.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        advertised_mss: Option<usize>,
        retries: Option<usize>,
        handshake_timeout: Option<Duration>,
        window_size: Option<usize>,
        time_wait_timeout: Option<Duration>,
        max_sockets: Option<usize>,
        max_interfaces: Option<usize>,
        rx_checksum_offload: Option<bool>,
        tx_checksum_offload: Option<bool>,
    ) -> Result<Self, Fail> {
        let mut options = Self::default();

        if let Some(value) = advertised_mss {
            options = options.set_advertised_mss(value)?;
        }
        if let Some(value) = retries {
            options = options.set_retries(value)?;
        }
        if let Some(value) = handshake_timeout {
            options = options.set_handshake_timeout(value)?;
        }
        if let Some(value) = window_size {
            options = options.set_window_size(value)?;
        }
        if let Some(value) = time_wait_timeout {
            options = options.set_time_wait_timeout(value);
        }
        if let Some(value) = max_sockets {
            options = options.set_max_sockets(value)?;
        }
        if let Some(value) = max_interfaces {
            options = options.set_max_interfaces(value)?;
        }
        if let Some(value) = rx_checksum_offload {
            options.rx_checksum_offload = value;
        }
        if let Some(value) = tx_checksum_offload {
            options.tx_checksum_offload = value;
        }

        Ok(options)
    }

    /// Gets the advertised maximum segment size in the target [TcpConfig].
    pub fn get_advertised_mss(&self) -> usize {
        self.advertised_mss
    }

    /// Gets the number of retransmissions in the target [TcpConfig].
    pub fn get_retries(&self) -> usize {
        self.retries
    }

    /// Gets the initial retransmission timeout in the target [TcpConfig].
    pub fn get_handshake_timeout(&self) -> Duration {
        self.handshake_timeout
    }

    /// Gets the ring buffer capacity in the target [TcpConfig].
    pub fn get_window_size(&self) -> usize {
        self.window_size
    }

    /// Gets the TIME_WAIT timeout in the target [TcpConfig].
    pub fn get_time_wait_timeout(&self) -> Duration {
        self.time_wait_timeout
    }

    /// Gets the socket table size in the target [TcpConfig].
    pub fn get_max_sockets(&self) -> usize {
        self.max_sockets
    }

    /// Gets the interface registry size in the target [TcpConfig].
    pub fn get_max_interfaces(&self) -> usize {
        self.max_interfaces
    }

    /// Gets the RX checksum offload option in the target [TcpConfig].
    pub fn get_rx_checksum_offload(&self) -> bool {
        self.rx_checksum_offload
    }

    /// Gets the TX checksum offload option in the target [TcpConfig].
    pub fn get_tx_checksum_offload(&self) -> bool {
        self.tx_checksum_offload
    }

    /// Sets the advertised maximum segment size in the target [TcpConfig].
    pub fn set_advertised_mss(mut self, value: usize) -> Result<Self, Fail> {
        if !(MIN_MSS..=MAX_MSS).contains(&value) {
            return Err(invalid("advertised_mss", &format!("{} is outside [{}, {}]", value, MIN_MSS, MAX_MSS)));
        }
        self.advertised_mss = value;
        Ok(self)
    }

    /// Sets the number of retransmissions in the target [TcpConfig].
    pub fn set_retries(mut self, value: usize) -> Result<Self, Fail> {
        if value == 0 {
            return Err(invalid("retries", "must be at least one"));
        }
        self.retries = value;
        Ok(self)
    }

    /// Sets the initial retransmission timeout in the target [TcpConfig].
    pub fn set_handshake_timeout(mut self, value: Duration) -> Result<Self, Fail> {
        if value.is_zero() {
            return Err(invalid("handshake_timeout", "must not be zero"));
        }
        self.handshake_timeout = value;
        Ok(self)
    }

    /// Sets the ring buffer capacity in the target [TcpConfig].
    pub fn set_window_size(mut self, value: usize) -> Result<Self, Fail> {
        if value == 0 {
            return Err(invalid("window_size", "must not be zero"));
        }
        self.window_size = value;
        Ok(self)
    }

    /// Sets the TIME_WAIT timeout in the target [TcpConfig].
    pub fn set_time_wait_timeout(mut self, value: Duration) -> Self {
        self.time_wait_timeout = value;
        self
    }

    /// Sets the socket table size in the target [TcpConfig].
    pub fn set_max_sockets(mut self, value: usize) -> Result<Self, Fail> {
        if value == 0 {
            return Err(invalid("max_sockets", "must not be zero"));
        }
        self.max_sockets = value;
        Ok(self)
    }

    /// Sets the interface registry size in the target [TcpConfig]. The loopback interface takes one slot.
    pub fn set_max_interfaces(mut self, value: usize) -> Result<Self, Fail> {
        if value == 0 {
            return Err(invalid("max_interfaces", "must leave room for the loopback interface"));
        }
        self.max_interfaces = value;
        Ok(self)
    }
}

//==============================================================================
// Standalone Functions
//==============================================================================

fn invalid(option: &str, reason: &str) -> Fail {
    let cause: String = format!("invalid {} ({})", option, reason);
    error!("set_{}(): {}", option, cause);
    Fail::new(libc::EINVAL, &cause)
}

//==============================================================================
// Trait Implementations
//==============================================================================

/// Default Trait Implementation for TCP Configuration Descriptor
impl Default for TcpConfig {
    /// Creates a TCP Configuration Descriptor with the default values.
    fn default() -> Self {
        TcpConfig {
            advertised_mss: DEFAULT_MSS,
            retries: TCP_RETRIES,
            handshake_timeout: TCP_HANDSHAKE_TIMEOUT,
            window_size: DEFAULT_WINDOW_SIZE,
            time_wait_timeout: 2 * TCP_MSL,
            max_sockets: DEFAULT_MAX_SOCKETS,
            max_interfaces: DEFAULT_MAX_INTERFACES,
            rx_checksum_offload: false,
            tx_checksum_offload: false,
        }
    }
}

//==============================================================================
// Unit Tests
//==============================================================================

#[cfg(test)]
mod tests {
    use crate::runtime::network::{
        config::TcpConfig,
        consts::{
            DEFAULT_MSS,
            DEFAULT_WINDOW_SIZE,
        },
    };
    use ::anyhow::Result;
    use ::std::time::Duration;

    /// Tests default instantiation for [TcpConfig].
    #[test]
    fn test_tcp_config_default() -> Result<()> {
        let config: TcpConfig = TcpConfig::default();
        crate::ensure_eq!(config.get_advertised_mss(), DEFAULT_MSS);
        crate::ensure_eq!(config.get_retries(), 5);
        crate::ensure_eq!(config.get_handshake_timeout(), Duration::from_secs(1));
        crate::ensure_eq!(config.get_window_size(), DEFAULT_WINDOW_SIZE);
        crate::ensure_eq!(config.get_time_wait_timeout(), Duration::from_secs(60));
        crate::ensure_eq!(config.get_max_sockets(), 64);
        crate::ensure_eq!(config.get_rx_checksum_offload(), false);
        crate::ensure_eq!(config.get_tx_checksum_offload(), false);

        Ok(())
    }

    /// Tests that out-of-range values are rejected.
    #[test]
    fn test_tcp_config_rejects_invalid_values() -> Result<()> {
        crate::ensure_eq!(TcpConfig::default().set_advertised_mss(100).is_err(), true);
        crate::ensure_eq!(TcpConfig::default().set_retries(0).is_err(), true);
        crate::ensure_eq!(TcpConfig::default().set_window_size(0).is_err(), true);
        crate::ensure_eq!(TcpConfig::default().set_max_sockets(0).is_err(), true);

        let config: TcpConfig = TcpConfig::new(Some(1000), Some(3), None, Some(4096), None, Some(2), None, None, None)?;
        crate::ensure_eq!(config.get_advertised_mss(), 1000);
        crate::ensure_eq!(config.get_retries(), 3);
        crate::ensure_eq!(config.get_window_size(), 4096);
        crate::ensure_eq!(config.get_max_sockets(), 2);

        Ok(())
    }
}
