// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use ::std::time::Duration;

//======================================================================================================================
// Constants
//======================================================================================================================

/// Fallback MSS Parameter for TCP
pub const FALLBACK_MSS: usize = 536;

/// Minimum MSS Parameter for TCP
pub const MIN_MSS: usize = FALLBACK_MSS;

/// Maximum MSS Parameter for TCP
pub const MAX_MSS: usize = u16::MAX as usize;

/// Default MSS Parameter for TCP
pub const DEFAULT_MSS: usize = 1460;

/// Size of the IPv4 and TCP headers that precede the payload of a segment on the wire.
pub const IPV4_TCP_HEADER_OVERHEAD: usize = 40;

/// Default size of the send and receive ring buffers of a connection.
pub const DEFAULT_WINDOW_SIZE: usize = 64 * 1024;

/// Largest window that fits in the TCP header without window scaling.
pub const MAX_WINDOW_SIZE: u32 = u16::MAX as u32;

/// Handshake timeout for tcp. This is also the initial retransmission timeout.
pub const TCP_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(1);

/// Number of retransmissions before a connection is reset.
pub const TCP_RETRIES: usize = 5;

/// Maximum segment lifetime. Connections linger in TIME_WAIT for twice this value.
pub const TCP_MSL: Duration = Duration::from_secs(30);

/// Default number of entries in the socket table.
pub const DEFAULT_MAX_SOCKETS: usize = 64;

/// Default number of entries in the interface registry.
pub const DEFAULT_MAX_INTERFACES: usize = 4;

/// Default MTU of a registered interface.
pub const DEFAULT_MTU: u16 = 1500;

/// MTU of the loopback interface.
pub const LOOPBACK_MTU: u16 = u16::MAX;
