// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

pub mod physical_layer;

pub use self::physical_layer::{
    TestPhysicalLayer,
    TransmittedSegment,
};

use crate::{
    inetstack::{
        protocols::{
            layer3::{
                IpProtocol,
                NetworkInterface,
                PseudoHeader,
            },
            layer4::tcp::TcpHeader,
        },
        NetworkStack,
    },
    runtime::{
        fail::Fail,
        network::config::TcpConfig,
    },
};
use ::std::net::{
    Ipv4Addr,
    SocketAddrV4,
};

//==============================================================================
// Constants
//==============================================================================

pub const RECEIVE_WINDOW_SIZE: usize = 1024;
pub const ALICE_IPV4: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 1);
pub const BOB_IPV4: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 2);
pub const NETMASK: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 0);
pub const GATEWAY: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 254);
pub const BOB_PORT: u16 = 49500;

//==============================================================================
// Standalone Functions
//==============================================================================

/// Creates a stack that owns ALICE_IPV4 on `eth0`. BOB_IPV4 is a remote host on the same network.
pub fn new_alice(config: TcpConfig) -> Result<NetworkStack<TestPhysicalLayer>, Fail> {
    let mut stack: NetworkStack<TestPhysicalLayer> = NetworkStack::new(TestPhysicalLayer::new(), config);
    stack.add_interface(NetworkInterface::new("eth0", ALICE_IPV4, NETMASK, Some(GATEWAY), 1500))?;
    Ok(stack)
}

/// Default configuration with small buffers.
pub fn test_config() -> Result<TcpConfig, Fail> {
    TcpConfig::default().set_window_size(RECEIVE_WINDOW_SIZE)
}

pub fn bob_addr() -> SocketAddrV4 {
    SocketAddrV4::new(BOB_IPV4, BOB_PORT)
}

/// Serializes a segment that BOB sends to ALICE.
pub fn segment_from_bob(header: &TcpHeader, payload: &[u8]) -> Vec<u8> {
    let length: u16 = (header.compute_size() + payload.len()) as u16;
    let pseudo_header: PseudoHeader = PseudoHeader::new(BOB_IPV4, ALICE_IPV4, IpProtocol::TCP, length);
    header.serialize(&pseudo_header, payload, false)
}
