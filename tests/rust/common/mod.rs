// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use ::anyhow::Result;
use ::netstack::{
    runtime::logging,
    Fail,
    NetworkInterface,
    NetworkStack,
    PhysicalLayer,
    SocketHandle,
    TcpConfig,
};
use ::socket2::{
    Domain,
    Type,
};
use ::std::{
    net::Ipv4Addr,
    sync::{
        Arc,
        Mutex,
    },
};

//==============================================================================
// Constants
//==============================================================================

pub const ALICE_IPV4: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);
pub const BOB_IPV4: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 3);
pub const NETMASK: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 0);
pub const PORT_BASE: u16 = 8080;

//==============================================================================
// Structures
//==============================================================================

/// A segment handed to the link layer.
#[derive(Clone, Debug)]
pub struct Frame {
    pub interface: String,
    pub destination: Ipv4Addr,
    pub bytes: Vec<u8>,
}

/// Link layer that records transmitted segments. Clones share the record.
#[derive(Clone, Default)]
pub struct RecordingLink(Arc<Mutex<Vec<Frame>>>);

//==============================================================================
// Associate Functions
//==============================================================================

impl RecordingLink {
    pub fn new() -> Self {
        logging::initialize();
        Self::default()
    }

    /// Removes every recorded segment.
    pub fn take_frames(&self) -> Vec<Frame> {
        match self.0.lock() {
            Ok(mut frames) => frames.split_off(0),
            Err(_) => Vec::new(),
        }
    }
}

impl PhysicalLayer for RecordingLink {
    fn transmit(&mut self, interface: &NetworkInterface, destination: Ipv4Addr, segment: &[u8]) -> Result<(), Fail> {
        let mut frames = self
            .0
            .lock()
            .map_err(|_| Fail::new(libc::EIO, "recording link is poisoned"))?;
        frames.push(Frame {
            interface: interface.name().to_string(),
            destination,
            bytes: segment.to_vec(),
        });
        Ok(())
    }
}

//==============================================================================
// Standalone Functions
//==============================================================================

/// Creates a stack that owns ALICE_IPV4 on `eth0`.
pub fn new_stack(config: TcpConfig) -> Result<(NetworkStack<RecordingLink>, RecordingLink)> {
    let link: RecordingLink = RecordingLink::new();
    let mut stack: NetworkStack<RecordingLink> = NetworkStack::new(link.clone(), config);
    stack.add_interface(NetworkInterface::new("eth0", ALICE_IPV4, NETMASK, None, 1500))?;
    Ok((stack, link))
}

pub fn safe_socket(stack: &mut NetworkStack<RecordingLink>) -> Result<SocketHandle> {
    Ok(stack.create(Domain::IPV4, Type::STREAM, None)?)
}
