// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    inetstack::protocols::{
        layer1::PhysicalLayer,
        layer3::{
            IpProtocol,
            NetworkInterface,
            PseudoHeader,
        },
        layer4::tcp::TcpHeader,
    },
    runtime::{
        fail::Fail,
        logging,
    },
};
use ::std::{
    collections::VecDeque,
    net::Ipv4Addr,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// A segment handed to the link layer.
#[derive(Clone, Debug)]
pub struct TransmittedSegment {
    pub interface: String,
    pub src: Ipv4Addr,
    pub destination: Ipv4Addr,
    pub bytes: Vec<u8>,
}

/// Link layer that records every segment instead of putting it on a wire.
pub struct TestPhysicalLayer {
    outgoing: VecDeque<TransmittedSegment>,
    fail_transmissions: bool,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl TransmittedSegment {
    /// Parses the recorded segment. The checksum is verified.
    pub fn parse(&self) -> Result<(TcpHeader, Vec<u8>), Fail> {
        let pseudo_header: PseudoHeader = PseudoHeader::new(
            self.src,
            self.destination,
            IpProtocol::TCP,
            self.bytes.len() as u16,
        );
        let (header, payload): (TcpHeader, &[u8]) = TcpHeader::parse(&self.bytes, &pseudo_header, false)?;
        Ok((header, payload.to_vec()))
    }
}

impl TestPhysicalLayer {
    pub fn new() -> Self {
        logging::initialize();
        Self {
            outgoing: VecDeque::new(),
            fail_transmissions: false,
        }
    }

    /// Makes subsequent transmissions fail.
    pub fn set_fail_transmissions(&mut self, fail: bool) {
        self.fail_transmissions = fail;
    }

    pub fn pop_all_frames(&mut self) -> VecDeque<TransmittedSegment> {
        self.outgoing.split_off(0)
    }

    /// Removes the oldest recorded segment.
    pub fn pop_frame(&mut self) -> Option<TransmittedSegment> {
        self.outgoing.pop_front()
    }

    pub fn len(&self) -> usize {
        self.outgoing.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outgoing.is_empty()
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl PhysicalLayer for TestPhysicalLayer {
    fn transmit(&mut self, interface: &NetworkInterface, destination: Ipv4Addr, segment: &[u8]) -> Result<(), Fail> {
        if self.fail_transmissions {
            return Err(Fail::new(libc::EIO, "link is down"));
        }
        self.outgoing.push_back(TransmittedSegment {
            interface: interface.name().to_string(),
            src: interface.address(),
            destination,
            bytes: segment.to_vec(),
        });
        Ok(())
    }
}

impl Default for TestPhysicalLayer {
    fn default() -> Self {
        Self::new()
    }
}
