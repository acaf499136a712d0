// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use crate::runtime::fail::Fail;
use ::libc::ENOTSUP;
use ::std::{
    convert::TryFrom,
    net::Ipv4Addr,
};

//==============================================================================
// Structures
//==============================================================================

/// Ipv4 Protocol
#[repr(u8)]
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum IpProtocol {
    /// Internet Control Message Protocol
    ICMPv4 = 0x01,
    /// Transmission Control Protocol
    TCP = 0x06,
    /// User Datagram Protocol
    UDP = 0x11,
}

/// Synthetic header that is covered by transport-layer checksums but never transmitted.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct PseudoHeader {
    pub src_addr: Ipv4Addr,
    pub dst_addr: Ipv4Addr,
    pub protocol: IpProtocol,
    /// Length of the transport-layer segment (header and payload).
    pub length: u16,
}

//==============================================================================
// Associate Functions
//==============================================================================

impl PseudoHeader {
    pub fn new(src_addr: Ipv4Addr, dst_addr: Ipv4Addr, protocol: IpProtocol, length: u16) -> Self {
        Self {
            src_addr,
            dst_addr,
            protocol,
            length,
        }
    }

    /// Adds the 16-bit words of the pseudo-header to a one's complement accumulator.
    pub fn accumulate(&self, mut state: u32) -> u32 {
        let src_octets: [u8; 4] = self.src_addr.octets();
        state += u16::from_be_bytes([src_octets[0], src_octets[1]]) as u32;
        state += u16::from_be_bytes([src_octets[2], src_octets[3]]) as u32;

        let dst_octets: [u8; 4] = self.dst_addr.octets();
        state += u16::from_be_bytes([dst_octets[0], dst_octets[1]]) as u32;
        state += u16::from_be_bytes([dst_octets[2], dst_octets[3]]) as u32;

        // One byte of zeros followed by the protocol number.
        state += u16::from_be_bytes([0, self.protocol as u8]) as u32;

        state += self.length as u32;
        state
    }
}

//==============================================================================
// Trait Implementations
//==============================================================================

/// TryFrom trait implementation.
impl TryFrom<u8> for IpProtocol {
    type Error = Fail;

    fn try_from(n: u8) -> Result<Self, Fail> {
        match n {
            0x01 => Ok(IpProtocol::ICMPv4),
            0x06 => Ok(IpProtocol::TCP),
            0x11 => Ok(IpProtocol::UDP),
            _ => Err(Fail::new(ENOTSUP, "unsupported IPv4 protocol")),
        }
    }
}
