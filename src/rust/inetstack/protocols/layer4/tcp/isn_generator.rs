// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::inetstack::protocols::layer4::tcp::SeqNumber;
use ::std::{
    net::SocketAddrV4,
    num::Wrapping,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// Initial sequence number generator (RFC 6528). The ISN is a keyed digest of the connection four-tuple plus a counter
/// that moves on every generated number.
pub struct IsnGenerator {
    nonce: u32,
    counter: Wrapping<u16>,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl IsnGenerator {
    pub fn new(nonce: u32) -> Self {
        Self {
            nonce,
            counter: Wrapping(0),
        }
    }

    pub fn generate(&mut self, local: &SocketAddrV4, remote: &SocketAddrV4) -> SeqNumber {
        let crc: crc::Crc<u32> = crc::Crc::<u32>::new(&crc::CRC_32_CKSUM);
        let mut digest: crc::Digest<u32> = crc.digest();
        digest.update(&remote.ip().octets());
        digest.update(&remote.port().to_be_bytes());
        digest.update(&local.ip().octets());
        digest.update(&local.port().to_be_bytes());
        digest.update(&self.nonce.to_be_bytes());
        let isn: SeqNumber = SeqNumber::from(digest.finalize().wrapping_add(self.counter.0 as u32));
        self.counter += Wrapping(1);
        isn
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
