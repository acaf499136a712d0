// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    inetstack::protocols::layer3::NetworkInterface,
    runtime::fail::Fail,
};
use ::std::net::Ipv4Addr;

//======================================================================================================================
// Traits
//======================================================================================================================

/// API for the link layer underneath the stack. Segments addressed to local interfaces never reach it.
pub trait PhysicalLayer: 'static {
    /// Transmits a single serialized TCP segment to `destination` through `interface`.
    fn transmit(&mut self, interface: &NetworkInterface, destination: Ipv4Addr, segment: &[u8]) -> Result<(), Fail>;
}
