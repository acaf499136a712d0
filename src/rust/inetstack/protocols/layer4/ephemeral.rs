// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::fail::Fail;
use ::std::collections::HashSet;

//======================================================================================================================
// Constants
//======================================================================================================================

/// https://datatracker.ietf.org/doc/html/rfc6335
pub const FIRST_PRIVATE_PORT_NUMBER: u16 = 49152;
pub const LAST_PRIVATE_PORT_NUMBER: u16 = 65535;

//======================================================================================================================
// Structures
//======================================================================================================================

/// Hands out port numbers from the dynamic range in increasing order, wrapping back to the start of the range and
/// skipping port numbers that are still in use.
pub struct EphemeralPorts {
    next: u16,
    in_use: HashSet<u16>,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl EphemeralPorts {
    pub fn is_private(port_number: u16) -> bool {
        port_number >= FIRST_PRIVATE_PORT_NUMBER
    }

    // Any port number will be allocated.
    pub fn alloc(&mut self) -> Result<u16, Fail> {
        let range_size: usize = (LAST_PRIVATE_PORT_NUMBER - FIRST_PRIVATE_PORT_NUMBER) as usize + 1;
        if self.in_use.len() >= range_size {
            let cause: &str = "all port numbers in the ephemeral range are currently in use";
            error!("alloc(): {}", cause);
            return Err(Fail::new(libc::EADDRINUSE, cause));
        }

        loop {
            let port_number: u16 = self.next;
            self.next = if port_number == LAST_PRIVATE_PORT_NUMBER {
                FIRST_PRIVATE_PORT_NUMBER
            } else {
                port_number + 1
            };
            if self.in_use.insert(port_number) {
                trace!("alloc(): port_number={}", port_number);
                return Ok(port_number);
            }
        }
    }

    // A specific port number will be reserved, if available.
    pub fn reserve(&mut self, port_number: u16) -> Result<(), Fail> {
        if !Self::is_private(port_number) {
            let cause: String = format!("port_number {} is not in the ephemeral range", port_number);
            error!("reserve(): {}", &cause);
            return Err(Fail::new(libc::EINVAL, &cause));
        }

        if !self.in_use.insert(port_number) {
            let cause: String = format!("port_number {} is already in use", port_number);
            error!("reserve(): {}", &cause);
            return Err(Fail::new(libc::EADDRINUSE, &cause));
        }

        Ok(())
    }

    pub fn free(&mut self, port_number: u16) -> Result<(), Fail> {
        if !Self::is_private(port_number) {
            let cause: String = format!("port_number {} is not in the ephemeral range", port_number);
            error!("free(): {}", &cause);
            return Err(Fail::new(libc::EINVAL, &cause));
        }

        if !self.in_use.remove(&port_number) {
            let cause: String = format!("port_number {} is not allocated", port_number);
            error!("free(): {}", &cause);
            return Err(Fail::new(libc::EFAULT, &cause));
        }

        Ok(())
    }

    pub fn is_in_use(&self, port_number: u16) -> bool {
        self.in_use.contains(&port_number)
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Default for EphemeralPorts {
    fn default() -> Self {
        Self {
            next: FIRST_PRIVATE_PORT_NUMBER,
            in_use: HashSet::new(),
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
