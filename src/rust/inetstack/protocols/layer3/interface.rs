// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    inetstack::protocols::layer3::ip::{
        IpProtocol,
        PseudoHeader,
    },
    runtime::{
        fail::Fail,
        network::consts::{
            DEFAULT_MTU,
            LOOPBACK_MTU,
        },
    },
};
use ::std::net::Ipv4Addr;

//======================================================================================================================
// Constants
//======================================================================================================================

/// Name of the interface that is always present.
pub const LOOPBACK_NAME: &str = "lo";

//======================================================================================================================
// Structures
//======================================================================================================================

/// A configured network attachment point.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkInterface {
    name: String,
    address: Ipv4Addr,
    netmask: Ipv4Addr,
    gateway: Option<Ipv4Addr>,
    mtu: u16,
    active: bool,
}

/// Fixed-size list of network interfaces. The loopback interface occupies the first slot.
pub struct InterfaceRegistry {
    interfaces: Vec<NetworkInterface>,
    max_interfaces: usize,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl NetworkInterface {
    pub fn new(name: &str, address: Ipv4Addr, netmask: Ipv4Addr, gateway: Option<Ipv4Addr>, mtu: u16) -> Self {
        Self {
            name: name.to_string(),
            address,
            netmask,
            gateway,
            mtu,
            active: true,
        }
    }

    pub fn loopback() -> Self {
        Self::new(
            LOOPBACK_NAME,
            Ipv4Addr::LOCALHOST,
            Ipv4Addr::new(255, 0, 0, 0),
            None,
            LOOPBACK_MTU,
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> Ipv4Addr {
        self.address
    }

    pub fn netmask(&self) -> Ipv4Addr {
        self.netmask
    }

    pub fn gateway(&self) -> Option<Ipv4Addr> {
        self.gateway
    }

    pub fn mtu(&self) -> u16 {
        self.mtu
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_loopback(&self) -> bool {
        self.name == LOOPBACK_NAME
    }

    /// Checks if `address` is on the network attached to this interface.
    pub fn contains(&self, address: Ipv4Addr) -> bool {
        let mask: u32 = u32::from(self.netmask);
        (u32::from(self.address) & mask) == (u32::from(address) & mask)
    }
}

impl InterfaceRegistry {
    /// Creates a registry that holds up to `max_interfaces` entries, including the loopback interface.
    pub fn new(max_interfaces: usize) -> Self {
        let max_interfaces: usize = max_interfaces.max(1);
        let mut interfaces: Vec<NetworkInterface> = Vec::with_capacity(max_interfaces);
        interfaces.push(NetworkInterface::loopback());
        Self {
            interfaces,
            max_interfaces,
        }
    }

    /// Registers an interface with the default MTU.
    pub fn add(&mut self, name: &str, address: Ipv4Addr, netmask: Ipv4Addr, gateway: Option<Ipv4Addr>) -> Result<(), Fail> {
        self.add_interface(NetworkInterface::new(name, address, netmask, gateway, DEFAULT_MTU))
    }

    /// Registers a fully described interface.
    pub fn add_interface(&mut self, interface: NetworkInterface) -> Result<(), Fail> {
        if self.interfaces.len() >= self.max_interfaces {
            let cause: String = format!("interface registry is full (max_interfaces={})", self.max_interfaces);
            error!("add(): {}", cause);
            return Err(Fail::new(libc::ENOSPC, &cause));
        }
        if self.get(interface.name()).is_some() {
            let cause: String = format!("interface {} is already registered", interface.name());
            error!("add(): {}", cause);
            return Err(Fail::new(libc::EEXIST, &cause));
        }
        info!(
            "add(): name={} address={} netmask={} gateway={:?} mtu={}",
            interface.name, interface.address, interface.netmask, interface.gateway, interface.mtu
        );
        self.interfaces.push(interface);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&NetworkInterface> {
        self.interfaces.iter().find(|interface| interface.name == name)
    }

    pub fn set_mtu(&mut self, name: &str, mtu: u16) -> Result<(), Fail> {
        self.get_mut(name)?.mtu = mtu;
        Ok(())
    }

    pub fn set_active(&mut self, name: &str, active: bool) -> Result<(), Fail> {
        self.get_mut(name)?.active = active;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.interfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interfaces.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NetworkInterface> {
        self.interfaces.iter()
    }

    /// Returns the first active interface whose network contains `address`.
    pub fn find_by_address(&self, address: Ipv4Addr) -> Option<&NetworkInterface> {
        self.interfaces
            .iter()
            .find(|interface| interface.active && interface.contains(address))
    }

    /// Selects the interface used to reach `destination`: a directly attached network first, then the first active
    /// interface that has a gateway.
    pub fn route(&self, destination: Ipv4Addr) -> Option<&NetworkInterface> {
        self.find_by_address(destination).or_else(|| {
            self.interfaces
                .iter()
                .find(|interface| interface.active && interface.gateway.is_some())
        })
    }

    /// Checks if segments sent to `address` should be delivered back into this stack.
    pub fn is_local(&self, address: Ipv4Addr) -> bool {
        self.interfaces.iter().any(|interface| {
            interface.active && (interface.address == address || (interface.is_loopback() && interface.contains(address)))
        })
    }

    /// Builds the TCP checksum pseudo-header for a segment of `length` bytes.
    pub fn pseudo_header(&self, src_addr: Ipv4Addr, dst_addr: Ipv4Addr, length: usize) -> Result<PseudoHeader, Fail> {
        let length: u16 = match u16::try_from(length) {
            Ok(length) => length,
            Err(_) => {
                let cause: String = format!("segment too long for pseudo-header (length={})", length);
                error!("pseudo_header(): {}", cause);
                return Err(Fail::new(libc::EMSGSIZE, &cause));
            },
        };
        Ok(PseudoHeader::new(src_addr, dst_addr, IpProtocol::TCP, length))
    }

    fn get_mut(&mut self, name: &str) -> Result<&mut NetworkInterface, Fail> {
        match self.interfaces.iter_mut().find(|interface| interface.name == name) {
            Some(interface) => Ok(interface),
            None => {
                let cause: String = format!("no such interface (name={})", name);
                error!("get_mut(): {}", cause);
                Err(Fail::new(libc::ENODEV, &cause))
            },
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
