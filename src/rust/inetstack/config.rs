// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    inetstack::protocols::layer3::NetworkInterface,
    runtime::{
        fail::Fail,
        network::{
            config::TcpConfig,
            consts::DEFAULT_MTU,
        },
    },
};
use ::std::{
    fs::File,
    io::Read,
    net::Ipv4Addr,
    ops::Index,
    str::FromStr,
    time::Duration,
};
use ::yaml_rust::{
    Yaml,
    YamlLoader,
};

//======================================================================================================================
// Constants
//======================================================================================================================

// Prefix of environment variables that override options of the configuration file.
const ENV_PREFIX: &str = "NETSTACK_";

// Network interfaces attached to the stack. The loopback interface is always present and is not listed here.
mod interfaces_config {
    pub const SECTION_NAME: &str = "interfaces";
    pub const NAME: &str = "name";
    pub const ADDRESS: &str = "address";
    pub const NETMASK: &str = "netmask";
    pub const GATEWAY: &str = "gateway";
    pub const MTU: &str = "mtu";
}

// TCP stack configuration.
mod tcp_config {
    pub const SECTION_NAME: &str = "tcp_config";
    pub const MSS: &str = "mss";
    pub const RETRIES: &str = "retries";
    pub const HANDSHAKE_TIMEOUT_MS: &str = "handshake_timeout_ms";
    pub const WINDOW_SIZE: &str = "window_size";
    pub const TIME_WAIT_TIMEOUT_MS: &str = "time_wait_timeout_ms";
    pub const MAX_SOCKETS: &str = "max_sockets";
    pub const MAX_INTERFACES: &str = "max_interfaces";
    pub const RX_CHECKSUM_OFFLOAD: &str = "rx_checksum_offload";
    pub const TX_CHECKSUM_OFFLOAD: &str = "tx_checksum_offload";
}

//======================================================================================================================
// Structures
//======================================================================================================================

/// Stack configuration read from a YAML document.
#[derive(Clone, Debug)]
pub struct Config(pub Yaml);

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl Config {
    /// Reads a configuration file into a [Config] object.
    pub fn new(config_path: &str) -> Result<Self, Fail> {
        let mut config_s: String = String::new();
        File::open(config_path)?.read_to_string(&mut config_s)?;
        Self::parse(&config_s)
    }

    /// Parses a YAML document into a [Config] object.
    pub fn parse(config_s: &str) -> Result<Self, Fail> {
        let config: Vec<Yaml> = match YamlLoader::load_from_str(config_s) {
            Ok(config) => config,
            Err(e) => {
                let cause: String = format!("malformed configuration ({})", e);
                error!("parse(): {}", cause);
                return Err(Fail::new(libc::EINVAL, &cause));
            },
        };
        match &config[..] {
            [c] => Ok(Self(c.clone())),
            _ => Err(Fail::new(libc::EINVAL, "Wrong number of config objects")),
        }
    }

    /// Builds the TCP configuration. Every option may be overridden by an environment variable named after the option
    /// (e.g. `NETSTACK_MSS`). Missing options take their defaults.
    pub fn tcp_config(&self) -> Result<TcpConfig, Fail> {
        let section: &Yaml = self.0.index(tcp_config::SECTION_NAME);
        let millis = |index: &str| -> Result<Option<Duration>, Fail> {
            Ok(Self::get_optional_int_option::<u64>(section, index)?.map(Duration::from_millis))
        };

        TcpConfig::new(
            Self::get_optional_int_option(section, tcp_config::MSS)?,
            Self::get_optional_int_option(section, tcp_config::RETRIES)?,
            millis(tcp_config::HANDSHAKE_TIMEOUT_MS)?,
            Self::get_optional_int_option(section, tcp_config::WINDOW_SIZE)?,
            millis(tcp_config::TIME_WAIT_TIMEOUT_MS)?,
            Self::get_optional_int_option(section, tcp_config::MAX_SOCKETS)?,
            Self::get_optional_int_option(section, tcp_config::MAX_INTERFACES)?,
            Self::get_optional_bool_option(section, tcp_config::RX_CHECKSUM_OFFLOAD)?,
            Self::get_optional_bool_option(section, tcp_config::TX_CHECKSUM_OFFLOAD)?,
        )
    }

    /// Reads the list of network interfaces.
    pub fn interfaces(&self) -> Result<Vec<NetworkInterface>, Fail> {
        let entries: &[Yaml] = match self.0.index(interfaces_config::SECTION_NAME) {
            Yaml::BadValue | Yaml::Null => return Ok(Vec::new()),
            Yaml::Array(entries) => entries,
            _ => {
                let cause: String = format!("parameter \"{}\" has unexpected type", interfaces_config::SECTION_NAME);
                error!("interfaces(): {}", cause);
                return Err(Fail::new(libc::EINVAL, &cause));
            },
        };

        let mut interfaces: Vec<NetworkInterface> = Vec::with_capacity(entries.len());
        for entry in entries {
            let name: String = Self::get_typed_option(entry, interfaces_config::NAME, |yaml: &Yaml| {
                yaml.as_str().map(|s| s.to_string())
            })?;
            let address: Ipv4Addr = Self::get_address_option(entry, interfaces_config::ADDRESS)?;
            let netmask: Ipv4Addr = Self::get_address_option(entry, interfaces_config::NETMASK)?;
            let gateway: Option<Ipv4Addr> = match entry.index(interfaces_config::GATEWAY) {
                Yaml::BadValue | Yaml::Null => None,
                _ => Some(Self::get_address_option(entry, interfaces_config::GATEWAY)?),
            };
            let mtu: u16 = match entry.index(interfaces_config::MTU) {
                Yaml::BadValue | Yaml::Null => DEFAULT_MTU,
                _ => Self::get_int_option(entry, interfaces_config::MTU)?,
            };

            if address.is_unspecified() || address.is_broadcast() {
                let cause: String = format!("invalid address for interface {} ({})", name, address);
                error!("interfaces(): {}", cause);
                return Err(Fail::new(libc::EINVAL, &cause));
            }
            interfaces.push(NetworkInterface::new(&name, address, netmask, gateway, mtu));
        }
        Ok(interfaces)
    }

    //==================================================================================================================
    // Static Functions
    //==================================================================================================================

    /// Index `yaml` to find the value at `index`, validating that the index exists.
    fn get_option<'a>(yaml: &'a Yaml, index: &str) -> Result<&'a Yaml, Fail> {
        match yaml.index(index) {
            Yaml::BadValue => {
                let message: String = format!("missing configuration option \"{}\"", index);
                Err(Fail::new(libc::EINVAL, message.as_str()))
            },
            value => Ok(value),
        }
    }

    /// Index `yaml` to find the value at `index`, validating that it exists and that the receiver returns Some(_).
    fn get_typed_option<'a, T, Fn>(yaml: &'a Yaml, index: &str, receiver: Fn) -> Result<T, Fail>
    where
        Fn: FnOnce(&'a Yaml) -> Option<T>,
    {
        let option: &'a Yaml = Self::get_option(yaml, index)?;
        match receiver(option) {
            Some(value) => Ok(value),
            None => {
                let message: String = format!("parameter {} has unexpected type", index);
                Err(Fail::new(libc::EINVAL, message.as_str()))
            },
        }
    }

    fn get_address_option(yaml: &Yaml, index: &str) -> Result<Ipv4Addr, Fail> {
        Self::get_typed_option(yaml, index, |option: &Yaml| option.as_str().and_then(|s| s.parse().ok()))
    }

    /// Reads the environment variable that overrides `index`.
    fn get_typed_env_option<T: FromStr>(index: &str) -> Result<Option<T>, Fail> {
        let name: String = format!("{}{}", ENV_PREFIX, index.to_uppercase());
        if let Ok(var) = ::std::env::var(&name) {
            if let Ok(value) = var.as_str().parse() {
                return Ok(Some(value));
            } else {
                let message: String = format!("parameter {} has unexpected type", name);
                return Err(Fail::new(libc::EINVAL, message.as_str()));
            }
        }
        Ok(None)
    }

    /// Similar to `get_typed_option` using `Yaml::as_i64` as the receiver, but additionally verifies that the
    /// destination type may hold the i64 value.
    fn get_int_option<T: TryFrom<i64>>(yaml: &Yaml, index: &str) -> Result<T, Fail> {
        let val: i64 = Self::get_typed_option(yaml, index, &Yaml::as_i64)?;
        match T::try_from(val) {
            Ok(val) => Ok(val),
            _ => {
                let message: String = format!("parameter \"{}\" is out of range", index);
                Err(Fail::new(libc::ERANGE, message.as_str()))
            },
        }
    }

    /// Reads an integer option from the environment first and then from `yaml`. Missing options yield `None`.
    fn get_optional_int_option<T: TryFrom<i64> + FromStr>(yaml: &Yaml, index: &str) -> Result<Option<T>, Fail> {
        if let Some(value) = Self::get_typed_env_option(index)? {
            return Ok(Some(value));
        }
        match yaml.index(index) {
            Yaml::BadValue => Ok(None),
            _ => Ok(Some(Self::get_int_option(yaml, index)?)),
        }
    }

    /// Same as `get_optional_int_option` for boolean options.
    fn get_optional_bool_option(yaml: &Yaml, index: &str) -> Result<Option<bool>, Fail> {
        if let Some(value) = Self::get_typed_env_option(index)? {
            return Ok(Some(value));
        }
        match yaml.index(index) {
            Yaml::BadValue => Ok(None),
            _ => Ok(Some(Self::get_typed_option(yaml, index, &Yaml::as_bool)?)),
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
