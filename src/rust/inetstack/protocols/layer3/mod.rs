// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Exports
//======================================================================================================================

pub mod interface;
pub mod ip;

pub use self::{
    interface::{
        InterfaceRegistry,
        NetworkInterface,
    },
    ip::{
        IpProtocol,
        PseudoHeader,
    },
};
