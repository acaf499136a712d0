// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Exports
//======================================================================================================================

pub mod ctrlblk;
pub mod header;
pub mod isn_generator;
pub mod rto;
pub mod sequence_number;
pub mod state;

pub use self::{
    ctrlblk::{
        Connection,
        ConnectionId,
        TimerEvent,
        TimerKind,
    },
    header::TcpHeader,
    sequence_number::SeqNumber,
    state::State,
};
