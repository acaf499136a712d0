// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

mod tcp;

//==============================================================================
// Exports
//==============================================================================

pub use self::tcp::TcpConfig;
