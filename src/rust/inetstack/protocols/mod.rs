// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

pub mod layer1;
pub mod layer3;
pub mod layer4;

use ::std::slice::ChunksExact;

/// Computes the generic checksum of a bytes array.
///
/// This iterates all 16-bit array elements, summing
/// the values into a 32-bit variable. This functions
/// pads with zero an octet at the end (if necessary)
/// to turn into a 16-bit element. The sum starts from
/// `start`, which lets callers fold in a pseudo-header.
pub fn compute_generic_checksum(buf: &[u8], start: u32) -> u32 {
    let mut state: u32 = start;

    let mut chunks_iter: ChunksExact<u8> = buf.chunks_exact(2);
    for chunk in chunks_iter.by_ref() {
        state += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
    }

    if let Some(&b) = chunks_iter.remainder().first() {
        state += u16::from_be_bytes([b, 0]) as u32;
    }

    state
}

/// Folds the carries of a 32-bit sum back into 16 bits and complements the result.
pub fn fold16(mut state: u32) -> u16 {
    while (state >> 16) != 0 {
        state = (state & 0xFFFF) + (state >> 16);
    }
    !state as u16
}
