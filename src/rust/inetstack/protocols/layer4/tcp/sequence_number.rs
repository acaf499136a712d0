// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

// TCP sequence numbers live in a 32-bit space that wraps around (RFC 793, Section 3.3). All arithmetic is modulo 2^32
// and comparisons only make sense between numbers that are less than 2^31 apart, so `a < b < c < a` is possible. We
// give sequence numbers their own type to keep plain integer arithmetic away from them.

//======================================================================================================================
// Imports
//======================================================================================================================

use ::std::{
    cmp::Ordering,
    fmt,
    ops::{
        Add,
        Sub,
    },
};

//======================================================================================================================
// Structures
//======================================================================================================================

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct SeqNumber {
    value: u32,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl SeqNumber {
    /// Returns the number of sequence numbers between `earlier` and `self`.
    pub fn distance_from(self, earlier: SeqNumber) -> u32 {
        self.value.wrapping_sub(earlier.value)
    }

    /// Advances the sequence number by `len` bytes.
    pub fn advance(self, len: usize) -> SeqNumber {
        SeqNumber::from(self.value.wrapping_add(len as u32))
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl From<SeqNumber> for u32 {
    #[inline]
    fn from(item: SeqNumber) -> u32 {
        item.value
    }
}

impl From<u32> for SeqNumber {
    #[inline]
    fn from(item: u32) -> Self {
        SeqNumber { value: item }
    }
}

impl fmt::Display for SeqNumber {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.value.fmt(f)
    }
}

impl Add for SeqNumber {
    type Output = SeqNumber;

    #[inline]
    fn add(self, other: SeqNumber) -> SeqNumber {
        SeqNumber::from(self.value.wrapping_add(other.value))
    }
}

impl Sub for SeqNumber {
    type Output = SeqNumber;

    #[inline]
    fn sub(self, other: SeqNumber) -> SeqNumber {
        SeqNumber::from(self.value.wrapping_sub(other.value))
    }
}

// Sequence numbers are compared by the sign of their wrapped difference. This is not a total order, so [Ord] is
// deliberately not implemented and sequence numbers must never be sorted.
impl PartialOrd for SeqNumber {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some((self.value.wrapping_sub(other.value) as i32).cmp(&0))
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
