// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    inetstack::protocols::{
        compute_generic_checksum,
        fold16,
        layer3::ip::PseudoHeader,
        layer4::tcp::SeqNumber,
    },
    runtime::fail::Fail,
};
use ::arrayvec::ArrayVec;
use ::libc::EBADMSG;

//======================================================================================================================
// Constants
//======================================================================================================================

pub const MIN_TCP_HEADER_SIZE: usize = 20;
pub const MAX_TCP_HEADER_SIZE: usize = 60;
pub const MAX_TCP_OPTIONS: usize = 5;

// Option kinds (RFC 793 and RFC 9293).
const OPTION_END_OF_LIST: u8 = 0;
const OPTION_NO_OPERATION: u8 = 1;
const OPTION_MAXIMUM_SEGMENT_SIZE: u8 = 2;

//======================================================================================================================
// Structures
//======================================================================================================================

/// TCP options that we understand. Unknown options are skipped when parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpOptions {
    EndOfOptionsList,
    NoOperation,
    MaximumSegmentSize(u16),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub seq_num: SeqNumber,
    pub ack_num: SeqNumber,

    // Octet 13: [ CWR ] [ ECE ] [ URG ] [ ACK ] [ PSH ] [ RST ] [ SYN ] [ FIN ]
    pub urg: bool,
    pub ack: bool,
    pub psh: bool,
    pub rst: bool,
    pub syn: bool,
    pub fin: bool,

    pub window_size: u16,

    // The checksum is verified when parsing and computed when serializing.
    pub urgent_pointer: u16,

    options: ArrayVec<TcpOptions, MAX_TCP_OPTIONS>,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl TcpOptions {
    fn compute_size(&self) -> usize {
        match self {
            TcpOptions::EndOfOptionsList => 0,
            TcpOptions::NoOperation => 1,
            TcpOptions::MaximumSegmentSize(..) => 4,
        }
    }

    fn serialize(&self, buf: &mut [u8]) -> usize {
        match self {
            TcpOptions::EndOfOptionsList => 0,
            TcpOptions::NoOperation => {
                buf[0] = OPTION_NO_OPERATION;
                1
            },
            TcpOptions::MaximumSegmentSize(mss) => {
                buf[0] = OPTION_MAXIMUM_SEGMENT_SIZE;
                buf[1] = 4;
                buf[2..4].copy_from_slice(&mss.to_be_bytes());
                4
            },
        }
    }
}

impl TcpHeader {
    pub fn new(src_port: u16, dst_port: u16) -> Self {
        Self {
            src_port,
            dst_port,
            seq_num: SeqNumber::from(0),
            ack_num: SeqNumber::from(0),
            urg: false,
            ack: false,
            psh: false,
            rst: false,
            syn: false,
            fin: false,
            window_size: 0,
            urgent_pointer: 0,
            options: ArrayVec::new(),
        }
    }

    /// Parses the segment in `buf` into its header and payload. The checksum is verified against `pseudo_header`
    /// unless `rx_checksum_offload` is set.
    pub fn parse<'a>(
        buf: &'a [u8],
        pseudo_header: &PseudoHeader,
        rx_checksum_offload: bool,
    ) -> Result<(Self, &'a [u8]), Fail> {
        if buf.len() < MIN_TCP_HEADER_SIZE {
            return Err(Fail::new(EBADMSG, "TCP segment too small"));
        }
        let data_offset: usize = (buf[12] >> 4) as usize * 4;
        if data_offset < MIN_TCP_HEADER_SIZE {
            return Err(Fail::new(EBADMSG, "TCP data offset too small"));
        }
        if buf.len() < data_offset {
            return Err(Fail::new(EBADMSG, "TCP segment smaller than data offset"));
        }
        if !rx_checksum_offload && !verify(pseudo_header, buf) {
            return Err(Fail::new(EBADMSG, "TCP checksum mismatch"));
        }
        let (hdr_buf, data_buf): (&[u8], &[u8]) = buf.split_at(data_offset);

        let mut header: TcpHeader = TcpHeader::new(
            u16::from_be_bytes([hdr_buf[0], hdr_buf[1]]),
            u16::from_be_bytes([hdr_buf[2], hdr_buf[3]]),
        );
        header.seq_num = SeqNumber::from(u32::from_be_bytes([hdr_buf[4], hdr_buf[5], hdr_buf[6], hdr_buf[7]]));
        header.ack_num = SeqNumber::from(u32::from_be_bytes([hdr_buf[8], hdr_buf[9], hdr_buf[10], hdr_buf[11]]));

        header.urg = (hdr_buf[13] & (1 << 5)) != 0;
        header.ack = (hdr_buf[13] & (1 << 4)) != 0;
        header.psh = (hdr_buf[13] & (1 << 3)) != 0;
        header.rst = (hdr_buf[13] & (1 << 2)) != 0;
        header.syn = (hdr_buf[13] & (1 << 1)) != 0;
        header.fin = (hdr_buf[13] & (1 << 0)) != 0;

        header.window_size = u16::from_be_bytes([hdr_buf[14], hdr_buf[15]]);
        header.urgent_pointer = u16::from_be_bytes([hdr_buf[18], hdr_buf[19]]);

        header.parse_options(&hdr_buf[MIN_TCP_HEADER_SIZE..])?;

        Ok((header, data_buf))
    }

    fn parse_options(&mut self, mut options: &[u8]) -> Result<(), Fail> {
        while let Some(&kind) = options.first() {
            match kind {
                OPTION_END_OF_LIST => break,
                OPTION_NO_OPERATION => {
                    options = &options[1..];
                    continue;
                },
                _ => (),
            }

            let length: usize = match options.get(1) {
                Some(&length) if length >= 2 && length as usize <= options.len() => length as usize,
                _ => return Err(Fail::new(EBADMSG, "malformed TCP option length")),
            };
            match kind {
                OPTION_MAXIMUM_SEGMENT_SIZE if length == 4 => {
                    let mss: u16 = u16::from_be_bytes([options[2], options[3]]);
                    if self.options.try_push(TcpOptions::MaximumSegmentSize(mss)).is_err() {
                        warn!("parse_options(): too many options, ignoring MSS option");
                    }
                },
                OPTION_MAXIMUM_SEGMENT_SIZE => return Err(Fail::new(EBADMSG, "MSS size was not 4")),
                kind => trace!("parse_options(): skipping unsupported option (kind={}, length={})", kind, length),
            }
            options = &options[length..];
        }
        Ok(())
    }

    /// Serializes this header followed by `payload`. The checksum is computed over `pseudo_header`, whose length must
    /// match the length of the serialized segment.
    pub fn serialize(&self, pseudo_header: &PseudoHeader, payload: &[u8], tx_checksum_offload: bool) -> Vec<u8> {
        let header_size: usize = self.compute_size();
        let mut segment: Vec<u8> = vec![0; header_size + payload.len()];
        debug_assert_eq!(segment.len(), pseudo_header.length as usize);

        let hdr_buf: &mut [u8] = &mut segment[..header_size];
        hdr_buf[0..2].copy_from_slice(&self.src_port.to_be_bytes());
        hdr_buf[2..4].copy_from_slice(&self.dst_port.to_be_bytes());
        hdr_buf[4..8].copy_from_slice(&u32::from(self.seq_num).to_be_bytes());
        hdr_buf[8..12].copy_from_slice(&u32::from(self.ack_num).to_be_bytes());
        hdr_buf[12] = ((header_size / 4) as u8) << 4;

        let mut flags: u8 = 0;
        if self.urg {
            flags |= 1 << 5;
        }
        if self.ack {
            flags |= 1 << 4;
        }
        if self.psh {
            flags |= 1 << 3;
        }
        if self.rst {
            flags |= 1 << 2;
        }
        if self.syn {
            flags |= 1 << 1;
        }
        if self.fin {
            flags |= 1 << 0;
        }
        hdr_buf[13] = flags;

        hdr_buf[14..16].copy_from_slice(&self.window_size.to_be_bytes());
        hdr_buf[18..20].copy_from_slice(&self.urgent_pointer.to_be_bytes());

        let mut cur_pos: usize = MIN_TCP_HEADER_SIZE;
        for option in self.iter_options() {
            cur_pos += option.serialize(&mut hdr_buf[cur_pos..]);
        }
        // The remainder stays zeroed, which reads as an "End of options list" followed by padding.

        segment[header_size..].copy_from_slice(payload);

        if !tx_checksum_offload {
            let checksum: u16 = tcp_checksum(pseudo_header, &segment);
            segment[16..18].copy_from_slice(&checksum.to_be_bytes());
        }
        segment
    }

    pub fn compute_size(&self) -> usize {
        let mut size: usize = MIN_TCP_HEADER_SIZE;
        for option in self.iter_options() {
            size += option.compute_size();
        }
        if !self.options.is_empty() {
            // Room for the "End of options list".
            size += 1;
        }
        // Round up to a multiple of 4 so the payload stays 32 bit aligned.
        (size + 3) & !0x3
    }

    pub fn iter_options(&self) -> impl Iterator<Item = &TcpOptions> {
        self.options.iter()
    }

    pub fn push_option(&mut self, option: TcpOptions) {
        if self.options.try_push(option).is_err() {
            warn!("push_option(): option list is full, dropping {:?}", option);
        }
    }

    /// Returns the value of the MSS option, if present.
    pub fn mss(&self) -> Option<u16> {
        self.iter_options().find_map(|option| match option {
            TcpOptions::MaximumSegmentSize(mss) => Some(*mss),
            _ => None,
        })
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Computes the checksum of `segment`, whose checksum field must be zero, over `pseudo_header`.
pub fn tcp_checksum(pseudo_header: &PseudoHeader, segment: &[u8]) -> u16 {
    let state: u32 = pseudo_header.accumulate(0);
    fold16(compute_generic_checksum(segment, state))
}

/// Checks the checksum of a received `segment`. Summing a segment that includes its own valid checksum yields zero
/// after complementing.
pub fn verify(pseudo_header: &PseudoHeader, segment: &[u8]) -> bool {
    tcp_checksum(pseudo_header, segment) == 0
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
