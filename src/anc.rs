// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Ancillary data packets as stored in a frame's ancillary regions.
//!
//! Each packet is stored as:
//!
//! ```text
//! 0      0xFF        start of packet
//! 1      flags       bit 7 = location valid, bit 4 = chroma stream
//! 2..4   line        big-endian line number
//! 4..6   h-offset    big-endian horizontal offset
//! 6      DID
//! 7      SDID
//! 8      DC          user data word count
//! 9..    UDW         DC bytes
//! ```
//!
//! Packets are packed back to back and the rest of the region is zero.

use crate::{
    error::{Error, Result},
    geometry::{FrameRate, FrameSizeMode},
    timecode::Timecode,
};

const START_OF_PACKET: u8 = 0xFF;
const HEADER_BYTES: usize = 9;
const FLAG_LOCATION_VALID: u8 = 0x80;
const FLAG_CHROMA: u8 = 0x10;

/// SMPTE 352 payload identifier.
pub const DID_PAYLOAD_ID: u8 = 0x41;
pub const SDID_PAYLOAD_ID: u8 = 0x01;

/// SMPTE 12-2 ancillary timecode.
pub const DID_ATC: u8 = 0x60;
pub const SDID_ATC: u8 = 0x60;

/// Line the default packets are placed on.
pub const DEFAULT_ANC_LINE: u16 = 10;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AncPacket {
    pub did: u8,
    pub sdid: u8,
    pub line: u16,
    pub horizontal_offset: u16,
    pub chroma: bool,
    pub data: Vec<u8>,
}

impl AncPacket {
    pub fn new(did: u8, sdid: u8, line: u16, data: Vec<u8>) -> Self {
        Self {
            did,
            sdid,
            line,
            horizontal_offset: 0,
            chroma: false,
            data,
        }
    }

    /// SMPTE 352 video payload identifier packet.
    pub fn payload_identifier(vpid: u32, line: u16) -> Self {
        Self::new(DID_PAYLOAD_ID, SDID_PAYLOAD_ID, line, vpid.to_be_bytes().to_vec())
    }

    /// ATC timecode packet. Timecode digits go in the even user data words
    /// (upper nibble), binary groups in the odd ones.
    pub fn atc_timecode(tc: Timecode, line: u16) -> Self {
        let mut data = vec![0u8; 16];
        for (i, digit) in tc.bcd_digits().iter().enumerate() {
            data[2 * i] = digit << 4;
        }
        Self::new(DID_ATC, SDID_ATC, line, data)
    }

    /// The timecode carried by an ATC packet.
    pub fn timecode(&self) -> Option<Timecode> {
        if self.did != DID_ATC || self.sdid != SDID_ATC || self.data.len() < 16 {
            return None;
        }
        let mut digits = [0u8; 8];
        for (i, digit) in digits.iter_mut().enumerate() {
            *digit = self.data[2 * i] >> 4;
        }
        Timecode::from_bcd_digits(digits)
    }

    pub fn encoded_len(&self) -> usize {
        HEADER_BYTES + self.data.len()
    }

    pub fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        let count = u8::try_from(self.data.len()).map_err(|_| {
            Error::InvalidArgument(format!("{} user data words", self.data.len()))
        })?;
        let mut flags = FLAG_LOCATION_VALID;
        if self.chroma {
            flags |= FLAG_CHROMA;
        }
        out.push(START_OF_PACKET);
        out.push(flags);
        out.extend_from_slice(&self.line.to_be_bytes());
        out.extend_from_slice(&self.horizontal_offset.to_be_bytes());
        out.extend_from_slice(&[self.did, self.sdid, count]);
        out.extend_from_slice(&self.data);
        Ok(())
    }
}

/// Packs `packets` into a zero-padded region of `region_bytes`.
pub fn encode_region(packets: &[AncPacket], region_bytes: usize) -> Result<Vec<u8>> {
    let need: usize = packets.iter().map(AncPacket::encoded_len).sum();
    if need > region_bytes {
        return Err(Error::BufferTooSmall {
            need,
            have: region_bytes,
        });
    }
    let mut out = Vec::with_capacity(region_bytes);
    for packet in packets {
        packet.encode(&mut out)?;
    }
    out.resize(region_bytes, 0);
    Ok(out)
}

/// Parses packets until the end of `buf` or the first padding byte.
pub fn parse_region(buf: &[u8]) -> Result<Vec<AncPacket>> {
    let mut packets = Vec::new();
    let mut pos = 0;
    while pos < buf.len() {
        match buf[pos] {
            0 => break,
            START_OF_PACKET => {}
            other => {
                return Err(Error::InvalidArgument(format!(
                    "unexpected byte {other:#04x} at ancillary offset {pos}"
                )))
            }
        }
        let header = buf
            .get(pos..pos + HEADER_BYTES)
            .ok_or_else(|| Error::InvalidArgument("truncated ancillary header".into()))?;
        let count = header[8] as usize;
        let data = buf
            .get(pos + HEADER_BYTES..pos + HEADER_BYTES + count)
            .ok_or_else(|| Error::InvalidArgument("truncated ancillary payload".into()))?;
        packets.push(AncPacket {
            did: header[6],
            sdid: header[7],
            line: u16::from_be_bytes([header[2], header[3]]),
            horizontal_offset: u16::from_be_bytes([header[4], header[5]]),
            chroma: header[1] & FLAG_CHROMA != 0,
            data: data.to_vec(),
        });
        pos += HEADER_BYTES + count;
    }
    Ok(packets)
}

/// SMPTE 352 payload for a progressive 4:2:2 10-bit picture.
pub fn payload_identifier_for(rate: FrameRate, mode: FrameSizeMode) -> u32 {
    let standard: u8 = match mode {
        FrameSizeMode::Standard => 0x85,
        FrameSizeMode::Quad => 0xCE,
        FrameSizeMode::QuadQuad => 0xD0,
    };
    let rate_code: u8 = match rate {
        FrameRate::FPS_23_98 => 0x2,
        FrameRate::FPS_24 => 0x3,
        FrameRate::FPS_25 => 0x5,
        FrameRate::FPS_29_97 => 0x6,
        FrameRate::FPS_30 => 0x7,
        FrameRate::FPS_50 => 0x9,
        FrameRate::FPS_59_94 => 0xA,
        FrameRate::FPS_60 => 0xB,
        _ => 0x0,
    };
    // progressive transport and picture
    let picture = 0xC0 | rate_code;
    u32::from_be_bytes([standard, picture, 0x00, 0x01])
}
