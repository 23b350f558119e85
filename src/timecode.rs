// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Non-drop-frame timecode and its RP188 register packing.

use core::fmt;

/// RP188 timecode as carried in a pair of 32-bit registers.
///
/// - low: bits 0-3 frame units, 8-9 frame tens, 16-19 second units,
///   24-26 second tens
/// - high: bits 0-3 minute units, 8-10 minute tens, 16-19 hour units,
///   24-25 hour tens
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Rp188 {
    pub low: u32,
    pub high: u32,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Timecode {
    pub hours: u8,
    pub minutes: u8,
    pub seconds: u8,
    pub frames: u8,
}

impl Timecode {
    pub const fn new(hours: u8, minutes: u8, seconds: u8, frames: u8) -> Self {
        Self {
            hours,
            minutes,
            seconds,
            frames,
        }
    }

    /// Timecode of frame `count` at `fps`, wrapping at 24 hours.
    pub fn from_frame_count(count: u64, fps: u32) -> Self {
        let fps = fps.max(1) as u64;
        let count = count % (24 * 3600 * fps);
        let seconds = count / fps;
        Self {
            hours: (seconds / 3600) as u8,
            minutes: (seconds / 60 % 60) as u8,
            seconds: (seconds % 60) as u8,
            frames: (count % fps) as u8,
        }
    }

    pub fn to_frame_count(&self, fps: u32) -> u64 {
        let seconds =
            self.hours as u64 * 3600 + self.minutes as u64 * 60 + self.seconds as u64;
        seconds * fps as u64 + self.frames as u64
    }

    /// The eight BCD digits, least significant first: frame units, frame
    /// tens, second units, second tens, minute units, minute tens, hour
    /// units, hour tens.
    pub fn bcd_digits(&self) -> [u8; 8] {
        [
            self.frames % 10,
            self.frames / 10,
            self.seconds % 10,
            self.seconds / 10,
            self.minutes % 10,
            self.minutes / 10,
            self.hours % 10,
            self.hours / 10,
        ]
    }

    pub fn from_bcd_digits(digits: [u8; 8]) -> Option<Self> {
        if digits.iter().any(|d| *d > 9) {
            return None;
        }
        let tc = Self {
            frames: digits[1] * 10 + digits[0],
            seconds: digits[3] * 10 + digits[2],
            minutes: digits[5] * 10 + digits[4],
            hours: digits[7] * 10 + digits[6],
        };
        (tc.seconds < 60 && tc.minutes < 60 && tc.hours < 24).then_some(tc)
    }

    pub fn to_rp188(&self) -> Rp188 {
        let d = self.bcd_digits().map(u32::from);
        Rp188 {
            low: d[0] | (d[1] & 0x3) << 8 | d[2] << 16 | (d[3] & 0x7) << 24,
            high: d[4] | (d[5] & 0x7) << 8 | d[6] << 16 | (d[7] & 0x3) << 24,
        }
    }

    /// Decodes register contents, `None` if a digit is not valid BCD.
    pub fn from_rp188(value: Rp188) -> Option<Self> {
        let nibble = |word: u32, shift: u32, mask: u32| ((word >> shift) & mask) as u8;
        Self::from_bcd_digits([
            nibble(value.low, 0, 0xf),
            nibble(value.low, 8, 0x3),
            nibble(value.low, 16, 0xf),
            nibble(value.low, 24, 0x7),
            nibble(value.high, 0, 0xf),
            nibble(value.high, 8, 0x7),
            nibble(value.high, 16, 0xf),
            nibble(value.high, 24, 0x3),
        ])
    }
}

impl fmt::Display for Timecode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:02}:{:02}:{:02}:{:02}",
            self.hours, self.minutes, self.seconds, self.frames
        )
    }
}
