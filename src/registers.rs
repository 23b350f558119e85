// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Register map used by the streaming engine and typed field access on top
//! of any [`Transport`].
//!
//! Registers are 32 bits wide. Per-channel and per-audio-system registers
//! are laid out in fixed-stride banks indexed from zero.

use crate::{
    audio::AudioSystem,
    channel::ChannelId,
    error::Result,
    timecode::Rp188,
    transport::Transport,
};

// ── Device clock ───────────────────────────────────────────────────────────

/// Low word of the 64-bit time-of-day clock (10 MHz).
pub const CLOCK_LOW: u32 = 0x0010;

/// High word of the 64-bit time-of-day clock.
pub const CLOCK_HIGH: u32 = 0x0014;

// ── Channel frame registers ────────────────────────────────────────────────

const CHANNEL_FRAME_BASE: u32 = 0x0100;
const CHANNEL_FRAME_STRIDE: u32 = 0x08;

/// Frame the playout engine of `channel` reads from, in base frames.
pub const fn output_frame(channel: ChannelId) -> u32 {
    CHANNEL_FRAME_BASE + channel.index() as u32 * CHANNEL_FRAME_STRIDE
}

/// Frame the capture engine of `channel` writes into, in base frames.
pub const fn input_frame(channel: ChannelId) -> u32 {
    CHANNEL_FRAME_BASE + channel.index() as u32 * CHANNEL_FRAME_STRIDE + 0x04
}

// ── RP188 timecode ─────────────────────────────────────────────────────────

const RP188_BASE: u32 = 0x0300;
const RP188_STRIDE: u32 = 0x10;

/// Timecode received on `channel`.
/// - `+0x0`: low word (frames, seconds)
/// - `+0x4`: high word (minutes, hours)
pub const fn rp188_input(channel: ChannelId) -> u32 {
    RP188_BASE + channel.index() as u32 * RP188_STRIDE
}

/// Timecode transmitted on `channel`, same layout as [`rp188_input`].
pub const fn rp188_output(channel: ChannelId) -> u32 {
    RP188_BASE + channel.index() as u32 * RP188_STRIDE + 0x08
}

// ── Audio systems ──────────────────────────────────────────────────────────

const AUDIO_BASE: u32 = 0x0400;
const AUDIO_STRIDE: u32 = 0x10;

/// Audio control.
/// - Bit 0: CAPTURE_RESET (1 = capture held in reset)
/// - Bit 1: PLAYOUT_RESET (1 = playout held in reset)
/// - Bit 2: CAPTURE_PAUSE
/// - Bit 3: PLAYOUT_PAUSE
pub const fn audio_control(system: AudioSystem) -> u32 {
    AUDIO_BASE + system.index() as u32 * AUDIO_STRIDE
}

/// Byte offset within the capture half last written by the hardware.
pub const fn audio_input_last(system: AudioSystem) -> u32 {
    AUDIO_BASE + system.index() as u32 * AUDIO_STRIDE + 0x04
}

/// Byte offset within the playout half last read by the hardware.
pub const fn audio_output_last(system: AudioSystem) -> u32 {
    AUDIO_BASE + system.index() as u32 * AUDIO_STRIDE + 0x08
}

pub const AUDIO_CAPTURE_RESET: u32 = 1 << 0;
pub const AUDIO_PLAYOUT_RESET: u32 = 1 << 1;
pub const AUDIO_CAPTURE_PAUSE: u32 = 1 << 2;
pub const AUDIO_PLAYOUT_PAUSE: u32 = 1 << 3;

/// A masked field within a register.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RegisterField {
    pub addr: u32,
    pub mask: u32,
    pub shift: u32,
}

impl RegisterField {
    /// The whole 32-bit register.
    pub const fn word(addr: u32) -> Self {
        Self {
            addr,
            mask: u32::MAX,
            shift: 0,
        }
    }

    /// A single bit, given as its mask.
    pub const fn bit(addr: u32, bit: u32) -> Self {
        Self {
            addr,
            mask: bit,
            shift: bit.trailing_zeros(),
        }
    }
}

/// Typed register helpers available on every [`Transport`].
pub trait RegisterAccess: Transport {
    fn read_field(&self, field: RegisterField) -> Result<u32> {
        self.read_register(field.addr, field.mask, field.shift)
    }

    fn write_field(&self, field: RegisterField, value: u32) -> Result<()> {
        self.write_register(field.addr, value, field.mask, field.shift)
    }

    /// Reads the 64-bit device clock, retrying if the low word wrapped
    /// between the two reads.
    fn read_clock(&self) -> Result<u64> {
        loop {
            let high = self.read_field(RegisterField::word(CLOCK_HIGH))?;
            let low = self.read_field(RegisterField::word(CLOCK_LOW))?;
            if self.read_field(RegisterField::word(CLOCK_HIGH))? == high {
                return Ok((high as u64) << 32 | low as u64);
            }
        }
    }

    fn read_rp188(&self, addr: u32) -> Result<Rp188> {
        Ok(Rp188 {
            low: self.read_field(RegisterField::word(addr))?,
            high: self.read_field(RegisterField::word(addr + 0x04))?,
        })
    }

    fn write_rp188(&self, addr: u32, value: Rp188) -> Result<()> {
        self.write_field(RegisterField::word(addr), value.low)?;
        self.write_field(RegisterField::word(addr + 0x04), value.high)
    }
}

impl<T: Transport + ?Sized> RegisterAccess for T {}
