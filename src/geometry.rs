// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Device memory layout and video frame rates.
//!
//! Frame memory is an array of fixed-size base frames. Audio buffers live
//! at the top of memory, one region per audio system, with audio system 1
//! closest to the end. Each frame reserves its last `2 * anc_field_bytes`
//! for ancillary data (field 1 then field 2).

use core::fmt;
use std::{ops::Range, str::FromStr, time::Duration};

use crate::{audio::AudioSystem, error::Error};

/// Number of independent channels on the device.
pub const MAX_CHANNELS: u8 = 8;

/// Number of audio systems the register map can address.
pub const MAX_AUDIO_SYSTEMS: u8 = 8;

/// Frequency of the on-board time-of-day clock.
pub const DEVICE_CLOCK_HZ: u64 = 10_000_000;

/// Audio sample rate of every audio system.
pub const AUDIO_SAMPLE_RATE: u64 = 48_000;

/// Size of one audio sample word in device memory.
pub const AUDIO_SAMPLE_BYTES: usize = 4;

/// Default size of one audio system's buffer (playout half + capture half).
pub const DEFAULT_AUDIO_BUFFER_BYTES: u64 = 8 * 1024 * 1024;

/// Default size of one ancillary field region.
pub const DEFAULT_ANC_FIELD_BYTES: u32 = 8 * 1024;

/// How many base frames a single video frame occupies.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum FrameSizeMode {
    /// One base frame per frame (HD and below)
    #[default]
    Standard,
    /// Four base frames per frame (UHD / 4K)
    Quad,
    /// Sixteen base frames per frame (UHD2 / 8K)
    QuadQuad,
}

impl FrameSizeMode {
    pub const fn multiplier(self) -> u32 {
        match self {
            FrameSizeMode::Standard => 1,
            FrameSizeMode::Quad => 4,
            FrameSizeMode::QuadQuad => 16,
        }
    }
}

/// Video frame rate as a rational number of frames per second.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct FrameRate {
    pub num: u32,
    pub den: u32,
}

impl FrameRate {
    pub const FPS_23_98: FrameRate = FrameRate::new(24000, 1001);
    pub const FPS_24: FrameRate = FrameRate::new(24, 1);
    pub const FPS_25: FrameRate = FrameRate::new(25, 1);
    pub const FPS_29_97: FrameRate = FrameRate::new(30000, 1001);
    pub const FPS_30: FrameRate = FrameRate::new(30, 1);
    pub const FPS_50: FrameRate = FrameRate::new(50, 1);
    pub const FPS_59_94: FrameRate = FrameRate::new(60000, 1001);
    pub const FPS_60: FrameRate = FrameRate::new(60, 1);

    pub const fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    /// Wall-clock duration of one frame.
    pub fn frame_duration(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 * self.den as u64 / self.num as u64)
    }

    /// Duration of one frame in device clock ticks.
    pub fn clock_ticks_per_frame(&self) -> u64 {
        DEVICE_CLOCK_HZ * self.den as u64 / self.num as u64
    }

    /// Nominal integer rate used for timecode counting (29.97 counts as 30).
    pub fn timecode_fps(&self) -> u32 {
        self.num.div_ceil(self.den)
    }

    /// Audio samples that fall inside video frame `frame`.
    ///
    /// Fractional rates follow the usual cadence, e.g. 1601/1602 samples
    /// alternating at 29.97.
    pub fn samples_per_frame(&self, frame: u64) -> u32 {
        let per = AUDIO_SAMPLE_RATE * self.den as u64;
        let num = self.num as u64;
        ((frame + 1) * per / num - frame * per / num) as u32
    }
}

impl Default for FrameRate {
    fn default() -> Self {
        FrameRate::FPS_30
    }
}

impl fmt::Display for FrameRate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.den == 1 {
            write!(f, "{}", self.num)
        } else {
            write!(f, "{}/{}", self.num, self.den)
        }
    }
}

impl FromStr for FrameRate {
    type Err = Error;

    /// Accepts `30`, `29.97`, `59.94`, `23.98` or an explicit `30000/1001`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidArgument(format!("invalid frame rate '{s}'"));
        let rate = match s.trim() {
            "23.98" | "23.976" => FrameRate::FPS_23_98,
            "29.97" => FrameRate::FPS_29_97,
            "59.94" => FrameRate::FPS_59_94,
            other => match other.split_once('/') {
                Some((num, den)) => FrameRate::new(
                    num.trim().parse().map_err(|_| invalid())?,
                    den.trim().parse().map_err(|_| invalid())?,
                ),
                None => FrameRate::new(other.parse().map_err(|_| invalid())?, 1),
            },
        };
        if rate.num == 0 || rate.den == 0 {
            return Err(invalid());
        }
        Ok(rate)
    }
}

/// Layout of the device's frame-buffer memory.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DeviceGeometry {
    /// Size of one base frame in bytes
    pub frame_bytes: u64,
    /// Base frames available for video, below the audio regions
    pub video_frames: u32,
    /// Number of audio systems with a buffer at the top of memory
    pub audio_systems: u8,
    /// Size of one audio system's buffer; the first half is playout, the
    /// second half capture
    pub audio_buffer_bytes: u64,
    /// Interleaved audio channels per sample frame
    pub audio_channels: u16,
    /// Size of one ancillary field region at the end of each frame
    pub anc_field_bytes: u32,
}

impl DeviceGeometry {
    /// Geometry with `video_frames` base frames of `frame_bytes` and no
    /// audio systems.
    pub const fn new(frame_bytes: u64, video_frames: u32) -> Self {
        Self {
            frame_bytes,
            video_frames,
            audio_systems: 0,
            audio_buffer_bytes: DEFAULT_AUDIO_BUFFER_BYTES,
            audio_channels: 16,
            anc_field_bytes: DEFAULT_ANC_FIELD_BYTES,
        }
    }

    pub const fn with_audio(mut self, systems: u8, buffer_bytes: u64) -> Self {
        self.audio_systems = systems;
        self.audio_buffer_bytes = buffer_bytes;
        self
    }

    pub const fn with_audio_channels(mut self, channels: u16) -> Self {
        self.audio_channels = channels;
        self
    }

    pub const fn with_anc_field_bytes(mut self, bytes: u32) -> Self {
        self.anc_field_bytes = bytes;
        self
    }

    /// Checks that the layout is internally consistent.
    pub fn validate(&self) -> Result<(), Error> {
        if self.frame_bytes == 0 || self.video_frames == 0 {
            return Err(Error::InvalidArgument("empty frame memory".into()));
        }
        if self.audio_systems > MAX_AUDIO_SYSTEMS {
            return Err(Error::InvalidArgument(format!(
                "{} audio systems exceeds the maximum of {MAX_AUDIO_SYSTEMS}",
                self.audio_systems
            )));
        }
        if self.anc_region_bytes() >= self.frame_bytes {
            return Err(Error::InvalidArgument(
                "ancillary region does not fit in a frame".into(),
            ));
        }
        let sample_frame = self.audio_sample_frame_bytes() as u64;
        if self.audio_systems > 0
            && (sample_frame == 0 || self.audio_half_bytes() % sample_frame != 0)
        {
            return Err(Error::InvalidArgument(
                "audio buffer is not a whole number of sample frames".into(),
            ));
        }
        Ok(())
    }

    /// Base frames consumed by each audio system's buffer.
    pub fn audio_slots_per_system(&self) -> u32 {
        self.audio_buffer_bytes.div_ceil(self.frame_bytes) as u32
    }

    /// Total base frames in device memory, audio regions included.
    pub fn frame_slots(&self) -> u32 {
        self.video_frames + self.audio_systems as u32 * self.audio_slots_per_system()
    }

    pub fn memory_bytes(&self) -> u64 {
        self.frame_slots() as u64 * self.frame_bytes
    }

    /// Base frames occupied by an audio system's buffer.
    pub fn audio_region(&self, system: AudioSystem) -> Option<Range<u32>> {
        if system.number() > self.audio_systems {
            return None;
        }
        let per = self.audio_slots_per_system();
        let top = self.frame_slots() - (system.number() as u32 - 1) * per;
        Some(top - per..top)
    }

    /// Every audio region on the device.
    pub fn audio_regions(&self) -> impl Iterator<Item = Range<u32>> + '_ {
        (1..=self.audio_systems)
            .filter_map(|n| AudioSystem::new(n).ok())
            .filter_map(|system| self.audio_region(system))
    }

    /// Size of the playout half (and of the capture half) of an audio buffer.
    pub fn audio_half_bytes(&self) -> u64 {
        self.audio_buffer_bytes / 2
    }

    /// Bytes of one interleaved sample across all audio channels.
    pub fn audio_sample_frame_bytes(&self) -> usize {
        self.audio_channels as usize * AUDIO_SAMPLE_BYTES
    }

    pub fn frame_bytes_for(&self, mode: FrameSizeMode) -> u64 {
        self.frame_bytes * mode.multiplier() as u64
    }

    pub fn anc_region_bytes(&self) -> u64 {
        2 * self.anc_field_bytes as u64
    }

    /// Bytes of picture data in one frame of `mode`.
    pub fn video_bytes(&self, mode: FrameSizeMode) -> u64 {
        self.frame_bytes_for(mode) - self.anc_region_bytes()
    }

    /// Offset of an ancillary field region within a frame of `mode`.
    pub fn anc_offset(&self, mode: FrameSizeMode, field2: bool) -> u64 {
        let base = self.video_bytes(mode);
        if field2 {
            base + self.anc_field_bytes as u64
        } else {
            base
        }
    }
}
