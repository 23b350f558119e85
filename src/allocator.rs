// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Ownership of device frame memory.
//!
//! Channels reserve contiguous frame ranges. Reservations are tracked in
//! base-frame units so channels running in different frame size modes can
//! share one memory map. Audio buffer regions are never handed out to
//! channels, even while the audio system is idle, because audio can start
//! independently of any channel.

use core::fmt;
use std::ops::Range;

use tracing::debug;

use crate::{
    channel::ChannelId,
    error::{Error, Result},
    geometry::{DeviceGeometry, FrameSizeMode},
};

/// Contiguous, inclusive range of frames owned by one channel.
///
/// `start` and `end` count frames of the range's size mode, so frame `n` of
/// a quad range begins at base frame `4 * n`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct FrameRange {
    pub start: u32,
    pub end: u32,
    pub mode: FrameSizeMode,
}

impl FrameRange {
    pub fn new(start: u32, end: u32, mode: FrameSizeMode) -> Result<Self> {
        if end <= start {
            return Err(Error::InvalidArgument(format!(
                "frame range {start}..={end} must hold at least two frames"
            )));
        }
        if end
            .checked_add(1)
            .and_then(|n| n.checked_mul(mode.multiplier()))
            .is_none()
        {
            return Err(Error::InvalidArgument(format!(
                "frame range {start}..={end} ({mode:?}) lies beyond any device"
            )));
        }
        Ok(Self { start, end, mode })
    }

    pub fn len(&self) -> u32 {
        self.end - self.start + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn contains(&self, frame: u32) -> bool {
        (self.start..=self.end).contains(&frame)
    }

    /// The frame after `frame`, wrapping from `end` back to `start`.
    pub fn next(&self, frame: u32) -> u32 {
        if frame >= self.end {
            self.start
        } else {
            frame + 1
        }
    }

    /// Position of `frame` within the range.
    pub fn slot(&self, frame: u32) -> usize {
        (frame - self.start) as usize
    }

    /// First base frame of `frame`. Saturates at `u32::MAX`.
    pub fn base_frame(&self, frame: u32) -> u32 {
        frame.saturating_mul(self.mode.multiplier())
    }

    /// Base frames covered by the whole range. Saturates at `u32::MAX`, which
    /// no device geometry can hold.
    pub fn base_slots(&self) -> Range<u32> {
        let mult = self.mode.multiplier();
        self.start.saturating_mul(mult)..self.end.saturating_add(1).saturating_mul(mult)
    }
}

impl fmt::Display for FrameRange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)?;
        if self.mode != FrameSizeMode::Standard {
            write!(f, " ({:?})", self.mode)?;
        }
        Ok(())
    }
}

/// How a channel asks for frames at init.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FrameSpec {
    /// Any free block of this many frames
    Count(u32),
    /// Exactly these frames, inclusive
    Range { start: u32, end: u32 },
}

fn overlaps(a: &Range<u32>, b: &Range<u32>) -> bool {
    a.start < b.end && b.start < a.end
}

#[derive(Debug)]
pub struct FrameAllocator {
    geometry: DeviceGeometry,
    reservations: Vec<(ChannelId, FrameRange)>,
}

impl FrameAllocator {
    pub fn new(geometry: DeviceGeometry) -> Self {
        Self {
            geometry,
            reservations: Vec::new(),
        }
    }

    /// Describes the first thing `base` collides with, if anything.
    fn conflict(
        &self,
        base: &Range<u32>,
        exclude_audio: bool,
        ignore: Option<ChannelId>,
    ) -> Option<String> {
        if base.end > self.geometry.frame_slots() {
            return Some(format!(
                "device has only {} frames",
                self.geometry.frame_slots()
            ));
        }
        if let Some((channel, range)) = self
            .reservations
            .iter()
            .filter(|(channel, _)| Some(*channel) != ignore)
            .find(|(_, range)| overlaps(base, &range.base_slots()))
        {
            return Some(format!("frames {range} are owned by channel {channel}"));
        }
        if exclude_audio {
            if let Some(region) = self
                .geometry
                .audio_regions()
                .find(|region| overlaps(base, region))
            {
                return Some(format!(
                    "base frames {}..{} hold an audio buffer",
                    region.start, region.end
                ));
            }
        }
        None
    }

    /// First free block of `count` frames in `mode`.
    pub fn find_range(
        &self,
        count: u32,
        mode: FrameSizeMode,
        exclude_audio: bool,
    ) -> Result<FrameRange> {
        self.find_range_for(None, count, mode, exclude_audio)
    }

    fn find_range_for(
        &self,
        owner: Option<ChannelId>,
        count: u32,
        mode: FrameSizeMode,
        exclude_audio: bool,
    ) -> Result<FrameRange> {
        if count < 2 {
            return Err(Error::InvalidArgument(format!(
                "a channel needs at least two frames, {count} requested"
            )));
        }
        let units = self.geometry.frame_slots() / mode.multiplier();
        (0..units.saturating_sub(count - 1))
            .map(|start| FrameRange {
                start,
                end: start + count - 1,
                mode,
            })
            .find(|range| {
                self.conflict(&range.base_slots(), exclude_audio, owner)
                    .is_none()
            })
            .ok_or_else(|| {
                Error::AllocationFailure(format!(
                    "no {count} contiguous {mode:?} frames are free"
                ))
            })
    }

    /// Reserves `range` for `channel`, replacing any range it held before.
    pub fn reserve(&mut self, channel: ChannelId, range: FrameRange) -> Result<()> {
        if let Some(reason) = self.conflict(&range.base_slots(), true, Some(channel)) {
            return Err(Error::AllocationFailure(format!(
                "cannot reserve {range} for channel {channel}: {reason}"
            )));
        }
        self.reservations.retain(|(owner, _)| *owner != channel);
        self.reservations.push((channel, range));
        debug!("channel {channel} reserved frames {range}");
        Ok(())
    }

    /// Finds and reserves frames for `channel` in one step. Frames the
    /// channel already owns count as free, so a re-init may reuse them.
    pub fn allocate(
        &mut self,
        channel: ChannelId,
        spec: FrameSpec,
        mode: FrameSizeMode,
    ) -> Result<FrameRange> {
        let range = match spec {
            FrameSpec::Count(count) => self.find_range_for(Some(channel), count, mode, true)?,
            FrameSpec::Range { start, end } => FrameRange::new(start, end, mode)?,
        };
        self.reserve(channel, range)?;
        Ok(range)
    }

    pub fn release(&mut self, channel: ChannelId) -> Option<FrameRange> {
        let index = self
            .reservations
            .iter()
            .position(|(owner, _)| *owner == channel)?;
        let (_, range) = self.reservations.swap_remove(index);
        debug!("channel {channel} released frames {range}");
        Some(range)
    }

    pub fn reservation(&self, channel: ChannelId) -> Option<FrameRange> {
        self.reservations
            .iter()
            .find(|(owner, _)| *owner == channel)
            .map(|(_, range)| *range)
    }

    pub fn reservations(&self) -> impl Iterator<Item = (ChannelId, FrameRange)> + '_ {
        self.reservations.iter().copied()
    }
}
