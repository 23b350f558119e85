// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Per-frame timing records written at vertical blank.

use crate::{allocator::FrameRange, timecode::Timecode};

/// Timing and audio alignment of one frame.
///
/// `frame_time` is the device clock at the vertical blank where the frame
/// started on the wire. `audio_start..audio_end` are byte offsets into the
/// bound audio system's ring covering the same period; `audio_end` may be
/// smaller than `audio_start` when the ring wrapped. The `current_*` fields
/// are filled in when the stamp is queried.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameStamp {
    pub frame: u32,
    pub frame_time: u64,
    pub audio_start: u32,
    pub audio_end: u32,
    pub timecode: Option<Timecode>,
    pub user_cookie: u64,
    /// The frame has completed (capture) or gone on air (playout)
    pub valid: bool,
    pub current_frame: u32,
    pub current_time: u64,
}

impl FrameStamp {
    fn empty(frame: u32) -> Self {
        Self {
            frame,
            ..Default::default()
        }
    }

    /// Restarts the record for a frame beginning at `frame_time`.
    pub(crate) fn begin(&mut self, frame_time: u64, audio_start: u32) {
        *self = Self {
            frame_time,
            audio_start,
            audio_end: audio_start,
            ..Self::empty(self.frame)
        };
    }

    /// Number of audio bytes covered in a ring of `ring` bytes.
    pub fn audio_bytes(&self, ring: u32) -> u32 {
        crate::audio::ring_distance(self.audio_start, self.audio_end, ring)
    }
}

/// Stamps for every frame of a channel's range.
#[derive(Clone, Debug)]
pub struct StampTracker {
    range: FrameRange,
    stamps: Vec<FrameStamp>,
}

impl StampTracker {
    pub fn new(range: FrameRange) -> Self {
        Self {
            range,
            stamps: (range.start..=range.end).map(FrameStamp::empty).collect(),
        }
    }

    pub fn get(&self, frame: u32) -> Option<&FrameStamp> {
        self.range
            .contains(frame)
            .then(|| &self.stamps[self.range.slot(frame)])
    }

    /// # Panics
    ///
    /// If `frame` is outside the tracked range.
    pub(crate) fn get_mut(&mut self, frame: u32) -> &mut FrameStamp {
        &mut self.stamps[self.range.slot(frame)]
    }

    pub(crate) fn invalidate(&mut self, frame: u32) {
        self.stamps[self.range.slot(frame)] = FrameStamp::empty(frame);
    }
}
