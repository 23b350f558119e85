// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Per-call transfer request and result.

use std::time::Duration;

use crate::{
    channel::{ChannelState, Direction},
    error::{Error, Result},
    stamp::FrameStamp,
    timecode::Timecode,
    transport::{DmaDirection, DmaEngine, HostBuffer, PeerTarget, Segments},
};

/// Host buffers and metadata for exchanging one frame.
///
/// Capture descriptors carry [`HostBuffer::FromDevice`] buffers and playout
/// descriptors [`HostBuffer::ToDevice`] ones. Any buffer may be left out;
/// only the supplied ones are moved.
///
/// ```
/// use edgefirst_framestream::{Timecode, TransferDescriptor};
/// use std::time::Duration;
///
/// let video = vec![0u8; 4096];
/// let desc = TransferDescriptor::playout(&video)
///     .with_timecode(Timecode::new(1, 0, 0, 0))
///     .with_timeout(Duration::from_millis(40));
/// assert!(desc.video.is_some());
/// ```
#[derive(Debug, Default)]
pub struct TransferDescriptor<'a> {
    pub video: Option<HostBuffer<'a>>,
    pub audio: Option<HostBuffer<'a>>,
    pub anc_field1: Option<HostBuffer<'a>>,
    pub anc_field2: Option<HostBuffer<'a>>,
    /// Playout timecode, overriding the generated one
    pub timecode: Option<Timecode>,
    pub user_cookie: u64,
    /// Strided video layout
    pub segments: Option<Segments>,
    /// Deliver captured video to peer memory instead of `video`
    pub peer: Option<PeerTarget>,
    pub dma_engine: DmaEngine,
    /// How long to wait for a frame; zero polls once
    pub timeout: Duration,
}

impl<'a> TransferDescriptor<'a> {
    pub fn capture(video: &'a mut [u8]) -> Self {
        Self {
            video: Some(HostBuffer::FromDevice(video)),
            ..Default::default()
        }
    }

    pub fn playout(video: &'a [u8]) -> Self {
        Self {
            video: Some(HostBuffer::ToDevice(video)),
            ..Default::default()
        }
    }

    pub fn with_audio(mut self, audio: HostBuffer<'a>) -> Self {
        self.audio = Some(audio);
        self
    }

    pub fn with_anc(mut self, field1: HostBuffer<'a>, field2: Option<HostBuffer<'a>>) -> Self {
        self.anc_field1 = Some(field1);
        self.anc_field2 = field2;
        self
    }

    pub fn with_timecode(mut self, timecode: Timecode) -> Self {
        self.timecode = Some(timecode);
        self
    }

    pub fn with_user_cookie(mut self, cookie: u64) -> Self {
        self.user_cookie = cookie;
        self
    }

    pub fn with_segments(mut self, segments: Segments) -> Self {
        self.segments = Some(segments);
        self
    }

    pub fn with_peer(mut self, peer: PeerTarget) -> Self {
        self.peer = Some(peer);
        self
    }

    pub fn with_dma_engine(mut self, engine: DmaEngine) -> Self {
        self.dma_engine = engine;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Checks that every buffer moves in the channel's direction.
    pub(crate) fn validate(&self, direction: Direction) -> Result<()> {
        let expected = match direction {
            Direction::Capture => DmaDirection::FromDevice,
            Direction::Playout => DmaDirection::ToDevice,
        };
        let buffers = [
            ("video", &self.video),
            ("audio", &self.audio),
            ("ancillary field 1", &self.anc_field1),
            ("ancillary field 2", &self.anc_field2),
        ];
        for (name, buf) in buffers {
            if let Some(buf) = buf {
                if buf.direction() != expected {
                    return Err(Error::InvalidArgument(format!(
                        "{name} buffer direction does not match a {direction} channel"
                    )));
                }
            }
        }
        if self.peer.is_some() && direction == Direction::Playout {
            return Err(Error::InvalidArgument(
                "peer targets are only supported for capture".into(),
            ));
        }
        Ok(())
    }
}

/// What a successful transfer moved.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct Moved {
    pub video_bytes: u64,
    pub audio_bytes: usize,
    pub anc_bytes: usize,
    /// Playout audio write position after this frame
    pub audio_cursor: Option<u32>,
    pub timecode: Option<Timecode>,
    pub user_cookie: u64,
}

/// Result of a successful transfer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TransferStatus {
    /// Frame exchanged with the host
    pub frame: u32,
    pub state: ChannelState,
    /// Frames queued after this transfer
    pub buffer_level: u32,
    pub frames_processed: u64,
    pub frames_dropped: u64,
    /// Drops since the previous transfer on this channel
    pub drop_delta: u64,
    pub stamp: FrameStamp,
    pub video_bytes: u64,
    pub audio_bytes: usize,
    pub anc_bytes: usize,
    pub timecode: Option<Timecode>,
}
