// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Typed errors for the streaming engine.
//!
//! Every fallible operation returns [`Result`]. Dropped frames are not
//! errors: they are counted in the channel status and the pipeline keeps
//! running.

use crate::channel::{ChannelId, ChannelState, Operation};

/// All errors originating from the streaming engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No contiguous frame range could be reserved for a channel.
    #[error("frame allocation failed: {0}")]
    AllocationFailure(String),

    /// The operation is not legal from the channel's current state.
    #[error("{operation} is not allowed on channel {channel} in state {state}")]
    InvalidStateTransition {
        channel: ChannelId,
        operation: Operation,
        state: ChannelState,
    },

    /// Waiting for a vertical-blank tick exceeded its deadline.
    #[error("channel {channel} did not reach the next tick within {waited_ms} ms")]
    HardwareTimeout { channel: ChannelId, waited_ms: u64 },

    /// Audio buffer length or address violates the sample alignment.
    #[error("audio buffer of {len} bytes at {addr:#x} is not {align}-byte aligned")]
    BufferAlignment { len: usize, addr: usize, align: usize },

    #[error("buffer too small: need {need} bytes, have {have}")]
    BufferTooSmall { need: usize, have: usize },

    /// A register or DMA call on the transport failed.
    #[error("device communication error: {0}")]
    DeviceCommunication(String),

    /// No frame is available yet. Retry after the next tick.
    #[error("no frame available for transfer")]
    Busy,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    /// Stable integer code for structured logging.
    pub fn error_code(&self) -> u32 {
        match self {
            Self::AllocationFailure(_) => 100,
            Self::InvalidStateTransition { .. } => 200,
            Self::HardwareTimeout { .. } => 300,
            Self::BufferAlignment { .. } => 400,
            Self::BufferTooSmall { .. } => 401,
            Self::DeviceCommunication(_) => 500,
            Self::Busy => 600,
            Self::InvalidArgument(_) => 700,
        }
    }

    /// Whether the caller can simply retry the same call later.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Busy | Self::HardwareTimeout { .. })
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
