// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! # EdgeFirst Frame Stream Library
//!
//! This library implements the channel streaming engine for frame-buffer
//! based video capture and playout hardware. It moves video, audio and
//! ancillary data between host memory and on-board frame memory in lock
//! step with the hardware vertical blank.
//!
//! ## Features
//!
//! - **Frame Allocation**: Channels reserve contiguous, non-overlapping frame
//!   ranges. Quad and quad-quad frames consume 4 and 16 base frames, and
//!   audio buffers at the top of memory are never handed out.
//! - **Channel Lifecycle**: Init, start (immediately or at a device time),
//!   pause, resume, flush, preroll and graceful or aborted stop, with every
//!   invalid transition rejected.
//! - **Frame Transfer**: Blocking per-frame exchange of video (plain,
//!   segmented or peer-to-peer), audio and ancillary data, with generated
//!   timecode and SMPTE 352 identifiers on playout.
//! - **Frame Stamps**: Per-frame device time, audio ring offsets and RP188
//!   timecode recorded at each vertical blank; dropped frames are counted,
//!   never fatal.
//! - **Pluggable Transport**: All register, interrupt and DMA access goes
//!   through the [`Transport`] trait. [`sim::SimDevice`] provides an
//!   in-memory implementation.
//!
//! ## Example
//!
//! ```no_run
//! use edgefirst_framestream::{
//!     sim::SimDevice, ChannelConfig, ChannelId, DeviceGeometry, FrameRate, StreamEngine,
//!     TransferDescriptor,
//! };
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let geometry = DeviceGeometry::new(64 * 1024, 16);
//! let sim = Arc::new(SimDevice::new(geometry, FrameRate::FPS_30));
//! let engine = StreamEngine::new(sim.clone(), geometry)?;
//!
//! let channel = ChannelId::new(1)?;
//! engine.init(channel, ChannelConfig::capture(4))?;
//! engine.start(channel, 0)?;
//! sim.vertical_blank(&engine)?; // running
//! sim.vertical_blank(&engine)?; // first frame complete
//!
//! let mut video = vec![0u8; 48 * 1024];
//! let status = engine.transfer(channel, &mut TransferDescriptor::capture(&mut video))?;
//! println!("frame {} dropped {}", status.frame, status.frames_dropped);
//!
//! engine.stop(channel, true)?;
//! # Ok(())
//! # }
//! ```

pub mod allocator;
pub mod anc;
pub mod audio;
pub mod channel;
pub mod device;
pub mod engine;
pub mod error;
pub mod geometry;
pub mod registers;
pub mod sim;
pub mod stamp;
pub mod timecode;
pub mod transfer;
pub mod transport;

pub use allocator::{FrameRange, FrameSpec};
pub use audio::AudioSystem;
pub use channel::{
    ChannelConfig, ChannelId, ChannelState, ChannelStatus, Direction, Operation, OptionFlags,
};
pub use device::Device;
pub use engine::{EngineConfig, StreamEngine};
pub use error::{Error, Result};
pub use geometry::{DeviceGeometry, FrameRate, FrameSizeMode};
pub use stamp::FrameStamp;
pub use timecode::Timecode;
pub use transfer::{TransferDescriptor, TransferStatus};
pub use transport::{DmaEngine, HostBuffer, InterruptKind, PeerTarget, Segments, Transport};
