// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Register, interrupt and DMA transport consumed by the streaming engine.
//!
//! The engine never talks to an OS driver directly. Each platform (or the
//! in-memory [`crate::sim::SimDevice`]) provides one [`Transport`]
//! implementation which is injected into the engine as an `Arc<T>`.

use std::time::Duration;

use crate::{channel::ChannelId, error::Result};

/// Interrupt sources the engine subscribes to and waits on.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum InterruptKind {
    /// Vertical blank of a capture channel
    InputVerticalBlank(ChannelId),
    /// Vertical blank of a playout channel
    OutputVerticalBlank(ChannelId),
}

impl InterruptKind {
    pub fn channel(&self) -> ChannelId {
        match self {
            InterruptKind::InputVerticalBlank(channel)
            | InterruptKind::OutputVerticalBlank(channel) => *channel,
        }
    }
}

/// DMA engine used for a transfer.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum DmaEngine {
    #[default]
    First,
    Second,
    Third,
    Fourth,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DmaDirection {
    /// Host memory to frame memory (playout)
    ToDevice,
    /// Frame memory to host memory (capture)
    FromDevice,
}

/// Host side of a DMA transfer. The variant carries the direction.
#[derive(Debug)]
pub enum HostBuffer<'a> {
    FromDevice(&'a mut [u8]),
    ToDevice(&'a [u8]),
}

impl HostBuffer<'_> {
    pub fn len(&self) -> usize {
        match self {
            HostBuffer::FromDevice(buf) => buf.len(),
            HostBuffer::ToDevice(buf) => buf.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn direction(&self) -> DmaDirection {
        match self {
            HostBuffer::FromDevice(_) => DmaDirection::FromDevice,
            HostBuffer::ToDevice(_) => DmaDirection::ToDevice,
        }
    }

    pub fn as_ptr(&self) -> *const u8 {
        match self {
            HostBuffer::FromDevice(buf) => buf.as_ptr(),
            HostBuffer::ToDevice(buf) => buf.as_ptr(),
        }
    }

    /// Reborrows the first `len` bytes (or fewer if the buffer is shorter).
    pub fn prefix(&mut self, len: usize) -> HostBuffer<'_> {
        match self {
            HostBuffer::FromDevice(buf) => {
                let len = len.min(buf.len());
                HostBuffer::FromDevice(&mut buf[..len])
            }
            HostBuffer::ToDevice(buf) => {
                let len = len.min(buf.len());
                HostBuffer::ToDevice(&buf[..len])
            }
        }
    }

    /// Reborrows `len` bytes starting at `start`, clamped to the buffer.
    pub fn slice(&mut self, start: usize, len: usize) -> HostBuffer<'_> {
        match self {
            HostBuffer::FromDevice(buf) => {
                let start = start.min(buf.len());
                let end = (start + len).min(buf.len());
                HostBuffer::FromDevice(&mut buf[start..end])
            }
            HostBuffer::ToDevice(buf) => {
                let start = start.min(buf.len());
                let end = (start + len).min(buf.len());
                HostBuffer::ToDevice(&buf[start..end])
            }
        }
    }
}

/// Layout of a segmented (strided) DMA.
///
/// Moves `count` segments of `bytes_per_segment`, stepping `host_pitch`
/// bytes in host memory and `device_pitch` bytes in frame memory between
/// segments.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Segments {
    pub count: u32,
    pub bytes_per_segment: u32,
    pub host_pitch: u32,
    pub device_pitch: u32,
}

impl Segments {
    /// Host bytes spanned by the transfer.
    pub fn host_span(&self) -> usize {
        match self.count {
            0 => 0,
            n => (n as usize - 1) * self.host_pitch as usize + self.bytes_per_segment as usize,
        }
    }

    /// Frame-memory bytes spanned by the transfer.
    pub fn device_span(&self) -> u64 {
        match self.count {
            0 => 0,
            n => (n as u64 - 1) * self.device_pitch as u64 + self.bytes_per_segment as u64,
        }
    }
}

/// Peer device memory that receives a frame directly (GPU direct and the
/// like).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct PeerTarget {
    pub address: u64,
}

/// Register, interrupt and DMA access to one device.
///
/// Frame numbers are in base-frame units; `offset` is a byte offset from the
/// start of that frame and may run past its end into the following frames.
pub trait Transport: Send + Sync {
    /// Reads `(register & mask) >> shift`.
    fn read_register(&self, addr: u32, mask: u32, shift: u32) -> Result<u32>;

    /// Replaces the masked field of a register with `value << shift`.
    fn write_register(&self, addr: u32, value: u32, mask: u32, shift: u32) -> Result<()>;

    /// Blocks until the next `kind` interrupt. Returns `false` on timeout.
    fn wait_for_interrupt(&self, kind: InterruptKind, timeout: Duration) -> Result<bool>;

    /// Number of `kind` interrupts raised since the device was opened.
    fn interrupt_count(&self, kind: InterruptKind) -> Result<u64>;

    fn subscribe_event(&self, kind: InterruptKind) -> Result<()>;

    fn unsubscribe_event(&self, kind: InterruptKind) -> Result<()>;

    /// Moves `host.len()` bytes between host memory and frame memory.
    fn dma_transfer(
        &self,
        engine: DmaEngine,
        frame: u32,
        host: HostBuffer<'_>,
        offset: u64,
    ) -> Result<()>;

    /// Moves a strided block between host memory and frame memory.
    fn dma_transfer_segmented(
        &self,
        engine: DmaEngine,
        frame: u32,
        host: HostBuffer<'_>,
        offset: u64,
        segments: &Segments,
    ) -> Result<()>;

    /// Moves frame memory straight to a peer device without a host copy.
    fn dma_transfer_p2p(
        &self,
        engine: DmaEngine,
        frame: u32,
        offset: u64,
        length: u64,
        target: &PeerTarget,
    ) -> Result<()>;
}
