// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Audio systems and their alignment with video frames.
//!
//! Each audio system owns a circular buffer at the top of device memory.
//! The first half is read by the playout engine, the second half written by
//! the capture engine. The hardware exposes the byte offset it last
//! touched in each half; [`AudioSync`] turns consecutive readings taken at
//! vertical blank into per-frame sample ranges.

use core::fmt;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::{
    channel::Direction,
    error::{Error, Result},
    geometry::{DeviceGeometry, AUDIO_SAMPLE_BYTES, MAX_AUDIO_SYSTEMS},
    registers::{self, RegisterAccess, RegisterField},
    transport::{DmaEngine, HostBuffer, Transport},
};

/// One of the device's independent audio engines, numbered from 1.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AudioSystem(u8);

impl AudioSystem {
    pub fn new(number: u8) -> Result<Self> {
        if number == 0 || number > MAX_AUDIO_SYSTEMS {
            return Err(Error::InvalidArgument(format!(
                "audio system {number} out of range 1..={MAX_AUDIO_SYSTEMS}"
            )));
        }
        Ok(Self(number))
    }

    pub const fn number(self) -> u8 {
        self.0
    }

    pub const fn index(self) -> usize {
        self.0 as usize - 1
    }
}

impl fmt::Display for AudioSystem {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "audio{}", self.0)
    }
}

/// Audio buffers must hold whole sample words at a word-aligned address.
pub fn check_alignment(buf: &HostBuffer<'_>) -> Result<()> {
    let addr = buf.as_ptr() as usize;
    if buf.len() % AUDIO_SAMPLE_BYTES != 0 || addr % AUDIO_SAMPLE_BYTES != 0 {
        return Err(Error::BufferAlignment {
            len: buf.len(),
            addr,
            align: AUDIO_SAMPLE_BYTES,
        });
    }
    Ok(())
}

/// Bytes from `start` forward to `end` in a ring of `len` bytes.
pub fn ring_distance(start: u32, end: u32, len: u32) -> u32 {
    if end >= start {
        end - start
    } else {
        len - start + end
    }
}

/// Tracks where the current video frame's audio began.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct AudioSync {
    frame_start: u32,
}

impl AudioSync {
    /// Starts a new frame at the current hardware position.
    pub fn begin(position: u32) -> Self {
        Self {
            frame_start: position,
        }
    }

    pub fn frame_start(&self) -> u32 {
        self.frame_start
    }

    /// Closes the current frame at `position` and opens the next one there.
    /// Returns the closed frame's `(start, end)` offsets.
    pub fn complete(&mut self, position: u32) -> (u32, u32) {
        let bounds = (self.frame_start, position);
        self.frame_start = position;
        bounds
    }

    /// Restarts the current frame at `position`, discarding what it held.
    pub fn restart(&mut self, position: u32) {
        self.frame_start = position;
    }
}

/// Control of the device's audio systems over a shared transport.
pub struct AudioControl<T> {
    transport: Arc<T>,
    geometry: DeviceGeometry,
}

impl<T> Clone for AudioControl<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            geometry: self.geometry,
        }
    }
}

impl<T: Transport> AudioControl<T> {
    pub fn new(transport: Arc<T>, geometry: DeviceGeometry) -> Self {
        Self {
            transport,
            geometry,
        }
    }

    fn check(&self, system: AudioSystem) -> Result<()> {
        if system.number() > self.geometry.audio_systems {
            return Err(Error::InvalidArgument(format!(
                "{system} is not present, device has {} audio systems",
                self.geometry.audio_systems
            )));
        }
        Ok(())
    }

    fn bits(direction: Direction) -> (u32, u32) {
        match direction {
            Direction::Capture => (registers::AUDIO_CAPTURE_RESET, registers::AUDIO_CAPTURE_PAUSE),
            Direction::Playout => (registers::AUDIO_PLAYOUT_RESET, registers::AUDIO_PLAYOUT_PAUSE),
        }
    }

    /// Releases the engine from reset; it begins at offset zero.
    pub fn start(&self, system: AudioSystem, direction: Direction) -> Result<()> {
        self.check(system)?;
        let (reset, pause) = Self::bits(direction);
        let control = registers::audio_control(system);
        self.transport
            .write_field(RegisterField::bit(control, pause), 0)?;
        self.transport
            .write_field(RegisterField::bit(control, reset), 0)?;
        debug!("{system} {direction} started");
        Ok(())
    }

    /// Holds the engine in reset.
    pub fn stop(&self, system: AudioSystem, direction: Direction) -> Result<()> {
        self.check(system)?;
        let (reset, _) = Self::bits(direction);
        self.transport
            .write_field(RegisterField::bit(registers::audio_control(system), reset), 1)?;
        debug!("{system} {direction} stopped");
        Ok(())
    }

    pub fn set_paused(&self, system: AudioSystem, direction: Direction, paused: bool) -> Result<()> {
        self.check(system)?;
        let (_, pause) = Self::bits(direction);
        self.transport.write_field(
            RegisterField::bit(registers::audio_control(system), pause),
            paused as u32,
        )
    }

    pub fn is_running(&self, system: AudioSystem, direction: Direction) -> Result<bool> {
        self.check(system)?;
        let (reset, _) = Self::bits(direction);
        let held = self
            .transport
            .read_field(RegisterField::bit(registers::audio_control(system), reset))?;
        Ok(held == 0)
    }

    /// Byte offset the hardware last touched in the `direction` half.
    pub fn position(&self, system: AudioSystem, direction: Direction) -> Result<u32> {
        self.check(system)?;
        let addr = match direction {
            Direction::Capture => registers::audio_input_last(system),
            Direction::Playout => registers::audio_output_last(system),
        };
        self.transport.read_field(RegisterField::word(addr))
    }

    /// Base frame and byte offset of the `direction` half.
    fn half(&self, system: AudioSystem, direction: Direction) -> Result<(u32, u64)> {
        let region = self.geometry.audio_region(system).ok_or_else(|| {
            Error::InvalidArgument(format!("{system} has no buffer on this device"))
        })?;
        let offset = match direction {
            Direction::Playout => 0,
            Direction::Capture => self.geometry.audio_half_bytes(),
        };
        Ok((region.start, offset))
    }

    /// Copies captured audio between two ring offsets into `host`.
    /// Returns the number of bytes copied.
    pub fn read_capture(
        &self,
        engine: DmaEngine,
        system: AudioSystem,
        start: u32,
        end: u32,
        host: &mut [u8],
    ) -> Result<usize> {
        let ring = self.geometry.audio_half_bytes() as u32;
        let bytes = ring_distance(start, end, ring) as usize;
        if bytes > host.len() {
            return Err(Error::BufferTooSmall {
                need: bytes,
                have: host.len(),
            });
        }
        let (frame, base) = self.half(system, Direction::Capture)?;
        let first = bytes.min((ring - start) as usize);
        let (head, tail) = host[..bytes].split_at_mut(first);
        if !head.is_empty() {
            self.transport.dma_transfer(
                engine,
                frame,
                HostBuffer::FromDevice(head),
                base + start as u64,
            )?;
        }
        if !tail.is_empty() {
            self.transport
                .dma_transfer(engine, frame, HostBuffer::FromDevice(tail), base)?;
        }
        trace!("{system} read {bytes} bytes [{start}, {end})");
        Ok(bytes)
    }

    /// Writes playout audio at `cursor`, wrapping around the ring. Returns
    /// the cursor after the written data.
    pub fn write_playout(
        &self,
        engine: DmaEngine,
        system: AudioSystem,
        cursor: u32,
        data: &[u8],
    ) -> Result<u32> {
        let ring = self.geometry.audio_half_bytes() as u32;
        if data.len() > ring as usize {
            return Err(Error::BufferTooSmall {
                need: data.len(),
                have: ring as usize,
            });
        }
        let (frame, base) = self.half(system, Direction::Playout)?;
        let cursor = cursor % ring;
        let first = data.len().min((ring - cursor) as usize);
        let (head, tail) = data.split_at(first);
        if !head.is_empty() {
            self.transport.dma_transfer(
                engine,
                frame,
                HostBuffer::ToDevice(head),
                base + cursor as u64,
            )?;
        }
        if !tail.is_empty() {
            self.transport
                .dma_transfer(engine, frame, HostBuffer::ToDevice(tail), base)?;
        }
        Ok((cursor + data.len() as u32) % ring)
    }
}
