// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! In-memory device used by the tests, benches and the demo binary.
//!
//! [`SimDevice`] keeps a register file, frame memory and a 10 MHz clock.
//! Each call to [`SimDevice::advance`] is one vertical blank: the clock
//! moves by one frame, the interrupt counter increments, running audio
//! engines move their ring positions by one frame of samples (capture
//! writes a running sample counter into its half) and the RP188 input
//! registers receive the timecode of the new frame.

use std::{
    collections::{HashMap, HashSet},
    time::Duration,
};

use parking_lot::{Condvar, Mutex};
use tracing::trace;

use crate::{
    audio::AudioSystem,
    channel::ChannelId,
    engine::StreamEngine,
    error::{Error, Result},
    geometry::{DeviceGeometry, FrameRate, AUDIO_SAMPLE_BYTES},
    registers::{self, CLOCK_HIGH, CLOCK_LOW},
    timecode::Timecode,
    transport::{DmaEngine, HostBuffer, InterruptKind, PeerTarget, Segments, Transport},
};

#[derive(Debug, Default)]
struct State {
    registers: HashMap<u32, u32>,
    memory: Vec<u8>,
    peer: HashMap<u64, Vec<u8>>,
    clock: u64,
    vertical_blanks: u64,
    subscriptions: HashSet<InterruptKind>,
    fail_dma: u32,
    dma_count: u64,
    /// Next capture sample value per audio system
    samples: Vec<u32>,
}

impl State {
    fn register(&self, addr: u32) -> u32 {
        match addr {
            CLOCK_LOW => self.clock as u32,
            CLOCK_HIGH => (self.clock >> 32) as u32,
            _ => self.registers.get(&addr).copied().unwrap_or(0),
        }
    }

    fn memory_range(&self, frame: u32, frame_bytes: u64, offset: u64, len: usize) -> Result<usize> {
        let start = frame as u64 * frame_bytes + offset;
        let end = start + len as u64;
        if end > self.memory.len() as u64 {
            return Err(Error::DeviceCommunication(format!(
                "dma of {len} bytes at {start:#x} runs past frame memory"
            )));
        }
        Ok(start as usize)
    }

    fn check_dma(&mut self) -> Result<()> {
        self.dma_count += 1;
        if self.fail_dma > 0 {
            self.fail_dma -= 1;
            return Err(Error::DeviceCommunication("injected dma fault".into()));
        }
        Ok(())
    }
}

pub struct SimDevice {
    geometry: DeviceGeometry,
    frame_rate: FrameRate,
    state: Mutex<State>,
    blank: Condvar,
}

impl SimDevice {
    pub fn new(geometry: DeviceGeometry, frame_rate: FrameRate) -> Self {
        let mut state = State {
            memory: vec![0; geometry.memory_bytes() as usize],
            samples: vec![0; geometry.audio_systems as usize],
            ..Default::default()
        };
        for n in 1..=geometry.audio_systems {
            if let Ok(system) = AudioSystem::new(n) {
                state.registers.insert(
                    registers::audio_control(system),
                    registers::AUDIO_CAPTURE_RESET | registers::AUDIO_PLAYOUT_RESET,
                );
            }
        }
        Self {
            geometry,
            frame_rate,
            state: Mutex::new(state),
            blank: Condvar::new(),
        }
    }

    pub fn geometry(&self) -> &DeviceGeometry {
        &self.geometry
    }

    pub fn frame_rate(&self) -> FrameRate {
        self.frame_rate
    }

    /// Raises one vertical blank without waking waiters.
    pub fn advance(&self) {
        let mut state = self.state.lock();
        state.clock += self.frame_rate.clock_ticks_per_frame();
        state.vertical_blanks += 1;
        let blanks = state.vertical_blanks;

        let half = self.geometry.audio_half_bytes() as u32;
        let step = self.frame_rate.samples_per_frame(blanks)
            * self.geometry.audio_sample_frame_bytes() as u32;
        for system in (1..=self.geometry.audio_systems).filter_map(|n| AudioSystem::new(n).ok()) {
            let control = state.register(registers::audio_control(system));
            let capture = registers::audio_input_last(system);
            if control & registers::AUDIO_CAPTURE_RESET != 0 {
                state.registers.insert(capture, 0);
            } else if control & registers::AUDIO_CAPTURE_PAUSE == 0 {
                let position = state.register(capture);
                self.write_samples(&mut state, system, position, step);
                state.registers.insert(capture, (position + step) % half);
            }
            let playout = registers::audio_output_last(system);
            if control & registers::AUDIO_PLAYOUT_RESET != 0 {
                state.registers.insert(playout, 0);
            } else if control & registers::AUDIO_PLAYOUT_PAUSE == 0 {
                let position = state.register(playout);
                state.registers.insert(playout, (position + step) % half);
            }
        }

        let tc = Timecode::from_frame_count(blanks, self.frame_rate.timecode_fps()).to_rp188();
        for channel in ChannelId::all() {
            let addr = registers::rp188_input(channel);
            state.registers.insert(addr, tc.low);
            state.registers.insert(addr + 4, tc.high);
        }
        trace!("vertical blank {blanks}");
    }

    /// Fills `bytes` of the capture half from `position` with the running
    /// sample counter.
    fn write_samples(&self, state: &mut State, system: AudioSystem, position: u32, bytes: u32) {
        let Some(region) = self.geometry.audio_region(system) else {
            return;
        };
        let half = self.geometry.audio_half_bytes();
        let base = region.start as u64 * self.geometry.frame_bytes + half;
        let mut offset = position as u64;
        for _ in 0..bytes as usize / AUDIO_SAMPLE_BYTES {
            let value = state.samples[system.index()];
            state.samples[system.index()] = value.wrapping_add(1);
            let at = (base + offset) as usize;
            state.memory[at..at + AUDIO_SAMPLE_BYTES].copy_from_slice(&value.to_le_bytes());
            offset = (offset + AUDIO_SAMPLE_BYTES as u64) % half;
        }
    }

    /// Wakes threads blocked in [`Transport::wait_for_interrupt`].
    pub fn signal(&self) {
        self.blank.notify_all();
    }

    /// One full vertical blank: advance the hardware, run the engine's
    /// tick handler, wake waiters.
    pub fn vertical_blank<T: Transport>(&self, engine: &StreamEngine<T>) -> Result<()> {
        self.advance();
        let serviced = engine.service_all();
        self.signal();
        serviced
    }

    /// Raises `count` vertical blanks that nobody services.
    pub fn skip_interrupts(&self, count: u64) {
        for _ in 0..count {
            self.advance();
        }
    }

    /// Makes the next `count` DMA calls fail.
    pub fn fail_next_dma(&self, count: u32) {
        self.state.lock().fail_dma = count;
    }

    pub fn dma_count(&self) -> u64 {
        self.state.lock().dma_count
    }

    pub fn clock(&self) -> u64 {
        self.state.lock().clock
    }

    pub fn vertical_blanks(&self) -> u64 {
        self.state.lock().vertical_blanks
    }

    pub fn register(&self, addr: u32) -> u32 {
        self.state.lock().register(addr)
    }

    pub fn set_register(&self, addr: u32, value: u32) {
        self.state.lock().registers.insert(addr, value);
    }

    pub fn is_subscribed(&self, kind: InterruptKind) -> bool {
        self.state.lock().subscriptions.contains(&kind)
    }

    /// Copy of `len` bytes of frame memory at `offset` into base frame
    /// `frame`.
    pub fn read_memory(&self, frame: u32, offset: u64, len: usize) -> Result<Vec<u8>> {
        let state = self.state.lock();
        let start = state.memory_range(frame, self.geometry.frame_bytes, offset, len)?;
        Ok(state.memory[start..start + len].to_vec())
    }

    pub fn write_memory(&self, frame: u32, offset: u64, data: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        let start = state.memory_range(frame, self.geometry.frame_bytes, offset, data.len())?;
        state.memory[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Data most recently delivered to a peer address.
    pub fn peer_memory(&self, address: u64) -> Option<Vec<u8>> {
        self.state.lock().peer.get(&address).cloned()
    }
}

impl Transport for SimDevice {
    fn read_register(&self, addr: u32, mask: u32, shift: u32) -> Result<u32> {
        Ok((self.state.lock().register(addr) & mask) >> shift)
    }

    fn write_register(&self, addr: u32, value: u32, mask: u32, shift: u32) -> Result<()> {
        let mut state = self.state.lock();
        let current = state.register(addr);
        let value = (current & !mask) | ((value << shift) & mask);
        state.registers.insert(addr, value);
        Ok(())
    }

    fn wait_for_interrupt(&self, kind: InterruptKind, timeout: Duration) -> Result<bool> {
        let mut state = self.state.lock();
        if !state.subscriptions.contains(&kind) {
            return Err(Error::DeviceCommunication(format!(
                "wait on {kind:?} without a subscription"
            )));
        }
        let seen = state.vertical_blanks;
        let result = self
            .blank
            .wait_while_for(&mut state, |s| s.vertical_blanks == seen, timeout);
        Ok(!result.timed_out())
    }

    fn interrupt_count(&self, _kind: InterruptKind) -> Result<u64> {
        Ok(self.state.lock().vertical_blanks)
    }

    fn subscribe_event(&self, kind: InterruptKind) -> Result<()> {
        self.state.lock().subscriptions.insert(kind);
        Ok(())
    }

    fn unsubscribe_event(&self, kind: InterruptKind) -> Result<()> {
        self.state.lock().subscriptions.remove(&kind);
        Ok(())
    }

    fn dma_transfer(
        &self,
        _engine: DmaEngine,
        frame: u32,
        host: HostBuffer<'_>,
        offset: u64,
    ) -> Result<()> {
        let mut state = self.state.lock();
        state.check_dma()?;
        let start = state.memory_range(frame, self.geometry.frame_bytes, offset, host.len())?;
        match host {
            HostBuffer::FromDevice(buf) => {
                let len = buf.len();
                buf.copy_from_slice(&state.memory[start..start + len]);
            }
            HostBuffer::ToDevice(buf) => {
                state.memory[start..start + buf.len()].copy_from_slice(buf);
            }
        }
        Ok(())
    }

    fn dma_transfer_segmented(
        &self,
        _engine: DmaEngine,
        frame: u32,
        host: HostBuffer<'_>,
        offset: u64,
        segments: &Segments,
    ) -> Result<()> {
        let mut state = self.state.lock();
        state.check_dma()?;
        if segments.host_span() > host.len() {
            return Err(Error::DeviceCommunication(format!(
                "segments span {} bytes of a {} byte host buffer",
                segments.host_span(),
                host.len()
            )));
        }
        let bytes = segments.bytes_per_segment as usize;
        let device_start = state.memory_range(
            frame,
            self.geometry.frame_bytes,
            offset,
            segments.device_span() as usize,
        )?;
        for i in 0..segments.count as usize {
            let h = i * segments.host_pitch as usize;
            let d = device_start + i * segments.device_pitch as usize;
            match &host {
                HostBuffer::FromDevice(_) => {}
                HostBuffer::ToDevice(buf) => {
                    state.memory[d..d + bytes].copy_from_slice(&buf[h..h + bytes]);
                }
            }
        }
        if let HostBuffer::FromDevice(buf) = host {
            for i in 0..segments.count as usize {
                let h = i * segments.host_pitch as usize;
                let d = device_start + i * segments.device_pitch as usize;
                buf[h..h + bytes].copy_from_slice(&state.memory[d..d + bytes]);
            }
        }
        Ok(())
    }

    fn dma_transfer_p2p(
        &self,
        _engine: DmaEngine,
        frame: u32,
        offset: u64,
        length: u64,
        target: &PeerTarget,
    ) -> Result<()> {
        let mut state = self.state.lock();
        state.check_dma()?;
        let start =
            state.memory_range(frame, self.geometry.frame_bytes, offset, length as usize)?;
        let data = state.memory[start..start + length as usize].to_vec();
        state.peer.insert(target.address, data);
        Ok(())
    }
}
