// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! The channel streaming engine.
//!
//! [`StreamEngine`] owns the frame allocator and the eight channels of one
//! device. Host operations (`init`, `start`, `transfer`, ...) are called
//! from one thread per channel. The transport's interrupt context calls
//! [`StreamEngine::service_interrupt`] (or [`StreamEngine::service_all`])
//! at every vertical blank. Channel locks are held for bookkeeping only;
//! DMA runs unlocked on a claimed frame.
//!
//! Host threads blocked on a channel sleep on that channel's condition
//! variable, which the tick handler signals after every serviced tick.
//!
//! Lock order is channel, then allocator.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, info, trace, warn};

use crate::{
    allocator::{FrameAllocator, FrameRange},
    anc::{self, AncPacket, DEFAULT_ANC_LINE},
    audio::{check_alignment, AudioControl, AudioSystem},
    channel::{
        Channel, ChannelConfig, ChannelId, ChannelState, ChannelStatus, Claim, Direction,
        OptionFlags, TickInput,
    },
    error::{Error, Result},
    geometry::{DeviceGeometry, MAX_CHANNELS},
    registers::{self, RegisterAccess, RegisterField},
    stamp::FrameStamp,
    timecode::Timecode,
    transfer::{Moved, TransferDescriptor, TransferStatus},
    transport::{DmaEngine, HostBuffer, InterruptKind, Segments, Transport},
};

/// Engine-wide tuning.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    /// How long a graceful stop waits for the channel to drain before it
    /// is forced down.
    pub stop_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stop_timeout: Duration::from_secs(1),
        }
    }
}

impl EngineConfig {
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }
}

/// A channel and the condition its waiters sleep on.
struct ChannelSlot {
    channel: Mutex<Channel>,
    ticked: Condvar,
}

pub struct StreamEngine<T> {
    transport: Arc<T>,
    geometry: DeviceGeometry,
    config: EngineConfig,
    audio: AudioControl<T>,
    allocator: Mutex<FrameAllocator>,
    channels: Vec<ChannelSlot>,
}

impl<T: Transport> StreamEngine<T> {
    pub fn new(transport: Arc<T>, geometry: DeviceGeometry) -> Result<Self> {
        Self::with_config(transport, geometry, EngineConfig::default())
    }

    pub fn with_config(
        transport: Arc<T>,
        geometry: DeviceGeometry,
        config: EngineConfig,
    ) -> Result<Self> {
        geometry.validate()?;
        Ok(Self {
            audio: AudioControl::new(transport.clone(), geometry),
            transport,
            geometry,
            config,
            allocator: Mutex::new(FrameAllocator::new(geometry)),
            channels: (1..=MAX_CHANNELS)
                .filter_map(|n| ChannelId::new(n).ok())
                .map(|id| ChannelSlot {
                    channel: Mutex::new(Channel::new(id)),
                    ticked: Condvar::new(),
                })
                .collect(),
        })
    }

    pub fn geometry(&self) -> &DeviceGeometry {
        &self.geometry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn audio(&self) -> &AudioControl<T> {
        &self.audio
    }

    fn channel(&self, id: ChannelId) -> MutexGuard<'_, Channel> {
        self.channels[id.index()].channel.lock()
    }

    /// Whether a channel other than `channel` is live on `system` in
    /// `direction`. Locks one channel at a time.
    fn audio_shared(&self, channel: ChannelId, system: AudioSystem, direction: Direction) -> bool {
        self.channels
            .iter()
            .enumerate()
            .filter(|(index, _)| *index != channel.index())
            .any(|(_, slot)| {
                let ch = slot.channel.lock();
                !matches!(
                    ch.state(),
                    ChannelState::Uninitialized | ChannelState::Disabled
                ) && ch
                    .config()
                    .is_some_and(|c| c.audio == Some(system) && c.direction == direction)
            })
    }

    /// First free frame range of `count` frames, for diagnostics. With
    /// `exclude_audio` cleared, audio buffer regions count as free.
    pub fn find_range(
        &self,
        count: u32,
        mode: crate::geometry::FrameSizeMode,
        exclude_audio: bool,
    ) -> Result<FrameRange> {
        self.allocator.lock().find_range(count, mode, exclude_audio)
    }

    /// Reserves frames for `channel` and puts it in `Init`. A channel
    /// already in `Init` gives up its previous frames.
    ///
    /// Once the frames are reserved the bound audio system is held in reset
    /// until start, unless another live channel is streaming it in the same
    /// direction.
    pub fn init(&self, channel: ChannelId, config: ChannelConfig) -> Result<FrameRange> {
        config.group(channel)?;
        if let Some(system) = config.audio {
            if self.geometry.audio_region(system).is_none() {
                return Err(Error::InvalidArgument(format!(
                    "{system} is not present, device has {} audio systems",
                    self.geometry.audio_systems
                )));
            }
        }

        let reset_audio = config
            .audio
            .filter(|_| !config.options.contains(OptionFlags::AUDIO_CONTROL))
            .filter(|system| !self.audio_shared(channel, *system, config.direction));

        let mut ch = self.channel(channel);
        ch.check_init()?;
        let kind = config.direction.interrupt(channel);
        let previous = ch.interrupt().filter(|_| ch.state() == ChannelState::Init);
        self.transport.subscribe_event(kind)?;
        let range = match self
            .allocator
            .lock()
            .allocate(channel, config.frames, config.mode)
        {
            Ok(range) => range,
            Err(err) => {
                if previous != Some(kind) {
                    self.transport.unsubscribe_event(kind)?;
                }
                return Err(err);
            }
        };
        if let Some(previous) = previous.filter(|p| *p != kind) {
            self.transport.unsubscribe_event(previous)?;
        }
        ch.init(config, range);
        if let Some(system) = reset_audio {
            self.audio.stop(system, config.direction)?;
        }
        info!(
            "channel {channel} {} init with frames {range}",
            config.direction
        );
        Ok(range)
    }

    /// Arms `channel`. With `start_time` in the future (device clock ticks)
    /// it waits in `StartingAtTime`, otherwise it runs from the next tick.
    pub fn start(&self, channel: ChannelId, start_time: u64) -> Result<ChannelState> {
        let now = self.transport.read_clock()?;
        let state = self.channel(channel).start(start_time, now)?;
        info!("channel {channel} {state} (start time {start_time}, now {now})");
        Ok(state)
    }

    /// Stops `channel`. A graceful stop blocks until the next tick has
    /// drained the channel; an abort disables it at once.
    pub fn stop(&self, channel: ChannelId, abort: bool) -> Result<()> {
        let (state, kind, config) = {
            let mut ch = self.channel(channel);
            let state = ch.stop(abort)?;
            let config = ch.config().copied();
            if state == ChannelState::Disabled {
                self.channels[channel.index()].ticked.notify_all();
                if let Some(config) = &config {
                    self.teardown(channel, config)?;
                }
            }
            (state, ch.interrupt(), config)
        };

        if state == ChannelState::Stopping {
            if let Some(kind) = kind {
                self.drain(channel, kind, config)?;
            }
        }
        if let Some(kind) = kind {
            self.transport.unsubscribe_event(kind)?;
        }
        info!("channel {channel} disabled{}", if abort { " (abort)" } else { "" });
        Ok(())
    }

    /// Waits for the tick handler to finish a graceful stop, forcing the
    /// channel down when it does not happen in time.
    fn drain(
        &self,
        channel: ChannelId,
        kind: InterruptKind,
        config: Option<ChannelConfig>,
    ) -> Result<()> {
        let began = Instant::now();
        let deadline = began + self.config.stop_timeout;
        let slot = &self.channels[channel.index()];
        let mut ch = slot.channel.lock();
        while ch.state() != ChannelState::Disabled {
            if slot.ticked.wait_until(&mut ch, deadline).timed_out() {
                break;
            }
        }
        if ch.state() == ChannelState::Disabled {
            return Ok(());
        }

        if ch.state() == ChannelState::Stopping {
            warn!("channel {channel} did not drain, forcing abort");
            ch.disable();
            slot.ticked.notify_all();
            if let Some(config) = &config {
                self.teardown(channel, config)?;
            }
        }
        drop(ch);
        self.transport.unsubscribe_event(kind)?;
        Err(Error::HardwareTimeout {
            channel,
            waited_ms: began.elapsed().as_millis() as u64,
        })
    }

    /// Releases a disabled channel's frames and audio. Called with the
    /// channel lock held.
    fn teardown(&self, channel: ChannelId, config: &ChannelConfig) -> Result<()> {
        self.allocator.lock().release(channel);
        if let Some(system) = config.audio {
            if !config.options.contains(OptionFlags::AUDIO_CONTROL) {
                self.audio.stop(system, config.direction)?;
            }
        }
        Ok(())
    }

    pub fn pause(&self, channel: ChannelId) -> Result<()> {
        let mut ch = self.channel(channel);
        ch.pause()?;
        if let Some(config) = ch.config().copied() {
            self.pause_audio(&config, true)?;
        }
        debug!("channel {channel} paused");
        Ok(())
    }

    pub fn resume(&self, channel: ChannelId, clear_drops: bool) -> Result<()> {
        let mut ch = self.channel(channel);
        ch.resume(clear_drops)?;
        if let Some(config) = ch.config().copied() {
            self.pause_audio(&config, false)?;
        }
        debug!("channel {channel} resumed (clear drops {clear_drops})");
        Ok(())
    }

    fn pause_audio(&self, config: &ChannelConfig, paused: bool) -> Result<()> {
        match config.audio {
            Some(system) if !config.options.contains(OptionFlags::AUDIO_CONTROL) => {
                self.audio.set_paused(system, config.direction, paused)
            }
            _ => Ok(()),
        }
    }

    /// Discards frames queued but not yet exchanged with the host.
    pub fn flush(&self, channel: ChannelId, clear_drops: bool) -> Result<()> {
        self.channel(channel).flush(clear_drops)
    }

    /// Marks `count` externally loaded playout frames as queued.
    pub fn preroll(&self, channel: ChannelId, count: u32) -> Result<()> {
        self.channel(channel).preroll(count)
    }

    /// Repoints the hardware at `frame` immediately; it takes effect at the
    /// next tick.
    pub fn set_active_frame(&self, channel: ChannelId, frame: u32) -> Result<()> {
        let mut ch = self.channel(channel);
        ch.set_active(frame)?;
        if let (Some(config), Some(range)) = (ch.config().copied(), ch.range()) {
            self.program_active(channel, &config, range, frame)?;
        }
        Ok(())
    }

    /// Writes `frame` into the active-frame register of every channel in
    /// the group.
    fn program_active(
        &self,
        channel: ChannelId,
        config: &ChannelConfig,
        range: FrameRange,
        frame: u32,
    ) -> Result<()> {
        let base = range.base_frame(frame);
        for member in config.group(channel)? {
            let addr = match config.direction {
                Direction::Capture => registers::input_frame(member),
                Direction::Playout => registers::output_frame(member),
            };
            self.transport.write_field(RegisterField::word(addr), base)?;
        }
        Ok(())
    }

    pub fn status(&self, channel: ChannelId) -> ChannelStatus {
        self.channel(channel).status()
    }

    /// Status of every channel.
    pub fn statuses(&self) -> Vec<ChannelStatus> {
        self.channels
            .iter()
            .map(|slot| slot.channel.lock().status())
            .collect()
    }

    /// Stamp of `frame`, with the current active frame and device time.
    pub fn frame_stamp(&self, channel: ChannelId, frame: u32) -> Result<FrameStamp> {
        let mut stamp = self.channel(channel).frame_stamp(frame)?;
        stamp.current_time = self.transport.read_clock()?;
        Ok(stamp)
    }

    /// Exchanges one frame with the host.
    ///
    /// Waits up to `desc.timeout` for a frame to become available and
    /// returns [`Error::Busy`] if none does. A DMA failure leaves the frame
    /// available for the next call.
    pub fn transfer(
        &self,
        channel: ChannelId,
        desc: &mut TransferDescriptor<'_>,
    ) -> Result<TransferStatus> {
        if let Some(direction) = self.channel(channel).config().map(|c| c.direction) {
            desc.validate(direction)?;
        }
        if let Some(audio) = &desc.audio {
            check_alignment(audio)?;
        }

        let deadline = Instant::now() + desc.timeout;
        let claim = {
            let slot = &self.channels[channel.index()];
            let mut ch = slot.channel.lock();
            loop {
                if let Some(claim) = ch.claim_transfer()? {
                    break claim;
                }
                if Instant::now() >= deadline {
                    return Err(Error::Busy);
                }
                slot.ticked.wait_until(&mut ch, deadline);
            }
        };

        let moved = match claim.config.direction {
            Direction::Capture => self.read_frame(&claim, desc),
            Direction::Playout => self.write_frame(&claim, desc),
        };
        let mut ch = self.channel(channel);
        match moved {
            Ok(moved) => {
                let status = ch.commit_transfer(&claim, moved)?;
                trace!(
                    "channel {channel} transferred frame {} level {}",
                    status.frame,
                    status.buffer_level
                );
                Ok(status)
            }
            Err(err) => {
                ch.abandon_transfer(&claim);
                warn!("channel {channel} transfer of frame {} failed: {err}", claim.frame);
                Err(err)
            }
        }
    }

    fn move_video(
        &self,
        engine: DmaEngine,
        frame: u32,
        host: &mut HostBuffer<'_>,
        segments: Option<&Segments>,
        picture: u64,
    ) -> Result<u64> {
        match segments {
            Some(segments) => {
                if segments.host_span() > host.len() {
                    return Err(Error::BufferTooSmall {
                        need: segments.host_span(),
                        have: host.len(),
                    });
                }
                if segments.device_span() > picture {
                    return Err(Error::InvalidArgument(format!(
                        "segments span {} bytes of a {picture} byte picture",
                        segments.device_span()
                    )));
                }
                self.transport.dma_transfer_segmented(
                    engine,
                    frame,
                    host.prefix(segments.host_span()),
                    0,
                    segments,
                )?;
                Ok(segments.count as u64 * segments.bytes_per_segment as u64)
            }
            None => {
                let len = (host.len() as u64).min(picture);
                self.transport
                    .dma_transfer(engine, frame, host.prefix(len as usize), 0)?;
                Ok(len)
            }
        }
    }

    fn read_frame(&self, claim: &Claim, desc: &mut TransferDescriptor<'_>) -> Result<Moved> {
        let engine = desc.dma_engine;
        let mode = claim.config.mode;
        let base = claim.range.base_frame(claim.frame);
        let picture = self.geometry.video_bytes(mode);
        let mut moved = Moved {
            timecode: claim.stamp.timecode,
            user_cookie: claim.stamp.user_cookie,
            ..Default::default()
        };

        moved.video_bytes = match (desc.peer, desc.video.as_mut()) {
            (Some(peer), _) => {
                self.transport
                    .dma_transfer_p2p(engine, base, 0, picture, &peer)?;
                picture
            }
            (None, Some(video)) => {
                self.move_video(engine, base, video, desc.segments.as_ref(), picture)?
            }
            (None, None) => 0,
        };

        if let (Some(system), Some(HostBuffer::FromDevice(buf))) =
            (claim.config.audio, desc.audio.as_mut())
        {
            moved.audio_bytes = self.audio.read_capture(
                engine,
                system,
                claim.stamp.audio_start,
                claim.stamp.audio_end,
                buf,
            )?;
        }

        let field_bytes = self.geometry.anc_field_bytes as usize;
        for (field2, buf) in [
            (false, desc.anc_field1.as_mut()),
            (true, desc.anc_field2.as_mut()),
        ] {
            if let Some(buf) = buf {
                let len = buf.len().min(field_bytes);
                self.transport.dma_transfer(
                    engine,
                    base,
                    buf.prefix(len),
                    self.geometry.anc_offset(mode, field2),
                )?;
                moved.anc_bytes += len;
            }
        }
        Ok(moved)
    }

    fn write_frame(&self, claim: &Claim, desc: &mut TransferDescriptor<'_>) -> Result<Moved> {
        let engine = desc.dma_engine;
        let config = &claim.config;
        let base = claim.range.base_frame(claim.frame);
        let picture = self.geometry.video_bytes(config.mode);
        let timecode = desc.timecode.or_else(|| {
            config.options.contains(OptionFlags::TIMECODE).then(|| {
                Timecode::from_frame_count(claim.sequence, config.frame_rate.timecode_fps())
            })
        });
        let mut moved = Moved {
            timecode,
            user_cookie: desc.user_cookie,
            ..Default::default()
        };

        if let Some(video) = desc.video.as_mut() {
            moved.video_bytes =
                self.move_video(engine, base, video, desc.segments.as_ref(), picture)?;
        }

        if let (Some(system), Some(HostBuffer::ToDevice(data))) = (config.audio, &desc.audio) {
            moved.audio_cursor =
                Some(self.audio.write_playout(engine, system, claim.audio_cursor, data)?);
            moved.audio_bytes = data.len();
        }

        match &desc.anc_field1 {
            Some(HostBuffer::ToDevice(data)) => {
                moved.anc_bytes += self.write_anc(engine, base, config, false, data)?;
            }
            None if config.options.contains(OptionFlags::ANC) => {
                let mut packets = vec![AncPacket::payload_identifier(
                    anc::payload_identifier_for(config.frame_rate, config.mode),
                    DEFAULT_ANC_LINE,
                )];
                if let Some(tc) = timecode {
                    packets.push(AncPacket::atc_timecode(tc, DEFAULT_ANC_LINE));
                }
                let region =
                    anc::encode_region(&packets, self.geometry.anc_field_bytes as usize)?;
                moved.anc_bytes += self.write_anc(engine, base, config, false, &region)?;
            }
            _ => {}
        }
        if let Some(HostBuffer::ToDevice(data)) = &desc.anc_field2 {
            moved.anc_bytes += self.write_anc(engine, base, config, true, data)?;
        }
        Ok(moved)
    }

    fn write_anc(
        &self,
        engine: DmaEngine,
        frame: u32,
        config: &ChannelConfig,
        field2: bool,
        data: &[u8],
    ) -> Result<usize> {
        let field_bytes = self.geometry.anc_field_bytes as usize;
        if data.len() > field_bytes {
            return Err(Error::BufferTooSmall {
                need: data.len(),
                have: field_bytes,
            });
        }
        if !data.is_empty() {
            self.transport.dma_transfer(
                engine,
                frame,
                HostBuffer::ToDevice(data),
                self.geometry.anc_offset(config.mode, field2),
            )?;
        }
        Ok(data.len())
    }

    /// Runs the vertical blank work for the channel `kind` paces.
    pub fn service_interrupt(&self, kind: InterruptKind) -> Result<()> {
        let slot = &self.channels[kind.channel().index()];
        let mut ch = slot.channel.lock();
        let result = self.tick_channel(kind, &mut ch);
        slot.ticked.notify_all();
        result
    }

    /// Waits up to `timeout` for the next `kind` interrupt from the
    /// transport and services it. Returns false on timeout.
    ///
    /// Interrupts raised between two calls are not serviced one by one;
    /// the next tick books them as missed.
    pub fn service_next(&self, kind: InterruptKind, timeout: Duration) -> Result<bool> {
        if !self.transport.wait_for_interrupt(kind, timeout)? {
            return Ok(false);
        }
        self.service_interrupt(kind)?;
        Ok(true)
    }

    fn tick_channel(&self, kind: InterruptKind, ch: &mut Channel) -> Result<()> {
        let channel = kind.channel();
        let Some(config) = ch.config().copied() else {
            return Ok(());
        };
        if ch.interrupt() != Some(kind)
            || !matches!(
                ch.state(),
                ChannelState::Starting
                    | ChannelState::StartingAtTime
                    | ChannelState::Running
                    | ChannelState::Paused
                    | ChannelState::Stopping
            )
        {
            return Ok(());
        }

        let audio_position = match config.audio {
            Some(system) => Some(self.audio.position(system, config.direction)?),
            None => None,
        };
        let timecode = if config.direction == Direction::Capture
            && config.options.contains(OptionFlags::TIMECODE)
        {
            Timecode::from_rp188(self.transport.read_rp188(registers::rp188_input(channel))?)
        } else {
            None
        };
        let input = TickInput {
            clock: self.transport.read_clock()?,
            interrupt_count: self.transport.interrupt_count(kind)?,
            audio_position,
            timecode,
        };

        let out = ch.tick(&input);
        if let (Some(frame), Some(range)) = (out.active, ch.range()) {
            self.program_active(channel, &config, range, frame)?;
        }
        if let Some(tc) = out.on_air {
            if config.options.contains(OptionFlags::TIMECODE) {
                self.transport
                    .write_rp188(registers::rp188_output(channel), tc.to_rp188())?;
            }
        }
        if out.started {
            info!("channel {channel} running at {}", input.clock);
            if let Some(system) = config.audio {
                if !config.options.contains(OptionFlags::AUDIO_CONTROL) {
                    self.audio.start(system, config.direction)?;
                }
            }
        }
        if out.stopped {
            self.teardown(channel, &config)?;
            debug!("channel {channel} drained");
        }
        Ok(())
    }

    /// Services every initialized channel. Returns the first error after
    /// attempting all of them.
    pub fn service_all(&self) -> Result<()> {
        let mut first = None;
        for (index, slot) in self.channels.iter().enumerate() {
            let Some(kind) = slot.channel.lock().interrupt() else {
                continue;
            };
            if let Err(err) = self.service_interrupt(kind) {
                warn!("tick on channel {} failed: {err}", index + 1);
                first.get_or_insert(err);
            }
        }
        first.map_or(Ok(()), Err)
    }
}
