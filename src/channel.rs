// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Channel lifecycle and frame circulation.
//!
//! A channel moves through
//!
//! ```text
//! Uninitialized -> Init -> Starting | StartingAtTime -> Running <-> Paused
//!                                                     -> Stopping -> Disabled
//! ```
//!
//! and a new init from `Disabled` starts the cycle again. Every frame of the
//! channel's range is in one of four slot states:
//!
//! - `Free`: capture may write it, playout host may fill it
//! - `Ready`: captured and waiting for the host, or filled and queued for air
//! - `Active`: owned by the hardware this frame period
//! - `Transferring`: claimed by a host DMA in flight
//!
//! The vertical blank handler owns `Active` transitions, the host owns
//! `Transferring` ones. Everything here is bookkeeping; register and DMA
//! access happens in [`crate::engine`].

use core::fmt;

use bitflags::bitflags;
use tracing::{debug, trace, warn};

use crate::{
    allocator::{FrameRange, FrameSpec},
    audio::{AudioSync, AudioSystem},
    error::{Error, Result},
    geometry::{FrameRate, FrameSizeMode, MAX_CHANNELS},
    stamp::{FrameStamp, StampTracker},
    timecode::Timecode,
    transfer::{Moved, TransferStatus},
    transport::InterruptKind,
};

/// Largest number of channels driven together as one group.
pub const MAX_GROUP_SIZE: u8 = 4;

/// Hardware channel, numbered from 1.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u8);

impl ChannelId {
    pub fn new(number: u8) -> Result<Self> {
        if number == 0 || number > MAX_CHANNELS {
            return Err(Error::InvalidArgument(format!(
                "channel {number} out of range 1..={MAX_CHANNELS}"
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

    /// Every channel on the device.
    pub fn all() -> impl Iterator<Item = ChannelId> {
        (1..=MAX_CHANNELS).map(ChannelId)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    Capture,
    Playout,
}

impl Direction {
    /// Vertical blank interrupt that paces `channel` in this direction.
    pub fn interrupt(self, channel: ChannelId) -> InterruptKind {
        match self {
            Direction::Capture => InterruptKind::InputVerticalBlank(channel),
            Direction::Playout => InterruptKind::OutputVerticalBlank(channel),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Direction::Capture => "capture",
            Direction::Playout => "playout",
        })
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum ChannelState {
    #[default]
    Uninitialized,
    Init,
    Starting,
    StartingAtTime,
    Running,
    Paused,
    Stopping,
    Disabled,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            ChannelState::Uninitialized => "uninitialized",
            ChannelState::Init => "init",
            ChannelState::Starting => "starting",
            ChannelState::StartingAtTime => "starting-at-time",
            ChannelState::Running => "running",
            ChannelState::Paused => "paused",
            ChannelState::Stopping => "stopping",
            ChannelState::Disabled => "disabled",
        })
    }
}

/// Host operations, used to report rejected transitions.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    Init,
    Start,
    Stop,
    Pause,
    Resume,
    Flush,
    PreRoll,
    SetActiveFrame,
    Transfer,
    FrameStamp,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            Operation::Init => "init",
            Operation::Start => "start",
            Operation::Stop => "stop",
            Operation::Pause => "pause",
            Operation::Resume => "resume",
            Operation::Flush => "flush",
            Operation::PreRoll => "preroll",
            Operation::SetActiveFrame => "set active frame",
            Operation::Transfer => "transfer",
            Operation::FrameStamp => "frame stamp",
        })
    }
}

bitflags! {
    /// Per-channel options fixed at init.
    #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
    pub struct OptionFlags: u32 {
        /// Read RP188 timecode on capture, generate it on playout
        const TIMECODE = 1 << 0;
        /// Insert default ancillary packets on playout
        const ANC = 1 << 1;
        /// The caller starts and stops the bound audio system
        const AUDIO_CONTROL = 1 << 2;
    }
}

impl Default for OptionFlags {
    fn default() -> Self {
        Self::empty()
    }
}

/// Everything a channel needs at init.
///
/// ```
/// use edgefirst_framestream::{AudioSystem, ChannelConfig, OptionFlags};
///
/// let config = ChannelConfig::capture(7)
///     .with_audio(AudioSystem::new(1).unwrap())
///     .with_options(OptionFlags::TIMECODE);
/// assert_eq!(config.group_size, 1);
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ChannelConfig {
    pub direction: Direction,
    pub frames: FrameSpec,
    pub audio: Option<AudioSystem>,
    pub options: OptionFlags,
    /// Consecutive channels whose active-frame registers follow this one
    pub group_size: u8,
    pub mode: FrameSizeMode,
    /// Rate used for generated timecode and ancillary identifiers
    pub frame_rate: FrameRate,
}

impl ChannelConfig {
    fn new(direction: Direction, frames: FrameSpec) -> Self {
        Self {
            direction,
            frames,
            audio: None,
            options: OptionFlags::empty(),
            group_size: 1,
            mode: FrameSizeMode::Standard,
            frame_rate: FrameRate::default(),
        }
    }

    pub fn capture(frames: u32) -> Self {
        Self::new(Direction::Capture, FrameSpec::Count(frames))
    }

    pub fn playout(frames: u32) -> Self {
        Self::new(Direction::Playout, FrameSpec::Count(frames))
    }

    /// Uses exactly frames `start..=end` instead of a count.
    pub fn with_range(mut self, start: u32, end: u32) -> Self {
        self.frames = FrameSpec::Range { start, end };
        self
    }

    pub fn with_audio(mut self, system: AudioSystem) -> Self {
        self.audio = Some(system);
        self
    }

    pub fn with_options(mut self, options: OptionFlags) -> Self {
        self.options = options;
        self
    }

    pub fn with_group_size(mut self, size: u8) -> Self {
        self.group_size = size;
        self
    }

    pub fn with_mode(mut self, mode: FrameSizeMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_frame_rate(mut self, rate: FrameRate) -> Self {
        self.frame_rate = rate;
        self
    }

    /// Channels whose active frame this channel drives.
    pub fn group(&self, channel: ChannelId) -> Result<Vec<ChannelId>> {
        if self.group_size == 0 || self.group_size > MAX_GROUP_SIZE {
            return Err(Error::InvalidArgument(format!(
                "group size {} out of range 1..={MAX_GROUP_SIZE}",
                self.group_size
            )));
        }
        (channel.number()..channel.number() + self.group_size)
            .map(ChannelId::new)
            .collect()
    }
}

/// Read-only snapshot of a channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelStatus {
    pub channel: ChannelId,
    pub state: ChannelState,
    pub direction: Option<Direction>,
    pub start_frame: u32,
    pub end_frame: u32,
    pub active_frame: u32,
    pub frames_processed: u64,
    pub frames_dropped: u64,
    /// Frames waiting: captured for the host, or queued for air
    pub buffer_level: u32,
    /// Frames a transfer could use right now
    pub frames_available: u32,
    pub audio: Option<AudioSystem>,
    pub options: OptionFlags,
    pub group_size: u8,
    /// Device clock at the tick the channel began running
    pub running_since: Option<u64>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Slot {
    Free,
    Ready,
    Active,
    Transferring,
}

/// Hardware readings taken at a vertical blank.
#[derive(Copy, Clone, Debug, Default)]
pub(crate) struct TickInput {
    pub clock: u64,
    pub interrupt_count: u64,
    pub audio_position: Option<u32>,
    pub timecode: Option<Timecode>,
}

/// Register work the engine owes the hardware after a tick.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct TickOutcome {
    pub started: bool,
    pub stopped: bool,
    /// Frame to program into the active-frame registers
    pub active: Option<u32>,
    /// Timecode of a playout frame that just went on air
    pub on_air: Option<Timecode>,
    pub dropped: u64,
}

/// A frame claimed for one host transfer.
#[derive(Copy, Clone, Debug)]
pub(crate) struct Claim {
    generation: u64,
    pub frame: u32,
    pub range: FrameRange,
    pub config: ChannelConfig,
    pub stamp: FrameStamp,
    pub audio_cursor: u32,
    /// Frames transferred before this one in the session
    pub sequence: u64,
}

#[derive(Debug)]
struct Session {
    config: ChannelConfig,
    range: FrameRange,
    slots: Vec<Slot>,
    stamps: StampTracker,
    active: u32,
    cursor: u32,
    start_time: u64,
    running_since: Option<u64>,
    processed: u64,
    dropped: u64,
    dropped_at_last_transfer: u64,
    transfers: u64,
    audio_sync: AudioSync,
    audio_cursor: u32,
    last_interrupt: Option<u64>,
    resync: bool,
}

impl Session {
    fn new(config: ChannelConfig, range: FrameRange) -> Self {
        Self {
            config,
            range,
            slots: vec![Slot::Free; range.len() as usize],
            stamps: StampTracker::new(range),
            active: range.start,
            cursor: range.start,
            start_time: 0,
            running_since: None,
            processed: 0,
            dropped: 0,
            dropped_at_last_transfer: 0,
            transfers: 0,
            audio_sync: AudioSync::default(),
            audio_cursor: 0,
            last_interrupt: None,
            resync: false,
        }
    }

    fn slot(&self, frame: u32) -> Slot {
        self.slots[self.range.slot(frame)]
    }

    fn set(&mut self, frame: u32, slot: Slot) {
        let index = self.range.slot(frame);
        self.slots[index] = slot;
    }

    fn count(&self, slot: Slot) -> u32 {
        self.slots.iter().filter(|s| **s == slot).count() as u32
    }

    /// Returns queued frames to `Free`, leaving claimed and on-air ones.
    fn discard_ready(&mut self) {
        for slot in self.slots.iter_mut().filter(|s| **s == Slot::Ready) {
            *slot = Slot::Free;
        }
        for frame in self.range.start..=self.range.end {
            if self.slot(frame) == Slot::Free {
                self.stamps.invalidate(frame);
            }
        }
    }

    fn record_missed(&mut self, interrupt_count: u64, out: &mut TickOutcome) {
        if let Some(last) = self.last_interrupt {
            let missed = interrupt_count.saturating_sub(last).saturating_sub(1);
            if missed > 0 {
                self.dropped += missed;
                out.dropped += missed;
            }
        }
        self.last_interrupt = Some(interrupt_count);
    }

    fn enter_running(&mut self, input: &TickInput, out: &mut TickOutcome) {
        let frame = self.active;
        let position = input.audio_position.unwrap_or(0);
        self.running_since = Some(input.clock);
        self.last_interrupt = Some(input.interrupt_count);
        self.resync = false;
        self.audio_sync = AudioSync::begin(position);
        match self.config.direction {
            Direction::Capture => {
                self.stamps.get_mut(frame).begin(input.clock, position);
                self.cursor = frame;
            }
            Direction::Playout => {
                if self.slot(frame) == Slot::Ready {
                    self.processed += 1;
                }
                self.go_on_air(frame, input.clock, position);
                if self.cursor == frame {
                    self.cursor = self.range.next(frame);
                }
                out.on_air = self.stamps.get_mut(frame).timecode;
            }
        }
        self.set(frame, Slot::Active);
        out.started = true;
        out.active = Some(frame);
    }

    fn go_on_air(&mut self, frame: u32, clock: u64, position: u32) {
        let stamp = self.stamps.get_mut(frame);
        stamp.frame_time = clock;
        stamp.audio_start = position;
        stamp.audio_end = position;
        stamp.valid = true;
    }

    fn advance(&mut self, input: &TickInput, out: &mut TickOutcome) {
        self.record_missed(input.interrupt_count, out);
        let position = input.audio_position.unwrap_or(0);
        if self.resync {
            self.resync = false;
            self.audio_sync.restart(position);
            if self.config.direction == Direction::Capture {
                self.stamps.get_mut(self.active).begin(input.clock, position);
            }
            out.active = Some(self.active);
            return;
        }
        match self.config.direction {
            Direction::Capture => self.advance_capture(input, position, out),
            Direction::Playout => self.advance_playout(input, position, out),
        }
    }

    fn advance_capture(&mut self, input: &TickInput, position: u32, out: &mut TickOutcome) {
        let frame = self.active;
        let next = self.range.next(frame);
        if self.slot(next) != Slot::Free {
            // ring full, the hardware overwrites the active frame
            self.dropped += 1;
            out.dropped += 1;
            self.audio_sync.restart(position);
            self.stamps.get_mut(frame).begin(input.clock, position);
            return;
        }
        let (start, end) = self.audio_sync.complete(position);
        let stamp = self.stamps.get_mut(frame);
        stamp.audio_start = start;
        stamp.audio_end = end;
        stamp.timecode = input.timecode;
        stamp.valid = true;
        self.set(frame, Slot::Ready);
        self.processed += 1;

        self.stamps.get_mut(next).begin(input.clock, position);
        self.set(next, Slot::Active);
        self.active = next;
        out.active = Some(next);
    }

    fn advance_playout(&mut self, input: &TickInput, position: u32, out: &mut TickOutcome) {
        let frame = self.active;
        let next = self.range.next(frame);
        if self.slot(next) != Slot::Ready {
            // nothing queued, the active frame repeats
            self.dropped += 1;
            out.dropped += 1;
            return;
        }
        let (start, end) = self.audio_sync.complete(position);
        let stamp = self.stamps.get_mut(frame);
        stamp.audio_start = start;
        stamp.audio_end = end;
        self.set(frame, Slot::Free);

        self.go_on_air(next, input.clock, position);
        self.set(next, Slot::Active);
        self.active = next;
        self.processed += 1;
        out.active = Some(next);
        out.on_air = self.stamps.get_mut(next).timecode;
    }
}

/// State and frame bookkeeping of one channel.
#[derive(Debug)]
pub(crate) struct Channel {
    id: ChannelId,
    state: ChannelState,
    /// Bumped whenever outstanding claims become stale
    generation: u64,
    session: Option<Session>,
}

impl Channel {
    pub fn new(id: ChannelId) -> Self {
        Self {
            id,
            state: ChannelState::Uninitialized,
            generation: 0,
            session: None,
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn config(&self) -> Option<&ChannelConfig> {
        self.session.as_ref().map(|s| &s.config)
    }

    pub fn range(&self) -> Option<FrameRange> {
        self.session.as_ref().map(|s| s.range)
    }

    pub fn active_frame(&self) -> Option<u32> {
        self.session.as_ref().map(|s| s.active)
    }

    /// Interrupt that paces this channel, once it has been initialized.
    pub fn interrupt(&self) -> Option<InterruptKind> {
        self.config().map(|c| c.direction.interrupt(self.id))
    }

    pub fn reject(&self, operation: Operation) -> Error {
        Error::InvalidStateTransition {
            channel: self.id,
            operation,
            state: self.state,
        }
    }

    fn require(&self, operation: Operation, allowed: &[ChannelState]) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(self.reject(operation))
        }
    }

    /// Session for an operation already checked against the state graph.
    fn session_mut(&mut self, operation: Operation) -> Result<&mut Session> {
        let error = self.reject(operation);
        self.session.as_mut().ok_or(error)
    }

    pub fn check_init(&self) -> Result<()> {
        use ChannelState::*;
        self.require(Operation::Init, &[Uninitialized, Init, Disabled])
    }

    pub fn init(&mut self, config: ChannelConfig, range: FrameRange) {
        self.session = Some(Session::new(config, range));
        self.state = ChannelState::Init;
        self.generation += 1;
    }

    /// Arms the channel. Returns the state it is now waiting in.
    pub fn start(&mut self, start_time: u64, now: u64) -> Result<ChannelState> {
        self.require(Operation::Start, &[ChannelState::Init])?;
        let session = self.session_mut(Operation::Start)?;
        session.start_time = start_time;
        self.state = if start_time > now {
            ChannelState::StartingAtTime
        } else {
            ChannelState::Starting
        };
        Ok(self.state)
    }

    /// Begins a stop. An abort disables at once; otherwise the channel
    /// drains to the next tick.
    pub fn stop(&mut self, abort: bool) -> Result<ChannelState> {
        use ChannelState::*;
        self.require(Operation::Stop, &[Starting, StartingAtTime, Running, Paused])?;
        if abort {
            self.disable();
        } else {
            self.state = Stopping;
        }
        Ok(self.state)
    }

    pub fn disable(&mut self) {
        self.state = ChannelState::Disabled;
        self.generation += 1;
        if let Some(session) = self.session.as_mut() {
            session.slots.fill(Slot::Free);
            session.running_since = None;
        }
    }

    pub fn pause(&mut self) -> Result<()> {
        self.require(Operation::Pause, &[ChannelState::Running])?;
        self.state = ChannelState::Paused;
        Ok(())
    }

    pub fn resume(&mut self, clear_drops: bool) -> Result<()> {
        self.require(Operation::Resume, &[ChannelState::Paused])?;
        let session = self.session_mut(Operation::Resume)?;
        session.resync = true;
        if clear_drops {
            session.dropped = 0;
            session.dropped_at_last_transfer = 0;
        }
        self.state = ChannelState::Running;
        Ok(())
    }

    pub fn flush(&mut self, clear_drops: bool) -> Result<()> {
        use ChannelState::*;
        self.require(Operation::Flush, &[Init, Starting, StartingAtTime, Running, Paused])?;
        let running = matches!(self.state, Running | Paused);
        let session = self.session_mut(Operation::Flush)?;
        session.discard_ready();
        session.cursor = match (session.config.direction, running) {
            (Direction::Playout, true) => session.range.next(session.active),
            _ => session.active,
        };
        if clear_drops {
            session.dropped = 0;
            session.dropped_at_last_transfer = 0;
        }
        debug!("channel {} flushed", self.id);
        Ok(())
    }

    /// Queues `count` playout frames whose contents were loaded externally.
    pub fn preroll(&mut self, count: u32) -> Result<()> {
        use ChannelState::*;
        self.require(Operation::PreRoll, &[Init, Starting, StartingAtTime, Running, Paused])?;
        let id = self.id;
        let session = self.session_mut(Operation::PreRoll)?;
        if session.config.direction != Direction::Playout {
            return Err(Error::InvalidArgument(format!(
                "channel {id} is a capture channel, preroll needs playout"
            )));
        }
        let mut frame = session.cursor;
        let mut frames = Vec::with_capacity(count as usize);
        for _ in 0..count {
            if session.slot(frame) != Slot::Free {
                return Err(Error::InvalidArgument(format!(
                    "channel {id} has fewer than {count} free frames to preroll"
                )));
            }
            frames.push(frame);
            frame = session.range.next(frame);
        }
        for frame in frames {
            session.set(frame, Slot::Ready);
            session.stamps.invalidate(frame);
        }
        session.cursor = frame;
        debug!("channel {id} prerolled {count} frames");
        Ok(())
    }

    /// Repoints the channel at `frame`. Before the channel runs this picks
    /// the first frame; while running, a capture channel drops undelivered
    /// frames and restarts at `frame`, a playout channel puts `frame` on
    /// air at the next tick.
    pub fn set_active(&mut self, frame: u32) -> Result<()> {
        use ChannelState::*;
        self.require(Operation::SetActiveFrame, &[Starting, StartingAtTime, Running, Paused])?;
        let running = matches!(self.state, Running | Paused);
        let id = self.id;
        let session = self.session_mut(Operation::SetActiveFrame)?;
        if !session.range.contains(frame) {
            return Err(Error::InvalidArgument(format!(
                "frame {frame} is outside channel {id} frames {}",
                session.range
            )));
        }
        if !running {
            session.active = frame;
            if session.config.direction == Direction::Capture {
                session.cursor = frame;
            }
            return Ok(());
        }
        let previous = session.active;
        if session.slot(previous) == Slot::Active {
            session.set(previous, Slot::Free);
        }
        match session.config.direction {
            Direction::Capture => {
                session.discard_ready();
                session.cursor = frame;
                session.resync = true;
            }
            Direction::Playout => {
                if session.cursor == frame {
                    session.cursor = session.range.next(frame);
                }
            }
        }
        session.set(frame, Slot::Active);
        session.active = frame;
        debug!("channel {id} active frame {previous} -> {frame}");
        Ok(())
    }

    /// Applies one vertical blank.
    pub fn tick(&mut self, input: &TickInput) -> TickOutcome {
        let mut out = TickOutcome::default();
        let state = self.state;
        let Some(session) = self.session.as_mut() else {
            return out;
        };
        match state {
            ChannelState::Starting => session.enter_running(input, &mut out),
            ChannelState::StartingAtTime if input.clock >= session.start_time => {
                session.enter_running(input, &mut out)
            }
            ChannelState::Running => session.advance(input, &mut out),
            ChannelState::Paused => session.last_interrupt = Some(input.interrupt_count),
            ChannelState::Stopping => {
                self.disable();
                out.stopped = true;
                return out;
            }
            _ => return out,
        }
        if out.started {
            self.state = ChannelState::Running;
        }
        if out.dropped > 0 {
            warn!("channel {} dropped {} frames", self.id, out.dropped);
        }
        trace!("channel {} tick {:?}", self.id, out);
        out
    }

    /// Claims the next frame for a host transfer, or `None` when none is
    /// available yet.
    pub fn claim_transfer(&mut self) -> Result<Option<Claim>> {
        use ChannelState::*;
        self.require(Operation::Transfer, &[Starting, StartingAtTime, Running])?;
        let generation = self.generation;
        let session = self.session_mut(Operation::Transfer)?;
        let frame = session.cursor;
        let wanted = match session.config.direction {
            Direction::Capture => Slot::Ready,
            Direction::Playout => Slot::Free,
        };
        if session.slot(frame) != wanted {
            return Ok(None);
        }
        session.set(frame, Slot::Transferring);
        let stamp = session.stamps.get(frame).copied().unwrap_or_default();
        Ok(Some(Claim {
            generation,
            frame,
            range: session.range,
            config: session.config,
            stamp,
            audio_cursor: session.audio_cursor,
            sequence: session.transfers,
        }))
    }

    /// Completes a claimed transfer.
    pub fn commit_transfer(&mut self, claim: &Claim, moved: Moved) -> Result<TransferStatus> {
        if claim.generation != self.generation {
            return Err(self.reject(Operation::Transfer));
        }
        let state = self.state;
        let session = self.session_mut(Operation::Transfer)?;
        let frame = claim.frame;
        match session.config.direction {
            Direction::Capture => session.set(frame, Slot::Free),
            Direction::Playout => {
                session.set(frame, Slot::Ready);
                let stamp = session.stamps.get_mut(frame);
                stamp.timecode = moved.timecode;
                stamp.user_cookie = moved.user_cookie;
                stamp.valid = false;
                if let Some(cursor) = moved.audio_cursor {
                    session.audio_cursor = cursor;
                }
            }
        }
        session.cursor = session.range.next(frame);
        session.transfers += 1;
        let drop_delta = session.dropped.saturating_sub(session.dropped_at_last_transfer);
        session.dropped_at_last_transfer = session.dropped;
        let stamp = match session.config.direction {
            Direction::Capture => claim.stamp,
            Direction::Playout => session.stamps.get(frame).copied().unwrap_or_default(),
        };
        Ok(TransferStatus {
            frame,
            state,
            buffer_level: session.count(Slot::Ready),
            frames_processed: session.processed,
            frames_dropped: session.dropped,
            drop_delta,
            stamp,
            video_bytes: moved.video_bytes,
            audio_bytes: moved.audio_bytes,
            anc_bytes: moved.anc_bytes,
            timecode: match session.config.direction {
                Direction::Capture => claim.stamp.timecode,
                Direction::Playout => moved.timecode,
            },
        })
    }

    /// Returns a claimed frame after a failed DMA so it can be retried.
    pub fn abandon_transfer(&mut self, claim: &Claim) {
        if claim.generation != self.generation {
            return;
        }
        if let Some(session) = self.session.as_mut() {
            if session.slot(claim.frame) == Slot::Transferring {
                let slot = match session.config.direction {
                    Direction::Capture => Slot::Ready,
                    Direction::Playout => Slot::Free,
                };
                session.set(claim.frame, slot);
            }
        }
    }

    pub fn frame_stamp(&self, frame: u32) -> Result<FrameStamp> {
        let session = self
            .session
            .as_ref()
            .ok_or_else(|| self.reject(Operation::FrameStamp))?;
        let mut stamp = session.stamps.get(frame).copied().ok_or_else(|| {
            Error::InvalidArgument(format!(
                "frame {frame} is outside channel {} frames {}",
                self.id, session.range
            ))
        })?;
        stamp.current_frame = session.active;
        Ok(stamp)
    }

    pub fn status(&self) -> ChannelStatus {
        let mut status = ChannelStatus {
            channel: self.id,
            state: self.state,
            direction: None,
            start_frame: 0,
            end_frame: 0,
            active_frame: 0,
            frames_processed: 0,
            frames_dropped: 0,
            buffer_level: 0,
            frames_available: 0,
            audio: None,
            options: OptionFlags::empty(),
            group_size: 0,
            running_since: None,
        };
        if let Some(session) = &self.session {
            let waiting = session.count(Slot::Ready);
            status.direction = Some(session.config.direction);
            status.start_frame = session.range.start;
            status.end_frame = session.range.end;
            status.active_frame = session.active;
            status.frames_processed = session.processed;
            status.frames_dropped = session.dropped;
            status.buffer_level = waiting;
            status.frames_available = match session.config.direction {
                Direction::Capture => waiting,
                Direction::Playout => session.count(Slot::Free),
            };
            status.audio = session.config.audio;
            status.options = session.config.options;
            status.group_size = session.config.group_size;
            status.running_since = session.running_since;
        }
        status
    }
}
