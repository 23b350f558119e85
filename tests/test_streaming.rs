// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use edgefirst_framestream::{
    anc,
    registers::{self, RegisterAccess},
    sim::SimDevice,
    AudioSystem, ChannelConfig, ChannelId, ChannelState, DeviceGeometry, Direction, EngineConfig,
    Error, FrameRate, FrameSizeMode, HostBuffer, InterruptKind, Operation, OptionFlags, PeerTarget,
    Segments, StreamEngine, Timecode, TransferDescriptor,
};
use serial_test::serial;
use std::{
    error::Error as StdError,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

const FRAME_BYTES: u64 = 64 * 1024;

/// 8 video frames plus one stereo audio system of 128 KiB.
fn geometry() -> DeviceGeometry {
    DeviceGeometry::new(FRAME_BYTES, 8)
        .with_audio(1, 2 * 65536)
        .with_audio_channels(2)
}

fn setup() -> Result<(Arc<SimDevice>, StreamEngine<SimDevice>), Box<dyn StdError>> {
    let sim = Arc::new(SimDevice::new(geometry(), FrameRate::FPS_30));
    let engine = StreamEngine::new(sim.clone(), geometry())?;
    Ok((sim, engine))
}

fn video_bytes() -> usize {
    geometry().video_bytes(FrameSizeMode::Standard) as usize
}

/// Runs vertical blanks every few milliseconds until `done` is set.
fn ticker(sim: &SimDevice, engine: &StreamEngine<SimDevice>, done: &AtomicBool) {
    while !done.load(Ordering::Relaxed) {
        thread::sleep(Duration::from_millis(5));
        let _ = sim.vertical_blank(engine);
    }
}

#[test]
#[serial]
fn test_capture_frame_order() -> Result<(), Box<dyn StdError>> {
    let (sim, engine) = setup()?;
    let ch = ChannelId::new(1)?;
    let system = AudioSystem::new(1)?;
    let range = engine.init(ch, ChannelConfig::capture(7).with_audio(system))?;
    assert_eq!((range.start, range.end), (0, 6));
    assert_eq!(engine.status(ch).state, ChannelState::Init);
    assert!(sim.is_subscribed(InterruptKind::InputVerticalBlank(ch)));

    assert_eq!(engine.start(ch, 0)?, ChannelState::Starting);
    sim.vertical_blank(&engine)?;
    assert_eq!(engine.status(ch).state, ChannelState::Running);
    assert!(engine.audio().is_running(system, Direction::Capture)?);

    let mut video = vec![0u8; video_bytes()];
    assert!(matches!(
        engine.transfer(ch, &mut TransferDescriptor::capture(&mut video)),
        Err(Error::Busy)
    ));

    for k in 0..8u32 {
        let pattern = [k as u8 + 1; 16];
        sim.write_memory(k % 7, 0, &pattern)?;
        sim.vertical_blank(&engine)?;

        let mut audio = vec![0u8; 16384];
        let status = engine.transfer(
            ch,
            &mut TransferDescriptor::capture(&mut video)
                .with_audio(HostBuffer::FromDevice(&mut audio)),
        )?;
        assert_eq!(status.frame, k % 7);
        assert_eq!(status.video_bytes, video_bytes() as u64);
        assert_eq!(&video[..16], &pattern);

        // 1600 stereo samples per frame, numbered continuously
        assert_eq!(status.audio_bytes, 12800);
        let first = u32::from_le_bytes([audio[0], audio[1], audio[2], audio[3]]);
        assert_eq!(first, k * 3200);
        assert_eq!(status.frames_dropped, 0);
    }

    assert_eq!(engine.status(ch).frames_processed, 8);
    engine.stop(ch, true)?;
    assert!(!sim.is_subscribed(InterruptKind::InputVerticalBlank(ch)));
    Ok(())
}

#[test]
#[serial]
fn test_capture_busy_until_frame_completes() -> Result<(), Box<dyn StdError>> {
    let (sim, engine) = setup()?;
    let ch = ChannelId::new(1)?;
    engine.init(ch, ChannelConfig::capture(3))?;
    engine.start(ch, 0)?;
    sim.vertical_blank(&engine)?;

    let mut video = vec![0u8; video_bytes()];
    let mut desc = TransferDescriptor::capture(&mut video).with_timeout(Duration::from_millis(20));
    assert!(matches!(engine.transfer(ch, &mut desc), Err(Error::Busy)));

    sim.vertical_blank(&engine)?;
    assert_eq!(engine.transfer(ch, &mut desc)?.frame, 0);
    assert!(matches!(engine.transfer(ch, &mut desc), Err(Error::Busy)));
    Ok(())
}

#[test]
#[serial]
fn test_blocking_transfer_wakes_on_tick() -> Result<(), Box<dyn StdError>> {
    let (sim, engine) = setup()?;
    let ch = ChannelId::new(1)?;
    engine.init(ch, ChannelConfig::capture(4))?;
    engine.start(ch, 0)?;
    sim.vertical_blank(&engine)?;

    let done = AtomicBool::new(false);
    let status = thread::scope(|s| {
        s.spawn(|| ticker(&sim, &engine, &done));
        let mut video = vec![0u8; video_bytes()];
        let result = engine.transfer(
            ch,
            &mut TransferDescriptor::capture(&mut video).with_timeout(Duration::from_secs(2)),
        );
        done.store(true, Ordering::Relaxed);
        result
    })?;
    assert_eq!(status.frame, 0);
    Ok(())
}

#[test]
#[serial]
fn test_single_tick_wakes_waiting_transfer() -> Result<(), Box<dyn StdError>> {
    let (sim, engine) = setup()?;
    let ch = ChannelId::new(1)?;
    engine.init(ch, ChannelConfig::capture(4))?;
    engine.start(ch, 0)?;
    sim.vertical_blank(&engine)?;

    let mut video = vec![0u8; video_bytes()];
    for k in 0..20u32 {
        let began = Instant::now();
        let status = thread::scope(|s| {
            s.spawn(|| {
                thread::sleep(Duration::from_micros(200));
                let _ = sim.vertical_blank(&engine);
            });
            engine.transfer(
                ch,
                &mut TransferDescriptor::capture(&mut video).with_timeout(Duration::from_secs(2)),
            )
        })?;
        assert_eq!(status.frame, k % 4);
        assert!(began.elapsed() < Duration::from_secs(1));
    }
    assert_eq!(engine.status(ch).frames_dropped, 0);
    Ok(())
}

#[test]
#[serial]
fn test_single_tick_completes_graceful_stop() -> Result<(), Box<dyn StdError>> {
    let sim = Arc::new(SimDevice::new(geometry(), FrameRate::FPS_30));
    let config = EngineConfig::default().with_stop_timeout(Duration::from_secs(2));
    let engine = StreamEngine::with_config(sim.clone(), geometry(), config)?;
    let ch = ChannelId::new(1)?;
    engine.init(ch, ChannelConfig::capture(4))?;
    engine.start(ch, 0)?;
    sim.vertical_blank(&engine)?;

    let began = Instant::now();
    thread::scope(|s| {
        s.spawn(|| {
            let give_up = Instant::now() + Duration::from_secs(1);
            while engine.status(ch).state != ChannelState::Stopping && Instant::now() < give_up {
                thread::yield_now();
            }
            let _ = sim.vertical_blank(&engine);
        });
        engine.stop(ch, false)
    })?;
    assert!(began.elapsed() < Duration::from_secs(1));
    assert_eq!(engine.status(ch).state, ChannelState::Disabled);
    Ok(())
}

#[test]
#[serial]
fn test_transport_interrupts_drive_ticks() -> Result<(), Box<dyn StdError>> {
    let (sim, engine) = setup()?;
    let ch = ChannelId::new(1)?;
    let kind = InterruptKind::InputVerticalBlank(ch);
    engine.init(ch, ChannelConfig::capture(2))?;
    engine.start(ch, 0)?;

    let done = AtomicBool::new(false);
    let serviced = thread::scope(|s| {
        s.spawn(|| {
            while !done.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_millis(5));
                sim.advance();
                sim.signal();
            }
        });
        let serviced = engine.service_next(kind, Duration::from_secs(2));
        done.store(true, Ordering::Relaxed);
        serviced
    })?;
    assert!(serviced);
    assert_eq!(engine.status(ch).state, ChannelState::Running);

    // nothing is raised
    assert!(!engine.service_next(kind, Duration::from_millis(10))?);
    Ok(())
}

#[test]
#[serial]
fn test_start_at_time() -> Result<(), Box<dyn StdError>> {
    let (sim, engine) = setup()?;
    let per_frame = FrameRate::FPS_30.clock_ticks_per_frame();
    sim.skip_interrupts(3);

    let past = ChannelId::new(1)?;
    engine.init(past, ChannelConfig::capture(2))?;
    assert_eq!(engine.start(past, per_frame)?, ChannelState::Starting);

    let future = ChannelId::new(2)?;
    engine.init(future, ChannelConfig::capture(2))?;
    let start_time = sim.clock() + 2 * per_frame;
    assert_eq!(
        engine.start(future, start_time)?,
        ChannelState::StartingAtTime
    );

    sim.vertical_blank(&engine)?;
    assert_eq!(engine.status(past).state, ChannelState::Running);
    assert_eq!(engine.status(future).state, ChannelState::StartingAtTime);

    sim.vertical_blank(&engine)?;
    let status = engine.status(future);
    assert_eq!(status.state, ChannelState::Running);
    assert_eq!(status.running_since, Some(start_time));
    Ok(())
}

#[test]
#[serial]
fn test_invalid_transitions() -> Result<(), Box<dyn StdError>> {
    let (sim, engine) = setup()?;
    let ch = ChannelId::new(3)?;
    let mut video = vec![0u8; video_bytes()];

    let before = engine.status(ch);
    assert!(matches!(
        engine.start(ch, 0),
        Err(Error::InvalidStateTransition {
            operation: Operation::Start,
            state: ChannelState::Uninitialized,
            ..
        })
    ));
    assert_eq!(engine.status(ch), before);

    engine.init(ch, ChannelConfig::capture(3))?;
    let before = engine.status(ch);
    assert!(engine.pause(ch).is_err());
    assert!(engine.set_active_frame(ch, 0).is_err());
    assert!(matches!(
        engine.stop(ch, false),
        Err(Error::InvalidStateTransition {
            operation: Operation::Stop,
            state: ChannelState::Init,
            ..
        })
    ));
    assert!(engine.stop(ch, true).is_err());
    assert!(matches!(
        engine.transfer(ch, &mut TransferDescriptor::capture(&mut video)),
        Err(Error::InvalidStateTransition {
            operation: Operation::Transfer,
            state: ChannelState::Init,
            ..
        })
    ));
    assert_eq!(engine.status(ch), before);
    assert!(sim.is_subscribed(InterruptKind::InputVerticalBlank(ch)));

    // fill the ring so every counter has moved
    engine.start(ch, 0)?;
    for _ in 0..4 {
        sim.vertical_blank(&engine)?;
    }
    let before = engine.status(ch);
    assert_eq!(before.state, ChannelState::Running);
    assert!(before.frames_processed > 0);
    assert!(before.frames_dropped > 0);
    assert!(before.buffer_level > 0);
    assert!(matches!(
        engine.resume(ch, true),
        Err(Error::InvalidStateTransition {
            operation: Operation::Resume,
            ..
        })
    ));
    assert!(engine.init(ch, ChannelConfig::capture(2)).is_err());
    assert!(engine.start(ch, 0).is_err());
    assert!(engine.preroll(ch, 1).is_err());
    assert_eq!(engine.status(ch), before);

    engine.pause(ch)?;
    let before = engine.status(ch);
    assert!(matches!(
        engine.transfer(ch, &mut TransferDescriptor::capture(&mut video)),
        Err(Error::InvalidStateTransition {
            operation: Operation::Transfer,
            state: ChannelState::Paused,
            ..
        })
    ));
    assert!(engine.pause(ch).is_err());
    assert_eq!(engine.status(ch), before);

    engine.stop(ch, true)?;
    let before = engine.status(ch);
    assert!(matches!(
        engine.transfer(ch, &mut TransferDescriptor::capture(&mut video)),
        Err(Error::InvalidStateTransition {
            operation: Operation::Transfer,
            state: ChannelState::Disabled,
            ..
        })
    ));
    assert!(matches!(
        engine.stop(ch, false),
        Err(Error::InvalidStateTransition { .. })
    ));
    assert!(engine.stop(ch, true).is_err());
    assert!(engine.resume(ch, false).is_err());
    assert_eq!(engine.status(ch), before);
    assert_eq!(before.state, ChannelState::Disabled);

    // a disabled channel can be initialized again
    engine.init(ch, ChannelConfig::capture(2))?;
    assert_eq!(engine.status(ch).state, ChannelState::Init);
    Ok(())
}

#[test]
#[serial]
fn test_oversized_explicit_range() -> Result<(), Box<dyn StdError>> {
    let (sim, engine) = setup()?;
    let ch = ChannelId::new(1)?;
    let quad = ChannelConfig::capture(2)
        .with_mode(FrameSizeMode::Quad)
        .with_range(0x4000_0000, 0x4000_0001);
    assert!(matches!(
        engine.init(ch, quad),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        engine.init(ch, ChannelConfig::capture(2).with_range(6, 9)),
        Err(Error::AllocationFailure(_))
    ));
    assert!(matches!(
        engine.init(ch, ChannelConfig::capture(2).with_range(100, 101)),
        Err(Error::AllocationFailure(_))
    ));
    assert_eq!(engine.status(ch).state, ChannelState::Uninitialized);
    assert!(!sim.is_subscribed(InterruptKind::InputVerticalBlank(ch)));

    let range = engine.init(ch, ChannelConfig::capture(2).with_mode(FrameSizeMode::Quad))?;
    assert_eq!((range.start, range.end), (0, 1));
    Ok(())
}

#[test]
#[serial]
fn test_buffer_direction_mismatch() -> Result<(), Box<dyn StdError>> {
    let (_sim, engine) = setup()?;
    let ch = ChannelId::new(1)?;
    engine.init(ch, ChannelConfig::capture(2))?;
    engine.start(ch, 0)?;

    let video = vec![0u8; 64];
    assert!(matches!(
        engine.transfer(ch, &mut TransferDescriptor::playout(&video)),
        Err(Error::InvalidArgument(_))
    ));

    let mut frame = vec![0u8; 64];
    let mut audio = vec![0u8; 30];
    assert!(matches!(
        engine.transfer(
            ch,
            &mut TransferDescriptor::capture(&mut frame)
                .with_audio(HostBuffer::FromDevice(&mut audio))
        ),
        Err(Error::BufferAlignment { len: 30, .. })
    ));
    Ok(())
}

#[test]
#[serial]
fn test_drop_counter() -> Result<(), Box<dyn StdError>> {
    let (sim, engine) = setup()?;
    let ch = ChannelId::new(1)?;
    engine.init(ch, ChannelConfig::capture(3))?;
    engine.start(ch, 0)?;
    for _ in 0..3 {
        sim.vertical_blank(&engine)?;
    }
    assert_eq!(engine.status(ch).buffer_level, 2);

    // nobody drains the ring
    sim.vertical_blank(&engine)?;
    sim.vertical_blank(&engine)?;
    assert_eq!(engine.status(ch).frames_dropped, 2);

    let mut video = vec![0u8; video_bytes()];
    let status = engine.transfer(ch, &mut TransferDescriptor::capture(&mut video))?;
    assert_eq!((status.frame, status.drop_delta), (0, 2));

    engine.pause(ch)?;
    sim.vertical_blank(&engine)?;
    engine.resume(ch, false)?;
    sim.vertical_blank(&engine)?;
    assert_eq!(engine.status(ch).frames_dropped, 2);

    engine.flush(ch, false)?;
    assert_eq!(engine.status(ch).buffer_level, 0);
    assert_eq!(engine.status(ch).frames_dropped, 2);

    engine.pause(ch)?;
    engine.resume(ch, true)?;
    assert_eq!(engine.status(ch).frames_dropped, 0);
    Ok(())
}

#[test]
#[serial]
fn test_missed_interrupts_count_as_drops() -> Result<(), Box<dyn StdError>> {
    let (sim, engine) = setup()?;
    let ch = ChannelId::new(1)?;
    engine.init(ch, ChannelConfig::capture(4))?;
    engine.start(ch, 0)?;
    sim.vertical_blank(&engine)?;

    sim.skip_interrupts(3);
    sim.vertical_blank(&engine)?;
    let status = engine.status(ch);
    assert_eq!(status.frames_dropped, 3);
    assert_eq!(status.buffer_level, 1);
    Ok(())
}

#[test]
#[serial]
fn test_channels_share_frame_memory() -> Result<(), Box<dyn StdError>> {
    let (_sim, engine) = setup()?;
    let one = ChannelId::new(1)?;
    let two = ChannelId::new(2)?;
    let three = ChannelId::new(3)?;

    let first = engine.init(one, ChannelConfig::capture(4))?;
    let second = engine.init(two, ChannelConfig::playout(4))?;
    assert_eq!((first.start, first.end), (0, 3));
    assert_eq!((second.start, second.end), (4, 7));

    assert!(matches!(
        engine.init(three, ChannelConfig::capture(4)),
        Err(Error::AllocationFailure(_))
    ));
    assert!(matches!(
        engine.init(three, ChannelConfig::capture(2).with_range(3, 4)),
        Err(Error::AllocationFailure(_))
    ));
    assert_eq!(engine.status(three).state, ChannelState::Uninitialized);

    // the audio buffer above the video frames is never handed out
    assert!(engine.find_range(2, FrameSizeMode::Standard, true).is_err());
    assert!(engine.find_range(2, FrameSizeMode::Standard, false).is_ok());

    engine.start(one, 0)?;
    engine.stop(one, true)?;
    assert_eq!(engine.status(one).state, ChannelState::Disabled);
    let third = engine.init(three, ChannelConfig::capture(2))?;
    assert_eq!((third.start, third.end), (0, 1));
    Ok(())
}

#[test]
#[serial]
fn test_graceful_stop() -> Result<(), Box<dyn StdError>> {
    let (sim, engine) = setup()?;
    let ch = ChannelId::new(1)?;
    let system = AudioSystem::new(1)?;
    let capture = ChannelConfig::capture(4).with_audio(system);
    engine.init(ch, capture)?;
    engine.start(ch, 0)?;
    sim.vertical_blank(&engine)?;
    assert!(engine.audio().is_running(system, capture.direction)?);

    let done = AtomicBool::new(false);
    thread::scope(|s| {
        s.spawn(|| ticker(&sim, &engine, &done));
        let stopped = engine.stop(ch, false);
        done.store(true, Ordering::Relaxed);
        stopped
    })?;

    assert_eq!(engine.status(ch).state, ChannelState::Disabled);
    assert!(!sim.is_subscribed(InterruptKind::InputVerticalBlank(ch)));
    assert!(!engine.audio().is_running(system, capture.direction)?);

    // frames were released
    let other = ChannelId::new(2)?;
    let range = engine.init(other, ChannelConfig::capture(8))?;
    assert_eq!((range.start, range.end), (0, 7));
    Ok(())
}

#[test]
#[serial]
fn test_init_leaves_live_audio_running() -> Result<(), Box<dyn StdError>> {
    let (sim, engine) = setup()?;
    let system = AudioSystem::new(1)?;
    let one = ChannelId::new(1)?;
    engine.init(one, ChannelConfig::capture(4).with_audio(system))?;
    engine.start(one, 0)?;
    sim.vertical_blank(&engine)?;
    assert!(engine.audio().is_running(system, Direction::Capture)?);

    // failed and successful inits sharing the running capture engine
    let two = ChannelId::new(2)?;
    assert!(matches!(
        engine.init(two, ChannelConfig::capture(8).with_audio(system)),
        Err(Error::AllocationFailure(_))
    ));
    assert!(engine.audio().is_running(system, Direction::Capture)?);
    engine.init(two, ChannelConfig::capture(2).with_audio(system))?;
    assert!(engine.audio().is_running(system, Direction::Capture)?);
    sim.vertical_blank(&engine)?;
    assert_eq!(engine.status(one).frames_dropped, 0);

    // nobody streams playout audio, but a failed init must not reset it
    let three = ChannelId::new(3)?;
    engine.audio().start(system, Direction::Playout)?;
    assert!(matches!(
        engine.init(three, ChannelConfig::playout(4).with_audio(system)),
        Err(Error::AllocationFailure(_))
    ));
    assert!(engine.audio().is_running(system, Direction::Playout)?);
    engine.init(three, ChannelConfig::playout(2).with_audio(system))?;
    assert!(!engine.audio().is_running(system, Direction::Playout)?);
    assert!(engine.audio().is_running(system, Direction::Capture)?);
    Ok(())
}

#[test]
#[serial]
fn test_graceful_stop_times_out() -> Result<(), Box<dyn StdError>> {
    let sim = Arc::new(SimDevice::new(geometry(), FrameRate::FPS_30));
    let config = EngineConfig::default().with_stop_timeout(Duration::from_millis(30));
    let engine = StreamEngine::with_config(sim.clone(), geometry(), config)?;
    let ch = ChannelId::new(1)?;
    engine.init(ch, ChannelConfig::capture(4))?;
    engine.start(ch, 0)?;
    sim.vertical_blank(&engine)?;

    // no ticks arrive
    let err = engine.stop(ch, false).unwrap_err();
    assert!(matches!(err, Error::HardwareTimeout { .. }));
    assert!(err.is_recoverable());
    assert_eq!(engine.status(ch).state, ChannelState::Disabled);
    assert!(!sim.is_subscribed(InterruptKind::InputVerticalBlank(ch)));
    engine.init(ChannelId::new(2)?, ChannelConfig::capture(8))?;
    Ok(())
}

#[test]
#[serial]
fn test_abort_is_immediate() -> Result<(), Box<dyn StdError>> {
    let (sim, engine) = setup()?;
    let ch = ChannelId::new(4)?;
    engine.init(ch, ChannelConfig::playout(8))?;
    engine.start(ch, 0)?;
    sim.vertical_blank(&engine)?;

    engine.stop(ch, true)?;
    let status = engine.status(ch);
    assert_eq!(status.state, ChannelState::Disabled);
    assert_eq!(status.running_since, None);
    assert!(!sim.is_subscribed(InterruptKind::OutputVerticalBlank(ch)));
    engine.init(ChannelId::new(5)?, ChannelConfig::playout(8))?;
    Ok(())
}

#[test]
#[serial]
fn test_dma_fault_keeps_frame() -> Result<(), Box<dyn StdError>> {
    let (sim, engine) = setup()?;
    let ch = ChannelId::new(1)?;
    engine.init(ch, ChannelConfig::capture(4))?;
    engine.start(ch, 0)?;
    sim.vertical_blank(&engine)?;
    sim.vertical_blank(&engine)?;

    let mut video = vec![0u8; video_bytes()];
    sim.fail_next_dma(1);
    assert!(matches!(
        engine.transfer(ch, &mut TransferDescriptor::capture(&mut video)),
        Err(Error::DeviceCommunication(_))
    ));
    assert_eq!(engine.status(ch).buffer_level, 1);

    let status = engine.transfer(ch, &mut TransferDescriptor::capture(&mut video))?;
    assert_eq!(status.frame, 0);
    assert_eq!(engine.status(ch).buffer_level, 0);
    Ok(())
}

#[test]
#[serial]
fn test_capture_timecode_and_stamps() -> Result<(), Box<dyn StdError>> {
    let (sim, engine) = setup()?;
    let ch = ChannelId::new(1)?;
    let per_frame = FrameRate::FPS_30.clock_ticks_per_frame();
    engine.init(
        ch,
        ChannelConfig::capture(4).with_options(OptionFlags::TIMECODE),
    )?;
    engine.start(ch, 0)?;
    sim.vertical_blank(&engine)?;
    sim.vertical_blank(&engine)?;

    let mut video = vec![0u8; video_bytes()];
    let status = engine.transfer(
        ch,
        &mut TransferDescriptor::capture(&mut video).with_user_cookie(42),
    )?;
    assert_eq!(status.timecode, Some(Timecode::new(0, 0, 0, 2)));
    assert_eq!(status.stamp.frame_time, per_frame);

    let stamp = engine.frame_stamp(ch, 0)?;
    assert!(stamp.valid);
    assert_eq!(stamp.frame_time, per_frame);
    assert_eq!(stamp.current_frame, 1);
    assert_eq!(stamp.current_time, sim.clock());
    assert!(matches!(
        engine.frame_stamp(ch, 6),
        Err(Error::InvalidArgument(_))
    ));
    Ok(())
}

#[test]
#[serial]
fn test_set_active_frame_for_group() -> Result<(), Box<dyn StdError>> {
    let (sim, engine) = setup()?;
    let one = ChannelId::new(1)?;
    let two = ChannelId::new(2)?;
    engine.init(one, ChannelConfig::capture(4).with_group_size(2))?;
    engine.start(one, 0)?;
    sim.vertical_blank(&engine)?;
    sim.vertical_blank(&engine)?;
    assert_eq!(sim.register(registers::input_frame(one)), 1);
    assert_eq!(sim.register(registers::input_frame(two)), 1);

    engine.set_active_frame(one, 3)?;
    assert_eq!(sim.register(registers::input_frame(one)), 3);
    assert_eq!(sim.register(registers::input_frame(two)), 3);
    let status = engine.status(one);
    assert_eq!((status.active_frame, status.buffer_level), (3, 0));

    // the first tick re-arms, the second completes frame 3
    sim.vertical_blank(&engine)?;
    assert_eq!(engine.status(one).buffer_level, 0);
    sim.vertical_blank(&engine)?;
    let mut video = vec![0u8; video_bytes()];
    let status = engine.transfer(one, &mut TransferDescriptor::capture(&mut video))?;
    assert_eq!(status.frame, 3);

    assert!(matches!(
        engine.set_active_frame(one, 6),
        Err(Error::InvalidArgument(_))
    ));
    assert!(engine
        .init(ChannelId::new(8)?, ChannelConfig::capture(2).with_group_size(2))
        .is_err());
    Ok(())
}

#[test]
#[serial]
fn test_peer_and_segmented_capture() -> Result<(), Box<dyn StdError>> {
    let (sim, engine) = setup()?;
    let ch = ChannelId::new(1)?;
    engine.init(ch, ChannelConfig::capture(4))?;
    engine.start(ch, 0)?;
    sim.vertical_blank(&engine)?;
    sim.write_memory(0, 0, &[7u8; 32])?;
    let rows: Vec<u8> = (0..64).collect();
    sim.write_memory(1, 0, &rows)?;
    sim.vertical_blank(&engine)?;
    sim.vertical_blank(&engine)?;

    let peer = PeerTarget { address: 0x4000_0000 };
    let status = engine.transfer(ch, &mut TransferDescriptor::default().with_peer(peer))?;
    assert_eq!(status.frame, 0);
    assert_eq!(status.video_bytes, video_bytes() as u64);
    let delivered = sim.peer_memory(peer.address).ok_or("nothing delivered")?;
    assert_eq!(delivered.len(), video_bytes());
    assert_eq!(&delivered[..32], &[7u8; 32]);

    let segments = Segments {
        count: 4,
        bytes_per_segment: 4,
        host_pitch: 4,
        device_pitch: 16,
    };
    let mut packed = vec![0u8; 16];
    let status = engine.transfer(
        ch,
        &mut TransferDescriptor::capture(&mut packed).with_segments(segments),
    )?;
    assert_eq!((status.frame, status.video_bytes), (1, 16));
    assert_eq!(
        packed,
        vec![0, 1, 2, 3, 16, 17, 18, 19, 32, 33, 34, 35, 48, 49, 50, 51]
    );
    Ok(())
}

#[test]
#[serial]
fn test_playout_default_anc_and_timecode() -> Result<(), Box<dyn StdError>> {
    let (sim, engine) = setup()?;
    let ch = ChannelId::new(2)?;
    let options = OptionFlags::TIMECODE | OptionFlags::ANC;
    let range = engine.init(ch, ChannelConfig::playout(4).with_options(options))?;
    assert_eq!(range.start, 0);

    // preload two frames before the first tick
    engine.start(ch, 0)?;
    let video = vec![0x55u8; video_bytes()];
    for n in 0..2u32 {
        let status = engine.transfer(ch, &mut TransferDescriptor::playout(&video))?;
        assert_eq!(status.frame, n);
        assert_eq!(status.timecode, Some(Timecode::new(0, 0, 0, n as u8)));
        assert!(status.anc_bytes > 0);
    }
    assert_eq!(engine.status(ch).buffer_level, 2);

    let geometry = geometry();
    let field = sim.read_memory(
        1,
        geometry.anc_offset(FrameSizeMode::Standard, false),
        geometry.anc_field_bytes as usize,
    )?;
    let packets = anc::parse_region(&field)?;
    assert_eq!(packets.len(), 2);
    assert_eq!(packets[0].did, anc::DID_PAYLOAD_ID);
    assert_eq!(
        packets[0].data,
        anc::payload_identifier_for(FrameRate::FPS_30, FrameSizeMode::Standard)
            .to_be_bytes()
            .to_vec()
    );
    assert_eq!(packets[1].timecode(), Some(Timecode::new(0, 0, 0, 1)));
    assert_eq!(sim.read_memory(1, 0, 4)?, vec![0x55; 4]);

    sim.vertical_blank(&engine)?;
    let output = registers::rp188_output(ch);
    assert_eq!(
        Timecode::from_rp188(sim.read_rp188(output)?),
        Some(Timecode::new(0, 0, 0, 0))
    );
    assert_eq!(sim.register(registers::output_frame(ch)), 0);

    sim.vertical_blank(&engine)?;
    assert_eq!(
        Timecode::from_rp188(sim.read_rp188(output)?),
        Some(Timecode::new(0, 0, 0, 1))
    );
    let status = engine.status(ch);
    assert_eq!(status.active_frame, 1);
    assert_eq!((status.frames_processed, status.frames_dropped), (2, 0));

    // starved: frame 1 repeats
    sim.vertical_blank(&engine)?;
    let status = engine.status(ch);
    assert_eq!((status.active_frame, status.frames_dropped), (1, 1));
    Ok(())
}

#[test]
#[serial]
fn test_playout_explicit_anc_and_audio() -> Result<(), Box<dyn StdError>> {
    let (sim, engine) = setup()?;
    let ch = ChannelId::new(1)?;
    let system = AudioSystem::new(1)?;
    engine.init(
        ch,
        ChannelConfig::playout(3)
            .with_audio(system)
            .with_options(OptionFlags::ANC),
    )?;
    engine.start(ch, 0)?;

    let video = vec![1u8; 1024];
    let field1 = anc::encode_region(
        &[anc::AncPacket::atc_timecode(Timecode::new(1, 2, 3, 4), 9)],
        64,
    )?;
    let field2 = vec![0xA5u8; 32];
    let audio: Vec<u8> = (0..12800u32).map(|n| n as u8).collect();
    let status = engine.transfer(
        ch,
        &mut TransferDescriptor::playout(&video)
            .with_audio(HostBuffer::ToDevice(&audio))
            .with_anc(
                HostBuffer::ToDevice(&field1),
                Some(HostBuffer::ToDevice(&field2)),
            )
            .with_timecode(Timecode::new(1, 2, 3, 4)),
    )?;
    assert_eq!((status.video_bytes, status.audio_bytes), (1024, 12800));
    assert_eq!(status.anc_bytes, 96);
    assert_eq!(status.timecode, Some(Timecode::new(1, 2, 3, 4)));

    let geometry = geometry();
    let stored = sim.read_memory(0, geometry.anc_offset(FrameSizeMode::Standard, false), 64)?;
    assert_eq!(anc::parse_region(&stored)?.len(), 1);
    let stored = sim.read_memory(0, geometry.anc_offset(FrameSizeMode::Standard, true), 32)?;
    assert_eq!(stored, field2);

    // audio is appended to the playout half of the ring
    let region = geometry.audio_region(system).ok_or("no audio region")?;
    assert_eq!(sim.read_memory(region.start, 0, 4)?, vec![0, 1, 2, 3]);
    engine.transfer(
        ch,
        &mut TransferDescriptor::playout(&video).with_audio(HostBuffer::ToDevice(&audio)),
    )?;
    assert_eq!(sim.read_memory(region.start, 12800, 4)?, vec![0, 1, 2, 3]);

    let oversized = vec![0u8; geometry.anc_field_bytes as usize + 1];
    assert!(matches!(
        engine.transfer(
            ch,
            &mut TransferDescriptor::playout(&video).with_anc(HostBuffer::ToDevice(&oversized), None)
        ),
        Err(Error::BufferTooSmall { .. })
    ));
    assert_eq!(engine.status(ch).frames_available, 1);
    Ok(())
}

#[test]
#[serial]
fn test_playout_preroll_and_flush() -> Result<(), Box<dyn StdError>> {
    let (sim, engine) = setup()?;
    let ch = ChannelId::new(1)?;
    engine.init(ch, ChannelConfig::playout(4))?;
    engine.preroll(ch, 2)?;
    assert_eq!(engine.status(ch).buffer_level, 2);

    engine.start(ch, 0)?;
    sim.vertical_blank(&engine)?;
    sim.vertical_blank(&engine)?;
    sim.vertical_blank(&engine)?;
    let status = engine.status(ch);
    assert_eq!(status.active_frame, 1);
    assert_eq!((status.frames_processed, status.frames_dropped), (2, 1));

    assert!(matches!(
        engine.preroll(ch, 4),
        Err(Error::InvalidArgument(_))
    ));
    engine.preroll(ch, 3)?;
    assert_eq!(engine.status(ch).buffer_level, 3);

    engine.flush(ch, true)?;
    let status = engine.status(ch);
    assert_eq!((status.buffer_level, status.frames_dropped), (0, 0));
    assert_eq!(status.frames_available, 3);

    let capture = ChannelId::new(2)?;
    engine.init(capture, ChannelConfig::capture(2))?;
    assert!(matches!(
        engine.preroll(capture, 1),
        Err(Error::InvalidArgument(_))
    ));
    Ok(())
}
