// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

mod args;

use args::Args;
use clap::Parser;
use edgefirst_framestream::{
    sim::SimDevice, AudioSystem, ChannelConfig, ChannelId, ChannelStatus, Device, DeviceGeometry,
    Error as StreamError, HostBuffer, OptionFlags, StreamEngine, TransferDescriptor,
};
use serde_json::{json, Value};
use std::{
    error::Error,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};
use tracing::{debug, error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Layer};

/// One captured frame on its way to playout.
struct Frame {
    video: Vec<u8>,
    audio: Vec<u8>,
    cookie: u64,
}

fn init_tracing(args: &Args) -> Result<(), Box<dyn Error>> {
    let level = if args.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let stdout_log = tracing_subscriber::fmt::layer().with_filter(
        EnvFilter::builder()
            .with_default_directive(level.into())
            .from_env_lossy(),
    );
    let journald = tracing_journald::layer()
        .ok()
        .map(|layer| layer.with_filter(LevelFilter::INFO));
    let console = args
        .tokio_console
        .then(|| console_subscriber::ConsoleLayer::builder().spawn());
    let tracy = args.tracy.then(|| {
        tracy_client::Client::start();
        tracing_tracy::TracyLayer::default()
    });

    let subscriber = tracing_subscriber::registry()
        .with(stdout_log)
        .with(journald)
        .with(console)
        .with(tracy);
    tracing_log::LogTracer::init()?;
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn lock_memory() -> Result<(), Box<dyn Error>> {
    // SAFETY: mlockall only changes the paging policy of this process
    let ret = unsafe { libc::mlockall(libc::MCL_CURRENT | libc::MCL_FUTURE) };
    if ret != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}

fn status_json(status: &ChannelStatus) -> Value {
    json!({
        "channel": status.channel.number(),
        "direction": status.direction.map(|d| d.to_string()),
        "state": status.state.to_string(),
        "start_frame": status.start_frame,
        "end_frame": status.end_frame,
        "active_frame": status.active_frame,
        "frames_processed": status.frames_processed,
        "frames_dropped": status.frames_dropped,
        "buffer_level": status.buffer_level,
    })
}

/// Pulls captured frames and forwards them to the playout thread.
fn capture_loop(
    engine: &StreamEngine<SimDevice>,
    channel: ChannelId,
    tx: kanal::Sender<Frame>,
    running: &AtomicBool,
    video_bytes: usize,
    audio_bytes: usize,
) -> Result<(), StreamError> {
    while running.load(Ordering::Relaxed) {
        let mut video = vec![0u8; video_bytes];
        let mut audio = vec![0u8; audio_bytes];
        let mut desc = TransferDescriptor::capture(&mut video)
            .with_audio(HostBuffer::FromDevice(&mut audio))
            .with_timeout(Duration::from_millis(100));
        let status = match engine.transfer(channel, &mut desc) {
            Ok(status) => status,
            Err(StreamError::Busy) => continue,
            Err(err) => return Err(err),
        };
        if status.drop_delta > 0 {
            warn!("capture dropped {} frames", status.drop_delta);
        }
        audio.truncate(status.audio_bytes);
        let frame = Frame {
            video,
            audio,
            cookie: status.stamp.frame_time,
        };
        if tx.send(frame).is_err() {
            break;
        }
    }
    Ok(())
}

/// Queues frames received from capture for playout.
fn playout_loop(
    engine: &StreamEngine<SimDevice>,
    channel: ChannelId,
    rx: kanal::Receiver<Frame>,
) -> Result<u64, StreamError> {
    let mut sent = 0;
    while let Ok(frame) = rx.recv() {
        let mut desc = TransferDescriptor::playout(&frame.video)
            .with_user_cookie(frame.cookie)
            .with_timeout(Duration::from_millis(100));
        if !frame.audio.is_empty() {
            desc = desc.with_audio(HostBuffer::ToDevice(&frame.audio));
        }
        match engine.transfer(channel, &mut desc) {
            Ok(status) => {
                sent += 1;
                debug!("playout queued frame {} tc {:?}", status.frame, status.timecode);
            }
            Err(StreamError::Busy) => warn!("playout full, frame skipped"),
            Err(err) => return Err(err),
        }
    }
    Ok(sent)
}

async fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let mut geometry = DeviceGeometry::new(args.frame_bytes, args.video_frames);
    if args.audio_system > 0 {
        geometry = geometry.with_audio(args.audio_system, args.audio_buffer_bytes);
    }
    let sim = Arc::new(SimDevice::new(geometry, args.frame_rate));
    let device = Arc::new(Device::open(sim.clone(), geometry)?);
    info!("simulated device {}", args.summary());

    let mut options = OptionFlags::empty();
    options.set(OptionFlags::TIMECODE, args.timecode);
    options.set(OptionFlags::ANC, args.anc);
    let audio = match args.audio_system {
        0 => None,
        n => Some(AudioSystem::new(n)?),
    };
    let configure = |config: ChannelConfig| {
        let config = config
            .with_options(options)
            .with_mode(args.size_mode.into())
            .with_frame_rate(args.frame_rate);
        match audio {
            Some(system) => config.with_audio(system),
            None => config,
        }
    };

    let capture = ChannelId::new(1)?;
    let playout = ChannelId::new(2)?;
    let engine = device.engine();
    engine.init(capture, configure(ChannelConfig::capture(args.frames)))?;
    engine.init(playout, configure(ChannelConfig::playout(args.frames)))?;
    engine.start(capture, 0)?;
    engine.start(playout, 0)?;

    let video_bytes = geometry.video_bytes(args.size_mode.into()) as usize;
    let audio_bytes = 2 * args.frame_rate.samples_per_frame(0) as usize
        * geometry.audio_sample_frame_bytes();
    let running = Arc::new(AtomicBool::new(true));
    let (tx, rx) = kanal::bounded(args.frames as usize);

    let capture_thread = {
        let device = device.clone();
        let running = running.clone();
        thread::spawn(move || {
            capture_loop(device.engine(), capture, tx, &running, video_bytes, audio_bytes)
        })
    };
    let playout_thread = {
        let device = device.clone();
        thread::spawn(move || playout_loop(device.engine(), playout, rx))
    };

    let mut interval = tokio::time::interval(args.frame_rate.frame_duration());
    for _ in 0..args.ticks {
        interval.tick().await;
        if let Err(err) = sim.vertical_blank(engine) {
            error!("vertical blank failed: {err}");
        }
    }

    // keep ticking while the pipeline drains and the channels stop
    running.store(false, Ordering::Relaxed);
    let ticker = {
        let device = device.clone();
        let sim = sim.clone();
        let period = args.frame_rate.frame_duration();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                if let Err(err) = sim.vertical_blank(device.engine()) {
                    error!("vertical blank failed: {err}");
                }
            }
        })
    };
    let shutdown = {
        let device = device.clone();
        tokio::task::spawn_blocking(move || -> Result<u64, Box<dyn Error + Send + Sync>> {
            capture_thread
                .join()
                .map_err(|_| "capture thread panicked")??;
            let played = playout_thread
                .join()
                .map_err(|_| "playout thread panicked")??;
            device.engine().stop(capture, false)?;
            device.engine().stop(playout, false)?;
            Ok(played)
        })
    };
    let played = shutdown.await?.map_err(|err| -> Box<dyn Error> { err })?;
    ticker.abort();

    let statuses = [engine.status(capture), engine.status(playout)];
    if args.json {
        let report = json!({
            "frames_played": played,
            "clock": device.clock()?,
            "channels": statuses.iter().map(status_json).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for status in &statuses {
            info!(
                "channel {} processed {} dropped {}",
                status.channel, status.frames_processed, status.frames_dropped
            );
        }
        info!("played {played} frames");
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_tracing(&args)?;
    if args.mlock {
        lock_memory()?;
    }
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_time()
        .build()?;
    runtime.block_on(run(args))
}
