// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use clap::Parser;
use edgefirst_framestream::{FrameRate, FrameSizeMode};
use serde_json::{json, Value};

/// Frame size mode selection for the loopback channels.
#[derive(clap::ValueEnum, Clone, Debug, PartialEq, Copy)]
pub enum SizeMode {
    /// One base frame per frame (HD)
    Standard,
    /// Four base frames per frame (UHD)
    Quad,
    /// Sixteen base frames per frame (8K)
    QuadQuad,
}

impl From<SizeMode> for FrameSizeMode {
    fn from(mode: SizeMode) -> Self {
        match mode {
            SizeMode::Standard => FrameSizeMode::Standard,
            SizeMode::Quad => FrameSizeMode::Quad,
            SizeMode::QuadQuad => FrameSizeMode::QuadQuad,
        }
    }
}

/// Command-line arguments for the EdgeFirst frame stream demo.
///
/// Runs a capture channel and a playout channel on a simulated device and
/// loops captured frames back out. Arguments can be specified via command
/// line or environment variables.
///
/// # Example
///
/// ```bash
/// # Via command line
/// edgefirst-framestream --frames 7 --audio-system 1 --timecode
///
/// # Via environment variables
/// export FRAME_RATE=59.94
/// export TICKS=600
/// edgefirst-framestream
/// ```
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Frames reserved by each channel
    #[arg(short, long, env = "FRAMES", default_value = "7")]
    pub frames: u32,

    /// Base frames of video memory on the simulated device
    #[arg(long, env = "VIDEO_FRAMES", default_value = "16")]
    pub video_frames: u32,

    /// Size of one base frame in bytes
    #[arg(long, env = "FRAME_BYTES", default_value = "1048576")]
    pub frame_bytes: u64,

    /// Frame size mode of both channels
    #[arg(long, env = "SIZE_MODE", default_value = "standard", value_enum)]
    pub size_mode: SizeMode,

    /// Frame rate (e.g. 25, 29.97, 60000/1001)
    #[arg(short = 'r', long, env = "FRAME_RATE", default_value = "30")]
    pub frame_rate: FrameRate,

    /// Number of vertical blanks to run before stopping
    #[arg(short, long, env = "TICKS", default_value = "300")]
    pub ticks: u64,

    /// Audio system bound to both channels (1-based, 0 disables audio)
    #[arg(long, env = "AUDIO_SYSTEM", default_value = "1")]
    pub audio_system: u8,

    /// Audio buffer size per audio system in bytes
    #[arg(long, env = "AUDIO_BUFFER_BYTES", default_value = "1048576")]
    pub audio_buffer_bytes: u64,

    /// Stamp frames with RP188 timecode
    #[arg(long, env = "TIMECODE")]
    pub timecode: bool,

    /// Insert default ancillary packets on playout
    #[arg(long, env = "ANC")]
    pub anc: bool,

    /// Lock process memory to avoid page faults during streaming
    #[arg(long, env = "MLOCK")]
    pub mlock: bool,

    /// Print the final channel status as JSON
    #[arg(long, env = "JSON")]
    pub json: bool,

    /// Enable verbose debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Enable Tokio async runtime console for debugging
    #[arg(long, env = "TOKIO_CONSOLE")]
    pub tokio_console: bool,

    /// Enable Tracy profiler for performance analysis
    #[arg(long, env = "TRACY")]
    pub tracy: bool,
}

impl Args {
    /// Configuration summary logged at startup.
    pub fn summary(&self) -> Value {
        json!({
            "frames": self.frames,
            "video_frames": self.video_frames,
            "frame_bytes": self.frame_bytes,
            "size_mode": format!("{:?}", self.size_mode),
            "frame_rate": self.frame_rate.to_string(),
            "ticks": self.ticks,
            "audio_system": self.audio_system,
            "timecode": self.timecode,
            "anc": self.anc,
        })
    }
}
