//! Audio output: the clock shared with the scheduler, the master renderer,
//! the device stream and offline bounces.

use std::error::Error;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig};
use fundsp::hacker32::*;
use rtrb::Producer;
use tracing::{error, info};

use crate::config::Config;
use crate::project::Project;
use crate::sample::SampleBank;
use crate::timing::bar_interval;
use crate::Engine;

/// Frames rendered per engine update when bouncing.
const BOUNCE_BLOCK: usize = 64;
/// Extra render time after the last bar, for releases and tails.
const BOUNCE_TAIL: f64 = 1.0;

/// Frames rendered so far. Shared between the renderer and the engine.
pub struct AudioClock {
    frames: AtomicU64,
    sample_rate: f64,
}

impl AudioClock {
    pub fn new(sample_rate: f64) -> Self {
        Self {
            frames: AtomicU64::new(0),
            sample_rate,
        }
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }

    fn advance(&self, frames: u64) {
        self.frames.fetch_add(frames, Ordering::AcqRel);
    }

    /// Seconds of audio rendered.
    pub fn now(&self) -> f64 {
        self.frames() as f64 / self.sample_rate
    }
}

/// Renders the master graph and keeps the clock and scope up to date.
pub struct MasterOutput {
    backend: BlockRateAdapter,
    clock: Arc<AudioClock>,
    scope: Producer<f32>,
}

impl MasterOutput {
    pub fn new(backend: NetBackend, clock: Arc<AudioClock>, scope: Producer<f32>) -> Self {
        Self {
            backend: BlockRateAdapter::new(Box::new(backend)),
            clock,
            scope,
        }
    }

    /// Render one stereo frame.
    pub fn render_frame(&mut self) -> (f32, f32) {
        let (l, r) = self.backend.get_stereo();
        // a full scope just loses samples
        let _ = self.scope.push((l + r) * 0.5);
        self.clock.advance(1);
        (l, r)
    }

    /// Fill an interleaved buffer. Channels past the second are silent, and
    /// a mono device gets the mid signal.
    pub fn render(&mut self, data: &mut [f32], channels: usize) {
        for frame in data.chunks_mut(Ord::max(channels, 1)) {
            let (l, r) = self.render_frame();
            match frame {
                [mono] => *mono = (l + r) * 0.5,
                [left, right, rest @ ..] => {
                    *left = l;
                    *right = r;
                    rest.fill(0.0);
                }
                [] => (),
            }
        }
    }
}

/// Open the default output device and start rendering `output` to it.
pub fn open_stream(build: impl FnOnce(f64) -> MasterOutput
) -> Result<Stream, Box<dyn Error>> {
    let device = cpal::default_host()
        .default_output_device()
        .ok_or("could not open audio output device")?;

    let config: StreamConfig = device.default_output_config()?.into();
    let sample_rate = config.sample_rate.0 as f64;
    let channels = config.channels as usize;
    let mut output = build(sample_rate);

    let stream = device.build_output_stream(
        &config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            output.render(data, channels);
        },
        move |err| {
            error!("stream error: {err}");
        },
        None
    )?;
    stream.play()?;
    info!(sample_rate, channels, "audio stream started");
    Ok(stream)
}

/// Render `bars` bars of a project offline from the top, plus a short tail.
pub fn bounce(project: Project, bars: u64, sample_rate: f64, samples: SampleBank
) -> Wave {
    let config = Config {
        start_delay_ms: 0,
        ..Default::default()
    };
    let length = bars as f64 * bar_interval(project.settings.bpm) + BOUNCE_TAIL;
    let (mut engine, mut output, _meters) = Engine::new(config, project, sample_rate, samples);
    let mut wave = Wave::new(2, sample_rate);

    engine.toggle_play();
    while (wave.len() as f64) < length * sample_rate {
        engine.frame();
        for _ in 0..BOUNCE_BLOCK {
            wave.push(output.render_frame());
        }
    }
    wave
}
