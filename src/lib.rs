//! Step sequencer and arrangement engine with a sampler, poly synth and
//! acid bass, per-track channel strips and a master bus.
//!
//! The `Engine` owns the project store, the audio graph and the scheduler.
//! A presentation layer sends it `Command`s and reads snapshots back.

use std::error::Error;
use std::fmt::Display;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rtrb::RingBuffer;
use tracing::{debug, info, warn};

pub mod assistant;
pub mod audio;
pub mod catalog;
pub mod command;
pub mod config;
pub mod dsp;
pub mod gesture;
pub mod instrument;
pub mod meter;
pub mod mixer;
pub mod pitch;
pub mod playback;
pub mod project;
pub mod sample;
pub mod store;
pub mod timing;

use assistant::{
    advice_prompt, parse_pattern_response, request_pattern, PatternGenerator, DEFAULT_ADVICE,
};
use audio::{open_stream, AudioClock, MasterOutput};
use command::{command_queue, Command, CommandReceiver, CommandSender};
use config::Config;
use instrument::{InstrumentRack, NoteEvent, VoiceContext};
use meter::{meters, MeterReader, MeterSampler};
use mixer::Mixer;
use pitch::{Note, NoteLength};
use playback::{resolve_tick, Tick, Transport, Trigger};
use project::{Project, TrackId};
use sample::{FileFetcher, LoadEvent, SampleBank};
use store::Store;
use timing::step_interval;

/// Application name, for logs, etc.
pub const APP_NAME: &str = "stepdaw";
const PROJECT_EXT: &str = "stepdaw";

/// Samples of master output kept for the scope.
const SCOPE_CAPACITY: usize = 4096;
const COMMAND_CAPACITY: usize = 256;
/// How often `run` updates the engine.
const FRAME_INTERVAL: Duration = Duration::from_millis(10);

/// A message for the status line.
#[derive(Clone, Debug, PartialEq)]
pub struct Status {
    pub message: String,
    pub is_error: bool,
}

pub struct Engine {
    config: Config,
    store: Arc<Store>,
    mixer: Mixer,
    rack: InstrumentRack,
    samples: SampleBank,
    transport: Transport,
    meters: MeterSampler,
    clock: Arc<AudioClock>,
    commands: Option<CommandReceiver>,
    /// Whether playback has started before. The first start waits for
    /// pending samples.
    started: bool,
    playhead: Option<Tick>,
    status: Option<Status>,
    advice: String,
    save_path: Option<PathBuf>,
}

impl Engine {
    /// Build the engine and its audio graph. The returned output renders
    /// the graph and must be driven by an audio device or `bounce`.
    pub fn new(config: Config, project: Project, sample_rate: f64, samples: SampleBank
    ) -> (Self, MasterOutput, MeterReader) {
        let (mixer, backend) = Mixer::new(sample_rate);
        let clock = Arc::new(AudioClock::new(sample_rate));
        let (scope_tx, scope_rx) = RingBuffer::new(SCOPE_CAPACITY);
        let output = MasterOutput::new(backend, clock.clone(), scope_tx);
        let (meter_sampler, reader) = meters(config.meter_interval(), scope_rx);

        let mut engine = Self {
            transport: Transport::new(config.start_delay()),
            config,
            store: Arc::new(Store::new(project)),
            mixer,
            rack: InstrumentRack::new(),
            samples,
            meters: meter_sampler,
            clock,
            commands: None,
            started: false,
            playhead: None,
            status: None,
            advice: String::from(DEFAULT_ADVICE),
            save_path: None,
        };
        engine.refresh();
        (engine, output, reader)
    }

    /// The project store. Edits made through it are picked up next frame.
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn project(&self) -> Arc<Project> {
        self.store.snapshot()
    }

    /// Create a command queue feeding this engine, replacing any previous
    /// one.
    pub fn command_sender(&mut self) -> CommandSender {
        let (tx, rx) = command_queue(COMMAND_CAPACITY);
        self.commands = Some(rx);
        tx
    }

    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    pub fn is_playing(&self) -> bool {
        self.transport.is_playing()
    }

    /// Latest playhead position drawn.
    pub fn playhead(&self) -> Option<Tick> {
        self.playhead
    }

    pub fn status(&self) -> Option<&Status> {
        self.status.as_ref()
    }

    pub fn advice(&self) -> &str {
        &self.advice
    }

    pub fn samples(&self) -> &SampleBank {
        &self.samples
    }

    pub fn mixer(&self) -> &Mixer {
        &self.mixer
    }

    /// Display an error on the status line.
    pub fn report(&mut self, err: impl Display) {
        let message = err.to_string();
        warn!("{message}");
        self.status = Some(Status { message, is_error: true });
    }

    /// Display an informational message on the status line.
    pub fn notify(&mut self, message: String) {
        info!("{message}");
        self.status = Some(Status { message, is_error: false });
    }

    /// Process queued commands, then bring the graph up to date and
    /// schedule everything due within the lookahead.
    pub fn frame(&mut self) {
        if let Some(commands) = self.commands.as_mut().map(|rx| rx.drain()) {
            for cmd in commands {
                self.handle(cmd);
            }
        }

        self.refresh();

        let now = self.now();
        let project = self.store.snapshot();
        for tick in self.transport.poll(&self.store, now, self.config.lookahead()) {
            for trigger in resolve_tick(&project, &tick) {
                self.schedule(&project, &trigger, true);
            }
        }

        if let Some(tick) = self.transport.drain_playheads(now) {
            self.playhead = Some(tick);
        }
        self.meters.sample(now, &self.mixer.levels());
    }

    /// Single dispatch point for commands.
    pub fn handle(&mut self, cmd: Command) {
        if cmd.is_edit() {
            self.store.edit(|p| cmd.apply(p));
            return
        }

        match cmd {
            Command::TogglePlay => self.toggle_play(),
            Command::Rewind => {
                self.transport.rewind();
                self.playhead = None;
            }
            Command::Audition { track, note } => self.audition(&track, note),
            Command::Save(path) => self.save(path),
            Command::Load(path) => match Project::load(&path) {
                Ok(project) => {
                    self.load_project(project);
                    self.save_path = Some(path);
                }
                Err(e) => self.report(e),
            },
            Command::PatternResponse(text) => self.apply_pattern_response(&text),
            Command::Advice(text) => self.advice = text,
            _ => (),
        }
    }

    /// Start or stop playback.
    pub fn toggle_play(&mut self) {
        if !self.transport.is_playing() && !self.started {
            // first start: give samples a chance to finish loading
            self.refresh();
            let events = self.samples.wait_pending(self.config.asset_timeout());
            self.report_loads(events);
            self.started = true;
        }

        let now = self.now();
        let bpm = self.store.snapshot().settings.bpm;
        if !self.transport.toggle(now, bpm) {
            self.playhead = None;
            for id in self.rack.track_ids() {
                if let (Some((seq, _)), Some(instrument))
                    = (self.mixer.voice_target(&id), self.rack.get_mut(&id)) {
                    instrument.cut(seq, now);
                }
            }
        }
    }

    /// Play one sixteenth on a track now, outside the transport.
    pub fn audition(&mut self, track: &TrackId, note: Note) {
        self.refresh();
        let project = self.store.snapshot();
        let trigger = Trigger {
            track: track.clone(),
            pitch: note.midi_pitch() + project.settings.master_pitch / 100.0,
            velocity: project::DEFAULT_VELOCITY,
            length: NoteLength::Sixteenth,
            time: self.now(),
        };
        self.schedule(&project, &trigger, false);
    }

    /// Replace the project. Stale channels are released on the next frame.
    pub fn load_project(&mut self, project: Project) {
        self.store.replace(project);
        self.refresh();
        self.notify(String::from("Loaded project."));
    }

    /// Save to `path`, adding the project extension if missing.
    pub fn save(&mut self, path: PathBuf) {
        let path = if path.extension().is_none() {
            path.with_extension(PROJECT_EXT)
        } else {
            path
        };
        match self.store.snapshot().save(&path) {
            Ok(()) => {
                self.save_path = Some(path);
                self.notify(String::from("Saved project."));
            }
            Err(e) => self.report(e),
        }
    }

    pub fn save_path(&self) -> Option<&PathBuf> {
        self.save_path.as_ref()
    }

    /// Apply a raw pattern reply to the selected pattern. A malformed reply
    /// leaves the project untouched.
    pub fn apply_pattern_response(&mut self, text: &str) {
        let tracks = self.store.snapshot().tracks.len();
        match parse_pattern_response(text, tracks) {
            Ok(steps) => {
                self.store.edit(|p| p.apply_generated_steps(&steps));
                self.notify(String::from("Generated pattern."));
            }
            Err(e) => self.report(format!("Could not use generated pattern: {e}")),
        }
    }

    /// Ask `generator` for a pattern and apply it.
    pub fn generate(&mut self, generator: &dyn PatternGenerator, genre: &str) {
        let tracks = self.store.snapshot().tracks.len();
        match request_pattern(generator, genre, tracks) {
            Ok(steps) => {
                self.store.edit(|p| p.apply_generated_steps(&steps));
                self.notify(format!("Generated {genre} pattern."));
            }
            Err(e) => self.report(format!("Could not generate pattern: {e}")),
        }
    }

    /// Ask `generator` for advice. The previous advice is kept on failure.
    pub fn ask(&mut self, generator: &dyn PatternGenerator, prompt: &str) {
        match generator.advise(&advice_prompt(prompt)) {
            Ok(advice) => self.advice = advice,
            Err(e) => self.report(format!("Could not get advice: {e}")),
        }
    }

    /// Collect sample loads, release removed tracks and sync the mixer.
    fn refresh(&mut self) {
        let events = self.samples.poll();
        self.report_loads(events);

        let project = self.store.snapshot();
        for track in project.tracks.iter() {
            if let Some(sample) = track.instrument.sample() {
                if self.samples.state(sample).is_none() {
                    self.samples.request(sample);
                }
            }
        }

        let now = self.now();
        for id in self.mixer.stale_tracks(&project) {
            if let Some((seq, _)) = self.mixer.voice_target(&id) {
                self.rack.dispose(&id, seq, now);
            }
            self.mixer.release(&id);
            debug!(track = id.as_str(), "track removed");
        }

        if let Err(e) = self.mixer.sync(&project) {
            self.report(e);
        }
    }

    fn report_loads(&mut self, events: Vec<LoadEvent>) {
        for event in events {
            if let LoadEvent::Failed(sample, e) = event {
                self.report(format!("Could not load {}: {e}", sample.as_str()));
            }
        }
    }

    /// Start a voice for a trigger. Transport voices are gated by the
    /// session so that stopping silences them.
    fn schedule(&mut self, project: &Project, trigger: &Trigger, gated: bool) {
        let Some(track) = project.track(&trigger.track) else { return };
        let Some((seq, filter)) = self.mixer.voice_target(&track.id) else { return };
        let now = self.clock.now();
        let instrument = self.rack.resolve(track, seq, now);
        let note = NoteEvent {
            pitch: trigger.pitch,
            velocity: trigger.velocity,
            time: trigger.time,
            hold: trigger.length.steps() as f64 * step_interval(project.settings.bpm),
        };
        let mut ctx = VoiceContext {
            seq,
            filter,
            samples: &self.samples,
            gate: gated.then(|| self.transport.gate()),
            sample_rate: self.clock.sample_rate(),
            max_polyphony: self.config.max_polyphony,
        };
        instrument.play(&mut ctx, &note);
    }
}

/// Open the audio device, build the engine and play the project at
/// `project_path`, or the demo project.
pub fn run(config: Config, project_path: Option<PathBuf>) -> Result<(), Box<dyn Error>> {
    let fetcher = Arc::new(FileFetcher { root: config.sample_dir.clone() });
    let mut parts = None;

    let _stream = open_stream(|sample_rate| {
        let (engine, output, reader) = Engine::new(
            config.clone(), Project::empty(), sample_rate, SampleBank::new(fetcher));
        parts = Some((engine, reader));
        output
    })?;
    let (mut engine, _meters) = parts.ok_or("audio stream did not start")?;

    match project_path {
        Some(path) => match Project::load(&path) {
            Ok(project) => {
                engine.load_project(project);
                engine.save_path = Some(path);
            }
            Err(e) => {
                engine.report(e);
                engine.load_project(Project::default());
            }
        },
        None => engine.load_project(Project::default()),
    }

    info!(tracks = engine.project().tracks.len(), "{APP_NAME} ready");
    engine.toggle_play();

    loop {
        engine.frame();
        thread::sleep(FRAME_INTERVAL);
    }
}
