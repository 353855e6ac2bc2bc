//! The transport: turns the audio clock into sixteenth-note ticks and ticks
//! into triggers.

use std::collections::VecDeque;

use fundsp::hacker32::{shared, Shared};
use tracing::{debug, info};

use crate::pitch::{NoteLength, DEFAULT_NOTE};
use crate::project::{Mode, PatternId, Project, TrackId, SONG_BARS};
use crate::store::Store;
use crate::timing::{bar_index, local_step, step_interval, swing_offset};

/// One scheduled sixteenth. `step` counts from the start of playback.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Tick {
    pub step: u64,
    /// Audio clock time of the tick, including swing.
    pub time: f64,
}

impl Tick {
    pub fn local_step(&self) -> usize {
        local_step(self.step)
    }

    pub fn bar(&self) -> u64 {
        bar_index(self.step)
    }
}

/// A note for one track at one tick.
#[derive(Clone, Debug, PartialEq)]
pub struct Trigger {
    pub track: TrackId,
    /// MIDI pitch including master transposition.
    pub pitch: f32,
    pub velocity: f32,
    pub length: NoteLength,
    pub time: f64,
}

/// Pattern a track plays at `bar`, if any.
fn active_pattern(project: &Project, track_index: usize, bar: u64) -> Option<PatternId> {
    match project.settings.mode {
        Mode::Pattern => Some(project.settings.current_pattern),
        Mode::Song => {
            let bar = (bar % SONG_BARS as u64) as u8;
            project.clip_at(track_index, bar).map(|c| c.pattern)
        }
    }
}

/// Everything that should sound at `tick`. Muted and solo-excluded tracks
/// produce nothing.
pub fn resolve_tick(project: &Project, tick: &Tick) -> Vec<Trigger> {
    let step = tick.local_step();
    let transpose = project.settings.master_pitch / 100.0;
    let mut triggers = Vec::new();

    for (i, track) in project.tracks.iter().enumerate() {
        if !project.track_audible(track) {
            continue
        }
        let Some(pattern) = active_pattern(project, i, tick.bar())
            .and_then(|id| track.pattern(id)) else { continue };

        if pattern.steps[step] {
            triggers.push(Trigger {
                track: track.id.clone(),
                pitch: DEFAULT_NOTE.midi_pitch() + transpose,
                velocity: pattern.velocities[step],
                length: NoteLength::Sixteenth,
                time: tick.time,
            });
        }

        for note in pattern.notes.iter().filter(|n| n.step as usize == step) {
            triggers.push(Trigger {
                track: track.id.clone(),
                pitch: note.note.midi_pitch() + transpose,
                velocity: note.velocity,
                length: note.length,
                time: tick.time,
            });
        }
    }

    triggers
}

/// Where tick times are measured from.
#[derive(Clone, Copy, Debug)]
struct Anchor {
    time: f64,
    step: u64,
    tempo: f32,
}

impl Anchor {
    /// Unswung time of `step`.
    fn time_of(&self, step: u64) -> f64 {
        self.time + (step - self.step) as f64 * step_interval(self.tempo)
    }
}

pub struct Transport {
    playing: bool,
    /// Next step to schedule.
    step: u64,
    /// None until the next poll anchors the clock.
    anchor: Option<Anchor>,
    start_delay: f64,
    session: u64,
    gate: Shared,
    playheads: VecDeque<Tick>,
}

impl Transport {
    pub fn new(start_delay: f64) -> Self {
        Self {
            playing: false,
            step: 0,
            anchor: None,
            start_delay,
            session: 0,
            gate: shared(0.0),
            playheads: VecDeque::new(),
        }
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Session counter. Every stop begins a new session.
    pub fn session(&self) -> u64 {
        self.session
    }

    /// Gate shared by every voice of the current session.
    pub fn gate(&self) -> &Shared {
        &self.gate
    }

    /// Start, or stop if playing. Returns whether the transport is playing.
    pub fn toggle(&mut self, now: f64, tempo: f32) -> bool {
        if self.playing {
            self.stop();
        } else {
            self.playing = true;
            self.step = 0;
            self.gate = shared(1.0);
            self.anchor = Some(Anchor { time: now + self.start_delay, step: 0, tempo });
            info!(tempo, "transport started");
        }
        self.playing
    }

    fn stop(&mut self) {
        self.playing = false;
        self.step = 0;
        self.anchor = None;
        self.gate.set(0.0);
        self.session += 1;
        self.playheads.clear();
        info!(session = self.session, "transport stopped");
    }

    /// Jump back to step 0 without stopping. Step 0 takes the slot of the
    /// first step not yet returned, after any ticks already scheduled.
    pub fn rewind(&mut self) {
        let step = self.step;
        self.anchor = self.anchor
            .map(|a| Anchor { time: a.time_of(step), step: 0, tempo: a.tempo });
        self.step = 0;
    }

    /// Ticks due before `now + horizon`, in order. Tempo and swing are read
    /// from the current snapshot, so changes affect only ticks not yet
    /// returned.
    pub fn poll(&mut self, store: &Store, now: f64, horizon: f64) -> Vec<Tick> {
        if !self.playing {
            return Vec::new()
        }

        let project = store.snapshot();
        let tempo = project.settings.bpm;
        let swing = project.settings.swing;
        let step = self.step;

        let mut anchor = match self.anchor {
            Some(anchor) if anchor.tempo != tempo => {
                debug!(from = anchor.tempo, to = tempo, step, "tempo change");
                Anchor { time: anchor.time_of(step), step, tempo }
            }
            Some(anchor) => anchor,
            None => Anchor { time: now, step, tempo },
        };

        // fell behind by more than a step: resume from now
        if anchor.time_of(step) + step_interval(tempo) < now {
            debug!(step, late = now - anchor.time_of(step), "transport fell behind");
            anchor = Anchor { time: now, step, tempo };
        }
        self.anchor = Some(anchor);

        let mut ticks = Vec::new();
        loop {
            let nominal = anchor.time_of(self.step);
            if nominal >= now + horizon {
                break
            }
            let tick = Tick {
                step: self.step,
                time: nominal + swing_offset(local_step(self.step), swing, tempo),
            };
            ticks.push(tick);
            self.playheads.push_back(tick);
            self.step += 1;
        }
        ticks
    }

    /// Returns the latest playhead position that has come due, if any.
    pub fn drain_playheads(&mut self, now: f64) -> Option<Tick> {
        let mut latest = None;
        while self.playheads.front().is_some_and(|x| x.time <= now) {
            latest = self.playheads.pop_front();
        }
        latest
    }
}
