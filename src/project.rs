//! Tracks, patterns, notes, clips, and every edit that can be made to them.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::error::Error;
use std::fs::File;
use std::path::Path;

use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use palette::Srgb;
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};

use crate::instrument::{Instrument, MAX_FILTER_CUTOFF, MAX_FILTER_RESONANCE, MIN_FILTER_CUTOFF};
use crate::pitch::{Note, NoteLength};
use crate::sample::SampleRef;
use crate::timing::{DEFAULT_TEMPO, MAX_TEMPO, MIN_TEMPO, STEPS_PER_BAR};

pub type PatternId = u32;
pub type NoteId = u32;
pub type ClipId = u32;

/// Number of bars in the song arrangement.
pub const SONG_BARS: usize = 16;

pub const DEFAULT_VELOCITY: f32 = 0.8;
pub const DEFAULT_VOLUME: f32 = 0.8;
pub const MAX_VOLUME: f32 = 1.5;
pub const MAX_FEEDBACK: f32 = 0.95;
pub const MAX_MASTER_PITCH: f32 = 1200.0;

const TRACK_ID_LEN: usize = 9;

/// Clamp a knob value into range. NaN and infinities keep `current`.
pub fn clamp_knob(value: f32, current: f32, min: f32, max: f32) -> f32 {
    if value.is_finite() {
        value.clamp(min, max)
    } else {
        current
    }
}

pub const TRACK_COLORS: [Srgb<u8>; 8] = [
    Srgb::new(0xff, 0x4d, 0x4d),
    Srgb::new(0xff, 0xaf, 0x40),
    Srgb::new(0xff, 0xfa, 0x65),
    Srgb::new(0x32, 0xff, 0x7e),
    Srgb::new(0x7e, 0xff, 0xf5),
    Srgb::new(0x18, 0xdc, 0xff),
    Srgb::new(0x7d, 0x5f, 0xff),
    Srgb::new(0xcd, 0x84, 0xf1),
];

#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(String);

impl TrackId {
    /// Generate a random alphanumeric id.
    pub fn random() -> Self {
        Self(rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(TRACK_ID_LEN)
            .map(|c| char::from(c).to_ascii_lowercase())
            .collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TrackId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A pitched event in a pattern.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct PianoNote {
    pub id: NoteId,
    pub note: Note,
    pub step: u8,
    pub length: NoteLength,
    pub velocity: f32,
}

impl PianoNote {
    /// Whether the note covers `step`.
    pub fn covers(&self, step: u8) -> bool {
        step >= self.step && step < self.step.saturating_add(self.length.steps())
    }
}

/// One bar of steps and notes for one track.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct Pattern {
    pub id: PatternId,
    pub name: String,
    pub color: Srgb<u8>,
    pub steps: [bool; STEPS_PER_BAR],
    pub velocities: [f32; STEPS_PER_BAR],
    pub notes: Vec<PianoNote>,
}

impl Pattern {
    pub fn new(id: PatternId, color: Srgb<u8>) -> Self {
        Self {
            id,
            name: format!("Pattern {id}"),
            color,
            steps: [false; STEPS_PER_BAR],
            velocities: [DEFAULT_VELOCITY; STEPS_PER_BAR],
            notes: Vec::new(),
        }
    }

    /// Reset content, keeping identity.
    pub fn clear(&mut self) {
        self.steps = [false; STEPS_PER_BAR];
        self.velocities = [DEFAULT_VELOCITY; STEPS_PER_BAR];
        self.notes.clear();
    }

    pub fn is_empty(&self) -> bool {
        !self.steps.contains(&true) && self.notes.is_empty()
    }

    pub fn note(&self, id: NoteId) -> Option<&PianoNote> {
        self.notes.iter().find(|n| n.id == id)
    }

    fn note_mut(&mut self, id: NoteId) -> Option<&mut PianoNote> {
        self.notes.iter_mut().find(|n| n.id == id)
    }

    fn next_note_id(&self) -> NoteId {
        self.notes.iter().map(|n| n.id).max().map_or(1, |x| x + 1)
    }

    fn exact_match(&self, note: Note, step: u8) -> Option<usize> {
        self.notes.iter().position(|n| n.note == note && n.step == step)
    }

    fn push_note(&mut self, note: Note, step: u8, length: NoteLength) -> NoteId {
        let id = self.next_note_id();
        self.notes.push(PianoNote {
            id,
            note,
            step,
            length: length.fit(step),
            velocity: DEFAULT_VELOCITY,
        });
        id
    }
}

#[derive(Clone, Copy, PartialEq, Debug, Serialize, Deserialize)]
pub struct Reverb {
    pub enabled: bool,
    pub room_size: f32,
}

#[derive(Clone, Copy, PartialEq, Debug, Serialize, Deserialize)]
pub struct Delay {
    pub enabled: bool,
    pub feedback: f32,
}

/// Per-track insert effects.
#[derive(Clone, Copy, PartialEq, Debug, Serialize, Deserialize)]
pub struct TrackFx {
    pub reverb: Reverb,
    pub delay: Delay,
}

impl Default for TrackFx {
    fn default() -> Self {
        Self {
            reverb: Reverb { enabled: false, room_size: 0.5 },
            delay: Delay { enabled: false, feedback: 0.3 },
        }
    }
}

#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    pub name: String,
    pub color: Srgb<u8>,
    pub instrument: Instrument,
    pub volume: f32,
    pub pan: f32,
    pub muted: bool,
    pub solo: bool,
    pub fx: TrackFx,
    pub mixer_channel: usize,
    pub patterns: BTreeMap<PatternId, Pattern>,
}

impl Track {
    /// Create a track at ordinal `index` with an empty pattern 1.
    pub fn new(id: TrackId, name: &str, instrument: Instrument, index: usize) -> Self {
        let color = TRACK_COLORS[index % TRACK_COLORS.len()];
        Self {
            id,
            name: name.to_owned(),
            color,
            instrument,
            volume: DEFAULT_VOLUME,
            pan: 0.0,
            muted: false,
            solo: false,
            fx: Default::default(),
            mixer_channel: index + 1,
            patterns: BTreeMap::from([(1, Pattern::new(1, color))]),
        }
    }

    pub fn pattern(&self, id: PatternId) -> Option<&Pattern> {
        self.patterns.get(&id)
    }

    /// Returns the pattern, creating it empty if it doesn't exist.
    pub fn pattern_mut(&mut self, id: PatternId) -> &mut Pattern {
        let color = self.color;
        self.patterns.entry(id).or_insert_with(|| Pattern::new(id, color))
    }
}

/// A pattern placed on one track row of the song arrangement.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct PlaylistClip {
    pub id: ClipId,
    pub pattern: PatternId,
    pub track_index: usize,
    pub bar: u8,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub enum Mode {
    #[default]
    #[serde(rename = "pat")]
    Pattern,
    #[serde(rename = "song")]
    Song,
}

#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct Settings {
    pub bpm: f32,
    pub swing: f32,
    pub mode: Mode,
    pub current_pattern: PatternId,
    /// Global transposition in cents.
    pub master_pitch: f32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bpm: DEFAULT_TEMPO,
            swing: 0.0,
            mode: Mode::Pattern,
            current_pattern: 1,
            master_pitch: 0.0,
        }
    }
}

/// Musical content and transport settings.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct Project {
    pub tracks: Vec<Track>,
    pub clips: Vec<PlaylistClip>,
    pub settings: Settings,
}

impl Project {
    /// A project with no tracks.
    pub fn empty() -> Self {
        Self {
            tracks: Vec::new(),
            clips: Vec::new(),
            settings: Default::default(),
        }
    }

    /// Load a gzipped MessagePack project.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Box<dyn Error>> {
        let decoder = GzDecoder::new(File::open(path)?);
        let mut project: Self = rmp_serde::from_read(decoder)?;
        project.init();
        Ok(project)
    }

    /// Save the project as gzipped MessagePack.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn Error>> {
        let mut encoder = GzEncoder::new(File::create(path)?, Compression::default());
        rmp_serde::encode::write(&mut encoder, self)?;
        encoder.finish()?;
        Ok(())
    }

    pub fn to_json(&self) -> Result<String, Box<dyn Error>> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(s: &str) -> Result<Self, Box<dyn Error>> {
        let mut project: Self = serde_json::from_str(s)?;
        project.init();
        Ok(project)
    }

    /// Bring loaded data back into valid ranges.
    fn init(&mut self) {
        let defaults = Settings::default();
        let settings = &mut self.settings;
        settings.bpm = clamp_knob(settings.bpm, defaults.bpm, MIN_TEMPO, MAX_TEMPO);
        settings.swing = clamp_knob(settings.swing, defaults.swing, 0.0, 1.0);
        settings.master_pitch = clamp_knob(settings.master_pitch, defaults.master_pitch,
            -MAX_MASTER_PITCH, MAX_MASTER_PITCH);
        settings.current_pattern = settings.current_pattern.max(1);

        let fx = TrackFx::default();
        for track in self.tracks.iter_mut() {
            track.volume = clamp_knob(track.volume, DEFAULT_VOLUME, 0.0, MAX_VOLUME);
            track.pan = clamp_knob(track.pan, 0.0, -1.0, 1.0);
            track.fx.reverb.room_size = clamp_knob(track.fx.reverb.room_size,
                fx.reverb.room_size, 0.0, 1.0);
            track.fx.delay.feedback = clamp_knob(track.fx.delay.feedback,
                fx.delay.feedback, 0.0, MAX_FEEDBACK);
            track.instrument = track.instrument.clone().clamped();
            for pattern in track.patterns.values_mut() {
                for v in pattern.velocities.iter_mut() {
                    *v = clamp_knob(*v, DEFAULT_VELOCITY, 0.0, 1.0);
                }
                for note in pattern.notes.iter_mut() {
                    note.velocity = clamp_knob(note.velocity, DEFAULT_VELOCITY, 0.0, 1.0);
                }
            }
        }

        // one clip per cell, the first one wins
        let rows = self.tracks.len();
        let mut cells = HashSet::new();
        self.clips.retain(|c| c.track_index < rows && (c.bar as usize) < SONG_BARS
            && cells.insert((c.track_index, c.bar)));
    }

    pub fn track(&self, id: &TrackId) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id == *id)
    }

    pub fn track_mut(&mut self, id: &TrackId) -> Option<&mut Track> {
        self.tracks.iter_mut().find(|t| t.id == *id)
    }

    pub fn track_index(&self, id: &TrackId) -> Option<usize> {
        self.tracks.iter().position(|t| t.id == *id)
    }

    /// Returns the pattern to write to, creating it if needed.
    fn pattern_mut(&mut self, track: &TrackId, pattern: PatternId) -> Option<&mut Pattern> {
        if pattern == 0 {
            return None
        }
        self.track_mut(track).map(|t| t.pattern_mut(pattern))
    }

    /// Every pattern id used by any track.
    pub fn pattern_ids(&self) -> BTreeSet<PatternId> {
        self.tracks.iter().flat_map(|t| t.patterns.keys().copied()).collect()
    }

    pub fn any_solo(&self) -> bool {
        self.tracks.iter().any(|t| t.solo)
    }

    /// Whether a track should sound, given mute and solo states.
    pub fn track_audible(&self, track: &Track) -> bool {
        !track.muted && (track.solo || !self.any_solo())
    }

    pub fn clip_at(&self, track_index: usize, bar: u8) -> Option<&PlaylistClip> {
        self.clips.iter().find(|c| c.track_index == track_index && c.bar == bar)
    }

    pub fn toggle_step(&mut self, track: &TrackId, pattern: PatternId, step: usize) {
        if step < STEPS_PER_BAR {
            if let Some(p) = self.pattern_mut(track, pattern) {
                p.steps[step] = !p.steps[step];
            }
        }
    }

    pub fn set_step(&mut self, track: &TrackId, pattern: PatternId, step: usize, value: bool) {
        if step < STEPS_PER_BAR {
            if let Some(p) = self.pattern_mut(track, pattern) {
                p.steps[step] = value;
            }
        }
    }

    pub fn set_velocity(&mut self, track: &TrackId, pattern: PatternId, step: usize, v: f32) {
        if step < STEPS_PER_BAR {
            if let Some(p) = self.pattern_mut(track, pattern) {
                p.velocities[step] = clamp_knob(v, p.velocities[step], 0.0, 1.0);
            }
        }
    }

    /// Remove the note at an exact (pitch, step) match, or add one. Returns
    /// the id of an added note.
    pub fn toggle_note(&mut self,
        track: &TrackId, pattern: PatternId, note: Note, step: u8, length: NoteLength
    ) -> Option<NoteId> {
        if !note.in_palette() || step as usize >= STEPS_PER_BAR {
            return None
        }
        let p = self.pattern_mut(track, pattern)?;
        match p.exact_match(note, step) {
            Some(i) => {
                p.notes.remove(i);
                None
            }
            None => Some(p.push_note(note, step, length)),
        }
    }

    /// Add a note without toggling. An exact (pitch, step) duplicate is
    /// replaced.
    pub fn add_note(&mut self,
        track: &TrackId, pattern: PatternId, note: Note, step: u8, length: NoteLength
    ) -> Option<NoteId> {
        if !note.in_palette() || step as usize >= STEPS_PER_BAR {
            return None
        }
        let p = self.pattern_mut(track, pattern)?;
        if let Some(i) = p.exact_match(note, step) {
            p.notes.remove(i);
        }
        Some(p.push_note(note, step, length))
    }

    /// Remove notes of the given pitch covering a cell.
    pub fn remove_note_at(&mut self, track: &TrackId, pattern: PatternId, note: Note, step: u8) {
        if let Some(p) = self.track_mut(track).and_then(|t| t.patterns.get_mut(&pattern)) {
            p.notes.retain(|n| !(n.note == note && n.covers(step)));
        }
    }

    /// Move a note, clamping it to stay within the bar and the palette.
    pub fn move_note(&mut self,
        track: &TrackId, pattern: PatternId, id: NoteId, note: Note, step: u8
    ) {
        if !note.in_palette() {
            return
        }
        if let Some(n) = self.track_mut(track)
            .and_then(|t| t.patterns.get_mut(&pattern))
            .and_then(|p| p.note_mut(id)) {
            let max_step = STEPS_PER_BAR as u8 - n.length.steps();
            n.note = note;
            n.step = step.min(max_step);
        }
    }

    pub fn resize_note(&mut self,
        track: &TrackId, pattern: PatternId, id: NoteId, length: NoteLength
    ) {
        if let Some(n) = self.track_mut(track)
            .and_then(|t| t.patterns.get_mut(&pattern))
            .and_then(|p| p.note_mut(id)) {
            n.length = length.fit(n.step);
        }
    }

    pub fn set_note_velocity(&mut self,
        track: &TrackId, pattern: PatternId, id: NoteId, velocity: f32
    ) {
        if let Some(n) = self.track_mut(track)
            .and_then(|t| t.patterns.get_mut(&pattern))
            .and_then(|p| p.note_mut(id)) {
            n.velocity = clamp_knob(velocity, n.velocity, 0.0, 1.0);
        }
    }

    /// Add an empty pattern with the next free id to every track, and
    /// select it.
    pub fn new_pattern(&mut self) -> PatternId {
        let id = self.pattern_ids().last().map_or(1, |x| x + 1);
        for track in self.tracks.iter_mut() {
            track.pattern_mut(id);
        }
        self.settings.current_pattern = id;
        id
    }

    /// Empty the selected pattern on every track.
    pub fn clear_pattern(&mut self) {
        let id = self.settings.current_pattern;
        for track in self.tracks.iter_mut() {
            if let Some(p) = track.patterns.get_mut(&id) {
                p.clear();
            }
        }
    }

    pub fn select_pattern(&mut self, id: PatternId) {
        if id > 0 {
            self.settings.current_pattern = id;
        }
    }

    /// Remove the clip in a cell, or place the selected pattern there.
    pub fn toggle_clip(&mut self, track_index: usize, bar: u8) {
        if track_index >= self.tracks.len() || bar as usize >= SONG_BARS {
            return
        }
        match self.clips.iter().position(|c| c.track_index == track_index && c.bar == bar) {
            Some(i) => {
                self.clips.remove(i);
            }
            None => {
                let id = self.clips.iter().map(|c| c.id).max().map_or(1, |x| x + 1);
                self.clips.push(PlaylistClip {
                    id,
                    pattern: self.settings.current_pattern,
                    track_index,
                    bar,
                });
            }
        }
    }

    /// Append a track with empty patterns for the whole pattern namespace.
    pub fn add_track(&mut self, name: &str, instrument: Instrument) -> TrackId {
        let mut id = TrackId::random();
        while self.track(&id).is_some() {
            id = TrackId::random();
        }
        let mut track = Track::new(id.clone(), name, instrument.clamped(), self.tracks.len());
        for pattern in self.pattern_ids() {
            track.pattern_mut(pattern);
        }
        self.tracks.push(track);
        id
    }

    /// Remove a track and its clip row. Rows below move up.
    pub fn remove_track(&mut self, id: &TrackId) {
        if let Some(index) = self.track_index(id) {
            self.tracks.remove(index);
            self.clips.retain(|c| c.track_index != index);
            for clip in self.clips.iter_mut() {
                if clip.track_index > index {
                    clip.track_index -= 1;
                }
            }
        }
    }

    pub fn replace_instrument(&mut self, track: &TrackId, instrument: Instrument) {
        if let Some(t) = self.track_mut(track) {
            t.instrument = instrument.clamped();
        }
    }

    pub fn rename_track(&mut self, track: &TrackId, name: &str) {
        if let Some(t) = self.track_mut(track) {
            t.name = name.to_owned();
        }
    }

    pub fn set_volume(&mut self, track: &TrackId, volume: f32) {
        if let Some(t) = self.track_mut(track) {
            t.volume = clamp_knob(volume, t.volume, 0.0, MAX_VOLUME);
        }
    }

    pub fn set_pan(&mut self, track: &TrackId, pan: f32) {
        if let Some(t) = self.track_mut(track) {
            t.pan = clamp_knob(pan, t.pan, -1.0, 1.0);
        }
    }

    pub fn toggle_mute(&mut self, track: &TrackId) {
        if let Some(t) = self.track_mut(track) {
            t.muted = !t.muted;
        }
    }

    pub fn toggle_solo(&mut self, track: &TrackId) {
        if let Some(t) = self.track_mut(track) {
            t.solo = !t.solo;
        }
    }

    pub fn set_reverb(&mut self, track: &TrackId, enabled: bool) {
        if let Some(t) = self.track_mut(track) {
            t.fx.reverb.enabled = enabled;
        }
    }

    pub fn set_room_size(&mut self, track: &TrackId, size: f32) {
        if let Some(t) = self.track_mut(track) {
            t.fx.reverb.room_size = clamp_knob(size, t.fx.reverb.room_size, 0.0, 1.0);
        }
    }

    pub fn set_delay(&mut self, track: &TrackId, enabled: bool) {
        if let Some(t) = self.track_mut(track) {
            t.fx.delay.enabled = enabled;
        }
    }

    pub fn set_feedback(&mut self, track: &TrackId, feedback: f32) {
        if let Some(t) = self.track_mut(track) {
            t.fx.delay.feedback = clamp_knob(feedback, t.fx.delay.feedback, 0.0, MAX_FEEDBACK);
        }
    }

    /// Set filter cutoff. Samplers have no filter.
    pub fn set_cutoff(&mut self, track: &TrackId, cutoff: f32) {
        if let Some(filter) = self.track_mut(track).and_then(|t| t.instrument.filter_mut()) {
            filter.cutoff = clamp_knob(cutoff, filter.cutoff, MIN_FILTER_CUTOFF, MAX_FILTER_CUTOFF);
        }
    }

    pub fn set_resonance(&mut self, track: &TrackId, resonance: f32) {
        if let Some(filter) = self.track_mut(track).and_then(|t| t.instrument.filter_mut()) {
            filter.resonance = clamp_knob(resonance, filter.resonance, 0.0, MAX_FILTER_RESONANCE);
        }
    }

    pub fn set_bpm(&mut self, bpm: f32) {
        self.settings.bpm = clamp_knob(bpm, self.settings.bpm, MIN_TEMPO, MAX_TEMPO);
    }

    pub fn set_swing(&mut self, swing: f32) {
        self.settings.swing = clamp_knob(swing, self.settings.swing, 0.0, 1.0);
    }

    pub fn set_mode(&mut self, mode: Mode) {
        self.settings.mode = mode;
    }

    pub fn set_master_pitch(&mut self, cents: f32) {
        self.settings.master_pitch = clamp_knob(cents, self.settings.master_pitch,
            -MAX_MASTER_PITCH, MAX_MASTER_PITCH);
    }

    /// Write generated step rows into the selected pattern. Tracks missing
    /// from `steps` are cleared.
    pub fn apply_generated_steps(&mut self, steps: &HashMap<usize, [bool; STEPS_PER_BAR]>) {
        let id = self.settings.current_pattern;
        for (i, track) in self.tracks.iter_mut().enumerate() {
            track.pattern_mut(id).steps = steps.get(&i).copied()
                .unwrap_or([false; STEPS_PER_BAR]);
        }
    }
}

impl Default for Project {
    /// The demo project: a kick, snare and hi-hat groove.
    fn default() -> Self {
        fn drum(id: &str, name: &str, sample: &str, color: usize, volume: f32,
            steps: [bool; STEPS_PER_BAR]
        ) -> Track {
            let mut track = Track::new(TrackId::from(id), name,
                Instrument::Sampler(SampleRef::new(sample)), 0);
            track.color = TRACK_COLORS[color];
            track.volume = volume;
            let pattern = track.pattern_mut(1);
            pattern.color = TRACK_COLORS[color];
            pattern.steps = steps;
            track
        }

        let kick = std::array::from_fn(|i| i % 4 == 0);
        let snare = std::array::from_fn(|i| i == 4 || i == 12);
        let mut tracks = vec![
            drum("1", "Kick", "808/kick.mp3", 0, 1.0, kick),
            drum("2", "Snare", "808/snare.mp3", 1, 0.7, snare),
            drum("3", "HiHat", "808/hh.mp3", 3, 0.4, [true; STEPS_PER_BAR]),
        ];
        for (i, track) in tracks.iter_mut().enumerate() {
            track.mixer_channel = i + 1;
        }

        Self {
            tracks,
            clips: Vec::new(),
            settings: Default::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::SynthSettings;

    fn note(s: &str) -> Note {
        s.parse().unwrap()
    }

    fn synth_project() -> (Project, TrackId) {
        let mut project = Project::empty();
        let id = project.add_track("Lead", Instrument::Synth(SynthSettings::default()));
        (project, id)
    }

    #[test]
    fn test_default_project() {
        let project = Project::default();
        assert_eq!(project.tracks.len(), 3);
        let kick = &project.tracks[0];
        assert_eq!(kick.volume, 1.0);
        let steps = kick.pattern(1).unwrap().steps;
        assert_eq!(steps.iter().filter(|x| **x).count(), 4);
        assert!(steps[0] && steps[4] && steps[8] && steps[12]);
        assert_eq!(project.tracks[2].mixer_channel, 3);
    }

    #[test]
    fn test_toggle_step_twice() {
        let mut project = Project::default();
        let before = project.clone();
        let id = TrackId::from("2");
        project.toggle_step(&id, 1, 3);
        assert_ne!(project, before);
        project.toggle_step(&id, 1, 3);
        assert_eq!(project, before);
    }

    #[test]
    fn test_toggle_step_missing_pattern() {
        let mut project = Project::default();
        let id = TrackId::from("1");
        project.toggle_step(&id, 7, 5);
        let pattern = project.track(&id).unwrap().pattern(7).unwrap();
        assert_eq!(pattern.steps.iter().filter(|x| **x).count(), 1);
        assert!(pattern.steps[5]);
        assert_eq!(pattern.velocities, [DEFAULT_VELOCITY; STEPS_PER_BAR]);

        // out of range and unknown targets are no-ops
        let before = project.clone();
        project.toggle_step(&id, 1, 16);
        project.toggle_step(&TrackId::from("nope"), 1, 0);
        project.toggle_step(&id, 0, 0);
        assert_eq!(project, before);
    }

    #[test]
    fn test_set_velocity_clamped() {
        let mut project = Project::default();
        let id = TrackId::from("1");
        project.set_velocity(&id, 1, 0, 4.0);
        project.set_velocity(&id, 1, 1, -1.0);
        let v = project.track(&id).unwrap().pattern(1).unwrap().velocities;
        assert_eq!((v[0], v[1]), (1.0, 0.0));
    }

    #[test]
    fn test_toggle_note() {
        let (mut project, id) = synth_project();
        let added = project.toggle_note(&id, 1, note("E3"), 2, NoteLength::Quarter);
        assert_eq!(added, Some(1));
        project.toggle_note(&id, 1, note("G3"), 2, NoteLength::Quarter);
        assert_eq!(project.track(&id).unwrap().pattern(1).unwrap().notes.len(), 2);

        assert_eq!(project.toggle_note(&id, 1, note("E3"), 2, NoteLength::Eighth), None);
        let notes = &project.track(&id).unwrap().pattern(1).unwrap().notes;
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].note, note("G3"));

        // outside the palette
        assert_eq!(project.toggle_note(&id, 1, note("C6"), 0, NoteLength::Quarter), None);
    }

    #[test]
    fn test_note_fits_bar() {
        let (mut project, id) = synth_project();
        project.toggle_note(&id, 1, note("C4"), 14, NoteLength::Whole);
        let n = &project.track(&id).unwrap().pattern(1).unwrap().notes[0];
        assert_eq!(n.length, NoteLength::Eighth);
        assert_eq!(n.velocity, DEFAULT_VELOCITY);
    }

    #[test]
    fn test_add_note_replaces_duplicate() {
        let (mut project, id) = synth_project();
        project.add_note(&id, 1, note("C4"), 0, NoteLength::Quarter);
        project.add_note(&id, 1, note("C4"), 0, NoteLength::Half);
        let notes = &project.track(&id).unwrap().pattern(1).unwrap().notes;
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].length, NoteLength::Half);
    }

    #[test]
    fn test_remove_note_at() {
        let (mut project, id) = synth_project();
        project.add_note(&id, 1, note("C4"), 4, NoteLength::Quarter);
        project.remove_note_at(&id, 1, note("C4"), 8);
        assert_eq!(project.track(&id).unwrap().pattern(1).unwrap().notes.len(), 1);
        project.remove_note_at(&id, 1, note("C4"), 7);
        assert!(project.track(&id).unwrap().pattern(1).unwrap().notes.is_empty());
    }

    #[test]
    fn test_move_and_resize_note() {
        let (mut project, id) = synth_project();
        let nid = project.add_note(&id, 1, note("C4"), 2, NoteLength::Quarter).unwrap();
        project.move_note(&id, 1, nid, note("D4"), 15);
        let n = project.track(&id).unwrap().pattern(1).unwrap().note(nid).unwrap().clone();
        assert_eq!((n.note, n.step), (note("D4"), 12));

        project.resize_note(&id, 1, nid, NoteLength::Half);
        let n = project.track(&id).unwrap().pattern(1).unwrap().note(nid).unwrap().clone();
        assert_eq!(n.length, NoteLength::Quarter);
        assert_eq!(n.step, 12);

        project.set_note_velocity(&id, 1, nid, 0.25);
        assert_eq!(project.track(&id).unwrap().pattern(1).unwrap().note(nid).unwrap().velocity,
            0.25);
    }

    #[test]
    fn test_new_and_clear_pattern() {
        let mut project = Project::default();
        let id = project.new_pattern();
        assert_eq!(id, 2);
        assert_eq!(project.settings.current_pattern, 2);
        assert!(project.tracks.iter().all(|t| t.pattern(2).is_some_and(|p| p.is_empty())));

        let empty = project.clone();
        let kick = TrackId::from("1");
        project.toggle_step(&kick, 2, 0);
        project.toggle_note(&kick, 2, note("C3"), 3, NoteLength::Sixteenth);
        project.set_velocity(&kick, 2, 0, 0.1);
        project.clear_pattern();
        assert_eq!(project, empty);

        // pattern 1 is untouched by clearing pattern 2
        assert!(!project.tracks[0].pattern(1).unwrap().is_empty());
    }

    #[test]
    fn test_new_pattern_uses_global_max() {
        let mut project = Project::default();
        project.toggle_step(&TrackId::from("3"), 5, 0);
        assert_eq!(project.new_pattern(), 6);
        assert!(project.tracks.iter().all(|t| t.pattern(6).is_some()));
    }

    #[test]
    fn test_toggle_clip() {
        let mut project = Project::default();
        project.toggle_clip(0, 0);
        project.select_pattern(3);
        project.toggle_clip(1, 0);
        assert_eq!(project.clips.len(), 2);
        assert_eq!(project.clip_at(1, 0).unwrap().pattern, 3);

        project.toggle_clip(0, 0);
        assert!(project.clip_at(0, 0).is_none());
        assert_eq!(project.clips.len(), 1);

        project.toggle_clip(0, 16);
        project.toggle_clip(3, 0);
        assert_eq!(project.clips.len(), 1);
    }

    #[test]
    fn test_clip_cells_unique() {
        let mut project = Project::default();
        for i in 0..40 {
            project.toggle_clip(i % 3, (i % 5) as u8);
            for clip in project.clips.iter() {
                let count = project.clips.iter()
                    .filter(|c| (c.track_index, c.bar) == (clip.track_index, clip.bar))
                    .count();
                assert_eq!(count, 1);
            }
        }
    }

    #[test]
    fn test_add_track() {
        let mut project = Project::default();
        project.new_pattern();
        let id = project.add_track("Bass", Instrument::Acid(Default::default()));
        assert_eq!(id.as_str().len(), 9);
        let track = project.track(&id).unwrap();
        assert_eq!(track.volume, DEFAULT_VOLUME);
        assert_eq!(track.mixer_channel, 4);
        assert_eq!(track.color, TRACK_COLORS[3]);
        assert_eq!(track.patterns.keys().copied().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn test_remove_track_shifts_clips() {
        let mut project = Project::default();
        project.toggle_clip(0, 0);
        project.toggle_clip(1, 1);
        project.toggle_clip(2, 2);
        project.remove_track(&TrackId::from("2"));
        assert_eq!(project.tracks.len(), 2);
        let mut cells: Vec<_> = project.clips.iter().map(|c| (c.track_index, c.bar)).collect();
        cells.sort();
        assert_eq!(cells, vec![(0, 0), (1, 2)]);
    }

    #[test]
    fn test_mixer_clamps() {
        let (mut project, id) = synth_project();
        project.set_volume(&id, 3.0);
        project.set_pan(&id, -2.0);
        project.set_room_size(&id, 1.5);
        project.set_feedback(&id, 1.0);
        project.set_cutoff(&id, 5.0);
        project.set_resonance(&id, 50.0);
        project.set_bpm(400.0);
        project.set_swing(-1.0);
        project.set_master_pitch(5000.0);
        let t = project.track(&id).unwrap();
        assert_eq!((t.volume, t.pan), (MAX_VOLUME, -1.0));
        assert_eq!(t.fx.reverb.room_size, 1.0);
        assert_eq!(t.fx.delay.feedback, MAX_FEEDBACK);
        assert_eq!(t.instrument.filter().unwrap().cutoff, MIN_FILTER_CUTOFF);
        assert_eq!(t.instrument.filter().unwrap().resonance, MAX_FILTER_RESONANCE);
        assert_eq!(project.settings.bpm, MAX_TEMPO);
        assert_eq!(project.settings.swing, 0.0);
        assert_eq!(project.settings.master_pitch, MAX_MASTER_PITCH);
    }

    #[test]
    fn test_non_finite_knobs_ignored() {
        let (mut project, id) = synth_project();
        project.toggle_step(&id, 1, 0);
        project.set_swing(0.3);
        project.set_bpm(100.0);
        let before = project.clone();

        for x in [f32::NAN, f32::INFINITY, f32::NEG_INFINITY] {
            project.set_swing(x);
            project.set_bpm(x);
            project.set_master_pitch(x);
            project.set_volume(&id, x);
            project.set_pan(&id, x);
            project.set_room_size(&id, x);
            project.set_feedback(&id, x);
            project.set_cutoff(&id, x);
            project.set_resonance(&id, x);
            project.set_velocity(&id, 1, 0, x);
        }
        assert_eq!(project, before);
    }

    #[test]
    fn test_load_repairs_non_finite_values() {
        let (mut project, id) = synth_project();
        project.settings.swing = f32::NAN;
        project.settings.bpm = f32::INFINITY;
        project.tracks[0].pan = f32::NAN;
        if let Some(f) = project.tracks[0].instrument.filter_mut() {
            f.cutoff = f32::NAN;
        }

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.stepdaw");
        project.save(&path).unwrap();
        let loaded = Project::load(&path).unwrap();
        assert_eq!(loaded.settings.swing, 0.0);
        assert_eq!(loaded.settings.bpm, DEFAULT_TEMPO);
        let t = loaded.track(&id).unwrap();
        assert_eq!(t.pan, 0.0);
        assert!(t.instrument.filter().unwrap().cutoff.is_finite());
    }

    #[test]
    fn test_load_keeps_first_clip_per_cell() {
        let mut project = Project::default();
        project.toggle_clip(0, 2);
        project.new_pattern();
        let mut duplicate = project.clips[0].clone();
        duplicate.id = 9;
        duplicate.pattern = 2;
        project.clips.push(duplicate);

        let mut loaded = Project::from_json(&project.to_json().unwrap()).unwrap();
        assert_eq!(loaded.clips.len(), 1);
        assert_eq!(loaded.clips[0].pattern, 1);
        loaded.toggle_clip(0, 2);
        assert!(loaded.clip_at(0, 2).is_none());
    }

    #[test]
    fn test_track_audible() {
        let mut project = Project::default();
        let (a, b) = (TrackId::from("1"), TrackId::from("2"));
        assert!(project.tracks.iter().all(|t| project.track_audible(t)));
        project.toggle_solo(&a);
        assert!(project.track_audible(project.track(&a).unwrap()));
        assert!(!project.track_audible(project.track(&b).unwrap()));
        project.toggle_mute(&a);
        assert!(!project.track_audible(project.track(&a).unwrap()));
    }

    #[test]
    fn test_apply_generated_steps() {
        let mut project = Project::default();
        let row = std::array::from_fn(|i| i % 2 == 0);
        project.apply_generated_steps(&HashMap::from([(1, row)]));
        assert_eq!(project.tracks[1].pattern(1).unwrap().steps, row);
        assert_eq!(project.tracks[0].pattern(1).unwrap().steps, [false; STEPS_PER_BAR]);
    }

    #[test]
    fn test_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("song.stepdaw");
        let mut project = Project::default();
        project.add_track("Acid", Instrument::Acid(Default::default()));
        let id = project.tracks[3].id.clone();
        project.toggle_note(&id, 1, note("A#3"), 5, NoteLength::Eighth);
        project.set_velocity(&id, 1, 5, 0.33);
        project.toggle_clip(3, 7);
        project.set_mode(Mode::Song);
        project.save(&path).unwrap();
        assert_eq!(Project::load(&path).unwrap(), project);
    }

    #[test]
    fn test_json_round_trip() {
        let mut project = Project::default();
        project.toggle_clip(0, 3);
        project.set_swing(0.4);
        let json = project.to_json().unwrap();
        assert!(json.contains("\"pat\""));
        assert_eq!(Project::from_json(&json).unwrap(), project);
    }

    #[test]
    fn test_json_rejects_bad_step_count() {
        let json = Project::default().to_json().unwrap();
        let bad = json.replacen("\"steps\": [\n", "\"steps\": [\n        true,\n", 1);
        assert!(Project::from_json(&bad).is_err());
    }
}
