//! Commands from a UI thread to the engine.

use std::collections::HashMap;
use std::error::Error;
use std::path::PathBuf;

use rtrb::{Consumer, Producer, RingBuffer};

use crate::gesture::{NoteEdit, PaintEdit};
use crate::instrument::Instrument;
use crate::pitch::{Note, NoteLength};
use crate::project::{Mode, NoteId, PatternId, Project, TrackId};
use crate::timing::STEPS_PER_BAR;

#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    TogglePlay,
    Rewind,
    /// Play one sixteenth on a track right away.
    Audition { track: TrackId, note: Note },
    Save(PathBuf),
    Load(PathBuf),
    /// Raw reply from a pattern generator.
    PatternResponse(String),
    /// Reply from an advice request.
    Advice(String),

    ToggleStep { track: TrackId, pattern: PatternId, step: usize },
    SetStep { track: TrackId, pattern: PatternId, step: usize, value: bool },
    SetVelocity { track: TrackId, pattern: PatternId, step: usize, velocity: f32 },
    ToggleNote { track: TrackId, pattern: PatternId, note: Note, step: u8, length: NoteLength },
    AddNote { track: TrackId, pattern: PatternId, note: Note, step: u8, length: NoteLength },
    RemoveNoteAt { track: TrackId, pattern: PatternId, note: Note, step: u8 },
    SetNoteVelocity { track: TrackId, pattern: PatternId, id: NoteId, velocity: f32 },
    NoteEdit(NoteEdit),
    Paint(PaintEdit),
    NewPattern,
    ClearPattern,
    SelectPattern(PatternId),
    ToggleClip { track_index: usize, bar: u8 },
    AddTrack { name: String, instrument: Instrument },
    RemoveTrack(TrackId),
    ReplaceInstrument { track: TrackId, instrument: Instrument },
    RenameTrack { track: TrackId, name: String },
    SetVolume { track: TrackId, volume: f32 },
    SetPan { track: TrackId, pan: f32 },
    ToggleMute(TrackId),
    ToggleSolo(TrackId),
    SetReverb { track: TrackId, enabled: bool },
    SetRoomSize { track: TrackId, size: f32 },
    SetDelay { track: TrackId, enabled: bool },
    SetFeedback { track: TrackId, feedback: f32 },
    SetCutoff { track: TrackId, cutoff: f32 },
    SetResonance { track: TrackId, resonance: f32 },
    SetBpm(f32),
    SetSwing(f32),
    SetMode(Mode),
    SetMasterPitch(f32),
    ApplyGeneratedSteps(HashMap<usize, [bool; STEPS_PER_BAR]>),
}

impl Command {
    /// Whether this command is a pure project edit.
    pub fn is_edit(&self) -> bool {
        !matches!(self, Self::TogglePlay | Self::Rewind | Self::Audition { .. }
            | Self::Save(_) | Self::Load(_) | Self::PatternResponse(_) | Self::Advice(_))
    }

    /// Apply a project edit. Other commands leave the project unchanged.
    pub fn apply(&self, p: &mut Project) {
        match self {
            Self::TogglePlay | Self::Rewind | Self::Audition { .. }
                | Self::Save(_) | Self::Load(_)
                | Self::PatternResponse(_) | Self::Advice(_) => (),

            Self::ToggleStep { track, pattern, step } => p.toggle_step(track, *pattern, *step),
            Self::SetStep { track, pattern, step, value } =>
                p.set_step(track, *pattern, *step, *value),
            Self::SetVelocity { track, pattern, step, velocity } =>
                p.set_velocity(track, *pattern, *step, *velocity),
            Self::ToggleNote { track, pattern, note, step, length } => {
                p.toggle_note(track, *pattern, *note, *step, *length);
            }
            Self::AddNote { track, pattern, note, step, length } => {
                p.add_note(track, *pattern, *note, *step, *length);
            }
            Self::RemoveNoteAt { track, pattern, note, step } =>
                p.remove_note_at(track, *pattern, *note, *step),
            Self::SetNoteVelocity { track, pattern, id, velocity } =>
                p.set_note_velocity(track, *pattern, *id, *velocity),
            Self::NoteEdit(edit) => edit.apply(p),
            Self::Paint(edit) => edit.apply(p),
            Self::NewPattern => {
                p.new_pattern();
            }
            Self::ClearPattern => p.clear_pattern(),
            Self::SelectPattern(id) => p.select_pattern(*id),
            Self::ToggleClip { track_index, bar } => p.toggle_clip(*track_index, *bar),
            Self::AddTrack { name, instrument } => {
                p.add_track(name, instrument.clone());
            }
            Self::RemoveTrack(id) => p.remove_track(id),
            Self::ReplaceInstrument { track, instrument } =>
                p.replace_instrument(track, instrument.clone()),
            Self::RenameTrack { track, name } => p.rename_track(track, name),
            Self::SetVolume { track, volume } => p.set_volume(track, *volume),
            Self::SetPan { track, pan } => p.set_pan(track, *pan),
            Self::ToggleMute(id) => p.toggle_mute(id),
            Self::ToggleSolo(id) => p.toggle_solo(id),
            Self::SetReverb { track, enabled } => p.set_reverb(track, *enabled),
            Self::SetRoomSize { track, size } => p.set_room_size(track, *size),
            Self::SetDelay { track, enabled } => p.set_delay(track, *enabled),
            Self::SetFeedback { track, feedback } => p.set_feedback(track, *feedback),
            Self::SetCutoff { track, cutoff } => p.set_cutoff(track, *cutoff),
            Self::SetResonance { track, resonance } => p.set_resonance(track, *resonance),
            Self::SetBpm(bpm) => p.set_bpm(*bpm),
            Self::SetSwing(swing) => p.set_swing(*swing),
            Self::SetMode(mode) => p.set_mode(*mode),
            Self::SetMasterPitch(cents) => p.set_master_pitch(*cents),
            Self::ApplyGeneratedSteps(steps) => p.apply_generated_steps(steps),
        }
    }
}

/// Sending half of a command queue.
pub struct CommandSender {
    producer: Producer<Command>,
}

impl CommandSender {
    pub fn send(&mut self, cmd: Command) -> Result<(), Box<dyn Error>> {
        self.producer.push(cmd).map_err(|_| "command queue is full".into())
    }
}

/// Receiving half of a command queue.
pub struct CommandReceiver {
    consumer: Consumer<Command>,
}

impl CommandReceiver {
    /// Take every queued command, oldest first.
    pub fn drain(&mut self) -> Vec<Command> {
        let mut commands = Vec::with_capacity(self.consumer.slots());
        while let Ok(cmd) = self.consumer.pop() {
            commands.push(cmd);
        }
        commands
    }
}

pub fn command_queue(capacity: usize) -> (CommandSender, CommandReceiver) {
    let (producer, consumer) = RingBuffer::new(capacity);
    (CommandSender { producer }, CommandReceiver { consumer })
}
