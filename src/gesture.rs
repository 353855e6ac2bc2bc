//! Drag gestures as small state machines.
//!
//! A gesture captures what it needs when it starts, then turns cumulative
//! pointer displacement into project edits.

use crate::pitch::{Note, NoteLength, PALETTE_SIZE};
use crate::project::{NoteId, PatternId, PianoNote, Project, TrackId};
use crate::timing::STEPS_PER_BAR;

/// An edit produced by a note drag.
#[derive(Clone, Debug, PartialEq)]
pub enum NoteEdit {
    Move { track: TrackId, pattern: PatternId, id: NoteId, note: Note, step: u8 },
    Resize { track: TrackId, pattern: PatternId, id: NoteId, length: NoteLength },
}

impl NoteEdit {
    pub fn apply(&self, project: &mut Project) {
        match self {
            Self::Move { track, pattern, id, note, step } =>
                project.move_note(track, *pattern, *id, *note, *step),
            Self::Resize { track, pattern, id, length } =>
                project.resize_note(track, *pattern, *id, *length),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Default)]
pub enum NoteDrag {
    #[default]
    Idle,
    Moving {
        track: TrackId,
        pattern: PatternId,
        note_id: NoteId,
        origin_step: u8,
        origin_row: usize,
        length: NoteLength,
    },
    Resizing {
        track: TrackId,
        pattern: PatternId,
        note_id: NoteId,
        step: u8,
        origin_length: NoteLength,
    },
}

impl NoteDrag {
    /// Start dragging a note's body. Notes outside the palette can't move.
    pub fn start_move(track: &TrackId, pattern: PatternId, note: &PianoNote) -> Self {
        match note.note.palette_row() {
            Some(row) => Self::Moving {
                track: track.clone(),
                pattern,
                note_id: note.id,
                origin_step: note.step,
                origin_row: row,
                length: note.length,
            },
            None => Self::Idle,
        }
    }

    /// Start dragging a note's right edge.
    pub fn start_resize(track: &TrackId, pattern: PatternId, note: &PianoNote) -> Self {
        Self::Resizing {
            track: track.clone(),
            pattern,
            note_id: note.id,
            step: note.step,
            origin_length: note.length,
        }
    }

    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Idle)
    }

    /// Returns the edit for a cumulative displacement in grid cells.
    /// Positive `dy` moves down the palette, toward lower pitches.
    pub fn drag(&self, dx: f32, dy: f32) -> Option<NoteEdit> {
        match self {
            Self::Idle => None,
            Self::Moving { track, pattern, note_id, origin_step, origin_row, length } => {
                let max_step = (STEPS_PER_BAR as u8 - length.steps()) as f32;
                let step = (*origin_step as f32 + dx.round()).clamp(0.0, max_step) as u8;
                let row = (*origin_row as f32 + dy.round())
                    .clamp(0.0, (PALETTE_SIZE - 1) as f32) as usize;
                Some(NoteEdit::Move {
                    track: track.clone(),
                    pattern: *pattern,
                    id: *note_id,
                    note: Note::at_palette_row(row)?,
                    step,
                })
            }
            Self::Resizing { track, pattern, note_id, step, origin_length } => {
                let steps = origin_length.steps() as f32 + dx.round();
                Some(NoteEdit::Resize {
                    track: track.clone(),
                    pattern: *pattern,
                    id: *note_id,
                    length: NoteLength::quantize(steps).fit(*step),
                })
            }
        }
    }

    pub fn end(&mut self) {
        *self = Self::Idle;
    }
}

/// An edit produced by a paint drag.
#[derive(Clone, Debug, PartialEq)]
pub enum PaintEdit {
    Step { track: TrackId, pattern: PatternId, step: usize, value: bool },
    Velocity { track: TrackId, pattern: PatternId, step: usize, velocity: f32 },
}

impl PaintEdit {
    pub fn apply(&self, project: &mut Project) {
        match self {
            Self::Step { track, pattern, step, value } =>
                project.set_step(track, *pattern, *step, *value),
            Self::Velocity { track, pattern, step, velocity } =>
                project.set_velocity(track, *pattern, *step, *velocity),
        }
    }
}

/// Drag across step cells.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum PaintDrag {
    #[default]
    Idle,
    /// Sets every cell entered to the value chosen by the first cell, once.
    Steps {
        track: TrackId,
        pattern: PatternId,
        value: bool,
        visited: [bool; STEPS_PER_BAR],
    },
    /// Sets each cell's velocity to the pointer level.
    Velocity {
        track: TrackId,
        pattern: PatternId,
    },
}

impl PaintDrag {
    /// Start painting steps from a cell whose current state is `current`.
    /// Returns the edit for the first cell.
    pub fn start_steps(track: &TrackId, pattern: PatternId, step: usize, current: bool
    ) -> (Self, Option<PaintEdit>) {
        let mut drag = Self::Steps {
            track: track.clone(),
            pattern,
            value: !current,
            visited: [false; STEPS_PER_BAR],
        };
        let edit = drag.enter(step, 0.0);
        (drag, edit)
    }

    pub fn start_velocity(track: &TrackId, pattern: PatternId) -> Self {
        Self::Velocity { track: track.clone(), pattern }
    }

    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Idle)
    }

    /// Pointer entered `step`. `level` is the vertical position in 0..1,
    /// used by velocity painting.
    pub fn enter(&mut self, step: usize, level: f32) -> Option<PaintEdit> {
        if step >= STEPS_PER_BAR {
            return None
        }
        match self {
            Self::Idle => None,
            Self::Steps { track, pattern, value, visited } => {
                if visited[step] {
                    None
                } else {
                    visited[step] = true;
                    Some(PaintEdit::Step {
                        track: track.clone(),
                        pattern: *pattern,
                        step,
                        value: *value,
                    })
                }
            }
            Self::Velocity { track, pattern } => Some(PaintEdit::Velocity {
                track: track.clone(),
                pattern: *pattern,
                step,
                velocity: level.clamp(0.0, 1.0),
            }),
        }
    }

    pub fn end(&mut self) {
        *self = Self::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::Instrument;

    fn project_with_note(step: u8, length: NoteLength) -> (Project, TrackId, NoteId) {
        let mut project = Project::empty();
        let track = project.add_track("Keys", Instrument::default());
        let id = project.add_note(&track, 1, "E3".parse().unwrap(), step, length).unwrap();
        (project, track, id)
    }

    fn get_note(project: &Project, track: &TrackId, id: NoteId) -> PianoNote {
        project.track(track).unwrap().pattern(1).unwrap().note(id).unwrap().clone()
    }

    #[test]
    fn test_resize_quantizes() {
        let (mut project, track, id) = project_with_note(2, NoteLength::Quarter);
        let drag = NoteDrag::start_resize(&track, 1, &get_note(&project, &track, id));
        drag.drag(2.0, 0.0).unwrap().apply(&mut project);
        let note = get_note(&project, &track, id);
        assert_eq!(note.length, NoteLength::Half);
        assert_eq!(note.step, 2);
        assert_eq!(note.note, "E3".parse().unwrap());
    }

    #[test]
    fn test_resize_clamps_to_bar() {
        let (project, track, id) = project_with_note(12, NoteLength::Quarter);
        let drag = NoteDrag::start_resize(&track, 1, &get_note(&project, &track, id));
        let Some(NoteEdit::Resize { length, .. }) = drag.drag(20.0, 0.0) else { panic!() };
        assert_eq!(length, NoteLength::Quarter);
        let Some(NoteEdit::Resize { length, .. }) = drag.drag(-10.0, 0.0) else { panic!() };
        assert_eq!(length, NoteLength::Sixteenth);
    }

    #[test]
    fn test_move_clamps() {
        let (mut project, track, id) = project_with_note(2, NoteLength::Quarter);
        let mut drag = NoteDrag::start_move(&track, 1, &get_note(&project, &track, id));
        assert!(drag.is_active());

        // E3 is row 20; two rows up is F#3
        drag.drag(1.4, -2.0).unwrap().apply(&mut project);
        let note = get_note(&project, &track, id);
        assert_eq!((note.step, note.note), (3, "F#3".parse().unwrap()));

        // displacement is cumulative from the gesture start
        drag.drag(40.0, 40.0).unwrap().apply(&mut project);
        let note = get_note(&project, &track, id);
        assert_eq!((note.step, note.note), (12, "C3".parse().unwrap()));

        drag.drag(-40.0, -40.0).unwrap().apply(&mut project);
        let note = get_note(&project, &track, id);
        assert_eq!((note.step, note.note), (0, "C5".parse().unwrap()));

        drag.end();
        assert_eq!(drag.drag(1.0, 1.0), None);
    }

    #[test]
    fn test_paint_steps() {
        let mut project = Project::default();
        let snare = TrackId::from("2");
        // step 4 is on, so the drag erases
        let (mut drag, edit) = PaintDrag::start_steps(&snare, 1, 4, true);
        edit.unwrap().apply(&mut project);
        for step in [5, 6, 5, 12, 4] {
            if let Some(edit) = drag.enter(step, 0.0) {
                edit.apply(&mut project);
            }
        }
        assert_eq!(drag.enter(6, 0.0), None);
        assert!(project.tracks[1].pattern(1).unwrap().is_empty());
    }

    #[test]
    fn test_paint_velocity() {
        let mut project = Project::default();
        let kick = TrackId::from("1");
        let mut drag = PaintDrag::start_velocity(&kick, 1);
        drag.enter(0, 0.5).unwrap().apply(&mut project);
        drag.enter(0, 1.5).unwrap().apply(&mut project);
        drag.enter(1, 0.2).unwrap().apply(&mut project);
        let v = project.tracks[0].pattern(1).unwrap().velocities;
        assert_eq!((v[0], v[1]), (1.0, 0.2));
        drag.end();
        assert!(!drag.is_active());
    }
}
