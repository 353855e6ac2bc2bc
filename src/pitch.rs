//! Note names, the piano roll palette, and note lengths.

use std::fmt;
use std::str::FromStr;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::timing::STEPS_PER_BAR;

/// Number of rows in the piano roll.
pub const PALETTE_SIZE: usize = 25;

/// Pitch fired by a plain step trigger.
pub const DEFAULT_NOTE: Note = Note {
    nominal: Nominal::C,
    sharp: false,
    octave: 3,
};

/// Lowest note of the piano roll.
const PALETTE_BOTTOM: Note = DEFAULT_NOTE;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum Nominal {
    C, D, E, F, G, A, B
}

impl Nominal {
    const VARIANTS: [Nominal; 7] = [
        Nominal::C, Nominal::D, Nominal::E, Nominal::F,
        Nominal::G, Nominal::A, Nominal::B,
    ];

    /// Semitones above C.
    fn semitones(&self) -> i32 {
        match self {
            Nominal::C => 0,
            Nominal::D => 2,
            Nominal::E => 4,
            Nominal::F => 5,
            Nominal::G => 7,
            Nominal::A => 9,
            Nominal::B => 11,
        }
    }

    pub fn char(&self) -> char {
        match self {
            Nominal::C => 'C',
            Nominal::D => 'D',
            Nominal::E => 'E',
            Nominal::F => 'F',
            Nominal::G => 'G',
            Nominal::A => 'A',
            Nominal::B => 'B',
        }
    }

    fn from_char(c: char) -> Option<Self> {
        Self::VARIANTS.into_iter().find(|n| n.char() == c.to_ascii_uppercase())
    }

    /// E and B have no sharp in note names.
    fn takes_sharp(&self) -> bool {
        !matches!(self, Nominal::E | Nominal::B)
    }
}

/// A twelve-tone note name with octave, e.g. `C#3`.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Note {
    pub nominal: Nominal,
    pub sharp: bool,
    pub octave: i8,
}

impl Note {
    /// Returns the note with the given MIDI pitch, spelled with sharps.
    pub fn from_midi(pitch: i32) -> Self {
        let octave = pitch.div_euclid(12) - 1;
        let semitone = pitch.rem_euclid(12);
        let (nominal, sharp) = Nominal::VARIANTS.iter().rev()
            .find(|n| n.semitones() <= semitone)
            .map(|n| (*n, n.semitones() < semitone))
            .unwrap_or((Nominal::C, false));
        Self {
            nominal,
            sharp,
            octave: octave as i8,
        }
    }

    /// MIDI note number. C4 is 60.
    pub fn midi(&self) -> i32 {
        (self.octave as i32 + 1) * 12 + self.nominal.semitones() + self.sharp as i32
    }

    pub fn midi_pitch(&self) -> f32 {
        self.midi() as f32
    }

    /// Row of this note in the piano roll, top row first.
    pub fn palette_row(&self) -> Option<usize> {
        let offset = self.midi() - PALETTE_BOTTOM.midi();
        if (0..PALETTE_SIZE as i32).contains(&offset) {
            Some(PALETTE_SIZE - 1 - offset as usize)
        } else {
            None
        }
    }

    /// Note in the given piano roll row, top row first.
    pub fn at_palette_row(row: usize) -> Option<Self> {
        (row < PALETTE_SIZE)
            .then(|| Self::from_midi(PALETTE_BOTTOM.midi() + (PALETTE_SIZE - 1 - row) as i32))
    }

    pub fn in_palette(&self) -> bool {
        self.palette_row().is_some()
    }
}

impl Default for Note {
    fn default() -> Self {
        DEFAULT_NOTE
    }
}

impl fmt::Display for Note {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sharp = if self.sharp { "#" } else { "" };
        write!(f, "{}{}{}", self.nominal.char(), sharp, self.octave)
    }
}

impl FromStr for Note {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.trim().chars();
        let nominal = chars.next()
            .and_then(Nominal::from_char)
            .ok_or_else(|| format!("invalid note name: {s:?}"))?;
        let rest = chars.as_str();
        let (sharp, octave) = match rest.strip_prefix('#') {
            Some(octave) => (true, octave),
            None => (false, rest),
        };
        if sharp && !nominal.takes_sharp() {
            return Err(format!("invalid note name: {s:?}"))
        }
        let octave = octave.parse::<i8>()
            .map_err(|_| format!("invalid octave in note name: {s:?}"))?;
        Ok(Self { nominal, sharp, octave })
    }
}

impl TryFrom<String> for Note {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Note> for String {
    fn from(value: Note) -> Self {
        value.to_string()
    }
}

/// Returns the piano roll palette, top row (C5) first.
pub fn palette() -> Vec<Note> {
    (0..PALETTE_SIZE).filter_map(Note::at_palette_row).collect()
}

/// Supported note lengths, in sixteenth-note steps.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash, Default, Serialize, Deserialize)]
pub enum NoteLength {
    #[default]
    #[serde(rename = "16n")]
    Sixteenth,
    #[serde(rename = "8n")]
    Eighth,
    #[serde(rename = "4n")]
    Quarter,
    #[serde(rename = "2n")]
    Half,
    #[serde(rename = "1n")]
    Whole,
}

impl NoteLength {
    pub const VARIANTS: [NoteLength; 5] = [
        Self::Sixteenth, Self::Eighth, Self::Quarter, Self::Half, Self::Whole,
    ];

    pub fn steps(&self) -> u8 {
        match self {
            Self::Sixteenth => 1,
            Self::Eighth => 2,
            Self::Quarter => 4,
            Self::Half => 8,
            Self::Whole => 16,
        }
    }

    /// Nearest supported length to a step count. Ties go to the longer length.
    pub fn quantize(steps: f32) -> Self {
        Self::VARIANTS.into_iter().rev()
            .min_by_key(|x| OrderedFloat((x.steps() as f32 - steps).abs()))
            .unwrap_or_default()
    }

    /// Longest length no longer than `self` that ends within the bar when
    /// started at `step`.
    pub fn fit(self, step: u8) -> Self {
        let room = (STEPS_PER_BAR as u8).saturating_sub(step);
        Self::VARIANTS.into_iter().rev()
            .find(|x| x.steps() <= self.steps() && x.steps() <= room)
            .unwrap_or(Self::Sixteenth)
    }

    /// Returns the UI string.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sixteenth => "1/16",
            Self::Eighth => "1/8",
            Self::Quarter => "1/4",
            Self::Half => "1/2",
            Self::Whole => "1 bar",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A4: Note = Note {
        nominal: Nominal::A,
        sharp: false,
        octave: 4,
    };

    #[test]
    fn test_note_midi() {
        assert_eq!(A4.midi(), 69);
        assert_eq!(DEFAULT_NOTE.midi(), 48);
        assert_eq!(Note { sharp: true, ..A4 }.midi(), 70);
        assert_eq!(Note { nominal: Nominal::C, ..A4 }.midi(), 60);
        assert_eq!(Note::from_midi(61), Note { nominal: Nominal::C, sharp: true, octave: 4 });
        assert_eq!(Note::from_midi(71), Note { nominal: Nominal::B, ..A4 });
        assert_eq!(Note::from_midi(-1).octave, -2);
    }

    #[test]
    fn test_note_display() {
        assert_eq!(format!("{}", A4), "A4");
        assert_eq!(format!("{}", Note { sharp: true, ..A4 }), "A#4");
        assert_eq!(format!("{}", DEFAULT_NOTE), "C3");
    }

    #[test]
    fn test_note_parse() {
        assert_eq!("A4".parse::<Note>(), Ok(A4));
        assert_eq!("a#4".parse::<Note>(), Ok(Note { sharp: true, ..A4 }));
        assert_eq!("C-1".parse::<Note>().map(|n| n.midi()), Ok(0));
        assert!("E#4".parse::<Note>().is_err());
        assert!("H2".parse::<Note>().is_err());
        assert!("C".parse::<Note>().is_err());
    }

    #[test]
    fn test_palette() {
        let notes = palette();
        assert_eq!(notes.len(), PALETTE_SIZE);
        assert_eq!(notes[0].to_string(), "C5");
        assert_eq!(notes[2].to_string(), "A#4");
        assert_eq!(notes[PALETTE_SIZE - 1], DEFAULT_NOTE);
        assert_eq!(A4.palette_row(), Some(3));
        assert_eq!("D5".parse::<Note>().unwrap().palette_row(), None);
        assert_eq!(Note::at_palette_row(PALETTE_SIZE), None);
    }

    #[test]
    fn test_length_quantize() {
        assert_eq!(NoteLength::quantize(1.2), NoteLength::Sixteenth);
        assert_eq!(NoteLength::quantize(3.0), NoteLength::Quarter);
        assert_eq!(NoteLength::quantize(6.0), NoteLength::Half);
        assert_eq!(NoteLength::quantize(0.0), NoteLength::Sixteenth);
        assert_eq!(NoteLength::quantize(40.0), NoteLength::Whole);
    }

    #[test]
    fn test_length_fit() {
        assert_eq!(NoteLength::Whole.fit(0), NoteLength::Whole);
        assert_eq!(NoteLength::Whole.fit(2), NoteLength::Half);
        assert_eq!(NoteLength::Quarter.fit(13), NoteLength::Eighth);
        assert_eq!(NoteLength::Sixteenth.fit(15), NoteLength::Sixteenth);
    }

    #[test]
    fn test_length_serde() {
        assert_eq!(serde_json::to_string(&NoteLength::Quarter).unwrap(), "\"4n\"");
        assert_eq!(serde_json::from_str::<NoteLength>("\"1n\"").unwrap(), NoteLength::Whole);
        assert_eq!(serde_json::to_string(&A4).unwrap(), "\"A4\"");
    }
}
