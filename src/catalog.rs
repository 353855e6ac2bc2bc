//! Typed catalog of samples and instrument presets.

use std::collections::{BTreeSet, HashSet};
use std::error::Error;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::instrument::{AcidSettings, FilterSweep, Instrument, SynthSettings};
use crate::sample::SampleRef;

const BUILTIN: &str = include_str!("../assets/catalog.toml");

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SampleEntry {
    pub folder: String,
    pub name: String,
    pub sample: SampleRef,
}

impl SampleEntry {
    pub fn instrument(&self) -> Instrument {
        Instrument::Sampler(self.sample.clone())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresetKind {
    Synth,
    Acid,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PresetEntry {
    pub folder: String,
    pub name: String,
    pub kind: PresetKind,
    pub settings: SynthSettings,
    /// Only used by acid presets.
    #[serde(default)]
    pub sweep: FilterSweep,
}

impl PresetEntry {
    pub fn instrument(&self) -> Instrument {
        match self.kind {
            PresetKind::Synth => Instrument::Synth(self.settings.clone()),
            PresetKind::Acid => Instrument::Acid(AcidSettings {
                synth: self.settings.clone(),
                sweep: self.sweep,
            }),
        }
    }
}

/// A catalog entry of either kind.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Entry<'a> {
    Sample(&'a SampleEntry),
    Preset(&'a PresetEntry),
}

impl<'a> Entry<'a> {
    pub fn name(&self) -> &'a str {
        match *self {
            Self::Sample(x) => &x.name,
            Self::Preset(x) => &x.name,
        }
    }

    pub fn folder(&self) -> &'a str {
        match *self {
            Self::Sample(x) => &x.folder,
            Self::Preset(x) => &x.folder,
        }
    }

    pub fn instrument(&self) -> Instrument {
        match self {
            Self::Sample(x) => x.instrument(),
            Self::Preset(x) => x.instrument(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default, rename = "sample")]
    pub samples: Vec<SampleEntry>,
    #[serde(default, rename = "preset")]
    pub presets: Vec<PresetEntry>,
}

impl Catalog {
    /// The catalog shipped with the crate.
    pub fn builtin() -> Result<Self, Box<dyn Error>> {
        Self::from_toml(BUILTIN)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, Box<dyn Error>> {
        Self::from_toml(&std::fs::read_to_string(path)?)
    }

    /// Parse and validate a TOML catalog.
    pub fn from_toml(s: &str) -> Result<Self, Box<dyn Error>> {
        let catalog: Self = toml::from_str(s)?;
        catalog.validate()?;
        Ok(catalog)
    }

    fn validate(&self) -> Result<(), Box<dyn Error>> {
        let mut seen = HashSet::new();

        for entry in self.entries() {
            if entry.name().trim().is_empty() || entry.folder().trim().is_empty() {
                return Err("catalog entry has an empty name or folder".into())
            }
            if !seen.insert((entry.folder(), entry.name())) {
                return Err(format!("duplicate catalog entry: {}/{}",
                    entry.folder(), entry.name()).into())
            }
            let instrument = entry.instrument();
            if let Some(sample) = instrument.sample() {
                if !sample.has_loadable_extension() {
                    return Err(format!("unsupported sample type: {}", sample.as_str()).into())
                }
            }
            if instrument.clone().clamped() != instrument {
                return Err(format!("setting out of range in {}/{}",
                    entry.folder(), entry.name()).into())
            }
        }

        Ok(())
    }

    /// Every entry, samples first.
    pub fn entries(&self) -> impl Iterator<Item = Entry<'_>> {
        self.samples.iter().map(Entry::Sample)
            .chain(self.presets.iter().map(Entry::Preset))
    }

    pub fn folders(&self) -> BTreeSet<&str> {
        self.entries().map(|x| x.folder()).collect()
    }

    pub fn entries_in<'a>(&'a self, folder: &'a str) -> impl Iterator<Item = Entry<'a>> {
        self.entries().filter(move |x| x.folder() == folder)
    }

    pub fn find(&self, folder: &str, name: &str) -> Option<Entry<'_>> {
        self.entries().find(|x| x.folder() == folder && x.name() == name)
    }
}
