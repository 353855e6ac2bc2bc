//! Track instruments: settings, voice construction, and the per-track cache.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use fundsp::hacker32::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::dsp::{adsr_level, smooth, sweep_shape};
use crate::pitch::DEFAULT_NOTE;
use crate::project::{clamp_knob, Track, TrackId};
use crate::sample::{SampleBank, SampleRef};

pub const MIN_FILTER_CUTOFF: f32 = 20.0;
pub const MAX_FILTER_CUTOFF: f32 = 20_000.0;

/// Resonance is used as filter Q, which must stay above zero.
pub const MIN_FILTER_Q: f32 = 0.1;
pub const MAX_FILTER_RESONANCE: f32 = 20.0;

const MIN_ENV_TIME: f32 = 0.001;
const MAX_ENV_TIME: f32 = 10.0;

pub const MAX_SWEEP_OCTAVES: f32 = 8.0;

/// Caps the drive of the clipper as distortion approaches 1.
const MAX_DRIVE: f32 = 20.0;

/// Fade applied when a voice is cut short.
pub const SMOOTH_TIME: f32 = 0.01;

/// Release of sampler voices after their hold time.
const SAMPLER_RELEASE: f32 = 0.1;

/// Output level of a single synth voice, leaving headroom for chords.
const SYNTH_LEVEL: f32 = 0.4;

#[derive(Clone, Copy, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Waveform {
    Sine,
    Square,
    Sawtooth,
    Triangle,
}

impl Waveform {
    pub const VARIANTS: [Waveform; 4] =
        [Self::Sine, Self::Square, Self::Sawtooth, Self::Triangle];

    fn make_osc(&self, freq: f32) -> Net {
        Net::wrap(match self {
            Self::Sine => Box::new(sine_hz(freq)),
            Self::Square => Box::new(square_hz(freq)),
            Self::Sawtooth => Box::new(saw_hz(freq)),
            Self::Triangle => Box::new(triangle_hz(freq)),
        })
    }

    /// Returns the UI string.
    pub fn name(&self) -> &str {
        match self {
            Self::Sine => "Sine",
            Self::Square => "Square",
            Self::Sawtooth => "Sawtooth",
            Self::Triangle => "Triangle",
        }
    }
}

/// ADSR envelope. Times are in seconds.
#[derive(Clone, Copy, PartialEq, Debug, Serialize, Deserialize)]
pub struct Adsr {
    pub attack: f32,
    pub decay: f32,
    pub sustain: f32,
    pub release: f32,
}

impl Adsr {
    pub const fn new(attack: f32, decay: f32, sustain: f32, release: f32) -> Self {
        Self { attack, decay, sustain, release }
    }

    fn clamped(self) -> Self {
        let d = Self::default();
        Self {
            attack: clamp_knob(self.attack, d.attack, MIN_ENV_TIME, MAX_ENV_TIME),
            decay: clamp_knob(self.decay, d.decay, MIN_ENV_TIME, MAX_ENV_TIME),
            sustain: clamp_knob(self.sustain, d.sustain, 0.0, 1.0),
            release: clamp_knob(self.release, d.release, MIN_ENV_TIME, MAX_ENV_TIME),
        }
    }

    /// Envelope for a note released after `hold` seconds.
    fn make_net(&self, hold: f32) -> Net {
        let Self { attack, decay, sustain, release } = *self;
        Net::wrap(Box::new(envelope(move |t| {
            adsr_level(attack, decay, sustain, release, hold, t)
        })))
    }
}

impl Default for Adsr {
    fn default() -> Self {
        Self::new(0.01, 0.3, 0.4, 0.3)
    }
}

#[derive(Clone, Copy, PartialEq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterType {
    Lowpass,
    Highpass,
    Bandpass,
}

impl FilterType {
    pub const VARIANTS: [FilterType; 3] = [Self::Lowpass, Self::Highpass, Self::Bandpass];

    /// Filter with inputs signal, cutoff, Q.
    pub(crate) fn make_node(&self) -> Net {
        Net::wrap(match self {
            Self::Lowpass => Box::new(lowpass()),
            Self::Highpass => Box::new(highpass()),
            Self::Bandpass => Box::new(bandpass()),
        })
    }

    /// Returns the UI string for the filter type.
    pub fn name(&self) -> &str {
        match self {
            Self::Lowpass => "Lowpass",
            Self::Highpass => "Highpass",
            Self::Bandpass => "Bandpass",
        }
    }
}

#[derive(Clone, Copy, PartialEq, Debug, Serialize, Deserialize)]
pub struct FilterSettings {
    pub filter_type: FilterType,
    pub cutoff: f32,
    pub resonance: f32,
}

impl FilterSettings {
    fn clamped(self) -> Self {
        Self {
            filter_type: self.filter_type,
            cutoff: clamp_knob(self.cutoff, Self::default().cutoff,
                MIN_FILTER_CUTOFF, MAX_FILTER_CUTOFF),
            resonance: clamp_knob(self.resonance, Self::default().resonance,
                0.0, MAX_FILTER_RESONANCE),
        }
    }
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            filter_type: FilterType::Lowpass,
            cutoff: 2000.0,
            resonance: 1.0,
        }
    }
}

/// Subtractive voice settings shared by synth and acid tracks.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthSettings {
    pub waveform: Waveform,
    pub envelope: Adsr,
    pub filter: FilterSettings,
    /// 0 is clean, 1 is maximum drive.
    pub distortion: f32,
}

impl SynthSettings {
    fn clamped(self) -> Self {
        Self {
            waveform: self.waveform,
            envelope: self.envelope.clamped(),
            filter: self.filter.clamped(),
            distortion: clamp_knob(self.distortion, 0.0, 0.0, 1.0),
        }
    }
}

impl Default for SynthSettings {
    fn default() -> Self {
        Self {
            waveform: Waveform::Triangle,
            envelope: Default::default(),
            filter: Default::default(),
            distortion: 0.0,
        }
    }
}

/// Per-note cutoff envelope of an acid voice. Cutoff is multiplied by
/// `2^(octaves * level)`.
#[derive(Clone, Copy, PartialEq, Debug, Serialize, Deserialize)]
pub struct FilterSweep {
    pub octaves: f32,
    pub envelope: Adsr,
}

impl Default for FilterSweep {
    fn default() -> Self {
        Self {
            octaves: 3.0,
            envelope: Adsr::new(0.001, 0.2, 0.0, 0.1),
        }
    }
}

#[derive(Clone, PartialEq, Debug, Default, Serialize, Deserialize)]
pub struct AcidSettings {
    pub synth: SynthSettings,
    pub sweep: FilterSweep,
}

/// What a track plays.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub enum Instrument {
    /// One pitched sample, root C3.
    Sampler(SampleRef),
    /// Polyphonic subtractive synth.
    Synth(SynthSettings),
    /// Monophonic synth with a per-note filter sweep.
    Acid(AcidSettings),
}

impl Instrument {
    /// Returns the kind name used in catalogs and the UI.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Sampler(_) => "sampler",
            Self::Synth(_) => "synth",
            Self::Acid(_) => "acid",
        }
    }

    pub fn sample(&self) -> Option<&SampleRef> {
        match self {
            Self::Sampler(sample) => Some(sample),
            _ => None,
        }
    }

    pub fn filter(&self) -> Option<&FilterSettings> {
        match self {
            Self::Sampler(_) => None,
            Self::Synth(s) => Some(&s.filter),
            Self::Acid(a) => Some(&a.synth.filter),
        }
    }

    pub fn filter_mut(&mut self) -> Option<&mut FilterSettings> {
        match self {
            Self::Sampler(_) => None,
            Self::Synth(s) => Some(&mut s.filter),
            Self::Acid(a) => Some(&mut a.synth.filter),
        }
    }

    /// Filter type of the channel strip. Acid voices filter themselves and
    /// samplers are unfiltered.
    pub fn strip_filter(&self) -> Option<FilterType> {
        match self {
            Self::Synth(s) => Some(s.filter.filter_type),
            _ => None,
        }
    }

    pub fn clamped(self) -> Self {
        match self {
            Self::Sampler(sample) => Self::Sampler(sample),
            Self::Synth(s) => Self::Synth(s.clamped()),
            Self::Acid(a) => Self::Acid(AcidSettings {
                synth: a.synth.clamped(),
                sweep: FilterSweep {
                    octaves: clamp_knob(a.sweep.octaves, FilterSweep::default().octaves,
                        0.0, MAX_SWEEP_OCTAVES),
                    envelope: a.sweep.envelope.clamped(),
                },
            }),
        }
    }

    /// Whether two instruments build identical voices. Cutoff and resonance
    /// are live parameters and don't count.
    pub fn same_voice(&self, other: &Instrument) -> bool {
        fn mask(i: &Instrument) -> Instrument {
            let mut i = i.clone();
            if let Some(filter) = i.filter_mut() {
                filter.cutoff = 0.0;
                filter.resonance = 0.0;
            }
            i
        }
        mask(self) == mask(other)
    }
}

impl Default for Instrument {
    fn default() -> Self {
        Self::Synth(Default::default())
    }
}

/// Live cutoff and Q of a track, shared by its channel strip and its voices.
#[derive(Clone)]
pub struct FilterControl {
    pub cutoff: Shared,
    pub resonance: Shared,
}

impl FilterControl {
    pub fn new() -> Self {
        Self {
            cutoff: shared(MAX_FILTER_CUTOFF),
            resonance: shared(MIN_FILTER_Q),
        }
    }

    pub fn set(&self, filter: &FilterSettings) {
        self.cutoff.set(filter.cutoff.clamp(MIN_FILTER_CUTOFF, MAX_FILTER_CUTOFF));
        self.resonance.set(max(filter.resonance, MIN_FILTER_Q));
    }
}

impl Default for FilterControl {
    fn default() -> Self {
        Self::new()
    }
}

/// A note to schedule. Times are in seconds on the audio clock.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct NoteEvent {
    /// MIDI pitch, fractional after transposition.
    pub pitch: f32,
    pub velocity: f32,
    pub time: f64,
    /// Seconds until release.
    pub hold: f64,
}

/// Apply distortion as a clipper with drive `1 / (1 - amount)`.
fn distort(net: Net, amount: f32) -> Net {
    if amount <= 0.0 {
        net
    } else {
        let drive = min((1.0 - amount).recip(), MAX_DRIVE);
        (net * drive) >> Net::wrap(Box::new(shape_fn(clamp11)))
    }
}

/// Returns the voice net and its total duration.
fn synth_voice(settings: &SynthSettings, note: &NoteEvent) -> (Net, f64) {
    let osc = settings.waveform.make_osc(midi_hz(note.pitch));
    let env = settings.envelope.make_net(note.hold as f32);
    let net = distort(osc, settings.distortion) * env * (note.velocity * SYNTH_LEVEL);
    (net, note.hold + settings.envelope.release as f64)
}

fn acid_voice(settings: &AcidSettings, note: &NoteEvent, filter: &FilterControl
) -> (Net, f64) {
    let synth = &settings.synth;
    let hold = note.hold as f32;
    let osc = synth.waveform.make_osc(midi_hz(note.pitch));
    let sweep = settings.sweep.envelope.make_net(hold)
        >> Net::wrap(Box::new(sweep_shape(settings.sweep.octaves)));
    let cutoff = Net::wrap(Box::new(var(&filter.cutoff) >> smooth(SMOOTH_TIME))) * sweep
        >> Net::wrap(Box::new(shape_fn(|x| clamp(MIN_FILTER_CUTOFF, MAX_FILTER_CUTOFF, x))));
    let q = Net::wrap(Box::new(var(&filter.resonance) >> smooth(SMOOTH_TIME)));
    let filtered = (osc | cutoff | q) >> synth.filter.filter_type.make_node();
    let env = synth.envelope.make_net(hold);
    let net = distort(filtered, synth.distortion) * env * (note.velocity * SYNTH_LEVEL);
    let length = note.hold + max(synth.envelope.release, settings.sweep.envelope.release) as f64;
    (net, length)
}

fn sampler_voice(wave: &Arc<Wave>, note: &NoteEvent, sample_rate: f64) -> (Net, f64) {
    let ratio = 2.0_f64.powf((note.pitch - DEFAULT_NOTE.midi_pitch()) as f64 / 12.0);
    let speed = wave.sample_rate() / sample_rate * ratio;
    let length = wave.len() as f64 / wave.sample_rate() / ratio;
    let hold = note.hold as f32;
    let env = Net::wrap(Box::new(envelope(move |t| {
        adsr_level(0.0, 0.0, 1.0, SAMPLER_RELEASE, hold, t)
    })));
    let play = Net::wrap(Box::new(constant(speed as f32) >> resample(wavech(wave, 0, None))));
    (play * env * note.velocity, length.min(note.hold + SAMPLER_RELEASE as f64))
}

/// A scheduled voice event.
struct Voice {
    event_id: EventId,
    start: f64,
    end: f64,
}

impl Voice {
    /// End the voice at `time`, or at its start if it hasn't begun.
    fn truncate(&mut self, seq: &mut Sequencer, time: f64) {
        let end = time.max(self.start);
        if end < self.end {
            seq.edit(self.event_id, end, SMOOTH_TIME as f64);
            self.end = end;
        }
    }
}

/// The resolved sound source of one track and its scheduled voices.
pub struct TrackInstrument {
    instrument: Instrument,
    voices: VecDeque<Voice>,
}

impl TrackInstrument {
    fn new(instrument: Instrument) -> Self {
        Self {
            instrument,
            voices: VecDeque::new(),
        }
    }

    pub fn instrument(&self) -> &Instrument {
        &self.instrument
    }

    /// Number of voices sounding or scheduled at `time`.
    pub fn voice_count(&self, time: f64) -> usize {
        self.voices.iter().filter(|v| v.end > time).count()
    }

    /// Schedule a note. Returns false if the sound source isn't ready.
    /// Voices are multiplied by `gate` when given.
    pub fn play(&mut self, ctx: &mut VoiceContext, note: &NoteEvent) -> bool {
        self.voices.retain(|v| v.end > note.time);

        let (net, length) = match &self.instrument {
            Instrument::Sampler(sample) => match ctx.samples.get(sample) {
                Some(wave) => sampler_voice(&wave, note, ctx.sample_rate),
                None => {
                    trace!(sample = sample.as_str(), "sample not ready, skipping trigger");
                    return false
                }
            },
            Instrument::Synth(settings) => synth_voice(settings, note),
            Instrument::Acid(settings) => {
                for voice in self.voices.iter_mut() {
                    voice.truncate(ctx.seq, note.time);
                }
                acid_voice(settings, note, ctx.filter)
            }
        };

        while self.voices.len() >= Ord::max(ctx.max_polyphony, 1) {
            if let Some(mut voice) = self.voices.pop_front() {
                voice.truncate(ctx.seq, note.time);
            }
        }

        let net = match ctx.gate {
            Some(gate) => net * Net::wrap(Box::new(var(gate) >> smooth(SMOOTH_TIME))),
            None => net,
        };
        let end = note.time + length;
        let event_id = ctx.seq.push(note.time, end, Fade::Smooth, 0.0, SMOOTH_TIME as f64,
            Box::new(net));
        self.voices.push_back(Voice { event_id, start: note.time, end });
        true
    }

    /// Cut every voice at `time`. Voices that haven't started never sound.
    pub fn cut(&mut self, seq: &mut Sequencer, time: f64) {
        for mut voice in self.voices.drain(..) {
            voice.truncate(seq, time);
        }
    }
}

/// Everything a voice needs from the rest of the engine.
pub struct VoiceContext<'a> {
    pub seq: &'a mut Sequencer,
    pub filter: &'a FilterControl,
    pub samples: &'a SampleBank,
    pub gate: Option<&'a Shared>,
    pub sample_rate: f64,
    pub max_polyphony: usize,
}

/// Caches one instrument per track id.
pub struct InstrumentRack {
    instruments: HashMap<TrackId, TrackInstrument>,
}

impl InstrumentRack {
    pub fn new() -> Self {
        Self {
            instruments: HashMap::new(),
        }
    }

    /// Returns the track's instrument, building it on first use. If the
    /// track's instrument changed, the stale one is cut before replacement.
    pub fn resolve(&mut self, track: &Track, seq: &mut Sequencer, now: f64
    ) -> &mut TrackInstrument {
        let stale = self.instruments.get(&track.id)
            .is_some_and(|x| !x.instrument.same_voice(&track.instrument));

        if stale {
            if let Some(mut old) = self.instruments.remove(&track.id) {
                debug!(track = track.id.as_str(), from = old.instrument.kind(),
                    to = track.instrument.kind(), "replacing instrument");
                old.cut(seq, now);
            }
        }

        let entry = self.instruments.entry(track.id.clone())
            .or_insert_with(|| TrackInstrument::new(track.instrument.clone()));
        entry.instrument = track.instrument.clone();
        entry
    }

    pub fn get(&self, id: &TrackId) -> Option<&TrackInstrument> {
        self.instruments.get(id)
    }

    pub fn get_mut(&mut self, id: &TrackId) -> Option<&mut TrackInstrument> {
        self.instruments.get_mut(id)
    }

    /// Remove a track's instrument, cutting its voices.
    pub fn dispose(&mut self, id: &TrackId, seq: &mut Sequencer, now: f64) {
        if let Some(mut old) = self.instruments.remove(id) {
            old.cut(seq, now);
        }
    }

    pub fn track_ids(&self) -> Vec<TrackId> {
        self.instruments.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }
}

impl Default for InstrumentRack {
    fn default() -> Self {
        Self::new()
    }
}
