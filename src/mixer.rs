//! Per-track channel strips and the master bus.
//!
//! The graph is built once. Each of `MAX_CHANNELS` slots holds a voice
//! sequencer feeding a channel strip, and a strip is only rebuilt when its
//! topology changes. Everything else is driven through `Shared` values.

use std::collections::{HashMap, HashSet};
use std::error::Error;

use fundsp::hacker32::*;
use tracing::{debug, warn};

use crate::dsp::{limiter, peak_meter};
use crate::instrument::{FilterControl, FilterType, MIN_FILTER_CUTOFF, MIN_FILTER_Q};
use crate::project::{Project, TrackId};
use crate::timing::eighth_interval;

pub const MAX_CHANNELS: usize = 32;

/// Ramp time for gain, pan and filter parameters.
const PARAM_TIME: f32 = 0.05;
/// Ramp time for effect wet levels and delay settings.
const WET_TIME: f32 = 0.1;
/// Crossfade time when a strip is rebuilt.
const REBUILD_TIME: f32 = 0.05;

const REVERB_WET: f32 = 0.35;
const DELAY_WET: f32 = 0.25;
const REVERB_DECAY: f32 = 2.5;
const MIN_ROOM_SIZE: f32 = 10.0;
const MAX_ROOM_SIZE: f32 = 40.0;
const MIN_DELAY_TIME: f32 = 0.01;
const MAX_DELAY_TIME: f32 = 0.5;

const METER_RELEASE: f32 = 0.3;
const MASTER_CEILING_DB: f32 = -0.3;

/// Live parameters of one channel strip.
#[derive(Clone)]
pub struct ChannelParams {
    pub gain: Shared,
    pub pan: Shared,
    pub filter: FilterControl,
    pub reverb_wet: Shared,
    pub delay_wet: Shared,
    pub delay_time: Shared,
    pub feedback: Shared,
    /// Peak output level, linear.
    pub level: Shared,
}

impl ChannelParams {
    pub fn new() -> Self {
        Self {
            gain: shared(0.0),
            pan: shared(0.0),
            filter: FilterControl::new(),
            reverb_wet: shared(0.0),
            delay_wet: shared(0.0),
            delay_time: shared(eighth_interval(120.0) as f32),
            feedback: shared(0.0),
            level: shared(0.0),
        }
    }
}

impl Default for ChannelParams {
    fn default() -> Self {
        Self::new()
    }
}

/// The parts of a strip that can't change without rebuilding it.
#[derive(Clone, Copy, PartialEq, Debug)]
struct StripLayout {
    filter: Option<FilterType>,
    room_size: f32,
}

/// Silent strip for unassigned slots.
fn placeholder() -> Box<dyn AudioUnit> {
    Box::new(sink() | zero() | zero())
}

/// Mix a mono effect with its dry input.
fn mono_wet(fx: Net, wet: &Shared) -> Net {
    let dry_gain = var(wet) >> follow(WET_TIME) >> shape_fn(|w| 1.0 - w);
    let wet_gain = var(wet) >> follow(WET_TIME);
    Net::wrap(Box::new(pass() * dry_gain)) & (fx * Net::wrap(Box::new(wet_gain)))
}

/// Mono in, stereo out.
fn reverb_wet(room_size: f32, wet: &Shared) -> Net {
    let dry_gain = var(wet) >> follow(WET_TIME) >> shape_fn(|w| 1.0 - w) >> split::<U2>();
    let wet_gain = var(wet) >> follow(WET_TIME) >> split::<U2>();
    let room = lerp(MIN_ROOM_SIZE, MAX_ROOM_SIZE, room_size.clamp(0.0, 1.0));
    let reverb = split::<U2>()
        >> reverb2_stereo(room, REVERB_DECAY, 0.5, 0.5,
            lowpole_hz(5000.0) >> highpole_hz(80.0));
    Net::wrap(Box::new(split::<U2>() * dry_gain))
        & Net::wrap(Box::new(reverb * wet_gain))
}

/// Build the strip for a layout. Instrument signal in, stereo out.
fn channel_strip(layout: &StripLayout, params: &ChannelParams) -> Box<dyn AudioUnit> {
    let filtered = match layout.filter {
        Some(filter_type) => {
            // the smoothers start at zero
            let cutoff = var(&params.filter.cutoff) >> follow(PARAM_TIME)
                >> shape_fn(|x| max(x, MIN_FILTER_CUTOFF));
            let q = var(&params.filter.resonance) >> follow(PARAM_TIME)
                >> shape_fn(|x| max(x, MIN_FILTER_Q));
            Net::wrap(Box::new(pass() | cutoff | q)) >> filter_type.make_node()
        }
        None => Net::wrap(Box::new(pass())),
    };

    let delay_time = var(&params.delay_time) >> follow(WET_TIME);
    let echo = feedback2(
        (pass() | delay_time) >> tap(MIN_DELAY_TIME, MAX_DELAY_TIME),
        pass() * (var(&params.feedback) >> follow(WET_TIME)));
    let delayed = mono_wet(Net::wrap(Box::new(echo)), &params.delay_wet);

    let balance = (multipass::<U2>() | (var(&params.pan) >> follow(PARAM_TIME)))
        >> map(|i: &Frame<f32, U3>| -> Frame<f32, U2> {
            [i[0] * min(1.0, 1.0 - i[2]), i[1] * min(1.0, 1.0 + i[2])].into()
        });
    let gain = multipass::<U2>()
        * (var(&params.gain) >> follow(PARAM_TIME) >> split::<U2>());

    Box::new(filtered
        >> delayed
        >> reverb_wet(layout.room_size, &params.reverb_wet)
        >> Net::wrap(Box::new(balance >> gain >> peak_meter(&params.level, METER_RELEASE))))
}

struct Slot {
    seq: Sequencer,
    strip_id: NodeId,
    params: ChannelParams,
    layout: Option<StripLayout>,
    track: Option<TrackId>,
}

/// Owns the frontend of the master graph.
pub struct Mixer {
    net: Net,
    slots: Vec<Slot>,
    assignments: HashMap<TrackId, usize>,
    /// Tracks already reported as over capacity.
    overflow: HashSet<TrackId>,
    sample_rate: f64,
    strip_builds: usize,
}

impl Mixer {
    /// Build the graph. The returned backend renders it.
    pub fn new(sample_rate: f64) -> (Self, NetBackend) {
        let mut bus = Net::new(0, 2);
        let mut slots = Vec::with_capacity(MAX_CHANNELS);

        for _ in 0..MAX_CHANNELS {
            let mut seq = Sequencer::new(false, 1);
            seq.set_sample_rate(sample_rate);
            let (strip, strip_id) = Net::wrap_id(placeholder());
            bus = bus + (Net::wrap(Box::new(seq.backend())) >> strip);
            slots.push(Slot {
                seq,
                strip_id,
                params: ChannelParams::new(),
                layout: None,
                track: None,
            });
        }

        let mut net = bus >> Net::wrap(Box::new((dcblock() | dcblock())
            >> limiter(db_amp(MASTER_CEILING_DB), 0.001, 0.05)));
        net.set_sample_rate(sample_rate);
        let backend = net.backend();

        let mixer = Self {
            net,
            slots,
            assignments: HashMap::new(),
            overflow: HashSet::new(),
            sample_rate,
            strip_builds: 0,
        };
        (mixer, backend)
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Bring every strip in line with the project. Strips are built for new
    /// tracks and rebuilt only when their layout changes.
    pub fn sync(&mut self, project: &Project) -> Result<(), Box<dyn Error>> {
        let mut changed = false;
        let mut overflow = Vec::new();
        let bpm = project.settings.bpm;

        for track in project.tracks.iter() {
            let Some(index) = self.assign(&track.id) else {
                if self.overflow.insert(track.id.clone()) {
                    overflow.push(track.name.clone());
                }
                continue
            };
            let slot = &mut self.slots[index];

            let layout = StripLayout {
                filter: track.instrument.strip_filter(),
                room_size: track.fx.reverb.room_size,
            };
            if slot.layout != Some(layout) {
                debug!(track = track.id.as_str(), slot = index, ?layout, "building channel strip");
                let mut unit = channel_strip(&layout, &slot.params);
                unit.set_sample_rate(self.sample_rate);
                self.net.crossfade(slot.strip_id, Fade::Smooth, REBUILD_TIME, unit);
                slot.layout = Some(layout);
                self.strip_builds += 1;
                changed = true;
            }

            let params = &slot.params;
            let audible = project.track_audible(track);
            params.gain.set(if audible { track.volume } else { 0.0 });
            params.pan.set(track.pan);
            if let Some(filter) = track.instrument.filter() {
                params.filter.set(filter);
            }
            params.reverb_wet.set(if track.fx.reverb.enabled { REVERB_WET } else { 0.0 });
            params.delay_wet.set(if track.fx.delay.enabled { DELAY_WET } else { 0.0 });
            params.delay_time.set(
                (eighth_interval(bpm) as f32).clamp(MIN_DELAY_TIME, MAX_DELAY_TIME));
            params.feedback.set(track.fx.delay.feedback);
        }

        if changed {
            self.net.commit();
        }

        if overflow.is_empty() {
            Ok(())
        } else {
            warn!(tracks = ?overflow, "out of mixer channels");
            Err(format!("No free mixer channel for {}", overflow.join(", ")).into())
        }
    }

    /// Returns the track's slot index, assigning a free slot if needed.
    fn assign(&mut self, id: &TrackId) -> Option<usize> {
        if let Some(index) = self.assignments.get(id) {
            return Some(*index)
        }
        let index = self.slots.iter().position(|s| s.track.is_none())?;
        self.slots[index].track = Some(id.clone());
        self.assignments.insert(id.clone(), index);
        Some(index)
    }

    /// Tracks that have a slot but are no longer in the project.
    pub fn stale_tracks(&self, project: &Project) -> Vec<TrackId> {
        self.assignments.keys()
            .filter(|id| project.track(id).is_none())
            .cloned()
            .collect()
    }

    /// Fade a track's slot back to silence and free it.
    pub fn release(&mut self, id: &TrackId) {
        self.overflow.remove(id);
        if let Some(index) = self.assignments.remove(id) {
            let slot = &mut self.slots[index];
            slot.params.gain.set(0.0);
            slot.params.level.set(0.0);
            slot.track = None;
            slot.layout = None;
            let mut unit = placeholder();
            unit.set_sample_rate(self.sample_rate);
            self.net.crossfade(slot.strip_id, Fade::Smooth, REBUILD_TIME, unit);
            self.net.commit();
            debug!(track = id.as_str(), slot = index, "released channel");
        }
    }

    /// Voice sequencer and filter control of a track's slot.
    pub fn voice_target(&mut self, id: &TrackId) -> Option<(&mut Sequencer, &FilterControl)> {
        let index = *self.assignments.get(id)?;
        self.slots.get_mut(index).map(|s| (&mut s.seq, &s.params.filter))
    }

    pub fn params(&self, id: &TrackId) -> Option<&ChannelParams> {
        self.assignments.get(id).map(|i| &self.slots[*i].params)
    }

    /// Peak level of every assigned track.
    pub fn levels(&self) -> Vec<(TrackId, f32)> {
        self.assignments.iter()
            .map(|(id, i)| (id.clone(), self.slots[*i].params.level.value()))
            .collect()
    }

    /// Number of strips built so far.
    pub fn strip_builds(&self) -> usize {
        self.strip_builds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::Instrument;

    const SR: f64 = 44100.0;

    fn render_strip(layout: StripLayout, params: &ChannelParams, seconds: f64) -> f32 {
        let mut net = Net::wrap(Box::new(sine_hz(440.0))) >> Net::wrap(channel_strip(&layout, params));
        net.set_sample_rate(SR);
        let mut peak = 0.0;
        let frames = (seconds * SR) as usize;
        for i in 0..frames {
            let (l, r) = net.get_stereo();
            // skip the parameter ramps
            if i > frames / 2 {
                peak = max(peak, max(abs(l), abs(r)));
            }
        }
        peak
    }

    fn open_layout() -> StripLayout {
        StripLayout { filter: None, room_size: 0.5 }
    }

    #[test]
    fn test_strip_gain() {
        let params = ChannelParams::new();
        params.gain.set(1.0);
        assert!(render_strip(open_layout(), &params, 0.5) > 0.9);
        assert!(params.level.value() > 0.5);

        params.gain.set(0.0);
        assert!(render_strip(open_layout(), &params, 0.5) < 1e-3);
    }

    #[test]
    fn test_strip_pan() {
        let params = ChannelParams::new();
        params.gain.set(1.0);
        params.pan.set(-1.0);
        let mut net = Net::wrap(Box::new(sine_hz(440.0)))
            >> Net::wrap(channel_strip(&open_layout(), &params));
        net.set_sample_rate(SR);
        let (mut left, mut right) = (0.0, 0.0);
        for i in 0..22050 {
            let (l, r) = net.get_stereo();
            if i > 16000 {
                left = max(left, abs(l));
                right = max(right, abs(r));
            }
        }
        assert!(left > 0.9);
        assert!(right < 0.05);
    }

    #[test]
    fn test_strip_filter() {
        let params = ChannelParams::new();
        params.gain.set(1.0);
        params.filter.cutoff.set(40.0);
        params.filter.resonance.set(0.5);
        let layout = StripLayout { filter: Some(FilterType::Lowpass), room_size: 0.5 };
        assert!(render_strip(layout, &params, 0.5) < 0.1);
    }

    #[test]
    fn test_solo_gain_targets() {
        let (mut mixer, _backend) = Mixer::new(SR);
        let mut project = Project::default();
        let (a, b) = (TrackId::from("1"), TrackId::from("2"));
        mixer.sync(&project).unwrap();
        assert_eq!(mixer.strip_builds(), 3);
        assert_eq!(mixer.params(&b).unwrap().gain.value(), 0.7);

        project.toggle_solo(&a);
        mixer.sync(&project).unwrap();
        assert_eq!(mixer.params(&a).unwrap().gain.value(), 1.0);
        assert_eq!(mixer.params(&b).unwrap().gain.value(), 0.0);

        project.toggle_solo(&a);
        mixer.sync(&project).unwrap();
        assert_eq!(mixer.params(&b).unwrap().gain.value(), 0.7);
        assert_eq!(mixer.strip_builds(), 3);
    }

    #[test]
    fn test_rebuild_on_layout_change() {
        let (mut mixer, _backend) = Mixer::new(SR);
        let mut project = Project::empty();
        let id = project.add_track("Lead", Instrument::default());
        mixer.sync(&project).unwrap();

        project.set_cutoff(&id, 300.0);
        project.set_reverb(&id, true);
        project.set_volume(&id, 1.2);
        mixer.sync(&project).unwrap();
        assert_eq!(mixer.strip_builds(), 1);
        let params = mixer.params(&id).unwrap();
        assert_eq!(params.filter.cutoff.value(), 300.0);
        assert_eq!(params.reverb_wet.value(), REVERB_WET);
        assert_eq!(params.delay_wet.value(), 0.0);

        project.set_room_size(&id, 0.9);
        mixer.sync(&project).unwrap();
        assert_eq!(mixer.strip_builds(), 2);
    }

    #[test]
    fn test_release_frees_slot() {
        let (mut mixer, _backend) = Mixer::new(SR);
        let mut project = Project::default();
        mixer.sync(&project).unwrap();
        let id = TrackId::from("3");
        project.remove_track(&id);
        assert_eq!(mixer.stale_tracks(&project), vec![id.clone()]);
        mixer.release(&id);
        assert!(mixer.params(&id).is_none());
        assert!(mixer.stale_tracks(&project).is_empty());
    }

    #[test]
    fn test_channel_overflow() {
        let (mut mixer, _backend) = Mixer::new(SR);
        let mut project = Project::empty();
        for i in 0..=MAX_CHANNELS {
            project.add_track(&format!("T{i}"), Instrument::default());
        }
        assert!(mixer.sync(&project).is_err());
        // reported once
        assert!(mixer.sync(&project).is_ok());
        let last = project.tracks[MAX_CHANNELS].id.clone();
        assert!(mixer.voice_target(&last).is_none());
    }
}
