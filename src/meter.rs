//! Level and waveform snapshots for display.

use std::collections::VecDeque;

use fundsp::math::amp_db;
use rtrb::Consumer;
use triple_buffer::{Input, Output, TripleBuffer};

use crate::project::TrackId;

/// Number of master samples in a waveform snapshot.
pub const WAVEFORM_LEN: usize = 256;

/// Levels at or below this read as empty meters.
const METER_FLOOR_DB: f32 = -60.0;

/// Map a linear peak amplitude to a meter position in [0, 1].
pub fn meter_level(amp: f32) -> f32 {
    let level = (amp_db(amp) - METER_FLOOR_DB) / -METER_FLOOR_DB;
    if level.is_nan() {
        0.0
    } else {
        level.clamp(0.0, 1.0)
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeterSnapshot {
    pub levels: Vec<(TrackId, f32)>,
    /// Latest master samples, oldest first.
    pub waveform: Vec<f32>,
}

impl MeterSnapshot {
    pub fn level(&self, id: &TrackId) -> f32 {
        self.levels.iter().find(|(x, _)| x == id).map_or(0.0, |(_, v)| *v)
    }
}

/// Publishes snapshots at most once per interval.
pub struct MeterSampler {
    interval: f64,
    last: Option<f64>,
    scope: Consumer<f32>,
    waveform: VecDeque<f32>,
    input: Input<MeterSnapshot>,
}

/// Read side of the meters. Never blocks the sampler.
pub struct MeterReader {
    output: Output<MeterSnapshot>,
}

impl MeterReader {
    /// Newest published snapshot.
    pub fn latest(&mut self) -> &MeterSnapshot {
        self.output.read()
    }
}

/// Create a sampler fed by `scope`, which carries mono master samples.
pub fn meters(interval: f64, scope: Consumer<f32>) -> (MeterSampler, MeterReader) {
    let (input, output) = TripleBuffer::new(&MeterSnapshot::default()).split();
    let sampler = MeterSampler {
        interval,
        last: None,
        scope,
        waveform: VecDeque::with_capacity(WAVEFORM_LEN),
        input,
    };
    (sampler, MeterReader { output })
}

impl MeterSampler {
    /// Take in scope samples, and publish a snapshot if the interval has
    /// passed since the last one. `levels` are linear peak amplitudes.
    /// Returns whether a snapshot was published.
    pub fn sample(&mut self, now: f64, levels: &[(TrackId, f32)]) -> bool {
        self.drain_scope();

        if self.last.is_some_and(|t| now - t < self.interval) {
            return false
        }
        self.last = Some(now);

        let snapshot = MeterSnapshot {
            levels: levels.iter().map(|(id, amp)| (id.clone(), meter_level(*amp))).collect(),
            waveform: self.waveform.iter().copied().collect(),
        };
        self.input.write(snapshot);
        true
    }

    fn drain_scope(&mut self) {
        while let Ok(x) = self.scope.pop() {
            if self.waveform.len() == WAVEFORM_LEN {
                self.waveform.pop_front();
            }
            self.waveform.push_back(x);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtrb::RingBuffer;

    #[test]
    fn test_meter_level() {
        assert_eq!(meter_level(1.0), 1.0);
        assert_eq!(meter_level(2.0), 1.0);
        assert_eq!(meter_level(0.0), 0.0);
        assert_eq!(meter_level(0.0001), 0.0);
        assert!((meter_level(fundsp::math::db_amp(-30.0)) - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_sampler_interval() {
        let (mut producer, consumer) = RingBuffer::new(1024);
        let (mut sampler, mut reader) = meters(0.05, consumer);
        let levels = vec![(TrackId::from("1"), 1.0)];

        assert!(sampler.sample(0.0, &levels));
        assert_eq!(reader.latest().level(&TrackId::from("1")), 1.0);
        assert!(!sampler.sample(0.02, &[]));
        assert_eq!(reader.latest().levels.len(), 1);

        for i in 0..300 {
            producer.push(i as f32).unwrap();
        }
        assert!(sampler.sample(0.06, &[]));
        let snapshot = reader.latest();
        assert!(snapshot.levels.is_empty());
        assert_eq!(snapshot.waveform.len(), WAVEFORM_LEN);
        assert_eq!(snapshot.waveform[0], 44.0);
        assert_eq!(snapshot.waveform[WAVEFORM_LEN - 1], 299.0);
    }

    #[test]
    fn test_reader_default() {
        let (_, consumer) = RingBuffer::<f32>::new(8);
        let (_, mut reader) = meters(0.05, consumer);
        assert_eq!(*reader.latest(), MeterSnapshot::default());
    }
}
