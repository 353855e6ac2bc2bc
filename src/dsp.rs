//! Custom FunDSP audio nodes.

use std::marker::PhantomData;

use fundsp::prelude::*;
use fundsp::shared::Shared;

/// ADSR level `time` seconds after note onset, for a note released after
/// `hold` seconds. Release starts from whatever level the note reached.
pub fn adsr_level(
    attack: f32,
    decay: f32,
    sustain: f32,
    release: f32,
    hold: f32,
    time: f32,
) -> f32 {
    if time < hold {
        ads(attack, decay, sustain, time)
    } else {
        ads(attack, decay, sustain, hold)
            * clamp01(delerp(release, 0.0, time - hold))
    }
}

/// ADS envelope. Helper for ADSR.
fn ads(attack: f32, decay: f32, sustain: f32, time: f32) -> f32 {
    if time < attack {
        lerp(0.0, 1.0, time / attack)
    } else {
        let decay_time = time - attack;
        if decay_time < decay {
            lerp(1.0, sustain, decay_time / decay)
        } else {
            sustain
        }
    }
}

/// Stereo peak limiter. Output never exceeds `ceiling` in magnitude.
pub fn limiter(ceiling: f32, attack: f32, release: f32) -> An<Limiter<U2>> {
    An(Limiter::new(DEFAULT_SR, ceiling, attack, release))
}

#[derive(Clone)]
pub struct Limiter<N>
where
    N: Size<f32>,
{
    _marker: PhantomData<N>,
    sample_rate: f64,
    ceiling: f32,
    ceiling_db: f32,
    attack: f32,
    release: f32,
    attack_coeff: f32,
    release_coeff: f32,
    /// Current gain reduction in dB.
    reduction: f32,
}

impl<N> Limiter<N>
where
    N: Size<f32>,
{
    fn new(sample_rate: f64, ceiling: f32, attack: f32, release: f32) -> Self {
        let mut node = Self {
            _marker: PhantomData,
            sample_rate,
            ceiling,
            ceiling_db: amp_db(ceiling),
            attack,
            release,
            attack_coeff: 0.0,
            release_coeff: 0.0,
            reduction: 0.0,
        };
        node.set_sample_rate(sample_rate);
        node
    }
}

/// One-pole coefficient for a response time in seconds.
fn pole_coeff(time: f32, sample_rate: f64) -> f32 {
    let samples = max(time * sample_rate as f32, 1.0);
    1.0 - exp(-1.0 / samples)
}

impl<N> AudioNode for Limiter<N>
where
    N: Size<f32>,
{
    const ID: u64 = 200;
    type Inputs = N;
    type Outputs = N;

    fn reset(&mut self) {
        self.reduction = 0.0;
    }

    fn set_sample_rate(&mut self, sample_rate: f64) {
        self.sample_rate = sample_rate;
        self.attack_coeff = pole_coeff(self.attack, sample_rate);
        self.release_coeff = pole_coeff(self.release, sample_rate);
    }

    #[inline]
    fn tick(&mut self, input: &Frame<f32, Self::Inputs>) -> Frame<f32, Self::Outputs> {
        let amp = input.iter().fold(0.0, |amp, &x| max(amp, abs(x)));
        let over = (amp_db(amp) - self.ceiling_db).max(0.0);
        let coeff = if over > self.reduction {
            self.attack_coeff
        } else {
            self.release_coeff
        };
        self.reduction += (over - self.reduction) * coeff;

        let mut output = input.clone() * Frame::splat(db_amp(-self.reduction));
        for x in output.iter_mut() {
            *x = clamp(-self.ceiling, self.ceiling, *x);
        }
        output
    }

    fn route(&mut self, input: &SignalFrame, _frequency: f64) -> SignalFrame {
        let mut output = SignalFrame::new(self.outputs());
        for i in 0..N::USIZE {
            output.set(i, input.at(i));
        }
        output
    }

    fn allocate(&mut self) {}
}

/// Stereo pass-through that writes a decaying peak level to `level`.
pub fn peak_meter(level: &Shared, release: f32) -> An<PeakMeter> {
    An(PeakMeter::new(level.clone(), release))
}

#[derive(Clone)]
pub struct PeakMeter {
    level: Shared,
    release: f32,
    release_coeff: f32,
    peak: f32,
}

impl PeakMeter {
    fn new(level: Shared, release: f32) -> Self {
        let mut node = Self {
            level,
            release,
            release_coeff: 0.0,
            peak: 0.0,
        };
        node.set_sample_rate(DEFAULT_SR);
        node
    }
}

impl AudioNode for PeakMeter {
    const ID: u64 = 203;
    type Inputs = U2;
    type Outputs = U2;

    fn reset(&mut self) {
        self.peak = 0.0;
        self.level.set(0.0);
    }

    fn set_sample_rate(&mut self, sample_rate: f64) {
        self.release_coeff = pole_coeff(self.release, sample_rate);
    }

    #[inline]
    fn tick(&mut self, input: &Frame<f32, Self::Inputs>) -> Frame<f32, Self::Outputs> {
        let amp = max(abs(input[0]), abs(input[1]));
        if amp > self.peak {
            self.peak = amp;
        } else {
            self.peak -= self.peak * self.release_coeff;
        }
        self.level.set(self.peak);
        input.clone()
    }

    fn route(&mut self, input: &SignalFrame, _frequency: f64) -> SignalFrame {
        let mut output = SignalFrame::new(self.outputs());
        output.set(0, input.at(0));
        output.set(1, input.at(1));
        output
    }
}

/// Cutoff multiplier for a filter sweep. Maps an envelope level in 0..=1 to
/// `2^(octaves * level)`.
pub fn sweep_shape(octaves: f32) -> An<SweepShaper> {
    An(SweepShaper { octaves })
}

#[derive(Clone)]
pub struct SweepShaper {
    octaves: f32,
}

impl AudioNode for SweepShaper {
    const ID: u64 = 202;
    type Inputs = U1;
    type Outputs = U1;

    fn reset(&mut self) {}

    fn set_sample_rate(&mut self, _sample_rate: f64) {}

    #[inline]
    fn tick(&mut self, input: &Frame<f32, Self::Inputs>) -> Frame<f32, Self::Outputs> {
        [(self.octaves * clamp01(input[0])).exp2()].into()
    }

    fn route(&mut self, _input: &SignalFrame, _frequency: f64) -> SignalFrame {
        SignalFrame::new(self.outputs())
    }
}

/// One-pole smoother for control signals, with response `time` in seconds.
/// Jumps to its first input, so a voice built mid-note starts at the
/// current parameter value.
pub fn smooth(time: f32) -> An<Smooth> {
    let mut node = Smooth { time, coeff: 0.0, value: None };
    node.set_sample_rate(DEFAULT_SR);
    An(node)
}

#[derive(Clone)]
pub struct Smooth {
    time: f32,
    coeff: f32,
    value: Option<f32>,
}

impl AudioNode for Smooth {
    const ID: u64 = 201;
    type Inputs = U1;
    type Outputs = U1;

    fn reset(&mut self) {
        self.value = None;
    }

    fn set_sample_rate(&mut self, sample_rate: f64) {
        self.coeff = pole_coeff(self.time, sample_rate);
    }

    #[inline]
    fn tick(&mut self, input: &Frame<f32, Self::Inputs>) -> Frame<f32, Self::Outputs> {
        let target = input[0];
        let v = self.value.map_or(target, |v| v + (target - v) * self.coeff);
        self.value = Some(v);
        [v].into()
    }

    fn route(&mut self, input: &SignalFrame, _frequency: f64) -> SignalFrame {
        let mut output = SignalFrame::new(self.outputs());
        output.set(0, input.at(0));
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fundsp::prelude::shared;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    #[test]
    fn test_adsr_level() {
        // attack, decay, sustain, release, hold
        let env = |t| adsr_level(0.1, 0.1, 0.5, 0.2, 0.4, t);
        assert_eq!(env(0.0), 0.0);
        assert!(approx(env(0.05), 0.5));
        assert!(approx(env(0.15), 0.75));
        assert_eq!(env(0.3), 0.5);
        assert!(approx(env(0.5), 0.25));
        assert_eq!(env(0.7), 0.0);
        assert_eq!(env(2.0), 0.0);
    }

    #[test]
    fn test_adsr_early_release() {
        // released during attack: fade from the level reached
        let level = adsr_level(1.0, 0.1, 1.0, 0.1, 0.5, 0.55);
        assert!(approx(level, 0.25));
    }

    #[test]
    fn test_limiter_ceiling() {
        let ceiling = db_amp(-0.3);
        let mut node = limiter(ceiling, 0.001, 0.05);
        for _ in 0..4410 {
            let (l, r) = node.filter_stereo(4.0, -3.0);
            assert!(l.abs() <= ceiling && r.abs() <= ceiling);
        }
        // quiet signals pass once the reduction has released
        for _ in 0..44100 {
            node.filter_stereo(0.1, 0.1);
        }
        let (l, _) = node.filter_stereo(0.1, 0.1);
        assert!((l - 0.1).abs() < 1e-3);
    }

    #[test]
    fn test_peak_meter() {
        let level = shared(0.0);
        let mut node = peak_meter(&level, 0.1);
        assert_eq!(node.filter_stereo(0.5, -0.8), (0.5, -0.8));
        assert_eq!(level.value(), 0.8);
        for _ in 0..44100 {
            node.filter_stereo(0.0, 0.0);
        }
        assert!(level.value() < 0.01);
    }

    #[test]
    fn test_smooth_starts_at_input() {
        let mut node = smooth(0.01);
        assert_eq!(node.filter_mono(0.7), 0.7);
        let next = node.filter_mono(0.0);
        assert!(next < 0.7 && next > 0.6);
        for _ in 0..4410 {
            node.filter_mono(0.0);
        }
        assert!(node.filter_mono(0.0) < 1e-3);
    }

    #[test]
    fn test_sweep_shape() {
        let mut node = sweep_shape(3.0);
        assert!(approx(node.filter_mono(0.0), 1.0));
        assert!(approx(node.filter_mono(1.0), 8.0));
        assert!(approx(node.filter_mono(0.5), 8.0_f32.sqrt()));
        // levels outside the envelope range are held to it
        assert!(approx(node.filter_mono(2.0), 8.0));
    }
}
