//! Output gain from replay gain and ducking.

/// Volume inputs; `NaN` disables a factor.
#[derive(Clone, Copy, Debug)]
pub struct GainControl {
    replay_gain: f32,
    ducking_factor: f32,
    ducking: bool,
}

impl Default for GainControl {
    fn default() -> Self {
        Self {
            replay_gain: f32::NAN,
            ducking_factor: f32::NAN,
            ducking: false,
        }
    }
}

impl GainControl {
    /// Replay-gain scaling in `0.0..=1.0`, or `NaN` for none.
    pub fn set_replay_gain(&mut self, gain: f32) {
        self.replay_gain = clamp_factor(gain);
    }

    pub fn set_ducking(&mut self, ducking: bool) {
        self.ducking = ducking;
    }

    /// Scaling applied while ducking, or `NaN` to never duck.
    pub fn set_ducking_factor(&mut self, factor: f32) {
        self.ducking_factor = clamp_factor(factor);
    }

    pub fn is_ducking(&self) -> bool {
        self.ducking
    }

    /// Linear gain to hand to the sink.
    pub fn effective(&self) -> f32 {
        let mut volume = if self.replay_gain.is_nan() {
            1.0
        } else {
            self.replay_gain
        };
        if self.ducking && !self.ducking_factor.is_nan() {
            volume *= self.ducking_factor;
        }
        volume
    }
}

fn clamp_factor(v: f32) -> f32 {
    if v.is_nan() { v } else { v.clamp(0.0, 1.0) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_gain_is_unity() {
        assert_eq!(GainControl::default().effective(), 1.0);
    }

    #[test]
    fn replay_gain_scales_volume() {
        let mut g = GainControl::default();
        g.set_replay_gain(0.5);
        assert_eq!(g.effective(), 0.5);
        g.set_replay_gain(f32::NAN);
        assert_eq!(g.effective(), 1.0);
    }

    #[test]
    fn ducking_multiplies_only_while_active() {
        let mut g = GainControl::default();
        g.set_replay_gain(0.8);
        g.set_ducking_factor(0.25);
        assert_eq!(g.effective(), 0.8);
        g.set_ducking(true);
        assert_eq!(g.effective(), 0.2);
    }

    #[test]
    fn nan_ducking_factor_disables_ducking() {
        let mut g = GainControl::default();
        g.set_ducking(true);
        assert_eq!(g.effective(), 1.0);
    }

    #[test]
    fn factors_are_clamped() {
        let mut g = GainControl::default();
        g.set_replay_gain(3.0);
        assert_eq!(g.effective(), 1.0);
        g.set_replay_gain(-1.0);
        assert_eq!(g.effective(), 0.0);
    }
}
