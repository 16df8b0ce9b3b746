/// Rounds frequencies onto a coarse grid ("fuzzy frequency") so that the same acoustic
/// event recorded twice hashes identically despite small spectral estimation jitter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrequencyQuantizer {
    step: f64,
}

/// Fine grid, nearest 0.1 Hz.
pub const FINE_FREQUENCY_STEP: f64 = 0.1;

/// Coarse grid, nearest 10 Hz.
pub const COARSE_FREQUENCY_STEP: f64 = 10.0;

impl FrequencyQuantizer {
    /// A step of `0.0` disables quantization.
    pub const fn new(step: f64) -> Self {
        Self { step }
    }

    pub fn step(&self) -> f64 {
        self.step
    }

    pub fn quantize(&self, freq: f64) -> f64 {
        if self.step <= 0.0 {
            return freq;
        }
        (freq / self.step + 0.5).floor() * self.step
    }
}

impl Default for FrequencyQuantizer {
    fn default() -> Self {
        Self::new(COARSE_FREQUENCY_STEP)
    }
}
