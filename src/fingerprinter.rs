use std::fmt::{Display, Formatter};

use crate::fft::{SpectralAnalyser, SpectralEstimator};
use crate::fingerprint_calculator::{Fingerprint, FingerprintCalculator};
use crate::quantize::{FrequencyQuantizer, COARSE_FREQUENCY_STEP};
use crate::spectrum::Spectrum;
use crate::stream::{Block, StreamError};

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    UnknownAnalyser(String),
    UnsupportedSampleFormat(String),
    SampleRateMismatch { expected: u32, actual: u32 },
    InvalidParameter { name: &'static str, reason: String },
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::UnknownAnalyser(name) => {
                write!(f, "Unknown spectral analyser '{name}', expected one of fft, pwelch, overlap")
            }
            ConfigError::UnsupportedSampleFormat(name) => {
                write!(f, "Unsupported sample format '{name}', expected s16 or f32")
            }
            ConfigError::SampleRateMismatch { expected, actual } => {
                write!(f, "Sample rate mismatch: configured for {expected} Hz, source delivers {actual} Hz")
            }
            ConfigError::InvalidParameter { name, reason } => write!(f, "Invalid {name}: {reason}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Failure while driving a stream through the pipeline.
#[derive(Debug)]
pub enum ProcessError {
    Config(ConfigError),
    /// A source failed; `context` is the source name.
    Stream { context: String, error: StreamError },
}

impl ProcessError {
    pub(crate) fn stream(context: &str, error: StreamError) -> Self {
        ProcessError::Stream {
            context: context.to_string(),
            error,
        }
    }
}

impl From<ConfigError> for ProcessError {
    fn from(e: ConfigError) -> Self {
        ProcessError::Config(e)
    }
}

impl Display for ProcessError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessError::Config(e) => write!(f, "{e}"),
            ProcessError::Stream { context, error } => write!(f, "{context}: {error}"),
        }
    }
}

impl std::error::Error for ProcessError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProcessError::Config(e) => Some(e),
            ProcessError::Stream { error, .. } => Some(error),
        }
    }
}

pub const DEFAULT_SAMPLE_RATE: u32 = 11025;
pub const DEFAULT_BLOCK_SIZE: usize = 2048;
pub const DEFAULT_FFT_SIZE: usize = 1024;
pub const DEFAULT_OVERLAP: usize = DEFAULT_FFT_SIZE / 2;

const DEFAULT_LOWER_BIN: usize = 56;
const DEFAULT_UPPER_BIN: usize = 1000;
const DEFAULT_NUM_BANDS: usize = 6;
const DEFAULT_REQUIRED_CANDIDATES: usize = 2;

const REFERENCE_SILENCE_THRESHOLD: f64 = 1.0;
const LIVE_SILENCE_THRESHOLD: f64 = 5.0;
const DEFAULT_TIME_DELTA_THRESHOLD: f64 = 0.1;

/// Every tunable of the fingerprinting pipeline. All values are plain numbers.
#[derive(Debug, Clone, PartialEq)]
pub struct Configuration {
    sample_rate: u32,
    block_size: usize,
    analyser: SpectralAnalyser,
    fft_size: usize,
    overlap: usize,
    db_scale: bool,
    normalize: bool,
    lower_bin: usize,
    upper_bin: usize,
    num_bands: usize,
    required_candidates: usize,
    frequency_step: f64,
    silence_threshold: f64,
    peak_picking: bool,
    high_pass: bool,
    time_delta_threshold: f64,
}

impl Configuration {
    fn new() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            block_size: DEFAULT_BLOCK_SIZE,
            analyser: SpectralAnalyser::Welch,
            fft_size: DEFAULT_FFT_SIZE,
            overlap: DEFAULT_OVERLAP,
            db_scale: false,
            normalize: false,
            lower_bin: DEFAULT_LOWER_BIN,
            upper_bin: DEFAULT_UPPER_BIN,
            num_bands: DEFAULT_NUM_BANDS,
            required_candidates: DEFAULT_REQUIRED_CANDIDATES,
            frequency_step: COARSE_FREQUENCY_STEP,
            silence_threshold: REFERENCE_SILENCE_THRESHOLD,
            peak_picking: false,
            high_pass: false,
            time_delta_threshold: DEFAULT_TIME_DELTA_THRESHOLD,
        }
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_analyser(mut self, analyser: SpectralAnalyser) -> Self {
        self.analyser = analyser;
        self
    }

    /// Sets the FFT size and resets the overlap to half of it.
    pub fn with_fft_size(mut self, fft_size: usize) -> Self {
        self.fft_size = fft_size;
        self.overlap = fft_size / 2;
        self
    }

    pub fn with_overlap(mut self, overlap: usize) -> Self {
        self.overlap = overlap;
        self
    }

    pub fn with_db_scale(mut self, db_scale: bool) -> Self {
        self.db_scale = db_scale;
        self
    }

    pub fn with_window_normalization(mut self, normalize: bool) -> Self {
        self.normalize = normalize;
        self
    }

    /// Band edges as bin indices on the `sample_rate / (2 * fft_size)` grid.
    pub fn with_band_bins(mut self, lower_bin: usize, upper_bin: usize) -> Self {
        self.lower_bin = lower_bin;
        self.upper_bin = upper_bin;
        self
    }

    pub fn with_bands(mut self, num_bands: usize, required_candidates: usize) -> Self {
        self.num_bands = num_bands;
        self.required_candidates = required_candidates;
        self
    }

    /// Quantization grid for band frequencies in Hz, `0.0` disables quantization.
    pub fn with_frequency_step(mut self, step: f64) -> Self {
        self.frequency_step = step;
        self
    }

    pub fn with_silence_threshold(mut self, threshold: f64) -> Self {
        self.silence_threshold = threshold;
        self
    }

    /// Reduces the spectrum to its local maxima before banding.
    pub fn with_peak_picking(mut self, peak_picking: bool) -> Self {
        self.peak_picking = peak_picking;
        self
    }

    /// Drops bins below the mean power after the range filter.
    pub fn with_high_pass(mut self, high_pass: bool) -> Self {
        self.high_pass = high_pass;
        self
    }

    pub fn with_time_delta_threshold(mut self, threshold: f64) -> Self {
        self.time_delta_threshold = threshold;
        self
    }

    /// Settings for ingesting reference recordings.
    pub fn preset_reference() -> Self {
        Self::new()
    }

    /// Settings for a noisy live capture.
    pub fn preset_live() -> Self {
        Self::new().with_silence_threshold(LIVE_SILENCE_THRESHOLD)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn analyser(&self) -> SpectralAnalyser {
        self.analyser
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    pub fn num_bands(&self) -> usize {
        self.num_bands
    }

    pub fn frequency_step(&self) -> f64 {
        self.frequency_step
    }

    pub fn silence_threshold(&self) -> f64 {
        self.silence_threshold
    }

    pub fn time_delta_threshold(&self) -> f64 {
        self.time_delta_threshold
    }

    fn band_scale(&self) -> f64 {
        f64::from(self.sample_rate) / (2.0 * self.fft_size as f64)
    }

    pub fn lower_cutoff(&self) -> f64 {
        self.lower_bin as f64 * self.band_scale()
    }

    pub fn upper_cutoff(&self) -> f64 {
        self.upper_bin as f64 * self.band_scale()
    }

    pub fn block_duration(&self) -> f64 {
        self.block_size as f64 / f64::from(self.sample_rate)
    }

    pub fn blocks_per_second(&self) -> f64 {
        f64::from(self.sample_rate) / self.block_size as f64
    }

    /// Number of blocks between two evaluations of the matcher, about one second of audio.
    pub fn evaluate_interval(&self) -> usize {
        (self.blocks_per_second().round() as usize).max(1)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(name: &'static str, reason: impl Into<String>) -> Result<(), ConfigError> {
            Err(ConfigError::InvalidParameter {
                name,
                reason: reason.into(),
            })
        }

        if self.sample_rate == 0 {
            return invalid("sample rate", "must be positive");
        }
        if self.block_size == 0 {
            return invalid("block size", "must be positive");
        }
        if self.fft_size == 0 {
            return invalid("fft size", "must be positive");
        }
        if self.overlap >= self.fft_size {
            return invalid("overlap", format!("{} is not below the fft size {}", self.overlap, self.fft_size));
        }
        if self.lower_bin >= self.upper_bin {
            return invalid("band range", format!("bins {}..{} are empty", self.lower_bin, self.upper_bin));
        }
        let nyquist = f64::from(self.sample_rate) / 2.0;
        if self.upper_cutoff() > nyquist {
            return invalid(
                "band range",
                format!("upper cutoff {:.1} Hz is above the Nyquist frequency {:.1} Hz", self.upper_cutoff(), nyquist),
            );
        }
        if self.num_bands == 0 {
            return invalid("number of bands", "must be positive");
        }
        if self.required_candidates > self.num_bands {
            return invalid(
                "required candidates",
                format!("{} exceeds the number of bands {}", self.required_candidates, self.num_bands),
            );
        }
        for (name, value) in [
            ("frequency step", self.frequency_step),
            ("silence threshold", self.silence_threshold),
            ("time delta threshold", self.time_delta_threshold),
        ] {
            if !value.is_finite() || value < 0.0 {
                return invalid(name, format!("{value} is not a finite non-negative number"));
            }
        }
        Ok(())
    }

    pub fn check_sample_rate(&self, actual: u32) -> Result<(), ConfigError> {
        if actual != self.sample_rate {
            return Err(ConfigError::SampleRateMismatch {
                expected: self.sample_rate,
                actual,
            });
        }
        Ok(())
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::preset_reference()
    }
}

/// Turns single blocks into fingerprints: spectral estimation, spectrum shaping, banding.
pub struct Fingerprinter {
    config: Configuration,
    estimator: SpectralEstimator,
    calculator: FingerprintCalculator,
}

impl Fingerprinter {
    pub fn new(config: &Configuration) -> Result<Self, ConfigError> {
        config.validate()?;

        let estimator = SpectralEstimator::new(config.analyser, config.fft_size, config.overlap)
            .with_db_scale(config.db_scale)
            .with_window_normalization(config.normalize);
        let calculator = FingerprintCalculator::new(
            config.lower_cutoff(),
            config.upper_cutoff(),
            config.num_bands,
            config.required_candidates,
            FrequencyQuantizer::new(config.frequency_step),
        );

        Ok(Self {
            config: config.clone(),
            estimator,
            calculator,
        })
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    /// Raw spectrum of a block as produced by the configured analyser.
    pub fn analyze(&mut self, block: &Block) -> Spectrum {
        self.estimator.analyze(&block.samples, block.sample_rate)
    }

    /// Applies peak picking, the band range and silence filter, and the mean high-pass.
    pub fn shape(&self, spectrum: &Spectrum) -> Spectrum {
        let mut shaped = if self.config.peak_picking {
            spectrum.maxima()
        } else {
            spectrum.clone()
        };
        shaped = shaped.filter(
            self.config.lower_cutoff(),
            self.config.upper_cutoff(),
            self.config.silence_threshold,
        );
        if self.config.high_pass {
            shaped = shaped.high_pass();
        }
        shaped
    }

    pub fn calculator(&self) -> &FingerprintCalculator {
        &self.calculator
    }

    /// Fingerprint of one block, `None` for silence or too little signal.
    ///
    /// Also `None` when the block's sample rate differs from the configured one, since the
    /// band cutoffs are derived from the configured rate.
    pub fn process(&mut self, block: &Block) -> Option<Fingerprint> {
        if block.sample_rate != self.config.sample_rate {
            log::warn!(
                "block {} at {} Hz skipped, expected {} Hz",
                block.sequence,
                block.sample_rate,
                self.config.sample_rate
            );
            return None;
        }
        let spectrum = self.analyze(block);
        let fingerprint = self.calculator.extract(&self.shape(&spectrum));
        if let Some(fp) = &fingerprint {
            log::debug!("block {} at {:.2}s: {}", block.sequence, block.timestamp, fp);
        }
        fingerprint
    }
}

#[cfg(test)]
mod tests {
    use crate::assert_eq_float;
    use crate::fft::SpectralAnalyser;
    use crate::fingerprinter::{ConfigError, Configuration, Fingerprinter};
    use crate::stream::Block;
    use crate::utils::{bin_frequency, tones};

    fn block(samples: Vec<f64>, sample_rate: u32) -> Block {
        Block {
            samples,
            sample_rate,
            sequence: 0,
            timestamp: 0.0,
        }
    }

    #[test]
    fn defaults() {
        let config = Configuration::default();
        assert_eq!(config, Configuration::preset_reference());
        assert_eq!(config.analyser(), SpectralAnalyser::Welch);
        assert_eq_float!(config.lower_cutoff(), 301.46, 0.01);
        assert_eq_float!(config.upper_cutoff(), 5383.3, 0.1);
        assert_eq!(config.evaluate_interval(), 5);
        assert!(config.validate().is_ok());

        let live = Configuration::preset_live();
        assert!(live.silence_threshold() > config.silence_threshold());
    }

    #[test]
    fn validation() {
        let bad = [
            Configuration::default().with_block_size(0),
            Configuration::default().with_overlap(1024),
            Configuration::default().with_band_bins(100, 100),
            Configuration::default().with_band_bins(56, 1100),
            Configuration::default().with_bands(0, 0),
            Configuration::default().with_bands(3, 4),
            Configuration::default().with_silence_threshold(-1.0),
            Configuration::default().with_time_delta_threshold(f64::NAN),
        ];
        for config in bad.iter() {
            match config.validate() {
                Err(ConfigError::InvalidParameter { .. }) => {}
                other => panic!("expected invalid parameter for {:?}, got {:?}", config, other),
            }
            assert!(Fingerprinter::new(config).is_err());
        }
    }

    #[test]
    fn sample_rate_check() {
        let config = Configuration::default();
        assert!(config.check_sample_rate(11025).is_ok());
        assert_eq!(
            config.check_sample_rate(44100),
            Err(ConfigError::SampleRateMismatch {
                expected: 11025,
                actual: 44100
            })
        );
    }

    #[test]
    fn evaluate_interval_is_at_least_one() {
        let config = Configuration::default().with_sample_rate(1000).with_block_size(4096);
        assert_eq!(config.evaluate_interval(), 1);
    }

    #[test]
    fn silence_has_no_fingerprint() {
        let config = Configuration::default();
        let mut fingerprinter = Fingerprinter::new(&config).unwrap();
        let silence = block(vec![0.0; config.block_size()], config.sample_rate());
        assert!(fingerprinter.process(&silence).is_none());
    }

    #[test]
    fn tones_in_two_bands_are_fingerprinted() {
        let config = Configuration::default();
        let rate = config.sample_rate();
        let low = bin_frequency(80, rate, config.fft_size());
        let high = bin_frequency(300, rate, config.fft_size());
        let samples = tones(config.block_size(), rate, &[(low, 0.4), (high, 0.4)]);

        for analyser in [SpectralAnalyser::Amplitude, SpectralAnalyser::Welch, SpectralAnalyser::Overlap] {
            let mut fingerprinter = Fingerprinter::new(&config.clone().with_analyser(analyser)).unwrap();
            let fp = fingerprinter.process(&block(samples.clone(), rate)).unwrap();
            assert!(fp.candidates() >= 2);
            assert!(fp.bands().contains(&Some((low / 10.0).round() * 10.0)));
            assert!(fp.bands().contains(&Some((high / 10.0).round() * 10.0)));
        }
    }

    #[test]
    fn mismatched_block_rate_is_skipped() {
        let config = Configuration::default();
        let rate = config.sample_rate();
        let samples = tones(
            config.block_size(),
            rate,
            &[(bin_frequency(80, rate, config.fft_size()), 0.4), (bin_frequency(300, rate, config.fft_size()), 0.4)],
        );
        let mut fingerprinter = Fingerprinter::new(&config).unwrap();
        assert!(fingerprinter.process(&block(samples.clone(), rate)).is_some());
        assert!(fingerprinter.process(&block(samples, 2 * rate)).is_none());
    }

    #[test]
    fn shaping() {
        let config = Configuration::default().with_peak_picking(true).with_high_pass(true);
        let fingerprinter = Fingerprinter::new(&config).unwrap();
        let rate = config.sample_rate();
        let samples = tones(config.block_size(), rate, &[(bin_frequency(80, rate, 1024), 0.4)]);

        let mut plain = Fingerprinter::new(&Configuration::default()).unwrap();
        let spectrum = plain.analyze(&block(samples, rate));
        let shaped = fingerprinter.shape(&spectrum);
        assert!(shaped.len() < spectrum.len());
        for c in shaped.iter() {
            assert!(c.freq >= config.lower_cutoff() && c.freq <= config.upper_cutoff());
            assert!(c.power > config.silence_threshold());
        }
    }
}
