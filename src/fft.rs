use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;

use rustfft::num_complex::{Complex, Complex64};
use rustfft::num_traits::Zero;
use rustfft::FftPlanner;

use crate::fingerprinter::ConfigError;
use crate::spectrum::Spectrum;
use crate::utils::bin_frequency;

/// Strategy used to turn a block of samples into a power spectrum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpectralAnalyser {
    /// Magnitude of a single FFT over the whole block, DC bin dropped.
    Amplitude,
    /// Welch-averaged periodogram of Hann-windowed overlapping segments.
    Welch,
    /// Sum of FFT magnitudes over Hann-windowed overlapping segments.
    Overlap,
}

impl SpectralAnalyser {
    pub fn name(&self) -> &'static str {
        match self {
            SpectralAnalyser::Amplitude => "fft",
            SpectralAnalyser::Welch => "pwelch",
            SpectralAnalyser::Overlap => "overlap",
        }
    }

    /// One-shot analysis. Prefer a long-lived [SpectralEstimator] when processing a stream.
    ///
    /// Fails when `fft_size` is zero or `overlap` is not below it.
    pub fn analyze(
        self,
        samples: &[f64],
        sample_rate: u32,
        fft_size: usize,
        overlap: usize,
        db_scale: bool,
    ) -> Result<Spectrum, ConfigError> {
        check_segmentation(fft_size, overlap)?;
        Ok(SpectralEstimator::new(self, fft_size, overlap)
            .with_db_scale(db_scale)
            .analyze(samples, sample_rate))
    }
}

impl FromStr for SpectralAnalyser {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fft" | "amplitude" | "bespoke" => Ok(SpectralAnalyser::Amplitude),
            "pwelch" | "welch" => Ok(SpectralAnalyser::Welch),
            "overlap" => Ok(SpectralAnalyser::Overlap),
            _ => Err(ConfigError::UnknownAnalyser(s.to_string())),
        }
    }
}

impl Display for SpectralAnalyser {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

fn check_segmentation(fft_size: usize, overlap: usize) -> Result<(), ConfigError> {
    if fft_size == 0 {
        return Err(ConfigError::InvalidParameter {
            name: "fft size",
            reason: "must be positive".to_string(),
        });
    }
    if overlap >= fft_size {
        return Err(ConfigError::InvalidParameter {
            name: "overlap",
            reason: format!("{} is not below the fft size {}", overlap, fft_size),
        });
    }
    Ok(())
}

/// Reusable spectral estimator holding the FFT plans, window and scratch buffers.
pub struct SpectralEstimator {
    analyser: SpectralAnalyser,
    fft_size: usize,
    overlap: usize,
    db_scale: bool,
    normalize: bool,

    planner: FftPlanner<f64>,
    fft_plan: Arc<dyn rustfft::Fft<f64>>,
    fft_buffer_complex: Box<[Complex64]>,
    fft_scratch: Box<[Complex64]>,

    window: Box<[f64]>,
}

impl SpectralEstimator {
    /// # Panics
    ///
    /// Panics if `fft_size` is zero or `overlap` is not below `fft_size`. A validated
    /// [Configuration](crate::Configuration) never does this.
    pub fn new(analyser: SpectralAnalyser, fft_size: usize, overlap: usize) -> Self {
        assert!(fft_size > 0);
        assert!(overlap < fft_size);

        let mut planner = FftPlanner::new();
        let fft_plan = planner.plan_fft_forward(fft_size);

        Self {
            analyser,
            fft_size,
            overlap,
            db_scale: false,
            normalize: false,
            fft_buffer_complex: vec![Complex64::zero(); fft_size].into_boxed_slice(),
            fft_scratch: vec![Complex::zero(); fft_plan.get_inplace_scratch_len()].into_boxed_slice(),
            fft_plan,
            planner,
            window: make_hann_window(fft_size),
        }
    }

    /// Converts the output to decibels, see [Spectrum::to_db].
    pub fn with_db_scale(mut self, db_scale: bool) -> Self {
        self.db_scale = db_scale;
        self
    }

    /// Divides overlapped magnitude sums by the window energy.
    ///
    /// Only affects [SpectralAnalyser::Overlap]. Off by default: the division flattens
    /// strong narrowband tones relative to the silence threshold.
    pub fn with_window_normalization(mut self, normalize: bool) -> Self {
        self.normalize = normalize;
        self
    }

    pub fn analyser(&self) -> SpectralAnalyser {
        self.analyser
    }

    pub fn analyze(&mut self, samples: &[f64], sample_rate: u32) -> Spectrum {
        let spectrum = match self.analyser {
            SpectralAnalyser::Amplitude => self.amplitude(samples, sample_rate),
            SpectralAnalyser::Welch => self.welch(samples, sample_rate),
            SpectralAnalyser::Overlap => self.overlap_sum(samples, sample_rate),
        };

        if self.db_scale {
            spectrum.to_db()
        } else {
            spectrum
        }
    }

    fn amplitude(&mut self, samples: &[f64], sample_rate: u32) -> Spectrum {
        let n = samples.len().max(self.fft_size);
        let freqs = (1..=n / 2).map(|i| bin_frequency(i, sample_rate, n)).collect::<Vec<_>>();
        if is_silent(samples) {
            return Spectrum::zeros(freqs);
        }

        let plan = if n == self.fft_size {
            Arc::clone(&self.fft_plan)
        } else {
            self.planner.plan_fft_forward(n)
        };

        let mut buffer = vec![Complex64::zero(); n];
        for (output, &input) in buffer.iter_mut().zip(samples) {
            output.re = finite_or_zero(input);
        }
        let mut scratch = vec![Complex64::zero(); plan.get_inplace_scratch_len()];
        plan.process_with_scratch(&mut buffer, &mut scratch);

        let powers = (1..=n / 2).map(|i| buffer[i].norm()).collect();
        Spectrum::new(freqs, powers)
    }

    fn welch(&mut self, samples: &[f64], sample_rate: u32) -> Spectrum {
        let bins = self.fft_size / 2 + 1;
        let freqs = self.segment_freqs(sample_rate);
        if is_silent(samples) {
            return Spectrum::zeros(freqs);
        }

        let mut powers = vec![0.0; bins];
        let mut count = 0;
        for segment in Segments::new(samples, self.fft_size, self.overlap) {
            self.transform_segment(segment);
            for (acc, x) in powers.iter_mut().zip(self.fft_buffer_complex.iter()) {
                *acc += x.norm_sqr();
            }
            count += 1;
        }

        for p in powers.iter_mut() {
            *p /= count as f64;
        }

        // one-sided spectrum: interior bins carry the energy of their mirror image
        let last = if self.fft_size % 2 == 0 { bins - 1 } else { bins };
        for p in powers.iter_mut().take(last).skip(1) {
            *p *= 2.0;
        }

        Spectrum::new(freqs, powers)
    }

    fn overlap_sum(&mut self, samples: &[f64], sample_rate: u32) -> Spectrum {
        let bins = self.fft_size / 2 + 1;
        let freqs = self.segment_freqs(sample_rate);
        if is_silent(samples) {
            return Spectrum::zeros(freqs);
        }

        let mut powers = vec![0.0; bins];
        for segment in Segments::new(samples, self.fft_size, self.overlap) {
            self.transform_segment(segment);
            for (acc, x) in powers.iter_mut().zip(self.fft_buffer_complex.iter()) {
                *acc += x.norm();
            }
        }

        if self.normalize {
            let norm: f64 = self.window.iter().map(|w| w * w).sum();
            for p in powers.iter_mut() {
                *p /= norm;
            }
        }

        Spectrum::new(freqs, powers)
    }

    fn segment_freqs(&self, sample_rate: u32) -> Vec<f64> {
        (0..=self.fft_size / 2)
            .map(|i| bin_frequency(i, sample_rate, self.fft_size))
            .collect()
    }

    /// Windows `segment` into the complex buffer (zero padded) and transforms it in place.
    fn transform_segment(&mut self, segment: &[f64]) {
        assert_eq!(self.fft_buffer_complex.len(), self.fft_size);
        assert_eq!(self.window.len(), self.fft_size);

        for (i, output) in self.fft_buffer_complex.iter_mut().enumerate() {
            let input = segment.get(i).copied().map_or(0.0, finite_or_zero);
            output.re = input * self.window[i];
            output.im = 0.0;
        }

        self.fft_plan.process_with_scratch(&mut self.fft_buffer_complex, &mut self.fft_scratch);
    }
}

/// Overlapping fixed-size windows over a block. A block shorter than one segment yields
/// itself once, to be zero padded by the consumer.
struct Segments<'a> {
    samples: &'a [f64],
    size: usize,
    step: usize,
    offset: usize,
    done: bool,
}

impl<'a> Segments<'a> {
    fn new(samples: &'a [f64], size: usize, overlap: usize) -> Self {
        Self {
            samples,
            size,
            step: size - overlap,
            offset: 0,
            done: false,
        }
    }
}

impl<'a> Iterator for Segments<'a> {
    type Item = &'a [f64];

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        if self.samples.len() < self.size {
            self.done = true;
            return Some(self.samples);
        }

        if self.offset + self.size > self.samples.len() {
            self.done = true;
            return None;
        }

        let segment = &self.samples[self.offset..self.offset + self.size];
        self.offset += self.step;
        Some(segment)
    }
}

fn finite_or_zero(x: f64) -> f64 {
    if x.is_finite() {
        x
    } else {
        0.0
    }
}

fn is_silent(samples: &[f64]) -> bool {
    samples.iter().all(|&x| finite_or_zero(x) == 0.0)
}

fn make_hann_window(size: usize) -> Box<[f64]> {
    if size == 1 {
        return vec![1.0].into_boxed_slice();
    }
    let mut window = Vec::with_capacity(size);
    for i in 0..size {
        window.push(0.5 * (1.0 - f64::cos(2.0 * std::f64::consts::PI * (i as f64) / (size as f64 - 1.0))));
    }
    window.into_boxed_slice()
}

#[cfg(test)]
mod tests {
    use crate::assert_eq_float;
    use crate::fft::{Segments, SpectralAnalyser, SpectralEstimator};
    use crate::fingerprinter::ConfigError;
    use crate::utils::{bin_frequency, tones};

    const SAMPLE_RATE: u32 = 8192;
    const FFT_SIZE: usize = 256;

    fn strongest_freq(spectrum: &crate::spectrum::Spectrum) -> f64 {
        spectrum.sort_by_power()[0].freq
    }

    #[test]
    fn analyser_names() {
        assert_eq!("pwelch".parse::<SpectralAnalyser>().unwrap(), SpectralAnalyser::Welch);
        assert_eq!("bespoke".parse::<SpectralAnalyser>().unwrap(), SpectralAnalyser::Amplitude);
        assert_eq!("overlap".parse::<SpectralAnalyser>().unwrap(), SpectralAnalyser::Overlap);
        assert!("wavelet".parse::<SpectralAnalyser>().is_err());
    }

    #[test]
    fn bad_segmentation_is_rejected() {
        let samples = [0.1; 1024];
        for (fft_size, overlap) in [(256, 256), (256, 300), (0, 0)] {
            match SpectralAnalyser::Welch.analyze(&samples, SAMPLE_RATE, fft_size, overlap, false) {
                Err(ConfigError::InvalidParameter { .. }) => {}
                other => panic!("expected invalid parameter for {}/{}, got {:?}", fft_size, overlap, other),
            }
        }
        assert!(SpectralAnalyser::Amplitude.analyze(&samples, SAMPLE_RATE, 0, 0, false).is_err());
    }

    #[test]
    #[should_panic]
    fn estimator_rejects_full_overlap() {
        SpectralEstimator::new(SpectralAnalyser::Overlap, FFT_SIZE, FFT_SIZE);
    }

    #[test]
    fn segments() {
        let data = (0..10).map(|i| i as f64).collect::<Vec<_>>();
        let segs = Segments::new(&data, 4, 2).collect::<Vec<_>>();
        assert_eq!(segs, vec![&data[0..4], &data[2..6], &data[4..8], &data[6..10]]);

        let short = [1.0, 2.0];
        assert_eq!(Segments::new(&short, 4, 2).count(), 1);
    }

    #[test]
    fn every_strategy_finds_a_tone() {
        let freq = bin_frequency(40, SAMPLE_RATE, FFT_SIZE);
        let samples = tones(1024, SAMPLE_RATE, &[(freq, 0.5)]);

        for analyser in [SpectralAnalyser::Amplitude, SpectralAnalyser::Welch, SpectralAnalyser::Overlap] {
            let spectrum = analyser.analyze(&samples, SAMPLE_RATE, FFT_SIZE, FFT_SIZE / 2, false).unwrap();
            assert_eq!(spectrum.freqs().len(), spectrum.powers().len());
            assert!(spectrum.powers().iter().all(|p| *p >= 0.0 && p.is_finite()));
            assert_eq_float!(strongest_freq(&spectrum), freq, 1e-9);
        }
    }

    #[test]
    fn amplitude_drops_dc_and_mirror() {
        let samples = tones(512, SAMPLE_RATE, &[(1000.0, 0.5)]);
        let spectrum = SpectralAnalyser::Amplitude.analyze(&samples, SAMPLE_RATE, FFT_SIZE, 0, false).unwrap();
        assert_eq!(spectrum.len(), 256);
        assert_eq_float!(spectrum.freqs()[0], 16.0);
        assert_eq_float!(spectrum.freqs()[255], 4096.0);
    }

    #[test]
    fn welch_grid() {
        let samples = tones(1024, SAMPLE_RATE, &[(1000.0, 0.5)]);
        let spectrum = SpectralAnalyser::Welch.analyze(&samples, SAMPLE_RATE, FFT_SIZE, 128, false).unwrap();
        assert_eq!(spectrum.len(), FFT_SIZE / 2 + 1);
        for (i, f) in spectrum.freqs().iter().enumerate() {
            assert_eq_float!(*f, i as f64 * 32.0);
        }
    }

    #[test]
    fn silent_block_gives_zero_spectrum() {
        let samples = vec![0.0; 1024];
        for analyser in [SpectralAnalyser::Amplitude, SpectralAnalyser::Welch, SpectralAnalyser::Overlap] {
            for db in [false, true] {
                let spectrum = analyser.analyze(&samples, SAMPLE_RATE, FFT_SIZE, 64, db).unwrap();
                assert!(!spectrum.is_empty());
                assert!(spectrum.powers().iter().all(|&p| p == 0.0));
            }
        }
    }

    #[test]
    fn non_finite_samples_do_not_propagate() {
        let mut samples = tones(1024, SAMPLE_RATE, &[(1000.0, 0.5)]);
        samples[10] = f64::NAN;
        samples[20] = f64::INFINITY;
        for analyser in [SpectralAnalyser::Amplitude, SpectralAnalyser::Welch, SpectralAnalyser::Overlap] {
            let spectrum = analyser.analyze(&samples, SAMPLE_RATE, FFT_SIZE, 128, false).unwrap();
            assert!(spectrum.powers().iter().all(|p| p.is_finite()));
        }

        let nans = vec![f64::NAN; 512];
        let spectrum = SpectralAnalyser::Welch.analyze(&nans, SAMPLE_RATE, FFT_SIZE, 128, false).unwrap();
        assert!(spectrum.powers().iter().all(|&p| p == 0.0));
    }

    #[test]
    fn short_block_is_zero_padded() {
        let freq = bin_frequency(20, SAMPLE_RATE, FFT_SIZE);
        let samples = tones(200, SAMPLE_RATE, &[(freq, 0.5)]);
        let spectrum = SpectralAnalyser::Welch.analyze(&samples, SAMPLE_RATE, FFT_SIZE, 128, false).unwrap();
        assert_eq!(spectrum.len(), FFT_SIZE / 2 + 1);
        assert_eq_float!(strongest_freq(&spectrum), freq, 1e-9);
    }

    #[test]
    fn db_scale_is_bounded_below_by_zero() {
        let samples = tones(1024, SAMPLE_RATE, &[(1000.0, 0.5)]);
        let linear = SpectralAnalyser::Overlap.analyze(&samples, SAMPLE_RATE, FFT_SIZE, 192, false).unwrap();
        let db = SpectralAnalyser::Overlap.analyze(&samples, SAMPLE_RATE, FFT_SIZE, 192, true).unwrap();
        assert!(db.powers().iter().all(|&p| p >= 0.0));
        for (lin, db) in linear.powers().iter().zip(db.powers()) {
            if *lin >= 1.0 {
                assert_eq_float!(*db, 10.0 * lin.log10(), 1e-9);
            } else {
                assert_eq!(*db, 0.0);
            }
        }
    }

    #[test]
    fn window_normalization_scales_overlap_sum() {
        let samples = tones(1024, SAMPLE_RATE, &[(1000.0, 0.5)]);
        let plain = SpectralEstimator::new(SpectralAnalyser::Overlap, FFT_SIZE, 192).analyze(&samples, SAMPLE_RATE);
        let mut normalized = SpectralEstimator::new(SpectralAnalyser::Overlap, FFT_SIZE, 192).with_window_normalization(true);
        let normalized = normalized.analyze(&samples, SAMPLE_RATE);

        let energy: f64 = (0..FFT_SIZE)
            .map(|i| 0.5 * (1.0 - f64::cos(2.0 * std::f64::consts::PI * i as f64 / (FFT_SIZE as f64 - 1.0))))
            .map(|w| w * w)
            .sum();
        for (a, b) in plain.powers().iter().zip(normalized.powers()) {
            assert_eq_float!(a / energy, *b, 1e-9);
        }
    }

    #[test]
    fn estimator_is_reusable() {
        let samples = tones(1024, SAMPLE_RATE, &[(1000.0, 0.5)]);
        let mut estimator = SpectralEstimator::new(SpectralAnalyser::Welch, FFT_SIZE, 128);
        let first = estimator.analyze(&samples, SAMPLE_RATE);
        let second = estimator.analyze(&samples, SAMPLE_RATE);
        assert_eq!(first, second);
    }
}
