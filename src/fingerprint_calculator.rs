use std::fmt::{Display, Formatter};

use sha1::{Digest, Sha1};

use crate::quantize::FrequencyQuantizer;
use crate::spectrum::{Candidate, Spectrum};

/// Length of a fingerprint key in bytes (SHA-1 digest).
pub const KEY_LEN: usize = 20;

/// Library lookup key derived from the banded frequencies of one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FingerprintKey([u8; KEY_LEN]);

impl FingerprintKey {
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl From<[u8; KEY_LEN]> for FingerprintKey {
    fn from(bytes: [u8; KEY_LEN]) -> Self {
        FingerprintKey(bytes)
    }
}

impl Display for FingerprintKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for b in self.0.iter() {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

/// Key of a block together with the quantized per-band frequencies that produced it.
///
/// The band frequencies are informational, equality only considers the key.
#[derive(Debug, Clone)]
pub struct Fingerprint {
    key: FingerprintKey,
    bands: Vec<Option<f64>>,
}

impl Fingerprint {
    pub fn key(&self) -> &FingerprintKey {
        &self.key
    }

    /// Quantized frequency per band in ascending band order, `None` for an empty band.
    pub fn bands(&self) -> &[Option<f64>] {
        &self.bands
    }

    pub fn candidates(&self) -> usize {
        self.bands.iter().filter(|b| b.is_some()).count()
    }
}

impl PartialEq for Fingerprint {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for Fingerprint {}

impl Display for Fingerprint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key)?;
        for band in self.bands.iter() {
            match band {
                Some(freq) => write!(f, " {:7.1}", freq)?,
                None => write!(f, " {:>7}", "-")?,
            }
        }
        Ok(())
    }
}

/// Reduces a shaped spectrum to a [Fingerprint] by keeping the strongest bin of each
/// frequency band and hashing the quantized band frequencies.
#[derive(Debug, Clone)]
pub struct FingerprintCalculator {
    lower_freq: f64,
    upper_freq: f64,
    num_bands: usize,
    required_candidates: usize,
    quantizer: FrequencyQuantizer,
}

impl FingerprintCalculator {
    pub fn new(
        lower_freq: f64,
        upper_freq: f64,
        num_bands: usize,
        required_candidates: usize,
        quantizer: FrequencyQuantizer,
    ) -> Self {
        assert!(num_bands > 0);
        assert!(upper_freq > lower_freq);

        Self {
            lower_freq,
            upper_freq,
            num_bands,
            required_candidates,
            quantizer,
        }
    }

    pub fn num_bands(&self) -> usize {
        self.num_bands
    }

    /// Band index of `freq`, or `None` outside `[lower_freq, upper_freq]`.
    pub fn band(&self, freq: f64) -> Option<usize> {
        if !(freq >= self.lower_freq && freq <= self.upper_freq) {
            return None;
        }
        let position = (freq - self.lower_freq) / (self.upper_freq - self.lower_freq);
        let band = (position * (self.num_bands - 1) as f64 + 0.5).floor() as usize;
        Some(band.min(self.num_bands - 1))
    }

    /// Strongest bin of every band. Bins without positive power never win a band and the
    /// first bin seen wins a tie.
    pub fn band_candidates(&self, spectrum: &Spectrum) -> Vec<Option<Candidate>> {
        let mut bands: Vec<Option<Candidate>> = vec![None; self.num_bands];
        for c in spectrum.iter() {
            if !(c.power > 0.0) {
                continue;
            }
            let band = match self.band(c.freq) {
                Some(band) => band,
                None => continue,
            };
            match bands[band] {
                Some(best) if best.power >= c.power => {}
                _ => bands[band] = Some(c),
            }
        }
        bands
    }

    /// Fingerprint of `spectrum`, or `None` when fewer than the required number of bands
    /// hold a candidate.
    pub fn extract(&self, spectrum: &Spectrum) -> Option<Fingerprint> {
        let bands = self
            .band_candidates(spectrum)
            .into_iter()
            .map(|c| c.map(|c| self.quantizer.quantize(c.freq)))
            .collect::<Vec<_>>();

        let candidates = bands.iter().filter(|b| b.is_some()).count();
        if candidates < self.required_candidates.max(1) {
            return None;
        }

        Some(Fingerprint {
            key: digest(&bands),
            bands,
        })
    }
}

/// Hashes band frequencies in band order. Every band contributes a presence byte so that
/// the same frequencies in different bands never produce the same input.
pub(crate) fn digest(bands: &[Option<f64>]) -> FingerprintKey {
    let mut hasher = Sha1::new();
    for band in bands {
        match band {
            Some(freq) => {
                hasher.update([1u8]);
                hasher.update(freq.to_le_bytes());
            }
            None => hasher.update([0u8]),
        }
    }

    let mut key = [0u8; KEY_LEN];
    key.copy_from_slice(&hasher.finalize());
    FingerprintKey(key)
}

#[cfg(test)]
mod tests {
    use crate::fingerprint_calculator::{digest, FingerprintCalculator, FingerprintKey};
    use crate::quantize::{FrequencyQuantizer, FINE_FREQUENCY_STEP};
    use crate::spectrum::Spectrum;

    fn calculator() -> FingerprintCalculator {
        FingerprintCalculator::new(300.0, 5400.0, 6, 2, FrequencyQuantizer::default())
    }

    fn spectrum(bins: &[(f64, f64)]) -> Spectrum {
        let (freqs, powers) = bins.iter().copied().unzip();
        Spectrum::new(freqs, powers)
    }

    #[test]
    fn band_mapping() {
        let calc = calculator();
        assert_eq!(calc.band(299.9), None);
        assert_eq!(calc.band(5400.1), None);
        assert_eq!(calc.band(300.0), Some(0));
        assert_eq!(calc.band(5400.0), Some(5));
        assert_eq!(calc.band(1001.2), Some(1));
        assert_eq!(calc.band(2000.0), Some(2));
        assert_eq!(calc.band(f64::NAN), None);
    }

    #[test]
    fn extraction_is_deterministic() {
        let calc = calculator();
        let s = spectrum(&[(500.0, 3.0), (1000.0, 5.0), (2000.0, 4.0), (4000.0, 2.0)]);
        let a = calc.extract(&s).unwrap();
        let b = calc.extract(&s).unwrap();
        assert_eq!(a.key().as_bytes(), b.key().as_bytes());
        assert_eq!(a.bands(), b.bands());
        assert_eq!(a.candidates(), 4);
    }

    #[test]
    fn too_few_candidates_yield_nothing() {
        let calc = calculator();
        assert!(calc.extract(&Spectrum::default()).is_none());
        assert!(calc.extract(&spectrum(&[(1000.0, 5.0), (1010.0, 6.0)])).is_none());
        assert!(calc.extract(&spectrum(&[(1000.0, 5.0), (2000.0, 0.0)])).is_none());
        assert!(calc.extract(&spectrum(&[(1000.0, 5.0), (2000.0, 1.0)])).is_some());
    }

    #[test]
    fn quantization_absorbs_jitter() {
        let calc = calculator();
        let a = calc.extract(&spectrum(&[(1001.2, 5.0), (2000.0, 4.0)])).unwrap();
        let b = calc.extract(&spectrum(&[(1003.9, 7.0), (1998.0, 2.0)])).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.bands(), &[None, Some(1000.0), Some(2000.0), None, None, None]);

        let fine = FingerprintCalculator::new(300.0, 5400.0, 6, 2, FrequencyQuantizer::new(FINE_FREQUENCY_STEP));
        let a = fine.extract(&spectrum(&[(1001.2, 5.0), (2000.0, 4.0)])).unwrap();
        let b = fine.extract(&spectrum(&[(1003.9, 7.0), (1998.0, 2.0)])).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn band_order_matters() {
        let a = digest(&[Some(1000.0), None, Some(2000.0)]);
        let b = digest(&[Some(1000.0), Some(2000.0), None]);
        let c = digest(&[Some(2000.0), None, Some(1000.0)]);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(b, c);
    }

    #[test]
    fn bins_outside_the_range_are_ignored() {
        let calc = calculator();
        let with_noise = spectrum(&[(100.0, 50.0), (1000.0, 5.0), (2000.0, 4.0), (5500.0, 50.0)]);
        let without = spectrum(&[(1000.0, 5.0), (2000.0, 4.0)]);
        assert_eq!(calc.extract(&with_noise), calc.extract(&without));
    }

    #[test]
    fn strongest_bin_wins_and_ties_keep_the_first() {
        let calc = calculator();
        let s = spectrum(&[(950.0, 5.0), (1080.0, 5.0), (1200.0, 3.0), (2000.0, 4.0)]);
        let fp = calc.extract(&s).unwrap();
        assert_eq!(fp.bands()[1], Some(950.0));

        let s = spectrum(&[(950.0, 5.0), (1080.0, 6.0), (2000.0, 4.0)]);
        assert_eq!(calc.extract(&s).unwrap().bands()[1], Some(1080.0));
    }

    #[test]
    fn key_display_is_hex() {
        let key = FingerprintKey::from([0xab; 20]);
        assert_eq!(key.to_string(), "ab".repeat(20));
    }
}
