use std::cmp::Ordering;
use std::fmt::{Display, Formatter};

/// Power spectrum of a single block: index-aligned frequencies (Hz, ascending) and powers.
///
/// Every transform returns a new spectrum, the receiver is never modified.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Spectrum {
    freqs: Vec<f64>,
    powers: Vec<f64>,
}

/// A single `(frequency, power)` bin lifted out of a [Spectrum].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub freq: f64,
    pub power: f64,
}

impl Spectrum {
    /// Creates a spectrum from parallel frequency and power sequences.
    ///
    /// # Panics
    ///
    /// Panics if the sequences differ in length.
    pub fn new(freqs: Vec<f64>, powers: Vec<f64>) -> Self {
        assert_eq!(freqs.len(), powers.len(), "frequency and power sequences must be index-aligned");
        debug_assert!(freqs.windows(2).all(|w| w[0] <= w[1]), "frequencies must be non-decreasing");
        Self { freqs, powers }
    }

    /// Spectrum with the given frequency grid and zero power everywhere.
    pub fn zeros(freqs: Vec<f64>) -> Self {
        let powers = vec![0.0; freqs.len()];
        Self { freqs, powers }
    }

    pub fn len(&self) -> usize {
        self.freqs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.freqs.is_empty()
    }

    pub fn freqs(&self) -> &[f64] {
        &self.freqs
    }

    pub fn powers(&self) -> &[f64] {
        &self.powers
    }

    pub fn iter(&self) -> impl Iterator<Item = Candidate> + '_ {
        self.freqs
            .iter()
            .zip(self.powers.iter())
            .map(|(&freq, &power)| Candidate { freq, power })
    }

    /// Keeps the bins for which `predicate(freq, power)` holds.
    pub fn filter_by(&self, mut predicate: impl FnMut(f64, f64) -> bool) -> Spectrum {
        let mut freqs = Vec::with_capacity(self.len());
        let mut powers = Vec::with_capacity(self.len());
        for c in self.iter() {
            if predicate(c.freq, c.power) {
                freqs.push(c.freq);
                powers.push(c.power);
            }
        }
        Spectrum { freqs, powers }
    }

    /// Keeps bins inside the closed range `[low_freq, high_freq]` whose power exceeds `min_power`.
    pub fn filter(&self, low_freq: f64, high_freq: f64, min_power: f64) -> Spectrum {
        self.filter_by(|freq, power| freq >= low_freq && freq <= high_freq && power > min_power)
    }

    /// Keeps bins that are strict local maxima over a 5-bin neighbourhood:
    /// `P[i-2] < P[i-1] < P[i] > P[i+1] > P[i+2]`.
    ///
    /// After a maximum at `i` the scan resumes at `i + 3`. Neither `i + 1` nor `i + 2`
    /// can qualify because both would need a rising edge where the accepted peak has a
    /// falling one. Spectra shorter than 5 bins have no maxima.
    pub fn maxima(&self) -> Spectrum {
        let p = &self.powers;
        let mut freqs = Vec::new();
        let mut powers = Vec::new();
        if p.len() < 5 {
            return Spectrum { freqs, powers };
        }

        let mut i = 2;
        while i < p.len() - 2 {
            if is_local_max(p[i - 2], p[i - 1], p[i], p[i + 1], p[i + 2]) {
                freqs.push(self.freqs[i]);
                powers.push(p[i]);
                i += 3;
            } else {
                i += 1;
            }
        }

        Spectrum { freqs, powers }
    }

    /// Drops every bin whose power is below the mean power of the whole spectrum.
    pub fn high_pass(&self) -> Spectrum {
        match self.mean_power() {
            Some(mean) => self.filter_by(|_, power| power >= mean),
            None => Spectrum::default(),
        }
    }

    /// Arithmetic mean of all powers, `None` for an empty spectrum.
    pub fn mean_power(&self) -> Option<f64> {
        if self.is_empty() {
            return None;
        }
        Some(self.powers.iter().sum::<f64>() / self.len() as f64)
    }

    /// All bins ordered strongest first. Equal powers keep their frequency order.
    pub fn sort_by_power(&self) -> Vec<Candidate> {
        let mut candidates = self.iter().collect::<Vec<_>>();
        candidates.sort_by(|a, b| b.power.partial_cmp(&a.power).unwrap_or(Ordering::Equal));
        candidates
    }

    /// The `n` strongest bins, returned in ascending frequency order.
    pub fn top_by_power(&self, n: usize) -> Spectrum {
        if n >= self.len() {
            return self.clone();
        }

        let mut strongest = self.iter().enumerate().collect::<Vec<_>>();
        strongest.sort_by(|(_, a), (_, b)| b.power.partial_cmp(&a.power).unwrap_or(Ordering::Equal));
        strongest.truncate(n);
        strongest.sort_by_key(|(i, _)| *i);

        let (freqs, powers) = strongest.into_iter().map(|(_, c)| (c.freq, c.power)).unzip();
        Spectrum { freqs, powers }
    }

    /// Converts linear power to decibels, `10 * log10(x)` for `x >= 1` and `0` otherwise.
    pub fn to_db(&self) -> Spectrum {
        let powers = self.powers.iter().map(|&x| power_to_db(x)).collect();
        Spectrum { freqs: self.freqs.clone(), powers }
    }
}

pub(crate) fn power_to_db(x: f64) -> f64 {
    if x < 1.0 {
        0.0
    } else {
        10.0 * x.log10()
    }
}

fn is_local_max(p0: f64, p1: f64, x: f64, p3: f64, p4: f64) -> bool {
    p0 < p1 && p1 < x && x > p3 && p3 > p4
}

impl Display for Spectrum {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (i, c) in self.iter().enumerate() {
            if i > 0 {
                write!(f, "  ")?;
            }
            write!(f, "{:7.2}({:.2})", c.freq, c.power)?;
        }
        Ok(())
    }
}
