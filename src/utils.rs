#[doc(hidden)]
#[macro_export]
macro_rules! assert_eq_float {
    ($a:expr, $b:expr) => {
        $crate::assert_eq_float!($a, $b, 0.00001);
    };
    ($a:expr, $b:expr, $eps:expr) => {
        assert!(($a - $b).abs() < $eps, "{} != {} (eps {})", $a, $b, $eps);
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! assert_eq_float_slice {
    ($a:expr, $b:expr) => {
        $crate::assert_eq_float_slice!($a, $b, 0.00001);
    };
    ($a:expr, $b:expr, $eps:expr) => {
        let a = $a;
        let b = $b;

        assert_eq!(a.len(), b.len());
        for (a, b) in std::iter::zip(a, b) {
            $crate::assert_eq_float!(a, b, $eps);
        }
    };
}

/// Frequency of FFT bin `bin` for a transform of `fft_size` points.
pub(crate) fn bin_frequency(bin: usize, sample_rate: u32, fft_size: usize) -> f64 {
    bin as f64 * f64::from(sample_rate) / fft_size as f64
}

/// Sum of sine tones, each given as `(frequency, amplitude)`.
#[allow(unused)]
pub(crate) fn tones(len: usize, sample_rate: u32, tones: &[(f64, f64)]) -> Vec<f64> {
    (0..len)
        .map(|i| {
            let t = i as f64 / f64::from(sample_rate);
            tones
                .iter()
                .map(|&(freq, amp)| amp * f64::sin(2.0 * std::f64::consts::PI * freq * t))
                .sum()
        })
        .collect()
}
