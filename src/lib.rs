//! Block-based acoustic fingerprinting: identify a reference recording from a short,
//! time-shifted capture by checking that repeated fingerprint hits keep their spacing.

mod audio_processor;
mod fft;
mod fingerprint_calculator;
mod fingerprint_matcher;
mod fingerprinter;
mod library;
mod quantize;
mod session;
mod spectrum;
mod stream;
mod utils;

pub use audio_processor::AudioProcessor;
pub use fft::{SpectralAnalyser, SpectralEstimator};
pub use fingerprint_calculator::{Fingerprint, FingerprintCalculator, FingerprintKey};
pub use fingerprint_matcher::{AudioHit, MatchEvent, MatcherStats, TemporalMatcher};
pub use fingerprinter::{ConfigError, Configuration, Fingerprinter, ProcessError};
pub use library::{build_library, BuildStats, FingerprintLibrary, LibraryEntry, SourceStats};
pub use quantize::{FrequencyQuantizer, COARSE_FREQUENCY_STEP, FINE_FREQUENCY_STEP};
pub use session::{ListenSession, SessionSummary};
pub use spectrum::{Candidate, Spectrum};
pub use stream::{Block, BlockSource, MemorySource, RawPcmSource, SampleBuffer, SampleFormat, StreamError};
