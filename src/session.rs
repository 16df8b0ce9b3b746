use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::fingerprint_matcher::{AudioHit, MatcherStats, TemporalMatcher};
use crate::fingerprinter::{Configuration, Fingerprinter, ProcessError};
use crate::library::FingerprintLibrary;
use crate::stream::BlockSource;

/// What a finished [ListenSession::run] saw.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub blocks: usize,
    pub fingerprints: usize,
    pub stats: MatcherStats,
    /// Ranking after the last block.
    pub ranking: Vec<AudioHit>,
}

impl SessionSummary {
    pub fn best(&self) -> Option<&AudioHit> {
        self.ranking.first()
    }
}

/// Identifies a single live stream against a fingerprint library.
pub struct ListenSession {
    config: Configuration,
    fingerprinter: Fingerprinter,
    matcher: TemporalMatcher,
    cancel: Arc<AtomicBool>,
}

impl ListenSession {
    pub fn new(config: &Configuration, library: Arc<FingerprintLibrary>) -> Result<Self, ProcessError> {
        Ok(Self {
            config: config.clone(),
            fingerprinter: Fingerprinter::new(config)?,
            matcher: TemporalMatcher::new(library),
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Flag that stops [run](Self::run) once the block in flight is done.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn matcher(&self) -> &TemporalMatcher {
        &self.matcher
    }

    /// Reads `source` until it ends or the session is cancelled. Every
    /// [evaluate_interval](Configuration::evaluate_interval) blocks the current ranking is
    /// handed to `on_ranking` if it is not empty.
    ///
    /// The source is closed on every exit path.
    pub fn run<S, F>(&mut self, source: &mut S, mut on_ranking: F) -> Result<SessionSummary, ProcessError>
    where
        S: BlockSource + ?Sized,
        F: FnMut(&[AudioHit]),
    {
        self.config.check_sample_rate(source.sample_rate())?;
        source
            .start()
            .map_err(|e| ProcessError::stream(source.name(), e))?;

        let result = self.listen(source, &mut on_ranking);
        let closed = source.close();
        let summary = result?;
        closed.map_err(|e| ProcessError::stream(source.name(), e))?;
        Ok(summary)
    }

    fn listen<S, F>(&mut self, source: &mut S, on_ranking: &mut F) -> Result<SessionSummary, ProcessError>
    where
        S: BlockSource + ?Sized,
        F: FnMut(&[AudioHit]),
    {
        let interval = self.config.evaluate_interval();
        let threshold = self.config.time_delta_threshold();
        let mut blocks = 0;
        let mut fingerprints = 0;

        while !self.cancel.load(Ordering::SeqCst) {
            let block = match source.read() {
                Ok(Some(block)) => block,
                Ok(None) => break,
                Err(e) => return Err(ProcessError::stream(source.name(), e)),
            };

            blocks += 1;
            if let Some(fp) = self.fingerprinter.process(&block) {
                fingerprints += 1;
                self.matcher.register(fp.key(), block.timestamp);
            }

            if blocks % interval == 0 {
                let ranking = self.matcher.evaluate(threshold);
                if !ranking.is_empty() {
                    on_ranking(&ranking);
                }
            }
        }

        if self.cancel.load(Ordering::SeqCst) {
            log::info!("{}: cancelled after {} blocks", source.name(), blocks);
        }

        Ok(SessionSummary {
            blocks,
            fingerprints,
            stats: self.matcher.stats(),
            ranking: self.matcher.evaluate(threshold),
        })
    }
}
