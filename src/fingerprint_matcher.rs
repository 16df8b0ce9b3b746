use std::cmp::Reverse;
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use crate::fingerprint_calculator::FingerprintKey;
use crate::library::FingerprintLibrary;

/// A live fingerprint that resolved against a reference source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchEvent {
    pub query_timestamp: f64,
    pub reference_timestamp: f64,
}

impl MatchEvent {
    /// Difference between the query and reference spacing of two consecutive events.
    fn drift(&self, previous: &MatchEvent) -> f64 {
        let query_delta = self.query_timestamp - previous.query_timestamp;
        let reference_delta = self.reference_timestamp - previous.reference_timestamp;
        (query_delta - reference_delta).abs()
    }
}

/// Ranking entry for one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioHit {
    pub source: Arc<str>,
    /// Temporally consistent consecutive event pairs of this source.
    pub hit_count: usize,
    /// Consistent pairs summed over all sources.
    pub total_count: usize,
}

impl AudioHit {
    /// Share of all consistent pairs that belong to this source, `0.0` when there are none.
    pub fn confidence(&self) -> f64 {
        if self.total_count == 0 {
            return 0.0;
        }
        self.hit_count as f64 / self.total_count as f64
    }
}

impl Display for AudioHit {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{} ({:.1}%) - {}",
            self.hit_count,
            self.total_count,
            100.0 * self.confidence(),
            self.source
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatcherStats {
    /// Fingerprints passed to [TemporalMatcher::register].
    pub registered: usize,
    /// Registered fingerprints found in the library.
    pub matched: usize,
    /// Sources with at least one match event.
    pub sources: usize,
}

impl Display for MatcherStats {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} fingerprints, {} library hits across {} sources",
            self.registered, self.matched, self.sources
        )
    }
}

/// Per-session match state: an append-only event list per reference source.
pub struct TemporalMatcher {
    library: Arc<FingerprintLibrary>,
    events: HashMap<Arc<str>, Vec<MatchEvent>>,
    registered: usize,
    matched: usize,
}

impl TemporalMatcher {
    pub fn new(library: Arc<FingerprintLibrary>) -> Self {
        Self {
            library,
            events: HashMap::new(),
            registered: 0,
            matched: 0,
        }
    }

    pub fn library(&self) -> &FingerprintLibrary {
        &self.library
    }

    /// Looks `key` up and records a match event on a hit. Returns whether the key was known.
    pub fn register(&mut self, key: &FingerprintKey, query_timestamp: f64) -> bool {
        self.registered += 1;
        let entry = match self.library.get(key) {
            Some(entry) => entry,
            None => return false,
        };

        log::debug!(
            "{:.2}s matches {} at {:.2}s",
            query_timestamp,
            entry.source,
            entry.timestamp
        );
        self.matched += 1;
        self.events
            .entry(Arc::clone(&entry.source))
            .or_default()
            .push(MatchEvent {
                query_timestamp,
                reference_timestamp: entry.timestamp,
            });
        true
    }

    /// Match events of `source` in arrival order.
    pub fn events(&self, source: &str) -> &[MatchEvent] {
        self.events.get(source).map(|e| e.as_slice()).unwrap_or(&[])
    }

    /// Ranks sources by the number of consecutive event pairs whose query and reference
    /// spacing differ by less than `time_delta_threshold` seconds.
    ///
    /// Sources with fewer than two events are left out. The result is ordered by hit count,
    /// highest first, then by source identifier.
    pub fn evaluate(&self, time_delta_threshold: f64) -> Vec<AudioHit> {
        let mut ranking = Vec::new();
        for (source, events) in self.events.iter() {
            if events.len() < 2 {
                continue;
            }
            let hit_count = events
                .windows(2)
                .filter(|pair| pair[1].drift(&pair[0]) < time_delta_threshold)
                .count();
            log::debug!(
                "{}: {} of {} event pairs within {}s",
                source,
                hit_count,
                events.len() - 1,
                time_delta_threshold
            );
            ranking.push(AudioHit {
                source: Arc::clone(source),
                hit_count,
                total_count: 0,
            });
        }

        let total_count = ranking.iter().map(|hit| hit.hit_count).sum();
        for hit in ranking.iter_mut() {
            hit.total_count = total_count;
        }
        ranking.sort_by(|a, b| {
            Reverse(a.hit_count)
                .cmp(&Reverse(b.hit_count))
                .then_with(|| a.source.cmp(&b.source))
        });
        ranking
    }

    pub fn stats(&self) -> MatcherStats {
        MatcherStats {
            registered: self.registered,
            matched: self.matched,
            sources: self.events.len(),
        }
    }

    /// Forgets all match events, keeping the library.
    pub fn reset(&mut self) {
        self.events.clear();
        self.registered = 0;
        self.matched = 0;
    }
}
