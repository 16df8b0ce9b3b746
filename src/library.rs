use std::collections::{BTreeSet, HashMap};
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use rayon::prelude::*;

use crate::fingerprint_calculator::FingerprintKey;
use crate::fingerprinter::{Configuration, Fingerprinter, ProcessError};
use crate::stream::BlockSource;

/// Where a fingerprint was seen in the reference corpus.
#[derive(Debug, Clone, PartialEq)]
pub struct LibraryEntry {
    pub source: Arc<str>,
    pub timestamp: f64,
}

/// Key to reference position map. A colliding key keeps the most recent write.
#[derive(Debug, Default, Clone)]
pub struct FingerprintLibrary {
    entries: HashMap<FingerprintKey, LibraryEntry>,
    sources: BTreeSet<Arc<str>>,
}

impl FingerprintLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `key`, overwriting any previous entry. Returns the overwritten entry, which
    /// callers count as a hash clash.
    pub fn put(&mut self, key: FingerprintKey, source: &str, timestamp: f64) -> Option<LibraryEntry> {
        let source = match self.sources.get(source) {
            Some(s) => Arc::clone(s),
            None => {
                let s: Arc<str> = Arc::from(source);
                self.sources.insert(Arc::clone(&s));
                s
            }
        };
        self.entries.insert(key, LibraryEntry { source, timestamp })
    }

    pub fn get(&self, key: &FingerprintKey) -> Option<&LibraryEntry> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Identifiers of every source ever written, in ascending order.
    pub fn sources(&self) -> impl Iterator<Item = &str> + '_ {
        self.sources.iter().map(|s| s.as_ref())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FingerprintKey, &LibraryEntry)> + '_ {
        self.entries.iter()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceStats {
    pub name: String,
    pub blocks: usize,
    pub fingerprints: usize,
    /// Writes that replaced an existing key, from this or any earlier source.
    pub clashes: usize,
}

impl Display for SourceStats {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} blocks, {} fingerprints, {} hash clashes",
            self.name, self.blocks, self.fingerprints, self.clashes
        )
    }
}

/// Outcome of [build_library], one entry per source in input order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildStats {
    pub sources: Vec<SourceStats>,
}

impl BuildStats {
    pub fn blocks(&self) -> usize {
        self.sources.iter().map(|s| s.blocks).sum()
    }

    pub fn fingerprints(&self) -> usize {
        self.sources.iter().map(|s| s.fingerprints).sum()
    }

    pub fn clashes(&self) -> usize {
        self.sources.iter().map(|s| s.clashes).sum()
    }
}

impl Display for BuildStats {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} sources, {} blocks, {} fingerprints, {} hash clashes",
            self.sources.len(),
            self.blocks(),
            self.fingerprints(),
            self.clashes()
        )
    }
}

struct Ingested {
    name: String,
    blocks: usize,
    entries: Vec<(FingerprintKey, f64)>,
}

/// Fingerprints every block of every source in parallel and merges the results into a
/// library in input order once all sources are done.
///
/// The first failing source aborts the build.
pub fn build_library<S>(sources: Vec<S>, config: &Configuration) -> Result<(FingerprintLibrary, BuildStats), ProcessError>
where
    S: BlockSource + Send,
{
    config.validate()?;

    let ingested = sources
        .into_par_iter()
        .map(|source| ingest(source, config))
        .collect::<Vec<_>>();

    let mut library = FingerprintLibrary::new();
    let mut stats = BuildStats::default();
    for result in ingested {
        let ingested = result?;
        let mut clashes = 0;
        for (key, timestamp) in ingested.entries.iter() {
            if let Some(previous) = library.put(*key, &ingested.name, *timestamp) {
                log::debug!(
                    "{} at {:.2}s replaces {} at {:.2}s for {}",
                    ingested.name,
                    timestamp,
                    previous.source,
                    previous.timestamp,
                    key
                );
                clashes += 1;
            }
        }

        let source_stats = SourceStats {
            name: ingested.name,
            blocks: ingested.blocks,
            fingerprints: ingested.entries.len(),
            clashes,
        };
        if source_stats.fingerprints == 0 {
            log::warn!("{}: no fingerprints in {} blocks", source_stats.name, source_stats.blocks);
        } else {
            log::info!("{}", source_stats);
        }
        stats.sources.push(source_stats);
    }

    Ok((library, stats))
}

fn ingest<S: BlockSource>(mut source: S, config: &Configuration) -> Result<Ingested, ProcessError> {
    config.check_sample_rate(source.sample_rate())?;
    let mut fingerprinter = Fingerprinter::new(config)?;
    let name = source.name().to_string();

    source.start().map_err(|e| ProcessError::stream(&name, e))?;

    let mut blocks = 0;
    let mut entries = Vec::new();
    let result = loop {
        match source.read() {
            Ok(Some(block)) => {
                blocks += 1;
                if let Some(fp) = fingerprinter.process(&block) {
                    entries.push((*fp.key(), block.timestamp));
                }
            }
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        }
    };

    let closed = source.close();
    result.map_err(|e| ProcessError::stream(&name, e))?;
    closed.map_err(|e| ProcessError::stream(&name, e))?;

    Ok(Ingested { name, blocks, entries })
}
