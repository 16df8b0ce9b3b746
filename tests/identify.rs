use std::f64::consts::PI;
use std::io::Cursor;
use std::sync::Arc;

use rusty_spectre::{
    build_library, AudioHit, BlockSource, Configuration, FingerprintLibrary, Fingerprinter, ListenSession, MemorySource,
    RawPcmSource, SampleFormat, TemporalMatcher,
};

/// Block `k` holds two steady tones centred on FFT bins chosen by `bins(k)`.
fn song(config: &Configuration, blocks: usize, bins: impl Fn(usize) -> (usize, usize)) -> Vec<f64> {
    let rate = f64::from(config.sample_rate());
    let bin_width = rate / config.fft_size() as f64;
    let mut samples = Vec::with_capacity(blocks * config.block_size());
    for k in 0..blocks {
        let (low, high) = bins(k);
        let (low, high) = (low as f64 * bin_width, high as f64 * bin_width);
        samples.extend((0..config.block_size()).map(|i| {
            let t = i as f64 / rate;
            0.4 * (2.0 * PI * low * t).sin() + 0.4 * (2.0 * PI * high * t).sin()
        }));
    }
    samples
}

fn song_a(config: &Configuration) -> Vec<f64> {
    song(config, 40, |k| (60 + (k * 7) % 80, 200 + (k * 13) % 200))
}

fn song_b(config: &Configuration) -> Vec<f64> {
    song(config, 40, |k| (150 + (k * 11) % 40, 420 + (k * 3) % 50))
}

fn source(name: &str, config: &Configuration, samples: Vec<f64>) -> MemorySource {
    MemorySource::from_normalized(name, samples, config.sample_rate(), config.block_size())
}

/// Fingerprints `excerpt` block by block and ranks it against `library`.
fn identify(
    config: &Configuration,
    library: &Arc<FingerprintLibrary>,
    excerpt: Vec<f64>,
) -> (Vec<AudioHit>, TemporalMatcher) {
    let mut fingerprinter = Fingerprinter::new(config).unwrap();
    let mut matcher = TemporalMatcher::new(Arc::clone(library));
    let mut query = source("live", config, excerpt);
    query.start().unwrap();
    while let Some(block) = query.read().unwrap() {
        if let Some(fp) = fingerprinter.process(&block) {
            matcher.register(fp.key(), block.timestamp);
        }
    }
    (matcher.evaluate(config.time_delta_threshold()), matcher)
}

#[test]
fn time_shifted_excerpt_is_identified() {
    let config = Configuration::default();
    let sources = vec![
        source("a.wav", &config, song_a(&config)),
        source("b.wav", &config, song_b(&config)),
    ];
    let (library, stats) = build_library(sources, &config).unwrap();
    assert_eq!(stats.sources.len(), 2);
    assert_eq!(stats.fingerprints(), 80);
    let library = Arc::new(library);

    let excerpt = song_a(&config)[5 * config.block_size()..].to_vec();
    let (ranking, matcher) = identify(&config, &library, excerpt);
    assert_eq!(&*ranking[0].source, "a.wav");
    assert_eq!(ranking[0].hit_count, 34);
    assert!(ranking[0].confidence() > 0.9);
    assert!(ranking.iter().filter(|h| &*h.source == "b.wav").all(|h| h.hit_count == 0));
    assert!(matcher.events("b.wav").is_empty());
}

#[test]
fn offset_inside_a_block_is_identified() {
    let config = Configuration::default();
    let sources = vec![
        source("a.wav", &config, song_a(&config)),
        source("b.wav", &config, song_b(&config)),
    ];
    let library = Arc::new(build_library(sources, &config).unwrap().0);

    // a small shift and a half-block shift
    for (offset, min_hits) in [(100, 30), (config.block_size() / 2, 10)] {
        let excerpt = song_a(&config)[offset..].to_vec();
        let (ranking, _) = identify(&config, &library, excerpt);
        let best = &ranking[0];
        assert_eq!(&*best.source, "a.wav", "offset {}", offset);
        assert!(best.hit_count >= min_hits, "offset {}: {}", offset, best);
        assert!(best.confidence() > 0.9, "offset {}: {}", offset, best);
    }
}

#[test]
fn live_raw_pcm_session() {
    let reference = Configuration::preset_reference();
    let live = Configuration::preset_live();
    let (library, _) = build_library(vec![source("a.wav", &reference, song_a(&reference))], &reference).unwrap();

    let bytes = song_a(&live)[7 * live.block_size()..]
        .iter()
        .flat_map(|&x| ((x * f64::from(i16::MAX)).round() as i16).to_le_bytes())
        .collect::<Vec<_>>();
    let mut capture = RawPcmSource::new("live", Cursor::new(bytes), SampleFormat::Int16, 11025, live.block_size());

    let mut session = ListenSession::new(&live, Arc::new(library)).unwrap();
    let mut updates = 0;
    let summary = session.run(&mut capture, |_| updates += 1).unwrap();

    assert_eq!(summary.blocks, 33);
    assert!(updates > 0);
    let best = summary.best().unwrap();
    assert_eq!(&*best.source, "a.wav");
    assert!(best.confidence() > 0.9);
    assert!(best.hit_count >= 30);
}

#[test]
fn repeated_material_counts_clashes() {
    let config = Configuration::default();
    let once = song(&config, 3, |k| (70 + 20 * k, 250 + 50 * k));
    let mut twice = once.clone();
    twice.extend_from_slice(&once);

    let (library, stats) = build_library(vec![source("twice.wav", &config, twice)], &config).unwrap();
    assert_eq!(stats.sources[0].fingerprints, 6);
    assert_eq!(stats.clashes(), 3);
    assert_eq!(library.len(), 3);

    // the second pass overwrote the first
    let mut fingerprinter = Fingerprinter::new(&config).unwrap();
    let mut first = source("q", &config, once);
    first.start().unwrap();
    let block = first.read().unwrap().unwrap();
    let key = *fingerprinter.process(&block).unwrap().key();
    let entry = library.get(&key).unwrap();
    assert!((entry.timestamp - 3.0 * config.block_duration()).abs() < 1e-9);
}
