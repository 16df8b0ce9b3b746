use std::io;
use std::path::Path;

use anyhow::Context;
use rubato::{
    Resampler, ResamplerConstructionError, SincFixedIn, SincInterpolationParameters, SincInterpolationType,
    WindowFunction,
};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use rusty_spectre::{Configuration, MemorySource};

const RESAMPLER_CHUNK_SIZE: usize = 1024;

/// Decodes a whole audio file into mono blocks at the configured sample rate.
pub fn open(path: impl AsRef<Path>, config: &Configuration) -> anyhow::Result<MemorySource> {
    let path = path.as_ref();
    let (samples, sample_rate) = decode_mono(path).with_context(|| format!("decoding {}", path.display()))?;
    let samples = resample(&samples, sample_rate, config.sample_rate())
        .with_context(|| format!("resampling {}", path.display()))?;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    log::debug!("{}: {} samples at {} Hz", name, samples.len(), config.sample_rate());

    let samples = samples.into_iter().map(f64::from).collect();
    Ok(MemorySource::from_normalized(name, samples, config.sample_rate(), config.block_size()))
}

fn decode_mono(path: &Path) -> anyhow::Result<(Vec<f32>, u32)> {
    let src = std::fs::File::open(path).context("failed to open file")?;
    let mss = MediaSourceStream::new(Box::new(src), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let meta_opts: MetadataOptions = Default::default();
    let fmt_opts: FormatOptions = Default::default();

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &fmt_opts, &meta_opts)
        .context("unsupported format")?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .context("no supported audio tracks")?;

    let dec_opts: DecoderOptions = Default::default();

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &dec_opts)
        .context("unsupported codec")?;

    let track_id = track.id;
    let sample_rate = track.codec_params.sample_rate.context("missing sample rate")?;
    let channels = track.codec_params.channels.context("missing audio channels")?.count();
    anyhow::ensure!(channels > 0, "no audio channels");

    let mut sample_buf = None;
    let mut mono = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(e) if is_end_of_stream(&e) => break,
            Err(e) => return Err(e).context("reading packet"),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(audio_buf) => {
                if sample_buf.is_none() {
                    let spec = *audio_buf.spec();
                    let duration = audio_buf.capacity() as u64;
                    sample_buf = Some(SampleBuffer::<f32>::new(duration, spec));
                }

                if let Some(buf) = &mut sample_buf {
                    buf.copy_interleaved_ref(audio_buf);
                    mono.extend(
                        buf.samples()
                            .chunks(channels)
                            .map(|frame| frame.iter().sum::<f32>() / channels as f32),
                    );
                }
            }
            Err(Error::DecodeError(e)) => log::debug!("{}: skipping packet: {}", path.display(), e),
            Err(e) if is_end_of_stream(&e) => break,
            Err(e) => return Err(e).context("decoding packet"),
        }
    }

    Ok((mono, sample_rate))
}

/// Mono sinc resampler consuming `chunk_size` input frames per call.
pub(crate) fn sinc_resampler(
    input_rate: u32,
    output_rate: u32,
    chunk_size: usize,
) -> Result<SincFixedIn<f32>, ResamplerConstructionError> {
    let params = SincInterpolationParameters {
        sinc_len: 128,
        f_cutoff: 0.95,
        oversampling_factor: 64,
        interpolation: SincInterpolationType::Linear,
        window: WindowFunction::BlackmanHarris2,
    };
    let ratio = f64::from(output_rate) / f64::from(input_rate);
    SincFixedIn::new(ratio, 1.0, params, chunk_size, 1)
}

/// Symphonia signals the end of a stream with an unexpected-EOF I/O error.
fn is_end_of_stream(err: &Error) -> bool {
    matches!(err, Error::IoError(e) if e.kind() == io::ErrorKind::UnexpectedEof)
}

fn resample(input: &[f32], input_rate: u32, output_rate: u32) -> anyhow::Result<Vec<f32>> {
    if input_rate == output_rate || input.is_empty() {
        return Ok(input.to_vec());
    }

    let ratio = f64::from(output_rate) / f64::from(input_rate);
    let mut resampler =
        sinc_resampler(input_rate, output_rate, RESAMPLER_CHUNK_SIZE).context("creating resampler")?;

    let expected = (input.len() as f64 * ratio).round() as usize;
    let mut output = Vec::with_capacity(expected + RESAMPLER_CHUNK_SIZE);
    for chunk in input.chunks(RESAMPLER_CHUNK_SIZE) {
        let result = if chunk.len() == RESAMPLER_CHUNK_SIZE {
            resampler.process(&[chunk], None)
        } else {
            resampler.process_partial(Some(&[chunk][..]), None)
        };
        output.extend_from_slice(&result.context("resampling failed")?[0]);
    }

    // flush the samples held back by the filter delay
    let delay = resampler.output_delay();
    while output.len() < expected + delay {
        let result = resampler.process_partial::<&[f32]>(None, None).context("resampling failed")?;
        if result[0].is_empty() {
            break;
        }
        output.extend_from_slice(&result[0]);
    }

    let end = (delay + expected).min(output.len());
    Ok(output[delay.min(end)..end].to_vec())
}
