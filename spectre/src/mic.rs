//! Live capture from the default input device.

use std::io;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Sample, SizedSample};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use rubato::{Resampler, SincFixedIn};

use rusty_spectre::{AudioProcessor, Block, BlockSource, SampleBuffer, StreamError};

use crate::decode::sinc_resampler;

/// Captured chunks waiting to be re-blocked.
const CHANNEL_CAPACITY: usize = 64;
const RESAMPLER_CHUNK_SIZE: usize = 1024;
const READ_TIMEOUT: Duration = Duration::from_secs(2);

fn device_error(e: impl ToString) -> StreamError {
    StreamError::Io(io::Error::new(io::ErrorKind::Other, e.to_string()))
}

/// Turns mono chunks at the device rate into blocks at the configured rate.
struct Reblocker {
    resampler: Option<SincFixedIn<f32>>,
    pending: Vec<f32>,
}

impl Reblocker {
    fn new(device_rate: u32, sample_rate: u32) -> Result<Self, StreamError> {
        let resampler = if device_rate == sample_rate {
            None
        } else {
            Some(sinc_resampler(device_rate, sample_rate, RESAMPLER_CHUNK_SIZE).map_err(device_error)?)
        };
        Ok(Self {
            resampler,
            pending: Vec::new(),
        })
    }

    fn feed(&mut self, chunk: Vec<f32>, processor: &mut AudioProcessor) -> Result<(), StreamError> {
        let resampler = match &mut self.resampler {
            Some(resampler) => resampler,
            None => {
                processor.consume(&SampleBuffer::Float32(chunk));
                return Ok(());
            }
        };

        self.pending.extend(chunk);
        while self.pending.len() >= resampler.input_frames_next() {
            let input = self.pending.drain(..resampler.input_frames_next()).collect::<Vec<_>>();
            let output = resampler.process(&[input], None).map_err(device_error)?;
            for channel in output {
                processor.consume(&SampleBuffer::Float32(channel));
            }
        }
        Ok(())
    }
}

struct Capture {
    // dropping the stream stops the device
    _stream: cpal::Stream,
    receiver: Receiver<Vec<f32>>,
    reblocker: Reblocker,
}

/// Default microphone, downmixed to mono and resampled to the configured rate.
pub struct MicSource {
    processor: AudioProcessor,
    capture: Option<Capture>,
}

impl MicSource {
    pub fn new(sample_rate: u32, block_size: usize) -> Self {
        Self {
            processor: AudioProcessor::new(sample_rate, block_size),
            capture: None,
        }
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    sender: Sender<Vec<f32>>,
) -> Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample,
    f32: cpal::FromSample<T>,
{
    let channels = usize::from(config.channels);
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let mono = data
                .chunks(channels)
                .map(|frame| frame.iter().map(|&s| s.to_sample::<f32>()).sum::<f32>() / channels as f32)
                .collect();
            if sender.try_send(mono).is_err() {
                log::warn!("capture buffer full, dropping input");
            }
        },
        |e| log::error!("input stream error: {}", e),
        None,
    )
}

impl BlockSource for MicSource {
    fn name(&self) -> &str {
        "mic"
    }

    fn sample_rate(&self) -> u32 {
        self.processor.sample_rate()
    }

    fn start(&mut self) -> Result<(), StreamError> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| device_error("no default input device"))?;
        let supported = device.default_input_config().map_err(device_error)?;
        let config = supported.config();
        if config.channels == 0 {
            return Err(device_error("input device has no channels"));
        }

        let device_rate = config.sample_rate.0;
        log::info!(
            "capturing from {} at {} Hz, {} channels",
            device.name().unwrap_or_else(|_| "unknown device".to_string()),
            device_rate,
            config.channels
        );

        let (sender, receiver) = bounded(CHANNEL_CAPACITY);
        let stream = match supported.sample_format() {
            cpal::SampleFormat::F32 => build_stream::<f32>(&device, &config, sender),
            cpal::SampleFormat::I16 => build_stream::<i16>(&device, &config, sender),
            cpal::SampleFormat::U16 => build_stream::<u16>(&device, &config, sender),
            other => return Err(device_error(format!("unsupported sample format {:?}", other))),
        }
        .map_err(device_error)?;
        stream.play().map_err(device_error)?;

        self.processor.reset();
        self.capture = Some(Capture {
            _stream: stream,
            receiver,
            reblocker: Reblocker::new(device_rate, self.processor.sample_rate())?,
        });
        Ok(())
    }

    fn read(&mut self) -> Result<Option<Block>, StreamError> {
        loop {
            if let Some(block) = self.processor.next_block() {
                return Ok(Some(block));
            }
            let capture = match &mut self.capture {
                Some(capture) => capture,
                None => return Ok(None),
            };
            let chunk = match capture.receiver.recv_timeout(READ_TIMEOUT) {
                Ok(chunk) => chunk,
                Err(RecvTimeoutError::Timeout) => return Err(device_error("input device stopped delivering audio")),
                Err(RecvTimeoutError::Disconnected) => return Ok(None),
            };
            capture.reblocker.feed(chunk, &mut self.processor)?;
        }
    }

    fn close(&mut self) -> Result<(), StreamError> {
        self.capture = None;
        self.processor.flush();
        Ok(())
    }
}
