//! Sample blocks and the sources that produce them.

use std::fmt::{Display, Formatter};
use std::io::{ErrorKind, Read};
use std::str::FromStr;

use crate::audio_processor::AudioProcessor;
use crate::fingerprinter::ConfigError;

/// One fixed-size chunk of normalized mono samples.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub samples: Vec<f64>,
    pub sample_rate: u32,
    pub sequence: u64,
    /// Start of the block in seconds, `sequence * block_size / sample_rate`.
    pub timestamp: f64,
}

/// Representation of raw samples delivered by an acquisition backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    Int16,
    Float32,
}

impl SampleFormat {
    pub fn bytes_per_sample(&self) -> usize {
        match self {
            SampleFormat::Int16 => 2,
            SampleFormat::Float32 => 4,
        }
    }

    fn decode_le(&self, bytes: &[u8]) -> SampleBuffer {
        match self {
            SampleFormat::Int16 => SampleBuffer::Int16(
                bytes.chunks_exact(2).map(|c| i16::from_le_bytes([c[0], c[1]])).collect(),
            ),
            SampleFormat::Float32 => SampleBuffer::Float32(
                bytes.chunks_exact(4).map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect(),
            ),
        }
    }
}

impl FromStr for SampleFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "s16" | "s16le" | "i16" => Ok(SampleFormat::Int16),
            "f32" | "f32le" => Ok(SampleFormat::Float32),
            _ => Err(ConfigError::UnsupportedSampleFormat(s.to_string())),
        }
    }
}

impl Display for SampleFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SampleFormat::Int16 => write!(f, "s16"),
            SampleFormat::Float32 => write!(f, "f32"),
        }
    }
}

/// Samples in either of the supported representations.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleBuffer {
    Int16(Vec<i16>),
    Float32(Vec<f32>),
}

impl SampleBuffer {
    pub fn format(&self) -> SampleFormat {
        match self {
            SampleBuffer::Int16(_) => SampleFormat::Int16,
            SampleBuffer::Float32(_) => SampleFormat::Float32,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            SampleBuffer::Int16(s) => s.len(),
            SampleBuffer::Float32(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Converts to `f64`. Fixed-point samples are scaled by `1 / i16::MAX`.
    pub fn to_normalized_f64(&self) -> Vec<f64> {
        match self {
            SampleBuffer::Int16(s) => s.iter().map(|&x| crate::audio_processor::normalize_i16(x)).collect(),
            SampleBuffer::Float32(s) => s.iter().map(|&x| f64::from(x)).collect(),
        }
    }
}

#[derive(Debug)]
pub enum StreamError {
    Io(std::io::Error),
    Decode(String),
}

impl From<std::io::Error> for StreamError {
    fn from(e: std::io::Error) -> Self {
        StreamError::Io(e)
    }
}

impl Display for StreamError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamError::Io(e) => write!(f, "read failed: {}", e),
            StreamError::Decode(msg) => write!(f, "decode failed: {}", msg),
        }
    }
}

impl std::error::Error for StreamError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StreamError::Io(e) => Some(e),
            StreamError::Decode(_) => None,
        }
    }
}

/// Pull-based producer of sample blocks with a fixed sample rate.
///
/// `read` returns `Ok(None)` at end of stream.
pub trait BlockSource {
    /// Human readable identifier, used as the library source id and in error context.
    fn name(&self) -> &str;

    fn sample_rate(&self) -> u32;

    fn start(&mut self) -> Result<(), StreamError> {
        Ok(())
    }

    fn read(&mut self) -> Result<Option<Block>, StreamError>;

    fn close(&mut self) -> Result<(), StreamError> {
        Ok(())
    }
}

impl<S: BlockSource + ?Sized> BlockSource for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn sample_rate(&self) -> u32 {
        (**self).sample_rate()
    }

    fn start(&mut self) -> Result<(), StreamError> {
        (**self).start()
    }

    fn read(&mut self) -> Result<Option<Block>, StreamError> {
        (**self).read()
    }

    fn close(&mut self) -> Result<(), StreamError> {
        (**self).close()
    }
}

/// Already decoded PCM held in memory.
pub struct MemorySource {
    name: String,
    samples: Vec<f64>,
    position: usize,
    processor: AudioProcessor,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, samples: SampleBuffer, sample_rate: u32, block_size: usize) -> Self {
        Self::from_normalized(name, samples.to_normalized_f64(), sample_rate, block_size)
    }

    pub fn from_normalized(name: impl Into<String>, samples: Vec<f64>, sample_rate: u32, block_size: usize) -> Self {
        Self {
            name: name.into(),
            samples,
            position: 0,
            processor: AudioProcessor::new(sample_rate, block_size),
        }
    }

    /// Total number of complete blocks this source yields.
    pub fn block_count(&self) -> usize {
        self.samples.len() / self.processor.block_size()
    }
}

impl BlockSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn sample_rate(&self) -> u32 {
        self.processor.sample_rate()
    }

    fn start(&mut self) -> Result<(), StreamError> {
        self.position = 0;
        self.processor.reset();
        Ok(())
    }

    fn read(&mut self) -> Result<Option<Block>, StreamError> {
        let block_size = self.processor.block_size();
        while self.processor.pending() < block_size && self.position < self.samples.len() {
            let end = (self.position + block_size).min(self.samples.len());
            self.processor.consume_normalized(&self.samples[self.position..end]);
            self.position = end;
        }

        let block = self.processor.next_block();
        if block.is_none() {
            self.processor.flush();
        }
        Ok(block)
    }
}

/// Headerless little-endian PCM read from any [Read] implementation, such as stdin fed by
/// a recording tool. The representation is fixed when the source is opened.
pub struct RawPcmSource<R: Read> {
    name: String,
    reader: R,
    format: SampleFormat,
    buffer: Vec<u8>,
    processor: AudioProcessor,
    finished: bool,
}

impl<R: Read> RawPcmSource<R> {
    pub fn new(name: impl Into<String>, reader: R, format: SampleFormat, sample_rate: u32, block_size: usize) -> Self {
        Self {
            name: name.into(),
            reader,
            format,
            buffer: vec![0; block_size * format.bytes_per_sample()],
            processor: AudioProcessor::new(sample_rate, block_size),
            finished: false,
        }
    }

    pub fn format(&self) -> SampleFormat {
        self.format
    }

    /// Fills the byte buffer, returning how many bytes were read before end of input.
    fn fill(&mut self) -> Result<usize, StreamError> {
        let mut filled = 0;
        while filled < self.buffer.len() {
            match self.reader.read(&mut self.buffer[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(filled)
    }
}

impl<R: Read> BlockSource for RawPcmSource<R> {
    fn name(&self) -> &str {
        &self.name
    }

    fn sample_rate(&self) -> u32 {
        self.processor.sample_rate()
    }

    fn read(&mut self) -> Result<Option<Block>, StreamError> {
        if let Some(block) = self.processor.next_block() {
            return Ok(Some(block));
        }
        if self.finished {
            return Ok(None);
        }

        let filled = self.fill()?;
        let usable = filled - filled % self.format.bytes_per_sample();
        let samples = self.format.decode_le(&self.buffer[..usable]);
        self.processor.consume(&samples);

        if filled < self.buffer.len() {
            self.finished = true;
        }

        match self.processor.next_block() {
            Some(block) => Ok(Some(block)),
            None => {
                let dropped = self.processor.flush();
                if dropped > 0 {
                    log::debug!("{}: dropped {} trailing samples", self.name, dropped);
                }
                Ok(None)
            }
        }
    }
}
