use std::collections::VecDeque;

use crate::stream::{Block, SampleBuffer};

/// Cuts a continuous stream of normalized samples into fixed-size [Block]s.
///
/// Sequence numbers start at 0 and increase by one per emitted block; the timestamp
/// of block `n` is `n * block_size / sample_rate` seconds.
pub struct AudioProcessor {
    sample_rate: u32,
    block_size: usize,
    pending: VecDeque<f64>,
    next_sequence: u64,
}

impl AudioProcessor {
    /// # Panics
    ///
    /// Panics if `block_size` is zero.
    pub fn new(sample_rate: u32, block_size: usize) -> Self {
        assert!(block_size > 0);
        Self {
            sample_rate,
            block_size,
            pending: VecDeque::with_capacity(2 * block_size),
            next_sequence: 0,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn consume(&mut self, data: &SampleBuffer) {
        match data {
            SampleBuffer::Int16(samples) => self.pending.extend(samples.iter().map(|&s| normalize_i16(s))),
            SampleBuffer::Float32(samples) => self.pending.extend(samples.iter().map(|&s| f64::from(s))),
        }
    }

    pub fn consume_normalized(&mut self, data: &[f64]) {
        self.pending.extend(data.iter().copied());
    }

    /// Number of samples waiting for a complete block.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Takes the next complete block, if enough samples have been consumed.
    pub fn next_block(&mut self) -> Option<Block> {
        if self.pending.len() < self.block_size {
            return None;
        }

        let samples = self.pending.drain(..self.block_size).collect::<Vec<_>>();
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        Some(Block {
            samples,
            sample_rate: self.sample_rate,
            sequence,
            timestamp: block_timestamp(sequence, self.block_size, self.sample_rate),
        })
    }

    /// Discards a trailing partial block. Returns the number of samples dropped.
    pub fn flush(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }

    pub fn reset(&mut self) {
        self.pending.clear();
        self.next_sequence = 0;
    }
}

pub(crate) fn normalize_i16(sample: i16) -> f64 {
    f64::from(sample) / f64::from(i16::MAX)
}

pub(crate) fn block_timestamp(sequence: u64, block_size: usize, sample_rate: u32) -> f64 {
    (sequence as f64) * (block_size as f64) / f64::from(sample_rate)
}

#[cfg(test)]
mod tests {
    use crate::assert_eq_float;
    use crate::audio_processor::AudioProcessor;
    use crate::stream::SampleBuffer;

    #[test]
    fn blocks_are_numbered_and_timestamped() {
        let mut processor = AudioProcessor::new(1000, 250);
        processor.consume_normalized(&vec![0.25; 600]);

        let first = processor.next_block().unwrap();
        let second = processor.next_block().unwrap();
        assert!(processor.next_block().is_none());

        assert_eq!(first.sequence, 0);
        assert_eq!(second.sequence, 1);
        assert_eq_float!(first.timestamp, 0.0);
        assert_eq_float!(second.timestamp, 0.25);
        assert_eq!(second.samples.len(), 250);
        assert_eq!(processor.pending(), 100);
        assert_eq!(processor.flush(), 100);
    }

    #[test]
    fn chunks_smaller_than_a_block_accumulate() {
        let mut processor = AudioProcessor::new(8000, 4);
        processor.consume(&SampleBuffer::Int16(vec![i16::MAX, 0, -i16::MAX]));
        assert!(processor.next_block().is_none());

        processor.consume(&SampleBuffer::Float32(vec![0.5, 0.25]));
        let block = processor.next_block().unwrap();
        assert_eq!(block.samples, vec![1.0, 0.0, -1.0, 0.5]);
        assert_eq!(processor.pending(), 1);
    }

    #[test]
    fn reset_restarts_numbering() {
        let mut processor = AudioProcessor::new(8000, 2);
        processor.consume_normalized(&[0.0; 5]);
        processor.next_block();
        processor.next_block();
        processor.reset();
        assert_eq!(processor.pending(), 0);

        processor.consume_normalized(&[0.0; 2]);
        assert_eq!(processor.next_block().unwrap().sequence, 0);
    }
}
