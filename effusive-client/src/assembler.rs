//! Reassembly of a generation stream into repetition outputs
//!
//! Non-parallel chunks are whole repetitions and are emitted as they come.
//! Parallel chunks are split into sentences by `this_gen_lengths`; the
//! sentences are held until the stream ends and then divided evenly
//! between the repetitions, in order.

use effusive_common::api::StreamChunk;
use effusive_common::audio::{concat_segments, partition_repetitions, split_by_lengths};
use effusive_common::Result;

use crate::worker::WorkerEvent;

#[derive(Debug, Default)]
pub struct StreamAssembler {
    sample_rate: Option<u32>,
    sentences: Vec<Vec<i16>>,
    next_index: usize,
}

impl StreamAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sample_rate(&self) -> Option<u32> {
        self.sample_rate
    }

    /// Fold one stream line into the assembly
    pub fn process_chunk(&mut self, chunk: StreamChunk) -> Result<Vec<WorkerEvent>> {
        let audio = match chunk {
            StreamChunk::Warning { warning } => {
                return Ok(vec![WorkerEvent::Status(format!("Warning: {}", warning))]);
            }
            StreamChunk::Audio(audio) => audio,
        };

        let samples = audio.samples()?;
        let mut events = Vec::new();
        if self.sample_rate != Some(audio.sr) {
            self.sample_rate = Some(audio.sr);
            events.push(WorkerEvent::SampleRate(audio.sr));
        }

        if audio.parallelized {
            self.sentences
                .extend(split_by_lengths(&samples, &audio.this_gen_lengths)?);
        } else {
            events.push(WorkerEvent::Output {
                index: self.next_index,
                audio: samples,
            });
            self.next_index += 1;
        }
        Ok(events)
    }

    /// Emit the parallel repetitions once the stream has ended
    pub fn finish(&mut self, n_repetitions: usize) -> Result<Vec<WorkerEvent>> {
        if self.sentences.is_empty() {
            return Ok(Vec::new());
        }

        let sentences = std::mem::take(&mut self.sentences);
        let buckets = partition_repetitions(&sentences, n_repetitions)?;
        let events = buckets
            .iter()
            .map(|bucket| {
                let event = WorkerEvent::Output {
                    index: self.next_index,
                    audio: concat_segments(bucket),
                };
                self.next_index += 1;
                event
            })
            .collect();
        Ok(events)
    }
}
