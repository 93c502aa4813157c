//! Jitter buffer and gapless scheduler for inbound agent speech.
//!
//! Inbound PCM arrives in small, irregular pieces. The engine accumulates
//! them until `threshold` samples are pending (or the agent signals the end
//! of its audio), merges them into one chunk, and keeps at most one chunk
//! playing on the [`AudioSink`]. When a chunk completes the next queued chunk
//! starts immediately.
//!
//! Every chunk carries a monotonically increasing id. Completion notices
//! are matched against the id of the chunk currently playing, so a late
//! notice from an interrupted chunk can never advance the queue.

use std::collections::VecDeque;

use tokio::sync::mpsc;

use crate::audio_io::{AudioSink, PlaybackCompletion, PlaybackNotice};
use crate::error::VoiceError;
use crate::pcm;

/// Something the session should react to after a playback operation.
#[derive(Debug)]
pub enum PlaybackSignal {
    /// A chunk began playing.
    ChunkStarted { chunk_id: u64, samples: usize },
    /// Nothing is playing and nothing is queued.
    QueueExhausted,
    /// A chunk failed to start or finish. Playback continues with the next one.
    Failed(VoiceError),
}

struct QueuedChunk {
    id: u64,
    samples: Vec<i16>,
}

pub struct PlaybackBufferEngine {
    sink: Box<dyn AudioSink>,
    sample_rate: u32,
    threshold: usize,

    accumulator: Vec<Vec<i16>>,
    accumulated: usize,
    queue: VecDeque<QueuedChunk>,
    playing: Option<u64>,
    next_chunk_id: u64,

    notices: mpsc::UnboundedSender<PlaybackNotice>,
    chunks_played: u64,
}

impl PlaybackBufferEngine {
    /// Build an engine over `sink`; completion notices arrive on the
    /// returned receiver and must be fed back through
    /// [`on_notice`](Self::on_notice).
    #[must_use]
    pub fn new(
        sink: Box<dyn AudioSink>,
        sample_rate: u32,
        threshold: usize,
    ) -> (Self, mpsc::UnboundedReceiver<PlaybackNotice>) {
        let (notices, notice_rx) = mpsc::unbounded_channel();
        let engine = Self {
            sink,
            sample_rate,
            threshold: threshold.max(1),
            accumulator: Vec::new(),
            accumulated: 0,
            queue: VecDeque::new(),
            playing: None,
            next_chunk_id: 0,
            notices,
            chunks_played: 0,
        };
        (engine, notice_rx)
    }

    /// Accept decoded inbound samples.
    pub fn ingest(&mut self, samples: Vec<i16>) -> Vec<PlaybackSignal> {
        if samples.is_empty() {
            return Vec::new();
        }
        self.accumulated += samples.len();
        self.accumulator.push(samples);

        if self.accumulated >= self.threshold {
            self.flush()
        } else {
            Vec::new()
        }
    }

    /// Merge everything accumulated into one chunk and queue it.
    ///
    /// Also called when the agent finishes speaking, so a flush with nothing
    /// pending and nothing playing reports [`PlaybackSignal::QueueExhausted`].
    pub fn flush(&mut self) -> Vec<PlaybackSignal> {
        if self.accumulated > 0 {
            let mut merged = Vec::with_capacity(self.accumulated);
            for piece in self.accumulator.drain(..) {
                merged.extend_from_slice(&piece);
            }
            self.accumulated = 0;

            let id = self.next_chunk_id;
            self.next_chunk_id += 1;
            tracing::trace!(chunk_id = id, samples = merged.len(), "Chunk queued");
            self.queue.push_back(QueuedChunk {
                id,
                samples: merged,
            });
        }

        if self.playing.is_some() {
            return Vec::new();
        }
        self.start_next()
    }

    /// Handle a completion notice from the sink.
    pub fn on_notice(&mut self, notice: PlaybackNotice) -> Vec<PlaybackSignal> {
        if self.playing != Some(notice.chunk_id) {
            tracing::debug!(chunk_id = notice.chunk_id, "Ignoring stale playback notice");
            return Vec::new();
        }
        self.playing = None;

        let mut signals = Vec::new();
        match notice.outcome {
            Ok(()) => self.chunks_played += 1,
            Err(reason) => {
                tracing::warn!(chunk_id = notice.chunk_id, %reason, "Chunk playback failed");
                signals.push(PlaybackSignal::Failed(VoiceError::OutputStreamError(reason)));
            }
        }
        signals.extend(self.start_next());
        signals
    }

    /// Barge-in: silence the sink and discard everything buffered.
    pub fn interrupt(&mut self) {
        let had_audio = self.playing.is_some() || !self.queue.is_empty() || self.accumulated > 0;

        self.sink.stop();
        self.playing = None;
        self.queue.clear();
        self.accumulator.clear();
        self.accumulated = 0;

        if had_audio {
            tracing::debug!("Playback interrupted");
        }
    }

    /// Start queued chunks until one is accepted by the sink.
    fn start_next(&mut self) -> Vec<PlaybackSignal> {
        let mut signals = Vec::new();

        while let Some(chunk) = self.queue.pop_front() {
            let len = chunk.samples.len();
            let done = PlaybackCompletion::new(chunk.id, self.notices.clone());
            match self
                .sink
                .play(pcm::to_f32(&chunk.samples), self.sample_rate, done)
            {
                Ok(()) => {
                    self.playing = Some(chunk.id);
                    signals.push(PlaybackSignal::ChunkStarted {
                        chunk_id: chunk.id,
                        samples: len,
                    });
                    return signals;
                }
                Err(e) => {
                    tracing::warn!(chunk_id = chunk.id, error = %e, "Failed to start chunk");
                    signals.push(PlaybackSignal::Failed(e));
                }
            }
        }

        signals.push(PlaybackSignal::QueueExhausted);
        signals
    }

    #[must_use]
    pub const fn is_playing(&self) -> bool {
        self.playing.is_some()
    }

    #[must_use]
    pub fn queued_chunks(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub const fn pending_samples(&self) -> usize {
        self.accumulated
    }

    /// Chunks that played to completion.
    #[must_use]
    pub const fn chunks_played(&self) -> u64 {
        self.chunks_played
    }
}
