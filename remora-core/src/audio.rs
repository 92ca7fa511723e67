//! Desktop audio capture.
//!
//! Fixed format: 44100 Hz, 2 channels, 16-bit signed samples. The
//! streamer is a thin lifecycle wrapper over a platform source; it is
//! only constructed when the session enables the audio feature.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::RemoraError;

/// Samples per second.
pub const SAMPLE_RATE: u32 = 44_100;
/// Interleaved channel count.
pub const CHANNELS: u8 = 2;
/// Bits per sample.
pub const BITS_PER_SAMPLE: u8 = 16;

// ── AudioChunk ───────────────────────────────────────────────────

/// One block of captured PCM audio.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AudioChunk {
    /// Interleaved little-endian signed 16-bit PCM.
    pub pcm: Vec<u8>,
    /// Capture time, milliseconds since the Unix epoch.
    pub captured_at_ms: u64,
}

impl AudioChunk {
    /// Serialize to bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, RemoraError> {
        bincode::serialize(self).map_err(|e| RemoraError::Encoding(e.to_string()))
    }

    /// Deserialize from bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RemoraError> {
        bincode::deserialize(bytes).map_err(|e| RemoraError::Encoding(e.to_string()))
    }
}

// ── AudioSource ──────────────────────────────────────────────────

/// Platform collaborator that records desktop audio output.
pub trait AudioSource: Send {
    /// Begin recording in the fixed session format.
    fn start(&mut self) -> Result<(), RemoraError>;

    /// Stop recording and release device handles.
    fn stop(&mut self);

    /// Pull the next available PCM block, or `None` when nothing has
    /// accumulated since the last call.
    fn capture_chunk(&mut self) -> Result<Option<Vec<u8>>, RemoraError>;
}

// ── AudioStreamer ────────────────────────────────────────────────

/// Lifecycle wrapper over an [`AudioSource`].
pub struct AudioStreamer {
    source: Box<dyn AudioSource>,
    running: bool,
}

impl AudioStreamer {
    pub fn new(source: Box<dyn AudioSource>) -> Self {
        Self {
            source,
            running: false,
        }
    }

    /// Start the underlying source. Idempotent.
    pub fn start(&mut self) -> Result<(), RemoraError> {
        if self.running {
            return Ok(());
        }
        self.source.start()?;
        self.running = true;
        info!(
            sample_rate = SAMPLE_RATE,
            channels = CHANNELS,
            bits = BITS_PER_SAMPLE,
            "audio capture started"
        );
        Ok(())
    }

    /// Stop the underlying source. Idempotent.
    pub fn stop(&mut self) {
        if self.running {
            self.source.stop();
            self.running = false;
            debug!("audio capture stopped");
        }
    }

    /// Pull the next chunk, stamped at capture time.
    pub fn capture_chunk(&mut self) -> Result<Option<AudioChunk>, RemoraError> {
        if !self.running {
            return Ok(None);
        }
        Ok(self.source.capture_chunk()?.map(|pcm| AudioChunk {
            pcm,
            captured_at_ms: crate::unix_millis(),
        }))
    }

    pub fn is_running(&self) -> bool {
        self.running
    }
}

impl Drop for AudioStreamer {
    fn drop(&mut self) {
        self.stop();
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FakeSource {
        starts: Arc<AtomicU32>,
        stops: Arc<AtomicU32>,
        chunks: Vec<Vec<u8>>,
    }

    impl AudioSource for FakeSource {
        fn start(&mut self) -> Result<(), RemoraError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn stop(&mut self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
        fn capture_chunk(&mut self) -> Result<Option<Vec<u8>>, RemoraError> {
            if self.chunks.is_empty() {
                Ok(None)
            } else {
                Ok(Some(self.chunks.remove(0)))
            }
        }
    }

    fn streamer(chunks: Vec<Vec<u8>>) -> (AudioStreamer, Arc<AtomicU32>, Arc<AtomicU32>) {
        let starts = Arc::new(AtomicU32::new(0));
        let stops = Arc::new(AtomicU32::new(0));
        let source = FakeSource {
            starts: Arc::clone(&starts),
            stops: Arc::clone(&stops),
            chunks,
        };
        (AudioStreamer::new(Box::new(source)), starts, stops)
    }

    #[test]
    fn start_and_stop_are_idempotent() {
        let (mut s, starts, stops) = streamer(vec![]);
        s.start().unwrap();
        s.start().unwrap();
        assert_eq!(starts.load(Ordering::SeqCst), 1);
        s.stop();
        s.stop();
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn chunks_flow_only_while_running() {
        let (mut s, _, _) = streamer(vec![vec![1, 2, 3, 4]]);
        assert!(s.capture_chunk().unwrap().is_none());
        s.start().unwrap();
        let chunk = s.capture_chunk().unwrap().unwrap();
        assert_eq!(chunk.pcm, vec![1, 2, 3, 4]);
        assert!(chunk.captured_at_ms > 0);
        assert!(s.capture_chunk().unwrap().is_none());
    }

    #[test]
    fn drop_stops_a_running_source() {
        let (mut s, _, stops) = streamer(vec![]);
        s.start().unwrap();
        drop(s);
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn chunk_roundtrip() {
        let chunk = AudioChunk {
            pcm: vec![0, 1, 2, 3],
            captured_at_ms: 1234,
        };
        let bytes = chunk.to_bytes().unwrap();
        assert_eq!(AudioChunk::from_bytes(&bytes).unwrap(), chunk);
    }
}
