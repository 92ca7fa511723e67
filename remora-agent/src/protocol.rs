//! Viewer ↔ agent wire messages.
//!
//! Every message is bincode inside a length-delimited frame
//! (`tokio_util::codec::LengthDelimitedCodec`). Requests are answered
//! one-for-one in order; clipboard payloads captured from local
//! changes are additionally pushed to the viewer unsolicited.

use serde::{Deserialize, Serialize};

use remora_core::{
    AudioChunk, CaptureRegion, ClipboardPayload, CompressedFrame, InputEvent, MonitorInfo,
    NetworkSample, QualityTier, RemoraError, TransferReceipt,
};

/// Largest frame accepted off the wire (compressed frames dominate).
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

// ── Requests ─────────────────────────────────────────────────────

/// One viewer request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AgentRequest {
    CaptureFrame {
        region: Option<CaptureRegion>,
        tier: Option<QualityTier>,
    },
    Resume,
    ListMonitors,
    RefreshMonitors,
    SwitchMonitor {
        index: usize,
    },
    NetworkFeedback {
        sample: NetworkSample,
    },
    SetQuality {
        tier: QualityTier,
    },
    SetAdaptiveQuality {
        enabled: bool,
    },
    Input {
        event: InputEvent,
    },
    Clipboard {
        payload: ClipboardPayload,
    },
    StartStream {
        name: String,
        total_size: u64,
    },
    WriteChunk {
        id: u64,
        offset: u64,
        data: Vec<u8>,
    },
    CompleteStream {
        id: u64,
        file_name: String,
    },
    AbortStream {
        id: u64,
    },
    CaptureAudio,
    End,
}

// ── Responses ────────────────────────────────────────────────────

/// Transfer receipt as sent on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WireReceipt {
    pub destination: String,
    pub bytes: u64,
    pub blake3: [u8; 32],
}

impl From<TransferReceipt> for WireReceipt {
    fn from(r: TransferReceipt) -> Self {
        Self {
            destination: r.destination.to_string_lossy().into_owned(),
            bytes: r.bytes,
            blake3: r.blake3,
        }
    }
}

/// One agent response (or unsolicited push).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AgentResponse {
    Ack,
    Frame(CompressedFrame),
    Monitors(Vec<MonitorInfo>),
    MonitorCount(usize),
    Quality(QualityTier),
    StreamStarted {
        id: u64,
    },
    Receipt(WireReceipt),
    Audio(Option<AudioChunk>),
    /// Unsolicited: a local clipboard change captured by the hook.
    ClipboardChanged(ClipboardPayload),
    Error(String),
}

// ── Codec helpers ────────────────────────────────────────────────

impl AgentRequest {
    pub fn to_bytes(&self) -> Result<Vec<u8>, RemoraError> {
        bincode::serialize(self).map_err(|e| RemoraError::Encoding(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RemoraError> {
        bincode::deserialize(bytes).map_err(|e| RemoraError::Encoding(e.to_string()))
    }
}

impl AgentResponse {
    pub fn to_bytes(&self) -> Result<Vec<u8>, RemoraError> {
        bincode::serialize(self).map_err(|e| RemoraError::Encoding(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RemoraError> {
        bincode::deserialize(bytes).map_err(|e| RemoraError::Encoding(e.to_string()))
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_roundtrip() {
        let req = AgentRequest::WriteChunk {
            id: 7,
            offset: 4096,
            data: vec![1, 2, 3],
        };
        let bytes = req.to_bytes().unwrap();
        match AgentRequest::from_bytes(&bytes).unwrap() {
            AgentRequest::WriteChunk { id, offset, data } => {
                assert_eq!(id, 7);
                assert_eq!(offset, 4096);
                assert_eq!(data, vec![1, 2, 3]);
            }
            other => panic!("decoded wrong variant: {other:?}"),
        }
    }

    #[test]
    fn error_response_roundtrip() {
        let resp = AgentResponse::Error("monitor index 5 out of range (0..2)".into());
        let bytes = resp.to_bytes().unwrap();
        match AgentResponse::from_bytes(&bytes).unwrap() {
            AgentResponse::Error(msg) => assert!(msg.contains("out of range")),
            other => panic!("decoded wrong variant: {other:?}"),
        }
    }

    #[test]
    fn corrupt_frame_is_a_typed_error() {
        let err = AgentRequest::from_bytes(&[0xFF; 3]).err().unwrap();
        assert!(matches!(err, RemoraError::Encoding(_)));
    }
}
