//! Asynchronous session driver.
//!
//! Wraps a [`SessionController`] in a dedicated task that consumes a
//! command channel, so every operation on a session is serialized in
//! arrival order — input events in particular are injected strictly in
//! the order the transport delivered them. Callers hold a cheap,
//! cloneable [`SessionHandle`] and get replies over oneshot channels.
//!
//! Clipboard change notifications from the platform hook are folded
//! into the same loop: the driver polls the engine on each
//! notification and pushes captured payloads to the outbound channel
//! the caller obtained from [`spawn`].

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::audio::AudioChunk;
use crate::capture::{CaptureRegion, CompressedFrame};
use crate::clipboard::ClipboardPayload;
use crate::error::RemoraError;
use crate::input::InputEvent;
use crate::monitor::MonitorInfo;
use crate::quality::{NetworkSample, QualityTier};
use crate::session::{SessionController, SessionState};
use crate::transfer::TransferReceipt;

/// Command channel depth. Far beyond what an interactive peer
/// generates; hitting the bound applies backpressure, never loss.
const COMMAND_QUEUE_DEPTH: usize = 256;

// ── Commands ─────────────────────────────────────────────────────

enum SessionCommand {
    CaptureFrame {
        region: Option<CaptureRegion>,
        tier: Option<QualityTier>,
        reply: oneshot::Sender<Result<CompressedFrame, RemoraError>>,
    },
    Resume {
        reply: oneshot::Sender<Result<(), RemoraError>>,
    },
    SwitchMonitor {
        index: usize,
        reply: oneshot::Sender<Result<(), RemoraError>>,
    },
    Monitors {
        reply: oneshot::Sender<Arc<[MonitorInfo]>>,
    },
    RefreshMonitors {
        reply: oneshot::Sender<Result<usize, RemoraError>>,
    },
    NetworkFeedback {
        sample: NetworkSample,
        reply: oneshot::Sender<QualityTier>,
    },
    SetQuality {
        tier: QualityTier,
        reply: oneshot::Sender<()>,
    },
    SetAdaptive {
        enabled: bool,
        reply: oneshot::Sender<()>,
    },
    QualityTier {
        reply: oneshot::Sender<QualityTier>,
    },
    ApplyClipboard {
        payload: ClipboardPayload,
        reply: oneshot::Sender<Result<(), RemoraError>>,
    },
    StartStream {
        name: String,
        total_size: u64,
        reply: oneshot::Sender<Result<u64, RemoraError>>,
    },
    WriteChunk {
        id: u64,
        data: Vec<u8>,
        offset: u64,
        reply: oneshot::Sender<Result<(), RemoraError>>,
    },
    CompleteStream {
        id: u64,
        destination: PathBuf,
        reply: oneshot::Sender<Result<TransferReceipt, RemoraError>>,
    },
    AbortStream {
        id: u64,
        reply: oneshot::Sender<Result<(), RemoraError>>,
    },
    Input {
        event: InputEvent,
        reply: oneshot::Sender<Result<(), RemoraError>>,
    },
    CaptureAudio {
        reply: oneshot::Sender<Result<Option<AudioChunk>, RemoraError>>,
    },
    State {
        reply: oneshot::Sender<SessionState>,
    },
    End {
        reply: oneshot::Sender<()>,
    },
}

// ── SessionHandle ────────────────────────────────────────────────

/// Cloneable async facade over a driven session.
///
/// Every method round-trips through the driver task; a closed channel
/// (driver gone) surfaces as [`RemoraError::ChannelClosed`].
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    async fn roundtrip<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> Result<T, RemoraError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| RemoraError::ChannelClosed)?;
        rx.await.map_err(|_| RemoraError::ChannelClosed)
    }

    pub async fn capture_frame(
        &self,
        region: Option<CaptureRegion>,
        tier: Option<QualityTier>,
    ) -> Result<CompressedFrame, RemoraError> {
        self.roundtrip(|reply| SessionCommand::CaptureFrame {
            region,
            tier,
            reply,
        })
        .await?
    }

    pub async fn resume(&self) -> Result<(), RemoraError> {
        self.roundtrip(|reply| SessionCommand::Resume { reply }).await?
    }

    pub async fn switch_monitor(&self, index: usize) -> Result<(), RemoraError> {
        self.roundtrip(|reply| SessionCommand::SwitchMonitor { index, reply })
            .await?
    }

    pub async fn monitors(&self) -> Result<Arc<[MonitorInfo]>, RemoraError> {
        self.roundtrip(|reply| SessionCommand::Monitors { reply }).await
    }

    pub async fn refresh_monitors(&self) -> Result<usize, RemoraError> {
        self.roundtrip(|reply| SessionCommand::RefreshMonitors { reply })
            .await?
    }

    pub async fn record_network_feedback(
        &self,
        sample: NetworkSample,
    ) -> Result<QualityTier, RemoraError> {
        self.roundtrip(|reply| SessionCommand::NetworkFeedback { sample, reply })
            .await
    }

    pub async fn set_quality(&self, tier: QualityTier) -> Result<(), RemoraError> {
        self.roundtrip(|reply| SessionCommand::SetQuality { tier, reply })
            .await
    }

    pub async fn set_adaptive_quality(&self, enabled: bool) -> Result<(), RemoraError> {
        self.roundtrip(|reply| SessionCommand::SetAdaptive { enabled, reply })
            .await
    }

    pub async fn quality_tier(&self) -> Result<QualityTier, RemoraError> {
        self.roundtrip(|reply| SessionCommand::QualityTier { reply })
            .await
    }

    pub async fn apply_remote_clipboard(
        &self,
        payload: ClipboardPayload,
    ) -> Result<(), RemoraError> {
        self.roundtrip(|reply| SessionCommand::ApplyClipboard { payload, reply })
            .await?
    }

    pub async fn start_file_stream(
        &self,
        name: impl Into<String>,
        total_size: u64,
    ) -> Result<u64, RemoraError> {
        let name = name.into();
        self.roundtrip(|reply| SessionCommand::StartStream {
            name,
            total_size,
            reply,
        })
        .await?
    }

    pub async fn write_file_chunk(
        &self,
        id: u64,
        data: Vec<u8>,
        offset: u64,
    ) -> Result<(), RemoraError> {
        self.roundtrip(|reply| SessionCommand::WriteChunk {
            id,
            data,
            offset,
            reply,
        })
        .await?
    }

    pub async fn complete_file_stream(
        &self,
        id: u64,
        destination: impl Into<PathBuf>,
    ) -> Result<TransferReceipt, RemoraError> {
        let destination = destination.into();
        self.roundtrip(|reply| SessionCommand::CompleteStream {
            id,
            destination,
            reply,
        })
        .await?
    }

    pub async fn abort_file_stream(&self, id: u64) -> Result<(), RemoraError> {
        self.roundtrip(|reply| SessionCommand::AbortStream { id, reply })
            .await?
    }

    /// Inject one input event. Events sent through one handle are
    /// injected in send order.
    pub async fn dispatch_input(&self, event: InputEvent) -> Result<(), RemoraError> {
        self.roundtrip(|reply| SessionCommand::Input { event, reply })
            .await?
    }

    pub async fn capture_audio(&self) -> Result<Option<AudioChunk>, RemoraError> {
        self.roundtrip(|reply| SessionCommand::CaptureAudio { reply })
            .await?
    }

    pub async fn state(&self) -> Result<SessionState, RemoraError> {
        self.roundtrip(|reply| SessionCommand::State { reply }).await
    }

    /// End the session and stop the driver task.
    pub async fn end(&self) -> Result<(), RemoraError> {
        self.roundtrip(|reply| SessionCommand::End { reply }).await
    }
}

// ── Driver ───────────────────────────────────────────────────────

/// Spawn the driver task for `controller`.
///
/// Returns the command handle, a receiver of outbound clipboard
/// payloads (local changes captured via the platform hook), and the
/// driver's join handle. The driver runs until [`SessionHandle::end`]
/// or until every handle is dropped; either way the controller is
/// torn down before the task exits.
pub fn spawn(
    mut controller: SessionController,
) -> (
    SessionHandle,
    mpsc::UnboundedReceiver<ClipboardPayload>,
    JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
    let (clip_tx, clip_rx) = mpsc::unbounded_channel();
    let mut changes = controller.take_clipboard_events();

    let join = tokio::spawn(async move {
        loop {
            tokio::select! {
                command = rx.recv() => {
                    match command {
                        Some(command) => {
                            if handle_command(&mut controller, command).await {
                                break;
                            }
                        }
                        None => {
                            debug!("all session handles dropped; ending session");
                            break;
                        }
                    }
                }
                notified = recv_change(&mut changes) => {
                    if notified {
                        match controller.poll_clipboard() {
                            // Drain everything pending so the bounded
                            // queue never sits on delivered payloads.
                            Ok(Some(_)) => {
                                while let Some(payload) = controller.dequeue_clipboard() {
                                    let _ = clip_tx.send(payload);
                                }
                            }
                            Ok(None) => {}
                            Err(e) => warn!(error = %e, "clipboard poll failed"),
                        }
                    } else {
                        // Hook gone; stop selecting on it.
                        changes = None;
                    }
                }
            }
        }
        controller.end().await;
    });

    (SessionHandle { tx }, clip_rx, join)
}

/// Receive one change notification, pending forever when no hook is
/// installed so the other select arm wins.
async fn recv_change(changes: &mut Option<mpsc::UnboundedReceiver<()>>) -> bool {
    match changes {
        Some(rx) => rx.recv().await.is_some(),
        None => std::future::pending().await,
    }
}

/// Apply one command; returns `true` when the driver should stop.
async fn handle_command(controller: &mut SessionController, command: SessionCommand) -> bool {
    match command {
        SessionCommand::CaptureFrame {
            region,
            tier,
            reply,
        } => {
            let _ = reply.send(controller.capture_frame(region, tier).await);
        }
        SessionCommand::Resume { reply } => {
            let _ = reply.send(controller.resume());
        }
        SessionCommand::SwitchMonitor { index, reply } => {
            let _ = reply.send(controller.switch_monitor(index));
        }
        SessionCommand::Monitors { reply } => {
            let _ = reply.send(controller.monitors());
        }
        SessionCommand::RefreshMonitors { reply } => {
            let _ = reply.send(controller.refresh_monitors());
        }
        SessionCommand::NetworkFeedback { sample, reply } => {
            let _ = reply.send(controller.record_network_feedback(&sample));
        }
        SessionCommand::SetQuality { tier, reply } => {
            controller.set_quality(tier);
            let _ = reply.send(());
        }
        SessionCommand::SetAdaptive { enabled, reply } => {
            controller.set_adaptive_quality(enabled);
            let _ = reply.send(());
        }
        SessionCommand::QualityTier { reply } => {
            let _ = reply.send(controller.quality_tier());
        }
        SessionCommand::ApplyClipboard { payload, reply } => {
            let _ = reply.send(controller.apply_remote_clipboard(&payload));
        }
        SessionCommand::StartStream {
            name,
            total_size,
            reply,
        } => {
            let _ = reply.send(controller.start_file_stream(&name, total_size).await);
        }
        SessionCommand::WriteChunk {
            id,
            data,
            offset,
            reply,
        } => {
            let _ = reply.send(controller.write_file_chunk(id, &data, offset).await);
        }
        SessionCommand::CompleteStream {
            id,
            destination,
            reply,
        } => {
            let _ = reply.send(controller.complete_file_stream(id, &destination).await);
        }
        SessionCommand::AbortStream { id, reply } => {
            let _ = reply.send(controller.abort_file_stream(id).await);
        }
        SessionCommand::Input { event, reply } => {
            let _ = reply.send(controller.dispatch_input(&event));
        }
        SessionCommand::CaptureAudio { reply } => {
            let _ = reply.send(controller.capture_audio());
        }
        SessionCommand::State { reply } => {
            let _ = reply.send(controller.state());
        }
        SessionCommand::End { reply } => {
            controller.end().await;
            let _ = reply.send(());
            return true;
        }
    }
    false
}
