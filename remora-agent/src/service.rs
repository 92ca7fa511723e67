//! Agent service core logic.
//!
//! Binds the control listener, builds a session per viewer connection
//! from the platform backend, and shuttles length-delimited bincode
//! messages between the socket and the session driver. One viewer at
//! a time per session; the session is torn down on disconnect, error,
//! or an explicit `End` request.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{error, info, warn};

use remora_core::{RemoraError, SessionController, SessionHandle, spawn};

use crate::config::AgentConfig;
use crate::platform;
use crate::protocol::{AgentRequest, AgentResponse, MAX_FRAME_SIZE};

// ── AgentService ─────────────────────────────────────────────────

/// The top-level host agent service.
pub struct AgentService {
    config: AgentConfig,
    running: Arc<AtomicBool>,
}

impl AgentService {
    /// Create a new agent with the given config.
    pub fn new(config: AgentConfig) -> Self {
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle that stops the service from another task or a signal
    /// handler.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Run the service until stopped.
    ///
    /// Accepts viewers sequentially: each connection gets a fresh
    /// session built from the platform backend, served until the
    /// viewer disconnects or ends it.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        self.running.store(true, Ordering::SeqCst);

        let addr: SocketAddr = format!(
            "{}:{}",
            self.config.network.bind_addr, self.config.network.port
        )
        .parse()?;
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("remora agent listening on {addr}");

        while self.running.load(Ordering::SeqCst) {
            let accept = tokio::select! {
                result = listener.accept() => result,
                _ = Self::wait_for_stop(&self.running) => break,
            };

            let (stream, peer) = match accept {
                Ok(pair) => pair,
                Err(e) => {
                    warn!("accept error: {e}");
                    continue;
                }
            };
            info!("viewer connected from {peer}");

            let session = match self.build_session() {
                Ok(s) => s,
                Err(e) => {
                    error!("session startup failed: {e}");
                    continue;
                }
            };

            self.serve_viewer(stream, session).await;
            info!("session with {peer} ended");
        }

        self.running.store(false, Ordering::SeqCst);
        info!("remora agent stopped");
        Ok(())
    }

    /// Signal the service to stop.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Whether the service is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    // ── Internal ─────────────────────────────────────────────────

    fn build_session(&self) -> Result<SessionController, RemoraError> {
        let backend = platform::backend(self.config.stream_dir())?;
        SessionController::start(backend, self.config.to_session_config())
    }

    /// Drive one viewer connection until it closes or ends the
    /// session.
    async fn serve_viewer(&self, stream: TcpStream, session: SessionController) {
        let mut codec = LengthDelimitedCodec::new();
        codec.set_max_frame_length(MAX_FRAME_SIZE);
        let mut framed = Framed::new(stream, codec);

        let (handle, mut clip_rx, join) = spawn(session);
        let stream_dir = self.config.stream_dir();

        loop {
            tokio::select! {
                frame = framed.next() => {
                    let frame = match frame {
                        Some(Ok(frame)) => frame,
                        Some(Err(e)) => {
                            warn!("viewer stream error: {e}");
                            break;
                        }
                        None => break, // disconnect
                    };

                    let request = match AgentRequest::from_bytes(&frame) {
                        Ok(r) => r,
                        Err(e) => {
                            warn!("undecodable request: {e}");
                            break;
                        }
                    };
                    let ended = matches!(request, AgentRequest::End);

                    let response = dispatch(&handle, &stream_dir, request).await;
                    let bytes = match response.to_bytes() {
                        Ok(b) => b,
                        Err(e) => {
                            error!("response encode failed: {e}");
                            break;
                        }
                    };
                    if framed.send(Bytes::from(bytes)).await.is_err() {
                        break;
                    }
                    if ended {
                        break;
                    }
                }
                payload = clip_rx.recv() => {
                    // A closed channel means the driver is gone.
                    let Some(payload) = payload else { break };
                    let push = AgentResponse::ClipboardChanged(payload);
                    match push.to_bytes() {
                        Ok(bytes) => {
                            if framed.send(Bytes::from(bytes)).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("clipboard push encode failed: {e}"),
                    }
                }
                _ = Self::wait_for_stop(&self.running) => break,
            }
        }

        // Disconnect or stop: tear the session down either way.
        let _ = handle.end().await;
        let _ = join.await;
    }

    /// Resolve when `running` flips to false, polling coarsely.
    async fn wait_for_stop(running: &AtomicBool) {
        while running.load(Ordering::SeqCst) {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
    }
}

/// Map one request onto the session handle.
async fn dispatch(handle: &SessionHandle, stream_dir: &Path, request: AgentRequest) -> AgentResponse {
    match request {
        AgentRequest::CaptureFrame { region, tier } => {
            reply(handle.capture_frame(region, tier).await.map(AgentResponse::Frame))
        }
        AgentRequest::Resume => reply(handle.resume().await.map(|()| AgentResponse::Ack)),
        AgentRequest::ListMonitors => reply(
            handle
                .monitors()
                .await
                .map(|m| AgentResponse::Monitors(m.to_vec())),
        ),
        AgentRequest::RefreshMonitors => reply(
            handle
                .refresh_monitors()
                .await
                .map(AgentResponse::MonitorCount),
        ),
        AgentRequest::SwitchMonitor { index } => {
            reply(handle.switch_monitor(index).await.map(|()| AgentResponse::Ack))
        }
        AgentRequest::NetworkFeedback { sample } => reply(
            handle
                .record_network_feedback(sample)
                .await
                .map(AgentResponse::Quality),
        ),
        AgentRequest::SetQuality { tier } => {
            reply(handle.set_quality(tier).await.map(|()| AgentResponse::Ack))
        }
        AgentRequest::SetAdaptiveQuality { enabled } => reply(
            handle
                .set_adaptive_quality(enabled)
                .await
                .map(|()| AgentResponse::Ack),
        ),
        AgentRequest::Input { event } => {
            reply(handle.dispatch_input(event).await.map(|()| AgentResponse::Ack))
        }
        AgentRequest::Clipboard { payload } => reply(
            handle
                .apply_remote_clipboard(payload)
                .await
                .map(|()| AgentResponse::Ack),
        ),
        AgentRequest::StartStream { name, total_size } => reply(
            handle
                .start_file_stream(name, total_size)
                .await
                .map(|id| AgentResponse::StreamStarted { id }),
        ),
        AgentRequest::WriteChunk { id, offset, data } => reply(
            handle
                .write_file_chunk(id, data, offset)
                .await
                .map(|()| AgentResponse::Ack),
        ),
        AgentRequest::CompleteStream { id, file_name } => {
            // Destination is confined to the configured stream
            // directory; path components in the name are stripped.
            let name = std::path::Path::new(&file_name)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| format!("stream_{id}"));
            let dest = stream_dir.join(name);
            reply(
                handle
                    .complete_file_stream(id, dest)
                    .await
                    .map(|r| AgentResponse::Receipt(r.into())),
            )
        }
        AgentRequest::AbortStream { id } => {
            reply(handle.abort_file_stream(id).await.map(|()| AgentResponse::Ack))
        }
        AgentRequest::CaptureAudio => {
            reply(handle.capture_audio().await.map(AgentResponse::Audio))
        }
        AgentRequest::End => reply(handle.end().await.map(|()| AgentResponse::Ack)),
    }
}

fn reply(result: Result<AgentResponse, RemoraError>) -> AgentResponse {
    result.unwrap_or_else(|e| AgentResponse::Error(e.to_string()))
}
