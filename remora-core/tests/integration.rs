//! Integration tests — full session lifecycle through the driver,
//! multi-monitor capture, resumable transfers, and clipboard flow.

use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use remora_core::{
    CaptureRegion, ClipboardAccess, ClipboardPayload, CursorState, FrameGrabber, InputEvent,
    InputSink, MonitorInfo, MonitorSource, MouseButton, NetworkSample, PixelBuffer, QualityTier,
    RemoraError, SessionBackend, SessionConfig, SessionController, SessionFeatures, SessionState,
    spawn,
};
use tokio::sync::mpsc;

// ── Helpers ──────────────────────────────────────────────────────

/// Serializes tests that contend for the process-wide clipboard hook.
fn hook_lock() -> std::sync::MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn two_monitors() -> Vec<MonitorInfo> {
    vec![
        MonitorInfo {
            device_name: "DISPLAY1".into(),
            x: 0,
            y: 0,
            width: 1920,
            height: 1080,
            is_primary: true,
        },
        MonitorInfo {
            device_name: "DISPLAY2".into(),
            x: 1920,
            y: 0,
            width: 1280,
            height: 1024,
            is_primary: false,
        },
    ]
}

struct FixedMonitors(Vec<MonitorInfo>);

impl MonitorSource for FixedMonitors {
    fn enumerate(&mut self) -> Result<Vec<MonitorInfo>, RemoraError> {
        Ok(self.0.clone())
    }
}

/// Captures succeed and the encoded payload records the device and
/// quality the encoder was driven with.
struct TracingGrabber;

#[async_trait]
impl FrameGrabber for TracingGrabber {
    async fn capture_region(
        &mut self,
        device: &str,
        region: CaptureRegion,
    ) -> Result<PixelBuffer, RemoraError> {
        let mut data = vec![0u8; (region.width * region.height * 4) as usize];
        let tag = device.as_bytes();
        data[..tag.len()].copy_from_slice(tag);
        Ok(PixelBuffer {
            width: region.width,
            height: region.height,
            stride: region.width * 4,
            data,
        })
    }

    async fn encode(&mut self, buffer: &PixelBuffer, quality: u8) -> Result<Vec<u8>, RemoraError> {
        let mut out = vec![quality];
        out.extend_from_slice(&buffer.data[..8]);
        Ok(out)
    }

    async fn query_cursor(&mut self) -> Result<CursorState, RemoraError> {
        Ok(CursorState::default())
    }
}

#[derive(Default, Clone)]
struct SharedClipboard {
    text: Arc<Mutex<Option<String>>>,
    notify: Arc<Mutex<Option<mpsc::UnboundedSender<()>>>>,
}

impl SharedClipboard {
    /// Simulate a local copy: set the text and fire the change hook.
    fn simulate_local_copy(&self, text: &str) {
        *self.text.lock().unwrap() = Some(text.to_string());
        if let Some(tx) = self.notify.lock().unwrap().as_ref() {
            let _ = tx.send(());
        }
    }
}

impl ClipboardAccess for SharedClipboard {
    fn read_text(&mut self) -> Result<Option<String>, RemoraError> {
        Ok(self.text.lock().unwrap().clone())
    }
    fn read_image(&mut self) -> Result<Option<Vec<u8>>, RemoraError> {
        Ok(None)
    }
    fn read_file_list(&mut self) -> Result<Option<Vec<String>>, RemoraError> {
        Ok(None)
    }
    fn write_text(&mut self, text: &str) -> Result<(), RemoraError> {
        *self.text.lock().unwrap() = Some(text.to_string());
        Ok(())
    }
    fn write_image(&mut self, _data: &[u8]) -> Result<(), RemoraError> {
        Ok(())
    }
    fn write_file_list(&mut self, _paths: &[String]) -> Result<(), RemoraError> {
        Ok(())
    }
    fn install_hook(&mut self, notify: mpsc::UnboundedSender<()>) -> Result<(), RemoraError> {
        *self.notify.lock().unwrap() = Some(notify);
        Ok(())
    }
    fn uninstall_hook(&mut self) {
        *self.notify.lock().unwrap() = None;
    }
}

#[derive(Default)]
struct RecordingSink {
    log: Arc<Mutex<Vec<String>>>,
}

impl InputSink for RecordingSink {
    fn move_cursor(&mut self, x: i32, y: i32) -> Result<(), RemoraError> {
        self.log.lock().unwrap().push(format!("move {x},{y}"));
        Ok(())
    }
    fn click(&mut self, x: i32, y: i32, _b: MouseButton, pressed: bool) -> Result<(), RemoraError> {
        self.log
            .lock()
            .unwrap()
            .push(format!("click {x},{y} {pressed}"));
        Ok(())
    }
    fn wheel(&mut self, _x: i32, _y: i32, delta: i32) -> Result<(), RemoraError> {
        self.log.lock().unwrap().push(format!("wheel {delta}"));
        Ok(())
    }
    fn key_down(&mut self, key: &str) -> Result<(), RemoraError> {
        self.log.lock().unwrap().push(format!("down {key}"));
        Ok(())
    }
    fn key_up(&mut self, key: &str) -> Result<(), RemoraError> {
        self.log.lock().unwrap().push(format!("up {key}"));
        Ok(())
    }
    fn insert_text(&mut self, text: &str) -> Result<(), RemoraError> {
        self.log.lock().unwrap().push(format!("text {text}"));
        Ok(())
    }
}

fn temp_storage(tag: &str) -> (remora_core::FsStreamStorage, std::path::PathBuf) {
    let dir = std::env::temp_dir().join(format!(
        "remora-it-{tag}-{}-{:?}",
        std::process::id(),
        std::thread::current().id()
    ));
    (remora_core::FsStreamStorage::new(&dir), dir)
}

fn backend(tag: &str) -> (SessionBackend, std::path::PathBuf) {
    let (storage, dir) = temp_storage(tag);
    (
        SessionBackend {
            monitors: Box::new(FixedMonitors(two_monitors())),
            grabber: Box::new(TracingGrabber),
            clipboard: Box::new(SharedClipboard::default()),
            input: Box::new(RecordingSink::default()),
            storage: Box::new(storage),
            audio: None,
        },
        dir,
    )
}

fn quiet_config() -> SessionConfig {
    SessionConfig {
        features: SessionFeatures::FILE_STREAMING | SessionFeatures::ADAPTIVE_QUALITY,
        ..Default::default()
    }
}

// ── Capture across monitors ──────────────────────────────────────

#[tokio::test]
async fn switch_monitor_changes_captured_device() {
    let (backend, _dir) = backend("switch");
    let session = SessionController::start(backend, quiet_config()).unwrap();
    let (handle, _clip, join) = spawn(session);

    let frame = handle.capture_frame(None, None).await.unwrap();
    assert_eq!(frame.monitor_index, 0);
    // Device tag embedded by the fake grabber.
    assert_eq!(&frame.data[1..9], b"DISPLAY1");

    handle.switch_monitor(1).await.unwrap();
    let frame = handle.capture_frame(None, None).await.unwrap();
    assert_eq!(frame.monitor_index, 1);
    assert_eq!(&frame.data[1..9], b"DISPLAY2");
    assert_eq!(frame.width, 1280);

    handle.end().await.unwrap();
    join.await.unwrap();
}

// ── Quality adaptation through the driver ────────────────────────

#[tokio::test]
async fn degraded_network_steps_quality_to_the_floor() {
    let (backend, _dir) = backend("quality");
    let session = SessionController::start(backend, quiet_config()).unwrap();
    let (handle, _clip, join) = spawn(session);

    let bad = NetworkSample {
        rtt_ms: 800,
        loss_pct: 20.0,
    };
    // High → Medium → Low, then holds at the floor.
    assert_eq!(
        handle.record_network_feedback(bad).await.unwrap(),
        QualityTier::Medium
    );
    assert_eq!(
        handle.record_network_feedback(bad).await.unwrap(),
        QualityTier::Low
    );
    assert_eq!(
        handle.record_network_feedback(bad).await.unwrap(),
        QualityTier::Low
    );

    // The pinned-down tier drives the encoder.
    let frame = handle.capture_frame(None, None).await.unwrap();
    assert_eq!(frame.data[0], QualityTier::Low.compression_param());

    handle.end().await.unwrap();
    join.await.unwrap();
}

// ── Resumable transfers ──────────────────────────────────────────

#[tokio::test]
async fn out_of_order_transfer_completes_byte_identical() {
    let (backend, dir) = backend("transfer");
    let session = SessionController::start(backend, quiet_config()).unwrap();
    let (handle, _clip, join) = spawn(session);

    let payload: Vec<u8> = (0..1000u32).map(|i| (i * 7 % 256) as u8).collect();
    let id = handle.start_file_stream("payload.bin", 1000).await.unwrap();

    // Chunks delivered in reverse order, with one duplicate.
    handle
        .write_file_chunk(id, payload[600..].to_vec(), 600)
        .await
        .unwrap();
    handle
        .write_file_chunk(id, payload[300..600].to_vec(), 300)
        .await
        .unwrap();
    handle
        .write_file_chunk(id, payload[300..600].to_vec(), 300)
        .await
        .unwrap();
    handle
        .write_file_chunk(id, payload[..300].to_vec(), 0)
        .await
        .unwrap();

    let dest = dir.join("payload.bin");
    let receipt = handle.complete_file_stream(id, &dest).await.unwrap();
    assert_eq!(receipt.bytes, 1000);
    assert_eq!(std::fs::read(&dest).unwrap(), payload);
    assert_eq!(receipt.blake3, *blake3::hash(&payload).as_bytes());

    handle.end().await.unwrap();
    join.await.unwrap();
    std::fs::remove_dir_all(&dir).ok();
}

#[tokio::test]
async fn premature_complete_then_finish_and_abort_idempotency() {
    let (backend, dir) = backend("resume");
    let session = SessionController::start(backend, quiet_config()).unwrap();
    let (handle, _clip, join) = spawn(session);

    let id = handle.start_file_stream("half.bin", 10).await.unwrap();
    handle.write_file_chunk(id, vec![1; 5], 0).await.unwrap();

    let dest = dir.join("half.bin");
    let err = handle.complete_file_stream(id, &dest).await.err().unwrap();
    assert!(matches!(
        err,
        RemoraError::IncompleteTransfer {
            received: 5,
            expected: 10
        }
    ));

    handle.write_file_chunk(id, vec![2; 5], 5).await.unwrap();
    handle.complete_file_stream(id, &dest).await.unwrap();

    // Abort of a finished (now unknown) stream is a quiet no-op.
    handle.abort_file_stream(id).await.unwrap();
    handle.abort_file_stream(id).await.unwrap();

    handle.end().await.unwrap();
    join.await.unwrap();
    std::fs::remove_dir_all(&dir).ok();
}

// ── Capture degradation and resume ───────────────────────────────

#[tokio::test]
async fn capture_degrades_and_resumes_through_the_driver() {
    struct DeadGrabber;

    #[async_trait]
    impl FrameGrabber for DeadGrabber {
        async fn capture_region(
            &mut self,
            _device: &str,
            _region: CaptureRegion,
        ) -> Result<PixelBuffer, RemoraError> {
            Err(RemoraError::Other("display driver gone".into()))
        }
        async fn encode(
            &mut self,
            _buffer: &PixelBuffer,
            _quality: u8,
        ) -> Result<Vec<u8>, RemoraError> {
            Err(RemoraError::Other("unreachable".into()))
        }
        async fn query_cursor(&mut self) -> Result<CursorState, RemoraError> {
            Ok(CursorState::default())
        }
    }

    let (mut b, _dir) = backend("degrade");
    b.grabber = Box::new(DeadGrabber);
    let session = SessionController::start(b, quiet_config()).unwrap();
    let (handle, _clip, join) = spawn(session);

    for _ in 0..3 {
        assert!(handle.capture_frame(None, None).await.is_err());
    }
    assert_eq!(handle.state().await.unwrap(), SessionState::Degraded);
    assert!(matches!(
        handle.capture_frame(None, None).await.err().unwrap(),
        RemoraError::DegradedCapture
    ));

    handle.resume().await.unwrap();
    assert_eq!(handle.state().await.unwrap(), SessionState::Active);

    handle.end().await.unwrap();
    join.await.unwrap();
}

// ── Input ordering ───────────────────────────────────────────────

#[tokio::test]
async fn input_events_inject_in_send_order() {
    let sink = RecordingSink::default();
    let log = Arc::clone(&sink.log);
    let (mut b, _dir) = backend("input");
    b.input = Box::new(sink);
    let session = SessionController::start(b, quiet_config()).unwrap();
    let (handle, _clip, join) = spawn(session);

    handle.switch_monitor(1).await.unwrap();
    handle
        .dispatch_input(InputEvent::MouseMove { x: 1, y: 2 })
        .await
        .unwrap();
    handle
        .dispatch_input(InputEvent::KeyPress { key: "a".into() })
        .await
        .unwrap();
    handle
        .dispatch_input(InputEvent::MouseClick {
            x: 3,
            y: 4,
            button: MouseButton::Left,
            pressed: true,
        })
        .await
        .unwrap();

    // Monitor 1 sits at desktop origin (1920, 0).
    assert_eq!(
        *log.lock().unwrap(),
        vec![
            "move 1921,2".to_string(),
            "down a".to_string(),
            "up a".to_string(),
            "click 1923,4 true".to_string(),
        ]
    );

    handle.end().await.unwrap();
    join.await.unwrap();
}

// ── Clipboard flow through the driver ────────────────────────────

#[tokio::test]
async fn local_copy_flows_out_and_remote_apply_is_not_echoed() {
    let _guard = hook_lock();

    let clipboard = SharedClipboard::default();
    let probe = clipboard.clone();
    let (mut b, _dir) = backend("clipboard");
    b.clipboard = Box::new(clipboard);
    let cfg = SessionConfig {
        features: SessionFeatures::default(),
        ..Default::default()
    };
    let session = SessionController::start(b, cfg).unwrap();
    let (handle, mut clip_rx, join) = spawn(session);

    // A local copy surfaces on the outbound channel.
    probe.simulate_local_copy("copied locally");
    let payload = tokio::time::timeout(Duration::from_secs(2), clip_rx.recv())
        .await
        .expect("outbound clipboard payload")
        .expect("channel open");
    assert_eq!(
        payload.contents,
        remora_core::ClipboardContents::Text("copied locally".into())
    );

    // A remote apply lands on the clipboard without echoing back out.
    handle
        .apply_remote_clipboard(ClipboardPayload::text("from peer"))
        .await
        .unwrap();
    // The platform raises a change notification for our own write.
    if let Some(tx) = probe.notify.lock().unwrap().as_ref() {
        let _ = tx.send(());
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        probe.text.lock().unwrap().as_deref(),
        Some("from peer"),
        "remote payload written locally"
    );
    assert!(
        clip_rx.try_recv().is_err(),
        "echo of remote apply must not re-enter the outbound channel"
    );

    handle.end().await.unwrap();
    join.await.unwrap();
}

// ── Teardown ─────────────────────────────────────────────────────

#[tokio::test]
async fn end_is_terminal_and_handles_report_closure() {
    let (backend, _dir) = backend("teardown");
    let session = SessionController::start(backend, quiet_config()).unwrap();
    let (handle, _clip, join) = spawn(session);

    handle.start_file_stream("orphan.bin", 64).await.unwrap();
    handle.end().await.unwrap();
    join.await.unwrap();

    // Driver gone: every subsequent call reports the closed channel.
    assert!(matches!(
        handle.capture_frame(None, None).await.err().unwrap(),
        RemoraError::ChannelClosed
    ));
}

#[tokio::test]
async fn dropping_every_handle_tears_the_session_down() {
    let (backend, _dir) = backend("drop");
    let session = SessionController::start(backend, quiet_config()).unwrap();
    let (handle, clip_rx, join) = spawn(session);

    drop(handle);
    drop(clip_rx);
    // The driver notices the closed command channel and ends cleanly.
    tokio::time::timeout(Duration::from_secs(2), join)
        .await
        .expect("driver exits after handles drop")
        .unwrap();
}
