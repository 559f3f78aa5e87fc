//! Owns the generation state: the current image, the busy flag and the last
//! error. One request at a time; a second `generate` while busy is rejected.
//! Once issued, a request runs to completion on its own task, even if the
//! caller goes away.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::error::{user_message_for, GenerationError, GENERIC_MESSAGE};
use crate::huggingface::ImageBackend;
use crate::models::{AdvancedSettings, GeneratedImage, LifecycleSnapshot, LifecycleStatus};

#[derive(Debug, Default)]
struct LifecycleState {
    result: Option<GeneratedImage>,
    is_busy: bool,
    last_error: Option<String>,
}

impl LifecycleState {
    fn snapshot(&self) -> LifecycleSnapshot {
        let status = if self.is_busy {
            LifecycleStatus::Busy
        } else if self.last_error.is_some() {
            LifecycleStatus::Failed
        } else if self.result.is_some() {
            LifecycleStatus::Succeeded
        } else {
            LifecycleStatus::Idle
        };
        LifecycleSnapshot {
            status,
            result: self.result.as_ref().map(GeneratedImage::view),
            is_loading: self.is_busy,
            error: self.last_error.clone(),
        }
    }
}

/// Clears the busy flag if the request task ends without recording an outcome.
struct BusyGuard {
    state: Arc<RwLock<LifecycleState>>,
    armed: bool,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        if self.armed {
            self.state.write().is_busy = false;
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GenerateOutcome {
    /// Prompt was blank; nothing changed.
    Skipped,
    /// Another generation is in flight; nothing changed.
    Rejected,
    Succeeded,
    Failed(String),
}

/// Outcome of one `generate` call plus the state as that call left it.
#[derive(Debug, Clone)]
pub struct GenerateReport {
    pub outcome: GenerateOutcome,
    pub snapshot: LifecycleSnapshot,
}

#[derive(Debug, Clone)]
pub struct ImageDownload {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: bytes::Bytes,
}

pub struct GenerationController {
    backend: Arc<dyn ImageBackend>,
    state: Arc<RwLock<LifecycleState>>,
}

impl GenerationController {
    pub fn new(backend: Arc<dyn ImageBackend>) -> Self {
        Self { backend, state: Arc::default() }
    }

    pub fn backend(&self) -> &Arc<dyn ImageBackend> {
        &self.backend
    }

    pub async fn generate(&self, prompt: &str, settings: &AdvancedSettings) -> GenerateOutcome {
        self.generate_report(prompt, settings).await.outcome
    }

    pub async fn generate_report(&self, prompt: &str, settings: &AdvancedSettings) -> GenerateReport {
        let guard = {
            let mut state = self.state.write();
            let report = |state: &LifecycleState, outcome| GenerateReport { outcome, snapshot: state.snapshot() };

            if prompt.trim().is_empty() {
                return report(&*state, GenerateOutcome::Skipped);
            }
            if state.is_busy {
                warn!("⏸️ Generation already in progress, rejecting new request");
                return report(&*state, GenerateOutcome::Rejected);
            }
            if let Err(e) = settings.validate() {
                let message = format!("⚙️ Invalid settings: {e}");
                state.last_error = Some(message.clone());
                return report(&*state, GenerateOutcome::Failed(message));
            }
            state.last_error = None;
            state.is_busy = true;
            BusyGuard { state: Arc::clone(&self.state), armed: true }
        };

        let preview: String = prompt.chars().take(100).collect();
        info!("🎯 Generating image for prompt: {}", preview);

        let backend = Arc::clone(&self.backend);
        let prompt = prompt.to_string();
        let settings = *settings;
        let task = tokio::spawn(async move {
            let result = if backend.is_configured() {
                backend.request(&prompt, &settings).await
            } else {
                Err(GenerationError::NotConfigured)
            };
            complete(guard, prompt, result)
        });

        match task.await {
            Ok(report) => report,
            Err(e) => {
                // The guard has already cleared the busy flag.
                error!("❌ Generation task ended abnormally: {}", e);
                let mut state = self.state.write();
                state.last_error = Some(GENERIC_MESSAGE.to_string());
                GenerateReport {
                    outcome: GenerateOutcome::Failed(GENERIC_MESSAGE.to_string()),
                    snapshot: state.snapshot(),
                }
            }
        }
    }

    /// Packages the current image as a named attachment. `None` when there is nothing to save.
    pub fn download(&self) -> Option<ImageDownload> {
        let state = self.state.read();
        let image = state.result.as_ref()?;
        let bytes = image.handle.bytes()?;
        let mime_type = image.handle.mime_type().to_string();
        Some(ImageDownload {
            file_name: download_file_name(image.created_at, &mime_type),
            mime_type,
            bytes,
        })
    }

    pub fn snapshot(&self) -> LifecycleSnapshot {
        self.state.read().snapshot()
    }
}

/// Records the backend result, clears busy in the same critical section and
/// disarms the guard.
fn complete(
    mut guard: BusyGuard,
    prompt: String,
    result: Result<crate::huggingface::ImagePayload, GenerationError>,
) -> GenerateReport {
    // The superseded image is dropped after the lock is released.
    let previous;
    let report = {
        let mut state = guard.state.write();
        state.is_busy = false;
        let outcome = match result {
            Ok(payload) => {
                info!("✅ Generation finished ({} bytes, {})", payload.raw_bytes.len(), payload.mime_type);
                previous = state.result.replace(GeneratedImage {
                    handle: payload.handle,
                    prompt,
                    created_at: Utc::now(),
                });
                GenerateOutcome::Succeeded
            }
            Err(e) => {
                previous = None;
                let message = user_message_for(&e);
                warn!("❌ Generation failed: {}", message);
                state.last_error = Some(message.clone());
                GenerateOutcome::Failed(message)
            }
        };
        GenerateReport { outcome, snapshot: state.snapshot() }
    };
    guard.armed = false;
    drop(previous);
    report
}

fn download_file_name(created_at: DateTime<Utc>, mime_type: &str) -> String {
    format!("generated-image-{}.{}", created_at.timestamp_millis(), extension_for(mime_type))
}

fn extension_for(mime_type: &str) -> &'static str {
    image::ImageFormat::from_mime_type(mime_type)
        .and_then(|fmt| fmt.extensions_str().first().copied())
        .unwrap_or("png")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::huggingface::ImagePayload;
    use crate::store::ImageStore;
    use async_trait::async_trait;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    enum Reply {
        Image(&'static [u8]),
        Fail(GenerationError),
    }

    struct FakeBackend {
        store: Arc<ImageStore>,
        replies: Mutex<VecDeque<Reply>>,
        configured: bool,
        calls: AtomicUsize,
        gate: Option<Arc<Notify>>,
    }

    impl FakeBackend {
        fn new(replies: Vec<Reply>) -> Self {
            Self {
                store: ImageStore::new(),
                replies: Mutex::new(replies.into()),
                configured: true,
                calls: AtomicUsize::new(0),
                gate: None,
            }
        }
    }

    #[async_trait]
    impl ImageBackend for FakeBackend {
        async fn request(&self, _prompt: &str, _settings: &AdvancedSettings) -> Result<ImagePayload, GenerationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            let reply = self.replies.lock().pop_front().expect("unexpected backend call");
            match reply {
                Reply::Image(data) => {
                    let raw_bytes = Bytes::from_static(data);
                    let handle = self.store.insert(raw_bytes.clone(), "image/png");
                    Ok(ImagePayload { raw_bytes, mime_type: "image/png".into(), handle })
                }
                Reply::Fail(e) => Err(e),
            }
        }

        fn is_configured(&self) -> bool {
            self.configured
        }

        fn supports_advanced_parameters(&self) -> bool {
            false
        }
    }

    fn controller(backend: FakeBackend) -> (GenerationController, Arc<FakeBackend>) {
        let backend = Arc::new(backend);
        (GenerationController::new(backend.clone()), backend)
    }

    #[tokio::test]
    async fn blank_prompt_changes_nothing() {
        let (ctl, backend) = controller(FakeBackend::new(vec![]));
        let before = ctl.snapshot();

        for prompt in ["", "   ", "\n\t"] {
            assert_eq!(ctl.generate(prompt, &AdvancedSettings::default()).await, GenerateOutcome::Skipped);
        }
        assert_eq!(ctl.snapshot(), before);
        assert_eq!(before.status, LifecycleStatus::Idle);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn success_stores_exact_prompt() {
        let (ctl, _) = controller(FakeBackend::new(vec![Reply::Image(b"img")]));

        let outcome = ctl.generate("  a red fox ", &AdvancedSettings::default()).await;
        assert_eq!(outcome, GenerateOutcome::Succeeded);

        let snap = ctl.snapshot();
        assert_eq!(snap.status, LifecycleStatus::Succeeded);
        assert_eq!(snap.result.map(|r| r.prompt), Some("  a red fox ".to_string()));
        assert_eq!(snap.error, None);
        assert!(!snap.is_loading);
    }

    #[tokio::test]
    async fn failure_keeps_previous_image() {
        let (ctl, _) = controller(FakeBackend::new(vec![
            Reply::Image(b"first"),
            Reply::Fail(GenerationError::Http { status: 429, body: "Too Many Requests".into() }),
        ]));

        ctl.generate("first", &AdvancedSettings::default()).await;
        let before = ctl.snapshot().result;

        let outcome = ctl.generate("second", &AdvancedSettings::default()).await;
        let snap = ctl.snapshot();

        assert!(matches!(outcome, GenerateOutcome::Failed(_)));
        assert_eq!(snap.status, LifecycleStatus::Failed);
        assert_eq!(snap.result, before);
        assert_eq!(
            snap.error,
            Some(crate::error::ErrorCategory::Throttling.user_message())
        );
        assert!(!snap.is_loading);
    }

    #[tokio::test]
    async fn next_attempt_clears_last_error() {
        let (ctl, _) = controller(FakeBackend::new(vec![
            Reply::Fail(GenerationError::Network("connection reset".into())),
            Reply::Image(b"ok"),
        ]));

        ctl.generate("one", &AdvancedSettings::default()).await;
        assert!(ctl.snapshot().error.is_some());

        ctl.generate("two", &AdvancedSettings::default()).await;
        assert_eq!(ctl.snapshot().error, None);
    }

    #[tokio::test]
    async fn unconfigured_backend_fails_with_auth_message() {
        let mut backend = FakeBackend::new(vec![]);
        backend.configured = false;
        let (ctl, backend) = controller(backend);

        let outcome = ctl.generate("a cat", &AdvancedSettings::default()).await;
        assert_eq!(
            outcome,
            GenerateOutcome::Failed(crate::error::ErrorCategory::Authentication.user_message())
        );
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn invalid_settings_never_reach_backend() {
        let (ctl, backend) = controller(FakeBackend::new(vec![]));
        let settings = AdvancedSettings { width: 100, ..Default::default() };

        let outcome = ctl.generate("a cat", &settings).await;
        assert!(matches!(outcome, GenerateOutcome::Failed(ref m) if m.contains("width")));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
        assert_eq!(ctl.snapshot().status, LifecycleStatus::Failed);
    }

    #[tokio::test]
    async fn replacing_result_releases_previous_image() {
        let (ctl, backend) = controller(FakeBackend::new(vec![Reply::Image(b"one"), Reply::Image(b"two")]));

        ctl.generate("one", &AdvancedSettings::default()).await;
        let first = ctl.snapshot().result.unwrap();
        ctl.generate("two", &AdvancedSettings::default()).await;
        let second = ctl.snapshot().result.unwrap();

        assert_eq!(backend.store.len(), 1);
        assert!(backend.store.get(&first.id).is_none());
        assert!(backend.store.get(&second.id).is_some());
    }

    #[tokio::test]
    async fn concurrent_generate_is_rejected() {
        let gate = Arc::new(Notify::new());
        let mut backend = FakeBackend::new(vec![Reply::Image(b"slow")]);
        backend.gate = Some(gate.clone());
        let (ctl, backend) = controller(backend);
        let ctl = Arc::new(ctl);

        let first = tokio::spawn({
            let ctl = ctl.clone();
            async move { ctl.generate("first", &AdvancedSettings::default()).await }
        });
        while backend.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        let busy = ctl.snapshot();
        assert_eq!(busy.status, LifecycleStatus::Busy);
        assert!(busy.is_loading);
        assert_eq!(ctl.generate("second", &AdvancedSettings::default()).await, GenerateOutcome::Rejected);
        assert_eq!(ctl.snapshot(), busy);

        gate.notify_one();
        assert_eq!(first.await.unwrap(), GenerateOutcome::Succeeded);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn abandoned_caller_does_not_wedge_busy_flag() {
        let gate = Arc::new(Notify::new());
        let mut backend = FakeBackend::new(vec![Reply::Image(b"late"), Reply::Image(b"next")]);
        backend.gate = Some(gate.clone());
        let (ctl, backend) = controller(backend);
        let ctl = Arc::new(ctl);

        let caller = tokio::spawn({
            let ctl = ctl.clone();
            async move { ctl.generate("first", &AdvancedSettings::default()).await }
        });
        while backend.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        caller.abort();
        assert!(caller.await.unwrap_err().is_cancelled());

        // The request keeps running and still records its result.
        assert_eq!(ctl.snapshot().status, LifecycleStatus::Busy);
        gate.notify_one();
        while ctl.snapshot().is_loading {
            tokio::task::yield_now().await;
        }
        let snap = ctl.snapshot();
        assert_eq!(snap.status, LifecycleStatus::Succeeded);
        assert_eq!(snap.result.map(|r| r.prompt), Some("first".to_string()));

        let next = tokio::spawn({
            let ctl = ctl.clone();
            async move { ctl.generate("second", &AdvancedSettings::default()).await }
        });
        while backend.calls.load(Ordering::SeqCst) < 2 {
            tokio::task::yield_now().await;
        }
        gate.notify_one();
        assert_eq!(next.await.unwrap(), GenerateOutcome::Succeeded);
    }

    #[tokio::test]
    async fn panicking_backend_releases_busy_flag() {
        // No queued replies: the fake panics on the call.
        let (ctl, _) = controller(FakeBackend::new(vec![]));

        let outcome = ctl.generate("a cat", &AdvancedSettings::default()).await;
        assert_eq!(outcome, GenerateOutcome::Failed(GENERIC_MESSAGE.to_string()));

        let snap = ctl.snapshot();
        assert!(!snap.is_loading);
        assert_eq!(snap.status, LifecycleStatus::Failed);
        assert_ne!(ctl.generate("again", &AdvancedSettings::default()).await, GenerateOutcome::Rejected);
    }

    #[tokio::test]
    async fn report_snapshot_reflects_this_call() {
        let (ctl, _) = controller(FakeBackend::new(vec![Reply::Image(b"img")]));

        let report = ctl.generate_report("a fox", &AdvancedSettings::default()).await;
        assert_eq!(report.outcome, GenerateOutcome::Succeeded);
        assert_eq!(report.snapshot.status, LifecycleStatus::Succeeded);
        assert_eq!(report.snapshot.result.map(|r| r.prompt), Some("a fox".to_string()));

        let skipped = ctl.generate_report("  ", &AdvancedSettings::default()).await;
        assert_eq!(skipped.outcome, GenerateOutcome::Skipped);
        assert_eq!(skipped.snapshot, ctl.snapshot());
    }

    #[tokio::test]
    async fn download_is_noop_without_result() {
        let (ctl, _) = controller(FakeBackend::new(vec![]));
        assert!(ctl.download().is_none());
    }

    #[tokio::test]
    async fn download_names_file_from_timestamp() {
        let (ctl, _) = controller(FakeBackend::new(vec![Reply::Image(b"pixels")]));
        ctl.generate("a fox", &AdvancedSettings::default()).await;

        let created = ctl.snapshot().result.unwrap().created_at;
        let file = ctl.download().unwrap();
        assert_eq!(file.file_name, format!("generated-image-{}.png", created.timestamp_millis()));
        assert_eq!(file.mime_type, "image/png");
        assert_eq!(file.bytes.as_ref(), b"pixels");
    }

    #[test]
    fn extensions_follow_mime() {
        assert_eq!(extension_for("image/png"), "png");
        assert_eq!(extension_for("image/jpeg"), "jpg");
        assert_eq!(extension_for("image/webp"), "webp");
        assert_eq!(extension_for("application/octet-stream"), "png");
    }
}
