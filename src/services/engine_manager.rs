//! Lifecycle management for the local generation engine.
//!
//! The [`EngineManager`] owns at most one loaded model. It serialises
//! initialization (overlapping callers share a single load), publishes status
//! through a [`watch`] channel, and streams completions chunk by chunk.
//!
//! ```text
//! Uninitialized ──initialize──▶ Initializing ──ok──▶ Ready ──dispose/reset──▶ Disposed
//!                                    │                                          │
//!                                    └──err/timeout──▶ Error ◀───────────────────┘
//!                                  (Error and Disposed may initialize again)
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;

use crate::config::GenerationSettings;
use crate::providers::ai::{
    CompletionRequest, EngineLoader, GenerationEngine, LlmError, ProgressCallback,
};

/// Errors from the engine lifecycle.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Engine initialization failed: {0}")]
    Initialization(String),

    #[error("No engine loaded. Call initialize() first.")]
    EngineAbsent,

    #[error("Generation failed: {0}")]
    Generation(#[from] LlmError),

    #[error("Generation cancelled")]
    Cancelled,

    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}

/// Lifecycle state of the managed engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Uninitialized,
    Initializing,
    Ready,
    Disposed,
    Error,
}

/// Latest published engine status.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStatus {
    pub state: EngineState,
    /// Human-readable progress or outcome.
    pub message: String,
    pub updated_at: DateTime<Utc>,
}

impl EngineStatus {
    fn new(state: EngineState, message: impl Into<String>) -> Self {
        Self {
            state,
            message: message.into(),
            updated_at: Utc::now(),
        }
    }
}

/// Fixed generation parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Model identifier handed to the loader.
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub system_prompt: Option<String>,
    /// Upper bound on a single load, including any download.
    pub load_timeout: Duration,
    /// Upper bound on the wait for the next streamed delta.
    pub stream_idle_timeout: Duration,
}

impl EngineConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::from(&GenerationSettings::default())
        }
    }
}

impl From<&GenerationSettings> for EngineConfig {
    fn from(settings: &GenerationSettings) -> Self {
        Self {
            model: settings.model.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            system_prompt: settings.system_prompt.clone(),
            load_timeout: Duration::from_secs(settings.load_timeout_secs),
            stream_idle_timeout: Duration::from_secs(settings.stream_idle_timeout_secs),
        }
    }
}

struct LiveEngine {
    engine: Arc<dyn GenerationEngine>,
    /// Cancelled on dispose so in-flight streams stop.
    lifetime: CancellationToken,
}

/// Marks the status as failed if the initializing future is dropped mid-load.
struct ClaimGuard<'a> {
    status: &'a watch::Sender<EngineStatus>,
    armed: bool,
}

impl ClaimGuard<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.status.send_modify(|s| {
                if s.state == EngineState::Initializing {
                    *s = EngineStatus::new(EngineState::Error, "initialization aborted");
                }
            });
        }
    }
}

/// Owns the single loaded generation engine.
///
/// Share it as `Arc<EngineManager>`; every method takes `&self`.
pub struct EngineManager {
    loader: Arc<dyn EngineLoader>,
    config: EngineConfig,
    status: Arc<watch::Sender<EngineStatus>>,
    engine: RwLock<Option<LiveEngine>>,
}

impl EngineManager {
    pub fn new(loader: Arc<dyn EngineLoader>, config: EngineConfig) -> Self {
        let (status, _) = watch::channel(EngineStatus::new(
            EngineState::Uninitialized,
            "engine not loaded",
        ));

        Self {
            loader,
            config,
            status: Arc::new(status),
            engine: RwLock::new(None),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Current status snapshot.
    pub fn status(&self) -> EngineStatus {
        self.status.borrow().clone()
    }

    pub fn state(&self) -> EngineState {
        self.status.borrow().state
    }

    pub fn is_ready(&self) -> bool {
        self.state() == EngineState::Ready
    }

    pub fn is_loading(&self) -> bool {
        self.state() == EngineState::Initializing
    }

    /// Subscribes to status changes. Only the latest value is retained.
    pub fn subscribe(&self) -> watch::Receiver<EngineStatus> {
        self.status.subscribe()
    }

    fn publish(&self, state: EngineState, message: impl Into<String>) {
        self.status.send_replace(EngineStatus::new(state, message));
    }

    /// Loads the configured model.
    ///
    /// Returns immediately when already ready. If another caller is loading,
    /// waits for that load and shares its outcome instead of loading twice.
    pub async fn initialize(&self) -> Result<(), EngineError> {
        let mut claimed = false;
        self.status.send_if_modified(|s| match s.state {
            EngineState::Initializing | EngineState::Ready => false,
            _ => {
                *s = EngineStatus::new(EngineState::Initializing, "loading model");
                claimed = true;
                true
            }
        });

        if !claimed {
            return self.await_inflight().await;
        }

        let mut guard = ClaimGuard {
            status: &self.status,
            armed: true,
        };

        tracing::info!(model = %self.config.model, "Loading generation engine");

        let progress: ProgressCallback = {
            let status = Arc::clone(&self.status);
            Arc::new(move |message: &str| {
                status.send_if_modified(|s| {
                    if s.state != EngineState::Initializing {
                        return false;
                    }
                    *s = EngineStatus::new(EngineState::Initializing, message);
                    true
                });
            })
        };

        let loaded = tokio::time::timeout(
            self.config.load_timeout,
            self.loader.load(&self.config.model, progress),
        )
        .await;

        let result = match loaded {
            Ok(Ok(engine)) => Ok(engine),
            Ok(Err(e)) => Err(EngineError::Initialization(e.to_string())),
            Err(_) => Err(EngineError::Timeout(self.config.load_timeout)),
        };

        match result {
            Ok(engine) => {
                *self.engine.write().await = Some(LiveEngine {
                    engine,
                    lifetime: CancellationToken::new(),
                });
                guard.disarm();
                self.publish(EngineState::Ready, "model ready");
                tracing::info!(model = %self.config.model, "Generation engine ready");
                Ok(())
            }
            Err(e) => {
                guard.disarm();
                self.publish(EngineState::Error, format!("failed to load model: {e}"));
                tracing::error!(model = %self.config.model, error = %e, "Generation engine failed to load");
                Err(e)
            }
        }
    }

    async fn await_inflight(&self) -> Result<(), EngineError> {
        let mut rx = self.status.subscribe();
        let settled = rx
            .wait_for(|s| s.state != EngineState::Initializing)
            .await
            .map(|s| s.clone())
            .map_err(|_| EngineError::Initialization("status channel closed".to_string()))?;

        match settled.state {
            EngineState::Ready => Ok(()),
            EngineState::Error => Err(EngineError::Initialization(settled.message)),
            _ => Err(EngineError::Initialization(format!(
                "engine left loading as {:?}",
                settled.state
            ))),
        }
    }

    /// Releases the loaded model. Does nothing if none is loaded.
    ///
    /// The state leaves `Ready` before the engine's teardown starts, so an
    /// overlapping [`EngineManager::initialize`] loads a fresh engine instead
    /// of reporting the one being unloaded. In-flight streams end with
    /// [`EngineError::Cancelled`]. Failures from the engine's own teardown are
    /// logged, and the handle is cleared anyway.
    pub async fn dispose_engine(&self) {
        let mut slot = self.engine.write().await;
        let Some(live) = slot.take() else {
            return;
        };

        self.status.send_if_modified(|s| {
            if s.state != EngineState::Ready {
                return false;
            }
            *s = EngineStatus::new(EngineState::Disposed, "unloading model");
            true
        });

        live.lifetime.cancel();
        if let Err(e) = live.engine.dispose().await {
            tracing::warn!(model = %live.engine.model(), error = %e, "Engine dispose failed");
        }
        drop(slot);

        // A load claimed during teardown owns the status from here on.
        self.status.send_if_modified(|s| {
            if s.state != EngineState::Disposed {
                return false;
            }
            *s = EngineStatus::new(EngineState::Disposed, "model unloaded");
            true
        });
        tracing::info!(model = %self.config.model, "Generation engine disposed");
    }

    /// Disposes the engine and leaves it unloaded until the next initialize.
    pub async fn reset_chat(&self) {
        self.dispose_engine().await;
        self.status.send_if_modified(|s| {
            if s.state == EngineState::Initializing {
                return false;
            }
            let state = match s.state {
                EngineState::Ready => EngineState::Disposed,
                other => other,
            };
            *s = EngineStatus::new(state, "reset complete; reload the engine to continue");
            true
        });
    }

    /// Streams a completion for `prompt`, calling `on_chunk` with each
    /// non-empty delta in order.
    pub async fn generate_stream(
        &self,
        prompt: &str,
        on_chunk: impl FnMut(&str),
    ) -> Result<(), EngineError> {
        self.generate_stream_with_cancel(prompt, on_chunk, &CancellationToken::new())
            .await
    }

    /// Like [`EngineManager::generate_stream`], stopping early when `cancel`
    /// fires.
    pub async fn generate_stream_with_cancel(
        &self,
        prompt: &str,
        mut on_chunk: impl FnMut(&str),
        cancel: &CancellationToken,
    ) -> Result<(), EngineError> {
        let (engine, lifetime) = {
            let guard = self.engine.read().await;
            let live = guard.as_ref().ok_or(EngineError::EngineAbsent)?;
            (Arc::clone(&live.engine), live.lifetime.clone())
        };

        let mut request = CompletionRequest::prompt(prompt)
            .with_temperature(self.config.temperature)
            .with_max_tokens(self.config.max_tokens);
        if let Some(system) = &self.config.system_prompt {
            request = request.with_system_prompt(system.clone());
        }
        let idle = self.config.stream_idle_timeout;

        let mut stream = tokio::select! {
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            _ = lifetime.cancelled() => return Err(EngineError::Cancelled),
            started = tokio::time::timeout(idle, engine.stream_complete(&request)) => {
                started.map_err(|_| EngineError::Timeout(idle))??
            }
        };

        let mut chunks = 0usize;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                _ = lifetime.cancelled() => return Err(EngineError::Cancelled),
                next = tokio::time::timeout(idle, stream.next()) => {
                    next.map_err(|_| EngineError::Timeout(idle))?
                }
            };

            match next {
                Some(Ok(chunk)) => {
                    if !chunk.text.is_empty() {
                        chunks += 1;
                        on_chunk(&chunk.text);
                    }
                }
                Some(Err(e)) => return Err(e.into()),
                None => break,
            }
        }

        tracing::debug!(chunks, "Generation stream finished");
        Ok(())
    }
}

impl std::fmt::Debug for EngineManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineManager")
            .field("config", &self.config)
            .field("status", &*self.status.borrow())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ai::{CompletionStream, LlmResult, StreamChunk};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Engine whose stream yields `chunks` then, if `hang`, never ends.
    struct ScriptedEngine {
        chunks: Vec<&'static str>,
        hang: bool,
        disposed: Arc<AtomicUsize>,
        fail_dispose: bool,
        dispose_delay: Duration,
    }

    #[async_trait]
    impl GenerationEngine for ScriptedEngine {
        fn model(&self) -> &str {
            "scripted"
        }

        async fn stream_complete(&self, _request: &CompletionRequest) -> LlmResult<CompletionStream> {
            let items = futures::stream::iter(
                self.chunks
                    .clone()
                    .into_iter()
                    .map(|c| Ok::<_, LlmError>(StreamChunk::text(c))),
            );
            if self.hang {
                Ok(Box::pin(items.chain(futures::stream::pending())))
            } else {
                Ok(Box::pin(items))
            }
        }

        async fn dispose(&self) -> LlmResult<()> {
            tokio::time::sleep(self.dispose_delay).await;
            self.disposed.fetch_add(1, Ordering::SeqCst);
            if self.fail_dispose {
                return Err(LlmError::Unavailable("daemon gone".to_string()));
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct ScriptedLoader {
        loads: AtomicUsize,
        disposed: Arc<AtomicUsize>,
        delay: Duration,
        progress: Vec<&'static str>,
        fail: bool,
        chunks: Vec<&'static str>,
        hang: bool,
        fail_dispose: bool,
        dispose_delay: Duration,
    }

    #[async_trait]
    impl EngineLoader for ScriptedLoader {
        async fn load(
            &self,
            _model: &str,
            progress: ProgressCallback,
        ) -> LlmResult<Arc<dyn GenerationEngine>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            for step in &self.progress {
                progress(step);
            }
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(LlmError::ModelLoad("weights corrupt".to_string()));
            }
            Ok(Arc::new(ScriptedEngine {
                chunks: self.chunks.clone(),
                hang: self.hang,
                disposed: Arc::clone(&self.disposed),
                fail_dispose: self.fail_dispose,
                dispose_delay: self.dispose_delay,
            }))
        }
    }

    fn manager(loader: ScriptedLoader) -> (Arc<EngineManager>, Arc<ScriptedLoader>) {
        let loader = Arc::new(loader);
        let mut config = EngineConfig::new("scripted");
        config.load_timeout = Duration::from_millis(500);
        config.stream_idle_timeout = Duration::from_millis(100);
        let manager = EngineManager::new(loader.clone(), config);
        (Arc::new(manager), loader)
    }

    #[test]
    fn config_from_settings() {
        let config = EngineConfig::from(&GenerationSettings::default());
        assert_eq!(config.temperature, 0.7);
        assert_eq!(config.max_tokens, 512);
        assert_eq!(config.load_timeout, Duration::from_secs(600));
    }

    #[tokio::test]
    async fn starts_uninitialized() {
        let (manager, _) = manager(ScriptedLoader::default());
        assert_eq!(manager.state(), EngineState::Uninitialized);
        assert!(!manager.is_ready());
        assert!(!manager.is_loading());
    }

    #[tokio::test]
    async fn initialize_reaches_ready() {
        let (manager, loader) = manager(ScriptedLoader::default());

        manager.initialize().await.unwrap();

        assert!(manager.is_ready());
        assert_eq!(manager.status().message, "model ready");
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);

        manager.initialize().await.unwrap();
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn progress_is_published_while_loading() {
        let (manager, _) = manager(ScriptedLoader {
            progress: vec!["pulling manifest", "downloading 42%"],
            delay: Duration::from_millis(50),
            ..Default::default()
        });

        let task = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move { manager.initialize().await }
        });

        let mut rx = manager.subscribe();
        let seen = rx
            .wait_for(|s| s.message == "downloading 42%")
            .await
            .map(|s| s.state)
            .unwrap();
        assert_eq!(seen, EngineState::Initializing);

        task.await.unwrap().unwrap();
        assert!(manager.is_ready());
    }

    #[tokio::test]
    async fn overlapping_initialize_loads_once() {
        let (manager, loader) = manager(ScriptedLoader {
            delay: Duration::from_millis(50),
            ..Default::default()
        });

        let (a, b, c) = tokio::join!(manager.initialize(), manager.initialize(), manager.initialize());
        a.unwrap();
        b.unwrap();
        c.unwrap();

        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
        assert!(manager.is_ready());
    }

    #[tokio::test]
    async fn failed_load_sets_error_and_can_retry() {
        let (manager, loader) = manager(ScriptedLoader {
            fail: true,
            ..Default::default()
        });

        let result = manager.initialize().await;
        assert!(matches!(result, Err(EngineError::Initialization(_))));
        assert_eq!(manager.state(), EngineState::Error);
        assert!(manager.status().message.contains("weights corrupt"));

        let retry = manager.initialize().await;
        assert!(retry.is_err());
        assert_eq!(loader.loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn load_timeout_sets_error() {
        let (manager, _) = manager(ScriptedLoader {
            delay: Duration::from_secs(5),
            ..Default::default()
        });

        let result = manager.initialize().await;
        assert!(matches!(result, Err(EngineError::Timeout(_))));
        assert_eq!(manager.state(), EngineState::Error);
        assert!(!manager.is_ready());
    }

    #[tokio::test]
    async fn dropped_initialize_does_not_stay_loading() {
        let (manager, _) = manager(ScriptedLoader {
            delay: Duration::from_millis(200),
            ..Default::default()
        });

        let aborted =
            tokio::time::timeout(Duration::from_millis(20), manager.initialize()).await;
        assert!(aborted.is_err());

        assert_eq!(manager.state(), EngineState::Error);
        assert!(manager.initialize().await.is_ok());
    }

    #[tokio::test]
    async fn generate_streams_chunks_in_order() {
        let (manager, _) = manager(ScriptedLoader {
            chunks: vec!["Hel", "", "lo", " world"],
            ..Default::default()
        });
        manager.initialize().await.unwrap();

        let mut received = Vec::new();
        manager
            .generate_stream("hi", |chunk| received.push(chunk.to_string()))
            .await
            .unwrap();

        assert_eq!(received, vec!["Hel", "lo", " world"]);
    }

    #[tokio::test]
    async fn generate_without_engine_is_absent() {
        let (manager, _) = manager(ScriptedLoader::default());
        let result = manager.generate_stream("hi", |_| {}).await;
        assert!(matches!(result, Err(EngineError::EngineAbsent)));
    }

    #[tokio::test]
    async fn dispose_clears_engine() {
        let (manager, loader) = manager(ScriptedLoader::default());
        manager.initialize().await.unwrap();

        manager.dispose_engine().await;

        assert_eq!(manager.state(), EngineState::Disposed);
        assert_eq!(loader.disposed.load(Ordering::SeqCst), 1);
        let result = manager.generate_stream("hi", |_| {}).await;
        assert!(matches!(result, Err(EngineError::EngineAbsent)));

        // No engine: no-op.
        manager.dispose_engine().await;
        assert_eq!(loader.disposed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dispose_failure_is_swallowed() {
        let (manager, loader) = manager(ScriptedLoader {
            fail_dispose: true,
            ..Default::default()
        });
        manager.initialize().await.unwrap();

        manager.dispose_engine().await;

        assert_eq!(loader.disposed.load(Ordering::SeqCst), 1);
        assert!(!manager.is_ready());
        assert!(matches!(
            manager.generate_stream("hi", |_| {}).await,
            Err(EngineError::EngineAbsent)
        ));
    }

    #[tokio::test]
    async fn not_ready_while_unloading() {
        let (manager, loader) = manager(ScriptedLoader {
            chunks: vec!["fresh"],
            dispose_delay: Duration::from_millis(200),
            ..Default::default()
        });
        manager.initialize().await.unwrap();

        let disposing = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move { manager.dispose_engine().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(!manager.is_ready());
        assert_eq!(manager.status().message, "unloading model");

        manager.initialize().await.unwrap();
        disposing.await.unwrap();

        assert_eq!(loader.loads.load(Ordering::SeqCst), 2);
        assert_eq!(loader.disposed.load(Ordering::SeqCst), 1);
        assert!(manager.is_ready());

        let mut received = Vec::new();
        manager
            .generate_stream("hi", |c| received.push(c.to_string()))
            .await
            .unwrap();
        assert_eq!(received, vec!["fresh"]);
    }

    #[tokio::test]
    async fn reset_requires_reinitialize() {
        let (manager, loader) = manager(ScriptedLoader::default());
        manager.initialize().await.unwrap();

        manager.reset_chat().await;

        let status = manager.status();
        assert_eq!(status.state, EngineState::Disposed);
        assert!(status.message.starts_with("reset complete"));

        manager.initialize().await.unwrap();
        assert!(manager.is_ready());
        assert_eq!(loader.loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn stalled_stream_times_out() {
        let (manager, _) = manager(ScriptedLoader {
            chunks: vec!["partial"],
            hang: true,
            ..Default::default()
        });
        manager.initialize().await.unwrap();

        let mut received = Vec::new();
        let result = manager
            .generate_stream("hi", |c| received.push(c.to_string()))
            .await;

        assert!(matches!(result, Err(EngineError::Timeout(_))));
        assert_eq!(received, vec!["partial"]);
    }

    #[tokio::test]
    async fn caller_cancellation_stops_stream() {
        let (manager, _) = manager(ScriptedLoader {
            hang: true,
            ..Default::default()
        });
        manager.initialize().await.unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = manager
            .generate_stream_with_cancel("hi", |_| {}, &cancel)
            .await;
        assert!(matches!(result, Err(EngineError::Cancelled)));
    }

    #[tokio::test]
    async fn dispose_cancels_inflight_stream() {
        let loader = ScriptedLoader {
            chunks: vec!["first"],
            hang: true,
            ..Default::default()
        };
        let loader = Arc::new(loader);
        let mut config = EngineConfig::new("scripted");
        config.stream_idle_timeout = Duration::from_secs(10);
        let manager = Arc::new(EngineManager::new(loader, config));
        manager.initialize().await.unwrap();

        let received = Arc::new(Mutex::new(Vec::new()));
        let task = tokio::spawn({
            let manager = Arc::clone(&manager);
            let received = Arc::clone(&received);
            async move {
                manager
                    .generate_stream("hi", |c| received.lock().unwrap().push(c.to_string()))
                    .await
            }
        });

        while received.lock().unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        manager.dispose_engine().await;

        let result = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(EngineError::Cancelled)));
    }
}
