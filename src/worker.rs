//! Isolated worker execution context
//!
//! The worker owns every opened dictionary. It runs on its own OS thread with
//! its own tokio runtime and talks to the controller only through JSON frames
//! on a pair of channels, so nothing a reader does can corrupt controller
//! state.
//!
//! Each request runs on its own task. Queries share the registry through a
//! read guard; Discover and Load take the write guard, which serializes them
//! and holds queries back until the new registry is in place.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinSet;

use crate::aggregate::QueryAggregator;
use crate::backend::DictionaryBackend;
use crate::broker::Broker;
use crate::config::EngineConfig;
use crate::discovery;
use crate::model::{Asset, ResourceKind};
use crate::protocol::{
    FrameHeader, Operation, Reply, ReplyFrame, RequestFrame, WorkerError, WorkerErrorKind,
    PROTOCOL_VERSION,
};
use crate::redirect::RedirectResolver;
use crate::registry::Registry;
use crate::resource::ResourceResolver;
use crate::transcode::Transcoder;

fn internal(operation: &str, e: impl std::fmt::Display) -> WorkerError {
    WorkerError::new(WorkerErrorKind::Internal, format!("{} failed: {}", operation, e))
}

/// Read stylesheets and scripts as text; unreadable paths are skipped
pub fn read_assets(paths: &[PathBuf]) -> Vec<Asset> {
    paths
        .iter()
        .filter_map(|path| {
            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
            let kind = match ResourceKind::from_extension(ext) {
                Some(kind @ (ResourceKind::Stylesheet | ResourceKind::Script)) => kind,
                _ => {
                    tracing::warn!(path = %path.display(), "not a stylesheet or script");
                    return None;
                }
            };
            match std::fs::read(path) {
                Ok(bytes) => Some(Asset {
                    path: path.clone(),
                    kind,
                    content: String::from_utf8_lossy(&bytes).into_owned(),
                }),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to read asset");
                    None
                }
            }
        })
        .collect()
}

/// Worker-side state and request handling
pub struct WorkerContext {
    backend: Arc<dyn DictionaryBackend>,
    aggregator: QueryAggregator,
    resources: ResourceResolver,
    registry: RwLock<Arc<Registry>>,
}

impl WorkerContext {
    pub fn new(
        backend: Arc<dyn DictionaryBackend>,
        transcoder: Arc<dyn Transcoder>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            backend,
            aggregator: QueryAggregator::new(RedirectResolver::new(config.max_redirect_depth)),
            resources: ResourceResolver::new(transcoder, config.resource_timeout()),
            registry: RwLock::new(Arc::new(Registry::default())),
        }
    }

    /// Snapshot of the current registry
    pub async fn registry(&self) -> Arc<Registry> {
        Arc::clone(&*self.registry.read().await)
    }

    pub async fn handle(&self, operation: Operation) -> Result<Reply, WorkerError> {
        if operation.is_exclusive() {
            let mut current = self.registry.write().await;
            self.rebuild(&mut current, operation).await
        } else {
            let registry = self.registry.read().await;
            self.query(&registry, operation).await
        }
    }

    /// Discover and Load, run under the write guard
    async fn rebuild(
        &self,
        current: &mut Arc<Registry>,
        operation: Operation,
    ) -> Result<Reply, WorkerError> {
        match operation {
            Operation::Discover { scan_paths } => {
                let report = tokio::task::spawn_blocking(move || discovery::discover(&scan_paths))
                    .await
                    .map_err(|e| internal("discover", e))?;
                Ok(Reply::Discovered(report))
            }
            Operation::Load { profiles } => {
                let backend = Arc::clone(&self.backend);
                let build = move || Registry::build(backend.as_ref(), &profiles);
                let (registry, report) = tokio::task::spawn_blocking(build)
                    .await
                    .map_err(|e| internal("load", e))?;
                *current = Arc::new(registry);
                Ok(Reply::Loaded(report))
            }
            other => Err(internal(other.name(), "not a registry rebuild")),
        }
    }

    /// Everything else, run under a read guard
    async fn query(&self, registry: &Registry, operation: Operation) -> Result<Reply, WorkerError> {
        match operation {
            Operation::GetAssets { paths } => {
                let assets = tokio::task::spawn_blocking(move || read_assets(&paths))
                    .await
                    .map_err(|e| internal("get_assets", e))?;
                Ok(Reply::Assets(assets))
            }
            Operation::Lookup { word } => {
                Ok(Reply::Records(self.aggregator.lookup(registry, &word).await))
            }
            Operation::LookupInDict { word, dictionary_id } => {
                let record = self
                    .aggregator
                    .lookup_in_dict(registry, &word, &dictionary_id)
                    .await;
                Ok(Reply::Record(record))
            }
            Operation::GetResource { key, dictionary_id } => self
                .resources
                .resolve(registry, &key, &dictionary_id)
                .await
                .map(Reply::Resource)
                .map_err(|e| {
                    tracing::warn!(
                        key = %key,
                        dictionary = %dictionary_id,
                        error = %e,
                        "resource resolution failed"
                    );
                    WorkerError::new(WorkerErrorKind::Transcoding, e.to_string())
                }),
            Operation::Prefix { prefix, max_results } => Ok(Reply::Words(
                self.aggregator.prefix(registry, &prefix, max_results).await,
            )),
            Operation::Associate { phrase, max_results } => Ok(Reply::Matches(
                self.aggregator.associate(registry, &phrase, max_results).await,
            )),
            Operation::Suggest {
                phrase,
                distance,
                max_results,
            } => Ok(Reply::Words(
                self.aggregator
                    .suggest(registry, &phrase, distance, max_results)
                    .await,
            )),
            Operation::FuzzySearch { word, size, gap } => Ok(Reply::Fuzzy(
                self.aggregator.fuzzy_search(registry, &word, size, gap).await,
            )),
            other @ (Operation::Discover { .. } | Operation::Load { .. }) => {
                Err(internal(other.name(), "rebuilds the registry"))
            }
        }
    }
}

/// Decode one request frame, run it and build the reply.
///
/// `None` only when the frame is too broken to carry an id.
pub async fn process(ctx: Arc<WorkerContext>, text: String) -> Option<ReplyFrame> {
    let header = match FrameHeader::peek(&text) {
        Ok(header) => header,
        Err(e) => {
            tracing::warn!(error = %e, "undecodable request dropped");
            return None;
        }
    };
    if header.version != PROTOCOL_VERSION {
        let e = WorkerError::new(
            WorkerErrorKind::Protocol,
            format!("unsupported protocol version {}", header.version),
        );
        return Some(ReplyFrame::new(header.id, Err(e)));
    }
    let frame = match RequestFrame::decode(&text) {
        Ok(frame) => frame,
        Err(e) => {
            let e = WorkerError::new(WorkerErrorKind::Protocol, e.to_string());
            return Some(ReplyFrame::new(header.id, Err(e)));
        }
    };

    let id = frame.id;
    let name = frame.operation.name();
    tracing::debug!(id, operation = name, "dispatching request");

    // A panic inside the handler only fails this request
    let operation = frame.operation;
    let outcome = match tokio::spawn(async move { ctx.handle(operation).await }).await {
        Ok(result) => result,
        Err(e) => {
            tracing::error!(id, operation = name, error = %e, "request task failed");
            Err(internal(name, e))
        }
    };
    Some(ReplyFrame::new(id, outcome))
}

async fn reply(replies: &mpsc::Sender<String>, frame: ReplyFrame) {
    let text = match frame.encode() {
        Ok(text) => text,
        Err(e) => {
            tracing::error!(id = frame.id, error = %e, "failed to encode reply");
            let fallback = ReplyFrame::new(frame.id, Err(internal("encode", e)));
            match fallback.encode() {
                Ok(text) => text,
                Err(_) => return,
            }
        }
    };
    if replies.send(text).await.is_err() {
        tracing::debug!("controller gone, reply dropped");
    }
}

async fn serve(
    ctx: Arc<WorkerContext>,
    mut requests: mpsc::Receiver<String>,
    replies: mpsc::Sender<String>,
    mut stop: oneshot::Receiver<()>,
) {
    let mut tasks = JoinSet::new();
    loop {
        tokio::select! {
            _ = &mut stop => {
                tracing::info!(in_flight = tasks.len(), "worker stopping");
                tasks.abort_all();
                return;
            }
            Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            next = requests.recv() => match next {
                Some(text) => {
                    let ctx = Arc::clone(&ctx);
                    let replies = replies.clone();
                    tasks.spawn(async move {
                        if let Some(frame) = process(ctx, text).await {
                            reply(&replies, frame).await;
                        }
                    });
                }
                None => break,
            },
        }
    }

    tracing::info!("request channel closed, finishing in-flight work");
    while tasks.join_next().await.is_some() {}
}

/// Owns the worker thread; dropping it stops the worker
pub struct WorkerHandle {
    stop: Option<oneshot::Sender<()>>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Stop the worker, abandoning in-flight requests, and wait for its thread
    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(thread) = self.thread.take() {
            if tokio::task::spawn_blocking(move || thread.join()).await.is_err() {
                tracing::warn!("failed to join worker thread");
            }
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

pub struct Worker;

impl Worker {
    /// Start a worker thread and connect a broker to it.
    ///
    /// Must be called inside a tokio runtime, which drives the broker.
    pub fn spawn(
        backend: Arc<dyn DictionaryBackend>,
        transcoder: Arc<dyn Transcoder>,
        config: &EngineConfig,
    ) -> std::io::Result<(WorkerHandle, Broker)> {
        let capacity = config.channel_capacity.max(1);
        let (request_tx, request_rx) = mpsc::channel(capacity);
        let (reply_tx, reply_rx) = mpsc::channel(capacity);
        let (stop_tx, stop_rx) = oneshot::channel();

        let ctx = Arc::new(WorkerContext::new(backend, transcoder, config));
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("mdict-hub-worker-rt")
            .build()?;
        let thread = std::thread::Builder::new()
            .name("mdict-hub-worker".into())
            .spawn(move || {
                runtime.block_on(serve(ctx, request_rx, reply_tx, stop_rx));
                runtime.shutdown_background();
            })?;

        tracing::info!("worker started");
        let handle = WorkerHandle {
            stop: Some(stop_tx),
            thread: Some(thread),
        };
        Ok((handle, Broker::connect(request_tx, reply_rx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::BrokerError;
    use crate::error::TranscodeError;
    use crate::model::{DictionaryConfig, DictionaryGroup, DictionaryProfile, DictionaryResource};
    use crate::testing::{FakeDictionary, MemoryBackend};
    use async_trait::async_trait;
    use std::time::Duration;
    use tempfile::TempDir;

    struct NoTranscoder;

    #[async_trait]
    impl Transcoder for NoTranscoder {
        async fn convert(&self, _: Vec<u8>) -> Result<Vec<u8>, TranscodeError> {
            Err(TranscodeError::InvalidInput("unsupported".into()))
        }
    }

    /// Takes its time, then echoes the input
    struct SlowTranscoder(Duration);

    #[async_trait]
    impl Transcoder for SlowTranscoder {
        async fn convert(&self, input: Vec<u8>) -> Result<Vec<u8>, TranscodeError> {
            tokio::time::sleep(self.0).await;
            Ok(input)
        }
    }

    fn profile(id: &str, path: &str, archives: &[&str]) -> DictionaryProfile {
        DictionaryProfile {
            group: DictionaryGroup {
                id: id.into(),
                name: id.into(),
                path: PathBuf::from(path),
                resources: archives
                    .iter()
                    .map(|a| DictionaryResource {
                        path: PathBuf::from(a),
                        name: a.to_string(),
                        kind: ResourceKind::Archive,
                    })
                    .collect(),
            },
            config: DictionaryConfig::default(),
        }
    }

    fn backend() -> MemoryBackend {
        let mut crashing = FakeDictionary::new(&[("boom", "never")]);
        crashing.panic_on = Some("boom".into());
        MemoryBackend::default()
            .with_dictionary("/d/one.mdx", FakeDictionary::new(&[("cat", "feline")]))
            .with_dictionary("/d/two.mdx", crashing)
            .with_archive("/d/one.mdd", &[("\\a.spx", b"speex"), ("\\a.png", b"PNG")])
    }

    fn context() -> Arc<WorkerContext> {
        Arc::new(WorkerContext::new(
            Arc::new(backend()),
            Arc::new(NoTranscoder),
            &EngineConfig::default(),
        ))
    }

    async fn load(ctx: &WorkerContext) {
        let profiles = vec![
            profile("one", "/d/one.mdx", &["/d/one.mdd"]),
            profile("two", "/d/two.mdx", &[]),
        ];
        match ctx.handle(Operation::Load { profiles }).await.unwrap() {
            Reply::Loaded(report) => assert_eq!(report.loaded.len(), 2),
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_load_replaces_registry() {
        let ctx = context();
        assert!(ctx.registry().await.is_empty());
        load(&ctx).await;
        assert_eq!(ctx.registry().await.len(), 2);

        let reply = ctx
            .handle(Operation::Load {
                profiles: vec![profile("one", "/d/one.mdx", &[])],
            })
            .await
            .unwrap();
        assert!(matches!(reply, Reply::Loaded(_)));
        assert_eq!(ctx.registry().await.len(), 1);
    }

    #[tokio::test]
    async fn test_lookup_after_load() {
        let ctx = context();
        load(&ctx).await;
        match ctx
            .handle(Operation::Lookup { word: "cat".into() })
            .await
            .unwrap()
        {
            Reply::Records(records) => {
                assert_eq!(records.len(), 1);
                assert_eq!(records[0].definition(), Some("feline"));
            }
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_resource_errors_are_transcoding_errors() {
        let ctx = context();
        load(&ctx).await;

        let err = ctx
            .handle(Operation::GetResource {
                key: "sound://a.spx".into(),
                dictionary_id: "one".into(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind, WorkerErrorKind::Transcoding);

        let reply = ctx
            .handle(Operation::GetResource {
                key: "a.png".into(),
                dictionary_id: "one".into(),
            })
            .await
            .unwrap();
        assert!(matches!(reply, Reply::Resource(Some(r)) if r.mime_type == "image/png"));
    }

    fn dictionary_ids(reply: Reply) -> Vec<String> {
        match reply {
            Reply::Records(records) => records.into_iter().map(|r| r.dictionary_id).collect(),
            other => panic!("unexpected reply {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_lookup_during_load_sees_one_registry() {
        let backend = backend()
            .with_dictionary("/d/three.mdx", FakeDictionary::new(&[("cat", "chat")]))
            .with_dictionary("/d/four.mdx", FakeDictionary::new(&[("cat", "gato")]))
            .with_open_delay(Duration::from_millis(50));
        let ctx = Arc::new(WorkerContext::new(
            Arc::new(backend),
            Arc::new(NoTranscoder),
            &EngineConfig::default(),
        ));
        ctx.handle(Operation::Load {
            profiles: vec![profile("one", "/d/one.mdx", &[])],
        })
        .await
        .unwrap();

        let reload = tokio::spawn({
            let ctx = Arc::clone(&ctx);
            async move {
                let profiles = vec![
                    profile("three", "/d/three.mdx", &[]),
                    profile("four", "/d/four.mdx", &[]),
                ];
                ctx.handle(Operation::Load { profiles }).await
            }
        });

        let old = vec!["one".to_string()];
        let new = vec!["three".to_string(), "four".to_string()];
        let mut seen_new = false;
        for _ in 0..10 {
            let reply = ctx
                .handle(Operation::Lookup { word: "cat".into() })
                .await
                .unwrap();
            let ids = dictionary_ids(reply);
            assert!(ids == old || ids == new, "mixed registry: {:?}", ids);
            seen_new |= ids == new;
            tokio::time::sleep(Duration::from_millis(15)).await;
        }
        assert!(matches!(reload.await.unwrap(), Ok(Reply::Loaded(_))));
        assert!(seen_new);
    }

    #[tokio::test]
    async fn test_panicking_open_leaves_other_dictionaries_loaded() {
        let backend = backend().with_panic_on_open("/d/two.mdx");
        let ctx = WorkerContext::new(
            Arc::new(backend),
            Arc::new(NoTranscoder),
            &EngineConfig::default(),
        );
        let profiles = vec![
            profile("one", "/d/one.mdx", &["/d/one.mdd"]),
            profile("two", "/d/two.mdx", &[]),
        ];
        match ctx.handle(Operation::Load { profiles }).await.unwrap() {
            Reply::Loaded(report) => {
                assert_eq!(report.loaded.len(), 1);
                assert_eq!(report.loaded[0].id, "one");
                assert_eq!(report.failures.len(), 1);
            }
            other => panic!("unexpected reply {:?}", other),
        }
        let reply = ctx
            .handle(Operation::Lookup { word: "cat".into() })
            .await
            .unwrap();
        assert_eq!(dictionary_ids(reply), ["one"]);
    }

    #[tokio::test]
    async fn test_process_rejects_other_versions() {
        let text = r#"{"version": 99, "id": 4, "operation": {"lookup": {"word": "x"}}}"#;
        let frame = process(context(), text.into()).await.unwrap();
        assert_eq!(frame.id, 4);
        match Result::<Reply, WorkerError>::from(frame.outcome) {
            Err(e) => assert_eq!(e.kind, WorkerErrorKind::Protocol),
            Ok(reply) => panic!("unexpected reply {:?}", reply),
        }
        assert!(process(context(), "garbage".into()).await.is_none());
    }

    #[tokio::test]
    async fn test_get_assets_reads_text_and_skips_unreadable() {
        let tmp = TempDir::new().unwrap();
        let css = tmp.path().join("a.css");
        std::fs::write(&css, b"body { color: red }\xff").unwrap();
        let js = tmp.path().join("a.js");
        std::fs::write(&js, "var x = 1;").unwrap();

        let paths = vec![css.clone(), tmp.path().join("missing.css"), js.clone()];
        let assets = read_assets(&paths);
        assert_eq!(assets.len(), 2);
        assert_eq!(assets[0].kind, ResourceKind::Stylesheet);
        assert!(assets[0].content.starts_with("body { color: red }"));
        assert_eq!(assets[1].path, js);
        assert_eq!(assets[1].kind, ResourceKind::Script);
    }

    #[tokio::test]
    async fn test_spawned_worker_answers_and_survives_panics() {
        let (handle, broker) = Worker::spawn(
            Arc::new(backend()),
            Arc::new(NoTranscoder),
            &EngineConfig::default(),
        )
        .unwrap();
        let timeout = Duration::from_secs(5);

        let profiles = vec![
            profile("one", "/d/one.mdx", &[]),
            profile("two", "/d/two.mdx", &[]),
        ];
        broker
            .send(Operation::Load { profiles }, timeout)
            .await
            .unwrap();

        // The crashing reader is skipped, the rest still answer
        let reply = broker
            .send(Operation::Lookup { word: "boom".into() }, timeout)
            .await
            .unwrap();
        assert!(matches!(reply, Reply::Records(r) if r.is_empty()));

        let reply = broker
            .send(Operation::Lookup { word: "cat".into() }, timeout)
            .await
            .unwrap();
        assert!(matches!(reply, Reply::Records(r) if r.len() == 1));

        handle.shutdown().await;
        tokio::time::timeout(timeout, async {
            while !broker.is_failed() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert!(matches!(
            broker
                .send(Operation::Lookup { word: "cat".into() }, timeout)
                .await,
            Err(BrokerError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_slow_transcoding_does_not_block_lookups() {
        let transcode = Duration::from_secs(1);
        let (handle, broker) = Worker::spawn(
            Arc::new(backend()),
            Arc::new(SlowTranscoder(transcode)),
            &EngineConfig::default(),
        )
        .unwrap();
        let timeout = Duration::from_secs(5);
        let profiles = vec![profile("one", "/d/one.mdx", &["/d/one.mdd"])];
        broker
            .send(Operation::Load { profiles }, timeout)
            .await
            .unwrap();

        let resource = broker.send(
            Operation::GetResource {
                key: "sound://a.spx".into(),
                dictionary_id: "one".into(),
            },
            timeout,
        );
        let lookup = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let started = std::time::Instant::now();
            let reply = broker
                .send(Operation::Lookup { word: "cat".into() }, transcode / 2)
                .await;
            (reply, started.elapsed())
        };
        let (resource, (lookup, waited)) = tokio::join!(resource, lookup);

        assert!(matches!(lookup, Ok(Reply::Records(r)) if r.len() == 1));
        assert!(waited < transcode, "lookup waited {:?}", waited);
        match resource.unwrap() {
            Reply::Resource(Some(r)) => assert_eq!(r.mime_type, "audio/wav"),
            other => panic!("unexpected reply {:?}", other),
        }

        handle.shutdown().await;
    }
}
