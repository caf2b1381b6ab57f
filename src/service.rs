//! Controller-side facade
//!
//! [`DictionaryService`] owns the worker, the persisted user decisions and
//! the engine configuration. Edits to decisions are persisted immediately;
//! reloading dictionaries afterwards is the caller's call.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::backend::DictionaryBackend;
use crate::broker::{Broker, BrokerError};
use crate::config::EngineConfig;
use crate::discovery;
use crate::error::StoreError;
use crate::model::{
    Asset, DictionaryConfig, DictionaryGroup, DictionaryProfile, DiscoveryPathError, FuzzyMatch,
    LoadReport, LookupRecord, Resource, ResourceKind, WordMatch,
};
use crate::protocol::{Operation, Reply};
use crate::store::{PersistedState, StateStore};
use crate::transcode::Transcoder;
use crate::worker::{Worker, WorkerHandle};

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to start worker: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("unknown dictionary {0}")]
    UnknownDictionary(String),

    #[error("{} is not a resource of dictionary {id}", path.display())]
    UnknownResource { id: String, path: PathBuf },

    #[error("worker sent an unexpected reply to {0}")]
    UnexpectedReply(&'static str),
}

pub type Result<T> = std::result::Result<T, ServiceError>;

/// Discovery merged with saved decisions
#[derive(Debug, Clone, Default)]
pub struct DiscoveryOutcome {
    pub groups: Vec<DictionaryGroup>,
    pub configs: BTreeMap<String, DictionaryConfig>,
    pub path_errors: Vec<DiscoveryPathError>,
}

/// Total on-disk size of `paths`, missing files count as zero
fn total_size<'a>(paths: impl IntoIterator<Item = &'a Path>) -> u64 {
    paths
        .into_iter()
        .filter_map(|p| std::fs::metadata(p).ok())
        .map(|m| m.len())
        .sum()
}

pub struct DictionaryService {
    backend: Arc<dyn DictionaryBackend>,
    transcoder: Arc<dyn Transcoder>,
    store: Arc<dyn StateStore>,
    config: EngineConfig,
    worker: WorkerHandle,
    broker: Broker,
    /// Groups found by the last discovery
    groups: Vec<DictionaryGroup>,
}

impl DictionaryService {
    /// Start a worker. Must be called inside a tokio runtime.
    pub fn start(
        backend: Arc<dyn DictionaryBackend>,
        transcoder: Arc<dyn Transcoder>,
        store: Arc<dyn StateStore>,
        config: EngineConfig,
    ) -> Result<Self> {
        let (worker, broker) = Worker::spawn(Arc::clone(&backend), Arc::clone(&transcoder), &config)
            .map_err(ServiceError::Spawn)?;
        Ok(Self {
            backend,
            transcoder,
            store,
            config,
            worker,
            broker,
            groups: Vec::new(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn groups(&self) -> &[DictionaryGroup] {
        &self.groups
    }

    pub fn group(&self, id: &str) -> Option<&DictionaryGroup> {
        self.groups.iter().find(|g| g.id == id)
    }

    /// Replace a failed worker. Dictionaries must be loaded again.
    pub fn restart_worker(&mut self) -> Result<()> {
        let (worker, broker) = Worker::spawn(
            Arc::clone(&self.backend),
            Arc::clone(&self.transcoder),
            &self.config,
        )
        .map_err(ServiceError::Spawn)?;
        // Dropping the old handle stops the old worker
        self.worker = worker;
        self.broker = broker;
        tracing::info!("worker restarted");
        Ok(())
    }

    pub fn worker_failed(&self) -> bool {
        self.broker.is_failed() || self.worker.is_finished()
    }

    pub async fn shutdown(self) {
        self.worker.shutdown().await;
    }

    async fn request(&self, operation: Operation, timeout: Duration) -> Result<Reply> {
        Ok(self.broker.send(operation, timeout).await?)
    }

    pub fn scan_paths(&self) -> Result<Vec<PathBuf>> {
        Ok(self.store.load()?.scan_paths)
    }

    /// Returns false when the path was already configured
    pub fn add_scan_path(&self, path: impl Into<PathBuf>) -> Result<bool> {
        let path = path.into();
        let mut state = self.store.load()?;
        if state.scan_paths.contains(&path) {
            return Ok(false);
        }
        state.scan_paths.push(path);
        self.store.save(&state)?;
        Ok(true)
    }

    /// Returns false when the path was not configured
    pub fn remove_scan_path(&self, path: &Path) -> Result<bool> {
        let mut state = self.store.load()?;
        let before = state.scan_paths.len();
        state.scan_paths.retain(|p| p != path);
        if state.scan_paths.len() == before {
            return Ok(false);
        }
        self.store.save(&state)?;
        Ok(true)
    }

    /// Scan the configured directories and reconcile with saved decisions
    pub async fn discover(&mut self) -> Result<DiscoveryOutcome> {
        let mut state = self.store.load()?;
        let operation = Operation::Discover {
            scan_paths: state.scan_paths.clone(),
        };
        let report = match self.request(operation, self.config.discover_timeout()).await? {
            Reply::Discovered(report) => report,
            _ => return Err(ServiceError::UnexpectedReply("discover")),
        };

        let configs = discovery::reconcile(&report.groups, &state.dictionaries);
        // Decisions for bundles that were not found this time are kept
        state
            .dictionaries
            .extend(configs.iter().map(|(id, c)| (id.clone(), c.clone())));
        self.store.save(&state)?;

        self.groups = report.groups.clone();
        Ok(DiscoveryOutcome {
            groups: report.groups,
            configs,
            path_errors: report.errors,
        })
    }

    fn profiles(&self, state: &PersistedState) -> Vec<DictionaryProfile> {
        self.groups
            .iter()
            .map(|group| DictionaryProfile {
                group: group.clone(),
                config: discovery::reconcile_config(group, state.dictionaries.get(&group.id)),
            })
            .collect()
    }

    /// Open every enabled dictionary from the last discovery
    pub async fn load(&self) -> Result<LoadReport> {
        let state = self.store.load()?;
        let profiles = self.profiles(&state);

        let bytes = total_size(profiles.iter().filter(|p| p.config.enabled).flat_map(|p| {
            std::iter::once(p.group.path.as_path()).chain(
                p.group
                    .resources_of(ResourceKind::Archive)
                    .filter(move |r| p.config.is_resource_enabled(&r.path))
                    .map(|r| r.path.as_path()),
            )
        }));
        let timeout = self.config.load_timeout(bytes);
        tracing::info!(dictionaries = profiles.len(), bytes, ?timeout, "loading dictionaries");

        match self.request(Operation::Load { profiles }, timeout).await? {
            Reply::Loaded(report) => Ok(report),
            _ => Err(ServiceError::UnexpectedReply("load")),
        }
    }

    fn edit_config(&self, id: &str, edit: impl FnOnce(&mut DictionaryConfig)) -> Result<()> {
        let mut state = self.store.load()?;
        if !state.dictionaries.contains_key(id) {
            let group = self
                .group(id)
                .ok_or_else(|| ServiceError::UnknownDictionary(id.to_string()))?;
            state
                .dictionaries
                .insert(id.to_string(), discovery::reconcile_config(group, None));
        }
        let Some(config) = state.dictionaries.get_mut(id) else {
            return Err(ServiceError::UnknownDictionary(id.to_string()));
        };
        edit(config);
        self.store.save(&state)?;
        Ok(())
    }

    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        self.edit_config(id, |c| c.enabled = enabled)
    }

    /// `path` must be one of the resources discovered for the dictionary
    pub fn set_resource_enabled(&self, id: &str, path: &Path, enabled: bool) -> Result<()> {
        let group = self
            .group(id)
            .ok_or_else(|| ServiceError::UnknownDictionary(id.to_string()))?;
        if !group.resources.iter().any(|r| r.path == path) {
            return Err(ServiceError::UnknownResource {
                id: id.to_string(),
                path: path.to_path_buf(),
            });
        }
        self.edit_config(id, |c| {
            c.resources.insert(path.to_path_buf(), enabled);
        })
    }

    /// Set or clear the display name
    pub fn rename(&self, id: &str, name: Option<String>) -> Result<()> {
        self.edit_config(id, |c| c.custom_name = name)
    }

    /// Enabled stylesheets and scripts of a discovered dictionary
    pub fn asset_paths(&self, id: &str) -> Result<Vec<PathBuf>> {
        let group = self
            .group(id)
            .ok_or_else(|| ServiceError::UnknownDictionary(id.to_string()))?;
        let state = self.store.load()?;
        let config = discovery::reconcile_config(group, state.dictionaries.get(id));
        Ok(group
            .resources
            .iter()
            .filter(|r| r.kind != ResourceKind::Archive && config.is_resource_enabled(&r.path))
            .map(|r| r.path.clone())
            .collect())
    }

    pub async fn get_assets(&self, paths: Vec<PathBuf>) -> Result<Vec<Asset>> {
        match self
            .request(Operation::GetAssets { paths }, self.config.query_timeout())
            .await?
        {
            Reply::Assets(assets) => Ok(assets),
            _ => Err(ServiceError::UnexpectedReply("get_assets")),
        }
    }

    pub async fn lookup(&self, word: &str) -> Result<Vec<LookupRecord>> {
        let operation = Operation::Lookup { word: word.into() };
        match self.request(operation, self.config.query_timeout()).await? {
            Reply::Records(records) => Ok(records),
            _ => Err(ServiceError::UnexpectedReply("lookup")),
        }
    }

    pub async fn lookup_in_dict(
        &self,
        word: &str,
        dictionary_id: &str,
    ) -> Result<Option<LookupRecord>> {
        let operation = Operation::LookupInDict {
            word: word.into(),
            dictionary_id: dictionary_id.into(),
        };
        match self.request(operation, self.config.query_timeout()).await? {
            Reply::Record(record) => Ok(record),
            _ => Err(ServiceError::UnexpectedReply("lookup_in_dict")),
        }
    }

    pub async fn get_resource(
        &self,
        key: &str,
        dictionary_id: &str,
    ) -> Result<Option<Resource>> {
        let operation = Operation::GetResource {
            key: key.into(),
            dictionary_id: dictionary_id.into(),
        };
        match self.request(operation, self.config.resource_timeout()).await? {
            Reply::Resource(resource) => Ok(resource),
            _ => Err(ServiceError::UnexpectedReply("get_resource")),
        }
    }

    pub async fn prefix(&self, prefix: &str, max_results: usize) -> Result<Vec<String>> {
        let operation = Operation::Prefix {
            prefix: prefix.into(),
            max_results,
        };
        match self.request(operation, self.config.query_timeout()).await? {
            Reply::Words(words) => Ok(words),
            _ => Err(ServiceError::UnexpectedReply("prefix")),
        }
    }

    pub async fn associate(&self, phrase: &str, max_results: usize) -> Result<Vec<WordMatch>> {
        let operation = Operation::Associate {
            phrase: phrase.into(),
            max_results,
        };
        match self.request(operation, self.config.query_timeout()).await? {
            Reply::Matches(matches) => Ok(matches),
            _ => Err(ServiceError::UnexpectedReply("associate")),
        }
    }

    pub async fn suggest(
        &self,
        phrase: &str,
        distance: usize,
        max_results: usize,
    ) -> Result<Vec<String>> {
        let operation = Operation::Suggest {
            phrase: phrase.into(),
            distance,
            max_results,
        };
        match self.request(operation, self.config.query_timeout()).await? {
            Reply::Words(words) => Ok(words),
            _ => Err(ServiceError::UnexpectedReply("suggest")),
        }
    }

    pub async fn fuzzy_search(
        &self,
        word: &str,
        size: usize,
        gap: usize,
    ) -> Result<Vec<FuzzyMatch>> {
        let operation = Operation::FuzzySearch {
            word: word.into(),
            size,
            gap,
        };
        match self.request(operation, self.config.query_timeout()).await? {
            Reply::Fuzzy(matches) => Ok(matches),
            _ => Err(ServiceError::UnexpectedReply("fuzzy_search")),
        }
    }
}
