//! Multi-dictionary lookup engine for MDX/MDD bundles
//!
//! Dictionaries are opened and queried inside an isolated worker; the
//! controller talks to it through a correlated, timed-out request broker.
//! A single lookup fans out to every loaded dictionary, follows
//! `@@@LINK=` redirects, and resolves embedded resources (transcoding Speex
//! audio to WAV on the way).
//!
//! # Example
//! ```no_run
//! use std::sync::Arc;
//! use mdict_hub::{
//!     DictionaryService, EngineConfig, ExternalTranscoder, JsonFileStore, MdictBackend,
//! };
//!
//! # async fn run() -> Result<(), mdict_hub::ServiceError> {
//! let config = EngineConfig::from_env();
//! let mut service = DictionaryService::start(
//!     Arc::new(MdictBackend),
//!     Arc::new(ExternalTranscoder::ffmpeg(config.transcoder.clone())),
//!     Arc::new(JsonFileStore::new("mdict-hub.json")),
//!     config,
//! )?;
//! service.add_scan_path("/home/me/dictionaries")?;
//! service.discover().await?;
//! service.load().await?;
//! for record in service.lookup("hello").await? {
//!     println!("{}: {:?}", record.dictionary_name, record.definition());
//! }
//! # Ok(())
//! # }
//! ```

mod codec;
mod mdict_base;
mod utils;

pub mod aggregate;
pub mod backend;
pub mod broker;
pub mod config;
pub mod discovery;
pub mod error;
pub mod mdd;
pub mod mdx;
pub mod model;
pub mod protocol;
pub mod redirect;
pub mod registry;
pub mod resource;
pub mod service;
pub mod store;
pub mod transcode;
pub mod types;
pub mod worker;

#[cfg(test)]
mod testing;

pub use backend::{DictionaryBackend, DictionaryReader, MdictBackend, ResourceArchive};
pub use broker::{Broker, BrokerError};
pub use config::EngineConfig;
pub use error::{MdictError, Result, StoreError, TranscodeError};
pub use mdd::Mdd;
pub use mdx::Mdx;
pub use model::*;
pub use redirect::{RedirectFailure, RedirectResolver};
pub use service::{DictionaryService, DiscoveryOutcome, ServiceError};
pub use store::{JsonFileStore, MemoryStore, PersistedState, StateStore};
pub use transcode::{ExternalTranscoder, Transcoder};
pub use types::{DictHeader, DictMeta, Encoding, FuzzyWord, KeyWordItem, LookupResult};
pub use worker::{Worker, WorkerHandle};
