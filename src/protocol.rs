//! Controller/worker message envelope
//!
//! Frames travel as JSON strings. Each carries [`PROTOCOL_VERSION`] and the
//! correlation id the broker uses to route the reply back to its caller.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{
    Asset, DictionaryProfile, DiscoveryReport, FuzzyMatch, LoadReport, LookupRecord, Resource,
    WordMatch,
};

pub const PROTOCOL_VERSION: u32 = 1;

/// Work the controller can ask of the worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Discover { scan_paths: Vec<PathBuf> },
    Load { profiles: Vec<DictionaryProfile> },
    GetAssets { paths: Vec<PathBuf> },
    Lookup { word: String },
    LookupInDict { word: String, dictionary_id: String },
    GetResource { key: String, dictionary_id: String },
    Prefix { prefix: String, max_results: usize },
    Associate { phrase: String, max_results: usize },
    Suggest { phrase: String, distance: usize, max_results: usize },
    FuzzySearch { word: String, size: usize, gap: usize },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Discover { .. } => "discover",
            Operation::Load { .. } => "load",
            Operation::GetAssets { .. } => "get_assets",
            Operation::Lookup { .. } => "lookup",
            Operation::LookupInDict { .. } => "lookup_in_dict",
            Operation::GetResource { .. } => "get_resource",
            Operation::Prefix { .. } => "prefix",
            Operation::Associate { .. } => "associate",
            Operation::Suggest { .. } => "suggest",
            Operation::FuzzySearch { .. } => "fuzzy_search",
        }
    }

    /// Discover and Load rebuild worker state and must run alone
    pub fn is_exclusive(&self) -> bool {
        matches!(self, Operation::Discover { .. } | Operation::Load { .. })
    }
}

/// Successful result of an [`Operation`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reply {
    Discovered(DiscoveryReport),
    Loaded(LoadReport),
    Assets(Vec<Asset>),
    Records(Vec<LookupRecord>),
    Record(Option<LookupRecord>),
    Resource(Option<Resource>),
    Words(Vec<String>),
    Matches(Vec<WordMatch>),
    Fuzzy(Vec<FuzzyMatch>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerErrorKind {
    /// Malformed frame or version mismatch
    Protocol,
    /// The request task failed unexpectedly
    Internal,
    Transcoding,
}

impl fmt::Display for WorkerErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkerErrorKind::Protocol => "protocol",
            WorkerErrorKind::Internal => "internal",
            WorkerErrorKind::Transcoding => "transcoding",
        };
        f.write_str(s)
    }
}

/// Error reported by the worker for a single request
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind} error: {message}")]
pub struct WorkerError {
    pub kind: WorkerErrorKind,
    pub message: String,
}

impl WorkerError {
    pub fn new(kind: WorkerErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Ok(Reply),
    Err(WorkerError),
}

impl From<Result<Reply, WorkerError>> for Outcome {
    fn from(result: Result<Reply, WorkerError>) -> Self {
        match result {
            Ok(reply) => Outcome::Ok(reply),
            Err(e) => Outcome::Err(e),
        }
    }
}

impl From<Outcome> for Result<Reply, WorkerError> {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Ok(reply) => Ok(reply),
            Outcome::Err(e) => Err(e),
        }
    }
}

/// Version and id only, readable even when the rest of a frame is not
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct FrameHeader {
    pub version: u32,
    pub id: u64,
}

impl FrameHeader {
    pub fn peek(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestFrame {
    pub version: u32,
    pub id: u64,
    pub operation: Operation,
}

impl RequestFrame {
    pub fn new(id: u64, operation: Operation) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            id,
            operation,
        }
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn decode(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyFrame {
    pub version: u32,
    pub id: u64,
    pub outcome: Outcome,
}

impl ReplyFrame {
    pub fn new(id: u64, outcome: impl Into<Outcome>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            id,
            outcome: outcome.into(),
        }
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn decode(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}
