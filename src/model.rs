//! Data model shared by the controller and the worker
//!
//! Everything here is plain serializable data; handles to opened files never
//! leave the worker.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::redirect::RedirectFailure;

/// Kind of file attached to a dictionary bundle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Archive,
    Stylesheet,
    Script,
}

impl ResourceKind {
    /// Kind for a file extension, case-insensitive
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "mdd" => Some(ResourceKind::Archive),
            "css" => Some(ResourceKind::Stylesheet),
            "js" => Some(ResourceKind::Script),
            _ => None,
        }
    }
}

/// A file associated with a dictionary bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DictionaryResource {
    pub path: PathBuf,
    pub name: String,
    pub kind: ResourceKind,
}

/// A discovered dictionary bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DictionaryGroup {
    pub id: String,
    pub name: String,
    pub path: PathBuf,
    pub resources: Vec<DictionaryResource>,
}

impl DictionaryGroup {
    pub fn resources_of(&self, kind: ResourceKind) -> impl Iterator<Item = &DictionaryResource> {
        self.resources.iter().filter(move |r| r.kind == kind)
    }
}

fn default_enabled() -> bool {
    true
}

/// User decisions for one dictionary group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DictionaryConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Resource path to enabled flag; unmapped resources are enabled
    #[serde(default)]
    pub resources: BTreeMap<PathBuf, bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_name: Option<String>,
}

impl Default for DictionaryConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            resources: BTreeMap::new(),
            custom_name: None,
        }
    }
}

impl DictionaryConfig {
    pub fn is_resource_enabled(&self, path: &Path) -> bool {
        self.resources.get(path).copied().unwrap_or(true)
    }

    /// Custom name, ignoring blank ones
    pub fn custom_name(&self) -> Option<&str> {
        self.custom_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
    }
}

/// A group together with the decisions that apply to it, as sent to Load
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DictionaryProfile {
    pub group: DictionaryGroup,
    pub config: DictionaryConfig,
}

/// One scan directory could not be read
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("cannot scan {path}: {message}")]
pub struct DiscoveryPathError {
    pub path: PathBuf,
    pub message: String,
}

/// Result of scanning the configured directories
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryReport {
    pub groups: Vec<DictionaryGroup>,
    pub errors: Vec<DiscoveryPathError>,
}

/// One dictionary or archive failed to open during Load
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("failed to open {path} for {dictionary_id}: {message}")]
pub struct LoadInstanceError {
    pub dictionary_id: String,
    pub path: PathBuf,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadedSummary {
    pub id: String,
    pub name: String,
    pub archives: usize,
}

/// Outcome of a Load
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadReport {
    pub loaded: Vec<LoadedSummary>,
    pub failures: Vec<LoadInstanceError>,
}

/// What a lookup produced for one dictionary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryContent {
    Definition(String),
    RedirectFailed(RedirectFailure),
}

/// One dictionary's answer to a lookup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupRecord {
    pub dictionary_id: String,
    pub dictionary_name: String,
    pub headword: String,
    pub content: EntryContent,
}

impl LookupRecord {
    pub fn definition(&self) -> Option<&str> {
        match &self.content {
            EntryContent::Definition(text) => Some(text),
            EntryContent::RedirectFailed(_) => None,
        }
    }
}

/// A head-word tagged with the dictionary it came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordMatch {
    pub dictionary_id: String,
    pub headword: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FuzzyMatch {
    pub dictionary_id: String,
    pub headword: String,
    pub edit_distance: usize,
}

/// A resolved embedded resource, data base64 encoded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub data: String,
    pub mime_type: String,
}

/// Text of a stylesheet or script
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub path: PathBuf,
    pub kind: ResourceKind,
    pub content: String,
}
