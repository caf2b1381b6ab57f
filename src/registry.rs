//! Loaded dictionary instances
//!
//! A [`Registry`] is built in full by [`Registry::build`] and then swapped in
//! as a single value, so readers only ever observe a complete set.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::backend::{DictionaryBackend, DictionaryReader, ResourceArchive};
use crate::error::{MdictError, Result};
use crate::model::{DictionaryProfile, LoadInstanceError, LoadReport, LoadedSummary, ResourceKind};

pub struct OpenedArchive {
    pub path: PathBuf,
    pub archive: Box<dyn ResourceArchive>,
}

/// An opened, queryable dictionary
pub struct LoadedDictionary {
    pub id: String,
    pub name: String,
    pub reader: Box<dyn DictionaryReader>,
    /// Auxiliary archives in bundle order
    pub archives: Vec<OpenedArchive>,
}

/// Open a file, reporting a panicking reader as a corrupt file
fn open_guarded<T>(path: &Path, open: impl FnOnce() -> Result<T>) -> Result<T> {
    std::panic::catch_unwind(AssertUnwindSafe(open)).unwrap_or_else(|_| {
        Err(MdictError::InvalidFormat(format!(
            "reader panicked while opening {}",
            path.display()
        )))
    })
}

#[derive(Default)]
pub struct Registry {
    instances: Vec<Arc<LoadedDictionary>>,
}

impl Registry {
    pub fn new(instances: Vec<LoadedDictionary>) -> Self {
        Self {
            instances: instances.into_iter().map(Arc::new).collect(),
        }
    }

    /// Open every enabled profile. Failures are reported, never fatal.
    pub fn build(
        backend: &dyn DictionaryBackend,
        profiles: &[DictionaryProfile],
    ) -> (Self, LoadReport) {
        let mut report = LoadReport::default();
        let mut instances = Vec::new();
        let mut seen = HashSet::new();

        for profile in profiles.iter().filter(|p| p.config.enabled) {
            let group = &profile.group;
            if !seen.insert(group.id.clone()) {
                tracing::warn!(id = %group.id, "duplicate dictionary in load request, skipping");
                continue;
            }

            let reader = match open_guarded(&group.path, || backend.open_dictionary(&group.path)) {
                Ok(reader) => reader,
                Err(e) => {
                    tracing::warn!(
                        path = %group.path.display(),
                        error = %e,
                        "failed to open dictionary"
                    );
                    report.failures.push(LoadInstanceError {
                        dictionary_id: group.id.clone(),
                        path: group.path.clone(),
                        message: e.to_string(),
                    });
                    continue;
                }
            };

            let mut archives = Vec::new();
            for resource in group.resources_of(ResourceKind::Archive) {
                if !profile.config.is_resource_enabled(&resource.path) {
                    tracing::debug!(path = %resource.path.display(), "archive disabled");
                    continue;
                }
                match open_guarded(&resource.path, || backend.open_archive(&resource.path)) {
                    Ok(archive) => archives.push(OpenedArchive {
                        path: resource.path.clone(),
                        archive,
                    }),
                    Err(e) => {
                        tracing::warn!(
                            path = %resource.path.display(),
                            error = %e,
                            "failed to open archive"
                        );
                        report.failures.push(LoadInstanceError {
                            dictionary_id: group.id.clone(),
                            path: resource.path.clone(),
                            message: e.to_string(),
                        });
                    }
                }
            }

            let name = match profile.config.custom_name() {
                Some(name) => name.to_string(),
                None => reader.title().unwrap_or_else(|| group.name.clone()),
            };

            report.loaded.push(LoadedSummary {
                id: group.id.clone(),
                name: name.clone(),
                archives: archives.len(),
            });
            instances.push(LoadedDictionary {
                id: group.id.clone(),
                name,
                reader,
                archives,
            });
        }

        tracing::info!(
            loaded = report.loaded.len(),
            failed = report.failures.len(),
            "dictionaries loaded"
        );
        (Self::new(instances), report)
    }

    /// Instances in load order
    pub fn instances(&self) -> &[Arc<LoadedDictionary>] {
        &self.instances
    }

    pub fn get(&self, id: &str) -> Option<&Arc<LoadedDictionary>> {
        self.instances.iter().find(|d| d.id == id)
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}
