//! Discovery and reconciliation
//!
//! Scans directories for `.mdx` files and the archives, stylesheets and
//! scripts that share their base name, then merges the discovered bundles
//! with the user's saved decisions.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};

use crate::model::{
    DictionaryConfig, DictionaryGroup, DictionaryResource, DiscoveryPathError, DiscoveryReport,
    ResourceKind,
};

const PRIMARY_EXTENSION: &str = "mdx";

/// Stable id for the dictionary whose primary file is `path`
pub fn encode_group_id(path: &Path) -> String {
    URL_SAFE_NO_PAD.encode(path.to_string_lossy().as_bytes())
}

/// Inverse of [`encode_group_id`]
pub fn decode_group_id(id: &str) -> Option<PathBuf> {
    let bytes = URL_SAFE_NO_PAD.decode(id).ok()?;
    String::from_utf8(bytes).ok().map(PathBuf::from)
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Scan every directory, collecting a partial result when some are unreadable
pub fn discover(scan_paths: &[PathBuf]) -> DiscoveryReport {
    let mut report = DiscoveryReport::default();
    let mut seen = HashSet::new();

    for dir in scan_paths {
        match scan_directory(dir) {
            Ok(groups) => {
                for group in groups {
                    if seen.insert(group.id.clone()) {
                        report.groups.push(group);
                    }
                }
            }
            Err(e) => {
                tracing::warn!(path = %dir.display(), error = %e, "skipping unreadable scan path");
                report.errors.push(DiscoveryPathError {
                    path: dir.clone(),
                    message: e.to_string(),
                });
            }
        }
    }

    tracing::info!(
        groups = report.groups.len(),
        failed_paths = report.errors.len(),
        "discovery finished"
    );
    report
}

fn scan_directory(dir: &Path) -> std::io::Result<Vec<DictionaryGroup>> {
    let dir = std::path::absolute(dir)?;

    let mut files: Vec<PathBuf> = std::fs::read_dir(&dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file())
        .collect();
    files.sort_by_key(|path| file_name_of(path));

    let groups = files
        .iter()
        .filter(|path| extension_of(path).as_deref() == Some(PRIMARY_EXTENSION))
        .map(|primary| build_group(primary, &files))
        .collect();
    Ok(groups)
}

fn build_group(primary: &Path, files: &[PathBuf]) -> DictionaryGroup {
    let base = primary
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let main_archive = format!("{}.mdd", base).to_lowercase();

    let mut resources: Vec<DictionaryResource> = files
        .iter()
        .filter(|path| path.as_path() != primary)
        .filter_map(|path| {
            let name = file_name_of(path);
            if !name.starts_with(&base) {
                return None;
            }
            let kind = ResourceKind::from_extension(&extension_of(path)?)?;
            Some(DictionaryResource {
                path: path.clone(),
                name,
                kind,
            })
        })
        .collect();

    // `<base>.mdd` first, then `<base>.1.mdd`, `<base>.2.mdd`, ...
    resources.sort_by_key(|r| (r.name.to_lowercase() != main_archive, r.name.clone()));

    DictionaryGroup {
        id: encode_group_id(primary),
        name: base,
        path: primary.to_path_buf(),
        resources,
    }
}

/// Merge a freshly discovered group with its saved config, if any
pub fn reconcile_config(
    group: &DictionaryGroup,
    saved: Option<&DictionaryConfig>,
) -> DictionaryConfig {
    let Some(saved) = saved else {
        return DictionaryConfig {
            enabled: true,
            resources: group
                .resources
                .iter()
                .map(|r| (r.path.clone(), true))
                .collect(),
            custom_name: None,
        };
    };

    DictionaryConfig {
        enabled: saved.enabled,
        resources: group
            .resources
            .iter()
            .map(|r| (r.path.clone(), saved.is_resource_enabled(&r.path)))
            .collect(),
        custom_name: saved.custom_name.clone(),
    }
}

/// Configs for every discovered group, merged with what was saved
pub fn reconcile(
    groups: &[DictionaryGroup],
    saved: &BTreeMap<String, DictionaryConfig>,
) -> BTreeMap<String, DictionaryConfig> {
    groups
        .iter()
        .map(|group| {
            (
                group.id.clone(),
                reconcile_config(group, saved.get(&group.id)),
            )
        })
        .collect()
}
