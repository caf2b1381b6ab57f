//! In-memory backend for unit tests

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

use crate::backend::{
    DictionaryBackend, DictionaryReader, Entry, FuzzyCandidate, LocatedResource, ResourceArchive,
};
use crate::error::{MdictError, Result};
use crate::utils::levenshtein_distance;

#[derive(Debug, Clone, Default)]
pub struct FakeDictionary {
    pub title: Option<String>,
    pub entries: BTreeMap<String, String>,
    /// Looking this word up panics
    pub panic_on: Option<String>,
}

impl FakeDictionary {
    pub fn new(entries: &[(&str, &str)]) -> Self {
        Self {
            entries: entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ..Default::default()
        }
    }
}

impl DictionaryReader for FakeDictionary {
    fn title(&self) -> Option<String> {
        self.title.clone()
    }

    fn lookup(&self, word: &str) -> Result<Option<Entry>> {
        if self.panic_on.as_deref() == Some(word) {
            panic!("reader crashed on {}", word);
        }
        Ok(self.entries.get(word).map(|content| Entry {
            headword: word.to_string(),
            content: content.clone(),
        }))
    }

    fn prefix(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn associate(&self, phrase: &str) -> Result<Vec<String>> {
        let first = phrase.chars().next();
        Ok(self
            .entries
            .keys()
            .filter(|k| k.chars().next() == first)
            .cloned()
            .collect())
    }

    fn suggest(&self, phrase: &str, distance: usize) -> Result<Vec<String>> {
        Ok(self
            .entries
            .keys()
            .filter(|k| levenshtein_distance(k, phrase) <= distance)
            .cloned()
            .collect())
    }

    fn fuzzy_search(&self, word: &str, size: usize, gap: usize) -> Result<Vec<FuzzyCandidate>> {
        let mut found: Vec<FuzzyCandidate> = self
            .entries
            .keys()
            .map(|k| FuzzyCandidate {
                headword: k.clone(),
                edit_distance: levenshtein_distance(k, word),
            })
            .filter(|c| c.edit_distance <= gap)
            .collect();
        found.sort_by_key(|c| c.edit_distance);
        found.truncate(size);
        Ok(found)
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakeArchive {
    pub files: HashMap<String, Vec<u8>>,
}

impl ResourceArchive for FakeArchive {
    fn locate(&self, normalized_key: &str) -> Result<Option<LocatedResource>> {
        Ok(self.files.get(normalized_key).map(|data| LocatedResource {
            headword: normalized_key.to_string(),
            payload: BASE64.encode(data),
        }))
    }
}

/// Files keyed by path; unknown paths fail to open
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    pub dictionaries: HashMap<PathBuf, FakeDictionary>,
    pub archives: HashMap<PathBuf, FakeArchive>,
    /// Opening any of these panics
    pub panic_on_open: HashSet<PathBuf>,
    /// Every open blocks this long first
    pub open_delay: Duration,
}

impl MemoryBackend {
    pub fn with_dictionary(mut self, path: impl Into<PathBuf>, dict: FakeDictionary) -> Self {
        self.dictionaries.insert(path.into(), dict);
        self
    }

    pub fn with_archive(mut self, path: impl Into<PathBuf>, files: &[(&str, &[u8])]) -> Self {
        let archive = FakeArchive {
            files: files
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_vec()))
                .collect(),
        };
        self.archives.insert(path.into(), archive);
        self
    }

    pub fn with_panic_on_open(mut self, path: impl Into<PathBuf>) -> Self {
        self.panic_on_open.insert(path.into());
        self
    }

    pub fn with_open_delay(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    fn before_open(&self, path: &Path) {
        std::thread::sleep(self.open_delay);
        if self.panic_on_open.contains(path) {
            panic!("parser crashed on {}", path.display());
        }
    }
}

fn missing(path: &Path) -> MdictError {
    MdictError::Io(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        format!("{} does not exist", path.display()),
    ))
}

impl DictionaryBackend for MemoryBackend {
    fn open_dictionary(&self, path: &Path) -> Result<Box<dyn DictionaryReader>> {
        self.before_open(path);
        let dict = self.dictionaries.get(path).ok_or_else(|| missing(path))?;
        Ok(Box::new(dict.clone()))
    }

    fn open_archive(&self, path: &Path) -> Result<Box<dyn ResourceArchive>> {
        self.before_open(path);
        let archive = self.archives.get(path).ok_or_else(|| missing(path))?;
        Ok(Box::new(archive.clone()))
    }
}
