//! Dictionary reader collaborator
//!
//! The engine never touches file formats directly. It opens primary
//! dictionaries and auxiliary archives through [`DictionaryBackend`] and
//! queries them through [`DictionaryReader`] and [`ResourceArchive`].
//! [`MdictBackend`] is the MDX/MDD implementation.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::error::{MdictError, Result};
use crate::mdd::Mdd;
use crate::mdx::Mdx;

/// A matched dictionary entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub headword: String,
    pub content: String,
}

/// A fuzzy candidate as reported by one reader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuzzyCandidate {
    pub headword: String,
    pub edit_distance: usize,
}

/// A resource found inside an archive, payload base64 encoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedResource {
    pub headword: String,
    pub payload: String,
}

/// Query side of an opened primary dictionary
pub trait DictionaryReader: Send + Sync {
    /// Title stored in the dictionary itself
    fn title(&self) -> Option<String> {
        None
    }

    fn lookup(&self, word: &str) -> Result<Option<Entry>>;

    fn prefix(&self, prefix: &str) -> Result<Vec<String>>;

    fn associate(&self, phrase: &str) -> Result<Vec<String>>;

    fn suggest(&self, phrase: &str, distance: usize) -> Result<Vec<String>>;

    fn fuzzy_search(&self, word: &str, size: usize, gap: usize) -> Result<Vec<FuzzyCandidate>>;
}

/// Lookup side of an opened auxiliary archive
pub trait ResourceArchive: Send + Sync {
    fn locate(&self, normalized_key: &str) -> Result<Option<LocatedResource>>;
}

/// Opens readers and archives from paths
pub trait DictionaryBackend: Send + Sync {
    fn open_dictionary(&self, path: &Path) -> Result<Box<dyn DictionaryReader>>;

    fn open_archive(&self, path: &Path) -> Result<Box<dyn ResourceArchive>>;
}

/// MDX/MDD backend
#[derive(Debug, Default, Clone, Copy)]
pub struct MdictBackend;

impl DictionaryBackend for MdictBackend {
    fn open_dictionary(&self, path: &Path) -> Result<Box<dyn DictionaryReader>> {
        Ok(Box::new(MdxReader {
            inner: Mutex::new(Mdx::new(path)?),
        }))
    }

    fn open_archive(&self, path: &Path) -> Result<Box<dyn ResourceArchive>> {
        Ok(Box::new(MddArchive {
            inner: Mutex::new(Mdd::new(path)?),
        }))
    }
}

// The parsers seek a shared file handle, so each one sits behind a mutex.
fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex.lock().map_err(|_| MdictError::Poisoned)
}

struct MdxReader {
    inner: Mutex<Mdx>,
}

impl DictionaryReader for MdxReader {
    fn title(&self) -> Option<String> {
        lock(&self.inner).ok()?.title().map(str::to_string)
    }

    fn lookup(&self, word: &str) -> Result<Option<Entry>> {
        Ok(lock(&self.inner)?.lookup(word)?.map(|r| Entry {
            headword: r.key_text,
            content: r.definition,
        }))
    }

    fn prefix(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(lock(&self.inner)?.prefix_keys(prefix))
    }

    fn associate(&self, phrase: &str) -> Result<Vec<String>> {
        Ok(lock(&self.inner)?
            .associate(phrase)
            .into_iter()
            .map(|k| k.key_text.clone())
            .collect())
    }

    fn suggest(&self, phrase: &str, distance: usize) -> Result<Vec<String>> {
        Ok(lock(&self.inner)?.suggest(phrase, distance))
    }

    fn fuzzy_search(&self, word: &str, size: usize, gap: usize) -> Result<Vec<FuzzyCandidate>> {
        Ok(lock(&self.inner)?
            .fuzzy_search(word, size, gap)
            .into_iter()
            .map(|fw| FuzzyCandidate {
                headword: fw.item.key_text,
                edit_distance: fw.edit_distance,
            })
            .collect())
    }
}

struct MddArchive {
    inner: Mutex<Mdd>,
}

impl ResourceArchive for MddArchive {
    fn locate(&self, normalized_key: &str) -> Result<Option<LocatedResource>> {
        Ok(lock(&self.inner)?
            .locate(normalized_key)?
            .map(|r| LocatedResource {
                headword: r.key_text,
                payload: r.definition,
            }))
    }
}
