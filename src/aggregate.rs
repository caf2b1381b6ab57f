//! Multi-dictionary query fan-out
//!
//! Every query runs against all loaded instances concurrently. A failing or
//! panicking instance contributes nothing; the merge order is always the
//! registry's load order, whatever order the instances finish in.

use std::collections::{BTreeSet, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use tokio::task::JoinSet;

use crate::error::{MdictError, Result};
use crate::model::{EntryContent, FuzzyMatch, LookupRecord, WordMatch};
use crate::redirect::{RedirectResolver, Resolution};
use crate::registry::{LoadedDictionary, Registry};

#[derive(Debug, Clone, Copy, Default)]
pub struct QueryAggregator {
    resolver: RedirectResolver,
}

fn guarded<T>(
    dict: &LoadedDictionary,
    f: impl FnOnce(&LoadedDictionary) -> Result<T>,
) -> Result<T> {
    std::panic::catch_unwind(AssertUnwindSafe(|| f(dict))).unwrap_or_else(|_| {
        Err(MdictError::InvalidFormat(format!(
            "reader for {} panicked",
            dict.id
        )))
    })
}

/// Run `f` on every instance, returning successful results in load order
async fn fan_out<T, F>(
    registry: &Registry,
    operation: &'static str,
    f: F,
) -> Vec<(Arc<LoadedDictionary>, T)>
where
    T: Send + 'static,
    F: Fn(&LoadedDictionary) -> Result<T> + Send + Sync + 'static,
{
    let f = Arc::new(f);
    let instances = registry.instances();
    let mut tasks = JoinSet::new();

    for (idx, dict) in instances.iter().enumerate() {
        let dict = Arc::clone(dict);
        let f = Arc::clone(&f);
        tasks.spawn_blocking(move || {
            let out = guarded(&dict, |d| (*f)(d));
            (idx, out)
        });
    }

    let mut slots: Vec<Option<T>> = instances.iter().map(|_| None).collect();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((idx, Ok(value))) => slots[idx] = Some(value),
            Ok((idx, Err(e))) => {
                tracing::warn!(
                    dictionary = %instances[idx].id,
                    operation,
                    error = %e,
                    "dictionary query failed"
                );
            }
            Err(e) => tracing::warn!(operation, error = %e, "dictionary query task aborted"),
        }
    }

    instances
        .iter()
        .cloned()
        .zip(slots)
        .filter_map(|(dict, slot)| slot.map(|value| (dict, value)))
        .collect()
}

fn into_record(
    dict: &LoadedDictionary,
    word: &str,
    resolution: Resolution,
) -> Option<LookupRecord> {
    let (headword, content) = match resolution {
        Resolution::Resolved { content, .. } if content.trim().is_empty() => return None,
        Resolution::Resolved { headword, content } => (headword, EntryContent::Definition(content)),
        Resolution::Failed(failure) => {
            tracing::info!(dictionary = %dict.id, word, %failure, "redirect not resolved");
            (word.to_string(), EntryContent::RedirectFailed(failure))
        }
    };
    Some(LookupRecord {
        dictionary_id: dict.id.clone(),
        dictionary_name: dict.name.clone(),
        headword,
        content,
    })
}

impl QueryAggregator {
    pub fn new(resolver: RedirectResolver) -> Self {
        Self { resolver }
    }

    fn resolve_in(&self, dict: &LoadedDictionary, word: &str) -> Result<Resolution> {
        let first = dict.reader.lookup(word)?;
        self.resolver.resolve(dict.reader.as_ref(), word, first)
    }

    /// One record per dictionary with a non-empty definition
    pub async fn lookup(&self, registry: &Registry, word: &str) -> Vec<LookupRecord> {
        let this = *self;
        let query = word.to_string();
        fan_out(registry, "lookup", move |dict| this.resolve_in(dict, &query))
            .await
            .into_iter()
            .filter_map(|(dict, resolution)| into_record(&dict, word, resolution))
            .collect()
    }

    /// Like [`lookup`](Self::lookup), restricted to the dictionary `id`
    pub async fn lookup_in_dict(
        &self,
        registry: &Registry,
        word: &str,
        id: &str,
    ) -> Option<LookupRecord> {
        let Some(dict) = registry.get(id).cloned() else {
            tracing::warn!(dictionary = id, "lookup in unknown dictionary");
            return None;
        };

        let this = *self;
        let query = word.to_string();
        let task_dict = Arc::clone(&dict);
        let joined =
            tokio::task::spawn_blocking(move || guarded(&task_dict, |d| this.resolve_in(d, &query)))
                .await;

        match joined {
            Ok(Ok(resolution)) => into_record(&dict, word, resolution),
            Ok(Err(e)) => {
                tracing::warn!(dictionary = id, error = %e, "dictionary query failed");
                None
            }
            Err(e) => {
                tracing::warn!(dictionary = id, error = %e, "dictionary query task aborted");
                None
            }
        }
    }

    /// Sorted, de-duplicated head-words starting with `prefix`
    pub async fn prefix(
        &self,
        registry: &Registry,
        prefix: &str,
        max_per_dict: usize,
    ) -> Vec<String> {
        let query = prefix.to_string();
        let words: BTreeSet<String> = fan_out(registry, "prefix", move |dict| {
            let mut words = dict.reader.prefix(&query)?;
            words.truncate(max_per_dict);
            Ok(words)
        })
        .await
        .into_iter()
        .flat_map(|(_, words)| words)
        .collect();
        words.into_iter().collect()
    }

    /// Associated head-words from every dictionary, duplicates kept
    pub async fn associate(
        &self,
        registry: &Registry,
        phrase: &str,
        max_per_dict: usize,
    ) -> Vec<WordMatch> {
        let query = phrase.to_string();
        fan_out(registry, "associate", move |dict| {
            let mut words = dict.reader.associate(&query)?;
            words.truncate(max_per_dict);
            Ok(words)
        })
        .await
        .into_iter()
        .flat_map(|(dict, words)| {
            words.into_iter().map(move |headword| WordMatch {
                dictionary_id: dict.id.clone(),
                headword,
            })
        })
        .collect()
    }

    /// Spelling suggestions, first occurrence of each head-word wins
    pub async fn suggest(
        &self,
        registry: &Registry,
        phrase: &str,
        distance: usize,
        max_total: usize,
    ) -> Vec<String> {
        let query = phrase.to_string();
        let mut seen = HashSet::new();
        fan_out(registry, "suggest", move |dict| dict.reader.suggest(&query, distance))
            .await
            .into_iter()
            .flat_map(|(_, words)| words)
            .filter(|word| seen.insert(word.clone()))
            .take(max_total)
            .collect()
    }

    /// Fuzzy matches from every dictionary, duplicates kept
    pub async fn fuzzy_search(
        &self,
        registry: &Registry,
        word: &str,
        size: usize,
        gap: usize,
    ) -> Vec<FuzzyMatch> {
        let query = word.to_string();
        fan_out(registry, "fuzzy_search", move |dict| dict.reader.fuzzy_search(&query, size, gap))
            .await
            .into_iter()
            .flat_map(|(dict, candidates)| {
                candidates.into_iter().map(move |c| FuzzyMatch {
                    dictionary_id: dict.id.clone(),
                    headword: c.headword,
                    edit_distance: c.edit_distance,
                })
            })
            .collect()
    }
}
