//! Redirect resolution
//!
//! An entry whose content starts with [`REDIRECT_MARKER`] is an alias for
//! another head-word in the same dictionary. [`RedirectResolver`] follows such
//! chains to a terminal entry, bounded by a maximum depth and by cycle
//! detection.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::{DictionaryReader, Entry};
use crate::error::Result;

pub const REDIRECT_MARKER: &str = "@@@LINK=";

pub const MAX_REDIRECT_DEPTH: usize = 5;

/// Why a redirect chain was abandoned, with every word traversed
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RedirectFailure {
    #[error("redirect chain longer than {max}: {}", .chain.join(" -> "))]
    DepthExceeded { max: usize, chain: Vec<String> },

    #[error("redirect cycle: {}", .chain.join(" -> "))]
    CycleDetected { chain: Vec<String> },
}

/// Terminal state of one resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Content may be empty, which means not found
    Resolved { headword: String, content: String },
    Failed(RedirectFailure),
}

/// Target head-word of a redirect entry, without any `#anchor`
pub fn redirect_target(content: &str) -> Option<&str> {
    let rest = content.trim_start().strip_prefix(REDIRECT_MARKER)?;
    let target = rest.split('#').next().unwrap_or_default();
    Some(target.trim())
}

#[derive(Debug, Clone, Copy)]
pub struct RedirectResolver {
    max_depth: usize,
}

impl Default for RedirectResolver {
    fn default() -> Self {
        Self::new(MAX_REDIRECT_DEPTH)
    }
}

impl RedirectResolver {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    /// Follow redirects starting from the already fetched result for `word`.
    ///
    /// Reader errors along the chain are returned as `Err`; depth and cycle
    /// violations are a normal [`Resolution::Failed`].
    pub fn resolve(
        &self,
        reader: &dyn DictionaryReader,
        word: &str,
        first: Option<Entry>,
    ) -> Result<Resolution> {
        let mut word = word.to_string();
        let mut depth = 0usize;
        let mut history: Vec<String> = Vec::new();
        let mut current = first;

        loop {
            let (headword, content) = match current.take() {
                Some(entry) => (entry.headword, entry.content),
                None => (word.clone(), String::new()),
            };

            let target = match redirect_target(&content).map(str::to_string) {
                None => return Ok(Resolution::Resolved { headword, content }),
                Some(target) if target.is_empty() => {
                    return Ok(Resolution::Resolved {
                        headword,
                        content: String::new(),
                    })
                }
                Some(target) => target,
            };

            if depth + 1 > self.max_depth {
                history.extend([word, target]);
                return Ok(Resolution::Failed(RedirectFailure::DepthExceeded {
                    max: self.max_depth,
                    chain: history,
                }));
            }
            if target == word || history.contains(&target) {
                history.extend([word, target]);
                return Ok(Resolution::Failed(RedirectFailure::CycleDetected {
                    chain: history,
                }));
            }

            tracing::trace!(from = %word, to = %target, depth, "following redirect");
            history.push(std::mem::replace(&mut word, target));
            depth += 1;
            current = reader.lookup(&word)?;
        }
    }
}
