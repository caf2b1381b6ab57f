//! MDX dictionary implementation
//!
//! This module provides the MDX dictionary parsing and querying functionality.

use std::path::Path;

use crate::error::Result;
use crate::mdict_base::MdictBase;
use crate::types::*;
use crate::utils::{decode_entry, levenshtein_distance, strip_key};

/// Distances above this are never worth suggesting
const MAX_SUGGEST_DISTANCE: usize = 5;

/// MDX dictionary parser
pub struct Mdx {
    base: MdictBase,
}

impl Mdx {
    /// Create a new MDX parser from file path
    pub fn new<P: AsRef<Path>>(filepath: P) -> Result<Self> {
        let base = MdictBase::new(filepath, FileExt::Mdx)?;
        Ok(Mdx { base })
    }

    pub fn header(&self) -> &DictHeader {
        &self.base.header
    }

    pub fn meta(&self) -> &DictMeta {
        &self.base.meta
    }

    /// Dictionary title from the header, if present and not a placeholder
    pub fn title(&self) -> Option<&str> {
        self.base
            .header
            .get("Title")
            .map(|t| t.trim())
            .filter(|t| !t.is_empty() && !t.starts_with("Title ("))
    }

    pub fn keyword_count(&self) -> usize {
        self.base.keyword_list.len()
    }

    pub fn keywords(&self) -> Vec<&str> {
        self.base
            .keyword_list
            .iter()
            .map(|k| k.key_text.as_str())
            .collect()
    }

    /// Lookup a word and return its definition
    pub fn lookup(&mut self, word: &str) -> Result<Option<LookupResult>> {
        let Some(item) = self.base.lookup_keyword_by_word(word, false).cloned() else {
            return Ok(None);
        };
        self.fetch(&item).map(Some)
    }

    /// Find words with the given prefix (keys only, no definitions)
    pub fn prefix_keys(&self, prefix: &str) -> Vec<String> {
        self.base
            .get_prefix_keywords(prefix)
            .into_iter()
            .map(|k| k.key_text.clone())
            .collect()
    }

    /// Words stored in the same key block as the closest match
    pub fn associate(&self, word: &str) -> Vec<&KeyWordItem> {
        self.base.get_associated_keywords(word)
    }

    /// Suggest similar words based on edit distance
    pub fn suggest(&self, word: &str, max_distance: usize) -> Vec<String> {
        if max_distance > MAX_SUGGEST_DISTANCE {
            return Vec::new();
        }

        let mut suggestions = self.scored_associates(word, max_distance);
        suggestions.sort_by_key(|fw| fw.edit_distance);
        suggestions.into_iter().map(|fw| fw.item.key_text).collect()
    }

    /// Fuzzy search with edit distance
    pub fn fuzzy_search(
        &self,
        word: &str,
        max_results: usize,
        max_distance: usize,
    ) -> Vec<FuzzyWord> {
        let mut fuzzy_words = self.scored_associates(word, max_distance);
        fuzzy_words.sort_by_key(|fw| fw.edit_distance);
        fuzzy_words.truncate(max_results);
        fuzzy_words
    }

    fn scored_associates(&self, word: &str, max_distance: usize) -> Vec<FuzzyWord> {
        let stripped_word = strip_key(word, false);
        self.base
            .get_associated_keywords(word)
            .into_iter()
            .filter_map(|item| {
                let distance =
                    levenshtein_distance(&strip_key(&item.key_text, false), &stripped_word);
                (distance <= max_distance).then(|| FuzzyWord {
                    item: item.clone(),
                    edit_distance: distance,
                })
            })
            .collect()
    }

    /// Fetch definition for a keyword item
    pub fn fetch(&mut self, item: &KeyWordItem) -> Result<LookupResult> {
        let def_bytes = self.base.lookup_record_by_keyword(item)?;
        Ok(LookupResult {
            key_text: item.key_text.clone(),
            definition: decode_entry(&def_bytes, self.base.meta.encoding),
        })
    }

    pub fn contains(&self, word: &str) -> bool {
        self.base.lookup_keyword_by_word(word, false).is_some()
    }

    pub fn filepath(&self) -> &str {
        &self.base.filepath
    }
}
