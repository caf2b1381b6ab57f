//! MDD resource file implementation
//!
//! MDD files store binary resources like images, audio files, CSS, etc.
//! Keys use backslash-separated paths such as `\img\logo.png`.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use std::path::Path;

use crate::error::Result;
use crate::mdict_base::MdictBase;
use crate::types::*;

/// MDD resource file parser
pub struct Mdd {
    base: MdictBase,
}

impl Mdd {
    /// Create a new MDD parser from file path
    pub fn new<P: AsRef<Path>>(filepath: P) -> Result<Self> {
        let base = MdictBase::new(filepath, FileExt::Mdd)?;
        Ok(Mdd { base })
    }

    pub fn header(&self) -> &DictHeader {
        &self.base.header
    }

    pub fn meta(&self) -> &DictMeta {
        &self.base.meta
    }

    pub fn resource_count(&self) -> usize {
        self.base.keyword_list.len()
    }

    pub fn resource_keys(&self) -> Vec<&str> {
        self.base
            .keyword_list
            .iter()
            .map(|k| k.key_text.as_str())
            .collect()
    }

    /// Locate a resource and return its data as base64
    pub fn locate(&mut self, resource_key: &str) -> Result<Option<LookupResult>> {
        Ok(self.locate_raw(resource_key)?.map(|(key_text, data)| LookupResult {
            key_text,
            definition: BASE64.encode(&data),
        }))
    }

    /// Locate a resource and return its stored key and raw bytes
    pub fn locate_raw(&mut self, resource_key: &str) -> Result<Option<(String, Vec<u8>)>> {
        let Some(item) = self.base.lookup_keyword_by_word(resource_key, false).cloned() else {
            return Ok(None);
        };
        let data = self.base.lookup_record_by_keyword(&item)?;
        Ok(Some((item.key_text, data)))
    }

    /// Find resource keys with the given prefix (keys only, no data)
    pub fn prefix_keys(&self, prefix: &str) -> Vec<String> {
        self.base
            .get_prefix_keywords(prefix)
            .into_iter()
            .map(|k| k.key_text.clone())
            .collect()
    }

    pub fn contains(&self, resource_key: &str) -> bool {
        self.base
            .lookup_keyword_by_word(resource_key, false)
            .is_some()
    }

    pub fn filepath(&self) -> &str {
        &self.base.filepath
    }
}
