//! Embedded resource resolution
//!
//! Entries reference images, sounds and fonts stored in the dictionary's
//! auxiliary archives. [`ResourceResolver`] finds the first archive holding a
//! key and hands back its payload with a MIME type, transcoding audio formats
//! that browsers cannot play.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use thiserror::Error;

use crate::backend::LocatedResource;
use crate::error::TranscodeError;
use crate::model::Resource;
use crate::registry::{LoadedDictionary, Registry};
use crate::transcode::Transcoder;

const SCHEMES: [&str; 3] = ["sound://", "file://", "mdd://"];

/// Extensions converted before being returned
const TRANSCODED_EXTENSIONS: [&str; 1] = ["spx"];

pub const TRANSCODED_MIME_TYPE: &str = "audio/wav";

/// A resource was found but could not be turned into a playable payload
#[derive(Error, Debug)]
pub enum ResourceError {
    #[error("payload of {key} is not valid base64: {source}")]
    CorruptPayload {
        key: String,
        #[source]
        source: base64::DecodeError,
    },

    #[error("failed to transcode {key}: {source}")]
    Transcoding {
        key: String,
        #[source]
        source: TranscodeError,
    },
}

/// Convert a link target such as `sound://audio/a.spx` to the archive key
/// convention `\audio\a.spx`
pub fn normalize_key(key: &str) -> String {
    let mut rest = key.trim();
    for scheme in SCHEMES {
        let matches = rest
            .get(..scheme.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(scheme));
        if matches {
            rest = &rest[scheme.len()..];
            break;
        }
    }
    let path = rest.replace('/', "\\");
    format!("\\{}", path.trim_start_matches('\\'))
}

fn extension_of(name: &str) -> String {
    match name.rsplit_once('.') {
        Some((_, ext)) if !ext.contains('\\') => ext.to_ascii_lowercase(),
        _ => String::new(),
    }
}

/// MIME type for a lower-case file extension
pub fn mime_type_for(extension: &str) -> &'static str {
    match extension {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        "spx" => "audio/speex",
        "css" => "text/css",
        "js" => "application/javascript",
        "html" | "htm" => "text/html",
        "ttf" => "font/ttf",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "eot" => "application/vnd.ms-fontobject",
        _ => "application/octet-stream",
    }
}

/// First non-empty match across the dictionary's archives, in bundle order
fn search_archives(dict: &LoadedDictionary, key: &str) -> Option<LocatedResource> {
    for opened in &dict.archives {
        let found = std::panic::catch_unwind(AssertUnwindSafe(|| opened.archive.locate(key)));
        match found {
            Ok(Ok(Some(located))) if !located.payload.is_empty() => return Some(located),
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                tracing::warn!(
                    archive = %opened.path.display(),
                    key,
                    error = %e,
                    "archive lookup failed"
                );
            }
            Err(_) => {
                tracing::warn!(archive = %opened.path.display(), key, "archive lookup panicked");
            }
        }
    }
    None
}

#[derive(Clone)]
pub struct ResourceResolver {
    transcoder: Arc<dyn Transcoder>,
    /// A conversion still running after this is abandoned
    transcode_timeout: Duration,
}

impl ResourceResolver {
    pub fn new(transcoder: Arc<dyn Transcoder>, transcode_timeout: Duration) -> Self {
        Self {
            transcoder,
            transcode_timeout,
        }
    }

    /// Resolve `key` inside dictionary `dictionary_id`.
    ///
    /// `Ok(None)` means not found, including an unknown dictionary id. Only a
    /// resource that exists but cannot be converted is an error.
    pub async fn resolve(
        &self,
        registry: &Registry,
        key: &str,
        dictionary_id: &str,
    ) -> Result<Option<Resource>, ResourceError> {
        let Some(dict) = registry.get(dictionary_id).cloned() else {
            tracing::warn!(
                dictionary = dictionary_id,
                key,
                "resource requested from unknown dictionary"
            );
            return Ok(None);
        };

        let normalized = normalize_key(key);
        let search_key = normalized.clone();
        let search = tokio::task::spawn_blocking(move || search_archives(&dict, &search_key));
        let located = match search.await {
            Ok(located) => located,
            Err(e) => {
                tracing::warn!(
                    dictionary = dictionary_id,
                    key,
                    error = %e,
                    "resource search aborted"
                );
                None
            }
        };
        let Some(located) = located else {
            tracing::debug!(dictionary = dictionary_id, key = %normalized, "resource not found");
            return Ok(None);
        };

        let mut extension = extension_of(&located.headword);
        if extension.is_empty() {
            extension = extension_of(&normalized);
        }

        if !TRANSCODED_EXTENSIONS.contains(&extension.as_str()) {
            return Ok(Some(Resource {
                data: located.payload,
                mime_type: mime_type_for(&extension).to_string(),
            }));
        }

        let raw = BASE64
            .decode(located.payload.as_bytes())
            .map_err(|source| ResourceError::CorruptPayload {
                key: located.headword.clone(),
                source,
            })?;
        let converted = tokio::time::timeout(self.transcode_timeout, self.transcoder.convert(raw))
            .await
            .unwrap_or(Err(TranscodeError::TimedOut(self.transcode_timeout)))
            .map_err(|source| ResourceError::Transcoding {
                key: located.headword.clone(),
                source,
            })?;

        tracing::debug!(key = %located.headword, bytes = converted.len(), "resource transcoded");
        Ok(Some(Resource {
            data: BASE64.encode(converted),
            mime_type: TRANSCODED_MIME_TYPE.to_string(),
        }))
    }
}
