//! Audio transcoding collaborator
//!
//! Some dictionaries ship pronunciations as Ogg Speex, which nothing plays
//! natively. A [`Transcoder`] turns such a payload into WAV.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::TranscodeError;

/// Stateless single-buffer converter.
///
/// Dropping the returned future abandons the conversion.
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn convert(&self, input: Vec<u8>) -> Result<Vec<u8>, TranscodeError>;
}

/// Pipes the payload through an external program, stdin to stdout
#[derive(Debug, Clone)]
pub struct ExternalTranscoder {
    program: String,
    args: Vec<String>,
}

impl ExternalTranscoder {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// `ffmpeg` (or a compatible program) emitting WAV on stdout
    pub fn ffmpeg(program: impl Into<String>) -> Self {
        let args = ["-hide_banner", "-loglevel", "error", "-i", "pipe:0", "-f", "wav", "pipe:1"];
        Self::new(program, args.iter().map(|a| a.to_string()).collect())
    }
}

#[async_trait]
impl Transcoder for ExternalTranscoder {
    async fn convert(&self, input: Vec<u8>) -> Result<Vec<u8>, TranscodeError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| TranscodeError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        // Feed stdin concurrently so a full stdout pipe cannot stall the child
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| TranscodeError::InvalidInput("transcoder stdin unavailable".into()))?;
        let writer = tokio::spawn(async move {
            let written = stdin.write_all(&input).await;
            drop(stdin);
            written
        });

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| TranscodeError::InvalidInput(e.to_string()))?;
        // A broken pipe just means the program stopped reading early
        if let Ok(Err(e)) = writer.await {
            tracing::debug!(program = %self.program, error = %e, "transcoder closed stdin early");
        }

        if !output.status.success() {
            return Err(TranscodeError::InvalidInput(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        if output.stdout.is_empty() {
            return Err(TranscodeError::InvalidInput(format!(
                "{} produced no output",
                self.program
            )));
        }
        Ok(output.stdout)
    }
}
