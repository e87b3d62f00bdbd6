//! Speech-to-text providers.
//!
//! An [`SttSession`] is the stream contract of the transcription
//! engine: PCM bytes go in, ordered [`TranscriptFragment`]s come out,
//! and a flush marks an utterance boundary. The whisper backend is a
//! whisper.cpp subprocess transcribing one utterance per flush; the
//! mock backend replays a scripted fragment per audio write and is the
//! engine used by tests and credential-less sessions.

use crate::error::PipelineError;
use parley_types::{SttConfig, TranscriptFragment};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Maximum buffered audio per utterance (10 MiB). Prevents OOM from a
/// peer that never goes silent.
const MAX_UTTERANCE_BYTES: usize = 10 * 1024 * 1024;

/// Timeout for one whisper.cpp invocation.
const STT_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone)]
enum SttBackend {
    Whisper {
        binary_path: PathBuf,
        model_path: PathBuf,
    },
    Mock {
        script: Vec<TranscriptFragment>,
    },
}

/// Factory for per-session transcription streams.
#[derive(Debug, Clone)]
pub struct SttService {
    backend: SttBackend,
}

enum SttInput {
    Pcm(Vec<u8>),
    Flush,
}

/// One live transcription stream.
///
/// Dropping the session (or the session's audio sender) detaches the
/// engine and ends the fragment stream.
pub struct SttSession {
    audio_tx: mpsc::Sender<SttInput>,
    /// Ordered transcription results.
    pub fragments: mpsc::Receiver<TranscriptFragment>,
}

impl SttSession {
    /// Feeds PCM into the engine. A closed engine is not an error here;
    /// it surfaces as the end of the fragment stream.
    pub async fn write(&self, pcm: Vec<u8>) {
        if self.audio_tx.send(SttInput::Pcm(pcm)).await.is_err() {
            debug!("STT engine gone, dropping audio chunk");
        }
    }

    /// Marks an utterance boundary (detected end of speech).
    pub async fn flush(&self) {
        let _ = self.audio_tx.send(SttInput::Flush).await;
    }
}

impl SttService {
    pub fn whisper(binary_path: impl Into<PathBuf>, model_path: impl Into<PathBuf>) -> Self {
        Self {
            backend: SttBackend::Whisper {
                binary_path: binary_path.into(),
                model_path: model_path.into(),
            },
        }
    }

    /// A scripted mock: each audio write emits the next fragment of the
    /// script, in order. Flushes are acknowledged but emit nothing.
    pub fn mock(script: Vec<TranscriptFragment>) -> Self {
        Self {
            backend: SttBackend::Mock { script },
        }
    }

    /// Starts a transcription stream for one session.
    pub fn start(&self, config: &SttConfig) -> SttSession {
        let (audio_tx, audio_rx) = mpsc::channel(64);
        let (frag_tx, fragments) = mpsc::channel(64);

        match self.backend.clone() {
            SttBackend::Whisper {
                binary_path,
                model_path,
            } => {
                let language = config.language.clone();
                tokio::spawn(whisper_worker(
                    audio_rx, frag_tx, binary_path, model_path, language,
                ));
            }
            SttBackend::Mock { script } => {
                tokio::spawn(mock_worker(audio_rx, frag_tx, script));
            }
        }

        SttSession {
            audio_tx,
            fragments,
        }
    }
}

async fn mock_worker(
    mut audio_rx: mpsc::Receiver<SttInput>,
    frag_tx: mpsc::Sender<TranscriptFragment>,
    script: Vec<TranscriptFragment>,
) {
    let mut script = script.into_iter();
    while let Some(input) = audio_rx.recv().await {
        if let SttInput::Pcm(_) = input {
            if let Some(fragment) = script.next() {
                if frag_tx.send(fragment).await.is_err() {
                    return;
                }
            }
        }
    }
}

/// Buffers one utterance of PCM, then transcribes it with whisper.cpp
/// on each flush. Emits a single final fragment per utterance.
async fn whisper_worker(
    mut audio_rx: mpsc::Receiver<SttInput>,
    frag_tx: mpsc::Sender<TranscriptFragment>,
    binary_path: PathBuf,
    model_path: PathBuf,
    language: String,
) {
    let mut buffer: Vec<u8> = Vec::new();
    while let Some(input) = audio_rx.recv().await {
        match input {
            SttInput::Pcm(pcm) => {
                if buffer.len() + pcm.len() > MAX_UTTERANCE_BYTES {
                    warn!(
                        buffered = buffer.len(),
                        "utterance exceeds buffer limit, dropping oldest audio"
                    );
                    buffer.clear();
                }
                buffer.extend_from_slice(&pcm);
            }
            SttInput::Flush => {
                if buffer.is_empty() {
                    continue;
                }
                let audio = std::mem::take(&mut buffer);
                match transcribe(&binary_path, &model_path, &language, &audio).await {
                    Ok(text) if !text.is_empty() => {
                        if frag_tx.send(TranscriptFragment::fin(text)).await.is_err() {
                            return;
                        }
                    }
                    Ok(_) => debug!("whisper produced empty transcript"),
                    Err(e) => warn!("transcription failed: {}", e),
                }
            }
        }
    }
}

/// Runs one whisper.cpp invocation over a buffered utterance.
///
/// Standard whisper.cpp arguments: `-m <model>` for the GGML model,
/// `-f -` to read audio from stdin, `-l <lang>`, `-nt` to suppress
/// timestamps so stdout is the plain transcription.
async fn transcribe(
    binary_path: &PathBuf,
    model_path: &PathBuf,
    language: &str,
    audio: &[u8],
) -> Result<String, PipelineError> {
    let mut command = Command::new(binary_path);
    command
        .arg("-m")
        .arg(model_path)
        .arg("-f")
        .arg("-")
        .arg("-l")
        .arg(language)
        .arg("-nt")
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true);

    let mut child = command
        .spawn()
        .map_err(|e| PipelineError::Stt(format!("failed to spawn STT binary: {}", e)))?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| PipelineError::Stt("failed to open stdin".to_string()))?;

    stdin
        .write_all(audio)
        .await
        .map_err(|e| PipelineError::Stt(format!("failed to write to stdin: {}", e)))?;
    drop(stdin); // EOF signals end of utterance

    let output = tokio::time::timeout(STT_TIMEOUT, child.wait_with_output())
        .await
        .map_err(|_| {
            PipelineError::Stt(format!(
                "STT process timed out after {} seconds",
                STT_TIMEOUT.as_secs()
            ))
        })?
        .map_err(|e| PipelineError::Stt(format!("failed to read stdout: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(PipelineError::Stt(format!("STT binary failed: {}", stderr)));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_emits_one_scripted_fragment_per_write() {
        let service = SttService::mock(vec![
            TranscriptFragment::interim("Hel"),
            TranscriptFragment::fin("Hello"),
        ]);
        let mut session = service.start(&SttConfig::default());

        session.write(vec![0u8; 320]).await;
        assert_eq!(
            session.fragments.recv().await.unwrap(),
            TranscriptFragment::interim("Hel")
        );

        session.write(vec![0u8; 320]).await;
        assert_eq!(
            session.fragments.recv().await.unwrap(),
            TranscriptFragment::fin("Hello")
        );

        // Script exhausted: further writes emit nothing, flush is a no-op.
        session.write(vec![0u8; 320]).await;
        session.flush().await;
        drop(session.audio_tx);
        assert!(session.fragments.recv().await.is_none());
    }

    #[tokio::test]
    async fn whisper_spawn_failure_ends_fragment_stream() {
        let service = SttService::whisper("/nonexistent/whisper", "/nonexistent/model.bin");
        let mut session = service.start(&SttConfig::default());
        session.write(vec![1u8; 640]).await;
        session.flush().await;
        drop(session.audio_tx);
        // The worker logs the spawn failure and ends without fragments.
        assert!(session.fragments.recv().await.is_none());
    }
}
