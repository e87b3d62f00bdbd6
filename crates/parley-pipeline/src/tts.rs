//! Text-to-speech providers.
//!
//! Synthesis returns a readable audio byte stream rather than a fully
//! buffered clip, so playback can start on the first chunk. The piper
//! and espeak backends stream a subprocess's stdout; the mock backend
//! produces deterministic PCM for tests and credential-less sessions.

use crate::error::PipelineError;
use parley_types::{AudioStream, TtsConfig};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::warn;

/// Maximum text input size (64 KiB). Prevents resource exhaustion from
/// oversized synthesis requests.
const MAX_TTS_INPUT_BYTES: usize = 64 * 1024;

/// Timeout for a synthesis subprocess to finish producing audio.
const TTS_TIMEOUT: Duration = Duration::from_secs(60);

/// Read size for streaming a subprocess's stdout.
const STDOUT_CHUNK_BYTES: usize = 4096;

/// espeak-ng writes a WAV container; the 44-byte header is stripped so
/// downstream sees raw PCM like every other backend.
const WAV_HEADER_BYTES: usize = 44;

#[derive(Debug, Clone)]
enum TtsBackend {
    Piper {
        binary_path: PathBuf,
        voices_dir: PathBuf,
    },
    Espeak,
    Mock {
        chunks: usize,
        chunk_bytes: usize,
    },
}

/// Synthesis-service client for one session.
#[derive(Debug, Clone)]
pub struct SynthesisService {
    backend: TtsBackend,
}

impl SynthesisService {
    /// Piper TTS: `<voices_dir>/<voice>.onnx` models, raw PCM output.
    pub fn piper(binary_path: impl AsRef<Path>, voices_dir: impl AsRef<Path>) -> Self {
        Self {
            backend: TtsBackend::Piper {
                binary_path: binary_path.as_ref().to_path_buf(),
                voices_dir: voices_dir.as_ref().to_path_buf(),
            },
        }
    }

    /// espeak-ng as the no-assets fallback engine.
    pub fn espeak() -> Self {
        Self {
            backend: TtsBackend::Espeak,
        }
    }

    /// Deterministic synthetic audio: `chunks` chunks of `chunk_bytes`
    /// zero samples.
    pub fn mock(chunks: usize, chunk_bytes: usize) -> Self {
        Self {
            backend: TtsBackend::Mock {
                chunks,
                chunk_bytes,
            },
        }
    }

    /// Synthesizes speech for `text`, returning the audio stream as
    /// soon as production starts.
    pub async fn synthesize(
        &self,
        text: &str,
        config: &TtsConfig,
    ) -> Result<AudioStream, PipelineError> {
        if text.len() > MAX_TTS_INPUT_BYTES {
            return Err(PipelineError::Tts(format!(
                "text exceeds maximum size: {} bytes (limit: {} bytes)",
                text.len(),
                MAX_TTS_INPUT_BYTES
            )));
        }

        match &self.backend {
            TtsBackend::Piper {
                binary_path,
                voices_dir,
            } => synthesize_piper(binary_path, voices_dir, text, config),
            TtsBackend::Espeak => synthesize_espeak(text, config),
            TtsBackend::Mock {
                chunks,
                chunk_bytes,
            } => Ok(synthesize_mock(*chunks, *chunk_bytes)),
        }
    }
}

fn synthesize_mock(chunks: usize, chunk_bytes: usize) -> AudioStream {
    let (tx, rx) = mpsc::channel(chunks.max(1));
    tokio::spawn(async move {
        for _ in 0..chunks {
            if tx.send(vec![0u8; chunk_bytes]).await.is_err() {
                return;
            }
        }
    });
    rx
}

fn synthesize_piper(
    binary_path: &Path,
    voices_dir: &Path,
    text: &str,
    config: &TtsConfig,
) -> Result<AudioStream, PipelineError> {
    let model_path = voices_dir.join(format!("{}.onnx", config.voice));
    if !model_path.exists() {
        return Err(PipelineError::Tts(format!(
            "voice model not found: {:?}",
            model_path
        )));
    }

    let mut command = Command::new(binary_path);
    command
        .arg("--model")
        .arg(model_path)
        .arg("--output_raw")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command
        .spawn()
        .map_err(|e| PipelineError::Tts(format!("failed to spawn piper: {}", e)))?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| PipelineError::Tts("failed to open stdin".to_string()))?;
    let text_owned = text.to_string();

    // Write text on a separate task to avoid deadlock if the output
    // buffer fills before stdin is drained.
    tokio::spawn(async move {
        if let Err(e) = stdin.write_all(text_owned.as_bytes()).await {
            warn!("failed to write to piper stdin: {}", e);
        }
    });

    Ok(stream_child_stdout(child, "piper", 0))
}

fn synthesize_espeak(text: &str, config: &TtsConfig) -> Result<AudioStream, PipelineError> {
    let mut command = Command::new("espeak-ng");
    command.arg("--stdout");
    if !config.voice.is_empty() && config.voice != "default" {
        command.arg("-v").arg(&config.voice);
    }
    command
        .arg(text)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = command
        .spawn()
        .map_err(|e| PipelineError::Tts(format!("failed to spawn espeak-ng: {}", e)))?;

    Ok(stream_child_stdout(child, "espeak-ng", WAV_HEADER_BYTES))
}

/// Streams a child's stdout to an audio channel in small chunks,
/// skipping `strip_prefix` leading bytes. The child is reaped (with a
/// bounded wait) after EOF; nonzero exits are logged with stderr.
fn stream_child_stdout(
    mut child: tokio::process::Child,
    engine: &'static str,
    strip_prefix: usize,
) -> AudioStream {
    let (tx, rx) = mpsc::channel(32);
    tokio::spawn(async move {
        let Some(mut stdout) = child.stdout.take() else {
            warn!(engine, "child has no stdout");
            return;
        };
        let mut remaining_strip = strip_prefix;
        let mut buf = vec![0u8; STDOUT_CHUNK_BYTES];
        loop {
            match stdout.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    let skip = remaining_strip.min(n);
                    remaining_strip -= skip;
                    if skip == n {
                        continue;
                    }
                    if tx.send(buf[skip..n].to_vec()).await.is_err() {
                        // Consumer gone; kill_on_drop reaps the child.
                        return;
                    }
                }
                Err(e) => {
                    warn!(engine, "error reading synthesized audio: {}", e);
                    break;
                }
            }
        }
        match tokio::time::timeout(TTS_TIMEOUT, child.wait()).await {
            Ok(Ok(status)) if !status.success() => {
                warn!(engine, %status, "synthesis process exited with failure");
            }
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(engine, "failed to reap synthesis process: {}", e),
            Err(_) => warn!(engine, "synthesis process did not exit, killing"),
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_streams_requested_chunks() {
        let service = SynthesisService::mock(3, 1920);
        let mut stream = service
            .synthesize("hello there", &TtsConfig::default())
            .await
            .unwrap();
        let mut total = 0;
        let mut chunks = 0;
        while let Some(chunk) = stream.recv().await {
            total += chunk.len();
            chunks += 1;
        }
        assert_eq!(chunks, 3);
        assert_eq!(total, 3 * 1920);
    }

    #[tokio::test]
    async fn oversized_text_is_rejected_without_spawning() {
        let service = SynthesisService::mock(1, 16);
        let text = "a".repeat(MAX_TTS_INPUT_BYTES + 1);
        let err = service
            .synthesize(&text, &TtsConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Tts(_)));
    }

    #[tokio::test]
    async fn missing_piper_voice_is_a_tts_error() {
        let dir = tempfile::tempdir().unwrap();
        let service = SynthesisService::piper("/usr/bin/true", dir.path());
        let err = service
            .synthesize("hi", &TtsConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Tts(_)));
    }
}
