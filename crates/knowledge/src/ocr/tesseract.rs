//! OCR through the `tesseract` command line tool.

use super::{OcrEngine, OcrProfile};
use crate::config::OcrConfig;
use crate::error::{KnowledgeError, KnowledgeResult};
use std::io::{Read, Write};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Pipes the image to `tesseract stdin stdout` and reads plain text back.
#[derive(Debug, Clone)]
pub struct TesseractEngine {
    command: String,
    language: String,
    timeout: Duration,
}

impl TesseractEngine {
    pub fn new(command: impl Into<String>, language: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            language: language.into(),
            timeout,
        }
    }

    pub fn from_config(config: &OcrConfig) -> Self {
        Self::new(
            config.command.clone(),
            config.language.clone(),
            Duration::from_secs(config.timeout_secs),
        )
    }

    fn args(&self, profile: OcrProfile) -> Vec<String> {
        vec![
            "stdin".to_string(),
            "stdout".to_string(),
            "--oem".to_string(),
            "3".to_string(),
            "--psm".to_string(),
            profile.page_segmentation_mode().to_string(),
            "-l".to_string(),
            self.language.clone(),
        ]
    }
}

impl OcrEngine for TesseractEngine {
    fn name(&self) -> &str {
        "tesseract"
    }

    fn recognize(&self, image: &[u8], profile: OcrProfile) -> KnowledgeResult<String> {
        let mut child = Command::new(&self.command)
            .args(self.args(profile))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                KnowledgeError::Ocr(format!("Failed to start '{}': {}", self.command, e))
            })?;

        // Feed stdin and drain stdout and stderr on their own threads so no pipe can fill up
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| KnowledgeError::Ocr("tesseract stdin unavailable".to_string()))?;
        let image = image.to_vec();
        let writer = thread::spawn(move || stdin.write_all(&image));

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| KnowledgeError::Ocr("tesseract stdout unavailable".to_string()))?;
        let reader = thread::spawn(move || {
            let mut buf = Vec::new();
            stdout.read_to_end(&mut buf).map(|_| buf)
        });

        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| KnowledgeError::Ocr("tesseract stderr unavailable".to_string()))?;
        let diagnostics = thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = stderr.read_to_end(&mut buf);
            String::from_utf8_lossy(&buf).into_owned()
        });

        let started = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if started.elapsed() >= self.timeout {
                let _ = child.kill();
                let _ = child.wait();
                return Err(KnowledgeError::Ocr(format!(
                    "tesseract timed out after {}s (psm {})",
                    self.timeout.as_secs(),
                    profile.page_segmentation_mode()
                )));
            }
            thread::sleep(POLL_INTERVAL);
        };

        // A broken pipe here just means tesseract rejected the image early
        let _ = writer.join();

        let output = reader
            .join()
            .map_err(|_| KnowledgeError::Ocr("tesseract output reader panicked".to_string()))??;

        let stderr = diagnostics.join().unwrap_or_default();

        if !status.success() {
            return Err(KnowledgeError::Ocr(format!(
                "tesseract exited with {}: {}",
                status,
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_carry_profile_and_language() {
        let engine = TesseractEngine::new("tesseract", "deu", Duration::from_secs(5));
        let args = engine.args(OcrProfile::SparseText);
        assert_eq!(
            args,
            vec!["stdin", "stdout", "--oem", "3", "--psm", "11", "-l", "deu"]
        );
    }

    #[test]
    fn test_missing_binary_is_ocr_error() {
        let engine = TesseractEngine::new(
            "docsage-no-such-tesseract-binary",
            "eng",
            Duration::from_secs(1),
        );
        let err = engine
            .recognize(b"not an image", OcrProfile::Default)
            .unwrap_err();
        assert!(matches!(err, KnowledgeError::Ocr(_)));
    }

    /// A stand-in `tesseract` that floods stderr before answering.
    #[cfg(unix)]
    fn noisy_tesseract(dir: &std::path::Path, exit_code: i32) -> String {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("tesseract");
        let script = format!(
            "#!/bin/sh\ncat > /dev/null\nhead -c 1048576 /dev/zero | tr '\\0' 'w' >&2\necho 'Invoice 42'\nexit {}\n",
            exit_code
        );
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.display().to_string()
    }

    #[cfg(unix)]
    #[test]
    fn test_verbose_stderr_does_not_stall() {
        let dir = tempfile::TempDir::new().unwrap();
        let engine = TesseractEngine::new(noisy_tesseract(dir.path(), 0), "eng", Duration::from_secs(20));

        let started = Instant::now();
        let text = engine.recognize(b"image", OcrProfile::Default).unwrap();
        assert_eq!(text.trim(), "Invoice 42");
        assert!(started.elapsed() < Duration::from_secs(20));
    }

    #[cfg(unix)]
    #[test]
    fn test_failure_reports_stderr() {
        let dir = tempfile::TempDir::new().unwrap();
        let engine = TesseractEngine::new(noisy_tesseract(dir.path(), 1), "eng", Duration::from_secs(20));

        let err = engine.recognize(b"image", OcrProfile::Default).unwrap_err();
        match err {
            KnowledgeError::Ocr(message) => {
                assert!(message.starts_with("tesseract exited with"));
                assert!(message.contains("www"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
