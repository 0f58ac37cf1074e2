//! Backends that run each submission in a fresh process or write it out.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use rusty_interp_core::error::InterpError;

use crate::{BackendSettings, ExecutionBackend, Language, truncate_output};

/// Pipes each submission to a new interpreter process on stdin.
pub struct OneShotBackend {
    language: Language,
    program: String,
    args: Vec<String>,
    settings: BackendSettings,
}

impl OneShotBackend {
    pub fn new(
        language: Language,
        program: impl Into<String>,
        args: Vec<String>,
        settings: BackendSettings,
    ) -> Self {
        Self {
            language,
            program: program.into(),
            args,
            settings,
        }
    }

    /// `osascript -` reads the script from stdin.
    pub fn applescript(settings: BackendSettings) -> Self {
        Self::new(Language::AppleScript, "osascript", vec!["-".into()], settings)
    }

    async fn run(&self, code: &str) -> anyhow::Result<std::process::Output> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .current_dir(&self.settings.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| InterpError::Backend(format!("failed to start {}: {e}", self.program)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(code.as_bytes()).await?;
        }
        Ok(child.wait_with_output().await?)
    }
}

#[async_trait]
impl ExecutionBackend for OneShotBackend {
    fn language(&self) -> &str {
        self.language.as_str()
    }

    async fn submit(&mut self, code: &str) -> anyhow::Result<String> {
        let result = match self.settings.timeout {
            Some(limit) => match tokio::time::timeout(limit, self.run(code)).await {
                Ok(result) => result?,
                Err(_) => {
                    warn!(language = %self.language, ?limit, "Execution timed out");
                    return Ok(format!("Execution timed out after {limit:?}"));
                }
            },
            None => self.run(code).await?,
        };

        let stdout = String::from_utf8_lossy(&result.stdout);
        let stderr = String::from_utf8_lossy(&result.stderr);
        debug!(language = %self.language, status = %result.status, "Process finished");

        let content = match (stdout.trim_end(), stderr.trim_end()) {
            (out, "") => out.to_string(),
            ("", err) => err.to_string(),
            (out, err) => format!("{out}\n{err}"),
        };
        Ok(truncate_output(content, self.settings.max_output_bytes))
    }
}

/// Writes the submission to an `.html` file and reports where.
#[derive(Debug, Clone)]
pub struct HtmlBackend {
    dir: PathBuf,
}

impl HtmlBackend {
    pub fn new() -> Self {
        Self::in_dir(std::env::temp_dir())
    }

    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl Default for HtmlBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionBackend for HtmlBackend {
    fn language(&self) -> &str {
        Language::Html.as_str()
    }

    async fn submit(&mut self, code: &str) -> anyhow::Result<String> {
        let path = self
            .dir
            .join(format!("rusty-interp-{}.html", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&path, code).await?;
        debug!(path = %path.display(), "Saved HTML");
        Ok(format!("Saved HTML to {}", path.display()))
    }
}
