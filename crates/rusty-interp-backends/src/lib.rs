//! Execution backends for the code interpreter.
//!
//! A backend owns one language's interpreter. Python, shell and JavaScript
//! get a persistent REPL child so state carries across submissions;
//! AppleScript and HTML run one-shot. The [`BackendRegistry`] creates
//! backends lazily and keeps one per language for the whole session.

pub mod oneshot;
pub mod repl;

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rusty_interp_core::config::Config;
use rusty_interp_core::error::InterpError;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Languages the built-in factory can create backends for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Shell,
    JavaScript,
    AppleScript,
    Html,
}

impl Language {
    pub const ALL: [Language; 5] = [
        Language::Python,
        Language::Shell,
        Language::JavaScript,
        Language::AppleScript,
        Language::Html,
    ];

    /// Canonical identifier, as advertised to the model.
    pub fn as_str(self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Shell => "shell",
            Language::JavaScript => "javascript",
            Language::AppleScript => "applescript",
            Language::Html => "html",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = InterpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "python" | "python3" | "py" => Ok(Language::Python),
            "shell" | "bash" | "sh" | "zsh" => Ok(Language::Shell),
            "javascript" | "js" | "node" => Ok(Language::JavaScript),
            "applescript" | "osascript" => Ok(Language::AppleScript),
            "html" => Ok(Language::Html),
            other => Err(InterpError::UnsupportedLanguage(other.to_string())),
        }
    }
}

/// Registry key for a language identifier: canonical name when known,
/// otherwise the normalized identifier itself.
pub fn language_key(language: &str) -> String {
    match language.parse::<Language>() {
        Ok(lang) => lang.as_str().to_string(),
        Err(_) => language.trim().to_ascii_lowercase(),
    }
}

/// One language's interpreter.
#[async_trait]
pub trait ExecutionBackend: Send {
    /// Canonical language this backend runs.
    fn language(&self) -> &str;

    /// Run `code` and return its combined textual output (possibly empty).
    async fn submit(&mut self, code: &str) -> anyhow::Result<String>;

    /// Release any child process. The backend may be reused afterwards.
    async fn shutdown(&mut self) {}
}

/// Creates backends for the registry.
pub trait BackendFactory: Send + Sync {
    fn create(&self, language: &str, debug: bool) -> anyhow::Result<Box<dyn ExecutionBackend>>;
}

/// Runtime limits shared by every built-in backend.
#[derive(Debug, Clone)]
pub struct BackendSettings {
    pub timeout: Option<Duration>,
    pub max_output_bytes: usize,
    pub working_dir: PathBuf,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            timeout: None,
            max_output_bytes: 100_000,
            working_dir: std::env::current_dir().unwrap_or_else(|_| std::env::temp_dir()),
        }
    }
}

impl BackendSettings {
    pub fn from_config(config: &Config) -> Self {
        let exec = config.exec();
        Self {
            timeout: exec.timeout_secs.map(Duration::from_secs),
            max_output_bytes: exec.max_output_bytes,
            working_dir: config.working_dir(),
        }
    }
}

/// The factory used outside of tests.
pub struct DefaultBackendFactory {
    settings: BackendSettings,
}

impl DefaultBackendFactory {
    pub fn new(settings: BackendSettings) -> Self {
        Self { settings }
    }
}

impl BackendFactory for DefaultBackendFactory {
    fn create(&self, language: &str, debug: bool) -> anyhow::Result<Box<dyn ExecutionBackend>> {
        let settings = self.settings.clone();
        let backend: Box<dyn ExecutionBackend> = match language.parse::<Language>()? {
            Language::Python => Box::new(repl::ReplBackend::python(settings, debug)),
            Language::Shell => Box::new(repl::ReplBackend::shell(settings, debug)),
            Language::JavaScript => Box::new(repl::ReplBackend::javascript(settings, debug)),
            Language::AppleScript => Box::new(oneshot::OneShotBackend::applescript(settings)),
            Language::Html => Box::new(oneshot::HtmlBackend::new()),
        };
        Ok(backend)
    }
}

/// Session-scoped map from language to its live backend.
pub struct BackendRegistry {
    factory: Arc<dyn BackendFactory>,
    backends: HashMap<String, Box<dyn ExecutionBackend>>,
    debug: bool,
}

impl BackendRegistry {
    pub fn new(factory: Arc<dyn BackendFactory>) -> Self {
        Self {
            factory,
            backends: HashMap::new(),
            debug: false,
        }
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Return the backend for `language`, creating it on first use.
    pub fn get_or_create(&mut self, language: &str) -> anyhow::Result<&mut dyn ExecutionBackend> {
        let backend = match self.backends.entry(language_key(language)) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let backend = self.factory.create(entry.key(), self.debug)?;
                info!(language = %entry.key(), "Created execution backend");
                entry.insert(backend)
            }
        };
        Ok(backend.as_mut())
    }

    /// Submit `code` to the backend for `language`.
    pub async fn submit(&mut self, language: &str, code: &str) -> anyhow::Result<String> {
        let backend = self.get_or_create(language)?;
        debug!(language = backend.language(), bytes = code.len(), "Submitting code");
        backend.submit(code).await
    }

    pub fn contains(&self, language: &str) -> bool {
        self.backends.contains_key(&language_key(language))
    }

    pub fn len(&self) -> usize {
        self.backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    pub fn languages(&self) -> Vec<String> {
        let mut names: Vec<String> = self.backends.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn shutdown_all(&mut self) {
        for (language, backend) in self.backends.iter_mut() {
            debug!(%language, "Shutting down backend");
            backend.shutdown().await;
        }
        self.backends.clear();
    }
}

/// Cut `content` to at most `max` bytes on a character boundary.
pub fn truncate_output(content: String, max: usize) -> String {
    if content.len() <= max {
        return content;
    }
    let mut end = max;
    while !content.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...\n[output truncated at {max} bytes]", &content[..end])
}
