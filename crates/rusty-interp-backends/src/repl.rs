//! Persistent interpreter processes.
//!
//! Each submission is written to the child's stdin together with a unique
//! end marker; output is read line by line until that marker comes back.
//! Stderr is folded into stdout inside the child so ordering is preserved.

use std::process::Stdio;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, trace, warn};

use rusty_interp_core::error::InterpError;

use crate::{BackendSettings, ExecutionBackend, Language, truncate_output};

const MARKER_PREFIX: &str = "__END_OF_EXECUTION_";

const PYTHON_DRIVER: &str = r#"
import sys, json, traceback
sys.stderr = sys.stdout
_globals = {"__name__": "__main__"}
for _line in sys.stdin:
    _request = json.loads(_line)
    try:
        exec(compile(_request["code"], "<run_code>", "exec"), _globals)
    except SystemExit:
        pass
    except BaseException:
        traceback.print_exc()
    sys.stdout.write("\n" + _request["marker"] + "\n")
    sys.stdout.flush()
"#;

const NODE_DRIVER: &str = r#"
const vm = require('vm');
const readline = require('readline');
process.stderr.write = process.stdout.write.bind(process.stdout);
const context = vm.createContext({
  require, console, process, Buffer,
  setTimeout, setInterval, clearTimeout, clearInterval,
});
const rl = readline.createInterface({ input: process.stdin });
rl.on('line', async (line) => {
  const request = JSON.parse(line);
  try {
    const result = vm.runInContext(request.code, context);
    if (result && typeof result.then === 'function') {
      await result;
    }
  } catch (e) {
    console.log(e && e.stack ? e.stack : String(e));
  }
  process.stdout.write('\n' + request.marker + '\n');
});
"#;

/// How code and marker are framed on the child's stdin.
#[derive(Debug, Clone, Copy)]
enum Framing {
    /// One JSON object per line, decoded by a driver script.
    JsonLine,
    /// A base64-wrapped `eval` followed by an `echo` of the marker.
    ShellEval,
}

/// Command line and framing for one REPL flavour.
#[derive(Debug, Clone)]
struct ReplFlavor {
    language: Language,
    program: String,
    args: Vec<String>,
    preamble: Option<&'static str>,
    framing: Framing,
}

impl ReplFlavor {
    fn payload(&self, code: &str, marker: &str) -> String {
        match self.framing {
            Framing::JsonLine => format!("{}\n", json!({ "code": code, "marker": marker })),
            Framing::ShellEval => {
                let encoded = BASE64.encode(code.as_bytes());
                format!("eval \"$(printf '%s' '{encoded}' | base64 -d)\"\necho\necho {marker}\n")
            }
        }
    }
}

struct ReplProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

/// A long-lived interpreter child for one language.
pub struct ReplBackend {
    flavor: ReplFlavor,
    settings: BackendSettings,
    debug: bool,
    process: Option<ReplProcess>,
}

impl ReplBackend {
    fn new(flavor: ReplFlavor, settings: BackendSettings, debug: bool) -> Self {
        Self {
            flavor,
            settings,
            debug,
            process: None,
        }
    }

    pub fn python(settings: BackendSettings, debug: bool) -> Self {
        Self::new(
            ReplFlavor {
                language: Language::Python,
                program: "python3".into(),
                args: vec!["-u".into(), "-c".into(), PYTHON_DRIVER.into()],
                preamble: None,
                framing: Framing::JsonLine,
            },
            settings,
            debug,
        )
    }

    pub fn shell(settings: BackendSettings, debug: bool) -> Self {
        Self::new(
            ReplFlavor {
                language: Language::Shell,
                program: "bash".into(),
                args: vec!["--noprofile".into(), "--norc".into()],
                preamble: Some("exec 2>&1\n"),
                framing: Framing::ShellEval,
            },
            settings,
            debug,
        )
    }

    pub fn javascript(settings: BackendSettings, debug: bool) -> Self {
        Self::new(
            ReplFlavor {
                language: Language::JavaScript,
                program: "node".into(),
                args: vec!["-e".into(), NODE_DRIVER.into()],
                preamble: None,
                framing: Framing::JsonLine,
            },
            settings,
            debug,
        )
    }

    pub fn is_running(&self) -> bool {
        self.process.is_some()
    }

    async fn spawn(&self) -> anyhow::Result<ReplProcess> {
        let mut child = Command::new(&self.flavor.program)
            .args(&self.flavor.args)
            .current_dir(&self.settings.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| InterpError::Backend(format!("failed to start {}: {e}", self.flavor.program)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow::anyhow!("{} stdin unavailable", self.flavor.program))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow::anyhow!("{} stdout unavailable", self.flavor.program))?;

        if let Some(preamble) = self.flavor.preamble {
            stdin.write_all(preamble.as_bytes()).await?;
        }

        debug!(language = %self.flavor.language, pid = ?child.id(), "Started interpreter");
        Ok(ReplProcess {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
        })
    }

    async fn kill(&mut self) {
        if let Some(mut process) = self.process.take() {
            if let Err(e) = process.child.kill().await {
                trace!(error = %e, "Interpreter already gone");
            }
        }
    }
}

enum ReadEnd {
    Marker,
    Exited,
}

/// Read lines into `output` until `marker`. Output preceding a foreign
/// marker belongs to an abandoned submission and is discarded.
async fn read_until_marker(
    stdout: &mut Lines<BufReader<ChildStdout>>,
    marker: &str,
    output: &mut Vec<String>,
    debug: bool,
) -> std::io::Result<ReadEnd> {
    while let Some(line) = stdout.next_line().await? {
        if line == marker {
            return Ok(ReadEnd::Marker);
        }
        if line.starts_with(MARKER_PREFIX) {
            output.clear();
            continue;
        }
        if debug {
            trace!(%line, "Interpreter output");
        }
        output.push(line);
    }
    Ok(ReadEnd::Exited)
}

#[async_trait]
impl ExecutionBackend for ReplBackend {
    fn language(&self) -> &str {
        self.flavor.language.as_str()
    }

    async fn submit(&mut self, code: &str) -> anyhow::Result<String> {
        if let Some(process) = self.process.as_mut() {
            if let Ok(Some(status)) = process.child.try_wait() {
                debug!(language = %self.flavor.language, %status, "Interpreter exited, restarting");
                self.process = None;
            }
        }

        let mut process = match self.process.take() {
            Some(process) => process,
            None => self.spawn().await?,
        };

        let marker = format!("{MARKER_PREFIX}{}__", uuid::Uuid::new_v4().simple());
        if self.debug {
            debug!(language = %self.flavor.language, %code, "Running code");
        }

        if let Err(e) = process
            .stdin
            .write_all(self.flavor.payload(code, &marker).as_bytes())
            .await
        {
            return Err(anyhow::anyhow!("{} interpreter rejected input: {e}", self.flavor.language));
        }
        process.stdin.flush().await?;

        // The child is held locally until its marker arrives; dropping this
        // future mid-run kills it.
        let mut lines = Vec::new();
        let read = read_until_marker(&mut process.stdout, &marker, &mut lines, self.debug);
        let ended = match self.settings.timeout {
            Some(limit) => match tokio::time::timeout(limit, read).await {
                Ok(result) => Some(result),
                Err(_) => None,
            },
            None => Some(read.await),
        };

        // The drivers emit a newline before the marker.
        if lines.last().is_some_and(|l| l.is_empty()) {
            lines.pop();
        }
        let mut output = lines.join("\n");

        match ended {
            Some(Ok(ReadEnd::Marker)) => {
                self.process = Some(process);
            }
            Some(Ok(ReadEnd::Exited)) => {
                let _ = process.child.wait().await;
                output.push_str(&format!("\n[{} process exited]", self.flavor.language));
            }
            Some(Err(e)) => {
                return Err(anyhow::anyhow!("reading {} output: {e}", self.flavor.language));
            }
            None => {
                let _ = process.child.kill().await;
                let limit = self.settings.timeout.unwrap_or_default();
                warn!(language = %self.flavor.language, ?limit, "Execution timed out");
                output.push_str(&format!("\nExecution timed out after {limit:?}"));
            }
        }

        Ok(truncate_output(output.trim_start_matches('\n').to_string(), self.settings.max_output_bytes))
    }

    async fn shutdown(&mut self) {
        self.kill().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn available(program: &str) -> bool {
        std::process::Command::new(program)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok_and(|s| s.success())
    }

    fn settings() -> BackendSettings {
        BackendSettings {
            timeout: Some(Duration::from_secs(20)),
            max_output_bytes: 10_000,
            working_dir: std::env::temp_dir(),
        }
    }

    #[test]
    fn test_json_payload_is_one_line() {
        let backend = ReplBackend::python(settings(), false);
        let payload = backend.flavor.payload("print(1)\nprint(2)", "M");
        assert_eq!(payload.matches('\n').count(), 1);
        assert!(payload.ends_with('\n'));
    }

    #[test]
    fn test_shell_payload_survives_unbalanced_quotes() {
        let backend = ReplBackend::shell(settings(), false);
        let payload = backend.flavor.payload("echo 'oops", "M");
        assert!(!payload.contains("oops"));
        assert!(payload.ends_with("echo M\n"));
    }

    #[tokio::test]
    async fn test_shell_state_persists() {
        if !available("bash") {
            eprintln!("Skipping: bash not installed");
            return;
        }
        let mut backend = ReplBackend::shell(settings(), false);
        assert_eq!(backend.submit("export ANSWER=42").await.unwrap(), "");
        assert_eq!(backend.submit("echo $ANSWER").await.unwrap(), "42");
        let out = backend.submit("ls /definitely/not/here").await.unwrap();
        assert!(out.contains("No such file"), "stderr folded in: {out}");
        backend.shutdown().await;
        assert!(!backend.is_running());
    }

    #[tokio::test]
    async fn test_shell_restarts_after_exit() {
        if !available("bash") {
            eprintln!("Skipping: bash not installed");
            return;
        }
        let mut backend = ReplBackend::shell(settings(), false);
        let out = backend.submit("exit 3").await.unwrap();
        assert!(out.contains("process exited"));
        assert_eq!(backend.submit("echo back").await.unwrap(), "back");
    }

    #[tokio::test]
    async fn test_timeout_kills_and_restarts() {
        if !available("bash") {
            eprintln!("Skipping: bash not installed");
            return;
        }
        let mut backend = ReplBackend::shell(
            BackendSettings {
                timeout: Some(Duration::from_millis(300)),
                ..settings()
            },
            false,
        );
        let out = backend.submit("echo start; sleep 5").await.unwrap();
        assert!(out.starts_with("start"));
        assert!(out.contains("timed out"));
        assert!(!backend.is_running());
        assert_eq!(backend.submit("echo again").await.unwrap(), "again");
    }

    #[tokio::test]
    async fn test_python_state_and_tracebacks() {
        if !available("python3") {
            eprintln!("Skipping: python3 not installed");
            return;
        }
        let mut backend = ReplBackend::python(settings(), false);
        assert_eq!(backend.submit("x = 2").await.unwrap(), "");
        assert_eq!(backend.submit("print(x * 21)").await.unwrap(), "42");
        let out = backend.submit("1 / 0").await.unwrap();
        assert!(out.contains("ZeroDivisionError"), "got: {out}");
        assert_eq!(backend.submit("print('still', x)").await.unwrap(), "still 2");
    }

    #[tokio::test]
    async fn test_javascript_state_persists() {
        if !available("node") {
            eprintln!("Skipping: node not installed");
            return;
        }
        let mut backend = ReplBackend::javascript(settings(), false);
        assert_eq!(backend.submit("var n = 6").await.unwrap(), "");
        assert_eq!(backend.submit("console.log(n * 7)").await.unwrap(), "42");
    }

    #[tokio::test]
    async fn test_output_is_truncated() {
        if !available("python3") {
            eprintln!("Skipping: python3 not installed");
            return;
        }
        let mut backend = ReplBackend::python(
            BackendSettings {
                max_output_bytes: 50,
                ..settings()
            },
            false,
        );
        let out = backend.submit("print('x' * 500)").await.unwrap();
        assert!(out.ends_with("[output truncated at 50 bytes]"));
    }
}
