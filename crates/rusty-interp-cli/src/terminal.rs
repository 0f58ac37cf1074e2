//! Terminal rendering and confirmation.
//!
//! Blocks print incrementally to stdout: each update writes only what the
//! cumulative content added since the last one. Logs go to stderr.

use std::io::{ErrorKind, Write};

use async_trait::async_trait;
use rusty_interp_agent::{
    BlockContent, BlockKind, Confirmation, Confirmer, Display, VisualBlock,
};

pub struct TerminalDisplay;

impl Display for TerminalDisplay {
    fn open(&self, kind: BlockKind) -> Box<dyn VisualBlock> {
        match kind {
            BlockKind::Message => Box::new(MessageBlock::default()),
            BlockKind::Code => Box::new(CodeBlock::default()),
        }
    }

    fn separator(&self) {
        println!();
    }
}

/// The part of `current` not yet printed. When `current` no longer
/// extends `printed` (a reparse changed earlier text), nothing is returned.
fn fresh_suffix<'a>(printed: &str, current: &'a str) -> &'a str {
    current.strip_prefix(printed).unwrap_or("")
}

fn emit(text: &str) {
    let mut stdout = std::io::stdout().lock();
    let _ = stdout.write_all(text.as_bytes());
    let _ = stdout.flush();
}

#[derive(Default)]
struct MessageBlock {
    printed: String,
}

impl VisualBlock for MessageBlock {
    fn kind(&self) -> BlockKind {
        BlockKind::Message
    }

    fn update(&mut self, content: &BlockContent) {
        if let BlockContent::Message { text } = content {
            let fresh = fresh_suffix(&self.printed, text);
            if !fresh.is_empty() {
                emit(fresh);
                self.printed.push_str(fresh);
            }
        }
    }

    fn close(self: Box<Self>) {
        if !self.printed.is_empty() && !self.printed.ends_with('\n') {
            emit("\n");
        }
    }
}

#[derive(Default)]
struct CodeBlock {
    header: bool,
    code: String,
    output: Option<String>,
}

impl CodeBlock {
    fn open_fence(&mut self, language: Option<&str>) {
        if !self.header {
            emit(&format!("\n```{}\n", language.unwrap_or("")));
            self.header = true;
        }
    }
}

impl VisualBlock for CodeBlock {
    fn kind(&self) -> BlockKind {
        BlockKind::Code
    }

    fn update(&mut self, content: &BlockContent) {
        let BlockContent::Code {
            language,
            code,
            output,
        } = content
        else {
            return;
        };

        if let Some(code) = code {
            self.open_fence(language.as_deref());
            let fresh = fresh_suffix(&self.code, code);
            if !fresh.is_empty() {
                emit(fresh);
                self.code.push_str(fresh);
            }
        }

        if self.output.is_none() {
            if let Some(output) = output {
                self.open_fence(language.as_deref());
                let sep = if self.code.ends_with('\n') { "" } else { "\n" };
                emit(&format!("{sep}```\n\nOutput:\n{output}\n"));
                self.output = Some(output.clone());
            }
        }
    }

    fn close(self: Box<Self>) {
        if !self.header {
            return;
        }
        if self.output.is_none() {
            let sep = if self.code.ends_with('\n') { "" } else { "\n" };
            emit(&format!("{sep}```\n"));
        }
        emit("\n");
    }
}

/// Asks on the terminal. Only `y` approves.
pub struct TerminalConfirmer;

/// dialoguer reads in raw mode, so Ctrl-C arrives as an interrupted read
/// rather than a signal.
fn confirmation_from(answer: dialoguer::Result<String>) -> anyhow::Result<Confirmation> {
    match answer {
        Ok(answer) => Ok(Confirmation::from_answer(&answer)),
        Err(dialoguer::Error::IO(e)) if e.kind() == ErrorKind::Interrupted => {
            Ok(Confirmation::Interrupted)
        }
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl Confirmer for TerminalConfirmer {
    async fn confirm(&self, _language: &str, _code: &str) -> anyhow::Result<Confirmation> {
        let answer = tokio::task::spawn_blocking(|| {
            dialoguer::Input::<String>::new()
                .with_prompt("  Would you like to run this code? (y/n)")
                .allow_empty(true)
                .interact_text()
        })
        .await?;
        println!();
        confirmation_from(answer)
    }
}
