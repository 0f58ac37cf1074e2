//! Visual Block interface.
//!
//! The agent renders the active turn through exactly one open block at a
//! time. Blocks are closed once and never reopened; [`BlockSlot`] enforces
//! that by owning the open block and consuming it on close.

use std::sync::Arc;

use rusty_interp_core::transcript::AssistantTurn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Message,
    Code,
}

/// Snapshot of what a block should show. Always cumulative, never a delta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockContent {
    Message {
        text: String,
    },
    Code {
        language: Option<String>,
        code: Option<String>,
        output: Option<String>,
    },
}

impl BlockContent {
    /// Render state for a cumulative assistant turn.
    pub fn from_turn(turn: &AssistantTurn) -> Self {
        match turn.invocation() {
            None => BlockContent::Message {
                text: turn.content().to_string(),
            },
            Some(invocation) => {
                let parsed = invocation.parsed.as_ref();
                BlockContent::Code {
                    language: parsed.and_then(|p| p.language.clone()),
                    code: parsed.and_then(|p| p.code.clone()),
                    output: None,
                }
            }
        }
    }

    pub fn code(language: &str, code: &str, output: Option<&str>) -> Self {
        BlockContent::Code {
            language: Some(language.to_string()),
            code: Some(code.to_string()),
            output: output.map(str::to_string),
        }
    }
}

pub trait VisualBlock: Send {
    fn kind(&self) -> BlockKind;

    fn update(&mut self, content: &BlockContent);

    /// Finish rendering. Consumes the block.
    fn close(self: Box<Self>);
}

/// Produces blocks for the active turn.
pub trait Display: Send + Sync {
    fn open(&self, kind: BlockKind) -> Box<dyn VisualBlock>;

    /// Cosmetic gap between a user/function turn and a new code block.
    fn separator(&self);
}

/// Holder for the single open block.
pub struct BlockSlot {
    display: Arc<dyn Display>,
    active: Option<Box<dyn VisualBlock>>,
}

impl BlockSlot {
    pub fn new(display: Arc<dyn Display>) -> Self {
        Self {
            display,
            active: None,
        }
    }

    /// Open a fresh block, closing whatever was open before.
    pub fn open(&mut self, kind: BlockKind) {
        self.close();
        self.active = Some(self.display.open(kind));
    }

    pub fn update(&mut self, content: &BlockContent) {
        if let Some(block) = self.active.as_mut() {
            block.update(content);
        }
    }

    pub fn close(&mut self) {
        if let Some(block) = self.active.take() {
            block.close();
        }
    }

    pub fn separator(&self) {
        self.display.separator();
    }

    pub fn is_open(&self) -> bool {
        self.active.is_some()
    }

    pub fn active_kind(&self) -> Option<BlockKind> {
        self.active.as_ref().map(|b| b.kind())
    }
}

impl Drop for BlockSlot {
    fn drop(&mut self) {
        self.close();
    }
}
