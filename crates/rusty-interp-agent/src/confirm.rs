//! Confirmation channel consulted before code runs.

use async_trait::async_trait;

/// The user's answer to a confirmation prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Approved,
    Declined,
    /// The prompt itself was interrupted (Ctrl-C while reading the answer).
    Interrupted,
}

impl Confirmation {
    pub fn from_answer(answer: &str) -> Self {
        if is_approval(answer) {
            Confirmation::Approved
        } else {
            Confirmation::Declined
        }
    }
}

#[async_trait]
pub trait Confirmer: Send + Sync {
    /// Ask whether `code` may run. `language` may be empty when it is unknown.
    async fn confirm(&self, language: &str, code: &str) -> anyhow::Result<Confirmation>;
}

/// Approves everything. Used for `auto_run` sessions and tests.
pub struct AutoApprove;

#[async_trait]
impl Confirmer for AutoApprove {
    async fn confirm(&self, _language: &str, _code: &str) -> anyhow::Result<Confirmation> {
        Ok(Confirmation::Approved)
    }
}

/// Only a literal `y` (any case, surrounding whitespace ignored) approves.
pub fn is_approval(answer: &str) -> bool {
    answer.trim().eq_ignore_ascii_case("y")
}
