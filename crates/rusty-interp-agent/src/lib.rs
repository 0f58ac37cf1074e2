//! Agent runtime: reassembles a streamed model response, renders it, and
//! dispatches `run_code` invocations to execution backends in a loop.
//!
//! The [`Agent`] is the session context. Each user turn runs
//! [`Agent::respond`], which streams assistant turns through the
//! [`machine::ResponseMachine`] and hands finished invocations to the
//! dispatch step until a stream ends with plain text.

pub mod confirm;
pub mod dispatch;
pub mod display;
pub mod machine;
pub mod prompt;
pub mod runtime;
pub mod schema;

pub use confirm::{AutoApprove, Confirmation, Confirmer};
pub use display::{BlockContent, BlockKind, Display, VisualBlock};
pub use runtime::{Agent, AgentSettings, RespondOutcome};
