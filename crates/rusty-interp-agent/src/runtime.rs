//! Session context and the respond loop.
//!
//! [`Agent`] holds everything one chat session owns: the transcript, the
//! backend registry and the active block. `respond` streams one assistant
//! turn per iteration and either stops or dispatches the invocation and
//! goes around again. Every suspension point races the cancellation token.

use std::path::PathBuf;
use std::sync::Arc;

use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use rusty_interp_backends::BackendRegistry;
use rusty_interp_core::config::Config;
use rusty_interp_core::transcript::{AssistantTurn, Transcript, Turn};
use rusty_interp_providers::{CompletionRequest, Credentials, LlmProvider};

use crate::confirm::{Confirmation, Confirmer};
use crate::dispatch::{
    CORRECTIVE_MESSAGE, Candidate, DECLINED_MESSAGE, INTERRUPTED_MESSAGE, output_content, preview,
};
use crate::display::{BlockContent, BlockKind, BlockSlot, Display};
use crate::machine::{ResponseMachine, Step};
use crate::prompt::build_system_prompt;
use crate::schema::run_code_schema;

/// How a `respond` call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RespondOutcome {
    /// A stream finished with a non-invocation reason.
    Completed,
    /// The user declined to run an invocation.
    Declined,
    /// Cancelled while waiting on the stream, a confirmation or a backend.
    Interrupted,
    /// `max_iterations` provider requests were made for one user turn.
    IterationLimit,
}

/// Per-session knobs, usually taken from [`Config`].
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub model: String,
    pub temperature: f64,
    pub auto_run: bool,
    pub local: bool,
    pub debug: bool,
    pub max_iterations: Option<u32>,
    pub system_message: Option<String>,
    pub working_dir: PathBuf,
}

impl AgentSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            model: config.model(),
            temperature: config.temperature(),
            auto_run: config.auto_run(),
            local: config.local(),
            debug: config.debug(),
            max_iterations: config.max_iterations(),
            system_message: config.system_message().map(str::to_string),
            working_dir: config.working_dir(),
        }
    }
}

enum Finished {
    Text,
    Invocation,
}

enum Dispatched {
    Executed,
    Corrected,
    Declined,
    Interrupted,
}

pub struct Agent {
    settings: AgentSettings,
    provider: Arc<dyn LlmProvider>,
    credentials: Credentials,
    confirmer: Arc<dyn Confirmer>,
    registry: BackendRegistry,
    blocks: BlockSlot,
    transcript: Transcript,
}

impl Agent {
    pub fn new(
        settings: AgentSettings,
        provider: Arc<dyn LlmProvider>,
        credentials: Credentials,
        display: Arc<dyn Display>,
        confirmer: Arc<dyn Confirmer>,
        registry: BackendRegistry,
    ) -> Self {
        Self {
            settings,
            provider,
            credentials,
            confirmer,
            registry,
            blocks: BlockSlot::new(display),
            transcript: Transcript::new(),
        }
    }

    /// Resume from a saved transcript.
    pub fn with_transcript(mut self, transcript: Transcript) -> Self {
        self.transcript = transcript;
        self
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    /// Forget the conversation. Backends keep their state.
    pub fn reset(&mut self) {
        self.end_active_block();
        self.transcript = Transcript::new();
    }

    /// Append a user turn and respond to it.
    pub async fn chat_turn(
        &mut self,
        text: &str,
        cancel: &CancellationToken,
    ) -> anyhow::Result<RespondOutcome> {
        self.transcript.push(Turn::user(text));
        self.respond(cancel).await
    }

    /// Run the stream/dispatch loop until a stream finishes with plain
    /// text, the user declines, the token is cancelled or the iteration
    /// cap is hit. Provider errors close the active block and propagate.
    pub async fn respond(&mut self, cancel: &CancellationToken) -> anyhow::Result<RespondOutcome> {
        let mut iterations: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                self.end_active_block();
                return Ok(RespondOutcome::Interrupted);
            }
            iterations += 1;
            debug!(iteration = iterations, "Respond loop iteration");

            let finished = match self.stream_turn(cancel).await {
                Ok(Some(finished)) => finished,
                Ok(None) => {
                    self.end_active_block();
                    self.settle_interrupted_invocation();
                    info!("Response interrupted while streaming");
                    return Ok(RespondOutcome::Interrupted);
                }
                Err(e) => {
                    self.end_active_block();
                    return Err(e);
                }
            };

            if let Finished::Text = finished {
                return Ok(RespondOutcome::Completed);
            }

            match self.dispatch(cancel).await {
                Ok(Dispatched::Executed) | Ok(Dispatched::Corrected) => {}
                Ok(Dispatched::Declined) => return Ok(RespondOutcome::Declined),
                Ok(Dispatched::Interrupted) => {
                    self.end_active_block();
                    self.settle_interrupted_invocation();
                    info!("Response interrupted during dispatch");
                    return Ok(RespondOutcome::Interrupted);
                }
                Err(e) => {
                    self.end_active_block();
                    return Err(e);
                }
            }

            if let Some(max) = self.settings.max_iterations {
                if iterations >= max {
                    warn!(max, "Iteration limit reached");
                    return Ok(RespondOutcome::IterationLimit);
                }
            }
        }
    }

    /// Force the active block closed.
    pub fn end_active_block(&mut self) {
        self.blocks.close();
    }

    /// Give an invocation cut off by an interrupt its one function result,
    /// so the transcript never ends on an unanswered invocation.
    fn settle_interrupted_invocation(&mut self) {
        let dangling = matches!(
            self.transcript.last(),
            Some(Turn::Assistant(turn)) if turn.is_invocation()
        );
        if dangling {
            self.transcript
                .push(Turn::function_result(INTERRUPTED_MESSAGE));
        }
    }

    /// End the session: close the block and stop every backend.
    pub async fn shutdown(&mut self) {
        self.end_active_block();
        self.registry.shutdown_all().await;
    }

    fn build_request(&self) -> CompletionRequest {
        let system = build_system_prompt(
            self.settings.system_message.as_deref(),
            &self.settings.working_dir,
        );
        let request = CompletionRequest {
            model: self.settings.model.clone(),
            messages: self.provider.format_messages(self.transcript.turns()),
            temperature: Some(self.settings.temperature),
            functions: vec![run_code_schema()],
            system: Some(system),
        };
        if self.settings.debug {
            match serde_json::to_string_pretty(&request.messages) {
                Ok(messages) => debug!(system = ?request.system, %messages, "Prompt"),
                Err(e) => debug!(%e, "Prompt not serializable"),
            }
        }
        request
    }

    /// Stream one assistant turn. `None` means the token was cancelled.
    async fn stream_turn(&mut self, cancel: &CancellationToken) -> anyhow::Result<Option<Finished>> {
        let request = self.build_request();

        let stream = tokio::select! {
            _ = cancel.cancelled() => None,
            stream = self.provider.stream(&request, &self.credentials) => Some(stream),
        };
        let Some(stream) = stream else {
            return Ok(None);
        };
        let mut stream = stream?;

        self.transcript.push(Turn::Assistant(AssistantTurn::default()));
        self.blocks.open(BlockKind::Message);
        let mut machine = ResponseMachine::new();

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(None),
                next = stream.next() => next,
            };

            match next {
                Some(Ok(fragment)) => {
                    match machine.on_fragment(&mut self.transcript, &fragment, &mut self.blocks) {
                        Step::Continue => {}
                        Step::FinishedText => return Ok(Some(Finished::Text)),
                        Step::FinishedInvocation => return Ok(Some(Finished::Invocation)),
                    }
                }
                Some(Err(e)) => return Err(e),
                None => {
                    debug!("Stream ended without a finish reason");
                    machine.finish(&mut self.blocks);
                    return Ok(Some(Finished::Text));
                }
            }
        }
    }

    /// Handle a finished invocation: confirm, check the arguments, run.
    async fn dispatch(&mut self, cancel: &CancellationToken) -> anyhow::Result<Dispatched> {
        self.blocks.close();

        let Some(invocation) = self
            .transcript
            .last_assistant()
            .and_then(|turn| turn.invocation())
            .cloned()
        else {
            warn!("Invocation finish reason without an invocation");
            self.transcript.push(Turn::function_result(CORRECTIVE_MESSAGE));
            return Ok(Dispatched::Corrected);
        };

        let candidate = Candidate::resolve(&invocation, self.settings.local);

        if !self.settings.auto_run {
            let (language, code) = preview(&invocation, &candidate);
            let answer = tokio::select! {
                _ = cancel.cancelled() => None,
                answer = self.confirmer.confirm(&language, &code) => Some(answer),
            };
            let Some(answer) = answer else {
                return Ok(Dispatched::Interrupted);
            };
            match answer? {
                Confirmation::Approved => {}
                Confirmation::Declined => {
                    info!(%language, "User declined to run code");
                    self.transcript.push(Turn::function_result(DECLINED_MESSAGE));
                    return Ok(Dispatched::Declined);
                }
                Confirmation::Interrupted => return Ok(Dispatched::Interrupted),
            }
        }

        let Candidate::Runnable { language, code } = candidate else {
            warn!(arguments = %invocation.arguments, "Invocation arguments could not be parsed");
            self.transcript.push(Turn::function_result(CORRECTIVE_MESSAGE));
            return Ok(Dispatched::Corrected);
        };

        self.blocks.open(BlockKind::Code);
        self.blocks.update(&BlockContent::code(&language, &code, None));
        info!(%language, bytes = code.len(), "Running code");

        let result = tokio::select! {
            _ = cancel.cancelled() => None,
            result = self.registry.submit(&language, &code) => Some(result),
        };
        let Some(result) = result else {
            return Ok(Dispatched::Interrupted);
        };

        let output = match result {
            Ok(output) => output,
            Err(e) => {
                warn!(%language, error = %e, "Backend failed");
                format!("Error: {e}")
            }
        };

        self.blocks
            .update(&BlockContent::code(&language, &code, Some(&output)));
        self.blocks.close();
        self.transcript
            .push(Turn::function_result(output_content(output)));
        Ok(Dispatched::Executed)
    }
}
