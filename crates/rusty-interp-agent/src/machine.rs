//! Response state machine.
//!
//! Driven once per fragment, in arrival order. Each call merges the
//! fragment into the last (assistant) turn of the transcript, re-parses
//! the invocation arguments and keeps the active block in step with the
//! turn. A finish reason yields a terminal [`Step`].

use rusty_interp_core::merge::{Fragment, merge_delta};
use rusty_interp_core::partial_json::parse_partial_json;
use rusty_interp_core::transcript::{CodeArguments, Invocation, Role, Transcript};
use tracing::{debug, trace};

use crate::display::{BlockContent, BlockKind, BlockSlot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Text,
    InvocationOpen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    FinishedText,
    FinishedInvocation,
}

#[derive(Debug)]
pub struct ResponseMachine {
    phase: Phase,
}

impl Default for ResponseMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseMachine {
    pub fn new() -> Self {
        Self { phase: Phase::Text }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Apply one fragment. The last transcript turn must be the assistant
    /// turn being assembled; anything else makes the fragment a no-op.
    pub fn on_fragment(
        &mut self,
        transcript: &mut Transcript,
        fragment: &Fragment,
        blocks: &mut BlockSlot,
    ) -> Step {
        let Some(turn) = transcript.last_assistant_mut() else {
            debug!("Fragment arrived with no assistant turn open");
            return Step::Continue;
        };

        merge_delta(turn, &fragment.delta);
        if let Some(invocation) = turn.invocation_mut() {
            reparse(invocation);
        }
        let entering = self.phase == Phase::Text && turn.is_invocation();
        let content = BlockContent::from_turn(turn);

        if entering {
            trace!("Invocation started");
            self.phase = Phase::InvocationOpen;
            blocks.close();
            if matches!(
                transcript.previous_role(),
                Some(Role::User) | Some(Role::Function)
            ) {
                blocks.separator();
            }
            blocks.open(BlockKind::Code);
        } else if !blocks.is_open() {
            blocks.open(BlockKind::Message);
        }
        blocks.update(&content);

        match &fragment.finish_reason {
            None => Step::Continue,
            Some(reason) if reason.is_invocation() => Step::FinishedInvocation,
            Some(reason) => {
                debug!(?reason, "Stream finished");
                blocks.close();
                Step::FinishedText
            }
        }
    }

    /// The stream ended with no finish reason: plain completion.
    pub fn finish(&mut self, blocks: &mut BlockSlot) -> Step {
        blocks.close();
        Step::FinishedText
    }
}

/// Replace the stored parse only when the full argument text parses now.
fn reparse(invocation: &mut Invocation) {
    if let Some(parsed) = parse_partial_json(&invocation.arguments)
        .as_ref()
        .and_then(CodeArguments::from_value)
    {
        invocation.parsed = Some(parsed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::{Display, VisualBlock};
    use rusty_interp_core::merge::{FinishReason, InvocationDelta, TurnDelta};
    use rusty_interp_core::transcript::{AssistantTurn, Turn};
    use std::sync::{Arc, Mutex};

    #[derive(Default, Clone)]
    struct Recorder(Arc<Mutex<Vec<String>>>);

    struct Block(BlockKind, Recorder);

    impl VisualBlock for Block {
        fn kind(&self) -> BlockKind {
            self.0
        }
        fn update(&mut self, content: &BlockContent) {
            (self.1).0.lock().unwrap().push(format!("update {content:?}"));
        }
        fn close(self: Box<Self>) {
            (self.1).0.lock().unwrap().push(format!("close {:?}", self.0));
        }
    }

    impl Display for Recorder {
        fn open(&self, kind: BlockKind) -> Box<dyn VisualBlock> {
            self.0.lock().unwrap().push(format!("open {kind:?}"));
            Box::new(Block(kind, self.clone()))
        }
        fn separator(&self) {
            self.0.lock().unwrap().push("separator".into());
        }
    }

    fn setup() -> (Transcript, BlockSlot, Recorder) {
        let recorder = Recorder::default();
        let mut transcript = Transcript::new();
        transcript.push(Turn::user("print hi"));
        transcript.push(Turn::Assistant(AssistantTurn::default()));
        (transcript, BlockSlot::new(Arc::new(recorder.clone())), recorder)
    }

    fn invocation_start() -> Fragment {
        Fragment {
            delta: TurnDelta {
                invocation: Some(InvocationDelta {
                    id: Some("call_1".into()),
                    name: Some("run_code".into()),
                    arguments: Some(String::new()),
                }),
                ..TurnDelta::default()
            },
            finish_reason: None,
        }
    }

    fn events(recorder: &Recorder) -> Vec<String> {
        recorder
            .0
            .lock()
            .unwrap()
            .iter()
            .filter(|e| !e.starts_with("update"))
            .cloned()
            .collect()
    }

    #[test]
    fn test_text_stream_finishes_without_dispatch() {
        let (mut transcript, mut blocks, recorder) = setup();
        let mut machine = ResponseMachine::new();

        assert_eq!(
            machine.on_fragment(&mut transcript, &Fragment::text("Hel"), &mut blocks),
            Step::Continue
        );
        machine.on_fragment(&mut transcript, &Fragment::text("lo"), &mut blocks);
        let step = machine.on_fragment(
            &mut transcript,
            &Fragment::finished(FinishReason::Stop),
            &mut blocks,
        );

        assert_eq!(step, Step::FinishedText);
        assert_eq!(machine.phase(), Phase::Text);
        assert_eq!(transcript.last_assistant().unwrap().content(), "Hello");
        assert!(!blocks.is_open());
        assert_eq!(events(&recorder), vec!["open Message", "close Message"]);
    }

    #[test]
    fn test_other_finish_reason_is_plain_completion() {
        let (mut transcript, mut blocks, _) = setup();
        let mut machine = ResponseMachine::new();
        machine.on_fragment(&mut transcript, &invocation_start(), &mut blocks);
        let step = machine.on_fragment(
            &mut transcript,
            &Fragment::finished(FinishReason::Other("length".into())),
            &mut blocks,
        );
        assert_eq!(step, Step::FinishedText);
    }

    #[test]
    fn test_invocation_switches_to_code_block_with_separator() {
        let (mut transcript, mut blocks, recorder) = setup();
        let mut machine = ResponseMachine::new();

        machine.on_fragment(&mut transcript, &Fragment::text("Sure."), &mut blocks);
        machine.on_fragment(&mut transcript, &invocation_start(), &mut blocks);
        machine.on_fragment(
            &mut transcript,
            &Fragment::arguments("{\"language\": \"python\", \"code\": \"print("),
            &mut blocks,
        );
        machine.on_fragment(&mut transcript, &Fragment::arguments("1)\"}"), &mut blocks);
        let step = machine.on_fragment(
            &mut transcript,
            &Fragment::finished(FinishReason::Invocation),
            &mut blocks,
        );

        assert_eq!(step, Step::FinishedInvocation);
        assert_eq!(machine.phase(), Phase::InvocationOpen);
        // The code block stays open for the dispatcher.
        assert_eq!(blocks.active_kind(), Some(BlockKind::Code));
        assert_eq!(
            events(&recorder),
            vec!["open Message", "close Message", "separator", "open Code"]
        );

        let turn = transcript.last_assistant().unwrap();
        assert_eq!(turn.content(), "Sure.");
        let parsed = turn.invocation().unwrap().parsed.as_ref().unwrap();
        assert_eq!(parsed.complete(), Some(("python", "print(1)")));
    }

    #[test]
    fn test_no_separator_after_assistant_turn() {
        let recorder = Recorder::default();
        let mut transcript = Transcript::new();
        transcript.push(Turn::Assistant(AssistantTurn::default()));
        transcript.push(Turn::Assistant(AssistantTurn::default()));
        let mut blocks = BlockSlot::new(Arc::new(recorder.clone()));

        ResponseMachine::new().on_fragment(&mut transcript, &invocation_start(), &mut blocks);
        assert_eq!(events(&recorder), vec!["open Code"]);
    }

    #[test]
    fn test_failed_reparse_keeps_previous_parse() {
        let (mut transcript, mut blocks, _) = setup();
        let mut machine = ResponseMachine::new();
        machine.on_fragment(&mut transcript, &invocation_start(), &mut blocks);
        machine.on_fragment(
            &mut transcript,
            &Fragment::arguments("{\"language\": \"python\", "),
            &mut blocks,
        );
        let before = transcript
            .last_assistant()
            .and_then(|t| t.invocation())
            .and_then(|i| i.parsed.clone());
        assert_eq!(before.as_ref().and_then(|p| p.language.as_deref()), Some("python"));

        // An open key is not parseable; the earlier parse must survive.
        machine.on_fragment(&mut transcript, &Fragment::arguments("\"cod"), &mut blocks);
        let invocation = transcript.last_assistant().unwrap().invocation().unwrap();
        assert_eq!(invocation.parsed, before);
        assert_eq!(invocation.arguments, "{\"language\": \"python\", \"cod");
    }

    #[test]
    fn test_stream_end_without_reason_closes_block() {
        let (mut transcript, mut blocks, _) = setup();
        let mut machine = ResponseMachine::new();
        machine.on_fragment(&mut transcript, &Fragment::text("partial"), &mut blocks);
        assert_eq!(machine.finish(&mut blocks), Step::FinishedText);
        assert!(!blocks.is_open());
    }
}
