//! Fragment merging — folds streamed partial turns into one cumulative assistant turn.
//!
//! String fields in a delta are appended to the cumulative turn, other fields
//! overwrite, and absent fields leave the turn untouched. An empty delta is a
//! no-op, so repeated keep-alive fragments are harmless.

use serde::{Deserialize, Serialize};

use crate::transcript::{AssistantTurn, InvocationTurn, Role};

/// Why the provider ended a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Invocation,
    Other(String),
}

impl FinishReason {
    pub fn is_invocation(&self) -> bool {
        matches!(self, FinishReason::Invocation)
    }
}

/// Partial update to an assistant turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurnDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invocation: Option<InvocationDelta>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvocationDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

/// One item of a provider stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    #[serde(default)]
    pub delta: TurnDelta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
}

impl Fragment {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            delta: TurnDelta {
                content: Some(text.into()),
                ..TurnDelta::default()
            },
            finish_reason: None,
        }
    }

    pub fn arguments(arguments: impl Into<String>) -> Self {
        Self {
            delta: TurnDelta {
                invocation: Some(InvocationDelta {
                    arguments: Some(arguments.into()),
                    ..InvocationDelta::default()
                }),
                ..TurnDelta::default()
            },
            finish_reason: None,
        }
    }

    pub fn finished(reason: FinishReason) -> Self {
        Self {
            delta: TurnDelta::default(),
            finish_reason: Some(reason),
        }
    }
}

impl TurnDelta {
    pub fn is_empty(&self) -> bool {
        self.role.is_none() && self.content.is_none() && self.invocation.is_none()
    }
}

/// Merge `delta` into the cumulative assistant turn.
///
/// The first delta carrying an invocation promotes a text turn to an
/// invocation turn; accumulated text is kept on the promoted turn.
pub fn merge_delta(turn: &mut AssistantTurn, delta: &TurnDelta) {
    // `role` is the only non-string field; an assistant turn stays an assistant turn.
    if let Some(content) = &delta.content {
        match turn {
            AssistantTurn::Text(t) => t.content.push_str(content),
            AssistantTurn::Invocation(t) => t.content.push_str(content),
        }
    }

    let Some(inv_delta) = &delta.invocation else {
        return;
    };

    if let AssistantTurn::Text(text) = turn {
        let content = std::mem::take(&mut text.content);
        *turn = AssistantTurn::Invocation(InvocationTurn {
            content,
            invocation: Default::default(),
        });
    }

    if let Some(invocation) = turn.invocation_mut() {
        if let Some(id) = &inv_delta.id {
            invocation.id.push_str(id);
        }
        if let Some(name) = &inv_delta.name {
            invocation.name.push_str(name);
        }
        if let Some(arguments) = &inv_delta.arguments {
            invocation.arguments.push_str(arguments);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn merged(deltas: &[TurnDelta]) -> AssistantTurn {
        let mut turn = AssistantTurn::default();
        for d in deltas {
            merge_delta(&mut turn, d);
        }
        turn
    }

    #[test]
    fn test_text_accumulates() {
        let turn = merged(&[
            Fragment::text("Hel").delta,
            Fragment::text("lo").delta,
        ]);
        assert_eq!(turn, AssistantTurn::Text(crate::transcript::TextTurn { content: "Hello".into() }));
    }

    #[test]
    fn test_empty_delta_is_noop() {
        let mut turn = merged(&[Fragment::text("abc").delta]);
        let before = turn.clone();
        for _ in 0..5 {
            merge_delta(&mut turn, &TurnDelta::default());
        }
        assert_eq!(turn, before);
        assert!(TurnDelta::default().is_empty());
    }

    #[test]
    fn test_invocation_promotes_and_keeps_text() {
        let turn = merged(&[
            Fragment::text("Let me check.").delta,
            TurnDelta {
                role: None,
                content: None,
                invocation: Some(InvocationDelta {
                    id: Some("call_1".into()),
                    name: Some("run_code".into()),
                    arguments: Some(String::new()),
                }),
            },
            Fragment::arguments("{\"language\"").delta,
            Fragment::arguments(": \"shell\"}").delta,
        ]);
        assert!(turn.is_invocation());
        assert_eq!(turn.content(), "Let me check.");
        let inv = turn.invocation().unwrap();
        assert_eq!(inv.id, "call_1");
        assert_eq!(inv.name, "run_code");
        assert_eq!(inv.arguments, "{\"language\": \"shell\"}");
        assert!(inv.parsed.is_none());
    }

    #[test]
    fn test_merge_is_split_independent() {
        let target = r#"{"language": "python", "code": "for i in range(3):\n    print(i)"}"#;
        let whole = merged(&[Fragment::arguments(target).delta]);

        for split in 1..target.len() {
            if !target.is_char_boundary(split) {
                continue;
            }
            let (a, b) = target.split_at(split);
            let parts = merged(&[Fragment::arguments(a).delta, Fragment::arguments(b).delta]);
            assert_eq!(parts, whole, "split at {split}");
        }

        let three = merged(&[
            Fragment::arguments(&target[..5]).delta,
            Fragment::arguments(&target[5..20]).delta,
            Fragment::arguments(&target[20..]).delta,
        ]);
        assert_eq!(three, whole);
    }

    #[test]
    fn test_role_delta_does_not_alter_turn() {
        let turn = merged(&[TurnDelta {
            role: Some(Role::Assistant),
            ..TurnDelta::default()
        }]);
        assert_eq!(turn, AssistantTurn::default());
    }
}
