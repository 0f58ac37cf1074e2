//! Conversation transcript: turns, invocations, and the append-only turn list.

use serde::{Deserialize, Serialize};

/// Name of the single function advertised to the model.
pub const RUN_CODE: &str = "run_code";

/// Speaker of a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    Function,
}

/// One entry in the conversation transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Turn {
    User { content: String },
    Assistant(AssistantTurn),
    Function { name: String, content: String },
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Turn::User {
            content: content.into(),
        }
    }

    /// A `run_code` result turn.
    pub fn function_result(content: impl Into<String>) -> Self {
        Turn::Function {
            name: RUN_CODE.to_string(),
            content: content.into(),
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Turn::User { .. } => Role::User,
            Turn::Assistant(_) => Role::Assistant,
            Turn::Function { .. } => Role::Function,
        }
    }
}

/// An assistant turn is either plain text or text followed by a `run_code` invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AssistantTurn {
    Text(TextTurn),
    Invocation(InvocationTurn),
}

impl Default for AssistantTurn {
    fn default() -> Self {
        AssistantTurn::Text(TextTurn::default())
    }
}

impl AssistantTurn {
    pub fn content(&self) -> &str {
        match self {
            AssistantTurn::Text(t) => &t.content,
            AssistantTurn::Invocation(t) => &t.content,
        }
    }

    pub fn invocation(&self) -> Option<&Invocation> {
        match self {
            AssistantTurn::Text(_) => None,
            AssistantTurn::Invocation(t) => Some(&t.invocation),
        }
    }

    pub fn invocation_mut(&mut self) -> Option<&mut Invocation> {
        match self {
            AssistantTurn::Text(_) => None,
            AssistantTurn::Invocation(t) => Some(&mut t.invocation),
        }
    }

    pub fn is_invocation(&self) -> bool {
        matches!(self, AssistantTurn::Invocation(_))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextTurn {
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InvocationTurn {
    /// Text the model produced before it started the invocation.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content: String,
    pub invocation: Invocation,
}

/// A `run_code` request as it accumulates from the stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Raw argument text. Only ever appended to.
    #[serde(default)]
    pub arguments: String,
    /// Best parse of `arguments` seen so far.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parsed: Option<CodeArguments>,
}

/// The `run_code` arguments recovered from a (possibly partial) payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeArguments {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl CodeArguments {
    /// Extract the known fields from a parsed payload. Non-objects yield `None`.
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        let object = value.as_object()?;
        let field = |key: &str| {
            object
                .get(key)
                .and_then(|v| v.as_str())
                .map(str::to_string)
        };
        Some(Self {
            language: field("language"),
            code: field("code"),
        })
    }

    /// Both required fields, when present.
    pub fn complete(&self) -> Option<(&str, &str)> {
        Some((self.language.as_deref()?, self.code.as_deref()?))
    }

    /// Number of required fields present.
    pub fn known_fields(&self) -> usize {
        usize::from(self.language.is_some()) + usize::from(self.code.is_some())
    }
}

/// Ordered, append-only list of turns for one session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// The last turn, if it is an assistant turn. This is the only turn that may change.
    pub fn last_assistant_mut(&mut self) -> Option<&mut AssistantTurn> {
        match self.turns.last_mut() {
            Some(Turn::Assistant(turn)) => Some(turn),
            _ => None,
        }
    }

    pub fn last_assistant(&self) -> Option<&AssistantTurn> {
        match self.turns.last() {
            Some(Turn::Assistant(turn)) => Some(turn),
            _ => None,
        }
    }

    /// Role of the turn before the last one.
    pub fn previous_role(&self) -> Option<Role> {
        let n = self.turns.len();
        if n < 2 {
            return None;
        }
        Some(self.turns[n - 2].role())
    }

    pub fn function_results(&self) -> usize {
        self.turns
            .iter()
            .filter(|t| matches!(t, Turn::Function { .. }))
            .count()
    }
}

impl From<Vec<Turn>> for Transcript {
    fn from(turns: Vec<Turn>) -> Self {
        Self { turns }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_code_arguments_from_value() {
        let args = CodeArguments::from_value(&json!({"language": "python"})).unwrap();
        assert_eq!(args.language.as_deref(), Some("python"));
        assert!(args.code.is_none());
        assert!(args.complete().is_none());
        assert_eq!(args.known_fields(), 1);

        assert!(CodeArguments::from_value(&json!("python")).is_none());
    }

    #[test]
    fn test_code_arguments_ignores_non_string_fields() {
        let args = CodeArguments::from_value(&json!({"language": 3, "code": "print(1)"})).unwrap();
        assert!(args.language.is_none());
        assert_eq!(args.code.as_deref(), Some("print(1)"));
    }

    #[test]
    fn test_previous_role() {
        let mut transcript = Transcript::new();
        assert!(transcript.previous_role().is_none());
        transcript.push(Turn::user("hi"));
        transcript.push(Turn::Assistant(AssistantTurn::default()));
        assert_eq!(transcript.previous_role(), Some(Role::User));
        assert!(transcript.last_assistant_mut().is_some());
    }

    #[test]
    fn test_turn_serializes_with_role_tag() {
        let turn = Turn::function_result("No output");
        let value = serde_json::to_value(&turn).unwrap();
        assert_eq!(value["role"], "function");
        assert_eq!(value["name"], "run_code");
        assert_eq!(value["content"], "No output");
    }
}
