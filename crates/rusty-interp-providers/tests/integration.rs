//! Provider integration tests — real API calls.
//!
//! These tests are skipped when `OPENAI_API_KEY` is not set.
//! Run with: `cargo test -p rusty-interp-providers --test integration`

use rusty_interp_core::merge::{FinishReason, merge_delta};
use rusty_interp_core::transcript::{AssistantTurn, Turn};
use rusty_interp_providers::openai::OpenAiProvider;
use rusty_interp_providers::{CompletionRequest, Credentials, LlmProvider};
use serde_json::json;
use tokio_stream::StreamExt;

fn openai_key() -> Option<String> {
    std::env::var("OPENAI_API_KEY")
        .ok()
        .filter(|k| !k.is_empty())
}

fn run_code_schema() -> serde_json::Value {
    json!({
        "name": "run_code",
        "description": "Executes code on the user's machine and returns the output",
        "parameters": {
            "type": "object",
            "properties": {
                "language": { "type": "string", "enum": ["python", "shell"] },
                "code": { "type": "string" }
            },
            "required": ["language", "code"]
        }
    })
}

#[tokio::test]
async fn test_openai_streams_an_invocation() {
    let Some(api_key) = openai_key() else {
        eprintln!("Skipping: OPENAI_API_KEY not set");
        return;
    };

    let provider = OpenAiProvider::openai(None);
    let request = CompletionRequest {
        model: "gpt-4o-mini".into(),
        messages: provider.format_messages(&[Turn::user(
            "Use run_code to print the number 42 with python.",
        )]),
        temperature: Some(0.0),
        functions: vec![run_code_schema()],
        system: Some("Always call run_code when asked to run code.".into()),
    };

    let stream = provider
        .stream(&request, &Credentials::ApiKey { api_key })
        .await
        .expect("stream creation failed");
    let mut stream = std::pin::pin!(stream);

    let mut turn = AssistantTurn::default();
    let mut finish = None;
    while let Some(fragment) = stream.next().await {
        let fragment = fragment.expect("stream chunk error");
        merge_delta(&mut turn, &fragment.delta);
        if fragment.finish_reason.is_some() {
            finish = fragment.finish_reason;
        }
    }

    assert_eq!(finish, Some(FinishReason::Invocation));
    let invocation = turn.invocation().expect("expected an invocation");
    assert!(invocation.arguments.contains("42"));
}
