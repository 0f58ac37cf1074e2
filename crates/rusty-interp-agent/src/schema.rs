//! The single function advertised to the model.

use rusty_interp_backends::Language;
use rusty_interp_core::transcript::RUN_CODE;
use serde_json::json;

pub fn run_code_schema() -> serde_json::Value {
    let languages: Vec<&str> = Language::ALL.iter().map(|l| l.as_str()).collect();
    json!({
        "name": RUN_CODE,
        "description": "Executes code on the user's machine and returns the output",
        "parameters": {
            "type": "object",
            "properties": {
                "language": {
                    "type": "string",
                    "description": "The programming language",
                    "enum": languages,
                },
                "code": {
                    "type": "string",
                    "description": "The code to execute",
                },
            },
            "required": ["language", "code"],
        },
    })
}
