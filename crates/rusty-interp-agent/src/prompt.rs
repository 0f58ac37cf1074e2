//! System prompt builder.

use std::path::Path;

pub const DEFAULT_SYSTEM_MESSAGE: &str = "You are Rusty Interpreter, a world-class programmer that can complete any goal by executing code.
First, write a plan. Always recap the plan between each code block, since you have extreme short-term memory loss and need to recap the plan to retain it.
When you send a message containing code to run_code, it will be executed on the user's machine. The user has given you full and complete permission to execute any code necessary to complete the task.
State persists between runs of the same language. Use only the `run_code` function, with `language` and `code` formatted as JSON.
If you want to send data between languages, save it to a file.
Write messages to the user in Markdown. Prefer small, informed steps: run a little code, look at the output, then continue.";

/// Build the system prompt: base message plus a `[User Info]` section.
pub fn build_system_prompt(custom_system_message: Option<&str>, working_dir: &Path) -> String {
    let base = custom_system_message.unwrap_or(DEFAULT_SYSTEM_MESSAGE);
    format!("{}\n\n{}", base.trim(), user_info(working_dir))
}

fn user_info(working_dir: &Path) -> String {
    let name = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".into());
    let now = chrono::Utc::now();
    format!(
        "[User Info]\nName: {name}\nCWD: {}\nOS: {}\nCurrent time: {}",
        working_dir.display(),
        std::env::consts::OS,
        now.format("%Y-%m-%d %H:%M:%S UTC")
    )
}
