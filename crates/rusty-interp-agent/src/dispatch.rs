//! Fixed function-result messages and candidate resolution for dispatch.

use rusty_interp_core::transcript::Invocation;

/// Function result recorded when the user declines to run code.
pub const DECLINED_MESSAGE: &str = "User decided not to run this code.";

/// Function result sent back when the arguments never became valid JSON.
pub const CORRECTIVE_MESSAGE: &str = "Your function call could not be parsed. Please use ONLY the `run_code` function, which takes two parameters: `code` and `language`. Your response should be formatted as a JSON.";

/// Function result recorded when an invocation is interrupted before it
/// produced a result.
pub const INTERRUPTED_MESSAGE: &str = "Execution was interrupted before it produced a result.";

/// Function result for a run that printed nothing.
pub const NO_OUTPUT: &str = "No output";

/// Language assumed for raw argument text from a local model.
pub const LOCAL_FALLBACK_LANGUAGE: &str = "python";

/// What a finished invocation asks to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Candidate {
    Runnable { language: String, code: String },
    Unparsable,
}

impl Candidate {
    /// Resolve the invocation at stream end.
    ///
    /// Both fields must be present in the parsed arguments. With `local`
    /// set, text that never parsed is run as Python instead of being
    /// bounced back to the model.
    pub fn resolve(invocation: &Invocation, local: bool) -> Self {
        let parsed = invocation.parsed.as_ref();
        if let Some((language, code)) = parsed.and_then(|p| p.complete()) {
            return Candidate::Runnable {
                language: language.to_string(),
                code: code.to_string(),
            };
        }
        if local {
            let code = parsed
                .and_then(|p| p.code.clone())
                .unwrap_or_else(|| invocation.arguments.clone());
            if !code.trim().is_empty() {
                return Candidate::Runnable {
                    language: LOCAL_FALLBACK_LANGUAGE.to_string(),
                    code,
                };
            }
        }
        Candidate::Unparsable
    }
}

/// Language and code to show when asking for confirmation.
pub fn preview(invocation: &Invocation, candidate: &Candidate) -> (String, String) {
    match candidate {
        Candidate::Runnable { language, code } => (language.clone(), code.clone()),
        Candidate::Unparsable => {
            let parsed = invocation.parsed.as_ref();
            (
                parsed.and_then(|p| p.language.clone()).unwrap_or_default(),
                parsed
                    .and_then(|p| p.code.clone())
                    .unwrap_or_else(|| invocation.arguments.clone()),
            )
        }
    }
}

/// Function-result content for a backend's output.
pub fn output_content(output: String) -> String {
    if output.is_empty() {
        NO_OUTPUT.to_string()
    } else {
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusty_interp_core::transcript::CodeArguments;

    fn invocation(arguments: &str, language: Option<&str>, code: Option<&str>) -> Invocation {
        Invocation {
            arguments: arguments.into(),
            parsed: (language.is_some() || code.is_some()).then(|| CodeArguments {
                language: language.map(Into::into),
                code: code.map(Into::into),
            }),
            ..Invocation::default()
        }
    }

    #[test]
    fn test_complete_arguments_are_runnable() {
        let inv = invocation("{...}", Some("shell"), Some("ls"));
        assert_eq!(
            Candidate::resolve(&inv, false),
            Candidate::Runnable {
                language: "shell".into(),
                code: "ls".into()
            }
        );
    }

    #[test]
    fn test_missing_field_is_unparsable() {
        let inv = invocation("{\"language\": \"python\"}", Some("python"), None);
        assert_eq!(Candidate::resolve(&inv, false), Candidate::Unparsable);
        let inv = invocation("print(1)", None, None);
        assert_eq!(Candidate::resolve(&inv, false), Candidate::Unparsable);
    }

    #[test]
    fn test_local_runs_raw_text_as_python() {
        let inv = invocation("print('raw')", None, None);
        assert_eq!(
            Candidate::resolve(&inv, true),
            Candidate::Runnable {
                language: "python".into(),
                code: "print('raw')".into()
            }
        );
        assert_eq!(
            Candidate::resolve(&invocation("  ", None, None), true),
            Candidate::Unparsable
        );
    }

    #[test]
    fn test_preview_falls_back_to_raw_text() {
        let inv = invocation("garbage", None, None);
        let (language, code) = preview(&inv, &Candidate::Unparsable);
        assert_eq!(language, "");
        assert_eq!(code, "garbage");
    }

    #[test]
    fn test_empty_output_becomes_sentinel() {
        assert_eq!(output_content(String::new()), "No output");
        assert_eq!(output_content("\n".into()), "\n");
        assert_eq!(output_content("42".into()), "42");
    }
}
