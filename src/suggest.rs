//! Commit message suggestions from an external text-generation service.
//!
//! The service itself sits behind [`CommitSuggester`]. This module owns the
//! prompt, the retry policy and the parsing of the answer into a
//! [`CommitDraft`]. Suggestions are best-effort: every failure degrades to
//! `None` and the draft is written by hand instead.

use crate::commit::CommitDraft;
use crate::config::AiSettings;
use error_set::error_set;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

error_set! {
    /// Failures reported by a suggestion service
    SuggestError := {
        #[display("Suggestion service unavailable: {message}")]
        Unavailable { message: String },
        #[display("Suggestion service returned an empty answer")]
        EmptyResponse,
    }
}

pub trait CommitSuggester: Send + Sync {
    fn suggest(&self, prompt: &str) -> impl Future<Output = Result<String, SuggestError>> + Send;
}

const PROMPT: &str = "Analyze the following git diff and generate a concise and conventional commit message. \
The format must be: type(scope): subject
- The 'type' must be one of: feat, fix, docs, style, refactor, test, chore.
- The 'scope' is optional.
- The subject should be a short, imperative summary.
- If necessary, add a blank line followed by a more detailed body explaining the 'why' and 'how'.
- Do not include the diff in your response, only the commit message.
--- DIFF ---
";

/// Prompt for `staged_diff`, cut to at most `max_diff_chars` characters of diff.
pub fn build_prompt(staged_diff: &str, max_diff_chars: usize) -> String {
    let mut prompt = String::from(PROMPT);
    match staged_diff.char_indices().nth(max_diff_chars) {
        Some((cut, _)) => {
            prompt.push_str(&staged_diff[..cut]);
            prompt.push_str("\n[diff truncated]\n");
        }
        None => prompt.push_str(staged_diff),
    }
    prompt
}

/// Ask `suggester` for a draft of the staged changes.
///
/// Retries up to `settings.max_retries` times. Returns `None` when no API
/// key is configured, when there is nothing staged or every attempt failed.
pub async fn suggest_draft<S: CommitSuggester>(
    suggester: &S,
    staged_diff: &str,
    settings: &AiSettings,
) -> Option<CommitDraft> {
    if !settings.enabled() {
        debug!("Commit suggestions disabled: no API key configured");
        return None;
    }
    if staged_diff.trim().is_empty() {
        info!("No staged changes to analyze");
        return None;
    }

    let prompt = build_prompt(staged_diff, settings.max_diff_chars);
    let attempts = settings.max_retries.max(1);
    for attempt in 1..=attempts {
        info!(attempt, attempts, "Requesting commit suggestion");
        let result = match suggester.suggest(&prompt).await {
            Ok(text) if text.trim().is_empty() => Err(SuggestError::EmptyResponse),
            other => other,
        };
        match result {
            Ok(text) => return Some(CommitDraft::from_suggestion(&text)),
            Err(e) => {
                warn!(attempt, error = %e, "Commit suggestion failed");
                if attempt < attempts {
                    tokio::time::sleep(Duration::from_millis(settings.retry_delay_ms)).await;
                }
            }
        }
    }
    warn!("Suggestion service unavailable after {attempts} attempts");
    None
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::commit::CommitType;
    use std::sync::Mutex;

    /// Answers from a script, one entry per call
    struct Scripted {
        answers: Mutex<Vec<Result<String, SuggestError>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(answers: Vec<Result<String, SuggestError>>) -> Self {
            Self {
                answers: Mutex::new(answers.into_iter().rev().collect()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.prompts.lock().unwrap().len()
        }
    }

    impl CommitSuggester for Scripted {
        async fn suggest(&self, prompt: &str) -> Result<String, SuggestError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.answers
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(Err(SuggestError::EmptyResponse))
        }
    }

    fn settings() -> AiSettings {
        AiSettings {
            api_key: Some("key".into()),
            max_retries: 3,
            retry_delay_ms: 1,
            max_diff_chars: 50,
        }
    }

    fn unavailable() -> Result<String, SuggestError> {
        Err(SuggestError::Unavailable {
            message: "503".into(),
        })
    }

    #[tokio::test]
    async fn retries_until_an_answer_arrives() {
        let suggester = Scripted::new(vec![unavailable(), Ok("feat: add stash view".into())]);
        let draft = suggest_draft(&suggester, "diff --git a/x b/x", &settings())
            .await
            .unwrap();
        assert_eq!(draft.kind, Some(CommitType::Feat));
        assert_eq!(draft.subject, "add stash view");
        assert_eq!(suggester.calls(), 2);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let suggester = Scripted::new(vec![unavailable(), unavailable(), unavailable(), Ok("x".into())]);
        assert_eq!(suggest_draft(&suggester, "diff", &settings()).await, None);
        assert_eq!(suggester.calls(), 3);
    }

    #[tokio::test]
    async fn nothing_staged_makes_no_request() {
        let suggester = Scripted::new(vec![Ok("feat: x".into())]);
        assert_eq!(suggest_draft(&suggester, "  \n", &settings()).await, None);
        assert_eq!(suggester.calls(), 0);
    }

    #[tokio::test]
    async fn missing_api_key_makes_no_request() {
        let suggester = Scripted::new(vec![Ok("feat: x".into())]);
        let settings = AiSettings {
            api_key: None,
            ..settings()
        };
        assert_eq!(suggest_draft(&suggester, "diff --git a/x b/x", &settings).await, None);
        assert_eq!(suggester.calls(), 0);
    }

    #[test]
    fn prompt_truncates_long_diffs() {
        let diff = "é".repeat(80);
        let prompt = build_prompt(&diff, 50);
        assert!(prompt.starts_with("Analyze the following git diff"));
        assert!(prompt.contains(&"é".repeat(50)));
        assert!(!prompt.contains(&"é".repeat(51)));
        assert!(prompt.ends_with("[diff truncated]\n"));
    }
}
