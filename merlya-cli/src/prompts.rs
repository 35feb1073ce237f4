//! Interactive prompting through dialoguer: confidential credential entry
//! and the two confirmation shapes the risk policy can demand.

use async_trait::async_trait;
use dialoguer::{Confirm, Input, Password};
use merlya::dispatch::PromptHandler;
use merlya::types::DispatchError;

pub struct DialoguerPrompts;

#[async_trait]
impl PromptHandler for DialoguerPrompts {
    async fn confidential(&self, prompt: &str) -> Result<String, DispatchError> {
        let prompt = prompt.to_string();
        tokio::task::spawn_blocking(move || {
            Password::new()
                .with_prompt(prompt)
                .allow_empty_password(true)
                .interact()
                .map_err(|e| DispatchError::Validation(format!("prompt failed: {e}")))
        })
        .await
        .map_err(|_| DispatchError::Cancelled { deadline: false })?
    }
}

/// Plain yes/no confirmation for moderate-risk commands.
pub fn confirm(question: &str) -> bool {
    Confirm::new()
        .with_prompt(question)
        .default(false)
        .interact()
        .unwrap_or(false)
}

/// Phrase-echo confirmation for critical commands: the user must type the
/// expected phrase (the host name) verbatim.
pub fn confirm_with_phrase(question: &str, phrase: &str) -> bool {
    let entered: Result<String, _> = Input::new()
        .with_prompt(format!("{question} [{phrase}]"))
        .allow_empty(true)
        .interact_text();
    entered.map(|text| text.trim() == phrase).unwrap_or(false)
}
