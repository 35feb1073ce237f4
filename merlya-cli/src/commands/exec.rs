//! One-shot execution with interactive confirmation escalation: a gated
//! command re-runs once the user grants what the policy demands.

use crate::i18n::{Messages, Msg};
use crate::prompts;
use merlya::dispatch::{Dispatcher, ExecOptions};
use merlya::policy::ConfirmationGiven;
use merlya::types::DispatchError;
use tokio_util::sync::CancellationToken;

pub struct ExecRequest<'a> {
    pub host: &'a str,
    pub command: &'a str,
    pub allow_critical: bool,
    pub interactive: bool,
}

/// Run a command, escalating through confirmation prompts when the risk
/// policy asks for them. Returns the remote exit code.
pub async fn run(
    dispatcher: &Dispatcher,
    messages: &Messages,
    request: ExecRequest<'_>,
    cancel: CancellationToken,
) -> Result<i32, DispatchError> {
    let mut options = ExecOptions {
        allow_critical: request.allow_critical,
        ..ExecOptions::default()
    };

    loop {
        let attempt = dispatcher
            .run_on_host(request.host, request.command, options.clone(), cancel.clone())
            .await;
        match attempt {
            Ok(result) => {
                if !result.stdout.is_empty() {
                    print!("{}", result.stdout);
                }
                if !result.stderr.is_empty() {
                    eprint!("{}", result.stderr);
                }
                return Ok(result.exit_code);
            }
            Err(DispatchError::ConfirmationRequired { level, rationale })
                if request.interactive && options.confirmation == ConfirmationGiven::None =>
            {
                eprintln!("[{level}] {rationale}");
                let granted = if level == "critical" {
                    if prompts::confirm_with_phrase(
                        messages.get(Msg::ConfirmCriticalPhrase),
                        request.host,
                    ) {
                        Some(ConfirmationGiven::ConfirmedWithPhrase)
                    } else {
                        eprintln!("{}", messages.get(Msg::PhraseMismatch));
                        None
                    }
                } else if prompts::confirm(messages.get(Msg::ConfirmModerate)) {
                    Some(ConfirmationGiven::Confirmed)
                } else {
                    None
                };
                match granted {
                    Some(confirmation) => {
                        options.confirmation = confirmation;
                        continue;
                    }
                    None => {
                        return Err(DispatchError::ConfirmationRequired { level, rationale });
                    }
                }
            }
            Err(e) => return Err(e),
        }
    }
}
