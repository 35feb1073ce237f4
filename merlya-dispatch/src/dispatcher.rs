//! One logical operation, end to end.
//!
//! `run_on_host`: resolve the target, expand secret references (resolved
//! mode), classify risk and apply policy, consult the loop detector, pass
//! the breaker, acquire a session, apply elevation, execute under the
//! command deadline, then record the outcome to audit, breaker, trace and
//! health; returning the output with a redacted command preimage.
//!
//! The elevation credential is fetched before any session is acquired: a
//! missing credential must fail without opening a socket.

use crate::context::ExecutionContext;
use crate::metrics::Metrics;
use merlya_breaker::FailureKind;
use merlya_policy::{ConfirmationGiven, RiskAssessment, confirmation_requirement};
use merlya_secret::{ReferenceSource, ResolveMode, SecretError, SecretValue, resolve_references};
use merlya_ssh::{SessionHandle, SshError, apply_elevation};
use merlya_types::{
    AuditOutcome, AuditRecord, DispatchError, HealthStatus, Host, ResultKind, SecretKey, ToolCall,
};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Per-call options for [`Dispatcher::run_on_host`].
#[derive(Debug, Clone)]
pub struct ExecOptions {
    /// Who is asking; lands in the audit record.
    pub actor: String,
    /// Confirmation the caller has already obtained.
    pub confirmation: ConfirmationGiven,
    /// Explicit opt-in required for critical commands under `--yes`.
    pub allow_critical: bool,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            actor: "user".to_string(),
            confirmation: ConfirmationGiven::None,
            allow_critical: false,
        }
    }
}

/// Outcome of a completed remote command.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecResult {
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Remote exit code.
    pub exit_code: i32,
    /// Wall-clock execution time.
    pub duration: Duration,
    /// The command preimage with secret references redacted; safe for
    /// logs and for any LLM-bound rendering.
    pub command: String,
    /// The risk classification that permitted the run.
    pub risk: RiskAssessment,
}

/// The orchestrator. Cheap to clone per call site; all state lives in the
/// shared context.
pub struct Dispatcher {
    ctx: Arc<ExecutionContext>,
}

impl Dispatcher {
    /// A dispatcher over `ctx`.
    pub fn new(ctx: Arc<ExecutionContext>) -> Self {
        Self { ctx }
    }

    /// The shared context.
    pub fn context(&self) -> &Arc<ExecutionContext> {
        &self.ctx
    }

    /// Redact text for a language model: secret references stay literal,
    /// config variables and host aliases resolve. Never fails; unknown
    /// references are left as typed.
    pub fn redact_for_llm(&self, text: &str) -> String {
        resolve_references(text, ResolveMode::Redacted, &CtxSource(&self.ctx))
            .unwrap_or_else(|_| text.to_string())
    }

    /// Run `command` on the host named by `host_ref`.
    pub async fn run_on_host(
        &self,
        host_ref: &str,
        command: &str,
        options: ExecOptions,
        cancel: CancellationToken,
    ) -> Result<ExecResult, DispatchError> {
        let ctx = &self.ctx;
        let _inflight = ctx
            .inflight
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| DispatchError::Cancelled { deadline: false })?;

        // 1. resolve the target
        let host = self.resolve_host(host_ref)?;

        // 2. expand secret references for execution; keep a redacted copy
        //    for everything that may be logged or shown
        let resolved = resolve_references(command, ResolveMode::Resolved, &CtxSource(ctx))
            .map_err(|e| match e {
                SecretError::NotFound { .. } => DispatchError::NotFound(e.to_string()),
                other => DispatchError::Validation(other.to_string()),
            })?;
        let redacted = self.redact_for_llm(command);
        if resolved != redacted {
            Metrics::bump(&ctx.metrics.secrets_resolved);
        }
        let preimage_hash = sha256_hex(&resolved);
        let args_hash = sha256_hex(&format!("{}\0{resolved}", host.name));

        // 3. classify and apply policy
        let assessment = ctx.classifier.classify(&resolved);
        let requirement =
            confirmation_requirement(assessment.level, &ctx.config.exec, options.allow_critical);
        if !options.confirmation.satisfies(requirement) {
            self.record_blocked(&options.actor, &host, &preimage_hash, "confirmation_required");
            self.observe(&args_hash, ResultKind::Blocked, Duration::ZERO);
            return Err(DispatchError::ConfirmationRequired {
                level: assessment.level.as_str().to_string(),
                rationale: assessment.rationale,
            });
        }

        // 4. loop detector
        if let Some(signal) = ctx
            .loops
            .lock()
            .expect("loop detector lock")
            .check("run_on_host", &args_hash)
        {
            Metrics::bump(&ctx.metrics.loop_signals);
            self.record_blocked(&options.actor, &host, &preimage_hash, "loop_redirect");
            info!(host = %host.name, "loop detected: {}", signal.advisory);
            return Err(DispatchError::LoopRedirect {
                advisory: signal.advisory,
            });
        }

        // elevation credential first: a missing credential must fail
        // before any socket is opened
        let credential = self.elevation_credential(&host).await?;
        let elevated = apply_elevation(&host, &resolved, credential.as_deref()).map_err(|e| {
            match e {
                SshError::ElevationCredentialMissing { key } => {
                    DispatchError::ElevationCredentialMissing { key }
                }
                other => DispatchError::Validation(other.to_string()),
            }
        })?;

        // 5 + 6. breaker, then session
        let session = self.acquire_session(&host, &options, &preimage_hash, &cancel).await?;

        // 7. execute under the command deadline
        let timeout = ctx.config.ssh.command_timeout();
        let stdin = elevated.stdin.as_ref().map(|z| &z[..]);
        let started = Instant::now();
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                // stdin bytes already sent cannot be un-sent; the session
                // is unsafe to reuse
                session.mark_dead();
                ctx.breakers
                    .breaker(&host.name)
                    .lock()
                    .expect("breaker lock")
                    .abort_probe();
                self.record_cancelled(&options.actor, &host, &preimage_hash, false);
                self.observe(&args_hash, ResultKind::Blocked, started.elapsed());
                return Err(DispatchError::Cancelled { deadline: false });
            }
            result = session.transport().exec(&elevated.command, stdin, timeout) => result,
        };
        let method = elevated.method;
        let stdin_used = elevated.stdin_used();
        let credential_key = elevated.credential_key.clone();
        drop(elevated); // zeroes the password buffer

        // 8 + 9. record and return
        let breaker = ctx.breakers.breaker(&host.name);
        match outcome {
            Ok(output) => {
                breaker.lock().expect("breaker lock").record_success();
                session.release();
                let _ = ctx.store.record_health(
                    &host.name,
                    HealthStatus::Healthy,
                    Some(chrono_now()),
                );
                Metrics::bump(&ctx.metrics.commands_run);
                let result_kind = if output.exit_code == 0 {
                    ResultKind::Ok
                } else {
                    ResultKind::Error
                };
                self.observe(&args_hash, result_kind, output.duration);

                let mut record = AuditRecord::new(
                    options.actor.clone(),
                    "exec",
                    host.name.as_str(),
                    if output.exit_code == 0 {
                        AuditOutcome::Ok
                    } else {
                        AuditOutcome::Failed
                    },
                );
                record.command_hash = Some(preimage_hash);
                record.duration_ms = Some(output.duration.as_millis() as u64);
                record.metadata = serde_json::json!({
                    "method": method.as_str(),
                    "stdin_used": stdin_used,
                    "credential_key": credential_key,
                    "exit_code": output.exit_code,
                    "risk": assessment.level.as_str(),
                });
                ctx.audit.append(record);

                Ok(ExecResult {
                    stdout: output.stdout,
                    stderr: output.stderr,
                    exit_code: output.exit_code,
                    duration: output.duration,
                    command: redacted,
                    risk: assessment,
                })
            }
            Err(SshError::Timeout(_)) => {
                // a fired deadline behaves as cancellation plus a breaker
                // failure; the session cannot be reused
                session.mark_dead();
                breaker
                    .lock()
                    .expect("breaker lock")
                    .record_failure(FailureKind::Timeout);
                self.after_counted_failure(&host);
                Metrics::bump(&ctx.metrics.commands_cancelled);
                self.record_cancelled(&options.actor, &host, &preimage_hash, true);
                self.observe(&args_hash, ResultKind::Error, started.elapsed());
                Err(DispatchError::Cancelled { deadline: true })
            }
            Err(e) => {
                session.mark_dead();
                let kind = match &e {
                    SshError::Auth(_) => FailureKind::Auth,
                    _ => FailureKind::Network,
                };
                breaker.lock().expect("breaker lock").record_failure(kind);
                self.after_counted_failure(&host);
                Metrics::bump(&ctx.metrics.commands_failed);
                self.observe(&args_hash, ResultKind::Error, started.elapsed());

                let mut record = AuditRecord::new(
                    options.actor.clone(),
                    "exec",
                    host.name.as_str(),
                    AuditOutcome::Failed,
                );
                record.command_hash = Some(preimage_hash);
                record.metadata = serde_json::json!({ "error": e.to_string() });
                ctx.audit.append(record);

                Err(match e {
                    SshError::Auth(msg) => DispatchError::AuthFailure(msg),
                    other => DispatchError::Network(other.to_string()),
                })
            }
        }
    }

    /// Upload a local file to `host_ref`. No elevation applies; the remote
    /// path must be writable by the SSH user.
    pub async fn upload(
        &self,
        host_ref: &str,
        local: &std::path::Path,
        remote: &str,
        options: ExecOptions,
        cancel: CancellationToken,
    ) -> Result<Duration, DispatchError> {
        self.transfer(host_ref, options, cancel, "upload", |session| async move {
            session.transport().upload(local, remote).await?;
            Ok(session)
        })
        .await
    }

    /// Download a remote file from `host_ref`.
    pub async fn download(
        &self,
        host_ref: &str,
        remote: &str,
        local: &std::path::Path,
        options: ExecOptions,
        cancel: CancellationToken,
    ) -> Result<Duration, DispatchError> {
        self.transfer(host_ref, options, cancel, "download", |session| async move {
            session.transport().download(remote, local).await?;
            Ok(session)
        })
        .await
    }

    /// Run a low-risk `uname -a` against the host and store the trimmed
    /// output as its observed OS snapshot.
    pub async fn probe_host(
        &self,
        host_ref: &str,
        cancel: CancellationToken,
    ) -> Result<serde_json::Value, DispatchError> {
        let result = self
            .run_on_host(host_ref, "uname -a", ExecOptions::default(), cancel)
            .await?;
        let host = self.resolve_host(host_ref)?;
        let os_info = serde_json::json!({ "uname": result.stdout.trim() });
        self.ctx
            .store
            .record_os_info(&host.name, &os_info)
            .map_err(|e| DispatchError::Persistence(e.to_string()))?;
        Ok(os_info)
    }

    fn resolve_host(&self, host_ref: &str) -> Result<Host, DispatchError> {
        self.ctx
            .store
            .get_host(host_ref)
            .map_err(|e| DispatchError::Persistence(e.to_string()))?
            .ok_or_else(|| DispatchError::NotFound(format!("host {host_ref:?}")))
    }

    async fn acquire_session(
        &self,
        host: &Host,
        options: &ExecOptions,
        preimage_hash: &str,
        cancel: &CancellationToken,
    ) -> Result<SessionHandle, DispatchError> {
        let ctx = &self.ctx;
        let broker = ctx.broker();
        let acquired = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                ctx.breakers
                    .breaker(&host.name)
                    .lock()
                    .expect("breaker lock")
                    .abort_probe();
                self.record_cancelled(&options.actor, host, preimage_hash, false);
                return Err(DispatchError::Cancelled { deadline: false });
            }
            result = ctx.pool.acquire(host, &broker) => result,
        };
        acquired.map_err(|e| match e {
            SshError::BreakerOpen { retry_in } => {
                Metrics::bump(&ctx.metrics.breaker_rejections);
                self.record_blocked(&options.actor, host, preimage_hash, "breaker_open");
                DispatchError::BreakerOpen {
                    host: host.name.to_string(),
                    retry_in: Some(retry_in),
                }
            }
            SshError::Auth(msg) => {
                self.after_counted_failure(host);
                DispatchError::AuthFailure(msg)
            }
            SshError::JumpChain(msg) => DispatchError::Validation(msg),
            other => {
                self.after_counted_failure(host);
                DispatchError::Network(other.to_string())
            }
        })
    }

    /// Interactive elevation-credential resolution: resident cache, then
    /// keyring, then a confidential prompt when a front-end is attached.
    /// Three empty or aborted entries give up with an auth failure that
    /// counts as one breaker failure.
    async fn elevation_credential(
        &self,
        host: &Host,
    ) -> Result<Option<Arc<SecretValue>>, DispatchError> {
        let ctx = &self.ctx;
        let Some(key_str) = host.elevation_method.credential_key(&host.name) else {
            return Ok(None);
        };
        let key = SecretKey::parse(&key_str)
            .map_err(|e| DispatchError::Validation(e.to_string()))?;

        if let Some(value) = ctx.secrets.elevation_get(&key) {
            return Ok(Some(value));
        }
        let Some(prompts) = ctx.prompts.as_ref() else {
            return Err(DispatchError::ElevationCredentialMissing { key: key_str });
        };

        let label = format!(
            "Elevation password for {} ({})",
            host.name,
            host.elevation_method.as_str()
        );
        for attempt in 1..=3u8 {
            let entered = prompts.confidential(&label).await?;
            if entered.is_empty() {
                debug!(host = %host.name, attempt, "empty elevation password entry");
                continue;
            }
            let value = SecretValue::from_string(entered);
            ctx.secrets
                .set(&key, value)
                .map_err(|e| DispatchError::Validation(e.to_string()))?;
            // read back through the cache so TTL accounting starts now
            if let Some(value) = ctx.secrets.elevation_get(&key) {
                return Ok(Some(value));
            }
        }
        self.ctx
            .breakers
            .breaker(&host.name)
            .lock()
            .expect("breaker lock")
            .record_failure(FailureKind::Auth);
        Err(DispatchError::AuthFailure(format!(
            "no elevation password entered for {}",
            host.name
        )))
    }

    async fn transfer<F, Fut>(
        &self,
        host_ref: &str,
        options: ExecOptions,
        cancel: CancellationToken,
        action: &str,
        op: F,
    ) -> Result<Duration, DispatchError>
    where
        F: FnOnce(SessionHandle) -> Fut,
        Fut: std::future::Future<Output = Result<SessionHandle, SshError>>,
    {
        let ctx = &self.ctx;
        let _inflight = ctx
            .inflight
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| DispatchError::Cancelled { deadline: false })?;
        let host = self.resolve_host(host_ref)?;
        let session = self.acquire_session(&host, &options, "", &cancel).await?;
        let started = Instant::now();

        let breaker = ctx.breakers.breaker(&host.name);
        match op(session).await {
            Ok(session) => {
                breaker.lock().expect("breaker lock").record_success();
                session.release();
                Metrics::bump(&ctx.metrics.transfers);
                let mut record = AuditRecord::new(
                    options.actor,
                    action,
                    host.name.as_str(),
                    AuditOutcome::Ok,
                );
                record.duration_ms = Some(started.elapsed().as_millis() as u64);
                ctx.audit.append(record);
                Ok(started.elapsed())
            }
            Err(e) => {
                // the handle was consumed by the failed future; the pool
                // marks the session idle on drop and the next keep-alive
                // probe will cull it if the transport died
                let kind = match &e {
                    SshError::Auth(_) => FailureKind::Auth,
                    SshError::Timeout(_) => FailureKind::Timeout,
                    _ => FailureKind::Network,
                };
                breaker.lock().expect("breaker lock").record_failure(kind);
                self.after_counted_failure(&host);
                let mut record = AuditRecord::new(
                    options.actor,
                    action,
                    host.name.as_str(),
                    AuditOutcome::Failed,
                );
                record.metadata = serde_json::json!({ "error": e.to_string() });
                ctx.audit.append(record);
                Err(match e {
                    SshError::Io(io) => DispatchError::Persistence(io.to_string()),
                    SshError::Auth(msg) => DispatchError::AuthFailure(msg),
                    other => DispatchError::Network(other.to_string()),
                })
            }
        }
    }

    /// After a counted breaker failure: if the breaker just opened, mark
    /// the host unreachable and audit the trip.
    fn after_counted_failure(&self, host: &Host) {
        let breaker = self.ctx.breakers.breaker(&host.name);
        let open = breaker.lock().expect("breaker lock").is_open();
        if open {
            warn!(host = %host.name, "breaker tripped open");
            let _ = self
                .ctx
                .store
                .record_health(&host.name, HealthStatus::Unreachable, None);
            self.ctx.audit.append(AuditRecord::new(
                "process",
                "breaker_trip",
                host.name.as_str(),
                AuditOutcome::Blocked,
            ));
        }
    }

    fn record_blocked(&self, actor: &str, host: &Host, preimage_hash: &str, why: &str) {
        Metrics::bump(&self.ctx.metrics.commands_blocked);
        let mut record =
            AuditRecord::new(actor, "exec", host.name.as_str(), AuditOutcome::Blocked);
        record.command_hash = (!preimage_hash.is_empty()).then(|| preimage_hash.to_string());
        record.metadata = serde_json::json!({ "reason": why });
        self.ctx.audit.append(record);
    }

    fn record_cancelled(&self, actor: &str, host: &Host, preimage_hash: &str, deadline: bool) {
        Metrics::bump(&self.ctx.metrics.commands_cancelled);
        let mut record =
            AuditRecord::new(actor, "exec", host.name.as_str(), AuditOutcome::Cancelled);
        record.command_hash = (!preimage_hash.is_empty()).then(|| preimage_hash.to_string());
        record.metadata = serde_json::json!({ "deadline": deadline });
        self.ctx.audit.append(record);
    }

    fn observe(&self, args_hash: &str, result_kind: ResultKind, duration: Duration) {
        let call = ToolCall {
            timestamp_ms: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0),
            tool_name: "run_on_host".to_string(),
            arguments_hash: args_hash.to_string(),
            result_kind,
            duration_ms: duration.as_millis() as u64,
        };
        self.ctx
            .loops
            .lock()
            .expect("loop detector lock")
            .observe(call);
    }
}

/// Reference lookups over the context: resident secrets classify as
/// secret, inventory variables and host aliases resolve as plain text.
struct CtxSource<'a>(&'a Arc<ExecutionContext>);

impl ReferenceSource for CtxSource<'_> {
    fn plain(&self, name: &str) -> Option<String> {
        if let Ok(Some(value)) = self.0.store.var_get(name) {
            return Some(value);
        }
        if let Ok(Some(host)) = self.0.store.get_host(name) {
            return Some(host.name.to_string());
        }
        None
    }

    fn is_secret(&self, name: &str) -> bool {
        let Ok(key) = SecretKey::parse(name) else {
            return false;
        };
        if key.is_elevation_key() || key.is_passphrase_key() {
            return true;
        }
        self.0.secrets.names().contains(&key)
    }

    fn secret(&self, name: &str) -> Option<Arc<SecretValue>> {
        let key = SecretKey::parse(name).ok()?;
        self.0.secrets.get(&key)
    }

    fn candidates(&self, prefix: &str) -> Vec<String> {
        let lowered = prefix.to_ascii_lowercase();
        let mut names = self.0.secrets.candidates(prefix);
        if let Ok(vars) = self.0.store.var_names() {
            names.extend(
                vars.into_iter()
                    .filter(|v| v.to_ascii_lowercase().starts_with(&lowered)),
            );
        }
        if let Ok(hosts) = self.0.store.host_names() {
            names.extend(
                hosts
                    .into_iter()
                    .map(|h| h.as_str().to_string())
                    .filter(|h| h.starts_with(&lowered)),
            );
        }
        names.sort();
        names.dedup();
        names.truncate(5);
        names
    }
}

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

fn chrono_now() -> chrono::DateTime<chrono::Utc> {
    chrono::Utc::now()
}
