//! In-process transport double for pool and dispatcher tests.
//!
//! [`ScriptedTransport`] replays a queue of canned exec outcomes and
//! records every command and stdin payload it receives.
//! [`ScriptedConnector`] replays per-host connect plans so tests can drive
//! breaker and retry behavior without a network.

use crate::SshError;
use crate::transport::{
    CredentialBroker, ExecOutput, SessionTransport, TransportConnector,
};
use async_trait::async_trait;
use merlya_types::{Host, SshConfig};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One scripted exec outcome.
#[derive(Debug, Clone)]
pub enum ExecScript {
    /// Return this result.
    Ok {
        /// Canned stdout.
        stdout: String,
        /// Canned stderr.
        stderr: String,
        /// Canned exit code.
        exit_code: i32,
    },
    /// Fail with a network error.
    NetworkError(String),
    /// Take this long before succeeding; trips the caller's timeout when
    /// longer than the exec deadline.
    Hang(Duration),
}

impl ExecScript {
    /// Shorthand for a clean exit with the given stdout.
    pub fn ok(stdout: &str) -> Self {
        Self::Ok {
            stdout: stdout.to_string(),
            stderr: String::new(),
            exit_code: 0,
        }
    }

    /// Shorthand for a non-zero exit.
    pub fn exit(code: i32, stderr: &str) -> Self {
        Self::Ok {
            stdout: String::new(),
            stderr: stderr.to_string(),
            exit_code: code,
        }
    }
}

/// What one exec call received.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecRecord {
    /// The transmitted command line.
    pub command: String,
    /// The bytes piped on stdin, if any.
    pub stdin: Option<Vec<u8>>,
}

/// Scripted [`SessionTransport`].
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<ExecScript>>,
    records: Mutex<Vec<ExecRecord>>,
    keepalive_ok: AtomicBool,
    closed: AtomicBool,
}

impl ScriptedTransport {
    /// A transport that answers every exec with exit 0 and empty output.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            keepalive_ok: AtomicBool::new(true),
            ..Self::default()
        })
    }

    /// Queue an exec outcome. Outcomes replay in order; an empty queue
    /// answers exit 0 with empty output.
    pub fn push(self: &Arc<Self>, step: ExecScript) -> Arc<Self> {
        self.script.lock().expect("script lock").push_back(step);
        Arc::clone(self)
    }

    /// Make subsequent keep-alive probes succeed or fail.
    pub fn set_keepalive_ok(&self, ok: bool) {
        self.keepalive_ok.store(ok, Ordering::Relaxed);
    }

    /// Everything exec received, in order.
    pub fn records(&self) -> Vec<ExecRecord> {
        self.records.lock().expect("records lock").clone()
    }

    /// Just the transmitted command lines.
    pub fn commands(&self) -> Vec<String> {
        self.records().into_iter().map(|r| r.command).collect()
    }

    /// Whether `close` ran.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl SessionTransport for ScriptedTransport {
    async fn exec(
        &self,
        command: &str,
        stdin: Option<&[u8]>,
        timeout: Duration,
    ) -> Result<ExecOutput, SshError> {
        self.records.lock().expect("records lock").push(ExecRecord {
            command: command.to_string(),
            stdin: stdin.map(<[u8]>::to_vec),
        });
        let step = self.script.lock().expect("script lock").pop_front();
        match step {
            None => Ok(ExecOutput {
                stdout: String::new(),
                stderr: String::new(),
                exit_code: 0,
                duration: Duration::from_millis(1),
            }),
            Some(ExecScript::Ok {
                stdout,
                stderr,
                exit_code,
            }) => Ok(ExecOutput {
                stdout,
                stderr,
                exit_code,
                duration: Duration::from_millis(1),
            }),
            Some(ExecScript::NetworkError(message)) => Err(SshError::Network(message)),
            Some(ExecScript::Hang(delay)) => {
                if delay >= timeout {
                    tokio::time::sleep(timeout).await;
                    Err(SshError::Timeout(timeout))
                } else {
                    tokio::time::sleep(delay).await;
                    Ok(ExecOutput {
                        stdout: String::new(),
                        stderr: String::new(),
                        exit_code: 0,
                        duration: delay,
                    })
                }
            }
        }
    }

    async fn keepalive(&self) -> bool {
        !self.closed.load(Ordering::Relaxed) && self.keepalive_ok.load(Ordering::Relaxed)
    }

    async fn upload(&self, _local: &Path, remote: &str) -> Result<(), SshError> {
        self.records.lock().expect("records lock").push(ExecRecord {
            command: format!("sftp-upload {remote}"),
            stdin: None,
        });
        Ok(())
    }

    async fn download(&self, remote: &str, _local: &Path) -> Result<(), SshError> {
        self.records.lock().expect("records lock").push(ExecRecord {
            command: format!("sftp-download {remote}"),
            stdin: None,
        });
        Ok(())
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }
}

/// One scripted connect outcome.
pub enum ConnectPlan {
    /// Hand out this transport.
    Succeed(Arc<ScriptedTransport>),
    /// Fail with a network error.
    NetworkError,
    /// Fail with an authentication error.
    AuthError,
    /// Fail with a connect timeout.
    Timeout,
}

/// Scripted [`TransportConnector`].
#[derive(Default)]
pub struct ScriptedConnector {
    plans: Mutex<HashMap<String, VecDeque<ConnectPlan>>>,
    attempts: Mutex<Vec<Vec<String>>>,
}

impl ScriptedConnector {
    /// A connector that succeeds with a fresh default transport for any
    /// host without an explicit plan.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a connect outcome for `host`. Outcomes replay in order; an
    /// exhausted queue falls back to success with a default transport.
    pub fn plan(self: &Arc<Self>, host: &str, plan: ConnectPlan) -> Arc<Self> {
        self.plans
            .lock()
            .expect("plans lock")
            .entry(host.to_string())
            .or_default()
            .push_back(plan);
        Arc::clone(self)
    }

    /// The jump chains of every connect attempt, in order.
    pub fn attempts(&self) -> Vec<Vec<String>> {
        self.attempts.lock().expect("attempts lock").clone()
    }
}

#[async_trait]
impl TransportConnector for ScriptedConnector {
    async fn connect(
        &self,
        chain: &[Host],
        _broker: &dyn CredentialBroker,
        config: &SshConfig,
    ) -> Result<Arc<dyn SessionTransport>, SshError> {
        self.attempts
            .lock()
            .expect("attempts lock")
            .push(chain.iter().map(|h| h.name.to_string()).collect());
        let target = chain
            .last()
            .ok_or_else(|| SshError::JumpChain("empty chain".into()))?;
        let plan = self
            .plans
            .lock()
            .expect("plans lock")
            .get_mut(target.name.as_str())
            .and_then(VecDeque::pop_front);
        match plan {
            None => Ok(ScriptedTransport::new()),
            Some(ConnectPlan::Succeed(transport)) => Ok(transport),
            Some(ConnectPlan::NetworkError) => {
                Err(SshError::Network("connection refused".into()))
            }
            Some(ConnectPlan::AuthError) => Err(SshError::Auth("all methods rejected".into())),
            Some(ConnectPlan::Timeout) => Err(SshError::Timeout(config.connect_timeout())),
        }
    }
}

/// A broker with nothing in it, for tests that never authenticate.
pub struct NullBroker;

impl CredentialBroker for NullBroker {
    fn key_passphrase(
        &self,
        _host: &merlya_types::HostName,
    ) -> Option<Arc<merlya_secret::SecretValue>> {
        None
    }

    fn host_password(
        &self,
        _host: &merlya_types::HostName,
        _user: &str,
    ) -> Option<Arc<merlya_secret::SecretValue>> {
        None
    }

    fn mfa_prompt(&self) -> Option<Arc<dyn crate::transport::MfaPrompt>> {
        None
    }
}
