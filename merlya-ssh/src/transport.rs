//! Transport abstraction: what the pool needs from an SSH implementation.
//!
//! [`TransportConnector`] builds an authenticated [`SessionTransport`] for a
//! resolved jump chain; the pool neither knows nor cares whether the bytes
//! travel over russh or a scripted test double.

use crate::SshError;
use async_trait::async_trait;
use merlya_secret::SecretValue;
use merlya_types::{Host, HostName, SshConfig};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Output of one remote command execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecOutput {
    /// Captured standard output (lossy UTF-8).
    pub stdout: String,
    /// Captured standard error (lossy UTF-8).
    pub stderr: String,
    /// Remote exit code. `-1` when the channel closed without one.
    pub exit_code: i32,
    /// Wall-clock execution time.
    pub duration: Duration,
}

/// Callback answering keyboard-interactive (MFA) prompts.
///
/// Supplied by the dispatcher; the pool passes it through to the transport
/// during authentication. Answers are secrets and are zeroed after use.
#[async_trait]
pub trait MfaPrompt: Send + Sync {
    /// Answer the given prompts for `host`. Returned strings are consumed
    /// and zeroed by the transport.
    async fn answer(&self, host: &HostName, prompts: Vec<String>) -> Result<Vec<String>, SshError>;
}

/// Credential lookups the transport may need while authenticating.
///
/// Implemented by the dispatcher over the secret store. Methods are
/// synchronous: they read process memory, never the network.
pub trait CredentialBroker: Send + Sync {
    /// Passphrase for an encrypted private key (`ssh-passphrase:<name>`).
    fn key_passphrase(&self, host: &HostName) -> Option<Arc<SecretValue>>;

    /// Transient SSH password for `user@host`.
    fn host_password(&self, host: &HostName, user: &str) -> Option<Arc<SecretValue>>;

    /// MFA callback, when the front-end provides one.
    fn mfa_prompt(&self) -> Option<Arc<dyn MfaPrompt>>;
}

/// One authenticated SSH connection.
///
/// Implementations are internally synchronized: `exec` takes `&self` and
/// the pool guarantees at most one in-flight operation per session anyway.
#[async_trait]
pub trait SessionTransport: Send + Sync {
    /// Run a command, optionally piping `stdin` (followed by EOF) into it.
    /// The caller owns and zeroes the stdin buffer.
    async fn exec(
        &self,
        command: &str,
        stdin: Option<&[u8]>,
        timeout: Duration,
    ) -> Result<ExecOutput, SshError>;

    /// Cheap liveness probe. `false` means the session is unusable.
    async fn keepalive(&self) -> bool;

    /// Upload a local file. No elevation is applied: the remote path must
    /// be writable by the SSH user.
    async fn upload(&self, local: &Path, remote: &str) -> Result<(), SshError>;

    /// Download a remote file.
    async fn download(&self, remote: &str, local: &Path) -> Result<(), SshError>;

    /// Close the underlying connection. Idempotent.
    async fn close(&self);
}

/// Builds authenticated transports for resolved jump chains.
#[async_trait]
pub trait TransportConnector: Send + Sync {
    /// Connect and authenticate through `chain` (outermost jump first,
    /// target last), within `config.connect_timeout`.
    async fn connect(
        &self,
        chain: &[Host],
        broker: &dyn CredentialBroker,
        config: &SshConfig,
    ) -> Result<Arc<dyn SessionTransport>, SshError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn _assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn traits_are_object_safe() {
        _assert_send_sync::<Arc<dyn SessionTransport>>();
        _assert_send_sync::<Arc<dyn TransportConnector>>();
        _assert_send_sync::<Arc<dyn CredentialBroker>>();
        _assert_send_sync::<Arc<dyn MfaPrompt>>();
    }
}
