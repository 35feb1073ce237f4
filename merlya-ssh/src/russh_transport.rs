//! russh-backed transport: TCP + SSH handshake, the authentication ladder,
//! jump-host tunnelling, command execution and SFTP transfers.
//!
//! Authentication order per hop: agent socket if reachable, explicit key
//! path (passphrase from the secret store), stored host password, then
//! keyboard-interactive through the dispatcher's MFA callback.

use crate::transport::{
    CredentialBroker, ExecOutput, MfaPrompt, SessionTransport, TransportConnector,
};
use crate::SshError;
use async_trait::async_trait;
use merlya_types::{Host, HostName, SshConfig};
use russh::client::{self, AuthResult, Handle, KeyboardInteractiveAuthResponse};
use russh::keys::{PrivateKeyWithHashAlg, load_secret_key};
use russh::{ChannelMsg, Disconnect};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use zeroize::Zeroizing;

struct ClientHandler;

impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        // Host-key pinning is the front-end's concern (known_hosts prompt);
        // the substrate accepts and records.
        Ok(true)
    }
}

/// The production connector.
pub struct RusshConnector;

impl RusshConnector {
    /// A connector with default client settings.
    pub fn new() -> Self {
        Self
    }

    fn client_config(config: &SshConfig) -> Arc<client::Config> {
        Arc::new(client::Config {
            keepalive_interval: Some(config.keepalive_interval()),
            ..client::Config::default()
        })
    }
}

impl Default for RusshConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransportConnector for RusshConnector {
    async fn connect(
        &self,
        chain: &[Host],
        broker: &dyn CredentialBroker,
        config: &SshConfig,
    ) -> Result<Arc<dyn SessionTransport>, SshError> {
        let deadline = Instant::now() + config.connect_timeout();
        let client_config = Self::client_config(config);
        let mut handle: Option<Handle<ClientHandler>> = None;

        for hop in chain {
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .ok_or(SshError::Timeout(config.connect_timeout()))?;

            let mut next = match &handle {
                None => {
                    tokio::time::timeout(
                        remaining,
                        client::connect(
                            Arc::clone(&client_config),
                            (hop.hostname.as_str(), hop.port),
                            ClientHandler,
                        ),
                    )
                    .await
                    .map_err(|_| SshError::Timeout(config.connect_timeout()))??
                }
                Some(previous) => {
                    // tunnel the next hop through the established session
                    let channel = tokio::time::timeout(
                        remaining,
                        previous.channel_open_direct_tcpip(
                            hop.hostname.as_str(),
                            u32::from(hop.port),
                            "127.0.0.1",
                            0,
                        ),
                    )
                    .await
                    .map_err(|_| SshError::Timeout(config.connect_timeout()))??;
                    tokio::time::timeout(
                        remaining,
                        client::connect_stream(
                            Arc::clone(&client_config),
                            channel.into_stream(),
                            ClientHandler,
                        ),
                    )
                    .await
                    .map_err(|_| SshError::Timeout(config.connect_timeout()))??
                }
            };

            authenticate(&mut next, hop, broker).await?;
            debug!(host = %hop.name, "ssh hop authenticated");
            handle = Some(next);
        }

        let handle = handle.ok_or_else(|| SshError::JumpChain("empty chain".into()))?;
        Ok(Arc::new(RusshTransport {
            handle: Mutex::new(handle),
            closed: AtomicBool::new(false),
        }))
    }
}

fn login_user(host: &Host) -> String {
    host.username
        .clone()
        .or_else(|| std::env::var("USER").ok())
        .unwrap_or_else(|| "root".to_string())
}

async fn authenticate(
    handle: &mut Handle<ClientHandler>,
    host: &Host,
    broker: &dyn CredentialBroker,
) -> Result<(), SshError> {
    let user = login_user(host);

    if try_agent(handle, &user).await? {
        return Ok(());
    }
    if let Some(path) = &host.private_key_path {
        if try_key_file(handle, &user, path, host, broker).await? {
            return Ok(());
        }
    }
    if let Some(password) = broker.host_password(&host.name, &user) {
        let ok = password
            .with_str(|plain| handle.authenticate_password(user.clone(), plain.to_string()))
            .await?;
        if matches!(ok, AuthResult::Success) {
            return Ok(());
        }
    }
    if let Some(mfa) = broker.mfa_prompt() {
        if try_keyboard_interactive(handle, &user, &host.name, mfa.as_ref()).await? {
            return Ok(());
        }
    }
    Err(SshError::Auth(format!(
        "all methods rejected for {user}@{}",
        host.name
    )))
}

async fn try_agent(
    handle: &mut Handle<ClientHandler>,
    user: &str,
) -> Result<bool, SshError> {
    let mut agent = match russh::keys::agent::client::AgentClient::connect_env().await {
        Ok(agent) => agent,
        Err(_) => return Ok(false), // no agent socket; not an error
    };
    let identities = agent
        .request_identities()
        .await
        .map_err(|e| SshError::Network(format!("ssh-agent: {e}")))?;
    let hash_alg = handle.best_supported_rsa_hash().await?.flatten();
    for key in identities {
        let result = handle
            .authenticate_publickey_with(user, key, hash_alg, &mut agent)
            .await;
        if matches!(result, Ok(AuthResult::Success)) {
            return Ok(true);
        }
    }
    Ok(false)
}

async fn try_key_file(
    handle: &mut Handle<ClientHandler>,
    user: &str,
    path: &str,
    host: &Host,
    broker: &dyn CredentialBroker,
) -> Result<bool, SshError> {
    let passphrase = broker.key_passphrase(&host.name);
    let key = match &passphrase {
        Some(secret) => secret.with_str(|plain| load_secret_key(path, Some(plain))),
        None => load_secret_key(path, None),
    }
    .map_err(|e| SshError::Auth(format!("key {path}: {e}")))?;

    let hash_alg = handle.best_supported_rsa_hash().await?.flatten();
    let result = handle
        .authenticate_publickey(user, PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg))
        .await?;
    Ok(matches!(result, AuthResult::Success))
}

async fn try_keyboard_interactive(
    handle: &mut Handle<ClientHandler>,
    user: &str,
    host: &HostName,
    mfa: &dyn MfaPrompt,
) -> Result<bool, SshError> {
    let mut response = handle
        .authenticate_keyboard_interactive_start(user, None)
        .await?;
    loop {
        match response {
            KeyboardInteractiveAuthResponse::Success => return Ok(true),
            KeyboardInteractiveAuthResponse::Failure { .. } => return Ok(false),
            KeyboardInteractiveAuthResponse::InfoRequest { prompts, .. } => {
                let questions: Vec<String> =
                    prompts.into_iter().map(|p| p.prompt).collect();
                let answers = mfa.answer(host, questions).await?;
                let answers: Vec<Zeroizing<String>> =
                    answers.into_iter().map(Zeroizing::new).collect();
                response = handle
                    .authenticate_keyboard_interactive_respond(
                        answers.iter().map(|a| a.to_string()).collect(),
                    )
                    .await?;
            }
            _ => return Ok(false),
        }
    }
}

/// A live russh session.
pub struct RusshTransport {
    handle: Mutex<Handle<ClientHandler>>,
    closed: AtomicBool,
}

#[async_trait]
impl SessionTransport for RusshTransport {
    async fn exec(
        &self,
        command: &str,
        stdin: Option<&[u8]>,
        timeout: Duration,
    ) -> Result<ExecOutput, SshError> {
        let started = Instant::now();
        let result = tokio::time::timeout(timeout, self.exec_inner(command, stdin)).await;
        match result {
            Ok(Ok((stdout, stderr, exit_code))) => Ok(ExecOutput {
                stdout,
                stderr,
                exit_code,
                duration: started.elapsed(),
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(SshError::Timeout(timeout)),
        }
    }

    async fn keepalive(&self) -> bool {
        if self.closed.load(Ordering::Relaxed) {
            return false;
        }
        let handle = self.handle.lock().await;
        match handle.channel_open_session().await {
            Ok(channel) => {
                let _ = channel.close().await;
                true
            }
            Err(e) => {
                debug!("keepalive probe failed: {e}");
                false
            }
        }
    }

    async fn upload(&self, local: &Path, remote: &str) -> Result<(), SshError> {
        let sftp = self.sftp_session().await?;
        let mut local_file = tokio::fs::File::open(local).await?;
        let mut remote_file = sftp
            .create(remote)
            .await
            .map_err(|e| SshError::Network(format!("sftp create {remote}: {e}")))?;
        tokio::io::copy(&mut local_file, &mut remote_file).await?;
        remote_file.shutdown().await?;
        let _ = sftp.close().await;
        Ok(())
    }

    async fn download(&self, remote: &str, local: &Path) -> Result<(), SshError> {
        let sftp = self.sftp_session().await?;
        let mut remote_file = sftp
            .open(remote)
            .await
            .map_err(|e| SshError::Network(format!("sftp open {remote}: {e}")))?;
        let mut buffer = Vec::new();
        remote_file.read_to_end(&mut buffer).await?;
        let _ = sftp.close().await;
        tokio::fs::write(local, buffer).await?;
        Ok(())
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::Relaxed) {
            return;
        }
        let handle = self.handle.lock().await;
        if let Err(e) = handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
        {
            debug!("disconnect: {e}");
        }
    }
}

impl RusshTransport {
    async fn exec_inner(
        &self,
        command: &str,
        stdin: Option<&[u8]>,
    ) -> Result<(String, String, i32), SshError> {
        let mut channel = {
            let handle = self.handle.lock().await;
            handle.channel_open_session().await?
        };
        channel.exec(true, command).await?;

        if let Some(bytes) = stdin {
            channel.data(bytes).await?;
        }
        channel.eof().await?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_code = -1;
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
                ChannelMsg::ExtendedData { ref data, ext: 1 } => stderr.extend_from_slice(data),
                ChannelMsg::ExitStatus { exit_status } => exit_code = exit_status as i32,
                _ => {}
            }
        }
        Ok((
            String::from_utf8_lossy(&stdout).into_owned(),
            String::from_utf8_lossy(&stderr).into_owned(),
            exit_code,
        ))
    }

    async fn sftp_session(&self) -> Result<russh_sftp::client::SftpSession, SshError> {
        let channel = {
            let handle = self.handle.lock().await;
            handle.channel_open_session().await?
        };
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(SshError::from)?;
        russh_sftp::client::SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| {
                warn!("sftp subsystem: {e}");
                SshError::Network(format!("sftp: {e}"))
            })
    }
}
