//! The process context: every substrate singleton, threaded explicitly.
//!
//! The pool, the store, the breaker map, the audit sink and the secret
//! cache are process-wide by nature. They live here as one explicit object
//! handed to the dispatcher rather than as ambient globals, so tests can
//! build a fresh context per case and nothing leaks between them.
//!
//! Teardown order ([`ExecutionContext::shutdown`]): pool sessions close,
//! the maintenance task stops, the audit sink flushes, the secret cache
//! zeroizes.

use crate::audit::{AuditSink, SecretAuditBridge, StoreAuditSink};
use crate::metrics::Metrics;
use async_trait::async_trait;
use merlya_breaker::BreakerMap;
use merlya_secret::{KeyringAdapter, SecretStore, SecretValue};
use merlya_ssh::{
    CredentialBroker, HostResolver, MfaPrompt, RusshConnector, SessionPool, SshError,
    TransportConnector,
};
use merlya_store::InventoryStore;
use merlya_policy::{LoopDetector, RiskClassifier};
use merlya_types::{DispatchError, Host, HostName, MerlyaConfig, SecretKey};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tracing::debug;

/// Interactive prompting capability supplied by the front-end.
///
/// Absent in non-interactive (`--yes`) runs; the dispatcher then turns a
/// missing elevation credential into a fatal error instead of asking.
#[async_trait]
pub trait PromptHandler: Send + Sync {
    /// Ask for a secret over a confidential channel (no echo). The
    /// returned string is moved into a zeroizing buffer by the caller.
    async fn confidential(&self, prompt: &str) -> Result<String, DispatchError>;
}

/// Everything one merlya process owns.
pub struct ExecutionContext {
    /// Process configuration.
    pub config: MerlyaConfig,
    /// Host inventory.
    pub store: Arc<InventoryStore>,
    /// In-memory secrets with optional keyring mirror.
    pub secrets: Arc<SecretStore>,
    /// Per-host circuit breakers.
    pub breakers: Arc<BreakerMap>,
    /// SSH session pool.
    pub pool: Arc<SessionPool>,
    /// Append-only audit destination.
    pub audit: Arc<dyn AuditSink>,
    /// Execution counters.
    pub metrics: Arc<Metrics>,
    /// Risk rule table.
    pub classifier: RiskClassifier,
    /// Tool-call repetition detector.
    pub loops: Mutex<LoopDetector>,
    /// Global in-flight command cap.
    pub inflight: Arc<Semaphore>,
    /// Interactive prompting, when the front-end provides it.
    pub prompts: Option<Arc<dyn PromptHandler>>,
    maintenance: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

/// Builder for [`ExecutionContext`]. Defaults: in-memory store, russh
/// connector, store-backed audit sink, no keyring, no prompts.
pub struct ContextBuilder {
    config: MerlyaConfig,
    store: Option<Arc<InventoryStore>>,
    connector: Option<Arc<dyn TransportConnector>>,
    keyring: Option<Arc<dyn KeyringAdapter>>,
    audit: Option<Arc<dyn AuditSink>>,
    prompts: Option<Arc<dyn PromptHandler>>,
}

impl ContextBuilder {
    /// Start from a configuration.
    pub fn new(config: MerlyaConfig) -> Self {
        Self {
            config,
            store: None,
            connector: None,
            keyring: None,
            audit: None,
            prompts: None,
        }
    }

    /// Use this inventory store.
    pub fn store(mut self, store: Arc<InventoryStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use this transport connector (tests inject the scripted one).
    pub fn connector(mut self, connector: Arc<dyn TransportConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Mirror persistable secrets to this keyring.
    pub fn keyring(mut self, keyring: Arc<dyn KeyringAdapter>) -> Self {
        self.keyring = Some(keyring);
        self
    }

    /// Use this audit sink instead of the store-backed one.
    pub fn audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Enable interactive prompting.
    pub fn prompts(mut self, prompts: Arc<dyn PromptHandler>) -> Self {
        self.prompts = Some(prompts);
        self
    }

    /// Assemble the context.
    pub fn build(self) -> Result<Arc<ExecutionContext>, DispatchError> {
        let store = match self.store {
            Some(store) => store,
            None => Arc::new(
                InventoryStore::open_in_memory()
                    .map_err(|e| DispatchError::Persistence(e.to_string()))?,
            ),
        };
        let audit: Arc<dyn AuditSink> = self
            .audit
            .unwrap_or_else(|| Arc::new(StoreAuditSink::new(Arc::clone(&store))));

        let secrets = Arc::new(match self.keyring {
            Some(keyring) => SecretStore::with_keyring(self.config.secrets.ttl(), keyring),
            None => SecretStore::memory_only(self.config.secrets.ttl()),
        });
        secrets.set_observer(Arc::new(SecretAuditBridge::new(Arc::clone(&audit))));

        let breakers = Arc::new(BreakerMap::new(self.config.breaker.clone()));
        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(RusshConnector::new()));
        let pool = Arc::new(SessionPool::new(
            self.config.ssh.clone(),
            connector,
            Arc::new(StoreHostResolver(Arc::clone(&store))),
            Arc::clone(&breakers),
        ));

        Ok(Arc::new(ExecutionContext {
            inflight: Arc::new(Semaphore::new(self.config.ssh.max_inflight_total.max(1))),
            loops: Mutex::new(LoopDetector::new(self.config.loop_detector.window)),
            classifier: RiskClassifier::new(),
            metrics: Arc::new(Metrics::new()),
            store,
            secrets,
            breakers,
            pool,
            audit,
            prompts: self.prompts,
            maintenance: Mutex::new(None),
            config: self.config,
        }))
    }
}

impl ExecutionContext {
    /// A fresh context for tests: in-memory everything, no network
    /// connector unless injected later via [`ContextBuilder`].
    pub fn fresh_for_tests(config: MerlyaConfig) -> Arc<Self> {
        ContextBuilder::new(config)
            .build()
            .expect("in-memory context")
    }

    /// Start the pool's keep-alive and idle-reaper task.
    pub fn start_maintenance(self: &Arc<Self>) {
        let handle = self.pool.spawn_maintenance();
        *self.maintenance.lock().expect("maintenance lock") = Some(handle);
    }

    /// Tear the process down: close sessions, stop the reaper, flush
    /// audit, zeroize secrets; in that order.
    pub async fn shutdown(&self) {
        self.pool.close_all().await;
        if let Some(task) = self.maintenance.lock().expect("maintenance lock").take() {
            task.abort();
        }
        self.audit.flush();
        self.secrets.zeroize_all();
        debug!("execution context shut down");
    }

    /// The credential broker handed to the pool during authentication.
    pub fn broker(&self) -> ContextBroker {
        ContextBroker {
            secrets: Arc::clone(&self.secrets),
            mfa: self.prompts.as_ref().map(|p| {
                Arc::new(PromptMfa {
                    prompts: Arc::clone(p),
                }) as Arc<dyn MfaPrompt>
            }),
        }
    }
}

/// Jump-chain resolution over the inventory.
pub(crate) struct StoreHostResolver(pub Arc<InventoryStore>);

impl HostResolver for StoreHostResolver {
    fn host_by_name(&self, name: &HostName) -> Option<Host> {
        self.0.get_host(name.as_str()).ok().flatten()
    }
}

/// [`CredentialBroker`] over the secret store.
///
/// Key namespaces: `ssh-passphrase:<host>` for private-key passphrases,
/// `host:<host>:password` for transient SSH passwords.
pub struct ContextBroker {
    secrets: Arc<SecretStore>,
    mfa: Option<Arc<dyn MfaPrompt>>,
}

impl CredentialBroker for ContextBroker {
    fn key_passphrase(&self, host: &HostName) -> Option<Arc<SecretValue>> {
        let key = SecretKey::parse(&format!("ssh-passphrase:{host}")).ok()?;
        self.secrets.get(&key)
    }

    fn host_password(&self, host: &HostName, _user: &str) -> Option<Arc<SecretValue>> {
        let key = SecretKey::parse(&format!("host:{host}:password")).ok()?;
        self.secrets.get(&key)
    }

    fn mfa_prompt(&self) -> Option<Arc<dyn MfaPrompt>> {
        self.mfa.as_ref().map(Arc::clone)
    }
}

struct PromptMfa {
    prompts: Arc<dyn PromptHandler>,
}

#[async_trait]
impl MfaPrompt for PromptMfa {
    async fn answer(
        &self,
        host: &HostName,
        prompts: Vec<String>,
    ) -> Result<Vec<String>, SshError> {
        let mut answers = Vec::with_capacity(prompts.len());
        for prompt in prompts {
            let answer = self
                .prompts
                .confidential(&format!("[{host}] {prompt}"))
                .await
                .map_err(|e| SshError::Auth(e.to_string()))?;
            answers.push(answer);
        }
        Ok(answers)
    }
}
