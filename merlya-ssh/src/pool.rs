//! The shared SSH session pool.
//!
//! Per host, a bounded set of sessions (default cap 1, which serializes
//! commands against that host FIFO); across hosts, acquisitions proceed in
//! parallel. Sessions carry a generation counter bumped on every
//! reconnect, a keep-alive clock (three consecutive misses mark them
//! dead), and an idle clock (the reaper closes sessions idle longer than
//! `idle_ttl`).
//!
//! Lock discipline: all pool state mutates under one synchronous lock that
//! is never held across an await. Network work (probes, handshakes) runs
//! on copied-out transport handles and reconciles under the lock
//! afterwards.

use crate::SshError;
use crate::transport::{CredentialBroker, SessionTransport, TransportConnector};
use merlya_breaker::{BreakerMap, FailureKind};
use merlya_types::{Host, HostName, MAX_JUMP_DEPTH, SshConfig};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

/// Jump-chain host lookups, implemented by the dispatcher over the store.
pub trait HostResolver: Send + Sync {
    /// The inventory row for `name`, if any.
    fn host_by_name(&self, name: &HostName) -> Option<Host>;
}

const KEEPALIVE_DEATH_MISSES: u32 = 3;

struct PooledSession {
    transport: Arc<dyn SessionTransport>,
    generation: u64,
    jump_chain: Vec<HostName>,
    in_use: bool,
    dead: bool,
    idle_since: Option<Instant>,
    last_keepalive_ok: Instant,
    keepalive_misses: u32,
}

struct HostSlot {
    semaphore: Arc<Semaphore>,
    sessions: Vec<PooledSession>,
    next_generation: u64,
}

impl HostSlot {
    fn new(cap: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(cap.max(1))),
            sessions: Vec::new(),
            next_generation: 0,
        }
    }
}

/// One pooled session, as seen from outside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Reconnect generation.
    pub generation: u64,
    /// Whether an operation holds the session right now.
    pub in_use: bool,
    /// Host names traversed to reach the target, outermost first.
    pub jump_chain: Vec<HostName>,
    /// Seconds since release, for idle sessions.
    pub idle_secs: Option<u64>,
}

/// Counters for the REPL `:stats` view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Hosts with at least one pooled session.
    pub hosts: usize,
    /// Pooled sessions, idle ones included.
    pub sessions: usize,
    /// Sessions currently executing a command.
    pub in_use: usize,
}

/// The process-wide session pool.
pub struct SessionPool {
    config: SshConfig,
    connector: Arc<dyn TransportConnector>,
    resolver: Arc<dyn HostResolver>,
    breakers: Arc<BreakerMap>,
    state: Mutex<HashMap<HostName, HostSlot>>,
}

impl SessionPool {
    /// A pool connecting through `connector`, resolving jump hosts through
    /// `resolver`, and guarding every host with `breakers`.
    pub fn new(
        config: SshConfig,
        connector: Arc<dyn TransportConnector>,
        resolver: Arc<dyn HostResolver>,
        breakers: Arc<BreakerMap>,
    ) -> Self {
        Self {
            config,
            connector,
            resolver,
            breakers,
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire a session for `host`.
    ///
    /// Consults the breaker first (fast fail), then waits for the per-host
    /// slot, reuses a fresh idle session when one exists, probes a stale
    /// one, and only then builds a new authenticated transport through the
    /// resolved jump chain.
    pub async fn acquire(
        self: &Arc<Self>,
        host: &Host,
        broker: &dyn CredentialBroker,
    ) -> Result<SessionHandle, SshError> {
        let breaker = self.breakers.breaker(&host.name);
        breaker
            .lock()
            .expect("breaker lock")
            .try_acquire()
            .map_err(|e| SshError::BreakerOpen {
                retry_in: e.retry_in,
            })?;

        let semaphore = {
            let mut state = self.state.lock().expect("pool lock");
            let slot = state
                .entry(host.name.clone())
                .or_insert_with(|| HostSlot::new(self.config.max_sessions_per_host));
            Arc::clone(&slot.semaphore)
        };
        // FIFO per host: the semaphore queue orders waiters
        let permit = semaphore
            .acquire_owned()
            .await
            .map_err(|_| SshError::Cancelled)?;

        // try to reuse, probing stale sessions outside the lock
        loop {
            enum Plan {
                Use(u64, Arc<dyn SessionTransport>),
                Probe(u64, Arc<dyn SessionTransport>),
                Connect,
            }
            let plan = {
                let mut state = self.state.lock().expect("pool lock");
                let slot = state.get_mut(&host.name).expect("slot exists");
                self.reap_slot(&host.name, slot);
                match slot
                    .sessions
                    .iter_mut()
                    .find(|s| !s.in_use && !s.dead)
                {
                    Some(session) => {
                        // reserve before any await so no one else claims it
                        session.in_use = true;
                        session.idle_since = None;
                        if session.last_keepalive_ok.elapsed() < self.config.keepalive_interval() {
                            Plan::Use(session.generation, Arc::clone(&session.transport))
                        } else {
                            Plan::Probe(session.generation, Arc::clone(&session.transport))
                        }
                    }
                    None => Plan::Connect,
                }
            };

            match plan {
                Plan::Use(generation, transport) => {
                    debug!(host = %host.name, generation, "session reused");
                    return Ok(SessionHandle::new(
                        Arc::clone(self),
                        host.name.clone(),
                        generation,
                        transport,
                        permit,
                    ));
                }
                Plan::Probe(generation, transport) => {
                    let alive = transport.keepalive().await;
                    let mut state = self.state.lock().expect("pool lock");
                    let slot = state.get_mut(&host.name).expect("slot exists");
                    if let Some(session) = slot
                        .sessions
                        .iter_mut()
                        .find(|s| s.generation == generation)
                    {
                        if alive {
                            session.last_keepalive_ok = Instant::now();
                            session.keepalive_misses = 0;
                            drop(state);
                            debug!(host = %host.name, generation, "stale session revalidated");
                            return Ok(SessionHandle::new(
                                Arc::clone(self),
                                host.name.clone(),
                                generation,
                                transport,
                                permit,
                            ));
                        }
                        debug!(host = %host.name, generation, "stale session dead, replacing");
                        let closing = Arc::clone(&session.transport);
                        slot.sessions.retain(|s| s.generation != generation);
                        spawn_close(closing);
                    }
                }
                Plan::Connect => {
                    let chain = self.resolve_chain(host)?;
                    let connected = self
                        .connector
                        .connect(&chain, broker, &self.config)
                        .await;
                    let transport = match connected {
                        Ok(transport) => transport,
                        Err(e) => {
                            let kind = match &e {
                                SshError::Auth(_) => FailureKind::Auth,
                                SshError::Timeout(_) => FailureKind::Timeout,
                                _ => FailureKind::Network,
                            };
                            breaker.lock().expect("breaker lock").record_failure(kind);
                            return Err(e);
                        }
                    };
                    let generation = {
                        let mut state = self.state.lock().expect("pool lock");
                        let slot = state.get_mut(&host.name).expect("slot exists");
                        let generation = slot.next_generation;
                        slot.next_generation += 1;
                        slot.sessions.push(PooledSession {
                            transport: Arc::clone(&transport),
                            generation,
                            jump_chain: chain.iter().map(|h| h.name.clone()).collect(),
                            in_use: true,
                            dead: false,
                            idle_since: None,
                            last_keepalive_ok: Instant::now(),
                            keepalive_misses: 0,
                        });
                        generation
                    };
                    info!(host = %host.name, generation, hops = chain.len(), "session opened");
                    return Ok(SessionHandle::new(
                        Arc::clone(self),
                        host.name.clone(),
                        generation,
                        transport,
                        permit,
                    ));
                }
            }
        }
    }

    /// Walk `jump_host` references into a connect chain, outermost hop
    /// first and the target last. Cycles and chains deeper than
    /// [`MAX_JUMP_DEPTH`] are rejected (the store validates at write time;
    /// the pool re-validates because rows may have changed since).
    fn resolve_chain(&self, target: &Host) -> Result<Vec<Host>, SshError> {
        let mut chain = vec![target.clone()];
        let mut visited = vec![target.name.clone()];
        let mut next = target.jump_host.clone();
        while let Some(name) = next {
            if visited.contains(&name) {
                return Err(SshError::JumpChain(format!(
                    "cycle through {name} while resolving {}",
                    target.name
                )));
            }
            if visited.len() > MAX_JUMP_DEPTH {
                return Err(SshError::JumpChain(format!(
                    "chain for {} exceeds depth {MAX_JUMP_DEPTH}",
                    target.name
                )));
            }
            let Some(hop) = self.resolver.host_by_name(&name) else {
                return Err(SshError::JumpChain(format!(
                    "jump host {name} not in inventory"
                )));
            };
            visited.push(name);
            next = hop.jump_host.clone();
            chain.insert(0, hop);
        }
        Ok(chain)
    }

    /// One keep-alive/reaper pass. Called by the maintenance task; exposed
    /// so tests can drive it deterministically.
    pub async fn run_maintenance(&self) {
        struct Probe {
            host: HostName,
            generation: u64,
            transport: Arc<dyn SessionTransport>,
        }
        let mut probes: Vec<Probe> = Vec::new();
        {
            let mut state = self.state.lock().expect("pool lock");
            let hosts: Vec<HostName> = state.keys().cloned().collect();
            for host in hosts {
                let slot = state.get_mut(&host).expect("slot exists");
                self.reap_slot(&host, slot);
                for session in &slot.sessions {
                    if !session.in_use
                        && !session.dead
                        && session.last_keepalive_ok.elapsed() >= self.config.keepalive_interval()
                    {
                        probes.push(Probe {
                            host: host.clone(),
                            generation: session.generation,
                            transport: Arc::clone(&session.transport),
                        });
                    }
                }
            }
        }

        for probe in probes {
            let alive = probe.transport.keepalive().await;
            let mut state = self.state.lock().expect("pool lock");
            let Some(slot) = state.get_mut(&probe.host) else {
                continue;
            };
            let Some(session) = slot
                .sessions
                .iter_mut()
                .find(|s| s.generation == probe.generation)
            else {
                continue;
            };
            if alive {
                session.last_keepalive_ok = Instant::now();
                session.keepalive_misses = 0;
            } else {
                session.keepalive_misses += 1;
                warn!(
                    host = %probe.host,
                    misses = session.keepalive_misses,
                    "keepalive miss"
                );
                if session.keepalive_misses >= KEEPALIVE_DEATH_MISSES {
                    session.dead = true;
                    let closing = Arc::clone(&session.transport);
                    slot.sessions.retain(|s| s.generation != probe.generation);
                    spawn_close(closing);
                }
            }
        }
    }

    /// Spawn the periodic keep-alive and idle-reaper task. The task ends
    /// when the pool is dropped.
    pub fn spawn_maintenance(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let pool = Arc::downgrade(self);
        let period = self.config.keepalive_interval().max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                let Some(pool) = pool.upgrade() else { break };
                pool.run_maintenance().await;
            }
        })
    }

    /// Close every pooled session. Teardown path; the pool stays usable
    /// but empty afterwards.
    pub async fn close_all(&self) {
        let transports: Vec<Arc<dyn SessionTransport>> = {
            let mut state = self.state.lock().expect("pool lock");
            state
                .values_mut()
                .flat_map(|slot| slot.sessions.drain(..))
                .map(|s| s.transport)
                .collect()
        };
        for transport in transports {
            transport.close().await;
        }
    }

    /// Pool occupancy counters.
    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock().expect("pool lock");
        let mut stats = PoolStats {
            hosts: state.len(),
            ..PoolStats::default()
        };
        for slot in state.values() {
            stats.sessions += slot.sessions.len();
            stats.in_use += slot.sessions.iter().filter(|s| s.in_use).count();
        }
        stats
    }

    /// Per-session view for one host, for inspection surfaces.
    pub fn sessions_for(&self, host: &HostName) -> Vec<SessionInfo> {
        let state = self.state.lock().expect("pool lock");
        state
            .get(host)
            .map(|slot| {
                slot.sessions
                    .iter()
                    .map(|s| SessionInfo {
                        generation: s.generation,
                        in_use: s.in_use,
                        jump_chain: s.jump_chain.clone(),
                        idle_secs: s.idle_since.map(|i| i.elapsed().as_secs()),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Drop idle sessions past their TTL. Caller holds the state lock.
    fn reap_slot(&self, host: &HostName, slot: &mut HostSlot) {
        let idle_ttl = self.config.idle_ttl();
        let mut closing = Vec::new();
        slot.sessions.retain(|session| {
            let expired = session
                .idle_since
                .is_some_and(|idle| idle.elapsed() >= idle_ttl);
            if expired && !session.in_use {
                debug!(host = %host, generation = session.generation, "idle session reaped");
                closing.push(Arc::clone(&session.transport));
                false
            } else {
                true
            }
        });
        for transport in closing {
            spawn_close(transport);
        }
    }

    fn release(&self, host: &HostName, generation: u64, dead: bool) {
        let mut state = self.state.lock().expect("pool lock");
        let Some(slot) = state.get_mut(host) else {
            return;
        };
        let Some(session) = slot
            .sessions
            .iter_mut()
            .find(|s| s.generation == generation)
        else {
            return;
        };
        session.in_use = false;
        session.idle_since = Some(Instant::now());
        if dead {
            session.dead = true;
            let closing = Arc::clone(&session.transport);
            slot.sessions.retain(|s| s.generation != generation);
            spawn_close(closing);
        }
    }
}

fn spawn_close(transport: Arc<dyn SessionTransport>) {
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        handle.spawn(async move { transport.close().await });
    }
}

/// An acquired session. Exactly one operation may hold it; release it when
/// done (dropping the handle releases too, marking the session idle).
pub struct SessionHandle {
    pool: Arc<SessionPool>,
    host: HostName,
    generation: u64,
    transport: Arc<dyn SessionTransport>,
    _permit: Option<OwnedSemaphorePermit>,
    released: bool,
}

impl SessionHandle {
    fn new(
        pool: Arc<SessionPool>,
        host: HostName,
        generation: u64,
        transport: Arc<dyn SessionTransport>,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        Self {
            pool,
            host,
            generation,
            transport,
            _permit: Some(permit),
            released: false,
        }
    }

    /// The underlying transport.
    pub fn transport(&self) -> &Arc<dyn SessionTransport> {
        &self.transport
    }

    /// This session's reconnect generation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Return the session to the pool as idle.
    pub fn release(mut self) {
        self.released = true;
        self.pool.release(&self.host, self.generation, false);
    }

    /// Close and discard the session (timeout, cancellation after a
    /// partial stdin write, keep-alive death).
    pub fn mark_dead(mut self) {
        self.released = true;
        self.pool.release(&self.host, self.generation, true);
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if !self.released {
            self.pool.release(&self.host, self.generation, false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripted::{ConnectPlan, NullBroker, ScriptedConnector, ScriptedTransport};
    use merlya_types::BreakerConfig;
    use std::collections::HashMap as StdHashMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct MapResolver(StdHashMap<HostName, Host>);

    impl MapResolver {
        fn of(hosts: &[Host]) -> Arc<Self> {
            Arc::new(Self(
                hosts.iter().map(|h| (h.name.clone(), h.clone())).collect(),
            ))
        }
    }

    impl HostResolver for MapResolver {
        fn host_by_name(&self, name: &HostName) -> Option<Host> {
            self.0.get(name).cloned()
        }
    }

    fn host(name: &str) -> Host {
        Host::new(HostName::parse(name).unwrap(), format!("{name}.example"))
    }

    fn pool_with(
        config: SshConfig,
        breaker: BreakerConfig,
        connector: Arc<ScriptedConnector>,
        hosts: &[Host],
    ) -> Arc<SessionPool> {
        Arc::new(SessionPool::new(
            config,
            connector,
            MapResolver::of(hosts),
            Arc::new(BreakerMap::new(breaker)),
        ))
    }

    #[tokio::test]
    async fn released_sessions_are_reused() {
        let connector = ScriptedConnector::new();
        let target = host("web-01");
        let pool = pool_with(
            SshConfig::default(),
            BreakerConfig::default(),
            Arc::clone(&connector),
            &[target.clone()],
        );

        let handle = pool.acquire(&target, &NullBroker).await.unwrap();
        let first_generation = handle.generation();
        handle.release();

        let handle = pool.acquire(&target, &NullBroker).await.unwrap();
        assert_eq!(handle.generation(), first_generation);
        assert_eq!(connector.attempts().len(), 1);
        assert_eq!(pool.stats().sessions, 1);
    }

    #[tokio::test]
    async fn per_host_cap_serializes_acquisitions() {
        let connector = ScriptedConnector::new();
        let target = host("web-01");
        let pool = pool_with(
            SshConfig::default(),
            BreakerConfig::default(),
            connector,
            &[target.clone()],
        );

        let first = pool.acquire(&target, &NullBroker).await.unwrap();

        let released = Arc::new(AtomicBool::new(false));
        let waiter = {
            let pool = Arc::clone(&pool);
            let target = target.clone();
            let released = Arc::clone(&released);
            tokio::spawn(async move {
                let handle = pool.acquire(&target, &NullBroker).await.unwrap();
                assert!(released.load(Ordering::SeqCst), "acquired before release");
                handle.release();
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        released.store(true, Ordering::SeqCst);
        first.release();
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn distinct_hosts_acquire_in_parallel() {
        let connector = ScriptedConnector::new();
        let (a, b) = (host("a1"), host("b1"));
        let pool = pool_with(
            SshConfig::default(),
            BreakerConfig::default(),
            connector,
            &[a.clone(), b.clone()],
        );
        let ha = pool.acquire(&a, &NullBroker).await.unwrap();
        // b must not wait on a's slot
        let hb = tokio::time::timeout(
            Duration::from_millis(200),
            pool.acquire(&b, &NullBroker),
        )
        .await
        .expect("second host blocked")
        .unwrap();
        ha.release();
        hb.release();
    }

    #[tokio::test]
    async fn breaker_opens_after_threshold_and_fails_fast() {
        let connector = ScriptedConnector::new();
        for _ in 0..5 {
            connector.plan("flaky-1", ConnectPlan::NetworkError);
        }
        let target = host("flaky-1");
        let pool = pool_with(
            SshConfig::default(),
            BreakerConfig::default(),
            Arc::clone(&connector),
            &[target.clone()],
        );

        for _ in 0..5 {
            let err = pool.acquire(&target, &NullBroker).await.unwrap_err();
            assert!(matches!(err, SshError::Network(_)));
        }
        // sixth call: no socket is opened
        let err = pool.acquire(&target, &NullBroker).await.unwrap_err();
        assert!(matches!(err, SshError::BreakerOpen { .. }));
        assert_eq!(connector.attempts().len(), 5);
    }

    #[tokio::test]
    async fn half_open_probe_success_closes_breaker() {
        let connector = ScriptedConnector::new();
        connector.plan("flaky-1", ConnectPlan::NetworkError);
        let target = host("flaky-1");
        let breakers = Arc::new(BreakerMap::new(BreakerConfig {
            failure_threshold: 1,
            open_duration: 0,
        }));
        let pool = Arc::new(SessionPool::new(
            SshConfig::default(),
            Arc::clone(&connector) as Arc<dyn TransportConnector>,
            MapResolver::of(&[target.clone()]),
            Arc::clone(&breakers),
        ));

        pool.acquire(&target, &NullBroker).await.unwrap_err();
        // open_duration 0: next call is the probe and succeeds
        let handle = pool.acquire(&target, &NullBroker).await.unwrap();
        breakers
            .breaker(&target.name)
            .lock()
            .unwrap()
            .record_success();
        handle.release();
        let snapshot = &breakers.snapshots()[0].1;
        assert_eq!(snapshot.state, "closed");
        assert_eq!(snapshot.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn jump_chain_is_resolved_outermost_first() {
        let connector = ScriptedConnector::new();
        let bastion = host("bastion");
        let mut target = host("web-01");
        target.jump_host = Some(bastion.name.clone());
        let pool = pool_with(
            SshConfig::default(),
            BreakerConfig::default(),
            Arc::clone(&connector),
            &[bastion, target.clone()],
        );

        let handle = pool.acquire(&target, &NullBroker).await.unwrap();
        assert_eq!(
            connector.attempts(),
            vec![vec!["bastion".to_string(), "web-01".to_string()]]
        );
        assert_eq!(
            pool.sessions_for(&target.name)[0].jump_chain,
            vec![
                HostName::parse("bastion").unwrap(),
                HostName::parse("web-01").unwrap()
            ]
        );
        handle.release();
    }

    #[tokio::test]
    async fn jump_cycle_is_rejected_at_acquisition() {
        let connector = ScriptedConnector::new();
        let mut a = host("a1");
        let mut b = host("b1");
        a.jump_host = Some(b.name.clone());
        b.jump_host = Some(a.name.clone());
        let pool = pool_with(
            SshConfig::default(),
            BreakerConfig::default(),
            connector,
            &[a.clone(), b],
        );
        let err = pool.acquire(&a, &NullBroker).await.unwrap_err();
        assert!(matches!(err, SshError::JumpChain(_)));
    }

    #[tokio::test]
    async fn idle_sessions_are_replaced_after_ttl() {
        let connector = ScriptedConnector::new();
        let target = host("web-01");
        let config = SshConfig {
            idle_ttl: 0, // every idle session is already expired
            ..SshConfig::default()
        };
        let pool = pool_with(
            config,
            BreakerConfig::default(),
            Arc::clone(&connector),
            &[target.clone()],
        );

        let handle = pool.acquire(&target, &NullBroker).await.unwrap();
        let first_generation = handle.generation();
        handle.release();

        let handle = pool.acquire(&target, &NullBroker).await.unwrap();
        assert_ne!(handle.generation(), first_generation);
        assert_eq!(connector.attempts().len(), 2);
        handle.release();
    }

    #[tokio::test]
    async fn stale_session_failing_probe_is_replaced() {
        let transport = ScriptedTransport::new();
        let connector = ScriptedConnector::new();
        connector.plan("web-01", ConnectPlan::Succeed(Arc::clone(&transport)));
        let target = host("web-01");
        let config = SshConfig {
            keepalive_interval: 0, // every reuse goes through a probe
            ..SshConfig::default()
        };
        let pool = pool_with(
            config,
            BreakerConfig::default(),
            Arc::clone(&connector),
            &[target.clone()],
        );

        let handle = pool.acquire(&target, &NullBroker).await.unwrap();
        handle.release();
        transport.set_keepalive_ok(false);

        let handle = pool.acquire(&target, &NullBroker).await.unwrap();
        assert_eq!(handle.generation(), 1);
        assert_eq!(connector.attempts().len(), 2);
        handle.release();
        assert!(transport.is_closed());
    }

    #[tokio::test]
    async fn three_keepalive_misses_kill_a_session() {
        let transport = ScriptedTransport::new();
        let connector = ScriptedConnector::new();
        connector.plan("web-01", ConnectPlan::Succeed(Arc::clone(&transport)));
        let target = host("web-01");
        let config = SshConfig {
            keepalive_interval: 0,
            ..SshConfig::default()
        };
        let pool = pool_with(
            config,
            BreakerConfig::default(),
            connector,
            &[target.clone()],
        );

        let handle = pool.acquire(&target, &NullBroker).await.unwrap();
        handle.release();
        transport.set_keepalive_ok(false);

        pool.run_maintenance().await;
        pool.run_maintenance().await;
        assert_eq!(pool.stats().sessions, 1, "two misses keep the session");
        pool.run_maintenance().await;
        assert_eq!(pool.stats().sessions, 0, "third miss kills it");
    }

    #[tokio::test]
    async fn mark_dead_closes_and_removes() {
        let transport = ScriptedTransport::new();
        let connector = ScriptedConnector::new();
        connector.plan("web-01", ConnectPlan::Succeed(Arc::clone(&transport)));
        let target = host("web-01");
        let pool = pool_with(
            SshConfig::default(),
            BreakerConfig::default(),
            connector,
            &[target.clone()],
        );

        let handle = pool.acquire(&target, &NullBroker).await.unwrap();
        handle.mark_dead();
        tokio::task::yield_now().await;
        assert_eq!(pool.stats().sessions, 0);
    }

    #[tokio::test]
    async fn close_all_drains_the_pool() {
        let transport = ScriptedTransport::new();
        let connector = ScriptedConnector::new();
        connector.plan("web-01", ConnectPlan::Succeed(Arc::clone(&transport)));
        let target = host("web-01");
        let pool = pool_with(
            SshConfig::default(),
            BreakerConfig::default(),
            connector,
            &[target.clone()],
        );
        let handle = pool.acquire(&target, &NullBroker).await.unwrap();
        handle.release();
        pool.close_all().await;
        assert!(transport.is_closed());
        assert_eq!(pool.stats().sessions, 0);
    }
}
