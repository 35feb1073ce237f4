//! Process configuration, as read from `~/.merlya/config.yaml`.
//!
//! Every knob has a serde default matching the documented value, so an empty
//! or partial file loads cleanly. Durations are stored in whole seconds to
//! keep the YAML flat, with `Duration` accessors for call sites.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level configuration tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MerlyaConfig {
    /// SSH pool and transport knobs.
    pub ssh: SshConfig,
    /// Circuit-breaker knobs.
    pub breaker: BreakerConfig,
    /// Secret cache knobs.
    pub secrets: SecretsConfig,
    /// Execution-policy knobs.
    pub exec: ExecConfig,
    /// Loop-detector knobs.
    #[serde(rename = "loop")]
    pub loop_detector: LoopConfig,
    /// UI language.
    pub i18n: I18nConfig,
}

/// SSH pool and transport knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SshConfig {
    /// Handshake deadline, seconds.
    pub connect_timeout: u64,
    /// Per-command deadline, seconds.
    pub command_timeout: u64,
    /// Idle sessions older than this are closed, seconds.
    pub idle_ttl: u64,
    /// Keep-alive heartbeat period, seconds.
    pub keepalive_interval: u64,
    /// Sessions kept per host. 1 gives FIFO semantics per host.
    pub max_sessions_per_host: usize,
    /// Global in-flight command cap across all hosts.
    pub max_inflight_total: usize,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            connect_timeout: 30,
            command_timeout: 60,
            idle_ttl: 600,
            keepalive_interval: 60,
            max_sessions_per_host: 1,
            max_inflight_total: 32,
        }
    }
}

impl SshConfig {
    /// Handshake deadline.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    /// Per-command deadline.
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout)
    }

    /// Idle-session lifetime.
    pub fn idle_ttl(&self) -> Duration {
        Duration::from_secs(self.idle_ttl)
    }

    /// Keep-alive heartbeat period.
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval)
    }
}

/// Circuit-breaker knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BreakerConfig {
    /// Consecutive failures before the breaker opens.
    pub failure_threshold: u32,
    /// How long the breaker stays open before admitting a probe, seconds.
    pub open_duration: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration: 30,
        }
    }
}

impl BreakerConfig {
    /// Open-state duration.
    pub fn open_duration(&self) -> Duration {
        Duration::from_secs(self.open_duration)
    }
}

/// Secret cache knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SecretsConfig {
    /// Secrets older than this are evicted at next access, seconds.
    pub ttl: u64,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self { ttl: 900 }
    }
}

impl SecretsConfig {
    /// Secret eviction age.
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl)
    }
}

/// Execution-policy knobs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecConfig {
    /// Skip interactive confirmation for moderate-risk commands.
    pub yes_mode: bool,
    /// Permit critical-risk commands in `yes_mode` when the caller also
    /// sets `allow_critical` on the call.
    pub allow_critical: bool,
    /// Require confirmation even for low-risk commands.
    pub confirm_all: bool,
}

/// Loop-detector knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoopConfig {
    /// Trace window size. 0 disables the detector.
    pub window: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self { window: 20 }
    }
}

/// UI language selection.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// English.
    #[default]
    En,
    /// French.
    Fr,
}

/// UI language knobs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct I18nConfig {
    /// Message language. Absent: derived from the host locale, falling
    /// back to English.
    pub language: Option<Language>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = MerlyaConfig::default();
        assert_eq!(cfg.ssh.connect_timeout, 30);
        assert_eq!(cfg.ssh.command_timeout, 60);
        assert_eq!(cfg.ssh.idle_ttl, 600);
        assert_eq!(cfg.ssh.keepalive_interval, 60);
        assert_eq!(cfg.ssh.max_sessions_per_host, 1);
        assert_eq!(cfg.ssh.max_inflight_total, 32);
        assert_eq!(cfg.breaker.failure_threshold, 5);
        assert_eq!(cfg.breaker.open_duration, 30);
        assert_eq!(cfg.secrets.ttl, 900);
        assert!(!cfg.exec.yes_mode);
        assert!(!cfg.exec.allow_critical);
        assert_eq!(cfg.loop_detector.window, 20);
        assert_eq!(cfg.i18n.language, None);
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let cfg: MerlyaConfig = serde_yaml::from_str("ssh:\n  command_timeout: 5\n").unwrap();
        assert_eq!(cfg.ssh.command_timeout, 5);
        assert_eq!(cfg.ssh.connect_timeout, 30);
        assert_eq!(cfg.breaker.failure_threshold, 5);
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(serde_yaml::from_str::<MerlyaConfig>("shh: {}\n").is_err());
    }

    #[test]
    fn loop_section_is_named_loop() {
        let cfg: MerlyaConfig = serde_yaml::from_str("loop:\n  window: 0\n").unwrap();
        assert_eq!(cfg.loop_detector.window, 0);
    }
}
