//! Minimal `~/.ssh/config` subset importer.
//!
//! Recognized keywords: `Host`, `HostName`, `Port`, `User`, `IdentityFile`,
//! `ProxyJump`. Wildcard host patterns (`*`, `?`) are skipped; they are
//! defaults, not inventory entries. Everything else is ignored, not an
//! error; this is an importer, not a full client-config implementation.

use merlya_types::{FieldUpdate, HostName, HostPatch};
use tracing::debug;

/// One host entry parsed from an ssh config file.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParsedSshHost {
    /// The `Host` alias.
    pub alias: String,
    /// `HostName`, when present.
    pub hostname: Option<String>,
    /// `Port`, when present and numeric.
    pub port: Option<u16>,
    /// `User`, when present.
    pub user: Option<String>,
    /// `IdentityFile`, when present.
    pub identity_file: Option<String>,
    /// `ProxyJump`, first hop only.
    pub proxy_jump: Option<String>,
}

impl ParsedSshHost {
    /// Convert to an inventory upsert. Fails when the alias is not a
    /// valid host name.
    pub fn to_patch(&self) -> Option<(HostName, HostPatch)> {
        let name = HostName::parse(&self.alias).ok()?;
        let jump = self
            .proxy_jump
            .as_deref()
            .and_then(|j| HostName::parse(j).ok());
        let patch = HostPatch {
            hostname: Some(self.hostname.clone().unwrap_or_else(|| self.alias.clone())),
            port: self.port,
            username: match &self.user {
                Some(u) => FieldUpdate::Set(u.clone()),
                None => FieldUpdate::Keep,
            },
            private_key_path: match &self.identity_file {
                Some(p) => FieldUpdate::Set(p.clone()),
                None => FieldUpdate::Keep,
            },
            jump_host: match jump {
                Some(j) => FieldUpdate::Set(j),
                None => FieldUpdate::Keep,
            },
            ..HostPatch::default()
        };
        Some((name, patch))
    }
}

/// Parse the recognized subset out of ssh config text.
pub fn parse_ssh_config(text: &str) -> Vec<ParsedSshHost> {
    let mut hosts: Vec<ParsedSshHost> = Vec::new();
    let mut current: Option<ParsedSshHost> = None;

    for raw_line in text.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (keyword, rest) = match line.split_once([' ', '\t', '=']) {
            Some((k, r)) => (k, r.trim().trim_start_matches('=').trim()),
            None => continue,
        };

        if keyword.eq_ignore_ascii_case("host") {
            if let Some(done) = current.take() {
                hosts.push(done);
            }
            // first non-wildcard pattern wins; a pure-wildcard block is
            // a defaults section and is skipped entirely
            let alias = rest
                .split_whitespace()
                .find(|p| !p.contains(['*', '?', '!']));
            match alias {
                Some(alias) => {
                    current = Some(ParsedSshHost {
                        alias: alias.to_string(),
                        ..ParsedSshHost::default()
                    });
                }
                None => {
                    debug!(pattern = rest, "skipping wildcard host block");
                    current = None;
                }
            }
            continue;
        }

        let Some(entry) = current.as_mut() else {
            continue;
        };
        if keyword.eq_ignore_ascii_case("hostname") {
            entry.hostname = Some(rest.to_string());
        } else if keyword.eq_ignore_ascii_case("port") {
            entry.port = rest.parse().ok();
        } else if keyword.eq_ignore_ascii_case("user") {
            entry.user = Some(rest.to_string());
        } else if keyword.eq_ignore_ascii_case("identityfile") {
            entry.identity_file = Some(rest.to_string());
        } else if keyword.eq_ignore_ascii_case("proxyjump") {
            entry.proxy_jump = rest.split(',').next().map(str::to_string);
        }
    }
    if let Some(done) = current.take() {
        hosts.push(done);
    }
    hosts
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "
# fleet access
Host web-01
    HostName 10.1.0.11
    User deploy
    Port 2222
    IdentityFile ~/.ssh/id_fleet

Host db-01
    HostName db.internal.example.com
    ProxyJump bastion

Host *
    ServerAliveInterval 60

Host bastion
    HostName 203.0.113.7
";

    #[test]
    fn parses_recognized_subset() {
        let hosts = parse_ssh_config(SAMPLE);
        assert_eq!(hosts.len(), 3);

        assert_eq!(hosts[0].alias, "web-01");
        assert_eq!(hosts[0].hostname.as_deref(), Some("10.1.0.11"));
        assert_eq!(hosts[0].port, Some(2222));
        assert_eq!(hosts[0].user.as_deref(), Some("deploy"));
        assert_eq!(hosts[0].identity_file.as_deref(), Some("~/.ssh/id_fleet"));

        assert_eq!(hosts[1].alias, "db-01");
        assert_eq!(hosts[1].proxy_jump.as_deref(), Some("bastion"));

        assert_eq!(hosts[2].alias, "bastion");
    }

    #[test]
    fn wildcard_blocks_are_skipped() {
        let hosts = parse_ssh_config("Host *\n  User root\nHost ?db\n  Port 22\n");
        assert!(hosts.is_empty());
    }

    #[test]
    fn patch_defaults_hostname_to_alias() {
        let hosts = parse_ssh_config("Host web-01\n  User deploy\n");
        let (name, patch) = hosts[0].to_patch().unwrap();
        assert_eq!(name.as_str(), "web-01");
        assert_eq!(patch.hostname.as_deref(), Some("web-01"));
    }

    #[test]
    fn equals_separator_is_accepted() {
        let hosts = parse_ssh_config("Host a1\nHostName = 10.0.0.1\n");
        assert_eq!(hosts[0].hostname.as_deref(), Some("10.0.0.1"));
    }
}
