//! Shell-command risk classification.
//!
//! The rule table below is the concrete definition of "destructive" for
//! merlya. Rules are ordered; the first match wins. Commands matching no
//! rule fall back to `moderate`, unless every pipeline segment starts with
//! a known read-only verb, in which case `low`.

use merlya_types::ExecConfig;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Classified risk of a shell command.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    /// Read-only observability; no side effects.
    Low,
    /// Reversible mutations: config writes, service restarts, installs.
    Moderate,
    /// Destructive or system-wide: data loss, power state, privilege grants.
    Critical,
}

impl RiskLevel {
    /// Stable identifier used in audit metadata and error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Moderate => "moderate",
            Self::Critical => "critical",
        }
    }
}

/// A classification with the rule text that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// The classified level.
    pub level: RiskLevel,
    /// Why: the matched rule's description, or the fallback reason.
    pub rationale: String,
}

struct Rule {
    pattern: Regex,
    level: RiskLevel,
    rationale: &'static str,
}

impl Rule {
    fn new(pattern: &str, level: RiskLevel, rationale: &'static str) -> Self {
        Self {
            pattern: Regex::new(pattern).expect("valid regex"),
            level,
            rationale,
        }
    }
}

/// Ordered-rule risk classifier.
pub struct RiskClassifier {
    rules: Vec<Rule>,
    readonly_verbs: Vec<&'static str>,
}

impl RiskClassifier {
    /// The built-in rule table.
    pub fn new() -> Self {
        use RiskLevel::{Critical, Moderate};
        let rules = vec![
            // ── critical ────────────────────────────────────────────────
            Rule::new(
                r"(?:^|[;&|]\s*)rm\s+(?:-\w*[rf]\w*\s+)+(?:/\s*$|/\s|--no-preserve-root|/(?:etc|usr|var|boot|bin|sbin|lib|home)\b)",
                Critical,
                "recursive delete on a system root",
            ),
            Rule::new(
                r"(?:^|[;&|]\s*)mkfs(?:\.\w+)?\b",
                Critical,
                "filesystem creation destroys existing data",
            ),
            Rule::new(
                r"(?:^|[;&|]\s*)dd\b.*\bof=/dev/(?:sd|nvme|vd|xvd|hd)",
                Critical,
                "raw write to a block device",
            ),
            Rule::new(
                r"(?:^|[;&|]\s*)(?:shutdown|reboot|halt|poweroff)\b",
                Critical,
                "power state change",
            ),
            Rule::new(
                r"(?:^|[;&|]\s*)systemctl\s+(?:stop|disable|mask)\s+(?:sshd?|systemd-|network|dbus|init)",
                Critical,
                "stopping a system-critical unit",
            ),
            Rule::new(
                r"(?:^|[;&|]\s*)killall\b|(?:^|[;&|]\s*)pkill\s+(?:-\w+\s+)*-u\s+root\b",
                Critical,
                "mass process signalling",
            ),
            Rule::new(
                r">\s*/etc/(?:passwd|shadow|sudoers|fstab)\b",
                Critical,
                "redirection over a critical system file",
            ),
            Rule::new(
                r"(?:^|[;&|]\s*)(?:chown|chmod)\s+(?:-\w*R\w*\s+)?\S+\s+/(?:\s*$|etc\b|usr\b|var\b|bin\b|sbin\b|lib\b)",
                Critical,
                "ownership or mode change on a system path",
            ),
            Rule::new(
                r"(?:^|[;&|]\s*)chmod\s+(?:-\w+\s+)*0?777\s+/",
                Critical,
                "world-writable grant on a system path",
            ),
            // ── moderate ────────────────────────────────────────────────
            Rule::new(
                r"(?:>>?|\btee\b)\s*/etc/",
                Moderate,
                "writes under /etc",
            ),
            Rule::new(
                r"(?:^|[;&|]\s*)systemctl\s+(?:restart|reload|start|stop|enable|disable)\b|(?:^|[;&|]\s*)service\s+\S+\s+(?:restart|reload|start|stop)\b",
                Moderate,
                "service state change",
            ),
            Rule::new(
                r"(?:^|[;&|]\s*)(?:apt(?:-get)?|yum|dnf|zypper|apk|pacman)\s+(?:-\w+\s+)*(?:install|remove|purge|upgrade|erase|-S\w*)\b",
                Moderate,
                "package install or removal",
            ),
            Rule::new(
                r"(?:^|[;&|]\s*)(?:chown|chmod)\b",
                Moderate,
                "permission change",
            ),
            Rule::new(
                r"(?:^|[;&|]\s*)kill\s+(?:-\w+\s+)?\d+",
                Moderate,
                "process kill by pid",
            ),
            Rule::new(
                r"(?:^|[;&|]\s*)(?:iptables|nft|ufw|firewall-cmd)\b",
                Moderate,
                "firewall change",
            ),
            Rule::new(
                r"(?:^|[;&|]\s*)(?:rm|mv|truncate|shred)\b",
                Moderate,
                "file removal or move",
            ),
            Rule::new(
                r"(?:^|[;&|]\s*)(?:useradd|userdel|usermod|groupadd|passwd)\b",
                Moderate,
                "account change",
            ),
        ];
        let readonly_verbs = vec![
            "ps", "df", "du", "free", "cat", "grep", "egrep", "head", "tail", "less", "wc",
            "ls", "stat", "file", "find", "uname", "uptime", "who", "w", "id", "hostname",
            "date", "env", "printenv", "ss", "netstat", "ip", "dig", "host", "ping", "echo",
            "which", "whereis", "journalctl", "dmesg", "lsblk", "lscpu", "lsmod", "mount",
            "true",
        ];
        Self {
            rules,
            readonly_verbs,
        }
    }

    /// Classify a command. The first matching rule wins; unmatched
    /// commands are `low` only when every pipeline segment starts with a
    /// read-only verb.
    pub fn classify(&self, command: &str) -> RiskAssessment {
        let trimmed = command.trim();
        for rule in &self.rules {
            if rule.pattern.is_match(trimmed) {
                return RiskAssessment {
                    level: rule.level,
                    rationale: rule.rationale.to_string(),
                };
            }
        }
        if self.all_segments_readonly(trimmed) {
            return RiskAssessment {
                level: RiskLevel::Low,
                rationale: "read-only observability command".to_string(),
            };
        }
        RiskAssessment {
            level: RiskLevel::Moderate,
            rationale: "unrecognized command; treated as a mutation".to_string(),
        }
    }

    /// `systemctl status` and friends are read-only despite the verb table
    /// not covering multi-word forms; handled here.
    fn all_segments_readonly(&self, command: &str) -> bool {
        let mut saw_segment = false;
        for segment in command.split(['|', ';', '&']) {
            let mut words = segment.split_whitespace();
            let Some(verb) = words.next() else { continue };
            saw_segment = true;
            let readonly = match verb {
                "systemctl" => matches!(
                    words.next(),
                    Some("status" | "show" | "list-units" | "is-active" | "is-enabled")
                ),
                "sudo" | "doas" => false,
                _ => self.readonly_verbs.contains(&verb),
            };
            if !readonly {
                return false;
            }
        }
        saw_segment
    }
}

impl Default for RiskClassifier {
    fn default() -> Self {
        Self::new()
    }
}

/// What the risk policy demands before execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConfirmationRequirement {
    /// Run without asking.
    None,
    /// A yes/no confirmation must be granted.
    Confirm,
    /// Confirmation with an echoed phrase must be granted.
    ConfirmWithPhrase,
}

/// What the caller has already supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum ConfirmationGiven {
    /// Nothing.
    #[default]
    None,
    /// A plain yes/no confirmation.
    Confirmed,
    /// A confirmation with the echoed phrase.
    ConfirmedWithPhrase,
}

impl ConfirmationGiven {
    /// Whether this grant satisfies `requirement`.
    pub fn satisfies(&self, requirement: ConfirmationRequirement) -> bool {
        match requirement {
            ConfirmationRequirement::None => true,
            ConfirmationRequirement::Confirm => {
                matches!(self, Self::Confirmed | Self::ConfirmedWithPhrase)
            }
            ConfirmationRequirement::ConfirmWithPhrase => {
                matches!(self, Self::ConfirmedWithPhrase)
            }
        }
    }
}

/// Map a risk level to the confirmation the policy demands.
///
/// - `low` runs freely unless `confirm_all` is set.
/// - `moderate` needs a confirmation, waived in `yes_mode`.
/// - `critical` needs a phrase confirmation; `yes_mode` waives it only
///   when the caller explicitly passed `allow_critical=true`.
pub fn confirmation_requirement(
    level: RiskLevel,
    exec: &ExecConfig,
    allow_critical: bool,
) -> ConfirmationRequirement {
    match level {
        RiskLevel::Low => {
            if exec.confirm_all {
                ConfirmationRequirement::Confirm
            } else {
                ConfirmationRequirement::None
            }
        }
        RiskLevel::Moderate => {
            if exec.yes_mode {
                ConfirmationRequirement::None
            } else {
                ConfirmationRequirement::Confirm
            }
        }
        RiskLevel::Critical => {
            if exec.yes_mode && exec.allow_critical && allow_critical {
                ConfirmationRequirement::None
            } else {
                ConfirmationRequirement::ConfirmWithPhrase
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(cmd: &str) -> RiskLevel {
        RiskClassifier::new().classify(cmd).level
    }

    #[test]
    fn critical_commands() {
        for cmd in [
            "rm -rf /",
            "rm -rf /etc",
            "rm -fr /var/lib",
            "mkfs.ext4 /dev/sdb1",
            "dd if=/dev/zero of=/dev/sda bs=1M",
            "shutdown -h now",
            "reboot",
            "halt",
            "poweroff",
            "killall nginx",
            "pkill -9 -u root",
            "echo x > /etc/passwd",
            "chown -R nobody /etc",
            "chmod 777 /",
            "systemctl stop sshd",
        ] {
            assert_eq!(classify(cmd), RiskLevel::Critical, "{cmd}");
        }
    }

    #[test]
    fn moderate_commands() {
        for cmd in [
            "systemctl restart nginx",
            "service nginx reload",
            "apt-get install -y htop",
            "dnf remove httpd",
            "chmod 644 /opt/app/config.yml",
            "kill -9 4242",
            "iptables -A INPUT -p tcp --dport 22 -j ACCEPT",
            "rm /tmp/scratch.log",
            "echo 'net.ipv4.ip_forward=1' >> /etc/sysctl.conf",
            "useradd deploy",
        ] {
            assert_eq!(classify(cmd), RiskLevel::Moderate, "{cmd}");
        }
    }

    #[test]
    fn low_commands() {
        for cmd in [
            "ps aux",
            "df -h /",
            "cat /var/log/syslog",
            "grep error /var/log/nginx/error.log | tail -20",
            "ss -tuln",
            "systemctl status nginx",
            "uname -a",
            "uptime",
        ] {
            assert_eq!(classify(cmd), RiskLevel::Low, "{cmd}");
        }
    }

    #[test]
    fn unknown_commands_default_moderate() {
        assert_eq!(classify("./deploy.sh --env prod"), RiskLevel::Moderate);
        assert_eq!(classify("terraform apply"), RiskLevel::Moderate);
    }

    #[test]
    fn first_match_wins_over_later_rules() {
        // `rm -rf /` must classify by the critical rule, not the moderate
        // generic `rm` rule further down the table.
        let assessment = RiskClassifier::new().classify("rm -rf /");
        assert_eq!(assessment.level, RiskLevel::Critical);
        assert!(assessment.rationale.contains("system root"));
    }

    #[test]
    fn chained_segments_are_scanned() {
        assert_eq!(classify("df -h && reboot"), RiskLevel::Critical);
        assert_eq!(classify("cat /etc/hosts; systemctl restart nginx"), RiskLevel::Moderate);
    }

    #[test]
    fn requirement_table() {
        use ConfirmationRequirement as Req;
        let interactive = ExecConfig::default();
        assert_eq!(
            confirmation_requirement(RiskLevel::Low, &interactive, false),
            Req::None
        );
        assert_eq!(
            confirmation_requirement(RiskLevel::Moderate, &interactive, false),
            Req::Confirm
        );
        assert_eq!(
            confirmation_requirement(RiskLevel::Critical, &interactive, true),
            Req::ConfirmWithPhrase
        );

        let confirm_all = ExecConfig {
            confirm_all: true,
            ..ExecConfig::default()
        };
        assert_eq!(
            confirmation_requirement(RiskLevel::Low, &confirm_all, false),
            Req::Confirm
        );

        let yes = ExecConfig {
            yes_mode: true,
            ..ExecConfig::default()
        };
        assert_eq!(
            confirmation_requirement(RiskLevel::Moderate, &yes, false),
            Req::None
        );
        // yes_mode alone never authorizes critical commands
        assert_eq!(
            confirmation_requirement(RiskLevel::Critical, &yes, true),
            Req::ConfirmWithPhrase
        );

        let yes_critical = ExecConfig {
            yes_mode: true,
            allow_critical: true,
            ..ExecConfig::default()
        };
        assert_eq!(
            confirmation_requirement(RiskLevel::Critical, &yes_critical, true),
            Req::None
        );
        // the per-call flag is still required
        assert_eq!(
            confirmation_requirement(RiskLevel::Critical, &yes_critical, false),
            Req::ConfirmWithPhrase
        );
    }

    #[test]
    fn given_satisfies_requirement() {
        use ConfirmationGiven as Given;
        use ConfirmationRequirement as Req;
        assert!(Given::None.satisfies(Req::None));
        assert!(!Given::None.satisfies(Req::Confirm));
        assert!(Given::Confirmed.satisfies(Req::Confirm));
        assert!(!Given::Confirmed.satisfies(Req::ConfirmWithPhrase));
        assert!(Given::ConfirmedWithPhrase.satisfies(Req::ConfirmWithPhrase));
    }
}
