//! Privilege-elevation command rewriting.
//!
//! [`apply_elevation`] first strips any wrapper the caller already added
//! (so `sudo sudo …` can never be produced), then rewrites the command into
//! the form the host's `elevation_method` requires and prepares the
//! password bytes piped on standard input. The password never appears in
//! the command string and is carried in a zeroizing buffer.

use crate::SshError;
use merlya_secret::SecretValue;
use merlya_types::{ElevationMethod, Host};
use zeroize::Zeroizing;

/// A command ready to send, with its elevation applied.
pub struct ElevatedCommand {
    /// The rewritten command line.
    pub command: String,
    /// Bytes to pipe on standard input (password + newline), if any.
    pub stdin: Option<Zeroizing<Vec<u8>>>,
    /// The canonical credential key that was used, for audit metadata.
    pub credential_key: Option<String>,
    /// The method that was applied.
    pub method: ElevationMethod,
}

impl ElevatedCommand {
    /// Whether a password is piped on standard input.
    pub fn stdin_used(&self) -> bool {
        self.stdin.is_some()
    }
}

impl std::fmt::Debug for ElevatedCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElevatedCommand")
            .field("command", &self.command)
            .field("stdin", &self.stdin.as_ref().map(|_| "***"))
            .field("credential_key", &self.credential_key)
            .field("method", &self.method)
            .finish()
    }
}

/// Remove one level of `sudo`/`doas`/`su -c '…'` wrapping. Idempotent on
/// unwrapped commands.
pub fn strip_elevation(command: &str) -> String {
    let trimmed = command.trim_start();

    if let Some(rest) = trimmed.strip_prefix("sudo ") {
        let mut rest = rest.trim_start();
        loop {
            if let Some(r) = rest.strip_prefix("-n ") {
                rest = r.trim_start();
            } else if let Some(r) = rest.strip_prefix("-S ") {
                rest = r.trim_start();
            } else if let Some(r) = rest.strip_prefix("-p ") {
                rest = skip_prompt_argument(r.trim_start());
            } else {
                break;
            }
        }
        return rest.to_string();
    }
    if let Some(rest) = trimmed.strip_prefix("doas ") {
        return rest.trim_start().to_string();
    }
    if let Some(inner) = unwrap_su(trimmed) {
        return inner;
    }
    command.to_string()
}

/// Rewrite `command` for `host`'s elevation method.
///
/// `credential` must be present for the `_password` methods and `su`;
/// absence is [`SshError::ElevationCredentialMissing`] naming the canonical
/// key. The strip step always runs first, so double-prefixing cannot occur.
pub fn apply_elevation(
    host: &Host,
    command: &str,
    credential: Option<&SecretValue>,
) -> Result<ElevatedCommand, SshError> {
    let clean = strip_elevation(command.trim());
    let method = host.elevation_method;
    let credential_key = method.credential_key(&host.name);

    let require_credential = || -> Result<Zeroizing<Vec<u8>>, SshError> {
        let key = credential_key
            .clone()
            .unwrap_or_else(|| format!("{}:{}:password", method.as_str(), host.name));
        match credential {
            Some(secret) => {
                let mut bytes = secret.with_bytes(|b| Zeroizing::new(b.to_vec()));
                bytes.push(b'\n');
                Ok(bytes)
            }
            None => Err(SshError::ElevationCredentialMissing { key }),
        }
    };

    let (command, stdin) = match method {
        ElevationMethod::None => (clean, None),
        ElevationMethod::Sudo => (format!("sudo -n {clean}"), None),
        ElevationMethod::SudoPassword => {
            (format!("sudo -S -p '' {clean}"), Some(require_credential()?))
        }
        ElevationMethod::Doas => (format!("doas {clean}"), None),
        ElevationMethod::DoasPassword => (format!("doas {clean}"), Some(require_credential()?)),
        ElevationMethod::Su => (
            format!("su -c '{}'", escape_single_quotes(&clean)),
            Some(require_credential()?),
        ),
    };

    Ok(ElevatedCommand {
        command,
        stdin,
        credential_key,
        method,
    })
}

/// Single-quote escaping for `su -c '…'`: each embedded `'` becomes
/// `'"'"'`. No other mutation is performed on the command string.
fn escape_single_quotes(command: &str) -> String {
    command.replace('\'', r#"'"'"'"#)
}

fn skip_prompt_argument(s: &str) -> &str {
    if let Some(rest) = s.strip_prefix("''") {
        return rest.trim_start();
    }
    if let Some(after_open) = s.strip_prefix('\'') {
        if let Some(end) = after_open.find('\'') {
            return after_open[end + 1..].trim_start();
        }
    }
    match s.find(' ') {
        Some(i) => s[i + 1..].trim_start(),
        None => "",
    }
}

fn unwrap_su(command: &str) -> Option<String> {
    let rest = command.strip_prefix("su ")?.trim_start();
    let rest = rest.strip_prefix("-c ")?.trim_start();
    let quoted = rest.strip_prefix('\'')?;
    let inner = quoted.strip_suffix('\'')?;
    Some(inner.replace(r#"'"'"'"#, "'"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use merlya_types::HostName;

    fn host(method: ElevationMethod) -> Host {
        let mut host = Host::new(HostName::parse("box-1").unwrap(), "10.0.0.1");
        host.elevation_method = method;
        host
    }

    fn secret(s: &str) -> SecretValue {
        SecretValue::from_string(s.to_string())
    }

    #[test]
    fn none_returns_command_unchanged() {
        let out = apply_elevation(&host(ElevationMethod::None), "df -h /", None).unwrap();
        assert_eq!(out.command, "df -h /");
        assert!(out.stdin.is_none());
        assert_eq!(out.credential_key, None);
    }

    #[test]
    fn sudo_prepends_non_interactive_flag() {
        let out = apply_elevation(&host(ElevationMethod::Sudo), "df -h /", None).unwrap();
        assert_eq!(out.command, "sudo -n df -h /");
        assert!(!out.stdin_used());
    }

    #[test]
    fn sudo_password_pipes_credential_with_newline() {
        let s = secret("s3cr3t");
        let out = apply_elevation(
            &host(ElevationMethod::SudoPassword),
            "systemctl restart nginx",
            Some(&s),
        )
        .unwrap();
        assert_eq!(out.command, "sudo -S -p '' systemctl restart nginx");
        assert_eq!(out.stdin.as_deref().map(|b| b.to_vec()), Some(b"s3cr3t\n".to_vec()));
        assert_eq!(out.credential_key.as_deref(), Some("sudo:box-1:password"));
        assert!(out.stdin_used());
        // the password never lands in the command string
        assert!(!out.command.contains("s3cr3t"));
    }

    #[test]
    fn missing_credential_names_the_key() {
        let err =
            apply_elevation(&host(ElevationMethod::SudoPassword), "ls", None).unwrap_err();
        match err {
            SshError::ElevationCredentialMissing { key } => {
                assert_eq!(key, "sudo:box-1:password");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn doas_variants() {
        let out = apply_elevation(&host(ElevationMethod::Doas), "ls", None).unwrap();
        assert_eq!(out.command, "doas ls");
        assert!(!out.stdin_used());

        let s = secret("pw");
        let out = apply_elevation(&host(ElevationMethod::DoasPassword), "ls", Some(&s)).unwrap();
        assert_eq!(out.command, "doas ls");
        assert_eq!(out.stdin.as_deref().map(|b| b.to_vec()), Some(b"pw\n".to_vec()));
        assert_eq!(out.credential_key.as_deref(), Some("doas:box-1:password"));
    }

    #[test]
    fn su_wraps_and_escapes_quotes() {
        let s = secret("rootpw");
        let out = apply_elevation(
            &host(ElevationMethod::Su),
            "echo 'it''s fine'",
            Some(&s),
        )
        .unwrap();
        assert_eq!(
            out.command,
            r#"su -c 'echo '"'"'it'"'"''"'"'s fine'"'"''"#
        );
        assert_eq!(out.credential_key.as_deref(), Some("root:box-1:password"));
    }

    #[test]
    fn strip_is_idempotent_and_unwraps_one_level() {
        assert_eq!(strip_elevation("df -h"), "df -h");
        assert_eq!(strip_elevation("sudo df -h"), "df -h");
        assert_eq!(strip_elevation("sudo -n df -h"), "df -h");
        assert_eq!(strip_elevation("sudo -S df -h"), "df -h");
        assert_eq!(strip_elevation("sudo -S -p '' df -h"), "df -h");
        assert_eq!(strip_elevation("doas df -h"), "df -h");
        assert_eq!(strip_elevation("su -c 'df -h'"), "df -h");
        assert_eq!(
            strip_elevation(r#"su -c 'echo '"'"'x'"'"''"#),
            "echo 'x'"
        );
    }

    #[test]
    fn double_prefixing_never_occurs() {
        let out = apply_elevation(&host(ElevationMethod::Sudo), "sudo df -h", None).unwrap();
        assert_eq!(out.command, "sudo -n df -h");

        let s = secret("pw");
        let out = apply_elevation(
            &host(ElevationMethod::SudoPassword),
            "sudo -S -p '' systemctl stop nginx",
            Some(&s),
        )
        .unwrap();
        assert_eq!(out.command, "sudo -S -p '' systemctl stop nginx");
    }

    #[test]
    fn strip_after_apply_roundtrips() {
        let s = secret("pw");
        for method in [
            ElevationMethod::None,
            ElevationMethod::Sudo,
            ElevationMethod::SudoPassword,
            ElevationMethod::Doas,
            ElevationMethod::DoasPassword,
            ElevationMethod::Su,
        ] {
            let out = apply_elevation(&host(method), "tail -f /var/log/app.log", Some(&s)).unwrap();
            assert_eq!(
                strip_elevation(&out.command),
                "tail -f /var/log/app.log",
                "{method:?}"
            );
        }
    }

    #[test]
    fn debug_masks_stdin() {
        let s = secret("s3cr3t");
        let out =
            apply_elevation(&host(ElevationMethod::SudoPassword), "ls", Some(&s)).unwrap();
        let printed = format!("{out:?}");
        assert!(printed.contains("***"));
        assert!(!printed.contains("s3cr3t"));
    }
}
