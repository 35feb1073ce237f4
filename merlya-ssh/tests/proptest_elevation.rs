//! Property tests for the elevation rewrite laws.

use merlya_secret::SecretValue;
use merlya_ssh::{apply_elevation, strip_elevation};
use merlya_types::{ElevationMethod, Host, HostName};
use proptest::prelude::*;

fn host(method: ElevationMethod) -> Host {
    let mut host = Host::new(HostName::parse("box-1").unwrap(), "10.0.0.1");
    host.elevation_method = method;
    host
}

fn methods() -> impl Strategy<Value = ElevationMethod> {
    prop_oneof![
        Just(ElevationMethod::None),
        Just(ElevationMethod::Sudo),
        Just(ElevationMethod::SudoPassword),
        Just(ElevationMethod::Doas),
        Just(ElevationMethod::DoasPassword),
        Just(ElevationMethod::Su),
    ]
}

proptest! {
    /// `strip(apply(command, method)) == command` for every method and
    /// every command that does not itself start with a wrapper.
    #[test]
    fn strip_after_apply_is_identity(
        method in methods(),
        command in "[a-z][a-z0-9 /'._-]{0,60}",
    ) {
        prop_assume!(!command.starts_with("sudo ") && !command.starts_with("doas ")
            && !command.starts_with("su "));
        let trimmed = command.trim().to_string();
        prop_assume!(!trimmed.is_empty());
        let secret = SecretValue::from_string("pw".into());
        let out = apply_elevation(&host(method), &trimmed, Some(&secret)).unwrap();
        prop_assert_eq!(strip_elevation(&out.command), trimmed);
    }

    /// Applying elevation twice produces the same wire command as once;
    /// double-prefixing cannot occur.
    #[test]
    fn apply_is_idempotent_on_its_own_output(
        method in methods(),
        command in "[a-z][a-z0-9 /._-]{0,60}",
    ) {
        let trimmed = command.trim().to_string();
        prop_assume!(!trimmed.is_empty());
        let secret = SecretValue::from_string("pw".into());
        let target = host(method);
        let once = apply_elevation(&target, &trimmed, Some(&secret)).unwrap();
        let twice = apply_elevation(&target, &once.command, Some(&secret)).unwrap();
        prop_assert_eq!(&twice.command, &once.command);
    }

    /// The password never appears in the rewritten command line.
    #[test]
    fn password_never_in_command(
        method in methods(),
        password in "[!-~]{8,24}",
    ) {
        let secret = SecretValue::from_string(password.clone());
        let out = apply_elevation(&host(method), "systemctl restart app", Some(&secret)).unwrap();
        prop_assert!(!out.command.contains(&password));
    }
}
