use clap::ArgMatches;
use dialoguer::Password;
use merlya::dispatch::ExecutionContext;
use merlya::secret::SecretValue;
use merlya::types::{DispatchError, SecretKey};
use std::sync::Arc;

fn parse_key(raw: &str) -> Result<SecretKey, DispatchError> {
    SecretKey::parse(raw).map_err(|e| DispatchError::Validation(e.to_string()))
}

pub fn set(ctx: &Arc<ExecutionContext>, sub: &ArgMatches) -> Result<(), DispatchError> {
    let key = parse_key(sub.get_one::<String>("key").expect("required"))?;
    let value = Password::new()
        .with_prompt(format!("Value for {key}"))
        .with_confirmation("Repeat to confirm", "Values differ")
        .interact()
        .map_err(|e| DispatchError::Validation(format!("prompt failed: {e}")))?;
    ctx.secrets
        .set(&key, SecretValue::from_string(value))
        .map_err(|e| DispatchError::Validation(e.to_string()))?;
    let location = if key.is_persistable() && ctx.secrets.keyring_available() {
        "memory + keyring"
    } else {
        "memory only"
    };
    println!("secret {key} stored ({location})");
    Ok(())
}

pub fn clear(ctx: &Arc<ExecutionContext>, sub: &ArgMatches) -> Result<(), DispatchError> {
    let key = parse_key(sub.get_one::<String>("key").expect("required"))?;
    ctx.secrets.clear(&key);
    println!("secret {key} cleared");
    Ok(())
}

pub fn list(ctx: &Arc<ExecutionContext>) -> Result<(), DispatchError> {
    let names = ctx.secrets.names();
    if names.is_empty() {
        println!("no resident secrets");
        return Ok(());
    }
    for name in names {
        println!("{name}");
    }
    Ok(())
}
