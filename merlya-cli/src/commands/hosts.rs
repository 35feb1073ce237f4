use clap::ArgMatches;
use merlya::dispatch::ExecutionContext;
use merlya::store::{HostSearch, parse_ssh_config};
use merlya::types::{DispatchError, ElevationMethod, FieldUpdate, HostName, HostPatch};
use std::collections::BTreeSet;
use std::sync::Arc;

fn store_err(e: merlya::store::StoreError) -> DispatchError {
    use merlya::store::StoreError;
    match e {
        StoreError::Validation(m) => DispatchError::Validation(m),
        StoreError::NotFound(m) => DispatchError::NotFound(m),
        StoreError::Conflict(m) => DispatchError::Conflict(m),
        other => DispatchError::Persistence(other.to_string()),
    }
}

fn parse_name(raw: &str) -> Result<HostName, DispatchError> {
    HostName::parse(raw).map_err(|e| DispatchError::Validation(e.to_string()))
}

pub fn add(ctx: &Arc<ExecutionContext>, sub: &ArgMatches) -> Result<(), DispatchError> {
    let name = parse_name(sub.get_one::<String>("name").expect("required"))?;
    let mut patch = HostPatch {
        hostname: sub.get_one::<String>("hostname").cloned(),
        port: sub.get_one::<u16>("port").copied(),
        ..HostPatch::default()
    };
    if let Some(user) = sub.get_one::<String>("user") {
        patch.username = FieldUpdate::Set(user.clone());
    }
    if let Some(key) = sub.get_one::<String>("key") {
        patch.private_key_path = FieldUpdate::Set(key.clone());
    }
    if let Some(jump) = sub.get_one::<String>("jump") {
        patch.jump_host = FieldUpdate::Set(parse_name(jump)?);
    }
    if let Some(tags) = sub.get_many::<String>("tag") {
        patch.tags = Some(tags.cloned().collect::<BTreeSet<_>>());
    }
    if let Some(method) = sub.get_one::<String>("elevation") {
        patch.elevation_method = ElevationMethod::from_str_opt(method);
    }
    ctx.store
        .add_host(&name, patch, "cli", None)
        .map_err(store_err)?;
    println!("host {name} saved");
    Ok(())
}

pub fn delete(ctx: &Arc<ExecutionContext>, sub: &ArgMatches) -> Result<(), DispatchError> {
    let name = parse_name(sub.get_one::<String>("name").expect("required"))?;
    let reason = sub.get_one::<String>("reason").expect("defaulted");
    ctx.store.delete_host(&name, reason).map_err(store_err)?;
    println!("host {name} deleted ({reason})");
    Ok(())
}

pub fn list(ctx: &Arc<ExecutionContext>, sub: &ArgMatches) -> Result<(), DispatchError> {
    let search = HostSearch {
        pattern: sub.get_one::<String>("pattern").cloned(),
        tag: sub.get_one::<String>("tag").cloned(),
        environment: sub.get_one::<String>("env").cloned(),
        group: sub.get_one::<String>("group").cloned(),
        limit: *sub.get_one::<usize>("limit").expect("defaulted"),
        offset: *sub.get_one::<usize>("offset").expect("defaulted"),
    };
    let hosts = ctx.store.search_hosts(&search).map_err(store_err)?;
    if hosts.is_empty() {
        println!("no hosts");
        return Ok(());
    }
    for host in hosts {
        let jump = host
            .jump_host
            .as_ref()
            .map(|j| format!(" via {j}"))
            .unwrap_or_default();
        println!(
            "{:<24} {}:{}{jump}  [{}] {} {}",
            host.name.as_str(),
            host.hostname,
            host.port,
            host.elevation_method.as_str(),
            host.health_status.as_str(),
            host.tags.iter().cloned().collect::<Vec<_>>().join(","),
        );
    }
    Ok(())
}

pub fn show(ctx: &Arc<ExecutionContext>, sub: &ArgMatches) -> Result<(), DispatchError> {
    let reference = sub.get_one::<String>("name").expect("required");
    let host = ctx
        .store
        .get_host(reference)
        .map_err(store_err)?
        .ok_or_else(|| DispatchError::NotFound(format!("host {reference:?}")))?;
    println!(
        "{}",
        serde_json::to_string_pretty(&host).unwrap_or_else(|_| format!("{host:?}"))
    );
    let versions = ctx.store.versions(&host.name).map_err(store_err)?;
    for (version, changes, changed_by, at) in versions {
        println!("  v{version} [{}] {} ({changed_by})", at.to_rfc3339(), changes.join(", "));
    }
    Ok(())
}

pub fn import(ctx: &Arc<ExecutionContext>, sub: &ArgMatches) -> Result<(), DispatchError> {
    let path = sub.get_one::<String>("path").expect("required");
    let text = std::fs::read_to_string(path)
        .map_err(|e| DispatchError::Validation(format!("{path}: {e}")))?;
    let source = sub
        .get_one::<String>("source")
        .cloned()
        .unwrap_or_else(|| {
            std::path::Path::new(path)
                .file_name()
                .map(|f| f.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.clone())
        });

    let parsed = parse_ssh_config(&text);
    let hosts: Vec<(HostName, HostPatch)> =
        parsed.iter().filter_map(|h| h.to_patch()).collect();
    let skipped = parsed.len() - hosts.len();

    ctx.store
        .register_source(&source, "ssh_config", Some(path), "cli")
        .map_err(store_err)?;
    let written = ctx
        .store
        .bulk_add_hosts(hosts, &source)
        .map_err(store_err)?;
    println!("imported {written} hosts from {path} (source {source}, {skipped} skipped)");
    Ok(())
}
