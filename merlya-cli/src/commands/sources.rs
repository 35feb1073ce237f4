use clap::ArgMatches;
use merlya::dispatch::ExecutionContext;
use merlya::types::DispatchError;
use std::sync::Arc;

fn store_err(e: merlya::store::StoreError) -> DispatchError {
    use merlya::store::StoreError;
    match e {
        StoreError::NotFound(m) => DispatchError::NotFound(m),
        other => DispatchError::Persistence(other.to_string()),
    }
}

pub fn list(ctx: &Arc<ExecutionContext>) -> Result<(), DispatchError> {
    let sources = ctx.store.sources().map_err(store_err)?;
    if sources.is_empty() {
        println!("no import sources");
        return Ok(());
    }
    for source in sources {
        println!(
            "{:<24} {:<12} {} hosts  {}",
            source.name,
            source.source_type,
            source.host_count,
            source.file_path.unwrap_or_default(),
        );
    }
    Ok(())
}

pub fn delete(ctx: &Arc<ExecutionContext>, sub: &ArgMatches) -> Result<(), DispatchError> {
    let name = sub.get_one::<String>("name").expect("required");
    let removed = ctx.store.delete_source(name).map_err(store_err)?;
    println!("source {name} removed; {removed} hosts tombstoned");
    Ok(())
}
