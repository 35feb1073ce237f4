use clap::ArgMatches;
use merlya::dispatch::ExecutionContext;
use merlya::types::DispatchError;
use std::sync::Arc;

fn store_err(e: merlya::store::StoreError) -> DispatchError {
    DispatchError::Persistence(e.to_string())
}

pub fn set(ctx: &Arc<ExecutionContext>, sub: &ArgMatches) -> Result<(), DispatchError> {
    let name = sub.get_one::<String>("name").expect("required");
    let value = sub.get_one::<String>("value").expect("required");
    ctx.store.var_set(name, value).map_err(store_err)?;
    println!("{name} = {value}");
    Ok(())
}

pub fn get(ctx: &Arc<ExecutionContext>, sub: &ArgMatches) -> Result<(), DispatchError> {
    let name = sub.get_one::<String>("name").expect("required");
    match ctx.store.var_get(name).map_err(store_err)? {
        Some(value) => {
            println!("{value}");
            Ok(())
        }
        None => Err(DispatchError::NotFound(format!("variable {name:?}"))),
    }
}

pub fn list(ctx: &Arc<ExecutionContext>) -> Result<(), DispatchError> {
    for name in ctx.store.var_names().map_err(store_err)? {
        let value = ctx.store.var_get(&name).map_err(store_err)?.unwrap_or_default();
        println!("{name} = {value}");
    }
    Ok(())
}

pub fn delete(ctx: &Arc<ExecutionContext>, sub: &ArgMatches) -> Result<(), DispatchError> {
    let name = sub.get_one::<String>("name").expect("required");
    ctx.store.var_delete(name).map_err(store_err)?;
    println!("{name} deleted");
    Ok(())
}
