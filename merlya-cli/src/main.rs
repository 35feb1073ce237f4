mod cli;
mod commands;
mod config_file;
mod i18n;
mod paths;
mod prompts;
mod repl;

use crate::commands::exec::ExecRequest;
use crate::i18n::Messages;
use merlya::dispatch::{ContextBuilder, Dispatcher};
use merlya::secret::OsKeyring;
use merlya::store::InventoryStore;
use merlya::types::DispatchError;
use std::process;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    process::exit(run().await);
}

async fn run() -> i32 {
    let matches = cli::build_cli().get_matches();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("MERLYA_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let paths = match paths::Paths::new() {
        Ok(paths) => paths,
        Err(e) => {
            eprintln!("{e}");
            return 1;
        }
    };
    let mut config = match config_file::load(&paths.config_file()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("bad configuration: {e}");
            return 2;
        }
    };
    if matches.get_flag("yes") {
        config.exec.yes_mode = true;
    }
    let interactive = !config.exec.yes_mode;
    let messages = Messages::from_config(&config.i18n);

    let store = match InventoryStore::open(&paths.inventory_db()) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            eprintln!("cannot open the inventory: {e}");
            return 1;
        }
    };

    let mut builder = ContextBuilder::new(config)
        .store(store)
        .keyring(Arc::new(OsKeyring::new()));
    if interactive {
        builder = builder.prompts(Arc::new(prompts::DialoguerPrompts));
    }
    let ctx = match builder.build() {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("{e}");
            return e.exit_code();
        }
    };
    ctx.start_maintenance();
    let dispatcher = Dispatcher::new(Arc::clone(&ctx));

    let code = dispatch_command(&matches, &dispatcher, &messages, interactive).await;
    ctx.shutdown().await;
    code
}

async fn dispatch_command(
    matches: &clap::ArgMatches,
    dispatcher: &Dispatcher,
    messages: &Messages,
    interactive: bool,
) -> i32 {
    let ctx = dispatcher.context();
    let result: Result<(), DispatchError> = match matches.subcommand() {
        Some(("host", sub)) => match sub.subcommand() {
            Some(("add", sub)) => commands::hosts::add(ctx, sub),
            Some(("delete", sub)) => commands::hosts::delete(ctx, sub),
            Some(("list", sub)) => commands::hosts::list(ctx, sub),
            Some(("show", sub)) => commands::hosts::show(ctx, sub),
            Some(("import", sub)) => commands::hosts::import(ctx, sub),
            _ => unreachable!("subcommand required"),
        },
        Some(("secret", sub)) => match sub.subcommand() {
            Some(("set", sub)) => commands::secrets::set(ctx, sub),
            Some(("clear", sub)) => commands::secrets::clear(ctx, sub),
            Some(("list", _)) => commands::secrets::list(ctx),
            _ => unreachable!("subcommand required"),
        },
        Some(("var", sub)) => match sub.subcommand() {
            Some(("set", sub)) => commands::vars::set(ctx, sub),
            Some(("get", sub)) => commands::vars::get(ctx, sub),
            Some(("list", _)) => commands::vars::list(ctx),
            Some(("delete", sub)) => commands::vars::delete(ctx, sub),
            _ => unreachable!("subcommand required"),
        },
        Some(("source", sub)) => match sub.subcommand() {
            Some(("list", _)) => commands::sources::list(ctx),
            Some(("delete", sub)) => commands::sources::delete(ctx, sub),
            _ => unreachable!("subcommand required"),
        },
        Some(("exec", sub)) => {
            let host = sub.get_one::<String>("host").expect("required");
            let command = sub
                .get_many::<String>("command")
                .expect("required")
                .cloned()
                .collect::<Vec<_>>()
                .join(" ");
            let request = ExecRequest {
                host,
                command: &command,
                allow_critical: sub.get_flag("allow-critical"),
                interactive,
            };
            return match commands::exec::run(dispatcher, messages, request, ctrl_c_token()).await
            {
                Ok(0) => 0,
                Ok(_) => 1,
                Err(e) => report(e),
            };
        }
        Some(("probe", sub)) => {
            let host = sub.get_one::<String>("host").expect("required");
            match dispatcher.probe_host(host, ctrl_c_token()).await {
                Ok(os_info) => {
                    println!("{os_info}");
                    Ok(())
                }
                Err(e) => Err(e),
            }
        }
        Some(("repl", _)) | None => return repl::run(dispatcher, messages).await,
        _ => unreachable!("clap rejects unknown subcommands"),
    };

    match result {
        Ok(()) => 0,
        Err(e) => report(e),
    }
}

fn report(e: DispatchError) -> i32 {
    eprintln!("{e}");
    eprintln!("  {}", e.guidance());
    e.exit_code()
}

fn ctrl_c_token() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            child.cancel();
        }
    });
    token
}
