//! Command-line surface. The REPL is the default entry point; subcommands
//! cover one-shot host, secret, variable and exec operations.

use clap::{Arg, ArgAction, Command};

pub fn build_cli() -> Command {
    Command::new("merlya")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Natural-language fleet assistant for SSH execution")
        .arg(
            Arg::new("yes")
                .long("yes")
                .short('y')
                .global(true)
                .help("Skip confirmation prompts for moderate-risk commands")
                .action(ArgAction::SetTrue),
        )
        .subcommand(host_command())
        .subcommand(secret_command())
        .subcommand(var_command())
        .subcommand(source_command())
        .subcommand(exec_command())
        .subcommand(probe_command())
        .subcommand(repl_command())
}

fn host_command() -> Command {
    Command::new("host")
        .about("Manage the host inventory")
        .subcommand_required(true)
        .subcommand(
            Command::new("add")
                .about("Add or update a host")
                .arg(Arg::new("name").required(true))
                .arg(Arg::new("hostname").required(true))
                .arg(Arg::new("port").long("port").value_parser(clap::value_parser!(u16)))
                .arg(Arg::new("user").long("user"))
                .arg(Arg::new("key").long("key").help("Private key path"))
                .arg(Arg::new("jump").long("jump").help("Jump host name"))
                .arg(
                    Arg::new("tag")
                        .long("tag")
                        .action(ArgAction::Append)
                        .help("Tag; repeatable"),
                )
                .arg(
                    Arg::new("elevation")
                        .long("elevation")
                        .value_parser(["none", "sudo", "sudo_password", "doas", "doas_password", "su"])
                        .help("Privilege elevation method"),
                ),
        )
        .subcommand(
            Command::new("delete")
                .about("Delete a host (tombstoned, not erased)")
                .arg(Arg::new("name").required(true))
                .arg(Arg::new("reason").long("reason").default_value("cli-delete")),
        )
        .subcommand(
            Command::new("list")
                .about("List hosts")
                .arg(Arg::new("pattern").help("Substring match on name or hostname"))
                .arg(Arg::new("tag").long("tag"))
                .arg(Arg::new("env").long("env"))
                .arg(Arg::new("group").long("group"))
                .arg(
                    Arg::new("limit")
                        .long("limit")
                        .value_parser(clap::value_parser!(usize))
                        .default_value("50"),
                )
                .arg(
                    Arg::new("offset")
                        .long("offset")
                        .value_parser(clap::value_parser!(usize))
                        .default_value("0"),
                ),
        )
        .subcommand(
            Command::new("show")
                .about("Show one host with its version history")
                .arg(Arg::new("name").required(true)),
        )
        .subcommand(
            Command::new("import")
                .about("Import hosts from an ssh_config-style file")
                .arg(Arg::new("path").required(true))
                .arg(Arg::new("source").long("source").help("Source name; defaults to the file name")),
        )
}

fn secret_command() -> Command {
    Command::new("secret")
        .about("Manage in-memory/keyring secrets")
        .subcommand_required(true)
        .subcommand(
            Command::new("set")
                .about("Store a secret (value prompted, never echoed)")
                .arg(Arg::new("key").required(true)),
        )
        .subcommand(
            Command::new("clear")
                .about("Remove a secret from memory and keyring")
                .arg(Arg::new("key").required(true)),
        )
        .subcommand(Command::new("list").about("List secret names (never values)"))
}

fn var_command() -> Command {
    Command::new("var")
        .about("Manage non-sensitive config variables")
        .subcommand_required(true)
        .subcommand(
            Command::new("set")
                .arg(Arg::new("name").required(true))
                .arg(Arg::new("value").required(true)),
        )
        .subcommand(Command::new("get").arg(Arg::new("name").required(true)))
        .subcommand(Command::new("list"))
        .subcommand(Command::new("delete").arg(Arg::new("name").required(true)))
}

fn source_command() -> Command {
    Command::new("source")
        .about("Manage inventory import sources")
        .subcommand_required(true)
        .subcommand(Command::new("list"))
        .subcommand(
            Command::new("delete")
                .about("Remove a source and tombstone the hosts it created")
                .arg(Arg::new("name").required(true)),
        )
}

fn exec_command() -> Command {
    Command::new("exec")
        .about("Run one command on one host")
        .arg(Arg::new("host").required(true))
        .arg(
            Arg::new("command")
                .required(true)
                .num_args(1..)
                .trailing_var_arg(true),
        )
        .arg(
            Arg::new("allow-critical")
                .long("allow-critical")
                .help("With --yes: permit critical-risk commands")
                .action(ArgAction::SetTrue),
        )
}

fn probe_command() -> Command {
    Command::new("probe")
        .about("Run `uname -a` and store the host's OS snapshot")
        .arg(Arg::new("host").required(true))
}

fn repl_command() -> Command {
    Command::new("repl").about("Interactive shell (the default)")
}
