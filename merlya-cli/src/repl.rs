//! Interactive shell. The natural-language front-end lives elsewhere; this
//! surface speaks the substrate directly: `run <host> <command>` (or
//! `@host <command>`) plus `:` inspection commands.

use crate::commands::exec::{self, ExecRequest};
use crate::i18n::{Messages, Msg};
use merlya::dispatch::Dispatcher;
use merlya::store::HostSearch;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tokio_util::sync::CancellationToken;

pub async fn run(dispatcher: &Dispatcher, messages: &Messages) -> i32 {
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            eprintln!("cannot start the line editor: {e}");
            return 1;
        }
    };
    println!("{}", messages.get(Msg::ReplHello));

    loop {
        match editor.readline("merlya> ") {
            Ok(line) => {
                let line = line.trim().to_string();
                if line.is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(&line);
                if line == ":quit" || line == ":q" {
                    break;
                }
                handle_line(dispatcher, messages, &line).await;
            }
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("readline: {e}");
                return 1;
            }
        }
    }
    println!("{}", messages.get(Msg::Goodbye));
    0
}

async fn handle_line(dispatcher: &Dispatcher, messages: &Messages, line: &str) {
    let ctx = dispatcher.context();
    match line {
        ":help" => {
            println!(
                "  run <host> <command>   execute on a host (also: @host <command>)\n\
                 \x20 :hosts                 list inventory\n\
                 \x20 :host <name>           one host in detail\n\
                 \x20 :secrets               resident secret names\n\
                 \x20 :stats                 execution counters and pool occupancy\n\
                 \x20 :breaker               circuit breaker states\n\
                 \x20 :audit [n]             recent audit records\n\
                 \x20 :quit                  leave"
            );
        }
        ":hosts" => match ctx.store.search_hosts(&HostSearch::default()) {
            Ok(hosts) if hosts.is_empty() => println!("{}", messages.get(Msg::NothingFound)),
            Ok(hosts) => {
                for host in hosts {
                    println!(
                        "{:<24} {}:{} [{}] {}",
                        host.name.as_str(),
                        host.hostname,
                        host.port,
                        host.elevation_method.as_str(),
                        host.health_status.as_str(),
                    );
                }
            }
            Err(e) => eprintln!("{e}"),
        },
        ":secrets" => {
            for name in ctx.secrets.names() {
                println!("{name}");
            }
        }
        ":stats" => {
            let metrics = ctx.metrics.snapshot();
            let pool = ctx.pool.stats();
            println!(
                "commands: {} run, {} failed, {} blocked, {} cancelled",
                metrics.commands_run,
                metrics.commands_failed,
                metrics.commands_blocked,
                metrics.commands_cancelled,
            );
            println!(
                "breaker rejections: {}, loop signals: {}, transfers: {}",
                metrics.breaker_rejections, metrics.loop_signals, metrics.transfers,
            );
            println!(
                "pool: {} hosts, {} sessions ({} in use)",
                pool.hosts, pool.sessions, pool.in_use
            );
        }
        ":breaker" => {
            let snapshots = ctx.breakers.snapshots();
            if snapshots.is_empty() {
                println!("{}", messages.get(Msg::NothingFound));
            }
            for (host, snap) in snapshots {
                println!(
                    "{:<24} {:<9} {} consecutive, {}/{} fail/ok, {}s in state",
                    host.as_str(),
                    snap.state,
                    snap.consecutive_failures,
                    snap.total_failures,
                    snap.total_successes,
                    snap.time_in_state_secs,
                );
            }
        }
        _ => {
            if let Some(rest) = line.strip_prefix(":host ") {
                show_host(dispatcher, rest.trim()).await;
            } else if let Some(rest) = line.strip_prefix(":audit") {
                let limit = rest.trim().parse().unwrap_or(10);
                match ctx.store.recent_audit(limit) {
                    Ok(records) => {
                        for r in records {
                            println!(
                                "[{}] {} {} {} -> {}",
                                r.timestamp.to_rfc3339(),
                                r.actor,
                                r.action,
                                r.target,
                                r.outcome.as_str(),
                            );
                        }
                    }
                    Err(e) => eprintln!("{e}"),
                }
            } else if let Some((host, command)) = parse_run(line) {
                run_command(dispatcher, messages, &host, &command).await;
            } else {
                println!("unrecognized; `:help` lists commands");
            }
        }
    }
}

fn parse_run(line: &str) -> Option<(String, String)> {
    let rest = line
        .strip_prefix("run ")
        .or_else(|| line.strip_prefix('@'))?;
    let (host, command) = rest.trim().split_once(char::is_whitespace)?;
    let command = command.trim();
    (!command.is_empty()).then(|| (host.to_string(), command.to_string()))
}

async fn run_command(dispatcher: &Dispatcher, messages: &Messages, host: &str, command: &str) {
    let cancel = CancellationToken::new();
    let result = exec::run(
        dispatcher,
        messages,
        ExecRequest {
            host,
            command,
            allow_critical: false,
            interactive: true,
        },
        cancel,
    )
    .await;
    match result {
        Ok(0) => {}
        Ok(code) => eprintln!("exit code {code}"),
        Err(e) => {
            if matches!(e, merlya::types::DispatchError::BreakerOpen { .. }) {
                eprintln!("{}", messages.get(Msg::BreakerOpen));
            }
            eprintln!("{e}");
            eprintln!("  {}", e.guidance());
        }
    }
}

async fn show_host(dispatcher: &Dispatcher, reference: &str) {
    let ctx = dispatcher.context();
    match ctx.store.get_host(reference) {
        Ok(Some(host)) => {
            println!(
                "{}",
                serde_json::to_string_pretty(&host).unwrap_or_else(|_| format!("{host:?}"))
            );
            for session in ctx.pool.sessions_for(&host.name) {
                let state = if session.in_use { "in use" } else { "idle" };
                println!(
                    "  session gen {} ({state}), chain: {}",
                    session.generation,
                    session
                        .jump_chain
                        .iter()
                        .map(|h| h.as_str())
                        .collect::<Vec<_>>()
                        .join(" -> "),
                );
            }
        }
        Ok(None) => println!("unknown host {reference:?}"),
        Err(e) => eprintln!("{e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::parse_run;

    #[test]
    fn parses_run_and_at_forms() {
        assert_eq!(
            parse_run("run web-01 df -h /"),
            Some(("web-01".into(), "df -h /".into()))
        );
        assert_eq!(
            parse_run("@web-01 uptime"),
            Some(("web-01".into(), "uptime".into()))
        );
        assert_eq!(parse_run("run web-01"), None);
        assert_eq!(parse_run("hello there"), None);
    }
}
