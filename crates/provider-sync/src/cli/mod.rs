pub mod handlers;

use std::path::PathBuf;

use clap::{value_parser, Arg, ArgAction, Command};

pub fn build_cli() -> Command {
    Command::new("provider-sync")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Keep local firms and offices in line with the provider registry")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .global(true)
                .value_name("PATH")
                .value_parser(value_parser!(PathBuf))
                .help("Config file laid over the global config"),
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .short('v')
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Log at debug level"),
        )
        .subcommand(cmd_sync())
        .subcommand(cmd_serve())
        .subcommand(cmd_preview())
        .subcommand(cmd_lock())
        .subcommand(cmd_watermark())
}

fn cmd_sync() -> Command {
    Command::new("sync").about("Run one guarded sync cycle now")
}

fn cmd_serve() -> Command {
    Command::new("serve").about("Run the scheduler until SIGINT/SIGTERM (SIGUSR1 triggers a sync)")
}

fn cmd_preview() -> Command {
    Command::new("preview")
        .about("Show what a sync would change without writing anything")
        .arg(
            Arg::new("json")
                .long("json")
                .action(ArgAction::SetTrue)
                .help("Print the plan as JSON"),
        )
}

fn cmd_lock() -> Command {
    Command::new("lock")
        .about("Inspect the distributed lock")
        .subcommand_required(true)
        .subcommand(
            Command::new("status").about("Show the current lease").arg(
                Arg::new("key")
                    .long("key")
                    .value_name("KEY")
                    .help("Lock key (defaults to sync.lock_key)"),
            ),
        )
}

fn cmd_watermark() -> Command {
    Command::new("watermark").about("Show when the last sync completed")
}
