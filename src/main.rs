//! fa: launch and supervise FastAPI applications.
//!
//! This is the entry point. It sets up diagnostics, parses the command line
//! and hands the chosen subcommand to [`commands::dispatch`]. Commands that
//! run the server build their own async runtime after any daemonizing
//! fork, so `main` itself stays synchronous.

mod access_log;
mod app_path;
mod backend;
mod checker;
mod cli;
mod commands;
mod config;
mod daemon;
mod health;
mod init;
mod launcher;
mod logging;
mod logs;
mod monitor;
mod paths;
mod port;
mod process;
mod runner;
mod smart_mode;
mod status;
mod tui;
mod ui;

use std::process::ExitCode;

use clap::Parser;

use crate::cli::Cli;
use crate::commands::{dispatch, Session};
use crate::launcher::OutputSink;
use crate::logging::{init_tracing, wants_json, LOG_FORMAT_ENV};
use crate::ui::Console;

fn main() -> ExitCode {
    init_tracing(wants_json(std::env::var(LOG_FORMAT_ENV).ok().as_deref()));
    let cli = Cli::parse();

    let result = Session::from_env(cli.project_dir)
        .and_then(|session| dispatch(&session, cli.command));
    match result {
        Ok(status) => status.into(),
        Err(err) => {
            Console.error(&format!("{err:#}"));
            ExitCode::FAILURE
        }
    }
}
