//! Commands that manage project files rather than the server.

use anyhow::Result;

use super::{CommandStatus, Session};
use crate::cli::{CleanArgs, InitArgs};
use crate::init::{init_config, InitError, ENV_EXAMPLE_FILE};
use crate::logs::clean_logs;
use crate::paths::RuntimePaths;
use crate::process;
use crate::ui;

pub fn clean(session: &Session, args: &CleanArgs) -> Result<CommandStatus> {
    let Some(config) = session.load_config(&args.env) else {
        return Ok(CommandStatus::Failure);
    };
    let paths = RuntimePaths::for_config(&config);
    if !paths.root().exists() {
        session.output().info("Nothing to clean");
        return Ok(CommandStatus::Success);
    }

    let prompt = if args.logs {
        format!("Delete log files in {}?", paths.logs_dir().display())
    } else {
        format!("Delete runtime files in {}?", paths.root().display())
    };
    if !args.yes && !ui::confirm(&prompt)? {
        session.output().info("Cancelled");
        return Ok(CommandStatus::Success);
    }

    let removed_logs = clean_logs(&paths)?;
    session
        .output()
        .success(&format!("Removed {removed_logs} log file(s)"));
    if args.logs {
        return Ok(CommandStatus::Success);
    }

    if paths.remove_env_name() {
        session.output().success("Removed environment marker");
    }
    let pid_file = paths.pid_file();
    match process::read_pid(&pid_file) {
        Some(pid) if process::is_live(pid) => session.output().warning(&format!(
            "Server is still running (PID: {pid}); PID file kept"
        )),
        _ => {
            if process::remove_pid(&pid_file) {
                session.output().success("Removed PID file");
            }
        }
    }
    Ok(CommandStatus::Success)
}

pub fn init(session: &Session, args: &InitArgs) -> CommandStatus {
    match init_config(session.project_dir(), args.force, args.env) {
        Ok(outcome) => {
            let verb = if outcome.replaced { "Replaced" } else { "Added" };
            session.output().success(&format!(
                "{verb} [tool.fastapi-launcher] in {}",
                outcome.project_file.display()
            ));
            match outcome.env_example {
                Some(true) => session
                    .output()
                    .success(&format!("Created {ENV_EXAMPLE_FILE}")),
                Some(false) => session.output().warning(&format!(
                    "{ENV_EXAMPLE_FILE} already exists, left unchanged"
                )),
                None => {}
            }
            CommandStatus::Success
        }
        Err(InitError::AlreadyConfigured) => {
            session
                .output()
                .warning(&InitError::AlreadyConfigured.to_string());
            CommandStatus::Success
        }
        Err(err) => {
            session.output().error(&err.to_string());
            CommandStatus::Failure
        }
    }
}
