use anyhow::Context;
use clap::Parser;
use debug_ide::debugger::engine::Detached;
use debug_ide::debugger::Debugger;
use debug_ide::ide::args::{Args, Config};
use debug_ide::version;
use log::{error, info};
use std::process::{Command, ExitStatus};
use std::sync::Arc;

const INTERRUPTED_EXIT_CODE: i32 = 130;

fn main() {
    let args = Args::parse();
    debug_ide::log::init(args.debug);

    let config = match Config::try_from(&args) {
        Ok(config) => config,
        Err(e) => {
            error!(target: "ide", "invalid configuration: {e:#}");
            std::process::exit(1);
        }
    };

    let debugger = Debugger::new(Arc::new(Detached));

    let ctrl_c_handler = {
        let debugger = debugger.clone();
        move || {
            info!(target: "ide", "interrupted, stopping control server");
            debugger.stop_server();
            std::process::exit(INTERRUPTED_EXIT_CODE);
        }
    };
    if let Err(e) = ctrlc::set_handler(ctrl_c_handler) {
        error!(target: "ide", "set ctrl-c handler: {e}");
    }

    info!(target: "ide", "{}", version::banner());
    let program = args.program.clone();
    let status = debugger.debug_program(&config, move || run_program(&program));

    let code = match status {
        Ok(status) => status.code().unwrap_or(1),
        Err(_) => 1,
    };
    debugger.stop_server();
    std::process::exit(code);
}

fn run_program(program: &[String]) -> anyhow::Result<ExitStatus> {
    let (path, args) = program.split_first().context("no program to debug")?;
    info!(target: "ide", "running {path}");
    Command::new(path)
        .args(args)
        .status()
        .with_context(|| format!("spawn {path}"))
}
