pub mod cli;
pub mod config;
pub mod datasets;
pub mod export;
pub mod query_ast;
pub mod query_tools;
pub mod tools;

use clap::Parser;

use crate::cli::CliArgs;
use crate::config::Settings;
use crate::tools::Terminals;

/// Entry point shared by the binary; returns the process exit code.
pub fn run() -> i32 {
    run_from(std::env::args_os())
}

pub fn run_from<I, T>(args: I) -> i32
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let args = match CliArgs::try_parse_from(args) {
        Ok(args) => args,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() { 1 } else { 0 };
        }
    };

    let settings = match Settings::load() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{}", e);
            return e.exit_status().code();
        }
    };
    let level = settings.level_filter().unwrap_or_else(|e| {
        eprintln!("{}; using warn", e);
        log::LevelFilter::Warn
    });
    config::init_logging(level);

    let terminals = Terminals::detect();
    log::debug!("{}: terminals {:?}", args.tool.name(), terminals);

    let result = tools::run_tool(&args.tool, terminals, &settings);
    if let Err(e) = &result {
        eprintln!("{}", e);
    }
    tools::exit_status_of(&result).code()
}
