use std::ffi::OsString;

use clap::Parser;
use sb_api::{ScriptEngineHost, ScriptEngineHostOptions};
use sb_core::{EngineFlavor, ScriptBridgeError};

mod bench;
mod cli_args;
mod error_map;
mod eval;

pub(crate) use cli_args::{BenchArgs, Cli, EngineArgs, EvalArgs, Mode};
pub(crate) use error_map::{
    emit_error, map_cli_output_json, map_cli_script_read, map_cli_vars_invalid,
};

pub fn run_cli_from_args<I, T>(args: I) -> i32
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => {
            let _ = error.print();
            return error.exit_code();
        }
    };
    match run(cli) {
        Ok(code) => code,
        Err(error) => emit_error(error),
    }
}

fn run(cli: Cli) -> Result<i32, ScriptBridgeError> {
    match cli.command {
        Mode::Eval(args) => eval::run_eval(args),
        Mode::Bench(args) => bench::run_bench(args),
    }
}

pub(crate) fn build_host(args: &EngineArgs) -> Result<ScriptEngineHost, ScriptBridgeError> {
    let flavor = args.engine.parse::<EngineFlavor>()?;
    ScriptEngineHost::new(ScriptEngineHostOptions {
        flavor,
        max_operations: args.max_operations,
        ..ScriptEngineHostOptions::default()
    })
}
