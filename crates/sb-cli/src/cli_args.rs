use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "sb-cli")]
#[command(about = "Evaluate and benchmark rhai scripts through the script bridge")]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Mode,
}

#[derive(Debug, Subcommand)]
pub(crate) enum Mode {
    Eval(EvalArgs),
    Bench(BenchArgs),
}

#[derive(Debug, Args)]
pub(crate) struct EngineArgs {
    #[arg(long = "engine", default_value = "auto")]
    pub(crate) engine: String,
    #[arg(long = "max-operations")]
    pub(crate) max_operations: Option<u64>,
}

#[derive(Debug, Args)]
pub(crate) struct EvalArgs {
    #[arg(long = "script")]
    pub(crate) script: Option<String>,
    #[arg(long = "script-file")]
    pub(crate) script_file: Option<String>,
    /// JSON object bound as script variables.
    #[arg(long = "vars")]
    pub(crate) vars: Option<String>,
    #[command(flatten)]
    pub(crate) engine: EngineArgs,
}

#[derive(Debug, Args)]
pub(crate) struct BenchArgs {
    #[arg(long = "script", default_value = "x + y")]
    pub(crate) script: String,
    #[arg(long = "iterations", default_value_t = 10_000)]
    pub(crate) iterations: u64,
    #[arg(long = "threads", default_value_t = 1)]
    pub(crate) threads: usize,
    #[command(flatten)]
    pub(crate) engine: EngineArgs,
}
