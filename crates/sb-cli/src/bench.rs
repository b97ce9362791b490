use std::thread;
use std::time::Instant;

use sb_api::{CompiledScriptHandle, Dynamic, ScriptEngineHost};
use sb_core::{HostMap, HostValue, ScriptBridgeError};
use tracing::info;

use crate::{build_host, BenchArgs};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BenchStyle {
    /// Bind and run a fresh handle per iteration.
    Execute,
    /// One handle, rerun as is.
    Run,
    /// One handle, `x` and `y` replaced before every run.
    RunWithVars,
}

impl BenchStyle {
    pub(crate) const ALL: [BenchStyle; 3] = [Self::Execute, Self::Run, Self::RunWithVars];

    pub(crate) fn name(self) -> &'static str {
        match self {
            Self::Execute => "execute",
            Self::Run => "run",
            Self::RunWithVars => "run-with-vars",
        }
    }
}

pub(crate) fn run_bench(args: BenchArgs) -> Result<i32, ScriptBridgeError> {
    let host = build_host(&args.engine)?;
    let script = host.compile(&args.script)?;
    let threads = args.threads.max(1);
    for style in BenchStyle::ALL {
        let started = Instant::now();
        bench_case(&host, &script, style, threads, args.iterations)?;
        let millis = started.elapsed().as_millis();
        info!(
            style = style.name(),
            threads,
            iterations = args.iterations,
            millis = saturating_millis(millis),
            "bench finished"
        );
        println!("BENCH:{}:{}", style.name(), millis);
    }
    Ok(0)
}

/// Elapsed millis as a log field; clamps instead of wrapping.
pub(crate) fn saturating_millis(millis: u128) -> u64 {
    u64::try_from(millis).unwrap_or(u64::MAX)
}

pub(crate) fn bench_case(
    host: &ScriptEngineHost,
    script: &CompiledScriptHandle,
    style: BenchStyle,
    threads: usize,
    iterations: u64,
) -> Result<(), ScriptBridgeError> {
    thread::scope(|scope| {
        let workers: Vec<_> = (0..threads)
            .map(|_| scope.spawn(move || bench_thread(host, script, style, iterations)))
            .collect();
        workers.into_iter().try_for_each(|worker| {
            worker.join().unwrap_or_else(|_| {
                Err(ScriptBridgeError::evaluation(
                    "CLI_BENCH_THREAD",
                    "Benchmark worker panicked.",
                ))
            })
        })
    })
}

fn bench_thread(
    host: &ScriptEngineHost,
    script: &CompiledScriptHandle,
    style: BenchStyle,
    iterations: u64,
) -> Result<(), ScriptBridgeError> {
    match style {
        BenchStyle::Execute => {
            for i in 0..iterations {
                host.try_execute(script, bench_vars(i as i64))?;
            }
        }
        BenchStyle::Run => {
            let mut handle = host.executable(script, bench_vars(1))?;
            for _ in 0..iterations {
                handle.try_run()?;
            }
        }
        BenchStyle::RunWithVars => {
            let mut handle = host.executable(script, bench_vars(1))?;
            for i in 0..iterations {
                handle.set_next_var("x", Dynamic::from_int(i as i64));
                handle.set_next_var("y", Dynamic::from_int(i as i64 + 1));
                handle.try_run()?;
            }
        }
    }
    Ok(())
}

pub(crate) fn bench_vars(seed: i64) -> HostMap {
    [
        ("x".to_string(), HostValue::Int(seed)),
        ("y".to_string(), HostValue::Int(seed + 1)),
    ]
    .into_iter()
    .collect()
}
