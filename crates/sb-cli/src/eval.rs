use std::fs;

use sb_core::{HostMap, HostValue, ScriptBridgeError};
use tracing::debug;

use crate::{build_host, map_cli_output_json, map_cli_script_read, map_cli_vars_invalid, EvalArgs};

pub(crate) fn run_eval(args: EvalArgs) -> Result<i32, ScriptBridgeError> {
    let source = load_script(args.script, args.script_file)?;
    let vars = parse_vars(args.vars.as_deref())?;
    let host = build_host(&args.engine)?;
    debug!(flavor = %host.flavor(), vars = vars.len(), "evaluating script");

    let script = host.compile(&source)?;
    let value = host.try_execute(&script, vars)?;
    let json = serde_json::to_string(&value).map_err(map_cli_output_json)?;
    println!("RESULT:OK");
    println!("VALUE_JSON:{}", json);
    Ok(0)
}

pub(crate) fn load_script(
    inline: Option<String>,
    file: Option<String>,
) -> Result<String, ScriptBridgeError> {
    match (inline, file) {
        (Some(source), None) => Ok(source),
        (None, Some(path)) => fs::read_to_string(path).map_err(map_cli_script_read),
        (Some(_), Some(_)) => Err(ScriptBridgeError::config(
            "CLI_SCRIPT_CONFLICT",
            "Pass either --script or --script-file, not both.",
        )),
        (None, None) => Err(ScriptBridgeError::config(
            "CLI_SCRIPT_MISSING",
            "One of --script or --script-file is required.",
        )),
    }
}

pub(crate) fn parse_vars(raw: Option<&str>) -> Result<HostMap, ScriptBridgeError> {
    let Some(raw) = raw else {
        return Ok(HostMap::new());
    };
    match serde_json::from_str::<HostValue>(raw).map_err(map_cli_vars_invalid)? {
        HostValue::Map(vars) => Ok(vars),
        other => Err(ScriptBridgeError::config(
            "CLI_VARS_NOT_OBJECT",
            format!("--vars must be a JSON object, got {}.", other.type_name()),
        )),
    }
}
