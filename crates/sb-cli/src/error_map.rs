use sb_core::ScriptBridgeError;
use std::fmt::Display;

fn map_error(code: &'static str, error: impl Display) -> ScriptBridgeError {
    ScriptBridgeError::config(code, error.to_string())
}

pub(crate) fn emit_error(error: ScriptBridgeError) -> i32 {
    println!("RESULT:ERROR");
    println!("ERROR_CODE:{}", error.code);
    println!(
        "ERROR_MSG_JSON:{}",
        serde_json::to_string(&error.message).unwrap_or_else(|_| "\"Unknown error\"".to_string())
    );
    if let Some(position) = error.position {
        println!("ERROR_POSITION:{}:{}", position.line, position.column);
    }
    1
}

pub(crate) fn map_cli_script_read(error: std::io::Error) -> ScriptBridgeError {
    map_error("CLI_SCRIPT_READ", error)
}

pub(crate) fn map_cli_vars_invalid(error: serde_json::Error) -> ScriptBridgeError {
    map_error("CLI_VARS_INVALID", error)
}

pub(crate) fn map_cli_output_json(error: serde_json::Error) -> ScriptBridgeError {
    map_error("CLI_OUTPUT_JSON", error)
}
