//! Runs user scripts on thread-affine rhai engines against host variables.

pub mod engine;
mod helpers;

pub use engine::{
    BindingOrigin, BuiltinScope, CacheStats, CompiledScript, CompiledScriptHandle,
    DocumentLookup, EngineCacheOptions, EngineInstance, EngineLimits, ExecutableHandle,
    LazyVariableBindings, NoLookup, ScopeChain, ScriptHandle, SearchHandle,
    ThreadAffineEngineCache, SCORE_VAR,
};
pub use helpers::rhai_bridge::{EngineValue, ValueBridge};
pub use rhai::Dynamic;
