mod bindings;
mod cache;
mod handle;
mod instance;
mod lookup;
mod scope;

pub use bindings::{BindingOrigin, LazyVariableBindings};
pub use cache::{CacheStats, CompiledScriptHandle, EngineCacheOptions, ThreadAffineEngineCache};
pub use handle::{ExecutableHandle, ScriptHandle, SearchHandle, SCORE_VAR};
pub use instance::{BuiltinScope, CompiledScript, EngineInstance, EngineLimits};
pub use lookup::{DocumentLookup, NoLookup};
pub use scope::ScopeChain;
