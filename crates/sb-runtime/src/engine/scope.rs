use std::rc::Rc;

use rhai::Dynamic;
use sb_core::{HostValue, ScriptBridgeError};

use super::bindings::LazyVariableBindings;
use super::instance::{BuiltinScope, CompiledScript, EngineInstance};
use super::lookup::{DocumentLookup, NoLookup};
use crate::helpers::rhai_bridge::ValueBridge;

/// Per-invocation variables in front of the engine's shared builtins.
pub struct ScopeChain<L = NoLookup> {
    builtins: Rc<BuiltinScope>,
    variables: LazyVariableBindings<L>,
}

impl<L: DocumentLookup> ScopeChain<L> {
    pub fn new(builtins: Rc<BuiltinScope>, variables: LazyVariableBindings<L>) -> Self {
        Self {
            builtins,
            variables,
        }
    }

    /// Variables first, then builtins.
    pub fn resolve(&mut self, name: &str) -> Option<Dynamic> {
        if let Some(value) = self.variables.get(name) {
            return Some(value.clone());
        }
        self.builtins.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.variables.contains_key(name) || self.builtins.contains(name)
    }

    /// Raw write into the variable scope; no conversion happens.
    pub fn set_next_var(&mut self, name: &str, value: Dynamic) {
        self.variables.set_direct(name, value);
    }

    /// Current value of a variable, converted back to the host model.
    pub fn var(&mut self, name: &str) -> Option<HostValue> {
        self.variables.get(name).map(ValueBridge::unwrap_ref)
    }

    pub fn builtins(&self) -> &Rc<BuiltinScope> {
        &self.builtins
    }

    pub fn variables(&self) -> &LazyVariableBindings<L> {
        &self.variables
    }

    pub fn variables_mut(&mut self) -> &mut LazyVariableBindings<L> {
        &mut self.variables
    }

    /// Runs `script` against the variable scope. Top-level declarations made by
    /// the run are dropped afterwards, even when it fails.
    pub(crate) fn evaluate(
        &mut self,
        engine: &EngineInstance,
        script: &CompiledScript,
    ) -> Result<Dynamic, ScriptBridgeError> {
        engine.check_owns(script)?;
        self.variables.materialize_referenced(script.identifiers());
        let scope = self.variables.scope_mut();
        let bound = scope.len();
        let result = engine.eval(script, scope);
        scope.rewind(bound);
        result
    }
}

#[cfg(test)]
mod scope_tests {
    use super::*;
    use crate::engine::runtime_test_support::*;
    use sb_core::ScriptSource;

    #[test]
    fn variables_shadow_builtins() {
        let engine = instance_with_builtins(&[("limit", HostValue::Int(10))]);
        let mut chain = ScopeChain::new(
            Rc::clone(engine.builtins()),
            LazyVariableBindings::new(vars(&[("other", HostValue::Int(1))])),
        );
        assert_eq!(chain.resolve("limit").and_then(|v| v.as_int().ok()), Some(10));
        assert!(chain.contains("limit"));
        assert!(chain.var("limit").is_none());

        chain.set_next_var("limit", Dynamic::from_int(3));
        assert_eq!(chain.resolve("limit").and_then(|v| v.as_int().ok()), Some(3));

        let script = engine
            .compile(&ScriptSource::from("limit + other"))
            .expect("compile");
        let value = chain.evaluate(&engine, &script).expect("eval");
        assert_eq!(value.as_int().ok(), Some(4));
        assert!(Rc::ptr_eq(chain.builtins(), engine.builtins()));
    }

    #[test]
    fn builtins_are_visible_to_scripts() {
        let engine = instance_with_builtins(&[("greeting", HostValue::from("hi"))]);
        let mut chain = ScopeChain::new(
            Rc::clone(engine.builtins()),
            LazyVariableBindings::new(vars(&[])),
        );
        let script = engine
            .compile(&ScriptSource::from(r#"greeting + "!""#))
            .expect("compile");
        let value = chain.evaluate(&engine, &script).expect("eval");
        assert_eq!(ValueBridge::unwrap(value), HostValue::from("hi!"));
    }

    #[test]
    fn top_level_declarations_do_not_accumulate() {
        let engine = instance_with_builtins(&[]);
        let mut chain = ScopeChain::new(
            Rc::clone(engine.builtins()),
            LazyVariableBindings::new(vars(&[("x", HostValue::Int(1))])),
        );
        let script = engine
            .compile(&ScriptSource::from("let y = x + 1; x = y; y"))
            .expect("compile");
        for expected in 2..5 {
            let value = chain.evaluate(&engine, &script).expect("eval");
            assert_eq!(value.as_int().ok(), Some(expected));
            assert_eq!(chain.variables().len(), 1);
        }
        assert_eq!(chain.var("x"), Some(HostValue::Int(4)));
    }

    #[test]
    fn failed_runs_still_rewind_the_scope() {
        let engine = instance_with_builtins(&[]);
        let mut chain = ScopeChain::new(
            Rc::clone(engine.builtins()),
            LazyVariableBindings::new(vars(&[])),
        );
        let script = engine
            .compile(&ScriptSource::from("let z = 1; throw \"boom\";"))
            .expect("compile");
        let error = chain.evaluate(&engine, &script).expect_err("script throws");
        assert_eq!(error.code, "SCRIPT_EVAL_ERROR");
        assert!(chain.variables().is_empty());
    }
}
