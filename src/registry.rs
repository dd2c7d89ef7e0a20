//! Named task functions and hooks.
//!
//! Worker processes cannot receive closures from the parent, so every function
//! a batch may call is registered under a name. The parent and every worker
//! build the same [`Registry`]; requests and protocol frames carry names only.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PoolError, Result};
use crate::scheduler::task::Kwargs;
use crate::seed::SeedSequence;
use crate::worker::context::WorkerContext;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub type TaskFn =
    Arc<dyn Fn(&mut WorkerContext, &Kwargs) -> std::result::Result<Value, BoxError> + Send + Sync>;
pub type InitHook =
    Arc<dyn Fn(&mut WorkerContext, &[Value]) -> std::result::Result<(), BoxError> + Send + Sync>;
pub type PreHook = Arc<
    dyn Fn(&mut WorkerContext, &SeedSequence) -> std::result::Result<(), BoxError> + Send + Sync,
>;
pub type PostHook =
    Arc<dyn Fn(&mut WorkerContext) -> std::result::Result<(), BoxError> + Send + Sync>;

/// A registered init hook together with the fixed arguments it is called with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookCall {
    pub name: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

impl HookCall {
    pub fn new(name: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

#[derive(Clone, Default)]
pub struct Registry {
    functions: HashMap<String, TaskFn>,
    init_hooks: HashMap<String, InitHook>,
    pre_hooks: HashMap<String, PreHook>,
    post_hooks: HashMap<String, PostHook>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn function<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut WorkerContext, &Kwargs) -> std::result::Result<Value, BoxError>
            + Send
            + Sync
            + 'static,
    {
        self.functions.insert(name.into(), Arc::new(f));
        self
    }

    pub fn init_hook<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut WorkerContext, &[Value]) -> std::result::Result<(), BoxError>
            + Send
            + Sync
            + 'static,
    {
        self.init_hooks.insert(name.into(), Arc::new(f));
        self
    }

    pub fn pre_hook<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut WorkerContext, &SeedSequence) -> std::result::Result<(), BoxError>
            + Send
            + Sync
            + 'static,
    {
        self.pre_hooks.insert(name.into(), Arc::new(f));
        self
    }

    pub fn post_hook<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut WorkerContext) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        self.post_hooks.insert(name.into(), Arc::new(f));
        self
    }

    pub fn get_function(&self, name: &str) -> Result<&TaskFn> {
        self.functions.get(name).ok_or_else(|| unknown("function", name))
    }

    pub fn get_init_hook(&self, name: &str) -> Result<&InitHook> {
        self.init_hooks.get(name).ok_or_else(|| unknown("init hook", name))
    }

    pub fn get_pre_hook(&self, name: &str) -> Result<&PreHook> {
        self.pre_hooks.get(name).ok_or_else(|| unknown("pre hook", name))
    }

    pub fn get_post_hook(&self, name: &str) -> Result<&PostHook> {
        self.post_hooks.get(name).ok_or_else(|| unknown("post hook", name))
    }

    /// Check that every name is registered.
    pub fn resolve(
        &self,
        function: &str,
        init: Option<&HookCall>,
        pre: Option<&str>,
        post: Option<&str>,
    ) -> Result<()> {
        self.get_function(function)?;
        if let Some(call) = init {
            self.get_init_hook(&call.name)?;
        }
        if let Some(name) = pre {
            self.get_pre_hook(name)?;
        }
        if let Some(name) = post {
            self.get_post_hook(name)?;
        }
        Ok(())
    }

    pub fn function_names(&self) -> Vec<&str> {
        sorted_names(&self.functions)
    }

    pub fn init_hook_names(&self) -> Vec<&str> {
        sorted_names(&self.init_hooks)
    }

    pub fn pre_hook_names(&self) -> Vec<&str> {
        sorted_names(&self.pre_hooks)
    }

    pub fn post_hook_names(&self) -> Vec<&str> {
        sorted_names(&self.post_hooks)
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("functions", &self.function_names())
            .field("init_hooks", &self.init_hook_names())
            .field("pre_hooks", &self.pre_hook_names())
            .field("post_hooks", &self.post_hook_names())
            .finish()
    }
}

fn unknown(kind: &'static str, name: &str) -> PoolError {
    PoolError::UnknownFunction {
        kind,
        name: name.to_string(),
    }
}

fn sorted_names<V>(map: &HashMap<String, V>) -> Vec<&str> {
    let mut names: Vec<&str> = map.keys().map(String::as_str).collect();
    names.sort_unstable();
    names
}
