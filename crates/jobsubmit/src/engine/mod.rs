//! Script engine abstraction.
//!
//! The hook talks to the scripting runtime only through [`ScriptEngine`] and
//! [`Interpreter`]. The concrete runtime is picked at run time from the
//! configuration, and the Lua runtime itself is compiled in only with the
//! `lua` feature. Without a configured engine the hook is disabled and every
//! decision is "allow".

#[cfg(feature = "lua")]
pub mod lua;

use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::common::config::HookConfig;
use crate::common::error::{HookError, InvokeError, LoadError};
use crate::value::{Table, Value};

/// A single positional argument of a hook call.
#[derive(Debug, Clone)]
pub enum HookArg {
    /// Passed as a plain value.
    Value(Value),
    /// Passed as a table that the script cannot modify.
    View(Table),
    /// Passed as a table in which the script may assign the `writable` fields.
    /// The final values of these fields are returned in [`CallResult::request`].
    Request {
        fields: Table,
        writable: &'static [&'static str],
    },
}

#[derive(Debug, Clone, Default)]
pub struct CallResult {
    /// First value returned by the entry point, further values are ignored.
    pub returned: Value,
    /// Writable fields of the [`HookArg::Request`] argument after the call.
    pub request: Option<Table>,
}

/// A live interpreter instance. It is driven by one caller at a time.
pub trait Interpreter: Send {
    /// Executes a chunk of source code in the global environment.
    fn exec(&mut self, chunk_name: &str, source: &str) -> Result<(), LoadError>;

    /// Returns true if the named global holds a callable value.
    fn has_function(&self, name: &str) -> bool;

    /// Returns true if the named global holds any value other than nil.
    fn is_defined(&self, name: &str) -> bool;

    /// Replaces the read-only host global `name` with `value`.
    fn set_view(&mut self, name: &str, value: Table) -> Result<(), InvokeError>;

    /// Calls a global function with the given arguments.
    fn call(&mut self, function: &str, args: Vec<HookArg>) -> Result<CallResult, InvokeError>;

    /// Drains the messages that the script addressed to the submitting user.
    fn take_user_message(&mut self) -> Option<String>;
}

pub trait ScriptEngine: Send + Sync {
    fn name(&self) -> &'static str;

    fn create_interpreter(&self) -> Result<Box<dyn Interpreter>, LoadError>;
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// The hook is disabled.
    None,
    #[default]
    Lua,
}

impl FromStr for EngineKind {
    type Err = HookError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(EngineKind::None),
            "lua" => Ok(EngineKind::Lua),
            _ => Err(HookError::ConfigError(format!("Unknown script engine {s}"))),
        }
    }
}

/// Creates the engine selected by the configuration.
/// Returns `None` when the hook is disabled.
pub fn load_engine(config: &HookConfig) -> crate::Result<Option<Arc<dyn ScriptEngine>>> {
    match config.engine {
        EngineKind::None => {
            log::debug!("Job submit hook is disabled");
            Ok(None)
        }
        #[cfg(feature = "lua")]
        EngineKind::Lua => Ok(Some(Arc::new(lua::LuaEngine::new(config.call_timeout)))),
        #[cfg(not(feature = "lua"))]
        EngineKind::Lua => Err(HookError::EngineUnavailable("lua".to_string())),
    }
}
