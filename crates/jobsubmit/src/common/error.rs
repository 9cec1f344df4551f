use std::path::PathBuf;

use thiserror::Error;

/// Failure of a single attempt to (re)load the policy script.
/// It never affects an interpreter that was loaded before.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LoadError {
    #[error("Script {0} cannot be read: {1}")]
    ScriptNotFound(PathBuf, String),
    #[error("Syntax error: {0}")]
    SyntaxError(String),
    #[error("Error while executing script body: {0}")]
    ScriptError(String),
    #[error("Required function {0} is missing")]
    MissingEntryPoint(String),
    #[error("Script engine error: {0}")]
    Engine(String),
}

/// Failure raised while a hook entry point was running.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum InvokeError {
    #[error("Runtime error: {0}")]
    Runtime(String),
}

/// A value could not be converted between the controller and the script.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MarshalError {
    #[error("Field {field} cannot hold a {kind} value")]
    UnsupportedValue { field: String, kind: &'static str },
    #[error("Field {field}: value {value} is out of range")]
    OutOfRange { field: String, value: String },
}

#[derive(Debug, Error)]
pub enum HookError {
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Script engine {0} is not available in this build")]
    EngineUnavailable(String),
}

impl From<toml::de::Error> for HookError {
    fn from(error: toml::de::Error) -> Self {
        Self::ConfigError(error.to_string())
    }
}
