use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use crate::common::error::LoadError;
use crate::engine::{Interpreter, ScriptEngine};

#[derive(Debug, Clone, PartialEq)]
pub struct ScriptDescriptor {
    pub path: PathBuf,
    /// Functions that have to be defined by the script, in the order they are checked.
    pub required_entry_points: Vec<String>,
    /// Modification time of the script that the live interpreter was built from.
    pub last_loaded_at: Option<SystemTime>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LoadStatus {
    Unchanged,
    Reloaded { generation: u64 },
}

/// Owner of the interpreter running the policy script.
///
/// A new interpreter replaces the live one only after the script body has run
/// and all required entry points were found. A failed attempt leaves the live
/// interpreter in place and is not repeated until the script changes again.
pub struct ScriptHost {
    engine: Arc<dyn ScriptEngine>,
    descriptor: ScriptDescriptor,
    interpreter: Option<Box<dyn Interpreter>>,
    generation: u64,
    failed_at: Option<SystemTime>,
    /// The last stat of the script failed and was already reported.
    missing: bool,
}

impl ScriptHost {
    pub fn new(
        engine: Arc<dyn ScriptEngine>,
        path: PathBuf,
        required_entry_points: &[&str],
    ) -> Self {
        ScriptHost {
            engine,
            descriptor: ScriptDescriptor {
                path,
                required_entry_points: required_entry_points
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
                last_loaded_at: None,
            },
            interpreter: None,
            generation: 0,
            failed_at: None,
            missing: false,
        }
    }

    pub fn descriptor(&self) -> &ScriptDescriptor {
        &self.descriptor
    }

    pub fn path(&self) -> &Path {
        &self.descriptor.path
    }

    /// Identity of the live interpreter, zero if none was loaded yet.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_loaded(&self) -> bool {
        self.interpreter.is_some()
    }

    pub fn interpreter_mut(&mut self) -> Option<&mut (dyn Interpreter + 'static)> {
        self.interpreter.as_deref_mut()
    }

    fn modified_time(&self) -> Result<SystemTime, LoadError> {
        std::fs::metadata(&self.descriptor.path)
            .and_then(|m| m.modified())
            .map_err(|e| LoadError::ScriptNotFound(self.descriptor.path.clone(), e.to_string()))
    }

    /// Loads the script if it was not loaded yet or if its modification
    /// time is newer than the one of the live interpreter.
    pub fn ensure_loaded(&mut self) -> Result<LoadStatus, LoadError> {
        let mtime = match self.modified_time() {
            Ok(mtime) => {
                self.missing = false;
                mtime
            }
            Err(_) if self.missing => return Ok(LoadStatus::Unchanged),
            Err(error) => {
                self.missing = true;
                return Err(error);
            }
        };
        let current = self.interpreter.is_some()
            && self
                .descriptor
                .last_loaded_at
                .is_some_and(|loaded| mtime <= loaded);
        if current || self.failed_at == Some(mtime) {
            return Ok(LoadStatus::Unchanged);
        }

        match self.load() {
            Ok(interpreter) => {
                self.generation += 1;
                self.interpreter = Some(interpreter);
                self.descriptor.last_loaded_at = Some(mtime);
                self.failed_at = None;
                log::debug!(
                    "Loaded {} into interpreter generation {}",
                    self.descriptor.path.display(),
                    self.generation
                );
                Ok(LoadStatus::Reloaded {
                    generation: self.generation,
                })
            }
            Err(error) => {
                self.failed_at = Some(mtime);
                Err(error)
            }
        }
    }

    fn load(&self) -> Result<Box<dyn Interpreter>, LoadError> {
        let path = &self.descriptor.path;
        let source = std::fs::read_to_string(path)
            .map_err(|e| LoadError::ScriptNotFound(path.clone(), e.to_string()))?;
        let mut interpreter = self.engine.create_interpreter()?;
        interpreter.exec(&path.display().to_string(), &source)?;
        // Messages from the body are not addressed to any submission
        if let Some(message) = interpreter.take_user_message() {
            log::warn!(
                "Dropping user message emitted while loading {}: {message}",
                path.display()
            );
        }
        if let Some(missing) = self
            .descriptor
            .required_entry_points
            .iter()
            .find(|name| !interpreter.has_function(name))
        {
            return Err(LoadError::MissingEntryPoint(missing.clone()));
        }
        Ok(interpreter)
    }

    /// Destroys the live interpreter. The next [`ScriptHost::ensure_loaded`]
    /// loads the script again.
    pub fn teardown(&mut self) {
        if self.interpreter.take().is_some() {
            log::debug!(
                "Interpreter generation {} of {} destroyed",
                self.generation,
                self.descriptor.path.display()
            );
        }
        self.descriptor.last_loaded_at = None;
        self.failed_at = None;
        self.missing = false;
    }
}
