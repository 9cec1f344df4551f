//! Reporting of hook problems that never reach the submitting user.

use std::fmt::{Display, Formatter};
use std::sync::Mutex;

use crate::common::error::{LoadError, MarshalError};
use crate::mirror::MirrorKind;

#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    LoadFailed(LoadError),
    ScriptReloaded { generation: u64 },
    CallFailed { entry_point: String, detail: String },
    NonNumericReturn { entry_point: String, kind: &'static str },
    UserMessageDiscarded { message: String },
    EntryPointMissing { entry_point: String },
    FieldRejected(MarshalError),
    MirrorRefreshed { kind: MirrorKind, entries: usize },
}

impl Diagnostic {
    pub fn level(&self) -> log::Level {
        match self {
            Diagnostic::LoadFailed(_)
            | Diagnostic::CallFailed { .. }
            | Diagnostic::UserMessageDiscarded { .. } => log::Level::Error,
            Diagnostic::FieldRejected(_) | Diagnostic::EntryPointMissing { .. } => {
                log::Level::Warn
            }
            Diagnostic::NonNumericReturn { .. } => log::Level::Info,
            Diagnostic::ScriptReloaded { .. } | Diagnostic::MirrorRefreshed { .. } => {
                log::Level::Debug
            }
        }
    }
}

impl Display for Diagnostic {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Diagnostic::LoadFailed(e) => write!(f, "Loading of job submit script failed: {e}"),
            Diagnostic::ScriptReloaded { generation } => {
                write!(f, "Job submit script loaded (generation {generation})")
            }
            Diagnostic::CallFailed {
                entry_point,
                detail,
            } => write!(f, "{entry_point} failed: {detail}"),
            Diagnostic::NonNumericReturn { entry_point, kind } => write!(
                f,
                "{entry_point} returned a {kind} value instead of a number, assuming success"
            ),
            Diagnostic::UserMessageDiscarded { message } => write!(
                f,
                "Use of log.user() in job_modify is not supported. Message discarded: {message:?}"
            ),
            Diagnostic::EntryPointMissing { entry_point } => {
                write!(f, "Function {entry_point} is not defined, skipping the hook")
            }
            Diagnostic::FieldRejected(e) => write!(f, "Job request update rejected: {e}"),
            Diagnostic::MirrorRefreshed { kind, entries } => {
                write!(f, "Refreshed slurm.{kind} ({entries} entries)")
            }
        }
    }
}

/// Consumer of hook diagnostics.
pub trait DiagnosticSink: Send + Sync {
    fn report(&self, diagnostic: Diagnostic);
}

/// Forwards diagnostics into the `log` facade.
#[derive(Default)]
pub struct LogSink;

impl DiagnosticSink for LogSink {
    fn report(&self, diagnostic: Diagnostic) {
        log::log!(target: "jobsubmit", diagnostic.level(), "{diagnostic}");
    }
}

/// Keeps every reported diagnostic in memory.
#[derive(Default)]
pub struct RecordingSink {
    diagnostics: Mutex<Vec<Diagnostic>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn take(&self) -> Vec<Diagnostic> {
        std::mem::take(&mut *self.diagnostics.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

impl DiagnosticSink for RecordingSink {
    fn report(&self, diagnostic: Diagnostic) {
        log::log!(target: "jobsubmit", diagnostic.level(), "{diagnostic}");
        self.diagnostics
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(diagnostic);
    }
}
