pub mod common;
pub mod diagnostics;
pub mod engine;
pub mod host;
pub mod invoker;
pub mod marshal;
pub mod mirror;
pub mod translate;
pub mod value;

#[cfg(test)]
pub(crate) mod tests;

pub type Error = crate::common::error::HookError;
pub type Result<T> = std::result::Result<T, Error>;

// Reexports
pub use ctld;
pub use diagnostics::{Diagnostic, DiagnosticSink, LogSink};
pub use invoker::{Decision, HookCall, HookInvoker, Outcome};
pub use translate::HookKind;

pub const JOBSUBMIT_VERSION: &str = env!("CARGO_PKG_VERSION");
