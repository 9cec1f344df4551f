use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ctld::status::{ERROR, SUCCESS};
use ctld::{ControllerState, JobDescriptor, JobRecord, Uid};
use serde::Serialize;

use crate::common::config::HookConfig;
use crate::common::error::{InvokeError, LoadError};
use crate::diagnostics::{Diagnostic, DiagnosticSink};
use crate::engine::{CallResult, HookArg, Interpreter, ScriptEngine, load_engine};
use crate::host::{LoadStatus, ScriptHost};
use crate::marshal::{self, WRITABLE_JOB_FIELDS};
use crate::mirror::{GlobalMirror, MirrorKind};
use crate::translate::{HookKind, REQUIRED_ENTRY_POINTS, route_user_message, translate};
use crate::value::Value;

/// A request for a policy decision.
pub enum HookCall<'a> {
    Submit {
        desc: &'a mut JobDescriptor,
        submit_uid: Uid,
    },
    Modify {
        desc: &'a mut JobDescriptor,
        /// Snapshot of the job being modified. The job table must not be
        /// write-locked while the hook runs.
        job: &'a JobRecord,
        submit_uid: Uid,
    },
}

impl HookCall<'_> {
    pub fn kind(&self) -> HookKind {
        match self {
            HookCall::Submit { .. } => HookKind::Submit,
            HookCall::Modify { .. } => HookKind::Modify,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// No script is loaded, the request passes unchanged.
    NoHook,
    EntryPointMissing,
    Completed,
    /// The script raised an error.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    pub status: i32,
    pub user_message: Option<String>,
    pub outcome: Outcome,
}

impl Decision {
    fn allow(outcome: Outcome) -> Self {
        Decision {
            status: SUCCESS,
            user_message: None,
            outcome,
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.status == SUCCESS
    }
}

/// Result of a single script call.
#[derive(Debug)]
pub enum Invocation {
    NoHook,
    EntryPointMissing,
    Completed {
        result: CallResult,
        user_message: Option<String>,
    },
    Failed {
        error: InvokeError,
        user_message: Option<String>,
    },
}

struct HookState {
    host: Option<ScriptHost>,
    mirror: GlobalMirror,
}

/// Entry point of the controller into the policy script.
///
/// All script calls are serialized by a single lock that also covers reloads
/// and mirror refreshes. The controller tables are read-locked only while
/// their content is converted for the script.
pub struct HookInvoker {
    state: Mutex<HookState>,
    controller: Arc<ControllerState>,
    sink: Arc<dyn DiagnosticSink>,
}

impl HookInvoker {
    pub fn new(
        engine: Option<Arc<dyn ScriptEngine>>,
        script: PathBuf,
        controller: Arc<ControllerState>,
        sink: Arc<dyn DiagnosticSink>,
    ) -> Self {
        HookInvoker {
            state: Mutex::new(HookState {
                host: engine.map(|engine| ScriptHost::new(engine, script, REQUIRED_ENTRY_POINTS)),
                mirror: GlobalMirror::new(),
            }),
            controller,
            sink,
        }
    }

    pub fn from_config(
        config: &HookConfig,
        controller: Arc<ControllerState>,
        sink: Arc<dyn DiagnosticSink>,
    ) -> crate::Result<Self> {
        let engine = load_engine(config)?;
        Ok(Self::new(engine, config.script.clone(), controller, sink))
    }

    fn lock(&self) -> MutexGuard<'_, HookState> {
        // A panic inside a call leaves the interpreter usable
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Loads the script eagerly. Without an engine this does nothing.
    pub fn initialize(&self) -> Result<(), LoadError> {
        let mut state = self.lock();
        let HookState { host, mirror } = &mut *state;
        if let Some(host) = host {
            if let LoadStatus::Reloaded { generation } = host.ensure_loaded()? {
                mirror.reset();
                self.sink.report(Diagnostic::ScriptReloaded { generation });
            }
        }
        Ok(())
    }

    pub fn teardown(&self) {
        let mut state = self.lock();
        if let Some(host) = state.host.as_mut() {
            host.teardown();
        }
        state.mirror.reset();
    }

    /// Identity of the live interpreter, zero when none is loaded.
    pub fn generation(&self) -> u64 {
        self.lock().host.as_ref().map(|h| h.generation()).unwrap_or(0)
    }

    pub fn refresh_count(&self) -> u64 {
        self.lock().mirror.refresh_count()
    }

    /// Reloads the script if needed and brings the mirrors up to date.
    fn prepare<'a>(&self, state: &'a mut HookState) -> Option<&'a mut (dyn Interpreter + 'static)> {
        let HookState { host, mirror } = state;
        let host = host.as_mut()?;
        match host.ensure_loaded() {
            Ok(LoadStatus::Reloaded { generation }) => {
                mirror.reset();
                self.sink.report(Diagnostic::ScriptReloaded { generation });
            }
            Ok(LoadStatus::Unchanged) => {}
            Err(error) => self.sink.report(Diagnostic::LoadFailed(error)),
        }
        let interpreter = host.interpreter_mut()?;
        for kind in [MirrorKind::Jobs, MirrorKind::Reservations] {
            if let Err(error) = mirror.refresh(kind, &self.controller, interpreter, &*self.sink) {
                log::error!("Refresh of slurm.{kind} failed: {error}");
            }
        }
        Some(interpreter)
    }

    /// Calls `entry_point` with the arguments produced by `build_args`.
    /// The arguments are built after the hook lock is acquired.
    pub fn invoke(
        &self,
        entry_point: &str,
        build_args: impl FnOnce() -> Vec<HookArg>,
    ) -> Invocation {
        let mut state = self.lock();
        let Some(interpreter) = self.prepare(&mut state) else {
            return Invocation::NoHook;
        };
        // Only a nil global skips the call, other values fail in `call`
        if !interpreter.is_defined(entry_point) {
            self.sink.report(Diagnostic::EntryPointMissing {
                entry_point: entry_point.to_string(),
            });
            return Invocation::EntryPointMissing;
        }
        let result = interpreter.call(entry_point, build_args());
        let user_message = interpreter.take_user_message();
        match result {
            Ok(result) => Invocation::Completed {
                result,
                user_message,
            },
            Err(error) => {
                self.sink.report(Diagnostic::CallFailed {
                    entry_point: entry_point.to_string(),
                    detail: error.to_string(),
                });
                Invocation::Failed {
                    error,
                    user_message,
                }
            }
        }
    }

    pub fn decide(&self, call: HookCall<'_>) -> Decision {
        let kind = call.kind();
        let entry_point = kind.entry_point();
        match call {
            HookCall::Submit { desc, submit_uid } => {
                let invocation = self.invoke(entry_point, || {
                    vec![
                        HookArg::Request {
                            fields: marshal::job_request(desc),
                            writable: WRITABLE_JOB_FIELDS,
                        },
                        HookArg::View(marshal::visible_partition_set(
                            &self.controller,
                            desc.user_id,
                            submit_uid,
                        )),
                        HookArg::Value(Value::from(submit_uid.as_num())),
                    ]
                });
                self.conclude(kind, invocation, desc)
            }
            HookCall::Modify {
                desc,
                job,
                submit_uid,
            } => {
                let invocation = self.invoke(entry_point, || {
                    vec![
                        HookArg::Request {
                            fields: marshal::job_request(desc),
                            writable: WRITABLE_JOB_FIELDS,
                        },
                        HookArg::View(marshal::job_record(job)),
                        HookArg::View(marshal::visible_partition_set(
                            &self.controller,
                            job.user_id,
                            submit_uid,
                        )),
                        HookArg::Value(Value::from(submit_uid.as_num())),
                    ]
                });
                self.conclude(kind, invocation, desc)
            }
        }
    }

    fn conclude(
        &self,
        kind: HookKind,
        invocation: Invocation,
        desc: &mut JobDescriptor,
    ) -> Decision {
        match invocation {
            Invocation::NoHook => Decision::allow(Outcome::NoHook),
            Invocation::EntryPointMissing => Decision::allow(Outcome::EntryPointMissing),
            Invocation::Completed {
                result,
                user_message,
            } => {
                let (status, user_message) =
                    translate(kind, &result.returned, user_message, &*self.sink);
                if let Some(updates) = result.request {
                    for rejection in marshal::apply_request(desc, &updates) {
                        self.sink.report(Diagnostic::FieldRejected(rejection));
                    }
                }
                Decision {
                    status,
                    user_message,
                    outcome: Outcome::Completed,
                }
            }
            Invocation::Failed { user_message, .. } => Decision {
                status: ERROR,
                user_message: route_user_message(kind, user_message, &*self.sink),
                outcome: Outcome::Failed,
            },
        }
    }

    pub fn job_submit(&self, desc: &mut JobDescriptor, submit_uid: Uid) -> Decision {
        self.decide(HookCall::Submit { desc, submit_uid })
    }

    pub fn job_modify(
        &self,
        desc: &mut JobDescriptor,
        job: &JobRecord,
        submit_uid: Uid,
    ) -> Decision {
        self.decide(HookCall::Modify {
            desc,
            job,
            submit_uid,
        })
    }
}
