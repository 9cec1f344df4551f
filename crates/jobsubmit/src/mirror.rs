use std::fmt::{Display, Formatter};

use ctld::{ControllerState, Stamp};

use crate::common::error::InvokeError;
use crate::diagnostics::{Diagnostic, DiagnosticSink};
use crate::engine::Interpreter;
use crate::marshal;
use crate::value::Table;

/// Controller collection mirrored into the `slurm` host table.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MirrorKind {
    Jobs,
    Reservations,
}

impl MirrorKind {
    /// Name of the field in the host table.
    pub fn global_name(&self) -> &'static str {
        match self {
            MirrorKind::Jobs => "jobs",
            MirrorKind::Reservations => "reservations",
        }
    }
}

impl Display for MirrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.global_name())
    }
}

/// Stamps of the collection versions currently held by the interpreter.
/// `None` means that the collection was never mirrored.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MirrorState {
    pub jobs_synced_at: Option<Stamp>,
    pub reservations_synced_at: Option<Stamp>,
}

#[derive(Default)]
pub struct GlobalMirror {
    state: MirrorState,
    refresh_count: u64,
}

impl GlobalMirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &MirrorState {
        &self.state
    }

    /// Number of refreshes that actually rebuilt a mirror.
    pub fn refresh_count(&self) -> u64 {
        self.refresh_count
    }

    /// Forgets what was mirrored. Used when the interpreter is replaced.
    pub fn reset(&mut self) {
        self.state = MirrorState::default();
    }

    /// Rebuilds the mirror of `kind` if the source collection changed since
    /// the last sync. Returns true if the mirror was rebuilt.
    pub fn refresh(
        &mut self,
        kind: MirrorKind,
        source: &ControllerState,
        interpreter: &mut dyn Interpreter,
        sink: &dyn DiagnosticSink,
    ) -> Result<bool, InvokeError> {
        let synced = match kind {
            MirrorKind::Jobs => self.state.jobs_synced_at,
            MirrorKind::Reservations => self.state.reservations_synced_at,
        };
        let is_stale = |stamp: Stamp| synced.is_none_or(|synced| stamp > synced);

        // Read lock is held only while the collection is marshalled
        let update: Option<(Stamp, Table)> = match kind {
            MirrorKind::Jobs => {
                let jobs = source.jobs();
                let stamp = jobs.last_mutated();
                is_stale(stamp).then(|| (stamp, marshal::job_set(jobs.iter())))
            }
            MirrorKind::Reservations => {
                let reservations = source.reservations();
                let stamp = reservations.last_mutated();
                is_stale(stamp).then(|| (stamp, marshal::reservation_set(reservations.iter())))
            }
        };
        let Some((stamp, table)) = update else {
            return Ok(false);
        };

        let entries = table.len();
        interpreter.set_view(kind.global_name(), table)?;
        match kind {
            MirrorKind::Jobs => self.state.jobs_synced_at = Some(stamp),
            MirrorKind::Reservations => self.state.reservations_synced_at = Some(stamp),
        }
        self.refresh_count += 1;
        sink.report(Diagnostic::MirrorRefreshed { kind, entries });
        Ok(true)
    }
}
