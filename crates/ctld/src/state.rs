use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::common::error::CtldError;
use crate::{Authority, JobId, JobRecord, Partition, Reservation, StaticAuthority, Uid};

/// Point in time of the last mutation of a controller table.
pub type Stamp = DateTime<Utc>;

/// Returns a stamp that is strictly greater than `previous`, even when the
/// wall clock did not move (or moved backwards) since the last mutation.
fn next_stamp(previous: Stamp) -> Stamp {
    let now = Utc::now();
    if now > previous {
        now
    } else {
        previous + chrono::Duration::nanoseconds(1)
    }
}

pub struct JobTable {
    jobs: BTreeMap<JobId, JobRecord>,
    last_mutated: Stamp,
}

impl Default for JobTable {
    fn default() -> Self {
        JobTable {
            jobs: Default::default(),
            last_mutated: Utc::now(),
        }
    }
}

impl JobTable {
    #[inline]
    pub fn last_mutated(&self) -> Stamp {
        self.last_mutated
    }

    pub fn get(&self, job_id: JobId) -> Option<&JobRecord> {
        self.jobs.get(&job_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &JobRecord> {
        self.jobs.values()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn insert(&mut self, job: JobRecord) -> crate::Result<()> {
        if self.jobs.contains_key(&job.job_id) {
            return Err(CtldError::DuplicateJob(job.job_id));
        }
        self.jobs.insert(job.job_id, job);
        self.touch();
        Ok(())
    }

    pub fn update<F: FnOnce(&mut JobRecord)>(&mut self, job_id: JobId, f: F) -> crate::Result<()> {
        let job = self
            .jobs
            .get_mut(&job_id)
            .ok_or(CtldError::JobNotFound(job_id))?;
        f(job);
        self.touch();
        Ok(())
    }

    pub fn remove(&mut self, job_id: JobId) -> Option<JobRecord> {
        let job = self.jobs.remove(&job_id);
        if job.is_some() {
            self.touch();
        }
        job
    }

    fn touch(&mut self) {
        self.last_mutated = next_stamp(self.last_mutated);
    }
}

pub struct ReservationTable {
    reservations: BTreeMap<String, Reservation>,
    last_mutated: Stamp,
}

impl Default for ReservationTable {
    fn default() -> Self {
        ReservationTable {
            reservations: Default::default(),
            last_mutated: Utc::now(),
        }
    }
}

impl ReservationTable {
    #[inline]
    pub fn last_mutated(&self) -> Stamp {
        self.last_mutated
    }

    pub fn get(&self, name: &str) -> Option<&Reservation> {
        self.reservations.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Reservation> {
        self.reservations.values()
    }

    pub fn len(&self) -> usize {
        self.reservations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reservations.is_empty()
    }

    /// Inserts a new reservation or replaces the one with the same name.
    pub fn upsert(&mut self, reservation: Reservation) {
        self.reservations
            .insert(reservation.name.clone(), reservation);
        self.last_mutated = next_stamp(self.last_mutated);
    }

    pub fn remove(&mut self, name: &str) -> Option<Reservation> {
        let reservation = self.reservations.remove(name);
        if reservation.is_some() {
            self.last_mutated = next_stamp(self.last_mutated);
        }
        reservation
    }
}

#[derive(Default)]
pub struct PartitionTable {
    partitions: Vec<Partition>,
}

impl PartitionTable {
    pub fn get(&self, name: &str) -> Option<&Partition> {
        self.partitions.iter().find(|p| p.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Partition> {
        self.partitions.iter()
    }

    /// Inserts a new partition or replaces the one with the same name,
    /// keeping the configuration order.
    pub fn upsert(&mut self, partition: Partition) {
        match self.partitions.iter_mut().find(|p| p.name == partition.name) {
            Some(existing) => *existing = partition,
            None => self.partitions.push(partition),
        }
    }

    /// Partitions that a job owned by `owner` and submitted by `submitter` may see.
    pub fn visible_to<'a>(
        &'a self,
        owner: Uid,
        submitter: Uid,
        authority: &'a dyn Authority,
    ) -> impl Iterator<Item = &'a Partition> + 'a {
        self.partitions
            .iter()
            .filter(move |p| p.is_visible_to(owner, submitter, authority))
    }
}

/// Serialized form of the controller tables.
#[derive(Serialize, Deserialize, Debug, Default)]
#[serde(default)]
pub struct ControllerSnapshot {
    pub jobs: Vec<JobRecord>,
    pub partitions: Vec<Partition>,
    pub reservations: Vec<Reservation>,
    pub authority: StaticAuthority,
}

/// Tables owned by the controller.
///
/// Each table sits behind its own read/write lock; the policy hook only ever
/// takes read locks and never holds them across a script call.
pub struct ControllerState {
    jobs: RwLock<JobTable>,
    partitions: RwLock<PartitionTable>,
    reservations: RwLock<ReservationTable>,
    authority: Arc<dyn Authority>,
}

impl ControllerState {
    pub fn new(authority: Arc<dyn Authority>) -> Self {
        ControllerState {
            jobs: Default::default(),
            partitions: Default::default(),
            reservations: Default::default(),
            authority,
        }
    }

    pub fn from_snapshot(snapshot: ControllerSnapshot) -> crate::Result<Self> {
        let ControllerSnapshot {
            jobs,
            partitions,
            reservations,
            authority,
        } = snapshot;
        let state = ControllerState::new(Arc::new(authority));
        {
            let mut table = state.jobs_mut();
            for job in jobs {
                table.insert(job)?;
            }
        }
        {
            let mut table = state.partitions_mut();
            for partition in partitions {
                table.upsert(partition);
            }
        }
        {
            let mut table = state.reservations_mut();
            for reservation in reservations {
                table.upsert(reservation);
            }
        }
        Ok(state)
    }

    /// Loads a JSON encoded [`ControllerSnapshot`].
    pub fn load_snapshot(path: &Path) -> crate::Result<Self> {
        let file = std::fs::File::open(path)?;
        let snapshot: ControllerSnapshot = serde_json::from_reader(std::io::BufReader::new(file))?;
        log::debug!(
            "Loaded controller snapshot from {}: {} job(s), {} partition(s), {} reservation(s)",
            path.display(),
            snapshot.jobs.len(),
            snapshot.partitions.len(),
            snapshot.reservations.len()
        );
        Self::from_snapshot(snapshot)
    }

    pub fn jobs(&self) -> RwLockReadGuard<'_, JobTable> {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn jobs_mut(&self) -> RwLockWriteGuard<'_, JobTable> {
        self.jobs.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn partitions(&self) -> RwLockReadGuard<'_, PartitionTable> {
        self.partitions.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn partitions_mut(&self) -> RwLockWriteGuard<'_, PartitionTable> {
        self.partitions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn reservations(&self) -> RwLockReadGuard<'_, ReservationTable> {
        self.reservations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn reservations_mut(&self) -> RwLockWriteGuard<'_, ReservationTable> {
        self.reservations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn authority(&self) -> &dyn Authority {
        self.authority.as_ref()
    }

    /// Copies a job record out of the job table, so that it can be used
    /// without holding the table lock.
    pub fn job_snapshot(&self, job_id: JobId) -> crate::Result<JobRecord> {
        self.jobs()
            .get(job_id)
            .cloned()
            .ok_or(CtldError::JobNotFound(job_id))
    }
}
