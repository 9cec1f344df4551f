use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ctld::{
    ControllerState, Gid, JobId, JobRecord, JobState, Partition, PartitionFlags, StaticAuthority,
    Uid,
};
use derive_builder::Builder;
use tempfile::TempDir;

/// Temporary directory holding a single policy script.
pub struct ScriptDir {
    dir: TempDir,
}

impl ScriptDir {
    pub fn new() -> Self {
        ScriptDir {
            dir: TempDir::with_prefix("jobsubmit").unwrap(),
        }
    }

    pub fn script_path(&self) -> PathBuf {
        self.dir.path().join("job_submit.lua")
    }

    /// Replaces the script and sets its modification time.
    pub fn write(&self, source: &str, mtime: SystemTime) {
        let path = self.script_path();
        std::fs::write(&path, source).unwrap();
        std::fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(mtime)
            .unwrap();
    }
}

pub fn base_time() -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(1_700_000_000)
}

#[derive(Builder)]
#[builder(pattern = "owned", build_fn(name = "finish"))]
pub struct Job {
    #[builder(default = "1")]
    job_id: u32,
    #[builder(default = "\"job\".to_string()", setter(into))]
    name: String,
    #[builder(default = "1000")]
    user_id: u32,
    #[builder(default = "100")]
    group_id: u32,
    #[builder(default, setter(strip_option, into))]
    partition: Option<String>,
    #[builder(default)]
    job_state: JobState,
}

impl JobBuilder {
    pub fn build(self) -> JobRecord {
        let Job {
            job_id,
            name,
            user_id,
            group_id,
            partition,
            job_state,
        } = self.finish().unwrap();
        let mut job = JobRecord::new(
            JobId::new(job_id),
            name,
            Uid::new(user_id),
            Gid::new(group_id),
        );
        job.partition = partition;
        job.job_state = job_state;
        job
    }
}

#[derive(Builder)]
#[builder(pattern = "owned", build_fn(name = "finish"))]
pub struct PartitionDef {
    #[builder(setter(into))]
    name: String,
    #[builder(default = "PartitionFlags::empty()")]
    flags: PartitionFlags,
    #[builder(default)]
    allow_groups: Option<Vec<String>>,
    #[builder(default = "16")]
    total_nodes: u32,
}

impl PartitionDefBuilder {
    pub fn build(self) -> Partition {
        let PartitionDef {
            name,
            flags,
            allow_groups,
            total_nodes,
        } = self.finish().unwrap();
        let mut partition = Partition::new(name);
        partition.flags = flags;
        partition.allow_groups = allow_groups;
        partition.total_nodes = total_nodes;
        partition
    }
}

pub fn partition(name: &str) -> PartitionDefBuilder {
    PartitionDefBuilder::default().name(name)
}

pub const OPERATOR: Uid = Uid::new(5);
pub const USER: Uid = Uid::new(1000);
pub const PHYSICIST: Uid = Uid::new(1001);

/// Controller with `batch` (default), `hidden`, `admin` (root only) and
/// `physics` (group restricted) partitions.
pub fn create_controller() -> Arc<ControllerState> {
    let authority = StaticAuthority::default()
        .with_operator(OPERATOR)
        .with_member("physics", PHYSICIST);
    let state = ControllerState::new(Arc::new(authority));
    {
        let mut partitions = state.partitions_mut();
        partitions.upsert(partition("batch").flags(PartitionFlags::DEFAULT).build());
        partitions.upsert(partition("hidden").flags(PartitionFlags::HIDDEN).build());
        partitions.upsert(partition("admin").flags(PartitionFlags::ROOT_ONLY).build());
        partitions.upsert(
            partition("physics")
                .allow_groups(Some(vec!["physics".to_string()]))
                .build(),
        );
    }
    Arc::new(state)
}
