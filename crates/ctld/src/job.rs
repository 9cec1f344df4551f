use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Gid, JobId, Uid};

/// A pending job submission or modification request.
///
/// Unset values are `None`; the controller fills them with partition or
/// cluster defaults after the policy hook has run.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct JobDescriptor {
    pub user_id: Uid,
    pub group_id: Gid,
    /// Host the request was submitted from.
    pub alloc_node: Option<String>,
    pub script: Option<String>,

    pub account: Option<String>,
    pub comment: Option<String>,
    pub contiguous: Option<bool>,
    pub cpus_per_task: Option<u32>,
    pub dependency: Option<String>,
    pub features: Option<String>,
    pub gres: Option<String>,
    pub licenses: Option<String>,
    pub max_cpus: Option<u32>,
    pub max_nodes: Option<u32>,
    pub min_cpus: Option<u32>,
    /// Memory in MiB.
    pub min_mem_per_cpu: Option<u64>,
    /// Memory in MiB.
    pub min_mem_per_node: Option<u64>,
    pub min_nodes: Option<u32>,
    pub name: Option<String>,
    pub nice: Option<i32>,
    pub ntasks_per_node: Option<u32>,
    pub num_tasks: Option<u32>,
    pub partition: Option<String>,
    pub priority: Option<u32>,
    pub qos: Option<String>,
    pub requeue: Option<bool>,
    pub reservation: Option<String>,
    pub shared: Option<u16>,
    pub std_err: Option<String>,
    pub std_out: Option<String>,
    /// Minutes.
    pub time_limit: Option<u32>,
    /// Minutes.
    pub time_min: Option<u32>,
    pub wckey: Option<String>,
    pub work_dir: Option<String>,
}

impl JobDescriptor {
    pub fn new(user_id: Uid, group_id: Gid) -> Self {
        JobDescriptor {
            user_id,
            group_id,
            ..Default::default()
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    #[default]
    Pending,
    Running,
    Suspended,
    Completed,
    Cancelled,
    Failed,
    Timeout,
    NodeFail,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "PENDING",
            JobState::Running => "RUNNING",
            JobState::Suspended => "SUSPENDED",
            JobState::Completed => "COMPLETED",
            JobState::Cancelled => "CANCELLED",
            JobState::Failed => "FAILED",
            JobState::Timeout => "TIMEOUT",
            JobState::NodeFail => "NODE_FAIL",
        }
    }
}

/// Live state of a job known to the controller.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JobRecord {
    pub job_id: JobId,
    pub name: String,
    pub user_id: Uid,
    pub group_id: Gid,
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub partition: Option<String>,
    #[serde(default)]
    pub qos: Option<String>,
    #[serde(default)]
    pub reservation: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub job_state: JobState,
    #[serde(default)]
    pub priority: u32,
    #[serde(default)]
    pub time_limit: Option<u32>,
    #[serde(default)]
    pub time_min: Option<u32>,
    #[serde(default)]
    pub num_cpus: u32,
    #[serde(default)]
    pub num_nodes: u32,
    #[serde(default)]
    pub nodes: Option<String>,
    #[serde(default)]
    pub features: Option<String>,
    #[serde(default)]
    pub wckey: Option<String>,
    #[serde(default)]
    pub work_dir: Option<String>,
    pub submit_time: DateTime<Utc>,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
}

impl JobRecord {
    pub fn new(job_id: JobId, name: impl Into<String>, user_id: Uid, group_id: Gid) -> Self {
        JobRecord {
            job_id,
            name: name.into(),
            user_id,
            group_id,
            account: None,
            partition: None,
            qos: None,
            reservation: None,
            comment: None,
            job_state: JobState::Pending,
            priority: 0,
            time_limit: None,
            time_min: None,
            num_cpus: 0,
            num_nodes: 0,
            nodes: None,
            features: None,
            wckey: None,
            work_dir: None,
            submit_time: Utc::now(),
            start_time: None,
            end_time: None,
        }
    }
}
