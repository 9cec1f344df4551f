use serde::{Deserialize, Serialize};

use crate::{Authority, Uid};

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct PartitionFlags: u32 {
        const DEFAULT   = 0b00000001;
        const HIDDEN    = 0b00000010;
        const ROOT_ONLY = 0b00000100;
        const REQ_RESV  = 0b00001000;
    }
}

impl Default for PartitionFlags {
    fn default() -> Self {
        Self::empty()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Partition {
    pub name: String,
    #[serde(default)]
    pub nodes: Option<String>,
    #[serde(default)]
    pub total_nodes: u32,
    #[serde(default)]
    pub total_cpus: u32,
    #[serde(default)]
    pub min_nodes: Option<u32>,
    #[serde(default)]
    pub max_nodes: Option<u32>,
    /// Minutes, `None` is unlimited.
    #[serde(default)]
    pub max_time: Option<u32>,
    /// Minutes.
    #[serde(default)]
    pub default_time: Option<u32>,
    #[serde(default)]
    pub max_cpus_per_node: Option<u32>,
    #[serde(default)]
    pub def_mem_per_cpu: Option<u64>,
    #[serde(default)]
    pub max_mem_per_cpu: Option<u64>,
    #[serde(default)]
    pub priority_tier: u16,
    #[serde(default)]
    pub flags: PartitionFlags,
    #[serde(default = "default_state_up")]
    pub state_up: bool,
    /// `None` allows every group.
    #[serde(default)]
    pub allow_groups: Option<Vec<String>>,
    #[serde(default)]
    pub allow_accounts: Option<Vec<String>>,
    #[serde(default)]
    pub allow_qos: Option<Vec<String>>,
    #[serde(default)]
    pub qos: Option<String>,
}

fn default_state_up() -> bool {
    true
}

impl Partition {
    pub fn new(name: impl Into<String>) -> Self {
        Partition {
            name: name.into(),
            nodes: None,
            total_nodes: 0,
            total_cpus: 0,
            min_nodes: None,
            max_nodes: None,
            max_time: None,
            default_time: None,
            max_cpus_per_node: None,
            def_mem_per_cpu: None,
            max_mem_per_cpu: None,
            priority_tier: 1,
            flags: PartitionFlags::empty(),
            state_up: true,
            allow_groups: None,
            allow_accounts: None,
            allow_qos: None,
            qos: None,
        }
    }

    #[inline]
    pub fn is_default(&self) -> bool {
        self.flags.contains(PartitionFlags::DEFAULT)
    }

    /// Decides whether a job owned by `owner` and submitted by `submitter`
    /// may see this partition.
    ///
    /// Operators see every partition. Everybody else never sees hidden or
    /// root-only partitions, and partitions restricted to groups are visible
    /// only to members of at least one of those groups.
    pub fn is_visible_to(&self, owner: Uid, submitter: Uid, authority: &dyn Authority) -> bool {
        if authority.is_operator(submitter) {
            return true;
        }
        if self
            .flags
            .intersects(PartitionFlags::HIDDEN | PartitionFlags::ROOT_ONLY)
        {
            return false;
        }
        match &self.allow_groups {
            None => true,
            Some(groups) => groups.iter().any(|group| authority.is_member(owner, group)),
        }
    }
}
