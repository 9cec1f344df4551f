use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct ReservationFlags: u64 {
        const MAINT       = 0x0000_0001;
        const IGNORE_JOBS = 0x0000_0002;
        const DAILY       = 0x0000_0004;
        const WEEKLY      = 0x0000_0008;
        const OVERLAP     = 0x0000_0010;
        const FLEX        = 0x0000_0020;
        const MAGNETIC    = 0x0000_0040;
    }
}

impl Default for ReservationFlags {
    fn default() -> Self {
        Self::empty()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Reservation {
    pub name: String,
    #[serde(default)]
    pub accounts: Vec<String>,
    #[serde(default)]
    pub users: Vec<String>,
    #[serde(default)]
    pub partition: Option<String>,
    #[serde(default)]
    pub node_list: Option<String>,
    #[serde(default)]
    pub node_cnt: u32,
    #[serde(default)]
    pub core_cnt: u32,
    #[serde(default)]
    pub licenses: Option<String>,
    #[serde(default)]
    pub features: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub flags: ReservationFlags,
}

impl Reservation {
    pub fn new(name: impl Into<String>, start_time: DateTime<Utc>, end_time: DateTime<Utc>) -> Self {
        Reservation {
            name: name.into(),
            accounts: Vec::new(),
            users: Vec::new(),
            partition: None,
            node_list: None,
            node_cnt: 0,
            core_cnt: 0,
            licenses: None,
            features: None,
            start_time,
            end_time,
            flags: ReservationFlags::empty(),
        }
    }

    /// Length of the reservation in whole minutes.
    pub fn duration_minutes(&self) -> i64 {
        (self.end_time - self.start_time).num_minutes().max(0)
    }
}
