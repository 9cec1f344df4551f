//! Conversion of controller records into script values and back.
//!
//! The set of exported fields is fixed. Job descriptors are the only records
//! that scripts may change, and only through the fields in
//! [`WRITABLE_JOB_FIELDS`].

use chrono::{DateTime, Utc};
use ctld::{
    ControllerState, JobDescriptor, JobRecord, Partition, PartitionFlags, Reservation, Uid,
};

use crate::common::error::MarshalError;
use crate::value::{Table, Value};

fn string_field(field: &str, value: &Value) -> Result<Option<String>, MarshalError> {
    match value {
        Value::Nil => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        Value::Integer(v) => Ok(Some(v.to_string())),
        Value::Number(v) => Ok(Some(v.to_string())),
        other => Err(MarshalError::UnsupportedValue {
            field: field.to_string(),
            kind: other.type_name(),
        }),
    }
}

fn int_field<T: TryFrom<i64>>(field: &str, value: &Value) -> Result<Option<T>, MarshalError> {
    let number = match value {
        Value::Nil => return Ok(None),
        Value::Integer(v) => *v,
        Value::Number(v) if v.is_finite() && v.fract() == 0.0 => *v as i64,
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| MarshalError::UnsupportedValue {
                field: field.to_string(),
                kind: "non-numeric string",
            })?,
        Value::Number(_) => {
            return Err(MarshalError::UnsupportedValue {
                field: field.to_string(),
                kind: "fractional number",
            });
        }
        other => {
            return Err(MarshalError::UnsupportedValue {
                field: field.to_string(),
                kind: other.type_name(),
            });
        }
    };
    T::try_from(number)
        .map(Some)
        .map_err(|_| MarshalError::OutOfRange {
            field: field.to_string(),
            value: number.to_string(),
        })
}

fn bool_field(field: &str, value: &Value) -> Result<Option<bool>, MarshalError> {
    match value {
        Value::Nil => Ok(None),
        Value::Boolean(v) => Ok(Some(*v)),
        Value::Integer(0) => Ok(Some(false)),
        Value::Integer(1) => Ok(Some(true)),
        Value::Integer(v) => Err(MarshalError::OutOfRange {
            field: field.to_string(),
            value: v.to_string(),
        }),
        other => Err(MarshalError::UnsupportedValue {
            field: field.to_string(),
            kind: other.type_name(),
        }),
    }
}

macro_rules! writable_job_fields {
    ($($field:ident: $coerce:ident),* $(,)?) => {
        /// Job descriptor fields that a policy script may assign.
        pub const WRITABLE_JOB_FIELDS: &[&str] = &[$(stringify!($field)),*];

        fn export_writable(desc: &JobDescriptor, table: &mut Table) {
            $(table.set(stringify!($field), desc.$field.clone());)*
        }

        fn import_writable(desc: &mut JobDescriptor, updates: &Table) -> Vec<MarshalError> {
            let mut rejected = Vec::new();
            $(
                match $coerce(stringify!($field), updates.get(stringify!($field))) {
                    Ok(value) => desc.$field = value,
                    Err(error) => rejected.push(error),
                }
            )*
            rejected
        }
    };
}

writable_job_fields! {
    account: string_field,
    comment: string_field,
    contiguous: bool_field,
    cpus_per_task: int_field,
    dependency: string_field,
    features: string_field,
    gres: string_field,
    licenses: string_field,
    max_cpus: int_field,
    max_nodes: int_field,
    min_cpus: int_field,
    min_mem_per_cpu: int_field,
    min_mem_per_node: int_field,
    min_nodes: int_field,
    name: string_field,
    nice: int_field,
    ntasks_per_node: int_field,
    num_tasks: int_field,
    partition: string_field,
    priority: int_field,
    qos: string_field,
    requeue: bool_field,
    reservation: string_field,
    shared: int_field,
    std_err: string_field,
    std_out: string_field,
    time_limit: int_field,
    time_min: int_field,
    wckey: string_field,
    work_dir: string_field,
}

fn epoch(time: &DateTime<Utc>) -> Value {
    Value::Integer(time.timestamp())
}

/// Fields of a pending request. Pass it to the script together with
/// [`WRITABLE_JOB_FIELDS`].
pub fn job_request(desc: &JobDescriptor) -> Table {
    let mut table = Table::new()
        .with("user_id", desc.user_id.as_num())
        .with("group_id", desc.group_id.as_num())
        .with("alloc_node", desc.alloc_node.clone())
        .with("script", desc.script.clone());
    export_writable(desc, &mut table);
    table
}

/// Writes the writable fields from `updates` back into `desc`.
///
/// A missing entry clears the field. Values that cannot be converted are
/// returned as errors and the corresponding fields keep their values.
pub fn apply_request(desc: &mut JobDescriptor, updates: &Table) -> Vec<MarshalError> {
    import_writable(desc, updates)
}

pub fn job_record(job: &JobRecord) -> Table {
    Table::new()
        .with("job_id", job.job_id.as_num())
        .with("name", job.name.as_str())
        .with("user_id", job.user_id.as_num())
        .with("group_id", job.group_id.as_num())
        .with("account", job.account.clone())
        .with("partition", job.partition.clone())
        .with("qos", job.qos.clone())
        .with("reservation", job.reservation.clone())
        .with("comment", job.comment.clone())
        .with("job_state", job.job_state.as_str())
        .with("priority", job.priority)
        .with("time_limit", job.time_limit)
        .with("time_min", job.time_min)
        .with("num_cpus", job.num_cpus)
        .with("num_nodes", job.num_nodes)
        .with("nodes", job.nodes.clone())
        .with("features", job.features.clone())
        .with("wckey", job.wckey.clone())
        .with("work_dir", job.work_dir.clone())
        .with("submit_time", epoch(&job.submit_time))
        .with("start_time", job.start_time.as_ref().map(epoch))
        .with("end_time", job.end_time.as_ref().map(epoch))
}

fn string_list(list: &Option<Vec<String>>) -> Value {
    list.as_ref()
        .map(|items| Value::Table(Table::sequence(items.iter().map(String::as_str))))
        .unwrap_or(Value::Nil)
}

pub fn partition(partition: &Partition) -> Table {
    Table::new()
        .with("name", partition.name.as_str())
        .with("nodes", partition.nodes.clone())
        .with("total_nodes", partition.total_nodes)
        .with("total_cpus", partition.total_cpus)
        .with("min_nodes", partition.min_nodes)
        .with("max_nodes", partition.max_nodes)
        .with("max_time", partition.max_time)
        .with("default_time", partition.default_time)
        .with("max_cpus_per_node", partition.max_cpus_per_node)
        .with("def_mem_per_cpu", partition.def_mem_per_cpu)
        .with("max_mem_per_cpu", partition.max_mem_per_cpu)
        .with("priority_tier", partition.priority_tier)
        .with("flags", partition.flags.bits())
        .with(
            "flag_default",
            partition.flags.contains(PartitionFlags::DEFAULT),
        )
        .with("state_up", partition.state_up)
        .with("allow_groups", string_list(&partition.allow_groups))
        .with("allow_accounts", string_list(&partition.allow_accounts))
        .with("allow_qos", string_list(&partition.allow_qos))
        .with("qos", partition.qos.clone())
}

/// Partitions keyed by name.
pub fn partition_set<'a>(partitions: impl IntoIterator<Item = &'a Partition>) -> Table {
    let mut table = Table::new();
    for p in partitions {
        table.set(p.name.as_str(), partition(p));
    }
    table
}

/// Partitions visible to a job owned by `owner` and submitted by `submitter`.
/// The partition table is read-locked only while the set is built.
pub fn visible_partition_set(state: &ControllerState, owner: Uid, submitter: Uid) -> Table {
    let partitions = state.partitions();
    partition_set(partitions.visible_to(owner, submitter, state.authority()))
}

pub fn reservation(reservation: &Reservation) -> Table {
    Table::new()
        .with("name", reservation.name.as_str())
        .with(
            "accounts",
            Table::sequence(reservation.accounts.iter().map(String::as_str)),
        )
        .with(
            "users",
            Table::sequence(reservation.users.iter().map(String::as_str)),
        )
        .with("partition", reservation.partition.clone())
        .with("node_list", reservation.node_list.clone())
        .with("node_cnt", reservation.node_cnt)
        .with("core_cnt", reservation.core_cnt)
        .with("licenses", reservation.licenses.clone())
        .with("features", reservation.features.clone())
        .with("start_time", epoch(&reservation.start_time))
        .with("end_time", epoch(&reservation.end_time))
        .with("duration", reservation.duration_minutes())
        .with("flags", reservation.flags.bits())
}

/// Reservations keyed by name.
pub fn reservation_set<'a>(reservations: impl IntoIterator<Item = &'a Reservation>) -> Table {
    let mut table = Table::new();
    for r in reservations {
        table.set(r.name.as_str(), reservation(r));
    }
    table
}

/// Jobs keyed by job id.
pub fn job_set<'a>(jobs: impl IntoIterator<Item = &'a JobRecord>) -> Table {
    let mut table = Table::new();
    for job in jobs {
        table.set(job.job_id.as_num(), job_record(job));
    }
    table
}
