//! Status codes returned to submitters.
//!
//! Policy scripts return one of these (or any other number) and the
//! controller passes it through as the result of the submission.

pub const SUCCESS: i32 = 0;
pub const ERROR: i32 = -1;

pub const ESLURM_INVALID_PARTITION_NAME: i32 = 2000;
pub const ESLURM_DEFAULT_PARTITION_NOT_SET: i32 = 2001;
pub const ESLURM_ACCESS_DENIED: i32 = 2002;
pub const ESLURM_INVALID_NODE_COUNT: i32 = 2006;

/// Named codes exported to scripts.
pub const NAMED_CODES: &[(&str, i32)] = &[
    ("SUCCESS", SUCCESS),
    ("ERROR", ERROR),
    ("FAILURE", ERROR),
    ("ESLURM_INVALID_PARTITION_NAME", ESLURM_INVALID_PARTITION_NAME),
    (
        "ESLURM_DEFAULT_PARTITION_NOT_SET",
        ESLURM_DEFAULT_PARTITION_NOT_SET,
    ),
    ("ESLURM_ACCESS_DENIED", ESLURM_ACCESS_DENIED),
    ("ESLURM_INVALID_NODE_COUNT", ESLURM_INVALID_NODE_COUNT),
];
