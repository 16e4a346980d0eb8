// Copyright 2024 tison <wander4096@gmail.com>
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Safety-checked promotion of per-day source tables into canonical
//! partitioned destinations: validate, deduplicate into an intermediate
//! partition, then atomically copy the intermediate over the destination.

mod job;
pub use job::DedupJob;
pub use job::DedupOptions;
pub use job::DedupOutcome;

mod scanner;
pub use scanner::PartitionScanner;
pub use scanner::ScanConfig;
pub use scanner::ScanSummary;

mod table;
pub use table::PartitionedName;

/// The intermediate partition must never resolve into this dataset: it
/// holds the canonical tables, and staging output lands there only via
/// the final atomic copy.
pub const RESERVED_DATASET: &str = "base_tables";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DedupError {
    #[error("table name {0:?} does not match <prefix>[_$]YYYYMMDD")]
    InvalidTableName(String),

    #[error("source {src} and destination {dest} address different dates")]
    MismatchedPartitions { src: String, dest: String },

    #[error("source was modified {age_hours}h ago, inside the {min_hours}h safety delay")]
    TooRecent { age_hours: i64, min_hours: i64 },

    #[error("source and destination share the dataset {0:?}")]
    SameScope(String),

    #[error("intermediate dataset {0:?} is not a legal staging area")]
    ForbiddenScope(String),

    #[error("source is older than the destination partition")]
    SourceOlderThanDest,

    #[error("source carries {src} task files against {dest} in the destination")]
    TooFewTasks { src: i64, dest: i64 },

    #[error("source carries {src} tests against {dest} in the destination")]
    TooFewTests { src: i64, dest: i64 },

    #[error("dedup query failed")]
    QueryFailed,

    #[error("partition copy failed")]
    CopyFailed,

    #[error("failed while awaiting a store job")]
    AwaitFailed,

    #[error("store metadata lookup failed")]
    StoreFailed,

    #[error("operation cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,
}
