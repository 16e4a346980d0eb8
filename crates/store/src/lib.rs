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

use std::fmt::Display;
use std::fmt::Formatter;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use error_stack::Result;

mod bigquery;
pub use bigquery::BigQueryStore;
pub use bigquery::DEFAULT_ENDPOINT;
pub use bigquery::TOKEN_ENV;

#[cfg(any(test, feature = "test"))]
mod memory;
#[cfg(any(test, feature = "test"))]
pub use memory::MemoryStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store request failed")]
    Http(#[from] reqwest::Error),
    #[error("store API error {status}: {message}")]
    Api { status: u16, message: String },
    #[error("{0} not found")]
    NotFound(String),
    #[error("failed to decode store response: {0}")]
    Decode(String),
    #[error("invalid store configuration: {0}")]
    Config(String),
}

/// A fully qualified table, or a single partition of one when the table
/// name carries a `$YYYYMMDD` decorator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub project: String,
    pub dataset: String,
    pub table: String,
}

impl TableRef {
    pub fn new(
        project: impl Into<String>,
        dataset: impl Into<String>,
        table: impl Into<String>,
    ) -> TableRef {
        TableRef {
            project: project.into(),
            dataset: dataset.into(),
            table: table.into(),
        }
    }

    /// Address one date partition of this table.
    pub fn partition(&self, date: &str) -> TableRef {
        TableRef {
            project: self.project.clone(),
            dataset: self.dataset.clone(),
            table: format!("{}${date}", self.table),
        }
    }

    /// The table name with any partition decorator stripped.
    pub fn base_table(&self) -> &str {
        match self.table.split_once('$') {
            Some((base, _)) => base,
            None => &self.table,
        }
    }
}

impl Display for TableRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.project, self.dataset, self.table)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Table,
    View,
    External,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableMeta {
    pub kind: TableKind,
    pub created: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
    pub num_rows: u64,
    pub num_bytes: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PartitionMeta {
    pub created: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteDisposition {
    /// Replace the destination contents.
    Truncate,
    /// Append to the destination contents.
    Append,
}

#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub destination: Option<TableRef>,
    pub write_disposition: Option<WriteDisposition>,
    pub legacy_sql: bool,
}

/// An asynchronous job running inside the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStatus {
    pub state: JobState,
    pub error: Option<String>,
}

impl JobStatus {
    pub fn is_done(&self) -> bool {
        self.state == JobState::Done
    }
}

/// The analytic warehouse the dedup engine runs against. The engine only
/// ever reads source tables; writes go to intermediate and destination
/// partitions via queries and copies.
///
/// All methods are suspension points and must surface cancellation from
/// the caller's side; implementations perform no retries of their own.
#[async_trait]
pub trait AnalyticStore: Send + Sync {
    /// Tables of `project.dataset` whose name contains `pattern`.
    async fn list_tables(
        &self,
        project: &str,
        dataset: &str,
        pattern: &str,
    ) -> Result<Vec<TableRef>, StoreError>;

    async fn table_metadata(&self, table: &TableRef) -> Result<TableMeta, StoreError>;

    /// Metadata of one date partition, or `None` when the partition does
    /// not exist yet.
    async fn partition_metadata(
        &self,
        table: &TableRef,
        date: &str,
    ) -> Result<Option<PartitionMeta>, StoreError>;

    async fn run_query(&self, sql: &str, options: QueryOptions) -> Result<JobHandle, StoreError>;

    /// Result rows of a finished query job, one JSON object per row.
    async fn fetch_rows(&self, job: &JobHandle) -> Result<Vec<serde_json::Value>, StoreError>;

    async fn copy_partition(
        &self,
        src: &TableRef,
        dst: &TableRef,
        disposition: WriteDisposition,
    ) -> Result<JobHandle, StoreError>;

    async fn job_status(&self, job: &JobHandle) -> Result<JobStatus, StoreError>;

    async fn delete_table(&self, table: &TableRef) -> Result<(), StoreError>;
}
