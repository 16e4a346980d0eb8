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

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use error_stack::bail;
use error_stack::Result;

use crate::AnalyticStore;
use crate::JobHandle;
use crate::JobState;
use crate::JobStatus;
use crate::PartitionMeta;
use crate::QueryOptions;
use crate::StoreError;
use crate::TableMeta;
use crate::TableRef;
use crate::WriteDisposition;

/// A scripted warehouse for tests: metadata is seeded up front, issued
/// SQL and copies are recorded, and query results are replayed from a
/// queue in issue order.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    tables: BTreeMap<String, TableMeta>,
    partitions: BTreeMap<String, PartitionMeta>,
    canned_rows: VecDeque<Vec<serde_json::Value>>,
    queries: Vec<(String, QueryOptions)>,
    copies: Vec<(TableRef, TableRef, WriteDisposition)>,
    deleted: Vec<TableRef>,
    failures: BTreeMap<String, String>,
    next_job: usize,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    pub fn add_table(&self, table: &TableRef, meta: TableMeta) {
        let mut inner = self.inner.lock().unwrap();
        inner.tables.insert(table.to_string(), meta);
    }

    pub fn add_partition(&self, table: &TableRef, date: &str, meta: PartitionMeta) {
        let mut inner = self.inner.lock().unwrap();
        inner.partitions.insert(table.partition(date).to_string(), meta);
    }

    /// Queue one result set; each `fetch_rows` call consumes one entry.
    pub fn push_rows(&self, rows: Vec<serde_json::Value>) {
        let mut inner = self.inner.lock().unwrap();
        inner.canned_rows.push_back(rows);
    }

    /// Make the `n`-th issued job (0-based, queries and copies combined)
    /// finish with the given error.
    pub fn fail_job(&self, n: usize, message: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.failures.insert(format!("job-{n}"), message.to_string());
    }

    pub fn issued_queries(&self) -> Vec<(String, QueryOptions)> {
        self.inner.lock().unwrap().queries.clone()
    }

    pub fn issued_copies(&self) -> Vec<(TableRef, TableRef, WriteDisposition)> {
        self.inner.lock().unwrap().copies.clone()
    }

    pub fn deleted_tables(&self) -> Vec<TableRef> {
        self.inner.lock().unwrap().deleted.clone()
    }
}

impl Inner {
    fn next_job_handle(&mut self) -> JobHandle {
        let id = format!("job-{}", self.next_job);
        self.next_job += 1;
        JobHandle { id }
    }
}

#[async_trait]
impl AnalyticStore for MemoryStore {
    async fn list_tables(
        &self,
        project: &str,
        dataset: &str,
        pattern: &str,
    ) -> Result<Vec<TableRef>, StoreError> {
        let prefix = format!("{project}.{dataset}.");
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .tables
            .keys()
            .filter_map(|name| name.strip_prefix(&prefix))
            .filter(|table| table.contains(pattern))
            .map(|table| TableRef::new(project, dataset, table))
            .collect())
    }

    async fn table_metadata(&self, table: &TableRef) -> Result<TableMeta, StoreError> {
        let inner = self.inner.lock().unwrap();
        match inner.tables.get(&table.to_string()) {
            Some(meta) => Ok(meta.clone()),
            None => bail!(StoreError::NotFound(table.to_string())),
        }
    }

    async fn partition_metadata(
        &self,
        table: &TableRef,
        date: &str,
    ) -> Result<Option<PartitionMeta>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .partitions
            .get(&table.partition(date).to_string())
            .cloned())
    }

    async fn run_query(&self, sql: &str, options: QueryOptions) -> Result<JobHandle, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.queries.push((sql.to_string(), options));
        Ok(inner.next_job_handle())
    }

    async fn fetch_rows(&self, _job: &JobHandle) -> Result<Vec<serde_json::Value>, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.canned_rows.pop_front() {
            Some(rows) => Ok(rows),
            None => bail!(StoreError::Decode(
                "no canned rows scripted for this query".to_string()
            )),
        }
    }

    async fn copy_partition(
        &self,
        src: &TableRef,
        dst: &TableRef,
        disposition: WriteDisposition,
    ) -> Result<JobHandle, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.copies.push((src.clone(), dst.clone(), disposition));
        Ok(inner.next_job_handle())
    }

    async fn job_status(&self, job: &JobHandle) -> Result<JobStatus, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(JobStatus {
            state: JobState::Done,
            error: inner.failures.get(&job.id).cloned(),
        })
    }

    async fn delete_table(&self, table: &TableRef) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.tables.remove(&table.to_string()).is_none() {
            bail!(StoreError::NotFound(table.to_string()));
        }
        inner.deleted.push(table.clone());
        Ok(())
    }
}
