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

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use backon::BackoffBuilder;
use backon::FibonacciBuilder;
use chrono::TimeDelta;
use chrono::Utc;
use error_stack::bail;
use error_stack::Report;
use error_stack::Result;
use error_stack::ResultExt;
use gleaner_store::AnalyticStore;
use gleaner_store::JobHandle;
use gleaner_store::QueryOptions;
use gleaner_store::StoreError;
use gleaner_store::TableRef;
use gleaner_store::WriteDisposition;
use mea::latch::Latch;

use crate::DedupError;
use crate::PartitionedName;
use crate::RESERVED_DATASET;

// A source must carry at least this share of the destination's distinct
// task files and tests before it may replace the destination partition.
const TASK_COUNT_REQUIREMENT: f64 = 0.99;
const TEST_COUNT_REQUIREMENT: f64 = 0.95;

#[derive(Debug, Clone)]
pub struct DedupOptions {
    /// Sources modified more recently than this are not touched.
    pub min_source_age: TimeDelta,
    /// Skip the source-newer-than-destination safety check.
    pub ignore_dest_age: bool,
    /// Run every preflight check, then stop short of moving data.
    pub dry_run: bool,
    /// Promote an existing intermediate without re-running the dedup query.
    pub copy_only: bool,
    /// Drop the source table once the destination partition is published.
    pub delete_source: bool,
    /// Cap for the fibonacci backoff while awaiting store jobs.
    pub max_backoff: Duration,
    /// Overall wall-clock bound for one job run.
    pub deadline: Option<Duration>,
}

impl Default for DedupOptions {
    fn default() -> Self {
        DedupOptions {
            min_source_age: TimeDelta::zero(),
            ignore_dest_age: false,
            dry_run: false,
            copy_only: false,
            delete_source: false,
            max_backoff: Duration::from_secs(300),
            deadline: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupOutcome {
    Published,
    DryRun,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CountStats {
    tests: i64,
    tasks: i64,
}

/// One dedup-and-publish run for a single date: validate the source
/// against the destination partition, deduplicate the source into the
/// intermediate partition, then atomically copy the intermediate over
/// the destination.
///
/// The job never writes to its source. The intermediate lives in the
/// source's dataset under the source's prefix and is overwritten on
/// every run, so a leftover from an earlier attempt is harmless.
pub struct DedupJob {
    store: Arc<dyn AnalyticStore>,
    shutdown: Arc<Latch>,
    source: TableRef,
    dest: TableRef,
    intermediate: TableRef,
    date: String,
    options: DedupOptions,
}

impl std::fmt::Debug for DedupJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedupJob")
            .field("source", &self.source)
            .field("dest", &self.dest)
            .field("intermediate", &self.intermediate)
            .field("date", &self.date)
            .field("options", &self.options)
            .finish()
    }
}

impl DedupJob {
    /// Bind a job to `source` (`dataset.prefix_YYYYMMDD`) and `dest`
    /// (`dataset.prefix$YYYYMMDD`). Both names must parse with matching
    /// calendar dates; the intermediate is derived from the source.
    pub fn new(
        store: Arc<dyn AnalyticStore>,
        shutdown: Arc<Latch>,
        source: TableRef,
        dest: TableRef,
        options: DedupOptions,
    ) -> Result<DedupJob, DedupError> {
        let source_name = PartitionedName::parse(&source.table)?;
        if source_name.separator != '_' {
            bail!(DedupError::InvalidTableName(source.table.clone()));
        }
        let dest_name = PartitionedName::parse(&dest.table)?;
        if dest_name.separator != '$' {
            bail!(DedupError::InvalidTableName(dest.table.clone()));
        }
        if source_name.date != dest_name.date {
            bail!(DedupError::MismatchedPartitions {
                src: source.to_string(),
                dest: dest.to_string(),
            });
        }

        let date = source_name.date_str();
        let intermediate = TableRef::new(
            source.project.clone(),
            source.dataset.clone(),
            format!("{}${date}", source_name.prefix),
        );
        Ok(DedupJob {
            store,
            shutdown,
            source,
            dest,
            intermediate,
            date,
            options,
        })
    }

    pub fn source(&self) -> &TableRef {
        &self.source
    }

    pub fn intermediate(&self) -> &TableRef {
        &self.intermediate
    }

    pub async fn run(&self) -> Result<DedupOutcome, DedupError> {
        match self.options.deadline {
            Some(deadline) => match tokio::time::timeout(deadline, self.execute()).await {
                Ok(outcome) => outcome,
                Err(_) => bail!(DedupError::DeadlineExceeded),
            },
            None => self.execute().await,
        }
    }

    async fn execute(&self) -> Result<DedupOutcome, DedupError> {
        let dest_counts = self.preflight().await?;

        if self.options.dry_run {
            log::info!(
                "dry run: would dedup {} into {} and publish to {}",
                self.source,
                self.intermediate,
                self.dest,
            );
            return Ok(DedupOutcome::DryRun);
        }

        if !self.options.copy_only {
            let job = self
                .guarded(self.store.run_query(
                    &self.dedup_query(),
                    QueryOptions {
                        destination: Some(self.intermediate.clone()),
                        write_disposition: Some(WriteDisposition::Truncate),
                        legacy_sql: false,
                    },
                ))
                .await
                .change_context(DedupError::QueryFailed)?;
            self.await_done(&job, DedupError::QueryFailed).await?;

            // The intermediate must still clear the destination bar before
            // it may be promoted.
            if let Some(dest_counts) = dest_counts {
                let counts = self.count_stats(&self.intermediate).await?;
                self.check_counts(counts, dest_counts)?;
            }
        }

        let copy = self
            .guarded(self.store.copy_partition(
                &self.intermediate,
                &self.dest,
                WriteDisposition::Truncate,
            ))
            .await
            .change_context(DedupError::CopyFailed)?;
        self.await_done(&copy, DedupError::CopyFailed).await?;
        log::info!("published {} from {}", self.dest, self.intermediate);

        if self.options.delete_source {
            self.guarded(self.store.delete_table(&self.source))
                .await
                .change_context(DedupError::StoreFailed)?;
            log::info!("deleted source {}", self.source);
        }

        Ok(DedupOutcome::Published)
    }

    /// Safety checks, in order; the first failure aborts the job. When the
    /// destination partition exists, its task/test counts are returned for
    /// the post-dedup re-check.
    async fn preflight(&self) -> Result<Option<CountStats>, DedupError> {
        let source_meta = self
            .guarded(self.store.table_metadata(&self.source))
            .await?;
        let age = Utc::now() - source_meta.last_modified;
        if age < self.options.min_source_age {
            bail!(DedupError::TooRecent {
                age_hours: age.num_hours(),
                min_hours: self.options.min_source_age.num_hours(),
            });
        }

        if self.source.dataset == self.dest.dataset {
            bail!(DedupError::SameScope(self.source.dataset.clone()));
        }
        if self.intermediate.dataset == self.dest.dataset
            || self.intermediate.dataset == RESERVED_DATASET
        {
            bail!(DedupError::ForbiddenScope(self.intermediate.dataset.clone()));
        }

        let dest_base = TableRef::new(
            self.dest.project.clone(),
            self.dest.dataset.clone(),
            self.dest.base_table().to_string(),
        );
        let dest_partition = self
            .guarded(self.store.partition_metadata(&dest_base, &self.date))
            .await?;
        let Some(dest_partition) = dest_partition else {
            // Nothing to protect: the destination partition does not exist.
            return Ok(None);
        };

        if !self.options.ignore_dest_age && source_meta.last_modified < dest_partition.last_modified
        {
            bail!(DedupError::SourceOlderThanDest);
        }

        let source_counts = self.count_stats(&self.source).await?;
        let dest_counts = self.count_stats(&self.dest).await?;
        self.check_counts(source_counts, dest_counts)?;
        Ok(Some(dest_counts))
    }

    fn check_counts(&self, candidate: CountStats, dest: CountStats) -> Result<(), DedupError> {
        if (candidate.tasks as f64) < TASK_COUNT_REQUIREMENT * (dest.tasks as f64) {
            bail!(DedupError::TooFewTasks {
                src: candidate.tasks,
                dest: dest.tasks,
            });
        }
        if (candidate.tests as f64) < TEST_COUNT_REQUIREMENT * (dest.tests as f64) {
            bail!(DedupError::TooFewTests {
                src: candidate.tests,
                dest: dest.tests,
            });
        }
        Ok(())
    }

    /// Deduplicate by `test_id`, keeping one deterministic representative
    /// per key: smallest `parse_time`, ties broken on `task_filename`.
    fn dedup_query(&self) -> String {
        format!(
            "#standardSQL\n\
             SELECT * EXCEPT (row_number)\n\
             FROM (\n\
               SELECT *, ROW_NUMBER() OVER (\n\
                 PARTITION BY test_id ORDER BY parse_time, task_filename\n\
               ) AS row_number\n\
               FROM `{}.{}.{}`\n\
             )\n\
             WHERE row_number = 1",
            self.source.project, self.source.dataset, self.source.table,
        )
    }

    /// The task/test pair of a table or partition. A synthetic zero-test
    /// task keeps the aggregation defined over empty partitions; the
    /// `COUNT(task) - 1` compensates for it.
    fn count_query(table: &TableRef) -> String {
        format!(
            "SELECT SUM(tests) AS tests, COUNT(task) - 1 AS tasks\n\
             FROM (\n\
               SELECT COUNT(test_id) AS tests, task_filename AS task\n\
               FROM [{}:{}.{}]\n\
               GROUP BY task),\n\
               (SELECT 0 AS tests, \"synthetic-task\" AS task)",
            table.project, table.dataset, table.table,
        )
    }

    async fn count_stats(&self, table: &TableRef) -> Result<CountStats, DedupError> {
        let job = self
            .guarded(self.store.run_query(
                &Self::count_query(table),
                QueryOptions {
                    destination: None,
                    write_disposition: None,
                    legacy_sql: true,
                },
            ))
            .await
            .change_context(DedupError::QueryFailed)?;
        self.await_done(&job, DedupError::QueryFailed).await?;

        let rows = self
            .guarded(self.store.fetch_rows(&job))
            .await
            .change_context(DedupError::QueryFailed)?;
        let Some(row) = rows.first() else {
            bail!(DedupError::QueryFailed);
        };
        let read = |name: &str| -> Result<i64, DedupError> {
            match &row[name] {
                serde_json::Value::Number(n) => n.as_i64(),
                serde_json::Value::String(s) => s.parse::<i64>().ok(),
                serde_json::Value::Null => Some(0),
                _ => None,
            }
            .ok_or_else(|| Report::new(DedupError::QueryFailed))
        };
        Ok(CountStats {
            tests: read("tests")?,
            tasks: read("tasks")?,
        })
    }

    /// Wait for a store job with fibonacci backoff capped at
    /// `max_backoff`, surfacing the job's first error as `on_error`.
    async fn await_done(&self, job: &JobHandle, on_error: DedupError) -> Result<(), DedupError> {
        let mut backoff = FibonacciBuilder::default()
            .with_min_delay(Duration::from_secs(1))
            .with_max_delay(self.options.max_backoff)
            .without_max_times()
            .build();
        loop {
            let status = tokio::select! {
                biased;
                _ = self.shutdown.wait() => bail!(DedupError::Cancelled),
                status = self.store.job_status(job) => {
                    status.change_context(DedupError::AwaitFailed)?
                }
            };
            if status.is_done() {
                return match status.error {
                    Some(message) => Err(Report::new(on_error).attach_printable(message)),
                    None => Ok(()),
                };
            }

            let delay = backoff.next().unwrap_or(self.options.max_backoff);
            tokio::select! {
                biased;
                _ = self.shutdown.wait() => bail!(DedupError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Run one store call under the cancellation latch.
    async fn guarded<T, Fut>(&self, fut: Fut) -> Result<T, DedupError>
    where
        Fut: Future<Output = Result<T, StoreError>>,
    {
        tokio::select! {
            biased;
            _ = self.shutdown.wait() => bail!(DedupError::Cancelled),
            result = fut => result.change_context(DedupError::StoreFailed),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;
    use chrono::Utc;
    use gleaner_store::MemoryStore;
    use gleaner_store::PartitionMeta;
    use gleaner_store::TableKind;
    use gleaner_store::TableMeta;
    use serde_json::json;

    use super::*;

    fn table_meta(age_hours: i64) -> TableMeta {
        let modified = Utc::now() - TimeDelta::hours(age_hours);
        TableMeta {
            kind: TableKind::Table,
            created: modified - TimeDelta::hours(1),
            last_modified: modified,
            num_rows: 100,
            num_bytes: 10_000,
        }
    }

    fn partition_meta(age_hours: i64) -> PartitionMeta {
        let modified = Utc::now() - TimeDelta::hours(age_hours);
        PartitionMeta {
            created: modified - TimeDelta::hours(1),
            last_modified: modified,
        }
    }

    fn counts(tests: i64, tasks: i64) -> serde_json::Value {
        json!({ "tests": tests.to_string(), "tasks": tasks.to_string() })
    }

    fn job_on(store: Arc<MemoryStore>, options: DedupOptions) -> Result<DedupJob, DedupError> {
        DedupJob::new(
            store,
            Arc::new(Latch::new(1)),
            TableRef::new("mlab", "batch", "ndt_20170924"),
            TableRef::new("mlab", "base_tables", "ndt$20170924"),
            options,
        )
    }

    fn run(job: &DedupJob) -> Result<DedupOutcome, DedupError> {
        gleaner_runtime::test_runtime().block_on(job.run())
    }

    #[test]
    fn test_mismatched_partition_dates() {
        let err = DedupJob::new(
            Arc::new(MemoryStore::new()),
            Arc::new(Latch::new(1)),
            TableRef::new("mlab", "batch", "ndt_20170924"),
            TableRef::new("mlab", "base_tables", "ndt$20170925"),
            DedupOptions::default(),
        )
        .unwrap_err();
        assert_eq!(
            *err.current_context(),
            DedupError::MismatchedPartitions {
                src: "mlab.batch.ndt_20170924".to_string(),
                dest: "mlab.base_tables.ndt$20170925".to_string(),
            }
        );
    }

    #[test]
    fn test_separators_must_match_roles() {
        let err = DedupJob::new(
            Arc::new(MemoryStore::new()),
            Arc::new(Latch::new(1)),
            TableRef::new("mlab", "batch", "ndt$20170924"),
            TableRef::new("mlab", "base_tables", "ndt$20170924"),
            DedupOptions::default(),
        )
        .unwrap_err();
        assert_eq!(
            *err.current_context(),
            DedupError::InvalidTableName("ndt$20170924".to_string())
        );
    }

    #[test]
    fn test_too_recent_source() {
        let store = Arc::new(MemoryStore::new());
        store.add_table(
            &TableRef::new("mlab", "batch", "ndt_20170924"),
            table_meta(1),
        );
        let job = job_on(
            store,
            DedupOptions {
                min_source_age: TimeDelta::hours(48),
                ..DedupOptions::default()
            },
        )
        .unwrap();
        let err = run(&job).unwrap_err();
        assert_eq!(
            *err.current_context(),
            DedupError::TooRecent {
                age_hours: 1,
                min_hours: 48,
            }
        );
    }

    #[test]
    fn test_age_check_passes_older_source() {
        let store = Arc::new(MemoryStore::new());
        store.add_table(
            &TableRef::new("mlab", "batch", "ndt_20170924"),
            table_meta(24),
        );
        let job = job_on(
            store.clone(),
            DedupOptions {
                min_source_age: TimeDelta::hours(12),
                dry_run: true,
                ..DedupOptions::default()
            },
        )
        .unwrap();
        assert_eq!(run(&job).unwrap(), DedupOutcome::DryRun);
    }

    #[test]
    fn test_same_scope_rejected() {
        let store = Arc::new(MemoryStore::new());
        store.add_table(
            &TableRef::new("mlab", "batch", "ndt_20170924"),
            table_meta(24),
        );
        let job = DedupJob::new(
            store,
            Arc::new(Latch::new(1)),
            TableRef::new("mlab", "batch", "ndt_20170924"),
            TableRef::new("mlab", "batch", "ndt$20170924"),
            DedupOptions::default(),
        )
        .unwrap();
        let err = run(&job).unwrap_err();
        assert_eq!(
            *err.current_context(),
            DedupError::SameScope("batch".to_string())
        );
    }

    #[test]
    fn test_reserved_intermediate_scope_rejected() {
        let store = Arc::new(MemoryStore::new());
        store.add_table(
            &TableRef::new("mlab", "base_tables", "ndt_20170924"),
            table_meta(24),
        );
        // the intermediate resolves into the source's dataset
        let job = DedupJob::new(
            store,
            Arc::new(Latch::new(1)),
            TableRef::new("mlab", "base_tables", "ndt_20170924"),
            TableRef::new("mlab", "release", "ndt$20170924"),
            DedupOptions::default(),
        )
        .unwrap();
        let err = run(&job).unwrap_err();
        assert_eq!(
            *err.current_context(),
            DedupError::ForbiddenScope("base_tables".to_string())
        );
    }

    #[test]
    fn test_source_older_than_destination() {
        let store = Arc::new(MemoryStore::new());
        let source = TableRef::new("mlab", "batch", "ndt_20170924");
        store.add_table(&source, table_meta(48));
        store.add_partition(
            &TableRef::new("mlab", "base_tables", "ndt"),
            "20170924",
            partition_meta(24),
        );
        let job = job_on(store.clone(), DedupOptions::default()).unwrap();
        let err = run(&job).unwrap_err();
        assert_eq!(*err.current_context(), DedupError::SourceOlderThanDest);

        // the same shape passes with ignore_dest_age, down to the counts
        store.push_rows(vec![counts(100, 10)]);
        store.push_rows(vec![counts(100, 10)]);
        let job = job_on(
            store,
            DedupOptions {
                ignore_dest_age: true,
                dry_run: true,
                ..DedupOptions::default()
            },
        )
        .unwrap();
        assert_eq!(run(&job).unwrap(), DedupOutcome::DryRun);
    }

    #[test]
    fn test_too_few_tasks_and_tests() {
        let store = Arc::new(MemoryStore::new());
        store.add_table(
            &TableRef::new("mlab", "batch", "ndt_20170924"),
            table_meta(48),
        );
        store.add_partition(
            &TableRef::new("mlab", "base_tables", "ndt"),
            "20170924",
            partition_meta(72),
        );

        // 89 tasks against 100: under the 99% bar
        store.push_rows(vec![counts(1000, 89)]);
        store.push_rows(vec![counts(1000, 100)]);
        let job = job_on(store.clone(), DedupOptions::default()).unwrap();
        let err = run(&job).unwrap_err();
        assert_eq!(
            *err.current_context(),
            DedupError::TooFewTasks {
                src: 89,
                dest: 100,
            }
        );

        // tasks fine, 900 tests against 1000: under the 95% bar
        store.push_rows(vec![counts(900, 100)]);
        store.push_rows(vec![counts(1000, 100)]);
        let job = job_on(store.clone(), DedupOptions::default()).unwrap();
        let err = run(&job).unwrap_err();
        assert_eq!(
            *err.current_context(),
            DedupError::TooFewTests {
                src: 900,
                dest: 1000,
            }
        );
    }

    #[test]
    fn test_publish_path_issues_dedup_then_truncating_copy() {
        let store = Arc::new(MemoryStore::new());
        let source = TableRef::new("mlab", "batch", "ndt_20170924");
        store.add_table(&source, table_meta(48));

        let job = job_on(store.clone(), DedupOptions::default()).unwrap();
        assert_eq!(run(&job).unwrap(), DedupOutcome::Published);

        let queries = store.issued_queries();
        assert_eq!(queries.len(), 1, "no destination partition, no counting");
        let (sql, options) = &queries[0];
        assert!(sql.contains("PARTITION BY test_id"));
        assert!(sql.contains("ORDER BY parse_time, task_filename"));
        assert!(sql.contains("`mlab.batch.ndt_20170924`"));
        assert_eq!(
            options.destination,
            Some(TableRef::new("mlab", "batch", "ndt$20170924"))
        );
        assert_eq!(options.write_disposition, Some(WriteDisposition::Truncate));

        let copies = store.issued_copies();
        assert_eq!(
            copies,
            vec![(
                TableRef::new("mlab", "batch", "ndt$20170924"),
                TableRef::new("mlab", "base_tables", "ndt$20170924"),
                WriteDisposition::Truncate,
            )]
        );
        assert!(store.deleted_tables().is_empty());
    }

    #[test]
    fn test_recount_guards_the_copy() {
        let store = Arc::new(MemoryStore::new());
        store.add_table(
            &TableRef::new("mlab", "batch", "ndt_20170924"),
            table_meta(48),
        );
        store.add_partition(
            &TableRef::new("mlab", "base_tables", "ndt"),
            "20170924",
            partition_meta(72),
        );
        // preflight counts pass, the post-dedup recount collapses
        store.push_rows(vec![counts(1000, 100)]);
        store.push_rows(vec![counts(1000, 100)]);
        store.push_rows(vec![counts(100, 100)]);

        let job = job_on(store.clone(), DedupOptions::default()).unwrap();
        let err = run(&job).unwrap_err();
        assert_eq!(
            *err.current_context(),
            DedupError::TooFewTests {
                src: 100,
                dest: 1000,
            }
        );
        assert!(store.issued_copies().is_empty(), "the copy must not run");
    }

    #[test]
    fn test_copy_only_skips_the_dedup_query() {
        let store = Arc::new(MemoryStore::new());
        store.add_table(
            &TableRef::new("mlab", "batch", "ndt_20170924"),
            table_meta(48),
        );
        let job = job_on(
            store.clone(),
            DedupOptions {
                copy_only: true,
                ..DedupOptions::default()
            },
        )
        .unwrap();
        assert_eq!(run(&job).unwrap(), DedupOutcome::Published);
        assert!(store.issued_queries().is_empty());
        assert_eq!(store.issued_copies().len(), 1);
    }

    #[test]
    fn test_dry_run_moves_no_data() {
        let store = Arc::new(MemoryStore::new());
        store.add_table(
            &TableRef::new("mlab", "batch", "ndt_20170924"),
            table_meta(48),
        );
        let job = job_on(
            store.clone(),
            DedupOptions {
                dry_run: true,
                delete_source: true,
                ..DedupOptions::default()
            },
        )
        .unwrap();
        assert_eq!(run(&job).unwrap(), DedupOutcome::DryRun);
        assert!(store.issued_queries().is_empty());
        assert!(store.issued_copies().is_empty());
        assert!(store.deleted_tables().is_empty());
    }

    #[test]
    fn test_delete_source_after_publish() {
        let store = Arc::new(MemoryStore::new());
        let source = TableRef::new("mlab", "batch", "ndt_20170924");
        store.add_table(&source, table_meta(48));
        let job = job_on(
            store.clone(),
            DedupOptions {
                delete_source: true,
                ..DedupOptions::default()
            },
        )
        .unwrap();
        assert_eq!(run(&job).unwrap(), DedupOutcome::Published);
        assert_eq!(store.deleted_tables(), vec![source]);
    }

    #[test]
    fn test_failed_dedup_query_aborts() {
        let store = Arc::new(MemoryStore::new());
        store.add_table(
            &TableRef::new("mlab", "batch", "ndt_20170924"),
            table_meta(48),
        );
        store.fail_job(0, "resources exceeded");
        let job = job_on(store.clone(), DedupOptions::default()).unwrap();
        let err = run(&job).unwrap_err();
        assert_eq!(*err.current_context(), DedupError::QueryFailed);
        assert!(store.issued_copies().is_empty());
    }

    #[test]
    fn test_failed_copy_surfaces_copy_error() {
        let store = Arc::new(MemoryStore::new());
        store.add_table(
            &TableRef::new("mlab", "batch", "ndt_20170924"),
            table_meta(48),
        );
        store.fail_job(1, "backend error");
        let job = job_on(store.clone(), DedupOptions::default()).unwrap();
        let err = run(&job).unwrap_err();
        assert_eq!(*err.current_context(), DedupError::CopyFailed);
    }

    #[test]
    fn test_cancellation_propagates_verbatim() {
        let store = Arc::new(MemoryStore::new());
        store.add_table(
            &TableRef::new("mlab", "batch", "ndt_20170924"),
            table_meta(48),
        );
        let shutdown = Arc::new(Latch::new(1));
        shutdown.count_down();
        let job = DedupJob::new(
            store,
            shutdown,
            TableRef::new("mlab", "batch", "ndt_20170924"),
            TableRef::new("mlab", "base_tables", "ndt$20170924"),
            DedupOptions::default(),
        )
        .unwrap();
        let err = run(&job).unwrap_err();
        assert_eq!(*err.current_context(), DedupError::Cancelled);
    }

    #[test]
    fn test_generous_deadline_does_not_interfere() {
        let store = Arc::new(MemoryStore::new());
        store.add_table(
            &TableRef::new("mlab", "batch", "ndt_20170924"),
            table_meta(48),
        );
        let job = job_on(
            store,
            DedupOptions {
                deadline: Some(Duration::from_secs(60)),
                ..DedupOptions::default()
            },
        )
        .unwrap();
        assert_eq!(run(&job).unwrap(), DedupOutcome::Published);
    }

    #[test]
    fn test_count_query_keeps_the_synthetic_task() {
        let sql = DedupJob::count_query(&TableRef::new("mlab", "batch", "ndt$20170924"));
        assert!(sql.contains("COUNT(task) - 1"));
        assert!(sql.contains("[mlab:batch.ndt$20170924]"));
        assert!(sql.contains("synthetic-task"));
    }
}
