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

use std::sync::Arc;

use chrono::Utc;
use error_stack::bail;
use error_stack::Result;
use error_stack::ResultExt;
use gleaner_runtime::TaskFn;
use gleaner_store::AnalyticStore;
use gleaner_store::TableKind;
use gleaner_store::TableMeta;
use gleaner_store::TableRef;
use mea::latch::Latch;

use crate::DedupError;
use crate::DedupJob;
use crate::DedupOptions;
use crate::PartitionedName;

/// What to scan and where to publish.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub project: String,
    /// Dataset holding the per-day source tables.
    pub source_dataset: String,
    /// Table prefix of the source family, e.g. `ndt` for `ndt_YYYYMMDD`.
    pub source_prefix: String,
    /// Dataset of the partitioned destination table.
    pub dest_dataset: String,
    /// Name of the partitioned destination table.
    pub dest_table: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScanSummary {
    pub jobs_run: usize,
    pub skipped: usize,
}

/// Enumerates the per-day source tables of one family and promotes them
/// oldest-first, one job at a time. Serial execution keeps at most one
/// large analytic query in flight; the first job error aborts the scan.
pub struct PartitionScanner {
    store: Arc<dyn AnalyticStore>,
    shutdown: Arc<Latch>,
    config: ScanConfig,
    options: DedupOptions,
}

impl PartitionScanner {
    pub fn new(
        store: Arc<dyn AnalyticStore>,
        shutdown: Arc<Latch>,
        config: ScanConfig,
        options: DedupOptions,
    ) -> PartitionScanner {
        PartitionScanner {
            store,
            shutdown,
            config,
            options,
        }
    }

    pub async fn scan(&self) -> Result<ScanSummary, DedupError> {
        let pattern = format!("{}_", self.config.source_prefix);
        let tables = self
            .guarded(self.store.list_tables(
                &self.config.project,
                &self.config.source_dataset,
                &pattern,
            ))
            .await?;
        log::info!(
            "scanning {} candidate tables under {}.{}",
            tables.len(),
            self.config.project,
            self.config.source_dataset,
        );

        let mut candidates: Vec<(TableRef, TableMeta, PartitionedName)> = Vec::new();
        for table in tables {
            let Ok(name) = PartitionedName::parse(&table.table) else {
                log::debug!("skipping {table}: not a per-day table");
                continue;
            };
            if name.prefix != self.config.source_prefix || name.separator != '_' {
                log::debug!("skipping {table}: different table family");
                continue;
            }
            let meta = self.guarded(self.store.table_metadata(&table)).await?;
            if meta.kind != TableKind::Table {
                log::debug!("skipping {table}: not a regular table");
                continue;
            }
            candidates.push((table, meta, name));
        }

        // oldest first, so an aborted scan resumes where it mattered
        candidates.sort_by_key(|(_, meta, _)| meta.last_modified);

        let mut summary = ScanSummary::default();
        for (table, meta, name) in candidates {
            let age = Utc::now() - meta.last_modified;
            if age < self.options.min_source_age {
                log::info!(
                    "skipping {table}: modified {}h ago, inside the {}h safety delay",
                    age.num_hours(),
                    self.options.min_source_age.num_hours(),
                );
                summary.skipped += 1;
                continue;
            }

            let dest = TableRef::new(
                self.config.project.clone(),
                self.config.dest_dataset.clone(),
                format!("{}${}", self.config.dest_table, name.date_str()),
            );
            let job = DedupJob::new(
                self.store.clone(),
                self.shutdown.clone(),
                table.clone(),
                dest,
                self.options.clone(),
            )?;
            log::info!("deduplicating {table}");
            job.run()
                .await
                .attach_printable_lazy(|| format!("while promoting {table}"))?;
            summary.jobs_run += 1;
        }
        Ok(summary)
    }

    async fn guarded<T, Fut>(&self, fut: Fut) -> Result<T, DedupError>
    where
        Fut: std::future::Future<Output = Result<T, gleaner_store::StoreError>>,
    {
        tokio::select! {
            biased;
            _ = self.shutdown.wait() => bail!(DedupError::Cancelled),
            result = fut => result.change_context(DedupError::StoreFailed),
        }
    }
}

/// Lets a scanner run on a fixed delay under
/// [`gleaner_runtime::schedule_with_fixed_delay`].
impl TaskFn for PartitionScanner {
    type Error = error_stack::Report<DedupError>;

    async fn call(&mut self) -> std::result::Result<(), Self::Error> {
        let summary = self.scan().await?;
        log::info!(
            "scan finished: {} jobs run, {} skipped",
            summary.jobs_run,
            summary.skipped,
        );
        Ok(())
    }
}
