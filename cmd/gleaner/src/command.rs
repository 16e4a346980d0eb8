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

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;
use clap::Parser;
use clap::Subcommand;
use error_stack::ResultExt;
use gleaner_dedup::DedupOptions;
use gleaner_dedup::PartitionScanner;
use gleaner_dedup::ScanConfig;
use gleaner_snaplog::CanonicalNames;
use gleaner_snaplog::Saver;
use gleaner_snaplog::Snaplog;
use gleaner_store::AnalyticStore;
use gleaner_store::BigQueryStore;

use crate::config::Config;
use crate::saver::JsonSaver;
use crate::Error;

#[derive(Debug, Parser)]
#[command(name = "gleaner", version)]
pub struct Command {
    #[command(subcommand)]
    pub cmd: SubCommand,
}

impl Command {
    pub fn run(self) -> error_stack::Result<(), Error> {
        match self.cmd {
            SubCommand::Dedup(cmd) => cmd.run(),
            SubCommand::Parse(cmd) => cmd.run(),
            SubCommand::Generate(cmd) => cmd.run(),
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum SubCommand {
    /// Scan per-day source tables and publish deduplicated partitions.
    #[command()]
    Dedup(CommandDedup),
    /// Decode one snaplog file to JSON lines on stdout.
    #[command()]
    Parse(CommandParse),
    /// Generate command-line interface utilities.
    #[command(name = "gen")]
    Generate(CommandGenerate),
}

#[derive(Debug, Parser)]
pub struct CommandDedup {
    /// Cloud project that owns the datasets and is billed for the jobs.
    #[arg(long)]
    project: String,

    /// Source table family as `<dataset>.<prefix>`, e.g. `batch.ndt`.
    #[arg(long)]
    template_prefix: String,

    /// Partitioned destination as `<dataset>.<table>`, e.g. `base_tables.ndt`.
    #[arg(long)]
    destination_table: String,

    /// Leave sources alone until they have been quiet for this many hours.
    #[arg(long, default_value_t = 48)]
    delay: i64,

    /// Run every safety check, then stop short of moving data.
    #[arg(long)]
    dry_run: bool,

    /// Delete each source table after its partition is published.
    #[arg(long)]
    delete: bool,

    /// Promote existing intermediates without re-running the dedup query.
    #[arg(long)]
    copy_only: bool,

    /// Skip the source-newer-than-destination safety check.
    #[arg(long)]
    ignore_dest_age: bool,

    /// Keep rescanning on this fixed delay (minutes) instead of exiting.
    #[arg(long)]
    interval: Option<u64>,

    /// Configure the tool with the given file; if not specified, the
    /// [default configuration][crate::config::Config::default] is used.
    #[arg(short, long)]
    config_file: Option<PathBuf>,
}

impl CommandDedup {
    pub fn run(self) -> error_stack::Result<(), Error> {
        let config = load_config(self.config_file.as_deref())?;

        gleaner_runtime::init(&config.runtime);
        ctrlc::set_handler(gleaner_runtime::shutdown)
            .change_context_lazy(|| Error("failed to setup ctrl-c signal handle".to_string()))?;

        let (source_dataset, source_prefix) = scope_of(&self.template_prefix)?;
        let (dest_dataset, dest_table) = scope_of(&self.destination_table)?;
        let scan_config = ScanConfig {
            project: self.project.clone(),
            source_dataset,
            source_prefix,
            dest_dataset,
            dest_table,
        };
        let options = DedupOptions {
            min_source_age: TimeDelta::hours(self.delay),
            ignore_dest_age: self.ignore_dest_age,
            dry_run: self.dry_run,
            copy_only: self.copy_only,
            delete_source: self.delete,
            ..DedupOptions::default()
        };

        let rt = gleaner_runtime::make_runtime("gleaner-main", "gleaner-main", 1);
        rt.block_on(async move {
            gleaner_telemetry::init(&config.telemetry);

            let store: Arc<dyn AnalyticStore> =
                Arc::new(BigQueryStore::new(self.project, config.store.endpoint.as_deref())
                    .change_context_lazy(|| {
                        Error("failed to construct the warehouse client".to_string())
                    })?);
            let scanner = PartitionScanner::new(
                store,
                gleaner_runtime::shutdown_latch(),
                scan_config,
                options,
            );

            match self.interval {
                None => {
                    let summary = scanner.scan().await.change_context_lazy(|| {
                        Error("a dedup job failed; the scan was aborted".to_string())
                    })?;
                    log::info!(
                        "scan finished: {} jobs run, {} skipped",
                        summary.jobs_run,
                        summary.skipped,
                    );
                    Ok(())
                }
                Some(minutes) => {
                    let task = gleaner_runtime::schedule_with_fixed_delay(
                        "partition-scan",
                        gleaner_runtime::exec_runtime(),
                        gleaner_runtime::shutdown_latch(),
                        None,
                        Duration::from_secs(minutes * 60),
                        scanner,
                    );
                    if let Err(err) = task.await {
                        log::warn!(err:?; "the scheduled scan was cancelled");
                    }
                    Ok(())
                }
            }
        })
    }
}

#[derive(Debug, Parser)]
pub struct CommandParse {
    /// The snaplog file to decode.
    snaplog: PathBuf,

    /// Variable definition file mapping legacy names to canonical ones.
    #[arg(long)]
    canonical_names: Option<PathBuf>,

    /// Print the full values of one snapshot instead of per-snapshot deltas.
    #[arg(long)]
    snapshot: Option<usize>,

    /// Print the change indices and integer readings of one field.
    #[arg(long)]
    field: Option<String>,
}

impl CommandParse {
    pub fn run(self) -> error_stack::Result<(), Error> {
        let make_error = || Error(format!("failed to decode {}", self.snaplog.display()));

        let data = std::fs::read(&self.snaplog).change_context_lazy(make_error)?;
        let names = match &self.canonical_names {
            Some(path) => {
                let content = std::fs::read_to_string(path).change_context_lazy(make_error)?;
                CanonicalNames::parse(&content)
            }
            None => CanonicalNames::empty(),
        };

        let log = Snaplog::open(data, Arc::new(names)).change_context_lazy(make_error)?;
        log.validate().change_context_lazy(make_error)?;

        if let Some(field) = &self.field {
            let indices = log.change_indices(field).change_context_lazy(make_error)?;
            let values = log
                .slice_int_field(field, &indices)
                .change_context_lazy(make_error)?;
            println!(
                "{}",
                serde_json::json!({ "field": field, "indices": indices, "values": values })
            );
            return Ok(());
        }

        if let Some(index) = self.snapshot {
            let snapshot = log.snapshot(index).change_context_lazy(make_error)?;
            let mut saver = JsonSaver::default();
            snapshot.values(&mut saver).change_context_lazy(make_error)?;
            println!("{}", saver.into_value());
            return Ok(());
        }

        let mut head = JsonSaver::default();
        log.connection_tuple(&mut head);
        head.set_int64("log_time", log.header().log_time as i64);
        head.set_int64("snapshots", log.snapshot_count() as i64);
        println!("{}", head.into_value());

        let mut prev = None;
        for index in 0..log.snapshot_count() {
            let snapshot = log.snapshot(index).change_context_lazy(make_error)?;
            let mut saver = JsonSaver::default();
            snapshot
                .deltas(prev.as_ref(), &mut saver)
                .change_context_lazy(make_error)?;
            if !saver.is_empty() {
                println!("{}", saver.into_value());
            }
            prev = Some(snapshot);
        }
        Ok(())
    }
}

#[derive(Debug, Parser)]
pub struct CommandGenerate {
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    #[command(subcommand)]
    cmd: GenerateTarget,
}

#[derive(Debug, Subcommand)]
pub enum GenerateTarget {
    /// Generate the default tool config.
    #[command()]
    SampleConfig,
}

impl CommandGenerate {
    pub fn run(self) -> error_stack::Result<(), Error> {
        match self.cmd {
            GenerateTarget::SampleConfig => {
                let config = Config::default();
                let content = toml::to_string(&config).change_context_lazy(|| {
                    Error("default config must be always valid".to_string())
                })?;
                if let Some(output) = self.output {
                    std::fs::write(&output, content).change_context_lazy(|| {
                        Error(format!("failed to write config to {}", output.display()))
                    })?;
                } else {
                    println!("{content}");
                }
            }
        }

        Ok(())
    }
}

fn load_config(path: Option<&std::path::Path>) -> error_stack::Result<Config, Error> {
    match path {
        Some(path) => {
            let content = std::fs::read_to_string(path).change_context_lazy(|| {
                Error(format!("failed to read config file: {}", path.display()))
            })?;
            toml::from_str(&content)
                .change_context_lazy(|| Error("failed to parse config content".to_string()))
        }
        None => Ok(Config::default()),
    }
}

/// Split a `<dataset>.<name>` argument.
fn scope_of(spec: &str) -> error_stack::Result<(String, String), Error> {
    match spec.split_once('.') {
        Some((dataset, name)) if !dataset.is_empty() && !name.is_empty() => {
            Ok((dataset.to_string(), name.to_string()))
        }
        _ => error_stack::bail!(Error(format!(
            "expected <dataset>.<name>, found {spec:?}"
        ))),
    }
}
