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

use async_trait::async_trait;
use chrono::DateTime;
use chrono::TimeZone;
use chrono::Utc;
use error_stack::bail;
use error_stack::Result;
use reqwest::Client;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use url::Url;

use crate::AnalyticStore;
use crate::JobHandle;
use crate::JobState;
use crate::JobStatus;
use crate::PartitionMeta;
use crate::QueryOptions;
use crate::StoreError;
use crate::TableKind;
use crate::TableMeta;
use crate::TableRef;
use crate::WriteDisposition;

pub const DEFAULT_ENDPOINT: &str = "https://bigquery.googleapis.com/bigquery/v2";

/// The adapter does not authenticate by itself; it expects a ready bearer
/// token in this environment variable.
pub const TOKEN_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";

/// A thin REST adapter over the BigQuery v2 API. Jobs are billed to the
/// project given at construction; table reads address the project of the
/// table reference.
#[derive(Debug)]
pub struct BigQueryStore {
    endpoint: String,
    project: String,
    client: Client,
    token: String,
}

impl BigQueryStore {
    pub fn new(project: impl Into<String>, endpoint: Option<&str>) -> Result<Self, StoreError> {
        let endpoint = endpoint.unwrap_or(DEFAULT_ENDPOINT).trim_end_matches('/');
        Url::parse(endpoint)
            .map_err(|err| StoreError::Config(format!("bad endpoint {endpoint:?}: {err}")))?;
        let token = std::env::var(TOKEN_ENV)
            .map_err(|_| StoreError::Config(format!("{TOKEN_ENV} is not set")))?;
        Ok(BigQueryStore {
            endpoint: endpoint.to_string(),
            project: project.into(),
            client: Client::new(),
            token,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, url: String) -> Result<T, StoreError> {
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(StoreError::Http)?;
        decode_response(url, response).await
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        url: String,
        body: &serde_json::Value,
    ) -> Result<T, StoreError> {
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await
            .map_err(StoreError::Http)?;
        decode_response(url, response).await
    }

    fn table_url(&self, table: &TableRef) -> String {
        format!(
            "{}/projects/{}/datasets/{}/tables/{}",
            self.endpoint, table.project, table.dataset, table.table
        )
    }

    /// Run one synchronous legacy-SQL query and return its cell rows.
    async fn sync_query(&self, sql: &str) -> Result<Vec<Vec<serde_json::Value>>, StoreError> {
        let url = format!("{}/projects/{}/queries", self.endpoint, self.project);
        let body = json!({
            "query": sql,
            "useLegacySql": true,
            "timeoutMs": 60_000,
        });
        let results: QueryResultsResponse = self.post_json(url, &body).await?;
        if !results.job_complete.unwrap_or(false) {
            bail!(StoreError::Api {
                status: 200,
                message: "query did not complete within the request deadline".to_string(),
            });
        }
        Ok(results.cells())
    }
}

#[async_trait]
impl AnalyticStore for BigQueryStore {
    async fn list_tables(
        &self,
        project: &str,
        dataset: &str,
        pattern: &str,
    ) -> Result<Vec<TableRef>, StoreError> {
        let base = format!(
            "{}/projects/{project}/datasets/{dataset}/tables?maxResults=1000",
            self.endpoint
        );
        let mut tables = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let url = match &page_token {
                Some(token) => format!("{base}&pageToken={token}"),
                None => base.clone(),
            };
            let page: TableListResponse = self.get_json(url).await?;
            for entry in page.tables {
                let reference = entry.table_reference;
                if reference.table_id.contains(pattern) {
                    tables.push(TableRef::new(
                        reference.project_id,
                        reference.dataset_id,
                        reference.table_id,
                    ));
                }
            }
            page_token = page.next_page_token;
            if page_token.is_none() {
                break;
            }
        }
        Ok(tables)
    }

    async fn table_metadata(&self, table: &TableRef) -> Result<TableMeta, StoreError> {
        let response: TableGetResponse = self.get_json(self.table_url(table)).await?;
        response.into_meta()
    }

    async fn partition_metadata(
        &self,
        table: &TableRef,
        date: &str,
    ) -> Result<Option<PartitionMeta>, StoreError> {
        // The partitions summary is only reachable through legacy SQL.
        let sql = format!(
            "SELECT partition_id, creation_time, last_modified_time \
             FROM [{}:{}.{}$__PARTITIONS_SUMMARY__] \
             WHERE partition_id = '{date}'",
            table.project,
            table.dataset,
            table.base_table(),
        );
        let rows = self.sync_query(&sql).await?;
        let Some(row) = rows.first() else {
            return Ok(None);
        };
        if row.len() != 3 {
            bail!(StoreError::Decode(format!(
                "partition summary row of width {}",
                row.len()
            )));
        }
        Ok(Some(PartitionMeta {
            created: cell_millis(&row[1])?,
            last_modified: cell_millis(&row[2])?,
        }))
    }

    async fn run_query(&self, sql: &str, options: QueryOptions) -> Result<JobHandle, StoreError> {
        let mut query = json!({
            "query": sql,
            "useLegacySql": options.legacy_sql,
        });
        if let Some(destination) = &options.destination {
            query["destinationTable"] = table_reference_json(destination);
            query["allowLargeResults"] = json!(true);
        }
        if let Some(disposition) = options.write_disposition {
            query["writeDisposition"] = json!(disposition_name(disposition));
        }
        let body = json!({ "configuration": { "query": query } });

        log::debug!("issuing query job: {sql}");
        let url = format!("{}/projects/{}/jobs", self.endpoint, self.project);
        let response: JobResponse = self.post_json(url, &body).await?;
        response.into_handle()
    }

    async fn fetch_rows(&self, job: &JobHandle) -> Result<Vec<serde_json::Value>, StoreError> {
        let url = format!(
            "{}/projects/{}/queries/{}",
            self.endpoint, self.project, job.id
        );
        let results: QueryResultsResponse = self.get_json(url).await?;
        if !results.job_complete.unwrap_or(false) {
            bail!(StoreError::Api {
                status: 200,
                message: format!("job {} has not produced its results yet", job.id),
            });
        }
        let names = results.field_names();
        Ok(results
            .cells()
            .into_iter()
            .map(|row| {
                let mut object = serde_json::Map::new();
                for (name, value) in names.iter().zip(row) {
                    object.insert(name.clone(), value);
                }
                serde_json::Value::Object(object)
            })
            .collect())
    }

    async fn copy_partition(
        &self,
        src: &TableRef,
        dst: &TableRef,
        disposition: WriteDisposition,
    ) -> Result<JobHandle, StoreError> {
        let body = json!({
            "configuration": {
                "copy": {
                    "sourceTable": table_reference_json(src),
                    "destinationTable": table_reference_json(dst),
                    "writeDisposition": disposition_name(disposition),
                    "createDisposition": "CREATE_IF_NEEDED",
                }
            }
        });
        log::debug!("issuing copy job: {src} -> {dst}");
        let url = format!("{}/projects/{}/jobs", self.endpoint, self.project);
        let response: JobResponse = self.post_json(url, &body).await?;
        response.into_handle()
    }

    async fn job_status(&self, job: &JobHandle) -> Result<JobStatus, StoreError> {
        let url = format!("{}/projects/{}/jobs/{}", self.endpoint, self.project, job.id);
        let response: JobResponse = self.get_json(url).await?;
        let Some(status) = response.status else {
            bail!(StoreError::Decode(format!("job {} without status", job.id)));
        };
        let state = match status.state.as_str() {
            "PENDING" => JobState::Pending,
            "RUNNING" => JobState::Running,
            "DONE" => JobState::Done,
            other => bail!(StoreError::Decode(format!("unknown job state {other:?}"))),
        };
        Ok(JobStatus {
            state,
            error: status.error_result.map(|e| e.message),
        })
    }

    async fn delete_table(&self, table: &TableRef) -> Result<(), StoreError> {
        let url = self.table_url(table);
        let response = self
            .client
            .delete(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(StoreError::Http)?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            bail!(StoreError::NotFound(table.to_string()));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            bail!(StoreError::Api {
                status: status.as_u16(),
                message,
            });
        }
        Ok(())
    }
}

async fn decode_response<T: DeserializeOwned>(
    url: String,
    response: reqwest::Response,
) -> Result<T, StoreError> {
    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        bail!(StoreError::NotFound(url));
    }
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        bail!(StoreError::Api {
            status: status.as_u16(),
            message,
        });
    }
    Ok(response.json::<T>().await.map_err(StoreError::Http)?)
}

fn disposition_name(disposition: WriteDisposition) -> &'static str {
    match disposition {
        WriteDisposition::Truncate => "WRITE_TRUNCATE",
        WriteDisposition::Append => "WRITE_APPEND",
    }
}

fn table_reference_json(table: &TableRef) -> serde_json::Value {
    json!({
        "projectId": table.project,
        "datasetId": table.dataset,
        "tableId": table.table,
    })
}

fn parse_millis(millis: &str) -> Result<DateTime<Utc>, StoreError> {
    let millis = millis
        .parse::<i64>()
        .map_err(|_| StoreError::Decode(format!("bad millisecond timestamp {millis:?}")))?;
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| StoreError::Decode(format!("millisecond timestamp {millis} out of range")))
        .map_err(error_stack::Report::new)
}

fn cell_millis(cell: &serde_json::Value) -> Result<DateTime<Utc>, StoreError> {
    match cell {
        serde_json::Value::String(s) => parse_millis(s),
        other => bail!(StoreError::Decode(format!("non-string cell {other}"))),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableListResponse {
    #[serde(default)]
    tables: Vec<TableListEntry>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableListEntry {
    table_reference: TableReferenceResponse,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableReferenceResponse {
    project_id: String,
    dataset_id: String,
    table_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableGetResponse {
    #[serde(rename = "type")]
    kind: Option<String>,
    creation_time: String,
    last_modified_time: String,
    #[serde(default)]
    num_rows: Option<String>,
    #[serde(default)]
    num_bytes: Option<String>,
}

impl TableGetResponse {
    fn into_meta(self) -> Result<TableMeta, StoreError> {
        let kind = match self.kind.as_deref() {
            Some("TABLE") | None => TableKind::Table,
            Some("VIEW") | Some("MATERIALIZED_VIEW") => TableKind::View,
            Some(_) => TableKind::External,
        };
        let parse_count = |count: Option<String>| match count {
            Some(count) => count
                .parse::<u64>()
                .map_err(|_| StoreError::Decode(format!("bad row/byte count {count:?}"))),
            None => Ok(0),
        };
        Ok(TableMeta {
            kind,
            created: parse_millis(&self.creation_time)?,
            last_modified: parse_millis(&self.last_modified_time)?,
            num_rows: parse_count(self.num_rows)?,
            num_bytes: parse_count(self.num_bytes)? as i64,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobResponse {
    job_reference: Option<JobReferenceResponse>,
    status: Option<JobStatusResponse>,
}

impl JobResponse {
    fn into_handle(self) -> Result<JobHandle, StoreError> {
        let Some(reference) = self.job_reference else {
            bail!(StoreError::Decode("job without a job reference".to_string()));
        };
        Ok(JobHandle {
            id: reference.job_id,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReferenceResponse {
    job_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobStatusResponse {
    state: String,
    error_result: Option<ErrorProtoResponse>,
}

#[derive(Debug, Deserialize)]
struct ErrorProtoResponse {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResultsResponse {
    job_complete: Option<bool>,
    schema: Option<SchemaResponse>,
    #[serde(default)]
    rows: Vec<RowResponse>,
}

impl QueryResultsResponse {
    fn field_names(&self) -> Vec<String> {
        self.schema
            .as_ref()
            .map(|s| s.fields.iter().map(|f| f.name.clone()).collect())
            .unwrap_or_default()
    }

    fn cells(self) -> Vec<Vec<serde_json::Value>> {
        self.rows
            .into_iter()
            .map(|row| row.f.into_iter().map(|cell| cell.v).collect())
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct SchemaResponse {
    fields: Vec<SchemaFieldResponse>,
}

#[derive(Debug, Deserialize)]
struct SchemaFieldResponse {
    name: String,
}

#[derive(Debug, Deserialize)]
struct RowResponse {
    f: Vec<CellResponse>,
}

#[derive(Debug, Deserialize)]
struct CellResponse {
    v: serde_json::Value,
}
