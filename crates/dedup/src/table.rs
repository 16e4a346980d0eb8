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

use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;

use crate::DedupError;

/// A date-templated table name: `<prefix>_YYYYMMDD` names a per-day
/// source table, `<prefix>$YYYYMMDD` addresses one partition of a
/// partitioned table. The date must be a valid calendar date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionedName {
    pub prefix: String,
    pub separator: char,
    pub date: NaiveDate,
}

impl PartitionedName {
    pub fn parse(table: &str) -> Result<PartitionedName, DedupError> {
        static RE: OnceLock<Regex> = OnceLock::new();
        let re = RE.get_or_init(|| {
            Regex::new(r"^([A-Za-z0-9_]+)([_$])([0-9]{8})$").expect("static regex must parse")
        });

        let captures = re
            .captures(table)
            .ok_or_else(|| DedupError::InvalidTableName(table.to_string()))?;
        let date = NaiveDate::parse_from_str(&captures[3], "%Y%m%d")
            .map_err(|_| DedupError::InvalidTableName(table.to_string()))?;
        Ok(PartitionedName {
            prefix: captures[1].to_string(),
            separator: captures[2].chars().next().expect("separator is one char"),
            date,
        })
    }

    /// The partition suffix, `YYYYMMDD`.
    pub fn date_str(&self) -> String {
        self.date.format("%Y%m%d").to_string()
    }
}
