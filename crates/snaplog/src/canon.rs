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

use std::collections::HashMap;

/// The legacy-to-canonical variable name table, loaded once from the
/// authoritative definition file (the "tcp-kis" format) and read-only
/// afterwards; share it behind an `Arc`.
///
/// The definition file is line oriented. Within a block, the value of a
/// `VariableName:` line is the canonical spelling, and every whitespace-
/// separated value of a following `RenameFrom:` line is a legacy spelling
/// for it. All other lines are ignored.
#[derive(Debug, Default)]
pub struct CanonicalNames {
    renames: HashMap<String, String>,
}

impl CanonicalNames {
    /// An empty table: every name is already canonical.
    pub fn empty() -> CanonicalNames {
        CanonicalNames::default()
    }

    pub fn parse(content: &str) -> CanonicalNames {
        let mut renames = HashMap::new();
        let mut current: Option<&str> = None;
        for line in content.lines() {
            if let Some(name) = line.strip_prefix("VariableName:") {
                current = Some(name.trim());
            } else if let Some(legacy_names) = line.strip_prefix("RenameFrom:") {
                if let Some(canonical) = current {
                    for legacy in legacy_names.split_whitespace() {
                        renames.insert(legacy.to_string(), canonical.to_string());
                    }
                }
            }
        }
        CanonicalNames { renames }
    }

    /// The canonical spelling of `name`, which is `name` itself when no
    /// rename is recorded.
    pub fn canonical<'a>(&'a self, name: &'a str) -> &'a str {
        match self.renames.get(name) {
            Some(canonical) => canonical.as_str(),
            None => name,
        }
    }

    pub fn len(&self) -> usize {
        self.renames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.renames.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFINITIONS: &str = r"
--------------------------------------------------------------------------------
VariableName:	StartTimeStamp
Description:	The time at which the connection was initiated.
RenameFrom:	StartTime StartTimeSec
Units:		microseconds

VariableName:	PktsOut
RenameFrom:	DataPktsOut
SNMPType:	Counter32
";

    #[test]
    fn test_parse_rename_blocks() {
        let names = CanonicalNames::parse(DEFINITIONS);
        assert_eq!(names.len(), 3);
        assert_eq!(names.canonical("StartTime"), "StartTimeStamp");
        assert_eq!(names.canonical("StartTimeSec"), "StartTimeStamp");
        assert_eq!(names.canonical("DataPktsOut"), "PktsOut");
    }

    #[test]
    fn test_unknown_names_pass_through() {
        let names = CanonicalNames::parse(DEFINITIONS);
        assert_eq!(names.canonical("CurMSS"), "CurMSS");
        assert_eq!(CanonicalNames::empty().canonical("X"), "X");
    }

    #[test]
    fn test_canonicalization_is_idempotent() {
        let names = CanonicalNames::parse(DEFINITIONS);
        for legacy in ["StartTime", "StartTimeSec", "DataPktsOut", "CurMSS"] {
            let once = names.canonical(legacy);
            assert_eq!(names.canonical(once), once);
        }
    }

    #[test]
    fn test_rename_without_variable_is_ignored() {
        let names = CanonicalNames::parse("RenameFrom: Orphan\n");
        assert!(names.is_empty());
    }
}
