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

/// Every way a snaplog can fail to decode. A failure is fatal for the log
/// that produced it and never for the batch around it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SnaplogError {
    #[error("malformed header at byte {pos}: {reason}")]
    Header { pos: usize, reason: String },

    #[error("field {name} declares type tag {tag} outside the snaplog type table")]
    InvalidType { name: String, tag: u32 },

    #[error("field {name} declares size {declared} but its type mandates {expected}")]
    InvalidLength {
        name: String,
        declared: usize,
        expected: usize,
    },

    #[error("field {name} declares offset {declared} but the running layout puts it at {expected}")]
    BadOffset {
        name: String,
        declared: usize,
        expected: usize,
    },

    #[error("snaplog body of {body_len} bytes is not a multiple of the {record_len} byte record")]
    TruncatedTail { body_len: usize, record_len: usize },

    #[error("snapshot {snapshot} does not begin with the snap-data marker")]
    MissingBeginMarker { snapshot: usize },

    #[error("address field {name} carries unknown address-type tag {tag}")]
    InvalidAddressTag { name: String, tag: u8 },

    #[error("snapshot index {index} out of bounds for a log of {count} snapshots")]
    Index { index: usize, count: usize },

    #[error("field {name} is not declared by the read field-set")]
    FieldNotFound { name: String },

    #[error("snaplog contains no snapshots")]
    EmptySnaplog,
}
