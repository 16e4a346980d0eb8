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

//! Decoder for Web100 "snaplog" files: a self-describing ASCII header that
//! declares the field layout, followed by fixed-length binary snapshots of
//! TCP instrumentation variables.
//!
//! The layout is declared in-band, so the decoder carries no compiled-in
//! schema; everything it knows about a log comes from the header it just
//! parsed. Values are little-endian on the wire.

mod canon;
pub use canon::CanonicalNames;

mod codec;

mod error;
pub use error::SnaplogError;

mod field;
pub use field::Field;
pub use field::FieldType;
pub use field::FieldValue;

mod header;
pub use header::ConnectionSpec;
pub use header::FieldSet;
pub use header::Header;
pub use header::BEGIN_SNAP_DATA;
pub use header::END_OF_HEADER;

mod sink;
pub use sink::MemorySaver;
pub use sink::SavedValue;
pub use sink::Saver;

mod snaplog;
pub use snaplog::Snaplog;

mod snapshot;
pub use snapshot::Snapshot;

pub type Result<T> = std::result::Result<T, SnaplogError>;
