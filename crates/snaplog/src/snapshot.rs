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

use crate::CanonicalNames;
use crate::FieldValue;
use crate::Header;
use crate::Saver;
use crate::SnaplogError;

/// One fixed-layout record of instrumentation values, borrowed from its
/// containing [`Snaplog`](crate::Snaplog).
#[derive(Debug, Clone, Copy)]
pub struct Snapshot<'a> {
    pub(crate) header: &'a Header,
    pub(crate) names: &'a CanonicalNames,
    /// Record body, marker excluded.
    pub(crate) data: &'a [u8],
}

impl<'a> Snapshot<'a> {
    /// Raw bytes of the whole record body.
    pub fn raw(&self) -> &'a [u8] {
        self.data
    }

    /// Emit every non-deprecated field of the read field-set, in
    /// declaration order, under its canonical name.
    pub fn values(&self, saver: &mut dyn Saver) -> Result<(), SnaplogError> {
        self.deltas(None, saver)
    }

    /// Emit only the fields whose raw bytes differ from `prev`. With no
    /// previous snapshot this is exactly [`Snapshot::values`].
    pub fn deltas(&self, prev: Option<&Snapshot<'_>>, saver: &mut dyn Saver) -> Result<(), SnaplogError> {
        for field in &self.header.read.fields {
            if field.deprecated() {
                continue;
            }
            let raw = field.slice(self.data);
            if let Some(prev) = prev {
                if raw == field.slice(prev.data) {
                    continue;
                }
            }
            let name = self.names.canonical(&field.name);
            match field.interpret(raw)? {
                FieldValue::Int(v) => saver.set_int64(name, v),
                FieldValue::Str(s) => saver.set_string(name, &s),
            }
        }
        Ok(())
    }
}
