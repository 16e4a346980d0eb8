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

/// Receives typed key/value pairs recovered from a snapshot. Implementors
/// must tolerate the same name being set twice; the last write wins.
pub trait Saver {
    fn set_int64(&mut self, name: &str, value: i64);
    fn set_string(&mut self, name: &str, value: &str);
    fn set_bool(&mut self, name: &str, value: bool);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SavedValue {
    Int(i64),
    Str(String),
    Bool(bool),
}

/// A [`Saver`] over an ordered map, mostly useful in tests and small tools.
#[derive(Debug, Default)]
pub struct MemorySaver {
    values: BTreeMap<String, SavedValue>,
}

impl MemorySaver {
    pub fn values(&self) -> &BTreeMap<String, SavedValue> {
        &self.values
    }

    pub fn into_values(self) -> BTreeMap<String, SavedValue> {
        self.values
    }

    pub fn get(&self, name: &str) -> Option<&SavedValue> {
        self.values.get(name)
    }
}

impl Saver for MemorySaver {
    fn set_int64(&mut self, name: &str, value: i64) {
        self.values.insert(name.to_string(), SavedValue::Int(value));
    }

    fn set_string(&mut self, name: &str, value: &str) {
        self.values
            .insert(name.to_string(), SavedValue::Str(value.to_string()));
    }

    fn set_bool(&mut self, name: &str, value: bool) {
        self.values
            .insert(name.to_string(), SavedValue::Bool(value));
    }
}
