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

use gleaner_snaplog::Saver;
use serde_json::Map;
use serde_json::Value;

/// Collects snapshot values into one JSON object for line output.
#[derive(Debug, Default)]
pub struct JsonSaver {
    values: Map<String, Value>,
}

impl JsonSaver {
    pub fn into_value(self) -> Value {
        Value::Object(self.values)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Saver for JsonSaver {
    fn set_int64(&mut self, name: &str, value: i64) {
        self.values.insert(name.to_string(), Value::from(value));
    }

    fn set_string(&mut self, name: &str, value: &str) {
        self.values.insert(name.to_string(), Value::from(value));
    }

    fn set_bool(&mut self, name: &str, value: bool) {
        self.values.insert(name.to_string(), Value::from(value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collects_typed_values() {
        let mut saver = JsonSaver::default();
        saver.set_int64("CurMSS", 1460);
        saver.set_string("LocalAddress", "10.0.0.1");
        saver.set_bool("TimestampsEnabled", true);
        assert_eq!(
            saver.into_value(),
            serde_json::json!({
                "CurMSS": 1460,
                "LocalAddress": "10.0.0.1",
                "TimestampsEnabled": true,
            })
        );
    }
}
