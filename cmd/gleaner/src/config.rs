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

use gleaner_protos::config::LogConfig;
use gleaner_protos::config::RuntimeOptions;
use gleaner_protos::config::StderrAppenderConfig;
use gleaner_protos::config::StoreConfig;
use gleaner_protos::config::TelemetryConfig;
use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub store: StoreConfig,
    pub telemetry: TelemetryConfig,
    pub runtime: RuntimeOptions,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            store: StoreConfig::default(),
            telemetry: TelemetryConfig {
                log: LogConfig {
                    stderr: Some(StderrAppenderConfig {
                        filter: "INFO".to_string(),
                    }),
                },
            },
            runtime: RuntimeOptions::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_round_trips_through_toml() {
        let config = Config::default();
        let content = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&content).unwrap();
        assert_eq!(parsed.telemetry, config.telemetry);
        assert_eq!(parsed.runtime, config.runtime);
        assert_eq!(parsed.store, config.store);
    }
}
