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

use std::sync::Arc;
use std::sync::OnceLock;

use mea::latch::Latch;

static SHUTDOWN: OnceLock<Arc<Latch>> = OnceLock::new();

fn fetch_shutdown_latch() -> &'static Arc<Latch> {
    SHUTDOWN.get_or_init(|| Arc::new(Latch::new(1)))
}

/// Request a process-wide shutdown. Every task awaiting [`shutdown_latch`]
/// observes the request at its next suspension point. Safe to call more
/// than once.
pub fn shutdown() {
    log::info!("shutdown requested");
    fetch_shutdown_latch().count_down();
}

/// The latch released once [`shutdown`] has been requested. Long-running
/// operations select on `latch.wait()` to observe cancellation.
pub fn shutdown_latch() -> Arc<Latch> {
    fetch_shutdown_latch().clone()
}
