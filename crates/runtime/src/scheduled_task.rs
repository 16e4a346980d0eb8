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

use std::fmt::Debug;
use std::fmt::Display;
use std::fmt::Formatter;
use std::future::Future;
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use mea::latch::Latch;

use crate::CanceledError;
use crate::JoinHandle;
use crate::Runtime;

#[derive(Debug)]
pub struct ScheduledTask<T> {
    name: String,
    task: JoinHandle<T>,
}

impl<T> ScheduledTask<T> {
    pub fn cancel(&self) {
        log::info!("cancelling scheduled task: {}", self.name);
        self.task.cancel();
    }
}

impl<T> IntoFuture for ScheduledTask<T> {
    type Output = Result<T, CanceledError>;
    type IntoFuture = JoinHandle<T>;

    fn into_future(self) -> Self::IntoFuture {
        self.task
    }
}

impl<T> Display for ScheduledTask<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ScheduledTask({})", self.name)
    }
}

pub trait TaskFn<T = ()> {
    type Error: Debug + Send + 'static;

    fn call(&mut self) -> impl Future<Output = Result<T, Self::Error>> + Send;
}

/// Run `task_fn` forever with a fixed delay between completions, until the
/// given shutdown latch is released or the task is cancelled.
pub fn schedule_with_fixed_delay<F>(
    name: impl Into<String>,
    runtime: &Runtime,
    shutdown: Arc<Latch>,
    initial_delay: Option<Duration>,
    delay: Duration,
    mut task_fn: F,
) -> ScheduledTask<()>
where
    F: TaskFn<()> + Send + 'static,
{
    let name = name.into();
    let name_clone = name.clone();

    let task = runtime.spawn(async move {
        if let Some(initial_delay) = initial_delay {
            if initial_delay > Duration::ZERO {
                tokio::select! {
                    _ = shutdown.wait() => return,
                    _ = tokio::time::sleep(initial_delay) => {}
                }
            }
        }

        loop {
            tokio::select! {
                _ = shutdown.wait() => {
                    log::info!("stopping scheduled task on shutdown: {name_clone}");
                    return;
                }
                result = task_fn.call() => {
                    if let Err(err) = result {
                        log::error!(err:?; "failed to run scheduled task: {name_clone}");
                    }
                }
            }

            tokio::select! {
                _ = shutdown.wait() => {
                    log::info!("stopping scheduled task on shutdown: {name_clone}");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    });

    ScheduledTask { name, task }
}
