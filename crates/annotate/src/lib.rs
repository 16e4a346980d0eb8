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

//! Bounded buffering in front of the annotation side-service. Producer
//! threads append rows to a [`RowBuffer`]; when the buffer fills it is
//! atomically swapped for a fresh one and the full batch goes through a
//! serialized single-writer commit path. Batches reach the sink in the
//! order they were swapped out; nothing is ever dropped.

use std::net::IpAddr;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use error_stack::bail;
use error_stack::Result;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AnnotateError {
    #[error("row buffer is full; flush or take the backpressure path")]
    BufferFull,
    #[error("failed to commit a row batch")]
    CommitFailed,
    #[error("row type exposes no annotation subject")]
    NotAnnotatable,
}

/// A non-consuming rejection: the row comes back to the producer, so a
/// failed append can never lose data.
#[derive(Debug)]
pub enum TryAppendError<R> {
    Full(R),
    NotAnnotatable(R),
}

impl<R> TryAppendError<R> {
    pub fn into_row(self) -> R {
        match self {
            TryAppendError::Full(row) => row,
            TryAppendError::NotAnnotatable(row) => row,
        }
    }

    pub fn error(&self) -> AnnotateError {
        match self {
            TryAppendError::Full(_) => AnnotateError::BufferFull,
            TryAppendError::NotAnnotatable(_) => AnnotateError::NotAnnotatable,
        }
    }
}

/// What the annotation service needs to know about one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnnotationSubject {
    pub ip: IpAddr,
    pub collected: DateTime<Utc>,
}

/// Rows that can be annotated. A row without a subject lacks the
/// capability set the side-service requires.
pub trait Annotatable {
    fn annotation_subject(&self) -> Option<AnnotationSubject>;
}

/// The serialized commit target for full batches.
#[async_trait]
pub trait BatchSink<R>: Send + Sync {
    async fn commit(&self, batch: Vec<R>) -> Result<(), AnnotateError>;
}

/// A bounded buffer guarded by a single mutex. Appends are cheap; the
/// swap on fill happens inside the same lock, so producers on other
/// threads never observe a half-drained buffer.
#[derive(Debug)]
pub struct RowBuffer<R> {
    capacity: usize,
    rows: Mutex<Vec<R>>,
}

impl<R> RowBuffer<R> {
    pub fn new(capacity: usize) -> RowBuffer<R> {
        assert!(capacity > 0, "a zero-capacity buffer cannot make progress");
        RowBuffer {
            capacity,
            rows: Mutex::new(Vec::with_capacity(capacity)),
        }
    }

    /// Append unconditionally. Reaching capacity swaps the buffer and
    /// returns the full batch; the caller owns committing it.
    pub fn append(&self, row: R) -> Option<Vec<R>> {
        let mut rows = self.rows.lock().unwrap();
        rows.push(row);
        if rows.len() >= self.capacity {
            let batch = std::mem::replace(&mut *rows, Vec::with_capacity(self.capacity));
            Some(batch)
        } else {
            None
        }
    }

    /// Append only if there is room, never swapping. At capacity the row
    /// comes back to the caller.
    pub fn try_append(&self, row: R) -> std::result::Result<(), R> {
        let mut rows = self.rows.lock().unwrap();
        if rows.len() >= self.capacity {
            return Err(row);
        }
        rows.push(row);
        Ok(())
    }

    /// Swap out whatever is buffered, full or not.
    pub fn take(&self) -> Vec<R> {
        let mut rows = self.rows.lock().unwrap();
        std::mem::take(&mut *rows)
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Buffer plus commit path. `append` is the backpressure path: when the
/// buffer fills, the producer waits its turn on the writer gate. The
/// gate is a fair queue, so whole batches reach the sink in swap order.
pub struct Annotator<R, S> {
    buffer: RowBuffer<R>,
    sink: S,
    gate: tokio::sync::Mutex<()>,
}

impl<R, S> Annotator<R, S>
where
    R: Annotatable + Send,
    S: BatchSink<R>,
{
    pub fn new(capacity: usize, sink: S) -> Annotator<R, S> {
        Annotator {
            buffer: RowBuffer::new(capacity),
            sink,
            gate: tokio::sync::Mutex::new(()),
        }
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Append one row, committing the swapped-out batch when the buffer
    /// fills. The producer is blocked for the duration of its own commit.
    pub async fn append(&self, row: R) -> Result<(), AnnotateError> {
        if row.annotation_subject().is_none() {
            bail!(AnnotateError::NotAnnotatable);
        }
        if let Some(batch) = self.buffer.append(row) {
            self.commit(batch).await?;
        }
        Ok(())
    }

    /// Append without waiting. The row is handed back when it has no
    /// subject or when the buffer is full and only a commit would make
    /// room.
    pub fn try_append(&self, row: R) -> std::result::Result<(), TryAppendError<R>> {
        if row.annotation_subject().is_none() {
            return Err(TryAppendError::NotAnnotatable(row));
        }
        self.buffer.try_append(row).map_err(TryAppendError::Full)
    }

    /// Commit whatever is buffered, full or not.
    pub async fn flush(&self) -> Result<(), AnnotateError> {
        let batch = self.buffer.take();
        if batch.is_empty() {
            return Ok(());
        }
        self.commit(batch).await
    }

    async fn commit(&self, batch: Vec<R>) -> Result<(), AnnotateError> {
        let _writer = self.gate.lock().await;
        log::debug!("committing a batch of {} rows", batch.len());
        self.sink.commit(batch).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::TimeZone;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Row {
        id: u32,
        subject: bool,
    }

    impl Annotatable for Row {
        fn annotation_subject(&self) -> Option<AnnotationSubject> {
            self.subject.then(|| AnnotationSubject {
                ip: "203.0.113.7".parse().unwrap(),
                collected: Utc.timestamp_opt(1_474_320_000, 0).unwrap(),
            })
        }
    }

    fn row(id: u32) -> Row {
        Row { id, subject: true }
    }

    #[derive(Debug, Default)]
    struct RecordingSink {
        batches: Mutex<Vec<Vec<Row>>>,
        fail: bool,
    }

    #[async_trait]
    impl BatchSink<Row> for Arc<RecordingSink> {
        async fn commit(&self, batch: Vec<Row>) -> Result<(), AnnotateError> {
            if self.fail {
                bail!(AnnotateError::CommitFailed);
            }
            self.batches.lock().unwrap().push(batch);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_swap_on_fill_hands_over_whole_batches() {
        let sink = Arc::new(RecordingSink::default());
        let annotator = Annotator::new(3, sink.clone());

        for id in 0..7 {
            annotator.append(row(id)).await.unwrap();
        }
        assert_eq!(annotator.buffered(), 1);

        let batches = sink.batches.lock().unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0], vec![row(0), row(1), row(2)]);
        assert_eq!(batches[1], vec![row(3), row(4), row(5)]);
    }

    #[tokio::test]
    async fn test_flush_commits_a_partial_batch() {
        let sink = Arc::new(RecordingSink::default());
        let annotator = Annotator::new(10, sink.clone());

        annotator.append(row(1)).await.unwrap();
        annotator.append(row(2)).await.unwrap();
        annotator.flush().await.unwrap();
        annotator.flush().await.unwrap(); // empty flush is a no-op

        let batches = sink.batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0], vec![row(1), row(2)]);
        assert_eq!(annotator.buffered(), 0);
    }

    #[tokio::test]
    async fn test_rows_without_subject_are_rejected() {
        let sink = Arc::new(RecordingSink::default());
        let annotator = Annotator::new(2, sink.clone());

        let bare = Row {
            id: 9,
            subject: false,
        };
        let err = annotator.append(bare.clone()).await.unwrap_err();
        assert_eq!(*err.current_context(), AnnotateError::NotAnnotatable);

        match annotator.try_append(bare).unwrap_err() {
            TryAppendError::NotAnnotatable(returned) => assert_eq!(returned.id, 9),
            other => panic!("unexpected rejection: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_try_append_backpressures_at_capacity() {
        let sink = Arc::new(RecordingSink::default());
        let annotator = Annotator::new(2, sink.clone());

        annotator.try_append(row(1)).unwrap();
        annotator.try_append(row(2)).unwrap();
        let rejected = annotator.try_append(row(3)).unwrap_err();
        assert_eq!(rejected.error(), AnnotateError::BufferFull);
        assert_eq!(rejected.into_row(), row(3));

        // the backpressure path makes room again
        annotator.flush().await.unwrap();
        annotator.try_append(row(3)).unwrap();
        assert_eq!(annotator.buffered(), 1);
    }

    #[tokio::test]
    async fn test_commit_failure_surfaces() {
        let sink = Arc::new(RecordingSink {
            fail: true,
            ..RecordingSink::default()
        });
        let annotator = Annotator::new(1, sink.clone());
        let err = annotator.append(row(1)).await.unwrap_err();
        assert_eq!(*err.current_context(), AnnotateError::CommitFailed);
    }

    #[tokio::test]
    async fn test_concurrent_producers_lose_nothing() {
        let sink = Arc::new(RecordingSink::default());
        let annotator = Arc::new(Annotator::new(5, sink.clone()));

        let mut handles = Vec::new();
        for producer in 0..4u32 {
            let annotator = annotator.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..25u32 {
                    annotator.append(row(producer * 100 + i)).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        annotator.flush().await.unwrap();

        let committed: usize = sink.batches.lock().unwrap().iter().map(Vec::len).sum();
        assert_eq!(committed, 100);
    }
}
