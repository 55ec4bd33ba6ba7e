// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! This module provides the `WriterPool`, which writes to many destinations at once while
//! bounding the number of open file writers.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use log::{debug, warn};

use crate::destination::{Destination, DestinationKey};
use crate::spec::DataFile;
use crate::writer::file_writer::location_generator::{
    DefaultFileNameGenerator, FileNameGenerator,
};
use crate::writer::{DefaultInput, FileWriter, FileWriterFactory, SizedInput};
use crate::{Error, ErrorKind, Result};

/// Outcome of writing a record to a [`WriterPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The record was written to the writer of its destination.
    Written,
    /// The pool was saturated and the record was not written. The caller owns the record
    /// and must write it some other way.
    Spilled,
}

/// The open writer of one destination and the files it already rolled over.
pub struct WriterSlot<W> {
    writer: Option<W>,
    bytes_written: u64,
    closed_files: Vec<DataFile>,
}

impl<W> WriterSlot<W> {
    fn new(writer: W) -> Self {
        Self {
            writer: Some(writer),
            bytes_written: 0,
            closed_files: vec![],
        }
    }

    /// Bytes written to the current file.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Files closed so far, in the order they were written.
    pub fn closed_files(&self) -> &[DataFile] {
        &self.closed_files
    }

    /// Whether a file is currently open.
    pub fn is_open(&self) -> bool {
        self.writer.is_some()
    }

    /// A file that already holds data rolls over when the next record would push it past
    /// `file_size_limit`. An empty file never rolls, so an oversized record gets a file of
    /// its own.
    fn should_roll(&self, input_size: u64, file_size_limit: u64) -> bool {
        self.writer.is_some()
            && self.bytes_written > 0
            && self.bytes_written + input_size > file_size_limit
    }

    /// Close the current file, if any. The writer is gone afterwards even if closing fails.
    async fn close_writer<I>(&mut self) -> Result<()>
    where W: FileWriter<I> {
        self.bytes_written = 0;
        if let Some(writer) = self.writer.take() {
            self.closed_files.push(writer.close().await?);
        }
        Ok(())
    }
}

/// A writer that can write records of many destinations in the same bundle.
///
/// At most `capacity` destinations are admitted, first come first served. A record of a
/// destination that is not admitted once the pool is full is spilled: it is not written and
/// handed back to the caller through [`WriteOutcome::Spilled`]. Admitted destinations stay
/// admitted until the pool is closed, and roll over to a new file once their current file
/// reaches `file_size_limit` bytes.
///
/// The pool lives for one bundle: [`WriterPool::close`] it at the end of the bundle, then
/// take its output with [`WriterPool::manifest_files`].
///
/// # Type Parameters
///
/// * `F` - The factory opening file writers
/// * `I` - Input type (defaults to `RecordBatch`)
/// * `N` - Names the files opened by the pool
pub struct WriterPool<F, I = DefaultInput, N = DefaultFileNameGenerator>
where
    F: FileWriterFactory<I>,
    N: FileNameGenerator,
{
    factory: Arc<F>,
    file_name_generator: N,
    slots: HashMap<DestinationKey, WriterSlot<F::W>>,
    capacity: usize,
    file_size_limit: u64,
    spilled_records: u64,
    closed: bool,
    _phantom: PhantomData<I>,
}

async fn open_writer<F, I, N>(
    factory: &F,
    file_name_generator: &N,
    destination: &Destination,
) -> Result<F::W>
where
    F: FileWriterFactory<I>,
    N: FileNameGenerator,
{
    let file_name = file_name_generator.generate_file_name(destination.file_format());
    factory.open_writer(destination, file_name).await
}

impl<F, I, N> WriterPool<F, I, N>
where
    F: FileWriterFactory<I>,
    I: SizedInput + Send + Sync + 'static,
    N: FileNameGenerator,
{
    /// Create a new `WriterPool`.
    ///
    /// Files are named by `file_name_generator`. Pools of consecutive bundles should share a
    /// generator so names never repeat.
    pub fn new(
        factory: Arc<F>,
        file_name_generator: N,
        capacity: usize,
        file_size_limit: u64,
    ) -> Self {
        Self {
            factory,
            file_name_generator,
            slots: HashMap::new(),
            capacity,
            file_size_limit,
            spilled_records: 0,
            closed: false,
            _phantom: PhantomData,
        }
    }

    /// Write `input` to the writer of `key`, admitting the destination if there is room.
    ///
    /// Returns [`WriteOutcome::Spilled`] without touching any writer when `key` has no writer
    /// and the pool is full. An error leaves the pool as it is; the caller is expected to
    /// [`close`](Self::close) it.
    pub async fn write(&mut self, key: &DestinationKey, input: &I) -> Result<WriteOutcome> {
        if self.closed {
            return Err(Error::new(
                ErrorKind::PreconditionFailed,
                "Writer pool is already closed",
            )
            .with_context("destination", key.to_string()));
        }

        let input_size = input.estimated_size();

        if !self.slots.contains_key(key) {
            if self.slots.len() >= self.capacity {
                if self.spilled_records == 0 {
                    warn!(
                        "Writer pool is saturated with {} writers, spilling records of new destinations starting with {key}",
                        self.capacity
                    );
                }
                self.spilled_records += 1;
                return Ok(WriteOutcome::Spilled);
            }

            let writer = open_writer::<F, I, N>(
                self.factory.as_ref(),
                &self.file_name_generator,
                key.destination(),
            )
            .await?;
            self.slots.insert(key.clone(), WriterSlot::new(writer));
            debug!(
                "Admitted {key}, {}/{} writers open",
                self.slots.len(),
                self.capacity
            );
        }

        let Some(slot) = self.slots.get_mut(key) else {
            return Err(Error::new(
                ErrorKind::Unexpected,
                "Failed to get writer slot after admission",
            ));
        };

        if slot.should_roll(input_size, self.file_size_limit) {
            debug!(
                "Rolling over file of {key} after {} bytes",
                slot.bytes_written
            );
            slot.close_writer::<I>().await?;
        }

        if !slot.is_open() {
            slot.writer = Some(
                open_writer::<F, I, N>(
                    self.factory.as_ref(),
                    &self.file_name_generator,
                    key.destination(),
                )
                .await?,
            );
        }

        let Some(writer) = slot.writer.as_mut() else {
            return Err(Error::new(
                ErrorKind::Unexpected,
                "Writer is not initialized!",
            ));
        };
        writer.write(input).await?;
        slot.bytes_written += input_size;

        Ok(WriteOutcome::Written)
    }

    /// Close every open writer.
    ///
    /// Every writer is closed even if closing one of them fails. The first failure is
    /// returned once all writers were attempted, later ones are attached to it as suppressed
    /// errors. Closing a pool twice is an error.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::new(
                ErrorKind::PreconditionFailed,
                "Writer pool is already closed",
            ));
        }
        self.closed = true;

        let mut first_error: Option<Error> = None;
        for (key, slot) in self.slots.iter_mut() {
            if let Err(err) = slot.close_writer::<I>().await {
                warn!("Failed to close writer of {key}: {err}");
                first_error = Some(match first_error {
                    None => err,
                    Some(first) => first.with_suppressed(err),
                });
            }
        }

        debug!(
            "Closed writer pool with {} destinations and {} spilled records",
            self.slots.len(),
            self.spilled_records
        );

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Take the files written per destination, in the order they were written.
    ///
    /// Only valid once the pool is closed.
    pub fn manifest_files(self) -> Result<HashMap<DestinationKey, Vec<DataFile>>> {
        if !self.closed {
            return Err(Error::new(
                ErrorKind::PreconditionFailed,
                "Manifest files are only available after the writer pool is closed",
            ));
        }

        Ok(self
            .slots
            .into_iter()
            .map(|(key, slot)| (key, slot.closed_files))
            .collect())
    }

    /// The slot of `key`, if the destination was admitted.
    pub fn slot(&self, key: &DestinationKey) -> Option<&WriterSlot<F::W>> {
        self.slots.get(key)
    }

    /// Number of admitted destinations.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no destination was admitted yet.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of writers currently open.
    pub fn num_open_writers(&self) -> usize {
        self.slots.values().filter(|slot| slot.is_open()).count()
    }

    /// Maximum number of admitted destinations.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of records spilled so far.
    pub fn spilled_records(&self) -> u64 {
        self.spilled_records
    }

    /// Whether the pool was closed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use bytes::Bytes;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::catalog::TableIdent;
    use crate::spec::{DataFileFormat, PaneInfo, WindowContext};
    use crate::writer::tests::{Event, MockWriterFactory};

    fn key(table: &str) -> DestinationKey {
        DestinationKey::new(
            Destination::new(
                TableIdent::from_strs(["db", table]).unwrap(),
                DataFileFormat::Parquet,
            ),
            WindowContext::global(),
        )
    }

    fn record(tag: &str, size: usize) -> Bytes {
        let mut bytes = tag.as_bytes().to_vec();
        bytes.resize(size, b'.');
        Bytes::from(bytes)
    }

    fn pool(
        factory: &MockWriterFactory,
        capacity: usize,
        file_size_limit: u64,
    ) -> WriterPool<MockWriterFactory, Bytes> {
        WriterPool::new(
            Arc::new(factory.clone()),
            DefaultFileNameGenerator::new("test".to_string(), None),
            capacity,
            file_size_limit,
        )
    }

    #[tokio::test]
    async fn test_admission_spills_new_destinations_when_full() -> Result<()> {
        let factory = MockWriterFactory::default();
        let mut pool = pool(&factory, 2, 1024);

        let outcomes = vec![
            pool.write(&key("a"), &record("a1", 10)).await?,
            pool.write(&key("b"), &record("b1", 10)).await?,
            pool.write(&key("c"), &record("c1", 10)).await?,
            pool.write(&key("a"), &record("a2", 10)).await?,
        ];
        assert_eq!(outcomes, vec![
            WriteOutcome::Written,
            WriteOutcome::Written,
            WriteOutcome::Spilled,
            WriteOutcome::Written,
        ]);
        assert!(pool.slot(&key("c")).is_none());
        assert_eq!(pool.spilled_records(), 1);

        pool.close().await?;
        let manifest = pool.manifest_files()?;
        assert_eq!(manifest.len(), 2);
        assert_eq!(manifest[&key("a")].len(), 1);
        assert_eq!(manifest[&key("a")][0].record_count(), 2);
        assert_eq!(manifest[&key("b")][0].record_count(), 1);
        assert!(!manifest.contains_key(&key("c")));

        // nothing was opened for the spilled destination
        assert_eq!(factory.open_and_close_counts(), (2, 2));
        Ok(())
    }

    #[tokio::test]
    async fn test_admitted_set_is_fixed_once_saturated() -> Result<()> {
        let factory = MockWriterFactory::default();
        let mut pool = pool(&factory, 3, 1024);

        let order = ["a", "b", "a", "c", "d", "b", "e", "d", "c", "e", "a"];
        let mut written = vec![];
        let mut spilled = vec![];
        for (i, table) in order.iter().enumerate() {
            match pool.write(&key(table), &record(table, 8)).await? {
                WriteOutcome::Written => written.push(*table),
                WriteOutcome::Spilled => spilled.push(*table),
            }
            assert!(pool.num_open_writers() <= pool.capacity(), "after record {i}");
        }

        // the first three distinct destinations win, every record of the others spills
        assert_eq!(written, vec!["a", "b", "a", "c", "b", "c", "a"]);
        assert_eq!(spilled, vec!["d", "e", "d", "e"]);
        assert_eq!(written.len() + spilled.len(), order.len());
        Ok(())
    }

    #[tokio::test]
    async fn test_no_spill_within_capacity() -> Result<()> {
        let factory = MockWriterFactory::default();
        let mut pool = pool(&factory, 3, 1024);

        for i in 0..30 {
            let table = ["a", "b", "c"][i % 3];
            assert_eq!(
                pool.write(&key(table), &record(table, 16)).await?,
                WriteOutcome::Written
            );
        }
        assert_eq!(pool.spilled_records(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_roll_over_before_exceeding_file_size() -> Result<()> {
        let factory = MockWriterFactory::default();
        let mut pool = pool(&factory, 2, 100);

        let (r1, r2, r3) = (record("r1", 40), record("r2", 40), record("r3", 40));
        pool.write(&key("a"), &r1).await?;
        pool.write(&key("a"), &r2).await?;
        assert_eq!(pool.slot(&key("a")).unwrap().bytes_written(), 80);
        assert!(pool.slot(&key("a")).unwrap().closed_files().is_empty());

        pool.write(&key("a"), &r3).await?;
        let slot = pool.slot(&key("a")).unwrap();
        assert_eq!(slot.bytes_written(), 40);
        assert_eq!(slot.closed_files().len(), 1);

        pool.close().await?;
        let files = pool.manifest_files()?.remove(&key("a")).unwrap();
        assert_eq!(
            files.iter().map(|f| f.record_count()).collect::<Vec<_>>(),
            vec![2, 1]
        );
        assert_eq!(
            files.iter().map(|f| f.file_size_in_bytes()).collect::<Vec<_>>(),
            vec![80, 40]
        );

        let f0 = "test-00000.parquet".to_string();
        let f1 = "test-00001.parquet".to_string();
        assert_eq!(factory.events(), vec![
            Event::Open(f0.clone()),
            Event::Write(f0.clone(), r1),
            Event::Write(f0.clone(), r2),
            Event::Close(f0),
            Event::Open(f1.clone()),
            Event::Write(f1.clone(), r3),
            Event::Close(f1),
        ]);
        Ok(())
    }

    #[tokio::test]
    async fn test_oversized_record_gets_its_own_file() -> Result<()> {
        let factory = MockWriterFactory::default();
        let mut pool = pool(&factory, 1, 10);

        pool.write(&key("a"), &record("big1", 40)).await?;
        assert!(pool.slot(&key("a")).unwrap().closed_files().is_empty());
        pool.write(&key("a"), &record("big2", 40)).await?;
        pool.write(&key("a"), &record("big3", 40)).await?;

        pool.close().await?;
        let files = pool.manifest_files()?.remove(&key("a")).unwrap();
        assert_eq!(files.len(), 3);
        assert!(files.iter().all(|f| f.record_count() == 1));
        Ok(())
    }

    #[tokio::test]
    async fn test_windows_are_distinct_destinations() -> Result<()> {
        let factory = MockWriterFactory::default();
        let mut pool = pool(&factory, 2, 1024);

        let early = PaneInfo {
            index: 1,
            is_first: false,
            ..PaneInfo::no_firing()
        };
        let other_pane = DestinationKey::new(
            key("a").destination().clone(),
            WindowContext::new(key("a").context().window, early),
        );

        pool.write(&key("a"), &record("a1", 8)).await?;
        pool.write(&other_pane, &record("a2", 8)).await?;
        assert_eq!(pool.len(), 2);
        assert_eq!(
            pool.write(&key("b"), &record("b1", 8)).await?,
            WriteOutcome::Spilled
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_lifecycle_errors() -> Result<()> {
        let factory = MockWriterFactory::default();

        let mut open_pool = pool(&factory, 2, 1024);
        open_pool.write(&key("a"), &record("a1", 8)).await?;
        let err = open_pool.manifest_files().err().unwrap();
        assert_eq!(err.kind(), ErrorKind::PreconditionFailed);

        let mut pool = pool(&factory, 2, 1024);
        pool.write(&key("a"), &record("a1", 8)).await?;

        pool.close().await?;
        assert!(pool.is_closed());
        assert_eq!(pool.num_open_writers(), 0);

        let err = pool.write(&key("a"), &record("a2", 8)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PreconditionFailed);
        let err = pool.close().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PreconditionFailed);
        Ok(())
    }

    #[tokio::test]
    async fn test_close_attempts_every_writer() -> Result<()> {
        let factory = MockWriterFactory::default();
        let mut pool = pool(&factory, 3, 1024);
        for table in ["a", "b", "c"] {
            pool.write(&key(table), &record(table, 8)).await?;
        }
        factory.fail_close("a");
        factory.fail_close("c");

        let err = pool.close().await.unwrap_err();
        assert_eq!(err.message(), "injected close failure");
        assert_eq!(err.suppressed().len(), 1);
        assert_eq!(err.suppressed()[0].message(), "injected close failure");

        // every writer was closed exactly once, failures included
        assert_eq!(factory.open_and_close_counts(), (3, 3));
        assert_eq!(pool.num_open_writers(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_open_failure_admits_nothing() -> Result<()> {
        let factory = MockWriterFactory::default();
        factory.fail_open("a");
        let mut pool = pool(&factory, 1, 1024);

        let err = pool.write(&key("a"), &record("a1", 8)).await.unwrap_err();
        assert_eq!(err.message(), "injected open failure");
        assert!(pool.is_empty());

        // the slot is still free for another destination
        assert_eq!(
            pool.write(&key("b"), &record("b1", 8)).await?,
            WriteOutcome::Written
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_open_failure_on_roll_over() -> Result<()> {
        let factory = MockWriterFactory::default();
        let mut pool = pool(&factory, 1, 10);
        pool.write(&key("a"), &record("a1", 8)).await?;
        factory.fail_open("a");

        // the full file is closed, then opening its successor fails
        let err = pool.write(&key("a"), &record("a2", 8)).await.unwrap_err();
        assert_eq!(err.message(), "injected open failure");
        assert_eq!(pool.num_open_writers(), 0);
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.slot(&key("a")).unwrap().closed_files().len(), 1);

        pool.close().await?;
        assert_eq!(factory.open_and_close_counts(), (1, 1));
        let files = pool.manifest_files()?;
        assert_eq!(files[&key("a")].len(), 1);
        assert_eq!(files[&key("a")][0].record_count(), 1);
        Ok(())
    }

    #[derive(Clone, Default)]
    struct SequentialFileNames(Arc<AtomicU64>);

    impl FileNameGenerator for SequentialFileNames {
        fn generate_file_name(&self, format: DataFileFormat) -> String {
            format!("part-{}.{format}", self.0.fetch_add(1, Ordering::Relaxed))
        }
    }

    #[tokio::test]
    async fn test_custom_file_name_generator() -> Result<()> {
        let factory = MockWriterFactory::default();
        let names = SequentialFileNames::default();
        let mut pool: WriterPool<MockWriterFactory, Bytes, SequentialFileNames> =
            WriterPool::new(Arc::new(factory.clone()), names.clone(), 2, 10);

        pool.write(&key("a"), &record("a1", 8)).await?;
        pool.write(&key("a"), &record("a2", 8)).await?;
        pool.write(&key("b"), &record("b1", 8)).await?;
        pool.close().await?;

        let opened = factory
            .events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Open(file) => Some(file),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(opened, vec![
            "part-0.parquet",
            "part-1.parquet",
            "part-2.parquet"
        ]);

        // the next bundle's pool continues the sequence
        let mut pool: WriterPool<MockWriterFactory, Bytes, SequentialFileNames> =
            WriterPool::new(Arc::new(factory.clone()), names, 1, 10);
        pool.write(&key("a"), &record("a3", 8)).await?;
        assert_eq!(
            factory.events().last(),
            Some(&Event::Write(
                "part-3.parquet".to_string(),
                record("a3", 8)
            ))
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_write_failure_leaves_writer_for_close() -> Result<()> {
        let factory = MockWriterFactory::default();
        let mut pool = pool(&factory, 2, 1024);
        pool.write(&key("a"), &record("a1", 8)).await?;
        factory.fail_write("a");

        let err = pool.write(&key("a"), &record("a2", 8)).await.unwrap_err();
        assert_eq!(err.message(), "injected write failure");
        assert_eq!(pool.num_open_writers(), 1);
        assert!(!pool.is_closed());

        pool.close().await?;
        assert_eq!(factory.open_and_close_counts(), (1, 1));
        Ok(())
    }
}
