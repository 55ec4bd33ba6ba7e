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

//! Writer module.
//!
//! This module contains the writer traits and the bounded writer pool built on top of them.
//! We categorize the writers into two layers:
//! 1. FileWriter: writer of one physical file (Such as parquet) for one destination.
//! 2. WriterPool / BundleWriter: writers that route rows to many destinations at once, bounding
//!    how many file writers are open at the same time.
//!
//! The pool uses a [`FileWriterFactory`] to open file writers, so any physical format or
//! storage can be plugged in. A parquet implementation is provided in [`file_writer`].
//!
//! # Example
//! ```rust, no_run
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! use arrow_array::{Int32Array, RecordBatch};
//! use arrow_schema::{DataType, Field, Schema};
//! use iceberg_ungrouped_writer::destination::TemplateResolver;
//! use iceberg_ungrouped_writer::spec::{BundleWriterProperties, DataFileFormat, WindowContext};
//! use iceberg_ungrouped_writer::writer::bundle::{BundleWriter, Row, WindowedRow};
//! use iceberg_ungrouped_writer::writer::file_writer::ParquetWriterFactory;
//! use iceberg_ungrouped_writer::writer::file_writer::location_generator::DefaultLocationGenerator;
//! use iceberg_ungrouped_writer::Result;
//! use parquet::file::properties::WriterProperties;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let schema = Arc::new(Schema::new(vec![Field::new("id", DataType::Int32, false)]));
//!     let factory = ParquetWriterFactory::new(
//!         WriterProperties::default(),
//!         schema.clone(),
//!         DefaultLocationGenerator::new("/tmp/warehouse"),
//!     );
//!     let resolver = TemplateResolver::new("db.events_{region}", DataFileFormat::Parquet)?;
//!     let mut writer = BundleWriter::new(factory, resolver, BundleWriterProperties::default());
//!
//!     let batch = RecordBatch::try_new(schema, vec![Arc::new(Int32Array::from(vec![1]))])?;
//!     let row = Row::new(batch, HashMap::from([("region".to_string(), "eu".to_string())]));
//!     let output = writer
//!         .write_bundle(futures::stream::iter(vec![WindowedRow::new(
//!             row,
//!             WindowContext::global(),
//!         )]))
//!         .await?;
//!
//!     // Spilled rows must be written by a writer that groups rows by destination first.
//!     assert!(output.spilled_rows.is_empty());
//!     Ok(())
//! }
//! ```

pub mod bundle;
pub mod file_writer;
pub mod pool;

use arrow_array::RecordBatch;
use bytes::Bytes;

use crate::Result;
use crate::destination::Destination;
use crate::spec::DataFile;

type DefaultInput = RecordBatch;

/// Creates the file writers of a writer pool.
///
/// This is the capability a catalog offers to the pool: given a destination, open a new file
/// for it.
#[async_trait::async_trait]
pub trait FileWriterFactory<I = DefaultInput>: Send + Sync + 'static {
    /// The associated file writer type.
    type W: FileWriter<I>;
    /// Open a new file named `file_name` for `destination`.
    async fn open_writer(&self, destination: &Destination, file_name: String) -> Result<Self::W>;
}

/// File writer of a single file of a single destination.
#[async_trait::async_trait]
pub trait FileWriter<I = DefaultInput>: Send + 'static {
    /// Write a record to the file.
    async fn write(&mut self, input: &I) -> Result<()>;
    /// Close the file and return its descriptor.
    ///
    /// # NOTE
    /// The writer is consumed whether or not closing succeeds, so it is never closed twice.
    async fn close(self) -> Result<DataFile>;
}

/// Estimates how many bytes an input adds to a file.
///
/// The estimate is used to decide when a file is rolled over, it doesn't need to match the
/// encoded size on storage.
pub trait SizedInput {
    /// Estimated size in bytes.
    fn estimated_size(&self) -> u64;
}

impl SizedInput for RecordBatch {
    fn estimated_size(&self) -> u64 {
        // The in-memory arrow size, not the encoded parquet size.
        self.get_array_memory_size() as u64
    }
}

impl SizedInput for Bytes {
    fn estimated_size(&self) -> u64 {
        self.len() as u64
    }
}

impl SizedInput for Vec<u8> {
    fn estimated_size(&self) -> u64 {
        self.len() as u64
    }
}

impl SizedInput for String {
    fn estimated_size(&self) -> u64 {
        self.len() as u64
    }
}

#[cfg(test)]
pub(crate) mod tests {
    //! Scripted in-memory file writers shared by the pool and bundle writer tests.

    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};

    use bytes::Bytes;

    use super::{FileWriter, FileWriterFactory};
    use crate::destination::Destination;
    use crate::spec::{DataFile, DataFileFormat};
    use crate::{Error, ErrorKind, Result};

    /// What happened to the mock writers, in order.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) enum Event {
        Open(String),
        Write(String, Bytes),
        Close(String),
    }

    /// Failures injected into the writers of one table, by table name.
    #[derive(Default)]
    pub(crate) struct Failures {
        pub(crate) open: HashSet<String>,
        pub(crate) write: HashSet<String>,
        pub(crate) close: HashSet<String>,
    }

    #[derive(Clone, Default)]
    pub(crate) struct MockWriterFactory {
        pub(crate) events: Arc<Mutex<Vec<Event>>>,
        pub(crate) failures: Arc<Mutex<Failures>>,
    }

    impl MockWriterFactory {
        pub(crate) fn events(&self) -> Vec<Event> {
            self.events.lock().unwrap().clone()
        }

        pub(crate) fn fail_open(&self, table: &str) {
            self.failures.lock().unwrap().open.insert(table.to_string());
        }

        pub(crate) fn fail_write(&self, table: &str) {
            self.failures.lock().unwrap().write.insert(table.to_string());
        }

        pub(crate) fn fail_close(&self, table: &str) {
            self.failures.lock().unwrap().close.insert(table.to_string());
        }

        /// Number of open and close events.
        pub(crate) fn open_and_close_counts(&self) -> (usize, usize) {
            let events = self.events();
            let opens = events
                .iter()
                .filter(|e| matches!(e, Event::Open(_)))
                .count();
            let closes = events
                .iter()
                .filter(|e| matches!(e, Event::Close(_)))
                .count();
            (opens, closes)
        }
    }

    pub(crate) struct MockFileWriter {
        table: String,
        file_name: String,
        records: u64,
        bytes: u64,
        events: Arc<Mutex<Vec<Event>>>,
        failures: Arc<Mutex<Failures>>,
    }

    #[async_trait::async_trait]
    impl FileWriterFactory<Bytes> for MockWriterFactory {
        type W = MockFileWriter;

        async fn open_writer(
            &self,
            destination: &Destination,
            file_name: String,
        ) -> Result<Self::W> {
            let table = destination.table_ident().name().to_string();
            if self.failures.lock().unwrap().open.contains(&table) {
                return Err(Error::new(ErrorKind::Unexpected, "injected open failure"));
            }
            self.events
                .lock()
                .unwrap()
                .push(Event::Open(file_name.clone()));
            Ok(MockFileWriter {
                table,
                file_name,
                records: 0,
                bytes: 0,
                events: self.events.clone(),
                failures: self.failures.clone(),
            })
        }
    }

    #[async_trait::async_trait]
    impl FileWriter<Bytes> for MockFileWriter {
        async fn write(&mut self, input: &Bytes) -> Result<()> {
            if self.failures.lock().unwrap().write.contains(&self.table) {
                return Err(Error::new(ErrorKind::Unexpected, "injected write failure"));
            }
            self.records += 1;
            self.bytes += input.len() as u64;
            self.events
                .lock()
                .unwrap()
                .push(Event::Write(self.file_name.clone(), input.clone()));
            Ok(())
        }

        async fn close(self) -> Result<DataFile> {
            self.events
                .lock()
                .unwrap()
                .push(Event::Close(self.file_name.clone()));
            if self.failures.lock().unwrap().close.contains(&self.table) {
                return Err(Error::new(ErrorKind::Unexpected, "injected close failure")
                    .with_context("file", self.file_name));
            }
            Ok(DataFile::builder()
                .file_path(format!("memory://{}/{}", self.table, self.file_name))
                .file_format(DataFileFormat::Parquet)
                .record_count(self.records)
                .file_size_in_bytes(self.bytes)
                .build())
        }
    }
}
