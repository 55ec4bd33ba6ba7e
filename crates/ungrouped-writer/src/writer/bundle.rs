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

//! This module provides the `BundleWriter`, which writes the rows of a bundle to their
//! destinations through a [`WriterPool`] and reports which rows were written, which were
//! spilled and which files were produced.

use std::mem;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use log::{debug, warn};
use serde_derive::{Deserialize, Serialize};
use uuid::Uuid;

use crate::catalog::TableIdent;
use crate::destination::{DestinationKey, DestinationMetadata, DestinationResolver};
use crate::spec::{BundleWriterProperties, DataFile, WindowContext};
use crate::writer::file_writer::location_generator::DefaultFileNameGenerator;
use crate::writer::pool::{WriteOutcome, WriterPool};
use crate::writer::{DefaultInput, FileWriterFactory, SizedInput};
use crate::{Error, ErrorKind, Result};

/// An input row: the data to write and the metadata naming its destination.
///
/// Both parts are required; a row missing one of them fails the bundle.
#[derive(Debug, Clone, PartialEq)]
pub struct Row<I = DefaultInput> {
    data: Option<I>,
    dest: Option<DestinationMetadata>,
}

impl<I> Row<I> {
    /// Create a row with data and destination metadata.
    pub fn new(data: I, dest: DestinationMetadata) -> Self {
        Self {
            data: Some(data),
            dest: Some(dest),
        }
    }

    /// Create a row from parts that may be missing.
    pub fn from_parts(data: Option<I>, dest: Option<DestinationMetadata>) -> Self {
        Self { data, dest }
    }

    /// The data to write.
    pub fn data(&self) -> Option<&I> {
        self.data.as_ref()
    }

    /// The destination metadata.
    pub fn dest(&self) -> Option<&DestinationMetadata> {
        self.dest.as_ref()
    }
}

/// A row together with the window it was assigned to.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowedRow<I = DefaultInput> {
    /// The row.
    pub row: Row<I>,
    /// Timestamp, window and pane of the row.
    pub context: WindowContext,
}

impl<I> WindowedRow<I> {
    /// Create a new windowed row.
    pub fn new(row: Row<I>, context: WindowContext) -> Self {
        Self { row, context }
    }
}

/// Where a row was routed. The row is handed back unchanged.
#[derive(Debug, Clone, PartialEq)]
pub enum RoutedRow<I = DefaultInput> {
    /// The row was written to a file of its destination.
    Written(WindowedRow<I>),
    /// The row was not written because the writer pool was full. It must be written by a
    /// writer that is not bounded, e.g. after grouping rows by destination.
    Spilled(WindowedRow<I>),
}

/// One file produced by a bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileWriteResult {
    /// Table the file belongs to.
    pub table_ident: TableIdent,
    /// The closed file.
    pub data_file: DataFile,
    /// Timestamp, window and pane of the rows in the file.
    pub context: WindowContext,
}

/// Everything a bundle produced.
#[derive(Debug, Clone, PartialEq)]
pub struct BundleOutput<I = DefaultInput> {
    /// Rows written to files.
    pub written_rows: Vec<WindowedRow<I>>,
    /// Rows that were not written and must be written some other way.
    pub spilled_rows: Vec<WindowedRow<I>>,
    /// Files produced by the bundle.
    pub written_files: Vec<FileWriteResult>,
}

enum BundleState<F, I>
where F: FileWriterFactory<I>
{
    Idle,
    Open(WriterPool<F, I>),
    Failed,
}

/// Writes the rows of a bundle to their destinations without grouping them first.
///
/// Each bundle gets a fresh [`WriterPool`] bounded by
/// [`BundleWriterProperties::max_writers_per_bundle`]. Rows whose destination doesn't fit
/// in the pool are spilled and returned to the caller.
///
/// The lifecycle of a bundle is [`start_bundle`](Self::start_bundle), then
/// [`process_row`](Self::process_row) for every row, then
/// [`finish_bundle`](Self::finish_bundle), or all three at once with
/// [`write_bundle`](Self::write_bundle). Any error while processing a row fails the bundle:
/// the pool is closed before the error is returned and the bundle produces no files.
pub struct BundleWriter<F, R, I = DefaultInput>
where F: FileWriterFactory<I>
{
    factory: Arc<F>,
    resolver: R,
    properties: BundleWriterProperties,
    file_name_generator: DefaultFileNameGenerator,
    state: BundleState<F, I>,
}

impl<F, R, I> BundleWriter<F, R, I>
where
    F: FileWriterFactory<I>,
    R: DestinationResolver,
    I: SizedInput + Send + Sync + 'static,
{
    /// Create a new `BundleWriter`.
    ///
    /// A random file prefix is generated once per writer, so files written by writers
    /// running side by side never collide.
    pub fn new(factory: F, resolver: R, properties: BundleWriterProperties) -> Self {
        let prefix = Uuid::new_v4().to_string();
        Self {
            factory: Arc::new(factory),
            resolver,
            properties,
            file_name_generator: DefaultFileNameGenerator::new(prefix, None),
            state: BundleState::Idle,
        }
    }

    /// The prefix of every file written by this writer.
    pub fn file_prefix(&self) -> &str {
        self.file_name_generator.prefix()
    }

    /// The writer pool of the bundle in progress, if any.
    pub fn pool(&self) -> Option<&WriterPool<F, I>> {
        match &self.state {
            BundleState::Open(pool) => Some(pool),
            _ => None,
        }
    }

    /// Start a new bundle with an empty writer pool.
    pub fn start_bundle(&mut self) -> Result<()> {
        if let BundleState::Open(_) = self.state {
            return Err(Error::new(
                ErrorKind::PreconditionFailed,
                "A bundle is already in progress",
            ));
        }

        self.state = BundleState::Open(WriterPool::new(
            self.factory.clone(),
            self.file_name_generator.clone(),
            self.properties.max_writers_per_bundle,
            self.properties.max_bytes_per_file,
        ));
        Ok(())
    }

    /// Write a row to its destination, or spill it if its destination can't be admitted.
    ///
    /// On error the bundle fails: its pool is closed, and a failure to close is attached to
    /// the returned error as a suppressed error.
    pub async fn process_row(&mut self, row: WindowedRow<I>) -> Result<RoutedRow<I>> {
        let BundleState::Open(pool) = &mut self.state else {
            return Err(Error::new(
                ErrorKind::PreconditionFailed,
                "No bundle in progress",
            ));
        };

        let routed = route(&self.resolver, pool, &row).await;
        match routed {
            Ok(WriteOutcome::Written) => Ok(RoutedRow::Written(row)),
            Ok(WriteOutcome::Spilled) => Ok(RoutedRow::Spilled(row)),
            Err(err) => Err(self.fail(err).await),
        }
    }

    /// Close the writers of the bundle and return one result per file written.
    ///
    /// Finishing a bundle that was never started returns no files. Finishing a failed bundle
    /// is an error, its files must not be committed.
    pub async fn finish_bundle(&mut self) -> Result<Vec<FileWriteResult>> {
        let mut pool = match mem::replace(&mut self.state, BundleState::Idle) {
            BundleState::Idle => return Ok(vec![]),
            BundleState::Failed => {
                self.state = BundleState::Failed;
                return Err(Error::new(
                    ErrorKind::PreconditionFailed,
                    "Can't finish a failed bundle",
                ));
            }
            BundleState::Open(pool) => pool,
        };

        if let Err(err) = pool.close().await {
            warn!("Failed to close writers at the end of the bundle: {err}");
            self.state = BundleState::Failed;
            return Err(err);
        }

        let mut results = vec![];
        for (key, files) in pool.manifest_files()? {
            for data_file in files {
                results.push(FileWriteResult {
                    table_ident: key.destination().table_ident().clone(),
                    data_file,
                    context: *key.context(),
                });
            }
        }

        debug!("Finished bundle with {} written files", results.len());
        Ok(results)
    }

    /// Close the writers of the bundle in progress and discard its files.
    ///
    /// Used when the bundle is cancelled; the writer can start a new bundle afterwards.
    pub async fn abort_bundle(&mut self) -> Result<()> {
        match mem::replace(&mut self.state, BundleState::Idle) {
            BundleState::Open(mut pool) => pool.close().await,
            BundleState::Idle | BundleState::Failed => Ok(()),
        }
    }

    /// Write a whole bundle of rows.
    pub async fn write_bundle<S>(&mut self, rows: S) -> Result<BundleOutput<I>>
    where S: Stream<Item = WindowedRow<I>> {
        self.start_bundle()?;

        let mut output = BundleOutput {
            written_rows: vec![],
            spilled_rows: vec![],
            written_files: vec![],
        };

        futures::pin_mut!(rows);
        while let Some(row) = rows.next().await {
            match self.process_row(row).await? {
                RoutedRow::Written(row) => output.written_rows.push(row),
                RoutedRow::Spilled(row) => output.spilled_rows.push(row),
            }
        }
        output.written_files = self.finish_bundle().await?;

        debug!(
            "Bundle wrote {} rows into {} files and spilled {} rows",
            output.written_rows.len(),
            output.written_files.len(),
            output.spilled_rows.len()
        );
        Ok(output)
    }

    async fn fail(&mut self, err: Error) -> Error {
        warn!("Bundle failed: {err}");
        match mem::replace(&mut self.state, BundleState::Failed) {
            BundleState::Open(mut pool) => match pool.close().await {
                Ok(()) => err,
                Err(close_err) => err.with_suppressed(close_err),
            },
            BundleState::Idle | BundleState::Failed => err,
        }
    }
}

async fn route<F, R, I>(
    resolver: &R,
    pool: &mut WriterPool<F, I>,
    row: &WindowedRow<I>,
) -> Result<WriteOutcome>
where
    F: FileWriterFactory<I>,
    R: DestinationResolver,
    I: SizedInput + Send + Sync + 'static,
{
    let data = row
        .row
        .data()
        .ok_or_else(|| Error::new(ErrorKind::DataInvalid, "Input row missing `data` field."))?;
    let dest = row
        .row
        .dest()
        .ok_or_else(|| Error::new(ErrorKind::DataInvalid, "Input row missing `dest` field."))?;

    let destination = resolver.resolve(dest)?;
    let key = DestinationKey::new(destination, row.context);
    pool.write(&key, data).await
}
