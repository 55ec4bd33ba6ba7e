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

//! The module contains the file writer for parquet file format.

use std::path::{Path, PathBuf};

use arrow_array::RecordBatch;
use arrow_schema::SchemaRef as ArrowSchemaRef;
use parquet::arrow::AsyncArrowWriter;
use parquet::file::properties::WriterProperties;

use super::location_generator::{DefaultLocationGenerator, LocationGenerator};
use crate::destination::Destination;
use crate::spec::{DataFile, DataFileFormat};
use crate::writer::{FileWriter, FileWriterFactory};
use crate::{Error, ErrorKind, Result};

const LOCAL_FS_SCHEME: &str = "file://";

/// ParquetWriterFactory is used to open a [`ParquetFileWriter`] per destination file.
#[derive(Clone)]
pub struct ParquetWriterFactory<L: LocationGenerator = DefaultLocationGenerator> {
    props: WriterProperties,
    schema: ArrowSchemaRef,
    location_generator: L,
}

impl<L: LocationGenerator> ParquetWriterFactory<L> {
    /// Create a new `ParquetWriterFactory`.
    ///
    /// Every destination shares the same arrow `schema`.
    pub fn new(props: WriterProperties, schema: ArrowSchemaRef, location_generator: L) -> Self {
        Self {
            props,
            schema,
            location_generator,
        }
    }
}

fn local_path(location: &str) -> Result<PathBuf> {
    if let Some(path) = location.strip_prefix(LOCAL_FS_SCHEME) {
        return Ok(PathBuf::from(path));
    }
    if location.contains("://") {
        return Err(Error::new(
            ErrorKind::FeatureUnsupported,
            "Parquet writer only supports the local file system",
        )
        .with_context("location", location));
    }
    Ok(PathBuf::from(location))
}

#[async_trait::async_trait]
impl<L: LocationGenerator> FileWriterFactory<RecordBatch> for ParquetWriterFactory<L> {
    type W = ParquetFileWriter;

    async fn open_writer(&self, destination: &Destination, file_name: String) -> Result<Self::W> {
        if destination.file_format() != DataFileFormat::Parquet {
            return Err(Error::new(
                ErrorKind::FeatureUnsupported,
                format!(
                    "Parquet writer can't write {} files",
                    destination.file_format()
                ),
            )
            .with_context("destination", destination.to_string()));
        }

        let location = self
            .location_generator
            .generate_location(destination.table_ident(), &file_name);
        let path = local_path(&location)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::File::create(&path).await?;
        let writer = AsyncArrowWriter::try_new(file, self.schema.clone(), Some(self.props.clone()))
            .map_err(|err| {
                Error::new(ErrorKind::Unexpected, "Failed to build parquet writer.")
                    .with_context("location", location.clone())
                    .with_source(err)
            })?;

        Ok(ParquetFileWriter {
            location,
            path,
            schema: self.schema.clone(),
            writer,
            current_row_num: 0,
        })
    }
}

/// `ParquetFileWriter` is used to write arrow data into a parquet file on the local file system.
pub struct ParquetFileWriter {
    location: String,
    path: PathBuf,
    schema: ArrowSchemaRef,
    writer: AsyncArrowWriter<tokio::fs::File>,
    current_row_num: usize,
}

impl ParquetFileWriter {
    /// Location of the file being written.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Local path of the file being written.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of rows written so far.
    pub fn current_row_num(&self) -> usize {
        self.current_row_num
    }
}

#[async_trait::async_trait]
impl FileWriter<RecordBatch> for ParquetFileWriter {
    async fn write(&mut self, batch: &RecordBatch) -> Result<()> {
        // The arrow writer only notices a foreign schema when the file is closed.
        if batch.schema().as_ref() != self.schema.as_ref() {
            return Err(Error::new(
                ErrorKind::DataInvalid,
                "Record batch schema doesn't match the schema of the parquet file.",
            )
            .with_context("location", self.location.clone())
            .with_context("expected", self.schema.to_string())
            .with_context("actual", batch.schema().to_string()));
        }

        self.writer.write(batch).await.map_err(|err| {
            Error::new(ErrorKind::Unexpected, "Failed to write using parquet writer.")
                .with_context("location", self.location.clone())
                .with_source(err)
        })?;
        self.current_row_num += batch.num_rows();
        Ok(())
    }

    async fn close(self) -> Result<DataFile> {
        self.writer.close().await.map_err(|err| {
            Error::new(ErrorKind::Unexpected, "Failed to close parquet writer.")
                .with_context("location", self.location.clone())
                .with_source(err)
        })?;
        let file_size = tokio::fs::metadata(&self.path).await?.len();

        Ok(DataFile::builder()
            .file_path(self.location)
            .file_format(DataFileFormat::Parquet)
            .record_count(self.current_row_num as u64)
            .file_size_in_bytes(file_size)
            .build())
    }
}
