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

//! This module contains the location generator and file name generator for generating path of data file.

use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use crate::catalog::TableIdent;
use crate::spec::DataFileFormat;

/// `LocationGenerator` used to generate the location of data file.
pub trait LocationGenerator: Clone + Send + Sync + 'static {
    /// Generate an absolute path for the given file name of a table.
    /// e.g
    /// For file name "part-00000.parquet" of table `db.t`, the generated location maybe
    /// "/warehouse/db/t/data/part-00000.parquet"
    fn generate_location(&self, table_ident: &TableIdent, file_name: &str) -> String;
}

const DEFAULT_DATA_DIR: &str = "data";

#[derive(Clone, Debug)]
/// `DefaultLocationGenerator` used to generate the data dir location of data file.
/// The location is `{warehouse}/{namespace levels...}/{table}/data/{file name}`.
pub struct DefaultLocationGenerator {
    warehouse: String,
}

impl DefaultLocationGenerator {
    /// Create a new `DefaultLocationGenerator` rooted at `warehouse`.
    pub fn new(warehouse: impl Into<String>) -> Self {
        let warehouse: String = warehouse.into();
        Self {
            warehouse: warehouse.trim_end_matches('/').to_string(),
        }
    }
}

impl LocationGenerator for DefaultLocationGenerator {
    fn generate_location(&self, table_ident: &TableIdent, file_name: &str) -> String {
        format!(
            "{}/{}/{}/{}/{}",
            self.warehouse,
            table_ident.namespace().join("/"),
            table_ident.name(),
            DEFAULT_DATA_DIR,
            file_name
        )
    }
}

/// `FileNameGenerator` used to generate file name for data file. The file name can be passed to `LocationGenerator` to generate the location of the file.
pub trait FileNameGenerator: Clone + Send + 'static {
    /// Generate a file name for a file of the given format.
    fn generate_file_name(&self, format: DataFileFormat) -> String;
}

/// `DefaultFileNameGenerator` used to generate file name for data file.
///
/// The file name format is "{prefix}-{file_count}[-{suffix}].{file_format}".
///
/// Clones share the file counter, so generators handed to successive writer pools never
/// repeat a name.
#[derive(Clone, Debug)]
pub struct DefaultFileNameGenerator {
    prefix: String,
    suffix: String,
    file_count: Arc<AtomicU64>,
}

impl DefaultFileNameGenerator {
    /// Create a new `FileNameGenerator`.
    pub fn new(prefix: String, suffix: Option<String>) -> Self {
        let suffix = if let Some(suffix) = suffix {
            format!("-{suffix}")
        } else {
            "".to_string()
        };

        Self {
            prefix,
            suffix,
            file_count: Arc::new(AtomicU64::new(0)),
        }
    }

    /// The prefix of every generated name.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

impl FileNameGenerator for DefaultFileNameGenerator {
    fn generate_file_name(&self, format: DataFileFormat) -> String {
        let file_id = self
            .file_count
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        format!("{}-{:05}{}.{}", self.prefix, file_id, self.suffix, format)
    }
}
