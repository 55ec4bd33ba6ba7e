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

//! Bounded multi-destination data file writer for Apache Iceberg tables.
//!
//! Rows are routed to a destination table derived from their metadata and written without
//! grouping them first. The number of files open at the same time is bounded: rows whose
//! destination can't be admitted are spilled back to the caller, who writes them some other
//! way. See [`writer::bundle::BundleWriter`] for the entry point.

#![deny(missing_docs)]

mod error;
pub use error::{Error, ErrorKind, Result};

pub mod catalog;
pub mod destination;
pub mod spec;
pub mod writer;
