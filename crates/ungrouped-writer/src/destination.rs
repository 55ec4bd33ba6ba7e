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

//! Destinations rows are written to, and how they are derived from row metadata.

use std::collections::HashMap;
use std::fmt::Display;

use serde_derive::{Deserialize, Serialize};

use crate::catalog::TableIdent;
use crate::spec::{DataFileFormat, WindowContext};
use crate::{Error, ErrorKind, Result};

/// Metadata attached to every row naming where it should be written.
pub type DestinationMetadata = HashMap<String, String>;

/// A logical output target: one table, written in one file format.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Destination {
    table_ident: TableIdent,
    file_format: DataFileFormat,
}

impl Destination {
    /// Create a new destination.
    pub fn new(table_ident: TableIdent, file_format: DataFileFormat) -> Self {
        Self {
            table_ident,
            file_format,
        }
    }

    /// Identifier of the table.
    pub fn table_ident(&self) -> &TableIdent {
        &self.table_ident
    }

    /// Format of the files written for this destination.
    pub fn file_format(&self) -> DataFileFormat {
        self.file_format
    }
}

impl Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.table_ident, self.file_format)
    }
}

/// The key a writer pool admits writers by.
///
/// Rows of the same destination that fall in different windows or panes get different
/// keys, so every produced file can be attributed to exactly one window.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DestinationKey {
    destination: Destination,
    context: WindowContext,
}

impl DestinationKey {
    /// Create a new destination key.
    pub fn new(destination: Destination, context: WindowContext) -> Self {
        Self {
            destination,
            context,
        }
    }

    /// The destination.
    pub fn destination(&self) -> &Destination {
        &self.destination
    }

    /// Window context of the rows written under this key.
    pub fn context(&self) -> &WindowContext {
        &self.context
    }
}

impl Display for DestinationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} @ {}", self.destination, self.context.timestamp)
    }
}

/// Derives a destination from row metadata.
///
/// Resolution must be deterministic: rows with equal metadata must resolve to equal
/// destinations, otherwise they are routed to different writers.
pub trait DestinationResolver: Send + Sync {
    /// Resolve the destination of a row.
    fn resolve(&self, metadata: &DestinationMetadata) -> Result<Destination>;
}

impl<F> DestinationResolver for F
where F: Fn(&DestinationMetadata) -> Result<Destination> + Send + Sync
{
    fn resolve(&self, metadata: &DestinationMetadata) -> Result<Destination> {
        self(metadata)
    }
}

/// Sends every row to the same destination, ignoring its metadata.
#[derive(Debug, Clone)]
pub struct SingleTableResolver {
    destination: Destination,
}

impl SingleTableResolver {
    /// Create a resolver for a single destination.
    pub fn new(destination: Destination) -> Self {
        Self { destination }
    }
}

impl DestinationResolver for SingleTableResolver {
    fn resolve(&self, _metadata: &DestinationMetadata) -> Result<Destination> {
        Ok(self.destination.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(String),
}

/// Builds the table identifier from a template whose `{field}` placeholders are
/// replaced by the values of the row metadata.
///
/// E.g. the template `db.events_{region}` sends a row with metadata `region = eu` to the
/// table `db.events_eu`.
#[derive(Debug, Clone)]
pub struct TemplateResolver {
    template: String,
    segments: Vec<Segment>,
    file_format: DataFileFormat,
}

impl TemplateResolver {
    /// Parse `template` into a resolver writing files in `file_format`.
    pub fn new(template: impl Into<String>, file_format: DataFileFormat) -> Result<Self> {
        let template = template.into();
        let mut segments = Vec::new();
        let mut rest = template.as_str();

        while let Some(open) = rest.find(['{', '}']) {
            if rest[open..].starts_with('}') {
                return Err(unbalanced(&template));
            }
            if open > 0 {
                segments.push(Segment::Literal(rest[..open].to_string()));
            }
            let after = &rest[open + 1..];
            let close = after.find('}').ok_or_else(|| unbalanced(&template))?;
            let field = &after[..close];
            if field.is_empty() || field.contains('{') {
                return Err(unbalanced(&template));
            }
            segments.push(Segment::Field(field.to_string()));
            rest = &after[close + 1..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        Ok(Self {
            template,
            segments,
            file_format,
        })
    }

    /// Names of the metadata fields the template refers to.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Field(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }
}

fn unbalanced(template: &str) -> Error {
    Error::new(
        ErrorKind::DataInvalid,
        format!("Unbalanced or empty placeholder in table identifier template: {template}"),
    )
}

impl DestinationResolver for TemplateResolver {
    fn resolve(&self, metadata: &DestinationMetadata) -> Result<Destination> {
        let mut identifier = String::with_capacity(self.template.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(s) => identifier.push_str(s),
                Segment::Field(name) => {
                    let value = metadata.get(name).ok_or_else(|| {
                        Error::new(
                            ErrorKind::DataInvalid,
                            format!("Destination metadata is missing field `{name}`"),
                        )
                        .with_context("template", self.template.clone())
                    })?;
                    identifier.push_str(value);
                }
            }
        }

        let table_ident = identifier
            .parse::<TableIdent>()
            .map_err(|e| e.with_context("template", self.template.clone()))?;
        Ok(Destination::new(table_ident, self.file_format))
    }
}
