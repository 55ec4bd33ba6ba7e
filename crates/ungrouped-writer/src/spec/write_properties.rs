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

use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;

use crate::error::{Error, ErrorKind, Result};

// Helper function to parse a property from a HashMap
// If the property is not found, use the default value
fn parse_property<T: FromStr>(
    properties: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T>
where
    <T as FromStr>::Err: Display,
{
    properties.get(key).map_or(Ok(default), |value| {
        value.parse::<T>().map_err(|e| {
            Error::new(
                ErrorKind::DataInvalid,
                format!("Invalid value for {key}: {e}"),
            )
        })
    })
}

/// Properties that bound the resources a bundle writer may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BundleWriterProperties {
    /// Maximum number of writers open at the same time within one bundle. Rows for
    /// destinations beyond this limit are spilled.
    pub max_writers_per_bundle: usize,
    /// Size in bytes after which a destination's file is rolled over to a new one.
    pub max_bytes_per_file: u64,
}

impl BundleWriterProperties {
    /// Property key for the maximum number of writers per bundle.
    pub const PROPERTY_MAX_WRITERS_PER_BUNDLE: &str = "write.bundle.max-writers";
    /// Default maximum number of writers per bundle.
    pub const PROPERTY_MAX_WRITERS_PER_BUNDLE_DEFAULT: usize = 20;

    /// Target file size for newly written files.
    pub const PROPERTY_WRITE_TARGET_FILE_SIZE_BYTES: &str = "write.target-file-size-bytes";
    /// Default target file size
    pub const PROPERTY_WRITE_TARGET_FILE_SIZE_BYTES_DEFAULT: u64 = 1 << 29; // 512 MB
}

impl Default for BundleWriterProperties {
    fn default() -> Self {
        Self {
            max_writers_per_bundle: Self::PROPERTY_MAX_WRITERS_PER_BUNDLE_DEFAULT,
            max_bytes_per_file: Self::PROPERTY_WRITE_TARGET_FILE_SIZE_BYTES_DEFAULT,
        }
    }
}

impl TryFrom<&HashMap<String, String>> for BundleWriterProperties {
    // parse by entry key or use default value
    type Error = Error;

    fn try_from(props: &HashMap<String, String>) -> Result<Self> {
        let properties = BundleWriterProperties {
            max_writers_per_bundle: parse_property(
                props,
                BundleWriterProperties::PROPERTY_MAX_WRITERS_PER_BUNDLE,
                BundleWriterProperties::PROPERTY_MAX_WRITERS_PER_BUNDLE_DEFAULT,
            )?,
            max_bytes_per_file: parse_property(
                props,
                BundleWriterProperties::PROPERTY_WRITE_TARGET_FILE_SIZE_BYTES,
                BundleWriterProperties::PROPERTY_WRITE_TARGET_FILE_SIZE_BYTES_DEFAULT,
            )?,
        };

        crate::ensure_data_valid!(
            properties.max_writers_per_bundle > 0,
            "{} must be positive",
            BundleWriterProperties::PROPERTY_MAX_WRITERS_PER_BUNDLE
        );
        crate::ensure_data_valid!(
            properties.max_bytes_per_file > 0,
            "{} must be positive",
            BundleWriterProperties::PROPERTY_WRITE_TARGET_FILE_SIZE_BYTES
        );

        Ok(properties)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_bundle_writer_properties_default() {
        let props = HashMap::new();
        let properties = BundleWriterProperties::try_from(&props).unwrap();
        assert_eq!(properties, BundleWriterProperties::default());
        assert_eq!(properties.max_writers_per_bundle, 20);
        assert_eq!(properties.max_bytes_per_file, 536_870_912);
    }

    #[test]
    fn test_bundle_writer_properties_valid() {
        let props = HashMap::from([
            (
                BundleWriterProperties::PROPERTY_MAX_WRITERS_PER_BUNDLE.to_string(),
                "2".to_string(),
            ),
            (
                BundleWriterProperties::PROPERTY_WRITE_TARGET_FILE_SIZE_BYTES.to_string(),
                "100".to_string(),
            ),
            ("write.unrelated".to_string(), "ignored".to_string()),
        ]);
        let properties = BundleWriterProperties::try_from(&props).unwrap();
        assert_eq!(properties.max_writers_per_bundle, 2);
        assert_eq!(properties.max_bytes_per_file, 100);
    }

    #[test]
    fn test_bundle_writer_properties_invalid() {
        let invalid_writers = HashMap::from([(
            BundleWriterProperties::PROPERTY_MAX_WRITERS_PER_BUNDLE.to_string(),
            "abc".to_string(),
        )]);
        let err = BundleWriterProperties::try_from(&invalid_writers).unwrap_err();
        assert!(
            err.to_string()
                .contains("Invalid value for write.bundle.max-writers: invalid digit found in string")
        );

        let zero_size = HashMap::from([(
            BundleWriterProperties::PROPERTY_WRITE_TARGET_FILE_SIZE_BYTES.to_string(),
            "0".to_string(),
        )]);
        let err = BundleWriterProperties::try_from(&zero_size).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataInvalid);
        assert_eq!(err.message(), "write.target-file-size-bytes must be positive");
    }
}
