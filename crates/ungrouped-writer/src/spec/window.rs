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

//! Windowing metadata carried from the rows of a bundle to the files they produced.

use chrono::{DateTime, TimeDelta, Utc};
use serde_derive::{Deserialize, Serialize};

use crate::{Error, ErrorKind, Result};

/// The window an element was assigned to by the streaming engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BoundedWindow {
    /// The single window covering all of time.
    Global,
    /// A half-open interval `[start, end)`.
    Interval {
        /// Inclusive start of the window.
        start: DateTime<Utc>,
        /// Exclusive end of the window.
        end: DateTime<Utc>,
    },
}

impl BoundedWindow {
    /// Create an interval window, `start` must be before `end`.
    ///
    /// The window must contain at least one millisecond timestamp, so its max timestamp is
    /// not before `start`.
    pub fn interval(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if start >= end {
            return Err(Error::new(
                ErrorKind::DataInvalid,
                format!("Window start {start} is not before window end {end}"),
            ));
        }
        match end.checked_sub_signed(TimeDelta::milliseconds(1)) {
            Some(max) if max >= start => Ok(Self::Interval { start, end }),
            _ => Err(Error::new(
                ErrorKind::DataInvalid,
                format!("Window [{start}, {end}) contains no millisecond timestamp"),
            )),
        }
    }

    /// The largest timestamp that still belongs to this window.
    ///
    /// The global window ends one day before the maximum representable timestamp, so that
    /// timers set at its end can still fire.
    pub fn max_timestamp(&self) -> DateTime<Utc> {
        match self {
            BoundedWindow::Global => DateTime::<Utc>::MAX_UTC - TimeDelta::days(1),
            BoundedWindow::Interval { end, .. } => end
                .checked_sub_signed(TimeDelta::milliseconds(1))
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
        }
    }
}

/// Timing of a pane relative to the watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PaneTiming {
    /// Fired before the watermark passed the end of the window.
    Early,
    /// The first firing after the watermark passed the end of the window.
    OnTime,
    /// Fired after the on-time pane.
    Late,
    /// No timing information, e.g. the pane of a batch pipeline.
    #[default]
    Unknown,
}

/// Describes which firing of a window an element belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PaneInfo {
    /// Index of the firing within the window, starting at 0.
    pub index: u64,
    /// Timing of the firing.
    pub timing: PaneTiming,
    /// Whether this is the first firing of the window.
    pub is_first: bool,
    /// Whether this is the last firing of the window.
    pub is_last: bool,
}

impl PaneInfo {
    /// The pane of an element that was never subject to a trigger.
    pub fn no_firing() -> Self {
        Self {
            index: 0,
            timing: PaneTiming::Unknown,
            is_first: true,
            is_last: true,
        }
    }
}

impl Default for PaneInfo {
    fn default() -> Self {
        Self::no_firing()
    }
}

/// Timestamp, window and pane shared by the rows that went to one destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowContext {
    /// Output timestamp, the max timestamp of the window.
    pub timestamp: DateTime<Utc>,
    /// Window of the rows.
    pub window: BoundedWindow,
    /// Pane of the rows.
    pub pane: PaneInfo,
}

impl WindowContext {
    /// Create the context of rows in `window` and `pane`, stamped with the window's max
    /// timestamp.
    pub fn new(window: BoundedWindow, pane: PaneInfo) -> Self {
        Self {
            timestamp: window.max_timestamp(),
            window,
            pane,
        }
    }

    /// The context of rows of a batch pipeline.
    pub fn global() -> Self {
        Self::new(BoundedWindow::Global, PaneInfo::no_firing())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_interval_max_timestamp() {
        let start = Utc.timestamp_millis_opt(1_000).unwrap();
        let end = Utc.timestamp_millis_opt(61_000).unwrap();
        let window = BoundedWindow::interval(start, end).unwrap();

        assert_eq!(
            window.max_timestamp(),
            Utc.timestamp_millis_opt(60_999).unwrap()
        );

        let context = WindowContext::new(window, PaneInfo::no_firing());
        assert_eq!(context.timestamp, Utc.timestamp_millis_opt(60_999).unwrap());
    }

    #[test]
    fn test_invalid_interval() {
        let t = Utc.timestamp_millis_opt(1_000).unwrap();
        let err = BoundedWindow::interval(t, t).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataInvalid);
    }

    #[test]
    fn test_interval_at_min_timestamp() {
        let min = DateTime::<Utc>::MIN_UTC;
        let err = BoundedWindow::interval(min, min + TimeDelta::nanoseconds(1)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataInvalid);

        let window = BoundedWindow::interval(min, min + TimeDelta::milliseconds(1)).unwrap();
        assert_eq!(window.max_timestamp(), min);

        // built by hand, bypassing validation
        let window = BoundedWindow::Interval {
            start: min,
            end: min + TimeDelta::nanoseconds(1),
        };
        assert_eq!(window.max_timestamp(), min);
        assert_eq!(
            WindowContext::new(window, PaneInfo::no_firing()).timestamp,
            min
        );
    }

    #[test]
    fn test_global_window_ends_before_max() {
        let context = WindowContext::global();
        assert!(context.timestamp < DateTime::<Utc>::MAX_UTC);
        assert_eq!(context.pane, PaneInfo::default());
    }
}
