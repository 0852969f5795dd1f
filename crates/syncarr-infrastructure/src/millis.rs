// SPDX-License-Identifier: GPL-3.0-or-later
//! Timestamps are persisted as milliseconds since the Unix epoch.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};

pub fn to_millis(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

pub fn opt_to_millis(dt: Option<DateTime<Utc>>) -> Option<i64> {
    dt.map(to_millis)
}

pub fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| anyhow!("timestamp out of range: {}", ms))
}

pub fn opt_from_millis(ms: Option<i64>) -> Result<Option<DateTime<Utc>>> {
    ms.map(from_millis).transpose()
}
