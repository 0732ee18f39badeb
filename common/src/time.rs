// SPDX-FileCopyrightText: 2026 Glass Relay Contributors
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use chrono::Duration;

/// A millisecond-precision UTC timestamp, the unit every `createTime` /
/// `updateTime` / TTL field in the data model is expressed in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TimeStamp(DateTime<Utc>);

impl TimeStamp {
    pub fn now() -> Self {
        Self(Utc::now())
    }

    pub fn from_utc(time: DateTime<Utc>) -> Self {
        Self(time)
    }

    pub fn plus(&self, duration: Duration) -> Self {
        Self(self.0 + duration)
    }

    pub fn inner(&self) -> DateTime<Utc> {
        self.0
    }

    /// True once `self + ttl` is in the past, i.e. the thing timestamped has
    /// expired. Used for `QrCodePendingMember` (60s TTL) and `KeyCache`
    /// entries (600s TTL).
    pub fn has_expired(&self, ttl: Duration) -> bool {
        Utc::now() >= self.0 + ttl
    }

    pub fn millis_since_epoch(&self) -> i64 {
        self.0.timestamp_millis()
    }
}

impl From<DateTime<Utc>> for TimeStamp {
    fn from(time: DateTime<Utc>) -> Self {
        Self(time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expires_after_ttl_elapses() {
        let past = TimeStamp::from_utc(Utc::now() - Duration::seconds(61));
        assert!(past.has_expired(Duration::seconds(60)));

        let fresh = TimeStamp::now();
        assert!(!fresh.has_expired(Duration::seconds(60)));
    }
}
