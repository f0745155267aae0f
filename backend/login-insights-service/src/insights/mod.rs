//! Per-locale login insights
//!
//! `AggregationStore` keeps one `LocaleInsight` per locale and updates its
//! counters incrementally as events arrive:
//! - device type counts
//! - app version counts
//! - hourly login frequency
//!
//! Every map iterates in first-insertion order so the final report lists
//! locales and keys in the order they were first seen.

pub mod bucket;
pub mod report;

use bucket::{parse_unix_seconds, ParsedTimestamp};
use serde_json::Value;
use std::collections::HashMap;

pub use bucket::{HourBucketer, InvalidTimeZone};
pub use report::InsightsReport;

/// Aggregation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AggregationError {
    /// The record's timestamp could not be read as unix seconds.
    /// Only the login frequency update is skipped.
    #[error("Malformed timestamp for locale {locale}: {raw}")]
    MalformedTimestamp { locale: String, raw: String },
}

/// Map that remembers the order in which keys were first inserted
#[derive(Debug, Clone, PartialEq, Eq)]
struct InsertionOrdered<V> {
    entries: Vec<(String, V)>,
    index: HashMap<String, usize>,
}

impl<V> Default for InsertionOrdered<V> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<V> InsertionOrdered<V> {
    fn get(&self, key: &str) -> Option<&V> {
        self.index.get(key).map(|&i| &self.entries[i].1)
    }

    fn get_or_insert_with(&mut self, key: &str, make: impl FnOnce() -> V) -> &mut V {
        let i = match self.index.get(key) {
            Some(&i) => i,
            None => {
                let i = self.entries.len();
                self.entries.push((key.to_string(), make()));
                self.index.insert(key.to_string(), i);
                i
            }
        };
        &mut self.entries[i].1
    }

    fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Counter keyed by string, iterating in first-seen order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Counter {
    counts: InsertionOrdered<u64>,
}

impl Counter {
    /// Increment `key` by one and return the new count
    pub fn increment(&mut self, key: &str) -> u64 {
        let count = self.counts.get_or_insert_with(key, || 0);
        *count += 1;
        *count
    }

    /// Current count for `key` (0 if never seen)
    pub fn get(&self, key: &str) -> u64 {
        self.counts.get(key).copied().unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.counts.iter().map(|(k, v)| (k, *v))
    }

    /// Number of distinct keys
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.len() == 0
    }

    /// Sum of all counts
    pub fn total(&self) -> u64 {
        self.iter().map(|(_, v)| v).sum()
    }
}

/// Aggregated counters for a single locale
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocaleInsight {
    pub device_type_count: Counter,
    pub app_version_count: Counter,
    /// Keyed by hour bucket (`YYYY-MM-DD HH:00:00`)
    pub login_frequency: Counter,
}

/// Fields of an event record that feed the aggregation
#[derive(Debug, Clone, Copy, Default)]
pub struct LoginFields<'a> {
    pub locale: Option<&'a str>,
    pub device_type: Option<&'a str>,
    pub app_version: Option<&'a str>,
    /// Raw `timestamp` value, interpreted by the store
    pub timestamp: Option<&'a Value>,
}

/// Owned per-locale aggregation state
#[derive(Debug, Clone)]
pub struct AggregationStore {
    locales: InsertionOrdered<LocaleInsight>,
    bucketer: HourBucketer,
}

impl AggregationStore {
    /// Create an empty store that renders hour buckets with `bucketer`
    pub fn new(bucketer: HourBucketer) -> Self {
        Self {
            locales: InsertionOrdered::default(),
            bucketer,
        }
    }

    /// Fold one event into the counters.
    ///
    /// A record without a locale is ignored. A malformed timestamp is reported
    /// after the device type and app version counters have been updated, so the
    /// caller can log it and carry on with the record.
    pub fn record(&mut self, fields: &LoginFields<'_>) -> Result<(), AggregationError> {
        let Some(locale) = fields.locale.filter(|l| !l.is_empty()) else {
            return Ok(());
        };

        let bucketer = self.bucketer;
        let insight = self.insight_mut(locale);

        if let Some(device_type) = fields.device_type.filter(|d| !d.is_empty()) {
            insight.device_type_count.increment(device_type);
        }
        if let Some(app_version) = fields.app_version.filter(|v| !v.is_empty()) {
            insight.app_version_count.increment(app_version);
        }

        let Some(raw) = fields.timestamp else {
            return Ok(());
        };
        let bucket = match parse_unix_seconds(raw) {
            ParsedTimestamp::Absent => return Ok(()),
            ParsedTimestamp::Seconds(seconds) => bucketer.bucket(seconds),
            ParsedTimestamp::Malformed => None,
        };
        match bucket {
            Some(bucket) => {
                insight.login_frequency.increment(&bucket);
                Ok(())
            }
            None => Err(AggregationError::MalformedTimestamp {
                locale: locale.to_string(),
                raw: raw.to_string(),
            }),
        }
    }

    /// Get-or-create the insight for `locale`
    pub fn insight_mut(&mut self, locale: &str) -> &mut LocaleInsight {
        self.locales
            .get_or_insert_with(locale, LocaleInsight::default)
    }

    pub fn get(&self, locale: &str) -> Option<&LocaleInsight> {
        self.locales.get(locale)
    }

    /// Number of locales seen so far
    pub fn len(&self) -> usize {
        self.locales.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locales.len() == 0
    }

    /// Point-in-time copy of every locale, in first-seen order
    pub fn snapshot(&self) -> InsightsSnapshot {
        InsightsSnapshot {
            entries: self
                .locales
                .iter()
                .map(|(locale, insight)| (locale.to_string(), insight.clone()))
                .collect(),
        }
    }
}

/// Immutable view of the store taken by `AggregationStore::snapshot`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InsightsSnapshot {
    entries: Vec<(String, LocaleInsight)>,
}

impl InsightsSnapshot {
    pub fn iter(&self) -> impl Iterator<Item = (&str, &LocaleInsight)> {
        self.entries.iter().map(|(l, i)| (l.as_str(), i))
    }

    pub fn get(&self, locale: &str) -> Option<&LocaleInsight> {
        self.iter().find(|(l, _)| *l == locale).map(|(_, i)| i)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn locales(&self) -> Vec<&str> {
        self.iter().map(|(l, _)| l).collect()
    }
}
