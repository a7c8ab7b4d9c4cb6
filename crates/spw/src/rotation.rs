//! 🗓️ Destination rotation — one destination per calendar day, in one fixed timezone.
//!
//! 🎬 *[INT. SERVER ROOM — 23:59:59 (+08:00). the clock ticks. somewhere, an index is about to be born.]*
//! *[then NTP shows up and sets the clock back ten minutes. the index is born again. nobody panics.]*
//!
//! 🧠 Knowledge graph:
//! - A [`DayBucket`] is `(utc offset, day index)`, recomputed fresh on every check.
//! - We compare buckets for *equality*, never "is it later than last time". A clock that walks
//!   backwards across midnight simply produces a different bucket, and a different bucket means
//!   one more (idempotent) re-initialization. No stuck timers, no errors.
//! - The destination init itself (create index, create collection, ...) belongs to the sink.
//!   This module only decides *when* and *what name*.
//!
//! ⚠️ Fixed offsets only. If you need daylight saving, you need a different kind of clock. And sympathy.

use std::fmt::Write as _;
use std::future::Future;

use anyhow::{Context, Result, anyhow, bail};
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, FixedOffset, Utc};
use serde::Deserialize;
use tracing::{debug, info};

const MILLIS_PER_DAY: i64 = 24 * 3600 * 1000;

/// 🔧 How daily destinations are named and which day it is.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct DailyRotationConfig {
    /// 🌏 Fixed UTC offset, `+08:00` style. Defaults to Asia/Shanghai's offset.
    #[serde(default = "default_utc_offset")]
    pub utc_offset: String,
    /// 📅 strftime pattern appended to the base name: `{base}_{pattern}`.
    #[serde(default = "default_name_format")]
    pub name_format: String,
}

fn default_utc_offset() -> String {
    "+08:00".to_string()
}

// 📅 2024_3_9, not 2024_03_09. history chose unpadded. we respect history.
fn default_name_format() -> String {
    "%Y_%-m_%-d".to_string()
}

impl Default for DailyRotationConfig {
    fn default() -> Self {
        Self {
            utc_offset: default_utc_offset(),
            name_format: default_name_format(),
        }
    }
}

/// 🪣 Which day it is, and according to which offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DayBucket {
    pub offset_secs: i32,
    pub day_index: i64,
}

impl DayBucket {
    pub fn at(now: DateTime<Utc>, offset: FixedOffset) -> Self {
        let offset_secs = offset.local_minus_utc();
        let local_millis = now.timestamp_millis() + i64::from(offset_secs) * 1000;
        Self {
            offset_secs,
            day_index: local_millis.div_euclid(MILLIS_PER_DAY),
        }
    }
}

/// 🔄 Tracks the active daily destination and decides when it must be re-initialized.
#[derive(Debug, Clone)]
pub struct DestinationRotation {
    base: String,
    offset: FixedOffset,
    name_format: String,
    current: Option<(DayBucket, String)>,
    forced_now: Option<DateTime<Utc>>,
}

impl DestinationRotation {
    /// 🏗️ Validate the offset and the name pattern up front. A typo here is a config error,
    /// not something to discover at midnight.
    pub fn new(base: impl Into<String>, config: &DailyRotationConfig) -> Result<Self> {
        let base = base.into();
        if base.is_empty() {
            bail!("💀 A daily destination needs a base name. An empty string is not a name, it's a mood.");
        }
        let offset: FixedOffset = config.utc_offset.parse().map_err(|err| {
            anyhow!(
                "💀 utc_offset '{}' is not a fixed offset like '+08:00': {}",
                config.utc_offset,
                err
            )
        })?;
        if StrftimeItems::new(&config.name_format).any(|item| matches!(item, Item::Error)) {
            bail!(
                "💀 name_format '{}' is not a valid strftime pattern. chrono read it twice and gave up both times.",
                config.name_format
            );
        }
        Ok(Self {
            base,
            offset,
            name_format: config.name_format.clone(),
            current: None,
            forced_now: None,
        })
    }

    /// ⏰ The real clock, unless a test has its thumb on the scale.
    pub fn now(&self) -> DateTime<Utc> {
        self.forced_now.unwrap_or_else(Utc::now)
    }

    pub fn bucket(&self) -> DayBucket {
        DayBucket::at(self.now(), self.offset)
    }

    /// 🏷️ `{base}_{strftime(name_format)}` for the local day containing `now`.
    pub fn destination_for(&self, now: DateTime<Utc>) -> Result<String> {
        let local = now.with_timezone(&self.offset);
        let mut name = String::with_capacity(self.base.len() + 16);
        write!(
            name,
            "{}_{}",
            self.base,
            local.format_with_items(StrftimeItems::new(&self.name_format))
        )
        .map_err(|_| anyhow!("💀 Could not render destination name with pattern '{}'", self.name_format))?;
        Ok(name)
    }

    /// 🔍 The bucket and name for "now", but only if they differ from the last committed bucket.
    pub fn check(&self) -> Result<Option<(DayBucket, String)>> {
        let now = self.now();
        let bucket = DayBucket::at(now, self.offset);
        match &self.current {
            Some((current, _)) if *current == bucket => Ok(None),
            _ => Ok(Some((bucket, self.destination_for(now)?))),
        }
    }

    /// ✅ Remember `bucket` as initialized under `name`.
    pub fn commit(&mut self, bucket: DayBucket, name: String) {
        self.current = Some((bucket, name));
    }

    /// 📍 The last successfully initialized destination, if any.
    pub fn current(&self) -> Option<&str> {
        self.current.as_ref().map(|(_, name)| name.as_str())
    }

    /// 🚦 Make sure the destination for "now" has been initialized, then return its name.
    ///
    /// `init` runs only when the bucket changed, and must be idempotent (create-if-missing).
    /// The new bucket is committed only after `init` succeeds, so a failed init is retried
    /// on the next call instead of being forgotten.
    pub async fn ensure_current<F, Fut>(&mut self, init: F) -> Result<String>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let Some((bucket, name)) = self.check()? else {
            return Ok(self.current().unwrap_or(&self.base).to_string());
        };

        info!(
            "🗓️ Day bucket changed ({:?} → {:?}); initializing destination '{}'",
            self.current.as_ref().map(|(b, _)| *b),
            bucket,
            name
        );
        init(name.clone())
            .await
            .with_context(|| format!("💀 Failed to initialize daily destination '{}'", name))?;
        debug!("✅ Destination '{}' is ready", name);
        self.commit(bucket, name.clone());
        Ok(name)
    }

    /// 🧪 Test-only clock override. `Some(t)` pins "now" to `t`; `None` goes back to the wall clock.
    pub fn force_clock(&mut self, now: Option<DateTime<Utc>>) {
        self.forced_now = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(ts: &str) -> DateTime<Utc> {
        ts.parse().expect("💀 test timestamp should parse")
    }

    fn rotation() -> DestinationRotation {
        DestinationRotation::new("logs", &DailyRotationConfig::default()).expect("💀 defaults are valid")
    }

    #[test]
    fn the_one_where_midnight_in_shanghai_is_four_pm_in_london() {
        let offset: FixedOffset = "+08:00".parse().expect("💀 offset");
        let before = DayBucket::at(at("2024-03-09T15:59:59Z"), offset);
        let after = DayBucket::at(at("2024-03-09T16:00:00Z"), offset);

        assert_ne!(before, after);
        assert_eq!(after.day_index, before.day_index + 1);
        assert_eq!(before.offset_secs, 8 * 3600);
    }

    #[test]
    fn the_one_where_names_follow_the_local_calendar() -> Result<()> {
        let rotation = rotation();
        assert_eq!(rotation.destination_for(at("2024-03-09T15:59:59Z"))?, "logs_2024_3_9");
        assert_eq!(rotation.destination_for(at("2024-03-09T16:00:00Z"))?, "logs_2024_3_10");
        Ok(())
    }

    #[test]
    fn the_one_where_the_same_instant_means_a_different_bucket_in_another_offset() {
        let now = at("2024-03-09T20:00:00Z");
        let east = DayBucket::at(now, "+08:00".parse().expect("💀 offset"));
        let west = DayBucket::at(now, "-05:00".parse().expect("💀 offset"));
        assert_ne!(east, west);
    }

    #[test]
    fn the_one_where_time_before_1970_still_has_days() {
        let offset: FixedOffset = "+00:00".parse().expect("💀 offset");
        let bucket = DayBucket::at(at("1969-12-31T23:59:59Z"), offset);
        assert_eq!(bucket.day_index, -1);
    }

    #[tokio::test]
    async fn the_one_where_the_clock_goes_back_and_forth_and_nobody_gets_stuck() -> Result<()> {
        let mut rotation = rotation();
        let inits = std::cell::RefCell::new(Vec::new());
        let day_one = at("2024-03-09T10:00:00Z");
        let day_one_later = at("2024-03-09T15:00:00Z");
        let day_two = at("2024-03-09T16:30:00Z");
        let day_two_later = at("2024-03-10T01:00:00Z");

        for now in [day_one, day_one_later, day_two, day_two_later, day_one, day_two] {
            rotation.force_clock(Some(now));
            rotation
                .ensure_current(|name| {
                    inits.borrow_mut().push(name);
                    async { Ok::<(), anyhow::Error>(()) }
                })
                .await?;
        }

        // ✅ one init per bucket change: first sight, forward, NTP rewind, forward again
        assert_eq!(
            inits.into_inner(),
            vec!["logs_2024_3_9", "logs_2024_3_10", "logs_2024_3_9", "logs_2024_3_10"]
        );
        assert_eq!(rotation.current(), Some("logs_2024_3_10"));
        Ok(())
    }

    #[tokio::test]
    async fn the_one_where_a_failed_init_is_retried_next_time() -> Result<()> {
        let mut rotation = rotation();
        rotation.force_clock(Some(at("2024-03-09T10:00:00Z")));

        let first = rotation
            .ensure_current(|_| async { Err::<(), _>(anyhow!("store unreachable")) })
            .await;
        assert!(first.is_err());
        assert_eq!(rotation.current(), None);

        let mut called = false;
        let name = rotation
            .ensure_current(|_| {
                called = true;
                async { Ok::<(), anyhow::Error>(()) }
            })
            .await?;
        assert!(called, "the bucket was never committed, so init must run again");
        assert_eq!(name, "logs_2024_3_9");
        Ok(())
    }

    #[test]
    fn the_one_where_an_unchanged_bucket_needs_nothing() {
        let mut rotation = rotation();
        rotation.force_clock(Some(at("2024-03-09T10:00:00Z")));
        let (bucket, name) = rotation
            .check()
            .expect("💀 check")
            .expect("first check always rotates");
        rotation.commit(bucket, name);

        rotation.force_clock(Some(at("2024-03-09T11:00:00Z")));
        assert!(rotation.check().expect("💀 check").is_none());
    }

    #[test]
    fn the_one_where_a_bad_offset_is_a_config_error() {
        let config = DailyRotationConfig {
            utc_offset: "Mars/Olympus_Mons".to_string(),
            ..DailyRotationConfig::default()
        };
        assert!(DestinationRotation::new("logs", &config).is_err());
    }

    #[test]
    fn the_one_where_a_bad_pattern_is_a_config_error() {
        let config = DailyRotationConfig {
            name_format: "%Y_%".to_string(),
            ..DailyRotationConfig::default()
        };
        assert!(DestinationRotation::new("logs", &config).is_err());
        assert!(DestinationRotation::new("", &DailyRotationConfig::default()).is_err());
    }
}
