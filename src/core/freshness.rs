use chrono::{DateTime, Utc};

pub const DEFAULT_FRESHNESS_WINDOW_DAYS: i64 = 60;

const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh { age_days: i64 },
    Stale { age_days: Option<i64> },
}

impl Freshness {
    pub fn is_fresh(&self) -> bool {
        matches!(self, Freshness::Fresh { .. })
    }
}

/// 快取新鮮度判斷，本身不保存任何狀態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessPolicy {
    window_days: i64,
}

impl FreshnessPolicy {
    pub fn new(window_days: i64) -> Self {
        Self { window_days }
    }

    pub fn window_days(&self) -> i64 {
        self.window_days
    }

    /// floor((now - last_processed) / 1 day)；未來時間視為 0 天
    pub fn age_days(last_processed: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
        let elapsed = (now - last_processed).num_seconds();
        elapsed.div_euclid(SECONDS_PER_DAY).max(0)
    }

    pub fn evaluate(&self, last_processed: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Freshness {
        match last_processed {
            None => Freshness::Stale { age_days: None },
            Some(ts) => {
                let age_days = Self::age_days(ts, now);
                if age_days <= self.window_days {
                    Freshness::Fresh { age_days }
                } else {
                    Freshness::Stale {
                        age_days: Some(age_days),
                    }
                }
            }
        }
    }
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_FRESHNESS_WINDOW_DAYS)
    }
}
