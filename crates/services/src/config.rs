use std::env;
use std::str::FromStr;
use std::time::Duration;

use reading_core::CompletionThresholds;
use reading_core::model::SchemaDriftPolicy;
use tracing::warn;

/// Storage key of the progress blob unless overridden.
pub const DEFAULT_PROGRESS_KEY: &str = "reading-progress";

/// Timing and threshold knobs for the scroll tracker.
#[derive(Clone, Debug, PartialEq)]
pub struct TrackerConfig {
    /// Quiet period after the last scroll event before checking.
    pub debounce: Duration,
    /// Delay before the one-shot check for sections that fit without scrolling.
    pub fallback_delay: Duration,
    pub thresholds: CompletionThresholds,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(300),
            fallback_delay: Duration::from_millis(1000),
            thresholds: CompletionThresholds::default(),
        }
    }
}

impl TrackerConfig {
    /// Defaults overridden by `READING_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let debounce = env_parse::<u64>("READING_SCROLL_DEBOUNCE_MS")
            .map_or(defaults.debounce, Duration::from_millis);
        let fallback_delay = env_parse::<u64>("READING_FALLBACK_DELAY_MS")
            .map_or(defaults.fallback_delay, Duration::from_millis);
        let complete_percent = env_parse::<f64>("READING_COMPLETE_PERCENT")
            .filter(|pct| (0.0..=100.0).contains(pct))
            .unwrap_or(defaults.thresholds.complete_percent);
        let min_page_ratio = env_parse::<f64>("READING_MIN_PAGE_RATIO")
            .filter(|ratio| ratio.is_finite() && *ratio >= 0.0)
            .unwrap_or(defaults.thresholds.min_page_ratio);

        Self {
            debounce,
            fallback_delay,
            thresholds: CompletionThresholds {
                min_page_ratio,
                complete_percent,
            },
        }
    }
}

/// Persistence settings for the progress store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProgressConfig {
    pub storage_key: String,
    pub drift_policy: SchemaDriftPolicy,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            storage_key: DEFAULT_PROGRESS_KEY.to_owned(),
            drift_policy: SchemaDriftPolicy::default(),
        }
    }
}

impl ProgressConfig {
    /// Defaults overridden by `READING_PROGRESS_KEY` and `READING_SCHEMA_DRIFT`.
    #[must_use]
    pub fn from_env() -> Self {
        let storage_key = env::var("READING_PROGRESS_KEY")
            .ok()
            .map(|key| key.trim().to_owned())
            .filter(|key| !key.is_empty())
            .unwrap_or_else(|| DEFAULT_PROGRESS_KEY.to_owned());
        let drift_policy = env::var("READING_SCHEMA_DRIFT")
            .ok()
            .and_then(|raw| match parse_drift_policy(&raw) {
                Some(policy) => Some(policy),
                None => {
                    warn!(value = %raw, "ignoring unknown READING_SCHEMA_DRIFT");
                    None
                }
            })
            .unwrap_or_default();

        Self {
            storage_key,
            drift_policy,
        }
    }
}

fn parse_drift_policy(raw: &str) -> Option<SchemaDriftPolicy> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "retain" | "keep" => Some(SchemaDriftPolicy::Retain),
        "drop" => Some(SchemaDriftPolicy::Drop),
        _ => None,
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    let raw = env::var(name).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(var = name, value = %raw, "ignoring unparsable environment override");
            None
        }
    }
}
