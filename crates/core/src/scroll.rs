//! Scroll-position rules that decide when a section counts as read.

use serde::{Deserialize, Serialize};

/// Geometry reported by the host viewport, in pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScrollMetrics {
    pub document_height: f64,
    pub viewport_height: f64,
    pub scroll_top: f64,
}

impl ScrollMetrics {
    #[must_use]
    pub fn new(document_height: f64, viewport_height: f64, scroll_top: f64) -> Self {
        Self {
            document_height,
            viewport_height,
            scroll_top,
        }
    }

    /// Percentage of the document that has been scrolled into view.
    #[must_use]
    pub fn scroll_percent(&self) -> f64 {
        100.0 * (self.scroll_top + self.viewport_height) / self.document_height
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompletionThresholds {
    /// Documents shorter than `viewport_height * min_page_ratio` are never judged.
    pub min_page_ratio: f64,
    /// Scroll percentage at which a section counts as read.
    pub complete_percent: f64,
}

impl Default for CompletionThresholds {
    fn default() -> Self {
        Self {
            min_page_ratio: 1.5,
            complete_percent: 95.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScrollCheck {
    TooShort { min_height: f64 },
    InProgress { percent: f64 },
    Reached { percent: f64 },
}

impl ScrollCheck {
    #[must_use]
    pub fn is_reached(&self) -> bool {
        matches!(self, Self::Reached { .. })
    }
}

/// Classify the current scroll position against the thresholds.
#[must_use]
pub fn evaluate(metrics: ScrollMetrics, thresholds: &CompletionThresholds) -> ScrollCheck {
    let min_height = metrics.viewport_height * thresholds.min_page_ratio;
    if metrics.document_height <= 0.0 || metrics.document_height < min_height {
        return ScrollCheck::TooShort { min_height };
    }

    let percent = metrics.scroll_percent();
    if percent >= thresholds.complete_percent {
        ScrollCheck::Reached { percent }
    } else {
        ScrollCheck::InProgress { percent }
    }
}
