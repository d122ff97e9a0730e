//! Viewport Trigger Math
//!
//! Pure functions deciding when the container bottom is close enough to the
//! viewport bottom to warrant fetching another page, plus the `Container`
//! capability trait the host implements over its real scroll surface.

use std::time::{Duration, Instant};

// ============================================================================
// Metrics
// ============================================================================

/// One measurement of the host scroll surface, in pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewportMetrics {
    /// Current scroll position of the viewport
    pub scroll_top: f64,
    /// Height of the visible viewport
    pub viewport_height: f64,
    /// Distance from document top to the bottom edge of the growing container
    pub content_bottom: f64,
}

impl ViewportMetrics {
    /// Document position of the viewport's bottom edge
    pub fn window_bottom(&self) -> f64 {
        self.scroll_top + self.viewport_height
    }
}

/// True when the container bottom is within `sensitivity` pixels of the
/// viewport bottom. The comparison is strict: a container bottom exactly at
/// `window_bottom + sensitivity` does not trigger.
pub fn near_bottom(metrics: &ViewportMetrics, sensitivity: f64) -> bool {
    metrics.content_bottom < metrics.window_bottom() + sensitivity
}

// ============================================================================
// Container capability
// ============================================================================

/// Host scroll surface: the viewport metrics provider and markup sink.
///
/// In a browser host this wraps the growing element plus the window; in tests
/// it is a plain struct that accumulates markup and grows its reported
/// content height.
pub trait Container {
    /// Measure the current scroll state.
    fn metrics(&self) -> ViewportMetrics;

    /// Append rendered page markup to the container.
    fn append(&mut self, markup: &str);

    /// Restore a previously persisted scroll position.
    fn scroll_to(&mut self, scroll_top: f64);

    /// Show the configured loader while a fetch is outstanding.
    fn show_loader(&mut self, markup: &str) {
        let _ = markup;
    }

    /// Remove the loader once the fetch has been processed.
    fn hide_loader(&mut self) {}
}

// ============================================================================
// Write throttling
// ============================================================================

/// Minimum spacing between persisted scroll-position writes.
pub const SCROLL_WRITE_INTERVAL: Duration = Duration::from_millis(200);

/// Time gate limiting storage writes to one per interval.
///
/// The first write is admitted immediately; later writes are dropped until
/// the interval has elapsed. Scroll events fire far more often than storage
/// should be touched.
#[derive(Debug)]
pub struct WriteGate {
    interval: Duration,
    last: Option<Instant>,
}

impl WriteGate {
    pub fn new(interval: Duration) -> Self {
        Self { interval, last: None }
    }

    /// Returns true when a write should go through now.
    pub fn admit(&mut self, now: Instant) -> bool {
        match self.last {
            Some(previous) if now.duration_since(previous) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

impl Default for WriteGate {
    fn default() -> Self {
        Self::new(SCROLL_WRITE_INTERVAL)
    }
}
