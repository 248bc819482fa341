//! Scroll pinning around content mutations.
//!
//! A region that sat at its bottom edge before an append is re-pinned to the new bottom
//! afterwards. A region the user scrolled up keeps its offset.

/// Pixel tolerance for "at bottom" before a mutation.
pub const DEFAULT_PIN_TOLERANCE_PX: f64 = 10.0;

/// Coarser tolerance deciding whether the session view follows new entries.
pub const DEFAULT_AUTOSCROLL_TOLERANCE_PX: f64 = 80.0;

/// A vertically scrollable surface.
pub trait ScrollRegion {
    fn scroll_top(&self) -> f64;
    fn scroll_height(&self) -> f64;
    fn client_height(&self) -> f64;
    fn set_scroll_top(&mut self, top: f64);

    fn distance_from_bottom(&self) -> f64 {
        (self.scroll_height() - self.client_height() - self.scroll_top()).max(0.0)
    }

    fn is_at_bottom(&self, tolerance: f64) -> bool {
        self.distance_from_bottom() <= tolerance
    }

    fn scroll_to_bottom(&mut self) {
        let bottom = (self.scroll_height() - self.client_height()).max(0.0);
        self.set_scroll_top(bottom);
    }
}

/// Pin state recorded before a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrollAnchor {
    pinned: bool,
}

impl ScrollAnchor {
    pub fn capture<R: ScrollRegion + ?Sized>(region: &R, tolerance: f64) -> Self {
        Self {
            pinned: region.is_at_bottom(tolerance),
        }
    }

    pub fn is_pinned(&self) -> bool {
        self.pinned
    }

    /// Re-pin to the new bottom if the region was pinned; otherwise leave it alone.
    pub fn restore<R: ScrollRegion + ?Sized>(self, region: &mut R) {
        if self.pinned {
            region.scroll_to_bottom();
        }
    }
}

/// Run `mutate` on `region`, keeping it pinned to the bottom if it was.
pub fn preserve<R, T>(region: &mut R, tolerance: f64, mutate: impl FnOnce(&mut R) -> T) -> T
where
    R: ScrollRegion + ?Sized,
{
    let anchor = ScrollAnchor::capture(region, tolerance);
    let result = mutate(region);
    anchor.restore(region);
    result
}

/// Session-wide follow mode for appended top-level entries.
#[derive(Debug, Clone, Copy)]
pub struct AutoScroll {
    tolerance: f64,
    active: bool,
}

impl Default for AutoScroll {
    fn default() -> Self {
        Self::new(DEFAULT_AUTOSCROLL_TOLERANCE_PX)
    }
}

impl AutoScroll {
    pub fn new(tolerance: f64) -> Self {
        Self {
            tolerance,
            active: true,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Re-evaluate after a user scroll.
    pub fn observe<R: ScrollRegion + ?Sized>(&mut self, region: &R) -> bool {
        let active = region.is_at_bottom(self.tolerance);
        if active != self.active {
            tracing::trace!(active, "Autoscroll mode changed");
        }
        self.active = active;
        active
    }

    /// Scroll to the bottom after an append when following.
    pub fn follow<R: ScrollRegion + ?Sized>(&self, region: &mut R) {
        if self.active {
            region.scroll_to_bottom();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollOptions {
    pub pin_tolerance_px: f64,
    pub autoscroll_tolerance_px: f64,
}

impl Default for ScrollOptions {
    fn default() -> Self {
        Self {
            pin_tolerance_px: DEFAULT_PIN_TOLERANCE_PX,
            autoscroll_tolerance_px: DEFAULT_AUTOSCROLL_TOLERANCE_PX,
        }
    }
}

/// Scroll policy for one session view: pin on every mutation, follow on appends.
#[derive(Debug, Clone, Copy)]
pub struct ScrollKeeper {
    pin_tolerance: f64,
    auto: AutoScroll,
}

impl Default for ScrollKeeper {
    fn default() -> Self {
        Self::new(ScrollOptions::default())
    }
}

impl ScrollKeeper {
    pub fn new(options: ScrollOptions) -> Self {
        Self {
            pin_tolerance: options.pin_tolerance_px,
            auto: AutoScroll::new(options.autoscroll_tolerance_px),
        }
    }

    pub fn autoscroll(&self) -> &AutoScroll {
        &self.auto
    }

    /// Re-evaluate follow mode after the user scrolled.
    pub fn user_scrolled<R: ScrollRegion + ?Sized>(&mut self, region: &R) -> bool {
        self.auto.observe(region)
    }

    /// Run `mutate` on `region`. A pinned region stays at the bottom; when `appended`
    /// and follow mode is on, the region also scrolls to the new bottom.
    pub fn mutate<R, T>(&self, region: &mut R, appended: bool, mutate: impl FnOnce(&mut R) -> T) -> T
    where
        R: ScrollRegion + ?Sized,
    {
        let result = preserve(region, self.pin_tolerance, mutate);
        if appended {
            self.auto.follow(region);
        }
        result
    }
}

/// Plain scroll metrics, for rendering backends without a native scroll surface.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct ScrollMetrics {
    pub top: f64,
    pub height: f64,
    pub client: f64,
}

impl ScrollRegion for ScrollMetrics {
    fn scroll_top(&self) -> f64 {
        self.top
    }

    fn scroll_height(&self) -> f64 {
        self.height
    }

    fn client_height(&self) -> f64 {
        self.client
    }

    fn set_scroll_top(&mut self, top: f64) {
        let max = (self.height - self.client).max(0.0);
        self.top = top.clamp(0.0, max);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(top: f64, height: f64) -> ScrollMetrics {
        ScrollMetrics {
            top,
            height,
            client: 400.0,
        }
    }

    #[test]
    fn pinned_region_follows_append() {
        let mut view = region(596.0, 1000.0);
        preserve(&mut view, DEFAULT_PIN_TOLERANCE_PX, |r| r.height += 250.0);
        assert_eq!(view.top, 850.0);
        assert!(view.is_at_bottom(0.0));
    }

    #[test]
    fn scrolled_up_region_keeps_offset() {
        let mut view = region(300.0, 1000.0);
        preserve(&mut view, DEFAULT_PIN_TOLERANCE_PX, |r| r.height += 250.0);
        assert_eq!(view.top, 300.0);
    }

    #[test]
    fn short_content_counts_as_bottom() {
        let view = region(0.0, 120.0);
        assert!(view.is_at_bottom(DEFAULT_PIN_TOLERANCE_PX));
    }

    #[test]
    fn keeper_follows_appends_only_in_follow_mode() {
        let mut keeper = ScrollKeeper::new(ScrollOptions {
            pin_tolerance_px: 10.0,
            autoscroll_tolerance_px: 80.0,
        });

        // 40px up: not pinned, still following.
        let mut view = region(560.0, 1000.0);
        keeper.user_scrolled(&view);
        keeper.mutate(&mut view, false, |r| r.height += 100.0);
        assert_eq!(view.top, 560.0);
        keeper.mutate(&mut view, true, |r| r.height += 100.0);
        assert_eq!(view.top, 800.0);

        // Far up: neither pinned nor following.
        let mut view = region(100.0, 1000.0);
        assert!(!keeper.user_scrolled(&view));
        keeper.mutate(&mut view, true, |r| r.height += 100.0);
        assert_eq!(view.top, 100.0);
    }

    #[test]
    fn autoscroll_uses_coarser_tolerance() {
        let view = region(550.0, 1000.0);
        assert!(!view.is_at_bottom(DEFAULT_PIN_TOLERANCE_PX));

        let mut auto = AutoScroll::default();
        assert!(auto.observe(&view));

        let far = region(100.0, 1000.0);
        assert!(!auto.observe(&far));
        let mut far = far;
        auto.follow(&mut far);
        assert_eq!(far.top, 100.0);
    }
}
