//! Per-viewport follow policy.
//!
//! Each viewport on a followed surface is either Pinned (auto-scrolls when new
//! content arrives) or Detached (left alone). The state is recomputed from the
//! cursor position on every navigation event, never inferred.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::surface::{SurfaceId, ViewportHost, ViewportId};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FollowState {
    #[default]
    Pinned,
    Detached,
}

/// First 1-based line of the tail region.
///
/// The tail region is the trailing window of `visible_height` lines. When the
/// content is shorter than the viewport the whole surface is tail region.
#[must_use]
pub fn tail_region_start(total_lines: usize, visible_height: usize) -> usize {
    (total_lines + 1).saturating_sub(visible_height).max(1)
}

/// Follow state implied by a cursor position.
#[must_use]
pub fn classify(cursor_line: usize, total_lines: usize, visible_height: usize) -> FollowState {
    if cursor_line < tail_region_start(total_lines, visible_height) {
        FollowState::Detached
    } else {
        FollowState::Pinned
    }
}

/// Follow states for the viewports of one surface.
#[derive(Debug, Clone, Default)]
pub struct ViewportFollow {
    states: BTreeMap<ViewportId, FollowState>,
}

impl ViewportFollow {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn state(&self, viewport: ViewportId) -> Option<FollowState> {
        self.states.get(&viewport).copied()
    }

    #[must_use]
    pub fn states(&self) -> &BTreeMap<ViewportId, FollowState> {
        &self.states
    }

    /// Record a navigation event. Returns the recomputed state.
    pub fn on_navigation(
        &mut self,
        viewport: ViewportId,
        cursor_line: usize,
        total_lines: usize,
        visible_height: usize,
    ) -> FollowState {
        let state = classify(cursor_line, total_lines, visible_height);
        let previous = self.states.insert(viewport, state);
        if previous != Some(state) {
            trace!(
                %viewport,
                cursor_line,
                total_lines,
                visible_height,
                ?state,
                "Follow state changed"
            );
        }
        state
    }

    /// Track the viewports the host currently shows for `surface`: new ones
    /// start Pinned, vanished ones are forgotten.
    pub fn sync<H: ViewportHost + ?Sized>(&mut self, host: &H, surface: SurfaceId) {
        let current = host.viewports_for(surface);
        self.states.retain(|id, _| current.contains(id));
        for id in current {
            self.states.entry(id).or_default();
        }
    }

    /// Scroll every Pinned viewport to the last line. Returns how many moved.
    pub fn follow_new_content<H: ViewportHost + ?Sized>(
        &mut self,
        host: &mut H,
        surface: SurfaceId,
        total_lines: usize,
    ) -> usize {
        self.sync(host, surface);
        let last = total_lines.max(1);
        let mut scrolled = 0;
        for (&viewport, &state) in &self.states {
            if state == FollowState::Pinned {
                host.set_cursor_line(viewport, last);
                scrolled += 1;
            }
        }
        scrolled
    }

    /// Force every attached viewport to Pinned and scroll it to the bottom.
    pub fn pin_all<H: ViewportHost + ?Sized>(
        &mut self,
        host: &mut H,
        surface: SurfaceId,
        total_lines: usize,
    ) {
        self.sync(host, surface);
        for state in self.states.values_mut() {
            *state = FollowState::Pinned;
        }
        self.follow_new_content(host, surface, total_lines);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::{ContentSurface, MemoryHost};

    fn host_with_lines(n: usize) -> (MemoryHost, SurfaceId) {
        let mut host = MemoryHost::new();
        let s = SurfaceId(1);
        host.create_surface(s, (0..n).map(|i| format!("line {i}")).collect());
        (host, s)
    }

    #[test]
    fn tail_region_boundary() {
        // 100 lines, 10 visible: lines 91..=100 are the tail region.
        assert_eq!(tail_region_start(100, 10), 91);
        assert_eq!(classify(90, 100, 10), FollowState::Detached);
        assert_eq!(classify(91, 100, 10), FollowState::Pinned);
        assert_eq!(classify(100, 100, 10), FollowState::Pinned);
    }

    #[test]
    fn short_content_is_always_pinned() {
        assert_eq!(tail_region_start(3, 10), 1);
        assert_eq!(classify(1, 3, 10), FollowState::Pinned);
        assert_eq!(classify(1, 0, 10), FollowState::Pinned);
    }

    #[test]
    fn new_viewports_start_pinned() {
        let (mut host, s) = host_with_lines(5);
        let vp = host.open_viewport(s, 3);
        let mut follow = ViewportFollow::new();
        follow.sync(&host, s);
        assert_eq!(follow.state(vp), Some(FollowState::Pinned));
    }

    #[test]
    fn pinned_viewport_follows_detached_stays() {
        let (mut host, s) = host_with_lines(50);
        let pinned = host.open_viewport(s, 10);
        let detached = host.open_viewport(s, 10);
        host.set_cursor_line(detached, 12);

        let mut follow = ViewportFollow::new();
        follow.on_navigation(pinned, 50, 50, 10);
        follow.on_navigation(detached, 12, 50, 10);

        host.append_lines(s, &["x".to_string(), "y".to_string()]);
        let total = host.line_count(s);
        let moved = follow.follow_new_content(&mut host, s, total);

        assert_eq!(moved, 1);
        assert_eq!(host.cursor_line(pinned), 52);
        assert_eq!(host.cursor_line(detached), 12);
    }

    #[test]
    fn navigation_back_into_tail_region_repins() {
        let mut follow = ViewportFollow::new();
        let vp = ViewportId(3);
        assert_eq!(follow.on_navigation(vp, 1, 100, 10), FollowState::Detached);
        assert_eq!(follow.on_navigation(vp, 95, 100, 10), FollowState::Pinned);
    }

    #[test]
    fn pin_all_overrides_detached() {
        let (mut host, s) = host_with_lines(40);
        let vp = host.open_viewport(s, 5);
        host.set_cursor_line(vp, 2);
        let mut follow = ViewportFollow::new();
        follow.on_navigation(vp, 2, 40, 5);

        follow.pin_all(&mut host, s, 40);
        assert_eq!(follow.state(vp), Some(FollowState::Pinned));
        assert_eq!(host.cursor_line(vp), 40);
    }

    #[test]
    fn closed_viewports_are_forgotten() {
        let (mut host, s) = host_with_lines(5);
        let vp = host.open_viewport(s, 3);
        let mut follow = ViewportFollow::new();
        follow.sync(&host, s);
        host.close_viewport(vp);
        follow.sync(&host, s);
        assert!(follow.states().is_empty());
    }
}
