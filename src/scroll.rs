//! Auto-follow policy for the message view.

use crate::types::Sender;

/// Distance from the bottom, in pixels, that still counts as "at the bottom".
pub const DEFAULT_THRESHOLD: f64 = 100.0;

/// A snapshot of the scrollable message view.
#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct Viewport {
    /// Offset of the top of the visible area.
    pub scroll_top: f64,
    /// Height of the full scrollable content.
    pub scroll_height: f64,
    /// Height of the visible area.
    pub client_height: f64,
}

impl Viewport {
    /// Creates a viewport snapshot.
    pub fn new(scroll_top: f64, scroll_height: f64, client_height: f64) -> Self {
        Self {
            scroll_top,
            scroll_height,
            client_height,
        }
    }

    /// Distance between the bottom of the visible area and the end of the
    /// content, never negative.
    pub fn distance_from_bottom(&self) -> f64 {
        (self.scroll_height - self.scroll_top - self.client_height).max(0.0)
    }
}

/// Decides whether a new message should pull the view to the bottom.
///
/// The view follows a new message when the user sent it, when it is the first
/// message of the session, or when the viewport was already near the bottom
/// before the message arrived.  A reader who scrolled up to look at history
/// is otherwise left alone.
#[derive(Debug, Clone)]
pub struct ScrollPolicy {
    threshold: f64,
    near_bottom: bool,
}

impl ScrollPolicy {
    /// Creates a policy with the given threshold in pixels.
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold: threshold.max(0.0),
            near_bottom: true,
        }
    }

    /// Returns the threshold in pixels.
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Records the latest viewport and returns whether it is near the bottom.
    pub fn observe(&mut self, viewport: Viewport) -> bool {
        self.near_bottom = viewport.distance_from_bottom() <= self.threshold;
        self.near_bottom
    }

    /// Returns whether the last observed viewport was near the bottom.
    pub fn is_near_bottom(&self) -> bool {
        self.near_bottom
    }

    /// Decides whether to scroll for a message from `sender` that brought the
    /// session to `message_count` messages.
    pub fn should_follow(&self, sender: Sender, message_count: usize) -> bool {
        sender == Sender::User || message_count <= 1 || self.near_bottom
    }

    /// Forgets the last observation; the next message in a freshly shown
    /// session follows.
    pub fn reset(&mut self) {
        self.near_bottom = true;
    }
}

impl Default for ScrollPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_following() {
        let policy = ScrollPolicy::default();
        assert!(policy.is_near_bottom());
        assert_eq!(policy.threshold(), 100.0);
        assert!(policy.should_follow(Sender::Assistant, 5));
    }

    #[test]
    fn threshold_is_inclusive() {
        let mut policy = ScrollPolicy::default();
        assert!(policy.observe(Viewport::new(400.0, 1000.0, 500.0)));
        assert!(!policy.observe(Viewport::new(399.0, 1000.0, 500.0)));
    }

    #[test]
    fn scrolled_up_reader_is_left_alone() {
        let mut policy = ScrollPolicy::default();
        policy.observe(Viewport::new(0.0, 5000.0, 600.0));
        assert!(!policy.should_follow(Sender::Assistant, 12));
        assert!(!policy.should_follow(Sender::System, 12));
        assert!(policy.should_follow(Sender::User, 12));
        assert!(policy.should_follow(Sender::Assistant, 1));
    }

    #[test]
    fn overscroll_counts_as_bottom() {
        let mut policy = ScrollPolicy::new(0.0);
        assert!(policy.observe(Viewport::new(520.0, 1000.0, 500.0)));
    }

    #[test]
    fn reset_resumes_following() {
        let mut policy = ScrollPolicy::default();
        policy.observe(Viewport::new(0.0, 5000.0, 600.0));
        policy.reset();
        assert!(policy.should_follow(Sender::Assistant, 9));
    }
}
