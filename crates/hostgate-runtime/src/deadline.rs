use std::time::{Duration, Instant};

/// A point in time after which work must stop, or no bound at all.
///
/// Deadlines nest: [`Deadline::narrowed`] derives a child deadline that can
/// only be earlier than its parent, so a per-stage timeout never extends an
/// overall one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    pub fn none() -> Self {
        Self { at: None }
    }

    /// A timeout too large to represent is treated as unbounded.
    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Instant::now().checked_add(timeout),
        }
    }

    /// `None` means unbounded.
    pub fn from_timeout(timeout: Option<Duration>) -> Self {
        timeout.map_or_else(Self::none, Self::after)
    }

    #[must_use]
    pub fn narrowed(self, timeout: Option<Duration>) -> Self {
        let child = Self::from_timeout(timeout);
        match (self.at, child.at) {
            (Some(a), Some(b)) => Self { at: Some(a.min(b)) },
            (Some(a), None) => Self { at: Some(a) },
            (None, b) => Self { at: b },
        }
    }

    pub fn is_bounded(&self) -> bool {
        self.at.is_some()
    }

    /// Time left, `None` when unbounded, zero once expired.
    pub fn remaining(&self) -> Option<Duration> {
        self.at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn expired(&self) -> bool {
        self.at.is_some_and(|at| Instant::now() >= at)
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Self::none()
    }
}
