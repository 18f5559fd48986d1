//! Failover domain rotation shared across requests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// An ordered list of interchangeable hostnames for one logical service.
///
/// The active index is published across every request using the list:
/// connection failures advance it with a compare-and-swap so concurrent
/// requests converge on the same domain, and a success keeps the current
/// domain active until it fails again.
pub struct RetryDomains {
    domains: Vec<String>,
    active_index: AtomicUsize,
}

impl RetryDomains {
    pub fn new<I, S>(domains: I) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Arc::new(Self {
            domains: domains.into_iter().map(Into::into).collect(),
            active_index: AtomicUsize::new(0),
        })
    }

    pub fn domains(&self) -> &[String] {
        &self.domains
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    /// The currently published domain index.
    pub fn active_index(&self) -> usize {
        self.active_index.load(Ordering::SeqCst)
    }

    /// Advance past `observed`. When another request already advanced the
    /// shared index, the caller adopts that value instead. Returns the
    /// index to use next.
    pub(crate) fn advance(&self, observed: usize) -> usize {
        let next = (observed + 1) % self.domains.len();
        match self
            .active_index
            .compare_exchange(observed, next, Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => next,
            Err(current) => current,
        }
    }
}
