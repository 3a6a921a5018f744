//! Collaborators the notification client reports to.
//!
//! All of them are called from the client's driver task, one at a time and in
//! the order events arrive, so they should return quickly.

use std::fmt::Debug;

use crate::notification::{EntityUpdate, QueryKey, Severity};

/// Receive entity status changes.
pub trait EntityListener: Send + Sync {
    /// called once per valid entity update
    fn on_entity_event(&self, entity_id: &str, status: &str, title: &str);
}

impl<F> EntityListener for F
where
    F: Fn(&str, &str, &str) + Send + Sync,
{
    fn on_entity_event(&self, entity_id: &str, status: &str, title: &str) {
        self(entity_id, status, title)
    }
}

/// Show user-visible feedback.
pub trait Toaster: Send + Sync {
    /// called for each translated event and connection milestone
    fn on_toast(&self, severity: Severity, message: &str);
}

impl<F> Toaster for F
where
    F: Fn(Severity, &str) + Send + Sync,
{
    fn on_toast(&self, severity: Severity, message: &str) {
        self(severity, message)
    }
}

/// Mark cached queries stale.
pub trait Invalidator: Send + Sync {
    /// the cached data behind `key` must be refetched
    fn invalidate(&self, key: &QueryKey);
}

impl<F> Invalidator for F
where
    F: Fn(&QueryKey) + Send + Sync,
{
    fn invalidate(&self, key: &QueryKey) {
        self(key)
    }
}

/// Collaborator that only logs, used when caller does not provide one.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogOnly;

impl EntityListener for LogOnly {
    fn on_entity_event(&self, entity_id: &str, status: &str, title: &str) {
        log::info!("Entity {} ({}) is now {}", entity_id, title, status);
    }
}

impl Toaster for LogOnly {
    fn on_toast(&self, severity: Severity, message: &str) {
        log::info!("[{}] {}", severity, message);
    }
}

impl Invalidator for LogOnly {
    fn invalidate(&self, key: &QueryKey) {
        log::debug!("Invalidate {}", key);
    }
}

/// The set of collaborators a client dispatches to.
pub struct Handlers {
    pub(crate) entity: Box<dyn EntityListener>,
    pub(crate) toast: Box<dyn Toaster>,
    pub(crate) invalidator: Box<dyn Invalidator>,
}

impl Debug for Handlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handlers").finish_non_exhaustive()
    }
}

impl Default for Handlers {
    fn default() -> Self {
        Self {
            entity: Box::new(LogOnly),
            toast: Box::new(LogOnly),
            invalidator: Box::new(LogOnly),
        }
    }
}

impl Handlers {
    /// all collaborators only log
    pub fn new() -> Self {
        Self::default()
    }

    /// set entity listener
    pub fn on_entity_event<L: EntityListener + 'static>(mut self, listener: L) -> Self {
        self.entity = Box::new(listener);
        self
    }

    /// set toast sink
    pub fn on_toast<T: Toaster + 'static>(mut self, toaster: T) -> Self {
        self.toast = Box::new(toaster);
        self
    }

    /// set cache invalidator
    pub fn invalidator<I: Invalidator + 'static>(mut self, invalidator: I) -> Self {
        self.invalidator = Box::new(invalidator);
        self
    }

    pub(crate) fn entity_event(&self, update: &EntityUpdate) {
        self.entity
            .on_entity_event(&update.entity_id, update.status.as_str(), &update.title);
    }
}
