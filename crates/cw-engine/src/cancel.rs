//! In-process cancellation registry.
//!
//! Maps applications to the [`CancelSignal`] handed to in-flight executors.
//! The persisted cancel flag on the application row remains authoritative
//! across processes; this registry reaches executors co-located with the
//! engine without waiting for their next store read.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use cw_domain::ApplicationId;
use cw_ports::CancelSignal;

#[derive(Clone, Default)]
pub struct CancelRegistry {
    inner: Arc<Mutex<HashMap<String, CancelSignal>>>,
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal for an application, creating one if absent.
    pub fn signal(&self, application_id: &ApplicationId) -> CancelSignal {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        guard
            .entry(application_id.as_str().to_string())
            .or_insert_with(CancelSignal::new)
            .clone()
    }

    /// Trip the signal for an application.
    pub fn cancel(&self, application_id: &ApplicationId) {
        self.signal(application_id).cancel();
    }

    /// Drop the entry once the application reaches a terminal state.
    pub fn forget(&self, application_id: &ApplicationId) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(application_id.as_str());
    }
}
