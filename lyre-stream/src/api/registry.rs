//! Active streams, keyed by the id sent in `X-Stream-Id`

use crate::mixer::AudioMixer;
use crate::pipeline::FilterControl;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

/// Control handles for one running stream
#[derive(Clone)]
pub struct StreamEntry {
    pub track: String,
    pub mixer: Option<AudioMixer>,
    pub filters: FilterControl,
    pub started_at: DateTime<Utc>,
}

#[derive(Clone, Default)]
pub struct StreamRegistry {
    streams: Arc<Mutex<HashMap<Uuid, StreamEntry>>>,
}

impl StreamRegistry {
    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, StreamEntry>> {
        self.streams.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn insert(&self, id: Uuid, entry: StreamEntry) {
        self.lock().insert(id, entry);
    }

    pub fn get(&self, id: &Uuid) -> Option<StreamEntry> {
        self.lock().get(id).cloned()
    }

    pub fn remove(&self, id: &Uuid) -> Option<StreamEntry> {
        self.lock().remove(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
