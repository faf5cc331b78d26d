use std::fmt;

use crate::model::{GenerationRecord, KeyValuePair};

/// A generation waiting in (or resolved from) the SDK queue.
#[derive(Clone)]
pub struct QueuedGeneration {
    pub(crate) generation: GenerationRecord,
    pub(crate) api_key: Option<String>,
    pub(crate) retries: u32,
}

impl QueuedGeneration {
    pub(crate) fn new(generation: GenerationRecord, api_key: Option<String>) -> Self {
        Self {
            generation,
            api_key,
            retries: 0,
        }
    }

    pub fn generation(&self) -> &GenerationRecord {
        &self.generation
    }

    pub fn into_generation(self) -> GenerationRecord {
        self.generation
    }

    /// Failed delivery attempts so far.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn has_api_key_override(&self) -> bool {
        self.api_key.is_some()
    }

    /// Merge `defaults` under the record's own tags. Record tags win on key
    /// collision; defaults keep their order, new record keys are appended.
    pub(crate) fn apply_default_tags(&mut self, defaults: &[KeyValuePair]) {
        if defaults.is_empty() {
            return;
        }
        let mut merged: Vec<KeyValuePair> = defaults.to_vec();
        for pair in self.generation.tags.take().unwrap_or_default() {
            match merged.iter_mut().find(|p| p.key == pair.key) {
                Some(existing) => existing.value = pair.value,
                None => merged.push(pair),
            }
        }
        self.generation.tags = Some(merged);
    }
}

impl fmt::Debug for QueuedGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedGeneration")
            .field("id", &self.generation.id)
            .field("model", &self.generation.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("retries", &self.retries)
            .finish()
    }
}
