use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use skillrelay_core::ConversationKey;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// One async mutex per conversation. Turns and proactive deliveries for the same
/// conversation run one at a time; different conversations never wait on each other.
#[derive(Debug, Default)]
pub struct ConversationLocks {
    slots: Mutex<HashMap<ConversationKey, Arc<AsyncMutex<()>>>>,
}

impl ConversationLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &ConversationKey) -> OwnedMutexGuard<()> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            // Slots nobody holds or waits on can go.
            slots.retain(|existing, slot| existing == key || Arc::strong_count(slot) > 1);
            Arc::clone(slots.entry(key.clone()).or_default())
        };
        slot.lock_owned().await
    }

    pub fn tracked(&self) -> usize {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
