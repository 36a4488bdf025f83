use std::{collections::HashMap, future::Future, sync::Arc};

use tokio::sync::{Mutex, OnceCell};
use uuid::Uuid;

type Slot = Arc<OnceCell<Result<bool, String>>>;

/// Single-flight admin lookups: concurrent checks for the same user share
/// one lookup. The slot is dropped once resolved, so a later request asks
/// again and sees role changes.
#[derive(Clone, Default)]
pub struct AdminCheck {
    inflight: Arc<Mutex<HashMap<Uuid, Slot>>>,
}

impl AdminCheck {
    pub async fn check<F, Fut>(&self, user_id: Uuid, lookup: F) -> Result<bool, String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<bool, String>>,
    {
        let slot = {
            let mut inflight = self.inflight.lock().await;
            inflight.entry(user_id).or_default().clone()
        };
        let result = slot.get_or_init(lookup).await.clone();

        let mut inflight = self.inflight.lock().await;
        if inflight.get(&user_id).is_some_and(|current| Arc::ptr_eq(current, &slot)) {
            inflight.remove(&user_id);
        }
        result
    }

    pub async fn in_flight(&self) -> usize {
        self.inflight.lock().await.len()
    }
}
