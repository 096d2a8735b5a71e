//! Round-robin selection across a backend group.
//!
//! Each distinct group spec (e.g. `"b1,b2,b3"`) gets one monotonic,
//! process-wide counter. No attempt is made to share the counter across
//! instances of the gateway.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ahash::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct LoadBalancer {
    counters: RwLock<HashMap<String, Arc<AtomicUsize>>>,
}

pub struct Selection {
    pub backend: String,
    pub index: usize,
    pub total: usize,
}

impl LoadBalancer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Selects the next member of `group` (keyed by its joined spec) and
    /// advances that group's counter.
    pub async fn select(&self, group_key: &str, members: &[String]) -> Selection {
        debug_assert!(!members.is_empty());

        let counter = {
            let counters = self.counters.read().await;
            counters.get(group_key).cloned()
        };
        let counter = match counter {
            Some(c) => c,
            None => {
                let mut counters = self.counters.write().await;
                counters
                    .entry(group_key.to_string())
                    .or_insert_with(|| Arc::new(AtomicUsize::new(0)))
                    .clone()
            }
        };

        let previous = counter.fetch_add(1, Ordering::Relaxed);
        let index = previous % members.len();
        Selection {
            backend: members[index].clone(),
            index,
            total: members.len(),
        }
    }
}
