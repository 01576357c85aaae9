//! Capabilities document caching.
//!
//! Caches the generated WMTS capabilities XML with a configurable TTL. The
//! document is also tied to the registry epoch, so it is regenerated as soon
//! as any dataset opens or closes.

use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info};

struct CachedDocument {
    xml: String,
    epoch: u64,
    generated_at: Instant,
}

pub struct CapabilitiesCache {
    document: RwLock<Option<CachedDocument>>,
    ttl: Duration,
}

impl CapabilitiesCache {
    /// Cache documents for `ttl_secs`; zero disables reuse.
    pub fn new(ttl_secs: u64) -> Self {
        info!(ttl_secs = ttl_secs, "Initializing capabilities cache");
        Self {
            document: RwLock::new(None),
            ttl: Duration::from_secs(ttl_secs),
        }
    }

    /// Cached capabilities if generated for `epoch` and still within the TTL.
    pub async fn get(&self, epoch: u64) -> Option<String> {
        let guard = self.document.read().await;
        let cached = guard.as_ref()?;
        if cached.epoch != epoch {
            debug!("Capabilities cache stale: datasets changed");
            return None;
        }
        if cached.generated_at.elapsed() >= self.ttl {
            debug!("Capabilities cache expired");
            return None;
        }
        debug!("Capabilities cache hit");
        Some(cached.xml.clone())
    }

    pub async fn set(&self, xml: String, epoch: u64) {
        let mut guard = self.document.write().await;
        *guard = Some(CachedDocument {
            xml,
            epoch,
            generated_at: Instant::now(),
        });
        debug!(epoch = epoch, "Capabilities cached");
    }
}
