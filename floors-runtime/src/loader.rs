use std::sync::Arc;

use floors::{
    BlockDescriptor, CachePolicy, CacheStore, ErrorHandler, FloorError, Payload, PayloadCheck,
    Strategy,
};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::retry::retry_with_backoff;
use crate::source::RemoteDataSource;

/// Where a block's data came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataOrigin {
    Cache,
    Source,
    /// The source failed and a cached copy was served instead.
    Fallback,
}

#[derive(Clone, Debug)]
pub(crate) struct Loaded {
    pub(crate) payload: Payload,
    pub(crate) origin: DataOrigin,
}

#[derive(Clone, Debug)]
pub(crate) struct LoadFailure {
    pub(crate) error: FloorError,
    /// Whether the error handler's strategy dealt with it. Unhandled failures go to the host.
    pub(crate) handled: bool,
}

/// The per-block load pipeline: cache, source with retries, cache fallback.
///
/// Cloned into every spawned load; everything inside is shared.
#[derive(Clone)]
pub(crate) struct Loader {
    pub(crate) source: Arc<dyn RemoteDataSource>,
    pub(crate) cache: Arc<CacheStore>,
    pub(crate) handler: Arc<ErrorHandler>,
}

impl Loader {
    /// Loads data for `d`. With `use_cache == false` the cache is only used as a fallback.
    ///
    /// Source data that `check` rejects is never cached; it fails like any other parse error.
    pub(crate) async fn load(
        &self,
        d: &BlockDescriptor,
        check: Option<&PayloadCheck>,
        cancel: &CancellationToken,
        use_cache: bool,
    ) -> Result<Loaded, LoadFailure> {
        let key = d.cache_key();
        if use_cache {
            if let Some(payload) = self.cached(&key, d.cache_policy).await {
                rtrace!(id = d.id.as_str(), "cache hit");
                return Ok(Loaded {
                    payload,
                    origin: DataOrigin::Cache,
                });
            }
        }

        rdebug!(id = d.id.as_str(), block_type = d.block_type.as_str(), "load start");
        let policy = self.handler.retry_policy();
        let handler = &self.handler;
        let fetched = retry_with_backoff(
            &policy,
            cancel,
            |e| handler.strategy_for(e) == Strategy::Retry,
            |_attempt| {
                self.source
                    .load_block_payload(&d.id, d.block_type, &d.payload)
            },
        )
        .await;

        let err = match fetched {
            Ok(payload) => {
                let payload = payload.unwrap_or_else(|| d.payload.clone());
                match check.map_or(Ok(()), |c| c.check(&payload)) {
                    Ok(()) => {
                        self.store(&key, &payload, d.cache_policy).await;
                        return Ok(Loaded {
                            payload,
                            origin: DataOrigin::Source,
                        });
                    }
                    Err(e) => {
                        rwarn!(id = d.id.as_str(), "source returned data the block can't parse");
                        e
                    }
                }
            }
            Err(e) if cancel.is_cancelled() => {
                return Err(LoadFailure {
                    error: e,
                    handled: true,
                });
            }
            Err(e) => e,
        };
        let err = if err.block().is_none() {
            err.with_block(d)
        } else {
            err
        };

        let handled = self.handler.handle(&err);
        if err.is_recoverable() {
            if let Some(payload) = self.cached(&key, d.cache_policy).await {
                rwarn!(id = d.id.as_str(), code = err.code(), "serving cached data after failure");
                return Ok(Loaded {
                    payload,
                    origin: DataOrigin::Fallback,
                });
            }
        }
        Err(LoadFailure {
            error: err,
            handled,
        })
    }

    /// Drops cached data for blocks whose params changed.
    pub(crate) async fn invalidate(&self, keys: Vec<String>) {
        if keys.is_empty() {
            return;
        }
        let cache = Arc::clone(&self.cache);
        let forget = move || {
            for key in &keys {
                cache.invalidate(key);
            }
        };
        if self.cache.has_disk_tier() {
            if let Err(e) = tokio::task::spawn_blocking(forget).await {
                rwarn!(error = %e, "cache invalidate task failed");
            }
        } else {
            forget();
        }
    }

    async fn cached(&self, key: &str, policy: CachePolicy) -> Option<Payload> {
        if policy == CachePolicy::None {
            return None;
        }
        let value = if policy.uses_disk() && self.cache.has_disk_tier() {
            let cache = Arc::clone(&self.cache);
            let key = key.to_owned();
            match tokio::task::spawn_blocking(move || cache.get(&key, policy)).await {
                Ok(v) => v,
                Err(e) => {
                    rwarn!(error = %e, "cache read task failed");
                    None
                }
            }
        } else {
            self.cache.get(key, policy)
        };

        match value {
            Some(Value::Object(map)) => Some(map),
            Some(_) => {
                rwarn!(key, "ignoring non-object cache entry");
                None
            }
            None => None,
        }
    }

    async fn store(&self, key: &str, payload: &Payload, policy: CachePolicy) {
        if policy == CachePolicy::None {
            return;
        }
        let value = Value::Object(payload.clone());
        if policy.uses_disk() && self.cache.has_disk_tier() {
            let cache = Arc::clone(&self.cache);
            let key = key.to_owned();
            if let Err(e) = tokio::task::spawn_blocking(move || cache.put(&key, value, policy)).await
            {
                rwarn!(error = %e, "cache write task failed");
            }
        } else {
            self.cache.put(key, value, policy);
        }
    }
}
