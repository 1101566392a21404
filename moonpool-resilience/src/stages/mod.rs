//! Resilience techniques and dependency models built on [`Stage`](crate::Stage).

mod adaptive;
mod aside_cache;
mod cache;
mod circuit_breaker;
mod dependency;
mod lru;
mod retry;
mod timeout;

pub use adaptive::{AdaptiveCircuitBreaker, AdaptiveConfig};
pub use aside_cache::AsideCache;
pub use cache::{Cache, CacheEntry, CacheStore, UnboundedStore};
pub use circuit_breaker::{BreakerState, CircuitBreaker, CircuitBreakerConfig};
pub use dependency::{
    AvailableDependency, AvailableDependencyConfig, TimedDependency, TimedDependencyConfig,
};
pub use lru::{LruCache, LruConfig, LruStore};
pub use retry::{Retry, RetryConfig};
pub use timeout::{Timeout, TimeoutConfig};
