use crate::Result;
use futures::future::BoxFuture;
use std::fmt;
use tracing::{info, warn};

/// Caller-supplied alternative source, tried once when the primary path is exhausted
pub type AlternativeFn<T> = Box<dyn FnOnce() -> BoxFuture<'static, Result<T>> + Send>;

/// What to return when an operation cannot succeed
pub enum FallbackStrategy<T> {
    /// A static default value
    Default(T),
    /// Try another source; use `value` if that fails too
    Alternative {
        operation: AlternativeFn<T>,
        value: T,
    },
    /// A previously cached (possibly stale) value
    Cached(T),
    /// An empty result of the expected shape
    Empty(T),
}

impl<T> FallbackStrategy<T> {
    /// Build an [`FallbackStrategy::Alternative`] from an async closure
    pub fn alternative<F, Fut>(operation: F, value: T) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<T>> + Send + 'static,
    {
        Self::Alternative {
            operation: Box::new(move || Box::pin(operation())),
            value,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Default(_) => "default",
            Self::Alternative { .. } => "alternative",
            Self::Cached(_) => "cached",
            Self::Empty(_) => "empty",
        }
    }

    /// Produce the fallback value
    pub async fn resolve(self, target: &str) -> T {
        match self {
            Self::Default(value) | Self::Empty(value) => value,
            Self::Cached(value) => {
                info!("Serving cached fallback for {}", target);
                value
            }
            Self::Alternative { operation, value } => match operation().await {
                Ok(result) => {
                    info!("Alternative fallback succeeded for {}", target);
                    result
                }
                Err(e) => {
                    warn!(
                        "Alternative fallback failed for {}, using static value: {}",
                        target, e
                    );
                    value
                }
            },
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for FallbackStrategy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default(value) => f.debug_tuple("Default").field(value).finish(),
            Self::Alternative { value, .. } => f
                .debug_struct("Alternative")
                .field("value", value)
                .finish_non_exhaustive(),
            Self::Cached(value) => f.debug_tuple("Cached").field(value).finish(),
            Self::Empty(value) => f.debug_tuple("Empty").field(value).finish(),
        }
    }
}
