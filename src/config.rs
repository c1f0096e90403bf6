use fieldx::fxstruct;
use std::time::Duration;

use crate::error::Result;
use crate::error::StoreError;
use crate::sanitize::INLINE_IMAGE_LIMIT;
use crate::sanitize::MAX_SANITIZE_DEPTH;

/// Tunables of a [`Store`](crate::Store).
///
/// ```ignore
/// let config = StoreConfig::builder()
///     .debounce_interval(Duration::from_millis(500))
///     .keys(["clients", "rates", "chat_history"])
///     .build()?;
/// ```
#[derive(Debug, Clone)]
#[fxstruct(no_new, builder, get)]
pub struct StoreConfig {
    /// How long a key must stay quiet before its pending value is written out.
    #[fieldx(get(copy), default(Duration::from_millis(300)))]
    debounce_interval: Duration,

    /// Nesting depth the sanitizer walks into.
    #[fieldx(get(copy), default(MAX_SANITIZE_DEPTH))]
    sanitize_depth: usize,

    /// Embedded images longer than this many characters are dropped by the sanitizer.
    #[fieldx(get(copy), default(INLINE_IMAGE_LIMIT))]
    inline_image_limit: usize,

    /// Every key the application persists. Legacy migration only looks at these.
    #[fieldx(default(Vec::new()))]
    key_space: Vec<String>,
}

impl StoreConfig {
    pub fn defaults() -> Result<Self> {
        Self::builder().build().map_err(|e| StoreError::Config(e.to_string()))
    }
}

impl StoreConfigBuilder {
    pub fn keys<S: ToString>(self, keys: impl IntoIterator<Item = S>) -> Self {
        self.key_space(keys.into_iter().map(|k| k.to_string()).collect())
    }

    pub fn try_build(mut self) -> Result<StoreConfig> {
        self.build().map_err(|e| StoreError::Config(e.to_string()))
    }
}
