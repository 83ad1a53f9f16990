use std::time::Duration;

/// Tunables of the chat core. Defaults match the production app.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// How long a typing flag stays set without further input before it
    /// is cleared on the writer's behalf.
    pub typing_debounce: Duration,

    /// Capacity of the profile LRU cache. Ids watched by a live batch
    /// subscription are never evicted regardless of capacity.
    pub profile_cache_capacity: usize,

    /// Maximum rows returned by directory listings and searches.
    pub directory_limit: usize,

    /// Minimum query length for prefix search; shorter queries resolve
    /// to a fixed empty result.
    pub search_min_len: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            typing_debounce: Duration::from_secs(3),
            profile_cache_capacity: 200,
            directory_limit: 50,
            search_min_len: 2,
        }
    }
}
