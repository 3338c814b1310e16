//! Cached records and their staleness windows.

/// Absolute expiry plus the grace windows that follow it.
///
/// All values are in seconds. `expires_at == 0` marks an immortal record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Lifetime {
    /// Unix timestamp in seconds after which the record is expired.
    pub expires_at: u64,
    /// Seconds past expiry during which the stale value is served while a
    /// refresh runs.
    pub swr_window: u64,
    /// Seconds past expiry during which the stale value is served when a
    /// refresh fails or cannot run.
    pub stale_if_error_window: u64,
}

/// Freshness of a record at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Staleness {
    pub expired: bool,
    pub within_swr: bool,
    pub within_stale_if_error: bool,
}

impl Staleness {
    /// True when the value may be handed to a caller that accepts stale data.
    pub fn is_servable_stale(&self) -> bool {
        self.within_swr || self.within_stale_if_error
    }
}

impl Lifetime {
    /// A record that never expires.
    pub fn immortal() -> Self {
        Lifetime::default()
    }

    /// A record expiring `ttl` seconds after `now`, with the given windows.
    pub fn expiring(now: u64, ttl: u64, swr_window: u64, stale_if_error_window: u64) -> Self {
        Lifetime {
            expires_at: now.saturating_add(ttl),
            swr_window,
            stale_if_error_window,
        }
    }

    pub fn is_immortal(&self) -> bool {
        self.expires_at == 0
    }

    /// Classify freshness at `now`.
    pub fn classify(&self, now: u64) -> Staleness {
        let expired = self.expires_at > 0 && self.expires_at < now;
        let within_swr = expired
            && self.swr_window > 0
            && now < self.expires_at.saturating_add(self.swr_window);
        let within_stale_if_error = expired
            && self.stale_if_error_window > 0
            && now < self.expires_at.saturating_add(self.stale_if_error_window);

        Staleness {
            expired,
            within_swr,
            within_stale_if_error,
        }
    }

    /// TTL handed to storage tiers so the bytes outlive both grace windows.
    ///
    /// Zero only for immortal records, otherwise at least one second.
    pub fn visible_ttl(&self, now: u64) -> u64 {
        if self.is_immortal() {
            return 0;
        }
        let grace = self.swr_window.max(self.stale_if_error_window);
        self.expires_at
            .saturating_add(grace)
            .saturating_sub(now)
            .max(1)
    }
}

/// A decoded record whose value is still in serialized form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub value: Vec<u8>,
    pub lifetime: Lifetime,
    pub serializer_tag: String,
}

/// A decoded record carrying a typed value.
#[derive(Debug, Clone, PartialEq)]
pub struct Record<V> {
    pub value: V,
    pub lifetime: Lifetime,
    pub serializer_tag: String,
}
