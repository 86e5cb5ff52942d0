use tokio::time::Instant;

/// Keystore entry
///
/// A value with an optional expiry deadline. The keystore never returns an
/// entry whose deadline has passed; the periodic sweep only claims the memory
/// back.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    pub fn new(value: String, expires_at: Option<Instant>) -> Self {
        Self { value, expires_at }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// If this returns FALSE the callee must behave as if the key was not
    /// found.
    pub fn is_valid(&self) -> bool {
        self.expires_at.map_or(true, |deadline| deadline > Instant::now())
    }
}
