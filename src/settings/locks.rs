use std::collections::HashMap;

/// Per-field edit locks. Console-local only; never sent to the backend.
///
/// The lock toggle shown next to a field is *checked when the field is
/// unlocked*. That inverted polarity is what operators are used to, so
/// [`LockMap::checked`] keeps it rather than mirroring `locked`.
#[derive(Debug, Clone, Default)]
pub struct LockMap {
    locked: HashMap<String, bool>,
}

impl LockMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flips the lock for `key` and returns the new locked state.
    pub fn toggle(&mut self, key: &str) -> bool {
        let entry = self.locked.entry(key.to_string()).or_insert(false);
        *entry = !*entry;
        *entry
    }

    pub fn is_locked(&self, key: &str) -> bool {
        self.locked.get(key).copied().unwrap_or(false)
    }

    /// State of the lock toggle widget: `!locked`.
    pub fn checked(&self, key: &str) -> bool {
        !self.is_locked(key)
    }

    pub fn locked_keys(&self) -> impl Iterator<Item = &str> {
        self.locked
            .iter()
            .filter(|(_, locked)| **locked)
            .map(|(key, _)| key.as_str())
    }

    pub fn clear(&mut self) {
        self.locked.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_keys_are_unlocked() {
        let locks = LockMap::new();
        assert!(!locks.is_locked("AI_COOLDOWN_SEC_OPEN"));
        assert!(locks.checked("AI_COOLDOWN_SEC_OPEN"));
    }

    #[test]
    fn test_toggle_polarity() {
        let mut locks = LockMap::new();

        assert!(locks.toggle("AI_COOLDOWN_SEC_OPEN"));
        assert!(locks.is_locked("AI_COOLDOWN_SEC_OPEN"));
        // Checked means unlocked.
        assert!(!locks.checked("AI_COOLDOWN_SEC_OPEN"));

        assert!(!locks.toggle("AI_COOLDOWN_SEC_OPEN"));
        assert!(locks.checked("AI_COOLDOWN_SEC_OPEN"));
        assert_eq!(locks.locked_keys().count(), 0);
    }

    #[test]
    fn test_clear() {
        let mut locks = LockMap::new();
        locks.toggle("A");
        locks.toggle("B");
        assert_eq!(locks.locked_keys().count(), 2);
        locks.clear();
        assert!(!locks.is_locked("A"));
    }
}
