//! The storage area trait and key-space vocabulary.

use crate::errors::{Result, StorageError};

/// Prefix of every key the pipeline writes.
pub const SCHEME_PREFIX: &str = "courier:";

/// Prefix of internal records (session state, lock leases). Restore
/// enumeration skips these.
pub const RESERVED_PREFIX: &str = "courier:__";

/// A blocking string key-value store.
///
/// Persistence and the page lock write through this seam. Implementations
/// must be safe to share across threads; calls are short and infrequent, so
/// a mutex-guarded backend is fine.
pub trait StorageArea: Send + Sync {
    /// Value under `key`, if any.
    fn get_item(&self, key: &str) -> Result<Option<String>>;

    /// Write `value` under `key`, replacing any existing value.
    fn set_item(&self, key: &str, value: &str) -> Result<()>;

    /// Drop `key`. Absent keys are not an error.
    fn remove_item(&self, key: &str) -> Result<()>;

    /// Every key currently present, in no particular order.
    fn keys(&self) -> Result<Vec<String>>;

    /// Number of keys present.
    fn len(&self) -> Result<usize> {
        Ok(self.keys()?.len())
    }
}

/// Write `value` under `key`, enriching a quota rejection with a usage dump.
///
/// On quota failure the returned error's detail lists every resident key
/// with its value length, so the report shows what crowded the write out.
pub fn set_item_guarded(area: &dyn StorageArea, key: &str, value: &str) -> Result<()> {
    match area.set_item(key, value) {
        Err(StorageError::QuotaExceeded { key, .. }) => {
            let mut usage = Vec::new();
            for resident in area.keys().unwrap_or_default() {
                let length = area
                    .get_item(&resident)
                    .ok()
                    .flatten()
                    .map_or(0, |item| item.len());
                usage.push(format!("{resident}({length})"));
            }
            Err(StorageError::QuotaExceeded {
                key,
                detail: usage.join(","),
            })
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::memory::MemoryStorage;

    #[test]
    fn guarded_set_reports_resident_usage_on_quota() {
        let area = MemoryStorage::with_quota(16);
        area.set_item("a", "12345").unwrap();

        let err = set_item_guarded(&area, "b", "123456789012345").unwrap_err();
        assert_matches!(
            err,
            StorageError::QuotaExceeded { key, detail } => {
                assert_eq!(key, "b");
                assert_eq!(detail, "a(5)");
            }
        );
    }

    #[test]
    fn guarded_set_passes_successful_writes_through() {
        let area = MemoryStorage::new();
        set_item_guarded(&area, "a", "1").unwrap();
        assert_eq!(area.get_item("a").unwrap(), Some("1".into()));
    }
}
