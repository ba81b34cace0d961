//! In-process storage area.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::area::StorageArea;
use crate::errors::{Result, StorageError};

/// Hash-map backed area. The explicit no-durability choice, and the backing
/// for session-scoped state that should die with the process.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: Mutex<HashMap<String, String>>,
    quota_bytes: Option<usize>,
}

impl MemoryStorage {
    /// Unbounded area.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Area rejecting writes once keys plus values would exceed
    /// `quota_bytes`.
    #[must_use]
    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            items: Mutex::new(HashMap::new()),
            quota_bytes: Some(quota_bytes),
        }
    }
}

impl StorageArea for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        Ok(self.items.lock().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let mut items = self.items.lock();
        if let Some(quota) = self.quota_bytes {
            let projected: usize = items
                .iter()
                .filter(|(resident, _)| resident.as_str() != key)
                .map(|(resident, item)| resident.len() + item.len())
                .sum::<usize>()
                + key.len()
                + value.len();
            if projected > quota {
                return Err(StorageError::QuotaExceeded {
                    key: key.to_owned(),
                    detail: format!("{projected} of {quota} bytes"),
                });
            }
        }
        let _ = items.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        let _ = self.items.lock().remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.items.lock().keys().cloned().collect())
    }

    fn len(&self) -> Result<usize> {
        Ok(self.items.lock().len())
    }
}
