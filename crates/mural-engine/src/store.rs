use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use anyhow::{Result, bail};

use mural_db::Database;

/// Record families, one keyspace each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Canvas,
    Chat,
    Users,
}

impl Namespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Canvas => "canvas",
            Self::Chat => "chat",
            Self::Users => "users",
        }
    }
}

/// Namespaced key/value backend holding opaque blobs.
///
/// Each call is a single request/response; timeouts and retries are the
/// backend's business.
pub trait RecordStore: Send + Sync {
    fn get(&self, ns: Namespace, key: &str) -> Result<Option<Vec<u8>>>;

    fn put(&self, ns: Namespace, key: &str, value: &[u8]) -> Result<()>;

    fn delete(&self, ns: Namespace, key: &str) -> Result<()>;

    /// Keys starting with `prefix`, in key order.
    fn list(&self, ns: Namespace, prefix: &str) -> Result<Vec<String>>;

    /// Keys and values starting with `prefix`, in key order.
    fn scan(&self, ns: Namespace, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let mut out = Vec::new();
        for key in self.list(ns, prefix)? {
            // Deleted between list and get.
            if let Some(value) = self.get(ns, &key)? {
                out.push((key, value));
            }
        }
        Ok(out)
    }

    /// Returns the number of deleted keys.
    fn delete_prefix(&self, ns: Namespace, prefix: &str) -> Result<usize> {
        let keys = self.list(ns, prefix)?;
        for key in &keys {
            self.delete(ns, key)?;
        }
        Ok(keys.len())
    }
}

impl<T: RecordStore + ?Sized> RecordStore for Arc<T> {
    fn get(&self, ns: Namespace, key: &str) -> Result<Option<Vec<u8>>> {
        (**self).get(ns, key)
    }

    fn put(&self, ns: Namespace, key: &str, value: &[u8]) -> Result<()> {
        (**self).put(ns, key, value)
    }

    fn delete(&self, ns: Namespace, key: &str) -> Result<()> {
        (**self).delete(ns, key)
    }

    fn list(&self, ns: Namespace, prefix: &str) -> Result<Vec<String>> {
        (**self).list(ns, prefix)
    }

    fn scan(&self, ns: Namespace, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        (**self).scan(ns, prefix)
    }

    fn delete_prefix(&self, ns: Namespace, prefix: &str) -> Result<usize> {
        (**self).delete_prefix(ns, prefix)
    }
}

impl RecordStore for Database {
    fn get(&self, ns: Namespace, key: &str) -> Result<Option<Vec<u8>>> {
        self.get_record(ns.as_str(), key)
    }

    fn put(&self, ns: Namespace, key: &str, value: &[u8]) -> Result<()> {
        self.put_record(ns.as_str(), key, value)
    }

    fn delete(&self, ns: Namespace, key: &str) -> Result<()> {
        self.delete_record(ns.as_str(), key)
    }

    fn list(&self, ns: Namespace, prefix: &str) -> Result<Vec<String>> {
        self.list_keys(ns.as_str(), prefix)
    }

    fn scan(&self, ns: Namespace, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let rows = self.scan_records(ns.as_str(), prefix)?;
        Ok(rows.into_iter().map(|row| (row.key, row.value)).collect())
    }

    fn delete_prefix(&self, ns: Namespace, prefix: &str) -> Result<usize> {
        Database::delete_prefix(self, ns.as_str(), prefix)
    }
}

/// In-process store. Reads and writes can be made to fail on demand so that
/// degraded paths can be exercised.
#[derive(Debug, Default)]
pub struct MemoryStore {
    spaces: RwLock<HashMap<Namespace, BTreeMap<String, Vec<u8>>>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of records in a namespace.
    pub fn len(&self, ns: Namespace) -> usize {
        self.spaces
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&ns)
            .map_or(0, BTreeMap::len)
    }

    fn check_read(&self) -> Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            bail!("memory store: reads disabled");
        }
        Ok(())
    }

    fn check_write(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("memory store: writes disabled");
        }
        Ok(())
    }
}

impl RecordStore for MemoryStore {
    fn get(&self, ns: Namespace, key: &str) -> Result<Option<Vec<u8>>> {
        self.check_read()?;
        let spaces = self.spaces.read().unwrap_or_else(|e| e.into_inner());
        Ok(spaces.get(&ns).and_then(|space| space.get(key)).cloned())
    }

    fn put(&self, ns: Namespace, key: &str, value: &[u8]) -> Result<()> {
        self.check_write()?;
        let mut spaces = self.spaces.write().unwrap_or_else(|e| e.into_inner());
        spaces.entry(ns).or_default().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, ns: Namespace, key: &str) -> Result<()> {
        self.check_write()?;
        let mut spaces = self.spaces.write().unwrap_or_else(|e| e.into_inner());
        if let Some(space) = spaces.get_mut(&ns) {
            space.remove(key);
        }
        Ok(())
    }

    fn list(&self, ns: Namespace, prefix: &str) -> Result<Vec<String>> {
        self.check_read()?;
        let spaces = self.spaces.read().unwrap_or_else(|e| e.into_inner());
        Ok(spaces
            .get(&ns)
            .map(|space| {
                space
                    .range(prefix.to_string()..)
                    .take_while(|(k, _)| k.starts_with(prefix))
                    .map(|(k, _)| k.clone())
                    .collect()
            })
            .unwrap_or_default())
    }
}
