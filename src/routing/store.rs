//! Holder of the active route table.
//!
//! Single writer (the reconciler), any number of readers. Readers get an
//! `Arc<Table>` they can keep for as long as a request needs it; a concurrent
//! `set` only supersedes the table, it never mutates it.

use arc_swap::ArcSwap;
use std::sync::Arc;

use crate::routing::table::Table;

#[derive(Debug)]
pub struct TableStore {
    current: ArcSwap<Table>,
}

impl TableStore {
    pub fn new(table: Table) -> Self {
        Self {
            current: ArcSwap::from_pointee(table),
        }
    }

    /// Current table. Lock-free.
    pub fn get(&self) -> Arc<Table> {
        self.current.load_full()
    }

    /// Publish a fully built table and return the one it replaced.
    pub fn set(&self, table: Table) -> Arc<Table> {
        self.current.swap(Arc::new(table))
    }
}

impl Default for TableStore {
    fn default() -> Self {
        Self::new(Table::empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::parse;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn set_returns_previous() {
        let store = TableStore::default();
        let first = store.get().version();
        let replaced = store.set(parse("route add a /a http://10.0.0.1:80").unwrap());
        assert_eq!(replaced.version(), first);
        assert_eq!(store.get().len(), 1);
    }

    #[test]
    fn readers_see_old_or_new_table() {
        let old = parse("route add a /a http://10.0.0.1:80").unwrap();
        let new = parse("route add b /b http://10.0.0.2:80\nroute add c /c http://10.0.0.3:80").unwrap();
        let (old_version, new_version) = (old.version(), new.version());

        let store = Arc::new(TableStore::new(old));
        let done = Arc::new(AtomicBool::new(false));

        let readers: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                let done = done.clone();
                std::thread::spawn(move || {
                    let mut seen = 0u64;
                    while !done.load(Ordering::Acquire) || seen == 0 {
                        let table = store.get();
                        let version = table.version();
                        assert!(version == old_version || version == new_version);
                        // A table is never half built.
                        if version == old_version {
                            assert_eq!(table.len(), 1);
                        } else {
                            assert_eq!(table.len(), 2);
                        }
                        seen += 1;
                    }
                    seen
                })
            })
            .collect();

        std::thread::sleep(std::time::Duration::from_millis(5));
        store.set(new);
        std::thread::sleep(std::time::Duration::from_millis(5));
        done.store(true, Ordering::Release);

        for reader in readers {
            assert!(reader.join().unwrap() > 0);
        }
        assert_eq!(store.get().version(), new_version);
    }
}
