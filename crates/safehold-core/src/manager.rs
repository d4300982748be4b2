//! The database manager the session talks to.
//!
//! The session never holds the tree itself; it keeps [`ElementRef`]s and asks
//! the manager whenever it needs to look something up. Implementations must
//! be shareable with the worker threads that run saves and searches.

use crate::database::KeepassDatabase;
use crate::error::{Error, Result};
use crate::models::{Attachment, ElementRef, ElementSummary, FieldKind, SearchHit};
use crate::search;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};
use uuid::Uuid;

/// Operations the session needs from the open database.
pub trait DatabaseManager: Send + Sync + 'static {
    /// Whether there are unsaved in-memory modifications.
    fn is_dirty(&self) -> bool;

    /// Whether a save is currently running.
    fn is_saving(&self) -> bool;

    /// Persist the database. Blocks until written.
    ///
    /// Returns [`Error::SaveInProgress`] without touching the file when
    /// another save is already running.
    fn save(&self) -> Result<()>;

    fn is_locked(&self) -> bool;

    fn set_locked(&self, locked: bool);

    /// Clear the locked flag if `password` opens this database.
    fn unlock(&self, password: &str) -> Result<()>;

    /// Value of an entry attribute, `None` if the entry or field is missing.
    fn lookup_entry_attribute(&self, entry: &Uuid, kind: FieldKind) -> Option<String>;

    /// Names of an entry's attachments, empty for unknown entries.
    fn attachment_names(&self, entry: &Uuid) -> Vec<String>;

    fn attachment(&self, entry: &Uuid, filename: &str) -> Option<Attachment>;

    fn root_group(&self) -> ElementRef;

    /// Resolve a UUID to a group or entry reference.
    fn element(&self, uuid: &Uuid) -> Option<ElementRef>;

    fn parent_of(&self, element: &ElementRef) -> Option<ElementRef>;

    fn list_children(&self, group: &Uuid) -> Result<Vec<ElementSummary>>;

    fn add_entry(&self, parent: &Uuid) -> Result<ElementRef>;

    fn add_group(&self, parent: &Uuid, name: &str) -> Result<ElementRef>;

    fn duplicate_entry(&self, entry: &Uuid) -> Result<ElementRef>;

    fn delete(&self, element: &ElementRef) -> Result<()>;

    /// Fuzzy search for entries below `scope`.
    fn search(&self, query: &str, scope: &Uuid) -> Vec<SearchHit>;

    fn contains(&self, element: &ElementRef) -> bool {
        self.element(&element.uuid()) == Some(*element)
    }
}

/// Thread-safe [`DatabaseManager`] over a [`KeepassDatabase`].
pub struct KeepassManager {
    db: RwLock<KeepassDatabase>,
    dirty: AtomicBool,
    locked: AtomicBool,
    save_running: Mutex<bool>,
}

/// Clears the in-flight flag when the save ends, even on error.
struct SaveGuard<'a>(&'a Mutex<bool>);

impl Drop for SaveGuard<'_> {
    fn drop(&mut self) {
        *self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = false;
    }
}

impl KeepassManager {
    pub fn new(db: KeepassDatabase) -> Self {
        Self {
            db: RwLock::new(db),
            dirty: AtomicBool::new(false),
            locked: AtomicBool::new(false),
            save_running: Mutex::new(false),
        }
    }

    /// Open and unlock the database at `path`.
    pub fn open(path: impl AsRef<Path>, password: &str) -> Result<Self> {
        Ok(Self::new(KeepassDatabase::unlock(path, password)?))
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, KeepassDatabase> {
        self.db.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, KeepassDatabase> {
        self.db.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }

    fn begin_save(&self) -> Result<SaveGuard<'_>> {
        let mut running = self
            .save_running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if *running {
            return Err(Error::SaveInProgress);
        }
        *running = true;
        Ok(SaveGuard(&self.save_running))
    }
}

impl DatabaseManager for KeepassManager {
    fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    fn is_saving(&self) -> bool {
        *self
            .save_running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn save(&self) -> Result<()> {
        let _guard = self.begin_save()?;

        // The snapshot is taken and dirty cleared under the same read lock,
        // so an edit either lands in the snapshot or marks the database
        // dirty again. Encryption runs on the snapshot without the lock.
        let snapshot = {
            let db = self.read();
            self.dirty.store(false, Ordering::SeqCst);
            db.snapshot()
        };
        if let Err(e) = snapshot.save() {
            self.mark_dirty();
            tracing::error!("Failed to save database: {:#}", e);
            return Err(e.into());
        }

        tracing::info!("Database saved to {}", snapshot.path().display());
        Ok(())
    }

    fn is_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }

    fn set_locked(&self, locked: bool) {
        self.locked.store(locked, Ordering::SeqCst);
    }

    fn unlock(&self, password: &str) -> Result<()> {
        if !self.read().verify_password(password) {
            return Err(Error::InvalidCredentials);
        }
        self.set_locked(false);
        Ok(())
    }

    fn lookup_entry_attribute(&self, entry: &Uuid, kind: FieldKind) -> Option<String> {
        self.read().entry_field(entry, kind)
    }

    fn attachment_names(&self, entry: &Uuid) -> Vec<String> {
        self.read().attachment_names(entry)
    }

    fn attachment(&self, entry: &Uuid, filename: &str) -> Option<Attachment> {
        self.read().attachment(entry, filename)
    }

    fn root_group(&self) -> ElementRef {
        ElementRef::Group(self.read().root_uuid())
    }

    fn element(&self, uuid: &Uuid) -> Option<ElementRef> {
        self.read().element(uuid)
    }

    fn parent_of(&self, element: &ElementRef) -> Option<ElementRef> {
        self.read().parent_of(&element.uuid()).map(ElementRef::Group)
    }

    fn list_children(&self, group: &Uuid) -> Result<Vec<ElementSummary>> {
        self.read().children(group).ok_or(Error::NotFound(*group))
    }

    fn add_entry(&self, parent: &Uuid) -> Result<ElementRef> {
        let uuid = self.write().add_entry(parent)?;
        self.mark_dirty();
        Ok(ElementRef::Entry(uuid))
    }

    fn add_group(&self, parent: &Uuid, name: &str) -> Result<ElementRef> {
        let uuid = self.write().add_group(parent, name)?;
        self.mark_dirty();
        Ok(ElementRef::Group(uuid))
    }

    fn duplicate_entry(&self, entry: &Uuid) -> Result<ElementRef> {
        let uuid = self.write().duplicate_entry(entry)?;
        self.mark_dirty();
        Ok(ElementRef::Entry(uuid))
    }

    fn delete(&self, element: &ElementRef) -> Result<()> {
        let uuid = element.uuid();
        let mut db = self.write();
        if db.root_uuid() == uuid {
            return Err(Error::RootGroup);
        }
        if db.element(&uuid).is_none() {
            return Err(Error::NotFound(uuid));
        }
        db.remove(&uuid)?;
        drop(db);
        self.mark_dirty();
        Ok(())
    }

    fn search(&self, query: &str, scope: &Uuid) -> Vec<SearchHit> {
        match self.read().find_group(scope) {
            Some(group) => search::search_group(&group, query),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    fn manager(dir: &tempfile::TempDir) -> KeepassManager {
        let db = keepass::Database::new(keepass::config::DatabaseConfig::default());
        KeepassManager::new(KeepassDatabase::from_database(
            db,
            dir.path().join("m.kdbx"),
            "pw",
        ))
    }

    fn poison(flag: &Mutex<bool>) {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _running = flag.lock();
            panic!("save thread panicked");
        }));
        assert!(flag.is_poisoned());
    }

    #[test]
    fn save_guard_resets_a_poisoned_flag() {
        let flag = Mutex::new(true);
        poison(&flag);

        drop(SaveGuard(&flag));
        assert!(!*flag.lock().unwrap_or_else(|poisoned| poisoned.into_inner()));
    }

    #[test]
    fn saves_still_run_after_a_panicked_save() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(&dir);
        poison(&manager.save_running);

        assert!(!manager.is_saving());
        manager.save().unwrap();
        assert!(!manager.is_saving());
        assert!(dir.path().join("m.kdbx").exists());
    }

    #[test]
    fn second_save_is_rejected_while_one_runs() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(&dir);

        let guard = manager.begin_save().unwrap();
        assert!(manager.is_saving());
        assert!(matches!(manager.save(), Err(Error::SaveInProgress)));
        drop(guard);
        assert!(!manager.is_saving());
    }
}
