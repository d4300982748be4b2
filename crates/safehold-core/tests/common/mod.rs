//! In-memory database manager shared by the integration tests.

#![allow(dead_code)]

use safehold_core::error::{Error, Result};
use safehold_core::search;
use safehold_core::session::{EventReceiver, SessionEvent};
use safehold_core::{
    Attachment, DatabaseManager, ElementRef, ElementSummary, Entry, FieldKind, Group,
    ManualIdleSource, MemoryClipboard, SearchHit, Session, SessionChannels, SessionSettings,
    SessionUpdate,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex, RwLock};
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

pub const PASSWORD: &str = "correct horse";

/// Blocks the next save until released.
struct SaveGate {
    started: mpsc::Sender<()>,
    release: mpsc::Receiver<()>,
}

pub struct MemoryDatabase {
    root: RwLock<Group>,
    dirty: AtomicBool,
    locked: AtomicBool,
    saving: Mutex<bool>,
    saves: AtomicUsize,
    fail_saves: AtomicBool,
    gate: Mutex<Option<SaveGate>>,
    attachments: Mutex<BTreeMap<(Uuid, String), Vec<u8>>>,
}

/// A small tree: `Root { Mail, Work { GitLab } }`.
pub struct Sample {
    pub db: MemoryDatabase,
    pub root: Uuid,
    pub work: Uuid,
    pub mail: Uuid,
    pub gitlab: Uuid,
}

pub fn entry(title: &str, username: &str, password: &str) -> Entry {
    Entry {
        uuid: Uuid::new_v4(),
        title: title.to_string(),
        username: username.to_string(),
        password: password.to_string(),
        url: format!("https://{}.example", title.to_lowercase()),
        ..Entry::default()
    }
}

pub fn group(name: &str, entries: Vec<Entry>, children: Vec<Group>) -> Group {
    Group {
        uuid: Uuid::new_v4(),
        name: name.to_string(),
        children,
        entries,
        is_recycle_bin: false,
    }
}

pub fn sample() -> Sample {
    let gitlab = entry("GitLab", "dev", "hunter2");
    let mail = entry("Mail", "me@example.com", "s3cret");
    let work = group("Work", vec![gitlab.clone()], vec![]);
    let root = group("Root", vec![mail.clone()], vec![work.clone()]);

    Sample {
        root: root.uuid,
        work: work.uuid,
        mail: mail.uuid,
        gitlab: gitlab.uuid,
        db: MemoryDatabase::new(root),
    }
}

pub type TestSession = Session<MemoryDatabase, MemoryClipboard>;

/// Handles a test keeps next to its session.
pub struct Harness {
    pub session: TestSession,
    pub channels: SessionChannels,
    pub clipboard: MemoryClipboard,
    pub idle: ManualIdleSource,
}

pub fn settings(lock_minutes: u32, clear_seconds: u32) -> SessionSettings {
    SessionSettings {
        lock_timeout_minutes: lock_minutes,
        clear_clipboard_seconds: clear_seconds,
        ..SessionSettings::default()
    }
}

pub fn open(db: MemoryDatabase, settings: SessionSettings) -> Harness {
    let clipboard = MemoryClipboard::new();
    let idle = ManualIdleSource::new();
    let (session, channels) = Session::new(
        Arc::new(db),
        clipboard.clone(),
        Box::new(idle.clone()),
        settings,
    );
    Harness {
        session,
        channels,
        clipboard,
        idle,
    }
}

/// Everything currently queued on the updates channel.
pub fn drain(updates: &mut UnboundedReceiver<SessionUpdate>) -> Vec<SessionUpdate> {
    let mut out = Vec::new();
    while let Ok(update) = updates.try_recv() {
        out.push(update);
    }
    out
}

pub fn notifications(updates: &mut UnboundedReceiver<SessionUpdate>) -> Vec<String> {
    drain(updates)
        .into_iter()
        .filter_map(|update| match update {
            SessionUpdate::Notify(message) => Some(message),
            _ => None,
        })
        .collect()
}

/// Feed events to the session until one matching `done` has been handled.
pub async fn handle_until(
    session: &mut TestSession,
    events: &mut EventReceiver,
    done: impl Fn(&SessionEvent) -> bool,
) {
    loop {
        let event = events.recv().await.expect("event channel closed");
        let finished = done(&event);
        session.handle_event(event);
        if finished {
            return;
        }
    }
}

pub async fn wait_for_save(session: &mut TestSession, events: &mut EventReceiver) {
    handle_until(session, events, |event| {
        matches!(event, SessionEvent::SaveFinished { .. })
    })
    .await;
}

impl MemoryDatabase {
    pub fn new(root: Group) -> Self {
        Self {
            root: RwLock::new(root),
            dirty: AtomicBool::new(false),
            locked: AtomicBool::new(false),
            saving: Mutex::new(false),
            saves: AtomicUsize::new(0),
            fail_saves: AtomicBool::new(false),
            gate: Mutex::new(None),
            attachments: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn set_dirty(&self, dirty: bool) {
        self.dirty.store(dirty, Ordering::SeqCst);
    }

    /// Pretend a save is running (or not) without starting one.
    pub fn set_saving(&self, saving: bool) {
        *self.saving.lock().unwrap() = saving;
    }

    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Make the next save block. Returns (save started, release save).
    pub fn hold_next_save(&self) -> (mpsc::Receiver<()>, mpsc::Sender<()>) {
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        *self.gate.lock().unwrap() = Some(SaveGate {
            started: started_tx,
            release: release_rx,
        });
        (started_rx, release_tx)
    }

    pub fn add_attachment(&self, entry: &Uuid, filename: &str, data: &[u8]) {
        self.attachments
            .lock()
            .unwrap()
            .insert((*entry, filename.to_string()), data.to_vec());
    }

    pub fn set_entry_notes(&self, uuid: &Uuid, notes: &str) {
        let mut root = self.root.write().unwrap();
        if let Some(entry) = find_entry_mut(&mut root, uuid) {
            entry.notes = notes.to_string();
        }
    }
}

fn find_group<'a>(group: &'a Group, uuid: &Uuid) -> Option<&'a Group> {
    if group.uuid == *uuid {
        return Some(group);
    }
    group.children.iter().find_map(|g| find_group(g, uuid))
}

fn find_group_mut<'a>(group: &'a mut Group, uuid: &Uuid) -> Option<&'a mut Group> {
    if group.uuid == *uuid {
        return Some(group);
    }
    group.children.iter_mut().find_map(|g| find_group_mut(g, uuid))
}

fn find_entry<'a>(group: &'a Group, uuid: &Uuid) -> Option<&'a Entry> {
    group
        .entries
        .iter()
        .find(|e| e.uuid == *uuid)
        .or_else(|| group.children.iter().find_map(|g| find_entry(g, uuid)))
}

fn find_entry_mut<'a>(group: &'a mut Group, uuid: &Uuid) -> Option<&'a mut Entry> {
    if let Some(index) = group.entries.iter().position(|e| e.uuid == *uuid) {
        return group.entries.get_mut(index);
    }
    group.children.iter_mut().find_map(|g| find_entry_mut(g, uuid))
}

fn parent_of(group: &Group, uuid: &Uuid) -> Option<Uuid> {
    if group.entries.iter().any(|e| e.uuid == *uuid) || group.children.iter().any(|g| g.uuid == *uuid) {
        return Some(group.uuid);
    }
    group.children.iter().find_map(|g| parent_of(g, uuid))
}

fn remove(group: &mut Group, uuid: &Uuid) -> bool {
    let before = group.entries.len() + group.children.len();
    group.entries.retain(|e| e.uuid != *uuid);
    group.children.retain(|g| g.uuid != *uuid);
    if group.entries.len() + group.children.len() != before {
        return true;
    }
    group.children.iter_mut().any(|g| remove(g, uuid))
}

impl DatabaseManager for MemoryDatabase {
    fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    fn is_saving(&self) -> bool {
        *self.saving.lock().unwrap()
    }

    fn save(&self) -> Result<()> {
        {
            let mut saving = self.saving.lock().unwrap();
            if *saving {
                return Err(Error::SaveInProgress);
            }
            *saving = true;
        }

        // Cleared before writing so edits made while the save is held keep
        // the database dirty.
        self.dirty.store(false, Ordering::SeqCst);
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            let _ = gate.started.send(());
            let _ = gate.release.recv();
        }

        let result = if self.fail_saves.load(Ordering::SeqCst) {
            self.dirty.store(true, Ordering::SeqCst);
            Err(Error::Database(anyhow::anyhow!("disk full")))
        } else {
            self.saves.fetch_add(1, Ordering::SeqCst);
            Ok(())
        };

        *self.saving.lock().unwrap() = false;
        result
    }

    fn is_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }

    fn set_locked(&self, locked: bool) {
        self.locked.store(locked, Ordering::SeqCst);
    }

    fn unlock(&self, password: &str) -> Result<()> {
        if password != PASSWORD {
            return Err(Error::InvalidCredentials);
        }
        self.set_locked(false);
        Ok(())
    }

    fn lookup_entry_attribute(&self, entry: &Uuid, kind: FieldKind) -> Option<String> {
        let root = self.root.read().unwrap();
        let entry = find_entry(&root, entry)?;
        let value = entry.field(kind);
        // Notes count as absent when empty, like a KeePass entry without the field.
        if kind == FieldKind::Notes && value.is_empty() {
            return None;
        }
        Some(value.to_string())
    }

    fn attachment_names(&self, entry: &Uuid) -> Vec<String> {
        self.attachments
            .lock()
            .unwrap()
            .keys()
            .filter(|(owner, _)| owner == entry)
            .map(|(_, name)| name.clone())
            .collect()
    }

    fn attachment(&self, entry: &Uuid, filename: &str) -> Option<Attachment> {
        let attachments = self.attachments.lock().unwrap();
        let data = attachments.get(&(*entry, filename.to_string()))?;
        Some(Attachment {
            filename: filename.to_string(),
            data: data.clone(),
        })
    }

    fn root_group(&self) -> ElementRef {
        ElementRef::Group(self.root.read().unwrap().uuid)
    }

    fn element(&self, uuid: &Uuid) -> Option<ElementRef> {
        let root = self.root.read().unwrap();
        if find_group(&root, uuid).is_some() {
            Some(ElementRef::Group(*uuid))
        } else if find_entry(&root, uuid).is_some() {
            Some(ElementRef::Entry(*uuid))
        } else {
            None
        }
    }

    fn parent_of(&self, element: &ElementRef) -> Option<ElementRef> {
        parent_of(&self.root.read().unwrap(), &element.uuid()).map(ElementRef::Group)
    }

    fn list_children(&self, group: &Uuid) -> Result<Vec<ElementSummary>> {
        let root = self.root.read().unwrap();
        let group = find_group(&root, group).ok_or(Error::NotFound(*group))?;
        let groups = group.children.iter().map(|g| ElementSummary {
            reference: ElementRef::Group(g.uuid),
            name: g.name.clone(),
            is_recycle_bin: g.is_recycle_bin,
        });
        let entries = group.entries.iter().map(|e| ElementSummary {
            reference: ElementRef::Entry(e.uuid),
            name: e.title.clone(),
            is_recycle_bin: false,
        });
        Ok(groups.chain(entries).collect())
    }

    fn add_entry(&self, parent: &Uuid) -> Result<ElementRef> {
        let mut root = self.root.write().unwrap();
        let group = find_group_mut(&mut root, parent).ok_or(Error::NotFound(*parent))?;
        let entry = entry("", "", "");
        let uuid = entry.uuid;
        group.entries.push(entry);
        self.set_dirty(true);
        Ok(ElementRef::Entry(uuid))
    }

    fn add_group(&self, parent: &Uuid, name: &str) -> Result<ElementRef> {
        let mut root = self.root.write().unwrap();
        let parent_group = find_group_mut(&mut root, parent).ok_or(Error::NotFound(*parent))?;
        let child = group(name, vec![], vec![]);
        let uuid = child.uuid;
        parent_group.children.push(child);
        self.set_dirty(true);
        Ok(ElementRef::Group(uuid))
    }

    fn duplicate_entry(&self, uuid: &Uuid) -> Result<ElementRef> {
        let mut root = self.root.write().unwrap();
        let parent = parent_of(&root, uuid).ok_or(Error::NotFound(*uuid))?;
        let mut copy = find_entry(&root, uuid).ok_or(Error::NotFound(*uuid))?.clone();
        copy.uuid = Uuid::new_v4();
        copy.title = format!("{} - Copy", copy.title);
        let new_uuid = copy.uuid;
        find_group_mut(&mut root, &parent)
            .ok_or(Error::NotFound(parent))?
            .entries
            .push(copy);
        self.set_dirty(true);
        Ok(ElementRef::Entry(new_uuid))
    }

    fn delete(&self, element: &ElementRef) -> Result<()> {
        let mut root = self.root.write().unwrap();
        if root.uuid == element.uuid() {
            return Err(Error::RootGroup);
        }
        if !remove(&mut root, &element.uuid()) {
            return Err(Error::NotFound(element.uuid()));
        }
        self.set_dirty(true);
        Ok(())
    }

    fn search(&self, query: &str, scope: &Uuid) -> Vec<SearchHit> {
        let root = self.root.read().unwrap();
        match find_group(&root, scope) {
            Some(group) => search::search_group(group, query),
            None => Vec::new(),
        }
    }
}
