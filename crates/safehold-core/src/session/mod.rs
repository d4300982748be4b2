//! The unlocked-database session.
//!
//! A [`Session`] is owned by a single event loop. Background work (saves,
//! searches, attachment writes, timer sleeps) never touches session fields;
//! it posts a [`SessionEvent`] that the loop feeds back into
//! [`Session::handle_event`]. Timer and autosave events carry a generation so
//! that an event queued before a cancellation is recognised as stale.
//!
//! Everything user-visible leaves the session either through the watch
//! receivers (`locked`, `search_active`, `selection_mode`, `position`) or as a
//! [`SessionUpdate`] on the updates queue.

pub mod autosave;
pub mod clipboard;
pub mod idle;
pub mod lock_timer;
pub mod property;
pub mod tempfiles;
pub mod timer;

use crate::error::{Error, Result};
use crate::manager::DatabaseManager;
use crate::models::{ElementRef, ElementSummary, SearchHit, SortOrder};
use crate::settings::SessionSettings;
use autosave::{AutosaveLoop, AutosaveOutcome};
use chrono::{DateTime, Local};
use clipboard::{Clipboard, ClipboardCoordinator};
use idle::IdleSource;
use lock_timer::LockTimer;
use property::Property;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfiles::TempFiles;
use timer::TimerKind;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

pub const MSG_LOCKED_INACTIVITY: &str = "Safe locked due to inactivity";
pub const MSG_SAVED: &str = "Safe saved";
pub const MSG_SAVE_FAILED: &str = "Could not save Safe";
pub const MSG_SAVE_RUNNING: &str = "Please wait. Another save is running.";
pub const MSG_NO_CHANGES: &str = "No changes made";
pub const MSG_COPIED: &str = "Copied to clipboard";
pub const MSG_COPY_FAILED: &str = "Could not copy to clipboard";
pub const MSG_LOCKED_UNSAVED: &str = "Safe locked with unsaved changes";

/// Messages posted to the session's event loop.
#[derive(Debug)]
pub enum SessionEvent {
    TimerFired { kind: TimerKind, generation: u64 },
    AutosaveTick { generation: u64 },
    SaveFinished { outcome: SaveOutcome, notify: bool },
    SearchFinished { generation: u64, hits: Vec<SearchHit> },
    AttachmentWritten { result: std::result::Result<PathBuf, String> },
    ScreenSaverActive(bool),
}

/// Result of a background save.
#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    Saved,
    /// Another save was already running; nothing was written.
    Skipped,
    Failed(String),
}

pub type EventSender = mpsc::UnboundedSender<SessionEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<SessionEvent>;

/// Output for the frontend.
#[derive(Debug, Clone)]
pub enum SessionUpdate {
    /// Transient user notification.
    Notify(String),
    /// The listing of this group must be rebuilt.
    Refresh(ElementRef),
    SearchResults(Vec<SearchHit>),
    /// An attachment was written to this path for an external viewer.
    AttachmentReady(PathBuf),
}

/// Receiving ends handed to the owner of the event loop.
pub struct SessionChannels {
    pub events: EventReceiver,
    pub updates: mpsc::UnboundedReceiver<SessionUpdate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockedView {
    Browsing,
    Searching,
    Selecting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unlocked(UnlockedView),
    Locked,
    Destroyed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockReason {
    Requested,
    Inactivity,
}

/// Controller for one open database.
pub struct Session<D: DatabaseManager, C: Clipboard> {
    db: Arc<D>,
    settings: SessionSettings,
    sort_order: SortOrder,
    events: EventSender,
    updates: mpsc::UnboundedSender<SessionUpdate>,
    lock_timer: LockTimer,
    clipboard: ClipboardCoordinator<C>,
    autosave: AutosaveLoop,
    idle: Box<dyn IdleSource>,
    idle_subscribed: bool,
    temp_files: TempFiles,
    search_generation: u64,
    destroyed: bool,
    last_saved: Option<DateTime<Local>>,
    locked: Property<bool>,
    search_active: Property<bool>,
    selection_mode: Property<bool>,
    position: Property<ElementRef>,
}

impl<D: DatabaseManager, C: Clipboard> Session<D, C> {
    /// Open a session on an unlocked database, positioned at the root group.
    ///
    /// Starts the autosave loop, arms the lock timer and subscribes to the
    /// idle source. Must be called from within a tokio runtime.
    pub fn new(
        db: Arc<D>,
        clipboard: C,
        idle: Box<dyn IdleSource>,
        settings: SessionSettings,
    ) -> (Self, SessionChannels) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();

        db.set_locked(false);
        let root = db.root_group();

        let mut session = Self {
            sort_order: settings.sort_order,
            lock_timer: LockTimer::new(settings.lock_timeout()),
            clipboard: ClipboardCoordinator::new(clipboard, settings.clipboard_clear_delay()),
            settings,
            db,
            events: events_tx,
            updates: updates_tx,
            autosave: AutosaveLoop::new(),
            idle,
            idle_subscribed: false,
            temp_files: TempFiles::new(),
            search_generation: 0,
            destroyed: false,
            last_saved: None,
            locked: Property::new(false),
            search_active: Property::new(false),
            selection_mode: Property::new(false),
            position: Property::new(root),
        };
        session.start_activity_tracking();
        tracing::info!("Session opened");

        (
            session,
            SessionChannels {
                events: events_rx,
                updates: updates_rx,
            },
        )
    }

    pub fn database(&self) -> &Arc<D> {
        &self.db
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    pub fn state(&self) -> SessionState {
        if self.destroyed {
            SessionState::Destroyed
        } else if self.locked.get() {
            SessionState::Locked
        } else if self.selection_mode.get() {
            SessionState::Unlocked(UnlockedView::Selecting)
        } else if self.search_active.get() {
            SessionState::Unlocked(UnlockedView::Searching)
        } else {
            SessionState::Unlocked(UnlockedView::Browsing)
        }
    }

    pub fn is_locked(&self) -> bool {
        self.locked.get()
    }

    pub fn is_search_active(&self) -> bool {
        self.search_active.get()
    }

    pub fn is_selection_mode(&self) -> bool {
        self.selection_mode.get()
    }

    pub fn position(&self) -> ElementRef {
        self.position.get()
    }

    pub fn sort_order(&self) -> SortOrder {
        self.sort_order
    }

    pub fn lock_deadline(&self) -> Option<Instant> {
        self.lock_timer.deadline()
    }

    pub fn clipboard_clear_deadline(&self) -> Option<Instant> {
        self.clipboard.clear_deadline()
    }

    pub fn is_autosave_running(&self) -> bool {
        self.autosave.is_running()
    }

    pub fn last_saved(&self) -> Option<DateTime<Local>> {
        self.last_saved
    }

    pub fn scheduled_temp_files(&self) -> usize {
        self.temp_files.len()
    }

    pub fn locked_changed(&self) -> watch::Receiver<bool> {
        self.locked.subscribe()
    }

    pub fn search_active_changed(&self) -> watch::Receiver<bool> {
        self.search_active.subscribe()
    }

    pub fn selection_mode_changed(&self) -> watch::Receiver<bool> {
        self.selection_mode.subscribe()
    }

    pub fn position_changed(&self) -> watch::Receiver<ElementRef> {
        self.position.subscribe()
    }

    fn ensure_unlocked(&self) -> Result<()> {
        if self.destroyed {
            Err(Error::Destroyed)
        } else if self.locked.get() {
            Err(Error::Locked)
        } else {
            Ok(())
        }
    }

    fn notify(&self, message: impl Into<String>) {
        let _ = self.updates.send(SessionUpdate::Notify(message.into()));
    }

    fn refresh(&self, group: ElementRef) {
        let _ = self.updates.send(SessionUpdate::Refresh(group));
    }

    /// The group shown for the current position: itself, or an entry's parent.
    fn current_group(&self) -> ElementRef {
        let position = self.position.get();
        if position.is_group() {
            position
        } else {
            self.db
                .parent_of(&position)
                .unwrap_or_else(|| self.db.root_group())
        }
    }

    //
    // Activity and locking
    //

    /// Report a user interaction: restarts the lock countdown.
    ///
    /// Ignored while locked or destroyed.
    pub fn touch_activity(&mut self) {
        if self.ensure_unlocked().is_ok() {
            self.lock_timer.touch(&self.events);
        }
    }

    fn start_activity_tracking(&mut self) {
        self.autosave.start(&self.events);
        self.lock_timer.touch(&self.events);
        match self.idle.subscribe(self.events.clone()) {
            Ok(()) => self.idle_subscribed = true,
            Err(e) => tracing::warn!("Failed to subscribe to screensaver signal: {:#}", e),
        }
    }

    fn unsubscribe_idle(&mut self) {
        if !self.idle_subscribed {
            return;
        }
        self.idle_subscribed = false;
        if let Err(e) = self.idle.unsubscribe() {
            tracing::warn!("Failed to unsubscribe from screensaver signal: {:#}", e);
        }
    }

    /// Cancel every timer and background loop. Runs before any teardown.
    fn stop_timers(&mut self) {
        self.lock_timer.disable();
        self.autosave.stop();
        self.search_generation = self.search_generation.wrapping_add(1);
    }

    /// Lock the database on the user's request.
    pub fn request_lock(&mut self) -> Result<()> {
        if self.destroyed {
            return Err(Error::Destroyed);
        }
        if !self.locked.get() {
            self.lock(LockReason::Requested);
        }
        Ok(())
    }

    fn lock(&mut self, reason: LockReason) {
        tracing::info!(?reason, "Locking session");

        self.stop_timers();
        self.clipboard.clear();
        self.unsubscribe_idle();

        let removed = self.temp_files.delete_all();
        if removed > 0 {
            tracing::debug!("Deleted {} temporary files", removed);
        }

        self.db.set_locked(true);
        self.locked.set(true);

        // Not awaited: the save finishes in the background and its result
        // still arrives as a SaveFinished event.
        if self.db.is_dirty() {
            if !self.settings.save_automatically {
                self.notify(MSG_LOCKED_UNSAVED);
            } else if !self.db.is_saving() {
                self.start_save(true);
            }
        }

        if reason == LockReason::Inactivity {
            self.notify(MSG_LOCKED_INACTIVITY);
        }
    }

    /// Unlock with `password` and return to browsing at the same position.
    pub fn request_unlock(&mut self, password: &str) -> Result<()> {
        if self.destroyed {
            return Err(Error::Destroyed);
        }
        if !self.locked.get() {
            return Ok(());
        }

        self.db.unlock(password)?;

        if !self.db.contains(&self.position.get()) {
            self.position.set(self.db.root_group());
        }
        self.search_active.set(false);
        self.selection_mode.set(false);
        self.locked.set(false);
        self.start_activity_tracking();
        self.refresh(self.current_group());

        tracing::info!("Session unlocked");
        Ok(())
    }

    /// Tear the session down. Irreversible; later calls fail with
    /// [`Error::Destroyed`].
    pub fn shutdown(&mut self) {
        if self.destroyed {
            return;
        }
        tracing::info!("Shutting down session");

        self.stop_timers();
        self.clipboard.clear();
        self.unsubscribe_idle();
        self.temp_files.delete_all();
        self.destroyed = true;
    }

    //
    // View modes
    //

    pub fn set_search_active(&mut self, active: bool) -> Result<()> {
        self.ensure_unlocked()?;
        self.touch_activity();

        if self.search_active.set(active) {
            self.search_generation = self.search_generation.wrapping_add(1);
            if !active {
                self.refresh(self.current_group());
            }
        }
        Ok(())
    }

    pub fn set_selection_mode(&mut self, active: bool) -> Result<()> {
        self.ensure_unlocked()?;
        self.touch_activity();
        self.selection_mode.set(active);
        Ok(())
    }

    /// Change the listing order and rebuild the visible listing.
    pub fn set_sort_order(&mut self, order: SortOrder) -> Result<()> {
        self.ensure_unlocked()?;
        self.touch_activity();
        if self.sort_order != order {
            self.sort_order = order;
            self.refresh(self.current_group());
        }
        Ok(())
    }

    //
    // Navigation
    //

    /// Show a group or entry. Leaves search mode.
    pub fn navigate_to(&mut self, element: ElementRef) -> Result<()> {
        self.ensure_unlocked()?;
        self.touch_activity();

        if !self.db.contains(&element) {
            return Err(Error::NotFound(element.uuid()));
        }
        if self.search_active.set(false) {
            self.search_generation = self.search_generation.wrapping_add(1);
        }
        self.position.set(element);
        Ok(())
    }

    /// Step back: leave selection mode, else search, else go to the parent.
    pub fn go_back(&mut self) -> Result<()> {
        self.ensure_unlocked()?;
        self.touch_activity();

        if self.selection_mode.get() {
            self.selection_mode.set(false);
            return Ok(());
        }
        if self.search_active.get() {
            return self.set_search_active(false);
        }

        let position = self.position.get();
        if position == self.db.root_group() {
            return Ok(());
        }
        let parent = self
            .db
            .parent_of(&position)
            .unwrap_or_else(|| self.db.root_group());
        self.position.set(parent);
        Ok(())
    }

    /// Children of the displayed group in the session's sort order.
    pub fn list_current(&self) -> Result<Vec<ElementSummary>> {
        self.ensure_unlocked()?;
        let group = self.current_group();
        let mut items = self.db.list_children(&group.uuid())?;
        self.sort_order.apply(&mut items);
        Ok(items)
    }

    /// Add an empty entry to the displayed group and show it.
    pub fn add_entry(&mut self) -> Result<ElementRef> {
        self.ensure_unlocked()?;
        self.touch_activity();

        let parent = self.current_group();
        let entry = self.db.add_entry(&parent.uuid())?;
        self.position.set(entry);
        Ok(entry)
    }

    /// Add a group below the displayed group and show it.
    pub fn add_group(&mut self, name: &str) -> Result<ElementRef> {
        self.ensure_unlocked()?;
        self.touch_activity();

        let parent = self.current_group();
        let group = self.db.add_group(&parent.uuid(), name)?;
        self.position.set(group);
        Ok(group)
    }

    /// Delete the displayed element and show its parent.
    pub fn delete_current(&mut self) -> Result<ElementRef> {
        self.ensure_unlocked()?;
        self.touch_activity();

        let current = self.position.get();
        if current == self.db.root_group() {
            return Err(Error::RootGroup);
        }
        let parent = self
            .db
            .parent_of(&current)
            .ok_or(Error::NotFound(current.uuid()))?;

        self.db.delete(&current)?;
        tracing::info!("Deleted {:?}", current);

        self.position.set(parent);
        self.refresh(parent);
        Ok(parent)
    }

    /// Duplicate the displayed entry and show its parent group.
    pub fn duplicate_current(&mut self) -> Result<ElementRef> {
        self.ensure_unlocked()?;
        self.touch_activity();

        let current = self.position.get();
        let ElementRef::Entry(uuid) = current else {
            return Err(Error::NotAnEntry(current.uuid()));
        };
        let parent = self.db.parent_of(&current).ok_or(Error::NotFound(uuid))?;
        let copy = self.db.duplicate_entry(&uuid)?;

        self.position.set(parent);
        self.refresh(parent);
        Ok(copy)
    }

    //
    // Clipboard
    //

    /// Copy `text` with field references resolved, then notify `message`.
    ///
    /// A clipboard backend failure is reported as a notification.
    pub fn copy_to_clipboard(&mut self, text: &str, message: &str) -> Result<()> {
        self.ensure_unlocked()?;
        self.touch_activity();

        match self.clipboard.copy(text, self.db.as_ref(), &self.events) {
            Ok(()) => self.notify(message),
            Err(e) => {
                tracing::warn!("Failed to copy to clipboard: {:#}", e);
                self.notify(MSG_COPY_FAILED);
            }
        }
        Ok(())
    }

    /// Blank the clipboard now. Idempotent.
    pub fn clear_clipboard(&mut self) {
        self.clipboard.clear();
    }

    //
    // Saving
    //

    /// Save requested by the user.
    pub fn save_safe(&mut self) -> Result<()> {
        self.ensure_unlocked()?;
        self.touch_activity();

        if !self.db.is_dirty() {
            self.notify(MSG_NO_CHANGES);
        } else if self.db.is_saving() {
            self.notify(MSG_SAVE_RUNNING);
        } else {
            self.start_save(true);
        }
        Ok(())
    }

    /// Save pending changes before the process exits.
    ///
    /// A save already running is waited for, handling events from `events`
    /// meanwhile, and the database is saved again if it is still dirty
    /// afterwards. Also runs while locked.
    pub async fn save_pending(&mut self, events: &mut EventReceiver) -> Result<()> {
        if self.destroyed {
            return Err(Error::Destroyed);
        }

        while self.db.is_dirty() {
            let db = Arc::clone(&self.db);
            let result = tokio::task::spawn_blocking(move || db.save())
                .await
                .map_err(|e| Error::Database(anyhow::anyhow!("save task failed: {}", e)))?;

            match result {
                Ok(()) => {
                    self.last_saved = Some(Local::now());
                    tracing::info!("Saved pending changes");
                }
                Err(Error::SaveInProgress) => {
                    tracing::debug!("Waiting for the running save to finish");
                    loop {
                        let Some(event) = events.recv().await else {
                            return Err(Error::Destroyed);
                        };
                        let finished = matches!(event, SessionEvent::SaveFinished { .. });
                        self.handle_event(event);
                        if finished {
                            break;
                        }
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// One autosave check. Called for each tick of the autosave loop.
    pub fn autosave_tick(&mut self) -> AutosaveOutcome {
        if self.ensure_unlocked().is_err() {
            return AutosaveOutcome::Inactive;
        }
        if !self.settings.save_automatically {
            return AutosaveOutcome::Disabled;
        }
        if !self.db.is_dirty() {
            return AutosaveOutcome::Clean;
        }
        if self.db.is_saving() {
            return AutosaveOutcome::AlreadySaving;
        }
        self.start_save(false);
        AutosaveOutcome::Started
    }

    fn start_save(&self, notify: bool) {
        let db = Arc::clone(&self.db);
        let events = self.events.clone();

        tracing::debug!("Starting background save");
        tokio::task::spawn_blocking(move || {
            let outcome = match db.save() {
                Ok(()) => SaveOutcome::Saved,
                Err(Error::SaveInProgress) => SaveOutcome::Skipped,
                Err(e) => SaveOutcome::Failed(e.to_string()),
            };
            let _ = events.send(SessionEvent::SaveFinished { outcome, notify });
        });
    }

    //
    // Search and attachments
    //

    /// Search entries below the displayed group. Enters search mode.
    ///
    /// Results arrive as [`SessionUpdate::SearchResults`]; a newer query or
    /// leaving search discards results still in flight.
    pub fn search(&mut self, query: &str) -> Result<()> {
        self.ensure_unlocked()?;
        if !self.search_active.get() {
            self.set_search_active(true)?;
        } else {
            self.touch_activity();
        }

        self.search_generation = self.search_generation.wrapping_add(1);
        let generation = self.search_generation;

        if query.trim().is_empty() {
            let _ = self.updates.send(SessionUpdate::SearchResults(Vec::new()));
            return Ok(());
        }

        let db = Arc::clone(&self.db);
        let events = self.events.clone();
        let scope = self.current_group().uuid();
        let query = query.to_string();
        tokio::task::spawn_blocking(move || {
            let hits = db.search(&query, &scope);
            let _ = events.send(SessionEvent::SearchFinished { generation, hits });
        });
        Ok(())
    }

    /// Attachment names of the displayed entry.
    pub fn attachments(&self) -> Result<Vec<String>> {
        self.ensure_unlocked()?;
        match self.position.get() {
            ElementRef::Entry(uuid) => Ok(self.db.attachment_names(&uuid)),
            ElementRef::Group(uuid) => Err(Error::NotAnEntry(uuid)),
        }
    }

    /// Write an attachment of the displayed entry to a temporary file for an
    /// external viewer. The path arrives as [`SessionUpdate::AttachmentReady`].
    pub fn open_attachment(&mut self, filename: &str) -> Result<()> {
        self.ensure_unlocked()?;
        self.touch_activity();

        let current = self.position.get();
        let ElementRef::Entry(uuid) = current else {
            return Err(Error::NotAnEntry(current.uuid()));
        };
        let attachment = self
            .db
            .attachment(&uuid, filename)
            .ok_or_else(|| Error::AttachmentNotFound(filename.to_string()))?;

        let events = self.events.clone();
        tokio::task::spawn_blocking(move || {
            let result = tempfiles::write_attachment(&attachment.filename, &attachment.data)
                .map_err(|e| format!("{:#}", e));
            let _ = events.send(SessionEvent::AttachmentWritten { result });
        });
        Ok(())
    }

    //
    // Event loop
    //

    /// Apply one event from the queue.
    pub fn handle_event(&mut self, event: SessionEvent) {
        if self.destroyed {
            if let SessionEvent::AttachmentWritten { result: Ok(path) } = event {
                remove_orphan(&path);
            } else {
                tracing::debug!("Dropping event after shutdown: {:?}", event);
            }
            return;
        }

        match event {
            SessionEvent::TimerFired {
                kind: TimerKind::Lock,
                generation,
            } => {
                if self.lock_timer.expire(generation) && !self.locked.get() {
                    self.lock(LockReason::Inactivity);
                }
            }
            SessionEvent::TimerFired {
                kind: TimerKind::ClipboardClear,
                generation,
            } => {
                self.clipboard.on_timer(generation);
            }
            SessionEvent::AutosaveTick { generation } => {
                if self.autosave.accepts(generation) {
                    let outcome = self.autosave_tick();
                    tracing::trace!(?outcome, "Autosave tick");
                }
            }
            SessionEvent::SaveFinished { outcome, notify } => match outcome {
                SaveOutcome::Saved => {
                    self.last_saved = Some(Local::now());
                    if notify {
                        self.notify(MSG_SAVED);
                    }
                }
                SaveOutcome::Skipped => {
                    tracing::debug!("Save skipped, another save was running");
                }
                SaveOutcome::Failed(e) => {
                    tracing::error!("Failed to save database: {}", e);
                    self.notify(MSG_SAVE_FAILED);
                }
            },
            SessionEvent::SearchFinished { generation, hits } => {
                if generation == self.search_generation
                    && self.search_active.get()
                    && !self.locked.get()
                {
                    let _ = self.updates.send(SessionUpdate::SearchResults(hits));
                } else {
                    tracing::debug!(generation, "Discarding stale search results");
                }
            }
            SessionEvent::AttachmentWritten { result } => match result {
                Ok(path) if self.locked.get() => remove_orphan(&path),
                Ok(path) => {
                    self.temp_files.schedule(path.clone());
                    let _ = self.updates.send(SessionUpdate::AttachmentReady(path));
                }
                Err(e) => {
                    tracing::error!("Failed to write attachment: {}", e);
                    self.notify("Could not open attachment");
                }
            },
            SessionEvent::ScreenSaverActive(active) => {
                if active && !self.locked.get() {
                    self.lock(LockReason::Inactivity);
                }
            }
        }
    }

    /// Process events until `deadline`.
    pub async fn run_until(&mut self, events: &mut EventReceiver, deadline: Instant) {
        let sleep = tokio::time::sleep_until(deadline);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => break,
                },
                _ = &mut sleep => break,
            }
        }
    }

    /// Process events for `duration` from now.
    pub async fn run_for(&mut self, events: &mut EventReceiver, duration: Duration) {
        self.run_until(events, Instant::now() + duration).await;
    }
}

impl<D: DatabaseManager, C: Clipboard> Drop for Session<D, C> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn remove_orphan(path: &std::path::Path) {
    if let Err(e) = std::fs::remove_file(path) {
        tracing::warn!("Skipping deletion of tmpfile {}: {}", path.display(), e);
    }
}
