//! Session core for the safehold KeePass client.
//!
//! This crate owns everything between the frontend and the KeePass file:
//! the database manager, field reference resolution, search, and the
//! [`Session`] that coordinates auto-lock, autosave and the clipboard.

pub mod database;
pub mod error;
pub mod manager;
pub mod models;
pub mod reference;
pub mod search;
pub mod session;
pub mod settings;

pub use database::KeepassDatabase;
pub use error::{Error, Result};
pub use manager::{DatabaseManager, KeepassManager};
pub use models::{
    Attachment, ElementRef, ElementSummary, Entry, FieldKind, Group, SearchHit, SortOrder,
};
pub use session::clipboard::{Clipboard, MemoryClipboard};
pub use session::idle::{IdleSource, ManualIdleSource, NoIdleSource};
pub use session::{
    Session, SessionChannels, SessionEvent, SessionState, SessionUpdate, UnlockedView,
};
pub use settings::SessionSettings;
