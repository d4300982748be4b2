//! Shared data types for the session core.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Represents a group (folder) in the database tree.
#[derive(Debug, Clone)]
pub struct Group {
    pub uuid: Uuid,
    pub name: String,
    pub children: Vec<Group>,
    pub entries: Vec<Entry>,
    pub is_recycle_bin: bool,
}

/// Represents a password entry.
#[derive(Debug, Clone, Default)]
pub struct Entry {
    pub uuid: Uuid,
    pub title: String,
    pub username: String,
    pub password: String,
    pub url: String,
    pub notes: String,
}

/// A binary attachment of an entry.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub filename: String,
    pub data: Vec<u8>,
}

impl Entry {
    /// Value of one of the standard fields.
    pub fn field(&self, kind: FieldKind) -> &str {
        match kind {
            FieldKind::Title => &self.title,
            FieldKind::Username => &self.username,
            FieldKind::Password => &self.password,
            FieldKind::Url => &self.url,
            FieldKind::Notes => &self.notes,
        }
    }
}

/// The standard entry attributes a field reference can point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Title,
    Username,
    Password,
    Url,
    Notes,
}

impl FieldKind {
    /// Map a reference code letter (`T`, `U`, `P`, `A`, `N`) to a field.
    pub fn from_code(code: char) -> Option<Self> {
        match code.to_ascii_uppercase() {
            'T' => Some(Self::Title),
            'U' => Some(Self::Username),
            'P' => Some(Self::Password),
            'A' => Some(Self::Url),
            'N' => Some(Self::Notes),
            _ => None,
        }
    }

    /// Key of the field inside a KeePass entry.
    pub fn keepass_key(self) -> &'static str {
        match self {
            Self::Title => "Title",
            Self::Username => "UserName",
            Self::Password => "Password",
            Self::Url => "URL",
            Self::Notes => "Notes",
        }
    }
}

/// Non-owning reference to a node of the database tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementRef {
    Group(Uuid),
    Entry(Uuid),
}

impl ElementRef {
    pub fn uuid(&self) -> Uuid {
        match self {
            Self::Group(uuid) | Self::Entry(uuid) => *uuid,
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self, Self::Group(_))
    }
}

/// One row of a group listing.
#[derive(Debug, Clone, PartialEq)]
pub struct ElementSummary {
    pub reference: ElementRef,
    pub name: String,
    pub is_recycle_bin: bool,
}

/// Ordering applied when listing a group's children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortOrder {
    #[default]
    #[serde(rename = "A-Z")]
    Ascending,
    #[serde(rename = "Z-A")]
    Descending,
    #[serde(rename = "unsorted")]
    Unsorted,
}

impl SortOrder {
    /// Sort summaries in place. Groups always precede entries.
    pub fn apply(self, items: &mut [ElementSummary]) {
        match self {
            Self::Unsorted => items.sort_by_key(|item| !item.reference.is_group()),
            Self::Ascending => items.sort_by(|a, b| {
                (!a.reference.is_group(), a.name.to_lowercase())
                    .cmp(&(!b.reference.is_group(), b.name.to_lowercase()))
            }),
            Self::Descending => items.sort_by(|a, b| {
                (!a.reference.is_group())
                    .cmp(&!b.reference.is_group())
                    .then_with(|| b.name.to_lowercase().cmp(&a.name.to_lowercase()))
            }),
        }
    }
}

/// A search result.
#[derive(Debug, Clone)]
pub struct SearchHit {
    /// The matched entry.
    pub entry: Entry,
    /// Path to the entry (for display).
    pub path: String,
    /// Match score for sorting.
    pub score: i64,
}
