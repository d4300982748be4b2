//! KeePass database operations wrapper.

use crate::models::{Attachment, ElementRef, ElementSummary, Entry, FieldKind, Group};
use anyhow::{Context, Result};
use keepass::db::{Node, Value};
use keepass::{Database, DatabaseKey};
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Wrapper around the KeePass database for easier operations.
#[derive(Clone)]
pub struct KeepassDatabase {
    db: Database,
    path: PathBuf,
    password: String,
}

impl KeepassDatabase {
    /// Open and unlock a KeePass database.
    pub fn unlock(path: impl AsRef<Path>, password: &str) -> Result<Self> {
        let path = path.as_ref();

        let key = DatabaseKey::new().with_password(password);

        let mut file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open database file: {}", path.display()))?;
        let db = Database::open(&mut file, key)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        Ok(Self::from_database(db, path, password))
    }

    /// Wrap an already decrypted database that will be saved to `path`.
    pub fn from_database(db: Database, path: impl AsRef<Path>, password: &str) -> Self {
        Self {
            db,
            path: path.as_ref().to_path_buf(),
            password: password.to_string(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check a password against the one the database was unlocked with.
    pub fn verify_password(&self, password: &str) -> bool {
        self.password == password
    }

    /// Independent copy of the current tree, to be saved without holding
    /// on to the live database.
    pub fn snapshot(&self) -> Self {
        self.clone()
    }

    pub fn root_uuid(&self) -> Uuid {
        self.db.root.uuid
    }

    /// Convert a keepass group to our Group model.
    fn convert_group(&self, kg: &keepass::db::Group) -> Group {
        let recycle_bin = self.db.meta.recyclebin_uuid;
        Group {
            uuid: kg.uuid,
            name: kg.name.clone(),
            children: kg
                .children
                .iter()
                .filter_map(|node| match node {
                    Node::Group(g) => Some(self.convert_group(g)),
                    Node::Entry(_) => None,
                })
                .collect(),
            entries: kg
                .children
                .iter()
                .filter_map(|node| match node {
                    Node::Entry(e) => Some(convert_entry(e)),
                    Node::Group(_) => None,
                })
                .collect(),
            is_recycle_bin: recycle_bin == Some(kg.uuid),
        }
    }

    /// Find a group by UUID and convert it.
    pub fn find_group(&self, uuid: &Uuid) -> Option<Group> {
        find_group(&self.db.root, uuid).map(|g| self.convert_group(g))
    }

    /// Read a single standard attribute of an entry.
    ///
    /// Returns `None` when the entry does not exist or does not carry the field.
    pub fn entry_field(&self, uuid: &Uuid, kind: FieldKind) -> Option<String> {
        find_entry(&self.db.root, uuid)?
            .get(kind.keepass_key())
            .map(str::to_string)
    }

    /// Names of the binary fields of an entry, sorted.
    pub fn attachment_names(&self, uuid: &Uuid) -> Vec<String> {
        let Some(entry) = find_entry(&self.db.root, uuid) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entry
            .fields
            .iter()
            .filter(|(_, value)| matches!(value, Value::Bytes(_)))
            .map(|(key, _)| key.clone())
            .collect();
        names.sort();
        names
    }

    pub fn attachment(&self, uuid: &Uuid, filename: &str) -> Option<Attachment> {
        let data = find_entry(&self.db.root, uuid)?.get_bytes(filename)?;
        Some(Attachment {
            filename: filename.to_string(),
            data: data.to_vec(),
        })
    }

    /// Classify a UUID as group or entry.
    pub fn element(&self, uuid: &Uuid) -> Option<ElementRef> {
        if find_group(&self.db.root, uuid).is_some() {
            Some(ElementRef::Group(*uuid))
        } else if find_entry(&self.db.root, uuid).is_some() {
            Some(ElementRef::Entry(*uuid))
        } else {
            None
        }
    }

    /// UUID of the group containing `uuid`. The root group has no parent.
    pub fn parent_of(&self, uuid: &Uuid) -> Option<Uuid> {
        parent_of(&self.db.root, uuid)
    }

    /// Children of a group, in database order.
    pub fn children(&self, group: &Uuid) -> Option<Vec<ElementSummary>> {
        let recycle_bin = self.db.meta.recyclebin_uuid;
        let group = find_group(&self.db.root, group)?;
        Some(
            group
                .children
                .iter()
                .map(|node| match node {
                    Node::Group(g) => ElementSummary {
                        reference: ElementRef::Group(g.uuid),
                        name: g.name.clone(),
                        is_recycle_bin: recycle_bin == Some(g.uuid),
                    },
                    Node::Entry(e) => ElementSummary {
                        reference: ElementRef::Entry(e.uuid),
                        name: e.get_title().unwrap_or_default().to_string(),
                        is_recycle_bin: false,
                    },
                })
                .collect(),
        )
    }

    /// Add an empty entry to a group and return its UUID.
    pub fn add_entry(&mut self, parent: &Uuid) -> Result<Uuid> {
        let group = find_group_mut(&mut self.db.root, parent)
            .with_context(|| format!("Group with UUID {} not found", parent))?;

        let mut entry = keepass::db::Entry::new();
        entry
            .fields
            .insert("Title".to_string(), Value::Unprotected(String::new()));
        let uuid = entry.uuid;
        group.children.push(Node::Entry(entry));
        Ok(uuid)
    }

    /// Add a group below `parent` and return its UUID.
    pub fn add_group(&mut self, parent: &Uuid, name: &str) -> Result<Uuid> {
        let group = find_group_mut(&mut self.db.root, parent)
            .with_context(|| format!("Group with UUID {} not found", parent))?;

        let child = keepass::db::Group::new(name);
        let uuid = child.uuid;
        group.children.push(Node::Group(child));
        Ok(uuid)
    }

    /// Duplicate an entry next to the original and return the copy's UUID.
    pub fn duplicate_entry(&mut self, uuid: &Uuid) -> Result<Uuid> {
        let parent = self
            .parent_of(uuid)
            .with_context(|| format!("Entry with UUID {} not found", uuid))?;
        let mut copy = find_entry(&self.db.root, uuid)
            .with_context(|| format!("Entry with UUID {} not found", uuid))?
            .clone();

        copy.uuid = Uuid::new_v4();
        let title = format!("{} - Copy", copy.get_title().unwrap_or_default());
        copy.fields
            .insert("Title".to_string(), Value::Unprotected(title));
        let new_uuid = copy.uuid;

        let group = find_group_mut(&mut self.db.root, &parent)
            .with_context(|| format!("Group with UUID {} not found", parent))?;
        group.children.push(Node::Entry(copy));
        Ok(new_uuid)
    }

    /// Remove a group or entry from the tree.
    pub fn remove(&mut self, uuid: &Uuid) -> Result<()> {
        if self.db.root.uuid == *uuid {
            anyhow::bail!("The root group cannot be removed");
        }
        if remove_node(&mut self.db.root, uuid) {
            Ok(())
        } else {
            anyhow::bail!("Element with UUID {} not found", uuid)
        }
    }

    /// Save the database to disk.
    ///
    /// The database is written to a temporary file next to the target and
    /// renamed over it, so a failed write never truncates the existing file.
    pub fn save(&self) -> Result<()> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let mut file = tempfile::NamedTempFile::new_in(dir)
            .with_context(|| format!("Failed to create temporary file in {}", dir.display()))?;

        let key = DatabaseKey::new().with_password(&self.password);
        self.db
            .save(&mut file, key)
            .with_context(|| "Failed to save database")?;
        file.flush().context("Failed to flush database file")?;

        file.persist(&self.path)
            .with_context(|| format!("Failed to write database file: {}", self.path.display()))?;

        Ok(())
    }
}

/// Convert a keepass entry to our Entry model.
fn convert_entry(ke: &keepass::db::Entry) -> Entry {
    Entry {
        uuid: ke.uuid,
        title: ke.get_title().unwrap_or_default().to_string(),
        username: ke.get_username().unwrap_or_default().to_string(),
        password: ke.get_password().unwrap_or_default().to_string(),
        url: ke.get_url().unwrap_or_default().to_string(),
        notes: ke.get("Notes").unwrap_or_default().to_string(),
    }
}

fn find_group<'a>(group: &'a keepass::db::Group, uuid: &Uuid) -> Option<&'a keepass::db::Group> {
    if group.uuid == *uuid {
        return Some(group);
    }
    group.children.iter().find_map(|node| match node {
        Node::Group(g) => find_group(g, uuid),
        Node::Entry(_) => None,
    })
}

fn find_group_mut<'a>(
    group: &'a mut keepass::db::Group,
    uuid: &Uuid,
) -> Option<&'a mut keepass::db::Group> {
    if group.uuid == *uuid {
        return Some(group);
    }
    for node in group.children.iter_mut() {
        if let Node::Group(g) = node {
            if let Some(found) = find_group_mut(g, uuid) {
                return Some(found);
            }
        }
    }
    None
}

fn find_entry<'a>(group: &'a keepass::db::Group, uuid: &Uuid) -> Option<&'a keepass::db::Entry> {
    group.children.iter().find_map(|node| match node {
        Node::Entry(e) if e.uuid == *uuid => Some(e),
        Node::Entry(_) => None,
        Node::Group(g) => find_entry(g, uuid),
    })
}

fn parent_of(group: &keepass::db::Group, uuid: &Uuid) -> Option<Uuid> {
    for node in &group.children {
        match node {
            Node::Entry(e) if e.uuid == *uuid => return Some(group.uuid),
            Node::Group(g) if g.uuid == *uuid => return Some(group.uuid),
            Node::Group(g) => {
                if let Some(parent) = parent_of(g, uuid) {
                    return Some(parent);
                }
            }
            Node::Entry(_) => {}
        }
    }
    None
}

fn node_uuid(node: &Node) -> Uuid {
    match node {
        Node::Group(g) => g.uuid,
        Node::Entry(e) => e.uuid,
    }
}

fn remove_node(group: &mut keepass::db::Group, uuid: &Uuid) -> bool {
    if let Some(index) = group.children.iter().position(|n| node_uuid(n) == *uuid) {
        group.children.remove(index);
        return true;
    }
    for node in group.children.iter_mut() {
        if let Node::Group(g) = node {
            if remove_node(g, uuid) {
                return true;
            }
        }
    }
    false
}
