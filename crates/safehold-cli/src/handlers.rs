//! Command parsing and dispatch.

use anyhow::{bail, Context, Result};
use safehold_core::session::MSG_COPIED;
use safehold_core::{
    Clipboard, DatabaseManager, ElementRef, Error, ManualIdleSource, SearchHit, Session,
    SessionUpdate, SortOrder,
};
use std::str::FromStr;
use uuid::Uuid;

pub const HELP: &str = "\
commands:
  ls                    list the current group
  cd <uuid|..>          open a group or entry, or go back
  add-entry             add an entry to the current group
  add-group <name>      add a group to the current group
  rm                    delete the current element
  dup                   duplicate the current entry
  open <file>           open an attachment of the current entry
  copy <text>           copy text, resolving {REF:..} tokens
  clear                 clear the clipboard
  search <query>        search below the current group
  search-off            leave search
  select on|off         toggle selection mode
  sort a-z|z-a|none     change the listing order
  save                  save the database
  lock                  lock the database
  unlock <password>     unlock the database
  idle on|off           simulate the screensaver
  quit                  save pending changes and exit";

#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    Parent,
    Element(Uuid),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    List,
    Cd(Target),
    AddEntry,
    AddGroup(String),
    Remove,
    Duplicate,
    Open(String),
    Copy(String),
    Clear,
    Search(String),
    SearchOff,
    Select(bool),
    Sort(SortOrder),
    Save,
    Lock,
    Unlock(String),
    Idle(bool),
    Help,
    Quit,
}

fn parse_switch(arg: &str) -> Result<bool> {
    match arg {
        "on" => Ok(true),
        "off" => Ok(false),
        other => bail!("expected on or off, got {:?}", other),
    }
}

fn required<'a>(arg: &'a str, what: &str) -> Result<&'a str> {
    if arg.is_empty() {
        bail!("missing {}", what);
    }
    Ok(arg)
}

impl FromStr for Command {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self> {
        let line = line.trim();
        let (name, arg) = match line.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (line, ""),
        };

        let command = match name {
            "ls" => Command::List,
            "cd" => match required(arg, "target")? {
                ".." => Command::Cd(Target::Parent),
                id => Command::Cd(Target::Element(
                    Uuid::parse_str(id).with_context(|| format!("invalid uuid {:?}", id))?,
                )),
            },
            "add-entry" => Command::AddEntry,
            "add-group" => Command::AddGroup(required(arg, "group name")?.to_string()),
            "rm" => Command::Remove,
            "dup" => Command::Duplicate,
            "open" => Command::Open(required(arg, "attachment name")?.to_string()),
            "copy" => Command::Copy(required(arg, "text")?.to_string()),
            "clear" => Command::Clear,
            "search" => Command::Search(arg.to_string()),
            "search-off" => Command::SearchOff,
            "select" => Command::Select(parse_switch(arg)?),
            "sort" => Command::Sort(match arg.to_ascii_lowercase().as_str() {
                "a-z" => SortOrder::Ascending,
                "z-a" => SortOrder::Descending,
                "none" => SortOrder::Unsorted,
                other => bail!("unknown sort order {:?}", other),
            }),
            "save" => Command::Save,
            "lock" => Command::Lock,
            "unlock" => Command::Unlock(required(arg, "password")?.to_string()),
            "idle" => Command::Idle(parse_switch(arg)?),
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            "" => bail!("empty command"),
            other => bail!("unknown command {:?}, try help", other),
        };
        Ok(command)
    }
}

/// Whether the main loop keeps running after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Run one command against the session.
pub fn execute<D, C>(
    session: &mut Session<D, C>,
    idle: &ManualIdleSource,
    command: Command,
) -> Result<Flow>
where
    D: DatabaseManager,
    C: Clipboard,
{
    session.touch_activity();

    match command {
        Command::List => print_listing(session)?,
        Command::Cd(Target::Parent) => {
            session.go_back()?;
            print_listing(session)?;
        }
        Command::Cd(Target::Element(uuid)) => {
            let element = session
                .database()
                .element(&uuid)
                .ok_or(Error::NotFound(uuid))?;
            session.navigate_to(element)?;
            print_listing(session)?;
        }
        Command::AddEntry => {
            let entry = session.add_entry()?;
            println!("added entry {}", entry.uuid());
        }
        Command::AddGroup(name) => {
            let group = session.add_group(&name)?;
            println!("added group {} {}", name, group.uuid());
        }
        Command::Remove => {
            session.delete_current()?;
        }
        Command::Duplicate => {
            let copy = session.duplicate_current()?;
            println!("duplicated as {}", copy.uuid());
        }
        Command::Open(filename) => session.open_attachment(&filename)?,
        Command::Copy(text) => session.copy_to_clipboard(&text, MSG_COPIED)?,
        Command::Clear => session.clear_clipboard(),
        Command::Search(query) => session.search(&query)?,
        Command::SearchOff => session.set_search_active(false)?,
        Command::Select(on) => session.set_selection_mode(on)?,
        Command::Sort(order) => session.set_sort_order(order)?,
        Command::Save => session.save_safe()?,
        Command::Lock => session.request_lock()?,
        Command::Unlock(password) => session.request_unlock(&password)?,
        Command::Idle(active) => {
            if !idle.set_active(active) {
                println!("screensaver signal is not being watched");
            }
        }
        Command::Help => println!("{}", HELP),
        Command::Quit => return Ok(Flow::Quit),
    }
    Ok(Flow::Continue)
}

fn describe(element: &ElementRef) -> &'static str {
    match element {
        ElementRef::Group(_) => "[G]",
        ElementRef::Entry(_) => "[E]",
    }
}

pub fn print_listing<D, C>(session: &Session<D, C>) -> Result<()>
where
    D: DatabaseManager,
    C: Clipboard,
{
    let position = session.position();
    if let ElementRef::Entry(uuid) = position {
        println!("entry {}", uuid);
        for name in session.attachments()? {
            println!("[A] {}", name);
        }
    }
    for item in session.list_current()? {
        let bin = if item.is_recycle_bin { " (recycle bin)" } else { "" };
        println!(
            "{} {}{}  {}",
            describe(&item.reference),
            item.name,
            bin,
            item.reference.uuid()
        );
    }
    Ok(())
}

fn print_hits(hits: &[SearchHit]) {
    if hits.is_empty() {
        println!("no results");
        return;
    }
    for hit in hits {
        println!("[E] {}  {}  {}", hit.entry.title, hit.path, hit.entry.uuid);
    }
}

/// Render one session update to stdout.
pub fn print_update<D, C>(session: &Session<D, C>, update: SessionUpdate)
where
    D: DatabaseManager,
    C: Clipboard,
{
    match update {
        SessionUpdate::Notify(message) => println!("{}", message),
        SessionUpdate::Refresh(_) => {
            if session.is_locked() || session.is_search_active() {
                return;
            }
            if let Err(e) = print_listing(session) {
                tracing::warn!("Failed to list group: {:#}", e);
            }
        }
        SessionUpdate::SearchResults(hits) => print_hits(&hits),
        SessionUpdate::AttachmentReady(path) => println!("attachment at {}", path.display()),
    }
}
