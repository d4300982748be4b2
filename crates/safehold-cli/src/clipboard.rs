//! System clipboard backed by arboard.

use anyhow::{Context, Result};
use safehold_core::Clipboard;

/// Opens the platform clipboard on first use and keeps it for the process
/// lifetime, so copied text stays available on X11.
#[derive(Default)]
pub struct SystemClipboard {
    inner: Option<arboard::Clipboard>,
}

impl SystemClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&mut self) -> Result<&mut arboard::Clipboard> {
        if self.inner.is_none() {
            let clipboard = arboard::Clipboard::new().context("Failed to open system clipboard")?;
            self.inner = Some(clipboard);
        }
        self.inner.as_mut().context("System clipboard unavailable")
    }
}

impl Clipboard for SystemClipboard {
    fn set_text(&mut self, text: &str) -> Result<()> {
        self.handle()?
            .set_text(text.to_string())
            .context("Failed to write clipboard")
    }

    fn clear(&mut self) -> Result<()> {
        // Nothing was ever copied if the clipboard was never opened.
        if let Some(clipboard) = self.inner.as_mut() {
            clipboard.clear().context("Failed to clear clipboard")?;
        }
        Ok(())
    }
}
