//! Clipboard capability
//!
//! The core never talks to a platform clipboard directly; embedders inject
//! an implementation of [`Clipboard`]. Both operations are fallible and must
//! not block: failures are logged by callers and swallowed.

use arboard::Clipboard as ArboardClipboard;
use std::sync::Mutex;

use crate::{Error, Result};

/// Embedder-provided clipboard capability.
pub trait Clipboard: Send + Sync {
    /// Current clipboard text, or `None` when empty / non-text.
    fn read_text(&self) -> Result<Option<String>>;
    /// Replace the clipboard contents.
    fn write_text(&self, text: &str) -> Result<()>;
}

/// System clipboard backed by `arboard`, for desktop embedders.
pub struct SystemClipboard;

impl SystemClipboard {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SystemClipboard {
    fn default() -> Self {
        Self::new()
    }
}

impl Clipboard for SystemClipboard {
    fn read_text(&self) -> Result<Option<String>> {
        let mut clipboard =
            ArboardClipboard::new().map_err(|e| Error::Clipboard(e.to_string()))?;

        match clipboard.get_text() {
            Ok(text) if !text.is_empty() => Ok(Some(text)),
            Ok(_) => Ok(None),
            Err(arboard::Error::ContentNotAvailable) => Ok(None),
            Err(e) => Err(Error::Clipboard(e.to_string())),
        }
    }

    fn write_text(&self, text: &str) -> Result<()> {
        let mut clipboard =
            ArboardClipboard::new().map_err(|e| Error::Clipboard(e.to_string()))?;
        clipboard
            .set_text(text)
            .map_err(|e| Error::Clipboard(e.to_string()))
    }
}

/// In-process clipboard for tests and simulators.
pub struct MockClipboard {
    content: Mutex<Option<String>>,
}

impl MockClipboard {
    pub fn new() -> Self {
        Self {
            content: Mutex::new(None),
        }
    }

    /// Simulate a user copy action.
    pub fn simulate_copy(&self, text: &str) {
        *self.content.lock().expect("mock clipboard mutex poisoned") = Some(text.to_string());
    }
}

impl Default for MockClipboard {
    fn default() -> Self {
        Self::new()
    }
}

impl Clipboard for MockClipboard {
    fn read_text(&self) -> Result<Option<String>> {
        Ok(self
            .content
            .lock()
            .expect("mock clipboard mutex poisoned")
            .clone())
    }

    fn write_text(&self, text: &str) -> Result<()> {
        *self.content.lock().expect("mock clipboard mutex poisoned") = Some(text.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_read_write() {
        let clipboard = MockClipboard::new();
        assert_eq!(clipboard.read_text().unwrap(), None);

        clipboard.write_text("hello").unwrap();
        assert_eq!(clipboard.read_text().unwrap(), Some("hello".to_string()));
    }

    #[test]
    fn test_mock_simulate_copy() {
        let clipboard = MockClipboard::new();
        clipboard.simulate_copy("copied");
        assert_eq!(clipboard.read_text().unwrap(), Some("copied".to_string()));
    }
}
