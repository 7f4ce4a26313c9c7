use std::fmt;

use crate::context::{AttachmentInput, MimeAllowList};
use crate::error::{ChatError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttachmentId(u64);

impl AttachmentId {
    pub fn value(self) -> u64 {
        self.0
    }
}

impl From<u64> for AttachmentId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for AttachmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct TrayEntry {
    pub id: AttachmentId,
    pub file: AttachmentInput,
    pub selected: bool,
}

/// Files uploaded during the session, with a per-file "send with the next
/// message" selection. New files start unselected.
#[derive(Debug, Default)]
pub struct AttachmentTray {
    entries: Vec<TrayEntry>,
    next_id: u64,
}

impl AttachmentTray {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file to the pool after checking its MIME type.
    pub fn add(&mut self, file: AttachmentInput, allow_list: &MimeAllowList) -> Result<AttachmentId> {
        if !allow_list.allows(&file.mime_type) {
            return Err(ChatError::MalformedAttachment {
                name: file.name,
                mime_type: file.mime_type,
            });
        }
        self.next_id += 1;
        let id = AttachmentId(self.next_id);
        tracing::debug!(%id, name = %file.name, bytes = file.size(), "file added to tray");
        self.entries.push(TrayEntry {
            id,
            file,
            selected: false,
        });
        Ok(id)
    }

    pub fn entries(&self) -> &[TrayEntry] {
        &self.entries
    }

    /// Returns `false` when no file has that id.
    pub fn select(&mut self, id: AttachmentId) -> bool {
        self.set_selected(id, true)
    }

    pub fn unselect(&mut self, id: AttachmentId) -> bool {
        self.set_selected(id, false)
    }

    /// Copies of the selected files, in upload order.
    pub fn selected(&self) -> Vec<AttachmentInput> {
        self.entries
            .iter()
            .filter(|e| e.selected)
            .map(|e| e.file.clone())
            .collect()
    }

    pub fn selected_count(&self) -> usize {
        self.entries.iter().filter(|e| e.selected).count()
    }

    /// Called after a successful send. Files stay in the pool.
    pub fn reset_selection(&mut self) {
        for entry in &mut self.entries {
            entry.selected = false;
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn set_selected(&mut self, id: AttachmentId, selected: bool) -> bool {
        match self.entries.iter_mut().find(|e| e.id == id) {
            Some(entry) => {
                entry.selected = selected;
                true
            }
            None => false,
        }
    }
}
