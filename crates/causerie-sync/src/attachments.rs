//! Attachment Reference Resolver.
//!
//! The upload collaborator hands back `(kind, handle)`; this validates the
//! pair, records it and returns a typed [`AttachmentRef`].  Raw bytes never
//! pass through here.

use tracing::debug;

use causerie_shared::{AttachmentRef, ChatError, MediaKind};

use crate::handle::DbHandle;

#[derive(Clone)]
pub struct AttachmentResolver {
    db: DbHandle,
    max_handle_len: usize,
}

impl AttachmentResolver {
    pub(crate) fn new(db: DbHandle, max_handle_len: usize) -> Self {
        Self { db, max_handle_len }
    }

    /// Validate and record a reference.  Idempotent on `(kind, handle)`.
    /// The handle is opaque and stored byte for byte.
    pub fn register(&self, kind: &str, handle: &str) -> Result<AttachmentRef, ChatError> {
        let kind: MediaKind = kind.parse()?;
        let attachment = AttachmentRef {
            kind,
            handle: handle.to_string(),
        };
        self.check_handle(&attachment)?;

        let created = self.db.with(|db| Ok(db.register_attachment(&attachment)?))?;
        debug!(kind = %attachment.kind, created, "Attachment registered");
        Ok(attachment)
    }

    pub fn is_registered(&self, attachment: &AttachmentRef) -> Result<bool, ChatError> {
        self.db
            .with(|db| Ok(db.is_attachment_registered(attachment)?))
    }

    /// Shape check shared with message validation.
    pub(crate) fn check_handle(&self, attachment: &AttachmentRef) -> Result<(), ChatError> {
        let handle = attachment.handle.as_str();
        if handle.trim().is_empty() {
            return Err(ChatError::InvalidAttachment("empty handle".into()));
        }
        if handle.len() > self.max_handle_len {
            return Err(ChatError::InvalidAttachment(format!(
                "handle exceeds {} bytes",
                self.max_handle_len
            )));
        }
        Ok(())
    }
}
