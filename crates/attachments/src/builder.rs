//! Assembles the entries of the next outgoing turn.

use shared::agent_api::{ChatMessage, Role};
use shared::conversation::{quote_selection, AttachmentKind, AttachmentMeta};

use crate::encoder::AttachmentEncoder;
use crate::error::Result;
use crate::source::AttachmentSource;

/// An attachment that contributed nothing to the turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentFailure {
    pub name: String,
    pub reason: String,
}

/// A finished turn: request entries plus what to record on the user message.
#[derive(Debug, Clone, Default)]
pub struct Turn {
    pub messages: Vec<ChatMessage>,
    pub attachments: Vec<AttachmentMeta>,
    pub failures: Vec<AttachmentFailure>,
}

impl Turn {
    pub fn is_multimodal(&self) -> bool {
        !self.attachments.is_empty()
    }

    pub fn image_count(&self) -> usize {
        self.messages.iter().filter(|m| m.content.has_images()).count()
    }
}

/// Builds one turn. Entries are only ever appended, and `finish` consumes the
/// builder, so nothing carries over into the next turn.
pub struct TurnBuilder<'a> {
    encoder: &'a AttachmentEncoder,
    turn: Turn,
}

impl<'a> TurnBuilder<'a> {
    pub fn new(encoder: &'a AttachmentEncoder) -> Self {
        Self {
            encoder,
            turn: Turn::default(),
        }
    }

    /// Appends `{role: user, content: text}`. Blank text adds nothing.
    pub fn add_text(&mut self, text: &str) -> &mut Self {
        if !text.trim().is_empty() {
            self.turn.messages.push(ChatMessage::text(Role::User, text));
        }
        self
    }

    pub fn add_selected_text(&mut self, text: &str) -> &mut Self {
        if !text.trim().is_empty() {
            self.turn
                .messages
                .push(ChatMessage::text(Role::User, quote_selection(text)));
        }
        self
    }

    /// Encodes an image source and appends one entry per image.
    pub fn add_image(&mut self, source: &AttachmentSource) -> Result<usize> {
        let images = vec![self.encoder.encode_image(source)?];
        Ok(self.push_images(source, AttachmentKind::Image, images))
    }

    /// Appends one image entry per rendered page, in page order.
    pub fn add_pdf(&mut self, source: &AttachmentSource) -> Result<usize> {
        let pages = self.encoder.encode_pdf(source)?;
        Ok(self.push_images(source, AttachmentKind::Pdf, pages))
    }

    /// Dispatches on the detected kind. A failing attachment is recorded and
    /// logged but does not stop the turn.
    pub fn add_attachment(&mut self, source: &AttachmentSource) -> usize {
        let result = match source.kind() {
            AttachmentKind::Image => self.add_image(source),
            AttachmentKind::Pdf => self.add_pdf(source),
        };
        match result {
            Ok(added) => added,
            Err(e) => {
                let name = source.name();
                tracing::warn!(attachment = %name, error = %e, "attachment dropped from turn");
                self.turn.failures.push(AttachmentFailure {
                    name,
                    reason: e.to_string(),
                });
                0
            }
        }
    }

    fn push_images(
        &mut self,
        source: &AttachmentSource,
        kind: AttachmentKind,
        images: Vec<crate::encoder::EncodedImage>,
    ) -> usize {
        let added = images.len();
        for image in images {
            self.turn.messages.push(ChatMessage::image(image.data_url()));
        }
        let mut meta = source.meta();
        meta.kind = kind;
        self.turn.attachments.push(meta);
        added
    }

    pub fn is_multimodal(&self) -> bool {
        self.turn.is_multimodal()
    }

    pub fn finish(self) -> Turn {
        self.turn
    }
}
