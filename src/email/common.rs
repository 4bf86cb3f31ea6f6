//! Common structures shared by the mail adapter and the poller

/// A candidate message fetched during one poll cycle, dropped once handled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    /// IMAP UID inside the selected folder
    pub uid: u32,
    /// `Message-ID` header when present, used by the dedupe set
    pub message_id: Option<String>,
    pub sender: String,
    pub subject: String,
    /// Decoded HTML body, or the plain text one when no HTML part exists
    pub body: Option<String>,
}

impl EmailMessage {
    /// Key used to recognise a message already confirmed by this process
    pub fn dedupe_key(&self) -> Option<&str> {
        self.message_id.as_deref()
    }
}
