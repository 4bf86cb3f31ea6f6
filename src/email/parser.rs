use log::{debug, warn};
use mail_parser::{Message, MessageParser, MimeHeaders, PartType};

use super::common::EmailMessage;

/// Decode a raw RFC 822 message into the fields the poller needs.
///
/// Never fails: a message mail-parser cannot make sense of comes back with
/// placeholder headers and no body, and is then skipped by the extractor.
pub fn parse_message(uid: u32, raw: &[u8]) -> EmailMessage {
    debug!("Parsing message UID {} ({} bytes)", uid, raw.len());

    let Some(parsed) = MessageParser::default().parse(raw) else {
        warn!("Unable to parse message UID {}, keeping it without body", uid);
        return EmailMessage {
            uid,
            message_id: None,
            sender: "Unknown sender".to_string(),
            subject: "Unknown subject".to_string(),
            body: None,
        };
    };

    let sender = parsed
        .from()
        .and_then(|addrs| addrs.first())
        .map(|addr| match (&addr.name, &addr.address) {
            (Some(name), Some(email)) => format!("{} <{}>", name, email),
            (None, Some(email)) => email.to_string(),
            _ => "Unknown sender".to_string(),
        })
        .unwrap_or_else(|| "Unknown sender".to_string());

    let body = first_body(&parsed, true).or_else(|| first_body(&parsed, false));
    if body.is_none() {
        debug!("Message UID {} has no text or HTML body", uid);
    }

    EmailMessage {
        uid,
        message_id: parsed.message_id().map(str::to_string),
        sender,
        subject: parsed.subject().unwrap_or("No subject").to_string(),
        body,
    }
}

/// First inline HTML (or plain text) part, attachments excluded
fn first_body(message: &Message<'_>, html: bool) -> Option<String> {
    message.parts.iter().find_map(|part| {
        let is_attachment = part
            .content_disposition()
            .is_some_and(|disposition| disposition.is_attachment());
        if is_attachment {
            return None;
        }

        match &part.body {
            PartType::Html(content) if html => Some(content.to_string()),
            PartType::Text(content) if !html => Some(content.to_string()),
            _ => None,
        }
    })
}
