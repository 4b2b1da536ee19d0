//! Body extraction from Gmail MIME trees.
//!
//! Depth-first walk: a `text/plain` node wins immediately, `multipart/*`
//! nodes are recursed in order, anything else (html, images, attachments)
//! is passed over. Decoded text is entity-unescaped, stripped of invisible
//! padding characters, and trimmed; messages left with nothing are dropped.

use base64::Engine;

use crate::text::clean_text;

use super::{MailDocument, MessagePart, MessageResponse, header_value};

/// Build a document from a fetched message, or `None` when the message has
/// no plain-text part or its cleaned body is empty.
pub fn document_from(msg: &MessageResponse) -> Option<MailDocument> {
    let payload = msg.payload.as_ref()?;
    let raw = extract_plain_text(payload)?;
    let body = clean_text(&raw);
    if body.is_empty() {
        return None;
    }

    let headers = payload.headers.as_deref().unwrap_or_default();
    Some(MailDocument {
        id: msg.id.clone(),
        thread_id: msg.thread_id.clone(),
        subject: header_value(headers, "Subject"),
        from: header_value(headers, "From"),
        body,
    })
}

/// First `text/plain` body found depth-first, base64url-decoded.
pub fn extract_plain_text(part: &MessagePart) -> Option<String> {
    match part.mime_type.as_deref() {
        Some("text/plain") => {
            let body = part.body.as_ref()?;
            // An attachment id means the data lives elsewhere — not inline text.
            if body.attachment_id.is_some() {
                return None;
            }
            body.data.as_deref().and_then(decode_base64)
        }
        Some(mime) if mime.starts_with("multipart/") => part
            .parts
            .as_deref()
            .unwrap_or_default()
            .iter()
            .find_map(extract_plain_text),
        _ => None,
    }
}

/// Gmail hands out URL-safe base64, but senders are sloppy — try the common
/// engines before giving up. Invalid UTF-8 sequences are replaced, not fatal.
fn decode_base64(data: &str) -> Option<String> {
    use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};

    let decoders: &[&base64::engine::GeneralPurpose] =
        &[&URL_SAFE_NO_PAD, &URL_SAFE, &STANDARD, &STANDARD_NO_PAD];

    for decoder in decoders {
        if let Ok(decoded) = decoder.decode(data.trim()) {
            return Some(String::from_utf8_lossy(&decoded).into_owned());
        }
    }
    None
}
