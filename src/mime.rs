//! Outbound message encoding in Gmail's `raw` format.
//!
//! [`build_message`] is deterministic: the same payload always produces the
//! same bytes (fixed boundary, no `Date` or `Message-ID`; Gmail adds those).

use std::path::PathBuf;

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Boundary between the parts of every message this module builds.
pub const BOUNDARY: &str = "inboxkit-part-boundary-0001";

const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";
const BASE64_LINE: usize = 76;
/// RFC 5322 line limit, excluding the CRLF.
const MAX_LINE_OCTETS: usize = 998;

/// What the user composed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComposePayload {
    pub recipient: String,
    pub subject: String,
    pub body_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<AttachmentRef>,
}

impl ComposePayload {
    #[must_use]
    pub fn new(
        recipient: impl Into<String>,
        subject: impl Into<String>,
        body_text: impl Into<String>,
    ) -> Self {
        Self {
            recipient: recipient.into(),
            subject: subject.into(),
            body_text: body_text.into(),
            attachment: None,
        }
    }

    #[must_use]
    pub fn with_attachment(mut self, attachment: AttachmentRef) -> Self {
        self.attachment = Some(attachment);
        self
    }
}

/// A single file to attach.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentRef {
    /// Name shown to the recipient.
    pub filename: String,
    /// Declared type; sniffed from content and name when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    pub source: AttachmentSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AttachmentSource {
    Bytes(Vec<u8>),
    File(PathBuf),
}

impl AttachmentRef {
    #[must_use]
    pub fn from_bytes(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            content_type: None,
            source: AttachmentSource::Bytes(bytes),
        }
    }

    /// Attach a file from disk, named after its last path component.
    #[must_use]
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachment".to_owned());
        Self {
            filename,
            content_type: None,
            source: AttachmentSource::File(path),
        }
    }

    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    fn read(&self) -> Result<Vec<u8>, Error> {
        match &self.source {
            AttachmentSource::Bytes(bytes) => Ok(bytes.clone()),
            AttachmentSource::File(path) => {
                std::fs::read(path).map_err(|source| Error::AttachmentReadError {
                    filename: self.filename.clone(),
                    source,
                })
            }
        }
    }
}

/// A complete RFC 5322 message, base64url-encoded without padding.
///
/// This is the value of the `raw` field in Gmail's send request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncodedMessage(String);

impl EncodedMessage {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }

    /// The message bytes before transport encoding.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidMessage`] if the value is not valid base64url.
    pub fn decode(&self) -> Result<Vec<u8>, Error> {
        URL_SAFE_NO_PAD
            .decode(&self.0)
            .map_err(|e| Error::InvalidMessage(format!("not base64url: {e}")))
    }
}

/// Encode `payload` for Gmail's raw-message send.
///
/// # Errors
///
/// - [`Error::InvalidMessage`] for an empty recipient or a header value
///   (recipient, subject, declared attachment type) containing a line break.
/// - [`Error::AttachmentReadError`] if the attachment cannot be read; nothing
///   is produced in that case.
pub fn build_message(payload: &ComposePayload) -> Result<EncodedMessage, Error> {
    let raw = build_rfc822(payload)?;
    Ok(EncodedMessage(URL_SAFE_NO_PAD.encode(raw)))
}

/// The unencoded message bytes.
///
/// # Errors
///
/// Same as [`build_message`].
pub fn build_rfc822(payload: &ComposePayload) -> Result<Vec<u8>, Error> {
    let recipient = payload.recipient.trim();
    if recipient.is_empty() {
        return Err(Error::InvalidMessage("recipient is empty".into()));
    }
    reject_line_breaks("recipient", recipient)?;
    reject_line_breaks("subject", &payload.subject)?;
    let declared_type = payload
        .attachment
        .as_ref()
        .and_then(|a| a.content_type.as_deref());
    if let Some(content_type) = declared_type {
        reject_line_breaks("attachment content type", content_type)?;
    }

    // Read before writing anything so a failed read leaves no partial output
    let attachment = match &payload.attachment {
        Some(att) => Some((att, att.read()?)),
        None => None,
    };

    let mut out = Vec::new();
    push_header(&mut out, "To", recipient);
    push_header(&mut out, "Subject", &encode_header_value(&payload.subject));
    push_header(&mut out, "MIME-Version", "1.0");
    push_header(
        &mut out,
        "Content-Type",
        &format!("multipart/mixed; boundary=\"{BOUNDARY}\""),
    );
    out.extend_from_slice(b"\r\n");

    push_delimiter(&mut out);
    push_text_part(&mut out, &payload.body_text);

    if let Some((att, bytes)) = attachment {
        push_delimiter(&mut out);
        push_attachment_part(&mut out, att, &bytes);
    }

    out.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    Ok(out)
}

fn reject_line_breaks(field: &str, value: &str) -> Result<(), Error> {
    if value.contains(['\r', '\n']) {
        return Err(Error::InvalidMessage(format!("{field} contains a line break")));
    }
    Ok(())
}

fn push_header(out: &mut Vec<u8>, name: &str, value: &str) {
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(b": ");
    out.extend_from_slice(value.as_bytes());
    out.extend_from_slice(b"\r\n");
}

fn push_delimiter(out: &mut Vec<u8>) {
    out.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
}

fn push_text_part(out: &mut Vec<u8>, body: &str) {
    push_header(out, "Content-Type", "text/plain; charset=\"UTF-8\"");
    let normalized = normalize_newlines(body);
    if fits_7bit(&normalized) {
        push_header(out, "Content-Transfer-Encoding", "7bit");
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(normalized.as_bytes());
        out.extend_from_slice(b"\r\n");
    } else {
        push_header(out, "Content-Transfer-Encoding", "base64");
        out.extend_from_slice(b"\r\n");
        push_base64_lines(out, body.as_bytes());
    }
}

fn push_attachment_part(out: &mut Vec<u8>, att: &AttachmentRef, bytes: &[u8]) {
    let content_type = att
        .content_type
        .clone()
        .unwrap_or_else(|| sniff_content_type(&att.filename, bytes));
    push_header(
        out,
        "Content-Type",
        &format!("{content_type}; name=\"{}\"", quote_filename(&att.filename)),
    );
    push_header(out, "Content-Transfer-Encoding", "base64");
    push_header(out, "Content-Disposition", &content_disposition(&att.filename));
    out.extend_from_slice(b"\r\n");
    push_base64_lines(out, bytes);
}

fn push_base64_lines(out: &mut Vec<u8>, bytes: &[u8]) {
    let encoded = STANDARD.encode(bytes);
    for line in encoded.as_bytes().chunks(BASE64_LINE) {
        out.extend_from_slice(line);
        out.extend_from_slice(b"\r\n");
    }
}

/// Whether CRLF-normalized text can go out verbatim: ASCII, no bare CR,
/// short lines, and nothing a parser could mistake for our boundary.
fn fits_7bit(text: &str) -> bool {
    let delimiter = format!("--{BOUNDARY}");
    text.is_ascii()
        && text.split("\r\n").all(|line| {
            !line.contains('\r')
                && line.len() <= MAX_LINE_OCTETS
                && !line.starts_with(&delimiter)
        })
}

fn normalize_newlines(body: &str) -> String {
    body.replace("\r\n", "\n").replace('\n', "\r\n")
}

/// RFC 2047 encoded-word for non-ASCII header text.
fn encode_header_value(value: &str) -> String {
    if value.is_ascii() {
        value.to_owned()
    } else {
        format!("=?UTF-8?B?{}?=", STANDARD.encode(value.as_bytes()))
    }
}

fn quote_filename(name: &str) -> String {
    let ascii: String = name
        .chars()
        .map(|c| if c.is_ascii() && !c.is_ascii_control() { c } else { '_' })
        .collect();
    ascii.replace('\\', "\\\\").replace('"', "\\\"")
}

/// `attachment` disposition; non-ASCII names also get an RFC 2231 `filename*`.
fn content_disposition(name: &str) -> String {
    let plain = format!("attachment; filename=\"{}\"", quote_filename(name));
    if name.is_ascii() {
        plain
    } else {
        format!("{plain}; filename*=UTF-8''{}", urlencoding::encode(name))
    }
}

/// Content type from magic bytes, then the filename extension.
fn sniff_content_type(filename: &str, bytes: &[u8]) -> String {
    const MAGIC: &[(&[u8], &str)] = &[
        (b"%PDF-", "application/pdf"),
        (b"\x89PNG\r\n\x1a\n", "image/png"),
        (b"\xff\xd8\xff", "image/jpeg"),
        (b"GIF87a", "image/gif"),
        (b"GIF89a", "image/gif"),
        (b"PK\x03\x04", "application/zip"),
    ];
    if let Some((_, mime)) = MAGIC.iter().find(|(magic, _)| bytes.starts_with(magic)) {
        // Office documents are zip containers; prefer the extension for those
        if *mime != "application/zip" {
            return (*mime).to_owned();
        }
    }
    mime_guess::from_path(filename)
        .first()
        .map(|m| m.essence_str().to_owned())
        .unwrap_or_else(|| FALLBACK_CONTENT_TYPE.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoded(payload: &ComposePayload) -> String {
        let encoded = build_message(payload).unwrap();
        String::from_utf8(encoded.decode().unwrap()).unwrap()
    }

    /// The base64 body of the attachment part (the second part).
    fn attachment_body(message: &str) -> String {
        let parts: Vec<&str> = message.split(&format!("--{BOUNDARY}")).collect();
        let part = parts[2];
        let (_, body) = part.split_once("\r\n\r\n").unwrap();
        body.lines().map(str::trim).collect()
    }

    fn part_count(message: &str) -> usize {
        message.matches(&format!("--{BOUNDARY}\r\n")).count()
    }

    #[test]
    fn binary_attachment_round_trips_exactly() {
        let bytes: Vec<u8> = (0..=255u8).cycle().take(5000).collect();
        let payload = ComposePayload::new("bob@example.com", "Report", "See attached.")
            .with_attachment(AttachmentRef::from_bytes("data.bin", bytes.clone()));

        let message = decoded(&payload);
        let restored = STANDARD.decode(attachment_body(&message)).unwrap();
        assert_eq!(restored, bytes);
    }

    #[test]
    fn message_without_attachment_has_one_part() {
        let message = decoded(&ComposePayload::new("bob@example.com", "Hi", "Hello"));
        assert_eq!(part_count(&message), 1);
        assert!(message.contains("Content-Type: text/plain; charset=\"UTF-8\""));
        assert!(message.ends_with(&format!("--{BOUNDARY}--\r\n")));
    }

    #[test]
    fn attachment_adds_exactly_one_part() {
        let payload = ComposePayload::new("bob@example.com", "Hi", "Hello")
            .with_attachment(AttachmentRef::from_bytes("notes.txt", b"plain".to_vec()));
        let message = decoded(&payload);
        assert_eq!(part_count(&message), 2);
        assert!(message.contains("Content-Type: text/plain; name=\"notes.txt\""));
        assert!(message.contains("Content-Disposition: attachment; filename=\"notes.txt\""));
    }

    #[test]
    fn output_is_unpadded_base64url() {
        for subject in ["a", "ab", "abc", "héllo?>"] {
            let encoded = build_message(&ComposePayload::new("x@example.com", subject, "body?>~"))
                .unwrap();
            assert!(!encoded.as_str().contains(['=', '+', '/']), "{}", encoded.as_str());
        }
    }

    #[test]
    fn build_is_deterministic() {
        let payload = ComposePayload::new("bob@example.com", "Same", "Same body");
        assert_eq!(build_message(&payload).unwrap(), build_message(&payload).unwrap());
    }

    #[test]
    fn unknown_content_defaults_to_octet_stream() {
        assert_eq!(sniff_content_type("blob", &[1, 2, 3]), FALLBACK_CONTENT_TYPE);
        assert_eq!(sniff_content_type("x.unknownext", b"??"), FALLBACK_CONTENT_TYPE);
    }

    #[test]
    fn content_type_is_sniffed_from_bytes_then_name() {
        assert_eq!(sniff_content_type("scan", b"%PDF-1.7 ..."), "application/pdf");
        assert_eq!(sniff_content_type("photo.dat", b"\x89PNG\r\n\x1a\n...."), "image/png");
        assert_eq!(sniff_content_type("table.csv", b"a,b\n1,2"), "text/csv");
        assert_eq!(
            sniff_content_type(
                "report.docx",
                b"PK\x03\x04rest-of-zip"
            ),
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        );
    }

    #[test]
    fn declared_content_type_wins() {
        let payload = ComposePayload::new("bob@example.com", "Hi", "x").with_attachment(
            AttachmentRef::from_bytes("a.pdf", b"%PDF-".to_vec()).with_content_type("text/x-custom"),
        );
        assert!(decoded(&payload).contains("Content-Type: text/x-custom; name=\"a.pdf\""));
    }

    #[test]
    fn unreadable_attachment_aborts() {
        let payload = ComposePayload::new("bob@example.com", "Hi", "x")
            .with_attachment(AttachmentRef::from_path("/definitely/not/here.pdf"));
        match build_message(&payload) {
            Err(Error::AttachmentReadError { filename, .. }) => assert_eq!(filename, "here.pdf"),
            other => panic!("expected AttachmentReadError, got {other:?}"),
        }
    }

    #[test]
    fn file_attachment_is_read_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.jpg");
        std::fs::write(&path, b"\xff\xd8\xff\xe0jpegdata").unwrap();

        let payload = ComposePayload::new("bob@example.com", "Pic", "")
            .with_attachment(AttachmentRef::from_path(&path));
        let message = decoded(&payload);
        assert!(message.contains("Content-Type: image/jpeg; name=\"photo.jpg\""));
        assert_eq!(
            STANDARD.decode(attachment_body(&message)).unwrap(),
            b"\xff\xd8\xff\xe0jpegdata"
        );
    }

    #[test]
    fn header_injection_is_rejected() {
        let bad = ComposePayload::new("bob@example.com\r\nBcc: eve@example.com", "Hi", "x");
        assert!(matches!(build_message(&bad), Err(Error::InvalidMessage(_))));

        let bad_subject = ComposePayload::new("bob@example.com", "Hi\nBcc: eve", "x");
        assert!(matches!(build_message(&bad_subject), Err(Error::InvalidMessage(_))));

        let empty = ComposePayload::new("  ", "Hi", "x");
        assert!(matches!(build_message(&empty), Err(Error::InvalidMessage(_))));
    }

    #[test]
    fn non_ascii_text_is_encoded() {
        let payload = ComposePayload::new("bob@example.com", "Grüße", "Schöne Grüße\n")
            .with_attachment(AttachmentRef::from_bytes("résumé.txt", b"cv".to_vec()));
        let message = decoded(&payload);

        assert!(message.contains(&format!("Subject: =?UTF-8?B?{}?=", STANDARD.encode("Grüße"))));
        assert!(message.contains("filename*=UTF-8''r%C3%A9sum%C3%A9.txt"));
        assert!(message.contains(&STANDARD.encode("Schöne Grüße\n")));
    }

    /// Text of the first part, decoding base64 when used.
    fn body_text(message: &str) -> String {
        let parts: Vec<&str> = message.split(&format!("\r\n--{BOUNDARY}")).collect();
        let (headers, body) = parts[1].split_once("\r\n\r\n").unwrap();
        if headers.contains("Content-Transfer-Encoding: base64") {
            let joined: String = body.lines().map(str::trim).collect();
            String::from_utf8(STANDARD.decode(joined).unwrap()).unwrap()
        } else {
            body.to_owned()
        }
    }

    #[test]
    fn body_quoting_the_boundary_stays_one_part() {
        let body = format!("quoting a thread:\n--{BOUNDARY}--\nand more after it");
        let message = decoded(&ComposePayload::new("bob@example.com", "Fwd", body.clone()));

        assert_eq!(part_count(&message), 1);
        assert_eq!(message.matches(&format!("--{BOUNDARY}--")).count(), 1);
        assert!(message.contains("Content-Transfer-Encoding: base64"));
        assert_eq!(body_text(&message), body);
    }

    #[test]
    fn long_lines_are_not_sent_as_7bit() {
        let body = "a".repeat(5000);
        let message = decoded(&ComposePayload::new("bob@example.com", "Long", body.clone()));

        assert!(message.contains("Content-Transfer-Encoding: base64"));
        assert!(message.split("\r\n").all(|l| l.len() <= MAX_LINE_OCTETS));
        assert_eq!(body_text(&message), body);

        let fits = "b".repeat(MAX_LINE_OCTETS);
        let message = decoded(&ComposePayload::new("bob@example.com", "Edge", fits));
        assert!(message.contains("Content-Transfer-Encoding: 7bit"));
    }

    #[test]
    fn bare_carriage_return_forces_base64() {
        let message = decoded(&ComposePayload::new("bob@example.com", "CR", "one\rtwo"));
        assert!(message.contains("Content-Transfer-Encoding: base64"));
        assert_eq!(body_text(&message), "one\rtwo");
    }

    #[test]
    fn declared_content_type_cannot_inject_headers() {
        let payload = ComposePayload::new("bob@example.com", "Hi", "x").with_attachment(
            AttachmentRef::from_bytes("a.txt", b"x".to_vec())
                .with_content_type("text/plain\r\nBcc: eve@example.com"),
        );
        assert!(matches!(build_message(&payload), Err(Error::InvalidMessage(_))));
    }

    #[test]
    fn ascii_body_uses_crlf() {
        let message = decoded(&ComposePayload::new("bob@example.com", "Hi", "line1\nline2"));
        assert!(message.contains("\r\n\r\nline1\r\nline2\r\n"));
    }
}
