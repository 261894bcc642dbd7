/// Maximum stored message length in bytes, after normalization.
pub const MAX_MESSAGE_BYTES: usize = 1024;

/// A single stored log line: normalized message text plus the Unix second it
/// was accepted (live ingest) or originally written (replay).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub message: String,
    pub timestamp: i64,
}

/// Normalize one inbound line into storable message text.
///
/// This is the only normalization point in the system; the live ingest path
/// and the startup replay path both funnel through it, which keeps the buffer
/// invariant "every stored message is normalized" enforceable.
///
/// Rules, applied in order:
/// - trailing CR/LF bytes are stripped;
/// - every byte that is not printable ASCII, space or tab becomes `?`;
/// - messages over [`MAX_MESSAGE_BYTES`] are truncated, with the final three
///   bytes replaced by `...` to mark the cut.
///
/// The output is always valid ASCII and therefore valid UTF-8, regardless of
/// what arrived on the wire.
pub fn sanitize(raw: &[u8]) -> String {
    let mut end = raw.len();
    while end > 0 && (raw[end - 1] == b'\r' || raw[end - 1] == b'\n') {
        end -= 1;
    }

    let body = &raw[..end];
    let truncated = body.len() > MAX_MESSAGE_BYTES;
    let keep = if truncated { MAX_MESSAGE_BYTES - 3 } else { body.len() };

    let mut message = String::with_capacity(if truncated { MAX_MESSAGE_BYTES } else { keep });
    for &byte in &body[..keep] {
        if (0x20..=0x7e).contains(&byte) || byte == b'\t' {
            message.push(byte as char);
        } else {
            message.push('?');
        }
    }
    if truncated {
        message.push_str("...");
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strips_trailing_crlf() {
        assert_eq!(sanitize(b"hello\r\n"), "hello");
        assert_eq!(sanitize(b"hello\n"), "hello");
        assert_eq!(sanitize(b"hello\r"), "hello");
        assert_eq!(sanitize(b"hello\r\n\r\n"), "hello");
    }

    #[test]
    fn test_scrubs_control_bytes() {
        assert_eq!(sanitize(b"a\x00b\x1fc"), "a?b?c");
        assert_eq!(sanitize(b"tab\tkept spc kept"), "tab\tkept spc kept");
        // Non-ASCII bytes are scrubbed byte-wise.
        assert_eq!(sanitize("héllo".as_bytes()), "h??llo");
    }

    #[test]
    fn test_exactly_max_bytes_kept_verbatim() {
        let msg = vec![b'x'; MAX_MESSAGE_BYTES];
        let out = sanitize(&msg);
        assert_eq!(out.len(), MAX_MESSAGE_BYTES);
        assert!(!out.ends_with("..."));
    }

    #[test]
    fn test_over_max_truncated_with_marker() {
        let msg = vec![b'x'; MAX_MESSAGE_BYTES + 1];
        let out = sanitize(&msg);
        assert_eq!(out.len(), MAX_MESSAGE_BYTES);
        assert!(out.ends_with("..."));
        assert_eq!(&out[..MAX_MESSAGE_BYTES - 3], "x".repeat(MAX_MESSAGE_BYTES - 3));
    }

    #[test]
    fn test_crlf_stripped_before_length_check() {
        // 1024 payload bytes plus CRLF must not count as truncation.
        let mut msg = vec![b'x'; MAX_MESSAGE_BYTES];
        msg.extend_from_slice(b"\r\n");
        let out = sanitize(&msg);
        assert_eq!(out.len(), MAX_MESSAGE_BYTES);
        assert!(!out.ends_with("..."));
    }

    #[test]
    fn test_empty_line() {
        assert_eq!(sanitize(b""), "");
        assert_eq!(sanitize(b"\r\n"), "");
    }
}
