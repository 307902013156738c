//! Frame codec — spec §4.A.
//!
//! Wire form: `Content-Length: N\r\n\r\n` followed by exactly `N` bytes of
//! UTF-8 JSON. Additional headers are tolerated and ignored.

use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::DaemonError;

/// Read one framed JSON value from `reader`.
///
/// Returns `Ok(None)` on a clean EOF before any header bytes arrive (the
/// caller treats this as the child having closed its stdout). A `Err` is
/// returned for any other framing failure: missing `Content-Length`,
/// non-integer length, EOF mid-body, or invalid UTF-8/JSON.
pub async fn read_frame<R: AsyncBufRead + Unpin>(
    reader: &mut R,
) -> Result<Option<Value>, DaemonError> {
    let mut content_length: Option<usize> = None;
    let mut saw_any_header = false;

    loop {
        let mut line = String::new();
        let n = reader
            .read_line(&mut line)
            .await
            .map_err(DaemonError::Io)?;
        if n == 0 {
            if saw_any_header {
                return Err(DaemonError::Protocol(
                    "EOF while reading headers".to_string(),
                ));
            }
            return Ok(None);
        }

        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            break;
        }
        saw_any_header = true;

        if let Some(value) = line
            .split_once(':')
            .filter(|(k, _)| k.eq_ignore_ascii_case("Content-Length"))
            .map(|(_, v)| v.trim())
        {
            let parsed: usize = value
                .parse()
                .map_err(|_| DaemonError::Protocol(format!("invalid Content-Length: {value}")))?;
            content_length = Some(parsed);
        }
        // Unknown headers are tolerated and ignored.
    }

    let length = content_length
        .ok_or_else(|| DaemonError::Protocol("missing Content-Length header".to_string()))?;

    let mut body = vec![0u8; length];
    tokio::io::AsyncReadExt::read_exact(reader, &mut body)
        .await
        .map_err(|e| DaemonError::Protocol(format!("EOF before {length} body bytes: {e}")))?;

    let value: Value = serde_json::from_slice(&body)
        .map_err(|e| DaemonError::Protocol(format!("invalid JSON body: {e}")))?;
    Ok(Some(value))
}

/// Encode `value` as a single `Content-Length`-framed message.
pub fn encode_frame(value: &Value) -> Result<Vec<u8>, DaemonError> {
    let body = serde_json::to_vec(value)
        .map_err(|e| DaemonError::Protocol(format!("failed to serialize frame: {e}")))?;
    let mut out = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
    out.extend_from_slice(&body);
    Ok(out)
}

/// Write one framed JSON value to `writer` and flush.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    value: &Value,
) -> Result<(), DaemonError> {
    let bytes = encode_frame(value)?;
    writer.write_all(&bytes).await.map_err(DaemonError::Io)?;
    writer.flush().await.map_err(DaemonError::Io)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Cursor;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn roundtrip() {
        let value = json!({"jsonrpc": "2.0", "id": 1, "method": "initialize"});
        let bytes = encode_frame(&value).unwrap();
        let mut reader = BufReader::new(Cursor::new(bytes));
        let decoded = read_frame(&mut reader).await.unwrap().unwrap();
        assert_eq!(decoded, value);
    }

    #[tokio::test]
    async fn tolerates_extra_headers() {
        let body = br#"{"a":1}"#;
        let raw = format!(
            "X-Custom: ignored\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            std::str::from_utf8(body).unwrap()
        );
        let mut reader = BufReader::new(Cursor::new(raw.into_bytes()));
        let decoded = read_frame(&mut reader).await.unwrap().unwrap();
        assert_eq!(decoded, json!({"a": 1}));
    }

    #[tokio::test]
    async fn missing_content_length_is_protocol_error() {
        let raw = b"X-Custom: ignored\r\n\r\n{}".to_vec();
        let mut reader = BufReader::new(Cursor::new(raw));
        let err = read_frame(&mut reader).await.unwrap_err();
        assert_eq!(err.wire_kind(), "ProtocolError");
    }

    #[tokio::test]
    async fn eof_before_body_is_protocol_error() {
        let raw = b"Content-Length: 10\r\n\r\n{\"a\":1}".to_vec();
        let mut reader = BufReader::new(Cursor::new(raw));
        let err = read_frame(&mut reader).await.unwrap_err();
        assert_eq!(err.wire_kind(), "ProtocolError");
    }

    #[tokio::test]
    async fn clean_eof_before_any_header_is_none() {
        let mut reader = BufReader::new(Cursor::new(Vec::new()));
        let decoded = read_frame(&mut reader).await.unwrap();
        assert!(decoded.is_none());
    }

    #[tokio::test]
    async fn empty_body_only_decodes_if_valid_json_object() {
        let raw = b"Content-Length: 0\r\n\r\n".to_vec();
        let mut reader = BufReader::new(Cursor::new(raw));
        // `0` bytes is not valid JSON on its own; reading should error.
        let err = read_frame(&mut reader).await.unwrap_err();
        assert_eq!(err.wire_kind(), "ProtocolError");
    }

    #[tokio::test]
    async fn zero_length_empty_object_body_decodes() {
        let body = b"{}";
        let raw = format!("Content-Length: {}\r\n\r\n{}", body.len(), "{}");
        let mut reader = BufReader::new(Cursor::new(raw.into_bytes()));
        let decoded = read_frame(&mut reader).await.unwrap().unwrap();
        assert_eq!(decoded, json!({}));
    }
}
