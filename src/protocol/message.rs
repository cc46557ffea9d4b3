//! Array message codec.
//!
//! Wire format: a 2-byte big-endian body length, then the items, each
//! terminated by a NUL byte.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest body a 16-bit length header can describe.
pub const MAX_BODY_SIZE: usize = u16::MAX as usize;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("message body of {0} bytes exceeds the maximum of {MAX_BODY_SIZE}")]
    TooLarge(usize),

    #[error("message item contains a NUL byte")]
    EmbeddedNul,

    #[error("message body is not NUL-terminated")]
    Unterminated,

    #[error("message item is not valid UTF-8")]
    InvalidUtf8,

    #[error("connection closed in the middle of a message")]
    Truncated,
}

/// Encode items into a framed array message.
pub fn encode_array<S: AsRef<str>>(items: &[S]) -> Result<Vec<u8>, ProtocolError> {
    let body_len: usize = items.iter().map(|item| item.as_ref().len() + 1).sum();
    if body_len > MAX_BODY_SIZE {
        return Err(ProtocolError::TooLarge(body_len));
    }

    let mut buf = Vec::with_capacity(2 + body_len);
    buf.extend_from_slice(&(body_len as u16).to_be_bytes());
    for item in items {
        let item = item.as_ref();
        if item.as_bytes().contains(&0) {
            return Err(ProtocolError::EmbeddedNul);
        }
        buf.extend_from_slice(item.as_bytes());
        buf.push(0);
    }
    Ok(buf)
}

/// Decode a message body (without the length header).
pub fn decode_array(body: &[u8]) -> Result<Vec<String>, ProtocolError> {
    if body.is_empty() {
        return Ok(Vec::new());
    }
    let Some((&0, rest)) = body.split_last() else {
        return Err(ProtocolError::Unterminated);
    };

    rest.split(|b| *b == 0)
        .map(|item| {
            std::str::from_utf8(item)
                .map(str::to_owned)
                .map_err(|_| ProtocolError::InvalidUtf8)
        })
        .collect()
}

/// Read one array message. Returns `None` on a clean EOF between messages.
pub async fn read_array<R>(reader: &mut R) -> Result<Option<Vec<String>>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 2];
    match reader.read_exact(&mut header[..1]).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    read_exact_or_truncated(reader, &mut header[1..]).await?;

    let mut body = vec![0u8; u16::from_be_bytes(header) as usize];
    read_exact_or_truncated(reader, &mut body).await?;
    decode_array(&body).map(Some)
}

async fn read_exact_or_truncated<R>(reader: &mut R, buf: &mut [u8]) -> Result<(), ProtocolError>
where
    R: AsyncRead + Unpin,
{
    reader.read_exact(buf).await.map(|_| ()).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            ProtocolError::Truncated
        } else {
            ProtocolError::Io(e)
        }
    })
}

/// Write one array message.
pub async fn write_array<W, S>(writer: &mut W, items: &[S]) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
    S: AsRef<str>,
{
    let buf = encode_array(items)?;
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_wire_format() {
        let buf = encode_array(&["initialized"]).unwrap();
        assert_eq!(&buf[..2], &[0, 12]);
        assert_eq!(&buf[2..], b"initialized\0");

        let buf = encode_array(&["log", "", "x"]).unwrap();
        assert_eq!(buf, b"\x00\x07log\0\0x\0");
    }

    #[test]
    fn rejects_nul_and_oversized_items() {
        assert!(matches!(encode_array(&["a\0b"]), Err(ProtocolError::EmbeddedNul)));
        let big = "x".repeat(MAX_BODY_SIZE);
        assert!(matches!(encode_array(&[big]), Err(ProtocolError::TooLarge(_))));
    }

    #[test]
    fn decode_keeps_empty_items() {
        assert_eq!(decode_array(b"a\0\0b\0").unwrap(), vec!["a", "", "b"]);
        assert!(decode_array(b"").unwrap().is_empty());
        assert!(matches!(decode_array(b"abc"), Err(ProtocolError::Unterminated)));
    }

    #[tokio::test]
    async fn reads_messages_until_eof() {
        let mut wire = encode_array(&["version", "1"]).unwrap();
        wire.extend(encode_array(&["ping"]).unwrap());
        let mut reader = wire.as_slice();

        assert_eq!(read_array(&mut reader).await.unwrap(), Some(vec!["version".into(), "1".into()]));
        assert_eq!(read_array(&mut reader).await.unwrap(), Some(vec!["ping".into()]));
        assert_eq!(read_array(&mut reader).await.unwrap(), None);
    }

    #[tokio::test]
    async fn truncated_message_is_an_error() {
        let wire = encode_array(&["authenticate", "logging"]).unwrap();
        let mut reader = &wire[..wire.len() - 3];
        assert!(matches!(read_array(&mut reader).await, Err(ProtocolError::Truncated)));
    }
}
