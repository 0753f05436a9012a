//! Newline-delimited JSON framing: one serialized record per line.

use serde::{Serialize, de::DeserializeOwned};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::WireError;

/// Largest frame accepted from a peer, newline included.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Serialize `message` and write it as a single line, flushing immediately.
pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_vec(message)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one line and deserialize it. `Ok(None)` on a clean end of stream.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>, WireError>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    let mut line = String::new();
    let read = reader
        .take(MAX_FRAME_LEN as u64 + 1)
        .read_line(&mut line)
        .await?;

    if read == 0 {
        return Ok(None);
    }
    if read > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLong { limit: MAX_FRAME_LEN });
    }

    let message = serde_json::from_str(line.trim_end())?;
    Ok(Some(message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Location;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn frames_are_newline_terminated_and_read_back_in_order() {
        let mut buf = Vec::new();
        write_frame(&mut buf, &Location::colombo()).await.unwrap();
        write_frame(&mut buf, &Location::unknown()).await.unwrap();
        assert_eq!(buf.iter().filter(|b| **b == b'\n').count(), 2);

        let mut reader = BufReader::new(buf.as_slice());
        let first: Option<Location> = read_frame(&mut reader).await.unwrap();
        let second: Option<Location> = read_frame(&mut reader).await.unwrap();
        let end: Option<Location> = read_frame(&mut reader).await.unwrap();

        assert_eq!(first, Some(Location::colombo()));
        assert_eq!(second, Some(Location::unknown()));
        assert_eq!(end, None);
    }

    #[tokio::test]
    async fn wrong_shape_is_malformed() {
        let mut reader = BufReader::new(&b"{\"temperature\": 3}\n"[..]);
        let err = read_frame::<_, Location>(&mut reader).await.unwrap_err();
        assert!(matches!(err, WireError::Malformed(_)));
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let big = vec![b'a'; MAX_FRAME_LEN + 10];
        let mut reader = BufReader::new(big.as_slice());
        let err = read_frame::<_, Location>(&mut reader).await.unwrap_err();
        assert!(matches!(err, WireError::FrameTooLong { .. }));
    }
}
