//! Chunk-sized reads.

use tokio::io::{AsyncRead, AsyncReadExt};

/// Fill `buf` from `reader`, stopping early only at end of input.
///
/// Returns the number of bytes read; anything short of `buf.len()` means the
/// source is exhausted.
pub async fn read_chunk<R>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Number of chunks needed for `len` bytes. An empty source still takes one.
pub fn chunk_count(len: u64, unit: usize) -> u64 {
    len.div_ceil(unit.max(1) as u64).max(1)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]
    use super::*;

    #[tokio::test]
    async fn test_read_chunk_fills_across_short_reads() {
        let (mut tx, mut rx) = tokio::io::duplex(4);
        let writer = tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            tx.write_all(&[1u8; 10]).await.unwrap();
        });

        let mut buf = [0u8; 8];
        assert_eq!(read_chunk(&mut rx, &mut buf).await.unwrap(), 8);
        assert_eq!(read_chunk(&mut rx, &mut buf).await.unwrap(), 2);
        writer.await.unwrap();
        assert_eq!(read_chunk(&mut rx, &mut buf).await.unwrap(), 0);
    }

    #[test]
    fn test_chunk_count() {
        assert_eq!(chunk_count(0, 512), 1);
        assert_eq!(chunk_count(512, 512), 1);
        assert_eq!(chunk_count(513, 512), 2);
        assert_eq!(chunk_count(1500, 512), 3);
    }
}
