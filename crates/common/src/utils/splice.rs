use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const SPLICE_BUFFER_BYTES: usize = 16 * 1024;

/// Copy bytes both ways between two open streams
///
/// The session ends as soon as either direction reaches EOF or fails: the
/// finished direction shuts down its writer, then both streams are dropped
/// so a peer that stays open cannot hold the other side. Returns
/// `(a_to_b, b_to_a)` byte counts.
pub async fn splice<A, B>(a: A, b: B) -> io::Result<(u64, u64)>
where
    A: AsyncRead + AsyncWrite,
    B: AsyncRead + AsyncWrite,
{
    let (mut a_read, mut a_write) = tokio::io::split(a);
    let (mut b_read, mut b_write) = tokio::io::split(b);
    let mut a_to_b = 0u64;
    let mut b_to_a = 0u64;

    let result = tokio::select! {
        r = pump(&mut a_read, &mut b_write, &mut a_to_b) => r,
        r = pump(&mut b_read, &mut a_write, &mut b_to_a) => r,
    };

    result.map(|()| (a_to_b, b_to_a))
}

async fn pump<R, W>(reader: &mut R, writer: &mut W, count: &mut u64) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; SPLICE_BUFFER_BYTES];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return writer.shutdown().await;
        }
        writer.write_all(&buf[..n]).await?;
        *count += n as u64;
    }
}
