/*!
 * Buffered stream copy used when zero-copy is unavailable
 */

use std::io::{self, Read, Write};

use tracing::trace;

/// Copy from `src` to `dst` through a userspace buffer of `chunk_size` bytes.
///
/// With a `limit`, no byte past it is read from `src`. Returns the number of
/// bytes written; on error the bytes already written are lost to the caller,
/// as with `std::io::copy`.
pub fn copy_buffered<R, W>(
    mut dst: W,
    mut src: R,
    limit: Option<u64>,
    chunk_size: usize,
) -> io::Result<u64>
where
    R: Read,
    W: Write,
{
    let mut buffer = vec![0u8; chunk_size.max(1)];
    let mut copied = 0u64;

    loop {
        let want = match limit {
            Some(limit) => {
                let left = limit - copied;
                if left == 0 {
                    break;
                }
                left.min(buffer.len() as u64) as usize
            }
            None => buffer.len(),
        };

        let n = match src.read(&mut buffer[..want]) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };

        dst.write_all(&buffer[..n])?;
        copied += n as u64;
        trace!("buffered copy: {} bytes so far", copied);
    }

    dst.flush()?;
    Ok(copied)
}
