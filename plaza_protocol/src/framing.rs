// Length-delimited framing for the TCP transport.
//
// A frame is a 4-byte big-endian length followed by that many payload bytes.
// The payload is opaque here (in practice one JSON `Envelope`); callers do the
// JSON step themselves.
//
// Avatar updates are tiny, so `MAX_FRAME_SIZE` is kept small. An oversized
// length prefix on read is reported as `InvalidData` before any allocation.

use std::io::{self, Read, Write};

/// Largest payload accepted in either direction (64 KiB).
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Write one frame and flush.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> io::Result<()> {
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|len| *len as usize <= MAX_FRAME_SIZE)
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("frame of {} bytes exceeds {MAX_FRAME_SIZE}", payload.len()),
            )
        })?;
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(payload)?;
    writer.flush()
}

/// Read one frame. A clean close before the prefix surfaces as
/// `UnexpectedEof`.
pub fn read_frame<R: Read>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut prefix = [0u8; 4];
    reader.read_exact(&mut prefix)?;
    let len = u32::from_be_bytes(prefix) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("incoming frame of {len} bytes exceeds {MAX_FRAME_SIZE}"),
        ));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    Ok(payload)
}
