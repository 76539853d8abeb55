//! External-memory machinery used during index construction.
//!
//! Construction never holds the full `(node, color)` relation in memory.
//! Instead it streams fixed-width pair records and variable-length grouped
//! records through temporary files:
//!
//! 1. [`stages::sort_pairs`]: RAM-bounded sort of 16-byte pair records
//! 2. [`stages::dedup_pairs`]: drop identical adjacent records
//! 3. [`stages::group_by_node`]: fold pairs into `(node, colors…)` records
//! 4. [`stages::sort_by_color_sets`]: sort grouped records by color payload
//! 5. [`stages::group_by_color_set`]: fold into `(nodes…, colors…)` records
//!
//! All multi-byte integers in these files are big-endian. Variable-length
//! records start with an 8-byte length that counts the length field itself.

pub mod sort;
pub mod stages;

pub use sort::{external_sort, RecordLayout};

use std::io::{self, Read, Write};

/// Parses a big-endian u64 from the start of `bytes`
pub(crate) fn be_u64(bytes: &[u8]) -> u64 {
    u64::from_be_bytes(bytes[..8].try_into().expect("8-byte slice"))
}

/// Writes a u64 as big-endian
pub(crate) fn write_be_u64<W: Write>(writer: &mut W, value: u64) -> io::Result<()> {
    writer.write_all(&value.to_be_bytes())
}

/// Fills `buf` completely, or returns `false` on a clean end of stream.
/// End of stream in the middle of `buf` is an error: it means a truncated
/// record.
pub(crate) fn fill_exact_or_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            if filled == 0 {
                return Ok(false);
            }
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "truncated record at end of stream",
            ));
        }
        filled += n;
    }
    Ok(true)
}

/// Reads one length-prefixed record (including its length field) into
/// `record`. Returns `false` on a clean end of stream.
pub(crate) fn read_length_prefixed_record<R: Read>(
    reader: &mut R,
    record: &mut Vec<u8>,
) -> io::Result<bool> {
    let mut len_bytes = [0u8; 8];
    if !fill_exact_or_eof(reader, &mut len_bytes)? {
        return Ok(false);
    }
    let record_len = u64::from_be_bytes(len_bytes) as usize;
    if record_len < 8 || record_len % 8 != 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("malformed record length {}", record_len),
        ));
    }

    record.clear();
    record.extend_from_slice(&len_bytes);
    record.resize(record_len, 0);
    reader.read_exact(&mut record[8..])?;
    Ok(true)
}
