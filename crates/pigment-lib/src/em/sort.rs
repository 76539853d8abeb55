//! Generic RAM-bounded external merge sort.
//!
//! The sorter is parameterized over a record layout and a byte-slice
//! comparator, so the same machinery sorts the fixed-width pair files and
//! the variable-length grouped-record files of the construction pipeline:
//!
//! 1. Records are read into an in-memory arena until the RAM budget fills
//! 2. The full arena is sorted in parallel and flushed as one run file
//! 3. Run files are memory-mapped and merged with a k-way scan
//!
//! The sort is stable: run generation uses a stable parallel sort and the
//! merge breaks comparator ties by run index, which preserves input order
//! for equal records.

use std::cmp::Ordering;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use rayon::prelude::*;
use tracing::debug;

use super::{be_u64, fill_exact_or_eof};
use crate::error::{Error, Result};
use crate::tempfiles::TempFileManager;

/// How record boundaries are found in a byte stream
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordLayout {
    /// Every record is exactly this many bytes
    Fixed(usize),
    /// Each record starts with an 8-byte big-endian length that counts the
    /// length field itself
    LengthPrefixed,
}

impl RecordLayout {
    /// Length of the record starting at `bytes[0]`, or `None` if the slice
    /// is exhausted
    fn record_len(&self, bytes: &[u8]) -> io::Result<Option<usize>> {
        match self {
            RecordLayout::Fixed(n) => {
                if bytes.is_empty() {
                    return Ok(None);
                }
                if bytes.len() < *n {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "truncated fixed-width record",
                    ));
                }
                Ok(Some(*n))
            }
            RecordLayout::LengthPrefixed => {
                if bytes.is_empty() {
                    return Ok(None);
                }
                if bytes.len() < 8 {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "truncated record length",
                    ));
                }
                let len = be_u64(bytes) as usize;
                if len < 8 || bytes.len() < len {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("malformed record length {}", len),
                    ));
                }
                Ok(Some(len))
            }
        }
    }
}

/// Sorts the records of `input` into a fresh temporary file and returns its
/// path. `ram_bytes` bounds the peak memory of run generation; `cmp` must
/// be a total order over record byte slices.
pub fn external_sort<F>(
    input: &Path,
    layout: RecordLayout,
    cmp: F,
    ram_bytes: usize,
    n_threads: usize,
    temp: &TempFileManager,
) -> Result<PathBuf>
where
    F: Fn(&[u8], &[u8]) -> Ordering + Sync,
{
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(n_threads)
        .build()
        .map_err(|e| Error::InvalidArgument(format!("failed to create thread pool: {}", e)))?;

    // Half the budget for the arena, half as sort scratch.
    let arena_budget = (ram_bytes / 2).max(1);

    let mut reader = BufReader::with_capacity(1 << 20, File::open(input)?);
    let mut arena: Vec<u8> = Vec::new();
    let mut records: Vec<(usize, usize)> = Vec::new();
    let mut runs: Vec<PathBuf> = Vec::new();

    loop {
        let start = arena.len();
        if !read_record_into_arena(&mut reader, layout, &mut arena)? {
            break;
        }
        records.push((start, arena.len() - start));

        if arena.len() >= arena_budget {
            flush_run(&pool, &cmp, &arena, &mut records, temp, &mut runs)?;
            arena.clear();
        }
    }
    if !records.is_empty() {
        flush_run(&pool, &cmp, &arena, &mut records, temp, &mut runs)?;
        arena.clear();
    }
    drop(reader);

    debug!("Merging {} sorted runs", runs.len());
    let output = temp.create_path("sorted-", ".bin");
    merge_runs(&runs, layout, &cmp, &output)?;

    for run in &runs {
        temp.remove(run);
    }
    Ok(output)
}

/// Appends the next record of `reader` to the arena. Returns `false` on a
/// clean end of stream.
fn read_record_into_arena<R: io::Read>(
    reader: &mut R,
    layout: RecordLayout,
    arena: &mut Vec<u8>,
) -> io::Result<bool> {
    let start = arena.len();
    match layout {
        RecordLayout::Fixed(n) => {
            arena.resize(start + n, 0);
            if !fill_exact_or_eof(reader, &mut arena[start..])? {
                arena.truncate(start);
                return Ok(false);
            }
            Ok(true)
        }
        RecordLayout::LengthPrefixed => {
            let mut len_bytes = [0u8; 8];
            if !fill_exact_or_eof(reader, &mut len_bytes)? {
                return Ok(false);
            }
            let record_len = u64::from_be_bytes(len_bytes) as usize;
            if record_len < 8 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("malformed record length {}", record_len),
                ));
            }
            arena.extend_from_slice(&len_bytes);
            arena.resize(start + record_len, 0);
            reader.read_exact(&mut arena[start + 8..])?;
            Ok(true)
        }
    }
}

/// Stable-sorts the buffered records and writes them out as one run file
fn flush_run<F>(
    pool: &rayon::ThreadPool,
    cmp: &F,
    arena: &[u8],
    records: &mut Vec<(usize, usize)>,
    temp: &TempFileManager,
    runs: &mut Vec<PathBuf>,
) -> Result<()>
where
    F: Fn(&[u8], &[u8]) -> Ordering + Sync,
{
    pool.install(|| {
        records.par_sort_by(|&(a_off, a_len), &(b_off, b_len)| {
            cmp(&arena[a_off..a_off + a_len], &arena[b_off..b_off + b_len])
        });
    });

    let path = temp.create_path("run-", ".bin");
    let mut writer = BufWriter::with_capacity(1 << 20, File::create(&path)?);
    for &(off, len) in records.iter() {
        writer.write_all(&arena[off..off + len])?;
    }
    writer.flush()?;

    debug!("Flushed run of {} records to {:?}", records.len(), path);
    records.clear();
    runs.push(path);
    Ok(())
}

/// A cursor over one memory-mapped run file
struct RunCursor {
    mmap: Mmap,
    offset: usize,
}

impl RunCursor {
    fn current(&self, layout: RecordLayout) -> io::Result<Option<&[u8]>> {
        match layout.record_len(&self.mmap[self.offset..])? {
            Some(len) => Ok(Some(&self.mmap[self.offset..self.offset + len])),
            None => Ok(None),
        }
    }

    fn advance(&mut self, layout: RecordLayout) -> io::Result<()> {
        if let Some(len) = layout.record_len(&self.mmap[self.offset..])? {
            self.offset += len;
        }
        Ok(())
    }
}

/// K-way merge of sorted runs into `output`. Ties between runs go to the
/// lowest run index so equal records keep their input order.
fn merge_runs<F>(runs: &[PathBuf], layout: RecordLayout, cmp: &F, output: &Path) -> Result<()>
where
    F: Fn(&[u8], &[u8]) -> Ordering + Sync,
{
    let mut writer = BufWriter::with_capacity(1 << 22, File::create(output)?);

    let mut cursors = Vec::new();
    for run in runs {
        let file = File::open(run)?;
        if file.metadata()?.len() == 0 {
            continue;
        }
        // SAFETY: the run file was fully written and flushed above, and is
        // not modified while mapped.
        let mmap = unsafe { Mmap::map(&file)? };
        cursors.push(RunCursor { mmap, offset: 0 });
    }

    loop {
        let mut min_idx: Option<usize> = None;
        for (i, cursor) in cursors.iter().enumerate() {
            let Some(record) = cursor.current(layout)? else {
                continue;
            };
            match min_idx {
                None => min_idx = Some(i),
                Some(m) => {
                    let best = cursors[m]
                        .current(layout)?
                        .expect("min cursor has a record");
                    if cmp(record, best) == Ordering::Less {
                        min_idx = Some(i);
                    }
                }
            }
        }
        let Some(m) = min_idx else {
            break;
        };
        let record = cursors[m]
            .current(layout)?
            .expect("selected cursor has a record");
        writer.write_all(record)?;
        cursors[m].advance(layout)?;
    }

    writer.flush()?;
    Ok(())
}
