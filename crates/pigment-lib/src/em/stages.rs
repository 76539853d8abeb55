//! The construction pipeline's file-to-file stages.
//!
//! Each stage reads one temporary file and writes a new one; the caller
//! owns the files through the [`TempFileManager`] and removes each stage's
//! input once the next stage has consumed it.
//!
//! Record formats:
//! - pair files: fixed 16-byte big-endian `(node, color)` records
//! - node-grouped files: `(record_len, node, color…)`, all 8-byte
//!   big-endian, `record_len = 8 * (2 + n_colors)` counting itself
//! - color-set-grouped files: `(record_len, n_nodes, node…, color…)`

use std::cmp::Ordering;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use super::{
    be_u64, external_sort, fill_exact_or_eof, read_length_prefixed_record, write_be_u64,
    RecordLayout,
};
use crate::error::Result;
use crate::tempfiles::TempFileManager;

/// Size of one `(node, color)` pair record
pub const PAIR_RECORD_BYTES: usize = 16;

/// Compares pair records as `(node, color)` tuples
fn compare_pairs(a: &[u8], b: &[u8]) -> Ordering {
    let ka = (be_u64(&a[0..]), be_u64(&a[8..]));
    let kb = (be_u64(&b[0..]), be_u64(&b[8..]));
    ka.cmp(&kb)
}

/// Compares node-grouped records by their color payload, shorter payload
/// first on ties
fn compare_color_payloads(a: &[u8], b: &[u8]) -> Ordering {
    // Slice ordering is lexicographic with shorter-prefix-first, exactly
    // the payload order the grouping stage needs.
    a[16..].cmp(&b[16..])
}

/// Stage (a): sorts `(node, color)` pairs by node, then color
pub fn sort_pairs(
    input: &Path,
    ram_bytes: usize,
    n_threads: usize,
    temp: &TempFileManager,
) -> Result<PathBuf> {
    external_sort(
        input,
        RecordLayout::Fixed(PAIR_RECORD_BYTES),
        compare_pairs,
        ram_bytes,
        n_threads,
        temp,
    )
}

/// Stage (b): drops pair records identical to their predecessor
pub fn dedup_pairs(input: &Path, temp: &TempFileManager) -> Result<PathBuf> {
    let output = temp.create_path("pairs-dedup-", ".bin");
    let mut reader = BufReader::with_capacity(1 << 20, File::open(input)?);
    let mut writer = BufWriter::with_capacity(1 << 20, File::create(&output)?);

    let mut prev = [0u8; PAIR_RECORD_BYTES];
    let mut cur = [0u8; PAIR_RECORD_BYTES];
    let mut record_count: u64 = 0;
    let mut written: u64 = 0;

    while fill_exact_or_eof(&mut reader, &mut cur)? {
        if record_count == 0 || prev != cur {
            writer.write_all(&cur)?;
            written += 1;
        }
        prev = cur;
        record_count += 1;
    }
    writer.flush()?;

    debug!("Deduplicated {} pairs down to {}", record_count, written);
    Ok(output)
}

/// Stage (c): folds adjacent pairs sharing a node into one record
/// `(record_len, node, sorted colors…)`
pub fn group_by_node(input: &Path, temp: &TempFileManager) -> Result<PathBuf> {
    let output = temp.create_path("node-groups-", ".bin");
    let mut reader = BufReader::with_capacity(1 << 20, File::open(input)?);
    let mut writer = BufWriter::with_capacity(1 << 20, File::create(&output)?);

    let mut active_node: Option<u64> = None;
    let mut colors: Vec<u64> = Vec::new();
    let mut cur = [0u8; PAIR_RECORD_BYTES];

    while fill_exact_or_eof(&mut reader, &mut cur)? {
        let node = be_u64(&cur[0..]);
        let color = be_u64(&cur[8..]);
        match active_node {
            Some(n) if n == node => colors.push(color),
            _ => {
                if let Some(n) = active_node {
                    write_node_group(&mut writer, n, &mut colors)?;
                }
                active_node = Some(node);
                colors.clear();
                colors.push(color);
            }
        }
    }
    if let Some(n) = active_node {
        write_node_group(&mut writer, n, &mut colors)?;
    }
    writer.flush()?;
    Ok(output)
}

fn write_node_group<W: Write>(writer: &mut W, node: u64, colors: &mut Vec<u64>) -> Result<()> {
    // The upstream sort already ordered the colors; sort again so this
    // stage is correct on its own.
    colors.sort_unstable();
    colors.dedup();

    let record_len = 8 * (2 + colors.len() as u64);
    write_be_u64(writer, record_len)?;
    write_be_u64(writer, node)?;
    for &c in colors.iter() {
        write_be_u64(writer, c)?;
    }
    Ok(())
}

/// Stage (d): sorts node-grouped records by their color payload
pub fn sort_by_color_sets(
    input: &Path,
    ram_bytes: usize,
    n_threads: usize,
    temp: &TempFileManager,
) -> Result<PathBuf> {
    external_sort(
        input,
        RecordLayout::LengthPrefixed,
        compare_color_payloads,
        ram_bytes,
        n_threads,
        temp,
    )
}

/// Stage (e): folds adjacent records sharing a color payload into one
/// record `(record_len, n_nodes, sorted nodes…, colors…)`
pub fn group_by_color_set(input: &Path, temp: &TempFileManager) -> Result<PathBuf> {
    let output = temp.create_path("colorset-groups-", ".bin");
    let mut reader = BufReader::with_capacity(1 << 20, File::open(input)?);
    let mut writer = BufWriter::with_capacity(1 << 20, File::create(&output)?);

    let mut active_colors: Vec<u8> = Vec::new();
    let mut nodes: Vec<u64> = Vec::new();
    let mut record: Vec<u8> = Vec::new();
    let mut n_groups: u64 = 0;

    while read_length_prefixed_record(&mut reader, &mut record)? {
        let node = be_u64(&record[8..]);
        let colors = &record[16..];

        if !nodes.is_empty() && colors == active_colors.as_slice() {
            nodes.push(node);
        } else {
            if !nodes.is_empty() {
                write_color_set_group(&mut writer, &mut nodes, &active_colors)?;
                n_groups += 1;
            }
            active_colors.clear();
            active_colors.extend_from_slice(colors);
            nodes.clear();
            nodes.push(node);
        }
    }
    if !nodes.is_empty() {
        write_color_set_group(&mut writer, &mut nodes, &active_colors)?;
        n_groups += 1;
    }
    writer.flush()?;

    debug!("Collected {} distinct color sets", n_groups);
    Ok(output)
}

fn write_color_set_group<W: Write>(
    writer: &mut W,
    nodes: &mut Vec<u64>,
    color_payload: &[u8],
) -> Result<()> {
    nodes.sort_unstable();

    let record_len = 8 * (2 + nodes.len() as u64) + color_payload.len() as u64;
    write_be_u64(writer, record_len)?;
    write_be_u64(writer, nodes.len() as u64)?;
    for &n in nodes.iter() {
        write_be_u64(writer, n)?;
    }
    writer.write_all(color_payload)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_pair_file(path: &Path, pairs: &[(u64, u64)]) {
        let mut bytes = Vec::new();
        for &(x, y) in pairs {
            bytes.extend_from_slice(&x.to_be_bytes());
            bytes.extend_from_slice(&y.to_be_bytes());
        }
        fs::write(path, bytes).unwrap();
    }

    fn read_pair_file(path: &Path) -> Vec<(u64, u64)> {
        fs::read(path)
            .unwrap()
            .chunks_exact(16)
            .map(|c| (be_u64(&c[0..]), be_u64(&c[8..])))
            .collect()
    }

    /// Parses a node-grouped file into (node, colors) entries
    fn read_node_groups(path: &Path) -> Vec<(u64, Vec<u64>)> {
        let mut reader = BufReader::new(File::open(path).unwrap());
        let mut record = Vec::new();
        let mut out = Vec::new();
        while read_length_prefixed_record(&mut reader, &mut record).unwrap() {
            let node = be_u64(&record[8..]);
            let colors = record[16..].chunks_exact(8).map(be_u64).collect();
            out.push((node, colors));
        }
        out
    }

    /// Parses a color-set-grouped file into (nodes, colors) entries
    fn read_color_set_groups(path: &Path) -> Vec<(Vec<u64>, Vec<u64>)> {
        let mut reader = BufReader::new(File::open(path).unwrap());
        let mut record = Vec::new();
        let mut out = Vec::new();
        while read_length_prefixed_record(&mut reader, &mut record).unwrap() {
            let n_nodes = be_u64(&record[8..]) as usize;
            let nodes = record[16..16 + 8 * n_nodes].chunks_exact(8).map(be_u64).collect();
            let colors = record[16 + 8 * n_nodes..].chunks_exact(8).map(be_u64).collect();
            out.push((nodes, colors));
        }
        out
    }

    #[test]
    fn test_dedup_pairs() {
        let dir = TempDir::new().unwrap();
        let temp = TempFileManager::new(dir.path()).unwrap();
        let input = dir.path().join("pairs.bin");
        write_pair_file(&input, &[(1, 1), (1, 1), (1, 2), (2, 1), (2, 1), (2, 1)]);

        let out = dedup_pairs(&input, &temp).unwrap();
        assert_eq!(read_pair_file(&out), vec![(1, 1), (1, 2), (2, 1)]);
    }

    #[test]
    fn test_group_by_node() {
        let dir = TempDir::new().unwrap();
        let temp = TempFileManager::new(dir.path()).unwrap();
        let input = dir.path().join("pairs.bin");
        write_pair_file(&input, &[(3, 0), (3, 2), (5, 1), (7, 0), (7, 1), (7, 4)]);

        let out = group_by_node(&input, &temp).unwrap();
        assert_eq!(
            read_node_groups(&out),
            vec![
                (3, vec![0, 2]),
                (5, vec![1]),
                (7, vec![0, 1, 4]),
            ]
        );
    }

    #[test]
    fn test_full_pipeline_on_small_relation() {
        let dir = TempDir::new().unwrap();
        let temp = TempFileManager::new(dir.path()).unwrap();
        let input = dir.path().join("pairs.bin");

        // Unsorted, with duplicates; nodes 3 and 9 share the color set
        // {0, 2}, node 5 has {1}, node 7 has {2}.
        write_pair_file(
            &input,
            &[(9, 2), (5, 1), (3, 0), (7, 2), (3, 2), (9, 0), (3, 0), (9, 2)],
        );

        let sorted = sort_pairs(&input, 1 << 20, 2, &temp).unwrap();
        let dedup = dedup_pairs(&sorted, &temp).unwrap();
        let by_node = group_by_node(&dedup, &temp).unwrap();
        let by_set = sort_by_color_sets(&by_node, 1 << 20, 2, &temp).unwrap();
        let grouped = group_by_color_set(&by_set, &temp).unwrap();

        let mut groups = read_color_set_groups(&grouped);
        groups.sort_by(|a, b| a.1.cmp(&b.1));
        assert_eq!(
            groups,
            vec![
                (vec![3, 9], vec![0, 2]),
                (vec![5], vec![1]),
                (vec![7], vec![2]),
            ]
        );
    }

    #[test]
    fn test_color_payload_order_breaks_ties_by_length() {
        // {1} sorts before {1, 2}: equal prefix, shorter record first.
        let dir = TempDir::new().unwrap();
        let temp = TempFileManager::new(dir.path()).unwrap();
        let input = dir.path().join("pairs.bin");
        write_pair_file(&input, &[(1, 1), (1, 2), (2, 1)]);

        let by_node = group_by_node(&input, &temp).unwrap();
        let by_set = sort_by_color_sets(&by_node, 1 << 20, 1, &temp).unwrap();
        assert_eq!(
            read_node_groups(&by_set),
            vec![(2, vec![1]), (1, vec![1, 2])]
        );
    }
}
