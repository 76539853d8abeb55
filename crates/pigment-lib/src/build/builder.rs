//! Construction of the coloring from sequences and labels.
//!
//! Pair emission walks every k-mer of every (already conditioned) sequence
//! against the graph and writes one big-endian `(node, color)` record per
//! hit. Workers claim sequences from a shared counter, fill private record
//! buffers, and flush each buffer to the shared temp-file writer in one
//! locked write, so records never interleave mid-pair. Everything after
//! that is the external-memory pipeline.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use tracing::info;

use crate::build::config::BuildConfig;
use crate::coloring::ColoringStore;
use crate::em::stages;
use crate::error::{Error, Result};
use crate::graph::GraphIndex;
use crate::tempfiles::TempFileManager;

/// Worker buffers are flushed once they reach this many bytes
const FLUSH_BYTES: usize = 1 << 20;

/// Builds the deduplicated coloring store for `graph` from sequences and
/// their color labels. `seqs` must already be upper-case ACGT runs; a
/// sequence shorter than `k` contributes nothing.
pub fn build_coloring(
    graph: &GraphIndex,
    seqs: &[Vec<u8>],
    colors: &[u64],
    config: &BuildConfig,
    temp: &TempFileManager,
) -> Result<ColoringStore> {
    config.validate()?;
    if seqs.len() != colors.len() {
        return Err(Error::InvalidArgument(format!(
            "{} sequences but {} colors",
            seqs.len(),
            colors.len()
        )));
    }

    info!("Step 1: Emitting (node, color) pairs...");
    let pairs = emit_pairs(graph, seqs, colors, config, temp)?;

    info!("Step 2: Sorting pairs...");
    let sorted = stages::sort_pairs(&pairs, config.ram_bytes, config.n_threads, temp)?;
    temp.remove(&pairs);

    info!("Step 3: Removing duplicate pairs...");
    let deduped = stages::dedup_pairs(&sorted, temp)?;
    temp.remove(&sorted);

    info!("Step 4: Grouping colors by node...");
    let by_node = stages::group_by_node(&deduped, temp)?;
    temp.remove(&deduped);

    info!("Step 5: Sorting nodes by color set...");
    let by_set = stages::sort_by_color_sets(&by_node, config.ram_bytes, config.n_threads, temp)?;
    temp.remove(&by_node);

    info!("Step 6: Grouping nodes by color set...");
    let grouped = stages::group_by_color_set(&by_set, temp)?;
    temp.remove(&by_set);

    info!("Step 7: Materializing the coloring store...");
    let store = ColoringStore::from_grouped_records(&grouped, graph.num_nodes())?;
    temp.remove(&grouped);

    Ok(store)
}

/// Walks all k-mers of all sequences and writes the pair file
fn emit_pairs(
    graph: &GraphIndex,
    seqs: &[Vec<u8>],
    colors: &[u64],
    config: &BuildConfig,
    temp: &TempFileManager,
) -> Result<PathBuf> {
    let path = temp.create_path("pairs-", ".bin");
    let writer = Mutex::new(BufWriter::with_capacity(1 << 20, File::create(&path)?));
    let next_seq = AtomicUsize::new(0);
    let first_error: Mutex<Option<Error>> = Mutex::new(None);

    std::thread::scope(|scope| {
        for _ in 0..config.n_threads {
            scope.spawn(|| {
                let mut buf: Vec<u8> = Vec::with_capacity(FLUSH_BYTES + 64);
                loop {
                    let i = next_seq.fetch_add(1, Ordering::SeqCst);
                    if i >= seqs.len() {
                        break;
                    }
                    if let Err(e) = emit_pairs_for_sequence(
                        graph,
                        &seqs[i],
                        colors[i],
                        config.add_rev_comp,
                        &mut buf,
                        &writer,
                    ) {
                        let mut slot = first_error.lock().unwrap();
                        if slot.is_none() {
                            *slot = Some(e);
                        }
                        break;
                    }
                }
                if !buf.is_empty() {
                    if let Err(e) = flush(&mut buf, &writer) {
                        let mut slot = first_error.lock().unwrap();
                        if slot.is_none() {
                            *slot = Some(e);
                        }
                    }
                }
            });
        }
    });

    if let Some(e) = first_error.into_inner().unwrap() {
        return Err(e);
    }

    let mut writer = writer.into_inner().unwrap();
    writer.flush()?;
    Ok(path)
}

/// Emits the pairs of one sequence (and of its reverse complement when
/// enabled) into the worker's buffer
fn emit_pairs_for_sequence(
    graph: &GraphIndex,
    seq: &[u8],
    color: u64,
    add_rev_comp: bool,
    buf: &mut Vec<u8>,
    writer: &Mutex<BufWriter<File>>,
) -> Result<()> {
    if let Some(&bad) = seq.iter().find(|&&b| !matches!(b, b'A' | b'C' | b'G' | b'T')) {
        return Err(Error::InvariantViolated(format!(
            "non-ACGT character {:?} reached pair emission",
            bad as char
        )));
    }

    walk_kmers(graph, seq, color, buf, writer)?;
    if add_rev_comp {
        let mut rc = seq.to_vec();
        sbwt::reverse_complement_in_place(&mut rc);
        walk_kmers(graph, &rc, color, buf, writer)?;
    }
    Ok(())
}

fn walk_kmers(
    graph: &GraphIndex,
    seq: &[u8],
    color: u64,
    buf: &mut Vec<u8>,
    writer: &Mutex<BufWriter<File>>,
) -> Result<()> {
    let k = graph.k();
    if seq.len() < k {
        return Ok(());
    }
    for start in 0..=(seq.len() - k) {
        if let Some(node) = graph.node_of(&seq[start..start + k]) {
            buf.extend_from_slice(&node.to_be_bytes());
            buf.extend_from_slice(&color.to_be_bytes());
            if buf.len() >= FLUSH_BYTES {
                flush(buf, writer)?;
            }
        }
    }
    Ok(())
}

fn flush(buf: &mut Vec<u8>, writer: &Mutex<BufWriter<File>>) -> Result<()> {
    let mut guard = writer.lock().unwrap();
    guard.write_all(buf)?;
    buf.clear();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn build_fixture(
        seqs: &[&[u8]],
        colors: &[u64],
        k: usize,
        n_threads: usize,
    ) -> (GraphIndex, ColoringStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let temp = TempFileManager::new(dir.path()).unwrap();
        let owned: Vec<Vec<u8>> = seqs.iter().map(|s| s.to_vec()).collect();
        let graph = GraphIndex::build(&owned, k, false, 1 << 30, n_threads, &temp).unwrap();
        let config = BuildConfig {
            k,
            ram_bytes: 1 << 20,
            n_threads,
            add_rev_comp: false,
            ..BuildConfig::default()
        };
        let store = build_coloring(&graph, &owned, colors, &config, &temp).unwrap();
        (graph, store, dir)
    }

    #[test]
    fn test_colors_match_kmer_membership() {
        let seqs: Vec<&[u8]> = vec![b"ACGTACGT", b"ACGTTTTT", b"GGGGGGGG"];
        let colors = vec![0, 1, 2];
        let (graph, store, _dir) = build_fixture(&seqs, &colors, 4, 2);

        // Every k-mer's stored colors are exactly the sequences containing
        // it.
        for (seq, &color) in seqs.iter().zip(&colors) {
            for window in seq.windows(4) {
                let node = graph.node_of(window).expect("indexed k-mer");
                assert!(
                    store.get_colorset(node).contains(color),
                    "k-mer {:?} should carry color {}",
                    std::str::from_utf8(window).unwrap(),
                    color
                );
            }
        }

        // ACGT occurs in sequences 0 and 1 only.
        let node = graph.node_of(b"ACGT").unwrap();
        assert_eq!(store.get_colorset(node).as_sorted_vector(), vec![0, 1]);

        // GGGG occurs in sequence 2 only.
        let node = graph.node_of(b"GGGG").unwrap();
        assert_eq!(store.get_colorset(node).as_sorted_vector(), vec![2]);
    }

    #[test]
    fn test_store_is_deduplicated() {
        // Two disjoint sequences per color: distinct color sets are {0},
        // {1}, and the empty set, no matter how many nodes there are.
        let seqs: Vec<&[u8]> = vec![b"ACGTACGTAC", b"TTTTTTTTTT"];
        let (_graph, store, _dir) = build_fixture(&seqs, &[0, 1], 4, 1);
        assert_eq!(store.num_sets(), 3);
    }

    #[test]
    fn test_shared_color_labels_collapse() {
        // The same label on both sequences gives a single non-empty color
        // set {5}.
        let seqs: Vec<&[u8]> = vec![b"ACGTACGTAC", b"TTTTTTTTTT"];
        let (graph, store, _dir) = build_fixture(&seqs, &[5, 5], 4, 1);
        assert_eq!(store.num_sets(), 2);
        let node = graph.node_of(b"ACGT").unwrap();
        assert_eq!(store.get_colorset(node).as_sorted_vector(), vec![5]);
    }

    #[test]
    fn test_short_sequences_are_skipped() {
        let seqs: Vec<&[u8]> = vec![b"ACGTACGTAC", b"AC"];
        let (_graph, store, _dir) = build_fixture(&seqs, &[0, 1], 4, 1);
        // Color 1 never makes it into the store.
        for node in 0..store.num_nodes() as u64 {
            assert!(!store.get_colorset(node).contains(1));
        }
    }

    #[test]
    fn test_non_acgt_is_rejected() {
        let dir = TempDir::new().unwrap();
        let temp = TempFileManager::new(dir.path()).unwrap();
        let clean = vec![b"ACGTACGT".to_vec()];
        let graph = GraphIndex::build(&clean, 4, false, 1 << 30, 1, &temp).unwrap();

        let dirty = vec![b"ACGNACGT".to_vec()];
        let config = BuildConfig { k: 4, n_threads: 1, ..BuildConfig::default() };
        let result = build_coloring(&graph, &dirty, &[0], &config, &temp);
        assert!(matches!(result, Err(Error::InvariantViolated(_))));
    }
}
