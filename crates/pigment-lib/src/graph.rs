//! The de Bruijn graph node oracle.
//!
//! The graph itself is an SBWT index built and queried through the `sbwt`
//! crate; this module wraps it behind the small surface the coloring layer
//! needs: k-mer lookup, node count, and (de)serialization. Node ids are the
//! SBWT's colexicographic ranks, so they are dense in `0..num_nodes()` and
//! stable across save/load.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use sbwt::{
    load_sbwt_index_variant, write_sbwt_index_variant, BitPackedKmerSorting, SbwtIndexBuilder,
    SbwtIndexVariant,
};
use tracing::info;

use crate::error::{Error, Result};
use crate::tempfiles::TempFileManager;

/// A k-mer to node-id oracle over the succinct de Bruijn graph
pub struct GraphIndex {
    sbwt: SbwtIndexVariant,
}

impl GraphIndex {
    /// Builds the graph from ACGT sequences. When `add_rev_comp` is set the
    /// reverse complement of every sequence is indexed as well.
    pub fn build(
        seqs: &[Vec<u8>],
        k: usize,
        add_rev_comp: bool,
        ram_bytes: usize,
        n_threads: usize,
        temp: &TempFileManager,
    ) -> Result<Self> {
        if k == 0 {
            return Err(Error::InvalidArgument("k must be positive".to_string()));
        }

        info!("Building the de Bruijn graph (k = {})", k);
        let mem_gb = (ram_bytes / 1_000_000_000).max(1);
        let (sbwt, _lcs) = SbwtIndexBuilder::new()
            .k(k)
            .n_threads(n_threads)
            .add_rev_comp(add_rev_comp)
            .build_lcs(false)
            .algorithm(
                BitPackedKmerSorting::new()
                    .mem_gb(mem_gb)
                    .dedup_batches(false)
                    .temp_dir(temp.dir()),
            )
            .run(sbwt::VecSeqStream::new(seqs));

        let graph = GraphIndex {
            sbwt: SbwtIndexVariant::SubsetMatrix(sbwt),
        };
        info!(
            "Graph has {} nodes ({} distinct k-mers)",
            graph.num_nodes(),
            graph.num_kmers()
        );
        Ok(graph)
    }

    /// Order of the de Bruijn graph
    pub fn k(&self) -> usize {
        match &self.sbwt {
            SbwtIndexVariant::SubsetMatrix(sbwt) => sbwt.k(),
        }
    }

    /// Number of node ids, including the SBWT's technical dummy nodes.
    /// Every id returned by [`GraphIndex::node_of`] is below this.
    pub fn num_nodes(&self) -> usize {
        match &self.sbwt {
            SbwtIndexVariant::SubsetMatrix(sbwt) => sbwt.n_sets(),
        }
    }

    /// Number of distinct k-mers stored in the graph
    pub fn num_kmers(&self) -> usize {
        match &self.sbwt {
            SbwtIndexVariant::SubsetMatrix(sbwt) => sbwt.n_kmers(),
        }
    }

    /// Maps a k-mer (upper-case ACGT) to its node id, or `None` if the
    /// k-mer is not in the graph. Any other byte makes the k-mer absent.
    pub fn node_of(&self, kmer: &[u8]) -> Option<u64> {
        debug_assert_eq!(kmer.len(), self.k());
        match &self.sbwt {
            SbwtIndexVariant::SubsetMatrix(sbwt) => {
                sbwt.search(kmer).map(|range| range.start as u64)
            }
        }
    }

    /// Writes the graph in the upstream SBWT container format
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        write_sbwt_index_variant(&self.sbwt, &mut writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Loads a graph written by [`GraphIndex::save`]
    pub fn load(path: &Path) -> Result<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        let sbwt = load_sbwt_index_variant(&mut reader)
            .map_err(|e| Error::Parse(format!("failed to load graph index: {}", e)))?;
        Ok(GraphIndex { sbwt })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn small_graph(seqs: &[&[u8]], k: usize) -> (GraphIndex, TempDir) {
        let dir = TempDir::new().unwrap();
        let temp = TempFileManager::new(dir.path()).unwrap();
        let owned: Vec<Vec<u8>> = seqs.iter().map(|s| s.to_vec()).collect();
        let graph = GraphIndex::build(&owned, k, false, 1 << 30, 1, &temp).unwrap();
        (graph, dir)
    }

    #[test]
    fn test_build_and_lookup() {
        let (graph, _dir) = small_graph(&[b"ACGTACGT", b"TTTTTT"], 4);
        assert_eq!(graph.k(), 4);

        // Every k-mer of the input resolves to a distinct in-range node.
        let mut seen = std::collections::HashSet::new();
        for kmer in [&b"ACGT"[..], b"CGTA", b"GTAC", b"TACG", b"TTTT"] {
            let node = graph.node_of(kmer).expect("k-mer is indexed");
            assert!((node as usize) < graph.num_nodes());
            seen.insert(node);
        }
        assert_eq!(seen.len(), 5);

        // Absent and invalid k-mers report None.
        assert_eq!(graph.node_of(b"AAAA"), None);
        assert_eq!(graph.node_of(b"ACGN"), None);
    }

    #[test]
    fn test_rev_comp_indexing() {
        let dir = TempDir::new().unwrap();
        let temp = TempFileManager::new(dir.path()).unwrap();
        let seqs = vec![b"ACGTAAGC".to_vec()];

        let forward = GraphIndex::build(&seqs, 5, false, 1 << 30, 1, &temp).unwrap();
        assert_eq!(forward.node_of(b"GCTTA"), None);

        let both = GraphIndex::build(&seqs, 5, true, 1 << 30, 1, &temp).unwrap();
        // GCTTA is the reverse complement of TAAGC.
        assert!(both.node_of(b"GCTTA").is_some());
    }

    #[test]
    fn test_save_load_preserves_node_ids() {
        let (graph, dir) = small_graph(&[b"ACGTACGTAC", b"GGGTTTACCA"], 5);
        let path = dir.path().join("graph.tdbg");
        graph.save(&path).unwrap();
        let loaded = GraphIndex::load(&path).unwrap();

        assert_eq!(graph.k(), loaded.k());
        assert_eq!(graph.num_nodes(), loaded.num_nodes());
        for kmer in [&b"ACGTA"[..], b"CGTAC", b"GGGTT", b"TTACC", b"TACCA"] {
            assert_eq!(graph.node_of(kmer), loaded.node_of(kmer));
        }
    }
}
