//! The on-disk index: a graph plus its coloring under one path prefix.
//!
//! Two files sit next to each other:
//! - `<prefix>.tdbg`: the SBWT graph, in the upstream container format
//! - `<prefix>.tcolors`: the [`ColoringStore`]
//!
//! Both are written only after their structures are fully built, so a
//! partially written index is never observed at the final paths.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::info;

use crate::coloring::ColoringStore;
use crate::error::{Error, Result};
use crate::graph::GraphIndex;

/// Path of the graph component under a prefix
pub fn graph_path(prefix: &Path) -> PathBuf {
    append_extension(prefix, "tdbg")
}

/// Path of the coloring component under a prefix
pub fn coloring_path(prefix: &Path) -> PathBuf {
    append_extension(prefix, "tcolors")
}

fn append_extension(prefix: &Path, ext: &str) -> PathBuf {
    let mut name = prefix.as_os_str().to_os_string();
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}

/// A loaded colored de Bruijn graph index
pub struct ColoredIndex {
    /// The k-mer to node oracle
    pub graph: GraphIndex,
    /// The node to color-set mapping
    pub coloring: ColoringStore,
}

impl ColoredIndex {
    /// Loads both components from `<prefix>.tdbg` and `<prefix>.tcolors`,
    /// verifying that they describe the same graph
    pub fn load(prefix: &Path) -> Result<Self> {
        let graph = GraphIndex::load(&graph_path(prefix))?;
        let coloring_file = coloring_path(prefix);
        let mut reader = BufReader::new(File::open(&coloring_file)?);
        let coloring = ColoringStore::load(&mut reader)?;

        if coloring.num_nodes() != graph.num_nodes() {
            return Err(Error::InvariantViolated(format!(
                "coloring at {} covers {} nodes but the graph has {}",
                coloring_file.display(),
                coloring.num_nodes(),
                graph.num_nodes()
            )));
        }

        info!(
            "Loaded index {} ({} nodes, {} color sets)",
            prefix.display(),
            graph.num_nodes(),
            coloring.num_sets()
        );
        Ok(ColoredIndex { graph, coloring })
    }

    /// Writes both components under the prefix
    pub fn save(&self, prefix: &Path) -> Result<()> {
        self.graph.save(&graph_path(prefix))?;
        let mut writer = BufWriter::new(File::create(coloring_path(prefix))?);
        self.coloring.serialize(&mut writer)?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_paths() {
        let prefix = Path::new("/data/index/ecoli");
        assert_eq!(graph_path(prefix), Path::new("/data/index/ecoli.tdbg"));
        assert_eq!(coloring_path(prefix), Path::new("/data/index/ecoli.tcolors"));

        // A dotted prefix gains the component extension, it does not lose
        // its own.
        let prefix = Path::new("run.1");
        assert_eq!(graph_path(prefix), Path::new("run.1.tdbg"));
    }
}
