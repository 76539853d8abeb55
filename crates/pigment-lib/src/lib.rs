// Pigment: pseudoalignment against a colored de Bruijn graph
//
// The index maps every k-mer node of an SBWT-backed de Bruijn graph to a
// compressed, deduplicated set of reference colors, and answers queries
// under intersection or threshold semantics.

#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

pub mod build;
pub mod color_set;
pub mod coloring;
pub mod em;
pub mod error;
pub mod graph;
pub mod index;
pub mod pseudoalign;
pub mod tempfiles;

// Re-export common types at the crate root
pub use build::{build_coloring, BuildConfig};
pub use color_set::ColorSet;
pub use coloring::ColoringStore;
pub use error::{Error, Result};
pub use graph::GraphIndex;
pub use index::ColoredIndex;
pub use pseudoalign::{pseudoalign, AlignmentMode, QueryConfig};
pub use tempfiles::{install_signal_handlers, TempFileManager};
