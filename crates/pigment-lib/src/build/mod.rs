//! Index construction.
//!
//! The build pipeline:
//! 1. Read sequences and color labels ([`input`], [`colors`])
//! 2. Split sequences into ACGT runs, each keeping its sequence's color
//! 3. Build the de Bruijn graph ([`crate::graph::GraphIndex::build`])
//! 4. Walk every k-mer against the graph, emitting `(node, color)` pairs
//! 5. Run the external-memory stages and materialize the
//!    [`crate::coloring::ColoringStore`] ([`builder`])

pub mod builder;
pub mod colors;
pub mod config;
pub mod input;

pub use builder::build_coloring;
pub use config::BuildConfig;
