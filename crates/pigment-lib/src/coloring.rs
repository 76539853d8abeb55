//! The node-to-color-set store.
//!
//! Many graph nodes share identical color content, so the store keeps each
//! distinct [`ColorSet`] exactly once and maps nodes to sets through a
//! fixed-width packed pointer array. Slot 0 always holds the empty set:
//! nodes the construction pipeline never saw (the SBWT's technical dummy
//! nodes) resolve there without any special casing.
//!
//! The store is built from the final file of the external-memory pipeline,
//! where each record lists one distinct color set and every node that owns
//! it, and is immutable afterwards.

use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::Path;

use simple_sds_sbwt::int_vector::IntVector;
use simple_sds_sbwt::ops::{Access, Push, Vector};
use simple_sds_sbwt::serialize::Serialize;
use tracing::info;

use crate::color_set::{bits_for, ColorSet};
use crate::em::{be_u64, read_length_prefixed_record};
use crate::error::{Error, Result};

/// Magic bytes identifying a serialized coloring file
const MAGIC: &[u8; 8] = b"PGMCOLR1";

/// File format version (major, minor); major bumps are breaking
const FORMAT_VERSION: (u32, u32) = (1, 0);

/// Immutable mapping from node ids to shared color sets
pub struct ColoringStore {
    /// `pointers[node]` indexes into `sets`
    pointers: IntVector,
    /// Distinct color sets; index 0 is always the empty set
    sets: Vec<ColorSet>,
}

impl ColoringStore {
    /// Builds the store from a stage-(e) grouped file. Every record becomes
    /// one shared [`ColorSet`]; nodes missing from the file keep the empty
    /// set.
    pub fn from_grouped_records(path: &Path, num_nodes: usize) -> Result<Self> {
        let mut reader = BufReader::with_capacity(1 << 20, File::open(path)?);

        let mut sets = vec![ColorSet::empty()];
        let mut pointer_of: Vec<u64> = vec![0; num_nodes];

        let mut record: Vec<u8> = Vec::new();
        loop {
            match read_length_prefixed_record(&mut reader, &mut record) {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => return Err(framing_error(e)),
            }

            if record.len() < 8 * 3 {
                return Err(Error::Parse(format!(
                    "grouped record of {} bytes is too short",
                    record.len()
                )));
            }
            let n_nodes = be_u64(&record[8..]) as usize;
            let nodes_end = 16 + 8 * n_nodes;
            if n_nodes == 0 || nodes_end >= record.len() {
                return Err(Error::Parse(format!(
                    "grouped record with {} nodes does not fit its length {}",
                    n_nodes,
                    record.len()
                )));
            }

            let colors: Vec<u64> = record[nodes_end..].chunks_exact(8).map(be_u64).collect();
            if !colors.windows(2).all(|w| w[0] < w[1]) {
                return Err(Error::InvariantViolated(
                    "grouped record colors are not strictly ascending".to_string(),
                ));
            }

            let set_index = sets.len() as u64;
            sets.push(ColorSet::from_sorted_colors(&colors));

            for chunk in record[16..nodes_end].chunks_exact(8) {
                let node = be_u64(chunk) as usize;
                if node >= num_nodes {
                    return Err(Error::InvariantViolated(format!(
                        "node id {} out of range for {} graph nodes",
                        node, num_nodes
                    )));
                }
                pointer_of[node] = set_index;
            }
        }

        let width = bits_for(sets.len() as u64 - 1);
        let mut pointers = IntVector::new(width).expect("width is in 1..=64");
        for &p in pointer_of.iter() {
            pointers.push(p);
        }

        info!(
            "Coloring store: {} nodes sharing {} distinct color sets",
            num_nodes,
            sets.len()
        );
        Ok(ColoringStore { pointers, sets })
    }

    /// The color set of a node. Nodes must be below
    /// [`ColoringStore::num_nodes`].
    pub fn get_colorset(&self, node: u64) -> &ColorSet {
        &self.sets[self.pointers.get(node as usize) as usize]
    }

    /// Number of nodes covered by the pointer array
    pub fn num_nodes(&self) -> usize {
        self.pointers.len()
    }

    /// Number of distinct stored color sets, the empty set included
    pub fn num_sets(&self) -> usize {
        self.sets.len()
    }

    /// Writes the store: header, pointer array, then each set
    pub fn serialize<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(MAGIC)?;
        writer.write_all(&FORMAT_VERSION.0.to_le_bytes())?;
        writer.write_all(&FORMAT_VERSION.1.to_le_bytes())?;
        writer.write_all(&(self.pointers.len() as u64).to_le_bytes())?;
        self.pointers.serialize(writer)?;
        writer.write_all(&(self.sets.len() as u64).to_le_bytes())?;
        for set in &self.sets {
            set.serialize(writer)?;
        }
        Ok(())
    }

    /// Reads a store written by [`ColoringStore::serialize`], validating
    /// the pointer/set consistency of the file
    pub fn load<R: Read>(reader: &mut R) -> Result<Self> {
        let mut magic = [0u8; 8];
        reader.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(Error::Parse(
                "invalid magic number for a coloring file".to_string(),
            ));
        }

        let mut word = [0u8; 4];
        reader.read_exact(&mut word)?;
        let version_major = u32::from_le_bytes(word);
        reader.read_exact(&mut word)?;
        let version_minor = u32::from_le_bytes(word);
        if version_major != FORMAT_VERSION.0 {
            return Err(Error::Parse(format!(
                "incompatible coloring format version {}.{}, expected {}.{}",
                version_major, version_minor, FORMAT_VERSION.0, FORMAT_VERSION.1
            )));
        }

        let mut qword = [0u8; 8];
        reader.read_exact(&mut qword)?;
        let num_nodes = u64::from_le_bytes(qword) as usize;

        let pointers = IntVector::load(reader)?;
        if pointers.len() != num_nodes {
            return Err(Error::InvariantViolated(format!(
                "pointer array has {} entries but the header claims {} nodes",
                pointers.len(),
                num_nodes
            )));
        }

        reader.read_exact(&mut qword)?;
        let num_sets = u64::from_le_bytes(qword);
        let mut sets = Vec::with_capacity(num_sets as usize);
        for _ in 0..num_sets {
            sets.push(ColorSet::deserialize(reader)?);
        }

        for i in 0..pointers.len() {
            if pointers.get(i) >= num_sets {
                return Err(Error::InvariantViolated(format!(
                    "node {} points at color set {} but only {} sets are stored",
                    i,
                    pointers.get(i),
                    num_sets
                )));
            }
        }

        Ok(ColoringStore { pointers, sets })
    }
}

/// Record-framing failures are parse errors; everything else is I/O
fn framing_error(e: io::Error) -> Error {
    if e.kind() == io::ErrorKind::InvalidData || e.kind() == io::ErrorKind::UnexpectedEof {
        Error::Parse(e.to_string())
    } else {
        Error::Io(e)
    }
}
