//! The pseudoalignment engine.
//!
//! A query aligns to the set of colors consistent with its k-mer content.
//! Two aggregation modes are supported:
//!
//! - **Intersection**: the intersection of the color sets of all query
//!   k-mers that are present in the graph with a non-empty color set.
//! - **Threshold**: every color seen in at least `tau` of the query's
//!   k-mer positions, where the denominator is either all positions or,
//!   with `ignore_unknown`, only the positions whose k-mer is present.
//!
//! With reverse complements enabled, the color set of a position is the
//! union over both orientations.
//!
//! Queries are processed by a pool of worker threads. Workers pull batches
//! from the FASTX reader under a producer lock, format their answers into a
//! private buffer, and hand the buffer to an order-enforcing writer, so the
//! output is in input order and byte-identical for any thread count.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Condvar, Mutex};

use needletail::{parse_fastx_file, FastxReader};
use tracing::info;

use crate::color_set::{union_sorted, ColorSet};
use crate::coloring::ColoringStore;
use crate::error::{Error, Result};
use crate::graph::GraphIndex;

/// How per-k-mer color sets are aggregated into an answer
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AlignmentMode {
    /// Intersection of the non-empty color sets of the query's k-mers
    Intersection,
    /// Colors reaching a fraction `tau` of the k-mer positions
    Threshold {
        /// Required fraction of positions, in `[0, 1]`
        tau: f64,
        /// Count only positions whose k-mer resolved to a graph node
        ignore_unknown: bool,
    },
}

/// Query-time configuration
#[derive(Debug, Clone)]
pub struct QueryConfig {
    /// Aggregation mode
    pub mode: AlignmentMode,
    /// Also look up the reverse complement of every query k-mer
    pub reverse_complement: bool,
    /// Number of worker threads
    pub n_threads: usize,
    /// Target size of one reader batch in bytes of query sequence
    pub buffer_bytes: usize,
    /// Sort the color ids within each output line
    pub sort_output: bool,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            mode: AlignmentMode::Intersection,
            reverse_complement: false,
            n_threads: 1,
            buffer_bytes: 8_000_000,
            sort_output: false,
        }
    }
}

impl QueryConfig {
    /// Validates the configuration parameters
    pub fn validate(&self) -> Result<()> {
        if let AlignmentMode::Threshold { tau, .. } = self.mode {
            if !(0.0..=1.0).contains(&tau) {
                return Err(Error::InvalidArgument(format!(
                    "threshold must be in [0, 1], got {}",
                    tau
                )));
            }
        }
        if self.n_threads == 0 {
            return Err(Error::InvalidArgument(
                "n_threads must be positive".to_string(),
            ));
        }
        if self.buffer_bytes == 0 {
            return Err(Error::InvalidArgument(
                "the batch buffer must be at least one byte".to_string(),
            ));
        }
        Ok(())
    }
}

/// Runs pseudoalignment of every query in `query_file` (FASTA/FASTQ, gzip
/// accepted) against the index, writing one answer line per query in input
/// order: `<ordinal> <color> <color> …`.
pub fn pseudoalign<W: Write + Send>(
    graph: &GraphIndex,
    coloring: &ColoringStore,
    config: &QueryConfig,
    query_file: &Path,
    out: W,
) -> Result<()> {
    config.validate()?;
    if coloring.num_nodes() != graph.num_nodes() {
        return Err(Error::InvariantViolated(format!(
            "coloring covers {} nodes but the graph has {}",
            coloring.num_nodes(),
            graph.num_nodes()
        )));
    }

    let reader = parse_fastx_file(query_file)
        .map_err(|e| Error::Parse(format!("failed to open {}: {}", query_file.display(), e)))?;

    info!(
        "Aligning queries from {} with {} thread(s)",
        query_file.display(),
        config.n_threads
    );

    let input = Mutex::new(InputState {
        reader,
        next_batch: 0,
        next_ordinal: 0,
        done: false,
    });
    let writer = OrderedWriter::new(out);
    let first_error: Mutex<Option<Error>> = Mutex::new(None);

    std::thread::scope(|scope| {
        for _ in 0..config.n_threads {
            scope.spawn(|| {
                let mut line_buf = String::new();
                loop {
                    let batch = {
                        let mut input = input.lock().unwrap();
                        match read_batch(&mut input, config.buffer_bytes) {
                            Ok(batch) => batch,
                            Err(e) => {
                                let mut slot = first_error.lock().unwrap();
                                if slot.is_none() {
                                    *slot = Some(e);
                                }
                                break;
                            }
                        }
                    };
                    let Some(batch) = batch else {
                        break;
                    };

                    line_buf.clear();
                    for (offset, query) in batch.queries.iter().enumerate() {
                        let ordinal = batch.first_ordinal + offset as u64;
                        let mut answer = align_one(graph, coloring, config, query);
                        if config.sort_output {
                            answer.sort_unstable();
                        }
                        format_answer_line(&mut line_buf, ordinal, &answer);
                    }
                    writer.submit(batch.index, line_buf.as_bytes());
                }
            });
        }
    });

    if let Some(e) = first_error.into_inner().unwrap() {
        return Err(e);
    }
    writer.finish()?;
    Ok(())
}

/// Computes the answer colors for one query (already upper-cased)
fn align_one(
    graph: &GraphIndex,
    coloring: &ColoringStore,
    config: &QueryConfig,
    query: &[u8],
) -> Vec<u64> {
    let k = graph.k();
    if query.len() < k {
        return Vec::new();
    }

    let rc_query = config.reverse_complement.then(|| {
        let mut rc = query.to_vec();
        sbwt::reverse_complement_in_place(&mut rc);
        rc
    });

    let n = query.len();
    let positions = 0..=(n - k);

    match config.mode {
        AlignmentMode::Intersection => {
            let mut acc: Option<ColorSet> = None;
            for i in positions {
                let (fwd, rc) = sets_at(graph, coloring, query, rc_query.as_deref(), i, k);
                let combined = match (fwd, rc) {
                    (Some(a), Some(b)) => a.union_with(b),
                    (Some(a), None) => a.clone(),
                    (None, Some(b)) => b.clone(),
                    (None, None) => continue,
                };
                if combined.is_empty() {
                    continue;
                }
                let next = match acc {
                    None => combined,
                    Some(prev) => prev.intersect(&combined),
                };
                let empty = next.is_empty();
                acc = Some(next);
                if empty {
                    // Later k-mers cannot bring colors back.
                    break;
                }
            }
            acc.map(|cs| cs.as_sorted_vector()).unwrap_or_default()
        }
        AlignmentMode::Threshold { tau, ignore_unknown } => {
            let mut counts: HashMap<u64, u64> = HashMap::new();
            let mut present_positions: u64 = 0;
            let mut total_positions: u64 = 0;
            for i in positions {
                total_positions += 1;
                let (fwd, rc) = sets_at(graph, coloring, query, rc_query.as_deref(), i, k);
                if fwd.is_some() || rc.is_some() {
                    present_positions += 1;
                }
                let colors_here = match (fwd, rc) {
                    (Some(a), Some(b)) => union_sorted(&a.as_sorted_vector(), &b.as_sorted_vector()),
                    (Some(a), None) => a.as_sorted_vector(),
                    (None, Some(b)) => b.as_sorted_vector(),
                    (None, None) => continue,
                };
                for color in colors_here {
                    *counts.entry(color).or_insert(0) += 1;
                }
            }

            let denominator = if ignore_unknown {
                present_positions
            } else {
                total_positions
            };
            if denominator == 0 {
                return Vec::new();
            }
            counts
                .into_iter()
                .filter(|&(_, count)| count as f64 >= tau * denominator as f64)
                .map(|(color, _)| color)
                .collect()
        }
    }
}

/// The color sets of a query position in both orientations. The reverse
/// complement of `query[i..i+k]` sits at the mirrored offset of the
/// reverse-complemented query.
fn sets_at<'a>(
    graph: &GraphIndex,
    coloring: &'a ColoringStore,
    query: &[u8],
    rc_query: Option<&[u8]>,
    i: usize,
    k: usize,
) -> (Option<&'a ColorSet>, Option<&'a ColorSet>) {
    let n = query.len();
    let fwd = graph
        .node_of(&query[i..i + k])
        .map(|node| coloring.get_colorset(node));
    let rc = rc_query.and_then(|rcq| {
        graph
            .node_of(&rcq[n - k - i..n - i])
            .map(|node| coloring.get_colorset(node))
    });
    (fwd, rc)
}

/// Appends one output line: the query ordinal, then its colors
fn format_answer_line(buf: &mut String, ordinal: u64, colors: &[u64]) {
    write!(buf, "{}", ordinal).expect("writing to a String cannot fail");
    for c in colors {
        write!(buf, " {}", c).expect("writing to a String cannot fail");
    }
    buf.push('\n');
}

/// The shared query reader behind the producer lock
struct InputState {
    reader: Box<dyn FastxReader>,
    next_batch: usize,
    next_ordinal: u64,
    done: bool,
}

/// One worker's unit of input
struct Batch {
    index: usize,
    first_ordinal: u64,
    queries: Vec<Vec<u8>>,
}

/// Reads roughly `buffer_bytes` of query sequence (at least one record).
/// Returns `None` once the stream is exhausted.
fn read_batch(input: &mut InputState, buffer_bytes: usize) -> Result<Option<Batch>> {
    if input.done {
        return Ok(None);
    }

    let mut queries = Vec::new();
    let mut bytes = 0usize;
    while bytes < buffer_bytes {
        match input.reader.next() {
            None => {
                input.done = true;
                break;
            }
            Some(Err(e)) => {
                input.done = true;
                return Err(Error::Parse(format!("bad query record: {}", e)));
            }
            Some(Ok(record)) => {
                let mut seq = record.seq().to_vec();
                seq.make_ascii_uppercase();
                bytes += seq.len().max(1);
                queries.push(seq);
            }
        }
    }

    if queries.is_empty() {
        return Ok(None);
    }
    let batch = Batch {
        index: input.next_batch,
        first_ordinal: input.next_ordinal,
        queries,
    };
    input.next_batch += 1;
    input.next_ordinal += batch.queries.len() as u64;
    Ok(Some(batch))
}

/// Serializes batch outputs back into input order. Workers block until
/// their batch index is next; an I/O failure is remembered and later
/// submissions drain without writing so no worker deadlocks.
struct OrderedWriter<W: Write> {
    state: Mutex<WriterState<W>>,
    turn: Condvar,
}

struct WriterState<W: Write> {
    next_batch: usize,
    out: W,
    error: Option<io::Error>,
}

impl<W: Write> OrderedWriter<W> {
    fn new(out: W) -> Self {
        Self {
            state: Mutex::new(WriterState {
                next_batch: 0,
                out,
                error: None,
            }),
            turn: Condvar::new(),
        }
    }

    fn submit(&self, batch_index: usize, bytes: &[u8]) {
        let mut state = self.state.lock().unwrap();
        while state.next_batch != batch_index {
            state = self.turn.wait(state).unwrap();
        }
        if state.error.is_none() {
            if let Err(e) = state.out.write_all(bytes) {
                state.error = Some(e);
            }
        }
        state.next_batch += 1;
        self.turn.notify_all();
    }

    fn finish(self) -> Result<()> {
        let mut state = self.state.into_inner().unwrap();
        if let Some(e) = state.error {
            return Err(Error::Io(e));
        }
        state.out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_format_answer_line() {
        let mut buf = String::new();
        format_answer_line(&mut buf, 3, &[0, 7, 12]);
        format_answer_line(&mut buf, 4, &[]);
        assert_eq!(buf, "3 0 7 12\n4\n");
    }

    #[test]
    fn test_config_validation() {
        let config = QueryConfig {
            mode: AlignmentMode::Threshold { tau: 1.5, ignore_unknown: false },
            ..QueryConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidArgument(_))));

        let config = QueryConfig { n_threads: 0, ..QueryConfig::default() };
        assert!(config.validate().is_err());

        assert!(QueryConfig::default().validate().is_ok());
    }

    #[test]
    fn test_ordered_writer_reorders_batches() {
        let writer = Arc::new(OrderedWriter::new(Vec::<u8>::new()));

        // Submit batches from threads in scrambled order; the output must
        // come back in batch order.
        let mut handles = Vec::new();
        for (index, payload) in [(2usize, "c"), (0, "a"), (3, "d"), (1, "b")] {
            let writer = Arc::clone(&writer);
            handles.push(std::thread::spawn(move || {
                writer.submit(index, payload.as_bytes());
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        let writer = Arc::try_unwrap(writer).ok().expect("all threads joined");
        let state = writer.state.into_inner().unwrap();
        assert_eq!(state.out, b"abcd");
    }
}
