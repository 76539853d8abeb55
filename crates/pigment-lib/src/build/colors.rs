//! Color labels for input sequences.
//!
//! A color file has one non-negative integer per input sequence. The parser
//! is strict on purpose: `stoll`-style parsing accepts garbage like
//! `"123abc"`, so each line must be digits with nothing but surrounding
//! whitespace. Labels need not be dense or unique; sequences with the same
//! label are the same color.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{Error, Result};

/// Parses one color-file line into a color id
fn parse_color_line(line: &str) -> Result<u64> {
    let token = line.trim();
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::Parse(format!(
            "could not parse color file line as a non-negative integer: {:?}",
            line
        )));
    }
    token
        .parse::<u64>()
        .map_err(|_| Error::Parse(format!("color id is out of range: {:?}", line)))
}

/// Reads a color file, requiring exactly one color per input sequence
pub fn read_color_file(path: &Path, num_sequences: usize) -> Result<Vec<u64>> {
    let reader = BufReader::new(File::open(path)?);
    let mut colors = Vec::new();
    for line in reader.lines() {
        colors.push(parse_color_line(&line?)?);
    }
    if colors.len() != num_sequences {
        return Err(Error::Parse(format!(
            "color file has {} lines but the input has {} sequences",
            colors.len(),
            num_sequences
        )));
    }
    Ok(colors)
}

/// Generated labels when no color file is given: color id = sequence index
pub fn auto_colors(num_sequences: usize) -> Vec<u64> {
    (0..num_sequences as u64).collect()
}
