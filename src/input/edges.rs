//! Edge list parsing
//!
//! The format is a CSV-like text file: a literal `source,destination`
//! header, then one `u,v` pair per line. Whitespace around the integers
//! is tolerated, blank lines are skipped, duplicate edges are kept.

use crate::dag::Edge;
use crate::error::{AnalysisError, Result};
use std::path::Path;

const HEADER: &str = "source,destination";

/// Parse edge-list text
pub fn parse_edge_list(text: &str) -> Result<Vec<Edge>> {
    let mut lines = text.lines().enumerate();

    match lines.next() {
        Some((_, first)) if first.trim_end() == HEADER => {}
        Some((_, first)) => {
            return Err(AnalysisError::input(format!(
                "edge list must start with {HEADER:?}, found {first:?}"
            )))
        }
        None => return Err(AnalysisError::input("edge list is empty")),
    }

    let mut edges = Vec::new();
    for (lineno, line) in lines {
        if line.trim().is_empty() {
            continue;
        }
        let (u, v) = line
            .split_once(',')
            .ok_or_else(|| bad_line(lineno, line))?;
        let u = u
            .trim()
            .parse::<usize>()
            .map_err(|_| bad_line(lineno, line))?;
        let v = v
            .trim()
            .parse::<usize>()
            .map_err(|_| bad_line(lineno, line))?;
        edges.push((u, v));
    }
    Ok(edges)
}

/// Read and parse an edge-list file
pub fn read_edge_list(path: &Path) -> Result<Vec<Edge>> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        AnalysisError::input(format!("cannot read edge list {}: {e}", path.display()))
    })?;
    parse_edge_list(&text)
}

fn bad_line(lineno: usize, line: &str) -> AnalysisError {
    AnalysisError::input(format!("edge list line {}: expected \"u,v\", found {line:?}", lineno + 1))
}
