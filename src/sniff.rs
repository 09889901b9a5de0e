//! Format identification: try every top-level struct against one buffer.
//!
//! A constraint mismatch is the signal that a buffer is not in a given format, so a map holding
//! several candidate layouts can tell which of them the bytes satisfy.

use crate::ast::StructMap;
use crate::cursor::Endianness;
use crate::decoder::{DecodeOptions, Decoder};
use crate::expr::Evaluator;

/// How one top-level struct fared against the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub name: String,
    /// Decoded without a mismatch or running out of data.
    pub matched: bool,
    /// Bytes read before success or failure.
    pub consumed: usize,
    /// Failure reason when `matched` is false.
    pub reason: Option<String>,
}

/// Decode `data` with each top-level struct in declaration order, discarding the trace.
pub fn identify(map: &StructMap, evaluator: &dyn Evaluator, data: &[u8], endianness: Endianness) -> Vec<Candidate> {
    let decoder = Decoder::new(map, evaluator);
    map.roots()
        .map(|(id, def)| {
            let options = DecodeOptions { endianness, entry: def.name.clone(), limit: None };
            let (consumed, result) = decoder.decode_with_extent(id, data, &options, &mut std::io::sink());
            tracing::debug!(candidate = %def.name, consumed, ok = result.is_ok(), "identify");
            Candidate {
                name: def.name.clone(),
                matched: result.is_ok(),
                consumed,
                reason: result.err().map(|e| e.to_string()),
            }
        })
        .collect()
}

/// Names of the candidates that matched, best (most bytes explained) first.
pub fn best_matches(candidates: &[Candidate]) -> Vec<&str> {
    let mut hits: Vec<&Candidate> = candidates.iter().filter(|c| c.matched).collect();
    hits.sort_by(|a, b| b.consumed.cmp(&a.consumed));
    hits.into_iter().map(|c| c.name.as_str()).collect()
}
