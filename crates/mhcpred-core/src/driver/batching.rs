//! Splitting the (windows × alleles) cross product into backend calls.

use std::collections::{BTreeMap, HashSet};

use mhcpred_alleles::Allele;
use mhcpred_common::ExecutionOptions;

use crate::backend::{BatchLimits, InvocationBatch};
use crate::sequence::PeptideWindow;

/// Backend limits tightened by any caps in `options`. Every limit is at least 1.
pub fn effective_limits(backend: BatchLimits, options: &ExecutionOptions) -> BatchLimits {
    let cap = |limit: usize, user: Option<usize>| user.map_or(limit, |u| u.min(limit)).max(1);
    BatchLimits {
        max_alleles_per_call: cap(backend.max_alleles_per_call, options.max_alleles_per_call),
        max_peptides_per_call: cap(backend.max_peptides_per_call, options.max_peptides_per_call),
        max_sequences_per_call: cap(backend.max_sequences_per_call, options.max_sequences_per_call),
    }
}

/// Consecutive chunks of `windows`, each within the peptide and sequence limits.
fn chunk_windows(windows: Vec<PeptideWindow>, limits: &BatchLimits) -> Vec<Vec<PeptideWindow>> {
    let mut chunks = Vec::new();
    let mut current: Vec<PeptideWindow> = Vec::new();
    let mut sequences: HashSet<String> = HashSet::new();

    for window in windows {
        let new_sequence = !sequences.contains(&window.sequence_id);
        let full = current.len() >= limits.max_peptides_per_call
            || (new_sequence && sequences.len() >= limits.max_sequences_per_call);
        if full && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            sequences.clear();
        }
        sequences.insert(window.sequence_id.clone());
        current.push(window);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Plans one batch per (window chunk, allele chunk). Windows are grouped by
/// peptide length first, so every batch holds a single length.
pub fn plan_batches(windows: Vec<PeptideWindow>, alleles: &[Allele], limits: BatchLimits) -> Vec<InvocationBatch> {
    let mut by_length: BTreeMap<usize, Vec<PeptideWindow>> = BTreeMap::new();
    for window in windows {
        by_length.entry(window.len()).or_default().push(window);
    }

    let mut batches = Vec::new();
    for (length, windows) in by_length {
        for chunk in chunk_windows(windows, &limits) {
            for allele_chunk in alleles.chunks(limits.max_alleles_per_call.max(1)) {
                batches.push(InvocationBatch::new(length, chunk.clone(), allele_chunk.to_vec()));
            }
        }
    }
    batches
}
