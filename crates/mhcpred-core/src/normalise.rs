//! Result normalisation: backend rows → [`BindingPrediction`] records.
//!
//! Two stages:
//! 1. [`resolve_rows`] runs per invocation. It re-normalises allele names,
//!    matches every row to a window of the batch, converts affinities to nM
//!    and checks that the batch's (window, allele) grid is covered exactly once.
//! 2. [`build_predictions`] runs once per predict call. It fills in missing
//!    percentile ranks by rank-ordering affinities within each allele across
//!    the whole call.

use std::collections::{BTreeMap, HashMap, VecDeque};

use mhcpred_alleles::{normalize, Allele};
use mhcpred_common::{MhcPredError, Result};

use crate::backend::InvocationBatch;
use crate::prediction::BindingPrediction;
use crate::sequence::PeptideWindow;

/// Upper bound of the IC50 scale used by log-transformed affinity scores.
pub const MAX_IC50: f64 = 50_000.0;

/// Affinity as reported by a backend, in its own unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Affinity {
    Nanomolar(f64),
    Micromolar(f64),
    /// `1 - log(IC50) / log(50000)`
    Log50k(f64),
}

impl Affinity {
    pub fn to_nanomolar(self) -> f64 {
        match self {
            Self::Nanomolar(nm) => nm,
            Self::Micromolar(um) => um * 1000.0,
            Self::Log50k(score) => MAX_IC50.powf(1.0 - score),
        }
    }
}

fn valid_affinity(nm: f64) -> bool {
    nm.is_finite() && nm >= 0.0
}

/// One parsed row of backend output, before any normalisation.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRow {
    /// 0-based index of the peptide in the invocation's input, when the backend reports one
    pub position: Option<usize>,
    /// Allele as printed by the backend
    pub allele: String,
    pub peptide: String,
    pub affinity: Option<Affinity>,
    /// Raw score. For affinity-reporting layouts this is the log50k score.
    pub score: Option<f64>,
    pub percentile_rank: Option<f64>,
}

/// A row matched to its window, with canonical allele and affinity in nM.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredWindow {
    pub window: PeptideWindow,
    pub allele: Allele,
    pub affinity: Option<f64>,
    pub score: Option<f64>,
    pub percentile_rank: Option<f64>,
}

/// Matches backend rows to the windows and alleles of `batch`.
///
/// A row's reported position is trusted when the peptide at that position
/// agrees; otherwise the next unmatched window with the same peptide is used.
/// Fails with `UnparsableOutput` on unknown alleles or peptides, duplicate
/// rows, or missing rows.
pub fn resolve_rows(backend: &str, batch: &InvocationBatch, rows: Vec<RawRow>) -> Result<Vec<ScoredWindow>> {
    let mut by_peptide: HashMap<&str, Vec<usize>> = HashMap::new();
    for (i, window) in batch.windows.iter().enumerate() {
        by_peptide.entry(window.peptide.as_str()).or_default().push(i);
    }

    // Per allele: peptide -> window indices not yet matched
    let mut pending: HashMap<&Allele, HashMap<&str, VecDeque<usize>>> = batch
        .alleles
        .iter()
        .map(|allele| {
            let queues = by_peptide
                .iter()
                .map(|(peptide, idx)| (*peptide, idx.iter().copied().collect()))
                .collect();
            (allele, queues)
        })
        .collect();

    let mut resolved = Vec::with_capacity(rows.len());
    for row in rows {
        let allele = normalize(&row.allele).map_err(|e| {
            MhcPredError::unparsable(backend, format!("unrecognised allele in output: {}", e))
        })?;
        let queues = pending.get_mut(&allele).ok_or_else(|| {
            MhcPredError::unparsable(backend, format!("output contains unrequested allele {}", allele))
        })?;

        let peptide = row.peptide.to_ascii_uppercase();
        let queue = queues.get_mut(peptide.as_str()).ok_or_else(|| {
            MhcPredError::unparsable(backend, format!("output contains unrequested peptide {}", peptide))
        })?;

        let index = match row.position.and_then(|p| queue.iter().position(|&i| i == p)) {
            Some(at) => queue.remove(at),
            None => queue.pop_front(),
        }
        .ok_or_else(|| {
            MhcPredError::unparsable(
                backend,
                format!("duplicate rows for peptide {} and allele {}", peptide, allele),
            )
        })?;

        let affinity = match row.affinity {
            None => None,
            Some(reported) => {
                let nm = reported.to_nanomolar();
                if valid_affinity(nm) {
                    Some(nm)
                } else {
                    // A broken IC50 column can sometimes be recovered from the log score.
                    match row.score.filter(|s| s.is_finite()) {
                        Some(score) => Some(Affinity::Log50k(score).to_nanomolar()),
                        None => {
                            return Err(MhcPredError::unparsable(
                                backend,
                                format!("invalid affinity {} for peptide {}", nm, peptide),
                            ))
                        }
                    }
                }
            }
        };

        if let Some(rank) = row.percentile_rank {
            if !rank.is_finite() || !(0.0..=100.0).contains(&rank) {
                return Err(MhcPredError::unparsable(
                    backend,
                    format!("percentile rank {} outside [0, 100]", rank),
                ));
            }
        }

        resolved.push(ScoredWindow {
            window: batch.windows[index].clone(),
            allele,
            affinity,
            score: row.score,
            percentile_rank: row.percentile_rank,
        });
    }

    let expected = batch.windows.len() * batch.alleles.len();
    if resolved.len() != expected {
        return Err(MhcPredError::unparsable(
            backend,
            format!("expected {} rows, found {}", expected, resolved.len()),
        ));
    }
    Ok(resolved)
}

/// Percentile ranks (0 = strongest) for affinities where lower is stronger.
/// Ties share their average rank. Returned in input order.
pub fn percentile_ranks(affinities: &[f64]) -> Vec<f64> {
    let n = affinities.len();
    if n == 0 {
        return vec![];
    }

    let mut indexed: Vec<(usize, f64)> = affinities.iter().copied().enumerate().collect();
    indexed.sort_by(|a, b| a.1.total_cmp(&b.1));

    let mut ranks = vec![0.0f64; n];
    let mut i = 0;
    while i < n {
        let mut j = i;
        while j < n - 1 && indexed[j].1 == indexed[j + 1].1 {
            j += 1;
        }
        let avg_rank = (i + 1 + j + 1) as f64 / 2.0;
        for entry in &indexed[i..=j] {
            ranks[entry.0] = avg_rank;
        }
        i = j + 1;
    }

    ranks.iter().map(|&r| 100.0 * (r - 1.0) / n as f64).collect()
}

/// Builds the final records for one predict call.
///
/// Rows without a native percentile rank get one derived from their affinity
/// relative to every other affinity for the same allele in `rows`.
pub fn build_predictions(predictor: &str, rows: Vec<ScoredWindow>) -> Result<Vec<BindingPrediction>> {
    let mut derived: Vec<Option<f64>> = rows.iter().map(|r| r.percentile_rank).collect();

    let mut by_allele: BTreeMap<&Allele, Vec<usize>> = BTreeMap::new();
    for (i, row) in rows.iter().enumerate() {
        by_allele.entry(&row.allele).or_default().push(i);
    }

    for (allele, indices) in by_allele {
        if indices.iter().all(|&i| rows[i].percentile_rank.is_some()) {
            continue;
        }
        if let Some(&i) = indices
            .iter()
            .find(|&&i| rows[i].percentile_rank.is_none() && rows[i].affinity.is_none())
        {
            tracing::debug!(peptide = %rows[i].window.peptide, "row has neither rank nor affinity");
            return Err(MhcPredError::MissingRankingBasis {
                allele: allele.to_string(),
            });
        }

        let with_affinity: Vec<usize> = indices.into_iter().filter(|&i| rows[i].affinity.is_some()).collect();
        let affinities: Vec<f64> = with_affinity.iter().filter_map(|&i| rows[i].affinity).collect();
        for (&i, pct) in with_affinity.iter().zip(percentile_ranks(&affinities)) {
            if derived[i].is_none() {
                derived[i] = Some(pct);
            }
        }
    }

    rows.into_iter()
        .zip(derived)
        .map(|(row, rank)| {
            let rank = rank.ok_or_else(|| MhcPredError::MissingRankingBasis {
                allele: row.allele.to_string(),
            })?;
            Ok(BindingPrediction::new(
                row.window.sequence_id,
                row.window.offset,
                row.window.peptide,
                row.allele,
                row.affinity,
                rank,
                row.score,
                predictor.to_string(),
            ))
        })
        .collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
