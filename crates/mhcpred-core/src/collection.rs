//! Ranked, immutable collection of binding predictions.
//!
//! Every collection is kept in rank order: ascending percentile rank, ties
//! broken by sequence id, offset, allele and peptide length. Operations build
//! new collections and never touch the records of an existing one.

use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::ops::Range;

use mhcpred_alleles::Allele;
use mhcpred_common::{MhcPredError, Result};

use crate::prediction::BindingPrediction;

/// Conventional percentile-rank cutoff for strong binders.
pub const DEFAULT_STRONG_BINDER_RANK: f64 = 2.0;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct EpitopeCollection {
    records: Vec<BindingPrediction>,
}

fn rank_order(a: &BindingPrediction, b: &BindingPrediction) -> Ordering {
    a.percentile_rank()
        .total_cmp(&b.percentile_rank())
        .then_with(|| a.sequence_id().cmp(b.sequence_id()))
        .then_with(|| a.offset().cmp(&b.offset()))
        .then_with(|| a.allele().cmp(b.allele()))
        .then_with(|| a.length().cmp(&b.length()))
}

impl EpitopeCollection {
    /// Builds a collection in rank order. When two records share an identity
    /// (sequence id, offset, length, allele) the earlier one is kept.
    pub fn new(records: Vec<BindingPrediction>) -> Self {
        let mut seen = HashSet::with_capacity(records.len());
        let mut unique: Vec<BindingPrediction> = records
            .into_iter()
            .filter(|record| seen.insert(record.key()))
            .collect();
        unique.sort_by(rank_order);
        Self { records: unique }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, BindingPrediction> {
        self.records.iter()
    }

    pub fn records(&self) -> &[BindingPrediction] {
        &self.records
    }

    pub fn into_records(self) -> Vec<BindingPrediction> {
        self.records
    }

    pub fn get(&self, index: usize) -> Option<&BindingPrediction> {
        self.records.get(index)
    }

    /// The `index`-th strongest binder.
    pub fn index(&self, index: usize) -> Result<&BindingPrediction> {
        self.records.get(index).ok_or(MhcPredError::IndexOutOfRange {
            index,
            len: self.records.len(),
        })
    }

    pub fn first(&self) -> Option<&BindingPrediction> {
        self.records.first()
    }

    /// Rank-ordered copy. Sorting a sorted collection yields the same order.
    pub fn sort(&self) -> Self {
        let mut records = self.records.clone();
        records.sort_by(rank_order);
        Self { records }
    }

    pub fn filter<F>(&self, predicate: F) -> Self
    where
        F: Fn(&BindingPrediction) -> bool,
    {
        Self {
            records: self.records.iter().filter(|r| predicate(r)).cloned().collect(),
        }
    }

    /// Union of both collections by identity, re-sorted. Records of `self`
    /// win over records of `other` with the same identity.
    pub fn merge(&self, other: &Self) -> Self {
        Self::new(self.records.iter().chain(other.records.iter()).cloned().collect())
    }

    pub fn slice(&self, range: Range<usize>) -> Result<Self> {
        match self.records.get(range.clone()) {
            Some(records) => Ok(Self { records: records.to_vec() }),
            None => Err(MhcPredError::IndexOutOfRange {
                index: range.end,
                len: self.records.len(),
            }),
        }
    }

    /// The `n` strongest binders (fewer if the collection is smaller).
    pub fn top(&self, n: usize) -> Self {
        Self {
            records: self.records.iter().take(n).cloned().collect(),
        }
    }

    pub fn strong_binders_by_rank(&self, max_rank: f64) -> Self {
        self.filter(|r| r.percentile_rank() <= max_rank)
    }

    /// Records with a predicted IC50 at or below `max_nm`. Records without an
    /// affinity are excluded.
    pub fn strong_binders_by_affinity(&self, max_nm: f64) -> Self {
        self.filter(|r| r.affinity().is_some_and(|nm| nm <= max_nm))
    }

    pub fn group_by_allele(&self) -> BTreeMap<Allele, Self> {
        self.group_by(|r| r.allele().clone())
    }

    pub fn group_by_peptide(&self) -> BTreeMap<String, Self> {
        self.group_by(|r| r.peptide().to_string())
    }

    pub fn group_by_sequence(&self) -> BTreeMap<String, Self> {
        self.group_by(|r| r.sequence_id().to_string())
    }

    pub fn alleles(&self) -> BTreeSet<Allele> {
        self.records.iter().map(|r| r.allele().clone()).collect()
    }

    fn group_by<K: Ord>(&self, key: impl Fn(&BindingPrediction) -> K) -> BTreeMap<K, Self> {
        let mut groups: BTreeMap<K, Self> = BTreeMap::new();
        for record in &self.records {
            groups.entry(key(record)).or_default().records.push(record.clone());
        }
        groups
    }
}

impl FromIterator<BindingPrediction> for EpitopeCollection {
    fn from_iter<T: IntoIterator<Item = BindingPrediction>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a EpitopeCollection {
    type Item = &'a BindingPrediction;
    type IntoIter = std::slice::Iter<'a, BindingPrediction>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

impl IntoIterator for EpitopeCollection {
    type Item = BindingPrediction;
    type IntoIter = std::vec::IntoIter<BindingPrediction>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
