//! The `predict` entry point.

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, instrument};

use mhcpred_alleles::{normalize, Allele};
use mhcpred_common::{ExecutionOptions, MhcPredError, Result};

use crate::backend::BackendAdapter;
use crate::collection::EpitopeCollection;
use crate::driver::{CancelHandle, ExecutionDriver};
use crate::normalise::build_predictions;
use crate::sequence::{check_sequences, PeptideWindow, ProteinSequence};

/// A backend bound to a validated allele set and peptide lengths.
#[derive(Clone)]
pub struct Predictor {
    adapter: Arc<dyn BackendAdapter>,
    alleles: Vec<Allele>,
    lengths: Vec<usize>,
    driver: ExecutionDriver,
}

impl std::fmt::Debug for Predictor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Predictor")
            .field("backend", &self.adapter.name())
            .field("alleles", &self.alleles)
            .field("lengths", &self.lengths)
            .field("limits", &self.driver.limits())
            .finish()
    }
}

impl Predictor {
    /// Normalises and deduplicates `alleles` (first spelling wins the
    /// position) and checks the configured peptide lengths against the
    /// backend. No lengths configured means the backend's defaults.
    pub fn new<S: AsRef<str>>(adapter: Arc<dyn BackendAdapter>, alleles: &[S], options: ExecutionOptions) -> Result<Self> {
        let mut seen = BTreeSet::new();
        let mut normalized = Vec::with_capacity(alleles.len());
        for raw in alleles {
            let allele = normalize(raw.as_ref())?;
            if seen.insert(allele.clone()) {
                normalized.push(allele);
            }
        }
        if normalized.is_empty() {
            return Err(MhcPredError::Config("at least one allele is required".to_string()));
        }

        let mut lengths = if options.peptide_lengths.is_empty() {
            adapter.default_lengths()
        } else {
            options.peptide_lengths.clone()
        };
        lengths.sort_unstable();
        lengths.dedup();

        let supported = adapter.supported_lengths();
        if let Some(&length) = lengths.iter().find(|l| !supported.contains(l)) {
            return Err(MhcPredError::UnsupportedPeptideLength {
                length,
                backend: adapter.name().to_string(),
                supported: supported.into_iter().collect(),
            });
        }

        let driver = ExecutionDriver::new(Arc::clone(&adapter), options);
        Ok(Self {
            adapter,
            alleles: normalized,
            lengths,
            driver,
        })
    }

    pub fn alleles(&self) -> &[Allele] {
        &self.alleles
    }

    pub fn lengths(&self) -> &[usize] {
        &self.lengths
    }

    pub fn backend_name(&self) -> &str {
        self.adapter.name()
    }

    /// Scores every window of every sequence against every allele.
    pub async fn predict<I, K, V>(&self, sequences: I) -> Result<EpitopeCollection>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: AsRef<str>,
    {
        self.predict_with_cancel(sequences, &CancelHandle::new()).await
    }

    /// As [`predict`](Self::predict), aborting when `cancel` fires.
    pub async fn predict_with_cancel<I, K, V>(&self, sequences: I, cancel: &CancelHandle) -> Result<EpitopeCollection>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: AsRef<str>,
    {
        let sequences = check_sequences(sequences)?;
        let windows: Vec<PeptideWindow> = sequences
            .iter()
            .flat_map(|s| self.lengths.iter().flat_map(move |&len| s.windows(len)))
            .collect();
        self.score(windows, sequences.len(), cancel).await
    }

    /// Scores peptides as given. Each peptide is its own sequence (id = the
    /// peptide, offset 0); lengths outside the backend's range are rejected.
    pub async fn predict_peptides<S: AsRef<str>>(&self, peptides: &[S]) -> Result<EpitopeCollection> {
        let supported = self.adapter.supported_lengths();
        let mut seen = BTreeSet::new();
        let mut windows = Vec::new();
        for raw in peptides {
            let sequence = ProteinSequence::new(raw.as_ref().trim().to_ascii_uppercase(), raw.as_ref())?;
            if !supported.contains(&sequence.len()) {
                return Err(MhcPredError::UnsupportedPeptideLength {
                    length: sequence.len(),
                    backend: self.adapter.name().to_string(),
                    supported: supported.iter().copied().collect(),
                });
            }
            if seen.insert(sequence.residues.clone()) {
                windows.extend(sequence.windows(sequence.len()));
            }
        }
        let count = windows.len();
        self.score(windows, count, &CancelHandle::new()).await
    }

    #[instrument(skip_all, fields(backend = %self.adapter.name()))]
    async fn score(&self, windows: Vec<PeptideWindow>, sequences: usize, cancel: &CancelHandle) -> Result<EpitopeCollection> {
        info!(
            sequences,
            windows = windows.len(),
            alleles = self.alleles.len(),
            lengths = ?self.lengths,
            "Predicting binding"
        );
        let scored = self.driver.run(windows, &self.alleles, cancel).await?;
        let predictions = build_predictions(self.adapter.name(), scored)?;
        let collection = EpitopeCollection::new(predictions);
        info!(predictions = collection.len(), "Prediction complete");
        Ok(collection)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
