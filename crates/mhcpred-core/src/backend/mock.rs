//! Scripted in-process backend for tests.
//!
//! Scores peptides deterministically and can be told to fail, stall or emit
//! broken output for upcoming calls.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use mhcpred_common::{MhcPredError, Result};

use super::layout::parse_number;
use super::tabular::read_table;
use super::{BackendAdapter, BatchLimits, HttpSpec, InvocationBatch, InvocationSpec, RawOutput};
use crate::normalise::{Affinity, RawRow};

/// Failure injected into the next call.
#[derive(Debug, Clone)]
pub enum MockFault {
    Unavailable,
    RateLimited(Option<Duration>),
    /// Stall past the invocation timeout
    Stall,
    ExecutionFailed(String),
    /// Drop the last row of the output
    Truncated,
    /// Replace the output with arbitrary text
    Garbage(String),
}

pub struct MockBackend {
    name: String,
    lengths: BTreeSet<usize>,
    limits: BatchLimits,
    affinities: HashMap<String, f64>,
    native_ranks: bool,
    delay: Duration,
    faults: Mutex<VecDeque<MockFault>>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            name: "mock".to_string(),
            lengths: (8..=15).collect(),
            limits: BatchLimits::default(),
            affinities: HashMap::new(),
            native_ranks: false,
            delay: Duration::ZERO,
            faults: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_lengths(mut self, lengths: impl IntoIterator<Item = usize>) -> Self {
        self.lengths = lengths.into_iter().collect();
        self
    }

    pub fn with_limits(mut self, limits: BatchLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Pins the IC50 reported for `peptide` (any allele).
    pub fn with_affinity(mut self, peptide: &str, nm: f64) -> Self {
        self.affinities.insert(peptide.to_string(), nm);
        self
    }

    /// Report percentile ranks alongside affinities.
    pub fn with_native_ranks(mut self) -> Self {
        self.native_ranks = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Queues a fault for the next call that has not been scripted yet.
    pub fn with_fault(self, fault: MockFault) -> Self {
        self.lock_faults().push_back(fault);
        self
    }

    /// Number of `execute` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of concurrent `execute` calls observed.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn lock_faults(&self) -> std::sync::MutexGuard<'_, VecDeque<MockFault>> {
        self.faults.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Deterministic pseudo-affinity in [1, 50000).
    fn affinity(&self, peptide: &str) -> f64 {
        if let Some(nm) = self.affinities.get(peptide) {
            return *nm;
        }
        let hash = peptide
            .bytes()
            .enumerate()
            .fold(17u64, |acc, (i, b)| acc.wrapping_mul(31).wrapping_add(b as u64 * (i as u64 + 1)));
        1.0 + (hash % 49_999) as f64
    }

    fn render(&self, form: &[(String, String)]) -> String {
        let alleles: Vec<&str> = form.iter().filter(|(k, _)| k == "allele").map(|(_, v)| v.as_str()).collect();
        let peptides: Vec<&str> = form.iter().filter(|(k, _)| k == "peptide").map(|(_, v)| v.as_str()).collect();

        let mut out = String::from("position\tallele\tpeptide\tic50");
        if self.native_ranks {
            out.push_str("\trank");
        }
        out.push('\n');
        for allele in &alleles {
            for (position, peptide) in peptides.iter().enumerate() {
                let nm = self.affinity(peptide);
                out.push_str(&format!("{}\t{}\t{}\t{}", position, allele, peptide, nm));
                if self.native_ranks {
                    out.push_str(&format!("\t{}", (nm / 500.0).min(100.0)));
                }
                out.push('\n');
            }
        }
        out
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl BackendAdapter for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn supported_lengths(&self) -> BTreeSet<usize> {
        self.lengths.clone()
    }

    fn default_lengths(&self) -> Vec<usize> {
        vec![9]
    }

    fn limits(&self) -> BatchLimits {
        self.limits
    }

    fn build_invocation(&self, batch: &InvocationBatch) -> Result<InvocationSpec> {
        let mut form: Vec<(String, String)> = batch
            .alleles
            .iter()
            .map(|a| ("allele".to_string(), a.to_string()))
            .collect();
        form.extend(batch.peptides().map(|p| ("peptide".to_string(), p.to_string())));
        Ok(InvocationSpec::Http(HttpSpec {
            method: reqwest::Method::POST,
            url: format!("mock://{}", self.name),
            form,
        }))
    }

    async fn execute(&self, spec: InvocationSpec, timeout: Duration) -> Result<RawOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        let InvocationSpec::Http(spec) = spec else {
            return Err(MhcPredError::Config("mock backend expects an HTTP invocation".into()));
        };
        let fault = self.lock_faults().pop_front();

        let delay = if matches!(fault, Some(MockFault::Stall)) {
            timeout + Duration::from_secs(3600)
        } else {
            self.delay
        };
        if delay > timeout {
            tokio::time::sleep(timeout).await;
            return Err(MhcPredError::Timeout {
                backend: self.name.clone(),
                after: timeout,
            });
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let body = match fault {
            None | Some(MockFault::Stall) => self.render(&spec.form),
            Some(MockFault::Unavailable) => {
                return Err(MhcPredError::unavailable(&self.name, "scripted outage"));
            }
            Some(MockFault::RateLimited(retry_after)) => {
                return Err(MhcPredError::RateLimited {
                    backend: self.name.clone(),
                    retry_after,
                });
            }
            Some(MockFault::ExecutionFailed(diagnostic)) => {
                return Err(MhcPredError::BackendExecutionFailed {
                    backend: self.name.clone(),
                    status: "exit status: 1".to_string(),
                    diagnostic,
                });
            }
            Some(MockFault::Truncated) => {
                let full = self.render(&spec.form);
                let mut lines: Vec<&str> = full.lines().collect();
                lines.pop();
                lines.join("\n")
            }
            Some(MockFault::Garbage(text)) => text,
        };
        Ok(RawOutput {
            body,
            diagnostics: String::new(),
        })
    }

    fn parse(&self, raw: &RawOutput) -> Result<Vec<RawRow>> {
        let table = read_table(&self.name, &raw.body)?;
        let position = table.column(&self.name, &["position"])?;
        let allele = table.column(&self.name, &["allele"])?;
        let peptide = table.column(&self.name, &["peptide"])?;
        let ic50 = table.column(&self.name, &["ic50"])?;
        let rank = table.column(&self.name, &["rank"]).ok();

        table
            .rows()
            .iter()
            .map(|fields| {
                let number = |i: usize| {
                    parse_number(fields[i])
                        .ok_or_else(|| MhcPredError::unparsable(&self.name, format!("bad number '{}'", fields[i])))
                };
                Ok(RawRow {
                    position: fields[position].parse().ok(),
                    allele: fields[allele].to_string(),
                    peptide: fields[peptide].to_string(),
                    affinity: Some(Affinity::Nanomolar(number(ic50)?)),
                    score: None,
                    percentile_rank: rank.map(number).transpose()?,
                })
            })
            .collect()
    }
}
