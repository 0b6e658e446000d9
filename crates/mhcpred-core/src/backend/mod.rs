//! Predictor backends.
//!
//! Every backend implements [`BackendAdapter`]: it turns one
//! [`InvocationBatch`] into an [`InvocationSpec`], executes it, and parses the
//! raw output into [`RawRow`]s. Splitting work into batches is the execution
//! driver's job; an adapter only ever sees a batch that already fits its
//! [`BatchLimits`].

pub mod layout;
pub mod local;
pub mod mock;
pub mod remote;
pub mod tabular;
pub mod tools;

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

use mhcpred_alleles::Allele;
use mhcpred_common::Result;

use crate::normalise::RawRow;
use crate::sequence::PeptideWindow;

pub use local::LocalCommandAdapter;
pub use mock::{MockBackend, MockFault};
pub use remote::{IedbMethod, RemoteServiceAdapter};
pub use tools::{LocalTool, PredictionMode};

/// Per-call capacity of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLimits {
    pub max_alleles_per_call: usize,
    pub max_peptides_per_call: usize,
    pub max_sequences_per_call: usize,
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            max_alleles_per_call: 1,
            max_peptides_per_call: 10_000,
            max_sequences_per_call: usize::MAX,
        }
    }
}

/// The (windows × alleles) slice assigned to one backend call.
/// All windows share one peptide length.
#[derive(Debug, Clone)]
pub struct InvocationBatch {
    pub id: Uuid,
    pub length: usize,
    pub windows: Vec<PeptideWindow>,
    pub alleles: Vec<Allele>,
}

impl InvocationBatch {
    pub fn new(length: usize, windows: Vec<PeptideWindow>, alleles: Vec<Allele>) -> Self {
        Self {
            id: Uuid::new_v4(),
            length,
            windows,
            alleles,
        }
    }

    pub fn peptides(&self) -> impl Iterator<Item = &str> {
        self.windows.iter().map(|w| w.peptide.as_str())
    }

    /// Short description used as error context.
    pub fn describe(&self) -> String {
        let alleles: Vec<&str> = self.alleles.iter().map(|a| a.as_str()).collect();
        let sequences: BTreeSet<&str> = self.windows.iter().map(|w| w.sequence_id.as_str()).collect();
        format!(
            "batch={} length={} peptides={} sequences={:?} alleles={:?}",
            self.id,
            self.length,
            self.windows.len(),
            sequences,
            alleles
        )
    }
}

/// A materialised request for one backend call.
#[derive(Debug)]
pub enum InvocationSpec {
    Command(CommandSpec),
    Http(HttpSpec),
}

/// A local program invocation. Input files live in `workspace`, which is
/// deleted when the invocation is dropped.
#[derive(Debug)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Environment overrides applied to the child process only
    pub env: Vec<(String, String)>,
    /// When set, the tool writes results here instead of stdout
    pub output_file: Option<PathBuf>,
    pub workspace: TempDir,
}

impl CommandSpec {
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.display().to_string())
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// An idempotent form-encoded HTTP request.
#[derive(Debug, Clone)]
pub struct HttpSpec {
    pub method: reqwest::Method,
    pub url: String,
    pub form: Vec<(String, String)>,
}

/// Captured output of one invocation.
#[derive(Debug, Clone, Default)]
pub struct RawOutput {
    /// stdout, output file contents, or response body
    pub body: String,
    /// stderr or other diagnostics
    pub diagnostics: String,
}

/// Common contract for all predictor backends.
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    /// Predictor name recorded on every prediction.
    fn name(&self) -> &str;

    /// Peptide lengths this backend can score.
    fn supported_lengths(&self) -> BTreeSet<usize>;

    /// Lengths scored when the caller does not choose.
    fn default_lengths(&self) -> Vec<usize>;

    fn limits(&self) -> BatchLimits;

    /// Builds the request for `batch`, which already fits within `limits()`.
    fn build_invocation(&self, batch: &InvocationBatch) -> Result<InvocationSpec>;

    /// Runs the invocation. Dropping the returned future aborts it.
    async fn execute(&self, spec: InvocationSpec, timeout: Duration) -> Result<RawOutput>;

    /// Parses raw output into rows; all-or-nothing.
    fn parse(&self, raw: &RawOutput) -> Result<Vec<RawRow>>;
}
