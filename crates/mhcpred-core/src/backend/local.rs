//! Locally installed command-line predictors.

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use mhcpred_alleles::{normalize, Allele};
use mhcpred_common::{LocalToolOptions, MhcPredError, Result};

use super::layout::find_error_line;
use super::tools::{detect_netmhc_version, LocalTool};
use super::{BackendAdapter, BatchLimits, CommandSpec, InvocationBatch, InvocationSpec, RawOutput};
use crate::normalise::RawRow;

const INPUT_FILE: &str = "peptides.txt";
const OUTPUT_FILE: &str = "results.tsv";

/// Runs one [`LocalTool`] as a subprocess per invocation.
#[derive(Debug, Clone)]
pub struct LocalCommandAdapter {
    tool: LocalTool,
    name: String,
    executable: PathBuf,
    options: LocalToolOptions,
}

/// Finds `program` through the explicit executable or the configured search path.
fn resolve_executable(program: &str, options: &LocalToolOptions) -> Result<PathBuf> {
    if let Some(path) = &options.executable {
        if path.is_file() {
            return Ok(path.clone());
        }
        return Err(MhcPredError::unavailable(
            program,
            format!("executable {} does not exist", path.display()),
        ));
    }
    options
        .search_path
        .iter()
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| {
            MhcPredError::unavailable(
                program,
                format!("{} not found in search path {:?}", program, options.search_path),
            )
        })
}

fn spawn_error(backend: &str, program: &Path, err: std::io::Error) -> MhcPredError {
    match err.kind() {
        std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
            MhcPredError::unavailable(backend, format!("cannot run {}: {}", program.display(), err))
        }
        _ => MhcPredError::Io(err),
    }
}

/// Kills the child's whole process group when dropped.
///
/// Tools are usually shell wrappers around the real binary, so killing the
/// direct child is not enough. Any drop before a clean exit kills the group,
/// cancellation included.
struct ProcessGroupGuard {
    pid: Option<u32>,
}

impl ProcessGroupGuard {
    /// The run finished on its own; leave the group alone.
    fn disarm(mut self) {
        self.pid = None;
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        if let Some(pid) = self.pid.take() {
            kill_process_group(pid);
        }
    }
}

/// Sends SIGKILL to every process in the group led by `pid`. Best effort:
/// the group may already be gone.
#[cfg(unix)]
fn kill_process_group(pid: u32) {
    let result = std::process::Command::new("kill")
        .arg("-KILL")
        .arg(format!("-{}", pid))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    match result {
        Ok(_) => debug!(pid, "killed process group"),
        Err(e) => debug!(pid, error = %e, "could not signal process group"),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) {}

/// Runs `program` to completion or until `timeout`, whichever comes first.
/// The process group is killed on timeout and whenever the returned future
/// is dropped before the child exits.
async fn run_command(
    backend: &str,
    program: &Path,
    args: &[String],
    env: &[(String, String)],
    cwd: Option<&Path>,
    timeout: Duration,
) -> Result<Output> {
    let mut command = Command::new(program);
    command
        .args(args)
        .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }
    #[cfg(unix)]
    command.process_group(0);

    let child = command.spawn().map_err(|e| spawn_error(backend, program, e))?;
    let group = ProcessGroupGuard { pid: child.id() };

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => {
            group.disarm();
            Ok(output)
        }
        Ok(Err(e)) => Err(MhcPredError::Io(e)),
        Err(_) => {
            drop(group);
            warn!(backend, program = %program.display(), ?timeout, "killed timed-out process group");
            Err(MhcPredError::Timeout {
                backend: backend.to_string(),
                after: timeout,
            })
        }
    }
}

impl LocalCommandAdapter {
    pub fn new(tool: LocalTool, options: LocalToolOptions) -> Result<Self> {
        let executable = resolve_executable(tool.program(), &options)?;
        info!(tool = %tool, executable = %executable.display(), "Local predictor configured");
        Ok(Self {
            tool,
            name: tool.to_string(),
            executable,
            options,
        })
    }

    /// Configures `netMHC`, choosing 3.x or 4.0 from its help text.
    pub async fn detect_netmhc(options: LocalToolOptions, timeout: Duration) -> Result<Self> {
        let executable = resolve_executable("netMHC", &options)?;
        let output = run_command("netMHC", &executable, &["-h".to_string()], &[], None, timeout).await?;
        let help = format!(
            "{}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        let tool = detect_netmhc_version(&help)?;
        Self::new(tool, options)
    }

    pub fn tool(&self) -> LocalTool {
        self.tool
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// Environment overrides common to every run of the tool.
    fn base_env(&self) -> Vec<(String, String)> {
        let mut env = Vec::new();
        if let (Some(var), Some(dir)) = (self.tool.home_variable(), &self.options.data_dir) {
            env.push((var.to_string(), dir.display().to_string()));
        }
        if let Some(home) = &self.options.home_dir {
            env.push(("HOME".to_string(), home.display().to_string()));
        }
        env.extend(self.options.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        env
    }

    /// Alleles the installed tool reports via its list flag. Lines that do
    /// not parse as alleles are skipped.
    #[instrument(skip(self), fields(backend = %self.name))]
    pub async fn supported_alleles(&self, timeout: Duration) -> Result<BTreeSet<Allele>> {
        let flag = self.tool.list_flag().ok_or_else(|| {
            MhcPredError::Config(format!("{} cannot list its supported alleles", self.name))
        })?;
        let output = run_command(
            &self.name,
            &self.executable,
            &[flag.to_string()],
            &self.base_env(),
            None,
            timeout,
        )
        .await?;
        if !output.status.success() {
            return Err(MhcPredError::BackendExecutionFailed {
                backend: self.name.clone(),
                status: output.status.to_string(),
                diagnostic: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let listing = String::from_utf8_lossy(&output.stdout);
        let mut alleles = BTreeSet::new();
        for line in listing.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some(token) = line.split_whitespace().next() else { continue };
            match normalize(token) {
                Ok(allele) => {
                    alleles.insert(allele);
                }
                Err(e) => debug!(line, error = %e, "skipping allele list entry"),
            }
        }
        if alleles.is_empty() {
            return Err(MhcPredError::unparsable(&self.name, "allele list is empty"));
        }
        Ok(alleles)
    }

    /// Requested alleles missing from the tool's own list, logged as warnings.
    pub async fn unsupported_alleles(&self, requested: &[Allele], timeout: Duration) -> Result<Vec<Allele>> {
        let supported = self.supported_alleles(timeout).await?;
        let missing: Vec<Allele> = requested.iter().filter(|a| !supported.contains(*a)).cloned().collect();
        for allele in &missing {
            warn!(backend = %self.name, allele = %allele, "allele not in tool's supported list");
        }
        Ok(missing)
    }
}

#[async_trait]
impl BackendAdapter for LocalCommandAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn supported_lengths(&self) -> BTreeSet<usize> {
        self.tool.supported_lengths()
    }

    fn default_lengths(&self) -> Vec<usize> {
        self.tool.default_lengths()
    }

    fn limits(&self) -> BatchLimits {
        self.tool.limits()
    }

    fn build_invocation(&self, batch: &InvocationBatch) -> Result<InvocationSpec> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("mhcpred-");
        let workspace = match &self.options.tmp_dir {
            Some(dir) => builder.tempdir_in(dir)?,
            None => builder.tempdir()?,
        };

        let input = workspace.path().join(INPUT_FILE);
        let mut peptides = batch.peptides().collect::<Vec<_>>().join("\n");
        peptides.push('\n');
        std::fs::write(&input, peptides)?;

        let scratch = workspace.path().join("tmp");
        std::fs::create_dir(&scratch)?;

        let mut args: Vec<String> = Vec::new();
        args.extend(self.tool.peptide_mode_flags().iter().map(|f| f.to_string()));
        args.extend(self.tool.mode_flags().iter().map(|f| f.to_string()));
        args.push(self.tool.allele_flag().to_string());
        args.push(self.tool.allele_argument(&batch.alleles));
        if let Some(flag) = self.tool.tempdir_flag() {
            args.push(flag.to_string());
            args.push(scratch.display().to_string());
        }
        args.extend(self.options.extra_flags.iter().cloned());

        let output_file = self.tool.output_flag().map(|flag| {
            let path = workspace.path().join(OUTPUT_FILE);
            args.push(flag.to_string());
            args.push(path.display().to_string());
            path
        });

        if let Some(flag) = self.tool.input_flag() {
            args.push(flag.to_string());
        }
        args.push(input.display().to_string());

        let mut env = self.base_env();
        env.push(("TMPDIR".to_string(), scratch.display().to_string()));

        Ok(InvocationSpec::Command(CommandSpec {
            program: self.executable.clone(),
            args,
            env,
            output_file,
            workspace,
        }))
    }

    #[instrument(skip(self, spec), fields(backend = %self.name))]
    async fn execute(&self, spec: InvocationSpec, timeout: Duration) -> Result<RawOutput> {
        let InvocationSpec::Command(spec) = spec else {
            return Err(MhcPredError::Config(format!(
                "{} can only run command invocations",
                self.name
            )));
        };
        debug!(command = %spec.command_line(), "running predictor");

        let output = run_command(
            &self.name,
            &spec.program,
            &spec.args,
            &spec.env,
            Some(spec.workspace.path()),
            timeout,
        )
        .await?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if !output.status.success() {
            return Err(MhcPredError::BackendExecutionFailed {
                backend: self.name.clone(),
                status: output.status.to_string(),
                diagnostic: if stderr.is_empty() { stdout.trim().to_string() } else { stderr },
            });
        }
        if let Some(line) = find_error_line(&stdout) {
            return Err(MhcPredError::BackendExecutionFailed {
                backend: self.name.clone(),
                status: "error reported".to_string(),
                diagnostic: line,
            });
        }

        let body = match &spec.output_file {
            Some(path) => tokio::fs::read_to_string(path).await.map_err(|e| {
                MhcPredError::unparsable(&self.name, format!("missing results file {}: {}", path.display(), e))
            })?,
            None => stdout,
        };
        Ok(RawOutput { body, diagnostics: stderr })
    }

    fn parse(&self, raw: &RawOutput) -> Result<Vec<RawRow>> {
        if let Some(line) = find_error_line(&raw.body) {
            return Err(MhcPredError::BackendExecutionFailed {
                backend: self.name.clone(),
                status: "error reported".to_string(),
                diagnostic: line,
            });
        }
        self.tool.parse_output(&self.name, &raw.body)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::PredictionMode;
    use crate::sequence::ProteinSequence;
    use pretty_assertions::assert_eq;

    fn fake_install(program: &str) -> (tempfile::TempDir, LocalToolOptions) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(program), "#!/bin/sh\n").unwrap();
        let options = LocalToolOptions {
            search_path: vec![PathBuf::from("/nonexistent"), dir.path().to_path_buf()],
            data_dir: Some(PathBuf::from("/opt/netMHCpan-4.1")),
            ..Default::default()
        };
        (dir, options)
    }

    #[test]
    fn test_missing_executable_is_unavailable() {
        let options = LocalToolOptions {
            search_path: vec![PathBuf::from("/nonexistent")],
            ..Default::default()
        };
        let err = LocalCommandAdapter::new(LocalTool::NetMhc4, options).unwrap_err();
        assert!(matches!(err, MhcPredError::BackendUnavailable { .. }));

        let explicit = LocalToolOptions {
            executable: Some(PathBuf::from("/nonexistent/netMHC")),
            ..Default::default()
        };
        assert!(LocalCommandAdapter::new(LocalTool::NetMhc4, explicit).is_err());
    }

    #[test]
    fn test_build_invocation_writes_peptides() {
        let (dir, options) = fake_install("netMHCpan");
        let adapter =
            LocalCommandAdapter::new(LocalTool::NetMhcPan41(PredictionMode::BindingAffinity), options).unwrap();
        assert_eq!(adapter.executable(), dir.path().join("netMHCpan"));

        let seq = ProteinSequence::new("s", "SIINFEKLAV").unwrap();
        let batch = InvocationBatch::new(9, seq.windows(9), vec![normalize("A0201").unwrap()]);
        let InvocationSpec::Command(spec) = adapter.build_invocation(&batch).unwrap() else {
            panic!("expected a command invocation");
        };

        let input = spec.workspace.path().join(INPUT_FILE);
        assert_eq!(std::fs::read_to_string(&input).unwrap(), "SIINFEKLA\nIINFEKLAV\n");
        assert_eq!(&spec.args[..4], &["-p", "-BA", "-a", "HLA-A02:01"]);
        assert_eq!(spec.args[4], "-tdir");
        assert_eq!(spec.args.last().unwrap(), &input.display().to_string());
        assert!(spec.env.contains(&("NETMHCpan".to_string(), "/opt/netMHCpan-4.1".to_string())));
        assert!(spec.env.iter().any(|(k, _)| k == "TMPDIR"));
        assert!(spec.output_file.is_none());

        // The workspace disappears with the invocation.
        let workspace = spec.workspace.path().to_path_buf();
        drop(spec);
        assert!(!workspace.exists());
    }

    #[test]
    fn test_mixmhcpred_invocation_names_output_file() {
        let (_dir, options) = fake_install("MixMHCpred");
        let adapter = LocalCommandAdapter::new(LocalTool::MixMhcPred, options).unwrap();
        let seq = ProteinSequence::new("s", "SIINFEKLAV").unwrap();
        let alleles = vec![normalize("A0201").unwrap(), normalize("B0702").unwrap()];
        let batch = InvocationBatch::new(9, seq.windows(9), alleles);
        let InvocationSpec::Command(spec) = adapter.build_invocation(&batch).unwrap() else {
            panic!("expected a command invocation");
        };
        assert_eq!(&spec.args[..2], &["-a", "A0201,B0702"]);
        assert!(spec.args.contains(&"-o".to_string()));
        assert!(spec.output_file.is_some());
    }

    #[test]
    fn test_parse_rejects_error_output() {
        let (_dir, options) = fake_install("netMHCpan");
        let adapter = LocalCommandAdapter::new(LocalTool::NetMhcPan3, options).unwrap();
        let raw = RawOutput {
            body: "ERROR: Could not find allele HLA-A99:01\n".into(),
            diagnostics: String::new(),
        };
        assert!(matches!(
            adapter.parse(&raw),
            Err(MhcPredError::BackendExecutionFailed { .. })
        ));
    }
}
