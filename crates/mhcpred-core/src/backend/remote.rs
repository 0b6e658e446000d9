//! IEDB-style remote prediction service.
//!
//! One form-encoded POST per (peptide chunk, allele). The service answers
//! with a tab-separated table, sometimes wrapped in an HTML page.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::RETRY_AFTER;
use reqwest::StatusCode;
use scraper::{Html, Selector};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use mhcpred_common::{MhcPredError, RemoteServiceOptions, Result, SandboxClient};

use super::tabular::parse_iedb;
use super::{BackendAdapter, BatchLimits, HttpSpec, InvocationBatch, InvocationSpec, RawOutput};
use crate::normalise::RawRow;

/// Prediction methods offered by the IEDB tools API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IedbMethod {
    NetMhcCons,
    NetMhcPan,
    Ann,
    SmmPmbec,
    Smm,
    PickPocket,
    NetMhcIIPan,
    NnAlign,
    SmmAlign,
}

impl IedbMethod {
    pub const CLASS_I: [IedbMethod; 6] = [
        Self::NetMhcCons,
        Self::NetMhcPan,
        Self::Ann,
        Self::SmmPmbec,
        Self::Smm,
        Self::PickPocket,
    ];
    pub const CLASS_II: [IedbMethod; 3] = [Self::NetMhcIIPan, Self::NnAlign, Self::SmmAlign];

    /// The `method` form value.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NetMhcCons => "netmhccons",
            Self::NetMhcPan => "netmhcpan",
            Self::Ann => "ann",
            Self::SmmPmbec => "smmpmbec",
            Self::Smm => "smm",
            Self::PickPocket => "pickpocket",
            Self::NetMhcIIPan => "NetMHCIIpan",
            Self::NnAlign => "nn_align",
            Self::SmmAlign => "smm_align",
        }
    }

    pub fn is_class_ii(&self) -> bool {
        Self::CLASS_II.contains(self)
    }

    fn endpoint(&self) -> &'static str {
        if self.is_class_ii() {
            "mhcii/"
        } else {
            "mhci/"
        }
    }
}

impl fmt::Display for IedbMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IedbMethod {
    type Err = MhcPredError;

    fn from_str(s: &str) -> Result<Self> {
        Self::CLASS_I
            .iter()
            .chain(Self::CLASS_II.iter())
            .find(|m| m.as_str().eq_ignore_ascii_case(s))
            .copied()
            .ok_or_else(|| MhcPredError::Config(format!("Unknown IEDB prediction method '{}'", s)))
    }
}

/// Extracts the result table from an HTML page: the first `<pre>` block,
/// or the body text. Plain-text bodies are returned unchanged.
fn strip_html(backend: &str, body: &str) -> Result<String> {
    let head = body.trim_start();
    if !head.starts_with('<') {
        return Ok(body.to_string());
    }
    let document = Html::parse_document(body);
    let pre = Selector::parse("pre").map_err(|e| MhcPredError::unparsable(backend, e.to_string()))?;
    if let Some(block) = document.select(&pre).next() {
        return Ok(block.text().collect());
    }
    let content = Selector::parse("body").map_err(|e| MhcPredError::unparsable(backend, e.to_string()))?;
    Ok(document
        .select(&content)
        .next()
        .map(|b| b.text().collect())
        .unwrap_or_default())
}

/// A `Retry-After` value as a delay from `now`: either delta-seconds or an
/// HTTP-date. Dates in the past mean "retry now".
fn retry_after_delay(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}

fn parse_retry_after(response: &reqwest::Response) -> Option<Duration> {
    let value = response.headers().get(RETRY_AFTER)?.to_str().ok()?;
    let delay = retry_after_delay(value, Utc::now());
    if delay.is_none() {
        debug!(value, "ignoring unparsable Retry-After");
    }
    delay
}

#[derive(Debug, Clone)]
pub struct RemoteServiceAdapter {
    method: IedbMethod,
    name: String,
    url: String,
    client: SandboxClient,
}

impl RemoteServiceAdapter {
    pub fn new(method: IedbMethod, options: &RemoteServiceOptions) -> Result<Self> {
        let client = SandboxClient::for_service(options)?;
        let url = format!("{}/{}", options.base_url.trim_end_matches('/'), method.endpoint());
        Ok(Self {
            method,
            name: format!("iedb-{}", method),
            url,
            client,
        })
    }

    pub fn method(&self) -> IedbMethod {
        self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn transport_error(&self, err: reqwest::Error, timeout: Duration) -> MhcPredError {
        if err.is_timeout() {
            MhcPredError::Timeout {
                backend: self.name.clone(),
                after: timeout,
            }
        } else {
            MhcPredError::unavailable(&self.name, err.to_string())
        }
    }
}

#[async_trait]
impl BackendAdapter for RemoteServiceAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn supported_lengths(&self) -> BTreeSet<usize> {
        if self.method.is_class_ii() {
            (11..=30).collect()
        } else {
            (8..=14).collect()
        }
    }

    fn default_lengths(&self) -> Vec<usize> {
        if self.method.is_class_ii() {
            vec![15]
        } else {
            vec![9]
        }
    }

    fn limits(&self) -> BatchLimits {
        BatchLimits::default()
    }

    fn build_invocation(&self, batch: &InvocationBatch) -> Result<InvocationSpec> {
        let sequence_text = batch.peptides().collect::<Vec<_>>().join("\n");
        let mut form = vec![
            ("method".to_string(), self.method.as_str().to_string()),
            ("sequence_text".to_string(), sequence_text),
        ];
        for allele in &batch.alleles {
            form.push(("allele".to_string(), allele.iedb_name().to_string()));
            form.push(("length".to_string(), batch.length.to_string()));
        }
        Ok(InvocationSpec::Http(HttpSpec {
            method: reqwest::Method::POST,
            url: self.url.clone(),
            form,
        }))
    }

    #[instrument(skip(self, spec), fields(backend = %self.name))]
    async fn execute(&self, spec: InvocationSpec, timeout: Duration) -> Result<RawOutput> {
        let InvocationSpec::Http(spec) = spec else {
            return Err(MhcPredError::Config(format!(
                "{} can only run HTTP invocations",
                self.name
            )));
        };
        debug!(url = %spec.url, "posting prediction request");

        let response = self
            .client
            .request(spec.method.clone(), &spec.url)?
            .timeout(timeout)
            .form(&spec.form)
            .send()
            .await
            .map_err(|e| self.transport_error(e, timeout))?;

        let status = response.status();
        match status {
            StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE => {
                let retry_after = parse_retry_after(&response);
                warn!(%status, ?retry_after, "service asked us to back off");
                return Err(MhcPredError::RateLimited {
                    backend: self.name.clone(),
                    retry_after,
                });
            }
            StatusCode::BAD_GATEWAY | StatusCode::GATEWAY_TIMEOUT => {
                warn!(%status, "gateway in front of the service failed");
                return Err(MhcPredError::unavailable(&self.name, format!("gateway answered {}", status)));
            }
            _ => {}
        }

        let body = response
            .text()
            .await
            .map_err(|e| self.transport_error(e, timeout))?;
        if !status.is_success() {
            return Err(MhcPredError::BackendExecutionFailed {
                backend: self.name.clone(),
                status: status.to_string(),
                diagnostic: body.chars().take(500).collect(),
            });
        }
        Ok(RawOutput {
            body,
            diagnostics: String::new(),
        })
    }

    fn parse(&self, raw: &RawOutput) -> Result<Vec<RawRow>> {
        let text = strip_html(&self.name, &raw.body)?;
        parse_iedb(&self.name, &text)
    }
}
