//! Fixed-column tables printed by the NetMHC family of tools.
//!
//! Each tool version prints a whitespace-separated table between dashed
//! rules. The column positions differ per version and mode, so every
//! backend carries an ordered list of [`ColumnLayout`]s. A layout is used
//! only if it accepts every data row of the output; otherwise the next one
//! is tried, and when none fits the output is rejected as a whole.

use regex::Regex;
use std::sync::OnceLock;

use mhcpred_common::{MhcPredError, Result};

use crate::normalise::{Affinity, RawRow};

/// Column positions of one table format. The peptide's position in the
/// input is always column 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnLayout {
    pub version: &'static str,
    /// Field count of a data row once bind-level markers are removed
    pub fields: usize,
    /// Position column counts from 1
    pub one_based: bool,
    pub peptide: usize,
    pub allele: usize,
    pub score: Option<usize>,
    /// IC50 in nM
    pub affinity: Option<usize>,
    pub rank: Option<usize>,
    /// Column at which a bare `WB`/`SB` token may be inserted (NetMHC 3.x)
    pub bind_level_column: Option<usize>,
}

fn error_line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?im)^[\s#]*(error\b.*)$").expect("static regex"))
}

/// First line reporting an error, e.g. `ERROR: allele HLA-Z01:01 not in list`.
/// Table rows start with a position and never match.
pub fn find_error_line(text: &str) -> Option<String> {
    error_line_regex()
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
}

/// Parses a numeric field. Accepts comma decimal separators; `NA`/`nan` become NaN.
pub fn parse_number(field: &str) -> Option<f64> {
    if field.eq_ignore_ascii_case("na") || field.eq_ignore_ascii_case("nan") {
        return Some(f64::NAN);
    }
    field
        .parse::<f64>()
        .ok()
        .or_else(|| {
            if field.contains(',') && !field.contains('.') {
                field.replace(',', ".").parse::<f64>().ok()
            } else {
                None
            }
        })
}

fn is_bind_level_marker(token: &str) -> bool {
    matches!(token, "<=" | "<" | "=" | "WB" | "SB" | "<=WB" | "<=SB")
}

/// Data rows of the result table: lines after the first dashed rule whose
/// first token is an integer position, split on whitespace, with trailing
/// bind-level markers removed. `None` when the output has no table at all.
pub fn table_rows(text: &str) -> Option<Vec<Vec<&str>>> {
    let mut seen_rule = false;
    let mut rows = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.starts_with("---") {
            seen_rule = true;
            continue;
        }
        if !seen_rule || line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields: Vec<&str> = line.split_whitespace().collect();
        if fields.first().map_or(true, |f| f.parse::<i64>().is_err()) {
            // Column headers, per-allele banners and footers.
            continue;
        }
        while fields.last().is_some_and(|f| is_bind_level_marker(f)) {
            fields.pop();
        }
        rows.push(fields);
    }
    seen_rule.then_some(rows)
}

fn number_at(fields: &[&str], column: Option<usize>, what: &str) -> std::result::Result<Option<f64>, String> {
    match column {
        None => Ok(None),
        Some(i) => parse_number(fields[i])
            .map(Some)
            .ok_or_else(|| format!("{} column {} is not numeric: '{}'", what, i, fields[i])),
    }
}

/// Parses one data row under `layout`.
pub fn parse_row(fields: &[&str], layout: &ColumnLayout) -> std::result::Result<RawRow, String> {
    let mut fields = fields.to_vec();
    if let Some(col) = layout.bind_level_column {
        if fields.len() == layout.fields + 1 && matches!(fields.get(col), Some(&"WB") | Some(&"SB")) {
            fields.remove(col);
        }
    }
    if fields.len() != layout.fields {
        return Err(format!("expected {} fields, found {}", layout.fields, fields.len()));
    }

    let position: i64 = fields[0]
        .parse()
        .map_err(|_| format!("position '{}' is not an integer", fields[0]))?;
    let position = if layout.one_based { position - 1 } else { position };

    let peptide = fields[layout.peptide];
    if !peptide.bytes().all(|b| b.is_ascii_alphabetic()) {
        return Err(format!("'{}' is not a peptide", peptide));
    }

    let score = number_at(&fields, layout.score, "score")?.filter(|s| s.is_finite());
    let affinity = number_at(&fields, layout.affinity, "affinity")?.map(Affinity::Nanomolar);
    let percentile_rank = number_at(&fields, layout.rank, "rank")?;

    Ok(RawRow {
        position: usize::try_from(position).ok(),
        allele: fields[layout.allele].to_string(),
        peptide: peptide.to_string(),
        affinity,
        score,
        percentile_rank,
    })
}

/// Parses a NetMHC-family table using the first layout that accepts every row.
pub fn parse_table(backend: &str, text: &str, layouts: &[ColumnLayout]) -> Result<Vec<RawRow>> {
    let rows = table_rows(text).ok_or_else(|| MhcPredError::unparsable(backend, "no result table in output"))?;

    let mut rejections = Vec::new();
    for layout in layouts {
        match rows.iter().map(|fields| parse_row(fields, layout)).collect::<std::result::Result<Vec<_>, _>>() {
            Ok(parsed) => {
                tracing::debug!(backend, layout = layout.version, rows = parsed.len(), "parsed output table");
                return Ok(parsed);
            }
            Err(reason) => rejections.push(format!("{}: {}", layout.version, reason)),
        }
    }
    Err(MhcPredError::unparsable(backend, rejections.join("; ")))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::tools::{LocalTool, PredictionMode};
    use pretty_assertions::assert_eq;

    const NETMHC3: &str = "
----------------------------------------------------------------------------------------------------
pos    peptide      logscore affinity(nM) Bind Level    Protein Name     Allele
----------------------------------------------------------------------------------------------------
0  SIINKFELL         0.437          441         WB              A1 HLA-A02:01
--------------------------------------------------------------------------------------------------
0  SIINKFFFQ         0.206         5411                         A2 HLA-A02:01
1  IINKFFFQQ         0.128        12544                         A2 HLA-A02:01
--------------------------------------------------------------------------------------------------
";

    const NETMHCPAN41: &str = "
# NetMHCpan version 4.1b

HLA-A02:01 : Distance to training data  0.000 (using nearest neighbor HLA-A02:01)

# Rank Threshold for Strong binding peptides   0.500
---------------------------------------------------------------------------------------------------------------------------
 Pos         MHC        Peptide      Core Of Gp Gl Ip Il        Icore        Identity  Score_EL %Rank_EL Score_BA %Rank_BA  Aff(nM) BindLevel
---------------------------------------------------------------------------------------------------------------------------
   1 HLA-A*02:01       SIINFEKL SII-NFEKL  0  0  0  3  1     SIINFEKL         PEPLIST 0.0100620    6.723 0.110414   20.171 15140.42
   2 HLA-A*02:01      GILGFVFTL GILGFVFTL  0  0  0  0  0    GILGFVFTL         PEPLIST 0.9115150    0.021 0.753211    0.052    14.33 <= SB
---------------------------------------------------------------------------------------------------------------------------

Protein PEPLIST. Allele HLA-A*02:01. Number of high binders 1. Number of weak binders 0. Number of peptides 2
";

    #[test]
    fn test_netmhc3_bind_level_column() {
        let rows = parse_table("netMHC", NETMHC3, LocalTool::NetMhc3.layouts()).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].peptide, "SIINKFELL");
        assert_eq!(rows[0].affinity, Some(Affinity::Nanomolar(441.0)));
        assert_eq!(rows[0].score, Some(0.437));
        assert_eq!(rows[0].percentile_rank, None);
        assert_eq!(rows[2].position, Some(1));
        assert_eq!(rows[2].allele, "HLA-A02:01");
    }

    #[test]
    fn test_netmhcpan41_modes() {
        let ba = LocalTool::NetMhcPan41(PredictionMode::BindingAffinity);
        let rows = parse_table("netMHCpan", NETMHCPAN41, ba.layouts()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].position, Some(0));
        assert_eq!(rows[1].affinity, Some(Affinity::Nanomolar(14.33)));
        assert_eq!(rows[1].percentile_rank, Some(0.052));

        let el = LocalTool::NetMhcPan41(PredictionMode::ElutionScore);
        let rows = parse_table("netMHCpan", NETMHCPAN41, el.layouts()).unwrap();
        assert_eq!(rows[1].affinity, None);
        assert_eq!(rows[1].score, Some(0.911515));
        assert_eq!(rows[1].percentile_rank, Some(0.021));
    }

    #[test]
    fn test_truncated_row_rejects_whole_table() {
        let truncated = NETMHCPAN41.replace("0.753211    0.052    14.33 <= SB", "0.753211    0.052");
        let err = parse_table(
            "netMHCpan",
            &truncated,
            LocalTool::NetMhcPan41(PredictionMode::BindingAffinity).layouts(),
        )
        .unwrap_err();
        assert!(matches!(err, MhcPredError::UnparsableOutput { .. }));
    }

    #[test]
    fn test_missing_table() {
        let err = parse_table("netMHC", "netMHC: command banner only\n", LocalTool::NetMhc4.layouts()).unwrap_err();
        assert!(err.to_string().contains("no result table"));
    }

    #[test]
    fn test_comma_decimals_and_na() {
        assert_eq!(parse_number("0,437"), Some(0.437));
        assert_eq!(parse_number("1.5"), Some(1.5));
        assert!(parse_number("NA").unwrap().is_nan());
        assert_eq!(parse_number("1,000.5"), None);
        assert_eq!(parse_number("abc"), None);
    }

    #[test]
    fn test_error_line_detection() {
        let out = "# NetMHCpan version 4.1b\nERROR: Allele HLA-Z99:99 not in list\n";
        assert_eq!(find_error_line(out).as_deref(), Some("ERROR: Allele HLA-Z99:99 not in list"));
        assert_eq!(find_error_line(NETMHCPAN41), None);
        // A peptide containing the letters E-R-R-O-R is not an error.
        assert_eq!(find_error_line("---\n  1 HLA-A*02:01 KLERRORAV x 0.1 10.0 1.0\n"), None);
    }
}
