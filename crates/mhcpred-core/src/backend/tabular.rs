//! Header-named tables: the IEDB tools API response and MixMHCpred's
//! results file. Columns are looked up by name, so extra or reordered
//! columns are tolerated; a missing required column is not.

use std::collections::HashMap;

use mhcpred_common::{MhcPredError, Result};

use super::layout::parse_number;
use crate::normalise::{Affinity, RawRow};

/// A parsed header plus its data rows, each row with exactly as many fields
/// as the header.
#[derive(Debug)]
pub struct HeaderTable<'a> {
    columns: HashMap<&'a str, usize>,
    header: Vec<&'a str>,
    rows: Vec<Vec<&'a str>>,
}

fn split_fields(line: &str, tabbed: bool) -> Vec<&str> {
    if tabbed {
        line.split('\t').map(str::trim).collect()
    } else {
        line.split_whitespace().collect()
    }
}

/// Reads a table whose first non-comment line is the header. Tab-separated
/// when the header contains a tab, whitespace-separated otherwise.
pub fn read_table<'a>(backend: &str, text: &'a str) -> Result<HeaderTable<'a>> {
    let mut lines = text
        .lines()
        .map(|l| l.trim_end_matches('\r'))
        .filter(|l| !l.trim().is_empty() && !l.trim_start().starts_with('#'));

    let header_line = lines
        .next()
        .ok_or_else(|| MhcPredError::unparsable(backend, "empty response"))?;
    let tabbed = header_line.contains('\t');
    let header = split_fields(header_line.trim(), tabbed);
    let columns = header.iter().enumerate().map(|(i, name)| (*name, i)).collect();

    let mut rows = Vec::new();
    for (n, line) in lines.enumerate() {
        let fields = split_fields(line.trim(), tabbed);
        if fields.len() != header.len() {
            return Err(MhcPredError::unparsable(
                backend,
                format!(
                    "row {} has {} fields, header has {}",
                    n + 1,
                    fields.len(),
                    header.len()
                ),
            ));
        }
        rows.push(fields);
    }
    Ok(HeaderTable { columns, header, rows })
}

impl<'a> HeaderTable<'a> {
    /// Index of the first of `names` present in the header.
    pub fn column(&self, backend: &str, names: &[&str]) -> Result<usize> {
        names
            .iter()
            .find_map(|n| self.columns.get(*n).copied())
            .ok_or_else(|| MhcPredError::unparsable(backend, format!("missing column '{}'", names[0])))
    }

    pub fn header(&self) -> &[&'a str] {
        &self.header
    }

    pub fn rows(&self) -> &[Vec<&'a str>] {
        &self.rows
    }
}

fn number(backend: &str, field: &str, what: &str) -> Result<f64> {
    parse_number(field).ok_or_else(|| MhcPredError::unparsable(backend, format!("{} '{}' is not numeric", what, field)))
}

/// IEDB tools API table: `allele seq_num start end length peptide ic50 rank`.
/// `seq_num` counts submitted peptides from 1.
pub fn parse_iedb(backend: &str, text: &str) -> Result<Vec<RawRow>> {
    let table = read_table(backend, text)?;
    let allele = table.column(backend, &["allele"])?;
    let seq_num = table.column(backend, &["seq_num"])?;
    table.column(backend, &["start"])?;
    table.column(backend, &["end"])?;
    let peptide = table.column(backend, &["peptide"])?;
    let ic50 = table.column(backend, &["ic50"])?;
    let rank = table.column(backend, &["rank", "percentile_rank"])?;

    table
        .rows()
        .iter()
        .map(|fields| {
            let position = fields[seq_num]
                .parse::<usize>()
                .map_err(|_| MhcPredError::unparsable(backend, format!("seq_num '{}' is not an integer", fields[seq_num])))?
                .checked_sub(1);
            Ok(RawRow {
                position,
                allele: fields[allele].to_string(),
                peptide: fields[peptide].to_string(),
                affinity: Some(Affinity::Nanomolar(number(backend, fields[ic50], "ic50")?)),
                score: None,
                percentile_rank: Some(number(backend, fields[rank], "rank")?),
            })
        })
        .collect()
}

/// MixMHCpred results: `Peptide`, best-allele summary columns, then a
/// `Score_<allele>` / `%Rank_<allele>` pair per requested allele.
/// Rows follow input order.
pub fn parse_mixmhcpred(backend: &str, text: &str) -> Result<Vec<RawRow>> {
    let table = read_table(backend, text)?;
    let peptide = table.column(backend, &["Peptide"])?;

    let mut allele_columns = Vec::new();
    for (i, name) in table.header().iter().enumerate() {
        let Some(allele) = name.strip_prefix("Score_") else {
            continue;
        };
        if allele == "bestAllele" {
            continue;
        }
        let rank = table.column(backend, &[format!("%Rank_{}", allele).as_str()])?;
        allele_columns.push((allele, i, rank));
    }
    if allele_columns.is_empty() {
        return Err(MhcPredError::unparsable(backend, "no per-allele score columns"));
    }

    let mut rows = Vec::with_capacity(table.rows().len() * allele_columns.len());
    for (allele, score, rank) in &allele_columns {
        for (position, fields) in table.rows().iter().enumerate() {
            rows.push(RawRow {
                position: Some(position),
                allele: allele.to_string(),
                peptide: fields[peptide].to_string(),
                affinity: None,
                score: Some(number(backend, fields[*score], "score")?).filter(|s| s.is_finite()),
                percentile_rank: Some(number(backend, fields[*rank], "rank")?),
            });
        }
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const IEDB: &str = "allele\tseq_num\tstart\tend\tlength\tpeptide\tic50\trank
HLA-A*02:01\t2\t1\t9\t9\tGILGFVFTL\t14.73\t0.15
HLA-A*02:01\t1\t1\t9\t9\tSIINFEKLA\t18203.1\t33
";

    const MIXMHCPRED: &str = "####################
# Output from MixMHCpred (v2.1)
####################
Peptide\tScore_bestAllele\tBestAllele\t%Rank_bestAllele\tScore_A0201\t%Rank_A0201\tScore_B0702\t%Rank_B0702
MLDDFSAGA\t0.182093\tA0201\t0.3\t0.182093\t0.3\t-1.2\t40
SPEGEETII\t-0.655341\tA0201\t51.0\t-0.655341\t51.0\t-0.9\t35.5
";

    #[test]
    fn test_iedb_rows() {
        let rows = parse_iedb("iedb", IEDB).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].position, Some(1));
        assert_eq!(rows[0].peptide, "GILGFVFTL");
        assert_eq!(rows[0].affinity, Some(Affinity::Nanomolar(14.73)));
        assert_eq!(rows[1].percentile_rank, Some(33.0));
    }

    #[test]
    fn test_iedb_percentile_rank_alias_and_spaces() {
        let text = "allele seq_num start end length peptide ic50 percentile_rank\n\
                    HLA-A*02:01 1 1 9 9 SIINFEKLA 18203.1 33\n";
        let rows = parse_iedb("iedb", text).unwrap();
        assert_eq!(rows[0].position, Some(0));
        assert_eq!(rows[0].percentile_rank, Some(33.0));
    }

    #[test]
    fn test_iedb_missing_column() {
        let text = "allele\tseq_num\tstart\tend\tpeptide\trank\nHLA-A*02:01\t1\t1\t9\tSIINFEKLA\t33\n";
        let err = parse_iedb("iedb", text).unwrap_err();
        assert!(err.to_string().contains("ic50"));
    }

    #[test]
    fn test_iedb_short_row() {
        let text = IEDB.replace("\t0.15\n", "\n");
        assert!(matches!(
            parse_iedb("iedb", &text),
            Err(MhcPredError::UnparsableOutput { .. })
        ));
    }

    #[test]
    fn test_mixmhcpred_rows_per_allele() {
        let rows = parse_mixmhcpred("MixMHCpred", MIXMHCPRED).unwrap();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].allele, "A0201");
        assert_eq!(rows[0].score, Some(0.182093));
        assert_eq!(rows[1].position, Some(1));
        assert_eq!(rows[3].allele, "B0702");
        assert_eq!(rows[3].percentile_rank, Some(35.5));
        assert!(rows.iter().all(|r| r.affinity.is_none()));
    }

    #[test]
    fn test_mixmhcpred_requires_rank_column() {
        let text = "Peptide\tScore_A0201\nMLDDFSAGA\t0.18\n";
        assert!(parse_mixmhcpred("MixMHCpred", text).is_err());
    }
}
