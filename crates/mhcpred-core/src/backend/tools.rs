//! Catalogue of supported local predictor programs.
//!
//! Every tool is run in peptide mode: the invocation writes one peptide per
//! line and asks for one allele per call (MixMHCpred takes several).

use std::collections::BTreeSet;
use std::fmt;

use mhcpred_alleles::Allele;
use mhcpred_common::{MhcPredError, Result};

use super::layout::{self, ColumnLayout};
use super::tabular;
use super::BatchLimits;
use crate::normalise::RawRow;

/// Which output a dual-mode NetMHC tool is scored on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PredictionMode {
    BindingAffinity,
    ElutionScore,
}

impl PredictionMode {
    fn suffix(self) -> &'static str {
        match self {
            Self::BindingAffinity => "BA",
            Self::ElutionScore => "EL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocalTool {
    NetMhc3,
    NetMhc4,
    NetMhcPan28,
    NetMhcPan3,
    NetMhcPan4(PredictionMode),
    NetMhcPan41(PredictionMode),
    NetMhcCons,
    NetMhcIIPan3,
    NetMhcIIPan4(PredictionMode),
    NetMhcIIPan43(PredictionMode),
    NetMhcStabPan,
    MixMhcPred,
}

#[allow(clippy::too_many_arguments)]
const fn columns(
    version: &'static str,
    fields: usize,
    one_based: bool,
    peptide: usize,
    allele: usize,
    score: Option<usize>,
    affinity: Option<usize>,
    rank: Option<usize>,
) -> ColumnLayout {
    ColumnLayout {
        version,
        fields,
        one_based,
        peptide,
        allele,
        score,
        affinity,
        rank,
        bind_level_column: None,
    }
}

const NETMHC3: &[ColumnLayout] = &[ColumnLayout {
    bind_level_column: Some(4),
    ..columns("netMHC 3.x", 6, false, 1, 5, Some(2), Some(3), None)
}];
const NETMHC4: &[ColumnLayout] = &[columns("netMHC 4.0", 14, false, 2, 1, Some(11), Some(12), Some(13))];
const NETMHCPAN28: &[ColumnLayout] = &[columns("netMHCpan 2.8", 7, false, 2, 1, Some(4), Some(5), Some(6))];
const NETMHCCONS: &[ColumnLayout] = &[columns("netMHCcons 1.1", 7, false, 2, 1, Some(4), Some(5), Some(6))];
const NETMHCPAN3: &[ColumnLayout] = &[columns("netMHCpan 3.0", 14, true, 2, 1, Some(11), Some(12), Some(13))];
const NETMHCPAN4_BA: &[ColumnLayout] = &[columns("netMHCpan 4.0 BA", 14, true, 2, 1, Some(11), Some(12), Some(13))];
const NETMHCPAN4_EL: &[ColumnLayout] = &[columns("netMHCpan 4.0 EL", 13, true, 2, 1, Some(11), None, Some(12))];
const NETMHCPAN41_BA: &[ColumnLayout] = &[columns("netMHCpan 4.1 BA", 16, true, 2, 1, Some(13), Some(15), Some(14))];
const NETMHCPAN41_EL: &[ColumnLayout] = &[
    columns("netMHCpan 4.1 EL", 16, true, 2, 1, Some(11), None, Some(12)),
    columns("netMHCpan 4.1 EL only", 13, true, 2, 1, Some(11), None, Some(12)),
];
const NETMHCIIPAN3: &[ColumnLayout] = &[
    columns("netMHCIIpan 3.1", 11, false, 2, 1, Some(7), Some(8), Some(9)),
    columns("netMHCIIpan 3.0", 10, false, 2, 1, Some(6), Some(7), Some(8)),
];
const NETMHCIIPAN4_BA: &[ColumnLayout] = &[columns("netMHCIIpan 4.0 BA", 13, true, 2, 1, Some(10), Some(11), Some(12))];
const NETMHCIIPAN4_EL: &[ColumnLayout] = &[
    columns("netMHCIIpan 4.0 EL", 13, true, 2, 1, Some(7), None, Some(8)),
    columns("netMHCIIpan 4.0 EL only", 10, true, 2, 1, Some(7), None, Some(8)),
];
const NETMHCIIPAN43_BA: &[ColumnLayout] =
    &[columns("netMHCIIpan 4.3 BA", 14, true, 2, 1, Some(11), Some(13), Some(12))];
const NETMHCIIPAN43_EL: &[ColumnLayout] = &[columns("netMHCIIpan 4.3 EL", 14, true, 2, 1, Some(8), None, Some(9))];
const NETMHCSTABPAN: &[ColumnLayout] = &[columns("netMHCstabpan 1.0", 7, true, 2, 1, Some(5), None, Some(6))];

impl LocalTool {
    /// Default executable name.
    pub fn program(&self) -> &'static str {
        match self {
            Self::NetMhc3 | Self::NetMhc4 => "netMHC",
            Self::NetMhcPan28 | Self::NetMhcPan3 | Self::NetMhcPan4(_) | Self::NetMhcPan41(_) => "netMHCpan",
            Self::NetMhcCons => "netMHCcons",
            Self::NetMhcIIPan3 | Self::NetMhcIIPan4(_) | Self::NetMhcIIPan43(_) => "netMHCIIpan",
            Self::NetMhcStabPan => "netMHCstabpan",
            Self::MixMhcPred => "MixMHCpred",
        }
    }

    /// Flag that prints the supported allele list.
    pub fn list_flag(&self) -> Option<&'static str> {
        match self {
            Self::NetMhc3 => Some("-A"),
            Self::NetMhcIIPan3 | Self::NetMhcIIPan4(_) | Self::NetMhcIIPan43(_) => Some("-list"),
            Self::NetMhcCons | Self::MixMhcPred => None,
            _ => Some("-listMHC"),
        }
    }

    pub fn peptide_mode_flags(&self) -> &'static [&'static str] {
        match self {
            Self::NetMhcCons | Self::NetMhcIIPan3 | Self::NetMhcIIPan4(_) | Self::NetMhcIIPan43(_) => {
                &["-inptype", "1"]
            }
            Self::MixMhcPred => &[],
            _ => &["-p"],
        }
    }

    /// Flags selecting the output columns for the tool's mode.
    pub fn mode_flags(&self) -> &'static [&'static str] {
        match self {
            Self::NetMhc3 => &["--nodirect"],
            Self::NetMhcPan4(PredictionMode::BindingAffinity)
            | Self::NetMhcPan41(_)
            | Self::NetMhcIIPan4(_)
            | Self::NetMhcIIPan43(_) => &["-BA"],
            _ => &[],
        }
    }

    /// `None` means the input file is passed positionally.
    pub fn input_flag(&self) -> Option<&'static str> {
        match self {
            Self::NetMhc3 => None,
            Self::MixMhcPred => Some("-i"),
            _ => Some("-f"),
        }
    }

    pub fn allele_flag(&self) -> &'static str {
        match self {
            Self::NetMhc3 => "--mhc",
            _ => "-a",
        }
    }

    pub fn tempdir_flag(&self) -> Option<&'static str> {
        match self {
            Self::NetMhc4 | Self::NetMhcCons | Self::NetMhcPan3 | Self::NetMhcPan4(_) | Self::NetMhcPan41(_) => {
                Some("-tdir")
            }
            _ => None,
        }
    }

    /// Flag naming the results file, for tools that do not print to stdout.
    pub fn output_flag(&self) -> Option<&'static str> {
        match self {
            Self::MixMhcPred => Some("-o"),
            _ => None,
        }
    }

    /// Environment variable holding the tool's installation root.
    pub fn home_variable(&self) -> Option<&'static str> {
        match self {
            Self::NetMhc3 | Self::NetMhc4 => Some("NETMHC"),
            Self::NetMhcPan28 | Self::NetMhcPan3 | Self::NetMhcPan4(_) | Self::NetMhcPan41(_) => Some("NETMHCpan"),
            Self::NetMhcCons => Some("NETMHCcons"),
            Self::NetMhcIIPan3 | Self::NetMhcIIPan4(_) | Self::NetMhcIIPan43(_) => Some("NETMHCIIpan"),
            Self::NetMhcStabPan => Some("NETMHCstabpan"),
            Self::MixMhcPred => None,
        }
    }

    /// Allele argument in the tool's own spelling.
    pub fn allele_argument(&self, alleles: &[Allele]) -> String {
        let spelled: Vec<String> = alleles
            .iter()
            .map(|a| match self {
                Self::NetMhc4 => a.without_separators(),
                Self::NetMhcIIPan3 | Self::NetMhcIIPan4(_) | Self::NetMhcIIPan43(_) => a.netmhcii_name(),
                Self::MixMhcPred => a.compact(),
                _ => a.without_asterisk(),
            })
            .collect();
        spelled.join(",")
    }

    pub fn is_class_ii(&self) -> bool {
        matches!(self, Self::NetMhcIIPan3 | Self::NetMhcIIPan4(_) | Self::NetMhcIIPan43(_))
    }

    pub fn supported_lengths(&self) -> BTreeSet<usize> {
        match self {
            Self::NetMhc3 => (8..=11).collect(),
            _ if self.is_class_ii() => (9..=30).collect(),
            _ => (8..=14).collect(),
        }
    }

    pub fn default_lengths(&self) -> Vec<usize> {
        if self.is_class_ii() {
            vec![15]
        } else {
            vec![9]
        }
    }

    pub fn limits(&self) -> BatchLimits {
        match self {
            Self::MixMhcPred => BatchLimits {
                max_alleles_per_call: usize::MAX,
                ..BatchLimits::default()
            },
            _ => BatchLimits::default(),
        }
    }

    /// Output layouts to try, newest first.
    pub fn layouts(&self) -> &'static [ColumnLayout] {
        use PredictionMode::*;
        match self {
            Self::NetMhc3 => NETMHC3,
            Self::NetMhc4 => NETMHC4,
            Self::NetMhcPan28 => NETMHCPAN28,
            Self::NetMhcPan3 => NETMHCPAN3,
            Self::NetMhcPan4(BindingAffinity) => NETMHCPAN4_BA,
            Self::NetMhcPan4(ElutionScore) => NETMHCPAN4_EL,
            Self::NetMhcPan41(BindingAffinity) => NETMHCPAN41_BA,
            Self::NetMhcPan41(ElutionScore) => NETMHCPAN41_EL,
            Self::NetMhcCons => NETMHCCONS,
            Self::NetMhcIIPan3 => NETMHCIIPAN3,
            Self::NetMhcIIPan4(BindingAffinity) => NETMHCIIPAN4_BA,
            Self::NetMhcIIPan4(ElutionScore) => NETMHCIIPAN4_EL,
            Self::NetMhcIIPan43(BindingAffinity) => NETMHCIIPAN43_BA,
            Self::NetMhcIIPan43(ElutionScore) => NETMHCIIPAN43_EL,
            Self::NetMhcStabPan => NETMHCSTABPAN,
            Self::MixMhcPred => &[],
        }
    }

    /// Parses the tool's printed results.
    pub fn parse_output(&self, backend: &str, text: &str) -> Result<Vec<RawRow>> {
        match self {
            Self::MixMhcPred => tabular::parse_mixmhcpred(backend, text),
            _ => layout::parse_table(backend, text, self.layouts()),
        }
    }
}

impl fmt::Display for LocalTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NetMhc3 => f.write_str("netMHC-3"),
            Self::NetMhc4 => f.write_str("netMHC-4.0"),
            Self::NetMhcPan28 => f.write_str("netMHCpan-2.8"),
            Self::NetMhcPan3 => f.write_str("netMHCpan-3.0"),
            Self::NetMhcPan4(mode) => write!(f, "netMHCpan-4.0-{}", mode.suffix()),
            Self::NetMhcPan41(mode) => write!(f, "netMHCpan-4.1-{}", mode.suffix()),
            Self::NetMhcCons => f.write_str("netMHCcons"),
            Self::NetMhcIIPan3 => f.write_str("netMHCIIpan-3"),
            Self::NetMhcIIPan4(mode) => write!(f, "netMHCIIpan-4.0-{}", mode.suffix()),
            Self::NetMhcIIPan43(mode) => write!(f, "netMHCIIpan-4.3-{}", mode.suffix()),
            Self::NetMhcStabPan => f.write_str("netMHCstabpan"),
            Self::MixMhcPred => f.write_str("MixMHCpred"),
        }
    }
}

/// Picks the NetMHC generation from the text printed by `netMHC -h`.
pub fn detect_netmhc_version(help: &str) -> Result<LocalTool> {
    let v4 = help.contains("-listMHC");
    let v3 = help.contains("--Alleles");
    match (v3, v4) {
        (false, true) => Ok(LocalTool::NetMhc4),
        (true, false) => Ok(LocalTool::NetMhc3),
        (true, true) => Err(MhcPredError::unavailable(
            "netMHC",
            "help output matches more than one netMHC version",
        )),
        (false, false) => Err(MhcPredError::unavailable(
            "netMHC",
            "help output does not match any known netMHC version",
        )),
    }
}
