use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use mhcpred_common::{MhcPredError, Result};

use crate::parse::{parse_allele_name, ParsedAllele};

/// A canonically named MHC allele.
///
/// Two alleles compare equal exactly when their canonical names match, so
/// `"hla-a0101"` and `"A*01:01"` are the same allele.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Allele {
    name: String,
    parsed: ParsedAllele,
}

/// Normalizes a free-form allele name, e.g. `"hla-a0201"` -> `HLA-A*02:01`.
pub fn normalize(raw: &str) -> Result<Allele> {
    let parsed = parse_allele_name(raw)?;
    Ok(Allele {
        name: parsed.canonical(),
        parsed,
    })
}

/// Species-less compact form, e.g. `"HLA-A*02:01"` -> `A0201`.
pub fn compact(raw: &str) -> Result<String> {
    Ok(normalize(raw)?.compact())
}

impl Allele {
    pub fn as_str(&self) -> &str {
        &self.name
    }

    pub fn parsed(&self) -> &ParsedAllele {
        &self.parsed
    }

    pub fn species(&self) -> &str {
        self.parsed.species()
    }

    pub fn is_class_ii(&self) -> bool {
        self.parsed.is_class_ii()
    }

    pub fn compact(&self) -> String {
        self.parsed.compact()
    }

    /// `HLA-A02:01`: the spelling most NetMHC-family tools accept on `-a`.
    pub fn without_asterisk(&self) -> String {
        self.name.replace('*', "")
    }

    /// `HLA-A0201`: NetMHC 4.0 drops both separators.
    pub fn without_separators(&self) -> String {
        self.name.replace(&['*', ':'][..], "")
    }

    /// IEDB tools API spelling; the canonical name.
    pub fn iedb_name(&self) -> &str {
        &self.name
    }

    /// NetMHCIIpan spelling: `DRB1_0101` for single chains,
    /// `HLA-DQA10501-DQB10201` for alpha/beta pairs, mouse names unchanged.
    pub fn netmhcii_name(&self) -> String {
        match &self.parsed {
            ParsedAllele::Single(name) if name.is_mouse() => self.name.clone(),
            ParsedAllele::Single(name) if name.species == "HLA" => {
                format!("{}_{}{}", name.gene, name.family, name.code)
            }
            ParsedAllele::Single(_) => self.without_separators(),
            ParsedAllele::AlphaBeta { .. } => format!("{}-{}", self.species(), self.compact()),
        }
    }
}

impl fmt::Display for Allele {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl AsRef<str> for Allele {
    fn as_ref(&self) -> &str {
        &self.name
    }
}

impl PartialEq for Allele {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Allele {}

impl Hash for Allele {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl PartialOrd for Allele {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Allele {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name.cmp(&other.name)
    }
}

impl std::str::FromStr for Allele {
    type Err = MhcPredError;

    fn from_str(s: &str) -> Result<Self> {
        normalize(s)
    }
}

impl TryFrom<String> for Allele {
    type Error = MhcPredError;

    fn try_from(value: String) -> Result<Self> {
        normalize(&value)
    }
}

impl From<Allele> for String {
    fn from(allele: Allele) -> Self {
        allele.name
    }
}
