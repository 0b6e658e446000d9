//! Allele name parser.
//!
//! Splits loosely written allele names into species, gene, allele family and
//! protein code. Accepts every spelling of the same allele seen in predictor
//! inputs and outputs:
//!
//! | Input                 | Parsed as          |
//! |-----------------------|--------------------|
//! | `HLA-A*02:01`         | HLA / A / 02 / 01  |
//! | `a0201`, `A*0201`     | HLA / A / 02 / 01  |
//! | `A2` (serotype)       | HLA / A / 02 / 01  |
//! | `HLA-A*02:01:01G`     | HLA / A / 02 / 01  |
//! | `DRB1_0102`           | HLA / DRB1 / 01 / 02 |
//! | `Mamu-B*082:02`       | Mamu / B / 82 / 02 |
//! | `H2-Kd`               | H-2 / K / - / d    |

use mhcpred_common::{MhcPredError, Result};

use crate::species::{split_species_prefix, HUMAN_PREFIX, MOUSE_PREFIX};

const SEPARATORS: &[u8] = b":*-_";

/// One MHC chain. `family` is empty for mouse alleles, which are named by
/// gene plus a single lowercase haplotype letter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AlleleName {
    pub species: String,
    pub gene: String,
    pub family: String,
    pub code: String,
}

impl AlleleName {
    pub fn is_mouse(&self) -> bool {
        self.species == MOUSE_PREFIX
    }

    pub fn is_class_ii(&self) -> bool {
        self.gene.starts_with('D') || (self.is_mouse() && self.gene.starts_with('I'))
    }

    /// `A*02:01`, or `Kd` for mouse.
    fn chain_name(&self) -> String {
        if self.family.is_empty() {
            format!("{}{}", self.gene, self.code)
        } else {
            format!("{}*{}:{}", self.gene, self.family, self.code)
        }
    }

    /// `A0201`, or `Kd` for mouse.
    fn compact_chain_name(&self) -> String {
        format!("{}{}{}", self.gene, self.family, self.code)
    }
}

/// A parsed allele: one chain, or an explicit class II alpha/beta pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ParsedAllele {
    Single(AlleleName),
    AlphaBeta { alpha: AlleleName, beta: AlleleName },
}

impl ParsedAllele {
    pub fn species(&self) -> &str {
        match self {
            Self::Single(name) => &name.species,
            Self::AlphaBeta { alpha, .. } => &alpha.species,
        }
    }

    pub fn is_class_ii(&self) -> bool {
        match self {
            Self::Single(name) => name.is_class_ii(),
            Self::AlphaBeta { .. } => true,
        }
    }

    /// Canonical spelling, e.g. `HLA-A*02:01`, `H-2-Kd`,
    /// `HLA-DPA1*01:05-DPB1*100:01`.
    pub fn canonical(&self) -> String {
        match self {
            Self::Single(name) => format!("{}-{}", name.species, name.chain_name()),
            Self::AlphaBeta { alpha, beta } => format!(
                "{}-{}-{}",
                alpha.species,
                alpha.chain_name(),
                beta.chain_name()
            ),
        }
    }

    /// Species-less spelling without separators, e.g. `A0201`, `DPA10105-DPB110001`.
    pub fn compact(&self) -> String {
        match self {
            Self::Single(name) => name.compact_chain_name(),
            Self::AlphaBeta { alpha, beta } => {
                format!("{}-{}", alpha.compact_chain_name(), beta.compact_chain_name())
            }
        }
    }
}

fn invalid(raw: &str, reason: impl Into<String>) -> MhcPredError {
    MhcPredError::InvalidAlleleFormat {
        allele: raw.to_string(),
        reason: reason.into(),
    }
}

/// Splits off the longest prefix (at most `max_len` bytes) whose bytes satisfy `pred`.
/// Input is ASCII by the time this is called.
fn split_while(s: &str, max_len: usize, pred: impl Fn(u8) -> bool) -> (&str, &str) {
    let end = s.bytes().take(max_len).take_while(|b| pred(*b)).count();
    s.split_at(end)
}

fn skip_separators(s: &str) -> &str {
    split_while(s, usize::MAX, |b| SEPARATORS.contains(&b)).1
}

/// Parses an allele name in any supported convention.
pub fn parse_allele_name(raw: &str) -> Result<ParsedAllele> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(invalid(raw, "empty allele name"));
    }
    if !name.is_ascii() {
        return Err(invalid(raw, "non-ASCII characters"));
    }

    let upper = name.to_ascii_uppercase();
    if upper.starts_with("H2") || upper.starts_with("H-2") {
        return parse_mouse(raw, name).map(ParsedAllele::Single);
    }

    let (species, rest) = split_species_prefix(name).unwrap_or((HUMAN_PREFIX, name));
    if rest.is_empty() {
        return Err(invalid(raw, "incomplete allele name"));
    }

    let (gene, rest) = split_gene(raw, rest)?;

    // Alpha/beta pairs: "DPA1*01:05-DPB1*100:01" or "DPA1*01:05/DPB1*100:01".
    let mut halves = rest.splitn(3, |c: char| c == '-' || c == '/');
    let alpha_rest = halves.next().unwrap_or_default();
    let beta = halves.next();
    if halves.next().is_some() {
        return Err(invalid(raw, "too many chain separators"));
    }

    let (family, code) = parse_fields(raw, alpha_rest)?;
    let alpha = AlleleName {
        species: species.to_string(),
        gene,
        family,
        code,
    };

    match beta {
        None => Ok(ParsedAllele::Single(alpha)),
        Some(_) if !alpha.is_class_ii() => Err(invalid(raw, "only class II alleles pair alpha and beta chains")),
        Some(beta_name) => match parse_allele_name(beta_name)? {
            ParsedAllele::Single(beta) if !beta.is_class_ii() => {
                Err(invalid(raw, "only class II alleles pair alpha and beta chains"))
            }
            ParsedAllele::Single(beta) if !beta.is_mouse() => Ok(ParsedAllele::AlphaBeta {
                beta: AlleleName {
                    species: alpha.species.clone(),
                    ..beta
                },
                alpha,
            }),
            _ => Err(invalid(raw, "malformed beta chain")),
        },
    }
}

/// Gene names: class II genes (leading `D`) are letters plus at most one digit
/// (`DRB1`, `DQA1`, `DRA`); numeric genes (`BoLA-1`, `DLA-88`) are digits; other
/// genes are letters, extended by trailing digits only when `*` follows (`A1*001:01`).
fn split_gene<'a>(raw: &str, rest: &'a str) -> Result<(String, &'a str)> {
    let first = rest.as_bytes()[0];
    let (letters, after_letters) = split_while(rest, usize::MAX, |b| b.is_ascii_alphabetic());

    let (gene_len, remainder) = if first.eq_ignore_ascii_case(&b'D') {
        let (digit, after) = split_while(after_letters, 1, |b| b.is_ascii_digit());
        (letters.len() + digit.len(), after)
    } else if first.is_ascii_alphabetic() {
        let (digits, after_digits) = split_while(after_letters, usize::MAX, |b| b.is_ascii_digit());
        if !digits.is_empty() && after_digits.starts_with('*') {
            (letters.len() + digits.len(), after_digits)
        } else {
            (letters.len(), after_letters)
        }
    } else if first.is_ascii_digit() {
        let (digits, after_digits) = split_while(rest, usize::MAX, |b| b.is_ascii_digit());
        (digits.len(), after_digits)
    } else {
        return Err(invalid(raw, "cannot parse gene name"));
    };

    if gene_len == 0 {
        return Err(invalid(raw, "no gene name"));
    }
    if remainder.is_empty() {
        return Err(invalid(raw, "missing allele family"));
    }
    Ok((rest[..gene_len].to_ascii_uppercase(), remainder))
}

/// Parses `*02:01`, `0201`, `00201`, `2`, `:02:01:01G`, ... into a
/// two-digit-normalized (family, code) pair.
fn parse_fields(raw: &str, s: &str) -> Result<(String, String)> {
    let s = skip_separators(s);
    let (digits, _) = split_while(s, usize::MAX, |b| b.is_ascii_digit());

    // An even run ("0201", "020101") is a compact run of two-digit fields.
    let family_len = if digits.len() >= 4 && digits.len() % 2 == 0 { 2 } else { 3 };
    let (family, s) = split_while(s, family_len, |b| b.is_ascii_digit());
    if family.is_empty() {
        return Err(invalid(raw, "missing allele family"));
    }

    let s = skip_separators(s);
    let (code_run, s) = split_while(s, usize::MAX, |b| b.is_ascii_digit());
    // Trailing synonymous/non-coding fields are dropped.
    let code = match code_run.len() {
        n if n > 3 && n % 2 == 0 => &code_run[..2],
        n if n > 3 => &code_run[..3],
        _ => code_run,
    };

    check_suffix(raw, s)?;

    let family = match family.len() {
        1 => format!("0{}", family),
        3 if family.starts_with('0') => family[1..].to_string(),
        _ => family.to_string(),
    };
    let code = match code.len() {
        0 => "01".to_string(),
        1 => format!("0{}", code),
        3 if code.starts_with('0') => code[1..].to_string(),
        _ => code.to_string(),
    };
    Ok((family, code))
}

/// After family and code only further numeric fields and a single
/// expression/group letter (`G`, `N`, `Q`, ...) may follow.
fn check_suffix(raw: &str, mut s: &str) -> Result<()> {
    loop {
        let after_sep = skip_separators(s);
        let (digits, after_digits) = split_while(after_sep, usize::MAX, |b| b.is_ascii_digit());
        if digits.is_empty() {
            s = after_sep;
            break;
        }
        s = after_digits;
    }
    match s.len() {
        0 => Ok(()),
        1 if s.as_bytes()[0].is_ascii_alphabetic() => Ok(()),
        _ => Err(invalid(raw, format!("unexpected trailing characters '{}'", s))),
    }
}

/// Mouse alleles: `H2-Kd`, `H-2-Db`, `H2-IAb`.
fn parse_mouse(raw: &str, name: &str) -> Result<AlleleName> {
    let rest = if name.as_bytes()[1] == b'-' { &name[3..] } else { &name[2..] };
    let rest = skip_separators(rest);
    if !rest.bytes().all(|b| b.is_ascii_alphabetic()) {
        return Err(invalid(raw, "malformed mouse allele"));
    }

    let gene_len = if rest.starts_with(&['I', 'i'][..]) { 2 } else { 1 };
    if rest.len() < gene_len + 1 {
        return Err(invalid(raw, "incomplete mouse allele"));
    }
    if rest.len() > gene_len + 1 {
        return Err(invalid(raw, "malformed mouse allele"));
    }

    Ok(AlleleName {
        species: MOUSE_PREFIX.to_string(),
        gene: rest[..gene_len].to_ascii_uppercase(),
        family: String::new(),
        code: rest[gene_len..].to_ascii_lowercase(),
    })
}
