//! # mhcpred-alleles
//!
//! Canonical MHC allele names.
//!
//! Predictors disagree about how alleles are written (`HLA-A*02:01`,
//! `HLA-A0201`, `A*02:01`, `DRB1_0101`, ...). Every allele entering or leaving
//! a backend passes through [`normalize`], which maps all of these to one
//! canonical [`Allele`].
//!
//! ```
//! use mhcpred_alleles::normalize;
//!
//! let allele = normalize("hla-a0201").unwrap();
//! assert_eq!(allele.as_str(), "HLA-A*02:01");
//! assert_eq!(allele.compact(), "A0201");
//! ```

pub mod allele;
pub mod parse;
pub mod species;

pub use allele::{compact, normalize, Allele};
pub use parse::{parse_allele_name, AlleleName, ParsedAllele};
