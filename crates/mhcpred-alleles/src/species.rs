//! MHC species prefixes as registered with IPD-MHC.
//!
//! Mouse (`H-2`) is handled separately by the parser because its alleles
//! have no family/protein fields.

/// (common name, accepted prefixes). The first prefix is not privileged;
/// every listed spelling is canonical for its own species.
pub const SPECIES_PREFIXES: &[(&str, &[&str])] = &[
    ("human", &["HLA"]),
    ("cattle", &["BoLA"]),
    ("bison", &["Bibi"]),
    ("dog", &["DLA"]),
    ("sheep", &["OVA", "Ovar", "Ovca"]),
    ("swine", &["SLA"]),
    ("rainbow_trout", &["Onmy"]),
    ("rat", &["Rano", "Rara", "RT1"]),
    ("salmon", &["Sasa"]),
    ("cat", &["FLA"]),
    ("horse", &["ELA", "Eqca"]),
    ("chimp", &["Patr", "ChLA"]),
    ("bonobo", &["Papa"]),
    ("white_handed_gibbon", &["Hyla"]),
    ("gorilla", &["Gogo"]),
    ("orangutan", &["Popy", "OrLA"]),
    ("blue_monkey", &["Cemi"]),
    ("de_brazzas_monkey", &["Cene"]),
    ("vervet_monkey", &["Chae"]),
    ("mantled_colobus", &["Cogu"]),
    ("black_mangabey", &["Loat"]),
    ("stump_tailed_macaque", &["Maar"]),
    ("crab_eating_macaque", &["Mafa"]),
    ("japanese_macaque", &["Mafu"]),
    ("rhesus_macaque", &["Mamu", "RhLA"]),
    ("pig_tailed_macaque", &["Mane"]),
    ("lion_tailed_macaque", &["Masi"]),
    ("drill", &["Male"]),
    ("mandrill", &["Masp"]),
    ("olive_baboon", &["Paan"]),
    ("yellow_baboon", &["Pacy"]),
    ("hamadryas_baboon", &["Paha"]),
    ("guinea_baboon", &["Papp"]),
    ("chacma_baboon", &["Paur"]),
    ("entelus_langur", &["Pren"]),
    ("gelada_baboon", &["Thge"]),
    ("owl_monkey", &["Aoaz", "Aovo"]),
    ("northern_night_owl_monkey", &["Aona", "Aoni", "OmLA"]),
    ("long_haired_spider_monkey", &["Atbe"]),
    ("brown_headed_spider_monkey", &["Atfu"]),
    ("marmoset", &["Caja", "MaLA"]),
    ("pygmy_marmoset", &["Cepy"]),
    ("dusk_titi_monkey", &["Camo"]),
    ("tufted_capuchin", &["Ceap"]),
    ("golden_lion_tamarin", &["Lero"]),
    ("white_faced_saki", &["Pipi"]),
    ("saddle_backed_tamarin", &["Safu"]),
    ("red_crested_tamarin", &["Sage"]),
    ("moustached_tamarin", &["Samy"]),
    ("cotton_top_tamarin", &["Saoe"]),
    ("squirrel_monkey", &["Sasc"]),
    ("lemur", &["Leca"]),
];

pub const HUMAN_PREFIX: &str = "HLA";
pub const MOUSE_PREFIX: &str = "H-2";

/// Strips a leading `<prefix>-` (case-insensitive) and returns the
/// canonically-cased prefix with the remainder.
pub fn split_species_prefix(name: &str) -> Option<(&'static str, &str)> {
    for (_, prefixes) in SPECIES_PREFIXES {
        for prefix in *prefixes {
            let n = prefix.len();
            if name.len() > n + 1
                && name.as_bytes()[n] == b'-'
                && name[..n].eq_ignore_ascii_case(prefix)
            {
                return Some((prefix, &name[n + 1..]));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_is_case_insensitive() {
        assert_eq!(split_species_prefix("hla-A*02:01"), Some(("HLA", "A*02:01")));
        assert_eq!(split_species_prefix("MAMU-B*082:02"), Some(("Mamu", "B*082:02")));
        assert_eq!(split_species_prefix("A*02:01"), None);
        // A prefix alone is not an allele.
        assert_eq!(split_species_prefix("HLA-"), None);
    }
}
