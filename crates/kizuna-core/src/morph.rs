//! # Morphological Tag Utilities
//!
//! Helpers for comparing UD-style tag descriptors of the form
//! `POS,Key=Val|Key=Val`. Standalone text processing, not part of the
//! parsing control flow.

/// Split a tag descriptor into its POS and a list of `(key, value)` features.
///
/// A descriptor without a comma carries no features. A feature value may
/// itself be a comma-separated list, which is expanded into one pair per
/// value.
pub fn descr_to_feats(descr: &str) -> (String, Vec<(String, String)>) {
    match descr.split_once(',') {
        None => (descr.to_string(), Vec::new()),
        Some((pos, feats)) => {
            let mut fields = Vec::new();
            for elem in feats.split('|') {
                if let Some((key, values)) = elem.split_once('=') {
                    for value in values.split(',') {
                        fields.push((key.to_string(), value.to_string()));
                    }
                }
            }
            (pos.to_string(), fields)
        }
    }
}

/// Normalize feature values that vary between annotation conventions.
fn normalize_value(value: &str) -> &str {
    match value {
        "Ptan" => "Plur",
        "Brev" => "Short",
        other => other,
    }
}

/// Check whether all features of `first` are present in `second`.
///
/// POS must match exactly. The `Abbr` feature is ignored, and the
/// `Ptan`/`Plur` and `Brev`/`Short` aliases are treated as equal.
pub fn is_subsumed(first: &str, second: &str) -> bool {
    let (first_pos, first_feats) = descr_to_feats(first);
    let (second_pos, second_feats) = descr_to_feats(second);
    if first_pos != second_pos {
        return false;
    }
    for (key, value) in &first_feats {
        if key == "Abbr" {
            continue;
        }
        let value = normalize_value(value);
        let found = second_feats
            .iter()
            .any(|(k, v)| k == key && normalize_value(v) == value);
        if !found {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descr_to_feats_plain_pos() {
        let (pos, feats) = descr_to_feats("PUNCT");
        assert_eq!(pos, "PUNCT");
        assert!(feats.is_empty());
    }

    #[test]
    fn test_descr_to_feats_with_features() {
        let (pos, feats) = descr_to_feats("NOUN,Case=Nom|Number=Sing");
        assert_eq!(pos, "NOUN");
        assert_eq!(
            feats,
            vec![
                ("Case".to_string(), "Nom".to_string()),
                ("Number".to_string(), "Sing".to_string()),
            ]
        );
    }

    #[test]
    fn test_descr_to_feats_multi_value() {
        let (_, feats) = descr_to_feats("VERB,Aspect=Imp,Perf");
        assert_eq!(
            feats,
            vec![
                ("Aspect".to_string(), "Imp".to_string()),
                ("Aspect".to_string(), "Perf".to_string()),
            ]
        );
    }

    #[test]
    fn test_subsumption_basic() {
        assert!(is_subsumed("NOUN,Case=Nom", "NOUN,Case=Nom|Number=Sing"));
        assert!(!is_subsumed("NOUN,Case=Nom|Number=Sing", "NOUN,Case=Nom"));
        assert!(!is_subsumed("NOUN,Case=Nom", "VERB,Case=Nom"));
    }

    #[test]
    fn test_subsumption_aliases() {
        // Ptan counts as Plur, Brev as Short.
        assert!(is_subsumed("NOUN,Number=Ptan", "NOUN,Number=Plur"));
        assert!(is_subsumed("ADJ,Variant=Brev", "ADJ,Variant=Short"));
    }

    #[test]
    fn test_subsumption_skips_abbr() {
        assert!(is_subsumed("NOUN,Abbr=Yes|Case=Nom", "NOUN,Case=Nom"));
    }
}
