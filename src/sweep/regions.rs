//! `REGION:*` macro expansion (§4.2 "Macro expansion").
//!
//! A curated, static catalog kept intentionally small; a real deployment
//! would source this from the (out-of-scope) IATA reference loader.

fn region_airports(region: &str) -> Option<&'static [&'static str]> {
    Some(match region {
        "REGION:NORTH_AMERICA" => &["JFK", "LAX", "ORD", "DFW", "SFO", "YYZ", "MEX"],
        "REGION:EUROPE" => &["LHR", "CDG", "FRA", "AMS", "MAD", "FCO", "BCN"],
        "REGION:ASIA" => &["NRT", "HND", "ICN", "SIN", "HKG", "BKK", "PVG"],
        "REGION:SOUTH_AMERICA" => &["GRU", "EZE", "BOG", "LIM", "SCL"],
        "REGION:OCEANIA" => &["SYD", "MEL", "AKL"],
        _ => return None,
    })
}

/// Expands a list of IATA codes and `REGION:*` tokens into a deduplicated
/// list of concrete IATA codes, with `excluded` codes removed. Expansion is
/// performed here, at cursor-resolution time, so changes to the region
/// catalog only affect tuples not yet emitted.
pub fn expand_list(tokens: &[String], excluded: &[String]) -> Vec<String> {
    let mut out = Vec::new();
    for token in tokens {
        if let Some(codes) = region_airports(token) {
            for code in codes {
                if !out.contains(&code.to_string()) {
                    out.push(code.to_string());
                }
            }
        } else if !out.contains(token) {
            out.push(token.clone());
        }
    }
    out.retain(|code| !excluded.contains(code));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn region_expands_to_curated_list() {
        let expanded = expand_list(&["REGION:EUROPE".to_string()], &[]);
        assert!(expanded.contains(&"LHR".to_string()));
        assert!(expanded.len() > 1);
    }

    #[test]
    fn exclusions_remove_codes_after_expansion() {
        let expanded = expand_list(&["REGION:EUROPE".to_string()], &["LHR".to_string()]);
        assert!(!expanded.contains(&"LHR".to_string()));
    }

    #[test]
    fn plain_iata_codes_pass_through() {
        let expanded = expand_list(&["JFK".to_string(), "JFK".to_string()], &[]);
        assert_eq!(expanded, vec!["JFK".to_string()]);
    }
}
