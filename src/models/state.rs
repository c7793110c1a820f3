// file: src/models/state.rs
// description: US state lookup (abbreviation, fips code) used to select census inputs
// reference: https://www.census.gov/library/reference/code-lists/ansi.html

use crate::utils::normalize_unicode_name;
use serde::{Deserialize, Serialize};

pub const NON_US_STATE_FIPS: &str = "0";
pub const NON_US_STATE_ABBREV: &str = "ZZ";

/// (name, abbreviation, fips)
const US_STATES: &[(&str, &str, &str)] = &[
    ("Alabama", "AL", "01"),
    ("Alaska", "AK", "02"),
    ("Arizona", "AZ", "04"),
    ("Arkansas", "AR", "05"),
    ("California", "CA", "06"),
    ("Colorado", "CO", "08"),
    ("Connecticut", "CT", "09"),
    ("Delaware", "DE", "10"),
    ("District of Columbia", "DC", "11"),
    ("Florida", "FL", "12"),
    ("Georgia", "GA", "13"),
    ("Hawaii", "HI", "15"),
    ("Idaho", "ID", "16"),
    ("Illinois", "IL", "17"),
    ("Indiana", "IN", "18"),
    ("Iowa", "IA", "19"),
    ("Kansas", "KS", "20"),
    ("Kentucky", "KY", "21"),
    ("Louisiana", "LA", "22"),
    ("Maine", "ME", "23"),
    ("Maryland", "MD", "24"),
    ("Massachusetts", "MA", "25"),
    ("Michigan", "MI", "26"),
    ("Minnesota", "MN", "27"),
    ("Mississippi", "MS", "28"),
    ("Missouri", "MO", "29"),
    ("Montana", "MT", "30"),
    ("Nebraska", "NE", "31"),
    ("Nevada", "NV", "32"),
    ("New Hampshire", "NH", "33"),
    ("New Jersey", "NJ", "34"),
    ("New Mexico", "NM", "35"),
    ("New York", "NY", "36"),
    ("North Carolina", "NC", "37"),
    ("North Dakota", "ND", "38"),
    ("Ohio", "OH", "39"),
    ("Oklahoma", "OK", "40"),
    ("Oregon", "OR", "41"),
    ("Pennsylvania", "PA", "42"),
    ("Rhode Island", "RI", "44"),
    ("South Carolina", "SC", "45"),
    ("South Dakota", "SD", "46"),
    ("Tennessee", "TN", "47"),
    ("Texas", "TX", "48"),
    ("Utah", "UT", "49"),
    ("Vermont", "VT", "50"),
    ("Virginia", "VA", "51"),
    ("Washington", "WA", "53"),
    ("West Virginia", "WV", "54"),
    ("Wisconsin", "WI", "55"),
    ("Wyoming", "WY", "56"),
    ("Puerto Rico", "PR", "72"),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateInfo {
    pub name: Option<String>,
    pub abbrev: String,
    pub fips: String,
    /// Employment data only exists for US states.
    pub run_import_jobs: bool,
}

impl StateInfo {
    pub fn non_us() -> Self {
        Self {
            name: None,
            abbrev: NON_US_STATE_ABBREV.to_string(),
            fips: NON_US_STATE_FIPS.to_string(),
            run_import_jobs: false,
        }
    }

    pub fn is_us_state(&self) -> bool {
        self.fips != NON_US_STATE_FIPS
    }
}

/// Looks a state up by name, abbreviation or FIPS code.
pub fn lookup_state(query: &str) -> Option<StateInfo> {
    let query = query.trim();
    let normalized = normalize_unicode_name(query);

    US_STATES
        .iter()
        .find(|(name, abbrev, fips)| {
            normalize_unicode_name(name) == normalized
                || abbrev.eq_ignore_ascii_case(query)
                || *fips == query
        })
        .map(|(name, abbrev, fips)| StateInfo {
            name: Some((*name).to_string()),
            abbrev: (*abbrev).to_string(),
            fips: (*fips).to_string(),
            run_import_jobs: true,
        })
}

pub fn derive_state_info(region: Option<&str>) -> StateInfo {
    region
        .and_then(lookup_state)
        .unwrap_or_else(StateInfo::non_us)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_lookup_by_name_abbrev_and_fips() {
        let by_name = lookup_state("new mexico").unwrap();
        assert_eq!(by_name.abbrev, "NM");
        assert_eq!(by_name.fips, "35");
        assert!(by_name.run_import_jobs);

        assert_eq!(lookup_state("tx").unwrap().fips, "48");
        assert_eq!(lookup_state("06").unwrap().abbrev, "CA");
        assert_eq!(
            lookup_state("District of Columbia").unwrap().abbrev,
            "DC"
        );
    }

    #[test]
    fn test_unknown_region_is_not_a_state() {
        assert!(lookup_state("Québec").is_none());
        assert_eq!(derive_state_info(Some("Bavaria")), StateInfo::non_us());
        assert_eq!(derive_state_info(None), StateInfo::non_us());
    }

    #[test]
    fn test_table_is_consistent() {
        assert_eq!(US_STATES.len(), 52);
        for (_, abbrev, fips) in US_STATES {
            assert_eq!(abbrev.len(), 2);
            assert_eq!(fips.len(), 2);
        }
    }
}
