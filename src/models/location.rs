// file: src/models/location.rs
// description: city selector (country, region, city, fips) with slug and country rules
// reference: internal data structures

use crate::error::{BnaError, Result};
use crate::models::state::{StateInfo, derive_state_info};
use crate::utils::slugify;
use serde::{Deserialize, Serialize};

pub const NON_US_CITY_FIPS_CODE: &str = "0";
pub const USA_NAME: &str = "united states";

const USA_ALIASES: [&str; 3] = ["US", "USA", "UNITED STATES"];

pub fn is_usa(country: &str) -> bool {
    USA_ALIASES.contains(&country.trim().to_uppercase().as_str())
}

/// All spellings of the United States collapse to a single name.
pub fn normalize_country_name(country: &str) -> String {
    if is_usa(country) {
        USA_NAME.to_string()
    } else {
        country.trim().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub country: String,
    pub city: String,
    pub region: Option<String>,
    pub fips_code: String,
}

impl Location {
    pub fn new(country: &str, city: &str, region: Option<&str>, fips_code: Option<&str>) -> Self {
        Self {
            country: normalize_country_name(country),
            city: city.trim().to_string(),
            region: region
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string),
            fips_code: fips_code
                .unwrap_or(NON_US_CITY_FIPS_CODE)
                .trim()
                .to_string(),
        }
    }

    pub fn is_usa(&self) -> bool {
        is_usa(&self.country)
    }

    fn require_city_slug(&self) -> Result<()> {
        if slugify(&self.city).is_empty() {
            return Err(BnaError::Validation(format!(
                "the city name {:?} does not produce a usable directory name",
                self.city
            )));
        }
        Ok(())
    }

    /// US cities need both a state and a city FIPS code; other cities never carry one.
    pub fn validate_for_analysis(mut self) -> Result<Self> {
        self.require_city_slug()?;
        if self.is_usa() {
            if self.region.is_none() || self.fips_code == NON_US_CITY_FIPS_CODE {
                return Err(BnaError::Validation(
                    "`region` and `fips_code` are required for US cities".to_string(),
                ));
            }
        } else {
            self.fips_code = NON_US_CITY_FIPS_CODE.to_string();
        }
        Ok(self)
    }

    pub fn require_region_for_usa(&self) -> Result<()> {
        self.require_city_slug()?;
        if self.is_usa() && self.region.is_none() {
            return Err(BnaError::Validation(
                "`region` is required for US cities".to_string(),
            ));
        }
        Ok(())
    }

    pub fn slug(&self) -> String {
        let mut parts = vec![self.city.as_str()];
        if let Some(region) = &self.region {
            parts.push(region);
        }
        parts.push(&self.country);
        slugify(&parts.join(" "))
    }

    /// Region used to find the OSM extract, the country otherwise.
    pub fn osm_region(&self) -> &str {
        self.region.as_deref().unwrap_or(&self.country)
    }

    pub fn state_info(&self) -> StateInfo {
        if self.is_usa() {
            derive_state_info(self.region.as_deref())
        } else {
            StateInfo::non_us()
        }
    }

    /// City FIPS code, padded to the 7 digits used by the census for US cities.
    pub fn city_fips(&self) -> String {
        if self.is_usa() {
            format!("{:0>7}", self.fips_code)
        } else {
            self.fips_code.clone()
        }
    }

    pub fn display_name(&self) -> String {
        let mut parts = vec![self.country.clone()];
        if let Some(region) = &self.region {
            parts.push(region.clone());
        }
        parts.push(format!("{} ({})", self.city, self.fips_code));
        parts.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_is_usa() {
        assert!(is_usa("us"));
        assert!(is_usa("USA"));
        assert!(is_usa("United States"));
        assert!(!is_usa("Canada"));
        assert!(!is_usa("United Kingdom"));
    }

    #[test]
    fn test_normalize_country_name() {
        assert_eq!(normalize_country_name("usa"), "united states");
        assert_eq!(normalize_country_name(" US "), "united states");
        assert_eq!(normalize_country_name("Spain"), "Spain");
    }

    #[test]
    fn test_slug() {
        let location = Location::new("usa", "Santa Rosa", Some("New Mexico"), Some("3570670"));
        assert_eq!(location.slug(), "santa-rosa-new-mexico-united-states");

        let location = Location::new("Canada", "Montréal", Some("Québec"), None);
        assert_eq!(location.slug(), "montreal-quebec-canada");

        let location = Location::new("Malta", "Valletta", None, None);
        assert_eq!(location.slug(), "valletta-malta");

        let moscow = Location::new("Russia", "Москва", None, None);
        let kazan = Location::new("Russia", "Казань", None, None);
        assert_eq!(moscow.slug(), "moskva-russia");
        assert_ne!(moscow.slug(), kazan.slug());
    }

    #[test]
    fn test_city_without_usable_name_is_rejected() {
        let location = Location::new("Malta", "!!", None, None);
        assert!(matches!(
            location.clone().validate_for_analysis(),
            Err(BnaError::Validation(_))
        ));
        assert!(location.require_region_for_usa().is_err());
    }

    #[test]
    fn test_validate_for_analysis() {
        let ok = Location::new("us", "Provincetown", Some("Massachusetts"), Some("2555535"));
        assert!(ok.validate_for_analysis().is_ok());

        let missing_fips = Location::new("us", "Provincetown", Some("Massachusetts"), None);
        assert!(missing_fips.validate_for_analysis().is_err());

        let missing_region = Location::new("usa", "Provincetown", None, Some("2555535"));
        assert!(missing_region.validate_for_analysis().is_err());

        let foreign = Location::new("Spain", "Valencia", Some("Valencia"), Some("1234"));
        assert_eq!(foreign.validate_for_analysis().unwrap().fips_code, "0");
    }

    #[test]
    fn test_city_fips_is_padded() {
        let location = Location::new("us", "Anchorage", Some("Alaska"), Some("203000"));
        assert_eq!(location.city_fips(), "0203000");

        let location = Location::new("Malta", "Valletta", None, None);
        assert_eq!(location.city_fips(), "0");
    }

    #[test]
    fn test_state_info_for_non_us_city() {
        let location = Location::new("France", "Paris", Some("Ile-de-France"), None);
        let info = location.state_info();
        assert_eq!(info.abbrev, "ZZ");
        assert_eq!(info.fips, "0");
        assert!(!info.run_import_jobs);
    }
}
