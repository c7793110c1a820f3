// file: src/models/analysis.rs
// description: analysis parts, export targets and lodes file parts
// reference: internal data structures

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ComputePart {
    Features,
    Stress,
    Connectivity,
    /// Mileage computation, only run in experimental mode.
    Measure,
}

impl ComputePart {
    pub fn all() -> Vec<ComputePart> {
        vec![
            ComputePart::Features,
            ComputePart::Stress,
            ComputePart::Connectivity,
            ComputePart::Measure,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ComputePart::Features => "features",
            ComputePart::Stress => "stress",
            ComputePart::Connectivity => "connectivity",
            ComputePart::Measure => "measure",
        }
    }
}

impl fmt::Display for ComputePart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Exporter {
    None,
    #[default]
    Local,
}

/// Complementary halves of a LODES state file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LodesPart {
    /// Jobs with both workplace and residence in the state.
    Main,
    /// Jobs with the workplace in the state and the residence outside of it.
    Aux,
}

impl LodesPart {
    pub const ALL: [LodesPart; 2] = [LodesPart::Main, LodesPart::Aux];

    pub fn as_str(&self) -> &'static str {
        match self {
            LodesPart::Main => "main",
            LodesPart::Aux => "aux",
        }
    }

    /// `[st]_od_[part]_JT00_[year]` without extension.
    pub fn file_stem(&self, state: &str, year: u16) -> String {
        format!("{}_od_{}_JT00_{}", state.to_lowercase(), self.as_str(), year)
    }

    pub fn table_name(&self) -> String {
        format!("state_od_{}_JT00", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_compute_parts() {
        assert_eq!(ComputePart::all().len(), 4);
        assert_eq!(ComputePart::Connectivity.to_string(), "connectivity");
        assert_eq!(
            ComputePart::from_str("stress", true).unwrap(),
            ComputePart::Stress
        );
    }

    #[test]
    fn test_lodes_names() {
        assert_eq!(LodesPart::Main.file_stem("NM", 2022), "nm_od_main_JT00_2022");
        assert_eq!(LodesPart::Aux.table_name(), "state_od_aux_JT00");
    }
}
