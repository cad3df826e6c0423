use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Company {
    pub cik: String,
    pub ticker: String,
    pub name: String,
    pub sic_code: Option<u32>,
    pub sector: String,
    pub active: bool,
}

/// SIC division boundaries are fixed by the classification standard, so the
/// mapping is a static table rather than reference data.
pub fn sector_for_sic(sic: u32) -> &'static str {
    match sic {
        100..=999 => "Agriculture, Forestry & Fishing",
        1000..=1499 => "Mining",
        1500..=1799 => "Construction",
        2000..=3999 => "Manufacturing",
        4000..=4999 => "Transportation & Utilities",
        5000..=5199 => "Wholesale Trade",
        5200..=5999 => "Retail Trade",
        6000..=6799 => "Finance, Insurance & Real Estate",
        7000..=8999 => "Services",
        9100..=9729 => "Public Administration",
        _ => "Unclassified",
    }
}
