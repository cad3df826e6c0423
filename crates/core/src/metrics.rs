use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::filing::FilingType;

/// Raw line items the extractor may report, in millions USD except `eps`.
pub const RAW_METRICS: &[&str] = &[
    "revenue",
    "gross_profit",
    "operating_income",
    "net_income",
    "total_assets",
    "total_liabilities",
    "shareholders_equity",
    "total_debt",
    "current_assets",
    "current_liabilities",
    "inventory",
    "ebit",
    "depreciation",
    "interest_expense",
    "eps",
];

pub fn is_raw_metric(name: &str) -> bool {
    RAW_METRICS.contains(&name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricUnit {
    MillionsUsd,
    Percent,
    Ratio,
    PerShare,
}

impl MetricUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricUnit::MillionsUsd => "millions_usd",
            MetricUnit::Percent => "percent",
            MetricUnit::Ratio => "ratio",
            MetricUnit::PerShare => "per_share",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "millions_usd" => Some(MetricUnit::MillionsUsd),
            "percent" => Some(MetricUnit::Percent),
            "ratio" => Some(MetricUnit::Ratio),
            "per_share" => Some(MetricUnit::PerShare),
            _ => None,
        }
    }
}

pub fn raw_metric_unit(name: &str) -> MetricUnit {
    if name == "eps" {
        MetricUnit::PerShare
    } else {
        MetricUnit::MillionsUsd
    }
}

pub struct DerivedMetric {
    pub name: &'static str,
    pub unit: MetricUnit,
    pub compute: fn(&HashMap<String, f64>) -> Option<f64>,
}

/// Ratio catalogue. Each formula returns `None` when an input is missing or
/// a denominator is zero; derivation is skipped rather than zero-filled.
pub const DERIVED_METRICS: &[DerivedMetric] = &[
    DerivedMetric {
        name: "gross_margin",
        unit: MetricUnit::Percent,
        compute: |m| Some(ratio(m, "gross_profit", "revenue")? * 100.0),
    },
    DerivedMetric {
        name: "operating_margin",
        unit: MetricUnit::Percent,
        compute: |m| Some(ratio(m, "operating_income", "revenue")? * 100.0),
    },
    DerivedMetric {
        name: "net_margin",
        unit: MetricUnit::Percent,
        compute: |m| Some(ratio(m, "net_income", "revenue")? * 100.0),
    },
    DerivedMetric {
        name: "roe",
        unit: MetricUnit::Percent,
        compute: |m| Some(ratio(m, "net_income", "shareholders_equity")? * 100.0),
    },
    DerivedMetric {
        name: "roa",
        unit: MetricUnit::Percent,
        compute: |m| Some(ratio(m, "net_income", "total_assets")? * 100.0),
    },
    DerivedMetric {
        name: "debt_to_equity",
        unit: MetricUnit::Ratio,
        compute: |m| ratio(m, "total_debt", "shareholders_equity"),
    },
    DerivedMetric {
        name: "current_ratio",
        unit: MetricUnit::Ratio,
        compute: |m| ratio(m, "current_assets", "current_liabilities"),
    },
    DerivedMetric {
        name: "quick_ratio",
        unit: MetricUnit::Ratio,
        compute: |m| {
            let assets = m.get("current_assets")?;
            let inventory = m.get("inventory").copied().unwrap_or(0.0);
            let liabilities = m.get("current_liabilities")?;
            if *liabilities == 0.0 {
                return None;
            }
            Some((assets - inventory) / liabilities)
        },
    },
    DerivedMetric {
        name: "interest_coverage",
        unit: MetricUnit::Ratio,
        compute: |m| ratio(m, "ebit", "interest_expense"),
    },
    DerivedMetric {
        name: "debt_to_ebitda",
        unit: MetricUnit::Ratio,
        compute: |m| {
            let debt = m.get("total_debt")?;
            let ebitda = m.get("ebit")? + m.get("depreciation").copied().unwrap_or(0.0);
            if ebitda == 0.0 {
                return None;
            }
            Some(debt / ebitda)
        },
    },
];

pub fn is_catalogue_metric(name: &str) -> bool {
    is_raw_metric(name) || DERIVED_METRICS.iter().any(|d| d.name == name)
}

fn ratio(m: &HashMap<String, f64>, numerator: &str, denominator: &str) -> Option<f64> {
    let num = m.get(numerator)?;
    let den = m.get(denominator)?;
    if *den == 0.0 {
        return None;
    }
    Some(num / den)
}

pub fn compute_derived(raw: &HashMap<String, f64>) -> Vec<(&'static str, f64, MetricUnit)> {
    DERIVED_METRICS
        .iter()
        .filter_map(|metric| {
            (metric.compute)(raw).map(|value| (metric.name, round2(value), metric.unit))
        })
        .collect()
}

/// Percent change against the prior period; `None` when the prior value is
/// missing or zero so a first observation never reports a change.
pub fn yoy_change(current: f64, prior: Option<f64>) -> Option<f64> {
    let prior = prior?;
    if prior == 0.0 {
        return None;
    }
    Some(round2((current - prior) / prior * 100.0))
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricRecord {
    pub metric_id: String,
    pub cik: String,
    pub ticker: String,
    pub filing_type: FilingType,
    pub period_end: NaiveDate,
    pub name: String,
    pub value: f64,
    pub unit: MetricUnit,
    pub yoy_change: Option<f64>,
    pub is_anomaly: bool,
    #[serde(default)]
    pub meta: Value,
}

impl MetricRecord {
    pub fn natural_id(cik: &str, period_end: NaiveDate, name: &str) -> String {
        format!("{cik}_{period_end}_{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), *value))
            .collect()
    }

    #[test]
    fn derives_margins_from_line_items() {
        let metrics = raw(&[("revenue", 100.0), ("net_income", 20.0), ("gross_profit", 60.0)]);
        let derived = compute_derived(&metrics);
        let net = derived.iter().find(|(n, _, _)| *n == "net_margin").unwrap();
        assert_eq!(net.1, 20.0);
        assert_eq!(net.2, MetricUnit::Percent);
        let gross = derived.iter().find(|(n, _, _)| *n == "gross_margin").unwrap();
        assert_eq!(gross.1, 60.0);
    }

    #[test]
    fn missing_inputs_skip_derivation() {
        let metrics = raw(&[("net_income", 20.0)]);
        let derived = compute_derived(&metrics);
        assert!(derived.iter().all(|(n, _, _)| *n != "net_margin"));
        assert!(derived.iter().all(|(n, _, _)| *n != "roe"));
    }

    #[test]
    fn zero_denominator_skips_derivation() {
        let metrics = raw(&[("net_income", 20.0), ("revenue", 0.0)]);
        assert!(compute_derived(&metrics)
            .iter()
            .all(|(n, _, _)| *n != "net_margin"));
    }

    #[test]
    fn quick_ratio_treats_missing_inventory_as_zero() {
        let metrics = raw(&[("current_assets", 50.0), ("current_liabilities", 25.0)]);
        let derived = compute_derived(&metrics);
        let quick = derived.iter().find(|(n, _, _)| *n == "quick_ratio").unwrap();
        assert_eq!(quick.1, 2.0);
    }

    #[test]
    fn yoy_change_needs_prior_value() {
        assert_eq!(yoy_change(20.0, Some(10.0)), Some(100.0));
        assert_eq!(yoy_change(20.0, Some(0.0)), None);
        assert_eq!(yoy_change(20.0, None), None);
    }

    #[test]
    fn catalogue_membership_is_closed() {
        assert!(is_catalogue_metric("revenue"));
        assert!(is_catalogue_metric("net_margin"));
        assert!(!is_catalogue_metric("vibes_index"));
    }
}
