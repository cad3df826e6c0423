use crate::metrics::MetricRecord;

#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub yoy_change: Option<f64>,
}

/// Fixed per-metric threshold table. `min`/`max` bound the value in the
/// metric's own unit; `yoy_change` bounds the magnitude of the
/// year-over-year percent change. Metrics without an entry are never
/// flagged. The table is code, not runtime config, so flags stay
/// reproducible across runs.
pub fn thresholds_for(name: &str) -> Option<Thresholds> {
    let entry = match name {
        "gross_margin" => (Some(0.0), Some(80.0), Some(10.0)),
        "operating_margin" => (Some(-20.0), Some(50.0), Some(15.0)),
        "net_margin" => (Some(-30.0), Some(40.0), Some(20.0)),
        "roe" => (Some(-50.0), Some(50.0), Some(25.0)),
        "debt_to_equity" => (Some(0.0), Some(5.0), Some(50.0)),
        "current_ratio" => (Some(0.5), Some(5.0), Some(50.0)),
        "interest_coverage" => (Some(0.0), Some(50.0), Some(100.0)),
        "revenue" => (Some(0.0), None, Some(50.0)),
        "net_income" => (None, None, Some(50.0)),
        "total_assets" => (Some(0.0), None, Some(40.0)),
        _ => return None,
    };
    Some(Thresholds {
        min: entry.0,
        max: entry.1,
        yoy_change: entry.2,
    })
}

/// A value strictly outside its sanity range, or a YoY change whose
/// magnitude strictly exceeds the class threshold, is anomalous. The
/// boundary is exclusive: a change exactly at the threshold is normal. A
/// missing YoY change never contributes a flag.
pub fn is_anomalous(name: &str, value: f64, yoy_change: Option<f64>) -> bool {
    let Some(thresholds) = thresholds_for(name) else {
        return false;
    };
    if let Some(min) = thresholds.min {
        if value < min {
            return true;
        }
    }
    if let Some(max) = thresholds.max {
        if value > max {
            return true;
        }
    }
    if let (Some(change), Some(limit)) = (yoy_change, thresholds.yoy_change) {
        if change.abs() > limit {
            return true;
        }
    }
    false
}

pub fn flag_anomalies(records: &mut [MetricRecord]) {
    for record in records.iter_mut() {
        record.is_anomaly = is_anomalous(&record.name, record.value, record.yoy_change);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_history_never_flags() {
        assert!(!is_anomalous("net_income", 20.0, None));
    }

    #[test]
    fn change_over_threshold_flags() {
        assert!(is_anomalous("net_income", 20.0, Some(100.0)));
        assert!(is_anomalous("net_income", 5.0, Some(-60.0)));
    }

    #[test]
    fn threshold_boundary_is_exclusive() {
        assert!(!is_anomalous("net_income", 20.0, Some(50.0)));
        assert!(is_anomalous("net_income", 20.0, Some(50.01)));
        assert!(!is_anomalous("net_income", 20.0, Some(-50.0)));
        assert!(is_anomalous("net_income", 20.0, Some(-50.01)));
    }

    #[test]
    fn sanity_range_catches_extraction_errors() {
        assert!(is_anomalous("total_assets", -10.0, None));
        assert!(is_anomalous("gross_margin", 95.0, None));
        assert!(!is_anomalous("gross_margin", 55.0, None));
    }

    #[test]
    fn uncatalogued_metric_is_never_flagged() {
        assert!(!is_anomalous("eps", 1_000_000.0, Some(900.0)));
    }
}
