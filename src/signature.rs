//! Canonical deduplication keys for evaluated readings.

use crate::models::{AlertType, Parameter};

/// Round to two decimals so sub-hundredth sensor noise maps onto one key.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Build the dedup signature `parameter|type|title|value`.
///
/// The parameter is lower-cased and the value rounded to two decimals.
pub fn signature(parameter: Parameter, alert_type: AlertType, title: &str, value: f64) -> String {
    // ---
    format!(
        "{}|{}|{}|{:.2}",
        parameter.as_str().to_lowercase(),
        alert_type.as_str(),
        title,
        round2(value)
    )
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_noise_below_hundredth_shares_signature() {
        // ---
        let a = signature(Parameter::Ph, AlertType::Error, "pH critically high", 9.2001);
        let b = signature(Parameter::Ph, AlertType::Error, "pH critically high", 9.1999);
        assert_eq!(a, b);
        assert_eq!(a, "ph|error|pH critically high|9.20");
    }

    #[test]
    fn test_distinct_inputs_distinct_signatures() {
        // ---
        let base = signature(Parameter::Ph, AlertType::Warning, "pH high", 8.7);
        assert_ne!(base, signature(Parameter::Ph, AlertType::Warning, "pH high", 8.71));
        assert_ne!(base, signature(Parameter::Ph, AlertType::Error, "pH high", 8.7));
        assert_ne!(base, signature(Parameter::Salinity, AlertType::Warning, "pH high", 8.7));
    }
}
