//! Pressure stall information observer (`/proc/pressure/memory`).
//!
//! Format: "some avg10=0.00 avg60=0.00 avg300=0.00 total=123456789"

use std::sync::Arc;
use tracing::{debug, warn};

use super::{MetricSet, ObserverError};
use crate::reader::Reader;
use crate::tracker::MetricValue;

pub const PSI_MEMORY_PATH: &str = "/proc/pressure/memory";

pub const SOME_AVG_KEY: &str = "psi_some";
pub const FULL_AVG_KEY: &str = "psi_full";

/// Extracts `key` from a line of `key=value` tokens.
///
/// Returns NaN when the key is absent or its value is not a number.
pub fn parse_psi_value(text: &str, key: &str) -> f64 {
    for token in text.split_whitespace() {
        let Some((name, value)) = token.split_once('=') else {
            continue;
        };
        if name != key {
            continue;
        }
        return match value.parse::<f64>() {
            Ok(v) => v,
            Err(e) => {
                warn!("Failed to parse PSI value '{}' for '{}': {}", value, key, e);
                f64::NAN
            }
        };
    }
    f64::NAN
}

pub struct PsiObserver {
    reader: Arc<dyn Reader>,
    avg_metric: String,
    warned: bool,
}

impl PsiObserver {
    pub fn new(reader: Arc<dyn Reader>, avg_metric: &str) -> Self {
        Self {
            reader,
            avg_metric: avg_metric.to_string(),
            warned: false,
        }
    }

    pub fn observe(&mut self) -> Result<MetricSet, ObserverError> {
        let lines = self
            .reader
            .read_text(PSI_MEMORY_PATH, "some")
            .and_then(|some| Ok((some, self.reader.read_text(PSI_MEMORY_PATH, "full")?)));

        let (some, full) = match lines {
            Ok(lines) => lines,
            Err(e) => {
                if !self.warned {
                    warn!("PSI unavailable, psi_some/psi_full will not be reported: {}", e);
                    self.warned = true;
                } else {
                    debug!("PSI read failed: {}", e);
                }
                return Err(e.into());
            }
        };

        let mut result = MetricSet::new();
        result.insert(
            SOME_AVG_KEY.to_string(),
            MetricValue::Float(parse_psi_value(&some, &self.avg_metric)),
        );
        result.insert(
            FULL_AVG_KEY.to_string(),
            MetricValue::Float(parse_psi_value(&full, &self.avg_metric)),
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOME_LINE: &str = "avg10=0.00 avg60=0.00 avg300=0.00 total=0";

    #[test]
    fn test_parse_avg10() {
        assert_eq!(parse_psi_value(SOME_LINE, "avg10"), 0.0);
    }

    #[test]
    fn test_parse_with_leading_kind() {
        let line = "some avg10=1.25 avg60=3.50 avg300=0.10 total=987";
        assert_eq!(parse_psi_value(line, "avg60"), 3.5);
        assert_eq!(parse_psi_value(line, "total"), 987.0);
    }

    #[test]
    fn test_absent_key_is_nan() {
        assert!(parse_psi_value(SOME_LINE, "avg120").is_nan());
    }

    #[test]
    fn test_malformed_value_is_nan() {
        assert!(parse_psi_value("avg10=abc avg60=1.00", "avg10").is_nan());
    }
}
