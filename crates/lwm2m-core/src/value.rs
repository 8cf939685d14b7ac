//! Resource values and their text rendering

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FormatError {
    #[error("Non-finite float value: {0}")]
    NonFinite(f64),
}

/// A single resource value held by an instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResourceValue {
    Integer(i64),
    Float(f64),
    Boolean(bool),
    String(String),
    Time(DateTime<Utc>),
    /// Short ordered list of scalars (multi-instance resource)
    List(Vec<ResourceValue>),
}

impl ResourceValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// Render the value as the text payload of a read response
    ///
    /// Numbers use their canonical decimal form (whole floats keep a `.0`),
    /// strings are verbatim, timestamps are RFC 3339 and lists are
    /// comma-separated renderings of their elements.
    pub fn to_payload(&self) -> Result<String, FormatError> {
        match self {
            Self::Integer(v) => Ok(v.to_string()),
            Self::Float(v) => format_float(*v),
            Self::Boolean(v) => Ok(v.to_string()),
            Self::String(s) => Ok(s.clone()),
            Self::Time(t) => Ok(t.to_rfc3339_opts(SecondsFormat::Micros, true)),
            Self::List(items) => {
                let rendered = items
                    .iter()
                    .map(|item| item.to_payload())
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rendered.join(","))
            }
        }
    }
}

fn format_float(v: f64) -> Result<String, FormatError> {
    if !v.is_finite() {
        return Err(FormatError::NonFinite(v));
    }
    if v.fract() == 0.0 && v.abs() < 1e16 {
        Ok(format!("{:.1}", v))
    } else {
        Ok(v.to_string())
    }
}

impl From<i64> for ResourceValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<f64> for ResourceValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for ResourceValue {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<&str> for ResourceValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for ResourceValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<DateTime<Utc>> for ResourceValue {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Time(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_number_rendering() {
        assert_eq!(ResourceValue::Integer(-45).to_payload().unwrap(), "-45");
        assert_eq!(ResourceValue::Float(22.5).to_payload().unwrap(), "22.5");
        assert_eq!(ResourceValue::Float(99.0).to_payload().unwrap(), "99.0");
        assert_eq!(ResourceValue::Float(40.416812).to_payload().unwrap(), "40.416812");
    }

    #[test]
    fn test_time_rendering() {
        let t = Utc.with_ymd_and_hms(2026, 1, 10, 12, 0, 0).unwrap();
        assert_eq!(
            ResourceValue::Time(t).to_payload().unwrap(),
            "2026-01-10T12:00:00.000000Z"
        );
    }

    #[test]
    fn test_list_rendering() {
        let list = ResourceValue::List(vec![
            ResourceValue::Integer(50),
            ResourceValue::Integer(75),
            ResourceValue::Integer(90),
        ]);
        assert_eq!(list.to_payload().unwrap(), "50,75,90");
    }

    #[test]
    fn test_non_finite_is_a_format_error() {
        assert!(ResourceValue::Float(f64::NAN).to_payload().is_err());
        let list = ResourceValue::List(vec![ResourceValue::Float(f64::INFINITY)]);
        assert!(list.to_payload().is_err());
    }
}
