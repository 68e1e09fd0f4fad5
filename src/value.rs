use polars::prelude::*;
use tracing::warn;

use crate::error::Result;

/// Tagged outcome of coercing one raw text cell to a number.
///
/// Upstream extracts deliver every value as text; `:` and the empty string
/// are the conventional missing markers, decimal commas occur in some
/// national files. Everything downstream consumes this one type instead of
/// re-deciding per column what a non-number means.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawValue {
    Number(f64),
    Missing,
    Unparseable,
}

impl RawValue {
    pub fn parse(raw: Option<&str>) -> Self {
        let Some(s) = raw else {
            return RawValue::Missing;
        };
        let s = s.trim();
        if s.is_empty() || s == ":" {
            return RawValue::Missing;
        }
        // Tolerate grouping spaces and a decimal comma, but only when no
        // decimal point is present ("1 234,5" yes, "1,234.5" no).
        let compact: String = s.chars().filter(|c| *c != ' ').collect();
        let normalized = if compact.contains(',') && !compact.contains('.') {
            compact.replace(',', ".")
        } else {
            compact
        };
        match normalized.parse::<f64>() {
            Ok(v) => RawValue::Number(v),
            Err(_) => RawValue::Unparseable,
        }
    }

    pub fn as_f64(self) -> Option<f64> {
        match self {
            RawValue::Number(v) => Some(v),
            _ => None,
        }
    }
}

/// Coerce a string column into a new Float64 column named `alias`.
///
/// Missing and unparseable cells both become null so that sums and means
/// stay total-preserving; unparseable cells are additionally counted and
/// reported, since they indicate a malformed extract rather than a gap.
pub fn coerce_numeric(df: DataFrame, column: &str, alias: &str, context: &str) -> Result<DataFrame> {
    let raw = df.column(column)?.str()?.clone();

    let mut values: Vec<Option<f64>> = Vec::with_capacity(raw.len());
    let mut unparseable = 0usize;
    for cell in raw.into_iter() {
        match RawValue::parse(cell) {
            RawValue::Number(v) => values.push(Some(v)),
            RawValue::Missing => values.push(None),
            RawValue::Unparseable => {
                unparseable += 1;
                values.push(None);
            }
        }
    }

    if unparseable > 0 {
        warn!(context, column, count = unparseable, "unparseable numeric values treated as missing");
    }

    let mut df = df;
    df.with_column(Column::new(alias.into(), values))?;
    Ok(df)
}
