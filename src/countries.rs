use polars::prelude::*;
use tracing::warn;

use crate::error::Result;
use crate::schema::level;

/// Canonical key of the EU-wide aggregate in every output table.
pub const EU_AGGREGATE: &str = "EU27";

/// Columns of the frame returned by [`mapping_frame`].
pub const SOURCE_CODE: &str = "source_code";
pub const ISO_CODE: &str = "iso_code";

/// The two code systems the pipeline receives geography in.
///
/// The production source reports zero-padded numeric codes; the trade
/// source already uses the canonical ISO space, so only aggregate
/// pseudo-codes are rewritten there.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SourceSystem {
    ProductionNumeric,
    TradeIso,
}

const NUMERIC_TO_ISO: [(&str, &str); 28] = [
    ("001", "FR"),
    ("003", "NL"),
    ("004", "DE"),
    ("005", "IT"),
    ("006", "GB"),
    ("007", "IE"),
    ("008", "DK"),
    ("009", "GR"),
    ("010", "PT"),
    ("011", "ES"),
    ("017", "BE"),
    ("018", "LU"),
    ("030", "SE"),
    ("032", "FI"),
    ("038", "AT"),
    ("046", "MT"),
    ("053", "EE"),
    ("054", "LV"),
    ("055", "LT"),
    ("060", "PL"),
    ("061", "CZ"),
    ("063", "SK"),
    ("064", "HU"),
    ("066", "RO"),
    ("068", "BG"),
    ("091", "SI"),
    ("092", "HR"),
    ("600", "CY"),
];

/// Aggregate pseudo-codes used by the numeric system.
const NUMERIC_AGGREGATES: [(&str, &str); 2] = [("2027", EU_AGGREGATE), ("2028", EU_AGGREGATE)];

/// Aggregate pseudo-codes used by the ISO system.
const ISO_AGGREGATES: [(&str, &str); 3] = [
    ("EU27_2020", EU_AGGREGATE),
    ("EU28", EU_AGGREGATE),
    ("EU27", EU_AGGREGATE),
];

/// Map one geography code to its canonical ISO form.
///
/// Unresolved codes are returned unchanged with a warning; harmonization
/// never drops a record.
pub fn harmonize(code: &str, system: SourceSystem) -> String {
    let code = code.trim();
    match system {
        SourceSystem::ProductionNumeric => {
            if let Some((_, iso)) = NUMERIC_TO_ISO.iter().find(|(num, _)| *num == code) {
                return (*iso).to_string();
            }
            if let Some((_, iso)) = NUMERIC_AGGREGATES.iter().find(|(num, _)| *num == code) {
                return (*iso).to_string();
            }
            warn!(code, "unmapped production country code passed through");
            code.to_string()
        }
        SourceSystem::TradeIso => {
            if let Some((_, iso)) = ISO_AGGREGATES.iter().find(|(raw, _)| *raw == code) {
                return (*iso).to_string();
            }
            code.to_string()
        }
    }
}

pub fn is_aggregate(geo: &str) -> bool {
    geo == EU_AGGREGATE
}

pub fn level_of(geo: &str) -> &'static str {
    if is_aggregate(geo) {
        level::EU
    } else {
        level::COUNTRY
    }
}

/// The mapping as a (source_code, iso_code) frame for declarative joins.
///
/// For the numeric system this is the forward map plus aggregates; for the
/// ISO system only the aggregate rewrites. Join left, then coalesce with
/// the original code so unmapped values survive.
pub fn mapping_frame(system: SourceSystem) -> Result<DataFrame> {
    let mut source: Vec<&str> = Vec::new();
    let mut iso: Vec<&str> = Vec::new();

    match system {
        SourceSystem::ProductionNumeric => {
            for (num, code) in NUMERIC_TO_ISO.iter().chain(NUMERIC_AGGREGATES.iter()) {
                source.push(num);
                iso.push(code);
            }
        }
        SourceSystem::TradeIso => {
            for (raw, code) in ISO_AGGREGATES.iter() {
                source.push(raw);
                iso.push(code);
            }
        }
    }

    Ok(DataFrame::new(vec![
        Column::new(SOURCE_CODE.into(), source),
        Column::new(ISO_CODE.into(), iso),
    ])?)
}

/// Expression building the `level` column from a geo column.
pub fn level_expr(geo_column: &str) -> Expr {
    when(col(geo_column).eq(lit(EU_AGGREGATE)))
        .then(lit(level::EU))
        .otherwise(lit(level::COUNTRY))
}
