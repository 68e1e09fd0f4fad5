use polars::prelude::*;

use crate::error::Result;
use crate::value::RawValue;

/// Factor applied to trade quantities reported in kilograms.
pub const KG_TO_TONNES: f64 = 1e-3;

/// Columns of the frame returned by [`conversion_frame`].
pub const UNIT_CODE: &str = "unit_code";
pub const FACTOR: &str = "to_tonnes";

/// One entry of the static unit table.
///
/// `factor` is the multiplier to tonnes; `None` marks count-based units
/// (pieces, pairs, metres, ...) that carry no mass information of their own.
pub struct UnitDef {
    pub code: &'static str,
    pub factor: Option<f64>,
    pub short: &'static str,
    pub description: &'static str,
}

pub const UNITS: [UnitDef; 13] = [
    UnitDef { code: "g", factor: Some(1e-6), short: "g", description: "gram" },
    UnitDef { code: "kg", factor: Some(1e-3), short: "kg", description: "kilogram" },
    UnitDef { code: "t", factor: Some(1.0), short: "t", description: "tonne" },
    UnitDef { code: "kt", factor: Some(1e3), short: "kt", description: "thousand tonnes" },
    UnitDef { code: "p/st", factor: None, short: "p/st", description: "number of items" },
    UnitDef { code: "pa", factor: None, short: "pa", description: "number of pairs" },
    UnitDef { code: "m", factor: None, short: "m", description: "metre" },
    UnitDef { code: "m2", factor: None, short: "m2", description: "square metre" },
    UnitDef { code: "m3", factor: None, short: "m3", description: "cubic metre" },
    UnitDef { code: "l", factor: None, short: "l", description: "litre" },
    UnitDef { code: "kwh", factor: None, short: "kWh", description: "kilowatt hour" },
    UnitDef { code: "ce/el", factor: None, short: "ce/el", description: "number of cells or elements" },
    UnitDef { code: "c/k", factor: None, short: "c/k", description: "carats" },
];

/// Common abbreviations seen in extracts, mapped to canonical codes.
pub const ALIASES: [(&str, &str); 9] = [
    ("kgm", "kg"),
    ("tne", "t"),
    ("ton", "t"),
    ("tonnes", "t"),
    ("1000t", "kt"),
    ("pce", "p/st"),
    ("nr", "p/st"),
    ("mtr", "m"),
    ("ltr", "l"),
];

/// Outcome of a unit conversion.
///
/// `NotConvertible` is an explicit marker, never a silent zero: count-based
/// units only become mass through the per-product piece-weight override,
/// which the pipeline applies, not this module.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Conversion {
    Tonnes(f64),
    NotConvertible,
    Missing,
    Unparseable,
}

/// Trim, lowercase and de-alias a reported unit code.
pub fn canonical(code: &str) -> String {
    let lowered = code.trim().to_lowercase();
    for (alias, target) in ALIASES {
        if alias == lowered {
            return target.to_string();
        }
    }
    lowered
}

pub fn lookup(code: &str) -> Option<&'static UnitDef> {
    let canon = canonical(code);
    UNITS.iter().find(|u| u.code == canon)
}

/// Convert a reported value to tonnes.
///
/// Missing and unparseable values pass through unchanged; unknown unit
/// codes behave like count-based units.
pub fn convert(value: RawValue, unit_code: &str) -> Conversion {
    match value {
        RawValue::Missing => Conversion::Missing,
        RawValue::Unparseable => Conversion::Unparseable,
        RawValue::Number(v) => match lookup(unit_code).and_then(|u| u.factor) {
            Some(factor) => Conversion::Tonnes(v * factor),
            None => Conversion::NotConvertible,
        },
    }
}

/// The unit table as a (unit_code, to_tonnes) frame for declarative joins.
///
/// Alias codes are materialized as their own rows so a single join after
/// trim/lowercase resolves them; count-based units carry a null factor.
pub fn conversion_frame() -> Result<DataFrame> {
    let mut codes: Vec<&str> = Vec::new();
    let mut factors: Vec<Option<f64>> = Vec::new();

    for unit in &UNITS {
        codes.push(unit.code);
        factors.push(unit.factor);
    }
    for (alias, target) in ALIASES {
        let def = UNITS.iter().find(|u| u.code == target);
        codes.push(alias);
        factors.push(def.and_then(|u| u.factor));
    }

    Ok(DataFrame::new(vec![
        Column::new(UNIT_CODE.into(), codes),
        Column::new(FACTOR.into(), factors),
    ])?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn convertible_units_apply_their_factor() {
        for v in [0.0, 1.0, 2.5, 1e6] {
            assert_eq!(convert(RawValue::Number(v), "kg"), Conversion::Tonnes(v * 1e-3));
            assert_eq!(convert(RawValue::Number(v), "t"), Conversion::Tonnes(v));
            assert_eq!(convert(RawValue::Number(v), "kt"), Conversion::Tonnes(v * 1e3));
        }
    }

    #[test]
    fn count_based_units_are_not_convertible_for_every_value() {
        for v in [0.0, 1.0, -3.0, 1e9] {
            assert_eq!(convert(RawValue::Number(v), "p/st"), Conversion::NotConvertible);
            assert_eq!(convert(RawValue::Number(v), "kWh"), Conversion::NotConvertible);
        }
    }

    #[test]
    fn aliases_resolve_before_lookup() {
        assert_eq!(convert(RawValue::Number(500.0), "KGM"), Conversion::Tonnes(0.5));
        assert_eq!(convert(RawValue::Number(2.0), " TNE "), Conversion::Tonnes(2.0));
        assert_eq!(convert(RawValue::Number(7.0), "NR"), Conversion::NotConvertible);
    }

    #[test]
    fn missing_and_unparseable_pass_through() {
        assert_eq!(convert(RawValue::Missing, "kg"), Conversion::Missing);
        assert_eq!(convert(RawValue::Unparseable, "kg"), Conversion::Unparseable);
    }

    #[test]
    fn unknown_codes_are_not_convertible() {
        assert_eq!(convert(RawValue::Number(1.0), "bogus"), Conversion::NotConvertible);
    }

    #[test]
    fn conversion_frame_includes_aliases() {
        let df = conversion_frame().unwrap();
        assert_eq!(df.height(), UNITS.len() + ALIASES.len());
        let codes = df.column(UNIT_CODE).unwrap().str().unwrap();
        assert!(codes.into_iter().flatten().any(|c| c == "kgm"));
    }
}
