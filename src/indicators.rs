use polars::prelude::*;

use crate::error::Result;
use crate::schema::{aggregate, level, record, unit_value};

/// Combined trade volume above this multiple of production marks a row as
/// an implausible ratio; flagged in the output, never a failure.
pub const TRADE_RATIO_LIMIT: f64 = 1000.0;

/// The main circularity-indicator table: apparent consumption plus
/// data-quality flags on top of the merged production/trade rows.
pub fn build_indicators(prodtrade: DataFrame) -> Result<DataFrame> {
    let out = prodtrade
        .lazy()
        .with_columns([
            (col(record::PROD_QTY) + col(record::IMP_QTY) - col(record::EXP_QTY))
                .alias(record::AC_QTY),
            (col(record::PROD_VAL) + col(record::IMP_VAL) - col(record::EXP_VAL))
                .alias(record::AC_VAL),
        ])
        .with_columns([
            col(record::AC_QTY)
                .lt(lit(0.0))
                .or(col(record::AC_VAL).lt(lit(0.0)))
                .alias(record::FLAG_NEGATIVE_AC),
            col(record::PROD_QTY)
                .gt(lit(0.0))
                .and(
                    ((col(record::IMP_QTY) + col(record::EXP_QTY)) / col(record::PROD_QTY))
                        .gt(lit(TRADE_RATIO_LIMIT)),
                )
                .alias(record::FLAG_TRADE_RATIO),
        ])
        .collect()?;
    Ok(out)
}

/// Per-row unit values. Ratios are null when the quantity is zero; a ratio
/// is never coalesced to zero.
pub fn unit_values(indicators: &DataFrame) -> Result<DataFrame> {
    let ratio = |val: &'static str, qty: &'static str, alias_name: &'static str| {
        when(col(qty).gt(lit(0.0)))
            .then(col(val) / col(qty))
            .otherwise(lit(NULL))
            .alias(alias_name)
    };
    let out = indicators
        .clone()
        .lazy()
        .select([
            col(record::PRODUCT_KEY),
            col(record::PRODUCT_CODE),
            col(record::GEO),
            col(record::LEVEL),
            col(record::YEAR),
            ratio(record::PROD_VAL, record::PROD_QTY, unit_value::PROD),
            ratio(record::IMP_VAL, record::IMP_QTY, unit_value::IMP),
            ratio(record::EXP_VAL, record::EXP_QTY, unit_value::EXP),
        ])
        .collect()?;
    Ok(out)
}

fn measure_sums() -> Vec<Expr> {
    [
        record::PROD_QTY,
        record::PROD_VAL,
        record::IMP_QTY,
        record::IMP_VAL,
        record::EXP_QTY,
        record::EXP_VAL,
        record::AC_QTY,
        record::AC_VAL,
    ]
    .iter()
    .map(|c| col(*c).sum().alias(*c))
    .collect()
}

/// Country-level aggregate: totals across products per geography.
pub fn geo_aggregate(indicators: &DataFrame) -> Result<DataFrame> {
    let mut aggs = measure_sums();
    aggs.push(len().alias(aggregate::N_PRODUCTS));
    let out = indicators
        .clone()
        .lazy()
        .group_by([col(record::GEO), col(record::LEVEL), col(record::YEAR)])
        .agg(aggs)
        .sort([record::GEO], Default::default())
        .collect()?;
    Ok(out)
}

/// Product-level aggregate: totals across geographies per industrial code.
/// EU-aggregate rows are excluded; they already contain the country rows.
pub fn product_aggregate(indicators: &DataFrame) -> Result<DataFrame> {
    let mut aggs = measure_sums();
    aggs.push(len().alias(aggregate::N_GEOS));
    let out = indicators
        .clone()
        .lazy()
        .filter(col(record::LEVEL).eq(lit(level::COUNTRY)))
        .group_by([
            col(record::PRODUCT_KEY),
            col(record::PRODUCT_CODE),
            col(record::YEAR),
        ])
        .agg(aggs)
        .sort([record::PRODUCT_KEY, record::PRODUCT_CODE], Default::default())
        .collect()?;
    Ok(out)
}
