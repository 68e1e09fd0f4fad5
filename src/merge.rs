use std::collections::BTreeSet;

use polars::prelude::*;
use tracing::{debug, warn};

use crate::catalog::{self, ProductCatalog};
use crate::countries::{self, SourceSystem};
use crate::error::Result;
use crate::schema::{
    production, production_indicator, record, trade, trade_flow, trade_indicator,
};
use crate::store::require_columns;
use crate::units;
use crate::value;

const VALUE_NUM: &str = "value_num";
const UNIT_RAW: &str = "unit_raw";
const UNIT_CANON: &str = "unit_canon";
const PROD_QTY_RAW: &str = "prod_qty_raw";
const SEC_IMP_QTY_RAW: &str = "sec_imp_qty_raw";
const SEC_EXP_QTY_RAW: &str = "sec_exp_qty_raw";
const IMP_KG: &str = "imp_kg";
const EXP_KG: &str = "exp_kg";

/// Harmonize one year of raw production data into record rows.
///
/// Pivots the long indicator layout, coerces text values, converts reported
/// quantities to tonnes (with the per-product piece-weight override for
/// count-based units), maps numeric country codes to ISO, and restricts to
/// the industrial codes of the year's active epochs. The embedded secondary
/// trade figures ride along in `sec_*` columns for the fallback stage.
pub fn harmonize_production(
    raw: DataFrame,
    catalog: &ProductCatalog,
    year: i32,
) -> Result<DataFrame> {
    require_columns(
        &raw,
        &[
            production::PRODUCT_CODE,
            production::COUNTRY_CODE,
            production::INDICATOR,
            production::VALUE,
        ],
    )?;
    if raw.height() == 0 {
        return empty_production_harmonized();
    }

    warn_duplicate_indicator_rows(&raw)?;

    let code_frame = catalog.production_code_frame(year)?;
    debug_inactive_codes(&raw, &code_frame)?;

    // Numeric indicators and the unit label live in the same text column;
    // split before coercion so unit codes are not counted as unparseable.
    let numeric = value::coerce_numeric(
        raw.clone()
            .lazy()
            .filter(col(production::INDICATOR).neq(lit(production_indicator::UNIT)))
            .collect()?,
        production::VALUE,
        VALUE_NUM,
        "production",
    )?;

    let pivot = |kind: &'static str, alias_name: &'static str| {
        col(VALUE_NUM)
            .filter(col(production::INDICATOR).eq(lit(kind)))
            .first()
            .alias(alias_name)
    };

    let measures = numeric
        .lazy()
        .group_by([col(production::PRODUCT_CODE), col(production::COUNTRY_CODE)])
        .agg([
            pivot(production_indicator::PROD_QTY, PROD_QTY_RAW),
            pivot(production_indicator::PROD_VAL, record::PROD_VAL),
            pivot(production_indicator::IMP_QTY, SEC_IMP_QTY_RAW),
            pivot(production_indicator::IMP_VAL, record::SEC_IMP_VAL),
            pivot(production_indicator::EXP_QTY, SEC_EXP_QTY_RAW),
            pivot(production_indicator::EXP_VAL, record::SEC_EXP_VAL),
        ]);

    let unit_labels = raw
        .lazy()
        .filter(col(production::INDICATOR).eq(lit(production_indicator::UNIT)))
        .group_by([col(production::PRODUCT_CODE), col(production::COUNTRY_CODE)])
        .agg([col(production::VALUE).first().alias(UNIT_RAW)]);

    let keys = [col(production::PRODUCT_CODE), col(production::COUNTRY_CODE)];
    let with_context = measures
        .join(unit_labels, keys.clone(), keys.clone(), JoinArgs::new(JoinType::Left))
        // Epoch restriction: codes outside the year's active epochs yield
        // no rows, and the owning product key comes along.
        .join(
            code_frame.lazy(),
            [col(production::PRODUCT_CODE)],
            [col(catalog::PRODUCT_CODE)],
            JoinArgs::new(JoinType::Inner),
        )
        .with_column(
            col(UNIT_RAW)
                .str()
                .strip_chars(lit(" \t\r\n"))
                .str()
                .to_lowercase()
                .alias(UNIT_CANON),
        )
        .join(
            units::conversion_frame()?.lazy(),
            [col(UNIT_CANON)],
            [col(units::UNIT_CODE)],
            JoinArgs::new(JoinType::Left),
        )
        .join(
            catalog.piece_weight_frame()?.lazy(),
            [col(catalog::PRODUCT_KEY)],
            [col(catalog::PRODUCT_KEY)],
            JoinArgs::new(JoinType::Left),
        )
        .join(
            countries::mapping_frame(SourceSystem::ProductionNumeric)?.lazy(),
            [col(production::COUNTRY_CODE)],
            [col(countries::SOURCE_CODE)],
            JoinArgs::new(JoinType::Left),
        )
        .collect()?;

    warn_unmapped_countries(&with_context)?;
    warn_inconvertible_quantities(&with_context)?;

    let to_tonnes = |raw_col: &'static str, alias_name: &'static str| {
        when(col(units::FACTOR).is_not_null())
            .then(col(raw_col) * col(units::FACTOR))
            .when(col(catalog::PIECE_WEIGHT_T).is_not_null())
            .then(col(raw_col) * col(catalog::PIECE_WEIGHT_T))
            .otherwise(lit(NULL))
            .alias(alias_name)
    };

    let out = with_context
        .lazy()
        .with_columns([
            to_tonnes(PROD_QTY_RAW, record::PROD_QTY),
            to_tonnes(SEC_IMP_QTY_RAW, record::SEC_IMP_QTY),
            to_tonnes(SEC_EXP_QTY_RAW, record::SEC_EXP_QTY),
            when(col(countries::ISO_CODE).is_not_null())
                .then(col(countries::ISO_CODE))
                .otherwise(col(production::COUNTRY_CODE))
                .alias(record::GEO),
            lit(year).alias(record::YEAR),
        ])
        .with_column(countries::level_expr(record::GEO).alias(record::LEVEL))
        .select([
            col(record::PRODUCT_KEY),
            col(record::PRODUCT_CODE),
            col(record::GEO),
            col(record::LEVEL),
            col(record::YEAR),
            col(record::PROD_QTY),
            col(record::PROD_VAL),
            col(record::SEC_IMP_QTY),
            col(record::SEC_IMP_VAL),
            col(record::SEC_EXP_QTY),
            col(record::SEC_EXP_VAL),
        ])
        .sort(
            [record::PRODUCT_KEY, record::PRODUCT_CODE, record::GEO],
            Default::default(),
        )
        .collect()?;
    Ok(out)
}

/// Harmonize one year of raw trade data into record rows.
///
/// Sums flows per (HS code, reporter), expands HS codes into the year's
/// active industrial codes (one trade row fans out when several codes share
/// an HS association), rewrites aggregate pseudo-codes, and converts
/// kilogram quantities to tonnes.
pub fn harmonize_trade(raw: DataFrame, catalog: &ProductCatalog, year: i32) -> Result<DataFrame> {
    require_columns(
        &raw,
        &[
            trade::HS_CODE,
            trade::REPORTER,
            trade::FLOW,
            trade::INDICATOR,
            trade::VALUE,
        ],
    )?;
    if raw.height() == 0 {
        return empty_trade_harmonized();
    }

    let coerced = value::coerce_numeric(raw, trade::VALUE, VALUE_NUM, "trade")?;

    let observed: Vec<String> = coerced
        .column(trade::HS_CODE)?
        .str()?
        .into_iter()
        .flatten()
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let expansion = catalog.trade_expansion_frame(year, &observed)?;

    let matched: BTreeSet<String> = expansion
        .column(catalog::HS_CODE)?
        .str()?
        .into_iter()
        .flatten()
        .map(str::to_string)
        .collect();
    let unmatched: Vec<&str> = observed
        .iter()
        .filter(|h| !matched.contains(*h))
        .map(String::as_str)
        .collect();
    if !unmatched.is_empty() {
        warn!(
            count = unmatched.len(),
            codes = ?unmatched,
            "trade HS codes without a product mapping excluded"
        );
    }

    let flow_sum = |flow: &'static str, indicator: &'static str, alias_name: &'static str| {
        col(VALUE_NUM)
            .filter(
                col(trade::FLOW)
                    .eq(lit(flow))
                    .and(col(trade::INDICATOR).eq(lit(indicator))),
            )
            .sum()
            .alias(alias_name)
    };

    let out = coerced
        .lazy()
        .group_by([col(trade::HS_CODE), col(trade::REPORTER)])
        .agg([
            flow_sum(trade_flow::IMPORT, trade_indicator::QTY_KG, IMP_KG),
            flow_sum(trade_flow::IMPORT, trade_indicator::VALUE, record::IMP_VAL),
            flow_sum(trade_flow::EXPORT, trade_indicator::QTY_KG, EXP_KG),
            flow_sum(trade_flow::EXPORT, trade_indicator::VALUE, record::EXP_VAL),
        ])
        .join(
            expansion.lazy(),
            [col(trade::HS_CODE)],
            [col(catalog::HS_CODE)],
            JoinArgs::new(JoinType::Inner),
        )
        .join(
            countries::mapping_frame(SourceSystem::TradeIso)?.lazy(),
            [col(trade::REPORTER)],
            [col(countries::SOURCE_CODE)],
            JoinArgs::new(JoinType::Left),
        )
        .with_column(
            when(col(countries::ISO_CODE).is_not_null())
                .then(col(countries::ISO_CODE))
                .otherwise(col(trade::REPORTER))
                .alias(record::GEO),
        )
        // Several HS codes can land on the same industrial code; collapse
        // back to record grain.
        .group_by([
            col(record::PRODUCT_KEY),
            col(record::PRODUCT_CODE),
            col(record::GEO),
        ])
        .agg([
            col(IMP_KG).sum().alias(IMP_KG),
            col(record::IMP_VAL).sum().alias(record::IMP_VAL),
            col(EXP_KG).sum().alias(EXP_KG),
            col(record::EXP_VAL).sum().alias(record::EXP_VAL),
        ])
        .with_columns([
            (col(IMP_KG) * lit(units::KG_TO_TONNES)).alias(record::IMP_QTY),
            (col(EXP_KG) * lit(units::KG_TO_TONNES)).alias(record::EXP_QTY),
            lit(year).alias(record::YEAR),
        ])
        .with_column(countries::level_expr(record::GEO).alias(record::LEVEL))
        .select([
            col(record::PRODUCT_KEY),
            col(record::PRODUCT_CODE),
            col(record::GEO),
            col(record::LEVEL),
            col(record::YEAR),
            col(record::IMP_QTY),
            col(record::IMP_VAL),
            col(record::EXP_QTY),
            col(record::EXP_VAL),
        ])
        .sort(
            [record::PRODUCT_KEY, record::PRODUCT_CODE, record::GEO],
            Default::default(),
        )
        .collect()?;
    Ok(out)
}

/// Full outer join of the two harmonized sides with zero-coalescing of the
/// additive fields and per-field fallback from the secondary trade figures.
///
/// A non-zero primary value is never overwritten; an absent side simply
/// contributes zeros. Only additive fields are coalesced, rates never are.
pub fn merge_with_fallback(
    production: DataFrame,
    trade: DataFrame,
    year: i32,
) -> Result<DataFrame> {
    let prod_lf = production.lazy().select([
        col(record::PRODUCT_KEY),
        col(record::PRODUCT_CODE),
        col(record::GEO),
        col(record::PROD_QTY),
        col(record::PROD_VAL),
        col(record::SEC_IMP_QTY),
        col(record::SEC_IMP_VAL),
        col(record::SEC_EXP_QTY),
        col(record::SEC_EXP_VAL),
    ]);
    let trade_lf = trade.lazy().select([
        col(record::PRODUCT_KEY),
        col(record::PRODUCT_CODE),
        col(record::GEO),
        col(record::IMP_QTY),
        col(record::IMP_VAL),
        col(record::EXP_QTY),
        col(record::EXP_VAL),
    ]);

    let keys = [
        col(record::PRODUCT_KEY),
        col(record::PRODUCT_CODE),
        col(record::GEO),
    ];
    let zero_fill: Vec<Expr> = record::ADDITIVE
        .iter()
        .chain(
            [
                record::SEC_IMP_QTY,
                record::SEC_IMP_VAL,
                record::SEC_EXP_QTY,
                record::SEC_EXP_VAL,
            ]
            .iter(),
        )
        .map(|c| col(*c).fill_null(lit(0.0)))
        .collect();

    let fallback = |primary: &'static str, secondary: &'static str| {
        when(col(primary).eq(lit(0.0)).and(col(secondary).gt(lit(0.0))))
            .then(col(secondary))
            .otherwise(col(primary))
            .alias(primary)
    };

    let out = prod_lf
        .join(
            trade_lf,
            keys.clone(),
            keys.clone(),
            JoinArgs::new(JoinType::Full).with_coalesce(JoinCoalesce::CoalesceColumns),
        )
        .with_columns(zero_fill)
        .with_columns([
            fallback(record::IMP_QTY, record::SEC_IMP_QTY),
            fallback(record::IMP_VAL, record::SEC_IMP_VAL),
            fallback(record::EXP_QTY, record::SEC_EXP_QTY),
            fallback(record::EXP_VAL, record::SEC_EXP_VAL),
        ])
        .with_columns([lit(year).alias(record::YEAR)])
        .with_column(countries::level_expr(record::GEO).alias(record::LEVEL))
        .select([
            col(record::PRODUCT_KEY),
            col(record::PRODUCT_CODE),
            col(record::GEO),
            col(record::LEVEL),
            col(record::YEAR),
            col(record::PROD_QTY),
            col(record::PROD_VAL),
            col(record::IMP_QTY),
            col(record::IMP_VAL),
            col(record::EXP_QTY),
            col(record::EXP_VAL),
        ])
        .sort(
            [record::PRODUCT_KEY, record::PRODUCT_CODE, record::GEO],
            Default::default(),
        )
        .collect()?;
    Ok(out)
}

pub fn empty_production_harmonized() -> Result<DataFrame> {
    Ok(DataFrame::new(vec![
        Column::new_empty(record::PRODUCT_KEY.into(), &DataType::String),
        Column::new_empty(record::PRODUCT_CODE.into(), &DataType::String),
        Column::new_empty(record::GEO.into(), &DataType::String),
        Column::new_empty(record::LEVEL.into(), &DataType::String),
        Column::new_empty(record::YEAR.into(), &DataType::Int32),
        Column::new_empty(record::PROD_QTY.into(), &DataType::Float64),
        Column::new_empty(record::PROD_VAL.into(), &DataType::Float64),
        Column::new_empty(record::SEC_IMP_QTY.into(), &DataType::Float64),
        Column::new_empty(record::SEC_IMP_VAL.into(), &DataType::Float64),
        Column::new_empty(record::SEC_EXP_QTY.into(), &DataType::Float64),
        Column::new_empty(record::SEC_EXP_VAL.into(), &DataType::Float64),
    ])?)
}

pub fn empty_trade_harmonized() -> Result<DataFrame> {
    Ok(DataFrame::new(vec![
        Column::new_empty(record::PRODUCT_KEY.into(), &DataType::String),
        Column::new_empty(record::PRODUCT_CODE.into(), &DataType::String),
        Column::new_empty(record::GEO.into(), &DataType::String),
        Column::new_empty(record::LEVEL.into(), &DataType::String),
        Column::new_empty(record::YEAR.into(), &DataType::Int32),
        Column::new_empty(record::IMP_QTY.into(), &DataType::Float64),
        Column::new_empty(record::IMP_VAL.into(), &DataType::Float64),
        Column::new_empty(record::EXP_QTY.into(), &DataType::Float64),
        Column::new_empty(record::EXP_VAL.into(), &DataType::Float64),
    ])?)
}

fn warn_duplicate_indicator_rows(raw: &DataFrame) -> Result<()> {
    let dups = raw
        .clone()
        .lazy()
        .group_by([
            col(production::PRODUCT_CODE),
            col(production::COUNTRY_CODE),
            col(production::INDICATOR),
        ])
        .agg([len().alias("n")])
        .filter(col("n").gt(lit(1)))
        .collect()?;
    if dups.height() > 0 {
        // Expected uniqueness is not validated upstream; resolve
        // deterministically and make the ambiguity visible.
        warn!(
            keys = dups.height(),
            "duplicate production rows per (code, country, indicator); first occurrence wins"
        );
    }
    Ok(())
}

fn debug_inactive_codes(raw: &DataFrame, code_frame: &DataFrame) -> Result<()> {
    let active: BTreeSet<&str> = code_frame
        .column(catalog::PRODUCT_CODE)?
        .str()?
        .into_iter()
        .flatten()
        .collect();
    let dropped: BTreeSet<&str> = raw
        .column(production::PRODUCT_CODE)?
        .str()?
        .into_iter()
        .flatten()
        .filter(|c| !active.contains(c))
        .collect();
    if !dropped.is_empty() {
        debug!(codes = ?dropped, "production codes outside the year's active epochs dropped");
    }
    Ok(())
}

fn warn_unmapped_countries(df: &DataFrame) -> Result<()> {
    let unmapped = df
        .clone()
        .lazy()
        .filter(col(countries::ISO_CODE).is_null())
        .select([col(production::COUNTRY_CODE)])
        .collect()?;
    if unmapped.height() > 0 {
        let codes: BTreeSet<&str> = unmapped
            .column(production::COUNTRY_CODE)?
            .str()?
            .into_iter()
            .flatten()
            .collect();
        warn!(codes = ?codes, "unmapped production country codes passed through unchanged");
    }
    Ok(())
}

fn warn_inconvertible_quantities(df: &DataFrame) -> Result<()> {
    let stuck = df
        .clone()
        .lazy()
        .filter(
            col(units::FACTOR)
                .is_null()
                .and(col(catalog::PIECE_WEIGHT_T).is_null())
                .and(col(PROD_QTY_RAW).is_not_null()),
        )
        .collect()?;
    if stuck.height() > 0 {
        warn!(
            rows = stuck.height(),
            "count-based quantities without a piece-weight override left missing"
        );
    }
    Ok(())
}
