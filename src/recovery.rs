use polars::prelude::*;
use tracing::warn;

use crate::catalog::{self, ProductCatalog};
use crate::error::Result;
use crate::schema::{flow_id, massbalance, rate, scenario, source};
use crate::store::require_columns;
use crate::value;

const MASS_NUM: &str = "mass_num";
const YEAR_NUM: &str = "year_num";
const RECOVERED: &str = "recovered_t";
const LOST: &str = "lost_t";
const WEIGHTED: &str = "weighted";
const WEIGHT: &str = "weight";

/// The two tables derived from the mass-balance flows for one year.
pub struct RecoveryTables {
    pub composition: DataFrame,
    pub rates: DataFrame,
}

/// Derive material composition and recovery rates for `year`.
///
/// Only the observed scenario enters the calculation. When the requested
/// year has no observed rows the most recent prior year substitutes, the
/// rows are retagged to the requested year and `data_year` records where
/// they came from. Every no-data situation still yields the well-formed
/// empty tables, since later steps depend on the tables existing.
pub fn build_recovery(
    flows: Option<DataFrame>,
    catalog: &ProductCatalog,
    year: i32,
) -> Result<RecoveryTables> {
    let Some(raw) = flows else {
        warn!(year, "no mass-balance table; emitting empty recovery tables");
        return empty_tables();
    };
    require_columns(
        &raw,
        &[
            massbalance::YEAR,
            massbalance::LOCATION,
            massbalance::CATEGORY,
            massbalance::MATERIAL,
            massbalance::FLOW_ID,
            massbalance::MASS,
            massbalance::SCENARIO,
        ],
    )?;

    let coerced = value::coerce_numeric(raw, massbalance::MASS, MASS_NUM, "massbalance")?;
    let coerced = value::coerce_numeric(coerced, massbalance::YEAR, YEAR_NUM, "massbalance")?;

    let observed = coerced
        .lazy()
        .filter(col(massbalance::SCENARIO).eq(lit(scenario::OBSERVED)))
        .with_column(col(YEAR_NUM).cast(DataType::Int32).alias(massbalance::YEAR))
        .collect()?;
    if observed.height() == 0 {
        warn!(year, "mass-balance table has no observed rows; emitting empty recovery tables");
        return empty_tables();
    }

    let years = observed.column(massbalance::YEAR)?.i32()?;
    let data_year = if years.into_iter().flatten().any(|y| y == year) {
        year
    } else {
        match years.into_iter().flatten().filter(|y| *y < year).max() {
            Some(prior) => {
                warn!(
                    requested = year,
                    used = prior,
                    "no observed mass-balance rows for requested year; using most recent prior year"
                );
                prior
            }
            None => {
                warn!(year, "no observed mass-balance rows at or before year; emitting empty recovery tables");
                return empty_tables();
            }
        }
    };

    let data = observed
        .lazy()
        .filter(col(massbalance::YEAR).eq(lit(data_year)))
        .select([
            col(massbalance::CATEGORY),
            col(massbalance::MATERIAL),
            col(massbalance::FLOW_ID),
            col(MASS_NUM),
        ]);

    // Mass per (category, material) across all flows and locations, with
    // the material's share of the category total.
    let cat_total = col(rate::MASS).sum().over([col(massbalance::CATEGORY)]);
    let category_mass = data
        .clone()
        .group_by([col(massbalance::CATEGORY), col(massbalance::MATERIAL)])
        .agg([col(MASS_NUM).sum().alias(rate::MASS)])
        .with_column(
            when(cat_total.clone().gt(lit(0.0)))
                .then(col(rate::MASS) / cat_total * lit(100.0))
                .otherwise(lit(NULL))
                .alias(rate::CATEGORY_SHARE),
        );

    // Recovery rate per (category, material): recovered over recovered
    // plus lost, undefined when the denominator is zero.
    let recovery_flows = Series::new("recovery_flows".into(), flow_id::RECOVERY.as_slice());
    let category_rate = data
        .group_by([col(massbalance::CATEGORY), col(massbalance::MATERIAL)])
        .agg([
            col(MASS_NUM)
                .filter(col(massbalance::FLOW_ID).is_in(lit(recovery_flows), false))
                .sum()
                .alias(RECOVERED),
            col(MASS_NUM)
                .filter(col(massbalance::FLOW_ID).eq(lit(flow_id::LOST)))
                .sum()
                .alias(LOST),
        ])
        .with_column(
            when((col(RECOVERED) + col(LOST)).gt(lit(0.0)))
                .then(col(RECOVERED) / (col(RECOVERED) + col(LOST)) * lit(100.0))
                .otherwise(lit(NULL))
                .alias(rate::RECOVERY),
        );

    // Expand to products through the category mapping, weighting each
    // material by its mass share within the product.
    let total = col(rate::MASS).sum().over([col(catalog::PRODUCT_KEY)]);
    let composition = catalog
        .category_frame()?
        .lazy()
        .join(
            category_mass,
            [col(massbalance::CATEGORY)],
            [col(massbalance::CATEGORY)],
            JoinArgs::new(JoinType::Inner),
        )
        .with_column(
            when(total.clone().gt(lit(0.0)))
                .then(col(rate::MASS) / total * lit(100.0))
                .otherwise(lit(NULL))
                .alias(rate::SHARE),
        )
        .with_columns(provenance(year, data_year))
        .sort(
            [
                catalog::PRODUCT_KEY,
                massbalance::CATEGORY,
                massbalance::MATERIAL,
            ],
            Default::default(),
        )
        .collect()?;

    // Mass-weighted mean of the category/material rates per product;
    // materials without a defined rate carry no weight.
    let rates = composition
        .clone()
        .lazy()
        .join(
            category_rate,
            [col(massbalance::CATEGORY), col(massbalance::MATERIAL)],
            [col(massbalance::CATEGORY), col(massbalance::MATERIAL)],
            JoinArgs::new(JoinType::Left),
        )
        .group_by([col(catalog::PRODUCT_KEY)])
        .agg([
            (col(rate::RECOVERY) * col(rate::MASS)).sum().alias(WEIGHTED),
            col(rate::MASS)
                .filter(col(rate::RECOVERY).is_not_null())
                .sum()
                .alias(WEIGHT),
        ])
        .with_column(
            when(col(WEIGHT).gt(lit(0.0)))
                .then(col(WEIGHTED) / col(WEIGHT))
                .otherwise(lit(NULL))
                .alias(rate::RECOVERY),
        )
        .with_columns(provenance(year, data_year))
        .select([
            col(catalog::PRODUCT_KEY),
            col(rate::RECOVERY),
            col(massbalance::YEAR),
            col(rate::DATA_YEAR),
            col(rate::SOURCE),
        ])
        .sort([catalog::PRODUCT_KEY], Default::default())
        .collect()?;

    Ok(RecoveryTables { composition, rates })
}

fn provenance(year: i32, data_year: i32) -> Vec<Expr> {
    vec![
        lit(year).alias(massbalance::YEAR),
        lit(data_year).alias(rate::DATA_YEAR),
        lit(source::MASS_BALANCE).alias(rate::SOURCE),
    ]
}

fn empty_tables() -> Result<RecoveryTables> {
    Ok(RecoveryTables {
        composition: empty_composition()?,
        rates: empty_rates()?,
    })
}

pub fn empty_composition() -> Result<DataFrame> {
    Ok(DataFrame::new(vec![
        Column::new_empty(catalog::PRODUCT_KEY.into(), &DataType::String),
        Column::new_empty(massbalance::CATEGORY.into(), &DataType::String),
        Column::new_empty(massbalance::MATERIAL.into(), &DataType::String),
        Column::new_empty(rate::MASS.into(), &DataType::Float64),
        Column::new_empty(rate::CATEGORY_SHARE.into(), &DataType::Float64),
        Column::new_empty(rate::SHARE.into(), &DataType::Float64),
        Column::new_empty(massbalance::YEAR.into(), &DataType::Int32),
        Column::new_empty(rate::DATA_YEAR.into(), &DataType::Int32),
        Column::new_empty(rate::SOURCE.into(), &DataType::String),
    ])?)
}

pub fn empty_rates() -> Result<DataFrame> {
    Ok(DataFrame::new(vec![
        Column::new_empty(catalog::PRODUCT_KEY.into(), &DataType::String),
        Column::new_empty(rate::RECOVERY.into(), &DataType::Float64),
        Column::new_empty(massbalance::YEAR.into(), &DataType::Int32),
        Column::new_empty(rate::DATA_YEAR.into(), &DataType::Int32),
        Column::new_empty(rate::SOURCE.into(), &DataType::String),
    ])?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Epoch, Product, ProductCatalog, RateAssumptions};

    fn catalog() -> ProductCatalog {
        ProductCatalog {
            products: vec![Product {
                key: "fridge".into(),
                name: "Household refrigerators".into(),
                avg_piece_weight_kg: None,
                waste_categories: vec!["large_equipment".into()],
                rates: RateAssumptions { current_pc: 5.0, potential_pc: 20.0 },
                epochs: vec![Epoch {
                    name: "rev2".into(),
                    start_year: 2008,
                    end_year: 9999,
                    prod_codes: vec!["Y".into()],
                    hs_codes: vec![],
                }],
            }],
        }
    }

    fn flows() -> DataFrame {
        df!(
            massbalance::YEAR => &["2015", "2015", "2015", "2015", "2015"],
            massbalance::LOCATION => &["EU", "EU", "EU", "EU", "EU"],
            massbalance::CATEGORY => &["large_equipment"; 5],
            massbalance::MATERIAL => &["steel", "steel", "steel", "plastic", "plastic"],
            massbalance::FLOW_ID => &["recycled", "recovered", "lost", "collected", "collected"],
            massbalance::MASS => &["60", "20", "20", "50", "50"],
            massbalance::SCENARIO => &["observed"; 5],
        )
        .unwrap()
    }

    #[test]
    fn recovery_rate_is_mass_weighted() {
        let tables = build_recovery(Some(flows()), &catalog(), 2015).unwrap();
        // Steel: recovered 80, lost 20, rate 80. Plastic has no recovery or
        // loss flows, so its rate is undefined and carries no weight.
        let rates = tables.rates;
        assert_eq!(rates.height(), 1);
        let r = rates.column(rate::RECOVERY).unwrap().f64().unwrap();
        assert_eq!(r.get(0), Some(80.0));
    }

    #[test]
    fn zero_denominator_yields_missing_not_nan() {
        let df = df!(
            massbalance::YEAR => &["2015"],
            massbalance::LOCATION => &["EU"],
            massbalance::CATEGORY => &["large_equipment"],
            massbalance::MATERIAL => &["glass"],
            massbalance::FLOW_ID => &["collected"],
            massbalance::MASS => &["10"],
            massbalance::SCENARIO => &["observed"],
        )
        .unwrap();
        let tables = build_recovery(Some(df), &catalog(), 2015).unwrap();
        let r = tables.rates.column(rate::RECOVERY).unwrap().f64().unwrap();
        assert_eq!(r.len(), 1);
        assert_eq!(r.get(0), None);
    }

    #[test]
    fn composition_shares_sum_within_product() {
        let tables = build_recovery(Some(flows()), &catalog(), 2015).unwrap();
        let comp = tables.composition;
        assert_eq!(comp.height(), 2);
        let share = comp.column(rate::SHARE).unwrap().f64().unwrap();
        let total: f64 = share.into_iter().flatten().sum();
        assert!((total - 100.0).abs() < 1e-9);
        // Steel and plastic each carry 100 of the category's 200 t.
        let cat_share = comp.column(rate::CATEGORY_SHARE).unwrap().f64().unwrap();
        for i in 0..comp.height() {
            assert!((cat_share.get(i).unwrap() - 50.0).abs() < 1e-9);
        }
    }

    #[test]
    fn prior_year_substitutes_and_is_recorded() {
        let tables = build_recovery(Some(flows()), &catalog(), 2017).unwrap();
        let rates = tables.rates;
        assert_eq!(rates.height(), 1);
        let year_col = rates.column(massbalance::YEAR).unwrap().i32().unwrap();
        assert_eq!(year_col.get(0), Some(2017));
        let data_year = rates.column(rate::DATA_YEAR).unwrap().i32().unwrap();
        assert_eq!(data_year.get(0), Some(2015));
    }

    #[test]
    fn simulated_scenarios_are_excluded() {
        let df = df!(
            massbalance::YEAR => &["2015"],
            massbalance::LOCATION => &["EU"],
            massbalance::CATEGORY => &["large_equipment"],
            massbalance::MATERIAL => &["steel"],
            massbalance::FLOW_ID => &["recycled"],
            massbalance::MASS => &["100"],
            massbalance::SCENARIO => &["projected"],
        )
        .unwrap();
        let tables = build_recovery(Some(df), &catalog(), 2015).unwrap();
        assert_eq!(tables.rates.height(), 0);
        assert_eq!(tables.composition.height(), 0);
    }

    #[test]
    fn missing_table_yields_wellformed_empty_outputs() {
        let tables = build_recovery(None, &catalog(), 2015).unwrap();
        assert_eq!(tables.rates.height(), 0);
        assert!(tables.rates.column(rate::RECOVERY).is_ok());
        assert_eq!(tables.composition.height(), 0);
        assert!(tables.composition.column(rate::SHARE).is_ok());
    }
}
