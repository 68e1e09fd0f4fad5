use polars::prelude::*;
use tracing::warn;

use crate::catalog::{self, ProductCatalog};
use crate::countries::{self, SourceSystem};
use crate::error::Result;
use crate::schema::{collection, massbalance, rate, source};
use crate::store::require_columns;
use crate::value;

const VALUE_NUM: &str = "value_num";
const CATEGORY_RATE: &str = "category_rate_pc";

/// Derive observed collection percentages per (product, geo) from the
/// waste-collection statistics.
///
/// Rows outside the recognized operation and unit code sets are ignored.
/// Recognized readings are averaged per (geo, waste category), expanded
/// through the category mapping and averaged again across a product's
/// categories. No data still yields the well-formed empty table.
pub fn build_collection(
    stats: Option<DataFrame>,
    catalog: &ProductCatalog,
    year: i32,
) -> Result<DataFrame> {
    let Some(raw) = stats else {
        warn!(year, "no collection table; emitting empty collection rates");
        return empty_collection();
    };
    require_columns(
        &raw,
        &[
            collection::GEO,
            collection::CATEGORY,
            collection::OPERATION,
            collection::UNIT,
            collection::VALUE,
        ],
    )?;

    let coerced = value::coerce_numeric(raw, collection::VALUE, VALUE_NUM, "collection")?;

    let operations = Series::new("operations".into(), collection::OPERATIONS.as_slice());
    let units = Series::new("units".into(), collection::UNITS.as_slice());

    let out = coerced
        .lazy()
        .filter(
            col(collection::OPERATION)
                .is_in(lit(operations), false)
                .and(col(collection::UNIT).is_in(lit(units), false)),
        )
        .join(
            countries::mapping_frame(SourceSystem::TradeIso)?.lazy(),
            [col(collection::GEO)],
            [col(countries::SOURCE_CODE)],
            JoinArgs::new(JoinType::Left),
        )
        .with_column(
            when(col(countries::ISO_CODE).is_not_null())
                .then(col(countries::ISO_CODE))
                .otherwise(col(collection::GEO))
                .alias(collection::GEO),
        )
        .group_by([col(collection::GEO), col(collection::CATEGORY)])
        .agg([col(VALUE_NUM).mean().alias(CATEGORY_RATE)])
        .join(
            catalog.category_frame()?.lazy(),
            [col(collection::CATEGORY)],
            [col(massbalance::CATEGORY)],
            JoinArgs::new(JoinType::Inner),
        )
        .group_by([col(catalog::PRODUCT_KEY), col(collection::GEO)])
        .agg([col(CATEGORY_RATE).mean().alias(rate::COLLECTION)])
        .with_columns([
            lit(year).alias(massbalance::YEAR),
            lit(source::COLLECTION_STATS).alias(rate::SOURCE),
        ])
        .sort([catalog::PRODUCT_KEY, collection::GEO], Default::default())
        .collect()?;
    Ok(out)
}

pub fn empty_collection() -> Result<DataFrame> {
    Ok(DataFrame::new(vec![
        Column::new_empty(catalog::PRODUCT_KEY.into(), &DataType::String),
        Column::new_empty(collection::GEO.into(), &DataType::String),
        Column::new_empty(rate::COLLECTION.into(), &DataType::Float64),
        Column::new_empty(massbalance::YEAR.into(), &DataType::Int32),
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
                waste_categories: vec!["large_equipment".into(), "cooling".into()],
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

    #[test]
    fn averages_across_categories_per_geo() {
        let stats = df!(
            collection::GEO => &["DE", "DE", "DE"],
            collection::CATEGORY => &["large_equipment", "large_equipment", "cooling"],
            collection::OPERATION => &["collection", "collection", "collection_hh"],
            collection::UNIT => &["pc", "pc_3yavg", "pc"],
            collection::VALUE => &["40", "50", "60"],
        )
        .unwrap();
        let out = build_collection(Some(stats), &catalog(), 2019).unwrap();
        assert_eq!(out.height(), 1);
        // large_equipment averages to 45, cooling is 60; the product mean
        // across categories is 52.5.
        let r = out.column(rate::COLLECTION).unwrap().f64().unwrap();
        assert_eq!(r.get(0), Some(52.5));
    }

    #[test]
    fn unrecognized_operations_and_units_are_ignored() {
        let stats = df!(
            collection::GEO => &["DE", "DE"],
            collection::CATEGORY => &["large_equipment", "large_equipment"],
            collection::OPERATION => &["treatment", "collection"],
            collection::UNIT => &["pc", "tonnes"],
            collection::VALUE => &["40", "50"],
        )
        .unwrap();
        let out = build_collection(Some(stats), &catalog(), 2019).unwrap();
        assert_eq!(out.height(), 0);
    }

    #[test]
    fn missing_table_yields_wellformed_empty_output() {
        let out = build_collection(None, &catalog(), 2019).unwrap();
        assert_eq!(out.height(), 0);
        assert!(out.column(rate::COLLECTION).is_ok());
    }
}
