use polars::prelude::*;

use crate::catalog::{self, ProductCatalog};
use crate::countries;
use crate::error::Result;
use crate::schema::{rate, record, strategy};

const CR: &str = "cr_pc";
const CR_EU: &str = "cr_eu_pc";
const CR_EFF: &str = "cr_eff_pc";
const RR: &str = "rr_pc";

/// Emit the two what-if scenario rows for every (product, geo) row of the
/// main indicator table.
///
/// The refurbishment row applies the configured current rate to apparent
/// consumption; the recycling row applies collection times recovery. The
/// collection rate falls back to the EU-wide aggregate when no
/// country-specific value exists, and any missing rate input leaves the
/// savings missing rather than implying a zero estimate.
pub fn build_strategy(
    indicators: &DataFrame,
    collection: &DataFrame,
    recovery: &DataFrame,
    catalog: &ProductCatalog,
    year: i32,
) -> Result<DataFrame> {
    let base = indicators.clone().lazy().select([
        col(record::PRODUCT_KEY),
        col(record::PRODUCT_CODE),
        col(record::GEO),
        col(record::LEVEL),
        col(record::AC_QTY),
        col(record::AC_VAL),
    ]);

    let country_rates = collection.clone().lazy().select([
        col(catalog::PRODUCT_KEY),
        col(record::GEO),
        col(rate::COLLECTION).alias(CR),
    ]);
    let eu_rates = collection
        .clone()
        .lazy()
        .filter(col(record::GEO).eq(lit(countries::EU_AGGREGATE)))
        .select([col(catalog::PRODUCT_KEY), col(rate::COLLECTION).alias(CR_EU)]);
    let recovery_rates = recovery
        .clone()
        .lazy()
        .select([col(catalog::PRODUCT_KEY), col(rate::RECOVERY).alias(RR)]);

    let joined = base
        .join(
            country_rates,
            [col(record::PRODUCT_KEY), col(record::GEO)],
            [col(catalog::PRODUCT_KEY), col(record::GEO)],
            JoinArgs::new(JoinType::Left),
        )
        .join(
            eu_rates,
            [col(record::PRODUCT_KEY)],
            [col(catalog::PRODUCT_KEY)],
            JoinArgs::new(JoinType::Left),
        )
        .join(
            recovery_rates,
            [col(record::PRODUCT_KEY)],
            [col(catalog::PRODUCT_KEY)],
            JoinArgs::new(JoinType::Left),
        )
        .join(
            catalog.rates_frame()?.lazy(),
            [col(record::PRODUCT_KEY)],
            [col(catalog::PRODUCT_KEY)],
            JoinArgs::new(JoinType::Left),
        )
        .with_column(
            when(col(CR).is_not_null())
                .then(col(CR))
                .otherwise(col(CR_EU))
                .alias(CR_EFF),
        );

    let refurbishment = joined.clone().with_columns([
        lit(strategy::REFURBISHMENT).alias(strategy::STRATEGY),
        col(catalog::REFURB_RATE).alias(strategy::RATE),
    ]);
    let recycling = joined.with_columns([
        lit(strategy::RECYCLING).alias(strategy::STRATEGY),
        (col(CR_EFF) * col(RR) / lit(100.0)).alias(strategy::RATE),
    ]);

    let out = concat([refurbishment, recycling], UnionArgs::default())?
        .with_columns([
            (col(record::AC_QTY) * col(strategy::RATE) / lit(100.0)).alias(strategy::SAVINGS_QTY),
            (col(record::AC_VAL) * col(strategy::RATE) / lit(100.0)).alias(strategy::SAVINGS_VAL),
            lit(year).alias(record::YEAR),
        ])
        .select([
            col(record::PRODUCT_KEY),
            col(record::PRODUCT_CODE),
            col(record::GEO),
            col(record::LEVEL),
            col(record::YEAR),
            col(strategy::STRATEGY),
            col(strategy::RATE),
            col(strategy::SAVINGS_QTY),
            col(strategy::SAVINGS_VAL),
        ])
        .sort(
            [
                record::PRODUCT_KEY,
                record::PRODUCT_CODE,
                record::GEO,
                strategy::STRATEGY,
            ],
            Default::default(),
        )
        .collect()?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Epoch, Product, ProductCatalog, RateAssumptions};
    use crate::schema::{level, massbalance, source};

    fn catalog() -> ProductCatalog {
        ProductCatalog {
            products: vec![Product {
                key: "fridge".into(),
                name: "Household refrigerators".into(),
                avg_piece_weight_kg: None,
                waste_categories: vec!["large_equipment".into()],
                rates: RateAssumptions { current_pc: 10.0, potential_pc: 30.0 },
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

    fn indicators() -> DataFrame {
        df!(
            record::PRODUCT_KEY => &["fridge", "fridge"],
            record::PRODUCT_CODE => &["Y", "Y"],
            record::GEO => &["DE", "FR"],
            record::LEVEL => &[level::COUNTRY, level::COUNTRY],
            record::YEAR => &[2019i32, 2019],
            record::AC_QTY => &[100.0, 200.0],
            record::AC_VAL => &[1000.0, 2000.0],
        )
        .unwrap()
    }

    fn collection_rates(rows: &[(&str, f64)]) -> DataFrame {
        let keys: Vec<&str> = rows.iter().map(|_| "fridge").collect();
        let geos: Vec<&str> = rows.iter().map(|(g, _)| *g).collect();
        let rates: Vec<f64> = rows.iter().map(|(_, r)| *r).collect();
        df!(
            catalog::PRODUCT_KEY => keys,
            record::GEO => geos,
            rate::COLLECTION => rates,
            massbalance::YEAR => vec![2019i32; rows.len()],
            rate::SOURCE => vec![source::COLLECTION_STATS; rows.len()],
        )
        .unwrap()
    }

    fn recovery_rates(value: Option<f64>) -> DataFrame {
        df!(
            catalog::PRODUCT_KEY => &["fridge"],
            rate::RECOVERY => &[value],
            massbalance::YEAR => &[2019i32],
            rate::DATA_YEAR => &[2019i32],
            rate::SOURCE => &[source::MASS_BALANCE],
        )
        .unwrap()
    }

    #[test]
    fn two_rows_per_indicator_row() {
        let out = build_strategy(
            &indicators(),
            &collection_rates(&[("DE", 50.0)]),
            &recovery_rates(Some(80.0)),
            &catalog(),
            2019,
        )
        .unwrap();
        assert_eq!(out.height(), 4);

        // DE refurbishment: 10% of 100 t.
        let savings = out.column(strategy::SAVINGS_QTY).unwrap().f64().unwrap();
        let strategies = out.column(strategy::STRATEGY).unwrap().str().unwrap();
        assert_eq!(strategies.get(0), Some(strategy::RECYCLING));
        assert_eq!(strategies.get(1), Some(strategy::REFURBISHMENT));
        assert_eq!(savings.get(1), Some(10.0));
        // DE recycling: 50% collection times 80% recovery is 40% of 100 t.
        assert_eq!(savings.get(0), Some(40.0));
    }

    #[test]
    fn collection_rate_falls_back_to_eu_aggregate() {
        let out = build_strategy(
            &indicators(),
            &collection_rates(&[("DE", 50.0), (countries::EU_AGGREGATE, 30.0)]),
            &recovery_rates(Some(80.0)),
            &catalog(),
            2019,
        )
        .unwrap();
        // FR has no country value; the EU rate of 30% applies: 24% of 200 t.
        let savings = out.column(strategy::SAVINGS_QTY).unwrap().f64().unwrap();
        assert_eq!(savings.get(2), Some(48.0));
    }

    #[test]
    fn missing_rate_inputs_leave_savings_missing() {
        let out = build_strategy(
            &indicators(),
            &collection_rates(&[("DE", 50.0)]),
            &recovery_rates(None),
            &catalog(),
            2019,
        )
        .unwrap();
        let savings = out.column(strategy::SAVINGS_QTY).unwrap().f64().unwrap();
        let strategies = out.column(strategy::STRATEGY).unwrap().str().unwrap();
        // Recycling savings are missing everywhere without a recovery rate,
        // and FR additionally lacks any collection value.
        for i in 0..out.height() {
            match strategies.get(i).unwrap() {
                s if s == strategy::RECYCLING => assert_eq!(savings.get(i), None),
                _ => assert!(savings.get(i).is_some()),
            }
        }
    }
}
