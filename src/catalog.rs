use std::collections::BTreeSet;
use std::path::Path;

use polars::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CircError, Result};

/// Columns of the frames produced by the mapper methods.
pub const PRODUCT_KEY: &str = "product_key";
pub const PRODUCT_CODE: &str = "product_code";
pub const HS_CODE: &str = "hs_code";
pub const CATEGORY: &str = "waste_category";
pub const PIECE_WEIGHT_T: &str = "piece_weight_t";
pub const REFURB_RATE: &str = "refurb_rate_pc";

/// A nomenclature epoch: the interval during which one industrial code
/// list, together with its HS associations, is authoritative for a product.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Epoch {
    pub name: String,
    pub start_year: i32,
    pub end_year: i32,
    pub prod_codes: Vec<String>,
    #[serde(default)]
    pub hs_codes: Vec<String>,
}

impl Epoch {
    pub fn covers(&self, year: i32) -> bool {
        year >= self.start_year && year <= self.end_year
    }
}

/// Manually configured circularity-rate assumptions, in percent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateAssumptions {
    pub current_pc: f64,
    pub potential_pc: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub avg_piece_weight_kg: Option<f64>,
    #[serde(default)]
    pub waste_categories: Vec<String>,
    pub rates: RateAssumptions,
    pub epochs: Vec<Epoch>,
}

impl Product {
    /// The epoch covering `year`, if any. Validation guarantees at most one
    /// matches; a product without a matching epoch simply yields no
    /// production rows for that year.
    pub fn active_epoch(&self, year: i32) -> Option<&Epoch> {
        self.epochs.iter().find(|e| e.covers(year))
    }
}

/// The read-only product catalog threaded through every pipeline step.
/// No ambient lookup: the orchestrator owns one instance and passes it on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductCatalog {
    pub products: Vec<Product>,
}

impl ProductCatalog {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let catalog: ProductCatalog = toml::from_str(raw)?;
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn product(&self, key: &str) -> Option<&Product> {
        self.products.iter().find(|p| p.key == key)
    }

    /// Configuration-time consistency checks. Any failure here is fatal
    /// before the first year is processed.
    pub fn validate(&self) -> Result<()> {
        if self.products.is_empty() {
            return Err(CircError::InvalidCatalog("catalog has no products".into()));
        }

        let mut keys = BTreeSet::new();
        for product in &self.products {
            if product.key.trim().is_empty() {
                return Err(CircError::InvalidCatalog("product with empty key".into()));
            }
            if !keys.insert(product.key.as_str()) {
                return Err(CircError::InvalidCatalog(format!(
                    "duplicate product key '{}'",
                    product.key
                )));
            }

            let rates = &product.rates;
            if !(0.0..=100.0).contains(&rates.current_pc)
                || !(0.0..=100.0).contains(&rates.potential_pc)
            {
                return Err(CircError::InvalidCatalog(format!(
                    "product '{}': rates must be within 0..=100",
                    product.key
                )));
            }
            if rates.potential_pc < rates.current_pc {
                return Err(CircError::InvalidCatalog(format!(
                    "product '{}': potential rate {} below current rate {}",
                    product.key, rates.potential_pc, rates.current_pc
                )));
            }

            if let Some(w) = product.avg_piece_weight_kg {
                if !w.is_finite() || w <= 0.0 {
                    return Err(CircError::InvalidCatalog(format!(
                        "product '{}': avg_piece_weight_kg must be positive",
                        product.key
                    )));
                }
            }

            for epoch in &product.epochs {
                if epoch.start_year > epoch.end_year {
                    return Err(CircError::InvalidCatalog(format!(
                        "product '{}': epoch '{}' has start_year after end_year",
                        product.key, epoch.name
                    )));
                }
            }
            // At most one epoch may be active for any year.
            for (i, a) in product.epochs.iter().enumerate() {
                for b in product.epochs.iter().skip(i + 1) {
                    if a.start_year <= b.end_year && b.start_year <= a.end_year {
                        return Err(CircError::InvalidCatalog(format!(
                            "product '{}': epochs '{}' and '{}' overlap",
                            product.key, a.name, b.name
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// (product_key, product_code) rows active in `year`.
    ///
    /// Products without a matching epoch contribute nothing, which is the
    /// expected outcome for products that only exist from a later year on.
    pub fn production_code_frame(&self, year: i32) -> Result<DataFrame> {
        let mut keys: Vec<&str> = Vec::new();
        let mut codes: Vec<&str> = Vec::new();
        for product in &self.products {
            let Some(epoch) = product.active_epoch(year) else {
                debug!(product = %product.key, year, "no active epoch");
                continue;
            };
            for code in &epoch.prod_codes {
                keys.push(&product.key);
                codes.push(code);
            }
        }
        Ok(DataFrame::new(vec![
            Column::new(PRODUCT_KEY.into(), keys),
            Column::new(PRODUCT_CODE.into(), codes),
        ])?)
    }

    /// (hs_code, product_key, product_code) rows expanding the observed
    /// trade HS codes into the industrial codes active in `year`.
    ///
    /// Matching is a normalized containment test between the observed code
    /// and each configured HS association, and candidates are restricted to
    /// epochs covering `year` so overlapping HS associations of other
    /// epochs never produce spurious joins. Observed codes matching nothing
    /// are omitted; the caller decides how to report them.
    pub fn trade_expansion_frame(&self, year: i32, observed_hs: &[String]) -> Result<DataFrame> {
        let mut rows: BTreeSet<(&str, &str, &str)> = BTreeSet::new();
        for observed in observed_hs {
            let norm_observed = normalize_code(observed);
            for product in &self.products {
                let Some(epoch) = product.active_epoch(year) else {
                    continue;
                };
                let matched = epoch
                    .hs_codes
                    .iter()
                    .any(|configured| norm_observed.contains(&normalize_code(configured)));
                if !matched {
                    continue;
                }
                for code in &epoch.prod_codes {
                    rows.insert((observed.as_str(), product.key.as_str(), code.as_str()));
                }
            }
        }

        let mut hs: Vec<&str> = Vec::with_capacity(rows.len());
        let mut keys: Vec<&str> = Vec::with_capacity(rows.len());
        let mut codes: Vec<&str> = Vec::with_capacity(rows.len());
        for (h, k, c) in rows {
            hs.push(h);
            keys.push(k);
            codes.push(c);
        }
        Ok(DataFrame::new(vec![
            Column::new(HS_CODE.into(), hs),
            Column::new(PRODUCT_KEY.into(), keys),
            Column::new(PRODUCT_CODE.into(), codes),
        ])?)
    }

    /// The many-to-many product to waste-category mapping.
    pub fn category_frame(&self) -> Result<DataFrame> {
        let mut keys: Vec<&str> = Vec::new();
        let mut categories: Vec<&str> = Vec::new();
        for product in &self.products {
            for category in &product.waste_categories {
                keys.push(&product.key);
                categories.push(category);
            }
        }
        Ok(DataFrame::new(vec![
            Column::new(PRODUCT_KEY.into(), keys),
            Column::new(CATEGORY.into(), categories),
        ])?)
    }

    /// Per-product piece weights in tonnes, for the count-based unit
    /// override. Products without a configured weight are absent.
    pub fn piece_weight_frame(&self) -> Result<DataFrame> {
        let mut keys: Vec<&str> = Vec::new();
        let mut weights: Vec<f64> = Vec::new();
        for product in &self.products {
            if let Some(kg) = product.avg_piece_weight_kg {
                keys.push(&product.key);
                weights.push(kg * 1e-3);
            }
        }
        Ok(DataFrame::new(vec![
            Column::new(PRODUCT_KEY.into(), keys),
            Column::new(PIECE_WEIGHT_T.into(), weights),
        ])?)
    }

    /// Per-product current refurbishment rate, for the strategy calculator.
    pub fn rates_frame(&self) -> Result<DataFrame> {
        let keys: Vec<&str> = self.products.iter().map(|p| p.key.as_str()).collect();
        let rates: Vec<f64> = self.products.iter().map(|p| p.rates.current_pc).collect();
        Ok(DataFrame::new(vec![
            Column::new(PRODUCT_KEY.into(), keys),
            Column::new(REFURB_RATE.into(), rates),
        ])?)
    }
}

/// Strip punctuation and case from a classification code so that
/// "8418.69" and "841869" compare equal.
pub fn normalize_code(code: &str) -> String {
    code.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fridge() -> Product {
        Product {
            key: "fridge".into(),
            name: "Household refrigerators".into(),
            avg_piece_weight_kg: Some(45.0),
            waste_categories: vec!["large_equipment".into()],
            rates: RateAssumptions { current_pc: 5.0, potential_pc: 20.0 },
            epochs: vec![
                Epoch {
                    name: "rev1".into(),
                    start_year: 1995,
                    end_year: 2007,
                    prod_codes: vec!["29.71.11.10".into()],
                    hs_codes: vec!["8418.21".into()],
                },
                Epoch {
                    name: "rev2".into(),
                    start_year: 2008,
                    end_year: 9999,
                    prod_codes: vec!["27.51.11.10".into(), "27.51.11.30".into()],
                    hs_codes: vec!["8418.21".into(), "8418.29".into()],
                },
            ],
        }
    }

    fn catalog() -> ProductCatalog {
        ProductCatalog { products: vec![fridge()] }
    }

    #[test]
    fn exactly_one_epoch_matches_inside_ranges() {
        let p = fridge();
        assert_eq!(p.active_epoch(2006).unwrap().name, "rev1");
        assert_eq!(p.active_epoch(2007).unwrap().name, "rev1");
        assert_eq!(p.active_epoch(2008).unwrap().name, "rev2");
        assert!(p.active_epoch(1990).is_none());
    }

    #[test]
    fn validation_rejects_overlapping_epochs() {
        let mut p = fridge();
        p.epochs[1].start_year = 2007;
        let catalog = ProductCatalog { products: vec![p] };
        assert!(matches!(catalog.validate(), Err(CircError::InvalidCatalog(_))));
    }

    #[test]
    fn validation_rejects_potential_below_current() {
        let mut p = fridge();
        p.rates = RateAssumptions { current_pc: 30.0, potential_pc: 10.0 };
        let catalog = ProductCatalog { products: vec![p] };
        assert!(matches!(catalog.validate(), Err(CircError::InvalidCatalog(_))));
    }

    #[test]
    fn validation_rejects_empty_catalog() {
        let catalog = ProductCatalog { products: vec![] };
        assert!(catalog.validate().is_err());
    }

    #[test]
    fn production_codes_follow_the_epoch() {
        let c = catalog();
        let rev1 = c.production_code_frame(2006).unwrap();
        assert_eq!(rev1.height(), 1);
        let rev2 = c.production_code_frame(2009).unwrap();
        assert_eq!(rev2.height(), 2);
        let none = c.production_code_frame(1990).unwrap();
        assert_eq!(none.height(), 0);
    }

    #[test]
    fn trade_expansion_normalizes_and_fans_out() {
        let c = catalog();
        let observed = vec!["84182100".to_string(), "85287111".to_string()];
        let frame = c.trade_expansion_frame(2010, &observed).unwrap();
        // 8418.21 matches, fanning out into both rev2 codes; the TV decoder
        // code matches nothing and is absent.
        assert_eq!(frame.height(), 2);
        let hs = frame.column(HS_CODE).unwrap().str().unwrap();
        assert!(hs.into_iter().flatten().all(|h| h == "84182100"));
    }

    #[test]
    fn trade_expansion_respects_epoch_year() {
        let c = catalog();
        // 8418.29 only exists in the rev2 epoch, so a 2006 request finds no
        // match even though the association exists in the catalog.
        let observed = vec!["84182900".to_string()];
        assert_eq!(c.trade_expansion_frame(2006, &observed).unwrap().height(), 0);
        assert_eq!(c.trade_expansion_frame(2010, &observed).unwrap().height(), 2);
    }

    #[test]
    fn catalog_round_trips_through_toml() {
        let raw = r#"
            [[products]]
            key = "fridge"
            name = "Household refrigerators"
            avg_piece_weight_kg = 45.0
            waste_categories = ["large_equipment"]

            [products.rates]
            current_pc = 5.0
            potential_pc = 20.0

            [[products.epochs]]
            name = "rev1"
            start_year = 1995
            end_year = 2007
            prod_codes = ["29.71.11.10"]
            hs_codes = ["8418.21"]
        "#;
        let catalog = ProductCatalog::from_toml_str(raw).unwrap();
        assert_eq!(catalog.products.len(), 1);
        assert_eq!(catalog.product("fridge").unwrap().epochs[0].end_year, 2007);
    }

    #[test]
    fn normalize_strips_punctuation() {
        assert_eq!(normalize_code("8418.69"), "841869");
        assert_eq!(normalize_code("29.71-11 10"), "29711110");
    }
}
