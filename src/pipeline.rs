use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use polars::prelude::DataFrame;
use tracing::{error, info, warn};

use crate::catalog::ProductCatalog;
use crate::error::{CircError, Result};
use crate::schema::table;
use crate::store::TableStore;
use crate::{collection, indicators, merge, recovery, strategy};

/// Step names as they appear in structured errors and logs.
pub mod step {
    pub const HARMONIZE_PRODUCTION: &str = "harmonize_production";
    pub const HARMONIZE_TRADE: &str = "harmonize_trade";
    pub const MERGE: &str = "merge_fallback";
    pub const INDICATORS: &str = "indicators";
    pub const UNIT_VALUES: &str = "unit_values";
    pub const AGGREGATES: &str = "aggregates";
    pub const RECOVERY: &str = "material_recovery";
    pub const COLLECTION: &str = "collection_rates";
    pub const STRATEGY: &str = "strategy";
    pub const WRITE: &str = "write";
    pub const CLEANUP: &str = "cleanup";
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Upper bound on each step's transform. None runs steps inline.
    pub timeout: Option<Duration>,
    /// Retain the year's intermediate tables instead of dropping them.
    pub keep_intermediate: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            keep_intermediate: false,
        }
    }
}

#[derive(Debug)]
pub struct YearReport {
    pub year: i32,
    /// (table name, row count) per table written, in write order.
    pub table_rows: Vec<(String, usize)>,
}

#[derive(Debug)]
pub struct YearOutcome {
    pub year: i32,
    pub result: Result<YearReport>,
}

#[derive(Debug)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<YearOutcome>,
}

impl RunReport {
    pub fn failed_years(&self) -> Vec<i32> {
        self.outcomes
            .iter()
            .filter(|o| o.result.is_err())
            .map(|o| o.year)
            .collect()
    }

    pub fn is_success(&self) -> bool {
        self.failed_years().is_empty()
    }
}

/// Sequences the per-year steps, owns table (re)creation and cleanup.
///
/// Each year's output tables are dropped and rebuilt whole, so re-running a
/// year is idempotent. Years fail independently; there is no automatic
/// retry, the caller decides what to re-run.
pub struct Pipeline {
    source: TableStore,
    dest: TableStore,
    catalog: ProductCatalog,
    options: PipelineOptions,
}

impl Pipeline {
    /// Catalog validation happens here, before any year is processed; an
    /// inconsistent catalog never starts a run.
    pub fn new(
        source: TableStore,
        dest: TableStore,
        catalog: ProductCatalog,
        options: PipelineOptions,
    ) -> Result<Self> {
        catalog.validate()?;
        Ok(Self {
            source,
            dest,
            catalog,
            options,
        })
    }

    /// Process a set of years sequentially, continuing past per-year
    /// failures.
    pub fn process_years(&self, years: impl IntoIterator<Item = i32>) -> RunReport {
        let started_at = Utc::now();
        let outcomes = years
            .into_iter()
            .map(|year| {
                let result = self.process_year(year);
                if let Err(e) = &result {
                    error!(year, error = %e, "year failed");
                }
                YearOutcome { year, result }
            })
            .collect();
        RunReport {
            started_at,
            finished_at: Utc::now(),
            outcomes,
        }
    }

    /// Run the full step sequence for one year.
    pub fn process_year(&self, year: i32) -> Result<YearReport> {
        info!(year, "processing year");
        let mut report = YearReport {
            year,
            table_rows: Vec::new(),
        };

        // Harmonize production. A missing raw table is a warning; the
        // harmonized side is empty and the merge proceeds one-sided.
        let production_raw = self
            .source
            .read_csv_opt(&table::qualified(table::PRODUCTION_RAW, year))
            .map_err(|e| e.in_step(year, step::HARMONIZE_PRODUCTION))?;
        let production = match production_raw {
            Some(raw) => {
                let catalog = self.catalog.clone();
                self.run_step(year, step::HARMONIZE_PRODUCTION, move || {
                    merge::harmonize_production(raw, &catalog, year)
                })?
            }
            None => {
                warn!(year, "production input missing; harmonized production is empty");
                merge::empty_production_harmonized()
                    .map_err(|e| e.in_step(year, step::HARMONIZE_PRODUCTION))?
            }
        };
        self.write_table(&mut report, table::PRODUCTION_HARMONIZED, year, production.clone())?;

        // Harmonize trade.
        let trade_raw = self
            .source
            .read_csv_opt(&table::qualified(table::TRADE_RAW, year))
            .map_err(|e| e.in_step(year, step::HARMONIZE_TRADE))?;
        let trade = match trade_raw {
            Some(raw) => {
                let catalog = self.catalog.clone();
                self.run_step(year, step::HARMONIZE_TRADE, move || {
                    merge::harmonize_trade(raw, &catalog, year)
                })?
            }
            None => {
                warn!(year, "trade input missing; harmonized trade is empty");
                merge::empty_trade_harmonized()
                    .map_err(|e| e.in_step(year, step::HARMONIZE_TRADE))?
            }
        };
        self.write_table(&mut report, table::TRADE_HARMONIZED, year, trade.clone())?;

        // Merge and fallback.
        let merged = self.run_step(year, step::MERGE, move || {
            merge::merge_with_fallback(production, trade, year)
        })?;
        self.write_table(&mut report, table::PRODTRADE, year, merged.clone())?;

        // Main indicator table with data-quality flags.
        let main = self.run_step(year, step::INDICATORS, move || {
            indicators::build_indicators(merged)
        })?;
        self.write_table(&mut report, table::INDICATORS, year, main.clone())?;

        // Unit values.
        let uv = {
            let main = main.clone();
            self.run_step(year, step::UNIT_VALUES, move || indicators::unit_values(&main))?
        };
        self.write_table(&mut report, table::UNIT_VALUES, year, uv)?;

        // Country and product aggregates.
        let (by_geo, by_product) = {
            let main = main.clone();
            self.run_step(year, step::AGGREGATES, move || {
                Ok((
                    indicators::geo_aggregate(&main)?,
                    indicators::product_aggregate(&main)?,
                ))
            })?
        };
        self.write_table(&mut report, table::INDICATORS_GEO, year, by_geo)?;
        self.write_table(&mut report, table::INDICATORS_PRODUCT, year, by_product)?;

        // Material composition and recovery rates.
        let flows = self
            .source
            .read_csv_opt(table::MASS_BALANCE)
            .map_err(|e| e.in_step(year, step::RECOVERY))?;
        let recovered = {
            let catalog = self.catalog.clone();
            self.run_step(year, step::RECOVERY, move || {
                recovery::build_recovery(flows, &catalog, year)
            })?
        };
        self.write_table(
            &mut report,
            table::MATERIAL_COMPOSITION,
            year,
            recovered.composition.clone(),
        )?;
        self.write_table(
            &mut report,
            table::MATERIAL_RECOVERY,
            year,
            recovered.rates.clone(),
        )?;

        // Collection rates.
        let stats = self
            .source
            .read_csv_opt(table::COLLECTION)
            .map_err(|e| e.in_step(year, step::COLLECTION))?;
        let collected = {
            let catalog = self.catalog.clone();
            self.run_step(year, step::COLLECTION, move || {
                collection::build_collection(stats, &catalog, year)
            })?
        };
        self.write_table(&mut report, table::COLLECTION_RATES, year, collected.clone())?;

        // Strategy scenarios.
        let strategies = {
            let catalog = self.catalog.clone();
            let rates = recovered.rates;
            self.run_step(year, step::STRATEGY, move || {
                strategy::build_strategy(&main, &collected, &rates, &catalog, year)
            })?
        };
        self.write_table(&mut report, table::STRATEGY, year, strategies)?;

        // Cleanup of intermediate state.
        if !self.options.keep_intermediate {
            for stem in [table::PRODUCTION_HARMONIZED, table::TRADE_HARMONIZED] {
                self.dest
                    .drop_table(&table::qualified(stem, year))
                    .map_err(|e| e.in_step(year, step::CLEANUP))?;
            }
        }

        info!(year, tables = report.table_rows.len(), "year complete");
        Ok(report)
    }

    fn write_table(
        &self,
        report: &mut YearReport,
        stem: &str,
        year: i32,
        mut df: DataFrame,
    ) -> Result<()> {
        let name = table::qualified(stem, year);
        let rows = df.height();
        self.dest
            .write(&name, &mut df)
            .map_err(|e| e.in_step(year, step::WRITE))?;
        report.table_rows.push((name, rows));
        Ok(())
    }

    /// Run one step's transform, bounded by the configured timeout.
    ///
    /// With a timeout the transform runs on a worker thread; on expiry the
    /// worker is left detached and its eventual result is discarded.
    fn run_step<T, F>(&self, year: i32, step_name: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        match self.options.timeout {
            None => f().map_err(|e| e.in_step(year, step_name)),
            Some(timeout) => {
                let (tx, rx) = mpsc::channel();
                thread::Builder::new()
                    .name(format!("circkit-{step_name}"))
                    .spawn(move || {
                        let _ = tx.send(f());
                    })?;
                match rx.recv_timeout(timeout) {
                    Ok(result) => result.map_err(|e| e.in_step(year, step_name)),
                    Err(mpsc::RecvTimeoutError::Timeout) => Err(CircError::StepTimeout {
                        year,
                        step: step_name,
                        timeout,
                    }),
                    Err(mpsc::RecvTimeoutError::Disconnected) => Err(CircError::InvalidData(
                        "step worker terminated without a result".into(),
                    )
                    .in_step(year, step_name)),
                }
            }
        }
    }
}
