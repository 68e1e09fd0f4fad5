use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CircError>;

#[derive(Error, Debug)]
pub enum CircError {
    #[error("Polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Missing column: {0}")]
    MissingColumn(String),

    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Invalid catalog: {0}")]
    InvalidCatalog(String),

    #[error("Catalog parse error: {0}")]
    CatalogParse(#[from] toml::de::Error),

    #[error("InvalidData: {0}")]
    InvalidData(String),

    #[error("Step '{step}' failed for year {year}: {source}")]
    Step {
        year: i32,
        step: &'static str,
        #[source]
        source: Box<CircError>,
    },

    #[error("Step '{step}' timed out for year {year} after {timeout:?}")]
    StepTimeout {
        year: i32,
        step: &'static str,
        timeout: Duration,
    },
}

impl CircError {
    /// Wrap an error with the year and step it occurred in.
    pub fn in_step(self, year: i32, step: &'static str) -> Self {
        CircError::Step {
            year,
            step,
            source: Box::new(self),
        }
    }
}
