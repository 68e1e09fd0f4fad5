use std::fs;
use std::path::{Path, PathBuf};

use polars::prelude::*;

use crate::error::{CircError, Result};

/// A directory of named tables: CSV for raw inputs, parquet for outputs.
///
/// Tables are whole files, so "drop and recreate" is a file replacement and
/// re-running a year is naturally idempotent. Writes go through a temporary
/// file plus rename, keeping readers from ever seeing a half-written table.
#[derive(Debug, Clone)]
pub struct TableStore {
    root: PathBuf,
}

impl TableStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn csv_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.csv"))
    }

    fn parquet_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.parquet"))
    }

    /// Read a CSV table with every column as String dtype; numeric coercion
    /// is the pipeline's job. Column names are trimmed.
    pub fn read_csv(&self, name: &str) -> Result<DataFrame> {
        let path = self.csv_path(name);
        if !path.is_file() {
            return Err(CircError::TableNotFound(name.to_string()));
        }
        let mut df = CsvReadOptions::default()
            .with_has_header(true)
            .with_infer_schema_length(Some(0)) // all columns as String
            .try_into_reader_with_file_path(Some(path))?
            .finish()?;

        let trimmed: Vec<String> = df
            .get_column_names_str()
            .iter()
            .map(|c| c.trim().to_string())
            .collect();
        df.set_column_names(trimmed.as_slice())?;
        Ok(df)
    }

    /// Like [`read_csv`], but an absent table is `None` rather than an
    /// error; missing raw inputs are a warning condition, not a failure.
    pub fn read_csv_opt(&self, name: &str) -> Result<Option<DataFrame>> {
        match self.read_csv(name) {
            Ok(df) => Ok(Some(df)),
            Err(CircError::TableNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn read_parquet(&self, name: &str) -> Result<DataFrame> {
        let path = self.parquet_path(name);
        if !path.is_file() {
            return Err(CircError::TableNotFound(name.to_string()));
        }
        let file = fs::File::open(path)?;
        Ok(ParquetReader::new(file).finish()?)
    }

    /// Replace the named table with `df`, whole.
    pub fn write(&self, name: &str, df: &mut DataFrame) -> Result<()> {
        let tmp = self.root.join(format!("{name}.parquet.tmp"));
        let file = fs::File::create(&tmp)?;
        ParquetWriter::new(file).finish(df)?;
        fs::rename(&tmp, self.parquet_path(name))?;
        Ok(())
    }

    /// Remove the named table if present; true when something was dropped.
    pub fn drop_table(&self, name: &str) -> Result<bool> {
        let path = self.parquet_path(name);
        if path.is_file() {
            fs::remove_file(path)?;
            return Ok(true);
        }
        Ok(false)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.parquet_path(name).is_file()
    }
}

pub fn require_columns(df: &DataFrame, required: &[&str]) -> Result<()> {
    for &col_name in required {
        if df.column(col_name).is_err() {
            return Err(CircError::MissingColumn(col_name.to_string()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_read_and_drop() {
        let dir = tempfile::tempdir().unwrap();
        let store = TableStore::new(dir.path()).unwrap();

        let mut df = df!("a" => &[1.0, 2.0], "b" => &["x", "y"]).unwrap();
        store.write("t_2020", &mut df).unwrap();
        assert!(store.exists("t_2020"));

        let back = store.read_parquet("t_2020").unwrap();
        assert!(back.equals(&df));

        assert!(store.drop_table("t_2020").unwrap());
        assert!(!store.exists("t_2020"));
        assert!(!store.drop_table("t_2020").unwrap());
    }

    #[test]
    fn absent_csv_is_none_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = TableStore::new(dir.path()).unwrap();
        assert!(store.read_csv_opt("nothing_here").unwrap().is_none());
        assert!(matches!(
            store.read_csv("nothing_here"),
            Err(CircError::TableNotFound(_))
        ));
    }

    #[test]
    fn csv_columns_arrive_as_strings() {
        let dir = tempfile::tempdir().unwrap();
        let store = TableStore::new(dir.path()).unwrap();
        fs::write(dir.path().join("raw.csv"), "code, value\nA,1.5\nB,:\n").unwrap();

        let df = store.read_csv("raw").unwrap();
        assert_eq!(df.get_column_names_str(), &["code", "value"]);
        assert_eq!(df.column("value").unwrap().dtype(), &DataType::String);
    }

    #[test]
    fn require_columns_reports_the_missing_one() {
        let df = df!("a" => &[1]).unwrap();
        let err = require_columns(&df, &["a", "zz"]).unwrap_err();
        assert!(matches!(err, CircError::MissingColumn(c) if c == "zz"));
    }
}
