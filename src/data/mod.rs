//! Tabular datasets attached to a model
//!
//! The builder never interprets dataset values beyond column names and
//! their declared types. Column types decide which columns are offered as
//! covariates and which as occasions for IOV.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::error::BuilderError;

/// Declared role of a dataset column
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Id,
    /// Independent variable (time)
    Idv,
    /// Dependent variable (observations)
    Dv,
    Dose,
    Covariate,
    Occasion,
    #[default]
    Unknown,
}

impl ColumnType {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Idv => "idv",
            Self::Dv => "dv",
            Self::Dose => "dose",
            Self::Covariate => "covariate",
            Self::Occasion => "occasion",
            Self::Unknown => "unknown",
        }
    }

    /// Guess a column type from a conventional header
    pub fn infer(header: &str) -> Self {
        match header.to_uppercase().as_str() {
            "ID" => Self::Id,
            "TIME" | "TAD" => Self::Idv,
            "DV" => Self::Dv,
            "AMT" | "DOSE" => Self::Dose,
            "OCC" | "OCCASION" => Self::Occasion,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Column type descriptors for a dataset, in column order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DataInfo {
    columns: Vec<(String, ColumnType)>,
}

impl DataInfo {
    /// Infer descriptors from headers
    pub fn infer<S: AsRef<str>>(headers: &[S]) -> Self {
        Self {
            columns: headers
                .iter()
                .map(|h| (h.as_ref().to_string(), ColumnType::infer(h.as_ref())))
                .collect(),
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.columns.iter().any(|(n, _)| n == name)
    }

    pub fn column_type(&self, name: &str) -> Option<ColumnType> {
        self.columns
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, kind)| *kind)
    }

    /// Set the type of an existing column
    pub fn set_type(&mut self, name: &str, kind: ColumnType) -> Result<(), BuilderError> {
        let column = self
            .columns
            .iter_mut()
            .find(|(n, _)| n == name)
            .ok_or_else(|| BuilderError::Dataset(format!("no column named '{name}'")))?;
        column.1 = kind;
        Ok(())
    }

    /// Columns usable as covariates: declared covariates and untyped columns
    pub fn covariate_candidates(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|(_, kind)| matches!(kind, ColumnType::Covariate | ColumnType::Unknown))
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Columns usable as occasions: declared occasions and untyped columns
    pub fn occasion_candidates(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|(_, kind)| matches!(kind, ColumnType::Occasion | ColumnType::Unknown))
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// The first column declared as occasion
    pub fn occasion_column(&self) -> Option<&str> {
        self.columns
            .iter()
            .find(|(_, kind)| *kind == ColumnType::Occasion)
            .map(|(name, _)| name.as_str())
    }

    /// Column types that differ from what [ColumnType::infer] would guess
    pub fn overrides(&self) -> BTreeMap<String, ColumnType> {
        self.columns
            .iter()
            .filter(|(name, kind)| ColumnType::infer(name) != *kind)
            .map(|(name, kind)| (name.clone(), *kind))
            .collect()
    }
}

/// A rows × named columns dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    /// Where the dataset was read from, used when generating code
    path: Option<PathBuf>,
    info: DataInfo,
    /// `None` marks a missing cell (`.` or empty)
    rows: Vec<Vec<Option<f64>>>,
}

impl Dataset {
    /// Build a dataset from headers and rows, inferring column types
    pub fn new<S: AsRef<str>>(
        headers: &[S],
        rows: Vec<Vec<Option<f64>>>,
    ) -> Result<Self, BuilderError> {
        if let Some((i, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, r)| r.len() != headers.len())
        {
            return Err(BuilderError::Dataset(format!(
                "row {} has {} values, expected {}",
                i + 1,
                row.len(),
                headers.len()
            )));
        }
        Ok(Self {
            path: None,
            info: DataInfo::infer(headers),
            rows,
        })
    }

    /// Read a CSV dataset with a header row
    pub fn read_csv(path: impl AsRef<Path>) -> Result<Self, BuilderError> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .map_err(|e| BuilderError::Dataset(format!("{}: {}", path.display(), e)))?;
        Ok(Self::from_reader(file)?.with_path(path))
    }

    /// Read CSV from any reader; the dataset has no path until [Dataset::with_path]
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, BuilderError> {
        let mut reader = csv::ReaderBuilder::new()
            .comment(Some(b'#'))
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| BuilderError::Dataset(e.to_string()))?
            .iter()
            .map(|h| h.to_string())
            .collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| BuilderError::Dataset(e.to_string()))?;
            let row = record
                .iter()
                .map(parse_cell)
                .collect::<Result<Vec<_>, _>>()?;
            rows.push(row);
        }

        Self::new(&headers, rows)
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Replace the column type of `name`
    pub fn with_column_type(mut self, name: &str, kind: ColumnType) -> Result<Self, BuilderError> {
        self.info.set_type(name, kind)?;
        Ok(self)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn info(&self) -> &DataInfo {
        &self.info
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.info.contains(name)
    }

    pub fn nrows(&self) -> usize {
        self.rows.len()
    }

    pub fn ncols(&self) -> usize {
        self.info.columns.len()
    }

    /// Values of one column, `None` where missing
    pub fn column(&self, name: &str) -> Option<Vec<Option<f64>>> {
        let idx = self.info.columns.iter().position(|(n, _)| n == name)?;
        Some(self.rows.iter().map(|row| row[idx]).collect())
    }

    /// Distinct non-missing values of a column, in ascending order
    pub fn levels(&self, name: &str) -> Option<Vec<f64>> {
        let mut values: Vec<f64> = self.column(name)?.into_iter().flatten().collect();
        values.sort_by(|a, b| a.total_cmp(b));
        values.dedup();
        Some(values)
    }
}

fn parse_cell(value: &str) -> Result<Option<f64>, BuilderError> {
    if value.is_empty() || value == "." {
        return Ok(None);
    }
    match value.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(Some(v)),
        _ => Err(BuilderError::Dataset(format!(
            "'{value}' is not a finite number"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CSV: &str = "ID,TIME,AMT,DV,WGT,OCC\n\
                       1,0,100,.,70.5,1\n\
                       1,1,0,5.2,70.5,1\n\
                       2,0,100,.,81.0,1\n\
                       2,1,0,4.1,81.0,2\n";

    #[test]
    fn test_from_reader_infers_types() {
        let data = Dataset::from_reader(CSV.as_bytes()).unwrap();
        assert_eq!(data.nrows(), 4);
        assert_eq!(data.ncols(), 6);
        assert_eq!(data.info().column_type("TIME"), Some(ColumnType::Idv));
        assert_eq!(data.info().column_type("WGT"), Some(ColumnType::Unknown));
        assert_eq!(data.info().column_type("OCC"), Some(ColumnType::Occasion));
        assert!(data.path().is_none());
        assert_eq!(data.column("DV").unwrap()[..2], [None, Some(5.2)]);
    }

    #[test]
    fn test_candidates_follow_column_types() {
        let data = Dataset::from_reader(CSV.as_bytes())
            .unwrap()
            .with_column_type("WGT", ColumnType::Covariate)
            .unwrap();
        assert_eq!(data.info().covariate_candidates(), vec!["WGT"]);
        assert_eq!(data.info().occasion_candidates(), vec!["OCC"]);
        assert_eq!(data.info().occasion_column(), Some("OCC"));
        assert_eq!(data.info().overrides().len(), 1);
    }

    #[test]
    fn test_levels() {
        let data = Dataset::from_reader(CSV.as_bytes()).unwrap();
        assert_eq!(data.levels("OCC").unwrap(), vec![1.0, 2.0]);
        assert!(data.levels("MISSING").is_none());
    }

    #[test]
    fn test_ragged_rows_rejected() {
        let result = Dataset::new(&["ID", "TIME"], vec![vec![Some(1.0), Some(0.0)], vec![Some(1.0)]]);
        assert!(matches!(result, Err(BuilderError::Dataset(_))));
    }

    #[test]
    fn test_non_numeric_value_rejected() {
        let result = Dataset::from_reader("ID,SEX\n1,male\n".as_bytes());
        assert!(result.is_err());
        let result = Dataset::from_reader("ID,DV\n1,NaN\n".as_bytes());
        assert!(matches!(result, Err(BuilderError::Dataset(_))));
    }

    #[test]
    fn test_missing_cells_survive_json() {
        let data = Dataset::from_reader("ID,TIME,DV,AMT\n1,0,.,100\n1,1,2.0,\n".as_bytes())
            .unwrap()
            .with_path("pk.csv");
        assert_eq!(data, data.clone());
        let json = serde_json::to_string(&data).unwrap();
        let back: Dataset = serde_json::from_str(&json).unwrap();
        assert_eq!(back, data);
        assert_eq!(back.column("AMT").unwrap(), vec![Some(100.0), None]);
    }

    #[test]
    fn test_unknown_column_type_change() {
        let data = Dataset::from_reader(CSV.as_bytes()).unwrap();
        assert!(data.with_column_type("NOPE", ColumnType::Covariate).is_err());
    }
}
