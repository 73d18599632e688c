use thiserror::Error;

use crate::record::{clean_text, VacancyRecord, RAW_COLUMNS};

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("dataset '{dataset}' has no column '{column}'")]
    MissingColumn { dataset: String, column: String },
    #[error("column '{column}' has {got} values, dataset has {expected} rows")]
    LengthMismatch {
        column: String,
        expected: usize,
        got: usize,
    },
}

/// A named table of string cells. Every row is as wide as `columns`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dataset {
    name: String,
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Dataset {
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            columns,
            rows: Vec::new(),
        }
    }

    /// Snapshot table for crawled records, with every value cleaned.
    pub fn from_records(name: impl Into<String>, records: &[VacancyRecord]) -> Self {
        let mut ds = Self::new(name, RAW_COLUMNS.iter().map(|c| c.to_string()).collect());
        ds.rows = records
            .iter()
            .map(|r| r.values().iter().map(|v| clean_text(v)).collect())
            .collect();
        ds
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.column_index(column).is_some()
    }

    /// Append a row, padding short rows with empty cells and dropping extra ones.
    pub fn push_row(&mut self, mut row: Vec<String>) {
        row.resize(self.columns.len(), String::new());
        self.rows.push(row);
    }

    pub fn column(&self, column: &str) -> Result<Vec<&str>, DatasetError> {
        let idx = self.require(column)?;
        Ok(self.rows.iter().map(|r| r[idx].as_str()).collect())
    }

    #[cfg(test)]
    pub fn value(&self, row: usize, column: &str) -> Option<&str> {
        let idx = self.column_index(column)?;
        self.rows.get(row).map(|r| r[idx].as_str())
    }

    /// Overwrite `column` if present, else append it.
    pub fn set_column(&mut self, column: &str, values: Vec<String>) -> Result<(), DatasetError> {
        if values.len() != self.rows.len() {
            return Err(DatasetError::LengthMismatch {
                column: column.to_string(),
                expected: self.rows.len(),
                got: values.len(),
            });
        }
        match self.column_index(column) {
            Some(idx) => {
                for (row, v) in self.rows.iter_mut().zip(values) {
                    row[idx] = v;
                }
            }
            None => {
                self.columns.push(column.to_string());
                for (row, v) in self.rows.iter_mut().zip(values) {
                    row.push(v);
                }
            }
        }
        Ok(())
    }

    /// First row whose `column` equals `value`.
    #[cfg(test)]
    pub fn find_row(&self, column: &str, value: &str) -> Option<&[String]> {
        let idx = self.column_index(column)?;
        self.rows
            .iter()
            .find(|r| r[idx] == value)
            .map(|r| r.as_slice())
    }

    fn require(&self, column: &str) -> Result<usize, DatasetError> {
        self.column_index(column).ok_or_else(|| DatasetError::MissingColumn {
            dataset: self.name.clone(),
            column: column.to_string(),
        })
    }
}
