use std::{io::Cursor, path::Path};

use anyhow::Context;
use calamine::{open_workbook_from_rs, Data, Range, Reader, Xlsx};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;
use unicode_normalization::UnicodeNormalization;

use crate::error::DataError;

const DESCRIPTION_COLUMN: &str = "descricao";
const VARIABLE_COLUMN: &str = "variavel";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SheetNames {
    pub data: String,
    pub dictionary: String,
}

impl Default for SheetNames {
    fn default() -> Self {
        Self {
            data: "DataMG".to_string(),
            dictionary: "dictionary".to_string(),
        }
    }
}

/// A measurement the user can map: its human-readable description and the data column holding it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Measurement {
    pub description: String,
    pub column: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Dictionary {
    entries: Vec<Measurement>,
}

impl Dictionary {
    /// Later rows with a repeated description replace the column of the earlier one but keep its
    /// position.
    pub fn from_entries<I, D, C>(entries: I) -> Self
    where
        I: IntoIterator<Item = (D, C)>,
        D: Into<String>,
        C: Into<String>,
    {
        let mut dictionary = Self::default();
        for (description, column) in entries {
            let description = description.into();
            let column = column.into();
            match dictionary
                .entries
                .iter_mut()
                .find(|m| m.description == description)
            {
                Some(existing) => existing.column = column,
                None => dictionary.entries.push(Measurement {
                    description,
                    column,
                }),
            }
        }
        dictionary
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Measurement> {
        self.entries.iter()
    }

    pub fn column(&self, description: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|m| m.description == description)
            .map(|m| m.column.as_str())
    }

    /// Looks a variable up by description first, then by column identifier.
    pub fn resolve(&self, key: &str) -> Result<Measurement, DataError> {
        self.entries
            .iter()
            .find(|m| m.description == key)
            .or_else(|| self.entries.iter().find(|m| m.column == key))
            .cloned()
            .ok_or_else(|| DataError::UnknownVariable(key.to_string()))
    }
}

#[derive(Debug)]
pub struct Workbook {
    pub data: DataFrame,
    pub dictionary: Dictionary,
}

impl Workbook {
    pub fn from_path(path: &Path, sheets: &SheetNames) -> anyhow::Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read workbook {}", path.display()))?;
        Self::from_bytes(bytes, sheets)
    }

    pub fn from_bytes(bytes: Vec<u8>, sheets: &SheetNames) -> anyhow::Result<Self> {
        let mut xlsx: Xlsx<_> =
            open_workbook_from_rs(Cursor::new(bytes)).context("failed to open workbook")?;

        let data_range = xlsx
            .worksheet_range(&sheets.data)
            .with_context(|| format!("failed to read sheet {}", sheets.data))?;
        let data = range_to_frame(&data_range, |name| name.to_string())?;

        let dict_range = xlsx
            .worksheet_range(&sheets.dictionary)
            .with_context(|| format!("failed to read sheet {}", sheets.dictionary))?;
        let dict_frame = range_to_frame(&dict_range, normalize_header)?;
        let dictionary = dictionary_from_frame(&dict_frame)?;

        info!(
            rows = data.height(),
            columns = data.width(),
            variables = dictionary.len(),
            "loaded workbook"
        );
        Ok(Self { data, dictionary })
    }
}

/// Trims, lower-cases and strips accents from a header name ("Descrição " -> "descricao").
pub fn normalize_header(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .nfkd()
        .filter(char::is_ascii)
        .collect()
}

/// Text rendering of a cell. Integral numbers print without a fractional part so numeric sector
/// codes match their text form in the geography layer.
pub(crate) fn cell_text(cell: &Data) -> Option<String> {
    match cell {
        Data::Empty | Data::Error(_) => None,
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => Some(s.clone()),
        Data::Int(i) => Some(i.to_string()),
        Data::Float(f) => Some(number_text(*f)),
        Data::Bool(b) => Some(b.to_string()),
        Data::DateTime(dt) => Some(number_text(dt.as_f64())),
    }
}

pub(crate) fn number_text(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e17 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

fn range_to_frame(
    range: &Range<Data>,
    header_name: impl Fn(&str) -> String,
) -> Result<DataFrame, DataError> {
    let mut rows = range.rows();
    let Some(header) = rows.next() else {
        return Ok(DataFrame::empty());
    };
    let names: Vec<String> = header
        .iter()
        .enumerate()
        .map(|(i, cell)| match cell_text(cell) {
            Some(name) => header_name(&name),
            None => format!("column_{i}"),
        })
        .collect();

    let mut columns: Vec<Vec<Option<String>>> = vec![Vec::new(); names.len()];
    for row in rows {
        for (i, column) in columns.iter_mut().enumerate() {
            column.push(row.get(i).and_then(cell_text));
        }
    }

    let series = names
        .iter()
        .zip(columns)
        .map(|(name, values)| Series::new(name, values))
        .collect();
    Ok(DataFrame::new(series)?)
}

pub(crate) fn dictionary_from_frame(frame: &DataFrame) -> Result<Dictionary, DataError> {
    let descriptions = required_column(frame, DESCRIPTION_COLUMN)?.str()?;
    let variables = required_column(frame, VARIABLE_COLUMN)?.str()?;
    let entries = descriptions
        .into_iter()
        .zip(variables)
        .filter_map(|(d, v)| Some((d?.to_string(), v?.to_string())));
    Ok(Dictionary::from_entries(entries))
}

pub(crate) fn required_column<'a>(
    frame: &'a DataFrame,
    name: &str,
) -> Result<&'a Series, DataError> {
    frame.column(name).map_err(|_| DataError::MissingColumn {
        column: name.to_string(),
        available: frame
            .get_column_names()
            .into_iter()
            .map(str::to_string)
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_normalization_strips_accents() {
        assert_eq!(normalize_header("  Descrição "), "descricao");
        assert_eq!(normalize_header("VARIÁVEL"), "variavel");
        assert_eq!(normalize_header("plain"), "plain");
    }

    #[test]
    fn numeric_codes_print_without_fraction() {
        assert_eq!(
            cell_text(&Data::Float(310010405000001.0)).as_deref(),
            Some("310010405000001")
        );
        assert_eq!(cell_text(&Data::Float(1.5)).as_deref(), Some("1.5"));
        assert_eq!(cell_text(&Data::Int(42)).as_deref(), Some("42"));
        assert_eq!(cell_text(&Data::Empty), None);
    }

    #[test]
    fn repeated_descriptions_keep_first_position() {
        let dictionary = Dictionary::from_entries([
            ("Moradores", "V0001"),
            ("Domicílios", "V0002"),
            ("Moradores", "V0003"),
        ]);
        assert_eq!(dictionary.len(), 2);
        assert_eq!(dictionary.column("Moradores"), Some("V0003"));
        let order: Vec<_> = dictionary.iter().map(|m| m.description.as_str()).collect();
        assert_eq!(order, vec!["Moradores", "Domicílios"]);
    }

    #[test]
    fn resolve_accepts_description_or_column() {
        let dictionary = Dictionary::from_entries([("Moradores", "V0001")]);
        assert_eq!(dictionary.resolve("Moradores").unwrap().column, "V0001");
        assert_eq!(dictionary.resolve("V0001").unwrap().description, "Moradores");
        assert!(matches!(
            dictionary.resolve("nope"),
            Err(DataError::UnknownVariable(_))
        ));
    }

    #[test]
    fn dictionary_frame_needs_both_columns() {
        let frame = DataFrame::new(vec![
            Series::new("descricao", vec![Some("Moradores"), None]),
            Series::new("variavel", vec![Some("V0001"), Some("V0002")]),
        ])
        .unwrap();
        let dictionary = dictionary_from_frame(&frame).unwrap();
        assert_eq!(dictionary.len(), 1);

        let missing = DataFrame::new(vec![Series::new("descricao", vec!["Moradores"])]).unwrap();
        match dictionary_from_frame(&missing) {
            Err(DataError::MissingColumn { column, available }) => {
                assert_eq!(column, "variavel");
                assert_eq!(available, vec!["descricao".to_string()]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
