use std::collections::HashSet;

use census::{Hierarchy, Level, SectorCode};
use geo::MultiPolygon;
use polars::prelude::*;
use tracing::{debug, info};

use crate::{
    error::DataError,
    geography::{GeoLayer, ROW_COLUMN},
    getter::Getter,
    workbook::{required_column, Dictionary, Measurement, Workbook},
};

/// Suffix given to data-sheet columns whose name is already used by the geography layer.
pub const DATA_SUFFIX: &str = "_data";

#[derive(Clone, Debug)]
pub struct SectorRecord {
    pub code: SectorCode,
    pub hierarchy: Hierarchy,
    pub geometry: MultiPolygon<f64>,
    // Row of the merged frame.
    index: usize,
}

impl SectorRecord {
    pub fn index(&self) -> usize {
        self.index
    }
}

/// Geography joined with the data sheet. Built once, never mutated afterwards.
pub struct Dataset {
    frame: DataFrame,
    records: Vec<SectorRecord>,
    dictionary: Dictionary,
    key: String,
}

impl Dataset {
    /// Fetches both inputs from `getter` and joins them on `key`.
    pub async fn load<G: Getter + ?Sized>(getter: &G, key: &str) -> anyhow::Result<Self> {
        let geography = getter.geography().await?;
        let workbook = getter.workbook().await?;
        Ok(Self::merge(geography, workbook, key)?)
    }

    /// Left join keeping every geographic sector. Fails if `key` or any hierarchy column is absent.
    pub fn merge(geography: GeoLayer, workbook: Workbook, key: &str) -> Result<Self, DataError> {
        let geo_frame = geography.attribute_frame()?;
        required_column(&geo_frame, key)?;
        let mut data = workbook.data;
        required_column(&data, key)?;

        let geo_names: HashSet<&str> = geo_frame.get_column_names().into_iter().collect();
        let collisions: Vec<String> = data
            .get_column_names()
            .into_iter()
            .filter(|name| *name != key && geo_names.contains(name))
            .map(str::to_string)
            .collect();
        for name in &collisions {
            data.rename(name, &format!("{name}{DATA_SUFFIX}"))?;
        }
        if !collisions.is_empty() {
            debug!(?collisions, "renamed colliding data columns");
        }

        let frame = geo_frame.join(&data, [key], [key], JoinType::Left.into())?;
        for level in Level::ALL {
            required_column(&frame, level.column())?;
        }

        let geometries = geography.into_geometries();
        let rows = frame.column(ROW_COLUMN)?.u32()?;
        let codes = frame.column(key)?.str()?;
        let names = Level::ALL
            .iter()
            .map(|level| -> Result<_, DataError> {
                Ok((*level, frame.column(level.column())?.str()?))
            })
            .collect::<Result<Vec<_>, DataError>>()?;

        let mut records = Vec::with_capacity(frame.height());
        for index in 0..frame.height() {
            let mut hierarchy = Hierarchy::default();
            for (level, column) in &names {
                hierarchy.set(*level, column.get(index).map(str::to_string));
            }
            let geometry = rows
                .get(index)
                .and_then(|row| geometries.get(row as usize))
                .cloned()
                .unwrap_or_else(|| MultiPolygon::new(Vec::new()));
            records.push(SectorRecord {
                code: codes.get(index).unwrap_or_default().to_string(),
                hierarchy,
                geometry,
                index,
            });
        }

        info!(
            sectors = records.len(),
            columns = frame.width(),
            key,
            "merged geography with data sheet"
        );
        Ok(Self {
            frame,
            records,
            dictionary: workbook.dictionary,
            key: key.to_string(),
        })
    }

    pub fn records(&self) -> &[SectorRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn dictionary(&self) -> &Dictionary {
        &self.dictionary
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn columns(&self) -> Vec<String> {
        self.frame
            .get_column_names()
            .into_iter()
            .filter(|name| *name != ROW_COLUMN)
            .map(str::to_string)
            .collect()
    }

    /// Text of `column` for every record, in record order.
    pub fn text_column(&self, column: &str) -> Result<Vec<Option<String>>, DataError> {
        let values = required_column(&self.frame, column)?.cast(&DataType::String)?;
        let values = values.str()?;
        Ok(values.into_iter().map(|v| v.map(str::to_string)).collect())
    }

    /// Reads a measurement column as numbers. Missing or non-numeric cells become 0.
    pub fn measure(&self, measurement: &Measurement) -> Result<Measured<'_>, DataError> {
        let series = self
            .frame
            .column(&measurement.column)
            .map_err(|_| DataError::UnknownColumn(measurement.column.clone()))?;
        let numbers = series.cast(&DataType::Float64)?;
        let values: Vec<f64> = numbers
            .f64()?
            .into_iter()
            .map(|v| match v {
                Some(x) if !x.is_nan() => x,
                _ => 0.0,
            })
            .collect();
        Ok(Measured {
            dataset: self,
            measurement: measurement.clone(),
            values,
        })
    }
}

/// A dataset paired with the numeric values of one measurement.
pub struct Measured<'a> {
    dataset: &'a Dataset,
    measurement: Measurement,
    values: Vec<f64>,
}

impl<'a> Measured<'a> {
    pub fn dataset(&self) -> &'a Dataset {
        self.dataset
    }

    pub fn measurement(&self) -> &Measurement {
        &self.measurement
    }

    pub fn value(&self, record: &SectorRecord) -> f64 {
        self.values.get(record.index).copied().unwrap_or(0.0)
    }

    pub fn sum<'r>(&self, records: impl IntoIterator<Item = &'r SectorRecord>) -> f64 {
        records.into_iter().map(|r| self.value(r)).sum()
    }
}
