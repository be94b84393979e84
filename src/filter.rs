use std::collections::{BTreeMap, BTreeSet};

use census::{Choice, Level};
use polars::prelude::{DataFrame, NamedFrom, PolarsResult, Series};
use tracing::{debug, warn};

use crate::{
    dataset::{Dataset, Measured, SectorRecord},
    error::FilterError,
};

/// Largest active set that will be rendered.
pub const MAX_SECTORS: usize = 5200;

/// The choice at each level. A level can only be selected while its parent is, and clearing a
/// level clears everything below it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Selection {
    region: Choice<String>,
    municipality: Choice<String>,
    district: Choice<String>,
    neighborhood: Choice<String>,
}

impl Selection {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: Choice::Selected(region.into()),
            ..Self::default()
        }
    }

    pub fn from_names(
        region: Option<String>,
        municipality: Option<String>,
        district: Option<String>,
        neighborhood: Option<String>,
    ) -> Result<Self, FilterError> {
        let mut selection = Self::default();
        let names = [region, municipality, district, neighborhood];
        for (level, name) in Level::ALL.into_iter().zip(names) {
            if let Some(name) = name {
                selection.select(level, name)?;
            }
        }
        Ok(selection)
    }

    pub fn get(&self, level: Level) -> &Choice<String> {
        match level {
            Level::Region => &self.region,
            Level::Municipality => &self.municipality,
            Level::District => &self.district,
            Level::Neighborhood => &self.neighborhood,
        }
    }

    fn slot(&mut self, level: Level) -> &mut Choice<String> {
        match level {
            Level::Region => &mut self.region,
            Level::Municipality => &mut self.municipality,
            Level::District => &mut self.district,
            Level::Neighborhood => &mut self.neighborhood,
        }
    }

    /// Selects `name` at `level`. Picking a different value than before clears the levels below.
    pub fn select(&mut self, level: Level, name: impl Into<String>) -> Result<(), FilterError> {
        if let Some(parent) = level.parent() {
            if !self.get(parent).is_selected() {
                return Err(FilterError::ParentUnselected { level, parent });
            }
        }
        let choice = Choice::Selected(name.into());
        if *self.get(level) != choice {
            *self.slot(level) = choice;
            for below in level.descendants() {
                *self.slot(below) = Choice::Unselected;
            }
        }
        Ok(())
    }

    /// Unselects `level` and every level below it.
    pub fn clear(&mut self, level: Level) {
        *self.slot(level) = Choice::Unselected;
        for below in level.descendants() {
            *self.slot(below) = Choice::Unselected;
        }
    }

    pub fn deepest(&self) -> Option<Level> {
        Level::ALL
            .into_iter()
            .take_while(|level| self.get(*level).is_selected())
            .last()
    }

    pub fn name(&self, level: Level) -> Option<&str> {
        self.get(level).selected().map(String::as_str)
    }
}

/// Records matching every selected level down to and including `through`, stopping at the first
/// unselected level.
fn narrowed<'a>(
    dataset: &'a Dataset,
    selection: &Selection,
    through: Level,
) -> Vec<&'a SectorRecord> {
    let mut records: Vec<&SectorRecord> = dataset.records().iter().collect();
    for level in Level::ALL.into_iter().take_while(|l| *l <= through) {
        let Choice::Selected(name) = selection.get(level) else {
            break;
        };
        records.retain(|r| r.hierarchy.name(level) == Some(name.as_str()));
        debug!(%level, %name, remaining = records.len(), "narrowed selection");
    }
    records
}

pub fn active_records<'a>(dataset: &'a Dataset, selection: &Selection) -> Vec<&'a SectorRecord> {
    narrowed(dataset, selection, Level::Neighborhood)
}

fn distinct_names<'a>(
    records: impl IntoIterator<Item = &'a SectorRecord>,
    level: Level,
) -> Vec<String> {
    records
        .into_iter()
        .filter_map(|r| r.hierarchy.name(level))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(str::to_string)
        .collect()
}

pub fn regions(dataset: &Dataset) -> Vec<String> {
    distinct_names(dataset.records(), Level::Region)
}

/// Sorted names available at `level`, drawn from the records of its selected parent. Empty when
/// the parent is unselected.
pub fn options(dataset: &Dataset, selection: &Selection, level: Level) -> Vec<String> {
    match level.parent() {
        None => regions(dataset),
        Some(parent) if selection.get(parent).is_selected() => {
            distinct_names(narrowed(dataset, selection, parent), level)
        }
        Some(_) => Vec::new(),
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct AggregateRow {
    pub name: String,
    pub total: f64,
}

impl AggregateRow {
    /// `"Name (total)"`, total truncated to an integer.
    pub fn label(&self) -> String {
        format!("{} ({})", self.name, self.total.trunc() as i64)
    }
}

/// Text before the first `" ("` of a municipality option label.
pub fn parse_municipality_label(label: &str) -> &str {
    label.split(" (").next().unwrap_or(label)
}

/// Sums the measurement per `level` name. Records without a name at `level` are skipped. Rows are
/// sorted by total, largest first; ties keep ascending name order.
pub fn aggregate<'a>(
    measured: &Measured,
    records: impl IntoIterator<Item = &'a SectorRecord>,
    level: Level,
) -> Vec<AggregateRow> {
    let mut totals: BTreeMap<&str, f64> = BTreeMap::new();
    for record in records {
        if let Some(name) = record.hierarchy.name(level) {
            *totals.entry(name).or_default() += measured.value(record);
        }
    }
    let mut rows: Vec<AggregateRow> = totals
        .into_iter()
        .map(|(name, total)| AggregateRow {
            name: name.to_string(),
            total,
        })
        .collect();
    rows.sort_by(|a, b| b.total.total_cmp(&a.total));
    rows
}

pub fn municipality_options(measured: &Measured, region: &str) -> Vec<AggregateRow> {
    let selection = Selection::new(region);
    let records = narrowed(measured.dataset(), &selection, Level::Region);
    aggregate(measured, records, Level::Municipality)
}

/// Children of one selected area with their totals.
#[derive(Clone, Debug, PartialEq)]
pub struct AggregateTable {
    pub level: Level,
    /// Name of the selected area whose children are listed.
    pub parent: String,
    pub column: String,
    pub rows: Vec<AggregateRow>,
}

impl AggregateTable {
    pub fn total(&self) -> f64 {
        self.rows.iter().map(|r| r.total).sum()
    }

    /// Two columns: the level's attribute name and the measurement column.
    pub fn to_frame(&self) -> PolarsResult<DataFrame> {
        let names: Vec<&str> = self.rows.iter().map(|r| r.name.as_str()).collect();
        let totals: Vec<f64> = self.rows.iter().map(|r| r.total).collect();
        DataFrame::new(vec![
            Series::new(self.level.column(), names),
            Series::new(&self.column, totals),
        ])
    }
}

#[derive(Debug)]
pub struct View<'a> {
    pub selection: Selection,
    pub records: Vec<&'a SectorRecord>,
    pub districts: AggregateTable,
    /// Neighborhoods of the selected district, when one is selected.
    pub neighborhoods: Option<AggregateTable>,
}

#[derive(Debug)]
pub enum Outcome<'a> {
    /// No municipality selected yet; nothing to map. Carries the municipalities to pick from.
    Idle { municipalities: Vec<AggregateRow> },
    Ready(View<'a>),
}

pub fn check_ceiling(count: usize) -> Result<(), FilterError> {
    if count > MAX_SECTORS {
        warn!(count, limit = MAX_SECTORS, "selection exceeds sector limit");
        return Err(FilterError::TooManySectors {
            count,
            limit: MAX_SECTORS,
        });
    }
    Ok(())
}

fn validate(dataset: &Dataset, selection: &Selection) -> Result<(), FilterError> {
    for level in Level::ALL {
        let Choice::Selected(name) = selection.get(level) else {
            break;
        };
        if !options(dataset, selection, level).contains(name) {
            return Err(FilterError::UnknownName {
                level,
                name: name.clone(),
            });
        }
    }
    Ok(())
}

/// Runs one interaction: validates the selection, narrows the dataset and builds the aggregate
/// tables.
pub fn apply<'a>(
    measured: &Measured<'a>,
    selection: &Selection,
) -> Result<Outcome<'a>, FilterError> {
    let dataset = measured.dataset();
    validate(dataset, selection)?;

    let Some(municipality) = selection.name(Level::Municipality) else {
        let municipalities = selection
            .name(Level::Region)
            .map(|region| municipality_options(measured, region))
            .unwrap_or_default();
        return Ok(Outcome::Idle { municipalities });
    };

    let records = active_records(dataset, selection);
    check_ceiling(records.len())?;

    let column = measured.measurement().column.clone();
    let districts = AggregateTable {
        level: Level::District,
        parent: municipality.to_string(),
        column: column.clone(),
        rows: aggregate(
            measured,
            narrowed(dataset, selection, Level::Municipality),
            Level::District,
        ),
    };
    let neighborhoods = selection.name(Level::District).map(|district| AggregateTable {
        level: Level::Neighborhood,
        parent: district.to_string(),
        column,
        rows: aggregate(
            measured,
            narrowed(dataset, selection, Level::District),
            Level::Neighborhood,
        ),
    });

    Ok(Outcome::Ready(View {
        selection: selection.clone(),
        records,
        districts,
        neighborhoods,
    }))
}
