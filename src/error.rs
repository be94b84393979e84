use census::Level;
use polars::prelude::PolarsError;
use thiserror::Error;

/// Problems with the loaded inputs. These are fatal for the session.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("column {column} not found. Available columns: {available:?}")]
    MissingColumn {
        column: String,
        available: Vec<String>,
    },
    #[error("no measurement column named {0}")]
    UnknownColumn(String),
    #[error("no variable {0:?} in the dictionary")]
    UnknownVariable(String),
    #[error(transparent)]
    Polars(#[from] PolarsError),
}

/// Problems with a selection. None of these invalidate the loaded dataset.
#[derive(Debug, Error)]
pub enum FilterError {
    #[error("selected area contains {count} sectors, the limit is {limit}; narrow the selection")]
    TooManySectors { count: usize, limit: usize },
    #[error("cannot select a {level} while no {parent} is selected")]
    ParentUnselected { level: Level, parent: Level },
    #[error("{level} {name:?} is not one of the available options")]
    UnknownName { level: Level, name: String },
    #[error(transparent)]
    Data(#[from] DataError),
}

#[derive(Debug, Error, PartialEq)]
pub enum SimplifyError {
    #[error("tolerance {value} outside [{min}, {max}]")]
    ToleranceOutOfRange { value: f64, min: f64, max: f64 },
}
