pub mod config;
pub mod dataset;
pub mod error;
pub mod explore;
pub mod filter;
pub mod geography;
pub mod getter;
pub mod local;
pub mod pipeline;
pub mod remote;
pub mod render;
pub mod simplify;
pub mod workbook;

pub use dataset::{Dataset, Measured, SectorRecord};
pub use filter::{apply, Outcome, Selection, View, MAX_SECTORS};
