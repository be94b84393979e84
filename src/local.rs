use std::path::PathBuf;

use async_trait::async_trait;

use crate::{
    geography::GeoLayer,
    getter::Getter,
    workbook::{SheetNames, Workbook},
};

/// Inputs already on disk.
#[derive(Clone, Debug)]
pub struct Local {
    pub geography: PathBuf,
    pub workbook: PathBuf,
    pub shapefile_member: Option<String>,
    pub sheets: SheetNames,
}

#[async_trait]
impl Getter for Local {
    async fn geography(&self) -> anyhow::Result<GeoLayer> {
        GeoLayer::from_path(&self.geography, self.shapefile_member.as_deref())
    }

    async fn workbook(&self) -> anyhow::Result<Workbook> {
        Workbook::from_path(&self.workbook, &self.sheets)
    }
}
