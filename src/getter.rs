use async_trait::async_trait;

use crate::{geography::GeoLayer, workbook::Workbook};

/// Gets the sector geography and the data workbook from some source.
#[async_trait]
pub trait Getter {
    /// Gets the sector polygons and their attributes.
    async fn geography(&self) -> anyhow::Result<GeoLayer>;
    /// Gets the per-sector data sheet and the variable dictionary.
    async fn workbook(&self) -> anyhow::Result<Workbook>;
}
