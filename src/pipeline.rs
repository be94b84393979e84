use std::path::{Path, PathBuf};

use tracing::info;

use crate::{
    dataset::Dataset,
    error::FilterError,
    filter::{self, parse_municipality_label, AggregateRow, AggregateTable, Outcome, Selection},
    render::{self, Tooltip},
    simplify::Tolerance,
};

/// One user interaction against a loaded dataset.
#[derive(Clone, Debug)]
pub struct Request {
    /// Variable description or column identifier.
    pub variable: String,
    pub selection: Selection,
    pub tolerance: Tolerance,
}

impl Request {
    /// The municipality may be given as a bare name or as its option label ("Name (total)").
    pub fn from_names(
        variable: String,
        region: Option<String>,
        municipality: Option<String>,
        district: Option<String>,
        neighborhood: Option<String>,
        tolerance: Tolerance,
    ) -> Result<Self, FilterError> {
        let municipality = municipality.map(|m| parse_municipality_label(&m).to_string());
        let selection = Selection::from_names(region, municipality, district, neighborhood)?;
        Ok(Self {
            variable,
            selection,
            tolerance,
        })
    }
}

#[derive(Debug)]
pub enum Rendered {
    /// No municipality chosen; nothing was written.
    Idle { municipalities: Vec<AggregateRow> },
    /// The selection has more sectors than can be mapped; nothing was written.
    TooLarge { count: usize, limit: usize },
    Written {
        sectors: usize,
        files: Vec<PathBuf>,
        districts: AggregateTable,
        neighborhoods: Option<AggregateTable>,
    },
}

/// Filters, simplifies and writes the map and tables for `request` into `out_dir`.
pub fn render(
    dataset: &Dataset,
    request: &Request,
    tooltip: &Tooltip,
    out_dir: &Path,
) -> anyhow::Result<Rendered> {
    let measurement = dataset.dictionary().resolve(&request.variable)?;
    let measured = dataset.measure(&measurement)?;
    let view = match filter::apply(&measured, &request.selection) {
        Ok(Outcome::Ready(view)) => view,
        Ok(Outcome::Idle { municipalities }) => {
            info!("no municipality selected, map not built");
            return Ok(Rendered::Idle { municipalities });
        }
        Err(FilterError::TooManySectors { count, limit }) => {
            return Ok(Rendered::TooLarge { count, limit });
        }
        Err(err) => return Err(err.into()),
    };

    let layer = render::build_layer(&measured, &view, request.tolerance, tooltip)?;
    let files = render::write_outputs(out_dir, &layer, &view)?;
    Ok(Rendered::Written {
        sectors: view.records.len(),
        files,
        districts: view.districts,
        neighborhoods: view.neighborhoods,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::fixtures::{dataset, Row};

    const ROWS: &[Row] = &[
        ("1", "Sul", "Cidadeia", Some("Sede"), Some("Centro"), Some("7000")),
        ("2", "Sul", "Cidadeia", Some("Sede"), Some("Vila"), Some("5000")),
    ];

    fn request(municipality: Option<&str>) -> Request {
        Request::from_names(
            "Moradores".to_string(),
            Some("Sul".to_string()),
            municipality.map(str::to_string),
            None,
            None,
            Tolerance::default(),
        )
        .unwrap()
    }

    #[test]
    fn label_selects_municipality() {
        let request = request(Some("Cidadeia (12000)"));
        assert_eq!(
            request.selection.name(census::Level::Municipality),
            Some("Cidadeia")
        );
    }

    #[test]
    fn idle_writes_nothing() {
        let dataset = dataset(ROWS);
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let rendered = render(&dataset, &request(None), &Tooltip::default(), &out).unwrap();
        match rendered {
            Rendered::Idle { municipalities } => {
                assert_eq!(municipalities[0].label(), "Cidadeia (12000)");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(!out.exists());
    }

    #[test]
    fn written_outputs_for_municipality() {
        let dataset = dataset(ROWS);
        let dir = tempfile::tempdir().unwrap();
        let rendered = render(
            &dataset,
            &request(Some("Cidadeia")),
            &Tooltip::default(),
            dir.path(),
        )
        .unwrap();
        let Rendered::Written {
            sectors,
            files,
            districts,
            neighborhoods,
        } = rendered
        else {
            panic!("expected outputs");
        };
        assert_eq!(sectors, 2);
        assert_eq!(files.len(), 3);
        assert_eq!(districts.total(), 12000.0);
        assert!(neighborhoods.is_none());
        assert!(dir.path().join("map.html").exists());
    }

    #[test]
    fn unknown_variable_is_an_error() {
        let dataset = dataset(ROWS);
        let dir = tempfile::tempdir().unwrap();
        let mut request = request(Some("Cidadeia"));
        request.variable = "Renda".to_string();
        assert!(render(&dataset, &request, &Tooltip::default(), dir.path()).is_err());
    }
}
