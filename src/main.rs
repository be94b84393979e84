use std::path::PathBuf;

use anyhow::Result;
use census::Level;
use clap::{Args, Parser, Subcommand};
use polars::prelude::DataFrame;
use tracing_subscriber::EnvFilter;

use sectormap::{
    config::{Config, Source},
    dataset::Dataset,
    explore, filter,
    pipeline::{self, Rendered, Request},
    simplify::Tolerance,
};

#[derive(Parser)]
#[command(version, about = "Drill-down choropleth maps over census sectors")]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Local geography file (.zip, .shp or .geojson); needs --workbook too
    #[arg(long, global = true, requires = "workbook")]
    geography: Option<PathBuf>,
    /// Local data workbook (.xlsx)
    #[arg(long, global = true, requires = "geography")]
    workbook: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the variables in the dictionary
    Variables,
    /// List the options of the next unselected level
    Options(SelectArgs),
    /// Write the map and aggregate tables for a selection
    Render(RenderArgs),
    /// Pick a selection interactively
    Explore,
}

#[derive(Args)]
struct SelectArgs {
    /// Variable description or column identifier
    #[arg(long)]
    variable: String,
    #[arg(long)]
    region: Option<String>,
    /// Municipality name, or its option label "Name (total)"
    #[arg(long)]
    municipality: Option<String>,
    #[arg(long)]
    district: Option<String>,
    #[arg(long)]
    neighborhood: Option<String>,
}

#[derive(Args)]
struct RenderArgs {
    #[command(flatten)]
    select: SelectArgs,
    #[arg(long)]
    tolerance: Option<f64>,
    /// Output directory
    #[arg(long)]
    out: Option<PathBuf>,
}

impl SelectArgs {
    fn request(self, tolerance: Tolerance) -> Result<Request> {
        Ok(Request::from_names(
            self.variable,
            self.region,
            self.municipality,
            self.district,
            self.neighborhood,
            tolerance,
        )?)
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_path(path)?,
        None => Config::default(),
    };
    if let (Some(geography), Some(workbook)) = (&cli.geography, &cli.workbook) {
        config.source = Source::Local {
            geography: geography.clone(),
            workbook: workbook.clone(),
        };
    }
    Ok(config)
}

fn print_options(dataset: &Dataset, request: &Request) -> Result<()> {
    let selection = &request.selection;
    let next = match selection.deepest() {
        None => Level::Region,
        Some(level) => match level.child() {
            Some(child) => child,
            None => {
                println!("Every level is selected.");
                return Ok(());
            }
        },
    };
    let heading = match next {
        Level::Region => "Regions",
        Level::Municipality => "Municipalities",
        Level::District => "Districts",
        Level::Neighborhood => "Neighborhoods",
    };
    println!("{heading}:");
    if next == Level::Municipality {
        let measurement = dataset.dictionary().resolve(&request.variable)?;
        let measured = dataset.measure(&measurement)?;
        let region = selection.name(Level::Region).unwrap_or_default();
        for option in filter::municipality_options(&measured, region) {
            println!("  {}", option.label());
        }
    } else {
        for name in filter::options(dataset, selection, next) {
            println!("  {name}");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let getter = config.getter();
    let dataset = Dataset::load(getter.as_ref(), &config.key_column).await?;

    match cli.command {
        Command::Variables => {
            for measurement in dataset.dictionary().iter() {
                println!("{}\t{}", measurement.column, measurement.description);
            }
        }
        Command::Options(args) => {
            let request = args.request(config.tolerance()?)?;
            print_options(&dataset, &request)?;
        }
        Command::Render(args) => {
            let tolerance = match args.tolerance {
                Some(value) => Tolerance::new(value)?,
                None => config.tolerance()?,
            };
            let out_dir = args.out.unwrap_or_else(|| config.out_dir.clone());
            let request = args.select.request(tolerance)?;
            match pipeline::render(&dataset, &request, &config.tooltip(), &out_dir)? {
                Rendered::Idle { municipalities } => {
                    println!("Select a municipality to load the map. Municipalities:");
                    for option in municipalities {
                        println!("  {}", option.label());
                    }
                }
                Rendered::TooLarge { count, limit } => {
                    eprintln!(
                        "Selected area contains {count} sectors, the limit is {limit}. \
                         Narrow the selection."
                    );
                }
                Rendered::Written {
                    sectors,
                    files,
                    districts,
                    neighborhoods,
                } => {
                    println!("Mapped {sectors} sectors (tolerance {}):", tolerance.value());
                    for file in files {
                        println!("  {}", file.display());
                    }
                    let frame: DataFrame = districts.to_frame()?;
                    println!("Districts of {}:", districts.parent);
                    println!("{}", frame);
                    if let Some(table) = neighborhoods {
                        println!("Neighborhoods of {}:", table.parent);
                        println!("{}", table.to_frame()?);
                    }
                }
            }
        }
        Command::Explore => {
            let stdin = std::io::stdin();
            explore::run(&dataset, &config, stdin.lock(), std::io::stdout())?;
        }
    }
    Ok(())
}
