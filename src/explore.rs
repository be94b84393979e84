use std::io::{BufRead, Write};

use census::Level;
use tracing::debug;

use crate::{
    config::Config,
    dataset::Dataset,
    filter::{self, AggregateTable, Selection},
    pipeline::{self, Rendered, Request},
    simplify::{Tolerance, MAX_TOLERANCE, MIN_TOLERANCE, TOLERANCE_STEP},
};

const NONE_LABEL: &str = "Nenhum";

enum Answer {
    Pick(usize),
    Nothing,
    Quit,
}

/// Prints a numbered menu and reads a choice. `0` means "none" when `allow_nothing` is set;
/// `q` or end of input quits.
fn ask<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
    prompt: &str,
    options: &[String],
    allow_nothing: bool,
) -> std::io::Result<Answer> {
    writeln!(output, "\n{prompt}")?;
    if allow_nothing {
        writeln!(output, "  0. {NONE_LABEL}")?;
    }
    for (i, option) in options.iter().enumerate() {
        writeln!(output, "  {}. {}", i + 1, option)?;
    }
    loop {
        write!(output, "> ")?;
        output.flush()?;
        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            return Ok(Answer::Quit);
        }
        let line = line.trim();
        if line.eq_ignore_ascii_case("q") {
            return Ok(Answer::Quit);
        }
        match line.parse::<usize>() {
            Ok(0) if allow_nothing => return Ok(Answer::Nothing),
            Ok(n) if n >= 1 && n <= options.len() => return Ok(Answer::Pick(n - 1)),
            _ => {
                let lowest = if allow_nothing { 0 } else { 1 };
                writeln!(
                    output,
                    "Enter a number between {lowest} and {}.",
                    options.len()
                )?
            }
        }
    }
}

fn ask_tolerance<R: BufRead, W: Write>(
    input: &mut R,
    output: &mut W,
    default: Tolerance,
) -> std::io::Result<Option<Tolerance>> {
    loop {
        write!(
            output,
            "\nSimplification tolerance [{MIN_TOLERANCE}-{MAX_TOLERANCE}, step {TOLERANCE_STEP}] \
             (enter for {}): ",
            default.value()
        )?;
        output.flush()?;
        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        let line = line.trim();
        if line.is_empty() {
            return Ok(Some(default));
        }
        if line.eq_ignore_ascii_case("q") {
            return Ok(None);
        }
        match line.parse::<f64>().map(Tolerance::new) {
            Ok(Ok(tolerance)) => return Ok(Some(tolerance)),
            Ok(Err(err)) => writeln!(output, "{err}")?,
            Err(_) => writeln!(output, "Not a number.")?,
        }
    }
}

fn print_table<W: Write>(
    output: &mut W,
    title: &str,
    table: &AggregateTable,
) -> anyhow::Result<()> {
    writeln!(output, "\n{title} {}", table.parent)?;
    writeln!(output, "{}", table.to_frame()?)?;
    Ok(())
}

/// Runs prompts until the user quits or input ends.
pub fn run<R: BufRead, W: Write>(
    dataset: &Dataset,
    config: &Config,
    mut input: R,
    mut output: W,
) -> anyhow::Result<()> {
    let descriptions: Vec<String> = dataset
        .dictionary()
        .iter()
        .map(|m| m.description.clone())
        .collect();
    let regions = filter::regions(dataset);
    let tooltip = config.tooltip();
    let default_tolerance = config.tolerance()?;

    loop {
        let variable = match ask(&mut input, &mut output, "Variable:", &descriptions, false)? {
            Answer::Pick(i) => descriptions[i].clone(),
            _ => return Ok(()),
        };
        let Some(tolerance) = ask_tolerance(&mut input, &mut output, default_tolerance)? else {
            return Ok(());
        };
        let region = match ask(&mut input, &mut output, "Intermediate region:", &regions, false)? {
            Answer::Pick(i) => regions[i].clone(),
            _ => return Ok(()),
        };
        let mut selection = Selection::new(region.clone());

        let measurement = dataset.dictionary().resolve(&variable)?;
        let measured = dataset.measure(&measurement)?;
        let municipalities = filter::municipality_options(&measured, &region);
        let labels: Vec<String> = municipalities.iter().map(|m| m.label()).collect();
        match ask(
            &mut input,
            &mut output,
            "Municipality (total in parentheses):",
            &labels,
            true,
        )? {
            Answer::Pick(i) => {
                selection.select(Level::Municipality, municipalities[i].name.clone())?
            }
            Answer::Nothing => {
                writeln!(output, "Select a municipality to load the map.")?;
                continue;
            }
            Answer::Quit => return Ok(()),
        }

        for level in [Level::District, Level::Neighborhood] {
            let names = filter::options(dataset, &selection, level);
            let prompt = format!("{}:", capitalize(&level.to_string()));
            match ask(&mut input, &mut output, &prompt, &names, true)? {
                Answer::Pick(i) => selection.select(level, names[i].clone())?,
                Answer::Nothing => break,
                Answer::Quit => return Ok(()),
            }
        }
        debug!(?selection, "explore selection");

        let request = Request {
            variable,
            selection,
            tolerance,
        };
        match pipeline::render(dataset, &request, &tooltip, &config.out_dir)? {
            Rendered::Idle { .. } => {
                writeln!(output, "Select a municipality to load the map.")?
            }
            Rendered::TooLarge { count, limit } => writeln!(
                output,
                "Selected area contains {count} sectors, the limit is {limit}. \
                 Narrow the selection."
            )?,
            Rendered::Written {
                sectors,
                files,
                districts,
                neighborhoods,
            } => {
                writeln!(output, "\nMapped {sectors} sectors:")?;
                for file in &files {
                    writeln!(output, "  {}", file.display())?;
                }
                print_table(&mut output, "Districts of", &districts)?;
                if let Some(table) = &neighborhoods {
                    print_table(&mut output, "Neighborhoods of", table)?;
                }
            }
        }
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::dataset::fixtures::{dataset, Row};

    const ROWS: &[Row] = &[
        ("1", "Norte", "Serrana", Some("Sede"), Some("Alto"), Some("3")),
        ("2", "Sul", "Cidadeia", Some("Sede"), Some("Centro"), Some("7000")),
        ("3", "Sul", "Cidadeia", Some("Sede"), Some("Vila"), Some("5000")),
    ];

    fn session(script: &str) -> (String, tempfile::TempDir) {
        let dataset = dataset(ROWS);
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            out_dir: dir.path().to_path_buf(),
            ..Config::default()
        };
        let mut output = Vec::new();
        run(&dataset, &config, Cursor::new(script.to_string()), &mut output).unwrap();
        (String::from_utf8(output).unwrap(), dir)
    }

    #[test]
    fn full_drill_down_writes_map() {
        // variable 1, default tolerance, region 2 (Sul), municipality 1, district 1, neighborhood 2
        let (output, dir) = session("1\n\n2\n1\n1\n2\nq\n");
        assert!(output.contains("1. Cidadeia (12000)"));
        assert!(output.contains("Mapped 1 sectors"));
        assert!(output.contains("Neighborhoods of Sede"));
        assert!(dir.path().join("neighborhoods.csv").exists());
    }

    #[test]
    fn no_municipality_is_idle() {
        let (output, dir) = session("1\n\n2\n0\n");
        assert!(output.contains("Select a municipality to load the map."));
        assert!(!dir.path().join("map.html").exists());
    }

    #[test]
    fn invalid_input_is_asked_again() {
        let (output, _dir) = session("7\nabc\n1\n0.5\n");
        assert!(output.contains("Enter a number between 1 and 1."));
        assert!(output.contains("outside"));
    }

    #[test]
    fn capitalize_level_names() {
        assert_eq!(capitalize("district"), "District");
        assert_eq!(capitalize(""), "");
    }
}
