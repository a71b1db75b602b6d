#![forbid(unsafe_code)]

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use campaignscope::{
    AnalysisConfig, CategoricalField, CategoryValue, ChartKind, DistributionSummary,
    FilterOptions, FilterPipelineConfiguration, RangeSelection, Selection, Session, Table,
};

#[derive(Debug, Clone, PartialEq)]
struct CliArgs {
    input: PathBuf,
    config: Option<PathBuf>,
    age: Option<(f64, f64)>,
    /// Raw flag values per field; an empty list selects nothing.
    selections: Vec<(CategoricalField, Vec<String>)>,
    chart: ChartKind,
    out_dir: Option<PathBuf>,
    show_options: bool,
}

fn main() -> ExitCode {
    env_logger::init();

    match parse_args(std::env::args().skip(1)).and_then(|args| run(&args)) {
        Ok(lines) => {
            for line in lines {
                println!("{line}");
            }
            ExitCode::SUCCESS
        }
        Err(error) => {
            eprintln!("campaignscope-cli error: {error}");
            ExitCode::from(1)
        }
    }
}

fn run(args: &CliArgs) -> Result<Vec<String>, String> {
    let config = match args.config.as_deref() {
        Some(path) => AnalysisConfig::from_path(path).map_err(|error| error.to_string())?,
        None => AnalysisConfig::default(),
    };
    let session = Session::new(config).map_err(|error| error.to_string())?;

    let bytes = fs::read(&args.input)
        .map_err(|error| format!("cannot read {}: {error}", args.input.display()))?;
    let raw = session.load(&bytes).map_err(|error| error.to_string())?;
    log::info!(
        "loaded {} rows x {} columns from {}",
        raw.row_count(),
        raw.column_names().len(),
        args.input.display()
    );

    let options = session
        .filter_options(&raw)
        .map_err(|error| error.to_string())?;
    let mut lines = Vec::new();

    if args.show_options {
        lines.push(format!("age {}..={}", options.age_min, options.age_max));
        for field in CategoricalField::ALL {
            let values = options
                .values_for(field)
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>();
            lines.push(format!("{field}: {}", values.join(", ")));
        }
        return Ok(lines);
    }

    let age = match args.age {
        Some((lo, hi)) => RangeSelection::new(lo, hi).map_err(|error| error.to_string())?,
        None => options.age_range(),
    };
    let mut filters = FilterPipelineConfiguration::new(age);
    for (field, texts) in &args.selections {
        filters = filters.with_selection(*field, resolve_selection(*field, texts, &options)?);
    }

    let report = session
        .recompute(&raw, &filters, args.chart)
        .map_err(|error| error.to_string())?;

    lines.push(format!(
        "rows raw={} filtered={}",
        raw.row_count(),
        report.filtered.row_count()
    ));
    let preview = session
        .preview(&report.filtered)
        .map_err(|error| error.to_string())?;
    lines.extend(render_rows(&preview));
    lines.push(format!("chart={}", report.chart));
    lines.extend(render_summary("raw", &report.raw_summary));
    lines.extend(render_summary("filtered", &report.filtered_summary));

    if let Some(dir) = args.out_dir.as_deref() {
        fs::create_dir_all(dir)
            .map_err(|error| format!("cannot create {}: {error}", dir.display()))?;
        for artifact in &report.exports {
            let path = dir.join(&artifact.file_name);
            fs::write(&path, &artifact.bytes)
                .map_err(|error| format!("cannot write {}: {error}", path.display()))?;
            lines.push(format!(
                "wrote {} ({}, {} bytes)",
                path.display(),
                artifact.mime_type(),
                artifact.bytes.len()
            ));
        }
    }

    Ok(lines)
}

fn render_rows(table: &Table) -> Vec<String> {
    let mut lines = vec![table.column_names().join("\t")];
    for idx in 0..table.row_count() {
        let cells = table
            .row(idx)
            .unwrap_or_default()
            .into_iter()
            .map(|cell| {
                if cell.is_missing() {
                    String::new()
                } else {
                    cell.category_value()
                        .map(|value| value.to_string())
                        .unwrap_or_default()
                }
            })
            .collect::<Vec<_>>();
        lines.push(cells.join("\t"));
    }
    lines
}

fn render_summary(branch: &str, summary: &DistributionSummary) -> Vec<String> {
    if summary.is_empty() {
        return vec![format!("{branch} {}: no values", summary.target())];
    }
    summary
        .entries()
        .iter()
        .map(|(value, pct)| format!("{branch} {}={value}: {pct:.2}%", summary.target()))
        .collect()
}

fn parse_args<I>(args: I) -> Result<CliArgs, String>
where
    I: IntoIterator<Item = String>,
{
    let mut input = None;
    let mut config = None;
    let mut age = None;
    let mut selections = Vec::new();
    let mut chart = ChartKind::default();
    let mut out_dir = None;
    let mut show_options = false;

    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--input" => {
                let value = args
                    .next()
                    .ok_or_else(|| "--input requires a path".to_owned())?;
                input = Some(PathBuf::from(value));
            }
            "--config" => {
                let value = args
                    .next()
                    .ok_or_else(|| "--config requires a path".to_owned())?;
                config = Some(PathBuf::from(value));
            }
            "--age" => {
                let value = args
                    .next()
                    .ok_or_else(|| "--age requires LO:HI".to_owned())?;
                age = Some(parse_range(&value)?);
            }
            "--chart" => {
                let value = args
                    .next()
                    .ok_or_else(|| "--chart requires bar or pie".to_owned())?;
                chart = ChartKind::parse(&value)
                    .ok_or_else(|| format!("unknown chart kind: {value}"))?;
            }
            "--out-dir" => {
                let value = args
                    .next()
                    .ok_or_else(|| "--out-dir requires a path".to_owned())?;
                out_dir = Some(PathBuf::from(value));
            }
            "--options" => {
                show_options = true;
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            other => {
                let field = other
                    .strip_prefix("--")
                    .map(|name| name.replace('-', "_"))
                    .and_then(|name| CategoricalField::from_column_name(&name))
                    .ok_or_else(|| format!("unknown argument: {other}"))?;
                let value = args
                    .next()
                    .ok_or_else(|| format!("{other} requires a comma separated list"))?;
                selections.push((field, parse_selection(&value)));
            }
        }
    }

    Ok(CliArgs {
        input: input.ok_or_else(|| "--input is required".to_owned())?,
        config,
        age,
        selections,
        chart,
        out_dir,
        show_options,
    })
}

fn parse_range(value: &str) -> Result<(f64, f64), String> {
    let (lo, hi) = value
        .split_once(':')
        .ok_or_else(|| format!("age range {value:?} is not LO:HI"))?;
    let bound = |text: &str| {
        text.trim()
            .parse::<f64>()
            .map_err(|error| format!("age bound {text:?}: {error}"))
    };
    Ok((bound(lo)?, bound(hi)?))
}

fn parse_selection(value: &str) -> Vec<String> {
    if value.trim().is_empty() {
        return Vec::new();
    }
    value.split(',').map(|text| text.trim().to_owned()).collect()
}

/// Match flag values against the values the loaded column holds: `--job 1`
/// selects the text cell `1`, and `2.50` finds `2.5` in a numeric column.
fn resolve_selection(
    field: CategoricalField,
    texts: &[String],
    options: &FilterOptions,
) -> Result<Selection, String> {
    let choices = options.values_for(field);
    let values = texts
        .iter()
        .map(|text| {
            choices
                .iter()
                .find(|choice| choice.to_string().trim() == text)
                .or_else(|| {
                    let number = text.parse::<f64>().ok()?;
                    choices.iter().find(|choice| match choice {
                        CategoryValue::Int64(v) => *v as f64 == number,
                        CategoryValue::Float64(v) => v.get() == number,
                        _ => false,
                    })
                })
                .cloned()
                .ok_or_else(|| format!("{field} has no value {text:?}"))
        })
        .collect::<Result<Vec<_>, String>>()?;
    Ok(Selection::values(values))
}

fn print_help() {
    println!(
        "campaignscope-cli\n\
         Usage:\n\
         \x20 campaignscope-cli --input <file> [--config <json>] [--options]\n\
         \x20                   [--age LO:HI] [--job a,b] [--marital ...] [--default ...]\n\
         \x20                   [--housing ...] [--loan ...] [--contact ...] [--month ...]\n\
         \x20                   [--day-of-week ...] [--chart bar|pie] [--out-dir <dir>]\n\
         \n\
         Omitted categorical flags keep every value; an empty list keeps none.\n\
         Set RUST_LOG=debug to see pipeline and cache events."
    );
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use campaignscope::{CategoricalField, ChartKind};

    use super::{CliArgs, parse_args, run};

    const CONTACTS: &str = "\
age;job;marital;default;housing;loan;contact;month;day_of_week;y
25;admin;single;no;yes;no;cellular;may;mon;yes
40;blue-collar;married;no;no;no;telephone;jun;tue;no
60;admin;married;unknown;yes;yes;cellular;may;wed;yes
";

    fn args(list: &[&str]) -> Result<CliArgs, String> {
        parse_args(list.iter().map(|arg| (*arg).to_owned()))
    }

    #[test]
    fn parses_range_selections_and_chart() {
        let parsed = args(&[
            "--input",
            "bank.csv",
            "--age",
            "20:50",
            "--day-of-week",
            "mon,tue",
            "--job",
            "",
            "--chart",
            "pie",
        ])
        .expect("args");

        assert_eq!(parsed.input, PathBuf::from("bank.csv"));
        assert_eq!(parsed.age, Some((20.0, 50.0)));
        assert_eq!(parsed.chart, ChartKind::Pie);
        assert_eq!(
            parsed.selections,
            vec![
                (
                    CategoricalField::DayOfWeek,
                    vec!["mon".to_owned(), "tue".to_owned()]
                ),
                (CategoricalField::Job, Vec::new()),
            ]
        );
    }

    #[test]
    fn rejects_unknown_flags_and_missing_input() {
        assert!(args(&["--input", "a.csv", "--education", "x"]).is_err());
        assert!(args(&["--age", "20:50"]).is_err());
        assert!(args(&["--input", "a.csv", "--age", "20-50"]).is_err());
    }

    fn run_with(contacts: &str, flags: &[&str]) -> Result<Vec<String>, String> {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("bank.csv");
        fs::write(&input, contacts).expect("write input");
        let mut list = vec!["--input", input.to_str().expect("utf8 path")];
        list.extend_from_slice(flags);
        run(&args(&list).expect("args"))
    }

    #[test]
    fn numeric_looking_flag_values_match_text_cells() {
        let contacts = "\
age;job;marital;default;housing;loan;contact;month;day_of_week;y
25;1;single;no;yes;no;cellular;may;mon;yes
40;admin;married;no;no;no;telephone;jun;tue;no
";
        let lines = run_with(contacts, &["--job", "1"]).expect("run");
        assert_eq!(lines[0], "rows raw=2 filtered=1");
    }

    #[test]
    fn numeric_flag_values_match_numeric_cells() {
        let contacts = "\
age;job;marital;default;housing;loan;contact;month;day_of_week;y
25;admin;single;no;yes;no;cellular;may;1;yes
40;admin;married;no;no;no;telephone;jun;2;no
";
        let lines = run_with(contacts, &["--day-of-week", "2.0"]).expect("run");
        assert_eq!(lines[0], "rows raw=2 filtered=1");
    }

    #[test]
    fn unknown_flag_values_are_rejected() {
        let err = run_with(CONTACTS, &["--job", "admin,astronaut"]).expect_err("unknown");
        assert!(err.contains("astronaut"), "{err}");
    }

    #[test]
    fn run_writes_every_export() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("bank.csv");
        fs::write(&input, CONTACTS).expect("write input");
        let out = dir.path().join("out");

        let parsed = args(&[
            "--input",
            input.to_str().expect("utf8 path"),
            "--job",
            "admin",
            "--out-dir",
            out.to_str().expect("utf8 path"),
        ])
        .expect("args");
        let lines = run(&parsed).expect("run");

        assert_eq!(lines[0], "rows raw=3 filtered=2");
        assert!(lines.iter().any(|line| line == "filtered y=yes: 100.00%"));
        for name in ["filtered_data.csv", "bank_raw_y.xlsx", "bank_y.csv"] {
            assert!(out.join(name).exists(), "missing {name}");
        }
    }

    #[test]
    fn options_list_widget_choices() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("bank.csv");
        fs::write(&input, CONTACTS).expect("write input");

        let parsed = args(&["--input", input.to_str().expect("utf8 path"), "--options"])
            .expect("args");
        let lines = run(&parsed).expect("run");
        assert_eq!(lines[0], "age 25..=60");
        assert!(lines.contains(&"job: admin, blue-collar".to_owned()));
    }
}
