mod render;

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum, ValueHint};
use cow_timeline::{
    build_timeline, parse_table, plotly_figure, standalone_html, write_intervals_csv, BehaviorSet,
    FigureOptions, InputSource, Language, ParseOptions, Profile, SubjectSelector, Table, Timeline,
    TimelineError, TimelineParams, TrailingPolicy,
};
use rayon::prelude::*;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::render::{render_chart_guard, ChartKind};

#[derive(Parser, Debug)]
#[command(author, version, about = "Cow behavior timeline CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render the behavior timeline of one cow (or every cow) as CSV/PNG/SVG/HTML
    Timeline(TimelineArgs),
    /// List the cow columns of a sheet
    Subjects(SubjectsArgs),
    /// Per-behavior time budget for one cow
    Summary(SummaryArgs),
}

#[derive(Args, Debug)]
struct SourceArgs {
    /// Google Sheets share URL or local CSV file
    #[arg(value_hint = ValueHint::AnyPath)]
    input: String,

    /// JSON profile with the behavior list and cow aliases
    #[arg(long, value_hint = ValueHint::FilePath)]
    profile: Option<PathBuf>,

    /// Timestamp format (chrono strftime); repeat to try several, replaces the defaults
    #[arg(long = "time-format")]
    time_formats: Vec<String>,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Parser, Debug)]
struct TimelineArgs {
    #[command(flatten)]
    source: SourceArgs,

    /// Cow column: header name, profile alias or column index (default: first cow column)
    #[arg(long, conflicts_with = "all_subjects")]
    subject: Option<String>,

    /// Render every cow column
    #[arg(long, action = ArgAction::SetTrue)]
    all_subjects: bool,

    /// Intervals CSV path (`-` for stdout)
    #[arg(short, long, default_value = "timeline.csv", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Output PNG figure path (defaults next to CSV)
    #[arg(long, value_hint = ValueHint::FilePath)]
    png: Option<PathBuf>,

    /// Output SVG figure path
    #[arg(long, value_hint = ValueHint::FilePath)]
    svg: Option<PathBuf>,

    /// Output interactive HTML (Plotly) path
    #[arg(long, value_hint = ValueHint::FilePath)]
    html: Option<PathBuf>,

    /// Disable plot generation
    #[arg(long, action = ArgAction::SetTrue)]
    no_plot: bool,

    /// Axis label language
    #[arg(long, value_enum, default_value_t = LangOpt::Th)]
    lang: LangOpt,

    /// Only give axis rows to behaviors that occur
    #[arg(long, action = ArgAction::SetTrue)]
    present_only: bool,

    /// Draw a dotted line at each midnight
    #[arg(long, action = ArgAction::SetTrue)]
    day_lines: bool,

    /// Keep the last observation, lasting this many seconds
    #[arg(long)]
    extend_last: Option<i64>,
}

#[derive(Parser, Debug)]
struct SubjectsArgs {
    #[command(flatten)]
    source: SourceArgs,
}

#[derive(Parser, Debug)]
struct SummaryArgs {
    #[command(flatten)]
    source: SourceArgs,

    /// Cow column: header name, profile alias or column index
    #[arg(long)]
    subject: Option<String>,

    /// Totals CSV path (stdout when omitted or `-`)
    #[arg(short, long, value_hint = ValueHint::FilePath)]
    output: Option<PathBuf>,

    /// Keep the last observation, lasting this many seconds
    #[arg(long)]
    extend_last: Option<i64>,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum LangOpt {
    Th,
    En,
}

impl From<LangOpt> for Language {
    fn from(value: LangOpt) -> Self {
        match value {
            LangOpt::Th => Language::Thai,
            LangOpt::En => Language::English,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = match &cli.command {
        Command::Timeline(args) => args.source.verbose,
        Command::Subjects(args) => args.source.verbose,
        Command::Summary(args) => args.source.verbose,
    };
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match cli.command {
        Command::Timeline(args) => handle_timeline(args),
        Command::Subjects(args) => handle_subjects(args),
        Command::Summary(args) => handle_summary(args),
    }
}

struct Loaded {
    table: Table,
    profile: Profile,
}

fn load_source(source: &SourceArgs) -> Result<Loaded> {
    let profile = match source.profile.as_ref() {
        Some(path) => Profile::load(path)
            .with_context(|| format!("failed to load profile {}", path.display()))?,
        None => Profile::default(),
    };
    let mut options = ParseOptions::default();
    if !source.time_formats.is_empty() {
        options.time_formats = source.time_formats.clone();
    }

    let t_load = Instant::now();
    let input = InputSource::classify(&source.input);
    let bytes = input
        .load()
        .with_context(|| format!("failed to load {}", input.describe()))?;
    let table = parse_table(&bytes, &options)
        .with_context(|| format!("failed to parse {}", input.describe()))?;
    info!(
        "Loaded {}: {} rows ({} dropped), {} cow columns",
        input.describe(),
        table.observations.len(),
        table.dropped_rows,
        table.subject_columns().len()
    );
    debug!(
        "Load stage: {:.1} ms",
        t_load.elapsed().as_secs_f64() * 1000.0
    );
    Ok(Loaded { table, profile })
}

fn resolve_subject(loaded: &Loaded, subject: Option<&str>) -> Result<usize> {
    let column = match subject {
        Some(name) => loaded
            .table
            .resolve_subject(&SubjectSelector::parse(name), &loaded.profile)?,
        None => loaded.table.default_subject()?,
    };
    Ok(column)
}

fn trailing_policy(extend_last: Option<i64>) -> Result<TrailingPolicy> {
    match extend_last {
        None => Ok(TrailingPolicy::Drop),
        Some(seconds) if seconds > 0 => Ok(TrailingPolicy::Extend { seconds }),
        Some(seconds) => Err(anyhow!("--extend-last must be positive, got {seconds}")),
    }
}

fn handle_timeline(args: TimelineArgs) -> Result<()> {
    let loaded = load_source(&args.source)?;
    let params = TimelineParams {
        trailing: trailing_policy(args.extend_last)?,
        present_only: args.present_only,
    };
    let figure_opts = FigureOptions {
        language: args.lang.into(),
        day_lines: args.day_lines,
        ..FigureOptions::default()
    };

    let subjects = if args.all_subjects {
        loaded.table.subject_columns()
    } else {
        vec![resolve_subject(&loaded, args.subject.as_deref())?]
    };
    if subjects.is_empty() {
        return Err(anyhow!("sheet has no cow columns"));
    }
    let multi = subjects.len() > 1;
    if multi && is_stdout(&args.output) {
        return Err(anyhow!("`--output -` needs a single --subject"));
    }
    let jobs: Vec<(usize, Option<String>)> = if multi {
        let tags = subject_tags(&loaded.table, &subjects);
        subjects.into_iter().zip(tags.into_iter().map(Some)).collect()
    } else {
        subjects.into_iter().map(|column| (column, None)).collect()
    };

    let t_render = Instant::now();
    let outcomes: Vec<Result<bool>> = jobs
        .par_iter()
        .map(|(column, tag)| {
            let column = *column;
            let timeline = match build_timeline(&loaded.table, column, &loaded.profile, &params) {
                Ok(timeline) => timeline,
                Err(err @ TimelineError::NoKnownBehaviors(_)) if multi => {
                    warn!("Skipping {}", err);
                    return Ok(false);
                }
                Err(err) => return Err(err.into()),
            };
            let opts = FigureOptions {
                subject_label: subject_title(&loaded.profile, args.subject.as_deref(), column),
                ..figure_opts.clone()
            };
            emit_outputs(&timeline, &loaded.profile, &opts, &args, tag.as_deref())?;
            Ok(true)
        })
        .collect();

    let mut rendered = 0usize;
    for outcome in outcomes {
        if outcome? {
            rendered += 1;
        }
    }
    if rendered == 0 {
        return Err(anyhow!("no cow column had any known behavior"));
    }
    debug!(
        "Render stage: {:.1} ms ({} cows)",
        t_render.elapsed().as_secs_f64() * 1000.0,
        rendered
    );
    Ok(())
}

fn emit_outputs(
    timeline: &Timeline,
    profile: &Profile,
    figure_opts: &FigureOptions,
    args: &TimelineArgs,
    tag: Option<&str>,
) -> Result<()> {
    let behaviors = &profile.behaviors;
    let per_subject = |path: &Path| match tag {
        Some(tag) => suffixed(path, tag),
        None => path.to_path_buf(),
    };

    let stats = &timeline.stats;
    info!(
        "{}: {} intervals, {} unknown, {} out of order, {} trailing dropped",
        timeline.subject,
        timeline.entries.len(),
        stats.unknown_intervals,
        stats.non_positive_dropped,
        stats.trailing_dropped
    );
    log_totals(timeline, behaviors, figure_opts.language);

    if is_stdout(&args.output) {
        write_intervals_csv(timeline, behaviors, io::stdout().lock())?;
    } else {
        let path = per_subject(&args.output);
        let file =
            File::create(&path).with_context(|| format!("failed to create {}", path.display()))?;
        write_intervals_csv(timeline, behaviors, file)?;
        info!("Wrote intervals CSV: {}", path.display());
    }

    if let Some(html) = args.html.as_ref() {
        let path = per_subject(html);
        let figure = plotly_figure(timeline, behaviors, figure_opts);
        let title = figure_opts.labels(timeline).title;
        fs::write(&path, standalone_html(&figure, &title))
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!("Wrote HTML chart: {}", path.display());
    }

    if args.no_plot {
        return Ok(());
    }
    let png = match args.png.as_ref() {
        Some(path) => Some(per_subject(path)),
        None if !is_stdout(&args.output) => {
            let mut path = per_subject(&args.output);
            path.set_extension("png");
            Some(path)
        }
        None => None,
    };
    let targets = png
        .map(|p| (p, ChartKind::Png))
        .into_iter()
        .chain(args.svg.as_ref().map(|p| (per_subject(p), ChartKind::Svg)));
    for (path, kind) in targets {
        match render_chart_guard(timeline, behaviors, figure_opts, &path, kind) {
            Ok(()) => info!("Wrote plot: {}", path.display()),
            Err(err) => warn!("Skipping {:?} render ({}): {}", kind, path.display(), err),
        }
    }
    Ok(())
}

/// Chart title name for a cow column: the alias typed on the command line when
/// it names this column, otherwise the profile's alias for it.
fn subject_title(profile: &Profile, requested: Option<&str>, column: usize) -> Option<String> {
    requested
        .and_then(|name| profile.alias(name))
        .filter(|alias| alias.column == column)
        .map(|alias| alias.name.clone())
        .or_else(|| profile.alias_for_column(column).map(str::to_string))
}

fn handle_subjects(args: SubjectsArgs) -> Result<()> {
    let loaded = load_source(&args.source)?;
    let stdout = io::stdout();
    write_subjects(&loaded, stdout.lock())
}

fn write_subjects<W: Write>(loaded: &Loaded, mut out: W) -> Result<()> {
    for column in loaded.table.subject_columns() {
        let header = &loaded.table.columns[column];
        match loaded.profile.alias_for_column(column) {
            Some(alias) => writeln!(out, "{column}\t{header}\t{alias}")?,
            None => writeln!(out, "{column}\t{header}")?,
        }
    }
    Ok(())
}

fn handle_summary(args: SummaryArgs) -> Result<()> {
    let loaded = load_source(&args.source)?;
    let column = resolve_subject(&loaded, args.subject.as_deref())?;
    let params = TimelineParams {
        trailing: trailing_policy(args.extend_last)?,
        present_only: false,
    };
    let timeline = build_timeline(&loaded.table, column, &loaded.profile, &params)?;
    let behaviors = &loaded.profile.behaviors;

    match args.output.as_ref() {
        Some(path) if !is_stdout(path) => {
            let file = File::create(path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            let mut writer = csv::Writer::from_writer(file);
            write_totals_rows(&timeline, behaviors, &mut writer)?;
            info!("Wrote summary CSV: {}", path.display());
        }
        _ => {
            let stdout = io::stdout();
            let mut writer = csv::Writer::from_writer(stdout.lock());
            write_totals_rows(&timeline, behaviors, &mut writer)?;
        }
    }
    Ok(())
}

fn write_totals_rows<W: Write>(
    timeline: &Timeline,
    behaviors: &BehaviorSet,
    writer: &mut csv::Writer<W>,
) -> Result<()> {
    writer.write_record([
        "behavior_index",
        "behavior",
        "behavior_en",
        "count",
        "total_s",
        "share_pct",
    ])?;
    for total in timeline.totals() {
        writer.write_record([
            total.behavior.to_string(),
            behaviors.display(total.behavior, Language::Thai).to_string(),
            behaviors
                .display(total.behavior, Language::English)
                .to_string(),
            total.count.to_string(),
            total.total_seconds.to_string(),
            format!("{:.1}", total.share * 100.0),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn log_totals(timeline: &Timeline, behaviors: &BehaviorSet, language: Language) {
    let summary: Vec<String> = timeline
        .totals()
        .into_iter()
        .map(|total| {
            format!(
                "{} {:.1} h ({:.0}%)",
                behaviors.display(total.behavior, language),
                total.total_seconds as f64 / 3600.0,
                total.share * 100.0
            )
        })
        .collect();
    if !summary.is_empty() {
        info!("{} time budget: {}", timeline.subject, summary.join("; "));
    }
}

fn is_stdout(path: &Path) -> bool {
    path.as_os_str() == "-"
}

/// File-name friendly form of a column header.
fn slug(subject: &str) -> String {
    let slug: String = subject
        .trim()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect();
    let slug = slug.trim_matches('_').to_string();
    if slug.is_empty() {
        "subject".to_string()
    } else {
        slug
    }
}

/// Output file tags for the rendered columns. Headers that slug alike get the
/// column index appended.
fn subject_tags(table: &Table, subjects: &[usize]) -> Vec<String> {
    let slugs: Vec<String> = subjects
        .iter()
        .map(|&column| slug(table.columns.get(column).map(String::as_str).unwrap_or("")))
        .collect();
    slugs
        .iter()
        .zip(subjects)
        .map(|(tag, column)| {
            if slugs.iter().filter(|other| *other == tag).count() > 1 {
                format!("{tag}_{column}")
            } else {
                tag.clone()
            }
        })
        .collect()
}

/// `dir/stem.ext` -> `dir/stem_<tag>.ext`.
fn suffixed(base: &Path, tag: &str) -> PathBuf {
    let stem = base
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("timeline");
    let name = match base.extension().and_then(|s| s.to_str()) {
        Some(ext) => format!("{}_{}.{}", stem, tag, ext),
        None => format!("{}_{}", stem, tag),
    };
    base.with_file_name(name)
}
