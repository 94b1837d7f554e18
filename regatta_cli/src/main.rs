use std::fs;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum, ValueHint};
use rayon::prelude::*;
use regatta::leaderboard::LeaderboardSource;
use regatta::metrics::samples_in_window;
use regatta::{
    compute_boat_metrics, compute_leaderboard, feed_leaderboard, is_valid_timestamp_ms,
    parse_duration_token, parse_gpx_track, race_stats, seconds_to_timestamp_ms, speed_chart,
    weather_at, Boat, DirectorySource, DistanceModel, Leaderboard, LeaderboardEntry,
    LeaderboardMemo, MetricsParams, Race, RaceFileSource, RaceStore, ReplayClock, ReplayPlayer,
    SpeedSource, Tick, TimeRange,
};
use serde_json::json;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Yacht race telemetry: leaderboards, stats and replay", long_about = None)]
struct Cli {
    /// Verbose logging (debug level)
    #[arg(short, long, global = true, action = ArgAction::SetTrue)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the races in a tracker export directory
    Races(RacesArgs),
    /// Rank the fleet at a point in time
    Leaderboard(LeaderboardArgs),
    /// Fleet statistics, speed chart and weather as JSON
    Stats(StatsArgs),
    /// Replay a race, printing the leaders at every step
    Replay(ReplayArgs),
    /// Rank GPX tracks against each other
    Tracks(TracksArgs),
}

#[derive(Args, Debug)]
struct RaceSelect {
    /// Tracker export directory (contains races.json)
    #[arg(long, value_hint = ValueHint::DirPath)]
    data: Option<PathBuf>,

    /// Race id within the export (or within a race file)
    #[arg(long)]
    race: Option<String>,

    /// Single race document
    #[arg(long, conflicts_with = "data", value_hint = ValueHint::FilePath)]
    race_file: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct MetricsOpts {
    /// Distance model (overrides --params)
    #[arg(long, value_enum)]
    distance: Option<DistanceOpt>,

    /// Speed source (overrides --params)
    #[arg(long, value_enum)]
    speed: Option<SpeedOpt>,

    /// JSON file with metrics parameters
    #[arg(long, value_hint = ValueHint::FilePath)]
    params: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct RacesArgs {
    /// Tracker export directory (contains races.json)
    #[arg(long, value_hint = ValueHint::DirPath)]
    data: PathBuf,

    /// Output CSV path (`-` for stdout)
    #[arg(short, long, default_value = "-", value_hint = ValueHint::FilePath)]
    output: PathBuf,
}

#[derive(Parser, Debug)]
struct LeaderboardArgs {
    #[command(flatten)]
    select: RaceSelect,

    #[command(flatten)]
    metrics: MetricsOpts,

    /// Cursor time: RFC 3339, epoch ms, or `+<duration>` from the race start
    #[arg(long)]
    at: Option<String>,

    /// Ranking source
    #[arg(long, value_enum, default_value_t = BoardOpt::Computed)]
    source: BoardOpt,

    /// Group rows by class
    #[arg(long, action = ArgAction::SetTrue)]
    by_class: bool,

    /// Output CSV path (`-` for stdout)
    #[arg(short, long, default_value = "-", value_hint = ValueHint::FilePath)]
    output: PathBuf,
}

#[derive(Parser, Debug)]
struct StatsArgs {
    #[command(flatten)]
    select: RaceSelect,

    #[command(flatten)]
    metrics: MetricsOpts,

    /// Cursor time (defaults to the race end)
    #[arg(long)]
    at: Option<String>,

    /// Window start for per-boat window metrics
    #[arg(long, requires = "until")]
    from: Option<String>,

    /// Window end for per-boat window metrics
    #[arg(long, requires = "from")]
    until: Option<String>,

    /// Boats to include in the speed chart (comma separated ids)
    #[arg(long)]
    boats: Option<String>,

    /// Output JSON path (`-` for stdout)
    #[arg(short, long, default_value = "-", value_hint = ValueHint::FilePath)]
    output: PathBuf,
}

#[derive(Parser, Debug)]
struct ReplayArgs {
    #[command(flatten)]
    select: RaceSelect,

    #[command(flatten)]
    metrics: MetricsOpts,

    /// Race time advanced per tick (e.g. 30s, 5m, 1h)
    #[arg(long, default_value = "5m")]
    step: String,

    /// Wall-clock milliseconds between ticks
    #[arg(long, default_value_t = 200)]
    tick_ms: u64,

    /// Number of leaders printed per tick
    #[arg(long, default_value_t = 5)]
    top: usize,

    /// Start the replay from this time instead of the first sample
    #[arg(long)]
    from: Option<String>,
}

#[derive(Parser, Debug)]
struct TracksArgs {
    /// GPX files, one boat each
    #[arg(required = true, value_hint = ValueHint::FilePath)]
    inputs: Vec<PathBuf>,

    #[command(flatten)]
    metrics: MetricsOpts,

    /// Common start time (defaults to the earliest point)
    #[arg(long)]
    start: Option<String>,

    /// Output CSV path (`-` for stdout)
    #[arg(short, long, default_value = "-", value_hint = ValueHint::FilePath)]
    output: PathBuf,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum DistanceOpt {
    Haversine,
    Equirectangular,
}

impl From<DistanceOpt> for DistanceModel {
    fn from(value: DistanceOpt) -> Self {
        match value {
            DistanceOpt::Haversine => DistanceModel::Haversine,
            DistanceOpt::Equirectangular => DistanceModel::Equirectangular,
        }
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum SpeedOpt {
    Auto,
    Reported,
    Derived,
}

impl From<SpeedOpt> for SpeedSource {
    fn from(value: SpeedOpt) -> Self {
        match value {
            SpeedOpt::Auto => SpeedSource::Auto,
            SpeedOpt::Reported => SpeedSource::Reported,
            SpeedOpt::Derived => SpeedSource::Derived,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum BoardOpt {
    Computed,
    Feed,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match cli.command {
        Command::Races(args) => handle_races(args),
        Command::Leaderboard(args) => handle_leaderboard(args),
        Command::Stats(args) => handle_stats(args),
        Command::Replay(args) => handle_replay(args),
        Command::Tracks(args) => handle_tracks(args),
    }
}

fn metrics_params(opts: &MetricsOpts) -> Result<MetricsParams> {
    let mut params = match opts.params.as_ref() {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to read params {}", path.display()))?;
            serde_json::from_str::<MetricsParams>(&text)
                .with_context(|| format!("{} is not a valid params file", path.display()))?
        }
        None => MetricsParams::default(),
    };
    if let Some(distance) = opts.distance {
        params.distance_model = distance.into();
    }
    if let Some(speed) = opts.speed {
        params.speed_source = speed.into();
    }
    debug!(
        distance = ?params.distance_model,
        speed = %params.speed_source,
        "metrics parameters"
    );
    Ok(params)
}

fn load_race(select: &RaceSelect) -> Result<Arc<Race>> {
    let t_load = Instant::now();
    let race = match (&select.race_file, &select.data) {
        (Some(path), _) => {
            let mut store = RaceStore::new(RaceFileSource::new(path));
            let race_id = match select.race.as_ref() {
                Some(id) => id.clone(),
                None => store
                    .list_races()
                    .with_context(|| format!("failed to read {}", path.display()))?
                    .into_iter()
                    .next()
                    .map(|r| r.id)
                    .ok_or_else(|| anyhow!("{} holds no race", path.display()))?,
            };
            store
                .get(&race_id)
                .with_context(|| format!("failed to load race '{}'", race_id))?
        }
        (None, Some(root)) => {
            let race_id = select
                .race
                .as_ref()
                .ok_or_else(|| anyhow!("--race is required with --data"))?;
            let mut store = RaceStore::new(DirectorySource::new(root));
            store.get(race_id).with_context(|| {
                format!("failed to load race '{}' from {}", race_id, root.display())
            })?
        }
        (None, None) => return Err(anyhow!("pass --data <dir> --race <id> or --race-file <path>")),
    };
    info!(
        "Loaded race {} ({} boats) in {:.1} ms",
        race.id,
        race.boats.len(),
        t_load.elapsed().as_secs_f64() * 1000.0
    );
    Ok(race)
}

/// Resolve a time argument: RFC 3339, epoch milliseconds, or `+<duration>`
/// relative to `start_ms`.
fn parse_time_arg(token: &str, start_ms: i64) -> Result<i64> {
    let trimmed = token.trim();
    if let Some(offset) = trimmed.strip_prefix('+') {
        let offset_ms = parse_duration_token(offset)
            .and_then(seconds_to_timestamp_ms)
            .ok_or_else(|| anyhow!("invalid offset '{}': expected e.g. +90s, +15m, +1.5h", token))?;
        return start_ms
            .checked_add(offset_ms)
            .filter(|t| is_valid_timestamp_ms(*t))
            .ok_or_else(|| anyhow!("offset '{}' is out of range", token));
    }
    if let Ok(ms) = trimmed.parse::<i64>() {
        if !is_valid_timestamp_ms(ms) {
            return Err(anyhow!("time '{}' is out of range", token));
        }
        return Ok(ms);
    }
    let parsed = DateTime::parse_from_rfc3339(trimmed).with_context(|| {
        format!(
            "invalid time '{}': expected RFC 3339, epoch ms or +duration",
            token
        )
    })?;
    Ok(parsed.with_timezone(&Utc).timestamp_millis())
}

fn parse_step_ms(token: &str) -> Result<i64> {
    let step_ms = parse_duration_token(token)
        .filter(|s| *s > 0.0)
        .and_then(seconds_to_timestamp_ms)
        .ok_or_else(|| anyhow!("invalid step '{}': expected e.g. 30s, 5m, 1h", token))?;
    Ok(step_ms.max(1))
}

fn format_ms(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| ms.to_string())
}

fn format_opt(value: Option<f64>, precision: usize) -> String {
    value.map_or_else(String::new, |v| format!("{:.*}", precision, v))
}

fn csv_writer(path: &Path) -> Result<csv::Writer<Box<dyn Write>>> {
    let sink: Box<dyn Write> = if path.as_os_str() == "-" {
        Box::new(io::stdout().lock())
    } else {
        Box::new(
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?,
        )
    };
    Ok(csv::Writer::from_writer(sink))
}

fn handle_races(args: RacesArgs) -> Result<()> {
    let store = RaceStore::new(DirectorySource::new(&args.data));
    let races = store
        .list_races()
        .with_context(|| format!("failed to list races in {}", args.data.display()))?;

    let mut writer = csv_writer(&args.output)?;
    writer.write_record([
        "id",
        "name",
        "start",
        "end",
        "location",
        "year",
        "distance_nm",
    ])?;
    for race in &races {
        writer.write_record([
            race.id.clone(),
            race.name.clone(),
            race.start_ms.map(format_ms).unwrap_or_default(),
            race.end_ms.map(format_ms).unwrap_or_default(),
            race.location.clone().unwrap_or_default(),
            race.year.map(|y| y.to_string()).unwrap_or_default(),
            format_opt(race.distance_nm, 1),
        ])?;
    }
    writer.flush()?;
    info!("{} races listed", races.len());
    Ok(())
}

fn handle_leaderboard(args: LeaderboardArgs) -> Result<()> {
    let params = metrics_params(&args.metrics)?;
    let race = load_race(&args.select)?;
    let cursor = args
        .at
        .as_deref()
        .map(|t| parse_time_arg(t, race.start_ms))
        .transpose()?;

    let board = match args.source {
        BoardOpt::Feed => match feed_leaderboard(&race, cursor, &params) {
            Some(board) => board,
            None => {
                warn!("race {} has no feed standings; ranking locally", race.id);
                compute_leaderboard(&race, cursor, &params)
            }
        },
        BoardOpt::Computed => compute_leaderboard(&race, cursor, &params),
    };
    if let Some(leader) = board.leader() {
        info!(
            "Leader at {}: {} ({:.1} nm)",
            cursor.map(format_ms).unwrap_or_else(|| "end".to_string()),
            leader.name,
            leader.metrics.distance_nm()
        );
    }

    let mut writer = csv_writer(&args.output)?;
    if args.by_class {
        let groups = board.by_class();
        let rows = groups.iter().flat_map(|(_, members)| members.iter().copied());
        write_leaderboard_rows(&board, rows, &mut writer)?;
    } else {
        write_leaderboard_rows(&board, board.entries.iter(), &mut writer)?;
    }
    writer.flush()?;
    Ok(())
}

fn write_leaderboard_rows<'a, W, I>(
    board: &Leaderboard,
    entries: I,
    writer: &mut csv::Writer<W>,
) -> Result<()>
where
    W: Write,
    I: IntoIterator<Item = &'a LeaderboardEntry>,
{
    writer.write_record([
        "rank",
        "class_rank",
        "boat_id",
        "name",
        "sail_number",
        "class",
        "status",
        "distance_nm",
        "avg_speed_kn",
        "max_speed_kn",
        "dtf_nm",
        "samples",
        "source",
    ])?;
    let source = match board.source {
        LeaderboardSource::Computed => "computed",
        LeaderboardSource::Feed => "feed",
    };
    for entry in entries {
        writer.write_record([
            entry.rank.map(|r| r.to_string()).unwrap_or_default(),
            entry.class_rank.map(|r| r.to_string()).unwrap_or_default(),
            entry.boat_id.clone(),
            entry.name.clone(),
            entry.sail_number.clone(),
            entry.class.clone(),
            entry.status.as_str().to_string(),
            format!("{:.2}", entry.metrics.distance_nm()),
            format!("{:.2}", entry.metrics.speed.avg_kn),
            format_opt(entry.metrics.speed.max_kn, 2),
            format_opt(entry.dtf_nm, 2),
            entry.metrics.sample_count.to_string(),
            source.to_string(),
        ])?;
    }
    Ok(())
}

fn handle_stats(args: StatsArgs) -> Result<()> {
    let params = metrics_params(&args.metrics)?;
    let race = load_race(&args.select)?;
    let cursor = match args.at.as_deref() {
        Some(t) => parse_time_arg(t, race.start_ms)?,
        None => race
            .end_ms
            .or_else(|| TimeRange::of_race(&race).map(|r| r.end_ms))
            .unwrap_or(race.start_ms),
    };

    let stats = race_stats(&race, cursor, &params);
    let selected: Vec<&str> = args
        .boats
        .as_deref()
        .map(|list| {
            list.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default();
    for id in &selected {
        if race.boat(id).is_none() {
            warn!("unknown boat '{}' ignored", id);
        }
    }
    let chart = speed_chart(&race, &selected, &params);

    let window = match (args.from.as_deref(), args.until.as_deref()) {
        (Some(from), Some(until)) => {
            let from = parse_time_arg(from, race.start_ms)?;
            let until = parse_time_arg(until, race.start_ms)?;
            if until < from {
                return Err(anyhow!("--until must not be before --from"));
            }
            let rows: Vec<_> = race
                .boats
                .iter()
                .map(|b| {
                    let visible = samples_in_window(&b.samples, from, until);
                    compute_boat_metrics(&b.id, visible, from, &params)
                })
                .collect();
            Some(json!({ "from_ms": from, "until_ms": until, "boats": rows }))
        }
        _ => None,
    };

    let report = json!({
        "race": race.info(),
        "params": params,
        "stats": stats,
        "weather": weather_at(&race, cursor),
        "speed_chart": chart,
        "window": window,
    });
    let text = serde_json::to_string_pretty(&report)?;
    if args.output.as_os_str() == "-" {
        let mut out = io::stdout().lock();
        writeln!(out, "{}", text)?;
    } else {
        fs::write(&args.output, text)
            .with_context(|| format!("failed to write {}", args.output.display()))?;
        info!("Stats written: {}", args.output.display());
    }
    Ok(())
}

fn print_leaders(board: &Leaderboard, cursor_ms: i64, top: usize, progress: f64) {
    let leaders: Vec<String> = board
        .entries
        .iter()
        .filter(|e| e.rank.is_some())
        .take(top)
        .map(|e| {
            format!(
                "{}. {} {:.1}nm",
                e.rank.unwrap_or_default(),
                e.name,
                e.metrics.distance_nm()
            )
        })
        .collect();
    let mut out = io::stdout().lock();
    let _ = writeln!(
        out,
        "{} [{:>5.1}%] {}",
        format_ms(cursor_ms),
        progress * 100.0,
        if leaders.is_empty() {
            "no boats underway".to_string()
        } else {
            leaders.join("  ")
        }
    );
}

fn handle_replay(args: ReplayArgs) -> Result<()> {
    let params = metrics_params(&args.metrics)?;
    let race = load_race(&args.select)?;
    let step_ms = parse_step_ms(&args.step)?;
    let mut clock = ReplayClock::for_race(&race, step_ms)
        .with_context(|| format!("race {} has no position data to replay", race.id))?;
    if let Some(from) = args.from.as_deref() {
        clock.seek(parse_time_arg(from, race.start_ms)?);
    }
    let range = clock.range();
    info!(
        "Replaying {} from {} to {} in steps of {} s",
        race.name,
        format_ms(clock.cursor()),
        format_ms(range.end_ms),
        step_ms / 1000
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    runtime.block_on(async move {
        let mut player = ReplayPlayer::new(clock, Duration::from_millis(args.tick_ms.max(1)))?;
        let top = args.top;
        let tick_race = Arc::clone(&race);
        let tick_params = params.clone();
        let mut memo = LeaderboardMemo::new();
        let span = range.span_ms();
        player.play(move |tick| {
            let cursor_ms = match tick {
                Tick::Advanced(t) | Tick::Finished(t) => t,
                Tick::Ignored => return,
            };
            let progress = if span > 0 {
                cursor_ms.saturating_sub(range.start_ms) as f64 / span as f64
            } else {
                1.0
            };
            let board = memo.get_or_compute(&tick_race, Some(cursor_ms), &tick_params);
            print_leaders(board, cursor_ms, top, progress);
        });

        let interrupted = tokio::select! {
            _ = player.wait() => false,
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for ctrl-c")?;
                true
            }
        };
        if interrupted {
            player.pause();
            warn!("Replay interrupted at {}", format_ms(player.snapshot().cursor()));
        }

        let final_cursor = player.snapshot().cursor();
        let board = compute_leaderboard(&race, Some(final_cursor), &params);
        if let Some(leader) = board.leader() {
            info!(
                "Leader at {}: {} ({:.1} nm)",
                format_ms(final_cursor),
                leader.name,
                leader.metrics.distance_nm()
            );
        }
        Ok::<(), anyhow::Error>(())
    })
}

fn handle_tracks(args: TracksArgs) -> Result<()> {
    if args.inputs.is_empty() {
        return Err(anyhow!("no input files supplied"));
    }
    let params = metrics_params(&args.metrics)?;

    let t_parse = Instant::now();
    let inputs: Vec<(usize, PathBuf)> = args.inputs.iter().cloned().enumerate().collect();
    let mut boats: Vec<(usize, Boat)> = inputs
        .par_iter()
        .map(|(idx, path)| -> Result<(usize, Boat)> {
            let data =
                fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
            let boat_id = path
                .file_stem()
                .and_then(|s| s.to_str())
                .map(str::to_string)
                .unwrap_or_else(|| format!("track-{}", idx + 1));
            let boat = parse_gpx_track(&data, &boat_id)
                .with_context(|| format!("failed to parse {}", path.display()))?;
            Ok((*idx, boat))
        })
        .collect::<Result<Vec<_>>>()?;

    // Restore input order
    boats.sort_by_key(|(idx, _)| *idx);
    let boats: Vec<Boat> = boats.into_iter().map(|(_, b)| b).collect();
    debug!(
        "Parse stage: {:.1} ms",
        t_parse.elapsed().as_secs_f64() * 1000.0
    );

    let earliest = boats
        .iter()
        .filter_map(|b| b.samples.first())
        .map(|s| s.timestamp_ms)
        .min()
        .unwrap_or(0);
    let start_ms = match args.start.as_deref() {
        Some(t) => parse_time_arg(t, earliest)?,
        None => earliest,
    };
    let race = Race {
        id: "tracks".to_string(),
        name: "GPX tracks".to_string(),
        start_ms,
        boats,
        ..Race::default()
    };

    let board = compute_leaderboard(&race, None, &params);
    info!("{} tracks ranked", board.entries.len());
    let mut writer = csv_writer(&args.output)?;
    write_leaderboard_rows(&board, board.entries.iter(), &mut writer)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use regatta::Sample;

    #[test]
    fn test_parse_time_arg() {
        let start = 1_736_928_000_000;
        assert_eq!(parse_time_arg("+90s", start).unwrap(), start + 90_000);
        assert_eq!(parse_time_arg("+1.5h", start).unwrap(), start + 5_400_000);
        assert_eq!(parse_time_arg("12345", start).unwrap(), 12_345);
        assert_eq!(
            parse_time_arg("2025-01-15T08:00:00Z", 0).unwrap(),
            1_736_928_000_000
        );
        assert_eq!(
            parse_time_arg("2025-01-15T16:00:00+08:00", 0).unwrap(),
            1_736_928_000_000
        );
        assert!(parse_time_arg("+soon", start).is_err());
        assert!(parse_time_arg("+1e300s", start).is_err());
        assert!(parse_time_arg("+1e300s", i64::MAX).is_err());
        assert!(parse_time_arg("9223372036854775807", start).is_err());
        assert!(parse_time_arg("yesterday", start).is_err());
    }

    #[test]
    fn test_parse_step_ms() {
        assert_eq!(parse_step_ms("5m").unwrap(), 300_000);
        assert_eq!(parse_step_ms("30").unwrap(), 30_000);
        assert!(parse_step_ms("0s").is_err());
        assert!(parse_step_ms("fast").is_err());
        assert!(parse_step_ms("1e300h").is_err());
    }

    #[test]
    fn test_metrics_params_file_and_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("params.json");
        fs::write(&path, r#"{"distance_model": "equirectangular"}"#).unwrap();

        let opts = MetricsOpts {
            distance: None,
            speed: Some(SpeedOpt::Derived),
            params: Some(path.clone()),
        };
        let params = metrics_params(&opts).unwrap();
        assert_eq!(params.distance_model, DistanceModel::Equirectangular);
        assert_eq!(params.speed_source, SpeedSource::Derived);

        let opts = MetricsOpts {
            distance: Some(DistanceOpt::Haversine),
            speed: None,
            params: Some(path),
        };
        assert_eq!(
            metrics_params(&opts).unwrap().distance_model,
            DistanceModel::Haversine
        );
    }

    #[test]
    fn test_cli_parses_race_selection() {
        let cli = Cli::try_parse_from([
            "regatta",
            "leaderboard",
            "--data",
            "feed",
            "--race",
            "cervantes2025",
            "--at",
            "+2h",
            "--speed",
            "reported",
        ])
        .unwrap();
        match cli.command {
            Command::Leaderboard(args) => {
                assert_eq!(args.select.race.as_deref(), Some("cervantes2025"));
                assert_eq!(args.at.as_deref(), Some("+2h"));
                assert_eq!(args.source, BoardOpt::Computed);
            }
            other => panic!("unexpected command {:?}", other),
        }

        assert!(Cli::try_parse_from([
            "regatta",
            "stats",
            "--data",
            "feed",
            "--race-file",
            "race.json",
        ])
        .is_err());
    }

    #[test]
    fn test_leaderboard_csv_rows() {
        let mut a = Boat::new("a", "Alpha", "IRC");
        a.samples = vec![Sample::new(0.0, 0.0, 0), Sample::new(0.0, 0.1, 60_000)];
        let b = Boat::new("b", "Bravo", "IRC");
        let race = Race {
            id: "r".to_string(),
            boats: vec![b, a],
            ..Race::default()
        };
        let board = compute_leaderboard(&race, None, &MetricsParams::default());

        let mut writer = csv::Writer::from_writer(Vec::new());
        write_leaderboard_rows(&board, board.entries.iter(), &mut writer).unwrap();
        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("rank,class_rank,boat_id"));
        assert!(lines[1].starts_with("1,1,a,Alpha"));
        assert!(lines[2].starts_with(",,b,Bravo"));
        assert!(lines[2].contains("not_started"));
    }

    #[test]
    fn test_load_race_requires_selection() {
        let select = RaceSelect {
            data: None,
            race: None,
            race_file: None,
        };
        assert!(load_race(&select).is_err());

        let dir = tempfile::tempdir().unwrap();
        let select = RaceSelect {
            data: Some(dir.path().to_path_buf()),
            race: None,
            race_file: None,
        };
        assert!(load_race(&select).is_err());
    }

    #[test]
    fn test_load_race_file_without_race_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("race.json");
        fs::write(
            &path,
            r#"{"id": "solo", "name": "Solo", "startTime": 0, "boats": [
                {"id": "a", "name": "Alpha", "class": "IRC",
                 "positions": [{"lat": 0, "lng": 0, "timestamp": 0}]}]}"#,
        )
        .unwrap();
        let select = RaceSelect {
            data: None,
            race: None,
            race_file: Some(path),
        };
        let race = load_race(&select).unwrap();
        assert_eq!(race.id, "solo");
        assert_eq!(race.boats.len(), 1);
    }
}
