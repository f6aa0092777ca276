use std::io;
use std::time::{Duration, Instant};

use gridline_adapters::export::encode;
use gridline_adapters::memory::RecordingApplier;
use gridline_core::actions::ExportFormat;
use gridline_core::columns::{ColumnMetadata, ResultSetMetadata};
use gridline_core::selection::{CellPosition, GridId};
use gridline_core::settings::GridSettings;
use gridline_core::value::{row_from_pairs, CellValue, RowRecord};
use gridline_core::workspace::GridWorkspace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseOutcome {
    Config,
    HelpRequested,
}

#[derive(Debug, Clone)]
struct BenchmarkConfig {
    rows: usize,
    scroll_steps: usize,
    edits: usize,
    format: ExportFormat,
    assert_open_ms: Option<f64>,
    assert_frame_ms: Option<f64>,
    assert_min_export_rows_per_sec: Option<f64>,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            rows: 100_000,
            scroll_steps: 200,
            edits: 50,
            format: ExportFormat::Csv,
            assert_open_ms: None,
            assert_frame_ms: None,
            assert_min_export_rows_per_sec: None,
        }
    }
}

#[derive(Debug, Clone)]
struct GridMetrics {
    open: Duration,
    sort: Duration,
    filter: Duration,
    frames: usize,
    slowest_frame: Duration,
    frames_elapsed: Duration,
    exported_rows: usize,
    export_bytes: usize,
    export: Duration,
    applied: usize,
    apply: Duration,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = parse_args()?;
    let metrics = run_grid_benchmark(&config).await?;

    let open_ms = millis(metrics.open);
    let slowest_frame_ms = millis(metrics.slowest_frame);
    let export_rows_per_sec = per_second(metrics.exported_rows, metrics.export);

    println!("metric.rows={}", config.rows);
    println!("metric.open_ms={open_ms:.3}");
    println!("metric.sort_ms={:.3}", millis(metrics.sort));
    println!("metric.filter_ms={:.3}", millis(metrics.filter));
    println!("metric.frames={}", metrics.frames);
    println!(
        "metric.frames_per_sec={:.3}",
        per_second(metrics.frames, metrics.frames_elapsed)
    );
    println!("metric.slowest_frame_ms={slowest_frame_ms:.3}");
    println!("metric.export_format={}", config.format.label());
    println!("metric.export_bytes={}", metrics.export_bytes);
    println!("metric.export_rows_per_sec={export_rows_per_sec:.3}");
    println!("metric.applied_statements={}", metrics.applied);
    println!("metric.apply_ms={:.3}", millis(metrics.apply));
    if let Some(bytes) = peak_memory_bytes_best_effort() {
        println!("metric.peak_memory_bytes={bytes}");
    } else {
        println!("metric.peak_memory_bytes=n/a");
    }

    enforce_assertions(&config, open_ms, slowest_frame_ms, export_rows_per_sec)?;
    Ok(())
}

async fn run_grid_benchmark(config: &BenchmarkConfig) -> io::Result<GridMetrics> {
    let settings = GridSettings::default();
    let mut workspace = GridWorkspace::new(settings);
    let (metadata, rows) = synthetic_result_set(config.rows);

    let started_at = Instant::now();
    let id = workspace
        .add_result_set(0, metadata, rows)
        .map_err(io_other)?;
    let open = started_at.elapsed();

    let started_at = Instant::now();
    workspace.toggle_sort(id, "Category").map_err(io_other)?;
    let sort = started_at.elapsed();

    let started_at = Instant::now();
    workspace
        .set_filter(id, "Category", ["search", "play"])
        .map_err(io_other)?;
    let filter = started_at.elapsed();
    workspace.clear_filters(id).map_err(io_other)?;

    let (frames, slowest_frame, frames_elapsed) =
        scroll_frames(&mut workspace, id, config.scroll_steps, settings.scroll_debounce())?;

    stage_edits(&mut workspace, id, config.edits)?;

    let grid = workspace
        .grid(id)
        .ok_or_else(|| io_other("benchmark grid disappeared"))?;
    let started_at = Instant::now();
    let view = grid.export_view(workspace.ledger());
    let encoded = encode(config.format, &view).map_err(io_other)?;
    let export = started_at.elapsed();

    let applier = RecordingApplier::new();
    let started_at = Instant::now();
    let summary = workspace
        .apply_changes(&applier, None)
        .await
        .map_err(io_other)?;
    let apply = started_at.elapsed();

    Ok(GridMetrics {
        open,
        sort,
        filter,
        frames,
        slowest_frame,
        frames_elapsed,
        exported_rows: view.rows.len(),
        export_bytes: encoded.len(),
        export,
        applied: summary.succeeded(),
        apply,
    })
}

/// Scrolls top to bottom in even steps, flushing the debounce after each one.
fn scroll_frames(
    workspace: &mut GridWorkspace,
    id: GridId,
    steps: usize,
    debounce: Duration,
) -> io::Result<(usize, Duration, Duration)> {
    let total_rows = workspace
        .grid(id)
        .map_or(0, gridline_core::grid::ResultGrid::row_count);
    let stride = (total_rows / steps.max(1)).max(1);
    let mut slowest = Duration::ZERO;
    let mut frames = 0;
    let started_at = Instant::now();

    for step in 0..steps {
        let offset = u64::try_from(step * stride).map_err(io_other)?;
        let now = Instant::now();
        workspace.on_scroll(id, offset, now).map_err(io_other)?;
        workspace.tick(now + debounce);

        let frame_started = Instant::now();
        let rendered = workspace.render(id).map_err(io_other)?;
        slowest = slowest.max(frame_started.elapsed());
        if rendered.lines.is_empty() && total_rows > 0 {
            return Err(io_other(format!("empty frame at offset {offset}")));
        }
        frames += 1;
    }

    Ok((frames, slowest, started_at.elapsed()))
}

fn stage_edits(workspace: &mut GridWorkspace, id: GridId, edits: usize) -> io::Result<()> {
    let total_rows = workspace
        .grid(id)
        .map_or(0, gridline_core::grid::ResultGrid::row_count);
    let stride = (total_rows / edits.max(1)).max(1);
    for edit in 0..edits.min(total_rows) {
        workspace
            .begin_edit(id, CellPosition::new(edit * stride, 3))
            .map_err(io_other)?;
        workspace.set_draft(format!("edited-{edit}"));
    }
    workspace.commit_edit().map_err(io_other)?;
    Ok(())
}

fn synthetic_result_set(rows: usize) -> (ResultSetMetadata, Vec<RowRecord>) {
    let owned = |column: ColumnMetadata| column.owned_by(Some("dbo"), "Events");
    let metadata = ResultSetMetadata {
        columns: vec![
            owned(ColumnMetadata::new("Id", "bigint").primary_key()),
            owned(ColumnMetadata::new("UserId", "int")),
            owned(ColumnMetadata::new("Category", "varchar")),
            owned(ColumnMetadata::new("Payload", "varchar")),
            owned(ColumnMetadata::new("Amount", "decimal")),
            owned(ColumnMetadata::new("CreatedAt", "datetime")),
        ],
        is_editable: true,
        has_multiple_tables: false,
        source_table: None,
    };
    let records = (0..rows)
        .map(|index| {
            let id = i64::try_from(index).unwrap_or(i64::MAX).saturating_add(1);
            let category = match index % 5 {
                0 => "search",
                1 => "play",
                2 => "pause",
                3 => "skip",
                _ => "share",
            };
            #[allow(clippy::cast_precision_loss)]
            let cents = (id % 10_000) as f64 / 100.0;
            let amount = if index % 11 == 0 {
                CellValue::Null
            } else {
                CellValue::Float(cents)
            };
            row_from_pairs([
                ("Id", CellValue::Int(id)),
                ("UserId", CellValue::Int(id % 5_000 + 1)),
                ("Category", CellValue::text(category)),
                ("Payload", CellValue::text(format!("payload-{id}"))),
                ("Amount", amount),
                (
                    "CreatedAt",
                    CellValue::text(format!(
                        "2025-{:02}-{:02} {:02}:{:02}:{:02}",
                        id % 12 + 1,
                        id % 28 + 1,
                        id % 24,
                        id % 60,
                        id % 59
                    )),
                ),
            ])
        })
        .collect();
    (metadata, records)
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1_000.0
}

#[allow(clippy::cast_precision_loss)]
fn per_second(count: usize, elapsed: Duration) -> f64 {
    if elapsed.as_secs_f64() > 0.0 {
        count as f64 / elapsed.as_secs_f64()
    } else {
        0.0
    }
}

fn enforce_assertions(
    config: &BenchmarkConfig,
    open_ms: f64,
    slowest_frame_ms: f64,
    export_rows_per_sec: f64,
) -> io::Result<()> {
    if let Some(max_open_ms) = config.assert_open_ms {
        if open_ms > max_open_ms {
            return Err(io_other(format!(
                "open latency {open_ms:.3}ms exceeded threshold {max_open_ms:.3}ms"
            )));
        }
    }

    if let Some(max_frame_ms) = config.assert_frame_ms {
        if slowest_frame_ms > max_frame_ms {
            return Err(io_other(format!(
                "slowest frame {slowest_frame_ms:.3}ms exceeded threshold {max_frame_ms:.3}ms"
            )));
        }
    }

    if let Some(min_rows_per_sec) = config.assert_min_export_rows_per_sec {
        if export_rows_per_sec < min_rows_per_sec {
            return Err(io_other(format!(
                "export rows/sec {export_rows_per_sec:.3} below threshold {min_rows_per_sec:.3}"
            )));
        }
    }

    Ok(())
}

#[cfg(target_os = "linux")]
fn peak_memory_bytes_best_effort() -> Option<u64> {
    let contents = std::fs::read_to_string("/proc/self/status").ok()?;
    let vm_hwm_line = contents.lines().find(|line| line.starts_with("VmHWM:"))?;
    let kb = vm_hwm_line.split_whitespace().nth(1)?.parse::<u64>().ok()?;
    Some(kb * 1_024)
}

#[cfg(not(target_os = "linux"))]
fn peak_memory_bytes_best_effort() -> Option<u64> {
    None
}

fn parse_args() -> io::Result<BenchmarkConfig> {
    let mut config = BenchmarkConfig::default();
    let outcome = parse_args_from(std::env::args().skip(1), &mut config)?;
    if outcome == ParseOutcome::HelpRequested {
        print_help();
        std::process::exit(0);
    }
    Ok(config)
}

fn parse_format(raw: &str) -> io::Result<ExportFormat> {
    match raw.to_ascii_lowercase().as_str() {
        "csv" => Ok(ExportFormat::Csv),
        "json" => Ok(ExportFormat::Json),
        "xml" => Ok(ExportFormat::Xml),
        "html" => Ok(ExportFormat::Html),
        "md" | "markdown" => Ok(ExportFormat::Markdown),
        "tsv" | "clipboard" => Ok(ExportFormat::Clipboard),
        other => Err(io_other(format!("invalid --format value `{other}`"))),
    }
}

fn parse_count(args: &mut impl Iterator<Item = String>, flag: &str) -> io::Result<usize> {
    next_value(args, flag)?
        .parse::<usize>()
        .map_err(|error| io_other(format!("invalid {flag} value: {error}")))
}

fn parse_threshold(args: &mut impl Iterator<Item = String>, flag: &str) -> io::Result<f64> {
    next_value(args, flag)?
        .parse::<f64>()
        .map_err(|error| io_other(format!("invalid {flag} value: {error}")))
}

fn parse_args_from(
    args: impl IntoIterator<Item = String>,
    config: &mut BenchmarkConfig,
) -> io::Result<ParseOutcome> {
    let mut args = args.into_iter();

    while let Some(flag) = args.next() {
        match flag.as_str() {
            "-h" | "--help" => return Ok(ParseOutcome::HelpRequested),
            "--rows" => config.rows = parse_count(&mut args, "--rows")?,
            "--scroll-steps" => config.scroll_steps = parse_count(&mut args, "--scroll-steps")?,
            "--edits" => config.edits = parse_count(&mut args, "--edits")?,
            "--format" => config.format = parse_format(&next_value(&mut args, "--format")?)?,
            "--assert-open-ms" => {
                config.assert_open_ms = Some(parse_threshold(&mut args, "--assert-open-ms")?);
            }
            "--assert-frame-ms" => {
                config.assert_frame_ms = Some(parse_threshold(&mut args, "--assert-frame-ms")?);
            }
            "--assert-min-export-rows-per-sec" => {
                config.assert_min_export_rows_per_sec = Some(parse_threshold(
                    &mut args,
                    "--assert-min-export-rows-per-sec",
                )?);
            }
            _ => {
                return Err(io_other(format!("unknown argument `{flag}`")));
            }
        }
    }

    Ok(ParseOutcome::Config)
}

fn next_value(args: &mut impl Iterator<Item = String>, flag: &str) -> io::Result<String> {
    args.next()
        .ok_or_else(|| io_other(format!("missing value for `{flag}`")))
}

fn print_help() {
    println!(
        "gridline benchmark runner\n\n\
Usage:\n  cargo run -p gridline-app --bin benchmark -- [OPTIONS]\n\n\
Options:\n  --rows <count>                          Synthetic rows to load (default: 100000)\n  --scroll-steps <count>                  Frames rendered while scrolling (default: 200)\n  --edits <count>                         Pending edits staged before apply (default: 50)\n  --format <csv|json|xml|html|md|tsv>     Export codec to time (default: csv)\n  --assert-open-ms <ms>                   Fail if opening the grid exceeds threshold\n  --assert-frame-ms <ms>                  Fail if the slowest frame exceeds threshold\n  --assert-min-export-rows-per-sec <rps>  Fail if export throughput is below threshold\n"
    );
}

fn io_other(error: impl std::fmt::Display) -> io::Error {
    io::Error::other(error.to_string())
}

#[cfg(test)]
mod tests {
    use gridline_core::actions::ExportFormat;

    use super::{
        enforce_assertions, io_other, next_value, parse_args_from, parse_format,
        run_grid_benchmark, synthetic_result_set, BenchmarkConfig, ParseOutcome,
    };

    #[test]
    fn parse_args_from_applies_overrides() {
        let mut config = BenchmarkConfig::default();
        let outcome = parse_args_from(
            [
                "--rows",
                "2500",
                "--scroll-steps",
                "12",
                "--edits",
                "4",
                "--format",
                "JSON",
                "--assert-open-ms",
                "150",
                "--assert-frame-ms",
                "8.5",
                "--assert-min-export-rows-per-sec",
                "4000",
            ]
            .map(str::to_string),
            &mut config,
        )
        .expect("parse should succeed");

        assert_eq!(outcome, ParseOutcome::Config);
        assert_eq!(config.rows, 2500);
        assert_eq!(config.scroll_steps, 12);
        assert_eq!(config.edits, 4);
        assert_eq!(config.format, ExportFormat::Json);
        assert_eq!(config.assert_open_ms, Some(150.0));
        assert_eq!(config.assert_frame_ms, Some(8.5));
        assert_eq!(config.assert_min_export_rows_per_sec, Some(4000.0));
    }

    #[test]
    fn parse_args_from_detects_help() {
        let mut config = BenchmarkConfig::default();
        let outcome = parse_args_from(vec!["--help".to_string()], &mut config).expect("help parse");
        assert_eq!(outcome, ParseOutcome::HelpRequested);
    }

    #[test]
    fn parse_args_from_fails_for_unknown_flag_and_format() {
        let mut config = BenchmarkConfig::default();
        let err = parse_args_from(vec!["--bogus".to_string()], &mut config)
            .expect_err("unknown flags should fail");
        assert!(err.to_string().contains("unknown argument"));
        assert!(parse_format("yaml").is_err());
        assert_eq!(parse_format("md").expect("markdown"), ExportFormat::Markdown);
    }

    #[test]
    fn next_value_reports_missing_flag_values() {
        let mut args = std::iter::empty::<String>();
        let err = next_value(&mut args, "--rows").expect_err("missing value should fail");
        assert!(err.to_string().contains("missing value for `--rows`"));
    }

    #[test]
    fn synthetic_rows_carry_keys_and_nulls() {
        let (metadata, rows) = synthetic_result_set(12);
        assert_eq!(metadata.columns.len(), 6);
        assert_eq!(rows.len(), 12);
        assert!(rows[0].get("Amount").is_some_and(|value| value.is_null()));
        assert!(rows[1].get("Amount").is_some_and(|value| !value.is_null()));
    }

    #[test]
    fn enforce_assertions_validates_thresholds() {
        let config = BenchmarkConfig {
            assert_open_ms: Some(50.0),
            assert_frame_ms: Some(5.0),
            assert_min_export_rows_per_sec: Some(10_000.0),
            ..BenchmarkConfig::default()
        };

        let open_err = enforce_assertions(&config, 51.0, 1.0, 20_000.0).expect_err("open");
        assert!(open_err.to_string().contains("open latency"));

        let frame_err = enforce_assertions(&config, 10.0, 6.0, 20_000.0).expect_err("frame");
        assert!(frame_err.to_string().contains("slowest frame"));

        let export_err = enforce_assertions(&config, 10.0, 1.0, 9_999.0).expect_err("export");
        assert!(export_err.to_string().contains("export rows/sec"));

        assert!(enforce_assertions(&config, 10.0, 1.0, 20_000.0).is_ok());
    }

    #[test]
    fn io_other_uses_display_text() {
        let err = io_other("boom");
        assert_eq!(err.to_string(), "boom");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn small_benchmark_runs_end_to_end() {
        let config = BenchmarkConfig {
            rows: 500,
            scroll_steps: 10,
            edits: 5,
            ..BenchmarkConfig::default()
        };
        let metrics = run_grid_benchmark(&config).await.expect("benchmark runs");
        assert_eq!(metrics.frames, 10);
        assert_eq!(metrics.exported_rows, 500);
        assert_eq!(metrics.applied, 5);
        assert!(metrics.export_bytes > 0);
    }
}
