use crate::cli::args::{
    Cli, Commands, EvalArgs, HistArgs, LayoutArgs, PresetArg, ProfileArg, SketchArgs, SplitArgs,
    StatsArgs,
};
use crate::core::engine::{self, HistProfile, ScanConfig};
use crate::core::histogram::Grid;
use crate::core::model::{Preset, RecordLayout};
use crate::report;
use anyhow::{Context, Result, bail};
use clap::Parser;
use std::env;
use std::fs;
use std::ops::Bound;
use std::path::PathBuf;
use std::time::{Duration, Instant};

pub fn entry() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Split(args) => split(args),
        Commands::Hist(args) => hist(args),
        Commands::Stats(args) => stats(args),
        Commands::Sketch(args) => sketch(args),
        Commands::Eval(args) => eval(args),
    }
}

fn preset(arg: PresetArg) -> Preset {
    match arg {
        PresetArg::Imc => Preset::Imc,
        PresetArg::Caida2016 => Preset::Caida2016,
        PresetArg::Caida2018 => Preset::Caida2018,
        PresetArg::Caida2018Tail => Preset::Caida2018Tail,
    }
}

fn resolve_layout(args: &LayoutArgs, default_key: Option<(usize, usize)>) -> Result<RecordLayout> {
    let preset = preset(args.preset);
    let (width, offset, length) = preset.dimensions();
    let width = args.record_width.unwrap_or(width);
    // A command-specific key default applies only where the record can hold it.
    let (offset, length) = default_key
        .filter(|&(o, l)| o + l <= width)
        .unwrap_or((offset, length));
    let layout = RecordLayout::new(
        width,
        args.key_offset.unwrap_or(offset),
        args.key_length.unwrap_or(length),
    )?;
    log::debug!(
        "layout: preset {} width {} key {}+{}",
        preset.as_str(),
        layout.record_width(),
        layout.key_offset(),
        layout.key_length()
    );
    Ok(layout)
}

fn scan_config(layout: RecordLayout, args: &LayoutArgs, threads: usize, jobs: usize) -> ScanConfig {
    ScanConfig {
        layout,
        chunk_size: args.chunk_size,
        decode_threads: if jobs == 1 { threads } else { 1 },
    }
}

fn preflight(inputs: &[PathBuf], threads: usize, chunk_size: usize) -> Result<()> {
    if threads == 0 {
        bail!("--threads must be >= 1");
    }
    if chunk_size == 0 {
        bail!("--chunk-size must be >= 1");
    }
    for input in inputs {
        if input.as_os_str() == "-" {
            bail!("stdin is not supported; provide a file path");
        }
    }
    Ok(())
}

fn resolve_profile(profile: ProfileArg, grid: Option<&str>) -> Result<HistProfile> {
    let mut p = match profile {
        ProfileArg::Small => HistProfile::small(),
        ProfileArg::Large => HistProfile::large(),
    };
    if let Some(segments) = grid {
        p.grid = Grid::parse(segments).with_context(|| format!("invalid --grid '{}'", segments))?;
    }
    Ok(p)
}

/// Logs every failed job and returns how many there were.
fn report_failures<T>(inputs: &[PathBuf], results: &[Result<T>]) -> usize {
    let mut failed = 0;
    for (path, res) in inputs.iter().zip(results) {
        if let Err(e) = res {
            log::warn!("{}: {:#}", path.display(), e);
            failed += 1;
        }
    }
    failed
}

fn split(args: SplitArgs) -> Result<()> {
    let stats = stats_enabled();
    let t0 = Instant::now();
    stage(stats, "preflight", || {
        preflight(&args.inputs, args.threads, args.layout.chunk_size)
    })?;

    // Groups carry whole records; the key fields are irrelevant here.
    let layout = resolve_layout(&args.layout, None)?;
    let layout = RecordLayout::whole(layout.record_width())?;
    let partitions = args
        .partitions
        .unwrap_or_else(|| preset(args.layout.preset).partition_count());
    if partitions == 0 {
        bail!("--partitions must be >= 1");
    }
    fs::create_dir_all(&args.out)
        .with_context(|| format!("failed to create output dir {}", args.out.display()))?;
    let cfg = scan_config(layout, &args.layout, args.threads, args.inputs.len());

    let t_split = Instant::now();
    let results = engine::run_jobs(&args.inputs, args.threads, |i, path| {
        engine::split_source(path, i, partitions, &args.out, &args.extension, &cfg)
    });
    stage_done(stats, "split", t_split);

    let failed = report_failures(&args.inputs, &results);
    if stats {
        let records: u64 = results
            .iter()
            .flatten()
            .map(|r| r.summary.scan.records)
            .sum();
        let files: usize = results.iter().flatten().map(|r| r.files.len()).sum();
        eprintln!(
            "FLOWSIZE_STATS inputs={} records={} group_files={}",
            args.inputs.len(),
            records,
            files
        );
        eprintln!("FLOWSIZE_STATS total={}", fmt_dur(t0.elapsed()));
    }
    if failed > 0 {
        bail!("{} of {} inputs failed", failed, args.inputs.len());
    }
    Ok(())
}

fn hist(args: HistArgs) -> Result<()> {
    let stats = stats_enabled();
    let t0 = Instant::now();
    stage(stats, "preflight", || {
        preflight(&args.inputs, args.threads, args.layout.chunk_size)
    })?;

    let layout = resolve_layout(&args.layout, None)?;
    let mut profile = resolve_profile(args.profile, args.grid.as_deref())?;
    if let Some(above) = args.window_above {
        profile.window.0 = Bound::Excluded(above);
    }
    if let Some(max) = args.window_max {
        profile.window.1 = Bound::Included(max);
    }
    let cfg = scan_config(layout, &args.layout, args.threads, args.inputs.len());

    let t_out = Instant::now();
    let real_dir = args.out.join("real");
    let interp_dir = args.out.join("interp");
    for dir in [&real_dir, &interp_dir] {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create output dir {}", dir.display()))?;
    }
    stage_done(stats, "mkdir", t_out);

    let t_hist = Instant::now();
    let results = engine::run_jobs(&args.inputs, args.threads, |_, path| {
        let out = engine::histogram_dataset(path, &profile, &cfg)?;
        let real_path = real_dir.join(format!("{}.tsv", out.dataset_id));
        report::table::write_window(&real_path, &out.window)
            .with_context(|| format!("failed to write {}", real_path.display()))?;
        let interp_path = interp_dir.join(format!("{}.tsv", out.dataset_id));
        report::table::write_interpolated(&interp_path, &out.interpolated)
            .with_context(|| format!("failed to write {}", interp_path.display()))?;
        Ok(out)
    });
    stage_done(stats, "hist", t_hist);

    let failed = report_failures(&args.inputs, &results);
    if stats {
        let records: u64 = results.iter().flatten().map(|r| r.scan.records).sum();
        let residue: usize = results.iter().flatten().map(|r| r.scan.residue).sum();
        let keys: u64 = results
            .iter()
            .flatten()
            .map(|r| r.histogram.distinct_keys())
            .sum();
        eprintln!(
            "FLOWSIZE_STATS inputs={} records={} keys={} residue_bytes={} grid_points={}",
            args.inputs.len(),
            records,
            keys,
            residue,
            profile.grid.len()
        );
    }

    if args.zip {
        let t_zip = Instant::now();
        let zip_path =
            report::zip::write_zip(&args.out).with_context(|| "failed to create zip output")?;
        stage_done(stats, "zip", t_zip);
        if stats {
            let zip_size = fs::metadata(&zip_path).map(|m| m.len()).unwrap_or(0);
            eprintln!(
                "FLOWSIZE_STATS output zip={} bytes={}",
                zip_path.display(),
                zip_size
            );
        }
    }

    if stats {
        eprintln!("FLOWSIZE_STATS output_dir={}", args.out.display());
        eprintln!("FLOWSIZE_STATS total={}", fmt_dur(t0.elapsed()));
    }
    if failed > 0 {
        bail!("{} of {} inputs failed", failed, args.inputs.len());
    }
    Ok(())
}

fn stats(args: StatsArgs) -> Result<()> {
    let stats = stats_enabled();
    let t0 = Instant::now();
    stage(stats, "preflight", || {
        preflight(&args.inputs, args.threads, args.layout.chunk_size)
    })?;

    let layout = resolve_layout(&args.layout, None)?;
    let cfg = scan_config(layout, &args.layout, args.threads, args.inputs.len());

    let t_count = Instant::now();
    let results = engine::run_jobs(&args.inputs, args.threads, |_, path| {
        engine::dataset_stats(path, &cfg)
    });
    stage_done(stats, "count", t_count);

    let failed = report_failures(&args.inputs, &results);
    let rows: Vec<_> = results.into_iter().flatten().map(|(row, _)| row).collect();
    if let Some(parent) = args.out.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output dir {}", parent.display()))?;
    }
    report::table::write_stats(&args.out, &rows)
        .with_context(|| format!("failed to write {}", args.out.display()))?;

    if stats {
        eprintln!("FLOWSIZE_STATS datasets={}", rows.len());
        eprintln!("FLOWSIZE_STATS total={}", fmt_dur(t0.elapsed()));
    }
    if failed > 0 {
        bail!("{} of {} inputs failed", failed, args.inputs.len());
    }
    Ok(())
}

fn sketch(args: SketchArgs) -> Result<()> {
    let stats = stats_enabled();
    let t0 = Instant::now();
    let inputs = [args.input.clone()];
    stage(stats, "preflight", || {
        preflight(&inputs, args.threads, args.layout.chunk_size)?;
        if !args.input.is_file() {
            bail!("input file not found: {}", args.input.display());
        }
        Ok(())
    })?;

    let layout = resolve_layout(&args.layout, Some((8, 8)))?;
    let cfg = scan_config(layout, &args.layout, args.threads, 1);
    fs::create_dir_all(&args.out)
        .with_context(|| format!("failed to create output dir {}", args.out.display()))?;

    let seeds: Vec<u32> = args.seeds.clone().collect();
    let t_sketch = Instant::now();
    let results = engine::run_jobs(&seeds, args.threads, |_, &seed| {
        let cfg = ScanConfig {
            decode_threads: 1,
            ..cfg
        };
        engine::sketch_seed(&args.input, seed, args.counters, &args.out, &cfg)
    });
    stage_done(stats, "sketch", t_sketch);

    let mut failed = 0;
    for (seed, res) in seeds.iter().zip(&results) {
        match res {
            Ok((array, scan)) => log::debug!(
                "seed {}: {} records, {} counted, {} residue bytes",
                seed,
                scan.records,
                array.total(),
                scan.residue
            ),
            Err(e) => {
                log::warn!("seed {}: {:#}", seed, e);
                failed += 1;
            }
        }
    }
    log::info!(
        "{}: {} counter arrays written to {}",
        args.input.display(),
        seeds.len() - failed,
        args.out.display()
    );
    if stats {
        eprintln!("FLOWSIZE_STATS seeds={} counters={}", seeds.len(), args.counters);
        eprintln!("FLOWSIZE_STATS total={}", fmt_dur(t0.elapsed()));
    }
    if failed > 0 {
        bail!("{} of {} seeds failed", failed, seeds.len());
    }
    Ok(())
}

fn eval(args: EvalArgs) -> Result<()> {
    let profile = resolve_profile(args.profile, args.grid.as_deref())?;
    let truth = report::table::read_window(&args.truth)?;
    let predicted = report::table::read_values(&args.pred)?;
    let scores = engine::evaluate(&predicted, &profile.grid, &truth)
        .with_context(|| format!("failed to score {}", args.pred.display()))?;
    println!("mrd\t{:.6}", scores.mrd);
    println!("wmrd\t{:.6}", scores.wmrd);
    Ok(())
}

fn stats_enabled() -> bool {
    matches!(env::var("FLOWSIZE_STATS").as_deref(), Ok("1"))
}

fn stage<F>(stats: bool, name: &str, f: F) -> Result<()>
where
    F: FnOnce() -> Result<()>,
{
    let t = Instant::now();
    let res = f();
    if stats {
        eprintln!("FLOWSIZE_STATS stage={} time={}", name, fmt_dur(t.elapsed()));
    }
    res
}

fn stage_done(stats: bool, name: &str, t: Instant) {
    if stats {
        eprintln!("FLOWSIZE_STATS stage={} time={}", name, fmt_dur(t.elapsed()));
    }
}

fn fmt_dur(d: Duration) -> String {
    if d.as_secs_f64() < 1.0 {
        format!("{}ms", d.as_millis())
    } else {
        format!("{:.3}s", d.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout_args(preset: PresetArg) -> LayoutArgs {
        LayoutArgs {
            preset,
            record_width: None,
            key_offset: None,
            key_length: None,
            chunk_size: 4096,
        }
    }

    #[test]
    fn preset_layout_with_overrides() {
        let mut args = layout_args(PresetArg::Caida2018);
        let l = resolve_layout(&args, None).unwrap();
        assert_eq!((l.record_width(), l.key_offset(), l.key_length()), (21, 0, 13));
        args.key_offset = Some(13);
        args.key_length = Some(8);
        let l = resolve_layout(&args, None).unwrap();
        assert_eq!((l.key_offset(), l.key_length()), (13, 8));
        args.key_length = Some(9);
        assert!(resolve_layout(&args, None).is_err());
    }

    #[test]
    fn sketch_key_defaults() {
        let args = layout_args(PresetArg::Caida2016);
        let l = resolve_layout(&args, Some((8, 8))).unwrap();
        assert_eq!((l.key_offset(), l.key_length()), (8, 8));
    }

    #[test]
    fn sketch_key_default_yields_to_narrow_records() {
        let args = layout_args(PresetArg::Imc);
        let l = resolve_layout(&args, Some((8, 8))).unwrap();
        assert_eq!((l.record_width(), l.key_offset(), l.key_length()), (13, 0, 13));

        let mut args = layout_args(PresetArg::Imc);
        args.key_offset = Some(5);
        args.key_length = Some(8);
        let l = resolve_layout(&args, Some((8, 8))).unwrap();
        assert_eq!((l.key_offset(), l.key_length()), (5, 8));
    }

    #[test]
    fn grid_override_replaces_profile_grid() {
        let p = resolve_profile(ProfileArg::Small, Some("1:1001,1001:10001:10")).unwrap();
        assert_eq!(p.grid.len(), 1900);
        assert!(resolve_profile(ProfileArg::Large, Some("3:1")).is_err());
    }

    #[test]
    fn durations_format_like_stage_logs() {
        assert_eq!(fmt_dur(Duration::from_millis(12)), "12ms");
        assert_eq!(fmt_dur(Duration::from_millis(1500)), "1.500s");
    }
}
