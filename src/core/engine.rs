use crate::core::counter;
use crate::core::eval::{self, Scores};
use crate::core::histogram::{DatasetStats, FrequencyHistogram, Grid, HistogramEntry, Interpolated};
use crate::core::model::{RecordLayout, ScanSummary};
use crate::core::partition::{self, FileGroupSink, PartitionSummary};
use crate::core::sketch::{self, CounterArray};
use anyhow::{Context, Result, anyhow};
use crossbeam_channel as channel;
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::thread;

/// Parameters shared by every scan of one run.
#[derive(Clone, Copy, Debug)]
pub struct ScanConfig {
    pub layout: RecordLayout,
    pub chunk_size: usize,
    /// Decompression threads handed to each file opener.
    pub decode_threads: usize,
}

/// Frequency window and target grid for one histogram run.
#[derive(Clone, Debug)]
pub struct HistProfile {
    pub window: (Bound<u64>, Bound<u64>),
    pub grid: Grid,
}

impl HistProfile {
    pub fn small() -> Self {
        Self {
            window: (Bound::Unbounded, Bound::Included(10)),
            grid: Grid::small(),
        }
    }

    pub fn large() -> Self {
        Self {
            window: (Bound::Excluded(10), Bound::Included(50_000)),
            grid: Grid::large(),
        }
    }
}

/// Runs `work` over every job on a fixed pool of worker threads.
///
/// Results come back in job order. A failing job does not stop the others.
pub fn run_jobs<J, T, F>(jobs: &[J], threads: usize, work: F) -> Vec<Result<T>>
where
    J: Sync,
    T: Send,
    F: Fn(usize, &J) -> Result<T> + Sync,
{
    if jobs.is_empty() {
        return Vec::new();
    }
    let threads = threads.clamp(1, jobs.len());
    let (job_tx, job_rx) = channel::bounded::<usize>(threads * 2);
    let (result_tx, result_rx) = channel::unbounded::<(usize, Result<T>)>();

    thread::scope(|s| {
        s.spawn(move || {
            for index in 0..jobs.len() {
                if job_tx.send(index).is_err() {
                    return;
                }
            }
        });

        let work = &work;
        for _ in 0..threads {
            let rx = job_rx.clone();
            let tx = result_tx.clone();
            s.spawn(move || {
                for index in rx.iter() {
                    let res = work(index, &jobs[index]);
                    if tx.send((index, res)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(result_tx);

        let mut parts: Vec<Option<Result<T>>> = (0..jobs.len()).map(|_| None).collect();
        for (index, res) in result_rx.iter() {
            parts[index] = Some(res);
        }
        parts
            .into_iter()
            .enumerate()
            .map(|(index, part)| {
                part.unwrap_or_else(|| Err(anyhow!("job {} produced no result", index)))
            })
            .collect()
    })
}

pub fn dataset_id(path: &Path) -> Result<String> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.trim_end_matches(".dat").to_string())
        .with_context(|| format!("failed to determine dataset id from {}", path.display()))
}

pub struct SplitOutput {
    pub summary: PartitionSummary,
    pub files: Vec<PathBuf>,
}

pub fn split_source(
    path: &Path,
    source_index: usize,
    partitions: usize,
    out_dir: &Path,
    extension: &str,
    cfg: &ScanConfig,
) -> Result<SplitOutput> {
    let mut sink = FileGroupSink::new(out_dir, source_index, extension);
    let summary = partition::partition_file(
        path,
        &cfg.layout,
        partitions,
        cfg.chunk_size,
        cfg.decode_threads,
        &mut sink,
    )?;
    log::info!(
        "{}: {} records into {} groups",
        path.display(),
        summary.scan.records,
        partitions
    );
    Ok(SplitOutput {
        summary,
        files: sink.written().to_vec(),
    })
}

pub struct HistOutput {
    pub dataset_id: String,
    pub scan: ScanSummary,
    pub histogram: FrequencyHistogram,
    pub window: Vec<HistogramEntry>,
    pub interpolated: Interpolated,
}

pub fn histogram_dataset(path: &Path, profile: &HistProfile, cfg: &ScanConfig) -> Result<HistOutput> {
    let dataset_id = dataset_id(path)?;
    let counted = counter::count_file(path, &cfg.layout, cfg.chunk_size, cfg.decode_threads)?;
    let histogram = FrequencyHistogram::from_table(&counted.table);
    let window = histogram.window(profile.window);
    let interpolated = histogram
        .interpolate(&profile.grid)
        .with_context(|| format!("dataset {}", dataset_id))?;
    log::info!(
        "{}: {} records, {} keys, {} distinct frequencies",
        dataset_id,
        counted.scan.records,
        counted.table.distinct_keys(),
        histogram.len()
    );
    log::debug!(
        "{}: {} windowed entries, {} grid points",
        dataset_id,
        window.len(),
        profile.grid.len()
    );
    Ok(HistOutput {
        dataset_id,
        scan: counted.scan,
        histogram,
        window,
        interpolated,
    })
}

pub fn dataset_stats(path: &Path, cfg: &ScanConfig) -> Result<(DatasetStats, ScanSummary)> {
    let dataset_id = dataset_id(path)?;
    let counted = counter::count_file(path, &cfg.layout, cfg.chunk_size, cfg.decode_threads)?;
    let histogram = FrequencyHistogram::from_table(&counted.table);
    Ok((DatasetStats::from_histogram(&dataset_id, &histogram), counted.scan))
}

pub fn sketch_seed(
    path: &Path,
    seed: u32,
    counters: usize,
    out_dir: &Path,
    cfg: &ScanConfig,
) -> Result<(CounterArray, ScanSummary)> {
    let (array, scan) = sketch::sketch_file(
        path,
        &cfg.layout,
        seed,
        counters,
        cfg.chunk_size,
        cfg.decode_threads,
    )?;
    array.save(&out_dir.join(format!("{}.bin", seed)))?;
    Ok((array, scan))
}

/// Scores a prediction array laid out on `grid` against a ground-truth window.
pub fn evaluate(predicted: &[f64], grid: &Grid, truth: &[HistogramEntry]) -> Result<Scores> {
    if predicted.len() != grid.len() {
        return Err(anyhow!(
            "prediction has {} values but the grid has {} points",
            predicted.len(),
            grid.len()
        ));
    }
    let interpolated = Interpolated {
        grid: grid.clone(),
        values: predicted.iter().map(|v| v.max(0.0)).collect(),
    };
    Ok(eval::score(&interpolated, truth)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn cfg(width: usize) -> ScanConfig {
        ScanConfig {
            layout: RecordLayout::whole(width).unwrap(),
            chunk_size: 4096,
            decode_threads: 1,
        }
    }

    #[test]
    fn jobs_return_in_input_order() {
        let jobs: Vec<u64> = (0..50).collect();
        let calls = AtomicUsize::new(0);
        let out = run_jobs(&jobs, 4, |i, &j| {
            calls.fetch_add(1, Ordering::Relaxed);
            assert_eq!(i as u64, j);
            Ok(j * 2)
        });
        assert_eq!(calls.load(Ordering::Relaxed), 50);
        let values: Vec<u64> = out.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, (0..50).map(|j| j * 2).collect::<Vec<_>>());
    }

    #[test]
    fn one_failed_file_does_not_abort_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("0_0.dat");
        let mut data = Vec::new();
        for (key, times) in [(1u8, 1), (2, 1), (3, 2), (4, 5)] {
            for _ in 0..times {
                data.extend_from_slice(&[key; 16]);
            }
        }
        fs::write(&good, &data).unwrap();
        let missing = dir.path().join("0_1.dat");
        let paths = vec![good, missing];
        let config = cfg(16);
        let profile = HistProfile::small();

        let out = run_jobs(&paths, 2, |_, p| histogram_dataset(p, &profile, &config));
        assert_eq!(out.len(), 2);
        let first = out[0].as_ref().unwrap();
        assert_eq!(first.dataset_id, "0_0");
        assert_eq!(first.histogram.total_occurrences(), 9);
        assert_eq!(first.window.len(), 3);
        assert_eq!(first.interpolated.values.len(), 10);
        assert!((first.interpolated.values[0] - 2.0).abs() < 1e-9);
        assert!(out[1].is_err());
    }

    #[test]
    fn split_writes_named_groups() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("formatted00.dat");
        fs::write(&src, vec![7u8; 16 * 25]).unwrap();
        let out = dir.path().join("groups");
        fs::create_dir_all(&out).unwrap();
        let res = split_source(&src, 3, 10, &out, "dat", &cfg(16)).unwrap();
        assert_eq!(res.files.len(), 10);
        assert_eq!(res.summary.written.iter().sum::<u64>(), 25);
        assert_eq!(fs::metadata(out.join("3_0.dat")).unwrap().len(), 48);
        assert_eq!(fs::metadata(out.join("3_9.dat")).unwrap().len(), 32);
    }

    #[test]
    fn evaluate_checks_grid_length() {
        let truth = [HistogramEntry { frequency: 1, key_count: 3 }];
        assert!(evaluate(&[1.0, 2.0], &Grid::small(), &truth).is_err());
        let mut pred = vec![0.0; 10];
        pred[0] = 3.2;
        let s = evaluate(&pred, &Grid::small(), &truth).unwrap();
        assert_eq!(s.wmrd, 0.0);
    }
}
