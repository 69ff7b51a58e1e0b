use crate::core::histogram::{DatasetStats, HistogramEntry, Interpolated};
use anyhow::{Context, Result, bail};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

pub fn write_window(path: &Path, entries: &[HistogramEntry]) -> Result<()> {
    let mut w = BufWriter::new(
        File::create(path).with_context(|| format!("create {} failed", path.display()))?,
    );
    writeln!(w, "#frequency\tkey_count")?;
    for e in entries {
        writeln!(w, "{}\t{}", e.frequency, e.key_count)?;
    }
    w.flush()?;
    Ok(())
}

pub fn write_interpolated(path: &Path, interpolated: &Interpolated) -> Result<()> {
    let mut w = BufWriter::new(
        File::create(path).with_context(|| format!("create {} failed", path.display()))?,
    );
    writeln!(w, "#frequency\tkey_count")?;
    for (freq, value) in interpolated.pairs() {
        writeln!(w, "{}\t{:.6}", freq, value)?;
    }
    w.flush()?;
    Ok(())
}

pub fn write_stats(path: &Path, rows: &[DatasetStats]) -> Result<()> {
    let mut w = BufWriter::new(
        File::create(path).with_context(|| format!("create {} failed", path.display()))?,
    );
    writeln!(w, "#dataset_id\ttotal_packets\ttotal_keys\tmax_frequency")?;
    for r in rows {
        writeln!(
            w,
            "{}\t{}\t{}\t{}",
            r.dataset_id, r.total_packets, r.total_keys, r.max_frequency
        )?;
    }
    w.flush()?;
    Ok(())
}

fn data_lines(path: &Path) -> Result<Vec<(usize, String)>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut out = Vec::new();
    for (i, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("failed to read {}", path.display()))?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        out.push((i + 1, trimmed.to_string()));
    }
    Ok(out)
}

/// Reads a `frequency<TAB>key_count` table as written by [`write_window`].
pub fn read_window(path: &Path) -> Result<Vec<HistogramEntry>> {
    let mut entries: Vec<HistogramEntry> = Vec::new();
    for (lineno, line) in data_lines(path)? {
        let mut fields = line.split_whitespace();
        let (Some(f), Some(k), None) = (fields.next(), fields.next(), fields.next()) else {
            bail!("{}:{}: expected two columns", path.display(), lineno);
        };
        let frequency: u64 = f
            .parse()
            .with_context(|| format!("{}:{}: bad frequency", path.display(), lineno))?;
        let key_count: u64 = k
            .parse()
            .with_context(|| format!("{}:{}: bad key count", path.display(), lineno))?;
        if let Some(prev) = entries.last() {
            if prev.frequency >= frequency {
                bail!(
                    "{}:{}: frequencies must be strictly increasing",
                    path.display(),
                    lineno
                );
            }
        }
        entries.push(HistogramEntry {
            frequency,
            key_count,
        });
    }
    Ok(entries)
}

/// Reads one value per line; with several columns the last one is used.
pub fn read_values(path: &Path) -> Result<Vec<f64>> {
    data_lines(path)?
        .into_iter()
        .map(|(lineno, line)| {
            let field = line.split_whitespace().last().unwrap_or_default();
            field
                .parse::<f64>()
                .with_context(|| format!("{}:{}: bad value '{}'", path.display(), lineno, field))
        })
        .collect()
}
