use crate::core::counter::FrequencyTable;
use crate::core::error::{FlowError, FlowResult};
use std::collections::BTreeMap;
use std::ops::RangeBounds;

/// `key_count` distinct keys were each observed exactly `frequency` times.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct HistogramEntry {
    pub frequency: u64,
    pub key_count: u64,
}

/// Flow-size distribution, strictly increasing by frequency.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FrequencyHistogram {
    entries: Vec<HistogramEntry>,
}

impl FrequencyHistogram {
    pub fn from_table(table: &FrequencyTable) -> Self {
        Self::from_counts(table.counts())
    }

    /// Builds the histogram from raw per-key occurrence counts.
    pub fn from_counts<I: IntoIterator<Item = u64>>(counts: I) -> Self {
        let mut by_freq: BTreeMap<u64, u64> = BTreeMap::new();
        for c in counts {
            if c > 0 {
                *by_freq.entry(c).or_insert(0) += 1;
            }
        }
        let entries = by_freq
            .into_iter()
            .map(|(frequency, key_count)| HistogramEntry {
                frequency,
                key_count,
            })
            .collect();
        Self { entries }
    }

    pub fn entries(&self) -> &[HistogramEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn distinct_keys(&self) -> u64 {
        self.entries.iter().map(|e| e.key_count).sum()
    }

    pub fn total_occurrences(&self) -> u64 {
        self.entries.iter().map(|e| e.frequency * e.key_count).sum()
    }

    pub fn max_frequency(&self) -> Option<u64> {
        self.entries.last().map(|e| e.frequency)
    }

    /// Entries whose frequency falls inside `range`, e.g. `..=10` or
    /// `(Bound::Excluded(10), Bound::Included(50_000))`.
    pub fn window<R: RangeBounds<u64>>(&self, range: R) -> Vec<HistogramEntry> {
        self.entries
            .iter()
            .filter(|e| range.contains(&e.frequency))
            .copied()
            .collect()
    }

    /// Piecewise-linear key counts at every grid point.
    ///
    /// Points beyond the observed frequencies extend the first or last
    /// segment. Negative results are clamped to zero.
    pub fn interpolate(&self, grid: &Grid) -> FlowResult<Interpolated> {
        if self.entries.len() < 2 {
            return Err(FlowError::InterpolationUnderdetermined {
                points: self.entries.len(),
            });
        }
        let values = grid
            .points()
            .iter()
            .map(|&x| self.value_at(x as f64).max(0.0))
            .collect();
        Ok(Interpolated {
            grid: grid.clone(),
            values,
        })
    }

    pub fn interpolate_all(&self, grids: &[Grid]) -> FlowResult<Vec<Interpolated>> {
        grids.iter().map(|g| self.interpolate(g)).collect()
    }

    fn value_at(&self, x: f64) -> f64 {
        let e = &self.entries;
        let n = e.len();
        let seg = match e.binary_search_by(|p| (p.frequency as f64).total_cmp(&x)) {
            Ok(i) => return e[i].key_count as f64,
            Err(0) => 0,
            Err(i) if i >= n => n - 2,
            Err(i) => i - 1,
        };
        let (x0, y0) = (e[seg].frequency as f64, e[seg].key_count as f64);
        let (x1, y1) = (e[seg + 1].frequency as f64, e[seg + 1].key_count as f64);
        y0 + (x - x0) * (y1 - y0) / (x1 - x0)
    }
}

/// Strictly increasing target frequencies.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Grid {
    points: Vec<u64>,
}

impl Grid {
    pub fn new(points: Vec<u64>) -> FlowResult<Self> {
        if points.is_empty() {
            return Err(FlowError::config("interpolation grid is empty"));
        }
        if let Some(w) = points.windows(2).find(|w| w[0] >= w[1]) {
            return Err(FlowError::config(format!(
                "interpolation grid is not strictly increasing at {} -> {}",
                w[0], w[1]
            )));
        }
        Ok(Self { points })
    }

    /// Concatenates `start..end` ranges stepped by `step`.
    pub fn from_segments(segments: &[(u64, u64, u64)]) -> FlowResult<Self> {
        let mut points = Vec::new();
        for &(start, end, step) in segments {
            if step == 0 {
                return Err(FlowError::config("grid step must be >= 1"));
            }
            points.extend((start..end).step_by(step as usize));
        }
        Self::new(points)
    }

    /// Parses `start:end:step[,start:end:step...]`, `end` exclusive.
    pub fn parse(text: &str) -> FlowResult<Self> {
        let mut segments = Vec::new();
        for part in text.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let fields: Vec<&str> = part.split(':').collect();
            let parsed: Vec<u64> = fields
                .iter()
                .map(|f| f.trim().parse::<u64>())
                .collect::<Result<_, _>>()
                .map_err(|e| FlowError::config(format!("bad grid segment '{}': {}", part, e)))?;
            match parsed.as_slice() {
                &[start, end] => segments.push((start, end, 1)),
                &[start, end, step] => segments.push((start, end, step)),
                _ => {
                    return Err(FlowError::config(format!(
                        "bad grid segment '{}': expected start:end[:step]",
                        part
                    )));
                }
            }
        }
        Self::from_segments(&segments)
    }

    /// Frequencies 1 through 10.
    pub fn small() -> Self {
        Self {
            points: (1..=10).collect(),
        }
    }

    /// Unit steps over 11..=1000, then steps of 10 over 1001..10001.
    pub fn large() -> Self {
        Self {
            points: (11..=1000).chain((1001..10001).step_by(10)).collect(),
        }
    }

    pub fn points(&self) -> &[u64] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn position(&self, frequency: u64) -> Option<usize> {
        self.points.binary_search(&frequency).ok()
    }
}

/// Interpolated key counts aligned with a grid.
#[derive(Clone, Debug, PartialEq)]
pub struct Interpolated {
    pub grid: Grid,
    pub values: Vec<f64>,
}

impl Interpolated {
    pub fn pairs(&self) -> impl Iterator<Item = (u64, f64)> + '_ {
        self.grid.points().iter().copied().zip(self.values.iter().copied())
    }

    /// Rounded, non-negative key counts at exactly the given frequencies.
    pub fn align_to(&self, frequencies: &[u64]) -> FlowResult<Vec<u64>> {
        frequencies
            .iter()
            .map(|&f| {
                let i = self
                    .grid
                    .position(f)
                    .ok_or(FlowError::FrequencyOffGrid(f))?;
                Ok(self.values[i].max(0.0).round() as u64)
            })
            .collect()
    }
}

/// Dataset totals derived from one histogram.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DatasetStats {
    pub dataset_id: String,
    pub total_packets: u64,
    pub total_keys: u64,
    pub max_frequency: u64,
}

impl DatasetStats {
    pub fn from_histogram(dataset_id: &str, hist: &FrequencyHistogram) -> Self {
        Self {
            dataset_id: dataset_id.to_string(),
            total_packets: hist.total_occurrences(),
            total_keys: hist.distinct_keys(),
            max_frequency: hist.max_frequency().unwrap_or(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ops::Bound;

    fn hist(points: &[(u64, u64)]) -> FrequencyHistogram {
        let mut counts = Vec::new();
        for &(freq, keys) in points {
            counts.extend(std::iter::repeat_n(freq, keys as usize));
        }
        FrequencyHistogram::from_counts(counts)
    }

    #[test]
    fn inverts_and_sorts() {
        let mut table = FrequencyTable::new();
        for key in [b"a", b"b", b"a", b"c", b"d", b"d", b"d", b"a"] {
            table.add(key);
        }
        let h = FrequencyHistogram::from_table(&table);
        assert_eq!(
            h.entries(),
            &[
                HistogramEntry { frequency: 1, key_count: 2 },
                HistogramEntry { frequency: 3, key_count: 2 },
            ]
        );
        assert_eq!(h.distinct_keys(), table.distinct_keys() as u64);
        assert_eq!(h.total_occurrences(), table.total_occurrences());
    }

    #[test]
    fn ten_record_histogram() {
        let h = FrequencyHistogram::from_counts([2, 1, 1, 1, 1, 1, 1, 1, 1]);
        assert_eq!(
            h.entries(),
            &[
                HistogramEntry { frequency: 1, key_count: 8 },
                HistogramEntry { frequency: 2, key_count: 1 },
            ]
        );
    }

    #[test]
    fn window_bounds() {
        let h = hist(&[(1, 5), (5, 4), (10, 3), (11, 2), (60_000, 1)]);
        let small: Vec<u64> = h.window(..=10).iter().map(|e| e.frequency).collect();
        assert_eq!(small, vec![1, 5, 10]);
        let large: Vec<u64> = h
            .window((Bound::Excluded(10), Bound::Included(50_000)))
            .iter()
            .map(|e| e.frequency)
            .collect();
        assert_eq!(large, vec![11]);
        assert_eq!(h.window(..).len(), 5);
    }

    #[test]
    fn grid_points_reproduce_observed_counts() {
        let h = hist(&[(1, 900), (2, 120), (4, 33), (9, 7), (30, 2)]);
        let grid = Grid::new(vec![1, 2, 3, 4, 9, 30]).unwrap();
        let out = h.interpolate(&grid).unwrap();
        for (x, y) in out.pairs() {
            if let Some(e) = h.entries().iter().find(|e| e.frequency == x) {
                assert!((y - e.key_count as f64).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn values_between_points_lie_on_the_segment() {
        let h = hist(&[(10, 100), (20, 40)]);
        let grid = Grid::from_segments(&[(10, 21, 1)]).unwrap();
        let out = h.interpolate(&grid).unwrap();
        for (x, y) in out.pairs() {
            let expected = 100.0 + (x as f64 - 10.0) * (40.0 - 100.0) / 10.0;
            assert!((y - expected).abs() < 1e-9, "x = {}", x);
        }
    }

    #[test]
    fn extrapolates_and_clamps() {
        let h = hist(&[(2, 30), (4, 20)]);
        let grid = Grid::new(vec![1, 6, 8, 20]).unwrap();
        let out = h.interpolate(&grid).unwrap();
        assert!((out.values[0] - 35.0).abs() < 1e-9);
        assert!((out.values[1] - 10.0).abs() < 1e-9);
        assert_eq!(out.values[2], 0.0);
        assert_eq!(out.values[3], 0.0);
    }

    #[test]
    fn single_point_is_underdetermined() {
        let h = hist(&[(3, 10)]);
        let err = h.interpolate(&Grid::small()).unwrap_err();
        assert!(matches!(err, FlowError::InterpolationUnderdetermined { points: 1 }));
        let empty = FrequencyHistogram::default();
        assert!(empty.interpolate(&Grid::small()).is_err());
    }

    #[test]
    fn several_grids_at_once() {
        let h = hist(&[(1, 50), (11, 10), (2000, 1)]);
        let out = h.interpolate_all(&[Grid::small(), Grid::large()]).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].values.len(), 10);
        assert!((out[0].values[0] - 50.0).abs() < 1e-9);
        assert!((out[1].values[0] - 10.0).abs() < 1e-9);
        assert_eq!(out[1].values.len(), Grid::large().len());
    }

    #[test]
    fn canonical_grids() {
        assert_eq!(Grid::small().len(), 10);
        let large = Grid::large();
        assert_eq!(large.len(), 990 + 900);
        assert_eq!(large.points()[0], 11);
        assert_eq!(large.points()[990], 1001);
        assert_eq!(*large.points().last().unwrap(), 9991);
    }

    #[test]
    fn parse_grid_segments() {
        let g = Grid::parse("1:4, 10:31:10").unwrap();
        assert_eq!(g.points(), &[1, 2, 3, 10, 20, 30]);
        assert!(Grid::parse("1:4:0").is_err());
        assert!(Grid::parse("5:10,1:3").is_err());
        assert!(Grid::parse("x:3").is_err());
        assert!(Grid::parse("").is_err());
        assert_eq!(Grid::parse("11:1001,1001:10001:10").unwrap(), Grid::large());
    }

    #[test]
    fn align_rounds_at_requested_frequencies() {
        let h = hist(&[(1, 10), (4, 1)]);
        let out = h.interpolate(&Grid::small()).unwrap();
        assert_eq!(out.align_to(&[1, 2, 3, 4]).unwrap(), vec![10, 7, 4, 1]);
        assert!(matches!(
            out.align_to(&[11]),
            Err(FlowError::FrequencyOffGrid(11))
        ));
    }

    #[test]
    fn dataset_stats_totals() {
        let h = hist(&[(1, 8), (2, 1)]);
        let s = DatasetStats::from_histogram("0_0", &h);
        assert_eq!(s.total_packets, 10);
        assert_eq!(s.total_keys, 9);
        assert_eq!(s.max_frequency, 2);
    }
}
