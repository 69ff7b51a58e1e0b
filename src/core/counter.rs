use crate::core::error::FlowResult;
use crate::core::io;
use crate::core::model::{Key, RecordLayout, ScanSummary};
use std::collections::HashMap;
use std::collections::hash_map;
use std::io::Read;
use std::path::Path;

/// Occurrence count per distinct flow key.
#[derive(Clone, Debug, Default)]
pub struct FrequencyTable {
    counts: HashMap<Key, u64>,
}

impl FrequencyTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, key: &[u8]) {
        // Avoids allocating a Key for flows that are already present.
        if let Some(count) = self.counts.get_mut(key) {
            *count += 1;
            return;
        }
        self.counts.insert(Key::new(key), 1);
    }

    pub fn get(&self, key: &[u8]) -> Option<u64> {
        self.counts.get(key).copied()
    }

    pub fn distinct_keys(&self) -> usize {
        self.counts.len()
    }

    pub fn total_occurrences(&self) -> u64 {
        self.counts.values().sum()
    }

    pub fn counts(&self) -> impl Iterator<Item = u64> + '_ {
        self.counts.values().copied()
    }

    pub fn iter(&self) -> hash_map::Iter<'_, Key, u64> {
        self.counts.iter()
    }
}

pub struct Counted {
    pub table: FrequencyTable,
    pub scan: ScanSummary,
}

/// Counts key occurrences over every complete record of `path`.
pub fn count_file(
    path: &Path,
    layout: &RecordLayout,
    chunk_size: usize,
    threads: usize,
) -> FlowResult<Counted> {
    let mut table = FrequencyTable::new();
    let scan = io::scan_file(path, layout, chunk_size, threads, |record| {
        table.add(layout.key_bytes(record))
    })?;
    Ok(Counted { table, scan })
}

/// Same as [`count_file`] over an already-open byte source.
pub fn count_reader<R: Read>(
    source: R,
    layout: &RecordLayout,
    chunk_size: usize,
) -> std::io::Result<Counted> {
    let mut reader = io::RecordReader::with_chunk_size(source, layout.record_width(), chunk_size)
        .map_err(std::io::Error::other)?;
    let mut table = FrequencyTable::new();
    let scan = reader.for_each_record(|record| table.add(layout.key_bytes(record)))?;
    Ok(Counted { table, scan })
}
