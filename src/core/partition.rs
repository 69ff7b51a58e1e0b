use crate::core::error::{FlowError, FlowResult};
use crate::core::io;
use crate::core::model::{Record, RecordLayout, ScanSummary};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Target size of every group, fixed before any record is assigned.
///
/// The first `total % k` groups get one extra record, so sizes differ by at
/// most one and sum to `total`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PartitionPlan {
    sizes: Vec<u64>,
}

impl PartitionPlan {
    pub fn balanced(total: u64, k: usize) -> FlowResult<Self> {
        if k == 0 {
            return Err(FlowError::config("partition count must be >= 1"));
        }
        let base = total / k as u64;
        let remainder = total % k as u64;
        let sizes = (0..k as u64)
            .map(|i| if i < remainder { base + 1 } else { base })
            .collect();
        Ok(Self { sizes })
    }

    pub fn sizes(&self) -> &[u64] {
        &self.sizes
    }

    pub fn len(&self) -> usize {
        self.sizes.len()
    }

    pub fn total(&self) -> u64 {
        self.sizes.iter().sum()
    }
}

/// Destination for partitioned records. Groups arrive strictly in index
/// order; each is opened, filled, and finished before the next begins.
pub trait GroupSink {
    fn begin_group(&mut self, index: usize) -> FlowResult<()>;
    fn write_record(&mut self, record: &[u8]) -> FlowResult<()>;
    fn finish_group(&mut self) -> FlowResult<()>;
}

/// Writes group `g` of source `s` to `{dir}/{s}_{g}.{ext}` as raw bytes.
pub struct FileGroupSink {
    dir: PathBuf,
    source_index: usize,
    extension: String,
    current: Option<(PathBuf, BufWriter<File>)>,
    written: Vec<PathBuf>,
}

impl FileGroupSink {
    pub fn new(dir: &Path, source_index: usize, extension: &str) -> Self {
        Self {
            dir: dir.to_path_buf(),
            source_index,
            extension: extension.to_string(),
            current: None,
            written: Vec::new(),
        }
    }

    pub fn group_path(&self, group_index: usize) -> PathBuf {
        self.dir.join(format!(
            "{}_{}.{}",
            self.source_index, group_index, self.extension
        ))
    }

    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }
}

impl GroupSink for FileGroupSink {
    fn begin_group(&mut self, index: usize) -> FlowResult<()> {
        let path = self.group_path(index);
        let file = File::create(&path).map_err(|e| FlowError::io(&path, e))?;
        self.current = Some((path, BufWriter::new(file)));
        Ok(())
    }

    fn write_record(&mut self, record: &[u8]) -> FlowResult<()> {
        match self.current.as_mut() {
            Some((path, w)) => w.write_all(record).map_err(|e| FlowError::io(path.as_path(), e)),
            None => Err(FlowError::config("record written before any group was opened")),
        }
    }

    fn finish_group(&mut self) -> FlowResult<()> {
        if let Some((path, mut w)) = self.current.take() {
            w.flush().map_err(|e| FlowError::io(&path, e))?;
            self.written.push(path);
        }
        Ok(())
    }
}

/// A contiguous slice of a source file's records.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Group {
    pub index: usize,
    pub records: Vec<Record>,
}

/// Keeps every group in memory.
#[derive(Default)]
pub struct MemoryGroupSink {
    groups: Vec<Group>,
}

impl MemoryGroupSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_groups(self) -> Vec<Group> {
        self.groups
    }
}

impl GroupSink for MemoryGroupSink {
    fn begin_group(&mut self, index: usize) -> FlowResult<()> {
        self.groups.push(Group {
            index,
            records: Vec::new(),
        });
        Ok(())
    }

    fn write_record(&mut self, record: &[u8]) -> FlowResult<()> {
        match self.groups.last_mut() {
            Some(group) => {
                group.records.push(Record::new(record));
                Ok(())
            }
            None => Err(FlowError::config("record written before any group was opened")),
        }
    }

    fn finish_group(&mut self) -> FlowResult<()> {
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct PartitionSummary {
    pub plan: PartitionPlan,
    pub written: Vec<u64>,
    pub scan: ScanSummary,
}

/// Pass 1: number of complete records in `path`.
pub fn count_records(
    path: &Path,
    layout: &RecordLayout,
    chunk_size: usize,
    threads: usize,
) -> FlowResult<u64> {
    let mut reader = io::open_records(path, layout, chunk_size, threads)?;
    let summary = reader
        .for_each_record(|_| {})
        .map_err(|e| FlowError::io(path, e))?;
    Ok(summary.records)
}

/// Splits `path` into `k` balanced, order-preserving groups.
///
/// Reads the file twice: once to size the groups, then with a fresh reader to
/// stream every record into `sink`. Every group index in `0..k` is begun and
/// finished, even when it receives no records.
pub fn partition_file<S: GroupSink>(
    path: &Path,
    layout: &RecordLayout,
    k: usize,
    chunk_size: usize,
    threads: usize,
    sink: &mut S,
) -> FlowResult<PartitionSummary> {
    if k == 0 {
        return Err(FlowError::config("partition count must be >= 1"));
    }
    let total = count_records(path, layout, chunk_size, threads)?;
    let plan = PartitionPlan::balanced(total, k)?;

    let mut reader = io::open_records(path, layout, chunk_size, threads)?;
    let mut written = vec![0u64; k];
    let mut current = 0usize;
    sink.begin_group(current)?;
    while let Some(record) = reader.next_record().map_err(|e| FlowError::io(path, e))? {
        while current + 1 < k && written[current] >= plan.sizes[current] {
            sink.finish_group()?;
            current += 1;
            sink.begin_group(current)?;
        }
        sink.write_record(record)?;
        written[current] += 1;
    }
    while current + 1 < k {
        sink.finish_group()?;
        current += 1;
        sink.begin_group(current)?;
    }
    sink.finish_group()?;

    let scan = reader.summary();
    io::warn_residue(path, &scan, layout.record_width());
    if scan.records != total {
        log::warn!(
            "{}: record count changed between passes ({} then {})",
            path.display(),
            total,
            scan.records
        );
    }
    log::debug!("{}: group sizes {:?}", path.display(), written);
    Ok(PartitionSummary {
        plan,
        written,
        scan,
    })
}

/// Convenience wrapper returning the groups in memory.
pub fn split_into_groups(
    path: &Path,
    layout: &RecordLayout,
    k: usize,
    chunk_size: usize,
) -> FlowResult<Vec<Group>> {
    let mut sink = MemoryGroupSink::new();
    partition_file(path, layout, k, chunk_size, 1, &mut sink)?;
    Ok(sink.into_groups())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_trace(dir: &Path, records: usize, width: usize, tail: usize) -> PathBuf {
        let path = dir.join("trace.dat");
        let data: Vec<u8> = (0..records * width + tail)
            .map(|i| ((i / width) % 251) as u8 ^ (i % width) as u8)
            .collect();
        fs::write(&path, data).unwrap();
        path
    }

    #[test]
    fn plan_puts_remainder_first() {
        let plan = PartitionPlan::balanced(10, 3).unwrap();
        assert_eq!(plan.sizes(), &[4, 3, 3]);
        let plan = PartitionPlan::balanced(2, 4).unwrap();
        assert_eq!(plan.sizes(), &[1, 1, 0, 0]);
        assert!(PartitionPlan::balanced(5, 0).is_err());
    }

    #[test]
    fn plan_is_balanced_for_all_small_inputs() {
        for total in 0..60u64 {
            for k in 1..12usize {
                let plan = PartitionPlan::balanced(total, k).unwrap();
                let max = *plan.sizes().iter().max().unwrap();
                let min = *plan.sizes().iter().min().unwrap();
                assert!(max - min <= 1);
                assert_eq!(plan.total(), total);
                assert_eq!(plan.len(), k);
            }
        }
    }

    #[test]
    fn ten_records_into_three_groups() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_trace(dir.path(), 10, 16, 0);
        let layout = RecordLayout::whole(16).unwrap();
        let groups = split_into_groups(&path, &layout, 3, 4096).unwrap();
        let sizes: Vec<usize> = groups.iter().map(|g| g.records.len()).collect();
        assert_eq!(sizes, vec![4, 3, 3]);
        assert_eq!(
            groups.iter().map(|g| g.index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
    }

    #[test]
    fn concatenated_groups_reproduce_the_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_trace(dir.path(), 103, 21, 9);
        let layout = RecordLayout::whole(21).unwrap();
        let mut reader = io::open_records(&path, &layout, 50, 1).unwrap();
        let all: Vec<Record> = reader.by_ref().map(|r| r.unwrap()).collect();
        assert_eq!(reader.summary().residue, 9);

        for k in [1usize, 2, 7, 10, 103, 150] {
            let groups = split_into_groups(&path, &layout, k, 50).unwrap();
            assert_eq!(groups.len(), k);
            let joined: Vec<Record> = groups.iter().flat_map(|g| g.records.clone()).collect();
            assert_eq!(joined, all, "k = {}", k);
        }
    }

    #[test]
    fn file_sink_writes_every_group() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_trace(dir.path(), 2, 16, 3);
        let out = dir.path().join("groups");
        fs::create_dir_all(&out).unwrap();
        let layout = RecordLayout::whole(16).unwrap();
        let mut sink = FileGroupSink::new(&out, 4, "dat");
        let summary = partition_file(&path, &layout, 3, 4096, 1, &mut sink).unwrap();

        assert_eq!(summary.written, vec![1, 1, 0]);
        assert_eq!(summary.scan.residue, 3);
        assert_eq!(sink.written().len(), 3);
        let source = fs::read(&path).unwrap();
        assert_eq!(fs::read(out.join("4_0.dat")).unwrap(), &source[..16]);
        assert_eq!(fs::read(out.join("4_1.dat")).unwrap(), &source[16..32]);
        assert!(fs::read(out.join("4_2.dat")).unwrap().is_empty());
    }

    #[test]
    fn zero_partitions_fail_before_io() {
        let layout = RecordLayout::whole(16).unwrap();
        let mut sink = MemoryGroupSink::new();
        let err = partition_file(
            Path::new("/nonexistent/trace.dat"),
            &layout,
            0,
            4096,
            1,
            &mut sink,
        )
        .unwrap_err();
        assert!(matches!(err, FlowError::InvalidConfiguration(_)));
    }
}
