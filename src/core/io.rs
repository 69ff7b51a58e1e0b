use crate::core::error::{FlowError, FlowResult};
use crate::core::model::{Record, RecordLayout, ScanSummary};
use flate2::read::MultiGzDecoder;
use gzp::deflate::{Bgzf, Mgzip};
use gzp::par::decompress::ParDecompressBuilder;
use std::fs::File;
use std::io::{self, BufReader, ErrorKind, Read};
use std::path::Path;

pub const DEFAULT_CHUNK_SIZE: usize = 4096;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum InputKind {
    Plain,
    Gzip,
}

/// Splits a byte stream into fixed-width records.
///
/// Memory use is one buffer of `chunk_size + width - 1` bytes, owned by the
/// reader. Each refill asks the source for up to `chunk_size` new bytes and
/// appends them after the partial record left over from the previous chunk,
/// so a record that straddles two reads is reassembled in place.
pub struct RecordReader<R> {
    inner: R,
    buf: Vec<u8>,
    width: usize,
    chunk_size: usize,
    filled: usize,
    pos: usize,
    records: u64,
    eof: bool,
    failed: bool,
}

impl<R: Read> RecordReader<R> {
    pub fn new(inner: R, width: usize) -> FlowResult<Self> {
        Self::with_chunk_size(inner, width, DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(inner: R, width: usize, chunk_size: usize) -> FlowResult<Self> {
        check_dimensions(width, chunk_size)?;
        Ok(Self {
            inner,
            buf: vec![0u8; chunk_size + width - 1],
            width,
            chunk_size,
            filled: 0,
            pos: 0,
            records: 0,
            eof: false,
            failed: false,
        })
    }

    /// Next complete record, borrowed from the internal buffer.
    ///
    /// Once a read has failed every later call fails too.
    pub fn next_record(&mut self) -> io::Result<Option<&[u8]>> {
        if self.failed {
            return Err(io::Error::other("record stream failed on an earlier read"));
        }
        let start = loop {
            if self.pos + self.width <= self.filled {
                let start = self.pos;
                self.pos += self.width;
                self.records += 1;
                break start;
            }
            if self.eof {
                return Ok(None);
            }
            self.refill()?;
        };
        Ok(Some(&self.buf[start..start + self.width]))
    }

    fn refill(&mut self) -> io::Result<()> {
        let leftover = self.filled - self.pos;
        if leftover > 0 && self.pos > 0 {
            self.buf.copy_within(self.pos..self.filled, 0);
        }
        self.filled = leftover;
        self.pos = 0;
        let window = &mut self.buf[leftover..leftover + self.chunk_size];
        let n = loop {
            match self.inner.read(window) {
                Ok(n) => break n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.failed = true;
                    return Err(e);
                }
            }
        };
        if n == 0 {
            self.eof = true;
        }
        self.filled += n;
        Ok(())
    }

    /// Records yielded so far plus, once the source is cleanly exhausted,
    /// the trailing bytes that never formed a record.
    pub fn summary(&self) -> ScanSummary {
        let clean_end = self.eof && !self.failed;
        ScanSummary {
            records: self.records,
            residue: if clean_end { self.filled - self.pos } else { 0 },
        }
    }

    /// Drains the reader, handing each record to `f`.
    pub fn for_each_record<F>(&mut self, mut f: F) -> io::Result<ScanSummary>
    where
        F: FnMut(&[u8]),
    {
        while let Some(record) = self.next_record()? {
            f(record);
        }
        Ok(self.summary())
    }
}

impl<R: Read> Iterator for RecordReader<R> {
    type Item = io::Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.next_record() {
            Ok(Some(bytes)) => Some(Ok(Record::new(bytes))),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

fn check_dimensions(width: usize, chunk_size: usize) -> FlowResult<()> {
    if width == 0 {
        return Err(FlowError::config("record width must be >= 1"));
    }
    if chunk_size == 0 {
        return Err(FlowError::config("chunk size must be >= 1"));
    }
    Ok(())
}

pub type FileRecords = RecordReader<Box<dyn Read + Send>>;

/// Opens `path` as a record stream, decompressing gzip inputs transparently.
pub fn open_records(
    path: &Path,
    layout: &RecordLayout,
    chunk_size: usize,
    threads: usize,
) -> FlowResult<FileRecords> {
    check_dimensions(layout.record_width(), chunk_size)?;
    let source = open_source(path, threads)?;
    RecordReader::with_chunk_size(source, layout.record_width(), chunk_size)
}

/// Runs one full scan over `path`, logging the trailing-residue advisory.
pub fn scan_file<F>(
    path: &Path,
    layout: &RecordLayout,
    chunk_size: usize,
    threads: usize,
    f: F,
) -> FlowResult<ScanSummary>
where
    F: FnMut(&[u8]),
{
    let mut reader = open_records(path, layout, chunk_size, threads)?;
    let summary = reader
        .for_each_record(f)
        .map_err(|e| FlowError::io(path, e))?;
    warn_residue(path, &summary, layout.record_width());
    Ok(summary)
}

pub fn warn_residue(path: &Path, summary: &ScanSummary, width: usize) {
    if summary.has_residue() {
        log::warn!(
            "{}: {} trailing bytes do not form a complete {}-byte record, ignored",
            path.display(),
            summary.residue,
            width
        );
    }
}

pub fn open_source(path: &Path, threads: usize) -> FlowResult<Box<dyn Read + Send>> {
    match detect_input_kind(path)? {
        InputKind::Plain => {
            let file = File::open(path).map_err(|e| FlowError::io(path, e))?;
            Ok(Box::new(file))
        }
        InputKind::Gzip => open_gzip_reader(path, threads),
    }
}

pub fn detect_input_kind(path: &Path) -> FlowResult<InputKind> {
    if let Some(ext) = path.extension().and_then(|s| s.to_str()) {
        if ext.eq_ignore_ascii_case("gz") {
            return Ok(InputKind::Gzip);
        }
    }
    let mut file = File::open(path).map_err(|e| FlowError::io(path, e))?;
    let mut magic = [0u8; 2];
    let n = read_prefix(&mut file, &mut magic).map_err(|e| FlowError::io(path, e))?;
    if n == 2 && magic == [0x1f, 0x8b] {
        Ok(InputKind::Gzip)
    } else {
        Ok(InputKind::Plain)
    }
}

fn read_prefix(file: &mut File, out: &mut [u8]) -> io::Result<usize> {
    let mut n = 0;
    while n < out.len() {
        match file.read(&mut out[n..]) {
            Ok(0) => break,
            Ok(k) => n += k,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(n)
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum GzipVariant {
    Standard,
    Mgzip,
    Bgzf,
}

fn detect_gzip_variant(path: &Path) -> FlowResult<GzipVariant> {
    let mut file = File::open(path).map_err(|e| FlowError::io(path, e))?;
    let mut header = [0u8; 20];
    let n = read_prefix(&mut file, &mut header).map_err(|e| FlowError::io(path, e))?;
    Ok(gzip_variant_from_header(&header[..n]))
}

fn gzip_variant_from_header(header: &[u8]) -> GzipVariant {
    if header.len() < 14 || header[0] != 0x1f || header[1] != 0x8b {
        return GzipVariant::Standard;
    }
    // FEXTRA flag; the first subfield id tells block-gzip flavours apart.
    if header[3] & 4 == 0 {
        return GzipVariant::Standard;
    }
    match (header[12], header[13]) {
        (b'B', b'C') => GzipVariant::Bgzf,
        (b'I', b'G') => GzipVariant::Mgzip,
        _ => GzipVariant::Standard,
    }
}

pub fn open_gzip_reader(path: &Path, threads: usize) -> FlowResult<Box<dyn Read + Send>> {
    let variant = detect_gzip_variant(path)?;
    let file = File::open(path).map_err(|e| FlowError::io(path, e))?;
    let reader = BufReader::new(file);
    let par_err = |e: gzp::GzpError| FlowError::io(path, io::Error::other(e.to_string()));
    let reader: Box<dyn Read + Send> = match variant {
        GzipVariant::Bgzf if threads > 1 => Box::new(
            ParDecompressBuilder::<Bgzf>::new()
                .num_threads(threads)
                .map_err(par_err)?
                .from_reader(reader),
        ),
        GzipVariant::Mgzip if threads > 1 => Box::new(
            ParDecompressBuilder::<Mgzip>::new()
                .num_threads(threads)
                .map_err(par_err)?
                .from_reader(reader),
        ),
        _ => Box::new(MultiGzDecoder::new(reader)),
    };
    Ok(reader)
}
