use crate::core::error::{FlowError, FlowResult};
use std::borrow::Borrow;

/// Byte layout of one fixed-width record and the flow key inside it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RecordLayout {
    record_width: usize,
    key_offset: usize,
    key_length: usize,
}

impl RecordLayout {
    pub fn new(record_width: usize, key_offset: usize, key_length: usize) -> FlowResult<Self> {
        if record_width == 0 {
            return Err(FlowError::config("record width must be >= 1"));
        }
        if key_length == 0 {
            return Err(FlowError::config("key length must be >= 1"));
        }
        match key_offset.checked_add(key_length) {
            Some(end) if end <= record_width => {}
            _ => {
                return Err(FlowError::config(format!(
                    "key range {}..{}+{} exceeds record width {}",
                    key_offset, key_offset, key_length, record_width
                )));
            }
        }
        Ok(Self {
            record_width,
            key_offset,
            key_length,
        })
    }

    /// Layout whose key is the whole record.
    pub fn whole(record_width: usize) -> FlowResult<Self> {
        Self::new(record_width, 0, record_width)
    }

    pub fn record_width(&self) -> usize {
        self.record_width
    }

    pub fn key_offset(&self) -> usize {
        self.key_offset
    }

    pub fn key_length(&self) -> usize {
        self.key_length
    }

    #[inline]
    pub fn key_bytes<'a>(&self, record: &'a [u8]) -> &'a [u8] {
        &record[self.key_offset..self.key_offset + self.key_length]
    }
}

/// Dataset variants with known record layouts.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Preset {
    Imc,
    Caida2016,
    Caida2018,
    Caida2018Tail,
}

impl Preset {
    pub fn as_str(self) -> &'static str {
        match self {
            Preset::Imc => "imc",
            Preset::Caida2016 => "caida2016",
            Preset::Caida2018 => "caida2018",
            Preset::Caida2018Tail => "caida2018-tail",
        }
    }

    /// `(record_width, key_offset, key_length)`
    pub fn dimensions(self) -> (usize, usize, usize) {
        match self {
            Preset::Imc => (13, 0, 13),
            Preset::Caida2016 => (16, 0, 16),
            Preset::Caida2018 => (21, 0, 13),
            Preset::Caida2018Tail => (21, 13, 8),
        }
    }

    pub fn partition_count(self) -> usize {
        10
    }
}

/// One complete record, copied out of the reader's reusable buffer.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Record(Box<[u8]>);

impl Record {
    pub fn new(bytes: &[u8]) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn key(&self, layout: &RecordLayout) -> Key {
        Key::new(layout.key_bytes(&self.0))
    }
}

/// Flow identity: the key bytes of a record, compared byte for byte.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct Key(Box<[u8]>);

impl Key {
    pub fn new(bytes: &[u8]) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Borrow<[u8]> for Key {
    fn borrow(&self) -> &[u8] {
        &self.0
    }
}

/// Outcome of one full scan over a record source.
///
/// `residue` is the number of trailing bytes that did not form a complete
/// record. It is advisory: the scan itself succeeded.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ScanSummary {
    pub records: u64,
    pub residue: usize,
}

impl ScanSummary {
    pub fn has_residue(&self) -> bool {
        self.residue > 0
    }
}
