use crate::core::error::{FlowError, FlowResult};
use crate::core::io;
use crate::core::model::{RecordLayout, ScanSummary};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

pub const DEFAULT_COUNTERS: usize = 4096;

/// MurmurHash3, x86 32-bit variant.
pub fn murmur3_32(data: &[u8], seed: u32) -> u32 {
    const C1: u32 = 0xcc9e_2d51;
    const C2: u32 = 0x1b87_3593;

    let mut h1 = seed;
    let mut blocks = data.chunks_exact(4);
    for block in blocks.by_ref() {
        let mut k1 = u32::from_le_bytes([block[0], block[1], block[2], block[3]]);
        k1 = k1.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
        h1 ^= k1;
        h1 = h1.rotate_left(13).wrapping_mul(5).wrapping_add(0xe654_6b64);
    }

    let tail = blocks.remainder();
    if !tail.is_empty() {
        let mut k1 = 0u32;
        for (i, &b) in tail.iter().enumerate() {
            k1 ^= (b as u32) << (8 * i);
        }
        k1 = k1.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
        h1 ^= k1;
    }

    h1 ^= data.len() as u32;
    h1 ^= h1 >> 16;
    h1 = h1.wrapping_mul(0x85eb_ca6b);
    h1 ^= h1 >> 13;
    h1 = h1.wrapping_mul(0xc2b2_ae35);
    h1 ^= h1 >> 16;
    h1
}

/// Fixed-size array of hashed key counters for one seed.
#[derive(Clone, Debug)]
pub struct CounterArray {
    seed: u32,
    counters: Vec<u32>,
}

impl CounterArray {
    pub fn new(seed: u32, size: usize) -> FlowResult<Self> {
        if size == 0 {
            return Err(FlowError::config("counter array size must be >= 1"));
        }
        Ok(Self {
            seed,
            counters: vec![0; size],
        })
    }

    pub fn add(&mut self, key: &[u8]) {
        let slot = murmur3_32(key, self.seed) as usize % self.counters.len();
        self.counters[slot] = self.counters[slot].saturating_add(1);
    }

    pub fn seed(&self) -> u32 {
        self.seed
    }

    pub fn counters(&self) -> &[u32] {
        &self.counters
    }

    pub fn total(&self) -> u64 {
        self.counters.iter().map(|&c| c as u64).sum()
    }

    /// Writes the counters as little-endian `u32` values.
    pub fn write_to<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        for c in &self.counters {
            w.write_all(&c.to_le_bytes())?;
        }
        Ok(())
    }

    pub fn save(&self, path: &Path) -> FlowResult<()> {
        let file = File::create(path).map_err(|e| FlowError::io(path, e))?;
        let mut w = BufWriter::new(file);
        self.write_to(&mut w)
            .and_then(|_| w.flush())
            .map_err(|e| FlowError::io(path, e))
    }
}

pub fn sketch_file(
    path: &Path,
    layout: &RecordLayout,
    seed: u32,
    size: usize,
    chunk_size: usize,
    threads: usize,
) -> FlowResult<(CounterArray, ScanSummary)> {
    let mut array = CounterArray::new(seed, size)?;
    let scan = io::scan_file(path, layout, chunk_size, threads, |record| {
        array.add(layout.key_bytes(record))
    })?;
    Ok((array, scan))
}
