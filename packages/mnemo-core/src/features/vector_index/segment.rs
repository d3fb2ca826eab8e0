//! On-disk vector segment.
//!
//! Fixed-width little-endian f32 slots behind a small header, memory-mapped
//! on open so reopening a store never copies vector data. Writes append a
//! slot and remap; superseded slots are left orphaned (the entry table
//! points at the live one).

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian};
use memmap2::Mmap;

use crate::shared::models::{MemoryError, Result};

const MAGIC: &[u8; 8] = b"MNEMOVEC";
const HEADER_LEN: usize = 16; // magic + u32 version + u32 dimension
const FORMAT_VERSION: u32 = 1;

pub struct Segment {
    path: PathBuf,
    dimension: usize,
    mmap: Option<Mmap>,
    slots: usize,
}

impl Segment {
    /// Open a segment file, creating it (with header) when absent.
    pub fn open(path: impl AsRef<Path>, dimension: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut header = Vec::with_capacity(HEADER_LEN);
            header.extend_from_slice(MAGIC);
            let mut word = [0u8; 4];
            LittleEndian::write_u32(&mut word, FORMAT_VERSION);
            header.extend_from_slice(&word);
            LittleEndian::write_u32(&mut word, dimension as u32);
            header.extend_from_slice(&word);
            std::fs::write(&path, header)?;
        }

        let mut segment = Self {
            path,
            dimension,
            mmap: None,
            slots: 0,
        };
        segment.remap()?;
        Ok(segment)
    }

    fn slot_size(&self) -> usize {
        self.dimension * 4
    }

    fn remap(&mut self) -> Result<()> {
        let file = File::open(&self.path)?;
        let len = file.metadata()?.len() as usize;
        if len < HEADER_LEN {
            return Err(MemoryError::io(format!(
                "vector segment truncated: {}",
                self.path.display()
            )));
        }
        // SAFETY: the mapping is read-only and writers only ever append;
        // existing slot bytes are immutable once written.
        let mmap = unsafe { Mmap::map(&file)? };

        if &mmap[..8] != MAGIC {
            return Err(MemoryError::io(format!(
                "not a vector segment: {}",
                self.path.display()
            )));
        }
        let stored_dimension = LittleEndian::read_u32(&mmap[12..16]) as usize;
        if stored_dimension != self.dimension {
            return Err(MemoryError::invalid_input(format!(
                "vector segment dimension {} does not match store dimension {}",
                stored_dimension, self.dimension
            )));
        }

        self.slots = (len - HEADER_LEN) / self.slot_size();
        self.mmap = Some(mmap);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.slots
    }

    pub fn is_empty(&self) -> bool {
        self.slots == 0
    }

    fn slot_bytes(&self, slot: usize) -> Option<&[u8]> {
        if slot >= self.slots {
            return None;
        }
        let mmap = self.mmap.as_ref()?;
        let start = HEADER_LEN + slot * self.slot_size();
        Some(&mmap[start..start + self.slot_size()])
    }

    /// Decode one slot into an owned vector.
    pub fn vector(&self, slot: usize) -> Option<Vec<f32>> {
        let bytes = self.slot_bytes(slot)?;
        let mut out = vec![0f32; self.dimension];
        LittleEndian::read_f32_into(bytes, &mut out);
        Some(out)
    }

    /// Cosine distance between a query and a stored slot, computed directly
    /// over the mapped bytes (no allocation).
    pub fn cosine_distance(&self, slot: usize, query: &[f32]) -> Option<f32> {
        let bytes = self.slot_bytes(slot)?;
        let mut dot = 0f64;
        let mut norm_stored = 0f64;
        let mut norm_query = 0f64;
        for (chunk, q) in bytes.chunks_exact(4).zip(query.iter()) {
            let value = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as f64;
            let q = *q as f64;
            dot += value * q;
            norm_stored += value * value;
            norm_query += q * q;
        }
        if norm_stored == 0.0 || norm_query == 0.0 {
            return Some(1.0);
        }
        let similarity = dot / (norm_stored.sqrt() * norm_query.sqrt());
        Some((1.0 - similarity) as f32)
    }

    /// Append a vector, returning its slot index.
    pub fn append(&mut self, vector: &[f32]) -> Result<usize> {
        if vector.len() != self.dimension {
            return Err(MemoryError::invalid_input(format!(
                "embedding dimension {} does not match store dimension {}",
                vector.len(),
                self.dimension
            )));
        }
        let mut bytes = vec![0u8; self.slot_size()];
        LittleEndian::write_f32_into(vector, &mut bytes);

        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        file.write_all(&bytes)?;
        file.sync_data()?;
        drop(file);

        self.remap()?;
        Ok(self.slots - 1)
    }

    /// Re-read the file after another process appended slots.
    pub fn reload(&mut self) -> Result<()> {
        self.remap()
    }
}
