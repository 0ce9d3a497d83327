use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{anyhow, bail, ensure, Context, Result};
use bytemuck::{cast_slice, pod_collect_to_vec};

use crate::{Neighbor, VectorIndex};

pub const INDEX_MAGIC: &[u8; 4] = b"IBXF";
pub const INDEX_VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + 4 + 8;

/// Exact squared-L2 index over row-major embeddings.
#[derive(Debug, Clone)]
pub struct FlatL2Index {
    dimensions: usize,
    data: Vec<f32>,
}

impl FlatL2Index {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            data: Vec::new(),
        }
    }

    pub fn from_rows(dimensions: usize, rows: &[Vec<f32>]) -> Result<Self> {
        let mut index = Self::new(dimensions);
        for row in rows {
            index.add(row)?;
        }
        Ok(index)
    }

    pub fn add(&mut self, row: &[f32]) -> Result<()> {
        ensure!(
            row.len() == self.dimensions,
            "embedding has {} dimensions, index expects {}",
            row.len(),
            self.dimensions
        );
        self.data.extend_from_slice(row);
        Ok(())
    }

    pub fn row(&self, position: usize) -> Option<&[f32]> {
        let start = position.checked_mul(self.dimensions)?;
        let end = start.checked_add(self.dimensions)?;
        self.data.get(start..end)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path)
            .with_context(|| format!("failed to read vector index {}", path.display()))?;
        Self::from_bytes(&bytes).with_context(|| format!("invalid vector index {}", path.display()))
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut writer = BufWriter::new(
            File::create(path)
                .with_context(|| format!("failed to create vector index {}", path.display()))?,
        );
        writer.write_all(&self.to_bytes())?;
        writer.flush()?;
        Ok(())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.data.len() * 4);
        out.extend_from_slice(INDEX_MAGIC);
        out.extend_from_slice(&INDEX_VERSION.to_le_bytes());
        out.extend_from_slice(&(self.dimensions as u32).to_le_bytes());
        out.extend_from_slice(&(self.len() as u64).to_le_bytes());
        if cfg!(target_endian = "little") {
            out.extend_from_slice(cast_slice::<f32, u8>(&self.data));
        } else {
            for value in &self.data {
                out.extend_from_slice(&value.to_le_bytes());
            }
        }
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        ensure!(bytes.len() >= HEADER_LEN, "truncated header");
        if &bytes[0..4] != INDEX_MAGIC {
            bail!("bad magic");
        }
        let version = u32::from_le_bytes(read_array(&bytes[4..8])?);
        ensure!(version == INDEX_VERSION, "unsupported index version {version}");
        let dimensions = u32::from_le_bytes(read_array(&bytes[8..12])?) as usize;
        let rows = u64::from_le_bytes(read_array(&bytes[12..20])?) as usize;
        ensure!(dimensions > 0 || rows == 0, "zero-dimension index with rows");
        let expected = rows
            .checked_mul(dimensions)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| anyhow!("row count overflows"))?;
        let payload = &bytes[HEADER_LEN..];
        ensure!(
            payload.len() == expected,
            "expected {expected} payload bytes for {rows}x{dimensions}, found {}",
            payload.len()
        );
        let mut data: Vec<f32> = pod_collect_to_vec(payload);
        if cfg!(target_endian = "big") {
            for value in data.iter_mut() {
                *value = f32::from_bits(u32::from_le(value.to_bits()));
            }
        }
        Ok(Self { dimensions, data })
    }
}

impl VectorIndex for FlatL2Index {
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        ensure!(
            query.len() == self.dimensions,
            "query has {} dimensions, index expects {}",
            query.len(),
            self.dimensions
        );
        if k == 0 || self.data.is_empty() {
            return Ok(Vec::new());
        }
        let mut hits: Vec<Neighbor> = self
            .data
            .chunks_exact(self.dimensions)
            .enumerate()
            .map(|(position, row)| Neighbor {
                position: position as i64,
                distance: squared_l2(query, row),
            })
            .collect();
        // stable: equal distances keep row order
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(k);
        Ok(hits)
    }

    fn len(&self) -> usize {
        if self.dimensions == 0 {
            0
        } else {
            self.data.len() / self.dimensions
        }
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

fn read_array<const N: usize>(bytes: &[u8]) -> Result<[u8; N]> {
    bytes
        .try_into()
        .map_err(|_| anyhow!("expected {N} header bytes"))
}
