//! Append-only per-branch value buffers.
//!
//! A [`BranchBuffer`] keeps at most `threshold` tuples in memory. Once full,
//! the in-memory block is written to a temp file as one `postcard` chunk and
//! the buffer starts a new block. Chunks all hold exactly `threshold` tuples,
//! so a replay position maps to `(chunk, offset)` by division.
//!
//! Spill files are deleted when the buffer is dropped.

use crate::error::ExecError;
use crate::tuple::Tuple;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[cfg(feature = "spilling")]
use std::io::Write;
#[cfg(feature = "spilling")]
use tempfile::NamedTempFile;

/// Default number of tuples one branch buffer holds in memory.
pub const DEFAULT_SPILL_THRESHOLD: usize = 10_000;

/// Where and when branch buffers spill.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpillConfig {
    pub threshold: usize,
    pub dir: Option<PathBuf>,
}

impl Default for SpillConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_SPILL_THRESHOLD,
            dir: None,
        }
    }
}

#[cfg(feature = "spilling")]
struct SpillChunk {
    file: NamedTempFile,
}

#[cfg(feature = "spilling")]
impl SpillChunk {
    fn write(tuples: &[Tuple], dir: Option<&PathBuf>) -> Result<Self, ExecError> {
        let mut file = match dir {
            Some(d) => NamedTempFile::new_in(d),
            None => NamedTempFile::new(),
        }
        .map_err(|e| ExecError::Spill(e.to_string()))?;
        let bytes = postcard::to_allocvec(tuples).map_err(|e| ExecError::Spill(e.to_string()))?;
        file.write_all(&bytes)
            .and_then(|()| file.flush())
            .map_err(|e| ExecError::Spill(e.to_string()))?;
        Ok(Self { file })
    }

    fn read(&self) -> Result<Vec<Tuple>, ExecError> {
        let bytes = std::fs::read(self.file.path()).map_err(|e| ExecError::Spill(e.to_string()))?;
        postcard::from_bytes(&bytes).map_err(|e| ExecError::Spill(e.to_string()))
    }
}

pub(crate) struct BranchBuffer {
    memory: Vec<Tuple>,
    #[cfg(feature = "spilling")]
    chunks: Vec<SpillChunk>,
    /// Last chunk decoded by `get`.
    #[cfg(feature = "spilling")]
    cached: Option<(usize, Vec<Tuple>)>,
    config: SpillConfig,
}

impl BranchBuffer {
    pub(crate) fn new(mut config: SpillConfig) -> Self {
        config.threshold = config.threshold.max(1);
        Self {
            memory: Vec::new(),
            #[cfg(feature = "spilling")]
            chunks: Vec::new(),
            #[cfg(feature = "spilling")]
            cached: None,
            config,
        }
    }

    #[cfg(feature = "spilling")]
    fn spilled(&self) -> usize {
        self.chunks.len() * self.config.threshold
    }

    #[cfg(not(feature = "spilling"))]
    #[allow(clippy::unused_self)]
    const fn spilled(&self) -> usize {
        0
    }

    pub(crate) fn len(&self) -> usize {
        self.spilled() + self.memory.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append one tuple; returns how many tuples were spilled by this push.
    pub(crate) fn push(&mut self, tuple: Tuple) -> Result<usize, ExecError> {
        self.memory.push(tuple);
        self.maybe_spill()
    }

    #[cfg(feature = "spilling")]
    fn maybe_spill(&mut self) -> Result<usize, ExecError> {
        let threshold = self.config.threshold;
        if self.memory.len() < threshold {
            return Ok(0);
        }
        let chunk = SpillChunk::write(&self.memory, self.config.dir.as_ref())?;
        self.chunks.push(chunk);
        let n = self.memory.len();
        self.memory.clear();
        Ok(n)
    }

    #[cfg(not(feature = "spilling"))]
    #[allow(clippy::unnecessary_wraps)]
    fn maybe_spill(&mut self) -> Result<usize, ExecError> {
        Ok(0)
    }

    /// The tuple at `index` in delivery order.
    pub(crate) fn get(&mut self, index: usize) -> Result<Option<Tuple>, ExecError> {
        let spilled = self.spilled();
        if index >= spilled {
            return Ok(self.memory.get(index - spilled).cloned());
        }
        self.get_spilled(index)
    }

    #[cfg(feature = "spilling")]
    fn get_spilled(&mut self, index: usize) -> Result<Option<Tuple>, ExecError> {
        let threshold = self.config.threshold;
        let (chunk, offset) = (index / threshold, index % threshold);
        if !matches!(&self.cached, Some((c, _)) if *c == chunk) {
            let tuples = self.chunks[chunk].read()?;
            self.cached = Some((chunk, tuples));
        }
        Ok(self
            .cached
            .as_ref()
            .and_then(|(_, tuples)| tuples.get(offset).cloned()))
    }

    #[cfg(not(feature = "spilling"))]
    #[allow(clippy::unnecessary_wraps, clippy::unused_self)]
    fn get_spilled(&mut self, _index: usize) -> Result<Option<Tuple>, ExecError> {
        Ok(None)
    }

    /// Sequential replay from the start.
    pub(crate) fn cursor(&self) -> BufferCursor<'_> {
        BufferCursor {
            buffer: self,
            chunk: 0,
            loaded: Vec::new().into_iter(),
            memory: self.memory.iter(),
        }
    }

    pub(crate) fn clear(&mut self) {
        self.memory = Vec::new();
        #[cfg(feature = "spilling")]
        {
            self.chunks.clear();
            self.cached = None;
        }
    }
}

/// Forward iterator over a [`BranchBuffer`]: spilled chunks first, then memory.
pub struct BufferCursor<'b> {
    buffer: &'b BranchBuffer,
    chunk: usize,
    loaded: std::vec::IntoIter<Tuple>,
    memory: std::slice::Iter<'b, Tuple>,
}

impl Iterator for BufferCursor<'_> {
    type Item = Result<Tuple>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(t) = self.loaded.next() {
                return Some(Ok(t));
            }
            #[cfg(feature = "spilling")]
            if let Some(chunk) = self.buffer.chunks.get(self.chunk) {
                self.chunk += 1;
                match chunk.read() {
                    Ok(tuples) => {
                        self.loaded = tuples.into_iter();
                        continue;
                    }
                    Err(e) => return Some(Err(e.into())),
                }
            }
            #[cfg(not(feature = "spilling"))]
            let _ = (self.buffer, self.chunk);
            return self.memory.next().cloned().map(Ok);
        }
    }
}
