//! Persistence of decomposition results.
//!
//! - Global node numbers: one id per local node, in local node order, either as
//!   decimal text (one id per line) or as a bare sequence of little-endian `i64`.
//! - Interface report: a JSON description of the neighbours and the no-overlap
//!   interface regions of one rank, for external inspection.

use crate::mesh_error::DecompositionError;
use crate::topology::element_type::ElementType;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

const INTERFACE_REPORT_VERSION: u32 = 1;

/// Layout of a global-number dump.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum GlobalNumberFormat {
    #[default]
    Text,
    Binary,
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> DecompositionError + '_ {
    move |source| DecompositionError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Write `ids` to `path`.
pub fn write_global_node_numbers(
    path: impl AsRef<Path>,
    ids: &[i64],
    format: GlobalNumberFormat,
) -> Result<(), DecompositionError> {
    let path = path.as_ref();
    let file = fs::File::create(path).map_err(io_error(path))?;
    let mut out = BufWriter::new(file);
    match format {
        GlobalNumberFormat::Text => {
            for id in ids {
                writeln!(out, "{id}").map_err(io_error(path))?;
            }
        }
        GlobalNumberFormat::Binary => {
            for id in ids {
                out.write_all(&id.to_le_bytes()).map_err(io_error(path))?;
            }
        }
    }
    out.flush().map_err(io_error(path))
}

/// Read back a dump written by [`write_global_node_numbers`].
pub fn read_global_node_numbers(
    path: impl AsRef<Path>,
    format: GlobalNumberFormat,
) -> Result<Vec<i64>, DecompositionError> {
    let path = path.as_ref();
    match format {
        GlobalNumberFormat::Text => {
            let file = fs::File::open(path).map_err(io_error(path))?;
            let mut ids = Vec::new();
            for (i, line) in BufReader::new(file).lines().enumerate() {
                let line = line.map_err(io_error(path))?;
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                ids.push(trimmed.parse::<i64>().map_err(|_| DecompositionError::Parse {
                    path: path.to_path_buf(),
                    line: i + 1,
                    content: line.clone(),
                })?);
            }
            Ok(ids)
        }
        GlobalNumberFormat::Binary => {
            let bytes = fs::read(path).map_err(io_error(path))?;
            let chunks = bytes.chunks_exact(8);
            if !chunks.remainder().is_empty() {
                return Err(DecompositionError::Parse {
                    path: path.to_path_buf(),
                    line: bytes.len() / 8 + 1,
                    content: format!("{} trailing bytes", chunks.remainder().len()),
                });
            }
            Ok(chunks
                .map(|c| {
                    let mut raw = [0u8; 8];
                    raw.copy_from_slice(c);
                    i64::from_le_bytes(raw)
                })
                .collect())
        }
    }
}

/// One `(neighbour, dimension)` interface region and its members.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceEntry {
    pub neighbour: usize,
    pub dimension: usize,
    pub region: usize,
    pub elements: BTreeMap<ElementType, Vec<usize>>,
}

/// JSON-serialisable summary of one rank's connectivity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceReport {
    pub version: u32,
    pub rank: usize,
    pub size: usize,
    pub neighbours: Vec<usize>,
    pub overlap_layers: usize,
    pub interfaces: Vec<InterfaceEntry>,
}

impl InterfaceReport {
    pub fn new(rank: usize, size: usize, neighbours: Vec<usize>, overlap_layers: usize) -> Self {
        Self {
            version: INTERFACE_REPORT_VERSION,
            rank,
            size,
            neighbours,
            overlap_layers,
            interfaces: Vec::new(),
        }
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), DecompositionError> {
        let path = path.as_ref();
        let file = fs::File::create(path).map_err(io_error(path))?;
        let mut out = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut out, self)?;
        out.flush().map_err(io_error(path))
    }

    pub fn read_json(path: impl AsRef<Path>) -> Result<Self, DecompositionError> {
        let path = path.as_ref();
        let file = fs::File::open(path).map_err(io_error(path))?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }
}

/// `<dir>/<stem>.<rank>.<ext>`: one file per rank of a run.
pub fn rank_path(dir: impl AsRef<Path>, stem: &str, rank: usize, ext: &str) -> PathBuf {
    dir.as_ref().join(format!("{stem}.{rank}.{ext}"))
}
