//! Fixed, versioned, little-endian wire types for the tracker exchanges.
//!
//! All multi-byte fields are stored pre-LE with `.to_le()` and decoded with
//! `.from_le()`; floating-point values travel as their IEEE bit patterns.
//! Decoding always copies into a freshly allocated, correctly aligned buffer, so
//! received byte vectors of any alignment are accepted.

use crate::mesh_error::DecompositionError;
use bytemuck::{Pod, Zeroable};
use static_assertions::const_assert_eq;
use std::mem::size_of;

/// Bump when the layout or semantics change in incompatible ways.
pub const WIRE_VERSION: u16 = 1;

/// Message kinds carried in [`WireHdr::kind`].
pub mod kind {
    pub const SAMPLES: u16 = 1;
    pub const INTERFACE_BARYCENTERS: u16 = 2;
    pub const SHARERS: u16 = 3;
    pub const NOOVERLAP_MAP: u16 = 4;
    pub const OVERLAP_MAP: u16 = 5;
    pub const GLOBAL_IDS: u16 = 6;
    pub const OWNER_CANDIDATES: u16 = 7;
    pub const FOUND_NEIGHBOURS: u16 = 8;
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireHdr {
    pub version_le: u16,
    pub kind_le: u16,
    /// Free-form per-kind field (the declared-dimension mask for map messages).
    pub aux_le: u32,
}

impl WireHdr {
    pub fn new(kind: u16, aux: u32) -> Self {
        Self {
            version_le: WIRE_VERSION.to_le(),
            kind_le: kind.to_le(),
            aux_le: aux.to_le(),
        }
    }
    pub fn kind(&self) -> u16 {
        u16::from_le(self.kind_le)
    }
    pub fn version(&self) -> u16 {
        u16::from_le(self.version_le)
    }
    pub fn aux(&self) -> u32 {
        u32::from_le(self.aux_le)
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireCount {
    pub n_le: u64,
}

impl WireCount {
    pub fn new(n: usize) -> Self {
        Self {
            n_le: (n as u64).to_le(),
        }
    }
    pub fn get(&self) -> usize {
        u64::from_le(self.n_le) as usize
    }
}

/// One element identified by its barycenter: `(coords, element, type, flag)`.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireBary {
    pub coords_le: [u64; 3],
    pub element_le: u64,
    /// Element type index in the low 32 bits, per-kind flag in the high 32 bits.
    pub meta_le: u64,
}

impl WireBary {
    pub fn new(coords: [f64; 3], element: usize, type_index: usize, flag: u32) -> Self {
        Self {
            coords_le: coords.map(|c| c.to_bits().to_le()),
            element_le: (element as u64).to_le(),
            meta_le: ((type_index as u64) | (u64::from(flag) << 32)).to_le(),
        }
    }
    pub fn coords(&self) -> [f64; 3] {
        self.coords_le.map(|c| f64::from_bits(u64::from_le(c)))
    }
    pub fn element(&self) -> usize {
        u64::from_le(self.element_le) as usize
    }
    pub fn type_index(&self) -> usize {
        (u64::from_le(self.meta_le) & 0xFFFF_FFFF) as usize
    }
    pub fn flag(&self) -> u32 {
        (u64::from_le(self.meta_le) >> 32) as u32
    }
}

/// A signed 64-bit value keyed by a local element number of the sender.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireKeyed {
    pub element_le: u64,
    pub value_le: i64,
}

impl WireKeyed {
    pub fn new(element: usize, value: i64) -> Self {
        Self {
            element_le: (element as u64).to_le(),
            value_le: value.to_le(),
        }
    }
    pub fn element(&self) -> usize {
        u64::from_le(self.element_le) as usize
    }
    pub fn value(&self) -> i64 {
        i64::from_le(self.value_le)
    }
}

const_assert_eq!(size_of::<WireHdr>(), 8);
const_assert_eq!(size_of::<WireCount>(), 8);
const_assert_eq!(size_of::<WireBary>(), 40);
const_assert_eq!(size_of::<WireKeyed>(), 16);

/// Sequential writer for a message made of Pod sections.
#[derive(Debug, Default)]
pub struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    pub fn new(hdr: WireHdr) -> Self {
        let mut w = Self::default();
        w.put(&[hdr]);
        w
    }

    pub fn put<T: Pod>(&mut self, items: &[T]) -> &mut Self {
        self.buf.extend_from_slice(bytemuck::cast_slice(items));
        self
    }

    /// Write a count followed by the records.
    pub fn put_counted<T: Pod>(&mut self, items: &[T]) -> &mut Self {
        self.put(&[WireCount::new(items.len())]);
        self.put(items)
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor over a received message; every read is length-checked.
#[derive(Debug)]
pub struct WireReader<'a> {
    bytes: &'a [u8],
    pos: usize,
    rank: usize,
    peer: usize,
}

impl<'a> WireReader<'a> {
    /// Open a message and check its header against the expected kind.
    pub fn open(
        bytes: &'a [u8],
        expected_kind: u16,
        rank: usize,
        peer: usize,
    ) -> Result<(Self, WireHdr), DecompositionError> {
        let mut reader = Self {
            bytes,
            pos: 0,
            rank,
            peer,
        };
        let hdr = reader.take_one::<WireHdr>()?;
        if hdr.version() != WIRE_VERSION || hdr.kind() != expected_kind {
            return Err(reader.error(format!(
                "unexpected header (version {}, kind {}), expected kind {expected_kind}",
                hdr.version(),
                hdr.kind()
            )));
        }
        Ok((reader, hdr))
    }

    fn error(&self, detail: String) -> DecompositionError {
        DecompositionError::Communication {
            rank: self.rank,
            peer: self.peer,
            detail,
        }
    }

    pub fn take<T: Pod>(&mut self, n: usize) -> Result<Vec<T>, DecompositionError> {
        let Some(len) = n.checked_mul(size_of::<T>()) else {
            return Err(self.error(format!("element count {n} overflows the message size")));
        };
        let end = match self.pos.checked_add(len) {
            Some(end) if end <= self.bytes.len() => end,
            _ => {
                return Err(self.error(format!(
                    "truncated message: need {len} bytes at offset {}, have {}",
                    self.pos,
                    self.bytes.len()
                )));
            }
        };
        let mut out = vec![T::zeroed(); n];
        bytemuck::cast_slice_mut::<T, u8>(&mut out).copy_from_slice(&self.bytes[self.pos..end]);
        self.pos = end;
        Ok(out)
    }

    pub fn take_one<T: Pod>(&mut self) -> Result<T, DecompositionError> {
        Ok(self.take::<T>(1)?[0])
    }

    pub fn take_counted<T: Pod>(&mut self) -> Result<Vec<T>, DecompositionError> {
        let n = self.take_one::<WireCount>()?.get();
        self.take(n)
    }

    /// Fail if trailing bytes remain.
    pub fn finish(self) -> Result<(), DecompositionError> {
        if self.pos != self.bytes.len() {
            return Err(self.error(format!(
                "{} trailing bytes after message",
                self.bytes.len() - self.pos
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bary_packs_type_and_flag() {
        let b = WireBary::new([0.5, -1.25, 3.0], 42, 3, 1);
        assert_eq!(b.coords(), [0.5, -1.25, 3.0]);
        assert_eq!(b.element(), 42);
        assert_eq!(b.type_index(), 3);
        assert_eq!(b.flag(), 1);
    }

    #[test]
    fn reader_accepts_unaligned_input() {
        let mut w = WireWriter::new(WireHdr::new(kind::GLOBAL_IDS, 0));
        w.put_counted(&[WireKeyed::new(1, -1), WireKeyed::new(2, 99)]);
        let bytes = w.finish();
        let mut shifted = vec![0u8];
        shifted.extend_from_slice(&bytes);
        let (mut r, _) = WireReader::open(&shifted[1..], kind::GLOBAL_IDS, 0, 1).unwrap();
        let recs = r.take_counted::<WireKeyed>().unwrap();
        r.finish().unwrap();
        assert_eq!(recs[1].value(), 99);
        assert_eq!(recs[0].value(), -1);
    }

    #[test]
    fn reader_rejects_wrong_kind_and_truncation() {
        let bytes = WireWriter::new(WireHdr::new(kind::SAMPLES, 0)).finish();
        assert!(WireReader::open(&bytes, kind::SHARERS, 0, 1).is_err());
        let (mut r, _) = WireReader::open(&bytes, kind::SAMPLES, 0, 1).unwrap();
        assert!(r.take_one::<WireCount>().is_err());
    }

    #[test]
    fn oversized_count_is_a_communication_error() {
        let mut w = WireWriter::new(WireHdr::new(kind::GLOBAL_IDS, 0));
        w.put(&[WireCount::new(usize::MAX)]);
        let bytes = w.finish();
        let (mut r, _) = WireReader::open(&bytes, kind::GLOBAL_IDS, 0, 1).unwrap();
        let err = r.take_counted::<WireKeyed>().unwrap_err();
        assert!(matches!(err, DecompositionError::Communication { peer: 1, .. }));
    }
}
