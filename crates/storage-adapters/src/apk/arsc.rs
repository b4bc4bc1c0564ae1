//! Compiled resource table (`resources.arsc`) lookup.
//!
//! Only simple values are indexed; bags (styles, arrays, plurals) are
//! skipped. When an entry exists in several configurations the default
//! configuration wins, otherwise the first one seen.

use std::collections::HashMap;

use super::chunk::{
    chunks, u16_at, u32_at, u8_at, ChunkHeader, ResValue, StringPool, NO_INDEX,
    RES_STRING_POOL_TYPE, RES_TABLE_PACKAGE_TYPE, RES_TABLE_TYPE, RES_TABLE_TYPE_SPEC_TYPE,
    RES_TABLE_TYPE_TYPE,
};
use super::ManifestError;

const FLAG_SPARSE: u8 = 0x01;
const FLAG_OFFSET16: u8 = 0x02;
const ENTRY_FLAG_COMPLEX: u16 = 0x0001;
const ENTRY_FLAG_COMPACT: u16 = 0x0008;
const NO_ENTRY16: u16 = 0xFFFF;

#[derive(Debug, Clone, Copy)]
struct Candidate {
    value: ResValue,
    default_config: bool,
}

#[derive(Debug, Default)]
pub(crate) struct ResourceTable {
    strings: StringPool,
    entries: HashMap<u32, Candidate>,
}

impl ResourceTable {
    pub fn parse(buf: &[u8]) -> Result<Self, ManifestError> {
        let root = ChunkHeader::read(buf, 0)?;
        if root.kind != RES_TABLE_TYPE {
            return Err(ManifestError::Malformed(format!(
                "expected resource table, found chunk type 0x{:04x}",
                root.kind
            )));
        }

        let mut table = Self::default();
        for chunk in chunks(buf, root.body(), root.end()) {
            let chunk = chunk?;
            match chunk.kind {
                RES_STRING_POOL_TYPE => table.strings = StringPool::parse(buf, &chunk)?,
                RES_TABLE_PACKAGE_TYPE => table.read_package(buf, &chunk)?,
                _ => {}
            }
        }
        Ok(table)
    }

    /// Value of `id` in the preferred configuration.
    pub fn get(&self, id: u32) -> Option<ResValue> {
        self.entries.get(&id).map(|c| c.value)
    }

    /// Entry of the global value string pool.
    pub fn string(&self, index: u32) -> Option<&str> {
        self.strings.get(index)
    }

    fn read_package(&mut self, buf: &[u8], package: &ChunkHeader) -> Result<(), ManifestError> {
        let package_id = u32_at(buf, package.offset + 8)? & 0xFF;

        for chunk in chunks(buf, package.body(), package.end()) {
            let chunk = chunk?;
            match chunk.kind {
                RES_TABLE_TYPE_TYPE => self.read_type(buf, &chunk, package_id)?,
                // Type and key names are not needed to resolve by ID.
                RES_STRING_POOL_TYPE | RES_TABLE_TYPE_SPEC_TYPE => {}
                _ => {}
            }
        }
        Ok(())
    }

    fn read_type(
        &mut self,
        buf: &[u8],
        chunk: &ChunkHeader,
        package_id: u32,
    ) -> Result<(), ManifestError> {
        let base = chunk.offset;
        let type_id = u8_at(buf, base + 8)? as u32;
        let flags = u8_at(buf, base + 9)?;
        let entry_count = u32_at(buf, base + 12)? as usize;
        let entries_start = base + u32_at(buf, base + 16)? as usize;
        let default_config = is_default_config(buf, base + 20)?;

        let offsets = chunk.body();
        for i in 0..entry_count {
            let (index, offset) = if flags & FLAG_SPARSE != 0 {
                let at = offsets + i * 4;
                (u16_at(buf, at)? as u32, u16_at(buf, at + 2)? as usize * 4)
            } else if flags & FLAG_OFFSET16 != 0 {
                match u16_at(buf, offsets + i * 2)? {
                    NO_ENTRY16 => continue,
                    v => (i as u32, v as usize * 4),
                }
            } else {
                match u32_at(buf, offsets + i * 4)? {
                    NO_INDEX => continue,
                    v => (i as u32, v as usize),
                }
            };

            let entry = entries_start + offset;
            if entry >= chunk.end() {
                return Err(ManifestError::Truncated { offset: entry });
            }
            let Some(value) = read_entry(buf, entry)? else {
                continue;
            };

            let id = (package_id << 24) | (type_id << 16) | index;
            let candidate = Candidate {
                value,
                default_config,
            };
            self.entries
                .entry(id)
                .and_modify(|existing| {
                    if candidate.default_config && !existing.default_config {
                        *existing = candidate;
                    }
                })
                .or_insert(candidate);
        }
        Ok(())
    }
}

/// `ResTable_entry` followed by its `Res_value`, or the compact form that
/// packs both into eight bytes. Bags yield `None`.
fn read_entry(buf: &[u8], at: usize) -> Result<Option<ResValue>, ManifestError> {
    let size = u16_at(buf, at)? as usize;
    let flags = u16_at(buf, at + 2)?;

    if flags & ENTRY_FLAG_COMPACT != 0 {
        return Ok(Some(ResValue {
            data_type: (flags >> 8) as u8,
            data: u32_at(buf, at + 4)?,
        }));
    }
    if flags & ENTRY_FLAG_COMPLEX != 0 {
        return Ok(None);
    }
    ResValue::read(buf, at + size).map(Some)
}

/// A `ResTable_config` with every field after its size zeroed matches any device.
fn is_default_config(buf: &[u8], at: usize) -> Result<bool, ManifestError> {
    let size = u32_at(buf, at)? as usize;
    let fields = buf
        .get(at + 4..at + size.max(4))
        .ok_or(ManifestError::Truncated { offset: at })?;
    Ok(fields.iter().all(|b| *b == 0))
}
