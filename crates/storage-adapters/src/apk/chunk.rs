//! Little-endian chunk primitives shared by the binary XML and resource
//! table decoders.

use super::ManifestError;

pub(crate) const RES_STRING_POOL_TYPE: u16 = 0x0001;
pub(crate) const RES_TABLE_TYPE: u16 = 0x0002;
pub(crate) const RES_XML_TYPE: u16 = 0x0003;
pub(crate) const RES_XML_START_NAMESPACE_TYPE: u16 = 0x0100;
pub(crate) const RES_XML_END_NAMESPACE_TYPE: u16 = 0x0101;
pub(crate) const RES_XML_START_ELEMENT_TYPE: u16 = 0x0102;
pub(crate) const RES_XML_END_ELEMENT_TYPE: u16 = 0x0103;
pub(crate) const RES_XML_RESOURCE_MAP_TYPE: u16 = 0x0180;
pub(crate) const RES_TABLE_PACKAGE_TYPE: u16 = 0x0200;
pub(crate) const RES_TABLE_TYPE_TYPE: u16 = 0x0201;
pub(crate) const RES_TABLE_TYPE_SPEC_TYPE: u16 = 0x0202;

const UTF8_FLAG: u32 = 1 << 8;

/// `Res_value` data types the decoders understand.
pub(crate) const TYPE_REFERENCE: u8 = 0x01;
pub(crate) const TYPE_STRING: u8 = 0x03;
pub(crate) const TYPE_INT_DEC: u8 = 0x10;
pub(crate) const TYPE_INT_HEX: u8 = 0x11;
pub(crate) const TYPE_INT_BOOLEAN: u8 = 0x12;

/// Marks an absent string index.
pub(crate) const NO_INDEX: u32 = 0xFFFF_FFFF;

pub(crate) fn u8_at(buf: &[u8], offset: usize) -> Result<u8, ManifestError> {
    buf.get(offset)
        .copied()
        .ok_or(ManifestError::Truncated { offset })
}

pub(crate) fn u16_at(buf: &[u8], offset: usize) -> Result<u16, ManifestError> {
    let bytes = buf
        .get(offset..offset.saturating_add(2))
        .ok_or(ManifestError::Truncated { offset })?;
    Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
}

pub(crate) fn u32_at(buf: &[u8], offset: usize) -> Result<u32, ManifestError> {
    let bytes = buf
        .get(offset..offset.saturating_add(4))
        .ok_or(ManifestError::Truncated { offset })?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// `ResChunk_header`, located at `offset` in its buffer.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ChunkHeader {
    pub offset: usize,
    pub kind: u16,
    pub header_size: usize,
    pub size: usize,
}

impl ChunkHeader {
    pub fn read(buf: &[u8], offset: usize) -> Result<Self, ManifestError> {
        let header = Self {
            offset,
            kind: u16_at(buf, offset)?,
            header_size: u16_at(buf, offset + 2)? as usize,
            size: u32_at(buf, offset + 4)? as usize,
        };
        if header.header_size < 8
            || header.size < header.header_size
            || offset.saturating_add(header.size) > buf.len()
        {
            return Err(ManifestError::Malformed(format!(
                "chunk 0x{:04x} at {offset} has invalid bounds",
                header.kind
            )));
        }
        Ok(header)
    }

    pub fn end(&self) -> usize {
        self.offset + self.size
    }

    pub fn body(&self) -> usize {
        self.offset + self.header_size
    }
}

/// Iterates over the sibling chunks in `buf[start..end]`.
pub(crate) fn chunks(
    buf: &[u8],
    start: usize,
    end: usize,
) -> impl Iterator<Item = Result<ChunkHeader, ManifestError>> + '_ {
    let mut cursor = start;
    std::iter::from_fn(move || {
        if cursor >= end {
            return None;
        }
        let header = ChunkHeader::read(buf, cursor);
        match &header {
            Ok(h) => cursor = h.end(),
            Err(_) => cursor = end,
        }
        Some(header)
    })
}

/// A decoded `ResStringPool`.
#[derive(Debug, Default)]
pub(crate) struct StringPool {
    strings: Vec<String>,
}

impl StringPool {
    pub fn parse(buf: &[u8], chunk: &ChunkHeader) -> Result<Self, ManifestError> {
        let base = chunk.offset;
        let count = u32_at(buf, base + 8)? as usize;
        let flags = u32_at(buf, base + 16)?;
        let strings_start = base + u32_at(buf, base + 20)? as usize;
        let utf8 = flags & UTF8_FLAG != 0;

        let offsets = chunk.body();
        let mut strings = Vec::with_capacity(count.min(4096));
        for i in 0..count {
            let at = strings_start + u32_at(buf, offsets + i * 4)? as usize;
            if at >= chunk.end() {
                return Err(ManifestError::Truncated { offset: at });
            }
            let s = if utf8 {
                decode_utf8(&buf[..chunk.end()], at)?
            } else {
                decode_utf16(&buf[..chunk.end()], at)?
            };
            strings.push(s);
        }
        Ok(Self { strings })
    }

    pub fn get(&self, index: u32) -> Option<&str> {
        if index == NO_INDEX {
            return None;
        }
        self.strings.get(index as usize).map(String::as_str)
    }
}

/// UTF-8 entries carry a UTF-16 length then a byte length, each one or two bytes.
fn decode_utf8(buf: &[u8], at: usize) -> Result<String, ManifestError> {
    let (_, skip) = utf8_length(buf, at)?;
    let (len, skip2) = utf8_length(buf, at + skip)?;
    let start = at + skip + skip2;
    let bytes = buf
        .get(start..start + len)
        .ok_or(ManifestError::Truncated { offset: start })?;
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

fn utf8_length(buf: &[u8], at: usize) -> Result<(usize, usize), ManifestError> {
    let first = u8_at(buf, at)? as usize;
    if first & 0x80 != 0 {
        let second = u8_at(buf, at + 1)? as usize;
        Ok((((first & 0x7F) << 8) | second, 2))
    } else {
        Ok((first, 1))
    }
}

fn decode_utf16(buf: &[u8], at: usize) -> Result<String, ManifestError> {
    let first = u16_at(buf, at)? as usize;
    let (len, start) = if first & 0x8000 != 0 {
        let second = u16_at(buf, at + 2)? as usize;
        ((((first & 0x7FFF) << 16) | second), at + 4)
    } else {
        (first, at + 2)
    };
    let units = (0..len)
        .map(|i| u16_at(buf, start + i * 2))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(String::from_utf16_lossy(&units))
}

/// `Res_value`: the typed payload of an attribute or table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ResValue {
    pub data_type: u8,
    pub data: u32,
}

impl ResValue {
    /// Reads the 8-byte structure at `offset`.
    pub fn read(buf: &[u8], offset: usize) -> Result<Self, ManifestError> {
        Ok(Self {
            data_type: u8_at(buf, offset + 3)?,
            data: u32_at(buf, offset + 4)?,
        })
    }
}
