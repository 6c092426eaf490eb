//! Byte-pattern search over region buffers.

use memchr::memmem;

/// Every offset where `needle` occurs and `offset % align == 0`.
///
/// Overlapping matches are reported: the search resumes one byte after each
/// hit rather than after the whole needle.
pub fn find_aligned(buffer: &[u8], needle: &[u8], align: usize) -> Vec<usize> {
    let mut matches = Vec::new();
    if needle.is_empty() || align == 0 {
        return matches;
    }

    let finder = memmem::Finder::new(needle);
    let mut start = 0;
    while start < buffer.len() {
        let Some(found) = finder.find(&buffer[start..]) else {
            break;
        };
        let pos = start + found;
        if pos % align == 0 {
            matches.push(pos);
        }
        start = pos + 1;
    }
    matches
}

/// Aligned offsets of `value` encoded as a little-endian `i32`.
pub fn find_i32(buffer: &[u8], value: i32) -> Vec<usize> {
    find_aligned(buffer, &value.to_le_bytes(), 4)
}

pub fn i32_at(buffer: &[u8], offset: usize) -> Option<i32> {
    let bytes = buffer.get(offset..offset.checked_add(4)?)?;
    Some(i32::from_le_bytes(bytes.try_into().ok()?))
}

pub fn u32_at(buffer: &[u8], offset: usize) -> Option<u32> {
    let bytes = buffer.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_le_bytes(bytes.try_into().ok()?))
}

/// True when `len` bytes at `offset` exist and are all zero.
pub fn is_zero_run(buffer: &[u8], offset: usize, len: usize) -> bool {
    offset
        .checked_add(len)
        .and_then(|end| buffer.get(offset..end))
        .is_some_and(|bytes| bytes.iter().all(|&b| b == 0))
}

/// Every 4-byte-aligned `u32` in the buffer, with its offset.
pub fn aligned_u32s(buffer: &[u8]) -> impl Iterator<Item = (usize, u32)> + '_ {
    buffer.chunks_exact(4).enumerate().map(|(i, chunk)| {
        (
            i * 4,
            u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]),
        )
    })
}
