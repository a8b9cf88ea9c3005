use super::{BITMAP_SIZE, BLOCK_SIZE};

pub fn block_offset(idx: u64) -> u64 {
    idx * BLOCK_SIZE
}

/// Byte offset of data block `idx`, skipping the boot block, the reserved
/// blocks that follow it and the usage bitmap.
pub fn data_block_offset(reserved_blocks: u8, idx: u64) -> u64 {
    block_offset(reserved_blocks as u64 + 1) + // boot + reserved
        BITMAP_SIZE +
        block_offset(idx)
}

/// Split an absolute path into its segments.
///
/// Empty segments are dropped. A path naming a directory (`/` itself or
/// anything ending in `/`) ends with a `.` segment so that resolution
/// finishes on the directory's own entry.
pub fn split_path(path: &str) -> Vec<&str> {
    let mut segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() || path.ends_with('/') {
        segments.push(".");
    }

    segments
}
