pub mod error;
pub mod fs;
pub mod image;
pub mod types;
pub mod util;

pub const BLOCK_SIZE: u64 = 1024;
pub const BITMAP_SIZE: u64 = 2 * BLOCK_SIZE;
pub const DIR_ENTRY_SIZE: usize = 16;
pub const ENTRIES_PER_BLOCK: usize = BLOCK_SIZE as usize / DIR_ENTRY_SIZE;
pub const NAME_LEN: usize = 10;
pub const RESERVED_BLOCKS_OFFSET: u64 = 509;
pub const BOOT_SIGNATURE: [u8; 2] = [0x55, 0xAA];
