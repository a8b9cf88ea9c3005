use super::{
    error::Result, image::ReadAt, util, BLOCK_SIZE, DIR_ENTRY_SIZE, NAME_LEN,
    RESERVED_BLOCKS_OFFSET,
};

const DIR_FLAG: u8 = 0x80;
const EMPTY_BYTE: u8 = 0x7F;
const END_BYTE: u8 = 0x00;

/// The only piece of volume-wide metadata: how many reserved blocks sit
/// between the boot block and the usage bitmap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Volume {
    pub reserved_blocks: u8,
}

impl Volume {
    pub fn new(reserved_blocks: u8) -> Self {
        Self { reserved_blocks }
    }

    pub fn read_from<R>(r: &R) -> Result<Self>
    where
        R: ReadAt + ?Sized,
    {
        let buf = r.read_exact_at(RESERVED_BLOCKS_OFFSET, 1)?;
        Ok(Self::new(buf[0]))
    }

    pub fn data_block_offset(&self, idx: u64) -> u64 {
        util::data_block_offset(self.reserved_blocks, idx)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    Used,
    Empty,
    End,
}

impl EntryType {
    /// Classify a raw directory slot. Only the two exact sentinel patterns
    /// are special, every other byte sequence is a used entry.
    pub fn classify(raw: &[u8; DIR_ENTRY_SIZE]) -> Self {
        if raw.iter().all(|&b| b == END_BYTE) {
            EntryType::End
        } else if raw.iter().all(|&b| b == EMPTY_BYTE) {
            EntryType::Empty
        } else {
            EntryType::Used
        }
    }
}

/// A decoded 16 byte directory entry.
///
/// | offset | width | field         |
/// |--------|-------|---------------|
/// | 0      | 10    | `name`        |
/// | 10     | 2     | `start_block` |
/// | 12     | 2     | `num_blocks`  |
/// | 14     | 2     | `size`        |
///
/// Integers are little endian. Bit 7 of the first name byte marks a
/// directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirEntry {
    pub name: [u8; NAME_LEN],
    pub start_block: u16,
    pub num_blocks: u16,
    pub size: u16,
}

impl DirEntry {
    pub fn new(name: &str, is_dir: bool, start_block: u16, num_blocks: u16, size: u16) -> Self {
        let mut buf = [0u8; NAME_LEN];
        let len = name.len().min(NAME_LEN);
        buf[..len].copy_from_slice(&name.as_bytes()[..len]);
        if is_dir {
            buf[0] |= DIR_FLAG;
        }

        Self {
            name: buf,
            start_block,
            num_blocks,
            size,
        }
    }

    pub fn decode(raw: &[u8; DIR_ENTRY_SIZE]) -> Self {
        let mut name = [0u8; NAME_LEN];
        name.copy_from_slice(&raw[0..10]);

        Self {
            name,
            start_block: u16::from_le_bytes([raw[10], raw[11]]),
            num_blocks: u16::from_le_bytes([raw[12], raw[13]]),
            size: u16::from_le_bytes([raw[14], raw[15]]),
        }
    }

    pub fn encode(&self) -> [u8; DIR_ENTRY_SIZE] {
        let mut raw = [0u8; DIR_ENTRY_SIZE];
        raw[0..10].copy_from_slice(&self.name);
        raw[10..12].copy_from_slice(&self.start_block.to_le_bytes());
        raw[12..14].copy_from_slice(&self.num_blocks.to_le_bytes());
        raw[14..16].copy_from_slice(&self.size.to_le_bytes());
        raw
    }

    pub fn is_dir(&self) -> bool {
        self.name[0] & DIR_FLAG != 0
    }

    /// Name with the directory flag cleared. The encoder pads short names
    /// with zeros, so the name stops at the first zero byte or at the end of
    /// the 10 byte slot.
    pub fn display_name(&self) -> String {
        let mut name = self.name;
        name[0] &= !DIR_FLAG;
        let len = name.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
        String::from_utf8_lossy(&name[..len]).into_owned()
    }

    /// Logical length of the entry's content in bytes.
    pub fn content_size(&self) -> u64 {
        match self.num_blocks {
            0 => 0,
            n => (n as u64 - 1) * BLOCK_SIZE + self.size as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_sentinels() {
        assert_eq!(EntryType::classify(&[0x00; 16]), EntryType::End);
        assert_eq!(EntryType::classify(&[0x7F; 16]), EntryType::Empty);
    }

    #[test]
    fn classify_near_sentinels_as_used() {
        let mut raw = [0x00; 16];
        raw[15] = 0x01;
        assert_eq!(EntryType::classify(&raw), EntryType::Used);

        let mut raw = [0x7F; 16];
        raw[0] = 0xFF;
        assert_eq!(EntryType::classify(&raw), EntryType::Used);

        let mut raw = [0x7F; 16];
        raw[8] = 0x00;
        assert_eq!(EntryType::classify(&raw), EntryType::Used);
    }

    #[test]
    fn classify_every_byte_value() {
        for b in 0..=255u8 {
            let expected = match b {
                0x00 => EntryType::End,
                0x7F => EntryType::Empty,
                _ => EntryType::Used,
            };
            assert_eq!(EntryType::classify(&[b; 16]), expected);
        }
    }

    #[test]
    fn decode_fields() {
        let raw = [
            b'h' | 0x80, b'i', 0, 0, 0, 0, 0, 0, 0, 0, // name
            0x34, 0x12, // start_block
            0x03, 0x00, // num_blocks
            0xC8, 0x00, // size
        ];
        let entry = DirEntry::decode(&raw);

        assert!(entry.is_dir());
        assert_eq!(entry.display_name(), "hi");
        assert_eq!(entry.start_block, 0x1234);
        assert_eq!(entry.num_blocks, 3);
        assert_eq!(entry.size, 200);
        assert_eq!(entry.encode(), raw);
    }

    #[test]
    fn display_name_uses_full_slot() {
        let entry = DirEntry::new("abcdefghij", false, 1, 1, 1);
        assert!(!entry.is_dir());
        assert_eq!(entry.display_name(), "abcdefghij");

        let entry = DirEntry::new("abcdefghij", true, 1, 1, 1);
        assert!(entry.is_dir());
        assert_eq!(entry.display_name(), "abcdefghij");
    }

    #[test]
    fn content_size() {
        assert_eq!(DirEntry::new("f", false, 4, 3, 200).content_size(), 2248);
        assert_eq!(DirEntry::new("f", false, 4, 1, 14).content_size(), 14);
        assert_eq!(DirEntry::new("f", false, 4, 2, 1024).content_size(), 2048);
        assert_eq!(DirEntry::new("f", false, 0, 0, 0).content_size(), 0);
    }

    #[test]
    fn volume_from_image() -> anyhow::Result<()> {
        let mut image = vec![0u8; 1024];
        image[509] = 7;
        let volume = Volume::read_from(&image)?;

        assert_eq!(volume.reserved_blocks, 7);
        assert_eq!(volume.data_block_offset(0), 8 * 1024 + 2048);
        Ok(())
    }

    #[test]
    fn volume_from_truncated_image() {
        let image = vec![0u8; 100];
        assert!(Volume::read_from(&image).is_err());
    }
}
