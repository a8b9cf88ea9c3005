use crate::tfs::{
    types::DirEntry, BITMAP_SIZE, BLOCK_SIZE, BOOT_SIGNATURE, DIR_ENTRY_SIZE, ENTRIES_PER_BLOCK,
    NAME_LEN, RESERVED_BLOCKS_OFFSET,
};
use anyhow::{anyhow, Context};
use byte_unit::Byte;
use std::{
    fs::{self, File, OpenOptions},
    io::{BufWriter, Write},
    path::Path,
};
use tracing::{debug, info, warn};

const MAX_BLOCKS: u64 = u16::MAX as u64 + 1;

/// Create a new image at `path`. When `source` is given its files and
/// directories are copied into the image.
pub fn make<P, Q>(path: P, source: Option<Q>, reserved_blocks: u8, min_size: u64) -> anyhow::Result<()>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    let mut data = DataRegion::default();
    let root = data.alloc(1)?;
    let mut entries = vec![DirEntry::new(".", true, root, 1, BLOCK_SIZE as u16)];
    if let Some(source) = source {
        entries.extend(data.add_dir(source.as_ref(), root)?);
    }
    data.write_dir(root, &entries)?;

    let file = create_file(path.as_ref())?;
    let mut buf = BufWriter::new(file);

    let mut reserved = vec![0u8; (reserved_blocks as u64 + 1) as usize * BLOCK_SIZE as usize];
    reserved[RESERVED_BLOCKS_OFFSET as usize] = reserved_blocks;
    reserved[510..512].copy_from_slice(&BOOT_SIGNATURE);
    buf.write_all(&reserved)?;
    buf.write_all(&vec![0u8; BITMAP_SIZE as usize])?; // usage bitmap
    buf.write_all(&data.blocks)?;
    buf.flush()?;

    let len = reserved.len() as u64 + BITMAP_SIZE + data.blocks.len() as u64;
    let file = OpenOptions::new().write(true).open(path.as_ref())?;
    file.set_len(len.max(min_size))?;

    info!(
        image = %path.as_ref().display(),
        data_blocks = data.len(),
        size = %Byte::from_bytes(len.max(min_size) as _).get_appropriate_unit(true),
        "created image"
    );

    Ok(())
}

#[derive(Debug, Default)]
struct DataRegion {
    blocks: Vec<u8>,
}

impl DataRegion {
    fn len(&self) -> u64 {
        self.blocks.len() as u64 / BLOCK_SIZE
    }

    /// Reserve `count` contiguous blocks and return the first one.
    fn alloc(&mut self, count: u64) -> anyhow::Result<u16> {
        let start = self.len();
        if start + count > MAX_BLOCKS {
            return Err(anyhow!(
                "Image is full: {} more blocks do not fit in {} addressable blocks",
                count,
                MAX_BLOCKS
            ));
        }

        self.blocks.resize(((start + count) * BLOCK_SIZE) as usize, 0);
        Ok(start as u16)
    }

    fn write_dir(&mut self, block: u16, entries: &[DirEntry]) -> anyhow::Result<()> {
        if entries.len() > ENTRIES_PER_BLOCK {
            return Err(anyhow!(
                "Directory has {} entries, at most {} fit in a block",
                entries.len(),
                ENTRIES_PER_BLOCK
            ));
        }

        let offset = block as usize * BLOCK_SIZE as usize;
        for (i, entry) in entries.iter().enumerate() {
            let start = offset + i * DIR_ENTRY_SIZE;
            self.blocks[start..start + DIR_ENTRY_SIZE].copy_from_slice(&entry.encode());
        }

        Ok(())
    }

    fn write(&mut self, block: u16, content: &[u8]) {
        let offset = block as usize * BLOCK_SIZE as usize;
        self.blocks[offset..offset + content.len()].copy_from_slice(content);
    }

    /// Copy the children of `dir` into the image and return their entries.
    fn add_dir(&mut self, dir: &Path, block: u16) -> anyhow::Result<Vec<DirEntry>> {
        let mut children = fs::read_dir(dir)
            .with_context(|| format!("Cannot read directory {}", dir.display()))?
            .collect::<Result<Vec<_>, _>>()?;
        children.sort_by_key(|c| c.file_name());

        let mut entries = Vec::with_capacity(children.len());
        for child in children {
            let path = child.path();
            let file_type = child.file_type()?;
            let name = validate_name(&path)?;

            if file_type.is_dir() {
                let start = self.alloc(1)?;
                let mut dir_entries = vec![
                    DirEntry::new(".", true, start, 1, BLOCK_SIZE as u16),
                    DirEntry::new("..", true, block, 1, BLOCK_SIZE as u16),
                ];
                dir_entries.extend(self.add_dir(&path, start)?);
                self.write_dir(start, &dir_entries)
                    .with_context(|| format!("Cannot add {}", path.display()))?;

                debug!(path = %path.display(), start, "added directory");
                entries.push(DirEntry::new(name, true, start, 1, BLOCK_SIZE as u16));
            } else if file_type.is_file() {
                let content = fs::read(&path)?;
                let entry = self
                    .add_file(name, &content)
                    .with_context(|| format!("Cannot add {}", path.display()))?;

                debug!(path = %path.display(), start = entry.start_block, len = content.len(), "added file");
                entries.push(entry);
            } else {
                warn!(path = %path.display(), "skipping entry that is neither a file nor a directory");
            }
        }

        Ok(entries)
    }

    fn add_file(&mut self, name: &str, content: &[u8]) -> anyhow::Result<DirEntry> {
        if content.is_empty() {
            return Ok(DirEntry::new(name, false, 0, 0, 0));
        }

        let len = content.len() as u64;
        let count = (len + BLOCK_SIZE - 1) / BLOCK_SIZE;
        if count > u16::MAX as u64 {
            return Err(anyhow!(
                "File is {} long, the maximum is {}",
                Byte::from_bytes(len as _).get_appropriate_unit(true),
                Byte::from_bytes((u16::MAX as u64 * BLOCK_SIZE) as _).get_appropriate_unit(true)
            ));
        }

        let start = self.alloc(count)?;
        self.write(start, content);
        let size = len - (count - 1) * BLOCK_SIZE;

        Ok(DirEntry::new(name, false, start, count as u16, size as u16))
    }
}

fn validate_name(path: &Path) -> anyhow::Result<&str> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("{} does not have an ASCII name", path.display()))?;

    if name.is_empty() || name.len() > NAME_LEN {
        return Err(anyhow!(
            "{}: names must be between 1 and {} bytes long",
            path.display(),
            NAME_LEN
        ));
    }
    if !name.bytes().all(|b| (0x20..0x7F).contains(&b)) {
        return Err(anyhow!("{}: names must be printable ASCII", path.display()));
    }

    Ok(name)
}

fn create_file<P: AsRef<Path>>(name: P) -> anyhow::Result<File> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create_new(true)
        .open(name)?;

    Ok(file)
}
