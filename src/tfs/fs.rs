use super::{
    error::{Error, Result},
    image::ReadAt,
    types::{DirEntry, EntryType, Volume},
    util, BLOCK_SIZE, DIR_ENTRY_SIZE,
};
use tracing::{debug, trace};

pub const ROOT_BLOCK: u64 = 0;

/// A mounted TFS volume.
///
/// Holds the image reader and the volume descriptor read from it. Every
/// operation goes back to the reader; no block contents are kept between
/// calls.
#[derive(Debug)]
pub struct Tfs<R> {
    volume: Volume,
    reader: R,
}

impl<R: ReadAt> Tfs<R> {
    pub fn new(reader: R) -> Result<Self> {
        let volume = Volume::read_from(&reader)?;
        debug!(reserved_blocks = volume.reserved_blocks, "read volume descriptor");

        Ok(Self { volume, reader })
    }

    pub fn volume(&self) -> Volume {
        self.volume
    }

    /// Find the entry for an absolute path.
    pub fn resolve(&self, path: &str) -> Result<DirEntry> {
        let segments = util::split_path(path);
        let (name, parents) = match segments.split_last() {
            Some(split) => split,
            None => return Err(Error::NotFound(path.to_owned())),
        };

        let mut block = ROOT_BLOCK;
        let mut walked = String::new();
        for segment in parents {
            walked.push('/');
            walked.push_str(segment);

            let entry = self
                .find(block, segment)?
                .ok_or_else(|| Error::NotFound(walked.clone()))?;
            if !entry.is_dir() {
                return Err(Error::NotADirectory(walked));
            }

            trace!(segment, start_block = entry.start_block, "descending");
            block = entry.start_block as u64;
        }

        let entry = self
            .find(block, name)?
            .ok_or_else(|| Error::NotFound(path.to_owned()))?;
        debug!(path, start_block = entry.start_block, is_dir = entry.is_dir(), "resolved");

        Ok(entry)
    }

    /// Children of the root directory, read straight from data block 0.
    pub fn list_root(&self) -> Result<Vec<DirEntry>> {
        self.entries(ROOT_BLOCK)
    }

    pub fn list(&self, dir: &DirEntry) -> Result<Vec<DirEntry>> {
        if !dir.is_dir() {
            return Err(Error::NotADirectory(dir.display_name()));
        }

        self.entries(dir.start_block as u64)
    }

    pub fn read_dir(&self, path: &str) -> Result<Vec<DirEntry>> {
        if util::split_path(path) == ["."] {
            return self.list_root();
        }

        let dir = self.resolve(path)?;
        self.list(&dir)
    }

    /// Read up to `len` bytes of `file` starting at `offset`. The range is
    /// clipped to the file's content size, so reading at or past the end
    /// yields no bytes.
    pub fn read(&self, file: &DirEntry, offset: u64, len: usize) -> Result<Vec<u8>> {
        let size = file.content_size();
        if offset >= size {
            return Ok(Vec::new());
        }

        let len = (size - offset).min(len as u64) as usize;
        let start = self.volume.data_block_offset(file.start_block as u64) + offset;
        trace!(start, len, "reading file content");

        self.reader.read_exact_at(start, len)
    }

    /// Used entries of a directory block in slot order. Empty slots are
    /// skipped and the scan stops at the first end marker.
    fn entries(&self, block: u64) -> Result<Vec<DirEntry>> {
        let buf = self
            .reader
            .read_exact_at(self.volume.data_block_offset(block), BLOCK_SIZE as usize)?;

        let mut entries = Vec::new();
        for chunk in buf.chunks_exact(DIR_ENTRY_SIZE) {
            let mut raw = [0u8; DIR_ENTRY_SIZE];
            raw.copy_from_slice(chunk);
            match EntryType::classify(&raw) {
                EntryType::End => break,
                EntryType::Empty => continue,
                EntryType::Used => entries.push(DirEntry::decode(&raw)),
            }
        }

        Ok(entries)
    }

    /// First used entry in `block` named `name`. Duplicate names are not
    /// rejected; storage order decides.
    fn find(&self, block: u64, name: &str) -> Result<Option<DirEntry>> {
        trace!(block, name, "scanning directory block");
        Ok(self
            .entries(block)?
            .into_iter()
            .find(|entry| entry.display_name() == name))
    }
}
