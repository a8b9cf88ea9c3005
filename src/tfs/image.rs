use super::error::{Error, Result};
use memmap::Mmap;
use std::{fs::File, io, path::Path};

/// Random access to the bytes of a disk image.
pub trait ReadAt {
    fn read_at(&self, offset: u64, len: usize) -> io::Result<Vec<u8>>;

    fn read_exact_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        self.read_at(offset, len).map_err(|source| Error::Read {
            offset,
            len,
            source,
        })
    }
}

impl ReadAt for [u8] {
    fn read_at(&self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        let start = offset as usize;
        match start.checked_add(len) {
            Some(end) if offset <= usize::MAX as u64 && end <= self.len() => {
                Ok(self[start..end].to_vec())
            }
            _ => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "range {}+{} is outside of the {} byte image",
                    offset,
                    len,
                    self.len()
                ),
            )),
        }
    }
}

impl ReadAt for Vec<u8> {
    fn read_at(&self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        self.as_slice().read_at(offset, len)
    }
}

/// A disk image mapped read-only into memory. The mapping lives as long as
/// the handle, so dropping it at unmount releases the backing file.
#[derive(Debug)]
pub struct Image {
    mmap: Mmap,
}

impl Image {
    pub fn open<P>(path: P) -> anyhow::Result<Self>
    where
        P: AsRef<Path>,
    {
        let file = File::open(path.as_ref())?;
        if file.metadata()?.len() == 0 {
            return Err(anyhow!(
                "{} is empty and cannot be a TFS image",
                path.as_ref().display()
            ));
        }
        let mmap = unsafe { Mmap::map(&file)? };

        Ok(Self { mmap })
    }

    pub fn len(&self) -> u64 {
        self.mmap.len() as u64
    }
}

impl ReadAt for Image {
    fn read_at(&self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        self.mmap[..].read_at(offset, len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn read_in_range() -> anyhow::Result<()> {
        let image: Vec<u8> = (0..=255).collect();
        assert_eq!(image.read_at(10, 3)?, vec![10, 11, 12]);
        assert_eq!(image.read_at(256, 0)?, Vec::<u8>::new());
        Ok(())
    }

    #[test]
    fn read_past_end() {
        let image = vec![0u8; 16];
        let err = image.read_at(10, 7).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);

        match image.read_exact_at(u64::MAX, 1) {
            Err(Error::Read { offset, len, .. }) => {
                assert_eq!(offset, u64::MAX);
                assert_eq!(len, 1);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn mapped_image() -> anyhow::Result<()> {
        let mut path = std::env::temp_dir();
        path.push("tfs_mapped_image");
        path.set_extension("img");

        let mut file = File::create(&path)?;
        file.write_all(b"Hello, World!\n")?;
        drop(file);

        let image = Image::open(&path)?;
        assert_eq!(image.len(), 14);
        assert_eq!(image.read_at(7, 5)?, b"World".to_vec());
        assert!(image.read_at(10, 5).is_err());
        drop(image);

        Ok(std::fs::remove_file(&path)?)
    }

    #[test]
    fn empty_image_is_rejected() -> anyhow::Result<()> {
        let mut path = std::env::temp_dir();
        path.push("tfs_empty_image");
        path.set_extension("img");
        File::create(&path)?;

        assert!(Image::open(&path).is_err());

        Ok(std::fs::remove_file(&path)?)
    }
}
