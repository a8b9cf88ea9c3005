use crate::tfs::{
    error::Error,
    fs::Tfs,
    image::{Image, ReadAt},
    types::DirEntry,
    BLOCK_SIZE,
};
use fuser::{
    FileAttr, FileType, Filesystem, KernelConfig, MountOption, ReplyAttr, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, Request,
    TimeOrNow, FUSE_ROOT_ID,
};
use nix::errno::Errno;
use std::{
    collections::HashMap,
    convert::TryFrom,
    ffi::OsStr,
    os::raw::c_int,
    path::Path,
    time::{Duration, SystemTime},
};
use tracing::{debug, info, trace, warn};

// The image never changes under us.
const TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Default)]
pub struct MountOptions {
    pub allow_other: bool,
    pub auto_unmount: bool,
}

impl MountOptions {
    fn fuse_options(&self) -> Vec<MountOption> {
        let mut opts = vec![
            MountOption::RO,
            MountOption::FSName("tfs".to_owned()),
            MountOption::Subtype("tfs".to_owned()),
            MountOption::DefaultPermissions,
            MountOption::NoAtime,
        ];
        if self.allow_other {
            opts.push(MountOption::AllowOther);
        }
        if self.auto_unmount {
            opts.push(MountOption::AutoUnmount);
        }

        opts
    }
}

pub fn mount<P, Q>(image_path: P, mountpoint: Q, options: &MountOptions) -> anyhow::Result<()>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    let image = Image::open(image_path.as_ref())?;
    let image_len = image.len();
    let tfs = Tfs::new(image)?;
    let fs = TfsFuse::new(tfs, image_len);

    info!(
        image = %image_path.as_ref().display(),
        mountpoint = %mountpoint.as_ref().display(),
        reserved_blocks = fs.tfs.volume().reserved_blocks,
        "mounting"
    );

    fuser::mount2(fs, mountpoint.as_ref(), &options.fuse_options())?;
    info!("unmounted");

    Ok(())
}

/// Hands out inode numbers for paths as the kernel discovers them. The core
/// is path based, so every request maps its inode back to a path and
/// resolves it again.
#[derive(Debug)]
struct InodeTable {
    paths: Vec<String>,
    inodes: HashMap<String, u64>,
}

impl InodeTable {
    fn new() -> Self {
        let mut table = Self {
            paths: Vec::new(),
            inodes: HashMap::new(),
        };
        table.assign("/".to_owned());
        table
    }

    fn path(&self, ino: u64) -> Option<&str> {
        ino.checked_sub(FUSE_ROOT_ID)
            .and_then(|i| self.paths.get(i as usize))
            .map(|p| p.as_str())
    }

    fn assign(&mut self, path: String) -> u64 {
        if let Some(&ino) = self.inodes.get(&path) {
            return ino;
        }

        let ino = self.paths.len() as u64 + FUSE_ROOT_ID;
        self.paths.push(path.clone());
        self.inodes.insert(path, ino);
        ino
    }
}

fn child_path(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", parent, name)
    }
}

fn parent_path(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(i) => &path[..i],
    }
}

fn to_errno(op: &'static str, ino: u64, err: Error) -> Errno {
    let errno = err.to_errno();
    match &err {
        Error::NotFound(_) => trace!(op, ino, %errno, error = %err, "FUSE op returned ENOENT"),
        _ => warn!(op, ino, %errno, error = %err, "FUSE op failed"),
    }

    errno
}

struct TfsFuse<R> {
    tfs: Tfs<R>,
    inodes: InodeTable,
    data_blocks: u64,
    mounted_at: SystemTime,
    uid: u32,
    gid: u32,
}

impl<R: ReadAt> TfsFuse<R> {
    fn new(tfs: Tfs<R>, image_len: u64) -> Self {
        let data_blocks =
            image_len.saturating_sub(tfs.volume().data_block_offset(0)) / BLOCK_SIZE;

        Self {
            tfs,
            inodes: InodeTable::new(),
            data_blocks,
            mounted_at: SystemTime::now(),
            uid: nix::unistd::getuid().as_raw(),
            gid: nix::unistd::getgid().as_raw(),
        }
    }

    fn attr(&self, ino: u64, kind: FileType, size: u64) -> FileAttr {
        let (perm, nlink) = match kind {
            FileType::Directory => (0o555, 2),
            _ => (0o444, 1),
        };

        FileAttr {
            ino,
            size,
            blocks: (size + 511) / 512,
            atime: self.mounted_at,
            mtime: self.mounted_at,
            ctime: self.mounted_at,
            crtime: self.mounted_at,
            kind,
            perm,
            nlink,
            uid: self.uid,
            gid: self.gid,
            rdev: 0,
            blksize: BLOCK_SIZE as u32,
            flags: 0,
        }
    }

    fn entry_attr(&self, ino: u64, entry: &DirEntry) -> FileAttr {
        if entry.is_dir() {
            self.attr(ino, FileType::Directory, 0)
        } else {
            self.attr(ino, FileType::RegularFile, entry.content_size())
        }
    }

    fn path(&self, ino: u64) -> Result<String, Errno> {
        self.inodes
            .path(ino)
            .map(|p| p.to_owned())
            .ok_or(Errno::ENOENT)
    }

    fn resolve(&self, op: &'static str, ino: u64) -> Result<DirEntry, Errno> {
        let path = self.path(ino)?;
        self.tfs.resolve(&path).map_err(|e| to_errno(op, ino, e))
    }

    fn getattr_ino(&self, ino: u64) -> Result<FileAttr, Errno> {
        // The root has no entry of its own unless the image stores `.`.
        if ino == FUSE_ROOT_ID {
            return Ok(self.attr(ino, FileType::Directory, 0));
        }

        let entry = self.resolve("getattr", ino)?;
        Ok(self.entry_attr(ino, &entry))
    }

    fn lookup_name(&mut self, parent: u64, name: &OsStr) -> Result<FileAttr, Errno> {
        let name = name.to_str().ok_or(Errno::ENOENT)?;
        let path = child_path(&self.path(parent)?, name);
        let entry = self
            .tfs
            .resolve(&path)
            .map_err(|e| to_errno("lookup", parent, e))?;

        let ino = self.inodes.assign(path);
        Ok(self.entry_attr(ino, &entry))
    }

    /// Directory contents in the order the kernel gets them: `.` and `..`
    /// first (made up when the image does not store them), then the stored
    /// children in slot order.
    fn dir_entries(&mut self, ino: u64) -> Result<Vec<(u64, FileType, String)>, Errno> {
        let path = self.path(ino)?;
        let children = self
            .tfs
            .read_dir(&path)
            .map_err(|e| to_errno("readdir", ino, e))?;
        let parent = self.inodes.assign(parent_path(&path).to_owned());

        let mut entries = vec![
            (ino, FileType::Directory, ".".to_owned()),
            (parent, FileType::Directory, "..".to_owned()),
        ];
        for child in children {
            let name = child.display_name();
            if name == "." || name == ".." {
                continue;
            }

            let kind = if child.is_dir() {
                FileType::Directory
            } else {
                FileType::RegularFile
            };
            let child_ino = self.inodes.assign(child_path(&path, &name));
            entries.push((child_ino, kind, name));
        }

        Ok(entries)
    }

    fn check_open(&self, ino: u64, flags: i32) -> Result<(), Errno> {
        if flags & libc::O_ACCMODE != libc::O_RDONLY {
            debug!(ino, flags, "rejecting write access");
            return Err(Errno::EROFS);
        }

        self.getattr_ino(ino).map(|_| ())
    }

    fn read_ino(&self, ino: u64, offset: u64, size: u32) -> Result<Vec<u8>, Errno> {
        let entry = self.resolve("read", ino)?;
        if entry.is_dir() {
            return Err(Errno::EISDIR);
        }

        self.tfs
            .read(&entry, offset, size as usize)
            .map_err(|e| to_errno("read", ino, e))
    }
}

impl<R: ReadAt> Filesystem for TfsFuse<R> {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), c_int> {
        debug!(data_blocks = self.data_blocks, "init");
        Ok(())
    }

    fn destroy(&mut self) {
        debug!(inodes = self.inodes.paths.len(), "destroy");
    }

    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        match self.lookup_name(parent, name) {
            Ok(attr) => reply.entry(&TTL, &attr, 0),
            Err(errno) => reply.error(errno as c_int),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        match self.getattr_ino(ino) {
            Ok(attr) => reply.attr(&TTL, &attr),
            Err(errno) => reply.error(errno as c_int),
        }
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        match self.check_open(ino, flags) {
            Ok(()) => reply.opened(0, 0),
            Err(errno) => reply.error(errno as c_int),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let offset = u64::try_from(offset).unwrap_or(0);
        match self.read_ino(ino, offset, size) {
            Ok(data) => reply.data(&data),
            Err(errno) => reply.error(errno as c_int),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let entries = match self.dir_entries(ino) {
            Ok(entries) => entries,
            Err(errno) => return reply.error(errno as c_int),
        };

        let skip = usize::try_from(offset).unwrap_or(0);
        for (i, (ino, kind, name)) in entries.into_iter().enumerate().skip(skip) {
            if reply.add(ino, (i + 1) as i64, kind, name) {
                break;
            }
        }
        reply.ok();
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        reply.statfs(
            self.data_blocks,
            0,
            0,
            self.inodes.paths.len() as u64,
            0,
            BLOCK_SIZE as u32,
            crate::tfs::NAME_LEN as u32,
            BLOCK_SIZE as u32,
        );
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        debug!(ino, offset, len = data.len(), "rejecting write");
        reply.error(Errno::EROFS as c_int);
    }

    fn setattr(
        &mut self,
        _req: &Request<'_>,
        _ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        _size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        reply.error(Errno::EROFS as c_int);
    }

    fn create(
        &mut self,
        _req: &Request<'_>,
        _parent: u64,
        _name: &OsStr,
        _mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        reply.error(Errno::EROFS as c_int);
    }

    fn mkdir(
        &mut self,
        _req: &Request<'_>,
        _parent: u64,
        _name: &OsStr,
        _mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        reply.error(Errno::EROFS as c_int);
    }

    fn unlink(&mut self, _req: &Request<'_>, _parent: u64, _name: &OsStr, reply: ReplyEmpty) {
        reply.error(Errno::EROFS as c_int);
    }

    fn rmdir(&mut self, _req: &Request<'_>, _parent: u64, _name: &OsStr, reply: ReplyEmpty) {
        reply.error(Errno::EROFS as c_int);
    }
}
