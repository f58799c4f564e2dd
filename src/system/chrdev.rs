//! Character devices: device numbers, classes, device nodes and cdevs.
//!
//! Registering a character device takes four steps, each with its own
//! registration type:
//!
//! 1. [`ChrdevRegion::alloc`], `alloc_chrdev_region`
//! 2. [`Class::create`], `class_create`
//! 3. [`Class::device_create`], `device_create`
//! 4. [`Cdev::add`], `cdev_init` + `cdev_add`
//!
//! Each type undoes its step on drop. Keep them in a struct in the reverse
//! of that order and teardown happens in the right order for free.
use super::{
    sysfs::{Attribute, AttributeOps, Mode},
    uaccess::{UserSliceReader, UserSliceWriter},
    Kernel,
};
use crate::error::{Error, Result};
use std::{
    fmt,
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

/// A device number, `dev_t`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DevNumber {
    major: u32,
    minor: u32,
}

impl DevNumber {
    /// `MKDEV`
    pub fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    pub fn major(&self) -> u32 {
        self.major
    }

    pub fn minor(&self) -> u32 {
        self.minor
    }
}

/// `major:minor`, the format of the sysfs `dev` file.
impl fmt::Display for DevNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.major, self.minor)
    }
}

/// Handlers behind a character device, `struct file_operations`.
///
/// Operations without a handler fail with [`Error::InvalidArgument`], as the
/// kernel does.
pub trait FileOperations: Send + Sync {
    /// Fill `writer` from the file at `offset`, advancing `offset` past
    /// whatever was produced. Returning `0` means end of file.
    fn read(&self, writer: &mut UserSliceWriter<'_>, offset: &mut u64) -> Result<usize> {
        let _ = (writer, offset);
        Err(Error::InvalidArgument)
    }

    /// Consume `reader` at `offset`, returning how many bytes were taken.
    fn write(&self, reader: &mut UserSliceReader<'_>, offset: &mut u64) -> Result<usize> {
        let _ = (reader, offset);
        Err(Error::InvalidArgument)
    }
}

/// An allocated range of device numbers.
#[derive(Debug)]
pub struct ChrdevRegion {
    kernel: Arc<Kernel>,
    first: DevNumber,
    count: u32,
}

impl ChrdevRegion {
    /// `alloc_chrdev_region`, get `count` minors starting at `first_minor`
    /// under a dynamically chosen major.
    ///
    /// # Errors
    ///
    /// - If `count` is zero
    /// - If no dynamic majors are left
    pub fn alloc(kernel: &Arc<Kernel>, first_minor: u32, count: u32, name: &str) -> Result<Self> {
        let first = kernel.alloc_region(first_minor, count, name)?;
        Ok(Self {
            kernel: kernel.clone(),
            first,
            count,
        })
    }

    /// First device number in the range
    pub fn first(&self) -> DevNumber {
        self.first
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}

impl Drop for ChrdevRegion {
    /// `unregister_chrdev_region`
    fn drop(&mut self) {
        self.kernel.release_region(self.first, self.count);
    }
}

/// A device class, `/sys/class/<name>`.
#[derive(Debug)]
pub struct Class {
    kernel: Arc<Kernel>,
    name: String,
}

impl Class {
    /// `class_create`
    ///
    /// # Errors
    ///
    /// - If a class called `name` already exists
    pub fn create(kernel: &Arc<Kernel>, name: &str) -> Result<Self> {
        kernel.add_class(name)?;
        Ok(Self {
            kernel: kernel.clone(),
            name: name.into(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `device_create`, make `/dev/<name>` for `devt` in this class.
    ///
    /// The device also gets a sysfs directory with a read-only `dev`
    /// attribute holding `major:minor`.
    ///
    /// # Errors
    ///
    /// - If `/dev/<name>` already exists
    pub fn device_create(&self, devt: DevNumber, name: &str) -> Result<DeviceNode> {
        let attr = Attribute::new("dev", Mode::READ_ONLY, Arc::new(DevAttr(devt)));
        let path = self.kernel.add_device(&self.name, devt, name, attr)?;
        Ok(DeviceNode {
            kernel: self.kernel.clone(),
            class: self.name.clone(),
            devt,
            path,
        })
    }
}

impl Drop for Class {
    /// `class_destroy`
    fn drop(&mut self) {
        self.kernel.destroy_class(&self.name);
    }
}

/// Shows a device number.
struct DevAttr(DevNumber);

impl AttributeOps for DevAttr {
    fn show(&self) -> Result<String> {
        Ok(format!("{}\n", self.0))
    }
}

/// A device node under `/dev`.
#[derive(Debug)]
pub struct DeviceNode {
    kernel: Arc<Kernel>,
    class: String,
    devt: DevNumber,
    path: PathBuf,
}

impl DeviceNode {
    /// Full path to the node
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn devt(&self) -> DevNumber {
        self.devt
    }
}

impl Drop for DeviceNode {
    /// `device_destroy`
    fn drop(&mut self) {
        self.kernel.destroy_device(&self.class, &self.path);
    }
}

/// A character device that hasn't been added yet, `cdev_init`.
pub struct Cdev {
    ops: Arc<dyn FileOperations>,
}

impl Cdev {
    pub fn new(ops: Arc<dyn FileOperations>) -> Self {
        Self { ops }
    }

    /// `cdev_add`, make the device live for `count` minors from `devt`.
    ///
    /// Opens can be dispatched to `ops` as soon as this returns.
    pub fn add(self, kernel: &Arc<Kernel>, devt: DevNumber, count: u32) -> Result<CdevRegistration> {
        kernel.add_cdev(devt, count, self.ops)?;
        Ok(CdevRegistration {
            kernel: kernel.clone(),
            devt,
        })
    }
}

/// A live character device.
#[derive(Debug)]
pub struct CdevRegistration {
    kernel: Arc<Kernel>,
    devt: DevNumber,
}

impl Drop for CdevRegistration {
    /// `cdev_del`
    fn drop(&mut self) {
        self.kernel.del_cdev(self.devt);
    }
}

/// An open character device file, with its own file position.
///
/// Also usable through [`io::Read`], [`io::Write`] and [`io::Seek`], which
/// report errors with their errno as [`io::Error::raw_os_error`].
pub struct OpenFile {
    path: PathBuf,
    ops: Arc<dyn FileOperations>,
    pos: u64,
}

impl OpenFile {
    pub(crate) fn new(path: PathBuf, ops: Arc<dyn FileOperations>) -> Self {
        Self { path, ops, pos: 0 }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current file position
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// `read(2)` into `buf`.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.read_user(&mut UserSliceWriter::new(buf))
    }

    /// `read(2)` into an arbitrary user buffer.
    pub fn read_user(&mut self, writer: &mut UserSliceWriter<'_>) -> Result<usize> {
        self.ops.read(writer, &mut self.pos)
    }

    /// `write(2)` from `buf`.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.write_user(&mut UserSliceReader::new(buf))
    }

    /// `write(2)` from an arbitrary user buffer.
    pub fn write_user(&mut self, reader: &mut UserSliceReader<'_>) -> Result<usize> {
        self.ops.write(reader, &mut self.pos)
    }

    /// `lseek(2)`, with `default_llseek` semantics.
    ///
    /// Character devices have no size, so [`io::SeekFrom::End`] is relative
    /// to `0`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if the result would be negative
    pub fn seek(&mut self, pos: io::SeekFrom) -> Result<u64> {
        let new = match pos {
            io::SeekFrom::Start(n) => Some(n),
            io::SeekFrom::Current(d) => self.pos.checked_add_signed(d),
            io::SeekFrom::End(d) => u64::try_from(d).ok(),
        };
        self.pos = new.ok_or(Error::InvalidArgument)?;
        Ok(self.pos)
    }
}

impl fmt::Debug for OpenFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenFile")
            .field("path", &self.path)
            .field("pos", &self.pos)
            .finish_non_exhaustive()
    }
}

impl io::Read for OpenFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(OpenFile::read(self, buf)?)
    }
}

impl io::Write for OpenFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(OpenFile::write(self, buf)?)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl io::Seek for OpenFile {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        Ok(OpenFile::seek(self, pos)?)
    }
}
