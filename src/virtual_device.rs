//! Virtual temperature character device, `/dev/virtual_temp`.
//!
//! Has no state of its own. Every read and write goes through the
//! [`ReadingOps`] it was loaded with, so it always agrees with the sysfs
//! attribute of [`crate::temperature`].
//!
//! # Device interface
//!
//! - Reading gives `Temp: <value>\n`, then end of file. Seek back to `0` to
//!   read it again.
//! - Writing up to 15 bytes of decimal integer text sets the value. Longer
//!   writes and anything that doesn't parse fail with `EINVAL` and change
//!   nothing.
use crate::{
    error::Result,
    reading::ReadingOps,
    system::{
        chrdev::{
            Cdev,
            CdevRegistration,
            ChrdevRegion,
            Class,
            DevNumber,
            DeviceNode,
            FileOperations,
        },
        modules::Module,
        uaccess::{BoundedBuf, UserSliceReader, UserSliceWriter},
        Kernel,
    },
    util::parse_int,
};
use std::{path::Path, sync::Arc};

/// Device, class and region name
pub const DEVICE_NAME: &str = "virtual_temp";

/// Full path of the device node
pub const DEVICE_PATH: &str = "/dev/virtual_temp";

/// Longest accepted write, in bytes
pub const MAX_WRITE: usize = TempBuf::CAPACITY;

/// Stack buffer writes are parsed from, 15 bytes and a terminator.
type TempBuf = BoundedBuf<16>;

/// The device's `file_operations`.
#[derive(Debug, Clone)]
pub struct VirtualTempFile {
    ops: ReadingOps,
}

impl VirtualTempFile {
    pub fn new(ops: ReadingOps) -> Self {
        Self { ops }
    }

    /// The message a read returns.
    pub fn message(&self) -> String {
        format!("Temp: {}\n", self.ops.get_reading())
    }
}

impl FileOperations for VirtualTempFile {
    /// `device_read`
    ///
    /// Copies as much of the message from `offset` on as `writer` has room
    /// for. Once `offset` reaches the end of the message, returns `0`.
    fn read(&self, writer: &mut UserSliceWriter<'_>, offset: &mut u64) -> Result<usize> {
        let msg = self.message();
        let msg = msg.as_bytes();
        let start = match usize::try_from(*offset) {
            Ok(start) if start < msg.len() => start,
            _ => return Ok(0),
        };
        let chunk = &msg[start..];
        let chunk = &chunk[..chunk.len().min(writer.len())];
        writer.write_slice(chunk)?;
        *offset += chunk.len() as u64;
        Ok(chunk.len())
    }

    /// `device_write`
    ///
    /// Oversize input is refused before anything is copied. Every copied
    /// byte is parsed, input is not cut short at a NUL the way C's
    /// `kstrtoint` on the terminated buffer would.
    fn write(&self, reader: &mut UserSliceReader<'_>, _offset: &mut u64) -> Result<usize> {
        let buf = TempBuf::copy_from(reader)?;
        let value = parse_int(buf.as_bytes())?;
        self.ops.set_reading(value);
        Ok(buf.len())
    }
}

/// The loaded device module.
///
/// Fields are in teardown order, the reverse of how [`Module::init`]
/// acquires them.
#[derive(Debug)]
pub struct VirtualDevice {
    _cdev: CdevRegistration,
    node: DeviceNode,
    _class: Class,
    region: ChrdevRegion,
    file: VirtualTempFile,
}

impl VirtualDevice {
    /// Path of the device node
    pub fn path(&self) -> &Path {
        self.node.path()
    }

    /// The file operations, for calling `device_read`/`device_write` without
    /// going through an open file.
    pub fn file(&self) -> &VirtualTempFile {
        &self.file
    }

    pub fn devt(&self) -> DevNumber {
        self.region.first()
    }
}

impl Module for VirtualDevice {
    const NAME: &'static str = "virtual_temp_dev";

    /// The provider's exported functions
    type Params = ReadingOps;

    fn init(kernel: &Arc<Kernel>, ops: ReadingOps) -> Result<Self> {
        // Each `?` below drops whatever was acquired before it, newest first.
        let region = ChrdevRegion::alloc(kernel, 0, 1, DEVICE_NAME).map_err(|e| {
            log::error!("Failed to allocate device number: {e}");
            e
        })?;

        let class = Class::create(kernel, DEVICE_NAME).map_err(|e| {
            log::error!("Failed to create class: {e}");
            e
        })?;

        let node = class
            .device_create(region.first(), DEVICE_NAME)
            .map_err(|e| {
                log::error!("Failed to create device: {e}");
                e
            })?;

        let file = VirtualTempFile::new(ops);
        let cdev = Cdev::new(Arc::new(file.clone()))
            .add(kernel, region.first(), region.count())
            .map_err(|e| {
                log::error!("Failed to add cdev: {e}");
                e
            })?;

        log::info!("Virtual device driver initialized: {}", node.path().display());
        Ok(Self {
            _cdev: cdev,
            node,
            _class: class,
            region,
            file,
        })
    }
}

impl Drop for VirtualDevice {
    fn drop(&mut self) {
        log::info!("Virtual device driver exiting");
    }
}
