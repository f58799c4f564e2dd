//! Sysfs directories (kobjects) and attribute files.
//!
//! A [`Kobject`] is a directory, an [`AttributeFile`] is a file inside one.
//! Both are registrations: dropping them removes them from the [`Kernel`].
//!
//! Drop the files before their directory. If a directory goes first the
//! kernel logs a warning and cleans the files up itself.
use super::Kernel;
use crate::{error::Result, util::SYSFS_PATH};
use bitflags::bitflags;
use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

bitflags! {
    /// Permission bits of a sysfs attribute
    pub struct Mode: u32 {
        const S_IRUSR = 0o400;
        const S_IWUSR = 0o200;
        const S_IRGRP = 0o040;
        const S_IWGRP = 0o020;
        const S_IROTH = 0o004;
        const S_IWOTH = 0o002;

        /// `0444`
        const READ_ONLY = Self::S_IRUSR.bits | Self::S_IRGRP.bits | Self::S_IROTH.bits;

        /// `0644`
        const OWNER_WRITE = Self::READ_ONLY.bits | Self::S_IWUSR.bits;
    }
}

/// Handlers behind a sysfs attribute file.
pub trait AttributeOps: Send + Sync {
    /// Contents of the file.
    fn show(&self) -> Result<String>;

    /// Handle a write of `buf`, returning how many bytes were consumed.
    ///
    /// Read-only attributes can leave this alone, the kernel never calls it
    /// without [`Mode::S_IWUSR`].
    fn store(&self, buf: &[u8]) -> Result<usize> {
        let _ = buf;
        Err(crate::error::Error::InvalidArgument)
    }
}

/// A named attribute with its mode and handlers, `__ATTR(name, mode, ..)`.
#[derive(Clone)]
pub struct Attribute {
    name: &'static str,
    mode: Mode,
    ops: Arc<dyn AttributeOps>,
}

impl Attribute {
    pub fn new(name: &'static str, mode: Mode, ops: Arc<dyn AttributeOps>) -> Self {
        Self { name, mode, ops }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub(crate) fn ops(&self) -> &dyn AttributeOps {
        &*self.ops
    }
}

impl fmt::Debug for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attribute")
            .field("name", &self.name)
            .field("mode", &format_args!("{:#o}", self.mode.bits()))
            .finish()
    }
}

/// Path of `kernel_kobj`, the `/sys/kernel` directory.
pub fn kernel_kobj() -> PathBuf {
    Path::new(SYSFS_PATH).join("kernel")
}

/// A sysfs directory.
#[derive(Debug)]
pub struct Kobject {
    kernel: Arc<Kernel>,
    path: PathBuf,
}

impl Kobject {
    /// `kobject_create_and_add`, create directory `name` under `parent`.
    ///
    /// # Errors
    ///
    /// - If `parent` doesn't exist
    /// - If `name` already exists in `parent`
    pub fn create_and_add(kernel: &Arc<Kernel>, name: &str, parent: &Path) -> Result<Self> {
        let path = parent.join(name);
        kernel.add_kobject(&path)?;
        Ok(Self {
            kernel: kernel.clone(),
            path,
        })
    }

    /// Full path to the directory
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `sysfs_create_file`, add `attr` to this directory.
    ///
    /// # Errors
    ///
    /// - If `attr` is world writable
    /// - If a file with that name already exists
    pub fn create_file(&self, attr: Attribute) -> Result<AttributeFile> {
        let path = self.kernel.add_attribute(&self.path, attr)?;
        Ok(AttributeFile {
            kernel: self.kernel.clone(),
            path,
        })
    }
}

impl Drop for Kobject {
    /// `kobject_put`
    fn drop(&mut self) {
        self.kernel.release_kobject(&self.path);
    }
}

/// A registered sysfs file.
#[derive(Debug)]
pub struct AttributeFile {
    kernel: Arc<Kernel>,
    path: PathBuf,
}

impl AttributeFile {
    /// Full path to the file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for AttributeFile {
    /// `sysfs_remove_file`
    fn drop(&mut self) {
        self.kernel.remove_attribute(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::Error,
        system::{Event, Step},
    };
    use nix::errno::Errno;
    use std::sync::atomic::{AtomicI32, Ordering};

    type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

    struct Knob(AtomicI32);

    impl AttributeOps for Knob {
        fn show(&self) -> crate::error::Result<String> {
            Ok(format!("{}\n", self.0.load(Ordering::Relaxed)))
        }

        fn store(&self, buf: &[u8]) -> crate::error::Result<usize> {
            self.0.store(crate::util::parse_int(buf)?, Ordering::Relaxed);
            Ok(buf.len())
        }
    }

    fn knob(mode: Mode) -> Attribute {
        Attribute::new("knob", mode, Arc::new(Knob(AtomicI32::new(0))))
    }

    #[test]
    fn mode_constants() {
        assert_eq!(Mode::OWNER_WRITE.bits(), 0o644);
        assert_eq!(Mode::READ_ONLY.bits(), 0o444);
    }

    #[test]
    fn read_write() -> Result<()> {
        let k = Kernel::new();
        let dir = Kobject::create_and_add(&k, "demo", &kernel_kobj())?;
        let file = dir.create_file(knob(Mode::OWNER_WRITE))?;
        assert_eq!(file.path(), Path::new("/sys/kernel/demo/knob"));
        assert_eq!(k.sysfs_read(file.path())?, "0\n");
        assert_eq!(k.sysfs_write(file.path(), b"7\n")?, 2);
        assert_eq!(k.sysfs_read(file.path())?, "7\n");
        Ok(())
    }

    #[test]
    fn mode_is_enforced() -> Result<()> {
        let k = Kernel::new();
        let dir = Kobject::create_and_add(&k, "demo", &kernel_kobj())?;
        let file = dir.create_file(knob(Mode::READ_ONLY))?;
        assert_eq!(
            k.sysfs_write(file.path(), b"1"),
            Err(Error::PermissionDenied("/sys/kernel/demo/knob".into()))
        );
        Ok(())
    }

    #[test]
    fn world_writable_refused() -> Result<()> {
        let k = Kernel::new();
        let dir = Kobject::create_and_add(&k, "demo", &kernel_kobj())?;
        let err = dir
            .create_file(knob(Mode::OWNER_WRITE | Mode::S_IWOTH))
            .unwrap_err();
        assert_eq!(err, Error::InvalidArgument);
        Ok(())
    }

    #[test]
    fn duplicate_dir() -> Result<()> {
        let k = Kernel::new();
        let _dir = Kobject::create_and_add(&k, "demo", &kernel_kobj())?;
        assert!(matches!(
            Kobject::create_and_add(&k, "demo", &kernel_kobj()),
            Err(Error::AlreadyExists(_))
        ));
        Ok(())
    }

    #[test]
    fn drop_removes_in_order() -> Result<()> {
        let k = Kernel::new();
        {
            let dir = Kobject::create_and_add(&k, "demo", &kernel_kobj())?;
            let _file = dir.create_file(knob(Mode::OWNER_WRITE))?;
            k.clear_events();
        }
        assert_eq!(
            k.events(),
            vec![
                Event::FileRemoved("/sys/kernel/demo/knob".into()),
                Event::KobjectReleased("/sys/kernel/demo".into()),
            ]
        );
        assert!(!k.sysfs_exists("/sys/kernel/demo"));
        Ok(())
    }

    #[test]
    fn dir_first_cleans_up_files() -> Result<()> {
        let k = Kernel::new();
        let dir = Kobject::create_and_add(&k, "demo", &kernel_kobj())?;
        let file = dir.create_file(knob(Mode::OWNER_WRITE))?;
        drop(dir);
        assert!(!k.sysfs_exists("/sys/kernel/demo/knob"));
        drop(file);
        Ok(())
    }

    #[test]
    fn injected_create_file_fault() -> Result<()> {
        let k = Kernel::new();
        let dir = Kobject::create_and_add(&k, "demo", &kernel_kobj())?;
        k.inject_fault(Step::SysfsCreateFile, Errno::ENOSPC);
        assert_eq!(
            dir.create_file(knob(Mode::OWNER_WRITE)).unwrap_err(),
            Error::Registration(Errno::ENOSPC)
        );
        Ok(())
    }
}
