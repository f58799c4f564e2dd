//! A small in-process stand-in for the Linux kernel services the temperature
//! modules depend on.
//!
//! # Implementation details
//!
//! The real drivers talk to the kernel through `kobject_create_and_add`,
//! `sysfs_create_file`, `alloc_chrdev_region`, `class_create`,
//! `device_create` and `cdev_add`. [`Kernel`] keeps the equivalent tables in
//! memory and hands out RAII registrations from [`sysfs`] and [`chrdev`] that
//! undo themselves when dropped.
//!
//! Userspace is simulated too. [`Kernel::sysfs_read`] and
//! [`Kernel::sysfs_write`] behave like reading and writing a file under
//! `/sys`, and [`Kernel::open`] opens a device node under `/dev`.
//!
//! For testing, every registration step can be told to fail with
//! [`Kernel::inject_fault`], and every table change is recorded in
//! [`Kernel::events`].
use crate::{
    error::{Error, Result},
    util::{DEV_PATH, SYSFS_PATH},
};
use nix::errno::Errno;
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    fmt,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use self::{
    chrdev::{DevNumber, FileOperations, OpenFile},
    modules::ModuleState,
    sysfs::{Attribute, Mode},
};

pub mod chrdev;
pub mod modules;
pub mod sysfs;
pub mod uaccess;

/// Registration steps that can be made to fail with [`Kernel::inject_fault`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    /// `kobject_create_and_add`
    KobjectCreate,

    /// `sysfs_create_file`
    SysfsCreateFile,

    /// `alloc_chrdev_region`
    ChrdevRegion,

    /// `class_create`
    ClassCreate,

    /// `device_create`
    DeviceCreate,

    /// `cdev_add`
    CdevAdd,
}

/// A change to the kernel's tables, in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    KobjectAdded(PathBuf),
    KobjectReleased(PathBuf),
    FileCreated(PathBuf),
    FileRemoved(PathBuf),
    RegionAllocated(DevNumber),
    RegionReleased(DevNumber),
    ClassCreated(String),
    ClassDestroyed(String),
    DeviceCreated(PathBuf),
    DeviceDestroyed(PathBuf),
    CdevAdded(DevNumber),
    CdevDeleted(DevNumber),
    Module(String, ModuleState),
}

/// Dynamic majors are handed out from here downwards, like Linux does.
const CHRDEV_MAJOR_DYN_START: u32 = 254;

/// Lowest dynamic major.
const CHRDEV_MAJOR_DYN_END: u32 = 234;

#[derive(Debug)]
struct Region {
    first_minor: u32,
    count: u32,
    name: String,
}

#[derive(Default)]
struct State {
    /// Sysfs directories
    kobjects: BTreeSet<PathBuf>,

    /// Sysfs files
    attributes: BTreeMap<PathBuf, Attribute>,

    /// Allocated chrdev regions, by major
    regions: BTreeMap<u32, Region>,

    classes: BTreeSet<String>,

    /// Device nodes under `/dev`
    nodes: BTreeMap<PathBuf, DevNumber>,

    /// Added cdevs, by first device number, with their minor count
    cdevs: BTreeMap<DevNumber, (u32, Arc<dyn FileOperations>)>,

    modules: BTreeMap<String, ModuleState>,

    faults: HashMap<Step, Errno>,

    events: Vec<Event>,
}

impl State {
    /// Consume a fault injected for `step`, if any.
    fn fault(&mut self, step: Step) -> Result<()> {
        match self.faults.remove(&step) {
            Some(e) => {
                log::debug!("injected fault at {step:?}: {e}");
                Err(Error::Registration(e))
            }
            None => Ok(()),
        }
    }
}

/// The simulated kernel.
///
/// Create one with [`Kernel::new`] and pass the [`Arc`] to modules.
pub struct Kernel {
    state: Mutex<State>,
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("Kernel")
            .field("modules", &state.modules)
            .field("nodes", &state.nodes)
            .finish_non_exhaustive()
    }
}

// Public
impl Kernel {
    /// A fresh kernel with the standard `/sys` directories and no modules.
    pub fn new() -> Arc<Self> {
        let mut state = State::default();
        let sys = Path::new(SYSFS_PATH);
        state.kobjects.extend([
            sys.to_path_buf(),
            sys.join("kernel"),
            sys.join("class"),
            sys.join("module"),
        ]);
        Arc::new(Self {
            state: Mutex::new(state),
        })
    }

    /// Make the next attempt at `step` fail with `errno`.
    ///
    /// Faults are one-shot, the attempt after that succeeds again.
    pub fn inject_fault(&self, step: Step, errno: Errno) {
        self.lock().faults.insert(step, errno);
    }

    /// Every table change so far.
    pub fn events(&self) -> Vec<Event> {
        self.lock().events.clone()
    }

    /// Forget the event history. Handy to look only at what a later step did.
    pub fn clear_events(&self) {
        self.lock().events.clear();
    }

    /// Read a sysfs attribute, like `cat`.
    ///
    /// `/sys/module/<name>/initstate` is provided for every module known to
    /// the kernel.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if there is no such attribute
    /// - [`Error::PermissionDenied`] if the attribute is not readable
    /// - Whatever the attribute's `show` returns
    pub fn sysfs_read<P: AsRef<Path>>(&self, path: P) -> Result<String> {
        let path = path.as_ref();
        if let Some(state) = self.initstate(path) {
            return Ok(format!("{}\n", state.initstate()));
        }
        let attr = self.attribute(path)?;
        if !attr.mode().contains(Mode::S_IRUSR) {
            return Err(Error::PermissionDenied(path.display().to_string()));
        }
        // Never call into a module with the table lock held.
        attr.ops().show()
    }

    /// Write to a sysfs attribute, like `echo`.
    ///
    /// Returns how many bytes the attribute accepted.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if there is no such attribute
    /// - [`Error::PermissionDenied`] if the attribute is not writable
    /// - Whatever the attribute's `store` returns
    pub fn sysfs_write<P: AsRef<Path>>(&self, path: P, buf: &[u8]) -> Result<usize> {
        let path = path.as_ref();
        if self.initstate(path).is_some() {
            return Err(Error::PermissionDenied(path.display().to_string()));
        }
        let attr = self.attribute(path)?;
        if !attr.mode().contains(Mode::S_IWUSR) {
            return Err(Error::PermissionDenied(path.display().to_string()));
        }
        attr.ops().store(buf)
    }

    /// Whether `path` is a sysfs directory or attribute.
    pub fn sysfs_exists<P: AsRef<Path>>(&self, path: P) -> bool {
        let path = path.as_ref();
        let state = self.lock();
        state.kobjects.contains(path) || state.attributes.contains_key(path)
    }

    /// Open a device node under `/dev` for reading and writing.
    ///
    /// # Errors
    ///
    /// - [`Error::NotFound`] if there is no such node
    /// - [`Error::NoDevice`] if the node exists but no cdev backs its device
    ///   number
    pub fn open<P: AsRef<Path>>(&self, path: P) -> Result<OpenFile> {
        let path = path.as_ref();
        let state = self.lock();
        let devt = *state
            .nodes
            .get(path)
            .ok_or_else(|| Error::NotFound(path.display().to_string()))?;
        let ops = state
            .cdevs
            .range(..=devt)
            .next_back()
            .filter(|(first, (count, _))| {
                first.major() == devt.major() && devt.minor() < first.minor() + count
            })
            .map(|(_, (_, ops))| ops.clone())
            .ok_or_else(|| Error::NoDevice(path.display().to_string()))?;
        Ok(OpenFile::new(path.to_path_buf(), ops))
    }

    /// Device number behind the node at `path`, if there is one.
    pub fn node(&self, path: &Path) -> Option<DevNumber> {
        self.lock().nodes.get(path).copied()
    }

    /// Current state of the module `name`.
    ///
    /// Modules the kernel has never heard of, or that finished unloading, are
    /// [`ModuleState::Unloaded`].
    pub fn module_state(&self, name: &str) -> ModuleState {
        self.lock()
            .modules
            .get(name)
            .copied()
            .unwrap_or(ModuleState::Unloaded)
    }

    /// Names of loaded modules, in any state but [`ModuleState::Unloaded`].
    pub fn modules(&self) -> Vec<String> {
        self.lock().modules.keys().cloned().collect()
    }
}

// Registration plumbing, used by the guards in `sysfs`, `chrdev` and
// `modules`.
impl Kernel {
    fn lock(&self) -> MutexGuard<'_, State> {
        // The tables stay consistent across a panic, every mutation is a
        // single insert or remove.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn attribute(&self, path: &Path) -> Result<Attribute> {
        self.lock()
            .attributes
            .get(path)
            .cloned()
            .ok_or_else(|| Error::NotFound(path.display().to_string()))
    }

    fn initstate(&self, path: &Path) -> Option<ModuleState> {
        let rest = path.strip_prefix(Path::new(SYSFS_PATH).join("module")).ok()?;
        let mut c = rest.iter();
        let name = c.next()?.to_str()?;
        if c.next()? != "initstate" || c.next().is_some() {
            return None;
        }
        self.lock().modules.get(name).copied()
    }

    pub(crate) fn add_kobject(&self, path: &Path) -> Result<()> {
        let mut state = self.lock();
        state.fault(Step::KobjectCreate)?;
        let parent_ok = path.parent().map_or(false, |p| state.kobjects.contains(p));
        if !parent_ok {
            return Err(Error::NotFound(path.display().to_string()));
        }
        if state.kobjects.contains(path) || state.attributes.contains_key(path) {
            return Err(Error::AlreadyExists(path.display().to_string()));
        }
        state.kobjects.insert(path.to_path_buf());
        state.events.push(Event::KobjectAdded(path.to_path_buf()));
        Ok(())
    }

    pub(crate) fn release_kobject(&self, path: &Path) {
        let mut state = self.lock();
        let orphans: Vec<_> = state
            .attributes
            .keys()
            .filter(|p| p.parent() == Some(path))
            .cloned()
            .collect();
        for orphan in orphans {
            log::warn!(
                "{} released with {} still registered",
                path.display(),
                orphan.display()
            );
            state.attributes.remove(&orphan);
        }
        if state.kobjects.remove(path) {
            state.events.push(Event::KobjectReleased(path.to_path_buf()));
        }
    }

    pub(crate) fn add_attribute(&self, dir: &Path, attr: Attribute) -> Result<PathBuf> {
        let mut state = self.lock();
        state.fault(Step::SysfsCreateFile)?;
        // Sysfs refuses world writable attributes.
        if attr.mode().contains(Mode::S_IWOTH) {
            return Err(Error::InvalidArgument);
        }
        if !state.kobjects.contains(dir) {
            return Err(Error::NotFound(dir.display().to_string()));
        }
        let path = dir.join(attr.name());
        if state.kobjects.contains(&path) || state.attributes.contains_key(&path) {
            return Err(Error::AlreadyExists(path.display().to_string()));
        }
        state.attributes.insert(path.clone(), attr);
        state.events.push(Event::FileCreated(path.clone()));
        Ok(path)
    }

    pub(crate) fn remove_attribute(&self, path: &Path) {
        let mut state = self.lock();
        if state.attributes.remove(path).is_some() {
            state.events.push(Event::FileRemoved(path.to_path_buf()));
        }
    }

    pub(crate) fn alloc_region(&self, first_minor: u32, count: u32, name: &str) -> Result<DevNumber> {
        let mut state = self.lock();
        state.fault(Step::ChrdevRegion)?;
        if count == 0 {
            return Err(Error::InvalidArgument);
        }
        let major = (CHRDEV_MAJOR_DYN_END..=CHRDEV_MAJOR_DYN_START)
            .rev()
            .find(|m| !state.regions.contains_key(m))
            .ok_or(Error::Registration(Errno::EBUSY))?;
        state.regions.insert(
            major,
            Region {
                first_minor,
                count,
                name: name.into(),
            },
        );
        let devt = DevNumber::new(major, first_minor);
        state.events.push(Event::RegionAllocated(devt));
        Ok(devt)
    }

    pub(crate) fn release_region(&self, first: DevNumber, count: u32) {
        let mut state = self.lock();
        let matches = state
            .regions
            .get(&first.major())
            .map_or(false, |r| r.first_minor == first.minor() && r.count == count);
        if matches {
            if let Some(r) = state.regions.remove(&first.major()) {
                log::debug!("released chrdev region {first} ({})", r.name);
            }
            state.events.push(Event::RegionReleased(first));
        }
    }

    pub(crate) fn add_class(&self, name: &str) -> Result<()> {
        let mut state = self.lock();
        state.fault(Step::ClassCreate)?;
        let dir = Path::new(SYSFS_PATH).join("class").join(name);
        if !state.classes.insert(name.into()) {
            return Err(Error::AlreadyExists(dir.display().to_string()));
        }
        state.kobjects.insert(dir);
        state.events.push(Event::ClassCreated(name.into()));
        Ok(())
    }

    pub(crate) fn destroy_class(&self, name: &str) {
        let mut state = self.lock();
        if state.classes.remove(name) {
            let dir = Path::new(SYSFS_PATH).join("class").join(name);
            state.kobjects.remove(&dir);
            state.events.push(Event::ClassDestroyed(name.into()));
        }
    }

    /// Creates `/dev/<name>` and `/sys/class/<class>/<name>/dev`.
    pub(crate) fn add_device(
        &self,
        class: &str,
        devt: DevNumber,
        name: &str,
        dev_attr: Attribute,
    ) -> Result<PathBuf> {
        let mut state = self.lock();
        state.fault(Step::DeviceCreate)?;
        if !state.classes.contains(class) {
            return Err(Error::NotFound(class.into()));
        }
        let node = Path::new(DEV_PATH).join(name);
        if state.nodes.contains_key(&node) {
            return Err(Error::AlreadyExists(node.display().to_string()));
        }
        let dir = Path::new(SYSFS_PATH).join("class").join(class).join(name);
        state.attributes.insert(dir.join(dev_attr.name()), dev_attr);
        state.kobjects.insert(dir);
        state.nodes.insert(node.clone(), devt);
        state.events.push(Event::DeviceCreated(node.clone()));
        Ok(node)
    }

    pub(crate) fn destroy_device(&self, class: &str, node: &Path) {
        let mut state = self.lock();
        if state.nodes.remove(node).is_none() {
            return;
        }
        if let Some(name) = node.file_name() {
            let dir = Path::new(SYSFS_PATH).join("class").join(class).join(name);
            state.attributes.retain(|p, _| p.parent() != Some(dir.as_path()));
            state.kobjects.remove(&dir);
        }
        state.events.push(Event::DeviceDestroyed(node.to_path_buf()));
    }

    pub(crate) fn add_cdev(
        &self,
        devt: DevNumber,
        count: u32,
        ops: Arc<dyn FileOperations>,
    ) -> Result<()> {
        let mut state = self.lock();
        state.fault(Step::CdevAdd)?;
        if count == 0 {
            return Err(Error::InvalidArgument);
        }
        if state.cdevs.contains_key(&devt) {
            return Err(Error::AlreadyExists(devt.to_string()));
        }
        state.cdevs.insert(devt, (count, ops));
        state.events.push(Event::CdevAdded(devt));
        Ok(())
    }

    pub(crate) fn del_cdev(&self, devt: DevNumber) {
        let mut state = self.lock();
        if state.cdevs.remove(&devt).is_some() {
            state.events.push(Event::CdevDeleted(devt));
        }
    }

    /// Claim `name` in the module table as [`ModuleState::Initializing`].
    pub(crate) fn begin_module(&self, name: &str) -> Result<()> {
        let mut state = self.lock();
        if state.modules.contains_key(name) {
            return Err(Error::AlreadyExists(name.into()));
        }
        state.modules.insert(name.into(), ModuleState::Initializing);
        state
            .events
            .push(Event::Module(name.into(), ModuleState::Initializing));
        Ok(())
    }

    pub(crate) fn set_module_state(&self, name: &str, to: ModuleState) {
        let mut state = self.lock();
        if to == ModuleState::Unloaded {
            state.modules.remove(name);
        } else {
            state.modules.insert(name.into(), to);
        }
        state.events.push(Event::Module(name.into(), to));
    }
}
