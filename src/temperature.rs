//! Mock temperature "hardware" driver.
//!
//! Owns the [`Reading`] and publishes it two ways:
//!
//! - To other modules, as the [`ReadingOps`] returned by
//!   [`TemperatureDriver::ops`]
//! - To userspace, as `/sys/kernel/virtual_temp/temperature`
//!
//! # Sysfs interface
//!
//! `temperature`, mode `0644`.
//!
//! Reading gives the current value in decimal followed by a newline.
//! Writing a decimal integer, optionally signed and optionally followed by a
//! single newline, replaces it. Anything else is refused with `EINVAL` and
//! changes nothing.
use crate::{
    error::{Error, Result},
    reading::{Reading, ReadingOps, DEFAULT_READING},
    system::{
        modules::Module,
        sysfs::{kernel_kobj, Attribute, AttributeFile, AttributeOps, Kobject, Mode},
        Kernel,
    },
    util::parse_int,
};
use std::sync::Arc;

/// Name of the sysfs directory under `/sys/kernel`
pub const DIR_NAME: &str = "virtual_temp";

/// Name of the attribute file
pub const ATTR_NAME: &str = "temperature";

/// Full path of the attribute file
pub const ATTR_PATH: &str = "/sys/kernel/virtual_temp/temperature";

/// Load time parameters for [`TemperatureDriver`]
#[derive(Debug, Clone, Copy)]
pub struct TemperatureParams {
    /// Value the reading starts at
    pub initial: i32,
}

impl Default for TemperatureParams {
    fn default() -> Self {
        Self {
            initial: DEFAULT_READING,
        }
    }
}

/// The `temperature` attribute handlers.
#[derive(Debug)]
struct TemperatureAttr {
    ops: ReadingOps,
}

impl AttributeOps for TemperatureAttr {
    fn show(&self) -> Result<String> {
        Ok(format!("{}\n", self.ops.get_reading()))
    }

    fn store(&self, buf: &[u8]) -> Result<usize> {
        let value = parse_int(buf)?;
        self.ops.set_reading(value);
        Ok(buf.len())
    }
}

/// The loaded provider module.
///
/// Fields are in teardown order.
#[derive(Debug)]
pub struct TemperatureDriver {
    attr: AttributeFile,
    dir: Kobject,
    handlers: Arc<TemperatureAttr>,
}

impl TemperatureDriver {
    /// The exported `get_reading`/`set_reading` pair.
    pub fn ops(&self) -> ReadingOps {
        self.handlers.ops.clone()
    }

    /// `attribute_read`, exactly what `cat` on the attribute file shows.
    pub fn attribute_read(&self) -> String {
        format!("{}\n", self.handlers.ops.get_reading())
    }

    /// `attribute_write`, exactly what a write to the attribute file does.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if `buf` isn't a decimal `i32`
    pub fn attribute_write(&self, buf: &[u8]) -> Result<usize> {
        self.handlers.store(buf)
    }

    /// Path of the sysfs directory
    pub fn dir(&self) -> &std::path::Path {
        self.dir.path()
    }

    /// Path of the attribute file
    pub fn attribute_path(&self) -> &std::path::Path {
        self.attr.path()
    }
}

impl Module for TemperatureDriver {
    const NAME: &'static str = "virtual_temp_hw";
    type Params = TemperatureParams;

    fn init(kernel: &Arc<Kernel>, params: TemperatureParams) -> Result<Self> {
        log::info!("Initializing virtual_temp driver");

        let dir = Kobject::create_and_add(kernel, DIR_NAME, &kernel_kobj()).map_err(|e| {
            log::error!("Failed to create sysfs kobject: {e}");
            Error::ResourceExhausted
        })?;
        log::info!("Created kobject: {}", dir.path().display());

        let handlers = Arc::new(TemperatureAttr {
            ops: ReadingOps::new(Arc::new(Reading::new(params.initial))),
        });
        let attr = Attribute::new(ATTR_NAME, Mode::OWNER_WRITE, handlers.clone());
        // On failure `dir` is dropped here, which releases the kobject.
        let attr = dir.create_file(attr).map_err(|e| {
            log::error!("Failed to create sysfs file: {e}");
            e
        })?;

        log::info!("Driver initialized: {}", attr.path().display());
        Ok(Self {
            attr,
            dir,
            handlers,
        })
    }
}

impl Drop for TemperatureDriver {
    fn drop(&mut self) {
        log::info!("Removing driver and cleaning up");
    }
}
