//! Loading and unloading modules into the simulated [`Kernel`].
//!
//! # Examples
//!
//! ```rust
//! # use virtual_temp::{system::{Kernel, modules::LoadedModule}, temperature::*};
//! let kernel = Kernel::new();
//! let hw = LoadedModule::<TemperatureDriver>::load(&kernel, Default::default()).unwrap();
//! assert_eq!(hw.ops().get_reading(), 42);
//! hw.unload();
//! ```
//!
//! # Implementation
//!
//! Module state follows `enum module_state` from `linux/module.h`, and is
//! visible the same way it is on a real system, through
//! `/sys/module/<name>/initstate`.
use super::Kernel;
use crate::error::Result;
use std::{ops::Deref, sync::Arc};

/// Where a module is in its lifecycle.
///
/// `Unloaded -> Initializing -> Active -> Unloading -> Unloaded`, or straight
/// from `Initializing` back to `Unloaded` if init fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    /// Not in the kernel.
    Unloaded,

    /// Running module init, `MODULE_STATE_COMING`
    Initializing,

    /// Normal state, fully loaded, `MODULE_STATE_LIVE`
    Active,

    /// Running module exit, `MODULE_STATE_GOING`
    Unloading,
}

impl ModuleState {
    /// Contents of the `initstate` sysfs file.
    pub fn initstate(&self) -> &'static str {
        match self {
            Self::Unloaded => "unloaded",
            Self::Initializing => "coming",
            Self::Active => "live",
            Self::Unloading => "going",
        }
    }
}

/// A kernel module.
///
/// `init` acquires everything the module needs and returns it. Whatever it
/// acquired is released when the returned value is dropped, which is how the
/// module exits.
pub trait Module: Sized + Send + Sync {
    /// Module name, as shown under `/sys/module`
    const NAME: &'static str;

    /// Load time parameters
    type Params;

    /// Module init.
    ///
    /// On error everything acquired so far must already be released.
    fn init(kernel: &Arc<Kernel>, params: Self::Params) -> Result<Self>;
}

/// A module that is live in a [`Kernel`].
///
/// Dropping it unloads the module.
#[derive(Debug)]
pub struct LoadedModule<M: Module> {
    kernel: Arc<Kernel>,
    module: Option<M>,
}

impl<M: Module> LoadedModule<M> {
    /// Load `M` into `kernel`.
    ///
    /// # Errors
    ///
    /// - [`crate::error::Error::AlreadyExists`] if `M` is already loaded
    /// - Whatever `M::init` returns, in which case the module is unloaded
    ///   again without ever going live
    pub fn load(kernel: &Arc<Kernel>, params: M::Params) -> Result<Self> {
        kernel.begin_module(M::NAME)?;
        match M::init(kernel, params) {
            Ok(module) => {
                kernel.set_module_state(M::NAME, ModuleState::Active);
                Ok(Self {
                    kernel: kernel.clone(),
                    module: Some(module),
                })
            }
            Err(e) => {
                log::error!("{}: init failed: {e}", M::NAME);
                kernel.set_module_state(M::NAME, ModuleState::Unloaded);
                Err(e)
            }
        }
    }

    /// Unload the module.
    pub fn unload(self) {}

    pub fn name(&self) -> &'static str {
        M::NAME
    }

    pub fn state(&self) -> ModuleState {
        self.kernel.module_state(M::NAME)
    }
}

impl<M: Module> Deref for LoadedModule<M> {
    type Target = M;

    fn deref(&self) -> &M {
        // Only `drop` takes the module out.
        match &self.module {
            Some(m) => m,
            None => unreachable!("module used after unload"),
        }
    }
}

impl<M: Module> Drop for LoadedModule<M> {
    fn drop(&mut self) {
        self.kernel.set_module_state(M::NAME, ModuleState::Unloading);
        drop(self.module.take());
        self.kernel.set_module_state(M::NAME, ModuleState::Unloaded);
        log::debug!("{}: unloaded", M::NAME);
    }
}
