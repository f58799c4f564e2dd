//! A mock temperature subsystem, as a pair of kernel modules running on a
//! simulated Linux kernel.
//!
//! - [`temperature`] owns the reading and exposes it in sysfs, at
//!   `/sys/kernel/virtual_temp/temperature`
//! - [`virtual_device`] exposes the same reading as the character device
//!   `/dev/virtual_temp`, through the functions [`temperature`] exports
//!
//! # Examples
//!
//! ```rust
//! use virtual_temp::{
//!     system::{modules::LoadedModule, Kernel},
//!     temperature::{TemperatureDriver, ATTR_PATH},
//!     virtual_device::{VirtualDevice, DEVICE_PATH},
//! };
//! use std::io::Read;
//!
//! let kernel = Kernel::new();
//! let hw = LoadedModule::<TemperatureDriver>::load(&kernel, Default::default()).unwrap();
//! let dev = LoadedModule::<VirtualDevice>::load(&kernel, hw.ops()).unwrap();
//!
//! kernel.sysfs_write(ATTR_PATH, b"100\n").unwrap();
//!
//! let mut s = String::new();
//! kernel.open(DEVICE_PATH).unwrap().read_to_string(&mut s).unwrap();
//! assert_eq!(s, "Temp: 100\n");
//!
//! // The device goes first, it uses the provider's functions.
//! dev.unload();
//! hw.unload();
//! ```
//!
//! # Implementation details
//!
//! The kernel is [`system::Kernel`], an in-memory model of the sysfs and
//! character device registration APIs. Everything a module registers is an
//! RAII value, so both failed loads and unloads release things in reverse
//! order without any explicit cleanup code.
#![doc(html_root_url = "https://docs.rs/virtual-temp/0.1.0")]

pub mod error;
pub mod reading;
pub mod system;
pub mod temperature;
pub mod virtual_device;

mod util;

pub use util::parse_int;
