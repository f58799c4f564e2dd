//! Both modules loaded together, exercised the way userspace would.
use proptest::prelude::*;
use std::{
    io::{Read, SeekFrom},
    sync::Arc,
    thread,
};
use virtual_temp::{
    error::Error,
    system::{
        modules::{LoadedModule, ModuleState},
        Kernel,
    },
    temperature::{TemperatureDriver, ATTR_PATH},
    virtual_device::{VirtualDevice, DEVICE_PATH, MAX_WRITE},
};

type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

struct System {
    kernel: Arc<Kernel>,
    dev: LoadedModule<VirtualDevice>,
    hw: LoadedModule<TemperatureDriver>,
}

fn boot() -> System {
    let kernel = Kernel::new();
    let hw = LoadedModule::<TemperatureDriver>::load(&kernel, Default::default()).unwrap();
    let dev = LoadedModule::<VirtualDevice>::load(&kernel, hw.ops()).unwrap();
    System { kernel, dev, hw }
}

fn read_device(kernel: &Kernel) -> Result<String> {
    let mut s = String::new();
    kernel.open(DEVICE_PATH)?.read_to_string(&mut s)?;
    Ok(s)
}

#[test]
fn concrete_scenario() -> Result<()> {
    let sys = boot();
    let mut f = sys.kernel.open(DEVICE_PATH)?;

    let mut buf = [0u8; 15];
    let n = f.read(&mut buf)?;
    assert_eq!(&buf[..n], b"Temp: 42\n");

    assert_eq!(f.write(b"100")?, 3);

    f.seek(SeekFrom::Start(0))?;
    let n = f.read(&mut buf)?;
    assert_eq!(&buf[..n], b"Temp: 100\n");

    assert_eq!(sys.kernel.sysfs_read(ATTR_PATH)?, "100\n");
    Ok(())
}

#[test]
fn end_of_stream_is_not_an_error() -> Result<()> {
    let sys = boot();
    let mut f = sys.kernel.open(DEVICE_PATH)?;
    let mut s = String::new();
    f.read_to_string(&mut s)?;
    let mut buf = [0u8; 16];
    assert_eq!(f.read(&mut buf)?, 0);
    f.seek(SeekFrom::Start(100))?;
    assert_eq!(f.read(&mut buf)?, 0);
    Ok(())
}

#[test]
fn sysfs_write_visible_on_device() -> Result<()> {
    let sys = boot();
    sys.kernel.sysfs_write(ATTR_PATH, b"-40\n")?;
    assert_eq!(read_device(&sys.kernel)?, "Temp: -40\n");
    Ok(())
}

#[test]
fn device_write_visible_in_sysfs() -> Result<()> {
    let sys = boot();
    sys.kernel.open(DEVICE_PATH)?.write(b"+18")?;
    assert_eq!(sys.kernel.sysfs_read(ATTR_PATH)?, "18\n");
    assert_eq!(sys.hw.attribute_read(), "18\n");
    Ok(())
}

#[test]
fn device_shares_the_provider_reading() {
    let sys = boot();
    assert!(sys.dev.file().message().ends_with("42\n"));
    sys.hw.ops().set_reading(3);
    assert_eq!(sys.dev.file().message(), "Temp: 3\n");
}

#[test]
fn rejection_on_both_surfaces() -> Result<()> {
    let sys = boot();
    let mut f = sys.kernel.open(DEVICE_PATH)?;
    assert_eq!(f.write(b"abc"), Err(Error::InvalidArgument));
    assert_eq!(
        sys.kernel.sysfs_write(ATTR_PATH, b"abc"),
        Err(Error::InvalidArgument)
    );
    assert_eq!(Error::InvalidArgument.to_ret(), -22);
    assert_eq!(sys.kernel.sysfs_read(ATTR_PATH)?, "42\n");
    Ok(())
}

#[test]
fn module_states() {
    let sys = boot();
    assert_eq!(sys.kernel.module_state("virtual_temp_hw"), ModuleState::Active);
    assert_eq!(sys.kernel.module_state("virtual_temp_dev"), ModuleState::Active);
    let System { kernel, dev, hw } = sys;
    dev.unload();
    assert_eq!(kernel.module_state("virtual_temp_dev"), ModuleState::Unloaded);
    assert!(kernel.open(DEVICE_PATH).is_err());
    // The provider is untouched by the device going away.
    assert_eq!(kernel.sysfs_read(ATTR_PATH).unwrap(), "42\n");
    hw.unload();
    assert!(kernel.modules().is_empty());
    assert!(!kernel.sysfs_exists("/sys/kernel/virtual_temp"));
}

#[test]
fn device_reload_sees_current_value() -> Result<()> {
    let sys = boot();
    let System { kernel, dev, hw } = sys;
    kernel.sysfs_write(ATTR_PATH, b"61")?;
    dev.unload();
    let _dev = LoadedModule::<VirtualDevice>::load(&kernel, hw.ops())?;
    assert_eq!(read_device(&kernel)?, "Temp: 61\n");
    Ok(())
}

#[test]
fn concurrent_writers_from_both_surfaces() -> Result<()> {
    let sys = boot();
    let values = [-1, 7, 1000, i32::MIN];
    let handles: Vec<_> = values
        .iter()
        .enumerate()
        .map(|(i, &v)| {
            let kernel = sys.kernel.clone();
            thread::spawn(move || {
                for _ in 0..200 {
                    let text = v.to_string();
                    if i % 2 == 0 {
                        kernel.sysfs_write(ATTR_PATH, text.as_bytes()).unwrap();
                    } else {
                        kernel.open(DEVICE_PATH).unwrap().write(text.as_bytes()).unwrap();
                    }
                    let seen: i32 = kernel.sysfs_read(ATTR_PATH).unwrap().trim().parse().unwrap();
                    assert!(values.contains(&seen));
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    let last: i32 = sys.kernel.sysfs_read(ATTR_PATH)?.trim().parse()?;
    assert!(values.contains(&last));
    Ok(())
}

proptest! {
    #[test]
    fn device_round_trip(v in any::<i32>()) {
        let sys = boot();
        let text = v.to_string();
        prop_assume!(text.len() <= MAX_WRITE);
        let mut f = sys.kernel.open(DEVICE_PATH).unwrap();
        prop_assert_eq!(f.write(text.as_bytes()).unwrap(), text.len());
        f.seek(SeekFrom::Start(0)).unwrap();
        let mut s = String::new();
        f.read_to_string(&mut s).unwrap();
        prop_assert!(s.contains(&text));
        prop_assert_eq!(s, format!("Temp: {v}\n"));
    }

    #[test]
    fn sysfs_round_trip(v in any::<i32>()) {
        let sys = boot();
        let text = format!("{v}\n");
        prop_assert_eq!(sys.kernel.sysfs_write(ATTR_PATH, text.as_bytes()).unwrap(), text.len());
        prop_assert_eq!(sys.kernel.sysfs_read(ATTR_PATH).unwrap(), text);
    }

    #[test]
    fn oversize_device_writes_change_nothing(input in proptest::collection::vec(any::<u8>(), 16..64)) {
        let sys = boot();
        let mut f = sys.kernel.open(DEVICE_PATH).unwrap();
        prop_assert_eq!(f.write(&input), Err(Error::InvalidArgument));
        prop_assert_eq!(sys.hw.ops().get_reading(), 42);
    }

    #[test]
    fn non_numeric_writes_change_nothing(input in "[a-zA-Z .,]{1,15}") {
        let sys = boot();
        let mut f = sys.kernel.open(DEVICE_PATH).unwrap();
        prop_assert_eq!(f.write(input.as_bytes()), Err(Error::InvalidArgument));
        prop_assert_eq!(sys.kernel.sysfs_write(ATTR_PATH, input.as_bytes()), Err(Error::InvalidArgument));
        prop_assert_eq!(sys.kernel.sysfs_read(ATTR_PATH).unwrap(), "42\n");
    }
}
