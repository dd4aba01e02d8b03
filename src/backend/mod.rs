pub mod mock;
pub mod sysfs;

pub use mock::{SimHandle, SimWrite, SimulatedSysfs};
pub use sysfs::{SysfsFs, SysfsHandle};
