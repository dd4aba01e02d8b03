pub mod backend;
mod config;
mod error;
mod gpio;

pub use config::{DEFAULT_GPIO_ROOT, DEFAULT_READ_RETRIES, SysfsConfig};
pub use error::{GpioError, Result};
pub use gpio::{
    AttrHandle, Attribute, Direction, EdgeMode, EdgeWaiter, OpenMode, PinController, PinValue,
    StopSignal, SysfsAccess, Wakeup,
};

pub use backend::{SimulatedSysfs, SysfsFs};
