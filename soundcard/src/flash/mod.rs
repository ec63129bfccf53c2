//! NAND flash access.
//!
//! [`FlashStorage`] implements page read/program and block erase on top of
//! any [`NandBus`]. [`GpioNandBus`] is the board's bit-banged bus;
//! `sim::SimNand` is an in-memory part for host builds.

pub mod bus;
pub mod commands;
pub mod driver;
pub mod gpio;

#[cfg(any(test, feature = "std"))]
pub mod sim;

pub use bus::NandBus;
pub use driver::{Capacity, FlashStorage, Status};
pub use gpio::{DataPort, GpioBusError, GpioNandBus, NandPins};
