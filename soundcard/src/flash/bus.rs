/// Byte-level access to an x8 NAND chip.
///
/// Each method maps to one latch phase of the asynchronous interface:
/// CLE for commands, ALE for addresses, WE#/RE# strobes for data. The ready
/// line (R/B#) is read independently of chip select.
pub trait NandBus {
    /// Error type for bus operations.
    type Error;

    /// Assert CE#.
    fn select(&mut self) -> Result<(), Self::Error>;

    /// Release CE#.
    fn deselect(&mut self) -> Result<(), Self::Error>;

    /// Latch one command byte.
    fn command(&mut self, cmd: u8) -> Result<(), Self::Error>;

    /// Latch address bytes, first cycle first.
    fn address(&mut self, bytes: &[u8]) -> Result<(), Self::Error>;

    /// Clock data bytes into the chip's page register.
    fn write_data(&mut self, data: &[u8]) -> Result<(), Self::Error>;

    /// Clock data bytes out of the chip.
    fn read_data(&mut self, buf: &mut [u8]) -> Result<(), Self::Error>;

    /// Sample R/B#. `true` when the chip is ready.
    fn is_ready(&mut self) -> Result<bool, Self::Error>;
}

impl<T: NandBus + ?Sized> NandBus for &mut T {
    type Error = T::Error;

    fn select(&mut self) -> Result<(), Self::Error> {
        T::select(self)
    }

    fn deselect(&mut self) -> Result<(), Self::Error> {
        T::deselect(self)
    }

    fn command(&mut self, cmd: u8) -> Result<(), Self::Error> {
        T::command(self, cmd)
    }

    fn address(&mut self, bytes: &[u8]) -> Result<(), Self::Error> {
        T::address(self, bytes)
    }

    fn write_data(&mut self, data: &[u8]) -> Result<(), Self::Error> {
        T::write_data(self, data)
    }

    fn read_data(&mut self, buf: &mut [u8]) -> Result<(), Self::Error> {
        T::read_data(self, buf)
    }

    fn is_ready(&mut self) -> Result<bool, Self::Error> {
        T::is_ready(self)
    }
}
