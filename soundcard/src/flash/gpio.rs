//! Bit-banged NAND bus over GPIO.
//!
//! Drives CLE, ALE, CE#, WE#, RE# and WP# as [`OutputPin`]s, samples R/B#
//! as an [`InputPin`] and moves bytes through an 8-bit [`DataPort`]. The
//! port is a separate trait because no `embedded-hal` trait covers a
//! parallel bus with direction switching.
//!
//! Timing waits use [`DelayNs`]; every latch edge is otherwise back-to-back,
//! which the slowest supported part tolerates at MCU GPIO speeds.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};

use super::bus::NandBus;

/// tWB: WE# high to R/B# low after a confirm command.
const T_WB_NS: u32 = 100;
/// tWHR: WE# high to RE# low.
const T_WHR_NS: u32 = 60;
/// tADL: last address cycle to first data cycle.
const T_ADL_NS: u32 = 70;
/// tREA: RE# low to data valid.
const T_REA_NS: u32 = 20;

/// An 8-bit bidirectional port, usually one half of a GPIO bank.
pub trait DataPort {
    type Error;

    /// Drive the port.
    fn set_output(&mut self) -> Result<(), Self::Error>;

    /// Release the port to high impedance.
    fn set_input(&mut self) -> Result<(), Self::Error>;

    fn write(&mut self, byte: u8) -> Result<(), Self::Error>;

    fn read(&mut self) -> Result<u8, Self::Error>;
}

/// Error from the GPIO bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GpioBusError {
    /// A strobe or ready pin failed.
    Pin,
    /// The data port failed.
    Port,
}

/// Control pins of the bus.
pub struct NandPins<CLE, ALE, CE, WE, RE, WP, RB> {
    pub cle: CLE,
    pub ale: ALE,
    pub ce: CE,
    pub we: WE,
    pub re: RE,
    pub wp: WP,
    pub rb: RB,
}

/// [`NandBus`] implementation over GPIO pins.
pub struct GpioNandBus<CLE, ALE, CE, WE, RE, WP, RB, P, D> {
    pins: NandPins<CLE, ALE, CE, WE, RE, WP, RB>,
    port: P,
    delay: D,
}

impl<CLE, ALE, CE, WE, RE, WP, RB, P, D> GpioNandBus<CLE, ALE, CE, WE, RE, WP, RB, P, D>
where
    CLE: OutputPin,
    ALE: OutputPin,
    CE: OutputPin,
    WE: OutputPin,
    RE: OutputPin,
    WP: OutputPin,
    RB: InputPin,
    P: DataPort,
    D: DelayNs,
{
    /// Put every line in its idle level and release write protection.
    pub fn new(
        pins: NandPins<CLE, ALE, CE, WE, RE, WP, RB>,
        port: P,
        delay: D,
    ) -> Result<Self, GpioBusError> {
        let mut bus = Self { pins, port, delay };
        bus.pins.wp.set_high().map_err(|_| GpioBusError::Pin)?;
        bus.pins.ce.set_high().map_err(|_| GpioBusError::Pin)?;
        bus.pins.cle.set_low().map_err(|_| GpioBusError::Pin)?;
        bus.pins.ale.set_low().map_err(|_| GpioBusError::Pin)?;
        bus.pins.we.set_high().map_err(|_| GpioBusError::Pin)?;
        bus.pins.re.set_high().map_err(|_| GpioBusError::Pin)?;
        Ok(bus)
    }

    /// Release pins, port and delay.
    pub fn free(self) -> (NandPins<CLE, ALE, CE, WE, RE, WP, RB>, P, D) {
        (self.pins, self.port, self.delay)
    }

    /// One WE# pulse with `byte` on the port.
    fn strobe_write(&mut self, byte: u8) -> Result<(), GpioBusError> {
        self.pins.we.set_low().map_err(|_| GpioBusError::Pin)?;
        self.port.write(byte).map_err(|_| GpioBusError::Port)?;
        self.pins.we.set_high().map_err(|_| GpioBusError::Pin)
    }

    /// One RE# pulse, sampling the port while RE# is low.
    fn strobe_read(&mut self) -> Result<u8, GpioBusError> {
        self.pins.re.set_low().map_err(|_| GpioBusError::Pin)?;
        self.delay.delay_ns(T_REA_NS);
        let byte = self.port.read().map_err(|_| GpioBusError::Port);
        self.pins.re.set_high().map_err(|_| GpioBusError::Pin)?;
        byte
    }
}

impl<CLE, ALE, CE, WE, RE, WP, RB, P, D> NandBus for GpioNandBus<CLE, ALE, CE, WE, RE, WP, RB, P, D>
where
    CLE: OutputPin,
    ALE: OutputPin,
    CE: OutputPin,
    WE: OutputPin,
    RE: OutputPin,
    WP: OutputPin,
    RB: InputPin,
    P: DataPort,
    D: DelayNs,
{
    type Error = GpioBusError;

    fn select(&mut self) -> Result<(), GpioBusError> {
        self.pins.ce.set_low().map_err(|_| GpioBusError::Pin)
    }

    fn deselect(&mut self) -> Result<(), GpioBusError> {
        self.pins.ce.set_high().map_err(|_| GpioBusError::Pin)
    }

    fn command(&mut self, cmd: u8) -> Result<(), GpioBusError> {
        self.port.set_output().map_err(|_| GpioBusError::Port)?;
        self.pins.cle.set_high().map_err(|_| GpioBusError::Pin)?;
        self.strobe_write(cmd)?;
        self.pins.cle.set_low().map_err(|_| GpioBusError::Pin)?;
        // Covers both tWB (before R/B# is valid) and tWHR (before status).
        self.delay.delay_ns(T_WB_NS.max(T_WHR_NS));
        Ok(())
    }

    fn address(&mut self, bytes: &[u8]) -> Result<(), GpioBusError> {
        self.port.set_output().map_err(|_| GpioBusError::Port)?;
        for &b in bytes {
            self.pins.ale.set_high().map_err(|_| GpioBusError::Pin)?;
            self.strobe_write(b)?;
            self.pins.ale.set_low().map_err(|_| GpioBusError::Pin)?;
        }
        self.delay.delay_ns(T_ADL_NS.max(T_WHR_NS));
        Ok(())
    }

    fn write_data(&mut self, data: &[u8]) -> Result<(), GpioBusError> {
        self.port.set_output().map_err(|_| GpioBusError::Port)?;
        for &b in data {
            self.strobe_write(b)?;
        }
        Ok(())
    }

    fn read_data(&mut self, buf: &mut [u8]) -> Result<(), GpioBusError> {
        self.port.set_input().map_err(|_| GpioBusError::Port)?;
        for b in buf.iter_mut() {
            *b = self.strobe_read()?;
        }
        Ok(())
    }

    fn is_ready(&mut self) -> Result<bool, GpioBusError> {
        self.pins.rb.is_high().map_err(|_| GpioBusError::Pin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec::Vec;

    use embedded_hal_mock::eh1::delay::NoopDelay;
    use embedded_hal_mock::eh1::digital::{
        Mock as PinMock, State as PinState, Transaction as PinTransaction,
    };

    /// Records the direction changes and bytes seen by the port.
    #[derive(Default)]
    struct RecordingPort {
        output: bool,
        written: Vec<u8>,
        to_read: Vec<u8>,
    }

    impl DataPort for RecordingPort {
        type Error = ();

        fn set_output(&mut self) -> Result<(), ()> {
            self.output = true;
            Ok(())
        }

        fn set_input(&mut self) -> Result<(), ()> {
            self.output = false;
            Ok(())
        }

        fn write(&mut self, byte: u8) -> Result<(), ()> {
            if !self.output {
                return Err(());
            }
            self.written.push(byte);
            Ok(())
        }

        fn read(&mut self) -> Result<u8, ()> {
            if self.output || self.to_read.is_empty() {
                return Err(());
            }
            Ok(self.to_read.remove(0))
        }
    }

    fn set(state: PinState) -> PinTransaction {
        PinTransaction::set(state)
    }

    /// Transactions for the idle levels applied by `new`.
    fn idle(level: PinState) -> Vec<PinTransaction> {
        vec![set(level)]
    }

    type TestBus =
        GpioNandBus<PinMock, PinMock, PinMock, PinMock, PinMock, PinMock, PinMock, RecordingPort, NoopDelay>;

    struct Handles {
        cle: PinMock,
        ale: PinMock,
        ce: PinMock,
        we: PinMock,
        re: PinMock,
        wp: PinMock,
        rb: PinMock,
    }

    impl Handles {
        fn done(&mut self) {
            self.cle.done();
            self.ale.done();
            self.ce.done();
            self.we.done();
            self.re.done();
            self.wp.done();
            self.rb.done();
        }
    }

    fn build(
        cle: Vec<PinTransaction>,
        ale: Vec<PinTransaction>,
        ce: Vec<PinTransaction>,
        we: Vec<PinTransaction>,
        re: Vec<PinTransaction>,
        rb: Vec<PinTransaction>,
        port: RecordingPort,
    ) -> (TestBus, Handles) {
        let h = Handles {
            cle: PinMock::new(&cle),
            ale: PinMock::new(&ale),
            ce: PinMock::new(&ce),
            we: PinMock::new(&we),
            re: PinMock::new(&re),
            wp: PinMock::new(&idle(PinState::High)),
            rb: PinMock::new(&rb),
        };
        let pins = NandPins {
            cle: h.cle.clone(),
            ale: h.ale.clone(),
            ce: h.ce.clone(),
            we: h.we.clone(),
            re: h.re.clone(),
            wp: h.wp.clone(),
            rb: h.rb.clone(),
        };
        let bus = GpioNandBus::new(pins, port, NoopDelay).unwrap();
        (bus, h)
    }

    #[test]
    fn command_pulses_we_inside_cle() {
        let (mut bus, mut h) = build(
            vec![set(PinState::Low), set(PinState::High), set(PinState::Low)],
            idle(PinState::Low),
            idle(PinState::High),
            vec![set(PinState::High), set(PinState::Low), set(PinState::High)],
            idle(PinState::High),
            vec![],
            RecordingPort::default(),
        );

        bus.command(0x70).unwrap();

        let (_, port, _) = bus.free();
        assert_eq!(port.written, vec![0x70]);
        h.done();
    }

    #[test]
    fn address_cycles_each_latch_ale() {
        let mut ale = idle(PinState::Low);
        let mut we = idle(PinState::High);
        for _ in 0..3 {
            ale.extend([set(PinState::High), set(PinState::Low)]);
            we.extend([set(PinState::Low), set(PinState::High)]);
        }
        let (mut bus, mut h) = build(
            idle(PinState::Low),
            ale,
            idle(PinState::High),
            we,
            idle(PinState::High),
            vec![],
            RecordingPort::default(),
        );

        bus.address(&[0x40, 0x01, 0x00]).unwrap();

        let (_, port, _) = bus.free();
        assert_eq!(port.written, vec![0x40, 0x01, 0x00]);
        h.done();
    }

    #[test]
    fn read_data_switches_port_to_input() {
        let mut re = idle(PinState::High);
        for _ in 0..2 {
            re.extend([set(PinState::Low), set(PinState::High)]);
        }
        let port = RecordingPort {
            output: true,
            written: vec![],
            to_read: vec![0x2C, 0xDA],
        };
        let (mut bus, mut h) = build(
            idle(PinState::Low),
            idle(PinState::Low),
            idle(PinState::High),
            idle(PinState::High),
            re,
            vec![],
            port,
        );

        let mut id = [0u8; 2];
        bus.read_data(&mut id).unwrap();
        assert_eq!(id, [0x2C, 0xDA]);
        h.done();
    }

    #[test]
    fn ready_line_follows_rb_pin() {
        let (mut bus, mut h) = build(
            idle(PinState::Low),
            idle(PinState::Low),
            idle(PinState::High),
            idle(PinState::High),
            idle(PinState::High),
            vec![
                PinTransaction::get(PinState::Low),
                PinTransaction::get(PinState::High),
            ],
            RecordingPort::default(),
        );

        assert!(!bus.is_ready().unwrap());
        assert!(bus.is_ready().unwrap());
        h.done();
    }

    #[test]
    fn rb_pin_error_maps_to_pin_error() {
        use embedded_hal_mock::eh1::MockError;
        use std::io::ErrorKind;

        let (mut bus, mut h) = build(
            idle(PinState::Low),
            idle(PinState::Low),
            idle(PinState::High),
            idle(PinState::High),
            idle(PinState::High),
            vec![PinTransaction::get(PinState::High)
                .with_error(MockError::Io(ErrorKind::NotConnected))],
            RecordingPort::default(),
        );

        assert_eq!(bus.is_ready(), Err(GpioBusError::Pin));
        h.done();
    }
}
