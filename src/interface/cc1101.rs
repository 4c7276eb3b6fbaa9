//! CC1101 SPI transport. Interface-conformant only: this adapter is not
//! exercised by `Central`'s own test suite, it exists so a deployment can
//! drive a CC1101 breakout wired to a Linux SPI bus instead of a CUL dongle
//! or a gateway tunnel.
//!
//! Talks straight to `/dev/spidevX.Y` via the `spidev` crate. Real SPI
//! hardware toggles chip-select itself on every transfer, so there is no
//! GPIO pin to bit-bang here — each register access is a single
//! half-duplex `SpidevTransfer`.

use std::time::{Duration, Instant};

use spidev::{SpiModeFlags, Spidev, SpidevOptions, SpidevTransfer};

use crate::config::InterfaceConfig;
use crate::error::InterfaceError;
use crate::packet::{Codec, Packet};

use super::{PhysicalInterfaceType, RadioInterface};

const SPI_CLOCK_HZ: u32 = 6_000_000;

/// Header byte bits (TI CC1101 datasheet §10.1).
const HEADER_READ: u8 = 0x80;
const HEADER_BURST: u8 = 0x40;

/// Strobe commands used to drive the chip between idle/rx/tx.
#[derive(Clone, Copy)]
#[allow(dead_code)]
#[repr(u8)]
enum Strobe {
    Sres = 0x30,
    Sidle = 0x36,
    Srx = 0x34,
    Stx = 0x35,
    Sftx = 0x3b,
    Sfrx = 0x3a,
}

const REG_PKTLEN: u8 = 0x06;
const FIFO_ADDR: u8 = 0x3f;

/// Status registers share addresses with the strobe commands; the chip
/// tells them apart by requiring the burst bit on every status read.
const STATUS_RSSI: u8 = 0x34;
const STATUS_MARCSTATE: u8 = 0x35;
const STATUS_RXBYTES: u8 = 0x3b;

/// A CC1101-backed radio transport. Polling-driven: `try_recv` checks
/// `RXBYTES` on every call rather than waiting on a GDO interrupt line,
/// since the interrupt pin is optional wiring this adapter does not assume.
pub struct Cc1101Interface {
    id: String,
    is_default: bool,
    response_delay_ms: u64,
    device_path: String,
    spi: Option<Spidev>,
    receiving: bool,
}

impl Cc1101Interface {
    pub fn new(cfg: &InterfaceConfig) -> Self {
        Cc1101Interface {
            id: cfg.id.clone(),
            is_default: cfg.default,
            response_delay_ms: cfg.response_delay_ms,
            device_path: cfg.host_or_device.clone(),
            spi: None,
            receiving: false,
        }
    }

    fn spi_mut(&mut self) -> Result<&mut Spidev, InterfaceError> {
        self.spi.as_mut().ok_or(InterfaceError::NotOpen)
    }

    fn write_register(&mut self, addr: u8, value: u8) -> Result<(), InterfaceError> {
        let tx = [addr, value];
        let spi = self.spi_mut()?;
        spi.transfer(&mut SpidevTransfer::write(&tx))?;
        Ok(())
    }

    fn read_register(&mut self, addr: u8) -> Result<u8, InterfaceError> {
        let tx = [addr | HEADER_READ, 0u8];
        let mut rx = [0u8; 2];
        let spi = self.spi_mut()?;
        spi.transfer(&mut SpidevTransfer::read_write(&tx, &mut rx))?;
        Ok(rx[1])
    }

    /// Status registers (0x30-0x3D) alias the strobe command addresses; the
    /// burst bit is what tells the chip this is a status read, not a strobe.
    fn read_status_register(&mut self, addr: u8) -> Result<u8, InterfaceError> {
        let tx = [addr | HEADER_READ | HEADER_BURST, 0u8];
        let mut rx = [0u8; 2];
        let spi = self.spi_mut()?;
        spi.transfer(&mut SpidevTransfer::read_write(&tx, &mut rx))?;
        Ok(rx[1])
    }

    fn strobe(&mut self, cmd: Strobe) -> Result<(), InterfaceError> {
        let tx = [cmd as u8];
        let spi = self.spi_mut()?;
        spi.transfer(&mut SpidevTransfer::write(&tx))?;
        Ok(())
    }

    fn write_fifo(&mut self, bytes: &[u8]) -> Result<(), InterfaceError> {
        let mut tx = Vec::with_capacity(bytes.len() + 1);
        tx.push(FIFO_ADDR | HEADER_BURST);
        tx.extend_from_slice(bytes);
        let spi = self.spi_mut()?;
        spi.transfer(&mut SpidevTransfer::write(&tx))?;
        Ok(())
    }

    fn read_fifo(&mut self, len: usize) -> Result<Vec<u8>, InterfaceError> {
        let tx = vec![FIFO_ADDR | HEADER_READ | HEADER_BURST; len + 1];
        let mut rx = vec![0u8; len + 1];
        {
            let spi = self.spi_mut()?;
            spi.transfer(&mut SpidevTransfer::read_write(&tx, &mut rx))?;
        }
        Ok(rx[1..].to_vec())
    }

    fn rx_bytes_available(&mut self) -> Result<u8, InterfaceError> {
        // bits 0..=6 of the status register hold the FIFO occupancy.
        Ok(self.read_status_register(STATUS_RXBYTES)? & 0x7f)
    }
}

impl RadioInterface for Cc1101Interface {
    fn id(&self) -> &str {
        &self.id
    }

    fn physical_interface_type(&self) -> PhysicalInterfaceType {
        PhysicalInterfaceType::SpiCc1101
    }

    fn is_default(&self) -> bool {
        self.is_default
    }

    fn response_delay_ms(&self) -> u64 {
        self.response_delay_ms
    }

    fn is_open(&self) -> bool {
        self.spi.is_some()
    }

    fn has_rssi_byte(&self) -> bool {
        true
    }

    fn open(&mut self) -> Result<(), InterfaceError> {
        if self.spi.is_some() {
            return Ok(());
        }
        let mut spi = Spidev::open(&self.device_path)?;
        let options = SpidevOptions::new()
            .bits_per_word(8)
            .max_speed_hz(SPI_CLOCK_HZ)
            .mode(SpiModeFlags::SPI_MODE_0)
            .build();
        spi.configure(&options)?;
        self.spi = Some(spi);
        self.strobe(Strobe::Sres)?;
        tracing::debug!(interface = %self.id, "cc1101 reset, idling");
        self.strobe(Strobe::Sidle)?;
        self.strobe(Strobe::Sfrx)?;
        self.strobe(Strobe::Sftx)?;
        // variable packet length, length byte taken from the first FIFO byte.
        self.write_register(REG_PKTLEN, 0xff)?;
        self.strobe(Strobe::Srx)?;
        self.receiving = true;
        Ok(())
    }

    fn close(&mut self) -> Result<(), InterfaceError> {
        if self.spi.is_some() {
            self.strobe(Strobe::Sidle)?;
        }
        self.spi = None;
        self.receiving = false;
        Ok(())
    }

    fn send(&mut self, packet: &Packet, stealthy: bool) -> Result<(), InterfaceError> {
        if self.spi.is_none() {
            return Err(InterfaceError::NotOpen);
        }
        if !stealthy {
            tracing::debug!(interface = %self.id, counter = packet.counter, "cc1101 send");
        }
        self.strobe(Strobe::Sidle)?;
        self.strobe(Strobe::Sftx)?;
        let bytes = Codec::to_bytes(packet);
        self.write_fifo(&bytes)?;
        self.strobe(Strobe::Stx)?;

        // burst frames need the long wake-on-radio preamble to precede the
        // body; the transmit path otherwise looks identical to a fast send,
        // so the distinction lives entirely in how long the caller waits
        // before the chip is known to have finished transmitting.
        let wait = if packet.burst {
            Duration::from_millis(1100)
        } else {
            Duration::from_millis(20)
        };
        let deadline = Instant::now() + wait;
        while Instant::now() < deadline {
            if self.read_status_register(STATUS_MARCSTATE)? & 0x1f == 0x01 {
                break;
            }
        }
        self.strobe(Strobe::Sidle)?;
        self.strobe(Strobe::Sfrx)?;
        self.strobe(Strobe::Srx)?;
        self.receiving = true;
        Ok(())
    }

    fn try_recv(&mut self) -> Result<Option<Packet>, InterfaceError> {
        if !self.receiving {
            return Ok(None);
        }
        let available = self.rx_bytes_available()?;
        if available < 1 {
            return Ok(None);
        }
        let declared_len = self.read_fifo(1)?[0];
        let frame_len = declared_len as usize + 1; // +1 length byte itself
        if (available as usize) < frame_len {
            return Ok(None);
        }
        let mut frame = vec![declared_len];
        frame.extend(self.read_fifo(frame_len - 1)?);
        let rssi = self.read_status_register(STATUS_RSSI).unwrap_or(0);
        frame.push(rssi);
        self.strobe(Strobe::Sfrx)?;
        self.strobe(Strobe::Srx)?;
        match Codec::from_bytes(&frame, true) {
            Ok(packet) => Ok(Some(packet)),
            Err(e) => Err(InterfaceError::RpcFault {
                code: -32500,
                message: e.to_string(),
            }),
        }
    }
}

impl Drop for Cc1101Interface {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
