//! CUL/CUNX-style ASCII line-protocol adapter. The dongle speaks one hex
//! line per packet over a TCP socket (CUNX) or a local serial device (CUL);
//! both are driven the same way once opened behind a `Write + Read` object.
//!
//! Reconnects and inbound parsing run on a background thread, mirroring the
//! sphero dispatcher's RX-thread-plus-channel shape: the thread owns the
//! read half, `send` takes a lock only long enough to write a line.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::InterfaceConfig;
use crate::error::InterfaceError;
use crate::interface::{PhysicalInterfaceType, RadioInterface};
use crate::packet::{Codec, Packet};

const CLOSED_RETRY_DELAY: Duration = Duration::from_secs(10);
const TRANSIENT_RETRY_DELAY: Duration = Duration::from_secs(1);
const BURST_POST_SLEEP: Duration = Duration::from_millis(1100);

/// A parsed inbound dongle line, stripped of its stack-position prefix.
#[derive(Debug, Clone, PartialEq)]
enum InboundLine {
    /// Hex text of the full received frame, including its trailing RSSI byte.
    Packet { hex: String },
    DutyCycleLimit,
    Other,
}

/// Strips `prefix_chars` leading `*` characters; returns `None` if the line
/// has a different number of leading `*`s than expected (a daisy-chained
/// dongle whose lines are not addressed to us).
fn strip_stack_prefix(line: &str, stack_position: u8) -> Option<&str> {
    let stars = line.chars().take_while(|c| *c == '*').count();
    if stars != stack_position as usize {
        return None;
    }
    Some(&line[stars..])
}

fn parse_inbound_line(line: &str, stack_position: u8) -> Option<InboundLine> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let body = strip_stack_prefix(line, stack_position)?;
    if body == "LOVF" {
        return Some(InboundLine::DutyCycleLimit);
    }
    if let Some(rest) = body.strip_prefix('Z') {
        return Some(InboundLine::Packet { hex: rest.to_string() });
    }
    Some(InboundLine::Other)
}

fn send_line(packet: &Packet) -> String {
    let hex = Codec::to_hex(packet);
    if packet.burst {
        format!("Zs{hex}\n")
    } else {
        format!("Zf{hex}\n")
    }
}

/// Either transport exposes an owned, independently-readable/writable
/// duplicate of itself, so the reader thread can hold its own read half
/// (wrapped in a `BufReader` for the life of the connection) while `send`
/// only ever touches the write half behind its own lock.
trait ClonableTransport: Read + Write + Send {
    fn try_clone_transport(&self) -> std::io::Result<Box<dyn ClonableTransport>>;
}

impl ClonableTransport for TcpStream {
    fn try_clone_transport(&self) -> std::io::Result<Box<dyn ClonableTransport>> {
        Ok(Box::new(self.try_clone()?))
    }
}

impl ClonableTransport for Box<dyn serialport::SerialPort> {
    fn try_clone_transport(&self) -> std::io::Result<Box<dyn ClonableTransport>> {
        let cloned = self
            .try_clone()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        Ok(Box::new(cloned))
    }
}

fn connect(cfg: &InterfaceConfig) -> std::io::Result<Box<dyn ClonableTransport>> {
    if let Some(port) = cfg.port {
        let stream = TcpStream::connect((cfg.host_or_device.as_str(), port))?;
        stream.set_read_timeout(Some(Duration::from_millis(200)))?;
        Ok(Box::new(stream))
    } else {
        let port = serialport::new(cfg.host_or_device.clone(), 9600)
            .timeout(Duration::from_millis(200))
            .open()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        Ok(Box::new(port))
    }
}

pub struct SerialInterface {
    id: String,
    is_default: bool,
    response_delay_ms: u64,
    stack_position: u8,
    additional_commands: Vec<String>,
    cfg: InterfaceConfig,
    writer: Arc<Mutex<Option<Box<dyn ClonableTransport>>>>,
    inbound_rx: Option<Receiver<InboundLine>>,
    shutdown: Arc<AtomicBool>,
    reader_thread: Option<JoinHandle<()>>,
}

impl SerialInterface {
    pub fn new(cfg: InterfaceConfig) -> Self {
        SerialInterface {
            id: cfg.id.clone(),
            is_default: cfg.default,
            response_delay_ms: cfg.response_delay_ms,
            stack_position: cfg.stack_position,
            additional_commands: cfg.additional_commands.clone(),
            cfg,
            writer: Arc::new(Mutex::new(None)),
            inbound_rx: None,
            shutdown: Arc::new(AtomicBool::new(false)),
            reader_thread: None,
        }
    }

    fn write_raw(writer: &Arc<Mutex<Option<Box<dyn ClonableTransport>>>>, line: &str) -> Result<(), InterfaceError> {
        let mut guard = writer.lock().unwrap();
        match guard.as_mut() {
            Some(transport) => {
                transport.write_all(line.as_bytes()).map_err(InterfaceError::Io)?;
                transport.flush().map_err(InterfaceError::Io)?;
                Ok(())
            }
            None => Err(InterfaceError::NotOpen),
        }
    }

    fn reader_loop(
        cfg: InterfaceConfig,
        stack_position: u8,
        additional_commands: Vec<String>,
        writer: Arc<Mutex<Option<Box<dyn ClonableTransport>>>>,
        tx: Sender<InboundLine>,
        shutdown: Arc<AtomicBool>,
    ) {
        loop {
            if shutdown.load(Ordering::Relaxed) {
                return;
            }
            let transport = match connect(&cfg) {
                Ok(t) => t,
                Err(e) => {
                    tracing::warn!(interface = %cfg.id, error = %e, "serial interface connect failed, retrying");
                    thread::sleep(CLOSED_RETRY_DELAY);
                    continue;
                }
            };
            let read_half = match transport.try_clone_transport() {
                Ok(h) => h,
                Err(e) => {
                    tracing::warn!(interface = %cfg.id, error = %e, "failed to split connection, retrying");
                    thread::sleep(CLOSED_RETRY_DELAY);
                    continue;
                }
            };
            {
                let mut guard = writer.lock().unwrap();
                *guard = Some(transport);
            }
            if let Err(e) = Self::send_init_sequence(&writer, &additional_commands) {
                tracing::warn!(interface = %cfg.id, error = %e, "failed to send init sequence");
            }
            tracing::debug!(interface = %cfg.id, "serial interface connected");

            let read_result = Self::read_lines(read_half, stack_position, &tx, &shutdown);

            {
                let mut guard = writer.lock().unwrap();
                *guard = None;
            }
            if shutdown.load(Ordering::Relaxed) {
                return;
            }
            match read_result {
                Ok(()) => {
                    tracing::warn!(interface = %cfg.id, "serial interface closed, reconnecting");
                    thread::sleep(CLOSED_RETRY_DELAY);
                }
                Err(e) => {
                    tracing::warn!(interface = %cfg.id, error = %e, "serial interface read error, reconnecting");
                    thread::sleep(TRANSIENT_RETRY_DELAY);
                }
            }
        }
    }

    fn send_init_sequence(
        writer: &Arc<Mutex<Option<Box<dyn ClonableTransport>>>>,
        additional_commands: &[String],
    ) -> Result<(), InterfaceError> {
        Self::write_raw(writer, "X21\n")?;
        Self::write_raw(writer, "Zr\n")?;
        for line in additional_commands {
            Self::write_raw(writer, &format!("{line}\n"))?;
        }
        Ok(())
    }

    /// Reads lines until EOF or an error, feeding parsed lines to `tx`. Owns
    /// its read half exclusively for the life of the connection, so the
    /// `BufReader` carries any bytes read past a line boundary forward to
    /// the next `read_line` call instead of discarding them.
    fn read_lines(
        read_half: Box<dyn ClonableTransport>,
        stack_position: u8,
        tx: &Sender<InboundLine>,
        shutdown: &Arc<AtomicBool>,
    ) -> std::io::Result<()> {
        let mut reader = BufReader::new(read_half);
        loop {
            if shutdown.load(Ordering::Relaxed) {
                return Ok(());
            }
            let mut line = String::new();
            let n = match reader.read_line(&mut line) {
                Ok(n) => n,
                Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut || e.kind() == std::io::ErrorKind::WouldBlock => {
                    continue;
                }
                Err(e) => return Err(e),
            };
            if n == 0 {
                return Ok(());
            }
            if let Some(parsed) = parse_inbound_line(&line, stack_position) {
                if matches!(parsed, InboundLine::DutyCycleLimit) {
                    tracing::warn!("LOVF: duty-cycle limit reached");
                }
                let _ = tx.send(parsed);
            }
        }
    }
}

impl RadioInterface for SerialInterface {
    fn id(&self) -> &str {
        &self.id
    }

    fn physical_interface_type(&self) -> PhysicalInterfaceType {
        PhysicalInterfaceType::SerialDongle
    }

    fn is_default(&self) -> bool {
        self.is_default
    }

    fn response_delay_ms(&self) -> u64 {
        self.response_delay_ms
    }

    fn is_open(&self) -> bool {
        self.writer.lock().unwrap().is_some()
    }

    fn has_rssi_byte(&self) -> bool {
        true
    }

    fn open(&mut self) -> Result<(), InterfaceError> {
        if self.reader_thread.is_some() {
            return Ok(());
        }
        let (tx, rx) = mpsc::channel();
        self.inbound_rx = Some(rx);
        self.shutdown.store(false, Ordering::SeqCst);
        let cfg = self.cfg.clone();
        let stack_position = self.stack_position;
        let additional_commands = self.additional_commands.clone();
        let writer = Arc::clone(&self.writer);
        let shutdown = Arc::clone(&self.shutdown);
        self.reader_thread = Some(thread::spawn(move || {
            Self::reader_loop(cfg, stack_position, additional_commands, writer, tx, shutdown);
        }));
        Ok(())
    }

    fn close(&mut self) -> Result<(), InterfaceError> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.reader_thread.take() {
            let _ = handle.join();
        }
        *self.writer.lock().unwrap() = None;
        Ok(())
    }

    fn send(&mut self, packet: &Packet, _stealthy: bool) -> Result<(), InterfaceError> {
        let line = send_line(packet);
        Self::write_raw(&self.writer, &line)?;
        if packet.burst {
            thread::sleep(BURST_POST_SLEEP);
        }
        Ok(())
    }

    fn try_recv(&mut self) -> Result<Option<Packet>, InterfaceError> {
        let rx = match self.inbound_rx.as_ref() {
            Some(rx) => rx,
            None => return Ok(None),
        };
        match rx.try_recv() {
            Ok(InboundLine::Packet { hex }) => {
                let packet = Codec::from_hex(&hex, true)
                    .map_err(|e| InterfaceError::RpcFault { code: -32500, message: e.to_string() })?;
                Ok(Some(packet))
            }
            Ok(InboundLine::DutyCycleLimit) | Ok(InboundLine::Other) => Ok(None),
            Err(mpsc::TryRecvError::Empty) => Ok(None),
            Err(mpsc::TryRecvError::Disconnected) => Err(InterfaceError::NotOpen),
        }
    }
}

impl Drop for SerialInterface {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_matching_stack_prefix() {
        assert_eq!(strip_stack_prefix("**Zabc\n", 2), Some("Zabc\n"));
        assert_eq!(strip_stack_prefix("Zabc\n", 0), Some("Zabc\n"));
        assert_eq!(strip_stack_prefix("*Zabc\n", 0), None);
        assert_eq!(strip_stack_prefix("Zabc\n", 1), None);
    }

    #[test]
    fn parses_packet_line_into_hex_text() {
        let parsed = parse_inbound_line("Z0A0102030405060708AA\n", 0).unwrap();
        assert_eq!(
            parsed,
            InboundLine::Packet {
                hex: "0A0102030405060708AA".to_string(),
            }
        );
    }

    #[test]
    fn inbound_hex_decodes_with_trailing_rssi_byte() {
        let p = Packet::new(0, 0x01, 0x00, 1, 2, vec![0, 0]).unwrap();
        let mut bytes = Codec::to_bytes(&p);
        bytes.push(0xAA);
        let hex = hex::encode(&bytes);
        let line = format!("Z{hex}\n");
        let parsed = parse_inbound_line(&line, 0).unwrap();
        let hex_text = match parsed {
            InboundLine::Packet { hex } => hex,
            other => panic!("unexpected {other:?}"),
        };
        let decoded = Codec::from_hex(&hex_text, true).unwrap();
        assert_eq!(decoded.rssi_device, Some(0xAA));
        assert_eq!(decoded.payload, p.payload);
    }

    #[test]
    fn recognizes_duty_cycle_limit_line() {
        assert_eq!(parse_inbound_line("LOVF\n", 0), Some(InboundLine::DutyCycleLimit));
    }

    #[test]
    fn builds_burst_and_fast_send_lines() {
        let p = Packet::new(0, 0x01, 0x00, 1, 2, vec![0, 0]).unwrap();
        assert!(send_line(&p).starts_with("Zf"));
        let burst = p.with_burst(true);
        assert!(send_line(&burst).starts_with("Zs"));
    }
}
