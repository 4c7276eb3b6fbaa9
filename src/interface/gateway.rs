//! Mutual-TLS gateway tunnel. Wraps a TCP connection in `rustls` and carries
//! a small length-prefixed, bincode-framed RPC: `sendPacket` outbound,
//! `packetReceived` inbound. Homegear's own gateway protocol correlates
//! exactly one in-flight request at a time via a lock and a condition
//! variable; this adapter keeps that shape rather than pipelining requests.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use serde::{Deserialize, Serialize};

use crate::config::InterfaceConfig;
use crate::error::InterfaceError;
use crate::interface::{PhysicalInterfaceType, RadioInterface};
use crate::packet::{Codec, Packet};

const CLOSED_RETRY_DELAY: Duration = Duration::from_secs(10);
const TRANSIENT_RETRY_DELAY: Duration = Duration::from_secs(1);
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

/// MAX! is family 4 in the Homegear family registry.
const MAX_FAMILY_ID: i32 = 4;

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

#[derive(Debug, Serialize, Deserialize)]
enum Frame {
    SendPacket { family_id: i32, hex: String, burst: bool },
    PacketReceived { family_id: i32, hex: String },
    Response(RpcResponse),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum RpcResponse {
    Ok,
    Fault { code: i32, message: String },
}

fn write_frame(stream: &mut TlsStream, frame: &Frame) -> std::io::Result<()> {
    let body = bincode::serialize(frame)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    stream.write_all(&(body.len() as u32).to_be_bytes())?;
    stream.write_all(&body)?;
    stream.flush()
}

fn read_frame(stream: &mut TlsStream) -> std::io::Result<Frame> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf)?;
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body)?;
    bincode::deserialize(&body).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

fn load_certs(path: &str) -> std::io::Result<Vec<CertificateDer<'static>>> {
    let mut reader = std::io::BufReader::new(std::fs::File::open(path)?);
    rustls_pemfile::certs(&mut reader).collect()
}

fn load_key(path: &str) -> std::io::Result<PrivateKeyDer<'static>> {
    let mut reader = std::io::BufReader::new(std::fs::File::open(path)?);
    rustls_pemfile::private_key(&mut reader)?
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidData, "no private key in key_file"))
}

fn build_tls_config(cfg: &InterfaceConfig) -> Result<Arc<rustls::ClientConfig>, InterfaceError> {
    let mut roots = rustls::RootCertStore::empty();
    if let Some(ca_file) = &cfg.ca_file {
        for cert in load_certs(ca_file)? {
            roots.add(cert)?;
        }
    }
    let builder = rustls::ClientConfig::builder().with_root_certificates(roots);
    let config = match (&cfg.cert_file, &cfg.key_file) {
        (Some(cert_file), Some(key_file)) => {
            let certs = load_certs(cert_file)?;
            let key = load_key(key_file)?;
            builder.with_client_auth_cert(certs, key)?
        }
        _ => builder.with_no_client_auth(),
    };
    Ok(Arc::new(config))
}

fn connect(cfg: &InterfaceConfig) -> Result<TlsStream, InterfaceError> {
    let port = cfg
        .port
        .ok_or_else(|| InterfaceError::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, "gateway interface needs a port")))?;
    let sock = TcpStream::connect((cfg.host_or_device.as_str(), port))?;
    sock.set_read_timeout(Some(Duration::from_millis(200)))?;
    let tls_config = build_tls_config(cfg)?;
    let server_name = ServerName::try_from(cfg.host_or_device.clone())
        .map_err(|e| InterfaceError::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string())))?;
    let conn = rustls::ClientConnection::new(tls_config, server_name)?;
    Ok(rustls::StreamOwned::new(conn, sock))
}

/// Holds the one outstanding `sendPacket` response, signalled by the reader
/// thread and awaited by `send` with a 10s timeout — Homegear's own gateway
/// client only ever has one request in flight, so there is nothing to key
/// correlation on beyond "the next response frame that arrives".
#[derive(Default)]
struct Pending {
    response: Mutex<Option<RpcResponse>>,
    signal: Condvar,
}

pub struct GatewayInterface {
    id: String,
    is_default: bool,
    response_delay_ms: u64,
    cfg: InterfaceConfig,
    stream: Arc<Mutex<Option<TlsStream>>>,
    inbound_rx: Option<Receiver<(i32, String)>>,
    pending: Arc<Pending>,
    shutdown: Arc<AtomicBool>,
    reader_thread: Option<JoinHandle<()>>,
}

impl GatewayInterface {
    pub fn new(cfg: InterfaceConfig) -> Self {
        GatewayInterface {
            id: cfg.id.clone(),
            is_default: cfg.default,
            response_delay_ms: cfg.response_delay_ms,
            cfg,
            stream: Arc::new(Mutex::new(None)),
            inbound_rx: None,
            pending: Arc::new(Pending::default()),
            shutdown: Arc::new(AtomicBool::new(false)),
            reader_thread: None,
        }
    }

    fn reader_loop(
        cfg: InterfaceConfig,
        stream: Arc<Mutex<Option<TlsStream>>>,
        pending: Arc<Pending>,
        tx: Sender<(i32, String)>,
        shutdown: Arc<AtomicBool>,
    ) {
        loop {
            if shutdown.load(Ordering::Relaxed) {
                return;
            }
            let mut conn = match connect(&cfg) {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(interface = %cfg.id, error = %e, "gateway connect failed, retrying");
                    thread::sleep(CLOSED_RETRY_DELAY);
                    continue;
                }
            };
            tracing::debug!(interface = %cfg.id, "gateway tunnel connected");

            let result = loop {
                if shutdown.load(Ordering::Relaxed) {
                    break Ok(());
                }
                match read_frame(&mut conn) {
                    Ok(Frame::PacketReceived { family_id, hex }) => {
                        if family_id == MAX_FAMILY_ID {
                            let _ = tx.send((family_id, hex));
                        }
                        if let Err(e) = write_frame(&mut conn, &Frame::Response(RpcResponse::Ok)) {
                            break Err(e);
                        }
                    }
                    Ok(Frame::Response(resp)) => {
                        *pending.response.lock().unwrap() = Some(resp);
                        pending.signal.notify_all();
                    }
                    Ok(Frame::SendPacket { .. }) => {
                        tracing::warn!(interface = %cfg.id, "ignoring unexpected inbound sendPacket frame");
                    }
                    Err(ref e)
                        if e.kind() == std::io::ErrorKind::TimedOut
                            || e.kind() == std::io::ErrorKind::WouldBlock =>
                    {
                        continue;
                    }
                    Err(e) => break Err(e),
                }
            };

            {
                let mut guard = stream.lock().unwrap();
                *guard = None;
            }
            if shutdown.load(Ordering::Relaxed) {
                return;
            }
            match result {
                Ok(()) => {
                    tracing::warn!(interface = %cfg.id, "gateway tunnel closed, reconnecting");
                    thread::sleep(CLOSED_RETRY_DELAY);
                }
                Err(e) => {
                    tracing::warn!(interface = %cfg.id, error = %e, "gateway tunnel error, reconnecting");
                    thread::sleep(TRANSIENT_RETRY_DELAY);
                }
            }
        }
    }
}

impl RadioInterface for GatewayInterface {
    fn id(&self) -> &str {
        &self.id
    }

    fn physical_interface_type(&self) -> PhysicalInterfaceType {
        PhysicalInterfaceType::GatewayTls
    }

    fn is_default(&self) -> bool {
        self.is_default
    }

    fn response_delay_ms(&self) -> u64 {
        self.response_delay_ms
    }

    fn is_open(&self) -> bool {
        self.stream.lock().unwrap().is_some()
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
        let stream = Arc::clone(&self.stream);
        let pending = Arc::clone(&self.pending);
        let shutdown = Arc::clone(&self.shutdown);
        self.reader_thread = Some(thread::spawn(move || {
            Self::reader_loop(cfg, stream, pending, tx, shutdown);
        }));
        Ok(())
    }

    fn close(&mut self) -> Result<(), InterfaceError> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.reader_thread.take() {
            let _ = handle.join();
        }
        *self.stream.lock().unwrap() = None;
        Ok(())
    }

    fn send(&mut self, packet: &Packet, _stealthy: bool) -> Result<(), InterfaceError> {
        let frame = Frame::SendPacket {
            family_id: MAX_FAMILY_ID,
            hex: Codec::to_hex(packet),
            burst: packet.burst,
        };
        *self.pending.response.lock().unwrap() = None;
        {
            let mut guard = self.stream.lock().unwrap();
            let conn = guard.as_mut().ok_or(InterfaceError::NotOpen)?;
            write_frame(conn, &frame)?;
        }

        let (lock, cvar) = (&self.pending.response, &self.pending.signal);
        let guard = lock.lock().unwrap();
        let (mut guard, timed_out) = cvar
            .wait_timeout_while(guard, RESPONSE_TIMEOUT, |resp| resp.is_none())
            .unwrap();
        match guard.take() {
            Some(RpcResponse::Ok) => Ok(()),
            Some(RpcResponse::Fault { code, message }) => Err(InterfaceError::RpcFault { code, message }),
            None => {
                debug_assert!(timed_out.timed_out());
                Err(InterfaceError::Timeout)
            }
        }
    }

    fn try_recv(&mut self) -> Result<Option<Packet>, InterfaceError> {
        let rx = match self.inbound_rx.as_ref() {
            Some(rx) => rx,
            None => return Ok(None),
        };
        match rx.try_recv() {
            Ok((_family_id, hex)) => {
                let packet = Codec::from_hex(&hex, true)
                    .map_err(|e| InterfaceError::RpcFault { code: -32500, message: e.to_string() })?;
                Ok(Some(packet))
            }
            Err(mpsc::TryRecvError::Empty) => Ok(None),
            Err(mpsc::TryRecvError::Disconnected) => Err(InterfaceError::NotOpen),
        }
    }
}

impl Drop for GatewayInterface {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_round_trips_through_bincode() {
        let frame = Frame::SendPacket {
            family_id: MAX_FAMILY_ID,
            hex: "0A0102030405060708".to_string(),
            burst: true,
        };
        let bytes = bincode::serialize(&frame).unwrap();
        let decoded: Frame = bincode::deserialize(&bytes).unwrap();
        match decoded {
            Frame::SendPacket { family_id, hex, burst } => {
                assert_eq!(family_id, MAX_FAMILY_ID);
                assert_eq!(hex, "0A0102030405060708");
                assert!(burst);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn response_round_trips_ok_and_fault() {
        let ok = bincode::serialize(&Frame::Response(RpcResponse::Ok)).unwrap();
        assert!(matches!(
            bincode::deserialize::<Frame>(&ok).unwrap(),
            Frame::Response(RpcResponse::Ok)
        ));

        let fault = Frame::Response(RpcResponse::Fault {
            code: -32500,
            message: "boom".to_string(),
        });
        let bytes = bincode::serialize(&fault).unwrap();
        match bincode::deserialize::<Frame>(&bytes).unwrap() {
            Frame::Response(RpcResponse::Fault { code, message }) => {
                assert_eq!(code, -32500);
                assert_eq!(message, "boom");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
