//! TCP-backed link cable transport for sessions running in different
//! processes.
//!
//! A background link thread owns the socket; the emulation thread only talks
//! to it through a command channel and an atomic mailbox, so a slow or absent
//! peer can never stall a transfer. Links are keyed by the content identity:
//! both ends exchange an identity digest during the handshake and refuse to
//! pair across different content.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel as cb;
use log::{debug, info, trace, warn};

use crate::serial::{LINE_IDLE, LinkPort, Mailbox};

/// Listen port used when the descriptor doesn't name one.
pub const DEFAULT_LINK_PORT: u16 = 8765;

const CMD_HELLO: u8 = 1;
const CMD_XFER: u8 = 2;
const CMD_BYE: u8 = 3;

const FRAME_SIZE: usize = 8;
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
const CONNECT_ATTEMPT_TIMEOUT: Duration = Duration::from_millis(800);
const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(300);
const CONNECT_RETRY_WINDOW: Duration = Duration::from_secs(12);
const POLL_INTERVAL: Duration = Duration::from_millis(1);

/// One fixed-size wire frame.
#[derive(Clone, Copy, Default)]
struct LinkFrame {
    cmd: u8,
    data: u8,
    ident: u32,
}

impl LinkFrame {
    fn to_bytes(self) -> [u8; FRAME_SIZE] {
        let mut buf = [0u8; FRAME_SIZE];
        buf[0] = self.cmd;
        buf[1] = self.data;
        buf[4..8].copy_from_slice(&self.ident.to_le_bytes());
        buf
    }

    fn from_bytes(buf: &[u8; FRAME_SIZE]) -> Self {
        Self {
            cmd: buf[0],
            data: buf[1],
            ident: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
        }
    }

    fn hello(ident: u32) -> Self {
        Self {
            cmd: CMD_HELLO,
            data: 0,
            ident,
        }
    }

    fn xfer(byte: u8) -> Self {
        Self {
            cmd: CMD_XFER,
            data: byte,
            ident: 0,
        }
    }

    fn bye() -> Self {
        Self {
            cmd: CMD_BYE,
            data: 0,
            ident: 0,
        }
    }
}

/// FNV-1a digest of the content identity carried in HELLO frames.
fn identity_digest(content_id: &str) -> u32 {
    let mut hash = 0x811C_9DC5u32;
    for byte in content_id.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

/// How this end of the cable finds its peer.
#[derive(Clone, Debug)]
pub enum RemoteMode {
    Listen { port: u16 },
    Connect { addr: String },
}

/// Link status notifications surfaced to the shell.
#[derive(Clone, Debug)]
pub enum LinkEvent {
    Listening { port: u16 },
    Connected,
    Disconnected,
    Error(String),
}

enum LinkCommand {
    Send(u8),
    Shutdown,
}

struct RemoteShared {
    connected: AtomicBool,
    mailbox: Mailbox,
}

/// The endpoint handed to the emulator core.
///
/// `transfer` has the same mailbox semantics as the local transport while a
/// peer is connected; without one the line reads idle. It never blocks on the
/// network.
pub struct RemoteLinkPort {
    shared: Arc<RemoteShared>,
    commands: mpsc::Sender<LinkCommand>,
}

impl LinkPort for RemoteLinkPort {
    fn transfer(&mut self, byte: u8) -> u8 {
        if !self.shared.connected.load(Ordering::Acquire) {
            trace!("remote link: no peer, line idle");
            return LINE_IDLE;
        }

        if self.commands.send(LinkCommand::Send(byte)).is_err() {
            // Link thread is gone; treat as an unplugged cable.
            return LINE_IDLE;
        }

        let incoming = self.shared.mailbox.take();
        debug!("remote link: outgoing {byte:02X} / incoming {incoming:02X}");
        incoming
    }
}

/// Host-retained handle that stops the link thread at unload.
pub struct RemoteLinkHandle {
    commands: mpsc::Sender<LinkCommand>,
    thread: Option<JoinHandle<()>>,
}

impl RemoteLinkHandle {
    /// Ask the link thread to say goodbye and wait for it to exit. Safe to
    /// call more than once.
    pub fn shutdown(&mut self) {
        let _ = self.commands.send(LinkCommand::Shutdown);
        if let Some(handle) = self.thread.take()
            && handle.join().is_err()
        {
            warn!("remote link: thread panicked during shutdown");
        }
    }
}

impl Drop for RemoteLinkHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Spawn the link thread for `content_id` in the given mode, returning the
/// port for the core, the handle the host keeps, and the event receiver for
/// the shell.
pub fn spawn_remote_link(
    content_id: &str,
    mode: RemoteMode,
) -> (RemoteLinkPort, RemoteLinkHandle, cb::Receiver<LinkEvent>) {
    let ident = identity_digest(content_id);
    let (cmd_tx, cmd_rx) = mpsc::channel();
    let (event_tx, event_rx) = cb::unbounded();
    let shared = Arc::new(RemoteShared {
        connected: AtomicBool::new(false),
        mailbox: Mailbox::default(),
    });

    let thread_shared = Arc::clone(&shared);
    let thread = thread::spawn(move || {
        link_thread_main(mode, ident, cmd_rx, event_tx, thread_shared);
    });

    let port = RemoteLinkPort {
        shared,
        commands: cmd_tx.clone(),
    };
    let handle = RemoteLinkHandle {
        commands: cmd_tx,
        thread: Some(thread),
    };
    (port, handle, event_rx)
}

fn send_frame(stream: &mut TcpStream, frame: &LinkFrame) -> bool {
    let bytes = frame.to_bytes();
    stream.write_all(&bytes).is_ok() && stream.flush().is_ok()
}

fn read_blocking_frame(stream: &mut TcpStream) -> io::Result<LinkFrame> {
    let mut buf = [0u8; FRAME_SIZE];
    stream.read_exact(&mut buf)?;
    Ok(LinkFrame::from_bytes(&buf))
}

fn resolve_addr(endpoint: &str) -> io::Result<SocketAddr> {
    if let Ok(addr) = endpoint.parse::<SocketAddr>() {
        return Ok(addr);
    }

    let mut addrs = endpoint.to_socket_addrs()?;
    addrs.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("no address resolved for {endpoint}"),
        )
    })
}

/// Blocking HELLO exchange right after the TCP connection is established.
/// Returns false when the peer speaks something else or runs different
/// content.
fn handshake(stream: &mut TcpStream, ident: u32) -> bool {
    if stream.set_nonblocking(false).is_err()
        || stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT)).is_err()
    {
        return false;
    }

    if !send_frame(stream, &LinkFrame::hello(ident)) {
        warn!("remote link: failed to send HELLO");
        return false;
    }

    let hello = match read_blocking_frame(stream) {
        Ok(frame) => frame,
        Err(e) => {
            warn!("remote link: failed to read HELLO: {e}");
            return false;
        }
    };
    if hello.cmd != CMD_HELLO {
        warn!("remote link: expected HELLO, got command {}", hello.cmd);
        return false;
    }
    if hello.ident != ident {
        warn!(
            "remote link: peer runs different content (digest {:08X}, ours {:08X})",
            hello.ident, ident
        );
        return false;
    }

    stream.set_read_timeout(None).is_ok()
}

fn queue_frame(tx_queue: &mut VecDeque<u8>, frame: LinkFrame) {
    tx_queue.extend(frame.to_bytes());
}

fn flush_send_queue(stream: &mut TcpStream, tx_queue: &mut VecDeque<u8>) -> io::Result<()> {
    let mut chunk = [0u8; 256];

    while !tx_queue.is_empty() {
        let chunk_len = tx_queue.len().min(chunk.len());
        for (dst, src) in chunk.iter_mut().zip(tx_queue.iter().take(chunk_len)) {
            *dst = *src;
        }

        match stream.write(&chunk[..chunk_len]) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "socket closed while writing",
                ));
            }
            Ok(written) => {
                tx_queue.drain(..written);
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }

    Ok(())
}

enum ReadState {
    Alive,
    Disconnected,
}

fn poll_stream_read(stream: &mut TcpStream, rx_buf: &mut Vec<u8>) -> io::Result<ReadState> {
    let mut temp = [0u8; 256];
    loop {
        match stream.read(&mut temp) {
            Ok(0) => return Ok(ReadState::Disconnected),
            Ok(n) => {
                rx_buf.extend_from_slice(&temp[..n]);
                if n < temp.len() {
                    return Ok(ReadState::Alive);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(ReadState::Alive),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
}

fn drain_frames(rx_buf: &mut Vec<u8>) -> Vec<LinkFrame> {
    let mut frames = Vec::new();
    let mut offset = 0usize;

    while rx_buf.len().saturating_sub(offset) >= FRAME_SIZE {
        let mut bytes = [0u8; FRAME_SIZE];
        bytes.copy_from_slice(&rx_buf[offset..offset + FRAME_SIZE]);
        frames.push(LinkFrame::from_bytes(&bytes));
        offset += FRAME_SIZE;
    }

    if offset != 0 {
        rx_buf.drain(..offset);
    }

    frames
}

struct PendingConnect {
    addr: String,
    next_attempt_at: Instant,
    deadline: Instant,
    attempts: u32,
    last_error: Option<String>,
}

impl PendingConnect {
    fn new(addr: String) -> Self {
        let now = Instant::now();
        Self {
            addr,
            next_attempt_at: now,
            deadline: now + CONNECT_RETRY_WINDOW,
            attempts: 0,
            last_error: None,
        }
    }
}

fn try_connect(addr: &str, ident: u32) -> io::Result<TcpStream> {
    let target = resolve_addr(addr)?;
    let mut stream = TcpStream::connect_timeout(&target, CONNECT_ATTEMPT_TIMEOUT)?;
    let _ = stream.set_nodelay(true);
    if !handshake(&mut stream, ident) {
        return Err(io::Error::other("link handshake failed"));
    }
    stream.set_nonblocking(true)?;
    Ok(stream)
}

fn drop_connection(
    shared: &RemoteShared,
    stream: &mut Option<TcpStream>,
    rx_buf: &mut Vec<u8>,
    tx_queue: &mut VecDeque<u8>,
) {
    shared.connected.store(false, Ordering::Release);
    shared.mailbox.take();
    *stream = None;
    rx_buf.clear();
    tx_queue.clear();
}

fn link_thread_main(
    mode: RemoteMode,
    ident: u32,
    cmd_rx: mpsc::Receiver<LinkCommand>,
    event_tx: cb::Sender<LinkEvent>,
    shared: Arc<RemoteShared>,
) {
    let mut listener: Option<TcpListener> = None;
    let mut pending_connect: Option<PendingConnect> = None;
    let mut stream: Option<TcpStream> = None;
    let mut rx_buf: Vec<u8> = Vec::new();
    let mut tx_queue: VecDeque<u8> = VecDeque::new();

    match mode {
        RemoteMode::Listen { port } => match TcpListener::bind(("0.0.0.0", port)) {
            Ok(l) => {
                if let Err(e) = l.set_nonblocking(true) {
                    let _ = event_tx.try_send(LinkEvent::Error(format!(
                        "failed to set non-blocking listener: {e}"
                    )));
                    return;
                }
                let actual = l.local_addr().map(|a| a.port()).unwrap_or(port);
                info!("remote link: listening on port {actual}");
                let _ = event_tx.try_send(LinkEvent::Listening { port: actual });
                listener = Some(l);
            }
            Err(e) => {
                let _ = event_tx.try_send(LinkEvent::Error(format!(
                    "failed to bind link listener: {e}"
                )));
                return;
            }
        },
        RemoteMode::Connect { addr } => {
            info!("remote link: connecting to {addr}");
            pending_connect = Some(PendingConnect::new(addr));
        }
    }

    loop {
        while let Ok(cmd) = cmd_rx.try_recv() {
            match cmd {
                LinkCommand::Send(byte) => {
                    // Without a peer the byte is simply lost, the same as
                    // clocking an unplugged cable.
                    if stream.is_some() {
                        queue_frame(&mut tx_queue, LinkFrame::xfer(byte));
                    }
                }
                LinkCommand::Shutdown => {
                    if let Some(s) = stream.as_mut() {
                        queue_frame(&mut tx_queue, LinkFrame::bye());
                        let _ = flush_send_queue(s, &mut tx_queue);
                    }
                    drop_connection(&shared, &mut stream, &mut rx_buf, &mut tx_queue);
                    return;
                }
            }
        }

        // Accept a peer while unconnected. The listener stays around after a
        // disconnect so the peer can rejoin.
        if stream.is_none()
            && let Some(l) = listener.as_ref()
        {
            match l.accept() {
                Ok((mut accepted, addr)) => {
                    info!("remote link: accepted connection from {addr}");
                    let _ = accepted.set_nodelay(true);
                    if handshake(&mut accepted, ident) && accepted.set_nonblocking(true).is_ok() {
                        shared.connected.store(true, Ordering::Release);
                        stream = Some(accepted);
                        let _ = event_tx.try_send(LinkEvent::Connected);
                    } else {
                        warn!("remote link: handshake failed with {addr}");
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => warn!("remote link: listener accept error: {e}"),
            }
        }

        // Dial the configured peer while unconnected.
        if stream.is_none() && pending_connect.is_some() {
            let mut established: Option<TcpStream> = None;
            let mut give_up = false;

            if let Some(connect) = pending_connect.as_mut() {
                let now = Instant::now();
                if now >= connect.deadline {
                    let detail = connect
                        .last_error
                        .clone()
                        .unwrap_or_else(|| "timed out while waiting for peer".to_string());
                    let _ = event_tx.try_send(LinkEvent::Error(format!(
                        "connection to {} failed after {} attempt(s): {detail}",
                        connect.addr,
                        connect.attempts.max(1)
                    )));
                    give_up = true;
                } else if now >= connect.next_attempt_at {
                    connect.attempts += 1;
                    match try_connect(&connect.addr, ident) {
                        Ok(s) => established = Some(s),
                        Err(e) => {
                            debug!(
                                "remote link: attempt {} to {} failed: {e}",
                                connect.attempts, connect.addr
                            );
                            connect.last_error = Some(e.to_string());
                            connect.next_attempt_at = now + CONNECT_RETRY_INTERVAL;
                        }
                    }
                }
            }

            if give_up {
                pending_connect = None;
            }
            if let Some(s) = established {
                info!("remote link: connected");
                shared.connected.store(true, Ordering::Release);
                stream = Some(s);
                pending_connect = None;
                let _ = event_tx.try_send(LinkEvent::Connected);
            }
        }

        if let Some(s) = stream.as_mut() {
            let mut disconnected = false;

            if let Err(e) = flush_send_queue(s, &mut tx_queue) {
                warn!("remote link: send error: {e}");
                disconnected = true;
            }

            match poll_stream_read(s, &mut rx_buf) {
                Ok(ReadState::Alive) => {
                    for frame in drain_frames(&mut rx_buf) {
                        match frame.cmd {
                            CMD_XFER => {
                                trace!("remote link: received {:02X}", frame.data);
                                shared.mailbox.put(frame.data);
                            }
                            CMD_BYE => {
                                info!("remote link: peer said goodbye");
                                disconnected = true;
                            }
                            other => {
                                debug!("remote link: ignoring unknown command {other}");
                            }
                        }
                    }
                }
                Ok(ReadState::Disconnected) => {
                    info!("remote link: peer closed the connection");
                    disconnected = true;
                }
                Err(e) => {
                    warn!("remote link: read error: {e}");
                    disconnected = true;
                }
            }

            if disconnected {
                drop_connection(&shared, &mut stream, &mut rx_buf, &mut tx_queue);
                let _ = event_tx.try_send(LinkEvent::Disconnected);
            }
        }

        thread::sleep(POLL_INTERVAL);
    }
}
