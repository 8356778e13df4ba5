use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};

use buildops::PlayerId;
use tracing::{info, warn};

const BUILDPORT_ENV_VAR: &str = "BUILDOPS_BUILDPORT";
const BUILDPORT_PORT_ENV_VAR: &str = "BUILDOPS_BUILDPORT_PORT";
const BUILDPORT_DEFAULT_PORT: u16 = 46011;
const MAX_PENDING_CONTROL_BYTES_PER_CLIENT: usize = 256 * 1024;
const MAX_PENDING_TELEMETRY_BYTES_PER_CLIENT: usize = 64 * 1024;
const REMOTE_CONTROL_PREFIX: &str = "C ";
const REMOTE_TELEMETRY_PREFIX: &str = "T ";

/// One complete line read from a connected client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RemoteLine {
    pub(crate) player: PlayerId,
    pub(crate) text: String,
}

#[derive(Debug, Default)]
pub(crate) struct PollOutcome {
    pub(crate) lines: Vec<RemoteLine>,
    /// Players whose connection closed during this poll.
    pub(crate) departed: Vec<PlayerId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BuildportConfig {
    enabled: bool,
    port: u16,
}

impl BuildportConfig {
    fn from_env() -> Self {
        let enabled = parse_enabled_flag(std::env::var(BUILDPORT_ENV_VAR).ok().as_deref());
        let raw_port = std::env::var(BUILDPORT_PORT_ENV_VAR).ok();
        let port = match raw_port.as_deref() {
            Some(value) => value.trim().parse::<u16>().unwrap_or_else(|_| {
                warn!(
                    value,
                    fallback_port = BUILDPORT_DEFAULT_PORT,
                    "buildport_invalid_port_using_default"
                );
                BUILDPORT_DEFAULT_PORT
            }),
            None => BUILDPORT_DEFAULT_PORT,
        };
        Self { enabled, port }
    }
}

/// Localhost line console. Disabled when the listener could not be bound.
#[derive(Debug)]
pub(crate) struct Buildport {
    transport: Option<TcpBuildportTransport>,
}

impl Buildport {
    pub(crate) fn from_env() -> Self {
        let config = BuildportConfig::from_env();
        if !config.enabled {
            info!("buildport_disabled");
            return Self::disabled();
        }
        match TcpBuildportTransport::bind_localhost(config.port) {
            Ok(transport) => {
                info!(
                    line = %ready_line_text(transport.bound_port),
                    "buildport_ready_bound"
                );
                Self {
                    transport: Some(transport),
                }
            }
            Err(err) => {
                warn!(error = %err, port = config.port, "buildport_bind_failed_disabled");
                Self::disabled()
            }
        }
    }

    pub(crate) fn disabled() -> Self {
        Self { transport: None }
    }

    #[cfg(test)]
    pub(crate) fn bound_localhost(port: u16) -> io::Result<Self> {
        Ok(Self {
            transport: Some(TcpBuildportTransport::bind_localhost(port)?),
        })
    }

    pub(crate) fn bound_port(&self) -> Option<u16> {
        self.transport.as_ref().map(|transport| transport.bound_port)
    }

    pub(crate) fn client_count(&self) -> usize {
        self.transport
            .as_ref()
            .map_or(0, |transport| transport.clients.len())
    }

    pub(crate) fn poll(&mut self) -> PollOutcome {
        let mut outcome = PollOutcome::default();
        if let Some(transport) = &mut self.transport {
            transport.accept_pending_clients();
            transport.read_client_lines(&mut outcome);
            transport.flush_all(&mut outcome.departed);
        }
        outcome
    }

    /// Queues control lines for one player; returns players dropped while flushing.
    pub(crate) fn reply(&mut self, player: PlayerId, lines: &[String]) -> Vec<PlayerId> {
        let mut departed = Vec::new();
        if let Some(transport) = &mut self.transport {
            if let Some(client) = transport
                .clients
                .iter_mut()
                .find(|client| client.player == player)
            {
                for line in lines {
                    client
                        .outbox
                        .push_control(line, MAX_PENDING_CONTROL_BYTES_PER_CLIENT);
                }
            }
            transport.flush_all(&mut departed);
        }
        departed
    }

    /// Broadcasts one telemetry frame to every client.
    pub(crate) fn send_frame(&mut self, line: &str) -> Vec<PlayerId> {
        let mut departed = Vec::new();
        if let Some(transport) = &mut self.transport {
            for client in &mut transport.clients {
                client
                    .outbox
                    .push_telemetry(line, MAX_PENDING_TELEMETRY_BYTES_PER_CLIENT);
            }
            transport.flush_all(&mut departed);
        }
        departed
    }
}

#[derive(Debug)]
struct TcpBuildportTransport {
    listener: TcpListener,
    bound_port: u16,
    clients: Vec<ClientConn>,
    next_player: u32,
}

#[derive(Debug)]
struct ClientConn {
    player: PlayerId,
    stream: TcpStream,
    read_buf: Vec<u8>,
    outbox: ClientOutbox,
}

impl TcpBuildportTransport {
    fn bind_localhost(port: u16) -> io::Result<Self> {
        let listener = TcpListener::bind(localhost_bind_addr(port))?;
        listener.set_nonblocking(true)?;
        let bound_port = listener.local_addr()?.port();
        Ok(Self {
            listener,
            bound_port,
            clients: Vec::new(),
            next_player: 1,
        })
    }

    fn accept_pending_clients(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    if let Err(err) = stream.set_nonblocking(true) {
                        warn!(error = %err, "buildport_client_nonblocking_failed");
                        continue;
                    }
                    if let Err(err) = stream.set_nodelay(true) {
                        warn!(error = %err, "buildport_client_nodelay_failed");
                    }
                    let player = PlayerId(self.next_player);
                    self.next_player = self.next_player.wrapping_add(1).max(1);
                    let mut outbox = ClientOutbox::default();
                    outbox.push_control(
                        &ready_line_text(self.bound_port),
                        MAX_PENDING_CONTROL_BYTES_PER_CLIENT,
                    );
                    info!(%player, peer = %addr, "buildport_client_connected");
                    self.clients.push(ClientConn {
                        player,
                        stream,
                        read_buf: Vec::new(),
                        outbox,
                    });
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => {
                    warn!(error = %err, "buildport_accept_failed");
                    break;
                }
            }
        }
    }

    fn read_client_lines(&mut self, outcome: &mut PollOutcome) {
        let mut index = 0usize;
        while index < self.clients.len() {
            let client = &mut self.clients[index];
            let mut chunk = [0u8; 1024];
            let mut disconnected = false;
            loop {
                match client.stream.read(&mut chunk) {
                    Ok(0) => {
                        disconnected = true;
                        break;
                    }
                    Ok(bytes_read) => {
                        client.read_buf.extend_from_slice(&chunk[..bytes_read]);
                        drain_complete_lines(
                            &mut client.read_buf,
                            client.player,
                            &mut outcome.lines,
                        );
                    }
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                    Err(err) => {
                        warn!(
                            error = %err,
                            player = %client.player,
                            "buildport_client_read_failed"
                        );
                        disconnected = true;
                        break;
                    }
                }
            }

            if disconnected {
                let removed = self.clients.swap_remove(index);
                info!(player = %removed.player, "buildport_client_disconnected");
                outcome.departed.push(removed.player);
            } else {
                index += 1;
            }
        }
    }

    fn flush_all(&mut self, departed: &mut Vec<PlayerId>) {
        let mut index = 0usize;
        while index < self.clients.len() {
            let client = &mut self.clients[index];
            match client.outbox.flush(&mut client.stream) {
                Ok(()) => index += 1,
                Err(err) => {
                    warn!(error = %err, player = %client.player, "buildport_client_write_failed");
                    let removed = self.clients.swap_remove(index);
                    departed.push(removed.player);
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineClass {
    Control,
    Telemetry,
}

#[derive(Debug)]
struct Outbound {
    class: LineClass,
    bytes: Vec<u8>,
}

/// Pending bytes for one client. Control replies overtake queued telemetry; the
/// front entry may be partially written and is never reordered or evicted.
#[derive(Debug, Default)]
struct ClientOutbox {
    pending: VecDeque<Outbound>,
    front_written: usize,
    control_bytes: usize,
    telemetry_bytes: usize,
}

impl ClientOutbox {
    fn push_control(&mut self, line: &str, cap: usize) {
        let bytes = tagged_payload(REMOTE_CONTROL_PREFIX, line);
        if !self.make_room(LineClass::Control, bytes.len(), cap) {
            warn!(bytes = bytes.len(), cap, "buildport_control_line_dropped");
            return;
        }
        let insert_at = self
            .pending
            .iter()
            .enumerate()
            .skip(self.locked_front())
            .find(|(_, entry)| entry.class == LineClass::Telemetry)
            .map_or(self.pending.len(), |(index, _)| index);
        self.control_bytes += bytes.len();
        self.pending.insert(
            insert_at,
            Outbound {
                class: LineClass::Control,
                bytes,
            },
        );
    }

    fn push_telemetry(&mut self, line: &str, cap: usize) {
        let bytes = tagged_payload(REMOTE_TELEMETRY_PREFIX, line);
        if !self.make_room(LineClass::Telemetry, bytes.len(), cap) {
            return;
        }
        self.telemetry_bytes += bytes.len();
        self.pending.push_back(Outbound {
            class: LineClass::Telemetry,
            bytes,
        });
    }

    /// Evicts the oldest entries of `class` until `incoming` more bytes fit under `cap`.
    fn make_room(&mut self, class: LineClass, incoming: usize, cap: usize) -> bool {
        if incoming > cap {
            return false;
        }
        while self.queued_bytes(class) + incoming > cap {
            let Some(index) = self
                .pending
                .iter()
                .enumerate()
                .skip(self.locked_front())
                .find(|(_, entry)| entry.class == class)
                .map(|(index, _)| index)
            else {
                return false;
            };
            if let Some(evicted) = self.pending.remove(index) {
                self.release(evicted.class, evicted.bytes.len());
            }
        }
        true
    }

    fn locked_front(&self) -> usize {
        usize::from(self.front_written > 0)
    }

    fn queued_bytes(&self, class: LineClass) -> usize {
        match class {
            LineClass::Control => self.control_bytes,
            LineClass::Telemetry => self.telemetry_bytes,
        }
    }

    fn release(&mut self, class: LineClass, len: usize) {
        match class {
            LineClass::Control => self.control_bytes = self.control_bytes.saturating_sub(len),
            LineClass::Telemetry => {
                self.telemetry_bytes = self.telemetry_bytes.saturating_sub(len)
            }
        }
    }

    /// Writes until the sink would block; partial progress is kept for the next call.
    fn flush<W: Write>(&mut self, sink: &mut W) -> io::Result<()> {
        loop {
            let Some(front) = self.pending.front() else {
                return Ok(());
            };
            let total = front.bytes.len();
            match sink.write(&front.bytes[self.front_written..]) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "buildport_write_zero",
                    ))
                }
                Ok(written) => {
                    self.front_written += written;
                    if self.front_written >= total {
                        self.front_written = 0;
                        if let Some(done) = self.pending.pop_front() {
                            self.release(done.class, done.bytes.len());
                        }
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(err) => return Err(err),
            }
        }
    }
}

fn localhost_bind_addr(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

/// The console is on unless explicitly switched off with `0`.
fn parse_enabled_flag(raw: Option<&str>) -> bool {
    !matches!(raw.map(str::trim), Some("0"))
}

fn drain_complete_lines(buffer: &mut Vec<u8>, player: PlayerId, out: &mut Vec<RemoteLine>) {
    while let Some(newline_index) = buffer.iter().position(|byte| *byte == b'\n') {
        let mut line_bytes = buffer.drain(..=newline_index).collect::<Vec<u8>>();
        line_bytes.pop();
        if line_bytes.last() == Some(&b'\r') {
            line_bytes.pop();
        }

        match String::from_utf8(line_bytes) {
            Ok(text) => out.push(RemoteLine { player, text }),
            Err(err) => warn!(error = %err, %player, "buildport_invalid_utf8_line_dropped"),
        }
    }
}

fn tagged_payload(prefix: &str, line: &str) -> Vec<u8> {
    let mut payload = Vec::with_capacity(prefix.len() + line.len() + 1);
    payload.extend_from_slice(prefix.as_bytes());
    payload.extend_from_slice(line.as_bytes());
    payload.push(b'\n');
    payload
}

pub(crate) fn ready_line_text(port: u16) -> String {
    format!("buildport.ready v1 port:{port}")
}
