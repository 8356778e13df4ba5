use std::fs;
use std::io::{self, BufRead, BufReader, Write};
use std::net::TcpStream;
use std::thread;
use std::time::{Duration, Instant};

use buildops::{RelayRequest, TypeCatalog};

pub const DEFAULT_PORT: u16 = 46011;
pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_RETRY_MS: u64 = 100;
pub const DEFAULT_QUIET_MS: u64 = 250;
const MAX_RETRY_BACKOFF_MS: u64 = 1_000;
const READY_PAYLOAD_PREFIX: &str = "buildport.ready v1 port:";
const SYNC_COMMAND: &str = "sync";
const SYNC_ACK: &str = "ok: sync";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineChannel {
    Control,
    Telemetry,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLine {
    pub channel: LineChannel,
    pub payload: String,
}

impl ParsedLine {
    fn is_control(&self, matches: fn(&str) -> bool) -> bool {
        self.channel == LineChannel::Control && matches(&self.payload)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommonOptions {
    pub port: u16,
    pub timeout_ms: u64,
    pub retry_ms: u64,
    pub include_telemetry: bool,
}

impl Default for CommonOptions {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            retry_ms: DEFAULT_RETRY_MS,
            include_telemetry: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind {
    WaitReady,
    Send { command: String },
    Script { path: String, barrier: bool },
    Barrier,
    /// A relay request, sent as one `relay <json>` line.
    Relay(RelayRequest),
}

/// Splits `[options] <subcommand> [args]`. `Ok(None)` means help was requested.
pub fn parse_args(args: &[String]) -> Result<Option<(CommonOptions, CommandKind)>, String> {
    if matches!(args.first().map(String::as_str), Some("-h" | "--help")) {
        return Ok(None);
    }

    let mut options = CommonOptions::default();
    let mut index = 0usize;
    while let Some(flag) = args.get(index) {
        match flag.as_str() {
            "--port" => options.port = option_value(args, index, "--port", "u16")?,
            "--timeout-ms" => {
                options.timeout_ms = option_value(args, index, "--timeout-ms", "u64")?
            }
            "--retry-ms" => options.retry_ms = option_value(args, index, "--retry-ms", "u64")?,
            "--include-telemetry" => {
                options.include_telemetry = true;
                index += 1;
                continue;
            }
            _ => break,
        }
        index += 2;
    }

    let command = args
        .get(index)
        .ok_or_else(|| "missing subcommand".to_string())?;
    let rest = &args[index + 1..];
    let kind = match command.as_str() {
        "wait-ready" => {
            expect_no_args("wait-ready", rest)?;
            CommandKind::WaitReady
        }
        "send" => {
            if rest.is_empty() {
                return Err("send requires a command payload".to_string());
            }
            CommandKind::Send {
                command: rest.join(" "),
            }
        }
        "script" => {
            let (path, flags) = rest
                .split_first()
                .ok_or_else(|| "script requires a file path".to_string())?;
            let mut barrier = false;
            for flag in flags {
                if flag != "--barrier" {
                    return Err(format!(
                        "unknown script argument '{flag}' (expected --barrier)"
                    ));
                }
                barrier = true;
            }
            CommandKind::Script {
                path: path.clone(),
                barrier,
            }
        }
        "barrier" => {
            expect_no_args("barrier", rest)?;
            CommandKind::Barrier
        }
        "relay" => {
            if rest.is_empty() {
                return Err("relay requires a JSON message".to_string());
            }
            let request = RelayRequest::from_json(&rest.join(" "))
                .map_err(|error| format!("invalid relay message: {error}"))?;
            CommandKind::Relay(request)
        }
        "place-rect" => CommandKind::Relay(parse_place_rect(rest)?),
        "clear-queue" => {
            expect_no_args("clear-queue", rest)?;
            CommandKind::Relay(RelayRequest::ClearQueue)
        }
        other => return Err(format!("unknown subcommand '{other}'")),
    };
    Ok(Some((options, kind)))
}

fn option_value<T: std::str::FromStr>(
    args: &[String],
    index: usize,
    flag: &str,
    expected: &str,
) -> Result<T, String> {
    let value = args
        .get(index + 1)
        .ok_or_else(|| format!("missing value for {flag}"))?;
    value
        .parse::<T>()
        .map_err(|_| format!("invalid {flag} value '{value}' (expected {expected})"))
}

fn expect_no_args(command: &str, rest: &[String]) -> Result<(), String> {
    if rest.is_empty() {
        Ok(())
    } else {
        Err(format!("{command} takes no arguments"))
    }
}

/// `<x> <y> <w> <h> <tile>`; the tile may be a numeric id or a built-in name.
fn parse_place_rect(rest: &[String]) -> Result<RelayRequest, String> {
    let [x, y, width, height, tile] = rest else {
        return Err("place-rect requires <x> <y> <w> <h> <tile>".to_string());
    };
    let int = |label: &str, raw: &str| {
        raw.parse::<i32>()
            .map_err(|_| format!("invalid {label} '{raw}' (expected integer)"))
    };
    let size = |label: &str, raw: &str| {
        raw.parse::<u32>()
            .map_err(|_| format!("invalid {label} '{raw}' (expected non-negative integer)"))
    };
    let resolved = TypeCatalog::builtin().resolve_tile(tile);
    if resolved.fallback {
        return Err(format!("unknown tile '{tile}'"));
    }
    Ok(RelayRequest::EnqueueRect {
        x: int("x", x)?,
        y: int("y", y)?,
        width: size("width", width)?,
        height: size("height", height)?,
        tile_type: resolved.id,
    })
}

pub fn parse_wire_line(raw: &str) -> ParsedLine {
    let trimmed = raw.trim_end_matches(['\r', '\n']);
    let (channel, payload) = if let Some(payload) = trimmed.strip_prefix("C ") {
        (LineChannel::Control, payload)
    } else if let Some(payload) = trimmed.strip_prefix("T ") {
        (LineChannel::Telemetry, payload)
    } else {
        (LineChannel::Unknown, trimmed)
    };
    ParsedLine {
        channel,
        payload: payload.to_string(),
    }
}

pub fn should_print_line(line: &ParsedLine, include_telemetry: bool) -> bool {
    match line.channel {
        LineChannel::Control => true,
        LineChannel::Telemetry => include_telemetry,
        LineChannel::Unknown => false,
    }
}

pub fn is_ready_payload(payload: &str) -> bool {
    payload.starts_with(READY_PAYLOAD_PREFIX)
}

pub fn is_sync_ok_payload(payload: &str) -> bool {
    payload == SYNC_ACK
}

/// Non-empty lines that are not `#` comments, trimmed.
pub fn parse_script_commands(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(ToString::to_string)
        .collect()
}

pub fn run<W: Write>(kind: CommandKind, opts: CommonOptions, stdout: &mut W) -> Result<(), String> {
    let timeout = Duration::from_millis(opts.timeout_ms);
    let quiet = Duration::from_millis(DEFAULT_QUIET_MS);
    let mut emit = |line: &ParsedLine| {
        if should_print_line(line, opts.include_telemetry) {
            let _ = writeln!(stdout, "{}", line.payload);
        }
    };

    let mut session = Session::connect_and_wait_ready(
        opts.port,
        timeout,
        Duration::from_millis(opts.retry_ms.max(1)),
        &mut emit,
    )?;

    match kind {
        CommandKind::WaitReady => Ok(()),
        CommandKind::Send { command } => {
            session.send_line(&command)?;
            session.read_until_quiet(timeout, quiet, &mut emit)
        }
        CommandKind::Relay(request) => {
            let line = request
                .encode_line()
                .map_err(|error| format!("failed to encode relay message: {error}"))?;
            session.send_line(&line)?;
            session.read_until_quiet(timeout, quiet, &mut emit)
        }
        CommandKind::Script { path, barrier } => {
            let content = fs::read_to_string(&path)
                .map_err(|error| format!("failed to read script file '{path}': {error}"))?;
            for command in parse_script_commands(&content) {
                session.send_line(&command)?;
                session.read_until_quiet(timeout, quiet, &mut emit)?;
            }
            if barrier {
                session.barrier(timeout, &mut emit)?;
            }
            Ok(())
        }
        CommandKind::Barrier => session.barrier(timeout, &mut emit),
    }
}

enum ReadOutcome {
    Line(ParsedLine),
    NoData,
    Disconnected,
    DeadlineExceeded,
    IoError(io::Error),
}

struct Session {
    writer: TcpStream,
    reader: BufReader<TcpStream>,
}

impl Session {
    fn connect_and_wait_ready<F>(
        port: u16,
        timeout: Duration,
        retry_base: Duration,
        on_line: &mut F,
    ) -> Result<Self, String>
    where
        F: FnMut(&ParsedLine),
    {
        let deadline = Instant::now() + timeout;
        let mut attempt = 0u32;

        while Instant::now() < deadline {
            if let Ok(writer) = TcpStream::connect(("127.0.0.1", port)) {
                let mut session = Self::from_stream(writer)?;
                loop {
                    match session.read_line(deadline) {
                        ReadOutcome::Line(line) => {
                            on_line(&line);
                            if line.is_control(is_ready_payload) {
                                return Ok(session);
                            }
                        }
                        ReadOutcome::NoData => {}
                        ReadOutcome::Disconnected => break,
                        ReadOutcome::DeadlineExceeded => {
                            return Err(timeout_message(port));
                        }
                        ReadOutcome::IoError(error) => {
                            return Err(format!(
                                "socket read error while waiting for ready: {error}"
                            ));
                        }
                    }
                }
            }

            let backoff_ms = (retry_base.as_millis() as u64)
                .saturating_mul(1u64 << attempt.min(8))
                .min(MAX_RETRY_BACKOFF_MS)
                .max(1);
            let sleep_for = Duration::from_millis(backoff_ms);
            if Instant::now() + sleep_for >= deadline {
                break;
            }
            thread::sleep(sleep_for);
            attempt = attempt.saturating_add(1);
        }

        Err(timeout_message(port))
    }

    fn from_stream(writer: TcpStream) -> Result<Self, String> {
        writer
            .set_read_timeout(Some(Duration::from_millis(100)))
            .map_err(|error| format!("failed to set socket read timeout: {error}"))?;
        let reader = writer
            .try_clone()
            .map_err(|error| format!("failed to clone socket stream: {error}"))?;
        Ok(Self {
            writer,
            reader: BufReader::new(reader),
        })
    }

    fn send_line(&mut self, line: &str) -> Result<(), String> {
        let mut payload = String::with_capacity(line.len() + 1);
        payload.push_str(line);
        payload.push('\n');
        self.writer
            .write_all(payload.as_bytes())
            .and_then(|()| self.writer.flush())
            .map_err(|error| format!("failed to send command: {error}"))
    }

    fn read_line(&mut self, deadline: Instant) -> ReadOutcome {
        if Instant::now() >= deadline {
            return ReadOutcome::DeadlineExceeded;
        }
        let mut raw = String::new();
        match self.reader.read_line(&mut raw) {
            Ok(0) => ReadOutcome::Disconnected,
            Ok(_) => ReadOutcome::Line(parse_wire_line(&raw)),
            Err(error)
                if matches!(
                    error.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                ) =>
            {
                ReadOutcome::NoData
            }
            Err(error) => ReadOutcome::IoError(error),
        }
    }

    /// Sends `sync` and returns once the host acknowledges it; every earlier line has
    /// been answered by then.
    fn barrier<F>(&mut self, timeout: Duration, on_line: &mut F) -> Result<(), String>
    where
        F: FnMut(&ParsedLine),
    {
        self.send_line(SYNC_COMMAND)?;
        let deadline = Instant::now() + timeout;
        loop {
            match self.read_line(deadline) {
                ReadOutcome::Line(line) => {
                    on_line(&line);
                    if line.is_control(is_sync_ok_payload) {
                        return Ok(());
                    }
                }
                ReadOutcome::NoData => {}
                ReadOutcome::Disconnected => {
                    return Err("socket disconnected while waiting for barrier ack".to_string())
                }
                ReadOutcome::DeadlineExceeded => {
                    return Err(format!("timed out waiting for barrier ack ({SYNC_ACK})"))
                }
                ReadOutcome::IoError(error) => {
                    return Err(format!(
                        "socket read error while waiting for barrier ack: {error}"
                    ))
                }
            }
        }
    }

    /// Collects replies until the socket stays silent for `quiet_window`.
    fn read_until_quiet<F>(
        &mut self,
        timeout: Duration,
        quiet_window: Duration,
        on_line: &mut F,
    ) -> Result<(), String>
    where
        F: FnMut(&ParsedLine),
    {
        let deadline = Instant::now() + timeout;
        let mut last_control_at: Option<Instant> = None;

        loop {
            match self.read_line(deadline) {
                ReadOutcome::Line(line) => {
                    on_line(&line);
                    // Telemetry keeps flowing while idle, so only replies count.
                    if line.channel == LineChannel::Control {
                        last_control_at = Some(Instant::now());
                    }
                }
                ReadOutcome::NoData => {}
                ReadOutcome::Disconnected => {
                    return Err("socket disconnected while waiting for command output".to_string())
                }
                ReadOutcome::DeadlineExceeded => return Ok(()),
                ReadOutcome::IoError(error) => {
                    return Err(format!(
                        "socket read error while waiting for command output: {error}"
                    ))
                }
            }

            let now = Instant::now();
            let quiet_elapsed = match last_control_at {
                Some(at) => now.saturating_duration_since(at) >= quiet_window,
                None => now + quiet_window >= deadline,
            };
            if quiet_elapsed {
                return Ok(());
            }
        }
    }
}

fn timeout_message(port: u16) -> String {
    format!("timed out waiting for buildport ready on 127.0.0.1:{port}")
}

#[cfg(test)]
mod tests {
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;

    use buildops::TileTypeId;

    use super::*;

    const SESSION_TRANSCRIPT: &str = "\
C buildport.ready v1 port:46011\r
T buildport.frame v1 tick:1 queue:0 applied:0
C position 1 set to (0, 0)
C position 2 set to (3, 1)
C selection: Cuboid 4x2 (8 tiles)
T buildport.frame v1 tick:2 queue:0 applied:0
C enqueued 8 tiles to set to Stone (1)
T buildport.frame v1 tick:3 queue:0 applied:8
stray line without channel
C ok: sync
";

    fn args(raw: &[&str]) -> Vec<String> {
        raw.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn parse_wire_line_handles_channels_and_crlf() {
        assert_eq!(
            parse_wire_line("C ok: sync\r\n"),
            ParsedLine {
                channel: LineChannel::Control,
                payload: "ok: sync".to_string(),
            }
        );
        assert_eq!(
            parse_wire_line("T buildport.frame v1 tick:1 queue:0 applied:0\n").channel,
            LineChannel::Telemetry
        );
        assert_eq!(
            parse_wire_line("unknown line\r\n"),
            ParsedLine {
                channel: LineChannel::Unknown,
                payload: "unknown line".to_string(),
            }
        );
    }

    #[test]
    fn transcript_filters_to_control_output_by_default() {
        let lines = SESSION_TRANSCRIPT
            .lines()
            .map(parse_wire_line)
            .collect::<Vec<_>>();
        let printed = lines
            .iter()
            .filter(|line| should_print_line(line, false))
            .map(|line| line.payload.as_str())
            .collect::<Vec<_>>();
        assert_eq!(
            printed,
            vec![
                "buildport.ready v1 port:46011",
                "position 1 set to (0, 0)",
                "position 2 set to (3, 1)",
                "selection: Cuboid 4x2 (8 tiles)",
                "enqueued 8 tiles to set to Stone (1)",
                "ok: sync",
            ]
        );

        let with_telemetry = lines
            .iter()
            .filter(|line| should_print_line(line, true))
            .count();
        assert_eq!(with_telemetry, 9);
    }

    #[test]
    fn transcript_scan_finds_ready_before_barrier_ack() {
        let lines = SESSION_TRANSCRIPT
            .lines()
            .map(parse_wire_line)
            .collect::<Vec<_>>();
        let ready = lines
            .iter()
            .position(|line| line.is_control(is_ready_payload))
            .expect("ready");
        let ack = lines
            .iter()
            .position(|line| line.is_control(is_sync_ok_payload))
            .expect("ack");
        assert!(ready < ack);
        assert!(!is_sync_ok_payload("ok: queue cleared (0 removed)"));
        assert!(!is_ready_payload("buildport.frame v1 tick:1 queue:0 applied:0"));
    }

    #[test]
    fn parse_script_commands_ignores_blank_and_comment_lines() {
        let content = "
            # outline a hut
            bo_pos1 10 10

            bo_pos2 20 16
            bo_walls wood
            # done
        ";
        assert_eq!(
            parse_script_commands(content),
            vec!["bo_pos1 10 10", "bo_pos2 20 16", "bo_walls wood"]
        );
    }

    #[test]
    fn args_parse_options_and_subcommands() {
        let (options, kind) = parse_args(&args(&[
            "--port",
            "47000",
            "--include-telemetry",
            "script",
            "build.txt",
            "--barrier",
        ]))
        .expect("parse")
        .expect("command");
        assert_eq!(options.port, 47000);
        assert!(options.include_telemetry);
        assert_eq!(options.timeout_ms, DEFAULT_TIMEOUT_MS);
        assert_eq!(
            kind,
            CommandKind::Script {
                path: "build.txt".to_string(),
                barrier: true
            }
        );

        let (_, kind) = parse_args(&args(&["send", "bo_sel", "sphere"]))
            .expect("parse")
            .expect("command");
        assert_eq!(
            kind,
            CommandKind::Send {
                command: "bo_sel sphere".to_string()
            }
        );
        assert_eq!(parse_args(&args(&["--help"])).expect("parse"), None);
    }

    #[test]
    fn args_build_relay_requests() {
        let (_, kind) = parse_args(&args(&["place-rect", "5", "-2", "12", "6", "graybrick"]))
            .expect("parse")
            .expect("command");
        assert_eq!(
            kind,
            CommandKind::Relay(RelayRequest::EnqueueRect {
                x: 5,
                y: -2,
                width: 12,
                height: 6,
                tile_type: TileTypeId(38),
            })
        );

        let (_, kind) = parse_args(&args(&["clear-queue"]))
            .expect("parse")
            .expect("command");
        assert_eq!(kind, CommandKind::Relay(RelayRequest::ClearQueue));

        let (_, kind) = parse_args(&args(&["relay", r#"{"type":"place_single_tile","x":1,"y":2}"#]))
            .expect("parse")
            .expect("command");
        assert_eq!(
            kind,
            CommandKind::Relay(RelayRequest::PlaceSingleTile {
                x: 1,
                y: 2,
                tile_type: TileTypeId(1),
            })
        );
    }

    #[test]
    fn args_reject_bad_input() {
        for bad in [
            vec![],
            vec!["--port", "70000", "barrier"],
            vec!["--timeout-ms"],
            vec!["barrier", "now"],
            vec!["place-rect", "1", "2", "3"],
            vec!["place-rect", "1", "2", "3", "4", "unobtainium"],
            vec!["relay", "{not json"],
            vec!["teleport"],
        ] {
            assert!(parse_args(&args(&bad)).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn relay_command_round_trip_against_fake_host() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("addr").port();
        let host = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept");
            stream
                .write_all(format!("C buildport.ready v1 port:{port}\n").as_bytes())
                .expect("ready");
            let mut reader = BufReader::new(stream.try_clone().expect("clone"));
            let mut received = String::new();
            reader.read_line(&mut received).expect("read");
            stream
                .write_all(b"T buildport.frame v1 tick:9 queue:0 applied:0\nC ok: queue cleared (3 removed)\n")
                .expect("reply");
            // Hold the connection open until the client hangs up.
            let mut rest = String::new();
            let _ = reader.read_line(&mut rest);
            received
        });

        let options = CommonOptions {
            port,
            timeout_ms: 2_000,
            ..CommonOptions::default()
        };
        let mut stdout = Vec::new();
        run(
            CommandKind::Relay(RelayRequest::ClearQueue),
            options,
            &mut stdout,
        )
        .expect("run");

        let received = host.join().expect("host thread");
        assert_eq!(received, "relay {\"type\":\"clear_queue\"}\n");
        assert_eq!(
            String::from_utf8_lossy(&stdout),
            format!("buildport.ready v1 port:{port}\nok: queue cleared (3 removed)\n")
        );
    }
}
