use std::process::ExitCode;
use std::thread;
use std::time::{Duration, Instant};

use buildops::{
    is_relay_line, BuilderConsole, CatalogError, ChangeLog, ConfigError, Dispatch, DrainReport,
    FixedStepClock, LoopConfig, MetricsAccumulator, MetricsHandle, PlayerId, RelayRequest,
    TileGrid, TileGridError, WorldService,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::bootstrap::HostWiring;
use super::buildport::Buildport;

const SYNC_COMMAND: &str = "sync";
const SYNC_ACK: &str = "ok: sync";
const STATUS_COMMAND: &str = "status";

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error("failed to load builder settings: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to load type catalog: {0}")]
    Catalog(#[from] CatalogError),
    #[error("failed to create tile world: {0}")]
    World(#[from] TileGridError),
}

pub(crate) fn run(wiring: HostWiring) -> ExitCode {
    let mut host = HostLoop::new(wiring, Instant::now());
    info!(
        target_tps = host.config.target_tps,
        max_frame_delta_ms = host.config.max_frame_delta.as_millis() as u64,
        max_ticks_per_frame = host.config.max_ticks_per_frame,
        metrics_log_interval_ms = host.config.metrics_log_interval.as_millis() as u64,
        buildport_port = ?host.buildport.bound_port(),
        "loop_config"
    );

    loop {
        host.run_frame(Instant::now());
        thread::sleep(host.clock.until_next_tick().max(Duration::from_millis(1)));
    }
}

/// Fixed-rate host: pumps console lines, drains the placement queue and reports progress.
pub(crate) struct HostLoop {
    config: LoopConfig,
    service: WorldService,
    world: TileGrid,
    console: BuilderConsole,
    buildport: Buildport,
    changes: ChangeLog,
    clock: FixedStepClock,
    metrics: MetricsAccumulator,
    metrics_handle: MetricsHandle,
}

impl HostLoop {
    pub(crate) fn new(wiring: HostWiring, now: Instant) -> Self {
        let config = wiring.config.normalized();
        Self {
            clock: FixedStepClock::new(&config, now),
            metrics: MetricsAccumulator::new(config.metrics_log_interval, now),
            metrics_handle: MetricsHandle::default(),
            changes: ChangeLog::default(),
            service: wiring.service,
            world: wiring.world,
            console: wiring.console,
            buildport: wiring.buildport,
            config,
        }
    }

    /// One pass of the host loop. Returns the summed drain report of the ticks that ran.
    pub(crate) fn run_frame(&mut self, now: Instant) -> DrainReport {
        let outcome = self.buildport.poll();
        for line in outcome.lines {
            let replies = self.handle_line(line.player, &line.text);
            if !replies.is_empty() {
                let departed = self.buildport.reply(line.player, &replies);
                self.forget_players(&departed);
            }
        }
        self.forget_players(&outcome.departed);

        let (_, plan) = self.clock.advance(now);
        let mut frame_report = DrainReport::default();
        for _ in 0..plan.ticks_to_run {
            let report = self.service.tick(&mut self.world, &mut self.changes);
            self.metrics.record_tick(&report);
            frame_report.dequeued += report.dequeued;
            frame_report.applied += report.applied;
            frame_report.failed += report.failed;
        }

        if plan.ticks_to_run > 0 {
            let changed_regions = self.changes.take().len();
            if changed_regions > 0 {
                debug!(changed_regions, "world_regions_changed");
            }
            let departed = self.buildport.send_frame(&frame_line(
                self.service.ticks(),
                self.service.queue_len(),
                frame_report.applied,
            ));
            self.forget_players(&departed);
        }

        if let Some(snapshot) = self.metrics.maybe_snapshot(now, self.service.queue_len()) {
            self.metrics_handle.publish(snapshot);
            info!(
                tps = snapshot.tps,
                edits_applied_per_second = snapshot.edits_applied_per_second,
                edits_failed_per_second = snapshot.edits_failed_per_second,
                queue_len = snapshot.queue_len,
                clients = self.buildport.client_count(),
                "loop_metrics"
            );
        }

        frame_report
    }

    /// Routes one console line: barrier acks, status, relayed requests, then builder commands.
    pub(crate) fn handle_line(&mut self, player: PlayerId, line: &str) -> Vec<String> {
        let trimmed = line.trim();
        if trimmed == SYNC_COMMAND {
            return vec![SYNC_ACK.to_string()];
        }
        if trimmed.eq_ignore_ascii_case(STATUS_COMMAND) {
            return vec![status_line(
                &self.metrics_handle,
                self.service.ticks(),
                self.service.queue_len(),
            )];
        }
        if is_relay_line(trimmed) {
            return vec![self.handle_relay_line(player, trimmed)];
        }
        self.console
            .execute_line(&mut self.service, &self.world, player, trimmed)
    }

    fn handle_relay_line(&mut self, player: PlayerId, line: &str) -> String {
        let request = match RelayRequest::decode_line(line) {
            Ok(request) => request,
            Err(err) => {
                warn!(error = %err, %player, "relay_line_rejected");
                return format!("error: {err}");
            }
        };
        match self.service.handle_relay(request, &self.world) {
            Ok(dispatch) => describe_dispatch(dispatch),
            Err(err) => format!("error: {err}"),
        }
    }

    fn forget_players(&mut self, players: &[PlayerId]) {
        for player in players {
            self.service.player_left(*player);
        }
    }
}

fn describe_dispatch(dispatch: Dispatch) -> String {
    match dispatch {
        Dispatch::Enqueued(summary) => format!(
            "ok: enqueued {} edits over {} tiles",
            summary.edits, summary.coordinates
        ),
        Dispatch::Cleared(removed) => format!("ok: queue cleared ({removed} removed)"),
        Dispatch::Relayed => "ok: relayed".to_string(),
    }
}

/// Last published metrics window plus the live tick and queue counters.
fn status_line(metrics: &MetricsHandle, tick: u64, queue_len: usize) -> String {
    let snapshot = metrics.snapshot();
    format!(
        "ok: status tick:{tick} queue:{queue_len} tps:{:.1} applied_per_s:{:.1} failed_per_s:{:.1} windows:{}",
        snapshot.tps,
        snapshot.edits_applied_per_second,
        snapshot.edits_failed_per_second,
        metrics.publications()
    )
}

fn frame_line(tick: u64, queue_len: usize, applied: usize) -> String {
    format!("buildport.frame v1 tick:{tick} queue:{queue_len} applied:{applied}")
}

#[cfg(test)]
mod tests {
    use std::io::{self, Read, Write};
    use std::net::TcpStream;

    use buildops::{BuilderSettings, TilePos, TileTypeId, TypeCatalog};

    use super::*;

    fn host_with(buildport: Buildport, settings: BuilderSettings) -> (HostLoop, Instant) {
        let config = LoopConfig {
            target_tps: 50,
            world_width: 64,
            world_height: 32,
            ..LoopConfig::default()
        };
        let world = TileGrid::new(config.world_width, config.world_height).expect("world");
        let wiring = HostWiring {
            config,
            service: WorldService::authoritative(settings, TypeCatalog::builtin()),
            world,
            console: BuilderConsole::new(),
            buildport,
        };
        let start = Instant::now();
        (HostLoop::new(wiring, start), start)
    }

    fn offline_host() -> (HostLoop, Instant) {
        host_with(Buildport::disabled(), BuilderSettings::default())
    }

    #[test]
    fn sync_is_acknowledged_in_order() {
        let (mut host, _) = offline_host();
        assert_eq!(host.handle_line(PlayerId(1), " sync "), vec!["ok: sync"]);
    }

    #[test]
    fn console_commands_run_against_the_players_selection() {
        let (mut host, _) = offline_host();
        host.handle_line(PlayerId(1), "bo_pos1 2 2");
        let out = host.handle_line(PlayerId(1), "/bo_pos2 4 3");
        assert_eq!(out[0], "position 2 set to (4, 3)");
        assert!(host.service.selection(PlayerId(2)).is_none());

        let out = host.handle_line(PlayerId(1), "bo_set grass");
        assert_eq!(out, vec!["enqueued 6 tiles to set to Grass (2)"]);
        assert_eq!(host.service.queue_len(), 6);
    }

    #[test]
    fn relay_lines_reach_the_service() {
        let (mut host, _) = offline_host();
        let out = host.handle_line(
            PlayerId(3),
            r#"relay {"type":"enqueue_rect","x":0,"y":0,"width":3,"height":2,"tile_type":30}"#,
        );
        assert_eq!(out, vec!["ok: enqueued 6 edits over 6 tiles"]);

        let out = host.handle_line(PlayerId(3), r#"relay {"type":"clear_queue"}"#);
        assert_eq!(out, vec!["ok: queue cleared (6 removed)"]);

        let out = host.handle_line(PlayerId(3), "relay {not json");
        assert!(out[0].starts_with("error: decode relay message"));
    }

    #[test]
    fn frames_drain_the_queue_at_the_fixed_rate() {
        let settings = BuilderSettings {
            tiles_per_tick: 4,
            ..BuilderSettings::default()
        };
        let (mut host, start) = host_with(Buildport::disabled(), settings);
        host.handle_line(PlayerId(1), "bo_place 0 0 5 2 stone");
        assert_eq!(host.service.queue_len(), 10);

        let report = host.run_frame(start + Duration::from_millis(10));
        assert_eq!(report, DrainReport::default());

        // 45ms at 50 tps is two ticks of four tiles each.
        let report = host.run_frame(start + Duration::from_millis(45));
        assert_eq!(report.applied, 8);
        assert_eq!(host.service.queue_len(), 2);

        let report = host.run_frame(start + Duration::from_millis(65));
        assert_eq!(report.applied, 2);
        assert!(host.service.queue().is_empty());
        assert_eq!(host.world.tile_at(TilePos::new(4, 1)), Some(TileTypeId(1)));
        assert_eq!(host.world.occupied_tile_count(), 10);
    }

    #[test]
    fn status_reports_published_metrics() {
        let (mut host, start) = offline_host();
        assert_eq!(
            host.handle_line(PlayerId(1), "status"),
            vec!["ok: status tick:0 queue:0 tps:0.0 applied_per_s:0.0 failed_per_s:0.0 windows:0"]
        );

        host.handle_line(PlayerId(1), "bo_place 0 0 2 2");
        host.run_frame(start + Duration::from_millis(500));
        host.run_frame(start + Duration::from_millis(1000));

        let snapshot = host.metrics_handle.snapshot();
        assert!(snapshot.tps > 0.0);
        assert!(snapshot.edits_applied_per_second > 0.0);
        assert_eq!(snapshot.queue_len, 0);

        let status = host.handle_line(PlayerId(2), " STATUS ");
        assert_eq!(status.len(), 1);
        assert!(status[0].starts_with(&format!("ok: status tick:{} queue:0 tps:", host.service.ticks())));
        assert!(status[0].ends_with("failed_per_s:0.0 windows:1"));
    }

    #[test]
    fn remote_session_round_trip_and_disconnect_cleanup() {
        let buildport = Buildport::bound_localhost(0).expect("bind");
        let port = buildport.bound_port().expect("port");
        let (mut host, start) = host_with(buildport, BuilderSettings::default());

        let mut client = TcpStream::connect(("127.0.0.1", port)).expect("connect");
        client
            .set_nonblocking(true)
            .expect("set_nonblocking_client");
        client
            .write_all(b"bo_center 10 10\nbo_radius 3\nsync\n")
            .expect("write");

        let mut received = Vec::new();
        let mut now = start;
        for _ in 0..60 {
            now += Duration::from_millis(5);
            host.run_frame(now);
            let mut chunk = [0u8; 512];
            match client.read(&mut chunk) {
                Ok(bytes_read) if bytes_read > 0 => {
                    received.extend_from_slice(&chunk[..bytes_read]);
                }
                Ok(_) => {}
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
                Err(err) => panic!("unexpected read error: {err}"),
            }
            if String::from_utf8_lossy(&received).contains("C ok: sync\n") {
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }

        let text = String::from_utf8_lossy(&received).to_string();
        assert!(text.contains("C buildport.ready v1 port:"));
        assert!(text.contains("C sphere center set to (10, 10)\n"));
        let center_at = text.find("C sphere center set").expect("center reply");
        let sync_at = text.find("C ok: sync").expect("sync reply");
        assert!(center_at < sync_at);
        assert!(host.service.selection(PlayerId(1)).is_some());

        drop(client);
        for _ in 0..40 {
            now += Duration::from_millis(5);
            host.run_frame(now);
            if host.service.selection(PlayerId(1)).is_none() {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!("selection was not discarded after disconnect");
    }
}
