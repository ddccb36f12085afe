//! Game-world service module.
//!
//! A small but complete loadable service: it tracks which players have
//! entered the world, answers enter/leave/roster requests, and announces
//! population changes on the event bus. Compiled as a `cdylib`, it is
//! loaded by the server's service registry through the
//! `create_service`/`destroy_service` pair generated by
//! [`actor_system::export_service!`].

use actor_system::{
    export_service, Actor, ActorHost, EventParam, Packet, Player, PlayerId, Service,
    PLAYER_TARGET_ID,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Request: a player enters the world.
pub const ENTER_WORLD_PACKAGE_ID: u32 = 2001;

/// Request: a player leaves the world.
pub const LEAVE_WORLD_PACKAGE_ID: u32 = 2002;

/// Request: the current world roster.
pub const QUERY_ROSTER_PACKAGE_ID: u32 = 2003;

/// Response carrying the roster.
pub const ROSTER_PACKAGE_ID: u32 = 2004;

/// Event type raised when the world population changes.
pub const WORLD_POPULATION_EVENT: u32 = 31;

#[derive(Serialize, Deserialize)]
struct EnterRequest {
    player_id: PlayerId,
    #[serde(default)]
    zone: String,
}

#[derive(Serialize, Deserialize)]
struct RosterResponse {
    population: usize,
    players: Vec<PlayerId>,
}

/// Population-change notification.
pub struct PopulationEvent {
    pub population: usize,
}

impl EventParam for PopulationEvent {
    fn event_type(&self) -> u32 {
        WORLD_POPULATION_EVENT
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

struct Presence {
    zone: String,
    entered_at: Instant,
}

/// The world service actor.
pub struct WorldService {
    name: String,
    world: HashMap<PlayerId, Presence>,
    ticks: u64,
}

impl WorldService {
    pub fn new() -> Self {
        Self {
            name: "world".to_string(),
            world: HashMap::new(),
            ticks: 0,
        }
    }

    fn announce_population(&self, host: &ActorHost) {
        host.dispatch_event(Arc::new(PopulationEvent {
            population: self.world.len(),
        }));
    }

    fn send_roster(&self, host: &ActorHost, pid: PlayerId) {
        let response = RosterResponse {
            population: self.world.len(),
            players: self.world.keys().copied().collect(),
        };
        let Ok(payload) = serde_json::to_vec(&response) else {
            return;
        };

        match host.build_package() {
            Ok(mut pkg) => {
                if let Some(p) = pkg.get_mut() {
                    p.set_id(ROSTER_PACKAGE_ID)
                        .set_source(host.agent_id() as i32)
                        .set_target(PLAYER_TARGET_ID)
                        .set_payload(&payload);
                }
                host.send_to_player(pid, pkg);
            }
            Err(err) => warn!(%err, "roster package unavailable"),
        }
    }
}

impl Default for WorldService {
    fn default() -> Self {
        Self::new()
    }
}

impl Actor for WorldService {
    fn on_package(&mut self, host: &ActorHost, pkg: &Packet) {
        match pkg.id() {
            ENTER_WORLD_PACKAGE_ID => {
                let Ok(request) = serde_json::from_slice::<EnterRequest>(pkg.payload()) else {
                    debug!("malformed enter request");
                    return;
                };
                info!(player = request.player_id, zone = request.zone, "player entered world");
                self.world.insert(
                    request.player_id,
                    Presence {
                        zone: request.zone,
                        entered_at: Instant::now(),
                    },
                );
                self.announce_population(host);
                self.send_roster(host, request.player_id);
            }
            LEAVE_WORLD_PACKAGE_ID => {
                let Ok(request) = serde_json::from_slice::<EnterRequest>(pkg.payload()) else {
                    return;
                };
                if let Some(presence) = self.world.remove(&request.player_id) {
                    info!(
                        player = request.player_id,
                        zone = presence.zone,
                        seconds = presence.entered_at.elapsed().as_secs(),
                        "player left world"
                    );
                    self.announce_population(host);
                }
            }
            QUERY_ROSTER_PACKAGE_ID => {
                let Ok(request) = serde_json::from_slice::<EnterRequest>(pkg.payload()) else {
                    return;
                };
                self.send_roster(host, request.player_id);
            }
            other => debug!(package = other, "unhandled package"),
        }
    }

    fn on_tick(&mut self, _host: &ActorHost, _at: Instant, _delta: Duration) {
        self.ticks += 1;
    }

    fn stop(&mut self, _host: &ActorHost) {
        info!(
            population = self.world.len(),
            ticks = self.ticks,
            "world service stopping"
        );
        self.world.clear();
    }
}

impl Service for WorldService {
    fn name(&self) -> &str {
        &self.name
    }

    fn on_boot(&mut self, host: &ActorHost) {
        host.listen_event(WORLD_POPULATION_EVENT);
        info!("world service booted");
    }
}

export_service!(WorldService);

/// A companion player actor showing the player-module side of the
/// contract. Real deployments ship this from its own module; bundling one
/// here keeps the demo self-contained.
pub struct WorldPlayer {
    pid: PlayerId,
    zone: String,
    packages: u64,
}

impl WorldPlayer {
    pub fn new() -> Self {
        Self {
            pid: 0,
            zone: String::new(),
            packages: 0,
        }
    }
}

impl Default for WorldPlayer {
    fn default() -> Self {
        Self::new()
    }
}

impl Actor for WorldPlayer {
    fn on_package(&mut self, _host: &ActorHost, pkg: &Packet) {
        self.packages += 1;
        if pkg.id() == ROSTER_PACKAGE_ID {
            debug!(player = self.pid, "roster received");
        }
    }
}

impl Player for WorldPlayer {
    fn player_id(&self) -> PlayerId {
        self.pid
    }

    fn bind(&mut self, pid: PlayerId) {
        self.pid = pid;
    }

    fn on_login(&mut self, _host: &ActorHost) {
        self.zone = "plaza".to_string();
    }

    fn save(&mut self, _host: &ActorHost) {
        debug!(
            player = self.pid,
            zone = self.zone,
            packages = self.packages,
            "player state flushed"
        );
    }
}

actor_system::export_player!(WorldPlayer);
