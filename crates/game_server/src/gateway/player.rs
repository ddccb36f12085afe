//! Player actor creation.
//!
//! Player logic normally lives in a loaded module exposing the
//! `create_player`/`destroy_player` pair; deployments without one (and the
//! test suites) fall back to the built-in [`BasicPlayer`].

use crate::error::ServerError;
use actor_system::{Actor, ActorHost, Packet, Player, PlayerId};
use service_system::{PlayerInstance, ServiceLibrary};
use std::path::Path;
use tracing::debug;

/// Source of fresh player actor instances.
pub enum PlayerFactory {
    /// Instances come from a loaded module's creation symbol.
    Module(ServiceLibrary),
    /// Instances come from an in-process constructor.
    Local(Box<dyn Fn() -> PlayerInstance + Send + Sync>),
}

impl PlayerFactory {
    /// Load the player module at `path`.
    pub fn module(path: impl AsRef<Path>) -> Result<Self, ServerError> {
        Ok(Self::Module(ServiceLibrary::load(path)?))
    }

    /// Factory producing the built-in player.
    pub fn basic() -> Self {
        Self::Local(Box::new(|| {
            PlayerInstance::local(Box::new(BasicPlayer::default()))
        }))
    }

    pub fn create(&self) -> Result<PlayerInstance, ServerError> {
        match self {
            Self::Module(library) => Ok(library.create_player()?),
            Self::Local(make) => Ok(make()),
        }
    }
}

/// Minimal in-process player actor.
///
/// Carries just enough state to exercise the session lifecycle: its bound
/// identity, a login counter and the count of packages it has seen. Real
/// deployments replace this with a loaded module.
#[derive(Default)]
pub struct BasicPlayer {
    pid: PlayerId,
    logins: u64,
    packages: u64,
}

impl BasicPlayer {
    pub fn logins(&self) -> u64 {
        self.logins
    }

    pub fn packages(&self) -> u64 {
        self.packages
    }
}

impl Actor for BasicPlayer {
    fn on_package(&mut self, _host: &ActorHost, pkg: &Packet) {
        self.packages += 1;
        debug!(player = self.pid, package = pkg.id(), "package received");
    }
}

impl Player for BasicPlayer {
    fn player_id(&self) -> PlayerId {
        self.pid
    }

    fn bind(&mut self, pid: PlayerId) {
        self.pid = pid;
    }

    fn on_login(&mut self, _host: &ActorHost) {
        self.logins += 1;
    }
}
