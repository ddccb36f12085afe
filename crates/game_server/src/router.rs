//! Destination resolution and delivery.
//!
//! The router turns an address — explicit service id, the player sentinel
//! plus a side-channel player id, or a service name — into the live agent
//! and enqueues through its channel. It never calls into an actor
//! directly, and a send that resolves back to its own source is dropped by
//! design: re-entrant self-delivery through one's own channel is the
//! classic way to deadlock a full mailbox.

use crate::gateway::Gateway;
use actor_system::{PacketHandle, PlayerId, PlayerTask, Router, ServiceId, ServiceTask};
use service_system::ServiceRegistry;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Router over the service registry and the gateway.
pub struct MessageRouter {
    registry: Arc<ServiceRegistry>,
    gateway: Arc<Gateway>,
}

impl MessageRouter {
    pub fn new(registry: Arc<ServiceRegistry>, gateway: Arc<Gateway>) -> Arc<Self> {
        Arc::new(Self { registry, gateway })
    }

    fn deliver_package(&self, source: ServiceId, target: ServiceId, pkg: PacketHandle) {
        if target <= 0 {
            return;
        }
        if target == source {
            // Self-sends are a no-op by design.
            trace!(service = target, "self-targeted package dropped");
            return;
        }
        match self.registry.find(target) {
            Some(ctx) => {
                trace!(source, target, id = pkg.id(), "package routed");
                if let Err(err) = ctx.post_package(pkg) {
                    debug!(service = target, %err, "package not accepted");
                }
            }
            None => debug!(service = target, "package for unknown service"),
        }
    }
}

impl Router for MessageRouter {
    fn post_package(&self, source: ServiceId, pkg: PacketHandle) {
        let target = pkg.target();
        self.deliver_package(source, target, pkg);
    }

    fn post_package_named(&self, source: ServiceId, name: &str, pkg: PacketHandle) {
        let Some(target) = self.registry.resolve_name(name) else {
            debug!(name, "package for unknown service name");
            return;
        };
        let mut pkg = pkg;
        if let Some(p) = pkg.get_mut() {
            p.set_target(target);
        }
        self.deliver_package(source, target, pkg);
    }

    fn post_service_task(&self, source: ServiceId, target: ServiceId, task: ServiceTask) {
        if target <= 0 || target == source {
            return;
        }
        match self.registry.find(target) {
            Some(ctx) => {
                if let Err(err) = ctx.post_task(task) {
                    debug!(service = target, %err, "task not accepted");
                }
            }
            None => debug!(service = target, "task for unknown service"),
        }
    }

    fn post_service_task_named(&self, source: ServiceId, name: &str, task: ServiceTask) {
        match self.registry.resolve_name(name) {
            Some(target) => self.post_service_task(source, target, task),
            None => debug!(name, "task for unknown service name"),
        }
    }

    fn send_to_player(&self, pid: PlayerId, pkg: PacketHandle) {
        match self.gateway.find_agent(pid) {
            Some(agent) => {
                if let Err(err) = agent.post_package(pkg) {
                    debug!(player = pid, %err, "player package not accepted");
                }
            }
            None => warn!(player = pid, "package for offline player"),
        }
    }

    fn post_player_task(&self, pid: PlayerId, task: PlayerTask) {
        match self.gateway.find_agent(pid) {
            Some(agent) => {
                if let Err(err) = agent.post_task(task) {
                    debug!(player = pid, %err, "player task not accepted");
                }
            }
            None => warn!(player = pid, "task for offline player"),
        }
    }

    fn send_to_client(&self, pid: PlayerId, pkg: PacketHandle) {
        match self.gateway.find_agent(pid) {
            Some(agent) => agent.send_to_client(pkg),
            None => warn!(player = pid, "client send for offline player"),
        }
    }
}
