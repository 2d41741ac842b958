//! Migration coordinator: the router between gateways and shards.
//!
//! Keeps the client → shard table, opens and closes sessions, and turns a
//! shard's migration request into a detach on the origin followed by an
//! attach-with-state on the target.
//!
//! # Invariants
//! - A client is routed to at most one shard.
//! - A migration request is honoured only if its origin is the client's
//!   current shard and no other migration is in flight.
//! - Rejected requests are logged and dropped; they never stop the router.

mod coordinator;
mod link;

pub use coordinator::{CoordinatorStats, MigrationCoordinator, MigrationError, Route};
pub use link::{ClientNotifier, LinkClosed, LogNotifier, ShardLink};

pub fn crate_info() -> &'static str {
    "meridian-coord v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use glam::Vec3;
    use meridian_common::{ClientId, ZoneId};
    use meridian_net::{Body, ClientInput, Envelope, MSG_CLIENT_ENVELOPE, ServerInfo, send_envelope};
    use meridian_shard::{ClientRings, Shard, ShardConfig};
    use meridian_stream::ZoneManager;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("coord"));
    }

    #[test]
    fn live_shards_hand_over_player() {
        let mut zones = ZoneManager::new("test");
        zones.init_linear_x(2, 512.0).unwrap();
        let config = ShardConfig {
            snapshot_hz: 30.0,
            ..ShardConfig::default()
        };

        let mut coord = MigrationCoordinator::new(LogNotifier);
        let mut shards = Vec::new();
        let mut inboxes = Vec::new();
        for z in 0..2 {
            let mut shard = Shard::new(ZoneId(z), zones.clone(), config.clone()).unwrap();
            shard.start();
            shards.push(shard);
            let (tx, rx) = unbounded();
            coord.add_shard(ZoneId(z), tx);
            inboxes.push(rx);
        }

        let client = ClientId::new();
        let (mut gw, rings) = ClientRings::pair(256 * 1024).unwrap();
        coord
            .open_client(client, "gw", ZoneId(0), rings, Some(Vec3::new(511.0, 0.0, 0.0)))
            .unwrap();
        let input = Envelope::new(
            1,
            Body::ClientInput(ClientInput {
                seq: 1,
                move_dir: Vec3::X,
                view_dir: Vec3::X,
                buttons: 0,
                analog1: 0.0,
                analog2: 0.0,
            }),
        );
        send_envelope(&mut gw.input, MSG_CLIENT_ENVELOPE, 0, &input).unwrap();

        for _ in 0..20 {
            for (shard, inbox) in shards.iter_mut().zip(&inboxes) {
                for cmd in inbox.try_iter() {
                    shard.handle_command(cmd).unwrap();
                }
                shard.tick().unwrap();
                for event in shard.drain_events() {
                    coord.handle_event(event).unwrap();
                }
            }
        }

        assert_eq!(coord.route(client).unwrap().shard, ZoneId(1));
        assert_eq!(coord.stats().migrations_completed, 1);
        assert_eq!(shards[0].client_count(), 0);
        assert_eq!(shards[0].world().entity_count(), 0);
        assert_eq!(shards[1].client_count(), 1);

        let entity = shards[1].client(client).unwrap().entity;
        let pos = shards[1].kit().position(shards[1].world(), entity).unwrap().unwrap();
        assert!(pos.x >= 512.0);

        let infos: Vec<u32> = gw
            .output
            .by_ref()
            .filter_map(|m| match Envelope::decode(&m.payload).unwrap().body {
                Body::ServerInfo(ServerInfo { world_id }) => Some(world_id),
                _ => None,
            })
            .collect();
        assert_eq!(infos, vec![0, 1]);
    }

    #[test]
    fn rejected_migration_succeeds_once_target_appears() {
        let mut zones = ZoneManager::new("test");
        zones.init_linear_x(2, 512.0).unwrap();
        let mut coord = MigrationCoordinator::new(LogNotifier);
        let mut shards = Vec::new();
        let mut links = Vec::new();
        let mut inboxes = Vec::new();
        for z in 0..2 {
            let mut shard = Shard::new(ZoneId(z), zones.clone(), ShardConfig::default()).unwrap();
            shard.start();
            shards.push(shard);
            let (tx, rx) = unbounded();
            links.push(tx);
            inboxes.push(rx);
        }
        coord.add_shard(ZoneId(0), links[0].clone());

        let client = ClientId::new();
        let (mut gw, rings) = ClientRings::pair(256 * 1024).unwrap();
        coord
            .open_client(client, "gw", ZoneId(0), rings, Some(Vec3::new(511.5, 0.0, 0.0)))
            .unwrap();
        let input = Envelope::new(
            1,
            Body::ClientInput(ClientInput {
                seq: 1,
                move_dir: Vec3::X,
                view_dir: Vec3::X,
                buttons: 0,
                analog1: 0.0,
                analog2: 0.0,
            }),
        );
        send_envelope(&mut gw.input, MSG_CLIENT_ENVELOPE, 0, &input).unwrap();

        for round in 0..80 {
            if round == 30 {
                assert_eq!(coord.stats().migrations_rejected, 1);
                assert_eq!(coord.route(client).unwrap().shard, ZoneId(0));
                coord.add_shard(ZoneId(1), links[1].clone());
            }
            for (shard, inbox) in shards.iter_mut().zip(&inboxes) {
                for cmd in inbox.try_iter() {
                    shard.handle_command(cmd).unwrap();
                }
                shard.tick().unwrap();
                for event in shard.drain_events() {
                    let _ = coord.handle_event(event);
                }
            }
        }

        assert_eq!(coord.route(client).unwrap().shard, ZoneId(1));
        assert_eq!(coord.stats().migrations_completed, 1);
        assert_eq!(shards[0].metrics().migration_retries, 1);
        assert_eq!(shards[1].client_count(), 1);
    }
}
