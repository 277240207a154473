//! # Protocol Error Tests
//!
//! A hand-driven client link sends malformed traffic; the server must drop
//! that connection and keep serving everyone else.
//!
//! Run with: cargo test --package spectre_netcode --test protocol_errors

use std::sync::Arc;

use spectre_core::{Position, World};
use spectre_netcode::command::CommandRegistryBuilder;
use spectre_netcode::protocol::PacketWriter;
use spectre_netcode::rpc::{GoInGame, OutgoingRpcBuffer, RpcRegistryBuilder};
use spectre_netcode::snapshot::RegistryBuilder;
use spectre_netcode::time::ManualClock;
use spectre_netcode::transport::{LinkConditioner, LoopbackClient, LoopbackNetwork, LoopbackServer};
use spectre_netcode::{
    ClientSession, DeltaBuffer, NetConfig, NetRegistries, Pipeline, ServerSession,
    StreamProtocol, Transport, TransportEvent,
};

fn registries() -> NetRegistries {
    NetRegistries::new(
        RegistryBuilder::with_builtin().build(),
        CommandRegistryBuilder::new().build(),
        RpcRegistryBuilder::new().build(),
    )
}

fn server() -> (ServerSession<LoopbackServer>, LoopbackNetwork, NetRegistries) {
    let registries = registries();
    let (network, transport) = LoopbackNetwork::new(LinkConditioner::none());
    let server = ServerSession::new(
        transport,
        NetConfig::default(),
        registries.clone(),
        Arc::new(ManualClock::new(1)),
    );
    (server, network, registries)
}

fn saw_disconnect(link: &mut LoopbackClient) -> bool {
    while let Some(event) = link.poll_event() {
        if matches!(event, TransportEvent::Disconnect(_)) {
            return true;
        }
    }
    false
}

fn go_in_game(link: &mut LoopbackClient, registries: &NetRegistries) {
    let mut rpcs = OutgoingRpcBuffer::new();
    registries
        .rpcs
        .queue::<GoInGame>()
        .schedule(&mut rpcs, &GoInGame);
    let id = link.id();
    rpcs.flush(id, link).unwrap();
}

#[test]
fn test_unknown_rpc_drops_connection() {
    let (mut server, network, _) = server();
    let mut world = World::new(16);
    let mut link = network.connect();

    let mut body = DeltaBuffer::new();
    body.add_packed_uint(99);
    let mut writer = PacketWriter::new(StreamProtocol::Rpc);
    writer.write_delta(&body);
    let id = link.id();
    link.send(Pipeline::ReliableSequenced, id, writer.as_slice())
        .unwrap();

    server.tick(&mut world).unwrap();
    assert_eq!(server.connections().count(), 0);
    assert!(saw_disconnect(&mut link));
}

#[test]
fn test_unknown_command_type_drops_connection() {
    let (mut server, network, registries) = server();
    let mut world = World::new(16);
    let mut link = network.connect();
    go_in_game(&mut link, &registries);

    let mut samples = DeltaBuffer::new();
    samples.add_bits(200, 8);
    let mut writer = PacketWriter::new(StreamProtocol::Command);
    writer.write_u32(0);
    writer.write_u64(0);
    writer.write_u32(0);
    writer.write_u32(0);
    writer.write_u32(5);
    writer.write_delta(&samples);
    let id = link.id();
    link.send(Pipeline::Unreliable, id, writer.as_slice()).unwrap();

    server.tick(&mut world).unwrap();
    assert_eq!(server.connections().count(), 0);
    assert!(saw_disconnect(&mut link));
}

#[test]
fn test_unknown_stream_protocol_drops_connection() {
    let (mut server, network, _) = server();
    let mut world = World::new(16);
    let mut link = network.connect();
    let id = link.id();
    link.send(Pipeline::Unreliable, id, &[42, 0, 0]).unwrap();

    server.tick(&mut world).unwrap();
    assert_eq!(server.connections().count(), 0);
}

#[test]
fn test_truncated_command_drops_connection() {
    let (mut server, network, registries) = server();
    let mut world = World::new(16);
    let mut link = network.connect();
    go_in_game(&mut link, &registries);
    let id = link.id();
    link.send(Pipeline::Unreliable, id, &[StreamProtocol::Command as u8, 1, 2])
        .unwrap();

    server.tick(&mut world).unwrap();
    assert_eq!(server.connections().count(), 0);
}

#[test]
fn test_bad_peer_does_not_affect_others() {
    let (mut server, network, registries) = server();
    let mut world = World::new(16);
    let entity = world.spawn();
    world.insert(entity, Position::new(1.0, 2.0, 3.0));
    let ghost = server.replicate(&mut world, entity).unwrap();

    let clock = Arc::new(ManualClock::new(1));
    let mut good = ClientSession::new(
        network.connect(),
        NetConfig::default(),
        registries,
        clock,
    );
    let mut good_world = World::new(16);
    let mut bad = network.connect();
    let id = bad.id();
    bad.send(Pipeline::ReliableSequenced, id, &[StreamProtocol::Rpc as u8])
        .unwrap();

    for _ in 0..4 {
        server.tick(&mut world).unwrap();
        good.tick(&mut good_world).unwrap();
    }

    assert_eq!(server.connections().count(), 1);
    assert!(good.is_in_game());
    assert!(good.snapshots().map().get(ghost).is_some());
}

#[test]
fn test_snapshot_sent_to_server_is_rejected() {
    let (mut server, network, _) = server();
    let mut world = World::new(16);
    let mut link = network.connect();
    let id = link.id();
    link.send(Pipeline::Unreliable, id, &[StreamProtocol::Snapshot as u8])
        .unwrap();

    server.tick(&mut world).unwrap();
    assert_eq!(server.connections().count(), 0);
}

#[test]
#[should_panic(expected = "registered id changed at runtime")]
fn test_command_id_cannot_change() {
    use bytemuck::{Pod, Zeroable};
    use spectre_netcode::command::CommandData;
    use spectre_netcode::NetResult;

    #[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
    #[repr(C)]
    struct Jump {
        tick: u32,
    }

    impl CommandData for Jump {
        fn tick(&self) -> u32 {
            self.tick
        }

        fn serialize(&self, _baseline: &Self, _buffer: &mut DeltaBuffer) {}

        fn deserialize(_buffer: &mut DeltaBuffer, _baseline: &Self, tick: u32) -> NetResult<Self> {
            Ok(Self { tick })
        }
    }

    let _ = CommandRegistryBuilder::new()
        .register_as::<Jump>(1)
        .register_as::<Jump>(2);
}
