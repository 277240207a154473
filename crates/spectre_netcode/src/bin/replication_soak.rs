//! # Replication Soak
//!
//! Runs one server and N clients over the loopback network and reports
//! how well the clients' worlds track the server's.
//!
//! ## Usage
//!
//! ```bash
//! replication_soak --clients 8 --ticks 600 --loss 0.05 --seed 7
//! ```

use std::sync::Arc;
use std::time::Instant;

use bytemuck::{Pod, Zeroable};
use spectre_core::{EntityId, Position, Velocity, World};
use spectre_netcode::command::{CommandBuffer, CommandData, CommandRegistryBuilder};
use spectre_netcode::rpc::RpcRegistryBuilder;
use spectre_netcode::snapshot::{GhostPriority, RegistryBuilder};
use spectre_netcode::time::SystemClock;
use spectre_netcode::transport::{LinkConditioner, LoopbackClient, LoopbackNetwork};
use spectre_netcode::{
    ClientSession, DeltaBuffer, NetConfig, NetRegistries, NetResult, SendStats, ServerSession,
    TickLoop,
};

/// Steering input of one avatar.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
struct Steer {
    tick: u32,
    dx: i32,
    dz: i32,
}

impl CommandData for Steer {
    fn tick(&self) -> u32 {
        self.tick
    }

    fn serialize(&self, baseline: &Self, buffer: &mut DeltaBuffer) {
        buffer.add_int_delta(self.dx, baseline.dx);
        buffer.add_int_delta(self.dz, baseline.dz);
    }

    fn deserialize(buffer: &mut DeltaBuffer, baseline: &Self, tick: u32) -> NetResult<Self> {
        Ok(Self {
            tick,
            dx: buffer.read_int_delta(baseline.dx)?,
            dz: buffer.read_int_delta(baseline.dz)?,
        })
    }
}

struct Options {
    clients: usize,
    ticks: u32,
    loss: f64,
    seed: u64,
    npcs: usize,
    realtime: bool,
    config: Option<String>,
}

fn parse_args() -> Option<Options> {
    let args: Vec<String> = std::env::args().collect();
    let mut options = Options {
        clients: 4,
        ticks: 600,
        loss: 0.0,
        seed: 1,
        npcs: 64,
        realtime: false,
        config: None,
    };

    let mut i = 1;
    while i < args.len() {
        let value = args.get(i + 1);
        match args[i].as_str() {
            "--clients" | "-c" => {
                options.clients = value.and_then(|v| v.parse().ok()).unwrap_or(4);
                i += 1;
            }
            "--ticks" | "-t" => {
                options.ticks = value.and_then(|v| v.parse().ok()).unwrap_or(600);
                i += 1;
            }
            "--loss" | "-l" => {
                options.loss = value.and_then(|v| v.parse().ok()).unwrap_or(0.0);
                i += 1;
            }
            "--seed" | "-s" => {
                options.seed = value.and_then(|v| v.parse().ok()).unwrap_or(1);
                i += 1;
            }
            "--npcs" | "-n" => {
                options.npcs = value.and_then(|v| v.parse().ok()).unwrap_or(64);
                i += 1;
            }
            "--config" => {
                options.config = value.cloned();
                i += 1;
            }
            "--realtime" => options.realtime = true,
            "--help" | "-h" => {
                println!("Usage: replication_soak [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --clients <N>     Connected clients (default: 4)");
                println!("  -t, --ticks <N>       Server ticks to run (default: 600)");
                println!("  -l, --loss <P>        Unreliable packet loss 0..1 (default: 0)");
                println!("  -s, --seed <N>        Link conditioner seed (default: 1)");
                println!("  -n, --npcs <N>        Wandering server-only ghosts (default: 64)");
                println!("      --config <PATH>   TOML network config");
                println!("      --realtime        Pace ticks at the configured tick rate");
                return None;
            }
            other => eprintln!("Ignoring unknown argument: {other}"),
        }
        i += 1;
    }
    Some(options)
}

struct Peer {
    session: ClientSession<LoopbackClient>,
    world: World,
    input: EntityId,
}

#[allow(clippy::cast_precision_loss)]
fn main() -> NetResult<()> {
    println!("╔══════════════════════════════════════════════════════════════════╗");
    println!("║         SPECTRE NETCODE - REPLICATION SOAK                       ║");
    println!("╚══════════════════════════════════════════════════════════════════╝");
    println!();

    let Some(options) = parse_args() else {
        return Ok(());
    };
    let config = match &options.config {
        Some(path) => NetConfig::load(path)?,
        None => NetConfig::default(),
    };

    let registries = NetRegistries::new(
        RegistryBuilder::with_builtin().build(),
        CommandRegistryBuilder::new().register::<Steer>().build(),
        RpcRegistryBuilder::new().build(),
    );
    let clock = Arc::new(SystemClock::new());
    let conditioner = if options.loss > 0.0 {
        LinkConditioner::lossy(options.loss, options.seed)
    } else {
        LinkConditioner::none()
    };
    let (network, server_transport) = LoopbackNetwork::new(conditioner);
    let mut server = ServerSession::new(
        server_transport,
        config.clone(),
        registries.clone(),
        clock.clone(),
    );

    println!("┌─ CONFIGURATION ─────────────────────────────────────────────────┐");
    println!("│ Clients:            {}", options.clients);
    println!("│ NPC ghosts:         {}", options.npcs);
    println!("│ Ticks:              {}", options.ticks);
    println!("│ Tick Rate:          {} Hz", config.tick_rate);
    println!("│ Packet Loss:        {:.1}%", options.loss * 100.0);
    println!("│ Payload Budget:     {} bytes", config.snapshot_payload_budget);
    println!("│ Compression:        {:?}", config.compression);
    println!("└──────────────────────────────────────────────────────────────────┘");
    println!();

    let mut server_world = World::new(options.npcs + options.clients + 16);
    for n in 0..options.npcs {
        let npc = server_world.spawn();
        let angle = n as f32 * 0.37;
        server_world.insert(npc, Position::new(n as f32, 0.0, 0.0));
        server_world.insert(npc, Velocity::new(angle.cos(), 0.0, angle.sin()));
        if n % 8 == 0 {
            server_world.insert(npc, GhostPriority::weighted(4));
        }
        server.replicate(&mut server_world, npc)?;
    }

    let mut peers: Vec<Peer> = (0..options.clients)
        .map(|_| Peer {
            session: ClientSession::new(
                network.connect(),
                config.clone(),
                registries.clone(),
                clock.clone(),
            ),
            world: World::new(options.npcs + options.clients + 16),
            input: EntityId::NULL,
        })
        .collect();

    let mut tick_loop = TickLoop::new(config.tick_rate);
    let mut totals = SendStats::default();
    let dt = 1.0 / config.tick_rate as f32;
    let start = Instant::now();

    while u64::from(options.ticks) > tick_loop.tick_count() {
        if options.realtime && !tick_loop.should_tick() {
            tick_loop.wait_for_next_tick();
            continue;
        }
        let begin = tick_loop.begin_tick();
        let next_tick = server.current_tick().wrapping_add(1);

        // Avatars for newly joined clients.
        let joined: Vec<_> = server
            .connections()
            .filter(|c| c.is_in_game() && c.command_target.is_null())
            .map(|c| c.id)
            .collect();
        for id in joined {
            let avatar = server_world.spawn();
            server_world.insert(avatar, Position::default());
            server_world.insert(avatar, Velocity::default());
            server_world.insert(avatar, GhostPriority::always());
            server.replicate(&mut server_world, avatar)?;
            server.set_command_target(id, avatar)?;
        }

        // Steering arriving for this tick.
        let avatars: Vec<EntityId> = server.connections().map(|c| c.command_target).collect();
        for avatar in avatars {
            let steer = server_world
                .buffer::<Steer>(avatar)
                .and_then(|b| b.latest_at_or_before(next_tick).copied());
            if let (Some(steer), Some(velocity)) =
                (steer, server_world.get_component_mut::<Velocity>(avatar))
            {
                velocity.x = steer.dx as f32 / 1000.0;
                velocity.z = steer.dz as f32 / 1000.0;
            }
        }
        server_world.update_positions(dt);
        let stats = server.tick(&mut server_world)?;
        totals.ghosts_sent += stats.ghosts_sent;
        totals.ghosts_dropped += stats.ghosts_dropped;
        totals.despawns_sent += stats.despawns_sent;
        totals.payload_bytes += stats.payload_bytes;
        totals.packet_bytes += stats.packet_bytes;

        for (index, peer) in peers.iter_mut().enumerate() {
            peer.session.receive(&mut peer.world);
            if peer.session.is_in_game() && peer.input.is_null() {
                peer.input = peer.world.spawn();
                peer.session.set_command_target(peer.input)?;
            }
            let target = peer.session.target_tick();
            if target != 0 {
                let phase = (target as f32 + index as f32 * 10.0) * 0.05;
                #[allow(clippy::cast_possible_truncation)]
                let steer = Steer {
                    tick: target,
                    dx: (phase.cos() * 2000.0) as i32,
                    dz: (phase.sin() * 2000.0) as i32,
                };
                if let Some(buffer) = peer.world.add_buffer::<Steer>(peer.input) {
                    buffer.add_command_data(steer);
                }
            }
            peer.session.send(&peer.world)?;
        }
        tick_loop.end_tick(begin);
    }

    let elapsed = start.elapsed();
    let timing = *tick_loop.stats();
    let transport = *server.transport_mut().stats();

    println!("╔══════════════════════════════════════════════════════════════════╗");
    println!("║                    SOAK RESULTS                                  ║");
    println!("╚══════════════════════════════════════════════════════════════════╝");
    println!();
    println!("┌─ TIMING ────────────────────────────────────────────────────────┐");
    println!("│ Real Time:          {:.2} seconds", elapsed.as_secs_f64());
    println!("│ Ticks:              {}", timing.total_ticks);
    println!("│ Avg Tick Time:      {} μs", timing.avg_tick_us);
    println!("│ Max Tick Time:      {} μs", timing.max_tick_us);
    println!("│ Late Ticks:         {}", timing.late_ticks);
    println!("└──────────────────────────────────────────────────────────────────┘");
    println!();
    println!("┌─ SNAPSHOTS ─────────────────────────────────────────────────────┐");
    println!("│ Ghost Updates:      {}", totals.ghosts_sent);
    println!("│ Dropped (budget):   {}", totals.ghosts_dropped);
    println!("│ Despawns:           {}", totals.despawns_sent);
    println!("│ Payload Bytes:      {}", totals.payload_bytes);
    println!("│ Wire Bytes:         {}", totals.packet_bytes);
    if totals.payload_bytes > 0 {
        println!(
            "│ Compression:        {:.1}%",
            totals.packet_bytes as f64 / totals.payload_bytes as f64 * 100.0
        );
    }
    println!("└──────────────────────────────────────────────────────────────────┘");
    println!();
    println!("┌─ TRANSPORT (server side) ───────────────────────────────────────┐");
    println!("│ Packets Sent:       {}", transport.packets_sent);
    println!("│ Packets Received:   {}", transport.packets_received);
    println!("│ Packets Dropped:    {}", transport.packets_dropped);
    println!("└──────────────────────────────────────────────────────────────────┘");
    println!();

    println!("┌─ CONVERGENCE ───────────────────────────────────────────────────┐");
    let ghost_count = server.ghosts().len();
    let mut all_ok = true;
    for (index, peer) in peers.iter().enumerate() {
        let map = peer.session.snapshots().map();
        let mut max_error = 0.0f32;
        for (ghost, state) in server.ghosts().iter() {
            let authoritative = server_world.get_component::<Position>(state.entity);
            let local = map
                .get(ghost)
                .and_then(|e| peer.world.get_component::<Position>(e));
            if let (Some(a), Some(b)) = (authoritative, local) {
                let error = (a.x - b.x).abs().max((a.y - b.y).abs()).max((a.z - b.z).abs());
                max_error = max_error.max(error);
            }
        }
        let complete = map.len() == ghost_count;
        all_ok &= complete;
        println!(
            "│ Client {:<3} ghosts {:>4}/{:<4} last tick {:>6}  max error {:.3}",
            index,
            map.len(),
            ghost_count,
            peer.session.snapshots().last_tick(),
            max_error
        );
    }
    if all_ok {
        println!("│ Status:             ✓ EVERY CLIENT HOLDS EVERY GHOST");
    } else {
        println!("│ Status:             ✗ GHOSTS MISSING ON SOME CLIENTS");
    }
    println!("└──────────────────────────────────────────────────────────────────┘");
    Ok(())
}
