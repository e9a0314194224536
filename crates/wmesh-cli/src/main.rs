//! Command-line driver for the wireless mesh control plane.
//!
//! Runs simulated mesh nodes against the in-memory transport so the
//! lifecycle, topology and dispatch machinery can be exercised and
//! inspected without radio hardware.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::info;
use wmesh_core::wire::ENVELOPE_HEADER_LEN;
use wmesh_core::{
    topology_response_frame, LinkStatus, MacAddr, MeshConfig, MeshEvent, MeshNode, MeshState,
    NodeReport, OptionKind, ProtocolId, SimProvisioner, SimTransport, Transport,
};

#[derive(Parser)]
#[command(name = "wmesh")]
#[command(author, version, about = "Wireless mesh control-plane CLI", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one simulated node in real time until Ctrl+C
    Run {
        /// Act as the mesh root
        #[arg(long)]
        root: bool,

        /// Tick cadence in milliseconds
        #[arg(long, default_value = "100")]
        tick_ms: u64,

        /// Simulated peers visible to this node
        #[arg(long, default_value = "3")]
        peers: usize,
    },

    /// Run a deterministic multi-node topology simulation
    Simulate {
        /// Number of nodes (1 root, the rest leaves)
        #[arg(short, long, default_value = "4")]
        nodes: usize,

        /// Topology rounds to run
        #[arg(short, long, default_value = "10")]
        rounds: usize,

        /// Frame loss probability (0.0 - 1.0)
        #[arg(long, default_value = "0.1")]
        loss: f64,

        /// RNG seed
        #[arg(long, default_value = "7")]
        seed: u64,

        /// Emit a JSON summary instead of text
        #[arg(long)]
        json: bool,
    },

    /// Print one node's JSON status report after a scripted session
    Status {
        /// Node address (aa:bb:cc:dd:ee:ff), random when omitted
        #[arg(long)]
        addr: Option<String>,

        /// Act as the mesh root
        #[arg(long)]
        root: bool,
    },

    /// Print protocol constants and configuration defaults
    Info,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Run {
            root,
            tick_ms,
            peers,
        } => cmd_run(root, tick_ms, peers),
        Commands::Simulate {
            nodes,
            rounds,
            loss,
            seed,
            json,
        } => cmd_simulate(nodes, rounds, loss, seed, json),
        Commands::Status { addr, root } => cmd_status(addr, root),
        Commands::Info => cmd_info(),
    }
}

fn random_addr<R: rand::Rng>(rng: &mut R) -> MacAddr {
    MacAddr::from_bytes([0x18, 0xfe, 0x34, rng.gen(), rng.gen(), rng.gen()])
}

/// Drive a single simulated node in real time until Ctrl+C.
///
/// The surrounding world is scripted: the transport accepts its enable
/// one tick after it is requested, a leaf's discovery probes are
/// answered by a synthetic upstream root, and a root sees occasional
/// membership churn in its node table.
fn cmd_run(root: bool, tick_ms: u64, peers: usize) -> Result<()> {
    use rand::Rng;

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")?;

    let mut rng = rand::thread_rng();
    let local = random_addr(&mut rng);
    let upstream = random_addr(&mut rng);
    let mut world: Vec<MacAddr> = (0..peers).map(|_| random_addr(&mut rng)).collect();

    let transport = SimTransport::new(local).with_root(root);
    let provisioner = SimProvisioner::new().with_polls(3);
    let mut node = MeshNode::new(MeshConfig::default(), transport, provisioner);

    println!("=== Mesh Node ===");
    println!();
    println!("Address:  {}", local);
    println!("Role:     {}", if root { "root" } else { "leaf" });
    println!("Peers:    {}", peers);
    println!();
    println!("Running... (Press Ctrl+C to stop)");
    println!();

    let start = Instant::now();
    node.initiate(0);
    let mut last_state = node.state();
    let mut answered = 0usize;

    while running.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(tick_ms));
        let now = start.elapsed().as_millis() as u64;

        // The simulated transport finishes its enable one tick after
        // accepting it
        if matches!(node.state(), MeshState::Enabling { .. })
            && node.transport().status() == LinkStatus::WifiConnecting
        {
            node.transport_mut().set_status(LinkStatus::LocalAvailable);
            if root {
                let mut rows = vec![local];
                rows.extend(world.iter().copied());
                node.transport_mut().set_rows(rows);
            }
            node.handle_event(MeshEvent::EnableFinished { ok: true }, now);
        }

        node.tick(now);

        if !root {
            // Answer this leaf's discovery probes as the upstream
            // root, with a little visibility jitter
            let sent = node.transport().sent_frames().len();
            if sent > answered {
                answered = sent;
                let visible: Vec<MacAddr> = world
                    .iter()
                    .copied()
                    .filter(|_| rng.gen_bool(0.9))
                    .collect();
                info!(peers = visible.len(), "answering discovery probe");
                let response = topology_response_frame(local, upstream, &visible);
                node.on_receive(&response, now);
            }
        } else if node.state() == MeshState::Connected && rng.gen_bool(0.002) {
            // Occasionally a new node joins the tree
            let newcomer = random_addr(&mut rng);
            world.push(newcomer);
            let mut rows = vec![local];
            rows.extend(world.iter().copied());
            node.transport_mut().set_rows(rows);
            node.handle_event(MeshEvent::PeerJoined(newcomer), now);
        }

        if node.state() != last_state {
            last_state = node.state();
            let known = node.registry().map(|r| r.len()).unwrap_or(0);
            println!(
                "[{:>8} ms] state: {:<13} peers: {}",
                now,
                last_state.to_string(),
                known
            );
        }
    }

    let now = start.elapsed().as_millis() as u64;
    node.teardown(now);

    println!();
    println!("=== Final Report ===");
    println!();
    println!("{}", node.report_json(now)?);
    Ok(())
}

#[derive(Serialize)]
struct SimSummary {
    nodes: usize,
    rounds: usize,
    loss: f64,
    seed: u64,
    probes_sent: u64,
    probes_delivered: u64,
    answers_delivered: u64,
    frames_lost: u64,
    reports: Vec<NodeReport>,
}

/// Run a multi-node topology simulation on a virtual clock.
///
/// One root and `nodes - 1` leaves all join at t = 0, then run the
/// periodic topology protocol for the requested number of rounds.
/// Probes and answers are carried between the simulated transports by
/// hand, each crossing lost with the given probability.
fn cmd_simulate(num_nodes: usize, rounds: usize, loss: f64, seed: u64, json: bool) -> Result<()> {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    if num_nodes < 2 {
        anyhow::bail!("simulation needs at least 2 nodes (1 root + 1 leaf)");
    }
    if num_nodes > 250 {
        anyhow::bail!("simulation supports at most 250 nodes");
    }
    if !(0.0..=1.0).contains(&loss) {
        anyhow::bail!("loss must be within 0.0 - 1.0");
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let addrs: Vec<MacAddr> = (0..num_nodes)
        .map(|i| MacAddr::from_bytes([0x18, 0xfe, 0x34, 0x00, 0x00, i as u8 + 1]))
        .collect();

    let mut nodes: Vec<MeshNode<SimTransport, SimProvisioner>> = addrs
        .iter()
        .enumerate()
        .map(|(i, &addr)| {
            let transport = SimTransport::new(addr).with_root(i == 0);
            MeshNode::new(MeshConfig::default(), transport, SimProvisioner::new())
        })
        .collect();

    // Everyone joins at t = 0
    for node in nodes.iter_mut() {
        node.initiate(0);
        node.tick(500);
        node.transport_mut().set_status(LinkStatus::LocalAvailable);
        node.handle_event(MeshEvent::EnableFinished { ok: true }, 600);
    }
    nodes[0].transport_mut().set_rows(addrs.clone());

    if !json {
        println!("=== Mesh Topology Simulation ===");
        println!();
        println!("Nodes:  {} (1 root + {} leaves)", num_nodes, num_nodes - 1);
        println!("Rounds: {}", rounds);
        println!("Loss:   {:.0}%", loss * 100.0);
        println!("Seed:   {}", seed);
    }

    let interval = MeshConfig::default().topology_interval_ms;
    let mut probes_sent = 0u64;
    let mut probes_delivered = 0u64;
    let mut answers_delivered = 0u64;
    let mut frames_lost = 0u64;

    let mut t = 600;
    for _ in 0..rounds {
        t += interval;

        // Topology pass on every node: the root walks its table, the
        // leaves broadcast discovery probes
        for node in nodes.iter_mut() {
            node.tick(t);
        }

        // Carry each leaf's probe to the root and the answer back
        for i in 1..nodes.len() {
            let probe = match nodes[i].transport().sent_frames().last() {
                Some(frame) => frame.clone(),
                None => continue,
            };
            nodes[i].transport_mut().clear_sent();
            probes_sent += 1;
            if rng.gen_bool(loss) {
                frames_lost += 1;
                continue;
            }
            probes_delivered += 1;

            nodes[0].transport_mut().clear_sent();
            nodes[0].on_receive(&probe, t + 10);
            let answer = match nodes[0].transport().sent_frames().last() {
                Some(frame) => frame.clone(),
                None => continue,
            };
            if rng.gen_bool(loss) {
                frames_lost += 1;
                continue;
            }
            answers_delivered += 1;
            nodes[i].on_receive(&answer, t + 20);
        }
    }

    if json {
        let summary = SimSummary {
            nodes: num_nodes,
            rounds,
            loss,
            seed,
            probes_sent,
            probes_delivered,
            answers_delivered,
            frames_lost,
            reports: nodes.iter().map(|n| n.report(t)).collect(),
        };
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!();
    println!("=== Simulation Results ===");
    println!();
    println!("Probes sent:       {}", probes_sent);
    println!("Probes delivered:  {}", probes_delivered);
    println!("Answers delivered: {}", answers_delivered);
    println!("Frames lost:       {}", frames_lost);
    println!();
    println!("Per-Node Statistics:");
    println!(
        "{:<19} {:<12} {:<7} {:<7} {:<11} {:<8}",
        "Address", "State", "Peers", "Rx", "Dispatched", "Dropped"
    );
    println!("{}", "-".repeat(68));
    for node in &nodes {
        let report = node.report(t);
        println!(
            "{:<19} {:<12} {:<7} {:<7} {:<11} {:<8}",
            report.addr.to_string(),
            report.state,
            report.peer_count,
            report.node.frames_received,
            report.node.frames_dispatched,
            report.node.frames_dropped
        );
    }
    Ok(())
}

/// Print one node's JSON report after a short scripted session.
fn cmd_status(addr: Option<String>, root: bool) -> Result<()> {
    let mut rng = rand::thread_rng();
    let local = match addr {
        Some(s) => s
            .parse::<MacAddr>()
            .context("invalid --addr, expected aa:bb:cc:dd:ee:ff")?,
        None => random_addr(&mut rng),
    };

    let transport = SimTransport::new(local).with_root(root);
    let mut node = MeshNode::new(MeshConfig::default(), transport, SimProvisioner::new());

    // A short scripted session so the report has something to show
    node.initiate(0);
    node.tick(500);
    node.transport_mut().set_status(LinkStatus::LocalAvailable);
    node.handle_event(MeshEvent::EnableFinished { ok: true }, 600);

    let sub_a = random_addr(&mut rng);
    let sub_b = random_addr(&mut rng);
    if root {
        node.transport_mut().set_rows(vec![local, sub_a, sub_b]);
        node.tick(15_600);
    } else {
        let upstream = random_addr(&mut rng);
        let response = topology_response_frame(local, upstream, &[sub_a, sub_b]);
        node.on_receive(&response, 15_600);
    }

    println!("{}", node.report_json(15_700)?);
    Ok(())
}

/// Print the wire-protocol constants and configuration defaults.
fn cmd_info() -> Result<()> {
    let defaults = MeshConfig::default();

    println!("=== Mesh Protocol ===");
    println!();
    println!("Envelope header:   {} bytes", ENVELOPE_HEADER_LEN);
    println!("Address length:    {} bytes", MacAddr::LEN);
    println!("Broadcast:         {}", MacAddr::BROADCAST);
    println!();
    println!("Protocol ids:");
    for protocol in [
        ProtocolId::Control,
        ProtocolId::Http,
        ProtocolId::Json,
        ProtocolId::Mqtt,
        ProtocolId::Bin,
    ] {
        println!("  0x{:02x}  {:?}", protocol.as_byte(), protocol);
    }
    println!();
    println!("Option kinds:");
    for kind in [
        OptionKind::CongestRequest,
        OptionKind::CongestResponse,
        OptionKind::TopologyRequest,
        OptionKind::TopologyResponse,
    ] {
        println!("  0x{:02x}  {:?}", kind.as_byte(), kind);
    }
    println!();
    println!("=== Configuration Defaults ===");
    println!();
    println!("Topology interval: {} ms", defaults.topology_interval_ms);
    println!("Stale threshold:   {} ms", defaults.stale_threshold_ms);
    println!("Enable attempts:   {}", defaults.enable_attempt_limit);
    println!("Watchdog:          {} ms", defaults.watchdog_ms);
    println!("Provision poll:    {} ms", defaults.provision_poll_ms);
    println!("Heartbeat:         {} ms", defaults.heartbeat_ms);
    println!("SSID prefix:       {}", defaults.ssid_prefix);
    println!("Max hops:          {}", defaults.max_hops);
    println!("Channel port:      {}", defaults.channel_port);
    Ok(())
}
