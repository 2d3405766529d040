mod collaborators;
mod driver;

use std::net::SocketAddr;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, bail};
use clap::Parser;

use convoy::{ConnectionState, Session, SessionConfig, SessionEvent, TcpTransport, VehicleClass};

use collaborators::{LogNotifier, LogRenderer};
use driver::ScriptedDriver;

const INPUT_INTERVAL_MS: u64 = 100;
const LATENCY_LOG_INTERVAL_MS: u64 = 5000;

#[derive(Parser)]
#[command(name = "convoy-client")]
#[command(about = "Headless convoy client driving a scripted vehicle")]
struct Args {
    #[arg(
        short,
        long,
        default_value = "127.0.0.1:27015",
        help = "Server address to connect to"
    )]
    server: String,

    #[arg(short, long, default_value = "Driver")]
    name: String,

    #[arg(long, help = "Participant id (defaults to the name and process id)")]
    id: Option<String>,

    #[arg(short, long, default_value = "default", help = "default, sports or truck")]
    vehicle: String,

    #[arg(long, help = "Chat message to send once connected")]
    chat: Option<String>,

    #[arg(long, default_value_t = 20.0)]
    radius: f32,

    #[arg(long, default_value_t = 60)]
    frame_rate: u32,

    #[arg(long, help = "Disconnect after this many seconds")]
    duration: Option<u64>,

    #[arg(long, help = "Give up after this many failed reconnects")]
    max_reconnects: Option<u32>,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let addr: SocketAddr = args
        .server
        .parse()
        .with_context(|| format!("invalid server address {}", args.server))?;

    let vehicle = VehicleClass::parse(&args.vehicle);
    let id = args
        .id
        .clone()
        .unwrap_or_else(|| format!("{}-{}", args.name.to_lowercase(), std::process::id()));

    let mut config = SessionConfig::new(id, args.name.clone()).with_vehicle(vehicle);
    config.reconnect.max_attempts = args.max_reconnects;

    let mut driver = ScriptedDriver::new(vehicle, args.radius, config.correction_threshold);
    let mut session = Session::new(
        config,
        TcpTransport::new(addr),
        LogRenderer::default(),
        LogNotifier,
    );

    log::info!("Connecting to {} as {} in a {} car", addr, args.name, vehicle);

    let frame = Duration::from_secs_f64(1.0 / args.frame_rate.max(1) as f64);
    let deadline = args.duration.map(Duration::from_secs);
    let mut greeting = args.chat;
    let start = Instant::now();
    let mut last_frame = start;
    let mut last_input_at = 0;
    let mut last_latency_log = 0;

    session.connect(0);

    loop {
        let now = Instant::now();
        let now_ms = now.duration_since(start).as_millis() as u64;
        let dt = now.duration_since(last_frame).as_secs_f32();
        last_frame = now;

        driver.advance(dt);
        if session.state() == ConnectionState::Connected
            && now_ms >= last_input_at + INPUT_INTERVAL_MS
        {
            session.send_input(now_ms, driver.control());
            last_input_at = now_ms;
        }

        session.tick(now_ms, &driver.local_state());

        let events: Vec<SessionEvent> = session.drain_events().collect();
        for event in events {
            match event {
                SessionEvent::StateChanged {
                    to: ConnectionState::Connected,
                    ..
                } => {
                    if let Some(text) = greeting.take() {
                        if let Err(e) = session.send_chat_message(&text) {
                            log::warn!("Not sending greeting: {}", e);
                        }
                    }
                }
                SessionEvent::StateChanged {
                    to: ConnectionState::Disconnected,
                    ..
                } => bail!("lost connection to {} for good", addr),
                SessionEvent::ChatReceived {
                    sender_name, text, ..
                } => println!("<{}> {}", sender_name, text),
                SessionEvent::Correction(correction) => driver.apply(correction),
                SessionEvent::WorldSeed(seed) => log::info!("World seed {}", seed),
                SessionEvent::StateChanged { .. } | SessionEvent::RosterChanged(_) => {}
            }
        }

        if session.state() == ConnectionState::Connected
            && now_ms >= last_latency_log + LATENCY_LOG_INTERVAL_MS
        {
            log::info!(
                "Latency {:.1} ms, {} remote vehicles visible, {} inputs pending",
                session.latency_estimate(),
                session.renderer().visible_count(),
                session.reconciler().len()
            );
            last_latency_log = now_ms;
        }

        if deadline.is_some_and(|limit| now.duration_since(start) >= limit) {
            let stats = session.stats();
            log::info!(
                "Done: sent {} messages ({} bytes), received {} ({} bytes)",
                stats.messages_sent,
                stats.bytes_sent,
                stats.messages_received,
                stats.bytes_received
            );
            session.disconnect();
            return Ok(());
        }

        thread::sleep(frame);
    }
}
