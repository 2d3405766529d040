use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::{SocketAddr, TcpListener};
use std::time::{Duration, Instant};

use convoy::VehicleClass;
use convoy::net::{
    ChatBroadcast, ClientInit, ClientMessage, InputAck, PlayerLeft, PositionUpdate, ServerInit,
    ServerMessage, cap_chat, encode, frame,
};

use crate::config::ServerConfig;
use crate::events::{DisconnectReason, ServerEvent};
use crate::peer::{Peer, PeerError, PeerId};
use crate::player::{Player, generate_player_id, random_angle, random_world_seed};

/// Relays vehicle state between connected clients. Positions are trusted
/// as reported; the server runs no simulation of its own.
pub struct RelayServer {
    listener: TcpListener,
    config: ServerConfig,
    peers: HashMap<PeerId, Peer>,
    players: HashMap<String, Player>,
    next_peer_id: PeerId,
    world_seed: u32,
    tick: u64,
    tick_duration: Duration,
    last_tick_time: Instant,
    accumulator: Duration,
    start_time: Instant,
    pending_events: VecDeque<ServerEvent>,
}

impl RelayServer {
    pub fn bind(bind_addr: &str, config: ServerConfig) -> io::Result<Self> {
        let listener = TcpListener::bind(bind_addr)?;
        listener.set_nonblocking(true)?;
        let tick_duration = Duration::from_secs_f64(1.0 / config.tick_rate.max(1) as f64);
        let world_seed = random_world_seed();

        Ok(Self {
            listener,
            peers: HashMap::new(),
            players: HashMap::new(),
            next_peer_id: 1,
            world_seed,
            tick: 0,
            tick_duration,
            last_tick_time: Instant::now(),
            accumulator: Duration::ZERO,
            start_time: Instant::now(),
            pending_events: VecDeque::new(),
            config,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn world_seed(&self) -> u32 {
        self.world_seed
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ServerEvent> + '_ {
        self.pending_events.drain(..)
    }

    pub fn run(&mut self) -> ! {
        loop {
            self.tick_once();
            for event in self.drain_events() {
                log_event(&event);
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    pub fn tick_once(&mut self) {
        let now = Instant::now();
        let delta = now - self.last_tick_time;
        self.last_tick_time = now;
        self.accumulator += delta;

        self.accept_connections(now);
        self.process_peers(now);
        self.flush_peers();

        while self.accumulator >= self.tick_duration {
            self.accumulator -= self.tick_duration;
            self.tick(now);
        }
    }

    fn tick(&mut self, now: Instant) {
        self.tick += 1;

        let timed_out: Vec<PeerId> = self
            .peers
            .values()
            .filter(|peer| now.duration_since(peer.last_activity) > self.config.inactivity_timeout)
            .map(|peer| peer.id)
            .collect();
        for peer_id in timed_out {
            log::info!("Peer {} inactive, removing", peer_id);
            self.remove_peer(peer_id, DisconnectReason::Timeout);
        }

        let interval = self.config.stats_interval_ticks;
        if interval > 0 && self.tick % interval == 0 {
            let stats = self.stats();
            log::info!(
                "Tick {}, uptime {}s, {} players, {} connections",
                stats.tick,
                stats.uptime.as_secs(),
                stats.player_count,
                stats.connection_count
            );
        }
    }

    fn accept_connections(&mut self, now: Instant) {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    let id = self.next_peer_id;
                    self.next_peer_id += 1;
                    match Peer::new(id, stream, addr, now, self.config.max_write_backlog) {
                        Ok(peer) => {
                            log::debug!("Accepted peer {} from {}", id, addr);
                            self.peers.insert(id, peer);
                            self.pending_events
                                .push_back(ServerEvent::PeerConnected { addr });
                        }
                        Err(e) => self.pending_events.push_back(ServerEvent::Error {
                            message: format!("Failed to configure connection from {}: {}", addr, e),
                        }),
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    self.pending_events.push_back(ServerEvent::Error {
                        message: format!("Accept failed: {}", e),
                    });
                    break;
                }
            }
        }
    }

    fn process_peers(&mut self, now: Instant) {
        let peer_ids: Vec<PeerId> = self.peers.keys().copied().collect();

        for peer_id in peer_ids {
            let Some(peer) = self.peers.get_mut(&peer_id) else {
                continue;
            };

            match peer.receive() {
                Ok(messages) => {
                    if !messages.is_empty() {
                        peer.last_activity = now;
                    }
                    for message in messages {
                        self.handle_message(peer_id, message);
                    }
                }
                Err(e) => {
                    log::debug!("Peer {}: {}", peer_id, e);
                    let reason = match e {
                        PeerError::Closed => DisconnectReason::Closed,
                        _ => DisconnectReason::Error,
                    };
                    self.remove_peer(peer_id, reason);
                }
            }
        }
    }

    fn flush_peers(&mut self) {
        let failed: Vec<PeerId> = self
            .peers
            .values_mut()
            .filter_map(|peer| peer.flush().err().map(|e| (peer.id, e)))
            .map(|(id, e)| {
                log::debug!("Peer {} write failed: {}", id, e);
                id
            })
            .collect();

        for peer_id in failed {
            self.remove_peer(peer_id, DisconnectReason::Error);
        }
    }

    fn handle_message(&mut self, peer_id: PeerId, message: ClientMessage) {
        let Some(peer) = self.peers.get_mut(&peer_id) else {
            return;
        };

        let Some(player_id) = peer.player_id.clone() else {
            match message {
                ClientMessage::Init(init) => self.register(peer_id, init),
                other => {
                    if peer.held.len() < self.config.max_held_messages {
                        peer.held.push(other);
                    } else {
                        log::warn!("Peer {} sent too much before init, dropping", peer_id);
                    }
                }
            }
            return;
        };

        match message {
            ClientMessage::Init(_) => {
                log::debug!("Ignoring repeated init from {}", player_id);
            }
            ClientMessage::Position(update) => self.handle_position(peer_id, &player_id, update),
            ClientMessage::Chat(chat) => {
                let text = cap_chat(&chat.text);
                if text.is_empty() {
                    return;
                }
                let sender_name = self
                    .players
                    .get(&player_id)
                    .map(|p| p.name.clone())
                    .unwrap_or_else(|| player_id.clone());
                log::info!("[chat] {}: {}", sender_name, text);
                self.broadcast(
                    &ServerMessage::Chat(ChatBroadcast {
                        sender_id: player_id,
                        sender_name,
                        text,
                    }),
                    None,
                );
            }
            ClientMessage::Ping(timestamp) => {
                self.send_to(peer_id, &ServerMessage::Pong(timestamp));
            }
            ClientMessage::Input(command) => {
                self.send_to(
                    peer_id,
                    &ServerMessage::InputAck(InputAck {
                        id: command.id,
                        correction: None,
                    }),
                );
            }
        }
    }

    fn register(&mut self, peer_id: PeerId, init: ClientInit) {
        let id = match init.participant_id.trim() {
            "" => generate_player_id(),
            id => id.to_string(),
        };
        let name = match init.display_name.trim() {
            "" => id.clone(),
            name => name.to_string(),
        };
        let vehicle = VehicleClass::parse(&init.vehicle_class);

        let replaced: Vec<PeerId> = self
            .peers
            .values()
            .filter(|peer| peer.id != peer_id && peer.player_id.as_deref() == Some(id.as_str()))
            .map(|peer| peer.id)
            .collect();
        for old in replaced {
            if let Some(mut peer) = self.peers.remove(&old) {
                log::info!("Player {} reconnected, dropping peer {}", id, old);
                peer.shutdown();
                self.pending_events.push_back(ServerEvent::PeerDropped {
                    addr: peer.addr,
                    reason: DisconnectReason::Replaced,
                });
            }
        }

        let player = Player::spawn(
            id.clone(),
            name.clone(),
            vehicle.as_str().to_string(),
            random_angle(),
            self.config.spawn_radius,
            self.config.spawn_height,
        );
        let info = player.info();
        self.players.insert(id.clone(), player);

        let Some(peer) = self.peers.get_mut(&peer_id) else {
            return;
        };
        peer.player_id = Some(id.clone());
        let addr = peer.addr;
        let held = std::mem::take(&mut peer.held);

        let mut players: Vec<_> = self.players.values().map(Player::info).collect();
        players.sort_by(|a, b| a.id.cmp(&b.id));
        self.send_to(
            peer_id,
            &ServerMessage::Init(ServerInit {
                participant_id: id.clone(),
                world_seed: self.world_seed,
                players,
            }),
        );
        self.broadcast(&ServerMessage::PlayerJoined(info), Some(peer_id));

        log::info!("{} ({}) joined from {} driving {}", name, id, addr, vehicle);
        self.pending_events
            .push_back(ServerEvent::PlayerJoined { id, name, addr });

        for message in held {
            self.handle_message(peer_id, message);
        }
    }

    fn handle_position(&mut self, peer_id: PeerId, player_id: &str, update: PositionUpdate) {
        let Some(player) = self.players.get_mut(player_id) else {
            return;
        };
        player.apply(&update);
        let message = ServerMessage::PlayerPosition(player.position_message());
        self.broadcast(&message, Some(peer_id));
    }

    fn send_to(&mut self, peer_id: PeerId, message: &ServerMessage) {
        let Some(framed) = frame_message(message) else {
            return;
        };
        if let Some(peer) = self.peers.get_mut(&peer_id) {
            peer.queue(&framed);
        }
    }

    /// Sends to every registered peer, optionally skipping one.
    fn broadcast(&mut self, message: &ServerMessage, except: Option<PeerId>) {
        let Some(framed) = frame_message(message) else {
            return;
        };
        for peer in self.peers.values_mut() {
            if peer.is_registered() && Some(peer.id) != except {
                peer.queue(&framed);
            }
        }
    }

    fn remove_peer(&mut self, peer_id: PeerId, reason: DisconnectReason) {
        let Some(mut peer) = self.peers.remove(&peer_id) else {
            return;
        };
        peer.shutdown();

        let Some(player_id) = peer.player_id else {
            self.pending_events.push_back(ServerEvent::PeerDropped {
                addr: peer.addr,
                reason,
            });
            return;
        };

        if let Some(player) = self.players.remove(&player_id) {
            log::info!("{} ({}) {}", player.name, player_id, reason.as_str());
        }
        self.broadcast(
            &ServerMessage::PlayerLeft(PlayerLeft {
                id: player_id.clone(),
            }),
            None,
        );
        self.pending_events.push_back(ServerEvent::PlayerLeft {
            id: player_id,
            reason,
        });
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats {
            tick: self.tick,
            uptime: self.start_time.elapsed(),
            player_count: self.players.len(),
            connection_count: self.peers.len(),
        }
    }
}

fn frame_message(message: &ServerMessage) -> Option<Vec<u8>> {
    match encode(message).and_then(|body| frame(&body)) {
        Ok(framed) => Some(framed),
        Err(e) => {
            log::warn!("Dropping outbound message: {}", e);
            None
        }
    }
}

pub fn log_event(event: &ServerEvent) {
    match event {
        ServerEvent::PeerConnected { addr } => log::debug!("Connection from {}", addr),
        ServerEvent::PlayerJoined { id, name, addr } => {
            log::debug!("Player {} ({}) registered from {}", name, id, addr)
        }
        ServerEvent::PlayerLeft { id, reason } => {
            log::debug!("Player {} {}", id, reason.as_str())
        }
        ServerEvent::PeerDropped { addr, reason } => {
            log::debug!("Connection from {} {}", addr, reason.as_str())
        }
        ServerEvent::Error { message } => log::error!("{}", message),
    }
}

#[derive(Debug, Clone)]
pub struct ServerStats {
    pub tick: u64,
    pub uptime: Duration,
    pub player_count: usize,
    pub connection_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpStream;
    use std::thread;

    use convoy::net::{
        ChatSend, ControlState, Decoded, FrameDecoder, InputCommand, Timestamp, decode,
    };

    use crate::player::MAX_WORLD_SEED;

    struct TestClient {
        stream: TcpStream,
        decoder: FrameDecoder,
    }

    impl TestClient {
        fn connect(server: &RelayServer) -> Self {
            let stream = TcpStream::connect(server.local_addr().unwrap()).unwrap();
            stream.set_nonblocking(true).unwrap();
            Self {
                stream,
                decoder: FrameDecoder::new(),
            }
        }

        fn send(&mut self, message: &ClientMessage) {
            let framed = frame(&encode(message).unwrap()).unwrap();
            self.stream.set_nonblocking(false).unwrap();
            self.stream.write_all(&framed).unwrap();
            self.stream.set_nonblocking(true).unwrap();
        }

        fn join(&mut self, server: &mut RelayServer, id: &str) -> ServerInit {
            self.send(&ClientMessage::Init(ClientInit {
                participant_id: id.into(),
                display_name: format!("Driver {}", id),
                vehicle_class: "sports".into(),
            }));
            match self.recv(server) {
                ServerMessage::Init(init) => init,
                other => panic!("Expected init, got {:?}", other),
            }
        }

        fn try_recv(&mut self) -> Option<ServerMessage> {
            let mut buf = [0u8; 4096];
            loop {
                match self.stream.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => self.decoder.extend(&buf[..n]),
                    Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) => panic!("read failed: {}", e),
                }
            }
            let body = self.decoder.next_frame().unwrap()?;
            match decode::<ServerMessage>(&body).unwrap() {
                Decoded::Message(message) => Some(message),
                Decoded::UnknownKind(kind) => panic!("unknown kind {}", kind),
            }
        }

        fn recv(&mut self, server: &mut RelayServer) -> ServerMessage {
            let start = Instant::now();
            while start.elapsed() < Duration::from_secs(2) {
                server.tick_once();
                if let Some(message) = self.try_recv() {
                    return message;
                }
                thread::sleep(Duration::from_millis(1));
            }
            panic!("No message received");
        }
    }

    fn server_with(config: ServerConfig) -> RelayServer {
        RelayServer::bind("127.0.0.1:0", config).unwrap()
    }

    fn pump(server: &mut RelayServer, duration: Duration) {
        let start = Instant::now();
        while start.elapsed() < duration {
            server.tick_once();
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_init_reply_spawns_on_ring() {
        let mut server = server_with(ServerConfig::default());
        let mut alice = TestClient::connect(&server);

        let init = alice.join(&mut server, "alice");
        assert_eq!(init.participant_id, "alice");
        assert!((1..=MAX_WORLD_SEED).contains(&init.world_seed));
        assert_eq!(init.world_seed, server.world_seed());
        assert_eq!(init.players.len(), 1);

        let me = &init.players[0];
        assert_eq!(me.vehicle_class, "sports");
        let [x, y, z] = me.position;
        assert!(((x * x + z * z).sqrt() - 20.0).abs() < 1e-3);
        assert_eq!(y, 0.5);
    }

    #[test]
    fn test_join_is_announced_to_others() {
        let mut server = server_with(ServerConfig::default());
        let mut alice = TestClient::connect(&server);
        let mut bob = TestClient::connect(&server);
        alice.join(&mut server, "alice");

        let init = bob.join(&mut server, "bob");
        let ids: Vec<&str> = init.players.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["alice", "bob"]);

        match alice.recv(&mut server) {
            ServerMessage::PlayerJoined(info) => {
                assert_eq!(info.id, "bob");
                assert_eq!(info.name, "Driver bob");
            }
            other => panic!("Expected playerJoined, got {:?}", other),
        }
    }

    #[test]
    fn test_position_relayed_to_others_only() {
        let mut server = server_with(ServerConfig::default());
        let mut alice = TestClient::connect(&server);
        let mut bob = TestClient::connect(&server);
        alice.join(&mut server, "alice");
        bob.join(&mut server, "bob");
        alice.recv(&mut server); // playerJoined bob

        alice.send(&ClientMessage::Position(PositionUpdate {
            position: [1.0, 2.0, 3.0],
            rotation: [0.0, 0.5, 0.0],
            velocity: [4.0, 0.0, 0.0],
        }));
        match bob.recv(&mut server) {
            ServerMessage::PlayerPosition(update) => {
                assert_eq!(update.id, "alice");
                assert_eq!(update.position, [1.0, 2.0, 3.0]);
                assert_eq!(update.velocity, [4.0, 0.0, 0.0]);
            }
            other => panic!("Expected playerPosition, got {:?}", other),
        }

        alice.send(&ClientMessage::Ping(Timestamp { millis: 77 }));
        assert_eq!(
            alice.recv(&mut server),
            ServerMessage::Pong(Timestamp { millis: 77 })
        );
    }

    #[test]
    fn test_chat_broadcast_includes_sender() {
        let mut server = server_with(ServerConfig::default());
        let mut alice = TestClient::connect(&server);
        let mut bob = TestClient::connect(&server);
        alice.join(&mut server, "alice");
        bob.join(&mut server, "bob");
        alice.recv(&mut server); // playerJoined bob

        bob.send(&ClientMessage::Chat(ChatSend {
            text: format!("  {}  ", "y".repeat(300)),
        }));

        for client in [&mut alice, &mut bob] {
            match client.recv(&mut server) {
                ServerMessage::Chat(chat) => {
                    assert_eq!(chat.sender_id, "bob");
                    assert_eq!(chat.sender_name, "Driver bob");
                    assert_eq!(chat.text.len(), 200);
                }
                other => panic!("Expected chat, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_input_is_acknowledged_without_correction() {
        let mut server = server_with(ServerConfig::default());
        let mut alice = TestClient::connect(&server);
        alice.join(&mut server, "alice");

        alice.send(&ClientMessage::Input(InputCommand {
            id: 9,
            control: ControlState::default(),
        }));
        assert_eq!(
            alice.recv(&mut server),
            ServerMessage::InputAck(InputAck {
                id: 9,
                correction: None
            })
        );
    }

    #[test]
    fn test_messages_before_init_are_replayed() {
        let mut server = server_with(ServerConfig::default());
        let mut alice = TestClient::connect(&server);

        alice.send(&ClientMessage::Ping(Timestamp { millis: 5 }));
        pump(&mut server, Duration::from_millis(20));
        assert!(alice.try_recv().is_none());

        alice.join(&mut server, "alice");
        assert_eq!(
            alice.recv(&mut server),
            ServerMessage::Pong(Timestamp { millis: 5 })
        );
    }

    #[test]
    fn test_disconnect_broadcasts_player_left() {
        let mut server = server_with(ServerConfig::default());
        let mut alice = TestClient::connect(&server);
        let mut bob = TestClient::connect(&server);
        alice.join(&mut server, "alice");
        bob.join(&mut server, "bob");
        alice.recv(&mut server); // playerJoined bob

        drop(bob);
        assert_eq!(
            alice.recv(&mut server),
            ServerMessage::PlayerLeft(PlayerLeft { id: "bob".into() })
        );
        assert_eq!(server.stats().player_count, 1);

        let left = server.drain_events().any(|e| {
            matches!(e, ServerEvent::PlayerLeft { ref id, .. } if id == "bob")
        });
        assert!(left);
    }

    #[test]
    fn test_peer_over_write_backlog_is_dropped() {
        let config = ServerConfig {
            max_write_backlog: 16,
            ..Default::default()
        };
        let mut server = server_with(config);
        let mut alice = TestClient::connect(&server);

        alice.send(&ClientMessage::Init(ClientInit {
            participant_id: "alice".into(),
            display_name: "Driver alice".into(),
            vehicle_class: "sports".into(),
        }));
        pump(&mut server, Duration::from_millis(100));

        assert_eq!(server.stats().player_count, 0);
        let dropped = server.drain_events().any(|e| {
            matches!(
                e,
                ServerEvent::PlayerLeft { ref id, reason: DisconnectReason::Error } if id == "alice"
            )
        });
        assert!(dropped);
    }

    #[test]
    fn test_inactive_players_are_removed() {
        let config = ServerConfig {
            inactivity_timeout: Duration::from_millis(50),
            ..Default::default()
        };
        let mut server = server_with(config);
        let mut alice = TestClient::connect(&server);
        alice.join(&mut server, "alice");

        pump(&mut server, Duration::from_millis(200));

        assert_eq!(server.stats().player_count, 0);
        assert_eq!(server.stats().connection_count, 0);
        let timed_out = server.drain_events().any(|e| {
            matches!(e, ServerEvent::PlayerLeft { reason: DisconnectReason::Timeout, .. })
        });
        assert!(timed_out);
    }

    #[test]
    fn test_duplicate_id_replaces_old_connection() {
        let mut server = server_with(ServerConfig::default());
        let mut first = TestClient::connect(&server);
        let mut second = TestClient::connect(&server);

        first.join(&mut server, "alice");
        let init = second.join(&mut server, "alice");

        assert_eq!(init.players.len(), 1);
        assert_eq!(server.stats().player_count, 1);
        assert_eq!(server.stats().connection_count, 1);
    }

    #[test]
    fn test_blank_identity_gets_generated_id() {
        let mut server = server_with(ServerConfig::default());
        let mut anon = TestClient::connect(&server);

        let init = anon.join(&mut server, "  ");
        assert!(init.participant_id.starts_with("player-"));
        assert_eq!(init.players[0].id, init.participant_id);
    }
}
