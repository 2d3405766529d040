mod collaborators;
mod config;
mod events;
mod roster;

pub use collaborators::{Notifier, RemotePose, Renderer, RosterEntry, Severity};
pub use config::{DEFAULT_SYNC_INTERVAL_MS, ReconnectConfig, SessionConfig};
pub use events::SessionEvent;
pub use roster::{RemoteEntity, Roster};

use std::collections::VecDeque;

use glam::{Quat, Vec3};

use crate::net::{
    ChatBroadcast, ChatSend, ClientMessage, ConnectionEvent, ConnectionManager, ConnectionState,
    ControlState, InputAck, InputCommand, LatencyTracker, NetworkStats, PlayerInfo, PlayerLeft,
    PlayerPosition, PositionUpdate, ReconnectPolicy, ServerInit, ServerMessage, Timestamp,
    Transport, WireMessage,
    cap_chat, quat_to_rotation, rotation_to_quat, vec3_to_wire,
};
use crate::reconcile::{InputReconciler, Transform};
use crate::snapshot::{Snapshot, SnapshotInterpolator};
use crate::vehicle::VehicleClass;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("chat message is empty")]
    EmptyChat,
}

/// The locally simulated vehicle, queried once per tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalState {
    pub position: Vec3,
    pub orientation: Quat,
    pub velocity: Vec3,
}

impl Default for LocalState {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            orientation: Quat::IDENTITY,
            velocity: Vec3::ZERO,
        }
    }
}

pub struct Session<T: Transport, R: Renderer, U: Notifier> {
    config: SessionConfig,
    connection: ConnectionManager<T>,
    latency: LatencyTracker,
    interpolator: SnapshotInterpolator,
    reconciler: InputReconciler,
    roster: Roster,
    renderer: R,
    notifier: U,
    local_id: String,
    world_seed: Option<u32>,
    local: LocalState,
    last_position_sent: Option<u64>,
    pending_events: VecDeque<SessionEvent>,
}

impl<T: Transport, R: Renderer, U: Notifier> Session<T, R, U> {
    /// Builds a session that retries with the fixed delay from
    /// `config.reconnect`.
    pub fn new(config: SessionConfig, transport: T, renderer: R, notifier: U) -> Self {
        let policy = Box::new(config.reconnect.policy());
        Self::with_policy(config, transport, renderer, notifier, policy)
    }

    /// Builds a session with a custom reconnect policy. `config.reconnect`
    /// is ignored.
    pub fn with_policy(
        config: SessionConfig,
        transport: T,
        renderer: R,
        notifier: U,
        policy: Box<dyn ReconnectPolicy>,
    ) -> Self {
        let connection = ConnectionManager::new(transport, config.handshake(), policy);

        Self {
            connection,
            latency: LatencyTracker::new(config.ping_interval_ms),
            interpolator: SnapshotInterpolator::new(config.interpolation.clone()),
            reconciler: InputReconciler::new(config.input_timeout_ms, config.correction_threshold),
            roster: Roster::default(),
            renderer,
            notifier,
            local_id: config.participant_id.clone(),
            world_seed: None,
            local: LocalState::default(),
            last_position_sent: None,
            pending_events: VecDeque::new(),
            config,
        }
    }

    /// Starts connecting. Has no effect unless the session is disconnected.
    pub fn connect(&mut self, now_ms: u64) {
        if self.connection.state() != ConnectionState::Disconnected {
            log::debug!("connect() ignored while {}", self.connection.state().as_str());
            return;
        }

        self.latency.reset();
        self.last_position_sent = None;
        if let Some(event) = self.connection.open() {
            self.handle_connection_event(now_ms, event);
        }
    }

    /// Tears the session down. No collaborator is called after this returns.
    pub fn disconnect(&mut self) {
        let Some(event) = self.connection.close() else {
            return;
        };

        self.latency.cancel();
        self.reconciler.clear();
        self.world_seed = None;
        self.clear_roster();

        if let ConnectionEvent::StateChanged { from, to, .. } = event {
            self.notifier.notify("Disconnected", Severity::Info);
            self.pending_events
                .push_back(SessionEvent::StateChanged { from, to });
        }
    }

    pub fn tick(&mut self, now_ms: u64, local: &LocalState) {
        if self.connection.state() == ConnectionState::Disconnected {
            return;
        }

        for event in self.connection.poll(now_ms) {
            self.handle_connection_event(now_ms, event);
        }
        if self.connection.state() == ConnectionState::Disconnected {
            return;
        }

        if self.connection.is_connected() {
            if let Some(millis) = self.latency.poll(now_ms) {
                self.connection.send(ClientMessage::Ping(Timestamp { millis }));
            }
        }

        self.reconciler.expire(now_ms);

        self.local = *local;
        self.send_position(now_ms, local);

        let poses = self.roster.sample(&self.interpolator, now_ms);
        self.renderer.update_remote_entities(&poses);
    }

    /// Sends the local transform, at most once per sync interval and only
    /// while connected. Returns whether an update was written.
    pub fn send_position(&mut self, now_ms: u64, local: &LocalState) -> bool {
        if !self.connection.is_connected() {
            return false;
        }

        if self
            .last_position_sent
            .is_some_and(|at| now_ms < at + self.config.sync_interval_ms)
        {
            return false;
        }

        self.last_position_sent = Some(now_ms);
        self.connection.send(ClientMessage::Position(PositionUpdate {
            position: vec3_to_wire(local.position),
            rotation: quat_to_rotation(local.orientation),
            velocity: vec3_to_wire(local.velocity),
        }));
        true
    }

    pub fn send_chat_message(&mut self, text: &str) -> Result<(), SessionError> {
        let text = cap_chat(text);
        if text.is_empty() {
            return Err(SessionError::EmptyChat);
        }

        self.connection.send(ClientMessage::Chat(ChatSend { text }));
        Ok(())
    }

    /// Records a control update as pending and sends it. Returns its id.
    pub fn send_input(&mut self, now_ms: u64, control: ControlState) -> u32 {
        let input = self.reconciler.issue(now_ms, control.clamped());
        self.connection.send(ClientMessage::Input(InputCommand {
            id: input.id,
            control: input.control,
        }));
        input.id
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = SessionEvent> + '_ {
        self.pending_events.drain(..)
    }

    pub fn remote_entities(&self) -> &Roster {
        &self.roster
    }

    pub fn latency_estimate(&self) -> f64 {
        self.latency.estimate_ms()
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn world_seed(&self) -> Option<u32> {
        self.world_seed
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn reconciler(&self) -> &InputReconciler {
        &self.reconciler
    }

    pub fn stats(&self) -> &NetworkStats {
        self.connection.stats()
    }

    pub fn connection(&self) -> &ConnectionManager<T> {
        &self.connection
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn notifier(&self) -> &U {
        &self.notifier
    }

    fn handle_connection_event(&mut self, now_ms: u64, event: ConnectionEvent) {
        match event {
            ConnectionEvent::StateChanged { from, to, attempt } => {
                self.handle_state_change(now_ms, from, to, attempt)
            }
            ConnectionEvent::Message {
                message,
                received_at,
            } => self.handle_message(now_ms, received_at, message),
            ConnectionEvent::UnknownKind(kind) => {
                log::debug!("Ignoring message of unknown kind {}", kind);
            }
        }
    }

    fn handle_state_change(
        &mut self,
        now_ms: u64,
        from: ConnectionState,
        to: ConnectionState,
        attempt: u32,
    ) {
        let (message, severity) = match to {
            ConnectionState::Connecting if from == ConnectionState::Reconnecting => {
                (format!("Reconnecting (attempt {})...", attempt), Severity::Info)
            }
            ConnectionState::Connecting => ("Connecting to server...".to_string(), Severity::Info),
            ConnectionState::Connected => {
                // The first ping of a connected period is due immediately.
                self.latency.cancel();
                self.last_position_sent = None;
                ("Connected to server".to_string(), Severity::Info)
            }
            ConnectionState::Reconnecting => {
                self.latency.cancel();
                self.clear_roster();
                let delay = self.connection.retry_in(now_ms).unwrap_or_default();
                (
                    format!("Connection lost, retrying in {} ms", delay),
                    Severity::Warning,
                )
            }
            // Only an exhausted reconnect policy gets here; teardown is
            // handled by `disconnect`.
            ConnectionState::Disconnected => {
                self.latency.cancel();
                self.clear_roster();
                (
                    format!(
                        "Disconnected from server after {} failed reconnect attempts",
                        attempt.saturating_sub(1)
                    ),
                    Severity::Error,
                )
            }
        };

        self.notifier.notify(&message, severity);
        self.pending_events
            .push_back(SessionEvent::StateChanged { from, to });
    }

    /// Snapshots are stamped with `received_at`; latency uses the poll time.
    fn handle_message(&mut self, now_ms: u64, received_at: u64, message: ServerMessage) {
        log::debug!("Received {}", message.kind().as_str());
        match message {
            ServerMessage::Init(init) => self.handle_init(received_at, init),
            ServerMessage::PlayerJoined(info) => self.handle_player_joined(received_at, info),
            ServerMessage::PlayerLeft(left) => self.handle_player_left(left),
            ServerMessage::PlayerPosition(update) => {
                self.handle_player_position(received_at, update)
            }
            ServerMessage::Chat(chat) => self.handle_chat(chat),
            ServerMessage::Pong(timestamp) => {
                self.latency.record_pong(now_ms, timestamp.millis);
            }
            ServerMessage::InputAck(ack) => self.handle_input_ack(ack),
        }
    }

    fn handle_init(&mut self, received_at: u64, init: ServerInit) {
        log::info!(
            "Session initialized as {} with world seed {} and {} players",
            init.participant_id,
            init.world_seed,
            init.players.len()
        );

        for id in self.roster.clear() {
            self.renderer.remove_remote_entity(&id);
        }

        self.local_id = init.participant_id;
        self.world_seed = Some(init.world_seed);
        for player in init.players {
            if player.id != self.local_id {
                self.add_player(received_at, player);
            }
        }

        self.pending_events
            .push_back(SessionEvent::WorldSeed(init.world_seed));
        self.roster_changed();
    }

    fn handle_player_joined(&mut self, received_at: u64, info: PlayerInfo) {
        if info.id == self.local_id {
            return;
        }

        log::info!("{} joined ({})", info.name, info.vehicle_class);
        self.add_player(received_at, info);
        self.roster_changed();
    }

    fn handle_player_left(&mut self, left: PlayerLeft) {
        match self.roster.remove(&left.id) {
            Some(entity) => {
                log::info!("{} left", entity.name);
                self.renderer.remove_remote_entity(&left.id);
                self.roster_changed();
            }
            None => log::debug!("playerLeft for unknown id {}", left.id),
        }
    }

    fn handle_player_position(&mut self, received_at: u64, update: PlayerPosition) {
        if update.id == self.local_id {
            return;
        }

        let snapshot = Snapshot::new(
            received_at,
            Vec3::from_array(update.position),
            rotation_to_quat(update.rotation),
            Vec3::from_array(update.velocity),
        );

        if !self.roster.contains(&update.id) {
            log::debug!("Position for unannounced player {}, adding", update.id);
            let entity = RemoteEntity::new(
                update.id.clone(),
                update.id.clone(),
                VehicleClass::Default,
                self.interpolator.new_buffer(),
            );
            self.roster.insert(entity);
            self.roster.push_snapshot(&self.interpolator, &update.id, snapshot);
            self.roster_changed();
            return;
        }

        self.roster.push_snapshot(&self.interpolator, &update.id, snapshot);
    }

    fn handle_chat(&mut self, chat: ChatBroadcast) {
        log::info!("[chat] {}: {}", chat.sender_name, chat.text);
        self.pending_events.push_back(SessionEvent::ChatReceived {
            sender_id: chat.sender_id,
            sender_name: chat.sender_name,
            text: chat.text,
        });
    }

    fn handle_input_ack(&mut self, ack: InputAck) {
        let correction = ack.correction.map(|transform| Transform {
            position: Vec3::from_array(transform.position),
            orientation: rotation_to_quat(transform.rotation),
        });

        if let Some(correction) =
            self.reconciler
                .acknowledge(ack.id, correction, self.local.position)
        {
            self.pending_events
                .push_back(SessionEvent::Correction(correction));
        }
    }

    fn add_player(&mut self, received_at: u64, info: PlayerInfo) {
        let mut buffer = self.interpolator.new_buffer();
        buffer.push(Snapshot::new(
            received_at,
            Vec3::from_array(info.position),
            rotation_to_quat(info.rotation),
            Vec3::ZERO,
        ));

        let entity = RemoteEntity::new(
            info.id,
            info.name,
            VehicleClass::parse(&info.vehicle_class),
            buffer,
        );
        self.roster.insert(entity);
    }

    fn clear_roster(&mut self) {
        let removed = self.roster.clear();
        for id in &removed {
            self.renderer.remove_remote_entity(id);
        }
        self.roster_changed();
    }

    fn roster_changed(&mut self) {
        let entries = self.roster.entries();
        self.notifier.refresh_roster(&entries);
        self.pending_events
            .push_back(SessionEvent::RosterChanged(entries));
    }
}
