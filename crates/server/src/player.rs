use std::collections::hash_map::RandomState;
use std::f32::consts::TAU;
use std::hash::{BuildHasher, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

use convoy::net::{PlayerInfo, PlayerPosition, PositionUpdate};

pub const MAX_WORLD_SEED: u32 = 1_000_000;

static RANDOM_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone)]
pub struct Player {
    pub id: String,
    pub name: String,
    pub vehicle_class: String,
    pub position: [f32; 3],
    pub rotation: [f32; 3],
    pub velocity: [f32; 3],
}

impl Player {
    /// Places a new player on a ring around the origin, facing along the
    /// angle it was placed at.
    pub fn spawn(
        id: String,
        name: String,
        vehicle_class: String,
        angle: f32,
        radius: f32,
        height: f32,
    ) -> Self {
        Self {
            id,
            name,
            vehicle_class,
            position: [angle.cos() * radius, height, angle.sin() * radius],
            rotation: [0.0, angle, 0.0],
            velocity: [0.0; 3],
        }
    }

    pub fn apply(&mut self, update: &PositionUpdate) {
        self.position = update.position;
        self.rotation = update.rotation;
        self.velocity = update.velocity;
    }

    pub fn info(&self) -> PlayerInfo {
        PlayerInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            vehicle_class: self.vehicle_class.clone(),
            position: self.position,
            rotation: self.rotation,
        }
    }

    pub fn position_message(&self) -> PlayerPosition {
        PlayerPosition {
            id: self.id.clone(),
            position: self.position,
            rotation: self.rotation,
            velocity: self.velocity,
        }
    }
}

pub fn random_u64() -> u64 {
    let state = RandomState::new();
    let mut hasher = state.build_hasher();
    hasher.write_u64(RANDOM_COUNTER.fetch_add(1, Ordering::Relaxed));
    hasher.write_u128(
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default(),
    );
    hasher.finish()
}

pub fn random_angle() -> f32 {
    (random_u64() as f64 / u64::MAX as f64) as f32 * TAU
}

/// A seed in `1..=MAX_WORLD_SEED`.
pub fn random_world_seed() -> u32 {
    (random_u64() % MAX_WORLD_SEED as u64) as u32 + 1
}

pub fn generate_player_id() -> String {
    format!("player-{:08x}", random_u64() as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    #[test]
    fn test_spawn_on_ring() {
        for _ in 0..32 {
            let angle = random_angle();
            let player = Player::spawn("a".into(), "A".into(), "default".into(), angle, 20.0, 0.5);
            let [x, y, z] = player.position;
            assert!(((x * x + z * z).sqrt() - 20.0).abs() < 1e-3);
            assert_eq!(y, 0.5);
            assert_eq!(player.rotation[1], angle);
        }
    }

    #[test]
    fn test_spawn_quarter_turn() {
        let player = Player::spawn("a".into(), "A".into(), "truck".into(), FRAC_PI_2, 10.0, 0.5);
        assert!(player.position[0].abs() < 1e-5);
        assert!((player.position[2] - 10.0).abs() < 1e-5);
    }

    #[test]
    fn test_world_seed_range() {
        for _ in 0..1000 {
            let seed = random_world_seed();
            assert!((1..=MAX_WORLD_SEED).contains(&seed));
        }
    }

    #[test]
    fn test_generated_ids_differ() {
        assert_ne!(generate_player_id(), generate_player_id());
    }
}
