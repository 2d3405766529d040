use glam::{Quat, Vec3};

use convoy::{ControlState, Correction, CorrectionBlend, LocalState, Transform, VehicleClass};

const SPAWN_HEIGHT: f32 = 0.5;
const CRUISE_FRACTION: f32 = 0.4;

/// Drives the local vehicle around a circle centred on the origin.
pub struct ScriptedDriver {
    radius: f32,
    speed: f32,
    transform: Transform,
    velocity: Vec3,
    blend: Option<CorrectionBlend>,
    max_correction_step: f32,
}

impl ScriptedDriver {
    pub fn new(vehicle: VehicleClass, radius: f32, max_correction_step: f32) -> Self {
        let radius = radius.max(1.0);
        Self {
            radius,
            speed: vehicle.stats().max_speed * CRUISE_FRACTION,
            transform: Transform {
                position: Vec3::new(radius, SPAWN_HEIGHT, 0.0),
                orientation: Quat::IDENTITY,
            },
            velocity: Vec3::ZERO,
            blend: None,
            max_correction_step,
        }
    }

    pub fn advance(&mut self, dt: f32) {
        if let Some(blend) = self.blend {
            self.transform = blend.step(self.transform, dt);
            if blend.is_settled(&self.transform) {
                self.blend = None;
            }
            self.velocity = Vec3::ZERO;
            return;
        }

        let position = self.transform.position;
        let angle = position.z.atan2(position.x) + self.speed / self.radius * dt;
        let next = Vec3::new(angle.cos() * self.radius, SPAWN_HEIGHT, angle.sin() * self.radius);

        self.velocity = if dt > 0.0 {
            (next - position) / dt
        } else {
            Vec3::ZERO
        };
        // Face along the tangent of the circle.
        self.transform = Transform {
            position: next,
            orientation: Quat::from_rotation_y(-angle - std::f32::consts::FRAC_PI_2),
        };
    }

    pub fn apply(&mut self, correction: Correction) {
        match correction {
            Correction::Blend(target) => {
                self.blend = Some(CorrectionBlend::new(target, self.max_correction_step));
            }
            Correction::Resync(target) => {
                log::warn!("Resyncing local vehicle to {:?}", target.position);
                self.blend = None;
                self.transform = target;
            }
        }
    }

    pub fn control(&self) -> ControlState {
        ControlState {
            throttle: CRUISE_FRACTION,
            brake: 0.0,
            steering: if self.blend.is_some() { 0.0 } else { 0.5 },
            handbrake: false,
        }
    }

    pub fn local_state(&self) -> LocalState {
        LocalState {
            position: self.transform.position,
            orientation: self.transform.orientation,
            velocity: self.velocity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stays_on_circle() {
        let mut driver = ScriptedDriver::new(VehicleClass::Sports, 20.0, 2.0);
        for _ in 0..600 {
            driver.advance(1.0 / 60.0);
            let p = driver.local_state().position;
            assert!((Vec3::new(p.x, 0.0, p.z).length() - 20.0).abs() < 1e-3);
        }
        let speed = driver.local_state().velocity.length();
        assert!((speed - 24.0).abs() < 0.5);
    }

    #[test]
    fn test_resync_snaps_and_blend_eases() {
        let mut driver = ScriptedDriver::new(VehicleClass::Default, 20.0, 2.0);
        let target = Transform {
            position: Vec3::new(0.0, 0.5, 20.0),
            orientation: Quat::IDENTITY,
        };

        driver.apply(Correction::Resync(target));
        assert_eq!(driver.local_state().position, target.position);

        let far = Transform {
            position: Vec3::new(0.0, 0.5, 21.0),
            orientation: Quat::IDENTITY,
        };
        driver.apply(Correction::Blend(far));
        let before = driver.local_state().position;
        driver.advance(1.0 / 60.0);
        let moved = driver.local_state().position.distance(before);
        assert!(moved > 0.0 && moved <= 2.0);
    }
}
