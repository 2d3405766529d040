use std::collections::VecDeque;

use glam::{Quat, Vec3};

use crate::net::ControlState;

pub const MAX_PENDING_INPUTS: usize = 128;
pub const DEFAULT_INPUT_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_CORRECTION_THRESHOLD: f32 = 2.0;

const CORRECTION_SPEED: f32 = 20.0;
const SETTLE_DISTANCE: f32 = 0.001;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub orientation: Quat,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PendingInput {
    pub id: u32,
    pub issued_at: u64,
    pub control: ControlState,
}

/// Server-authoritative state handed to the consumer after an ack.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Correction {
    /// Close enough to ease toward, e.g. with [`CorrectionBlend`].
    Blend(Transform),
    /// Too far to blend without a visible jump; re-synchronise instead.
    Resync(Transform),
}

impl Correction {
    pub fn target(&self) -> Transform {
        match self {
            Correction::Blend(target) | Correction::Resync(target) => *target,
        }
    }
}

#[derive(Debug)]
pub struct InputReconciler {
    pending: VecDeque<PendingInput>,
    next_id: u32,
    last_acked: u32,
    timeout_ms: u64,
    correction_threshold: f32,
    timed_out: u64,
}

impl Default for InputReconciler {
    fn default() -> Self {
        Self::new(DEFAULT_INPUT_TIMEOUT_MS, DEFAULT_CORRECTION_THRESHOLD)
    }
}

impl InputReconciler {
    pub fn new(timeout_ms: u64, correction_threshold: f32) -> Self {
        Self {
            pending: VecDeque::with_capacity(MAX_PENDING_INPUTS),
            next_id: 1,
            last_acked: 0,
            timeout_ms,
            correction_threshold,
            timed_out: 0,
        }
    }

    pub fn issue(&mut self, now_ms: u64, control: ControlState) -> PendingInput {
        let input = PendingInput {
            id: self.next_id,
            issued_at: now_ms,
            control,
        };
        self.next_id += 1;

        while self.pending.len() >= MAX_PENDING_INPUTS {
            if let Some(superseded) = self.pending.pop_front() {
                log::debug!("Input {} superseded before acknowledgment", superseded.id);
            }
        }
        self.pending.push_back(input.clone());

        input
    }

    /// Removes every pending input up to and including `id` and classifies
    /// the optional correction against the locally predicted position.
    pub fn acknowledge(
        &mut self,
        id: u32,
        correction: Option<Transform>,
        local_position: Vec3,
    ) -> Option<Correction> {
        if id <= self.last_acked {
            log::debug!("Ignoring stale ack {} (last {})", id, self.last_acked);
            return None;
        }
        self.last_acked = id;

        while self.pending.front().is_some_and(|input| input.id <= id) {
            self.pending.pop_front();
        }

        let target = correction?;
        let error = target.position.distance(local_position);
        if error > self.correction_threshold {
            log::debug!("Correction of {:.2} units exceeds threshold, resyncing", error);
            Some(Correction::Resync(target))
        } else {
            Some(Correction::Blend(target))
        }
    }

    /// Drops inputs that have waited longer than the timeout. They are not
    /// resent.
    pub fn expire(&mut self, now_ms: u64) -> usize {
        let mut dropped = 0;
        while self
            .pending
            .front()
            .is_some_and(|input| now_ms.saturating_sub(input.issued_at) > self.timeout_ms)
        {
            self.pending.pop_front();
            dropped += 1;
        }

        if dropped > 0 {
            self.timed_out += dropped as u64;
            log::warn!(
                "Reconciliation timeout: dropped {} inputs unacknowledged after {} ms",
                dropped,
                self.timeout_ms
            );
        }
        dropped
    }

    pub fn pending(&self) -> impl Iterator<Item = &PendingInput> {
        self.pending.iter()
    }

    pub fn pending_ids(&self) -> Vec<u32> {
        self.pending.iter().map(|input| input.id).collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn last_acked(&self) -> u32 {
        self.last_acked
    }

    pub fn timed_out(&self) -> u64 {
        self.timed_out
    }

    pub fn correction_threshold(&self) -> f32 {
        self.correction_threshold
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

/// Eases a local transform toward a correction target with exponential
/// decay, never moving more than `max_step` units in one frame.
#[derive(Debug, Clone, Copy)]
pub struct CorrectionBlend {
    target: Transform,
    max_step: f32,
}

impl CorrectionBlend {
    pub fn new(target: Transform, max_step: f32) -> Self {
        Self { target, max_step }
    }

    pub fn target(&self) -> Transform {
        self.target
    }

    pub fn step(&self, current: Transform, dt: f32) -> Transform {
        let factor = 1.0 - (-CORRECTION_SPEED * dt).exp();
        let offset = ((self.target.position - current.position) * factor).clamp_length_max(self.max_step);

        Transform {
            position: current.position + offset,
            orientation: current.orientation.slerp(self.target.orientation, factor),
        }
    }

    pub fn is_settled(&self, current: &Transform) -> bool {
        current.position.distance(self.target.position) < SETTLE_DISTANCE
    }
}
