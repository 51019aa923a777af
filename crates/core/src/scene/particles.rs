use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::engine::{ResourceId, ResourceKind, ResourceTracker};

/// GPU bytes per particle: position and color (3 × f32 each) plus size.
pub const BYTES_PER_PARTICLE: u64 = 28;

/// How a particle bank moves. Each world keys its particles on one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementArchetype {
    ErraticJitter,
    SlowDrift,
    ExplosiveChaos,
    AntiGravityRise,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticleConfig {
    /// Requested particle count before quality limits.
    pub count: u32,
    pub archetype: MovementArchetype,
    pub origin: Vec3,
    /// Half-extent of the spawn volume.
    pub spread: f32,
    pub color: Vec3,
    pub size: f32,
}

impl ParticleConfig {
    pub fn new(count: u32, archetype: MovementArchetype) -> Self {
        Self {
            count,
            archetype,
            origin: Vec3::ZERO,
            spread: 10.0,
            color: Vec3::ONE,
            size: 0.1,
        }
    }

    pub fn at(mut self, origin: Vec3, spread: f32) -> Self {
        self.origin = origin;
        self.spread = spread.max(0.01);
        self
    }

    pub fn colored(mut self, color: Vec3, size: f32) -> Self {
        self.color = color;
        self.size = size.max(0.0);
        self
    }
}

/// Index of a particle system inside its stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ParticleHandle(pub(crate) usize);

/// Fixed-capacity point cloud. Buffers are written in place every frame and
/// only reallocated when the quality budget grows past the capacity.
#[derive(Debug)]
pub struct ParticleSystem {
    name: String,
    config: ParticleConfig,
    capacity: u32,
    draw_range: u32,
    visible: bool,
    enabled: bool,
    positions: Vec<Vec3>,
    velocities: Vec<Vec3>,
    colors: Vec<Vec3>,
    sizes: Vec<f32>,
    resource: Option<ResourceId>,
    reallocations: u32,
}

impl ParticleSystem {
    pub(crate) fn allocate(
        name: String,
        config: ParticleConfig,
        capacity: u32,
        tracker: &ResourceTracker,
        rng: &mut fastrand::Rng,
    ) -> Self {
        let mut system = Self {
            name,
            config,
            capacity: 0,
            draw_range: 0,
            visible: true,
            enabled: true,
            positions: Vec::new(),
            velocities: Vec::new(),
            colors: Vec::new(),
            sizes: Vec::new(),
            resource: None,
            reallocations: 0,
        };
        system.reallocate(capacity, tracker, rng);
        system.reallocations = 0;
        system
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ParticleConfig {
        &self.config
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Number of particles actually drawn.
    pub fn draw_range(&self) -> u32 {
        if self.visible && self.enabled {
            self.draw_range
        } else {
            0
        }
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub(crate) fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    /// World-side switch, independent of quality-driven visibility.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn reallocations(&self) -> u32 {
        self.reallocations
    }

    pub fn resource(&self) -> Option<ResourceId> {
        self.resource
    }

    pub fn positions(&self) -> &[Vec3] {
        &self.positions[..self.draw_range as usize]
    }

    pub fn colors_mut(&mut self) -> &mut [Vec3] {
        &mut self.colors[..self.draw_range as usize]
    }

    pub fn sizes_mut(&mut self) -> &mut [f32] {
        &mut self.sizes[..self.draw_range as usize]
    }

    /// Mean distance of the drawn particles from the spawn origin.
    pub fn mean_spread(&self) -> f32 {
        let live = self.positions();
        if live.is_empty() {
            return 0.0;
        }
        live.iter().map(|p| p.distance(self.config.origin)).sum::<f32>() / live.len() as f32
    }

    /// Mean speed of the drawn particles.
    pub fn mean_speed(&self) -> f32 {
        let live = &self.velocities[..self.draw_range as usize];
        if live.is_empty() {
            return 0.0;
        }
        live.iter().map(|v| v.length()).sum::<f32>() / live.len() as f32
    }

    /// Moves the drawn particles one step according to their archetype.
    /// `velocity_scale` multiplies every displacement.
    pub fn step(&mut self, delta: f32, energy: f32, velocity_scale: f32, rng: &mut fastrand::Rng) {
        let count = self.draw_range as usize;
        let origin = self.config.origin;
        let spread = self.config.spread;
        let scale = velocity_scale.max(0.0);

        for i in 0..count {
            let mut velocity = self.velocities[i];
            match self.config.archetype {
                MovementArchetype::ErraticJitter => {
                    velocity = random_unit(rng) * (0.5 + energy * 4.0);
                }
                MovementArchetype::SlowDrift => {
                    let wander = random_unit(rng) * 0.05;
                    velocity = (velocity + wander).clamp_length_max(0.3 + energy * 0.5);
                }
                MovementArchetype::ExplosiveChaos => {
                    let outward = (self.positions[i] - origin).normalize_or(Vec3::Y);
                    velocity += outward * energy * 6.0 * delta;
                    velocity *= 0.98;
                }
                MovementArchetype::AntiGravityRise => {
                    velocity.y = (velocity.y + (0.4 + energy * 2.0) * delta).min(3.0 + energy * 3.0);
                    velocity.x *= 0.99;
                    velocity.z *= 0.99;
                }
            }
            self.velocities[i] = velocity;
            self.positions[i] += velocity * delta * scale;

            if self.positions[i].distance(origin) > spread * 2.0 {
                self.positions[i] = spawn_point(rng, origin, spread);
                if self.config.archetype == MovementArchetype::AntiGravityRise {
                    self.positions[i].y = origin.y - spread;
                }
                self.velocities[i] = initial_velocity(self.config.archetype, rng);
            }
        }
    }

    /// Applies a new budget. Shrinks only move the draw range; growing past
    /// the capacity reallocates. Returns true when a reallocation happened.
    pub(crate) fn apply_budget(
        &mut self,
        budget: u32,
        tracker: &ResourceTracker,
        rng: &mut fastrand::Rng,
    ) -> bool {
        let budget = budget.min(self.config.count);
        if budget > self.capacity {
            self.reallocate(budget, tracker, rng);
            self.draw_range = budget;
            return true;
        }
        self.draw_range = budget;
        false
    }

    pub(crate) fn release(&mut self, tracker: &ResourceTracker) {
        if let Some(id) = self.resource.take() {
            tracker.release(id);
        }
        self.draw_range = 0;
    }

    fn reallocate(&mut self, capacity: u32, tracker: &ResourceTracker, rng: &mut fastrand::Rng) {
        if let Some(id) = self.resource.take() {
            tracker.release(id);
        }
        let n = capacity as usize;
        let (origin, spread) = (self.config.origin, self.config.spread);
        self.positions = (0..n).map(|_| spawn_point(rng, origin, spread)).collect();
        self.velocities = (0..n)
            .map(|_| initial_velocity(self.config.archetype, rng))
            .collect();
        self.colors = vec![self.config.color; n];
        self.sizes = vec![self.config.size; n];
        self.capacity = capacity;
        self.draw_range = capacity;
        self.resource = Some(tracker.allocate(
            ResourceKind::Buffer,
            format!("particles:{}", self.name),
            u64::from(capacity) * BYTES_PER_PARTICLE,
        ));
        self.reallocations += 1;
        tracing::debug!(system = %self.name, capacity, "particle buffers allocated");
    }
}

fn random_unit(rng: &mut fastrand::Rng) -> Vec3 {
    Vec3::new(rng.f32() * 2.0 - 1.0, rng.f32() * 2.0 - 1.0, rng.f32() * 2.0 - 1.0)
}

fn spawn_point(rng: &mut fastrand::Rng, origin: Vec3, spread: f32) -> Vec3 {
    origin + random_unit(rng) * spread
}

fn initial_velocity(archetype: MovementArchetype, rng: &mut fastrand::Rng) -> Vec3 {
    match archetype {
        MovementArchetype::ErraticJitter => random_unit(rng) * 0.5,
        MovementArchetype::SlowDrift => random_unit(rng) * 0.1,
        MovementArchetype::ExplosiveChaos => random_unit(rng) * 1.5,
        MovementArchetype::AntiGravityRise => Vec3::new(
            (rng.f32() - 0.5) * 0.2,
            0.2 + rng.f32() * 0.3,
            (rng.f32() - 0.5) * 0.2,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn system(count: u32, archetype: MovementArchetype) -> (ParticleSystem, ResourceTracker) {
        let tracker = ResourceTracker::new();
        let mut rng = fastrand::Rng::with_seed(7);
        let system = ParticleSystem::allocate(
            "test".into(),
            ParticleConfig::new(count, archetype),
            count,
            &tracker,
            &mut rng,
        );
        (system, tracker)
    }

    #[test]
    fn shrinking_keeps_the_buffer() {
        let (mut system, tracker) = system(1000, MovementArchetype::SlowDrift);
        let mut rng = fastrand::Rng::with_seed(1);
        let id = system.resource();

        assert!(!system.apply_budget(400, &tracker, &mut rng));
        assert_eq!(system.draw_range(), 400);
        assert_eq!(system.capacity(), 1000);
        assert_eq!(system.resource(), id);
        assert!(!system.apply_budget(1000, &tracker, &mut rng));
        assert_eq!(system.reallocations(), 0);
    }

    #[test]
    fn growth_past_capacity_reallocates_once() {
        let tracker = ResourceTracker::new();
        let mut rng = fastrand::Rng::with_seed(3);
        let mut system = ParticleSystem::allocate(
            "grow".into(),
            ParticleConfig::new(5000, MovementArchetype::ErraticJitter),
            2000,
            &tracker,
            &mut rng,
        );
        assert!(system.apply_budget(3000, &tracker, &mut rng));
        assert_eq!(system.capacity(), 3000);
        assert_eq!(system.reallocations(), 1);
        assert_eq!(tracker.live_count(), 1);
        assert_eq!(tracker.total_bytes(), 3000 * BYTES_PER_PARTICLE);
    }

    #[test]
    fn budget_never_exceeds_requested_count() {
        let (mut system, tracker) = system(100, MovementArchetype::SlowDrift);
        let mut rng = fastrand::Rng::with_seed(1);
        assert!(!system.apply_budget(10_000, &tracker, &mut rng));
        assert_eq!(system.draw_range(), 100);
    }

    #[test]
    fn rising_particles_move_up() {
        let (mut system, _tracker) = system(200, MovementArchetype::AntiGravityRise);
        let mut rng = fastrand::Rng::with_seed(9);
        let before: f32 = system.positions().iter().map(|p| p.y).sum();
        system.step(0.1, 0.5, 1.0, &mut rng);
        let after: f32 = system.positions().iter().map(|p| p.y).sum();
        assert!(after > before);
    }

    #[test]
    fn zero_velocity_scale_freezes_particles() {
        let (mut system, _tracker) = system(50, MovementArchetype::ExplosiveChaos);
        let mut rng = fastrand::Rng::with_seed(2);
        let before = system.positions().to_vec();
        system.step(0.1, 1.0, 0.0, &mut rng);
        assert_eq!(system.positions(), before.as_slice());
    }

    #[test]
    fn release_frees_the_buffer() {
        let (mut system, tracker) = system(10, MovementArchetype::SlowDrift);
        system.release(&tracker);
        system.release(&tracker);
        assert_eq!(tracker.live_count(), 0);
        assert_eq!(system.draw_range(), 0);
    }
}
