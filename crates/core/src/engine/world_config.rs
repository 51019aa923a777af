use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{CinesonicError, QualityTier};

/// The four themed worlds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorldKind {
    Reverie,
    Strata,
    Entropy,
    Cadence,
}

impl WorldKind {
    pub const ALL: [WorldKind; 4] = [Self::Reverie, Self::Strata, Self::Entropy, Self::Cadence];

    pub fn name(self) -> &'static str {
        match self {
            Self::Reverie => "reverie",
            Self::Strata => "strata",
            Self::Entropy => "entropy",
            Self::Cadence => "cadence",
        }
    }
}

impl fmt::Display for WorldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for WorldKind {
    type Err = CinesonicError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|world| world.name() == needle)
            .ok_or_else(|| CinesonicError::UnknownWorld(s.to_string()))
    }
}

/// Per-world budget for the current tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WorldConfig {
    pub world: WorldKind,
    pub tier: QualityTier,
    pub target_fps: f32,
    pub memory_budget_mb: f32,
    pub particles: bool,
    pub post_processing: bool,
    pub shadows: bool,
    pub reflections: bool,
}

impl WorldConfig {
    pub fn derive(world: WorldKind, tier: QualityTier) -> Self {
        let (target_fps, memory_budget_mb) = match tier {
            QualityTier::High => (60.0, 256.0),
            QualityTier::Medium => (45.0, 192.0),
            QualityTier::Low => (30.0, 128.0),
        };
        let mut config = Self {
            world,
            tier,
            target_fps,
            memory_budget_mb,
            particles: tier != QualityTier::Low,
            post_processing: tier == QualityTier::High,
            shadows: tier != QualityTier::Low,
            reflections: tier == QualityTier::High,
        };

        match world {
            // Particles carry this world's whole look.
            WorldKind::Entropy => config.particles = true,
            WorldKind::Reverie => config.reflections = tier != QualityTier::Low,
            WorldKind::Strata => config.shadows = false,
            WorldKind::Cadence => config.target_fps = config.target_fps.max(60.0),
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_world_names() {
        assert_eq!("Entropy".parse::<WorldKind>().unwrap(), WorldKind::Entropy);
        assert!(matches!(
            "atlantis".parse::<WorldKind>(),
            Err(CinesonicError::UnknownWorld(_))
        ));
    }

    #[test]
    fn entropy_keeps_particles_on_low_tier() {
        assert!(WorldConfig::derive(WorldKind::Entropy, QualityTier::Low).particles);
        assert!(!WorldConfig::derive(WorldKind::Reverie, QualityTier::Low).particles);
    }

    #[test]
    fn tier_drives_budgets() {
        let high = WorldConfig::derive(WorldKind::Strata, QualityTier::High);
        let low = WorldConfig::derive(WorldKind::Strata, QualityTier::Low);
        assert!(high.memory_budget_mb > low.memory_budget_mb);
        assert!(high.post_processing && !low.post_processing);
        assert!(!high.shadows);
        assert_eq!(WorldConfig::derive(WorldKind::Cadence, QualityTier::Low).target_fps, 60.0);
    }
}
