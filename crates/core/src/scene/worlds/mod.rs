//! The four themed worlds.

pub mod cadence;
pub mod entropy;
pub mod reverie;
pub mod strata;

use super::World;
use crate::engine::WorldKind;

pub use cadence::{BeatState, Cadence};
pub use entropy::{ChaosMetrics, Entropy};
pub use reverie::{Act, Reverie};
pub use strata::{GenreLayer, Strata};

pub fn create_world(kind: WorldKind) -> Box<dyn World> {
    match kind {
        WorldKind::Reverie => Box::new(Reverie::new()),
        WorldKind::Strata => Box::new(Strata::new()),
        WorldKind::Entropy => Box::new(Entropy::new()),
        WorldKind::Cadence => Box::new(Cadence::new()),
    }
}
