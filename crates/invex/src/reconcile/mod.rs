pub mod engine;
pub mod similarity;

pub use engine::ReconcileEngine;
pub use similarity::ratio;
