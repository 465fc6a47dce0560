//! Power levels: the state event model and the space-to-room reconciler.

pub mod levels;
mod reconcile;

pub use levels::PowerLevels;
pub use reconcile::{PowerChange, Reconciler, compute_diff};
