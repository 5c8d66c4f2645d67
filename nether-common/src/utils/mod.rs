//! Small helpers shared across the Nether crates.

pub mod random;
pub mod time;
