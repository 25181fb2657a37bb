//! Core positioning algorithms

pub mod trilateration;

pub use trilateration::{PositionSolver, RangedAnchor, SolveFailure};
