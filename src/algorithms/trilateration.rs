//! Elevation-corrected 2D trilateration and least-squares multilateration
//!
//! Slant ranges are first projected onto the tag's horizontal plane using the
//! vertical offset between each anchor and the reference elevation. Three anchors
//! are solved in closed form with Cramer's rule; four or more go through the normal
//! equations of the linearised system.

use crate::core::{SolvedLocation, MIN_ANCHORS};
use nalgebra::{Matrix2, Vector2};
use thiserror::Error;

/// Reasons a solve can fail. Never fatal: the next sample simply tries again.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SolveFailure {
    #[error("insufficient anchors: {available} usable, {required} required")]
    InsufficientAnchors { available: usize, required: usize },

    #[error("degenerate anchor geometry (determinant {determinant})")]
    DegenerateGeometry { determinant: f64 },
}

/// Anchor position joined with its latest measured distance
#[derive(Debug, Clone, PartialEq)]
pub struct RangedAnchor {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub z: Option<f64>,
    pub distance: f64,
}

impl RangedAnchor {
    pub fn new(id: impl Into<String>, x: f64, y: f64, z: f64, distance: f64) -> Self {
        Self {
            id: id.into(),
            x,
            y,
            z: Some(z),
            distance,
        }
    }
}

/// Planar anchor after elevation correction
#[derive(Debug, Clone, Copy)]
struct PlanarRange {
    x: f64,
    y: f64,
    r: f64,
}

/// Position solver for fixed-anchor ranging
#[derive(Debug, Clone, Default)]
pub struct PositionSolver {
    /// When set, determinants with `|det| <= epsilon` are treated as degenerate.
    /// `None` keeps the exact comparison against zero.
    pub determinant_epsilon: Option<f64>,
}

impl PositionSolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_determinant_epsilon(epsilon: f64) -> Self {
        Self {
            determinant_epsilon: Some(epsilon.abs()),
        }
    }

    /// Solve for the tag's planar position.
    ///
    /// Anchor order matters: the first usable anchor is the reference for the
    /// least-squares path and the first member of the closed-form pairs.
    pub fn solve(
        &self,
        anchors: &[RangedAnchor],
        z_correction: f64,
    ) -> Result<SolvedLocation, SolveFailure> {
        let usable: Vec<&RangedAnchor> = anchors
            .iter()
            .filter(|a| a.distance > 0.0 && a.z.is_some())
            .collect();

        if usable.len() < MIN_ANCHORS {
            return Err(SolveFailure::InsufficientAnchors {
                available: usable.len(),
                required: MIN_ANCHORS,
            });
        }

        let planar = Self::correct_elevation(&usable, z_correction);
        if planar.len() < MIN_ANCHORS {
            return Err(SolveFailure::InsufficientAnchors {
                available: planar.len(),
                required: MIN_ANCHORS,
            });
        }

        if planar.len() == MIN_ANCHORS {
            self.closed_form(&planar)
        } else {
            self.least_squares(&planar)
        }
    }

    /// Project slant ranges onto the reference plane, dropping anchors whose range
    /// is not longer than their vertical offset.
    fn correct_elevation(anchors: &[&RangedAnchor], z_correction: f64) -> Vec<PlanarRange> {
        anchors
            .iter()
            .filter_map(|anchor| {
                let z = anchor.z?;
                let dz2 = (z - z_correction).powi(2);
                let r2 = anchor.distance.powi(2);
                if r2 <= dz2 {
                    tracing::trace!(
                        anchor = %anchor.id,
                        distance = anchor.distance,
                        dz = z - z_correction,
                        "dropping anchor with range shorter than elevation offset"
                    );
                    return None;
                }
                Some(PlanarRange {
                    x: anchor.x,
                    y: anchor.y,
                    r: (r2 - dz2).sqrt(),
                })
            })
            .collect()
    }

    fn is_degenerate(&self, determinant: f64) -> bool {
        match self.determinant_epsilon {
            Some(epsilon) => determinant.abs() <= epsilon,
            None => determinant == 0.0,
        }
    }

    /// Intersect circles (1,2) and (2,3) and solve the 2x2 system with Cramer's rule
    fn closed_form(&self, anchors: &[PlanarRange]) -> Result<SolvedLocation, SolveFailure> {
        let (p1, p2, p3) = (anchors[0], anchors[1], anchors[2]);

        let a = 2.0 * (p2.x - p1.x);
        let b = 2.0 * (p2.y - p1.y);
        let c = p1.r.powi(2) - p2.r.powi(2) - p1.x.powi(2) + p2.x.powi(2) - p1.y.powi(2)
            + p2.y.powi(2);
        let d = 2.0 * (p3.x - p2.x);
        let e = 2.0 * (p3.y - p2.y);
        let f = p2.r.powi(2) - p3.r.powi(2) - p2.x.powi(2) + p3.x.powi(2) - p2.y.powi(2)
            + p3.y.powi(2);

        let determinant = a * e - b * d;
        if self.is_degenerate(determinant) {
            return Err(SolveFailure::DegenerateGeometry { determinant });
        }

        let x = (c * e - b * f) / determinant;
        let y = (a * f - c * d) / determinant;

        Ok(SolvedLocation::new(x, y))
    }

    /// Linearise against the first anchor and solve `(AᵀA)⁻¹ Aᵀb`
    fn least_squares(&self, anchors: &[PlanarRange]) -> Result<SolvedLocation, SolveFailure> {
        let reference = anchors[0];
        let mut ata = Matrix2::<f64>::zeros();
        let mut atb = Vector2::<f64>::zeros();

        for anchor in &anchors[1..] {
            let row = Vector2::new(
                2.0 * (anchor.x - reference.x),
                2.0 * (anchor.y - reference.y),
            );
            let rhs = reference.r.powi(2) - anchor.r.powi(2) - reference.x.powi(2)
                + anchor.x.powi(2)
                - reference.y.powi(2)
                + anchor.y.powi(2);

            ata += row * row.transpose();
            atb += row * rhs;
        }

        let determinant = ata[(0, 0)] * ata[(1, 1)] - ata[(0, 1)] * ata[(1, 0)];
        if self.is_degenerate(determinant) {
            return Err(SolveFailure::DegenerateGeometry { determinant });
        }

        let inverse = Matrix2::new(
            ata[(1, 1)], -ata[(0, 1)],
            -ata[(1, 0)], ata[(0, 0)],
        ) / determinant;
        let solution = inverse * atb;

        Ok(SolvedLocation::new(solution.x, solution.y))
    }
}
