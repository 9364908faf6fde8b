//! Annotation boundary handling

use pixclass_core::{Error, PathClass, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What to do with pixels within `thickness` working-resolution pixels of an
/// annotation's outline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BoundaryStrategy {
    /// Exclude boundary pixels from training. Thickness 0 keeps every pixel.
    Skip { thickness: f64 },
    /// Label boundary pixels with the shared synthetic boundary class
    Derived { thickness: f64 },
    /// Label boundary pixels with an explicit class
    ClassifyAs { class: PathClass, thickness: f64 },
}

impl Default for BoundaryStrategy {
    fn default() -> Self {
        BoundaryStrategy::Skip { thickness: 0.0 }
    }
}

impl BoundaryStrategy {
    /// Boundary width in working-resolution pixels
    pub fn thickness(&self) -> f64 {
        match self {
            BoundaryStrategy::Skip { thickness }
            | BoundaryStrategy::Derived { thickness }
            | BoundaryStrategy::ClassifyAs { thickness, .. } => *thickness,
        }
    }

    /// Same strategy with another thickness.
    pub fn with_thickness(&self, thickness: f64) -> Self {
        match self {
            BoundaryStrategy::Skip { .. } => BoundaryStrategy::Skip { thickness },
            BoundaryStrategy::Derived { .. } => BoundaryStrategy::Derived { thickness },
            BoundaryStrategy::ClassifyAs { class, .. } => BoundaryStrategy::ClassifyAs {
                class: class.clone(),
                thickness,
            },
        }
    }

    /// Class given to boundary pixels, `None` when they are excluded.
    pub fn boundary_class(&self) -> Option<PathClass> {
        if self.thickness() <= 0.0 {
            return None;
        }
        match self {
            BoundaryStrategy::Skip { .. } => None,
            BoundaryStrategy::Derived { .. } => Some(PathClass::boundary()),
            BoundaryStrategy::ClassifyAs { class, .. } => Some(class.clone()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let t = self.thickness();
        if !t.is_finite() || t < 0.0 {
            return Err(Error::invalid_parameter(
                "boundary_thickness",
                t,
                "must be finite and >= 0",
            ));
        }
        Ok(())
    }
}

impl fmt::Display for BoundaryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoundaryStrategy::Skip { thickness } => write!(f, "Skip boundary ({thickness} px)"),
            BoundaryStrategy::Derived { thickness } => {
                write!(f, "Derive boundary class ({thickness} px)")
            }
            BoundaryStrategy::ClassifyAs { class, thickness } => {
                write!(f, "Classify boundary as {class} ({thickness} px)")
            }
        }
    }
}
