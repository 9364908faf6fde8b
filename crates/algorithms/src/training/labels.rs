//! Stable class ordering across training runs

use pixclass_core::PathClass;
use serde::{Deserialize, Serialize};

/// Classes in the order they were first encountered.
///
/// Kept by a [`TrainingSampleBuilder`](super::TrainingSampleBuilder) for its
/// whole lifetime, so class indices keep their meaning across retrains.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassLabels {
    seen: Vec<PathClass>,
}

impl ClassLabels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a class, returning its position in encounter order.
    pub fn register(&mut self, class: &PathClass) -> usize {
        match self.position(class) {
            Some(i) => i,
            None => {
                self.seen.push(class.clone());
                self.seen.len() - 1
            }
        }
    }

    pub fn position(&self, class: &PathClass) -> Option<usize> {
        self.seen.iter().position(|c| c == class)
    }

    /// All classes ever seen
    pub fn seen(&self) -> &[PathClass] {
        &self.seen
    }

    /// The subset of seen classes for which `present` holds, in encounter order.
    pub fn ordered_subset<F: Fn(&PathClass) -> bool>(&self, present: F) -> Vec<PathClass> {
        self.seen.iter().filter(|c| present(c)).cloned().collect()
    }
}
