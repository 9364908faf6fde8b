//! Annotation and detection objects
//!
//! Objects carry a (multi-)polygon ROI in full-resolution pixel coordinates and an
//! optional [`PathClass`]. The [`ObjectHierarchy`] owns them and publishes a
//! [`HierarchyEvent`] on every change, so consumers react through a channel
//! rather than callbacks.

use crossbeam_channel::{Receiver, Sender};
use geo::{Area, BoundingRect, Contains, Coord, MultiPolygon, Rect};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A named object classification.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PathClass(String);

impl PathClass {
    /// Name of the synthetic class assigned to annotation boundaries.
    pub const BOUNDARY_NAME: &'static str = "Boundary*";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The synthetic boundary class
    pub fn boundary() -> Self {
        Self(Self::BOUNDARY_NAME.to_string())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PathClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stable identifier of an object within one hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId(pub u64);

/// What an object represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectKind {
    /// Hand-drawn region, used for training
    Annotation,
    /// Generated object, never used for training
    Detection,
}

/// An annotation or detection.
#[derive(Debug, Clone, PartialEq)]
pub struct PathObject {
    id: ObjectId,
    pub kind: ObjectKind,
    pub roi: MultiPolygon<f64>,
    pub class: Option<PathClass>,
    pub z: usize,
    pub t: usize,
    pub locked: bool,
}

impl PathObject {
    /// A new annotation on plane (0, 0). The id is assigned when added to a hierarchy.
    pub fn annotation(roi: impl Into<MultiPolygon<f64>>, class: Option<PathClass>) -> Self {
        Self {
            id: ObjectId(0),
            kind: ObjectKind::Annotation,
            roi: roi.into(),
            class,
            z: 0,
            t: 0,
            locked: false,
        }
    }

    /// A new detection on plane (0, 0).
    pub fn detection(roi: impl Into<MultiPolygon<f64>>, class: Option<PathClass>) -> Self {
        Self {
            kind: ObjectKind::Detection,
            ..Self::annotation(roi, class)
        }
    }

    /// Move the object to another plane.
    pub fn on_plane(mut self, z: usize, t: usize) -> Self {
        self.z = z;
        self.t = t;
        self
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn is_annotation(&self) -> bool {
        self.kind == ObjectKind::Annotation
    }

    pub fn is_detection(&self) -> bool {
        self.kind == ObjectKind::Detection
    }

    /// Area of the ROI in full-resolution pixels².
    pub fn area(&self) -> f64 {
        self.roi.unsigned_area()
    }

    /// Axis-aligned bounds of the ROI.
    pub fn bounds(&self) -> Option<Rect<f64>> {
        self.roi.bounding_rect()
    }

    /// Whether the ROI contains a full-resolution point.
    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        let p = Coord { x, y };
        self.roi.iter().any(|part| part.contains(&p))
    }

    /// Summary used in change events.
    pub fn summary(&self) -> ObjectSummary {
        ObjectSummary {
            id: self.id,
            kind: self.kind,
            has_class: self.class.is_some(),
        }
    }
}

/// Minimal description of a changed object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectSummary {
    pub id: ObjectId,
    pub kind: ObjectKind,
    pub has_class: bool,
}

/// Kind of hierarchy change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HierarchyEventKind {
    /// Objects were added, removed or had their ROI changed
    Structural,
    /// Object classifications changed
    Classification,
    /// Only measurements changed
    Measurement,
}

/// A change descriptor published by [`ObjectHierarchy`].
#[derive(Debug, Clone, PartialEq)]
pub struct HierarchyEvent {
    pub kind: HierarchyEventKind,
    /// The change is still in progress (more events will follow)
    pub changing: bool,
    pub changed: Vec<ObjectSummary>,
}

impl HierarchyEvent {
    /// Whether this change can alter a training set built from annotations.
    ///
    /// Only completed, non-measurement changes that touch at least one
    /// classified object and at least one annotation qualify.
    pub fn affects_training(&self) -> bool {
        if self.changing || self.kind == HierarchyEventKind::Measurement {
            return false;
        }
        let classified = self.kind == HierarchyEventKind::Classification
            || self.changed.iter().any(|o| o.has_class);
        classified && self.changed.iter().any(|o| o.kind == ObjectKind::Annotation)
    }
}

/// Owner of all objects of one image.
#[derive(Debug, Default)]
pub struct ObjectHierarchy {
    objects: Vec<PathObject>,
    next_id: u64,
    selection: Vec<ObjectId>,
    listeners: Vec<Sender<HierarchyEvent>>,
}

impl ObjectHierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to change events.
    pub fn subscribe(&mut self) -> Receiver<HierarchyEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.listeners.push(tx);
        rx
    }

    fn publish(&mut self, event: HierarchyEvent) {
        // Disconnected listeners are dropped
        self.listeners.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Add one object, returning its id.
    pub fn add_object(&mut self, object: PathObject) -> ObjectId {
        self.add_objects(vec![object])[0]
    }

    /// Add several objects with a single structural event.
    pub fn add_objects(&mut self, objects: Vec<PathObject>) -> Vec<ObjectId> {
        let mut ids = Vec::with_capacity(objects.len());
        let mut changed = Vec::with_capacity(objects.len());
        for mut object in objects {
            self.next_id += 1;
            object.id = ObjectId(self.next_id);
            ids.push(object.id);
            changed.push(object.summary());
            self.objects.push(object);
        }
        self.publish(HierarchyEvent {
            kind: HierarchyEventKind::Structural,
            changing: false,
            changed,
        });
        ids
    }

    /// Remove objects by id. Unknown ids are ignored.
    pub fn remove_objects(&mut self, ids: &[ObjectId]) -> usize {
        let mut changed = Vec::new();
        self.objects.retain(|o| {
            if ids.contains(&o.id) {
                changed.push(o.summary());
                false
            } else {
                true
            }
        });
        self.selection.retain(|id| !ids.contains(id));
        let n = changed.len();
        if n > 0 {
            self.publish(HierarchyEvent {
                kind: HierarchyEventKind::Structural,
                changing: false,
                changed,
            });
        }
        n
    }

    /// Change an object's classification.
    pub fn set_class(&mut self, id: ObjectId, class: Option<PathClass>) -> bool {
        self.set_classes(&[(id, class)]) > 0
    }

    /// Change several classifications with a single event.
    pub fn set_classes(&mut self, updates: &[(ObjectId, Option<PathClass>)]) -> usize {
        let mut changed = Vec::new();
        for (id, class) in updates {
            if let Some(obj) = self.objects.iter_mut().find(|o| o.id == *id) {
                obj.class = class.clone();
                changed.push(obj.summary());
            }
        }
        let n = changed.len();
        if n > 0 {
            self.publish(HierarchyEvent {
                kind: HierarchyEventKind::Classification,
                changing: false,
                changed,
            });
        }
        n
    }

    /// Replace an object's ROI.
    pub fn set_roi(&mut self, id: ObjectId, roi: impl Into<MultiPolygon<f64>>) -> bool {
        let Some(obj) = self.objects.iter_mut().find(|o| o.id == id) else {
            return false;
        };
        obj.roi = roi.into();
        let summary = obj.summary();
        self.publish(HierarchyEvent {
            kind: HierarchyEventKind::Structural,
            changing: false,
            changed: vec![summary],
        });
        true
    }

    /// Signal that measurements of some objects were updated.
    pub fn notify_measurements(&mut self, ids: &[ObjectId]) {
        let changed = self
            .objects
            .iter()
            .filter(|o| ids.contains(&o.id))
            .map(PathObject::summary)
            .collect();
        self.publish(HierarchyEvent {
            kind: HierarchyEventKind::Measurement,
            changing: false,
            changed,
        });
    }

    /// Look up an object.
    pub fn get(&self, id: ObjectId) -> Option<&PathObject> {
        self.objects.iter().find(|o| o.id == id)
    }

    /// All objects in insertion order.
    pub fn objects(&self) -> &[PathObject] {
        &self.objects
    }

    /// Number of objects.
    pub fn n_objects(&self) -> usize {
        self.objects.len()
    }

    /// Snapshot of all annotations in insertion order.
    pub fn annotations(&self) -> Vec<PathObject> {
        self.objects
            .iter()
            .filter(|o| o.is_annotation())
            .cloned()
            .collect()
    }

    /// Ids of all detections.
    pub fn detection_ids(&self) -> Vec<ObjectId> {
        self.objects
            .iter()
            .filter(|o| o.is_detection())
            .map(|o| o.id)
            .collect()
    }

    /// Select every object of the given kind, replacing the selection.
    pub fn select_by_kind(&mut self, kind: ObjectKind) -> &[ObjectId] {
        self.selection = self
            .objects
            .iter()
            .filter(|o| o.kind == kind)
            .map(|o| o.id)
            .collect();
        &self.selection
    }

    /// Select a single object (or clear the selection).
    pub fn set_selected(&mut self, id: Option<ObjectId>) {
        self.selection = id.into_iter().collect();
    }

    /// Current selection.
    pub fn selection(&self) -> &[ObjectId] {
        &self.selection
    }

    /// Ids of objects on the same plane whose ROI lies inside `parent`'s ROI.
    pub fn descendants_of(&self, parent: ObjectId) -> Vec<ObjectId> {
        let Some(parent) = self.get(parent) else {
            return Vec::new();
        };
        self.objects
            .iter()
            .filter(|o| o.id != parent.id && o.z == parent.z && o.t == parent.t)
            .filter(|o| {
                o.roi
                    .iter()
                    .all(|part| parent.roi.iter().any(|p| p.contains(part)))
            })
            .map(|o| o.id)
            .collect()
    }
}
