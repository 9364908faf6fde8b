//! Incremental training-set construction
//!
//! Each classified annotation is rasterized and its feature vectors computed
//! once; the result is cached under a fingerprint of everything it depends
//! on (geometry, class, plane, resolution, boundary strategy, feature
//! calculator). Overlaps are resolved only when cached entries are combined,
//! so an edit to one annotation never invalidates another's entry.
//!
//! Overlap policy: where annotations overlap, the one with the smallest area
//! labels the pixel; equal areas go to the most recently added annotation.

use super::labels::ClassLabels;
use super::rasterize::{rasterize_polygon, PixelLabel};
use super::{BoundaryStrategy, TrainingSet};
use crate::features::FeatureCalculator;
use ndarray::Array2;
use pixclass_core::{
    ImageServer, ObjectId, PathClass, PathObject, RegionRequest, Resolution, Result,
};
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::hash::{Hash, Hasher};
use tracing::debug;

/// Cached rasterization of one annotation.
#[derive(Debug, Clone)]
struct CachedRegion {
    fingerprint: u64,
    area: f64,
    class: PathClass,
    z: usize,
    t: usize,
    pixels: Vec<(u32, u32, PixelLabel)>,
    /// Row-major, `pixels.len() × n_features`
    features: Vec<f32>,
}

/// Cache activity of the most recent build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildStats {
    /// Annotations whose cached entry was reused
    pub reused: usize,
    /// Annotations rasterized in this build
    pub rasterized: usize,
    /// Cached entries dropped because their annotation disappeared
    pub evicted: usize,
}

/// Builds [`TrainingSet`]s from annotations, reusing unchanged work.
#[derive(Debug, Default)]
pub struct TrainingSampleBuilder {
    labels: ClassLabels,
    cache: HashMap<ObjectId, CachedRegion>,
    stats: BuildStats,
}

fn fingerprint(
    annotation: &PathObject,
    class: &PathClass,
    downsample: f64,
    strategy: &BoundaryStrategy,
    calculator: &str,
    image_size: (usize, usize),
) -> u64 {
    let mut h = DefaultHasher::new();
    for polygon in &annotation.roi {
        for ring in std::iter::once(polygon.exterior()).chain(polygon.interiors()) {
            u64::MAX.hash(&mut h);
            for coord in ring.coords() {
                coord.x.to_bits().hash(&mut h);
                coord.y.to_bits().hash(&mut h);
            }
        }
    }
    class.hash(&mut h);
    (annotation.z, annotation.t).hash(&mut h);
    downsample.to_bits().hash(&mut h);
    format!("{strategy:?}").hash(&mut h);
    calculator.hash(&mut h);
    image_size.hash(&mut h);
    h.finish()
}

/// Full-resolution `[start, end)` covering working pixels `first..first + n`.
///
/// `start` never passes the centre of `first`; `end` is clipped to the image.
fn full_res_span(first: usize, n: usize, d: f64, limit: usize) -> (usize, usize) {
    let start = ((first as f64 * d).round()).min(((first as f64 + 0.5) * d).floor()) as usize;
    let end = (((first + n) as f64 * d).ceil() as usize).min(limit);
    (start.min(limit.saturating_sub(1)), end)
}

impl TrainingSampleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Class order shared by all builds of this builder
    pub fn class_labels(&self) -> &ClassLabels {
        &self.labels
    }

    /// Cache activity of the last [`build`](Self::build)
    pub fn last_stats(&self) -> BuildStats {
        self.stats
    }

    /// Forget all cached rasterizations (class order is kept).
    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    /// Build a training set.
    ///
    /// Only classified annotations contribute. Unannotated pixels never become
    /// samples; a background class must be drawn explicitly. The returned set
    /// contains the classes that received samples, ordered by first encounter
    /// across all builds of this builder.
    pub fn build(
        &mut self,
        image: &dyn ImageServer,
        annotations: &[PathObject],
        calculator: &dyn FeatureCalculator,
        resolution: &Resolution,
        strategy: &BoundaryStrategy,
    ) -> Result<TrainingSet> {
        strategy.validate()?;
        let d = resolution.downsample();
        let width = (image.width() as f64 / d).ceil() as usize;
        let height = (image.height() as f64 / d).ceil() as usize;
        let n_features = calculator.n_features(image.n_channels());
        let feature_names = calculator.band_names(&image.channel_names());
        let calculator_name = calculator.name();
        let boundary_class = strategy.boundary_class();

        let classified: Vec<(&PathObject, &PathClass)> = annotations
            .iter()
            .filter(|a| a.is_annotation())
            .filter_map(|a| a.class.as_ref().map(|c| (a, c)))
            .collect();

        let mut stats = BuildStats::default();
        for (annotation, class) in &classified {
            self.labels.register(class);
            if let Some(bc) = &boundary_class {
                self.labels.register(bc);
            }

            let fp = fingerprint(
                annotation,
                class,
                d,
                strategy,
                &calculator_name,
                (image.width(), image.height()),
            );
            if self
                .cache
                .get(&annotation.id())
                .is_some_and(|entry| entry.fingerprint == fp)
            {
                stats.reused += 1;
                continue;
            }

            let region = rasterize_polygon(&annotation.roi, d, strategy.thickness(), width, height);
            let mut features = Vec::with_capacity(region.pixels.len() * n_features);
            let mut pixels = Vec::with_capacity(region.pixels.len());
            if !region.is_empty() {
                let (x, x_end) = full_res_span(region.col0, region.cols, d, image.width());
                let (y, y_end) = full_res_span(region.row0, region.rows, d, image.height());
                let request = RegionRequest {
                    x: x as i64,
                    y: y as i64,
                    width: x_end - x,
                    height: y_end - y,
                    downsample: d,
                    z: annotation.z,
                    t: annotation.t,
                };
                let feature_image = calculator.compute(image, &request)?;
                let data = feature_image.data();
                let (_, fr, fc) = data.dim();
                // Each pixel reads the feature whose block holds its centre
                let local = |i: u32, origin: usize| ((i as f64 + 0.5) * d - origin as f64) / d;
                for &(r, c, label) in &region.pixels {
                    let (lr, lc) = (local(r, y).floor() as usize, local(c, x).floor() as usize);
                    if lr >= fr || lc >= fc {
                        continue;
                    }
                    features.extend((0..n_features).map(|b| data[[b, lr, lc]]));
                    pixels.push((r, c, label));
                }
                if pixels.len() < region.pixels.len() {
                    debug!(
                        annotation = ?annotation.id(),
                        skipped = region.pixels.len() - pixels.len(),
                        "pixels centred outside the image"
                    );
                }
            }
            stats.rasterized += 1;
            self.cache.insert(
                annotation.id(),
                CachedRegion {
                    fingerprint: fp,
                    area: annotation.area(),
                    class: (*class).clone(),
                    z: annotation.z,
                    t: annotation.t,
                    pixels,
                    features,
                },
            );
        }

        let live: HashSet<ObjectId> = classified.iter().map(|(a, _)| a.id()).collect();
        let before = self.cache.len();
        self.cache.retain(|id, _| live.contains(id));
        stats.evicted = before - self.cache.len();
        self.stats = stats;

        // Paint largest first so smaller (and, on ties, later) annotations win
        let mut order: Vec<usize> = (0..classified.len()).collect();
        order.sort_by(|&a, &b| {
            let (area_a, area_b) = (classified[a].0.area(), classified[b].0.area());
            area_b.total_cmp(&area_a).then(a.cmp(&b))
        });
        let mut owner: BTreeMap<(usize, usize, u32, u32), (ObjectId, usize)> = BTreeMap::new();
        for &i in &order {
            let id = classified[i].0.id();
            let Some(entry) = self.cache.get(&id) else {
                continue;
            };
            for (k, &(r, c, _)) in entry.pixels.iter().enumerate() {
                owner.insert((entry.t, entry.z, r, c), (id, k));
            }
        }

        let mut samples: Vec<(PathClass, &[f32])> = Vec::with_capacity(owner.len());
        for (id, k) in owner.values() {
            let Some(entry) = self.cache.get(id) else {
                continue;
            };
            let class = match entry.pixels[*k].2 {
                PixelLabel::Interior => entry.class.clone(),
                PixelLabel::Boundary => match &boundary_class {
                    Some(bc) => bc.clone(),
                    None => continue,
                },
            };
            samples.push((class, &entry.features[k * n_features..(k + 1) * n_features]));
        }

        let present: HashSet<&PathClass> = samples.iter().map(|(c, _)| c).collect();
        let classes = self.labels.ordered_subset(|c| present.contains(c));
        let index: HashMap<&PathClass, usize> =
            classes.iter().enumerate().map(|(i, c)| (c, i)).collect();

        let mut matrix = Array2::<f32>::zeros((samples.len(), n_features));
        let mut labels = Vec::with_capacity(samples.len());
        for (row, (class, values)) in samples.iter().enumerate() {
            for (col, &v) in values.iter().enumerate() {
                matrix[[row, col]] = v;
            }
            labels.push(index[class]);
        }

        debug!(
            samples = labels.len(),
            classes = classes.len(),
            reused = stats.reused,
            rasterized = stats.rasterized,
            evicted = stats.evicted,
            "built training set"
        );
        TrainingSet::new(matrix, labels, classes, feature_names)
    }
}
