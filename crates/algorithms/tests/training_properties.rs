//! End-to-end properties of feature calculation, training and extraction.

use geo::{polygon, Polygon};
use ndarray::{Array2, Array3};
use pixclass_algorithms::classification::{ClassifierModel, ModelConfig, RandomTreesParams};
use pixclass_algorithms::extraction::{extract_objects, ExtractionParams, RasterPlacement};
use pixclass_algorithms::features::{FeatureCalculator, MultiscaleFeatureCalculator, MultiscaleParams};
use pixclass_algorithms::preprocess::{FeaturePreprocessor, PreprocessorParams};
use pixclass_algorithms::training::{BoundaryStrategy, TrainingSampleBuilder};
use pixclass_algorithms::{PixelClassifier, TrainingConfig};
use pixclass_core::{
    ErrorKind, InMemoryImage, ObjectHierarchy, PathClass, PathObject, PixelCalibration, Raster,
    RegionRequest, Resolution,
};
use std::sync::Arc;

fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> Polygon<f64> {
    polygon![(x: x0, y: y0), (x: x1, y: y0), (x: x1, y: y1), (x: x0, y: y1)]
}

/// Two-channel image: a noisy dark field with a bright square in the middle.
fn test_image() -> InMemoryImage {
    InMemoryImage::new(Array3::from_shape_fn((2, 120, 120), |(ch, r, c)| {
        let noise = ((r * 31 + c * 17 + ch * 7) % 11) as f32;
        let inside = (40..80).contains(&r) && (40..80).contains(&c);
        if inside { 180.0 + noise } else { 30.0 + noise }
    }))
}

fn two_class_hierarchy() -> ObjectHierarchy {
    let mut h = ObjectHierarchy::new();
    h.add_objects(vec![
        PathObject::annotation(rect(45.0, 45.0, 75.0, 75.0), Some(PathClass::new("Bright"))),
        PathObject::annotation(rect(5.0, 5.0, 30.0, 110.0), Some(PathClass::new("Dark"))),
    ]);
    h
}

#[test]
fn test_band_count_independent_of_region_size() {
    let image = test_image();
    let calc = MultiscaleFeatureCalculator::new(MultiscaleParams::default()).unwrap();
    let expected = calc.n_features(2);
    for (w, h) in [(1, 1), (7, 3), (64, 64), (120, 120)] {
        let bands = calc.compute(&image, &RegionRequest::new(0, 0, w, h)).unwrap();
        assert_eq!(bands.n_bands(), expected);
        assert_eq!((bands.rows(), bands.cols()), (h, w));
    }
}

#[test]
fn test_skip_boundary_on_100px_square() {
    let image = InMemoryImage::new(Array3::from_elem((1, 120, 120), 1.0f32));
    let mut h = ObjectHierarchy::new();
    h.add_object(PathObject::annotation(rect(10.0, 10.0, 110.0, 110.0), Some(PathClass::new("C"))));
    let calc = MultiscaleFeatureCalculator::new(MultiscaleParams::default()).unwrap();
    let set = TrainingSampleBuilder::new()
        .build(
            &image,
            &h.annotations(),
            &calc,
            &Resolution::full(PixelCalibration::default()),
            &BoundaryStrategy::Skip { thickness: 5.0 },
        )
        .unwrap();
    // Pixel centres more than 5 px from the edge: 90 × 90
    assert_eq!(set.n_samples(), 8100);
    assert_eq!(set.classes(), &[PathClass::new("C")]);
}

#[test]
fn test_single_class_keeps_trained_model() {
    let image = test_image();
    let h = two_class_hierarchy();
    let config = TrainingConfig::new(Resolution::full(PixelCalibration::default()));
    let model = ClassifierModel::new(ModelConfig::MaximumLikelihood);
    let mut builder = TrainingSampleBuilder::new();
    PixelClassifier::train(&image, &h.annotations(), &mut builder, &model, &config).unwrap();
    let before = model.fitted().unwrap();

    let only_bright: Vec<PathObject> = h
        .annotations()
        .into_iter()
        .filter(|a| a.class == Some(PathClass::new("Bright")))
        .collect();
    let err = PixelClassifier::train(&image, &only_bright, &mut builder, &model, &config).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Training);
    assert!(Arc::ptr_eq(&before, &model.fitted().unwrap()));
}

/// Nearest class mean, used as an independent baseline.
fn nearest_centroid_accuracy(x: &Array2<f32>, y: &[usize], n_classes: usize) -> f64 {
    let d = x.ncols();
    let mut sums = vec![vec![0f64; d]; n_classes];
    let mut counts = vec![0usize; n_classes];
    for (row, &label) in x.rows().into_iter().zip(y) {
        counts[label] += 1;
        for (s, v) in sums[label].iter_mut().zip(row) {
            *s += *v as f64;
        }
    }
    let mut correct = 0;
    for (row, &label) in x.rows().into_iter().zip(y) {
        let best = (0..n_classes)
            .filter(|&c| counts[c] > 0)
            .min_by(|&a, &b| {
                let dist = |c: usize| -> f64 {
                    row.iter()
                        .zip(&sums[c])
                        .map(|(v, s)| (*v as f64 - s / counts[c] as f64).powi(2))
                        .sum()
                };
                dist(a).total_cmp(&dist(b))
            })
            .unwrap_or(0);
        if best == label {
            correct += 1;
        }
    }
    100.0 * correct as f64 / y.len() as f64
}

#[test]
fn test_training_accuracy_not_below_baseline() {
    let image = test_image();
    let h = two_class_hierarchy();
    let calc = MultiscaleFeatureCalculator::new(MultiscaleParams::default()).unwrap();
    let set = TrainingSampleBuilder::new()
        .build(
            &image,
            &h.annotations(),
            &calc,
            &Resolution::full(PixelCalibration::default()),
            &BoundaryStrategy::default(),
        )
        .unwrap();
    let pre = FeaturePreprocessor::fit(set.features().view(), &PreprocessorParams::default()).unwrap();
    let x = pre.apply_batch(set.features().view()).unwrap();

    let baseline = nearest_centroid_accuracy(&x, set.labels(), set.n_classes());
    let config = ModelConfig::RandomTrees(RandomTreesParams {
        n_trees: 10,
        ..Default::default()
    });
    let fitted = config.fit(x.view(), set.labels(), set.n_classes(), 100).unwrap();
    let predicted = fitted.predict(x.view()).unwrap();
    let correct = predicted.iter().zip(set.labels()).filter(|(p, l)| p == l).count();
    let accuracy = 100.0 * correct as f64 / set.n_samples() as f64;
    assert!(accuracy >= baseline, "{accuracy} < {baseline}");
}

#[test]
fn test_extract_two_blobs_keeps_large_one() {
    let mut raster = Raster::<u8>::new(30, 30);
    // 50-pixel blob
    for r in 3..8 {
        for c in 3..13 {
            raster.set(r, c, 1).unwrap();
        }
    }
    // 5-pixel blob
    for c in 20..25 {
        raster.set(25, c, 1).unwrap();
    }
    let params = ExtractionParams {
        min_area_pixels: 10.0,
        split: true,
        ignored_classes: vec![PathClass::new("Other")],
        ..Default::default()
    };
    let objects = extract_objects(
        &raster,
        &[PathClass::new("Other"), PathClass::new("Tumor")],
        &RasterPlacement::default(),
        None,
        &params,
    )
    .unwrap();
    assert_eq!(objects.len(), 1);
    assert_eq!(objects[0].area_pixels, 50.0);
}

#[test]
fn test_normalization_round_trip() {
    let samples = Array2::from_shape_fn((30, 4), |(i, j)| (i * (j + 1)) as f32 + j as f32 * 3.5);
    let pre = FeaturePreprocessor::fit(samples.view(), &PreprocessorParams::default()).unwrap();
    for row in samples.rows() {
        let x = row.to_vec();
        let back = pre.invert(&pre.apply(&x).unwrap()).unwrap();
        for (a, b) in x.iter().zip(&back) {
            approx::assert_relative_eq!(a, b, epsilon = 1e-3);
        }
    }
}
