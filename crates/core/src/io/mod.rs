//! Reading source images and writing classifier output

mod native;

pub use native::{
    read_tiff_image, read_tiff_image_from_buffer, write_classification_tiff,
    write_classification_tiff_to_buffer, write_probability_tiff,
};
