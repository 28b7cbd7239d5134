//! Domain entity definitions.

mod image;

pub use image::{
    CacheKey, DecodedImage, ExecutionContext, FetchRequest, ImageSource, LoadOutcome, LoadedImage,
};
