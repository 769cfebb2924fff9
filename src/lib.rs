//! Color quantization and filament matching.
//!
//! An RGBA image is reduced to a small palette (k-means++ or median cut),
//! perceptually close palette entries are merged, the result is turned into
//! regions, and the regions are matched greedily to a filament inventory.
//!
//! ```
//! use filament_quantizer::{FilamentInventory, ImageData, QuantizeOptions, QuantizeRequest};
//!
//! let pixels = [[255, 0, 0, 255], [255, 0, 0, 255], [0, 0, 255, 255], [0, 0, 0, 0]].concat();
//! let image = ImageData::new(pixels, 2, 2).unwrap();
//! let request = QuantizeRequest::new(image, QuantizeOptions { max_colors: 4, ..Default::default() });
//!
//! let result = filament_quantizer::quantize_image(&request).unwrap();
//! assert_eq!(result.regions.len(), 2);
//!
//! let inventory = FilamentInventory::builtin().unwrap();
//! let mapping = inventory.auto_map_regions(&result.regions).unwrap();
//! assert_eq!(mapping.len(), 2);
//! ```
//!
//! [`QuantizationService`] runs the same pipeline on worker threads with a
//! FIFO queue, a timeout and an in-process fallback.

pub mod cancel;
pub mod color;
pub mod error;
pub mod filament;
pub mod merge;
pub mod pipeline;
pub mod quantize;
pub mod regions;
pub mod sampler;
pub mod service;
pub mod wasm;

pub use cancel::CancelToken;
pub use color::{ColorCount, Rgb, delta_e, rgb_to_xyz, xyz_to_lab};
pub use error::{ChannelError, ErrorResponse, FilamentError, QuantizeError, ServiceError};
pub use filament::{
    Filament, FilamentInventory, FilamentMatch, MatchMethod, MatchQuality, RegionAssignment,
    find_best_filament_match,
};
pub use merge::merge_palette;
pub use pipeline::{
    ImageAnalysis, QuantizeOptions, QuantizeRequest, QuantizeResult, analyze_image,
    analyze_image_cancellable, fallback_quantize, quantize_image, quantize_image_cancellable,
};
pub use quantize::{Algorithm, Quantization, quantize, quantize_cancellable};
pub use regions::{Region, RegionMap};
pub use sampler::{ImageData, sample_pixels, sample_pixels_cancellable};
pub use service::{
    ExecutionChannel, Job, JobOutput, JobResult, Pending, QuantizationService, ServiceConfig,
    ThreadChannel,
};
