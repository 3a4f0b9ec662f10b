//! # texmap core
//!
//! Engine for resolving and converting PBR texture maps into the channel
//! layouts that game and render engines expect.
//! Designed for use by CLI tools and batch pipelines.
//!
//! ## Architecture
//!
//! - [`map_type`] - Semantic map types, aliases and filename classification
//! - [`image_loading`] - Image loading, colour-mode enforcement and saving
//! - [`convert`] - Numeric conversion primitives (pure pixel math)
//! - [`registry`] - Conversion registry and the standard conversion table
//! - [`processor`] - Per-texture-set inventory and map resolution
//! - [`handlers`] - Workflow handlers, one per output map
//! - [`factory`] - Top-level orchestration over many texture sets
//! - [`config`] - Workflow configuration and engine presets
//! - [`report`] - JSON run reports

pub mod config;
pub mod convert;
pub mod factory;
pub mod handlers;
pub mod image_loading;
pub mod map_type;
pub mod processor;
pub mod registry;
pub mod report;

// Re-export main types for convenient access
pub use config::{default_config_path, NormalFormat, WorkflowConfig, WorkflowPreset};
pub use factory::MapFactory;
pub use handlers::WorkflowHandler;
pub use image_loading::{ColorMode, ImageLoader, SUPPORTED_EXTENSIONS};
pub use map_type::{base_texture_name, group_textures_by_set, MapType};
pub use processor::{Inventory, MapEntry, ProgressCallback, TextureProcessor};
pub use registry::{ConversionPlugin, ConversionRegistry, Converter, MapConversion, StandardConversions};
pub use report::{PrepareReport, SetReport};

/// Common result type for texmap operations
pub type Result<T> = std::result::Result<T, Error>;

/// Library-wide error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A required source map could not be resolved by lookup or conversion.
    #[error("{0}")]
    MissingInput(String),

    /// The image's colour mode or bit depth has no defined mapping.
    #[error("Unsupported color mode: {0}")]
    UnsupportedMode(String),

    /// Resolution re-entered a map type that is already being resolved.
    #[error("Cyclic conversion: {}", format_chain(.0))]
    CyclicConversion(Vec<map_type::MapType>),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("{0}")]
    Other(String),
}

fn format_chain(chain: &[map_type::MapType]) -> String {
    chain
        .iter()
        .map(|t| t.name())
        .collect::<Vec<_>>()
        .join(" -> ")
}
