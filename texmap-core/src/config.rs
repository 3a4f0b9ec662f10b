//! Workflow configuration and engine presets.
//!
//! A [`WorkflowConfig`] is read from TOML (or JSON) with every key optional;
//! presets give the usual per-engine starting points.

use crate::image_loading::SUPPORTED_EXTENSIONS;
use crate::map_type::MapType;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Tangent-space normal map handedness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NormalFormat {
    #[serde(rename = "OpenGL", alias = "opengl", alias = "gl")]
    OpenGl,
    #[serde(rename = "DirectX", alias = "directx", alias = "dx")]
    DirectX,
}

impl NormalFormat {
    /// Map type an output in this format is saved as.
    pub fn map_type(&self) -> MapType {
        match self {
            NormalFormat::OpenGl => MapType::NormalOpenGl,
            NormalFormat::DirectX => MapType::NormalDirectX,
        }
    }

    pub fn opposite(&self) -> NormalFormat {
        match self {
            NormalFormat::OpenGl => NormalFormat::DirectX,
            NormalFormat::DirectX => NormalFormat::OpenGl,
        }
    }
}

impl fmt::Display for NormalFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NormalFormat::OpenGl => write!(f, "OpenGL"),
            NormalFormat::DirectX => write!(f, "DirectX"),
        }
    }
}

impl FromStr for NormalFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "opengl" | "gl" => Ok(NormalFormat::OpenGl),
            "directx" | "dx" => Ok(NormalFormat::DirectX),
            other => Err(Error::Configuration(format!(
                "unknown normal format '{}' (expected OpenGL or DirectX)",
                other
            ))),
        }
    }
}

/// Options for one `prepare_maps` run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Pack opacity into the base colour alpha
    pub albedo_transparency: bool,
    /// Unity URP: metallic RGB + smoothness alpha
    pub metallic_smoothness: bool,
    /// Unity HDRP mask map (MSAO)
    pub mask_map: bool,
    /// Unreal / glTF occlusion-roughness-metallic
    pub orm_map: bool,
    pub normal_type: NormalFormat,
    pub output_extension: String,
    pub use_input_fallbacks: bool,
    pub use_output_fallbacks: bool,
    /// Copy inputs to `{base}_{Type}` names even when no conversion is needed
    pub rename: bool,
    pub dry_run: bool,
    pub convert_specgloss_to_pbr: bool,
    /// Black out base colour where the surface is metal
    pub cleanup_base_color: bool,
    /// Allow registry conversions; when false only existing maps are used
    pub convert: bool,
    /// Rewrite outputs that are newer than their sources
    pub force: bool,
    /// Longest edge of written maps
    pub max_size: Option<u32>,
    /// Multiplier on `max_size` for packed and mask maps
    pub mask_map_scale: f32,
    pub normal_intensity: f32,
    /// Case-insensitive filename substrings that exclude a file
    pub ignored_patterns: Vec<String>,
    /// Group files into sets by base name; otherwise all files form one set
    pub group_by_set: bool,
    /// Texture sets processed concurrently
    pub max_workers: usize,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            albedo_transparency: false,
            metallic_smoothness: false,
            mask_map: false,
            orm_map: false,
            normal_type: NormalFormat::OpenGl,
            output_extension: "png".to_string(),
            use_input_fallbacks: true,
            use_output_fallbacks: true,
            rename: false,
            dry_run: false,
            convert_specgloss_to_pbr: false,
            cleanup_base_color: false,
            convert: true,
            force: false,
            max_size: None,
            mask_map_scale: 1.0,
            normal_intensity: 1.0,
            ignored_patterns: vec![
                "specular_cube".to_string(),
                "diffuse_cube".to_string(),
                "ibl_brdf_lut".to_string(),
            ],
            group_by_set: true,
            max_workers: 1,
        }
    }
}

impl WorkflowConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: WorkflowConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a `.toml` or `.json` file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let s = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("json"))
            .unwrap_or(false);
        if is_json {
            let config: WorkflowConfig = serde_json::from_str(&s)?;
            config.validate()?;
            Ok(config)
        } else {
            Self::from_toml_str(&s)
        }
    }

    pub fn validate(&self) -> Result<()> {
        let ext = self.output_extension.trim_start_matches('.').to_lowercase();
        if !SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
            return Err(Error::Configuration(format!(
                "unsupported output_extension '{}'",
                self.output_extension
            )));
        }
        if self.mask_map_scale.is_nan() || self.mask_map_scale <= 0.0 {
            return Err(Error::Configuration("mask_map_scale must be positive".into()));
        }
        if self.max_size == Some(0) {
            return Err(Error::Configuration("max_size must be positive".into()));
        }
        if self.max_workers == 0 {
            return Err(Error::Configuration("max_workers must be at least 1".into()));
        }
        Ok(())
    }

    /// True when the file name contains one of `ignored_patterns`.
    pub fn is_ignored(&self, path: &Path) -> bool {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_lowercase();
        self.ignored_patterns
            .iter()
            .any(|p| !p.is_empty() && name.contains(&p.to_lowercase()))
    }
}

/// Config file location: `$TEXMAP_CONFIG`, then
/// `$XDG_CONFIG_HOME/texmap/config.toml`, then `~/.config/texmap/config.toml`.
/// Only existing files are returned.
pub fn default_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("TEXMAP_CONFIG") {
        let path = PathBuf::from(path.trim());
        if path.is_file() {
            return Some(path);
        }
    }
    let config_dir = match std::env::var("XDG_CONFIG_HOME") {
        Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => PathBuf::from(std::env::var("HOME").ok()?).join(".config"),
    };
    let path = config_dir.join("texmap").join("config.toml");
    path.is_file().then_some(path)
}

/// Engine presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowPreset {
    Standard,
    UnityUrp,
    UnityHdrp,
    Unreal,
    Gltf,
    Godot,
    SpecularGlossiness,
}

impl WorkflowPreset {
    pub const ALL: [WorkflowPreset; 7] = [
        WorkflowPreset::Standard,
        WorkflowPreset::UnityUrp,
        WorkflowPreset::UnityHdrp,
        WorkflowPreset::Unreal,
        WorkflowPreset::Gltf,
        WorkflowPreset::Godot,
        WorkflowPreset::SpecularGlossiness,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            WorkflowPreset::Standard => "standard",
            WorkflowPreset::UnityUrp => "unity_urp",
            WorkflowPreset::UnityHdrp => "unity_hdrp",
            WorkflowPreset::Unreal => "unreal",
            WorkflowPreset::Gltf => "gltf",
            WorkflowPreset::Godot => "godot",
            WorkflowPreset::SpecularGlossiness => "specular_glossiness",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            WorkflowPreset::Standard => "Separate metallic/roughness maps, OpenGL normals",
            WorkflowPreset::UnityUrp => "Metallic-smoothness pack, albedo with transparency",
            WorkflowPreset::UnityHdrp => "HDRP mask map (MSAO), albedo with transparency",
            WorkflowPreset::Unreal => "ORM pack, DirectX normals, albedo with transparency",
            WorkflowPreset::Gltf => "ORM pack, OpenGL normals, albedo with transparency",
            WorkflowPreset::Godot => "Separate maps, OpenGL normals, albedo with transparency",
            WorkflowPreset::SpecularGlossiness => "Convert spec/gloss sources to a metallic-smoothness pack",
        }
    }

    /// Configuration with this preset's flags applied to the defaults.
    pub fn config(&self) -> WorkflowConfig {
        self.apply(WorkflowConfig::default())
    }

    /// Overlay this preset's workflow flags on `base`.
    pub fn apply(&self, base: WorkflowConfig) -> WorkflowConfig {
        let mut config = base;
        match self {
            WorkflowPreset::Standard => {}
            WorkflowPreset::UnityUrp => {
                config.metallic_smoothness = true;
                config.albedo_transparency = true;
            }
            WorkflowPreset::UnityHdrp => {
                config.mask_map = true;
                config.albedo_transparency = true;
            }
            WorkflowPreset::Unreal => {
                config.orm_map = true;
                config.normal_type = NormalFormat::DirectX;
                config.albedo_transparency = true;
            }
            WorkflowPreset::Gltf => {
                config.orm_map = true;
                config.normal_type = NormalFormat::OpenGl;
                config.albedo_transparency = true;
            }
            WorkflowPreset::Godot => {
                config.normal_type = NormalFormat::OpenGl;
                config.albedo_transparency = true;
            }
            WorkflowPreset::SpecularGlossiness => {
                config.convert_specgloss_to_pbr = true;
                config.metallic_smoothness = true;
            }
        }
        config
    }
}

impl fmt::Display for WorkflowPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for WorkflowPreset {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let key = s.trim().to_lowercase().replace(['-', ' '], "_");
        Self::ALL
            .iter()
            .find(|p| p.name() == key)
            .copied()
            .ok_or_else(|| {
                Error::Configuration(format!(
                    "unknown preset '{}'. Use one of: {}",
                    s,
                    Self::ALL.iter().map(|p| p.name()).collect::<Vec<_>>().join(", ")
                ))
            })
    }
}
