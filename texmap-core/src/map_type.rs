//! Semantic map types and filename classification.
//!
//! Every texture in a material plays a named role ([`MapType`]). Each type
//! carries its filename aliases, the colour mode it is stored in, a neutral
//! background used when a channel has to be synthesised, and the fallback
//! relations used during resolution.
//!
//! Filenames are classified by suffix. Aliases longer than three characters
//! match case-insensitively; shorter ones must start with an uppercase letter
//! so that `wood_AO` is ambient occlusion but `shadows` is not specular.

use crate::image_loading::ColorMode;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Standard PBR map type identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MapType {
    #[serde(rename = "Base_Color")]
    BaseColor,
    Diffuse,
    #[serde(rename = "Albedo_Transparency")]
    AlbedoTransparency,
    Roughness,
    Metallic,
    Normal,
    #[serde(rename = "Normal_OpenGL")]
    NormalOpenGl,
    #[serde(rename = "Normal_DirectX")]
    NormalDirectX,
    #[serde(rename = "ORM")]
    Orm,
    #[serde(rename = "MSAO")]
    Msao,
    #[serde(rename = "Metallic_Smoothness")]
    MetallicSmoothness,
    #[serde(rename = "Ambient_Occlusion")]
    AmbientOcclusion,
    Height,
    Bump,
    Emissive,
    #[serde(rename = "Detail_Mask")]
    DetailMask,
    Mask,
    Specular,
    Glossiness,
    Smoothness,
    Opacity,
    Displacement,
    Refraction,
    Reflection,
    Thickness,
    Anisotropy,
    #[serde(rename = "Subsurface_Scattering")]
    SubsurfaceScattering,
    Sheen,
    Clearcoat,
}

impl MapType {
    /// All map types, in classification priority order.
    pub const ALL: [MapType; 29] = [
        MapType::BaseColor,
        MapType::Diffuse,
        MapType::AlbedoTransparency,
        MapType::Roughness,
        MapType::Metallic,
        MapType::Normal,
        MapType::NormalOpenGl,
        MapType::NormalDirectX,
        MapType::Orm,
        MapType::Msao,
        MapType::MetallicSmoothness,
        MapType::AmbientOcclusion,
        MapType::Height,
        MapType::Bump,
        MapType::Emissive,
        MapType::DetailMask,
        MapType::Mask,
        MapType::Specular,
        MapType::Glossiness,
        MapType::Smoothness,
        MapType::Opacity,
        MapType::Displacement,
        MapType::Refraction,
        MapType::Reflection,
        MapType::Thickness,
        MapType::Anisotropy,
        MapType::SubsurfaceScattering,
        MapType::Sheen,
        MapType::Clearcoat,
    ];

    /// Canonical name, used in output filenames (`{base}_{name}.{ext}`).
    pub fn name(&self) -> &'static str {
        match self {
            MapType::BaseColor => "Base_Color",
            MapType::Diffuse => "Diffuse",
            MapType::AlbedoTransparency => "Albedo_Transparency",
            MapType::Roughness => "Roughness",
            MapType::Metallic => "Metallic",
            MapType::Normal => "Normal",
            MapType::NormalOpenGl => "Normal_OpenGL",
            MapType::NormalDirectX => "Normal_DirectX",
            MapType::Orm => "ORM",
            MapType::Msao => "MSAO",
            MapType::MetallicSmoothness => "Metallic_Smoothness",
            MapType::AmbientOcclusion => "Ambient_Occlusion",
            MapType::Height => "Height",
            MapType::Bump => "Bump",
            MapType::Emissive => "Emissive",
            MapType::DetailMask => "Detail_Mask",
            MapType::Mask => "Mask",
            MapType::Specular => "Specular",
            MapType::Glossiness => "Glossiness",
            MapType::Smoothness => "Smoothness",
            MapType::Opacity => "Opacity",
            MapType::Displacement => "Displacement",
            MapType::Refraction => "Refraction",
            MapType::Reflection => "Reflection",
            MapType::Thickness => "Thickness",
            MapType::Anisotropy => "Anisotropy",
            MapType::SubsurfaceScattering => "Subsurface_Scattering",
            MapType::Sheen => "Sheen",
            MapType::Clearcoat => "Clearcoat",
        }
    }

    /// Filename aliases for this type (without extension).
    pub fn aliases(&self) -> &'static [&'static str] {
        match self {
            MapType::BaseColor => &[
                "BaseColor", "BaseColour", "Base_Map", "BaseMap", "BaseColorMap", "Base_ColorMap",
                "Albedo", "AlbedoMap", "BaseColorTexture", "BaseMapTexture", "ColorMap", "Color",
                "_BC", "_BaseColor", "_BaseMap",
            ],
            MapType::Diffuse => &["DiffuseMap", "Diff", "_Diff", "_DIFF", "_D"],
            MapType::AlbedoTransparency => &[
                "AlbedoTransparency", "AlbedoAlpha", "AlbedoOpacity", "BaseColorTransparency",
                "BaseColorAlpha", "BaseMapAlpha", "_AT",
            ],
            MapType::Roughness => &[
                "RoughnessMap", "Rough", "RoughMap", "Ruff", "Rgh", "RGH", "_R", "_Roughness",
            ],
            MapType::Metallic => &[
                "MetallicMap", "Metal", "MetalMap", "Metalness", "Met", "MTL", "_M", "_Metallic",
            ],
            MapType::Normal => &[
                "NormalMap", "Normal_Map", "Norm", "NRM", "_N", "_Normal", "TangentSpaceNormal",
                "TSN", "_TSN",
            ],
            MapType::NormalOpenGl => &[
                "NormalGL", "Normal_GL", "Normal_Tangent_GL", "NormalMap_GL", "_NGL", "_GL",
            ],
            MapType::NormalDirectX => &[
                "NormalDX", "Normal_DX", "Normal_Tangent_DX", "NormalMap_DX", "_NDX", "_DX", "_DXN",
            ],
            MapType::Orm => &[
                "OcclusionRoughnessMetallic", "Occlusion_Roughness_Metallic", "ORMMap", "_ORM",
            ],
            MapType::Msao => &[
                "Metallic_SmoothnessAO", "MetallicSmoothnessAO", "MetallicSmoothAO",
                "MetallicSmoothness_AO", "MetallicSmoothnessAmbientOcclusion",
                "MetallicSmoothnessOcclusion", "MaskMap", "Mask_Map", "_MSA", "_MaskMap", "_MSAO",
            ],
            MapType::MetallicSmoothness => &[
                "MetallicSmoothness", "MetalSmooth", "Metal_Smooth", "Metal_Smoothness",
                "MetallicSmoothnessMap", "Metallic_SmoothnessMap", "MetallicGloss", "MetalGloss",
                "MetallicGlossMap", "_MS", "_MetalSmooth", "_MetallicSmoothness", "_MetallicGloss",
            ],
            MapType::AmbientOcclusion => &[
                "AmbientOcclusion", "AO", "Occlusion", "Occ", "AO_Map", "AOMap", "_AO",
            ],
            MapType::Height => &[
                "HeightMap", "Height_Map", "High", "HGT", "Parallax", "ParallaxMap",
                "ParallaxOcclusion", "POM", "_H", "_Height",
            ],
            MapType::Bump => &[
                "BumpMap", "Bump_Map", "Bumpiness", "BumpinessMap", "_Bump", "_BP", "_B",
            ],
            MapType::Emissive => &[
                "EmissiveMap", "Emission", "EmissionMap", "Emit", "Glow", "GlowMap", "EMI", "_E",
                "_EM", "_Emissive",
            ],
            MapType::DetailMask => &[
                "DetailMask", "Detail_Map", "DetailMap", "Detail", "_Detail", "_DetailMask",
            ],
            MapType::Mask => &["_Mask"],
            MapType::Specular => &["SpecularMap", "Spec", "SPC", "_S", "_Spec", "_Specular"],
            MapType::Glossiness => &["GlossinessMap", "Gloss", "Gls", "_G", "_Gloss", "_Glossiness"],
            MapType::Smoothness => &["SmoothnessMap", "Smooth", "_Smooth", "_Smoothness"],
            MapType::Opacity => &["OpacityMap", "Transparency", "Alpha", "_Opacity", "_Alpha"],
            MapType::Displacement => &["DisplacementMap", "Disp", "DSP", "_Disp", "_Displacement"],
            MapType::Refraction => &["RefractionMap", "Refr", "_Refraction"],
            MapType::Reflection => &["ReflectionMap", "Refl", "_Reflection"],
            MapType::Thickness => &["ThicknessMap", "Thick", "_Thickness"],
            MapType::Anisotropy => &["AnisotropyMap", "Aniso", "_Anisotropy"],
            MapType::SubsurfaceScattering => &["SSS", "Subsurface", "Scattering", "_SSS"],
            MapType::Sheen => &["SheenMap", "_Sheen"],
            MapType::Clearcoat => &["ClearcoatMap", "Coat", "_Clearcoat", "_Coat"],
        }
    }

    /// Canonical name followed by every alias.
    pub fn candidates(&self) -> impl Iterator<Item = &'static str> {
        std::iter::once(self.name()).chain(self.aliases().iter().copied())
    }

    /// Colour mode this map is stored in.
    pub fn mode(&self) -> ColorMode {
        match self {
            MapType::BaseColor
            | MapType::Diffuse
            | MapType::Normal
            | MapType::NormalOpenGl
            | MapType::NormalDirectX
            | MapType::Orm
            | MapType::Emissive
            | MapType::Specular
            | MapType::SubsurfaceScattering => ColorMode::Rgb,
            MapType::AlbedoTransparency | MapType::Msao | MapType::MetallicSmoothness => {
                ColorMode::Rgba
            }
            _ => ColorMode::L,
        }
    }

    /// Neutral RGBA value used when a missing map has to be synthesised.
    pub fn default_background(&self) -> [u8; 4] {
        match self {
            MapType::BaseColor | MapType::Diffuse => [127, 127, 127, 255],
            MapType::Normal | MapType::NormalOpenGl | MapType::NormalDirectX => [127, 127, 255, 255],
            MapType::Orm => [255, 255, 0, 255],
            MapType::Msao => [0, 255, 0, 255],
            MapType::Roughness
            | MapType::MetallicSmoothness
            | MapType::AmbientOcclusion
            | MapType::Mask
            | MapType::Opacity
            | MapType::SubsurfaceScattering => [255, 255, 255, 255],
            MapType::Height | MapType::Bump | MapType::Displacement => [128, 128, 128, 255],
            MapType::Anisotropy | MapType::Sheen | MapType::Clearcoat => [127, 127, 127, 255],
            _ => [0, 0, 0, 255],
        }
    }

    /// Less canonical sources that may stand in for this type when it is
    /// absent from an inventory.
    pub fn input_fallbacks(&self) -> &'static [MapType] {
        match self {
            MapType::BaseColor => &[MapType::AlbedoTransparency, MapType::Diffuse],
            MapType::Diffuse => &[MapType::BaseColor],
            MapType::AlbedoTransparency => &[MapType::BaseColor],
            MapType::Roughness => &[MapType::Glossiness, MapType::Smoothness],
            MapType::Metallic => &[MapType::Specular],
            MapType::Normal => &[
                MapType::NormalOpenGl,
                MapType::NormalDirectX,
                MapType::Bump,
                MapType::Height,
            ],
            MapType::NormalOpenGl => &[
                MapType::Normal,
                MapType::NormalDirectX,
                MapType::Bump,
                MapType::Height,
            ],
            MapType::NormalDirectX => &[
                MapType::Normal,
                MapType::NormalOpenGl,
                MapType::Bump,
                MapType::Height,
            ],
            MapType::Height => &[MapType::Displacement, MapType::Bump, MapType::Normal],
            MapType::Bump => &[
                MapType::Normal,
                MapType::NormalOpenGl,
                MapType::NormalDirectX,
                MapType::Height,
            ],
            MapType::Specular => &[MapType::Metallic],
            MapType::Glossiness => &[MapType::Roughness, MapType::Smoothness],
            MapType::Smoothness => &[MapType::Roughness, MapType::Glossiness],
            MapType::Displacement => &[MapType::Height],
            _ => &[],
        }
    }

    /// Component maps that may be written on their own when this composite
    /// cannot be produced.
    pub fn output_fallbacks(&self) -> &'static [MapType] {
        match self {
            MapType::Orm => &[MapType::AmbientOcclusion, MapType::Roughness, MapType::Metallic],
            MapType::Msao => &[MapType::MetallicSmoothness, MapType::AmbientOcclusion],
            MapType::MetallicSmoothness => &[MapType::Metallic, MapType::Smoothness],
            MapType::Mask => &[MapType::MetallicSmoothness, MapType::AmbientOcclusion],
            _ => &[],
        }
    }

    /// Output fallbacks expanded transitively, without duplicates.
    pub fn all_output_fallbacks(&self) -> Vec<MapType> {
        fn collect(map_type: MapType, out: &mut Vec<MapType>) {
            for fb in map_type.output_fallbacks() {
                if !out.contains(fb) {
                    out.push(*fb);
                    collect(*fb, out);
                }
            }
        }
        let mut out = Vec::new();
        collect(*self, &mut out);
        out
    }

    /// True for channel-packed composites.
    pub fn is_packed(&self) -> bool {
        matches!(self, MapType::Orm | MapType::Msao | MapType::MetallicSmoothness)
    }

    /// Maps that are scaled like masks when a size limit applies.
    pub fn scale_as_mask(&self) -> bool {
        self.is_packed() || matches!(self, MapType::DetailMask | MapType::Mask)
    }

    /// Normal map variants.
    pub fn is_normal(&self) -> bool {
        matches!(self, MapType::Normal | MapType::NormalOpenGl | MapType::NormalDirectX)
    }

    /// Classify a file path by its stem suffix.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Option<MapType> {
        let stem = path.as_ref().file_stem()?.to_str()?;
        match_suffix(stem).map(|(map_type, _)| map_type)
    }
}

impl fmt::Display for MapType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for MapType {
    type Err = crate::Error;

    /// Accepts a canonical name or any alias, ignoring case and underscores.
    fn from_str(s: &str) -> crate::Result<Self> {
        let wanted = normalize(s);
        MapType::ALL
            .iter()
            .copied()
            .find(|t| t.candidates().any(|c| normalize(c) == wanted))
            .ok_or_else(|| crate::Error::Configuration(format!("Unknown map type: {}", s)))
    }
}

fn normalize(s: &str) -> String {
    s.chars()
        .filter(|c| *c != '_')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Strip the leading underscore of an alias.
fn core(alias: &str) -> &str {
    alias.trim_start_matches('_')
}

fn suffix_matches(stem: &str, core: &str) -> bool {
    if core.is_empty() || stem.len() < core.len() {
        return false;
    }
    let start = stem.len() - core.len();
    if !stem.is_char_boundary(start) {
        return false;
    }
    let tail = stem[start..].as_bytes();
    let pattern = core.as_bytes();

    if pattern.len() > 3 {
        return tail.eq_ignore_ascii_case(pattern);
    }
    // Short aliases need a capitalised first letter.
    let first_ok = if pattern[0].is_ascii_alphabetic() {
        tail[0] == pattern[0].to_ascii_uppercase()
    } else {
        tail[0] == pattern[0]
    };
    first_ok && tail[1..].eq_ignore_ascii_case(&pattern[1..])
}

/// Longest alias matching the end of `stem`, with the matched suffix text.
fn match_suffix(stem: &str) -> Option<(MapType, &str)> {
    let mut best: Option<(MapType, usize)> = None;
    for map_type in MapType::ALL {
        for alias in map_type.candidates() {
            let c = core(alias);
            if suffix_matches(stem, c) && best.map_or(true, |(_, len)| c.len() > len) {
                best = Some((map_type, c.len()));
            }
        }
    }
    best.map(|(map_type, len)| (map_type, &stem[stem.len() - len..]))
}

/// Base texture name: the stem with its map-type suffix (and trailing
/// underscores) removed. Unclassified files keep their full stem.
pub fn base_texture_name<P: AsRef<Path>>(path: P) -> String {
    let stem = match path.as_ref().file_stem().and_then(|s| s.to_str()) {
        Some(s) => s,
        None => return String::new(),
    };
    match match_suffix(stem) {
        Some((_, suffix)) => {
            let base = stem[..stem.len() - suffix.len()].trim_end_matches('_');
            if base.is_empty() {
                stem.to_string()
            } else {
                base.to_string()
            }
        }
        None => stem.to_string(),
    }
}

/// Group paths into texture sets by base name, preserving first-seen order.
pub fn group_textures_by_set(paths: &[PathBuf]) -> Vec<(String, Vec<PathBuf>)> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut sets: Vec<(String, Vec<PathBuf>)> = Vec::new();
    for path in paths {
        let base = base_texture_name(path);
        match index.get(&base) {
            Some(&i) => sets[i].1.push(path.clone()),
            None => {
                index.insert(base.clone(), sets.len());
                sets.push((base, vec![path.clone()]));
            }
        }
    }
    sets
}

/// Rename a normal-map stem from one handedness to the other, keeping the
/// suffix style (`brick_GL` becomes `brick_DX`). Unknown suffixes fall back
/// to the canonical target name.
pub fn swap_normal_suffix(stem: &str, from: MapType, to: MapType) -> String {
    let target: Vec<&str> = to.candidates().collect();
    if let Some((matched, suffix)) = match_suffix(stem) {
        if matched == from {
            let base = &stem[..stem.len() - suffix.len()];
            let index = from
                .candidates()
                .position(|c| core(c).eq_ignore_ascii_case(suffix))
                .unwrap_or(0);
            let replacement = target.get(index).copied().unwrap_or(to.name());
            return format!("{}{}", base, core(replacement));
        }
    }
    format!("{}_{}", stem.trim_end_matches('_'), to.name())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_type(name: &str, expected: Option<MapType>) {
        assert_eq!(MapType::from_path(name), expected, "classifying {}", name);
    }

    #[test]
    fn short_aliases_require_capital_first_letter() {
        assert_type("MyMat_BC.png", Some(MapType::BaseColor));
        assert_type("MyMat_bc.png", None);
        assert_type("MyMat_AO.png", Some(MapType::AmbientOcclusion));
        assert_type("MyMat_ao.png", None);
        assert_type("MyMat_N.png", Some(MapType::Normal));
        assert_type("MyMat_n.png", None);
        assert_type("MyMat_R.png", Some(MapType::Roughness));
        assert_type("MyMat_r.png", None);
        assert_type("MyMat_M.png", Some(MapType::Metallic));
        assert_type("MyMat_m.png", None);
        assert_type("MyMat_H.png", Some(MapType::Height));
        assert_type("MyMat_B.png", Some(MapType::Bump));
        assert_type("MyMat_S.png", Some(MapType::Specular));
        assert_type("MyMat_s.png", None);
    }

    #[test]
    fn long_aliases_ignore_case() {
        assert_type("MyMat_BaseColor.png", Some(MapType::BaseColor));
        assert_type("MyMat_basecolor.png", Some(MapType::BaseColor));
        assert_type("MyMat_BASECOLOR.png", Some(MapType::BaseColor));
        assert_type("MyMat_smoothness.png", Some(MapType::Smoothness));
    }

    #[test]
    fn longest_alias_wins() {
        assert_type("MyMat_Smoothness.png", Some(MapType::Smoothness));
        assert_type("MyMat_Normal.png", Some(MapType::Normal));
        assert_type("MyMat_Metallic.png", Some(MapType::Metallic));
        assert_type("wood_Metallic_Smoothness.png", Some(MapType::MetallicSmoothness));
        assert_type("wood_Normal_DirectX.tga", Some(MapType::NormalDirectX));
        assert_type("wood_AlbedoTransparency.png", Some(MapType::AlbedoTransparency));
        assert_type("wood_MaskMap.png", Some(MapType::Msao));
        assert_type("wood_DetailMask.png", Some(MapType::DetailMask));
    }

    #[test]
    fn attached_suffixes_and_false_positives() {
        assert_type("MyMatBC.png", Some(MapType::BaseColor));
        assert_type("MyMatS.png", Some(MapType::Specular));
        assert_type("MyMat_Shadows.png", None);
        assert_type("MyMat_Bump.png", Some(MapType::Bump));
        assert_type("MyMat_Displacement.png", Some(MapType::Displacement));
    }

    #[test]
    fn base_name_strips_suffix() {
        assert_eq!(base_texture_name("textures/wood_Normal_OpenGL.png"), "wood");
        assert_eq!(base_texture_name("wood_Roughness.png"), "wood");
        assert_eq!(base_texture_name("woodBC.png"), "wood");
        assert_eq!(base_texture_name("notes.png"), "notes");
    }

    #[test]
    fn grouping_keeps_first_seen_order() {
        let paths: Vec<PathBuf> = ["b_Roughness.png", "a_BaseColor.png", "b_Metallic.png"]
            .iter()
            .map(PathBuf::from)
            .collect();
        let sets = group_textures_by_set(&paths);
        assert_eq!(sets.len(), 2);
        assert_eq!(sets[0].0, "b");
        assert_eq!(sets[0].1.len(), 2);
        assert_eq!(sets[1].0, "a");
    }

    #[test]
    fn normal_suffix_swaps_by_alias_index() {
        assert_eq!(
            swap_normal_suffix("brick_GL", MapType::NormalOpenGl, MapType::NormalDirectX),
            "brick_DX"
        );
        assert_eq!(
            swap_normal_suffix("brick_NormalDX", MapType::NormalDirectX, MapType::NormalOpenGl),
            "brick_NormalGL"
        );
        assert_eq!(
            swap_normal_suffix("brick", MapType::NormalOpenGl, MapType::NormalDirectX),
            "brick_Normal_DirectX"
        );
    }

    #[test]
    fn parse_names_and_aliases() {
        assert_eq!("base_color".parse::<MapType>().unwrap(), MapType::BaseColor);
        assert_eq!("ORM".parse::<MapType>().unwrap(), MapType::Orm);
        assert_eq!("normal_gl".parse::<MapType>().unwrap(), MapType::NormalOpenGl);
        assert!("nonsense".parse::<MapType>().is_err());
    }

    #[test]
    fn output_fallbacks_expand_transitively() {
        let fallbacks = MapType::Msao.all_output_fallbacks();
        assert_eq!(
            fallbacks,
            vec![
                MapType::MetallicSmoothness,
                MapType::Metallic,
                MapType::Smoothness,
                MapType::AmbientOcclusion
            ]
        );
    }
}
