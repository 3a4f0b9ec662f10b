//! Workflow handlers.
//!
//! Each handler produces one family of outputs (base colour, a packed or
//! separate metallic/roughness layout, normals, pass-through) from a
//! [`TextureProcessor`]. [`workflow_handlers`] picks the handlers for a
//! configuration in the order they must run.

use crate::config::WorkflowConfig;
use crate::map_type::MapType;
use crate::processor::TextureProcessor;
use crate::{Error, Result};
use image::DynamicImage;
use std::path::PathBuf;
use tracing::debug;

/// Strategy producing one family of output maps
pub trait WorkflowHandler: Send + Sync {
    /// Short identifier used in logs
    fn name(&self) -> &str;

    /// Whether this handler has anything to do for the current set.
    fn can_handle(&self, processor: &TextureProcessor) -> bool;

    /// Produce outputs and return their paths.
    fn process(&self, processor: &mut TextureProcessor) -> Result<Vec<PathBuf>>;

    /// Types marked as used once the handler has produced at least one output.
    fn consumed_types(&self) -> &'static [MapType];
}

/// Handlers for `config`, in execution order: base colour, the
/// metallic/roughness layout, normals, pass-through.
pub fn workflow_handlers(config: &WorkflowConfig) -> Vec<Box<dyn WorkflowHandler>> {
    let layout: Box<dyn WorkflowHandler> = if config.metallic_smoothness {
        Box::new(MetallicSmoothnessHandler)
    } else if config.mask_map {
        Box::new(MaskMapHandler)
    } else if config.orm_map {
        Box::new(OrmHandler)
    } else {
        Box::new(SeparateMetallicRoughnessHandler)
    };
    vec![
        Box::new(BaseColorHandler),
        layout,
        Box::new(NormalMapHandler),
        Box::new(PassthroughHandler),
    ]
}

/// Write the unused components of `target` on their own.
fn emit_output_fallbacks(p: &mut TextureProcessor, target: MapType) -> Result<Vec<PathBuf>> {
    if !p.config().use_output_fallbacks {
        return Ok(Vec::new());
    }
    let mut outputs = Vec::new();
    for fallback in target.all_output_fallbacks() {
        if p.is_used(fallback) {
            continue;
        }
        let entry = match p.lookup(fallback) {
            Some(entry) => entry,
            None => continue,
        };
        outputs.push(p.save_map(&entry, fallback)?);
        p.mark_used(&[fallback]);
        p.notify(format!("Writing {} on its own (fallback for {})", fallback, target));
    }
    Ok(outputs)
}

/// Save an existing composite, or build it; on missing components fall back
/// to writing whatever components exist.
fn produce_composite(
    p: &mut TextureProcessor,
    target: MapType,
    build: fn(&mut TextureProcessor) -> Result<DynamicImage>,
) -> Result<Vec<PathBuf>> {
    if let Some(existing) = p.lookup(target) {
        p.notify(format!("Using existing {} map", target));
        return Ok(vec![p.save_map(&existing, target)?]);
    }
    match build(p) {
        Ok(image) => Ok(vec![p.save_image(image, target)?]),
        Err(Error::MissingInput(message)) => {
            p.notify(message);
            emit_output_fallbacks(p, target)
        }
        Err(e) => Err(e),
    }
}

fn has_alpha_data(image: &DynamicImage) -> bool {
    image.color().has_alpha() && image.to_rgba8().pixels().any(|p| p.0[3] < 255)
}

/// Base colour, optionally with opacity packed into alpha.
pub struct BaseColorHandler;

impl WorkflowHandler for BaseColorHandler {
    fn name(&self) -> &str {
        "base_color"
    }

    fn can_handle(&self, _processor: &TextureProcessor) -> bool {
        true
    }

    fn process(&self, p: &mut TextureProcessor) -> Result<Vec<PathBuf>> {
        if let Some(existing) = p.lookup(MapType::AlbedoTransparency) {
            p.notify("Using existing Albedo_Transparency map");
            p.mark_used(&[MapType::AlbedoTransparency]);
            return Ok(vec![p.save_map(&existing, MapType::AlbedoTransparency)?]);
        }

        let base = match p.resolve_map(&[MapType::BaseColor], true) {
            Some(base) => base,
            None => return Ok(Vec::new()),
        };

        if p.config().albedo_transparency {
            if let Some(opacity) = p.resolve_map(&[MapType::Opacity], false) {
                let packed = p.create_albedo_transparency(&base, &opacity)?;
                p.notify("Packed opacity into base colour alpha");
                p.mark_used(&[MapType::BaseColor, MapType::Diffuse, MapType::Opacity]);
                return Ok(vec![p.save_image(packed, MapType::AlbedoTransparency)?]);
            }
            if has_alpha_data(&*p.load(&base)?) {
                p.mark_used(&[MapType::BaseColor, MapType::Diffuse]);
                return Ok(vec![p.save_map(&base, MapType::AlbedoTransparency)?]);
            }
            debug!("No transparency data; keeping Base_Color");
        }

        if p.config().cleanup_base_color && p.inventory().contains(MapType::Metallic) {
            let image = p.load(&base)?;
            let cleaned = p.cleanup_base_color(&image)?;
            p.notify("Removed base colour from metal regions");
            p.mark_used(&[MapType::BaseColor, MapType::Diffuse]);
            return Ok(vec![p.save_image(cleaned, MapType::BaseColor)?]);
        }

        p.mark_used(&[MapType::BaseColor, MapType::Diffuse]);
        Ok(vec![p.save_map(&base, MapType::BaseColor)?])
    }

    fn consumed_types(&self) -> &'static [MapType] {
        &[MapType::BaseColor, MapType::Diffuse, MapType::AlbedoTransparency]
    }
}

/// Occlusion-roughness-metallic pack (Unreal, glTF)
pub struct OrmHandler;

impl WorkflowHandler for OrmHandler {
    fn name(&self) -> &str {
        "orm"
    }

    fn can_handle(&self, processor: &TextureProcessor) -> bool {
        processor.config().orm_map
    }

    fn process(&self, p: &mut TextureProcessor) -> Result<Vec<PathBuf>> {
        produce_composite(p, MapType::Orm, TextureProcessor::create_orm_map)
    }

    fn consumed_types(&self) -> &'static [MapType] {
        &[
            MapType::Orm,
            MapType::AmbientOcclusion,
            MapType::Roughness,
            MapType::Smoothness,
            MapType::Glossiness,
            MapType::Metallic,
            MapType::Specular,
        ]
    }
}

/// Unity HDRP mask map
pub struct MaskMapHandler;

impl WorkflowHandler for MaskMapHandler {
    fn name(&self) -> &str {
        "mask_map"
    }

    fn can_handle(&self, processor: &TextureProcessor) -> bool {
        processor.config().mask_map
    }

    fn process(&self, p: &mut TextureProcessor) -> Result<Vec<PathBuf>> {
        produce_composite(p, MapType::Msao, TextureProcessor::create_mask_map)
    }

    fn consumed_types(&self) -> &'static [MapType] {
        &[
            MapType::Msao,
            MapType::MetallicSmoothness,
            MapType::Metallic,
            MapType::AmbientOcclusion,
            MapType::DetailMask,
            MapType::Roughness,
            MapType::Smoothness,
            MapType::Glossiness,
            MapType::Specular,
        ]
    }
}

/// Unity URP metallic + smoothness-in-alpha
pub struct MetallicSmoothnessHandler;

impl WorkflowHandler for MetallicSmoothnessHandler {
    fn name(&self) -> &str {
        "metallic_smoothness"
    }

    fn can_handle(&self, processor: &TextureProcessor) -> bool {
        processor.config().metallic_smoothness
    }

    fn process(&self, p: &mut TextureProcessor) -> Result<Vec<PathBuf>> {
        produce_composite(
            p,
            MapType::MetallicSmoothness,
            TextureProcessor::create_metallic_smoothness_map,
        )
    }

    fn consumed_types(&self) -> &'static [MapType] {
        &[
            MapType::MetallicSmoothness,
            MapType::Metallic,
            MapType::Roughness,
            MapType::Smoothness,
            MapType::Glossiness,
            MapType::Specular,
        ]
    }
}

/// Standalone metallic and roughness maps, unpacked or converted as needed.
pub struct SeparateMetallicRoughnessHandler;

impl WorkflowHandler for SeparateMetallicRoughnessHandler {
    fn name(&self) -> &str {
        "separate_metallic_roughness"
    }

    fn can_handle(&self, _processor: &TextureProcessor) -> bool {
        true
    }

    fn process(&self, p: &mut TextureProcessor) -> Result<Vec<PathBuf>> {
        let mut outputs = Vec::new();

        if let Some(metallic) = p.resolve_map(&[MapType::Metallic], true) {
            outputs.push(p.save_map(&metallic, MapType::Metallic)?);
            p.mark_used(&[MapType::Metallic, MapType::Specular]);
        }
        if let Some(roughness) = p.resolve_map(&[MapType::Roughness], true) {
            outputs.push(p.save_map(&roughness, MapType::Roughness)?);
            p.mark_used(&[MapType::Roughness, MapType::Smoothness, MapType::Glossiness]);
        }

        // Occlusion packed alongside metal/rough would otherwise be lost.
        let packed_source = [MapType::Orm, MapType::Msao]
            .iter()
            .any(|t| p.original_types().contains(t));
        if packed_source && !p.original_types().contains(&MapType::AmbientOcclusion) {
            if let Some(ao) = p.resolve_map(&[MapType::AmbientOcclusion], true) {
                outputs.push(p.save_map(&ao, MapType::AmbientOcclusion)?);
                p.mark_used(&[MapType::AmbientOcclusion]);
            }
        }
        Ok(outputs)
    }

    fn consumed_types(&self) -> &'static [MapType] {
        &[
            MapType::Metallic,
            MapType::Roughness,
            MapType::Smoothness,
            MapType::Glossiness,
            MapType::Specular,
            MapType::Orm,
            MapType::Msao,
            MapType::MetallicSmoothness,
        ]
    }
}

/// Normal map in the configured handedness.
pub struct NormalMapHandler;

impl WorkflowHandler for NormalMapHandler {
    fn name(&self) -> &str {
        "normal"
    }

    fn can_handle(&self, processor: &TextureProcessor) -> bool {
        [
            MapType::Normal,
            MapType::NormalOpenGl,
            MapType::NormalDirectX,
            MapType::Bump,
            MapType::Height,
        ]
        .iter()
        .any(|t| processor.inventory().contains(*t))
    }

    fn process(&self, p: &mut TextureProcessor) -> Result<Vec<PathBuf>> {
        let format = p.config().normal_type;
        let target = format.map_type();
        let opposite = format.opposite().map_type();
        let convert = p.config().convert;

        if let Some(existing) = p.lookup(target) {
            p.mark_used(&[target]);
            return Ok(vec![p.save_map(&existing, target)?]);
        }

        if let Some(source) = p.lookup(opposite) {
            p.mark_used(&[opposite]);
            if convert {
                if let Some(normal) = p.resolve_map(&[target], true) {
                    return Ok(vec![p.save_map(&normal, target)?]);
                }
            }
            p.notify(format!("Keeping {} unconverted", opposite));
            return Ok(vec![p.save_map(&source, opposite)?]);
        }

        if let Some(generic) = p.lookup(MapType::Normal) {
            p.mark_used(&[MapType::Normal]);
            return match p.detect_normal_format(&generic)? {
                Some(detected) if detected == format => {
                    p.notify(format!("Detected {} normal map", detected));
                    Ok(vec![p.save_map(&generic, target)?])
                }
                Some(detected) if convert => {
                    p.notify(format!("Detected {} normal map; converting to {}", detected, format));
                    let flipped = match detected.map_type() {
                        MapType::NormalDirectX => p.convert_dx_to_gl(Some(&generic))?,
                        _ => p.convert_gl_to_dx(Some(&generic))?,
                    };
                    Ok(vec![p.save_image(flipped, target)?])
                }
                _ => {
                    p.notify("Normal map format undetermined; keeping it generic");
                    Ok(vec![p.save_map(&generic, MapType::Normal)?])
                }
            };
        }

        if !convert {
            return Ok(Vec::new());
        }
        match p.resolve_map(&[MapType::Bump, MapType::Height], false) {
            Some(height) => {
                let normal = p.convert_bump_to_normal(Some(&height), format)?;
                p.notify(format!("Generated {} from {}", target, height.map_type));
                p.mark_used(&[height.map_type]);
                Ok(vec![p.save_image(normal, target)?])
            }
            None => Ok(Vec::new()),
        }
    }

    fn consumed_types(&self) -> &'static [MapType] {
        &[MapType::Normal, MapType::NormalOpenGl, MapType::NormalDirectX]
    }
}

/// Every input type no other handler consumed, written unchanged.
pub struct PassthroughHandler;

impl WorkflowHandler for PassthroughHandler {
    fn name(&self) -> &str {
        "passthrough"
    }

    fn can_handle(&self, _processor: &TextureProcessor) -> bool {
        true
    }

    fn process(&self, p: &mut TextureProcessor) -> Result<Vec<PathBuf>> {
        let pending: Vec<MapType> = p
            .original_types()
            .iter()
            .copied()
            .filter(|t| !p.is_used(*t))
            .collect();

        let mut outputs = Vec::new();
        for map_type in pending {
            let entry = match p.lookup(map_type) {
                Some(entry) => entry,
                None => continue,
            };
            outputs.push(p.save_map(&entry, map_type)?);
            p.mark_used(&[map_type]);
            debug!("Passed through {}", map_type);
        }
        Ok(outputs)
    }

    fn consumed_types(&self) -> &'static [MapType] {
        &[]
    }
}
