//! Conversion registry.
//!
//! Maps a target [`MapType`] to the rules that can produce it from other
//! maps. Rules carry a priority (higher first) and are registered
//! idempotently, either directly or through [`ConversionPlugin`]s that are
//! scanned lazily the first time conversions are queried.

use crate::config::NormalFormat;
use crate::convert;
use crate::map_type::MapType;
use crate::processor::{MapEntry, TextureProcessor};
use crate::{Error, Result};
use image::DynamicImage;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, OnceLock, RwLock};
use tracing::debug;

type ConvertFn = dyn Fn(&mut TextureProcessor, &[MapEntry]) -> Result<DynamicImage> + Send + Sync;

/// Named conversion function. The sources are passed in the order they were
/// registered.
#[derive(Clone)]
pub struct Converter {
    name: &'static str,
    func: Arc<ConvertFn>,
}

impl Converter {
    pub fn new<F>(name: &'static str, func: F) -> Self
    where
        F: Fn(&mut TextureProcessor, &[MapEntry]) -> Result<DynamicImage> + Send + Sync + 'static,
    {
        Self {
            name,
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn apply(&self, processor: &mut TextureProcessor, sources: &[MapEntry]) -> Result<DynamicImage> {
        (self.func)(processor, sources)
    }
}

impl fmt::Debug for Converter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Converter").field("name", &self.name).finish()
    }
}

/// One way of producing `target` from `sources`.
#[derive(Debug, Clone)]
pub struct MapConversion {
    pub target: MapType,
    pub sources: Vec<MapType>,
    pub converter: Converter,
    pub priority: i32,
}

/// Source of conversion rules, registered once per [`id`](Self::id).
pub trait ConversionPlugin: Send + Sync {
    /// Unique identifier; a registry scans each id at most once
    fn id(&self) -> &str;

    fn register_conversions(&self, registry: &ConversionRegistry) -> Result<()>;
}

#[derive(Default)]
struct RegistryState {
    rules: HashMap<MapType, Vec<MapConversion>>,
    pending: Vec<Box<dyn ConversionPlugin>>,
    scanned: HashSet<String>,
}

/// Thread-safe table of conversion rules
#[derive(Default)]
pub struct ConversionRegistry {
    state: RwLock<RegistryState>,
}

static GLOBAL: OnceLock<Arc<ConversionRegistry>> = OnceLock::new();

impl ConversionRegistry {
    /// Empty registry with no rules and no plugins
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-loaded with [`StandardConversions`].
    pub fn with_standard() -> Self {
        let registry = Self::new();
        registry.add_plugin(Box::new(StandardConversions));
        registry
    }

    /// Process-wide registry, created on first use.
    pub fn global() -> Arc<ConversionRegistry> {
        GLOBAL
            .get_or_init(|| Arc::new(ConversionRegistry::with_standard()))
            .clone()
    }

    /// Add a rule. Registering the same converter name with the same sources
    /// for the same target again is a no-op.
    pub fn register(
        &self,
        target: MapType,
        sources: Vec<MapType>,
        converter: Converter,
        priority: i32,
    ) -> Result<()> {
        if sources.is_empty() {
            return Err(Error::Configuration(format!(
                "conversion '{}' for {} has no sources",
                converter.name(),
                target
            )));
        }
        if converter.name().is_empty() {
            return Err(Error::Configuration(format!(
                "unnamed conversion for {}",
                target
            )));
        }

        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        let rules = state.rules.entry(target).or_default();
        if rules
            .iter()
            .any(|r| r.converter.name() == converter.name() && r.sources == sources)
        {
            return Ok(());
        }
        debug!(
            "Registered {} <- [{}] ({}, priority {})",
            target,
            join(&sources),
            converter.name(),
            priority
        );
        rules.push(MapConversion {
            target,
            sources,
            converter,
            priority,
        });
        // Stable: equal priorities keep registration order.
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        Ok(())
    }

    /// Rules producing `target`, highest priority first.
    pub fn get_conversions_for(&self, target: MapType) -> Vec<MapConversion> {
        self.scan_pending();
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.rules.get(&target).cloned().unwrap_or_default()
    }

    /// True when any rule for `target` lists `source`.
    pub fn is_conversion_source(&self, target: MapType, source: MapType) -> bool {
        self.get_conversions_for(target)
            .iter()
            .any(|r| r.sources.contains(&source))
    }

    /// Queue a plugin; its rules are registered on the next query.
    pub fn add_plugin(&self, plugin: Box<dyn ConversionPlugin>) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.pending.push(plugin);
    }

    /// Register a plugin's rules now, unless its id was already scanned.
    pub fn register_plugin(&self, plugin: &dyn ConversionPlugin) -> Result<()> {
        {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            if !state.scanned.insert(plugin.id().to_string()) {
                return Ok(());
            }
        }
        plugin.register_conversions(self)
    }

    fn scan_pending(&self) {
        let pending = {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            if state.pending.is_empty() {
                return;
            }
            std::mem::take(&mut state.pending)
        };
        for plugin in pending {
            if let Err(e) = self.register_plugin(plugin.as_ref()) {
                tracing::warn!("Plugin '{}' failed to register: {}", plugin.id(), e);
            }
        }
    }
}

fn join(types: &[MapType]) -> String {
    types.iter().map(|t| t.name()).collect::<Vec<_>>().join(", ")
}

/// The built-in PBR conversion table.
pub struct StandardConversions;

impl ConversionPlugin for StandardConversions {
    fn id(&self) -> &str {
        "standard"
    }

    fn register_conversions(&self, registry: &ConversionRegistry) -> Result<()> {
        use MapType::*;

        let rules: Vec<(MapType, Vec<MapType>, Converter, i32)> = vec![
            // Metallic
            (Metallic, vec![Specular], Converter::new("specular_to_metallic", |p, s| {
                p.convert_specular_to_metallic(s.first())
            }), 5),
            (Metallic, vec![Orm], Converter::new("metallic_from_orm", |p, s| p.get_metallic_from_orm(&s[0])), 8),
            (Metallic, vec![Msao], Converter::new("metallic_from_msao", |p, s| p.get_metallic_from_msao(&s[0])), 8),
            (Metallic, vec![MetallicSmoothness], Converter::new("metallic_from_packed", |p, s| {
                p.get_metallic_from_packed(&s[0])
            }), 8),
            // Roughness
            (Roughness, vec![Smoothness], Converter::new("smoothness_to_roughness", |p, s| {
                p.convert_smoothness_to_roughness(s.first())
            }), 10),
            (Roughness, vec![Glossiness], Converter::new("glossiness_to_roughness", |p, s| {
                p.convert_smoothness_to_roughness(s.first())
            }), 9),
            (Roughness, vec![Specular], Converter::new("specular_to_roughness", |p, s| {
                p.convert_specular_to_roughness(s.first())
            }), 5),
            (Roughness, vec![Orm], Converter::new("roughness_from_orm", |p, s| p.get_roughness_from_orm(&s[0])), 8),
            (Roughness, vec![Msao], Converter::new("roughness_from_msao", |p, s| p.get_roughness_from_msao(&s[0])), 8),
            (Roughness, vec![MetallicSmoothness], Converter::new("roughness_from_packed", |p, s| {
                p.get_roughness_from_packed(&s[0])
            }), 8),
            // Smoothness
            (Smoothness, vec![Roughness], Converter::new("roughness_to_smoothness", |p, s| {
                p.convert_roughness_to_smoothness(s.first())
            }), 10),
            (Smoothness, vec![Glossiness], Converter::new("copy_glossiness", |p, s| p.copy_map(&s[0])), 9),
            (Smoothness, vec![Orm], Converter::new("smoothness_from_orm", |p, s| p.get_smoothness_from_orm(&s[0])), 8),
            (Smoothness, vec![Msao], Converter::new("smoothness_from_msao", |p, s| p.get_smoothness_from_msao(&s[0])), 8),
            (Smoothness, vec![MetallicSmoothness], Converter::new("smoothness_from_packed", |p, s| {
                p.get_smoothness_from_packed(&s[0])
            }), 8),
            // Glossiness
            (Glossiness, vec![Smoothness], Converter::new("copy_smoothness", |p, s| p.copy_map(&s[0])), 10),
            (Glossiness, vec![Roughness], Converter::new("roughness_to_glossiness", |p, s| {
                p.convert_roughness_to_smoothness(s.first())
            }), 9),
            (Glossiness, vec![Specular], Converter::new("gloss_from_specular", |p, s| {
                p.extract_gloss_from_spec(s.first())
            }), 5),
            // Normals
            (NormalOpenGl, vec![NormalDirectX], Converter::new("dx_to_gl", |p, s| p.convert_dx_to_gl(s.first())), 10),
            (NormalDirectX, vec![NormalOpenGl], Converter::new("gl_to_dx", |p, s| p.convert_gl_to_dx(s.first())), 10),
            (NormalOpenGl, vec![Bump], Converter::new("bump_to_gl", |p, s| {
                p.convert_bump_to_normal(s.first(), NormalFormat::OpenGl)
            }), 5),
            (NormalOpenGl, vec![Height], Converter::new("height_to_gl", |p, s| {
                p.convert_bump_to_normal(s.first(), NormalFormat::OpenGl)
            }), 5),
            (NormalDirectX, vec![Bump], Converter::new("bump_to_dx", |p, s| {
                p.convert_bump_to_normal(s.first(), NormalFormat::DirectX)
            }), 5),
            (NormalDirectX, vec![Height], Converter::new("height_to_dx", |p, s| {
                p.convert_bump_to_normal(s.first(), NormalFormat::DirectX)
            }), 5),
            (Normal, vec![Bump], Converter::new("bump_to_normal", |p, s| {
                let format = p.config().normal_type;
                p.convert_bump_to_normal(s.first(), format)
            }), 5),
            (Normal, vec![Height], Converter::new("height_to_normal", |p, s| {
                let format = p.config().normal_type;
                p.convert_bump_to_normal(s.first(), format)
            }), 5),
            // ORM packing
            (Orm, vec![Metallic, Roughness, AmbientOcclusion], Converter::new("pack_orm", |p, s| {
                pack_orm(p, Some(&s[2]), &s[1], false, &s[0])
            }), 10),
            (Orm, vec![Metallic, Smoothness, AmbientOcclusion], Converter::new("pack_orm_from_smoothness", |p, s| {
                pack_orm(p, Some(&s[2]), &s[1], true, &s[0])
            }), 9),
            (Orm, vec![Metallic, Roughness], Converter::new("pack_orm_without_ao", |p, s| {
                pack_orm(p, None, &s[1], false, &s[0])
            }), 8),
            (Orm, vec![Metallic, Smoothness], Converter::new("pack_orm_from_smoothness_without_ao", |p, s| {
                pack_orm(p, None, &s[1], true, &s[0])
            }), 7),
            // MSAO packing
            (Msao, vec![Metallic, AmbientOcclusion, Smoothness], Converter::new("pack_msao", |p, s| {
                pack_msao(p, Some(&s[0]), Some(&s[1]), Some((&s[2], false)))
            }), 10),
            (Msao, vec![Metallic, AmbientOcclusion, Roughness], Converter::new("pack_msao_from_roughness", |p, s| {
                pack_msao(p, Some(&s[0]), Some(&s[1]), Some((&s[2], true)))
            }), 9),
            (Msao, vec![Metallic, Smoothness], Converter::new("pack_msao_without_ao", |p, s| {
                pack_msao(p, Some(&s[0]), None, Some((&s[1], false)))
            }), 8),
            (Msao, vec![Metallic, Roughness], Converter::new("pack_msao_from_roughness_without_ao", |p, s| {
                pack_msao(p, Some(&s[0]), None, Some((&s[1], true)))
            }), 7),
            (Msao, vec![Metallic, AmbientOcclusion], Converter::new("pack_msao_without_smoothness", |p, s| {
                pack_msao(p, Some(&s[0]), Some(&s[1]), None)
            }), 6),
            (Msao, vec![AmbientOcclusion, Smoothness], Converter::new("pack_msao_without_metallic", |p, s| {
                pack_msao(p, None, Some(&s[0]), Some((&s[1], false)))
            }), 5),
            // Metallic_Smoothness packing
            (MetallicSmoothness, vec![Metallic, Smoothness], Converter::new("pack_metallic_smoothness", |p, s| {
                pack_metallic_smoothness(p, &s[0], &s[1], false)
            }), 10),
            (MetallicSmoothness, vec![Metallic, Roughness], Converter::new("pack_metallic_roughness", |p, s| {
                pack_metallic_smoothness(p, &s[0], &s[1], true)
            }), 9),
            // Unpacking
            (AmbientOcclusion, vec![Orm], Converter::new("ao_from_orm", |p, s| p.get_ao_from_orm(&s[0])), 8),
            (AmbientOcclusion, vec![Msao], Converter::new("ao_from_msao", |p, s| p.get_ao_from_msao(&s[0])), 8),
            (BaseColor, vec![AlbedoTransparency], Converter::new("base_color_from_albedo", |p, s| {
                p.get_base_color_from_albedo_transparency(&s[0])
            }), 8),
            (Opacity, vec![AlbedoTransparency], Converter::new("opacity_from_albedo", |p, s| {
                p.get_opacity_from_albedo_transparency(&s[0])
            }), 8),
        ];

        for (target, sources, converter, priority) in rules {
            registry.register(target, sources, converter, priority)?;
        }
        Ok(())
    }
}

fn pack_orm(
    p: &mut TextureProcessor,
    ao: Option<&MapEntry>,
    roughness: &MapEntry,
    from_smoothness: bool,
    metallic: &MapEntry,
) -> Result<DynamicImage> {
    let ao = ao.map(|e| p.gray(e)).transpose()?;
    let mut rough = p.gray(roughness)?;
    if from_smoothness {
        rough = convert::invert_gray(&rough);
    }
    let metal = p.gray(metallic)?;
    let packed = convert::pack_orm(ao.as_ref(), Some(&rough), Some(&metal))?;
    Ok(DynamicImage::ImageRgb8(packed))
}

fn pack_msao(
    p: &mut TextureProcessor,
    metallic: Option<&MapEntry>,
    ao: Option<&MapEntry>,
    smoothness: Option<(&MapEntry, bool)>,
) -> Result<DynamicImage> {
    let metal = metallic.map(|e| p.gray(e)).transpose()?;
    let ao = ao.map(|e| p.gray(e)).transpose()?;
    let smooth = match smoothness {
        Some((entry, from_roughness)) => {
            let gray = p.gray(entry)?;
            Some(if from_roughness {
                convert::invert_gray(&gray)
            } else {
                gray
            })
        }
        None => None,
    };
    let detail = p.optional_gray(MapType::DetailMask)?;
    let packed = convert::pack_msao(metal.as_ref(), ao.as_ref(), detail.as_ref(), smooth.as_ref())?;
    Ok(DynamicImage::ImageRgba8(packed))
}

fn pack_metallic_smoothness(
    p: &mut TextureProcessor,
    metallic: &MapEntry,
    smoothness: &MapEntry,
    from_roughness: bool,
) -> Result<DynamicImage> {
    let metal = p.gray(metallic)?;
    let mut smooth = p.gray(smoothness)?;
    if from_roughness {
        smooth = convert::invert_gray(&smooth);
    }
    Ok(DynamicImage::ImageRgba8(convert::pack_metallic_smoothness(&metal, &smooth)))
}
