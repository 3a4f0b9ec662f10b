//! Per-texture-set resolution context.
//!
//! A [`TextureProcessor`] owns the inventory of one texture set and resolves
//! requested map types by direct lookup, registry conversions, or input
//! fallbacks. Every successful conversion is written back to the inventory so
//! a converter never runs twice for the same target.

use crate::config::{NormalFormat, WorkflowConfig};
use crate::convert::{self, Channel};
use crate::image_loading::{describe, enforce_mode, resize_to_max, ColorMode, ImageLoader};
use crate::map_type::MapType;
use crate::registry::ConversionRegistry;
use crate::{Error, Result};
use image::{DynamicImage, GenericImageView, GrayImage};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Receives one message per significant decision
pub type ProgressCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// A map available to the resolver: a file on disk, optionally with its
/// decoded (or generated) image held in memory.
#[derive(Debug, Clone)]
pub struct MapEntry {
    pub map_type: MapType,
    pub path: PathBuf,
    pub image: Option<Arc<DynamicImage>>,
}

impl MapEntry {
    pub fn from_file(map_type: MapType, path: impl Into<PathBuf>) -> Self {
        Self {
            map_type,
            path: path.into(),
            image: None,
        }
    }

    /// Entry backed by an in-memory image; `path` is where it would be saved.
    pub fn in_memory(map_type: MapType, path: impl Into<PathBuf>, image: DynamicImage) -> Self {
        Self {
            map_type,
            path: path.into(),
            image: Some(Arc::new(image)),
        }
    }
}

/// Map type → entry for one texture set
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    maps: BTreeMap<MapType, MapEntry>,
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify `files` by name. The first file of each type wins; later
    /// duplicates and unrecognised files are skipped.
    pub fn from_files(files: &[PathBuf]) -> Self {
        let mut inventory = Self::new();
        for file in files {
            match MapType::from_path(file) {
                Some(map_type) if inventory.contains(map_type) => {
                    debug!("Ignoring duplicate {} map: {}", map_type, file.display());
                }
                Some(map_type) => {
                    inventory.insert(MapEntry::from_file(map_type, file));
                }
                None => debug!("Unrecognised texture: {}", file.display()),
            }
        }
        inventory
    }

    pub fn get(&self, map_type: MapType) -> Option<&MapEntry> {
        self.maps.get(&map_type)
    }

    pub fn contains(&self, map_type: MapType) -> bool {
        self.maps.contains_key(&map_type)
    }

    /// Insert or replace the entry for its map type.
    pub fn insert(&mut self, entry: MapEntry) -> Option<MapEntry> {
        self.maps.insert(entry.map_type, entry)
    }

    pub fn remove(&mut self, map_type: MapType) -> Option<MapEntry> {
        self.maps.remove(&map_type)
    }

    pub fn types(&self) -> impl Iterator<Item = MapType> + '_ {
        self.maps.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }
}

/// Resolution context for one texture set.
pub struct TextureProcessor {
    inventory: Inventory,
    original_types: BTreeSet<MapType>,
    config: WorkflowConfig,
    output_dir: PathBuf,
    base_name: String,
    registry: Arc<ConversionRegistry>,
    used: BTreeSet<MapType>,
    created_files: Vec<PathBuf>,
    callback: Option<ProgressCallback>,
    resolving: Vec<MapType>,
    image_cache: HashMap<PathBuf, Arc<DynamicImage>>,
    messages: Vec<String>,
}

impl TextureProcessor {
    /// Context over `inventory` using the process-wide registry.
    pub fn new(
        inventory: Inventory,
        config: WorkflowConfig,
        output_dir: impl Into<PathBuf>,
        base_name: impl Into<String>,
    ) -> Self {
        let original_types = inventory.types().collect();
        Self {
            inventory,
            original_types,
            config,
            output_dir: output_dir.into(),
            base_name: base_name.into(),
            registry: ConversionRegistry::global(),
            used: BTreeSet::new(),
            created_files: Vec::new(),
            callback: None,
            resolving: Vec::new(),
            image_cache: HashMap::new(),
            messages: Vec::new(),
        }
    }

    pub fn with_registry(mut self, registry: Arc<ConversionRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_callback(mut self, callback: Option<ProgressCallback>) -> Self {
        self.callback = callback;
        self
    }

    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    pub fn registry(&self) -> &Arc<ConversionRegistry> {
        &self.registry
    }

    /// Types present in the inventory the context was created with.
    pub fn original_types(&self) -> &BTreeSet<MapType> {
        &self.original_types
    }

    pub fn mark_used(&mut self, types: &[MapType]) {
        self.used.extend(types.iter().copied());
    }

    pub fn is_used(&self, map_type: MapType) -> bool {
        self.used.contains(&map_type)
    }

    /// Every file written while processing this set.
    pub fn created_files(&self) -> &[PathBuf] {
        &self.created_files
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    pub fn take_messages(&mut self) -> Vec<String> {
        std::mem::take(&mut self.messages)
    }

    /// Log a decision and forward it to the progress callback.
    pub fn notify(&mut self, message: impl Into<String>) {
        let message = message.into();
        info!("[{}] {}", self.base_name, message);
        if let Some(callback) = &self.callback {
            callback(&message);
        }
        self.messages.push(message);
    }

    fn record_created(&mut self, path: PathBuf) {
        if !self.created_files.contains(&path) {
            self.created_files.push(path);
        }
    }

    // --- image access ---

    /// Decoded image of an entry, loading files once per path.
    pub fn load(&mut self, entry: &MapEntry) -> Result<Arc<DynamicImage>> {
        if let Some(image) = &entry.image {
            return Ok(image.clone());
        }
        if let Some(image) = self.image_cache.get(&entry.path) {
            return Ok(image.clone());
        }
        let image = Arc::new(ImageLoader::load(&entry.path)?);
        debug!("Loaded {} ({})", entry.path.display(), describe(&image));
        self.image_cache.insert(entry.path.clone(), image.clone());
        Ok(image)
    }

    /// Inventory entry for `map_type` if it can be decoded. Unreadable
    /// files are reported and dropped so they count as missing.
    pub fn lookup(&mut self, map_type: MapType) -> Option<MapEntry> {
        let entry = self.inventory.get(map_type)?.clone();
        match self.load(&entry) {
            Ok(_) => Some(entry),
            Err(e) => {
                self.notify(format!("Ignoring unreadable {} map {}: {}", map_type, entry.path.display(), e));
                self.inventory.remove(map_type);
                None
            }
        }
    }

    /// Entry as 8-bit luminance.
    pub fn gray(&mut self, entry: &MapEntry) -> Result<GrayImage> {
        let image = self.load(entry)?;
        Ok(convert::luminance(&image))
    }

    /// Luminance of an inventory map, if present. No conversion.
    pub fn optional_gray(&mut self, map_type: MapType) -> Result<Option<GrayImage>> {
        match self.lookup(map_type) {
            Some(entry) => Ok(Some(self.gray(&entry)?)),
            None => Ok(None),
        }
    }

    fn cached_image(&mut self, map_type: MapType) -> Result<DynamicImage> {
        let entry = self
            .inventory
            .get(map_type)
            .cloned()
            .ok_or_else(|| Error::MissingInput(format!("{} was not unpacked", map_type)))?;
        Ok(self.load(&entry)?.as_ref().clone())
    }

    /// Copy a compatible map unchanged (e.g. Smoothness as Glossiness).
    pub fn copy_map(&mut self, source: &MapEntry) -> Result<DynamicImage> {
        Ok(self.load(source)?.as_ref().clone())
    }

    // --- resolution ---

    /// Resolve the first obtainable of `candidates`, logging and swallowing
    /// resolution errors.
    pub fn resolve_map(&mut self, candidates: &[MapType], allow_conversion: bool) -> Option<MapEntry> {
        match self.try_resolve_map(candidates, allow_conversion) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("[{}] {}", self.base_name, e);
                None
            }
        }
    }

    /// Resolve by direct lookup, then registry conversions, then input
    /// fallbacks. Fails with [`Error::CyclicConversion`] when every candidate
    /// is already being resolved further up the stack.
    pub fn try_resolve_map(
        &mut self,
        candidates: &[MapType],
        allow_conversion: bool,
    ) -> Result<Option<MapEntry>> {
        let use_fallbacks = self.config.use_input_fallbacks;
        self.resolve_inner(candidates, allow_conversion, use_fallbacks)
    }

    /// Input fallbacks apply to the top-level request only; conversion
    /// sources must exist or be converted from real data.
    fn resolve_inner(
        &mut self,
        candidates: &[MapType],
        allow_conversion: bool,
        use_fallbacks: bool,
    ) -> Result<Option<MapEntry>> {
        for &map_type in candidates {
            if let Some(entry) = self.lookup(map_type) {
                return Ok(Some(entry));
            }
        }

        if !candidates.is_empty() && candidates.iter().all(|t| self.resolving.contains(t)) {
            let mut chain = self.resolving.clone();
            chain.push(candidates[0]);
            return Err(Error::CyclicConversion(chain));
        }

        if allow_conversion && self.config.convert {
            for &target in candidates {
                if self.resolving.contains(&target) {
                    continue;
                }
                self.resolving.push(target);
                let converted = self.convert_to(target);
                self.resolving.pop();
                if let Some(entry) = converted? {
                    return Ok(Some(entry));
                }
            }
        }

        if use_fallbacks {
            for &target in candidates {
                for &fallback in target.input_fallbacks() {
                    // Fallbacks with a registered conversion were already tried above.
                    if !self.inventory.contains(fallback)
                        || self.registry.is_conversion_source(target, fallback)
                    {
                        continue;
                    }
                    let entry = match self.lookup(fallback) {
                        Some(entry) => entry,
                        None => continue,
                    };
                    self.notify(format!("Using {} as input fallback for {}", fallback, target));
                    return Ok(Some(entry));
                }
            }
        }

        Ok(None)
    }

    fn convert_to(&mut self, target: MapType) -> Result<Option<MapEntry>> {
        let rules = self.registry.get_conversions_for(target);
        for rule in rules {
            if let Some(source) = rule.sources.iter().find(|s| self.resolving.contains(s)) {
                debug!(
                    "Skipping {} for {}: {} is already being resolved",
                    rule.converter.name(),
                    target,
                    source
                );
                continue;
            }

            let mut sources = Vec::with_capacity(rule.sources.len());
            for &source in &rule.sources {
                // Composites are unpacked only when they exist, never built to be unpacked.
                let allow = !(source.is_packed() || source == MapType::AlbedoTransparency) || target.is_packed();
                match self.resolve_inner(&[source], allow, false) {
                    Ok(Some(entry)) => sources.push(entry),
                    Ok(None) => break,
                    Err(e) => {
                        debug!("{} for {}: {}", rule.converter.name(), target, e);
                        break;
                    }
                }
            }
            if sources.len() != rule.sources.len() {
                continue;
            }

            match rule.converter.apply(self, &sources) {
                Ok(image) => {
                    let entry = self.cache_generated(target, image)?;
                    self.notify(format!(
                        "Converted {} to {} ({})",
                        join(&rule.sources),
                        target,
                        rule.converter.name()
                    ));
                    return Ok(Some(entry));
                }
                Err(e) => {
                    warn!(
                        "[{}] Conversion {} -> {} failed: {}",
                        self.base_name,
                        rule.converter.name(),
                        target,
                        e
                    );
                }
            }
        }
        Ok(None)
    }

    /// Write a converted map as an intermediate and cache it.
    fn cache_generated(&mut self, map_type: MapType, image: DynamicImage) -> Result<MapEntry> {
        let image = enforce_mode(&image, map_type.mode());
        let path = self.output_path_for(map_type);
        if !self.config.dry_run {
            ImageLoader::save(&image, &path)?;
            self.record_created(path.clone());
        }
        let entry = MapEntry::in_memory(map_type, path, image);
        self.inventory.insert(entry.clone());
        Ok(entry)
    }

    /// Cache an unpacked channel unless the type is already known.
    fn cache_sibling(&mut self, map_type: MapType, image: DynamicImage) {
        if self.inventory.contains(map_type) {
            return;
        }
        let path = self.output_path_for(map_type);
        self.inventory.insert(MapEntry::in_memory(map_type, path, image));
    }

    // --- primitives ---

    fn require<'a>(source: Option<&'a MapEntry>, what: &str) -> Result<&'a MapEntry> {
        source.ok_or_else(|| Error::MissingInput(format!("Cannot {}: input map is missing", what)))
    }

    /// Metallic from specular luminance. Gloss suppression uses an explicit
    /// Glossiness map or meaningful specular alpha.
    pub fn convert_specular_to_metallic(&mut self, specular: Option<&MapEntry>) -> Result<DynamicImage> {
        let specular = Self::require(specular, "convert Specular to Metallic")?;
        let spec = self.load(specular)?;
        let gloss = match self.optional_gray(MapType::Glossiness)? {
            Some(gloss) => Some(gloss),
            None => convert::meaningful_alpha(&spec),
        };
        let metal = convert::specular_to_metallic(
            &spec,
            gloss.as_ref(),
            convert::METALLIC_THRESHOLD,
            convert::METALLIC_SOFTNESS,
        );
        Ok(DynamicImage::ImageLuma8(metal))
    }

    pub fn convert_specular_to_roughness(&mut self, specular: Option<&MapEntry>) -> Result<DynamicImage> {
        let specular = Self::require(specular, "convert Specular to Roughness")?;
        let spec = self.load(specular)?;
        Ok(DynamicImage::ImageLuma8(convert::specular_to_roughness(&spec, None)))
    }

    pub fn extract_gloss_from_spec(&mut self, specular: Option<&MapEntry>) -> Result<DynamicImage> {
        let specular = Self::require(specular, "extract Glossiness from Specular")?;
        let spec = self.load(specular)?;
        Ok(DynamicImage::ImageLuma8(convert::extract_gloss_from_spec(&spec, Channel::A)))
    }

    pub fn convert_smoothness_to_roughness(&mut self, smoothness: Option<&MapEntry>) -> Result<DynamicImage> {
        let smoothness = Self::require(smoothness, "convert Smoothness to Roughness")?;
        Ok(convert::invert(&*self.load(smoothness)?))
    }

    pub fn convert_roughness_to_smoothness(&mut self, roughness: Option<&MapEntry>) -> Result<DynamicImage> {
        let roughness = Self::require(roughness, "convert Roughness to Smoothness")?;
        Ok(convert::invert(&*self.load(roughness)?))
    }

    pub fn convert_dx_to_gl(&mut self, normal: Option<&MapEntry>) -> Result<DynamicImage> {
        let normal = Self::require(normal, "convert DirectX normal to OpenGL")?;
        Ok(convert::flip_green(&*self.load(normal)?))
    }

    pub fn convert_gl_to_dx(&mut self, normal: Option<&MapEntry>) -> Result<DynamicImage> {
        let normal = Self::require(normal, "convert OpenGL normal to DirectX")?;
        Ok(convert::flip_green(&*self.load(normal)?))
    }

    pub fn convert_bump_to_normal(
        &mut self,
        height: Option<&MapEntry>,
        format: NormalFormat,
    ) -> Result<DynamicImage> {
        let height = Self::require(height, "generate a normal map from Bump/Height")?;
        let image = self.load(height)?;
        let normal = convert::bump_to_normal(&image, format, self.config.normal_intensity);
        Ok(DynamicImage::ImageRgb8(normal))
    }

    /// Base colour for a specular workflow. Metallic is derived from the
    /// specular map when not supplied.
    pub fn create_base_color_from_spec(
        &mut self,
        diffuse: Option<&MapEntry>,
        specular: Option<&MapEntry>,
        metallic: Option<&MapEntry>,
    ) -> Result<DynamicImage> {
        let specular = Self::require(specular, "create Base_Color from Specular")?;
        let spec = self.load(specular)?.to_rgb8();
        let diffuse = match diffuse {
            Some(entry) => Some(self.load(entry)?.to_rgb8()),
            None => None,
        };
        let metal = match metallic {
            Some(entry) => self.gray(entry)?,
            None => self.convert_specular_to_metallic(Some(specular))?.to_luma8(),
        };
        let base = convert::base_color_from_spec(
            diffuse.as_ref(),
            &spec,
            &metal,
            true,
            convert::METAL_DARKENING,
        );
        Ok(DynamicImage::ImageRgb8(base))
    }

    /// Black out metal texels of `base` using the inventory's Metallic map.
    pub fn cleanup_base_color(&mut self, base: &DynamicImage) -> Result<DynamicImage> {
        match self.resolve_map(&[MapType::Metallic], false) {
            Some(metallic) => {
                let metal = self.gray(&metallic)?;
                Ok(convert::cleanup_base_color(base, &metal))
            }
            None => Ok(base.clone()),
        }
    }

    pub fn detect_normal_format(&mut self, normal: &MapEntry) -> Result<Option<NormalFormat>> {
        let image = self.load(normal)?;
        Ok(convert::detect_normal_format(&image, convert::NORMAL_FORMAT_THRESHOLD))
    }

    // --- unpackers ---

    fn unpack_metallic_smoothness(&mut self, source: &MapEntry) -> Result<()> {
        if self.inventory.contains(MapType::Metallic) && self.inventory.contains(MapType::Smoothness) {
            return Ok(());
        }
        let image = self.load(source)?;
        let (metal, smooth) = convert::unpack_metallic_smoothness(&image)?;
        self.cache_sibling(MapType::Metallic, DynamicImage::ImageLuma8(metal));
        self.cache_sibling(MapType::Smoothness, DynamicImage::ImageLuma8(smooth));
        self.notify("Unpacked Metallic and Smoothness from Metallic_Smoothness");
        Ok(())
    }

    pub fn get_metallic_from_packed(&mut self, source: &MapEntry) -> Result<DynamicImage> {
        self.unpack_metallic_smoothness(source)?;
        self.cached_image(MapType::Metallic)
    }

    pub fn get_smoothness_from_packed(&mut self, source: &MapEntry) -> Result<DynamicImage> {
        self.unpack_metallic_smoothness(source)?;
        self.cached_image(MapType::Smoothness)
    }

    pub fn get_roughness_from_packed(&mut self, source: &MapEntry) -> Result<DynamicImage> {
        self.unpack_metallic_smoothness(source)?;
        Ok(convert::invert(&self.cached_image(MapType::Smoothness)?))
    }

    fn unpack_msao(&mut self, source: &MapEntry) -> Result<()> {
        if [MapType::Metallic, MapType::AmbientOcclusion, MapType::Smoothness]
            .iter()
            .all(|t| self.inventory.contains(*t))
        {
            return Ok(());
        }
        let image = self.load(source)?;
        let (metal, ao, detail, smooth) = convert::unpack_msao(&image)?;
        self.cache_sibling(MapType::Metallic, DynamicImage::ImageLuma8(metal));
        self.cache_sibling(MapType::AmbientOcclusion, DynamicImage::ImageLuma8(ao));
        self.cache_sibling(MapType::DetailMask, DynamicImage::ImageLuma8(detail));
        self.cache_sibling(MapType::Smoothness, DynamicImage::ImageLuma8(smooth));
        self.notify("Unpacked Metallic, Ambient_Occlusion and Smoothness from MSAO");
        Ok(())
    }

    pub fn get_metallic_from_msao(&mut self, source: &MapEntry) -> Result<DynamicImage> {
        self.unpack_msao(source)?;
        self.cached_image(MapType::Metallic)
    }

    pub fn get_smoothness_from_msao(&mut self, source: &MapEntry) -> Result<DynamicImage> {
        self.unpack_msao(source)?;
        self.cached_image(MapType::Smoothness)
    }

    pub fn get_roughness_from_msao(&mut self, source: &MapEntry) -> Result<DynamicImage> {
        self.unpack_msao(source)?;
        Ok(convert::invert(&self.cached_image(MapType::Smoothness)?))
    }

    pub fn get_ao_from_msao(&mut self, source: &MapEntry) -> Result<DynamicImage> {
        self.unpack_msao(source)?;
        self.cached_image(MapType::AmbientOcclusion)
    }

    fn unpack_orm(&mut self, source: &MapEntry) -> Result<()> {
        if [MapType::AmbientOcclusion, MapType::Roughness, MapType::Metallic]
            .iter()
            .all(|t| self.inventory.contains(*t))
        {
            return Ok(());
        }
        let image = self.load(source)?;
        let (ao, rough, metal) = convert::unpack_orm(&image)?;
        self.cache_sibling(MapType::AmbientOcclusion, DynamicImage::ImageLuma8(ao));
        self.cache_sibling(MapType::Roughness, DynamicImage::ImageLuma8(rough));
        self.cache_sibling(MapType::Metallic, DynamicImage::ImageLuma8(metal));
        self.notify("Unpacked Ambient_Occlusion, Roughness and Metallic from ORM");
        Ok(())
    }

    pub fn get_ao_from_orm(&mut self, source: &MapEntry) -> Result<DynamicImage> {
        self.unpack_orm(source)?;
        self.cached_image(MapType::AmbientOcclusion)
    }

    pub fn get_roughness_from_orm(&mut self, source: &MapEntry) -> Result<DynamicImage> {
        self.unpack_orm(source)?;
        self.cached_image(MapType::Roughness)
    }

    pub fn get_smoothness_from_orm(&mut self, source: &MapEntry) -> Result<DynamicImage> {
        self.unpack_orm(source)?;
        Ok(convert::invert(&self.cached_image(MapType::Roughness)?))
    }

    pub fn get_metallic_from_orm(&mut self, source: &MapEntry) -> Result<DynamicImage> {
        self.unpack_orm(source)?;
        self.cached_image(MapType::Metallic)
    }

    fn unpack_albedo_transparency(&mut self, source: &MapEntry) -> Result<()> {
        if self.inventory.contains(MapType::BaseColor) && self.inventory.contains(MapType::Opacity) {
            return Ok(());
        }
        let image = self.load(source)?;
        let (base, opacity) = convert::unpack_albedo_transparency(&image)?;
        self.cache_sibling(MapType::BaseColor, DynamicImage::ImageRgb8(base));
        self.cache_sibling(MapType::Opacity, DynamicImage::ImageLuma8(opacity));
        self.notify("Unpacked Base_Color and Opacity from Albedo_Transparency");
        Ok(())
    }

    pub fn get_base_color_from_albedo_transparency(&mut self, source: &MapEntry) -> Result<DynamicImage> {
        self.unpack_albedo_transparency(source)?;
        self.cached_image(MapType::BaseColor)
    }

    pub fn get_opacity_from_albedo_transparency(&mut self, source: &MapEntry) -> Result<DynamicImage> {
        self.unpack_albedo_transparency(source)?;
        self.cached_image(MapType::Opacity)
    }

    // --- composites ---

    /// Load the components of a composite, enforcing the partial-input policy.
    fn components(
        &mut self,
        target: MapType,
        parts: Vec<(MapType, Option<MapEntry>)>,
    ) -> Result<Vec<Option<GrayImage>>> {
        let missing: Vec<&str> = parts
            .iter()
            .filter(|(_, entry)| entry.is_none())
            .map(|(t, _)| t.name())
            .collect();

        if missing.len() == parts.len() || (!missing.is_empty() && !self.config.use_output_fallbacks) {
            return Err(Error::MissingInput(format!(
                "Missing components for {} map: {}",
                target,
                missing.join(", ")
            )));
        }
        if !missing.is_empty() {
            self.notify(format!(
                "Building {} without {}; filling with defaults",
                target,
                missing.join(", ")
            ));
        }

        let mut out = Vec::with_capacity(parts.len());
        for (_, entry) in parts {
            out.push(match entry {
                Some(entry) => Some(self.gray(&entry)?),
                None => None,
            });
        }
        Ok(out)
    }

    /// Smoothness from Smoothness/Glossiness as is, else inverted Roughness.
    fn resolve_smoothness(&mut self) -> Result<Option<GrayImage>> {
        if let Some(entry) = self.resolve_map(&[MapType::Smoothness, MapType::Glossiness], false) {
            return Ok(Some(self.gray(&entry)?));
        }
        match self.resolve_map(&[MapType::Roughness], true) {
            Some(entry) => Ok(Some(convert::invert_gray(&self.gray(&entry)?))),
            None => Ok(None),
        }
    }

    /// ORM: R = AO, G = roughness, B = metallic.
    pub fn create_orm_map(&mut self) -> Result<DynamicImage> {
        let ao = self.resolve_map(&[MapType::AmbientOcclusion], true);
        let roughness = self.resolve_map(&[MapType::Roughness], true);
        let metallic = self.resolve_map(&[MapType::Metallic], true);

        let c = self.components(
            MapType::Orm,
            vec![
                (MapType::AmbientOcclusion, ao),
                (MapType::Roughness, roughness),
                (MapType::Metallic, metallic),
            ],
        )?;
        let packed = convert::pack_orm(c[0].as_ref(), c[1].as_ref(), c[2].as_ref())?;
        self.notify("Created ORM map from components");
        Ok(DynamicImage::ImageRgb8(packed))
    }

    /// Mask map (MSAO): R = metallic, G = AO, B = detail mask, A = smoothness.
    pub fn create_mask_map(&mut self) -> Result<DynamicImage> {
        let metallic = self.resolve_map(&[MapType::Metallic], true);
        let ao = self.resolve_map(&[MapType::AmbientOcclusion], true);
        let smoothness = self.resolve_smoothness()?;
        let detail = self.optional_gray(MapType::DetailMask)?;

        let mut missing = Vec::new();
        if metallic.is_none() {
            missing.push(MapType::Metallic.name());
        }
        if ao.is_none() {
            missing.push(MapType::AmbientOcclusion.name());
        }
        if smoothness.is_none() {
            missing.push(MapType::Smoothness.name());
        }
        if missing.len() == 3 || (!missing.is_empty() && !self.config.use_output_fallbacks) {
            return Err(Error::MissingInput(format!(
                "Missing components for {} map: {}",
                MapType::Msao,
                missing.join(", ")
            )));
        }
        if !missing.is_empty() {
            self.notify(format!(
                "Building {} without {}; filling with defaults",
                MapType::Msao,
                missing.join(", ")
            ));
        }

        let metal = metallic.map(|e| self.gray(&e)).transpose()?;
        let ao = ao.map(|e| self.gray(&e)).transpose()?;
        let packed = convert::pack_msao(metal.as_ref(), ao.as_ref(), detail.as_ref(), smoothness.as_ref())?;
        self.notify("Created mask map from components");
        Ok(DynamicImage::ImageRgba8(packed))
    }

    /// Metallic in RGB, smoothness in alpha. Both inputs are required.
    pub fn create_metallic_smoothness_map(&mut self) -> Result<DynamicImage> {
        let metallic = self.resolve_map(&[MapType::Metallic], true);
        let smoothness = self.resolve_smoothness()?;

        let (metallic, smoothness) = match (metallic, smoothness) {
            (Some(m), Some(s)) => (m, s),
            (m, s) => {
                let mut missing = Vec::new();
                if m.is_none() {
                    missing.push(MapType::Metallic.name());
                }
                if s.is_none() {
                    missing.push(MapType::Smoothness.name());
                }
                return Err(Error::MissingInput(format!(
                    "Missing components for {} map: {}",
                    MapType::MetallicSmoothness,
                    missing.join(", ")
                )));
            }
        };

        let metal = self.gray(&metallic)?;
        let packed = convert::pack_metallic_smoothness(&metal, &smoothness);
        self.notify("Packed smoothness into metallic");
        Ok(DynamicImage::ImageRgba8(packed))
    }

    /// RGB from `base`, alpha from `opacity`.
    pub fn create_albedo_transparency(&mut self, base: &MapEntry, opacity: &MapEntry) -> Result<DynamicImage> {
        let base = self.load(base)?;
        let opacity = self.gray(opacity)?;
        Ok(DynamicImage::ImageRgba8(convert::pack_albedo_transparency(&base, &opacity)))
    }

    /// Replace a specular/glossiness set with Base_Color, Metallic and
    /// Roughness. Gloss comes from Glossiness, Smoothness or the specular
    /// alpha; without any of them the inventory is left alone.
    ///
    /// Returns whether the inventory was rewritten.
    pub fn convert_specgloss_workflow(&mut self) -> Result<bool> {
        let specular = match self.lookup(MapType::Specular) {
            Some(entry) => entry,
            None => return Ok(false),
        };
        let spec = self.load(&specular)?;
        let gloss_entry = match self.lookup(MapType::Glossiness) {
            Some(entry) => Some(entry),
            None => self.lookup(MapType::Smoothness),
        };
        let gloss = match gloss_entry {
            Some(entry) => self.gray(&entry)?,
            None => match convert::meaningful_alpha(&spec) {
                Some(alpha) => {
                    self.notify("Using specular alpha as glossiness");
                    alpha
                }
                None => {
                    debug!("[{}] Specular without gloss; keeping specular workflow", self.base_name);
                    return Ok(false);
                }
            },
        };
        let diffuse = match self.lookup(MapType::Diffuse) {
            Some(entry) => Some(self.load(&entry)?.to_rgb8()),
            None => None,
        };

        let metal = convert::specular_to_metallic(
            &spec,
            Some(&gloss),
            convert::METALLIC_THRESHOLD,
            convert::METALLIC_SOFTNESS,
        );
        let roughness = convert::gloss_to_roughness(&gloss);
        let base = convert::base_color_from_spec(
            diffuse.as_ref(),
            &spec.to_rgb8(),
            &metal,
            true,
            convert::METAL_DARKENING,
        );

        for map_type in [MapType::Specular, MapType::Glossiness, MapType::Smoothness, MapType::Diffuse] {
            self.inventory.remove(map_type);
        }
        let generated = [
            (MapType::BaseColor, DynamicImage::ImageRgb8(base)),
            (MapType::Metallic, DynamicImage::ImageLuma8(metal)),
            (MapType::Roughness, DynamicImage::ImageLuma8(roughness)),
        ];
        for (map_type, image) in generated {
            let path = self.output_path_for(map_type);
            self.inventory.insert(MapEntry::in_memory(map_type, path, image));
        }
        self.original_types = self.inventory.types().collect();
        self.notify("Converted specular/glossiness workflow to metallic/roughness");
        Ok(true)
    }

    // --- output ---

    /// Output extension for a type: the configured one, except that JPEG is
    /// replaced by PNG for packed maps and maps with alpha.
    pub fn output_extension_for(&self, map_type: MapType) -> String {
        let ext = self
            .config
            .output_extension
            .trim_start_matches('.')
            .to_lowercase();
        let lossy = ext == "jpg" || ext == "jpeg";
        if lossy && (map_type.is_packed() || map_type.mode() == ColorMode::Rgba) {
            "png".to_string()
        } else {
            ext
        }
    }

    /// `{output_dir}/{base_name}_{MapType}.{ext}`
    pub fn output_path_for(&self, map_type: MapType) -> PathBuf {
        self.output_dir.join(format!(
            "{}_{}.{}",
            self.base_name,
            map_type.name(),
            self.output_extension_for(map_type)
        ))
    }

    fn max_size_for(&self, map_type: MapType) -> Option<u32> {
        self.config.max_size.map(|max| {
            if map_type.scale_as_mask() {
                ((max as f32) * self.config.mask_map_scale).round().max(1.0) as u32
            } else {
                max
            }
        })
    }

    fn exceeds(&self, dims: (u32, u32), max_size: Option<u32>) -> bool {
        max_size.map(|m| dims.0.max(dims.1) > m).unwrap_or(false)
    }

    /// Write `entry` as the output for `map_type` and return the path.
    ///
    /// File sources already in the output format are returned unchanged (or
    /// copied when renaming). Outputs newer than their source are kept unless
    /// `force` is set.
    pub fn save_map(&mut self, entry: &MapEntry, map_type: MapType) -> Result<PathBuf> {
        let output_path = self.output_path_for(map_type);
        if self.config.dry_run {
            self.notify(format!("Would save {} to {}", map_type, output_path.display()));
            return Ok(output_path);
        }
        let max_size = self.max_size_for(map_type);

        match &entry.image {
            None => {
                let needs_resize = match max_size {
                    Some(_) => self.exceeds(image::image_dimensions(&entry.path)?, max_size),
                    None => false,
                };
                if extension(&entry.path) == extension(&output_path) && !needs_resize {
                    if !self.config.rename {
                        debug!("Keeping {} as {}", entry.path.display(), map_type);
                        return Ok(entry.path.clone());
                    }
                    if !same_file(&entry.path, &output_path) {
                        std::fs::create_dir_all(&self.output_dir)?;
                        std::fs::copy(&entry.path, &output_path)?;
                        self.record_created(output_path.clone());
                        self.notify(format!("Copied {} to {}", map_type, output_path.display()));
                    }
                    return Ok(output_path);
                }
                if !self.config.force && is_up_to_date(&entry.path, &output_path) {
                    self.notify(format!("Skipping {}: output is up to date", map_type));
                    return Ok(output_path);
                }
            }
            Some(image) => {
                if entry.path == output_path
                    && output_path.exists()
                    && !self.exceeds(image.dimensions(), max_size)
                {
                    return Ok(output_path);
                }
            }
        }

        let image = self.load(entry)?;
        let mut image = enforce_mode(&image, map_type.mode());
        if let Some(max) = max_size {
            image = resize_to_max(&image, max);
        }
        ImageLoader::save(&image, &output_path)?;
        self.record_created(output_path.clone());
        self.notify(format!("Saved {} to {}", map_type, output_path.display()));
        Ok(output_path)
    }

    /// Save a freshly built image as the output for `map_type`.
    pub fn save_image(&mut self, image: DynamicImage, map_type: MapType) -> Result<PathBuf> {
        let entry = MapEntry::in_memory(map_type, self.output_path_for(map_type), image);
        let path = self.save_map(&entry, map_type)?;
        Ok(path)
    }
}

fn join(types: &[MapType]) -> String {
    types.iter().map(|t| t.name()).collect::<Vec<_>>().join(" + ")
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|s| s.to_lowercase())
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

fn is_up_to_date(source: &Path, output: &Path) -> bool {
    let modified = |p: &Path| std::fs::metadata(p).and_then(|m| m.modified()).ok();
    match (modified(source), modified(output)) {
        (Some(src), Some(out)) => out >= src,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Converter;
    use image::{Luma, Rgb, RgbImage, RgbaImage};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn write_gray(dir: &Path, name: &str, value: u8) -> PathBuf {
        let path = dir.join(name);
        GrayImage::from_pixel(8, 8, Luma([value])).save(&path).unwrap();
        path
    }

    fn write_rgb(dir: &Path, name: &str, value: [u8; 3]) -> PathBuf {
        let path = dir.join(name);
        RgbImage::from_pixel(8, 8, Rgb(value)).save(&path).unwrap();
        path
    }

    fn processor(dir: &Path, files: &[PathBuf], config: WorkflowConfig) -> TextureProcessor {
        TextureProcessor::new(Inventory::from_files(files), config, dir.join("out"), "Mat")
            .with_registry(Arc::new(ConversionRegistry::with_standard()))
    }

    #[test]
    fn inventory_keeps_first_file_per_type() {
        let files = vec![
            PathBuf::from("a/Mat_Roughness.png"),
            PathBuf::from("b/Mat_Roughness.png"),
            PathBuf::from("a/readme.png"),
        ];
        let inventory = Inventory::from_files(&files);
        assert_eq!(inventory.len(), 1);
        assert_eq!(inventory.get(MapType::Roughness).unwrap().path, files[0]);
    }

    #[test]
    fn mid_gray_specular_resolves_to_full_metallic() {
        let dir = tempfile::tempdir().unwrap();
        let spec = write_rgb(dir.path(), "Mat_Specular.png", [128, 128, 128]);
        let mut p = processor(dir.path(), &[spec], WorkflowConfig::default());

        let metallic = p.resolve_map(&[MapType::Metallic], true).unwrap();
        let image = p.load(&metallic).unwrap();
        assert!(image.to_luma8().pixels().all(|px| px.0[0] == 255));
        assert!(p.created_files().contains(&dir.path().join("out/Mat_Metallic.png")));
    }

    #[test]
    fn converted_maps_are_cached() {
        let dir = tempfile::tempdir().unwrap();
        let smooth = write_gray(dir.path(), "Mat_Smoothness.png", 200);
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = ConversionRegistry::new();
        let counter = calls.clone();
        registry
            .register(
                MapType::Roughness,
                vec![MapType::Smoothness],
                Converter::new("counting_invert", move |p, s| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    p.convert_smoothness_to_roughness(s.first())
                }),
                10,
            )
            .unwrap();

        let mut p = TextureProcessor::new(
            Inventory::from_files(&[smooth]),
            WorkflowConfig::default(),
            dir.path().join("out"),
            "Mat",
        )
        .with_registry(Arc::new(registry));

        let first = p.resolve_map(&[MapType::Roughness], true).unwrap();
        let second = p.resolve_map(&[MapType::Roughness], true).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.path, second.path);
        assert_eq!(p.load(&second).unwrap().to_luma8().get_pixel(0, 0).0[0], 55);
    }

    #[test]
    fn failing_rule_falls_through_to_next_priority() {
        let dir = tempfile::tempdir().unwrap();
        let base = write_rgb(dir.path(), "Mat_BaseColor.png", [10, 20, 30]);
        let registry = ConversionRegistry::new();
        registry
            .register(
                MapType::Sheen,
                vec![MapType::BaseColor],
                Converter::new("broken", |_, _| Err(Error::Other("boom".into()))),
                10,
            )
            .unwrap();
        registry
            .register(
                MapType::Sheen,
                vec![MapType::BaseColor],
                Converter::new("working", |_, _| Ok(DynamicImage::new_luma8(2, 2))),
                1,
            )
            .unwrap();

        let mut p = TextureProcessor::new(
            Inventory::from_files(&[base]),
            WorkflowConfig::default(),
            dir.path().join("out"),
            "Mat",
        )
        .with_registry(Arc::new(registry));

        let sheen = p.resolve_map(&[MapType::Sheen], true).unwrap();
        assert_eq!(sheen.map_type, MapType::Sheen);
        assert!(p.messages().iter().any(|m| m.contains("working")));
    }

    #[test]
    fn reentrant_converter_reports_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let base = write_rgb(dir.path(), "Mat_BaseColor.png", [10, 20, 30]);
        let seen = Arc::new(Mutex::new(None));
        let registry = ConversionRegistry::new();
        let sink = seen.clone();
        registry
            .register(
                MapType::Sheen,
                vec![MapType::BaseColor],
                Converter::new("self_referential", move |p, _| {
                    let err = p.try_resolve_map(&[MapType::Sheen], true).unwrap_err();
                    *sink.lock().unwrap() = Some(err.to_string());
                    Err(err)
                }),
                1,
            )
            .unwrap();

        let mut p = TextureProcessor::new(
            Inventory::from_files(&[base]),
            WorkflowConfig::default(),
            dir.path().join("out"),
            "Mat",
        )
        .with_registry(Arc::new(registry));

        assert!(p.resolve_map(&[MapType::Sheen], true).is_none());
        let message = seen.lock().unwrap().clone().unwrap();
        assert!(message.contains("Cyclic conversion: Sheen -> Sheen"));
        assert!(!p.inventory().contains(MapType::Sheen));
    }

    #[test]
    fn input_fallback_follows_config() {
        let dir = tempfile::tempdir().unwrap();
        let diffuse = write_rgb(dir.path(), "Mat_Diffuse.png", [90, 90, 90]);

        let mut p = processor(dir.path(), &[diffuse.clone()], WorkflowConfig::default());
        let base = p.resolve_map(&[MapType::BaseColor], true).unwrap();
        assert_eq!(base.map_type, MapType::Diffuse);
        assert_eq!(base.path, diffuse);

        let config = WorkflowConfig {
            use_input_fallbacks: false,
            ..WorkflowConfig::default()
        };
        let mut p = processor(dir.path(), &[diffuse], config);
        assert!(p.resolve_map(&[MapType::BaseColor], true).is_none());
    }

    #[test]
    fn unreadable_entry_resolves_as_missing() {
        let dir = tempfile::tempdir().unwrap();
        let broken = dir.path().join("Mat_Smoothness.png");
        std::fs::write(&broken, b"garbage").unwrap();
        let mut p = processor(dir.path(), &[broken], WorkflowConfig::default());

        assert!(p.resolve_map(&[MapType::Roughness], true).is_none());
        assert!(!p.inventory().contains(MapType::Smoothness));
        assert!(p.original_types().contains(&MapType::Smoothness));
        assert_eq!(
            p.messages().iter().filter(|m| m.starts_with("Ignoring unreadable")).count(),
            1
        );
    }

    #[test]
    fn conversion_can_be_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let smooth = write_gray(dir.path(), "Mat_Smoothness.png", 200);
        let config = WorkflowConfig {
            convert: false,
            ..WorkflowConfig::default()
        };
        let mut p = processor(dir.path(), &[smooth], config);
        assert!(p.resolve_map(&[MapType::Roughness], true).is_none());
        assert!(p.resolve_map(&[MapType::Roughness], false).is_none());
    }

    #[test]
    fn partial_orm_depends_on_output_fallbacks() {
        let dir = tempfile::tempdir().unwrap();
        let ao = write_gray(dir.path(), "Mat_AO.png", 200);

        let mut p = processor(dir.path(), &[ao.clone()], WorkflowConfig::default());
        let orm = p.create_orm_map().unwrap().to_rgb8();
        assert_eq!(orm.get_pixel(0, 0).0, [200, 128, 128]);
        assert!(p.messages().iter().any(|m| m.contains("filling with defaults")));

        let config = WorkflowConfig {
            use_output_fallbacks: false,
            ..WorkflowConfig::default()
        };
        let mut p = processor(dir.path(), &[ao], config);
        assert!(matches!(p.create_orm_map(), Err(Error::MissingInput(_))));
    }

    #[test]
    fn orm_without_components_is_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let emissive = write_rgb(dir.path(), "Mat_Emissive.png", [1, 2, 3]);
        let mut p = processor(dir.path(), &[emissive], WorkflowConfig::default());
        let err = p.create_orm_map().unwrap_err();
        assert!(err.to_string().starts_with("Missing components for ORM map"));
    }

    #[test]
    fn metallic_smoothness_requires_both_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let metal = write_gray(dir.path(), "Mat_Metallic.png", 255);
        let mut p = processor(dir.path(), &[metal.clone()], WorkflowConfig::default());
        assert!(matches!(
            p.create_metallic_smoothness_map(),
            Err(Error::MissingInput(_))
        ));

        let rough = write_gray(dir.path(), "Mat_Roughness.png", 55);
        let mut p = processor(dir.path(), &[metal, rough], WorkflowConfig::default());
        let packed = p.create_metallic_smoothness_map().unwrap().to_rgba8();
        assert_eq!(packed.get_pixel(0, 0).0, [255, 255, 255, 200]);
    }

    #[test]
    fn mask_map_inverts_roughness_into_alpha() {
        let dir = tempfile::tempdir().unwrap();
        let metal = write_gray(dir.path(), "Mat_Metallic.png", 10);
        let ao = write_gray(dir.path(), "Mat_AO.png", 220);
        let rough = write_gray(dir.path(), "Mat_Roughness.png", 55);
        let mut p = processor(dir.path(), &[metal, ao, rough], WorkflowConfig::default());
        let mask = p.create_mask_map().unwrap().to_rgba8();
        assert_eq!(mask.get_pixel(3, 3).0, [10, 220, 0, 200]);
    }

    #[test]
    fn unpacking_caches_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Mat_ORM.png");
        RgbImage::from_pixel(4, 4, Rgb([250, 60, 5])).save(&path).unwrap();
        let mut p = processor(dir.path(), &[path], WorkflowConfig::default());

        let metallic = p.resolve_map(&[MapType::Metallic], true).unwrap();
        assert_eq!(p.load(&metallic).unwrap().to_luma8().get_pixel(0, 0).0[0], 5);
        assert!(p.inventory().contains(MapType::AmbientOcclusion));
        assert!(p.inventory().contains(MapType::Roughness));
        assert!(!p.original_types().contains(&MapType::Roughness));

        let smooth = p.resolve_map(&[MapType::Smoothness], true).unwrap();
        assert_eq!(p.load(&smooth).unwrap().to_luma8().get_pixel(0, 0).0[0], 195);
    }

    #[test]
    fn normal_flip_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Mat_Normal_GL.png");
        RgbImage::from_fn(8, 8, |x, y| Rgb([x as u8 * 20, y as u8 * 25, 255]))
            .save(&path)
            .unwrap();
        let mut p = processor(dir.path(), &[path.clone()], WorkflowConfig::default());
        let source = p.inventory().get(MapType::NormalOpenGl).cloned().unwrap();

        let dx = p.convert_gl_to_dx(Some(&source)).unwrap();
        let dx_entry = MapEntry::in_memory(MapType::NormalDirectX, "dx.png", dx);
        let gl = p.convert_dx_to_gl(Some(&dx_entry)).unwrap();
        assert_eq!(gl.to_rgb8(), image::open(&path).unwrap().to_rgb8());
    }

    #[test]
    fn primitives_report_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = processor(dir.path(), &[], WorkflowConfig::default());
        assert!(matches!(
            p.convert_specular_to_metallic(None),
            Err(Error::MissingInput(_))
        ));
        assert!(matches!(
            p.convert_bump_to_normal(None, NormalFormat::OpenGl),
            Err(Error::MissingInput(_))
        ));
    }

    #[test]
    fn specgloss_set_becomes_metal_rough() {
        let dir = tempfile::tempdir().unwrap();
        let files = vec![
            write_rgb(dir.path(), "Mat_Diffuse.png", [100, 150, 200]),
            write_rgb(dir.path(), "Mat_Specular.png", [200, 100, 50]),
            write_gray(dir.path(), "Mat_Glossiness.png", 0),
        ];
        let mut p = processor(dir.path(), &files, WorkflowConfig::default());
        assert!(p.convert_specgloss_workflow().unwrap());

        let types: Vec<MapType> = p.inventory().types().collect();
        assert_eq!(types, vec![MapType::BaseColor, MapType::Roughness, MapType::Metallic]);
        assert!(p.original_types().contains(&MapType::Metallic));
        assert!(!p.original_types().contains(&MapType::Specular));

        let base = p.inventory().get(MapType::BaseColor).cloned().unwrap();
        assert_eq!(p.load(&base).unwrap().to_rgb8().get_pixel(0, 0).0, [170, 85, 42]);
        let rough = p.inventory().get(MapType::Roughness).cloned().unwrap();
        assert_eq!(p.gray(&rough).unwrap().get_pixel(0, 0).0[0], 255);
    }

    #[test]
    fn specular_without_gloss_is_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let spec = write_rgb(dir.path(), "Mat_Specular.png", [200, 100, 50]);
        let mut p = processor(dir.path(), &[spec], WorkflowConfig::default());
        assert!(!p.convert_specgloss_workflow().unwrap());
        assert!(p.inventory().contains(MapType::Specular));
    }

    #[test]
    fn save_map_keeps_or_copies_file_sources() {
        let dir = tempfile::tempdir().unwrap();
        let rough = write_gray(dir.path(), "Wood_rough.png", 80);
        let entry = MapEntry::from_file(MapType::Roughness, &rough);

        let mut p = processor(dir.path(), &[], WorkflowConfig::default());
        assert_eq!(p.save_map(&entry, MapType::Roughness).unwrap(), rough);
        assert!(p.created_files().is_empty());

        let config = WorkflowConfig {
            rename: true,
            ..WorkflowConfig::default()
        };
        let mut p = processor(dir.path(), &[], config);
        let out = p.save_map(&entry, MapType::Roughness).unwrap();
        assert_eq!(out, dir.path().join("out/Mat_Roughness.png"));
        assert!(out.exists());
        assert_eq!(p.created_files(), &[out]);
    }

    #[test]
    fn save_map_dry_run_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = WorkflowConfig {
            dry_run: true,
            ..WorkflowConfig::default()
        };
        let mut p = processor(dir.path(), &[], config);
        let out = p
            .save_image(DynamicImage::new_luma8(4, 4), MapType::Roughness)
            .unwrap();
        assert!(!out.exists());
        assert!(p.messages()[0].starts_with("Would save Roughness"));
    }

    #[test]
    fn jpg_output_switches_to_png_for_alpha_maps() {
        let dir = tempfile::tempdir().unwrap();
        let config = WorkflowConfig {
            output_extension: "jpg".into(),
            ..WorkflowConfig::default()
        };
        let mut p = processor(dir.path(), &[], config);
        let msao = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, image::Rgba([1, 2, 3, 4])));
        let out = p.save_image(msao, MapType::Msao).unwrap();
        assert_eq!(out.extension().unwrap(), "png");
        assert_eq!(
            p.output_path_for(MapType::Roughness).extension().unwrap(),
            "jpg"
        );
    }

    #[test]
    fn save_map_resizes_to_max_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Mat_AO.png");
        GrayImage::from_pixel(64, 32, Luma([255])).save(&path).unwrap();
        let config = WorkflowConfig {
            max_size: Some(16),
            ..WorkflowConfig::default()
        };
        let mut p = processor(dir.path(), &[path.clone()], config);
        let entry = MapEntry::from_file(MapType::AmbientOcclusion, &path);
        let out = p.save_map(&entry, MapType::AmbientOcclusion).unwrap();
        assert_ne!(out, path);
        assert_eq!(image::image_dimensions(&out).unwrap(), (16, 8));
    }
}
