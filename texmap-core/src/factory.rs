//! Top-level orchestration.
//!
//! [`MapFactory`] filters and groups input files into texture sets, runs the
//! workflow handlers over each set and collects the outputs. A failing
//! handler or set is reported and skipped; the batch always completes.

use crate::config::WorkflowConfig;
use crate::handlers::workflow_handlers;
use crate::image_loading::ImageLoader;
use crate::map_type::{base_texture_name, group_textures_by_set};
use crate::processor::{Inventory, ProgressCallback, TextureProcessor};
use crate::registry::ConversionRegistry;
use crate::report::SetReport;
use crate::Result;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Entry point for preparing texture sets
pub struct MapFactory;

impl MapFactory {
    /// Supported texture files in `source`: the file itself, or the files of
    /// a directory (not recursive), sorted by path.
    pub fn collect_files<P: AsRef<Path>>(source: P) -> Result<Vec<PathBuf>> {
        let source = source.as_ref();
        if source.is_file() {
            return Ok(vec![source.to_path_buf()]);
        }
        let mut files: Vec<PathBuf> = std::fs::read_dir(source)?
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && ImageLoader::is_supported(path))
            .collect();
        files.sort();
        Ok(files)
    }

    /// Prepare every texture set in `files` and return the output paths in
    /// set order.
    ///
    /// Outputs go to `output_dir`, or next to each set's first input.
    pub fn prepare_maps(
        files: &[PathBuf],
        config: &WorkflowConfig,
        output_dir: Option<&Path>,
        callback: Option<ProgressCallback>,
    ) -> Vec<PathBuf> {
        Self::prepare_sets(files, config, output_dir, callback)
            .into_iter()
            .flat_map(|set| set.outputs)
            .collect()
    }

    /// Like [`MapFactory::prepare_maps`], with one report per texture set.
    pub fn prepare_sets(
        files: &[PathBuf],
        config: &WorkflowConfig,
        output_dir: Option<&Path>,
        callback: Option<ProgressCallback>,
    ) -> Vec<SetReport> {
        let files: Vec<PathBuf> = files
            .iter()
            .filter(|file| {
                let ignored = config.is_ignored(file);
                if ignored {
                    debug!("Ignoring {}", file.display());
                }
                !ignored
            })
            .cloned()
            .collect();
        if files.is_empty() {
            warn!("No input files to process");
            return Vec::new();
        }

        let sets = if config.group_by_set {
            group_textures_by_set(&files)
        } else {
            vec![(base_texture_name(&files[0]), files.clone())]
        };
        if sets.len() > 1 {
            info!("Found {} texture sets", sets.len());
        }

        let registry = ConversionRegistry::global();
        let run = |(base_name, textures): &(String, Vec<PathBuf>)| {
            Self::process_set(base_name, textures, config, output_dir, &registry, callback.clone())
        };

        if config.max_workers > 1 && sets.len() > 1 {
            match rayon::ThreadPoolBuilder::new()
                .num_threads(config.max_workers)
                .build()
            {
                Ok(pool) => return pool.install(|| sets.par_iter().map(&run).collect()),
                Err(e) => warn!("Worker pool unavailable ({}); processing sets sequentially", e),
            }
        }
        sets.iter().map(&run).collect()
    }

    fn process_set(
        base_name: &str,
        textures: &[PathBuf],
        config: &WorkflowConfig,
        output_dir: Option<&Path>,
        registry: &Arc<ConversionRegistry>,
        callback: Option<ProgressCallback>,
    ) -> SetReport {
        let mut report = SetReport::new(base_name, textures.to_vec());
        let inventory = Inventory::from_files(textures);
        if inventory.is_empty() {
            report.messages.push("No recognised texture maps".to_string());
            return report;
        }

        let output_dir = match output_dir {
            Some(dir) => dir.to_path_buf(),
            None => textures
                .first()
                .and_then(|t| t.parent())
                .map(Path::to_path_buf)
                .unwrap_or_default(),
        };
        debug!("Processing {} ({} maps) into {}", base_name, inventory.len(), output_dir.display());
        if !config.dry_run {
            if let Err(e) = std::fs::create_dir_all(&output_dir) {
                error!("[{}] Cannot create {}: {}", base_name, output_dir.display(), e);
                report.error = Some(format!("Cannot create output folder {}: {}", output_dir.display(), e));
                return report;
            }
        }

        let mut processor = TextureProcessor::new(inventory, config.clone(), output_dir, base_name)
            .with_registry(registry.clone())
            .with_callback(callback);

        if config.convert && config.convert_specgloss_to_pbr {
            if let Err(e) = processor.convert_specgloss_workflow() {
                processor.notify(format!("Specular/glossiness conversion failed: {}", e));
            }
        }

        let mut outputs: Vec<PathBuf> = Vec::new();
        for handler in workflow_handlers(config) {
            if !handler.can_handle(&processor) {
                continue;
            }
            match handler.process(&mut processor) {
                Ok(paths) => {
                    if !paths.is_empty() {
                        processor.mark_used(handler.consumed_types());
                    }
                    for path in paths {
                        if !outputs.contains(&path) {
                            outputs.push(path);
                        }
                    }
                }
                Err(e) => {
                    error!("[{}] {} failed: {}", base_name, handler.name(), e);
                    processor.notify(format!("Skipped {}: {}", handler.name(), e));
                }
            }
        }

        Self::remove_intermediates(&processor, &outputs, textures);

        report.outputs = outputs;
        report.messages = processor.take_messages();
        report
    }

    /// Delete files written during resolution that did not become outputs.
    fn remove_intermediates(processor: &TextureProcessor, outputs: &[PathBuf], inputs: &[PathBuf]) {
        let stale: Vec<PathBuf> = processor
            .created_files()
            .iter()
            .filter(|f| !outputs.contains(f) && !inputs.contains(f))
            .cloned()
            .collect();
        for file in stale {
            match std::fs::remove_file(&file) {
                Ok(()) => debug!("Removed intermediate {}", file.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Could not remove intermediate {}: {}", file.display(), e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorkflowPreset;
    use image::{GrayImage, Luma, Rgb, RgbImage};
    use std::sync::Mutex;

    fn gray(dir: &Path, name: &str, v: u8) -> PathBuf {
        let path = dir.join(name);
        GrayImage::from_pixel(8, 8, Luma([v])).save(&path).unwrap();
        path
    }

    fn rgb(dir: &Path, name: &str, v: [u8; 3]) -> PathBuf {
        let path = dir.join(name);
        RgbImage::from_pixel(8, 8, Rgb(v)).save(&path).unwrap();
        path
    }

    fn names(paths: &[PathBuf]) -> Vec<String> {
        paths
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn collect_files_filters_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        gray(dir.path(), "b_Roughness.png", 1);
        gray(dir.path(), "a_Metallic.png", 1);
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();
        let files = MapFactory::collect_files(dir.path()).unwrap();
        assert_eq!(names(&files), vec!["a_Metallic.png", "b_Roughness.png"]);
    }

    #[test]
    fn separate_workflow_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let diffuse = rgb(dir.path(), "Wood_Diffuse.png", [120, 80, 40]);
        gray(dir.path(), "Wood_Smoothness.png", 200);
        rgb(dir.path(), "Wood_Normal_DX.png", [128, 100, 255]);
        let emissive = rgb(dir.path(), "Wood_Emissive.png", [255, 0, 0]);
        let cube = rgb(dir.path(), "Wood_specular_cube.png", [9, 9, 9]);
        let files = MapFactory::collect_files(dir.path()).unwrap();
        assert!(files.contains(&cube));

        let outputs = MapFactory::prepare_maps(&files, &WorkflowConfig::default(), None, None);
        assert_eq!(
            outputs,
            vec![
                diffuse,
                dir.path().join("Wood_Roughness.png"),
                dir.path().join("Wood_Normal_OpenGL.png"),
                emissive,
            ]
        );
        let rough = image::open(&outputs[1]).unwrap().to_luma8();
        assert_eq!(rough.get_pixel(0, 0).0[0], 55);
    }

    #[test]
    fn orm_workflow_removes_intermediates() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let files = vec![
            gray(dir.path(), "Mat_AO.png", 210),
            gray(dir.path(), "Mat_Roughness.png", 90),
            rgb(dir.path(), "Mat_Specular.png", [128, 128, 128]),
        ];
        let config = WorkflowPreset::Gltf.config();
        let outputs = MapFactory::prepare_maps(&files, &config, Some(&out), None);

        assert_eq!(outputs, vec![out.join("Mat_ORM.png")]);
        let orm = image::open(&outputs[0]).unwrap().to_rgb8();
        assert_eq!(orm.get_pixel(0, 0).0, [210, 90, 255]);
        assert!(!out.join("Mat_Metallic.png").exists());
    }

    #[test]
    fn sets_keep_order_with_workers() {
        let dir = tempfile::tempdir().unwrap();
        let files = vec![
            gray(dir.path(), "Wood_Roughness.png", 10),
            gray(dir.path(), "Brick_Roughness.png", 20),
            gray(dir.path(), "Wood_Metallic.png", 0),
            gray(dir.path(), "Stone_Smoothness.png", 30),
        ];
        let config = WorkflowConfig {
            max_workers: 3,
            ..WorkflowConfig::default()
        };
        let reports = MapFactory::prepare_sets(&files, &config, None, None);
        let bases: Vec<&str> = reports.iter().map(|r| r.base_name.as_str()).collect();
        assert_eq!(bases, vec!["Wood", "Brick", "Stone"]);
        assert_eq!(reports[0].outputs.len(), 2);
        assert_eq!(names(&reports[2].outputs), vec!["Stone_Roughness.png"]);
    }

    #[test]
    fn single_set_when_grouping_is_off() {
        let dir = tempfile::tempdir().unwrap();
        let files = vec![
            gray(dir.path(), "Wood_Roughness.png", 10),
            gray(dir.path(), "Other_Metallic.png", 0),
        ];
        let config = WorkflowConfig {
            group_by_set: false,
            rename: true,
            ..WorkflowConfig::default()
        };
        let out = dir.path().join("out");
        let reports = MapFactory::prepare_sets(&files, &config, Some(&out), None);
        assert_eq!(reports.len(), 1);
        assert_eq!(
            reports[0].outputs,
            vec![out.join("Wood_Metallic.png"), out.join("Wood_Roughness.png")]
        );
    }

    #[test]
    fn dry_run_reports_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let files = vec![gray(dir.path(), "Mat_Smoothness.png", 200)];
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: ProgressCallback = Arc::new(move |m: &str| sink.lock().unwrap().push(m.to_string()));
        let config = WorkflowConfig {
            dry_run: true,
            ..WorkflowConfig::default()
        };

        let outputs = MapFactory::prepare_maps(&files, &config, Some(&out), Some(callback));
        assert_eq!(outputs, vec![out.join("Mat_Roughness.png")]);
        assert!(!out.exists());
        let messages = seen.lock().unwrap();
        assert!(messages.iter().any(|m| m.starts_with("Would save Roughness")));
    }

    #[test]
    fn specgloss_prepass_feeds_packed_output() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let files = vec![
            rgb(dir.path(), "Mat_Diffuse.png", [100, 150, 200]),
            rgb(dir.path(), "Mat_Specular.png", [200, 100, 50]),
            gray(dir.path(), "Mat_Glossiness.png", 0),
        ];
        let config = WorkflowPreset::SpecularGlossiness.config();
        let outputs = MapFactory::prepare_maps(&files, &config, Some(&out), None);
        assert_eq!(
            names(&outputs),
            vec!["Mat_Base_Color.png", "Mat_Metallic_Smoothness.png"]
        );
        let packed = image::open(&outputs[1]).unwrap().to_rgba8();
        assert_eq!(packed.get_pixel(0, 0).0, [255, 255, 255, 0]);
    }

    #[test]
    fn unreadable_sources_count_as_missing() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let broken_rough = dir.path().join("Mat_Roughness.png");
        std::fs::write(&broken_rough, b"not an image").unwrap();
        let broken_height = dir.path().join("Mat_Height.png");
        std::fs::write(&broken_height, b"\x89PNG truncated").unwrap();
        let emissive = rgb(dir.path(), "Mat_Emissive.png", [0, 255, 0]);
        let files = vec![
            gray(dir.path(), "Mat_AO.png", 200),
            gray(dir.path(), "Mat_Metallic.png", 10),
            broken_rough.clone(),
            broken_height.clone(),
            emissive.clone(),
        ];
        let config = WorkflowConfig {
            orm_map: true,
            ..WorkflowConfig::default()
        };

        let reports = MapFactory::prepare_sets(&files, &config, Some(&out), None);
        assert!(reports[0].error.is_none());
        assert_eq!(reports[0].outputs, vec![out.join("Mat_ORM.png"), emissive]);
        assert!(!reports[0].outputs.contains(&broken_rough));
        assert!(!reports[0].outputs.contains(&broken_height));
        assert!(reports[0]
            .messages
            .iter()
            .any(|m| m.starts_with("Ignoring unreadable Roughness")));

        let orm = image::open(out.join("Mat_ORM.png")).unwrap().to_rgb8();
        assert_eq!(orm.get_pixel(0, 0).0, [200, 128, 10]);
    }

    #[test]
    fn metallic_alone_never_invents_roughness() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let metal = gray(dir.path(), "Mat_Metallic.png", 10);
        let files = vec![gray(dir.path(), "Mat_AO.png", 200), metal.clone()];

        let orm = WorkflowConfig {
            orm_map: true,
            ..WorkflowConfig::default()
        };
        let reports = MapFactory::prepare_sets(&files, &orm, Some(&out), None);
        assert_eq!(reports[0].outputs, vec![out.join("Mat_ORM.png")]);
        assert!(!reports[0].messages.iter().any(|m| m.contains("input fallback")));
        let packed = image::open(&reports[0].outputs[0]).unwrap().to_rgb8();
        assert_eq!(packed.get_pixel(0, 0).0, [200, 128, 10]);

        let metallic_smoothness = WorkflowConfig {
            metallic_smoothness: true,
            ..WorkflowConfig::default()
        };
        let outputs = MapFactory::prepare_maps(&[metal.clone()], &metallic_smoothness, Some(&out), None);
        assert_eq!(outputs, vec![metal]);
        assert!(!out.join("Mat_Metallic_Smoothness.png").exists());
    }

    #[test]
    fn diffuse_passes_through_without_input_fallbacks() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let files = vec![rgb(dir.path(), "Mat_Diffuse.png", [90, 60, 30])];

        let config = WorkflowConfig {
            rename: true,
            ..WorkflowConfig::default()
        };
        let outputs = MapFactory::prepare_maps(&files, &config, Some(&out), None);
        assert_eq!(outputs, vec![out.join("Mat_Base_Color.png")]);

        let strict = WorkflowConfig {
            use_input_fallbacks: false,
            ..config
        };
        let outputs = MapFactory::prepare_maps(&files, &strict, Some(&out), None);
        assert_eq!(outputs, vec![out.join("Mat_Diffuse.png")]);
        let copied = image::open(&outputs[0]).unwrap().to_rgb8();
        assert_eq!(copied.get_pixel(0, 0).0, [90, 60, 30]);
    }

    #[test]
    fn uncreatable_output_folder_fails_the_set() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "file, not a folder").unwrap();
        let files = vec![gray(dir.path(), "Mat_Roughness.png", 40)];

        let reports = MapFactory::prepare_sets(&files, &WorkflowConfig::default(), Some(&blocker.join("out")), None);
        let error = reports[0].error.as_deref().unwrap();
        assert!(error.starts_with("Cannot create output folder"));
        assert!(reports[0].outputs.is_empty());
    }

    #[test]
    fn unrecognised_files_produce_no_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let files = vec![rgb(dir.path(), "photo.png", [1, 2, 3])];
        let reports = MapFactory::prepare_sets(&files, &WorkflowConfig::default(), None, None);
        assert_eq!(reports.len(), 1);
        assert!(reports[0].outputs.is_empty());
        assert!(MapFactory::prepare_maps(&[], &WorkflowConfig::default(), None, None).is_empty());
    }
}
