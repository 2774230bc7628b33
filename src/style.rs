//! Style Processor - One Style From Raw Folder To Manifest
//!
//! Layout written under `<output_root>/staging/<style_code>/`:
//!
//! ```text
//! text/title.txt
//! text/description_1.txt ... description_N.txt
//! images/<source file names>
//! manifest.json
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::KitchenConfig;
use crate::copywriting::{CopyGenerator, GenerationContext};
use crate::manifest::{ManifestEntry, ManifestError, StyleManifest, IMAGE_DIR, TEXT_DIR};
use crate::media::MediaGroups;
use crate::scanner::RawStyle;
use crate::templates::TemplateError;
use crate::watermark::{WatermarkError, WatermarkProcessor};

pub const STAGING_DIR: &str = "staging";
pub const TITLE_FILE: &str = "title.txt";

#[derive(Debug, Error)]
pub enum StyleError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error(transparent)]
    Watermark(#[from] WatermarkError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StyleError {
    let path = path.to_path_buf();
    move |source| StyleError::Io { path, source }
}

pub struct StyleProcessor {
    config: Arc<KitchenConfig>,
    generator: CopyGenerator,
    watermark: WatermarkProcessor,
}

impl StyleProcessor {
    pub fn new(
        config: Arc<KitchenConfig>,
        generator: CopyGenerator,
        watermark: WatermarkProcessor,
    ) -> Self {
        Self { config, generator, watermark }
    }

    pub fn staging_root(&self) -> PathBuf {
        self.config.output_root.join(STAGING_DIR)
    }

    /// Any failing step aborts this style only; the caller records it.
    pub fn process(&self, style: RawStyle) -> Result<ManifestEntry, StyleError> {
        let output_dir = self.staging_root().join(&style.style_code);
        if output_dir.exists() {
            fs::remove_dir_all(&output_dir).map_err(io_error(&output_dir))?;
        }
        let text_dir = output_dir.join(TEXT_DIR);
        let image_dir = output_dir.join(IMAGE_DIR);
        fs::create_dir_all(&text_dir).map_err(io_error(&text_dir))?;
        fs::create_dir_all(&image_dir).map_err(io_error(&image_dir))?;

        let context = self.build_context(&style)?;
        let copy = self
            .generator
            .generate(&self.config.template, &self.config.model, &context)?;

        let title_file = text_dir.join(TITLE_FILE);
        fs::write(&title_file, &copy.title).map_err(io_error(&title_file))?;
        let mut description_files = Vec::with_capacity(copy.bodies.len());
        for (i, body) in copy.bodies.iter().enumerate() {
            let path = text_dir.join(format!("description_{}.txt", i + 1));
            fs::write(&path, body).map_err(io_error(&path))?;
            description_files.push(path);
        }

        let mut media = MediaGroups::default();
        for source in &style.images {
            let Some(name) = source.file_name() else { continue };
            let target = image_dir.join(name);
            self.watermark.apply_to(source, &target)?;
            media.push(target);
        }
        let media = media.sorted();

        let meta = style.meta.as_ref();
        let price = meta
            .and_then(|m| m.price_override)
            .unwrap_or_else(|| self.config.price.derive_price(None));
        let stock_per_variant = meta.and_then(|m| m.stock_per_variant);
        let macro_delay_range = meta
            .and_then(|m| m.macro_delay_override)
            .unwrap_or(self.config.delays.macro_delay_min);

        let entry = ManifestEntry {
            style_code: style.style_code.clone(),
            device_id: String::new(),
            output_dir: output_dir.clone(),
            title_file,
            description_files,
            primary_images: media.primary,
            variant_images: media.variants,
            unclassified_images: media.unclassified,
            price,
            stock_per_variant,
            macro_delay_range,
        };

        if !entry.unclassified_images.is_empty() {
            debug!(
                style = %entry.style_code,
                count = entry.unclassified_images.len(),
                "Images without a colour name"
            );
        }

        StyleManifest::new(&entry, context, copy.sensitive_hits.clone()).write(&output_dir)?;
        info!(
            style = %entry.style_code,
            price = entry.price,
            bodies = entry.description_files.len(),
            images = style.images.len(),
            hits = copy.sensitive_hits.len(),
            "Style processed"
        );
        Ok(entry)
    }

    fn build_context(&self, style: &RawStyle) -> Result<GenerationContext, StyleError> {
        let defaults = &self.config.context_defaults;
        let desc = fs::read_to_string(&style.desc_file).map_err(io_error(&style.desc_file))?;
        let joined_or = |values: Option<&Vec<String>>, fallback: &str| match values {
            Some(values) if !values.is_empty() => values.join(", "),
            _ => fallback.to_string(),
        };
        let meta = style.meta.as_ref();

        Ok(GenerationContext::from([
            ("style_code".to_string(), style.style_code.clone()),
            ("desc".to_string(), desc.trim().to_string()),
            ("colors".to_string(), joined_or(meta.map(|m| &m.colors), &defaults.colors)),
            ("sizes".to_string(), joined_or(meta.map(|m| &m.sizes), &defaults.sizes)),
            ("year".to_string(), defaults.year.clone()),
            ("fabric".to_string(), defaults.fabric.clone()),
            ("fit".to_string(), defaults.fit.clone()),
            ("highlights".to_string(), defaults.highlights.clone()),
            // Alias kept for templates written against the longer name.
            ("style".to_string(), style.style_code.clone()),
        ]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PriceConfig, SensitiveDictionary, StyleMeta, WatermarkConfig};
    use crate::llm::MockLanguageModel;
    use crate::templates::TemplateRepository;
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    fn write_style(root: &Path, code: &str, images: &[&str]) -> RawStyle {
        let dir = root.join(code);
        fs::create_dir_all(&dir).unwrap();
        let desc_file = dir.join("desc.txt");
        fs::write(&desc_file, "  纯棉 AMIRI 短袖  \n").unwrap();
        let mut paths = vec![];
        for name in images {
            let path = dir.join(name);
            RgbImage::from_pixel(64, 48, Rgb([30, 60, 90])).save(&path).unwrap();
            paths.push(path);
        }
        RawStyle { style_code: code.to_string(), base_dir: dir, desc_file, images: paths, meta: None }
    }

    fn processor(output: &Path, replies: usize) -> StyleProcessor {
        let mut config =
            KitchenConfig::new(output, output, PriceConfig::fixed(199.0), vec!["d1".into()], "tee");
        config.template.variations = 2;
        config.sensitive_dictionary = SensitiveDictionary {
            sensitive_words: vec![],
            brand_alias_mapping: vec![("AMIRI".to_string(), "克罗".to_string())],
        };
        let mut model = MockLanguageModel::new();
        model.expect_generate().times(replies).returning(|_, _| Ok("AMIRI 好看".to_string()));
        let generator = CopyGenerator::new(
            TemplateRepository::bundled().unwrap(),
            Box::new(model),
            config.sensitive_dictionary.clone(),
        );
        let watermark = WatermarkProcessor::with_builtin_glyphs(WatermarkConfig::default());
        StyleProcessor::new(Arc::new(config), generator, watermark)
    }

    #[test]
    fn test_process_writes_artifacts() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        let style = write_style(input.path(), "S1", &["main.jpg", "color_red_1.jpg", "color_.jpg"]);

        let entry = processor(output.path(), 2).process(style).unwrap();
        assert_eq!(entry.device_id, "");
        assert_eq!(entry.output_dir, output.path().join("staging/S1"));
        assert!(entry.title_file.is_file());
        assert_eq!(entry.description_files.len(), 2);
        assert!(entry.description_files[1].ends_with("text/description_2.txt"));
        assert_eq!(
            fs::read_to_string(&entry.description_files[0]).unwrap(),
            "克罗 好看"
        );
        assert_eq!(entry.primary_images.len(), 1);
        assert_eq!(entry.variant_images["red"].len(), 1);
        assert_eq!(entry.unclassified_images.len(), 1);
        assert!(entry.primary_images[0].is_file());
        assert_eq!(entry.price, 199.0);
        assert_eq!(entry.macro_delay_range, (10, 45));

        let manifest = StyleManifest::read(&entry.output_dir).unwrap();
        assert_eq!(manifest.sensitive_hits, vec!["AMIRI"]);
        assert_eq!(manifest.context["desc"], "纯棉 AMIRI 短袖");
        assert_eq!(manifest.context["colors"], "黑色 白色");
        assert_eq!(manifest.media.unclassified, vec!["color_.jpg"]);
    }

    #[test]
    fn test_meta_overrides() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        let mut style = write_style(input.path(), "S2", &[]);
        style.meta = Some(StyleMeta {
            price_override: Some(88.5),
            colors: vec!["红".into(), "蓝".into()],
            stock_per_variant: Some(7),
            macro_delay_override: Some((5, 6)),
            ..StyleMeta::new("S2")
        });

        let entry = processor(output.path(), 2).process(style).unwrap();
        assert_eq!(entry.price, 88.5);
        assert_eq!(entry.stock_per_variant, Some(7));
        assert_eq!(entry.macro_delay_range, (5, 6));
        let manifest = StyleManifest::read(&entry.output_dir).unwrap();
        assert_eq!(manifest.context["colors"], "红, 蓝");
        assert_eq!(manifest.context["sizes"], "S M L XL XXL");
    }

    #[test]
    fn test_meta_without_delay_uses_config_default() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        let mut style = write_style(input.path(), "S3", &[]);
        style.meta = Some(StyleMeta::new("S3"));
        let entry = processor(output.path(), 2).process(style).unwrap();
        assert_eq!(entry.macro_delay_range, (10, 45));
        assert_eq!(entry.stock_per_variant, None);
    }

    #[test]
    fn test_corrupt_image_fails_style() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        let mut style = write_style(input.path(), "S4", &[]);
        let bad = style.base_dir.join("broken.jpg");
        fs::write(&bad, b"not a jpeg").unwrap();
        style.images.push(bad);

        let err = processor(output.path(), 2).process(style).unwrap_err();
        assert!(matches!(err, StyleError::Watermark(_)));
    }
}
