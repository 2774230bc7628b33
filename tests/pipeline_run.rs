//! End-to-End Pipeline Tests
//!
//! Full runs over scratch trees with a fake language model.

use chrono::{TimeZone, Utc};
use image::{Rgb, RgbImage};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use central_kitchen::hashing::verify_manifest_hash;
use central_kitchen::report::{load_report, REPORT_FILE};
use central_kitchen::{
    CentralPipeline, KitchenConfig, LanguageModel, LlmError, PipelineResult, PriceConfig,
    ReportBuilder, SensitiveDictionary, TaskPartitioner, Validator,
};

struct FakeModel {
    reply: Option<String>,
}

impl LanguageModel for FakeModel {
    fn generate(&self, model: &str, _prompt: &str) -> Result<String, LlmError> {
        self.reply
            .clone()
            .ok_or_else(|| LlmError::RetriesExhausted { model: model.to_string(), attempts: 3 })
    }
}

fn replying(text: &str) -> Box<FakeModel> {
    Box::new(FakeModel { reply: Some(text.to_string()) })
}

fn add_style(root: &Path, code: &str, with_desc: bool) -> PathBuf {
    let dir = root.join(code);
    fs::create_dir_all(&dir).unwrap();
    if with_desc {
        fs::write(dir.join("desc.txt"), format!("{} 纯棉面料", code)).unwrap();
    }
    RgbImage::from_pixel(40, 30, Rgb([120, 80, 40])).save(dir.join("main_1.jpg")).unwrap();
    dir
}

fn config(input: &Path, output: &Path) -> KitchenConfig {
    let devices = vec!["device1".to_string(), "device2".to_string(), "device3".to_string()];
    KitchenConfig::new(input, output, PriceConfig::fixed(199.0), devices, "tee")
}

fn run(config: KitchenConfig, model: Box<FakeModel>) -> PipelineResult {
    CentralPipeline::with_model(config, model).unwrap().run().unwrap()
}

fn snapshot(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    fn walk(base: &Path, dir: &Path, out: &mut BTreeMap<PathBuf, Vec<u8>>) {
        for entry in fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                walk(base, &path, out);
            } else {
                out.insert(path.strip_prefix(base).unwrap().to_path_buf(), fs::read(&path).unwrap());
            }
        }
    }
    let mut out = BTreeMap::new();
    walk(root, root, &mut out);
    out
}

#[test]
fn three_styles_across_three_devices() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    for code in ["STYLE_A", "STYLE_B", "STYLE_C"] {
        add_style(input.path(), code, true);
    }

    let result = run(config(input.path(), output.path()), replying("舒适百搭的好衣服"));
    assert_eq!(result.entries.len(), 3);
    assert!(result.failures.is_empty());

    let devices: Vec<_> = result.entries.iter().map(|e| e.device_id.as_str()).collect();
    assert_eq!(devices, vec!["device1", "device2", "device3"]);
    assert!(result.entries.iter().all(|e| e.price == 199.0));

    for (i, code) in ["STYLE_A", "STYLE_B", "STYLE_C"].iter().enumerate() {
        let batch = output.path().join(format!("Output_Batch_Phone_{}", i + 1));
        assert!(batch.join(code).join("text/title.txt").is_file());
        assert!(batch.join(code).join("images/main_1.jpg").is_file());
        assert!(batch.join("batch_manifest.json").is_file());
    }

    let report_path = ReportBuilder::new().write(&result, &output.path().join("reports")).unwrap();
    let report = load_report(&report_path).unwrap();
    assert_eq!(report["summary"]["total"], 3);
    assert_eq!(report["summary"]["success"], 3);
    assert_eq!(report["summary"]["per_device"]["device2"], 1);
    assert_eq!(report["entries"][0]["device_id"], "device1");
    assert_eq!(report["run_id"], result.run_id.to_string());
}

#[test]
fn style_without_description_is_not_a_failure() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    add_style(input.path(), "STYLE_A", true);
    add_style(input.path(), "STYLE_B", false);

    let result = run(config(input.path(), output.path()), replying("正文"));
    let codes: Vec<_> = result.entries.iter().map(|e| e.style_code.as_str()).collect();
    assert_eq!(codes, vec!["STYLE_A"]);
    assert!(result.failures.is_empty());
    assert!(!output.path().join("staging/STYLE_B").exists());
}

#[test]
fn failing_style_is_recorded_and_run_continues() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    add_style(input.path(), "STYLE_A", true);
    let broken = add_style(input.path(), "STYLE_B", true);
    fs::write(broken.join("zz_broken.jpg"), b"not an image").unwrap();
    add_style(input.path(), "STYLE_C", true);

    let result = run(config(input.path(), output.path()), replying("正文"));
    let codes: Vec<_> = result.entries.iter().map(|e| e.style_code.as_str()).collect();
    assert_eq!(codes, vec!["STYLE_A", "STYLE_C"]);
    assert_eq!(result.failures.len(), 1);
    assert!(result.failures[0].starts_with("STYLE_B: "));

    let report = ReportBuilder::new().build(&result).unwrap();
    assert_eq!(report.summary.total, 3);
    assert_eq!(report.summary.success, 2);
    assert_eq!(report.summary.failures, result.failures);
}

#[test]
fn unreachable_model_falls_back_to_context_copy() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    add_style(input.path(), "STYLE_A", true);

    let result = run(config(input.path(), output.path()), Box::new(FakeModel { reply: None }));
    let entry = &result.entries[0];
    assert_eq!(entry.description_files.len(), 3);
    for file in &entry.description_files {
        let body = fs::read_to_string(file).unwrap();
        assert!(body.starts_with("STYLE_A 上新"));
    }
}

#[test]
fn sensitive_hits_reach_batches_and_report() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    add_style(input.path(), "STYLE_A", true);
    add_style(input.path(), "STYLE_B", true);

    let mut cfg = config(input.path(), output.path());
    cfg.sensitive_dictionary = SensitiveDictionary {
        sensitive_words: vec!["违禁".to_string()],
        brand_alias_mapping: vec![],
    };
    let result = run(cfg, replying("这件衣服没有违禁成分"));

    let body = fs::read_to_string(&result.entries[0].description_files[0]).unwrap();
    assert!(!body.contains("违禁"));

    let batch: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(output.path().join("Output_Batch_Phone_1/batch_manifest.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(batch["entries"][0]["flags"]["needs_manual_review"], true);
    assert_eq!(batch["entries"][0]["flags"]["sensitive_hits"][0], "违禁");

    let report = ReportBuilder::new().build(&result).unwrap();
    assert_eq!(report.summary.sensitive_hits["违禁"], vec!["STYLE_A", "STYLE_B"]);
}

#[test]
fn canned_response_replaces_model() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    add_style(input.path(), "STYLE_A", true);

    let mut cfg = config(input.path(), output.path());
    cfg.canned_response = Some("{style_code} 第{variation}版".to_string());
    let result = run(cfg, Box::new(FakeModel { reply: None }));

    let bodies: Vec<_> = result.entries[0]
        .description_files
        .iter()
        .map(|f| fs::read_to_string(f).unwrap())
        .collect();
    assert_eq!(bodies, vec!["STYLE_A 第0版", "STYLE_A 第1版", "STYLE_A 第2版"]);
}

#[test]
fn operator_templates_override_bundled_copy() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    let templates = TempDir::new().unwrap();
    add_style(input.path(), "STYLE_A", true);
    fs::write(templates.path().join("tee.yaml"), "title: 店主推荐 {style_code}\nbody: \"{desc}\"\n").unwrap();
    fs::write(templates.path().join("jacket.yaml"), "title: 夹克 {style_code}\n").unwrap();

    let mut cfg = config(input.path(), output.path());
    cfg.templates_dir = Some(templates.path().to_path_buf());
    let result = run(cfg, replying("正文"));
    let title = fs::read_to_string(output.path().join("staging/STYLE_A/text/title.txt")).unwrap();
    assert_eq!(title, "店主推荐 STYLE_A");

    let mut cfg = config(input.path(), output.path());
    cfg.templates_dir = Some(templates.path().to_path_buf());
    cfg.template.category = "jacket".to_string();
    let result_jacket = run(cfg, replying("正文"));
    assert!(result_jacket.failures.is_empty());
    let title = fs::read_to_string(output.path().join("staging/STYLE_A/text/title.txt")).unwrap();
    assert_eq!(title, "夹克 STYLE_A");
    assert_eq!(result.entries.len(), 1);
}

#[test]
fn re_export_is_idempotent() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    for code in ["STYLE_A", "STYLE_B", "STYLE_C", "STYLE_D"] {
        add_style(input.path(), code, true);
    }
    let cfg = config(input.path(), output.path());
    let partitioner = TaskPartitioner::from_config(&cfg);
    let result = run(cfg, replying("正文"));

    let batches = partitioner.partition(&result.entries).unwrap();
    let sizes: Vec<_> = batches.iter().map(|b| b.entries.len()).collect();
    assert_eq!(sizes, vec![2, 1, 1]);

    let at = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
    let batch_dir = output.path().join("Output_Batch_Phone_1");
    partitioner.export_at(&batches, at).unwrap();
    let first = snapshot(&batch_dir);
    partitioner.export_at(&batches, at).unwrap();
    let second = snapshot(&batch_dir);

    assert_eq!(first, second);
    assert!(first.contains_key(Path::new("batch_manifest.json")));
    assert!(first.contains_key(Path::new("STYLE_D/manifest.json")));
}

#[test]
fn exported_output_validates() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    for code in ["STYLE_A", "STYLE_B"] {
        add_style(input.path(), code, true);
    }
    let result = run(config(input.path(), output.path()), replying("正文"));
    let report_path = ReportBuilder::new().write(&result, &output.path().join("reports")).unwrap();
    assert!(report_path.ends_with(Path::new("reports").join(REPORT_FILE)));

    let validation = Validator::new().validate_output(output.path(), "reports").unwrap();
    assert!(validation.valid, "{:?}", validation.violations);
    assert!(validation.violations.is_empty());
    assert_eq!(validation.checked.len(), 4);

    let batch: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(output.path().join("Output_Batch_Phone_3/batch_manifest.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(batch["count"], 0);
    assert_eq!(verify_manifest_hash(&batch), Some(true));
}
