//! Integration tests for ConfigManager and configuration file handling
//!
//! These tests verify:
//! - Imaging config loading with defaults for missing files and keys
//! - Target descriptions as written by the upstream pipeline
//! - Target selection order
//! - Result files written next to the products
//! - Invalid YAML handling

use camino::Utf8PathBuf;
use cleanctl::config::save_yaml;
use cleanctl::models::{
    CleaningMode, ErrorResult, ImagingConfig, Intent, MaskingMode, SpecMode, TargetList,
};
use cleanctl::ConfigManager;
use std::fs;
use tempfile::TempDir;

const TARGETS_YAML: &str = r#"
targets:
  bandpass:
    vis: [uid___A002_X1.ms]
    field: J1924-2914
    intent: BANDPASS
    spw: "17"
    specmode: mfs
    masking: auto
    estimated_sensitivity: 0.0004
  science_cube:
    vis: [uid___A002_X1.ms, uid___A002_X2.ms]
    field: NGC_253
    intent: TARGET
    spw: "19"
    specmode: cube
    imagename: ngc253.spw19.cube.I
    masking: psfiter2
    cleaning: manual
    threshold: 2.0mJy
    nbin: 2
    maxncleans: 4
    frequency_intersection:
      f_low_hz: 230.0e9
      f_high_hz: 231.0e9
      channel_width_hz: 0.5e6
    spwsel_lsrk:
      spw19: "230.1~230.3GHz;230.6~230.7GHz LSRK"
"#;

fn create_test_config_dir() -> (TempDir, Utf8PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let config_path = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
    (temp_dir, config_path)
}

#[test]
fn test_create_config_manager() {
    let (_temp_dir, config_path) = create_test_config_dir();
    let manager = ConfigManager::new(&config_path).unwrap();

    assert_eq!(manager.config_dir(), config_path.as_path());
}

#[test]
fn test_partial_imaging_config() {
    let (_temp_dir, config_path) = create_test_config_dir();
    fs::write(
        config_path.join("imaging.yaml"),
        "imaging_mode: VLASS-SE-CONT\nheuristics:\n  antenna_diameter_m: 7.0\nlogging:\n  json: true\n",
    )
    .unwrap();

    let config = ConfigManager::new(&config_path)
        .unwrap()
        .load_imaging_config()
        .unwrap();

    assert_eq!(config.imaging_mode, "VLASS-SE-CONT");
    assert_eq!(config.heuristics.antenna_diameter_m, 7.0);
    assert_eq!(config.heuristics.pblimit_image, 0.2);
    assert!(config.logging.json);
    assert_eq!(config.logging.prefix, "cleanctl");
    assert_eq!(config.engine.program, "casa");
}

#[test]
fn test_save_and_load_imaging_config() {
    let (_temp_dir, config_path) = create_test_config_dir();
    let manager = ConfigManager::new(&config_path).unwrap();

    let mut config = ImagingConfig::default();
    config.working_dir = "/data/imaging".to_string();
    config.engine.args = vec!["--pipeline".to_string()];
    config.heuristics.beam_arcsec = Some(0.8);
    manager.save_imaging_config(&config).unwrap();

    let loaded = manager.load_imaging_config().unwrap();
    assert_eq!(loaded.working_dir, "/data/imaging");
    assert_eq!(loaded.engine.args, vec!["--pipeline".to_string()]);
    assert_eq!(loaded.heuristics.beam_arcsec, Some(0.8));
}

#[test]
fn test_load_pipeline_targets() {
    let (_temp_dir, config_path) = create_test_config_dir();
    fs::write(config_path.join("targets.yaml"), TARGETS_YAML).unwrap();

    let targets = ConfigManager::new(&config_path)
        .unwrap()
        .load_targets()
        .unwrap();
    assert_eq!(targets.targets.len(), 2);

    let bandpass = &targets.targets["bandpass"];
    assert_eq!(bandpass.intent, Intent::Bandpass);
    assert_eq!(bandpass.masking, MaskingMode::Auto);
    assert_eq!(bandpass.cleaning, CleaningMode::Rms);
    assert_eq!(bandpass.maxncleans, 10);
    assert_eq!(bandpass.image_name(), "J1924-2914_bandpass.spw17.mfs.I");
    assert_eq!(bandpass.continuum_ranges(), None);

    let cube = &targets.targets["science_cube"];
    assert_eq!(cube.specmode, SpecMode::Cube);
    assert_eq!(cube.masking, MaskingMode::PsfIter2);
    assert_eq!(cube.cleaning, CleaningMode::Manual);
    assert_eq!(cube.threshold.as_deref(), Some("2.0mJy"));
    assert_eq!(cube.nbin, Some(2));
    assert_eq!(cube.vis.len(), 2);
    assert_eq!(cube.image_name(), "ngc253.spw19.cube.I");
    assert_eq!(
        cube.continuum_ranges().as_deref(),
        Some("230.1~230.3GHz;230.6~230.7GHz")
    );
    assert_eq!(
        cube.frequency_intersection.map(|fi| fi.channel_width_hz),
        Some(0.5e6)
    );
}

#[test]
fn test_target_selection() {
    let targets: TargetList = serde_yaml_ng::from_str(TARGETS_YAML).unwrap();

    let all: Vec<&str> = targets.select(&[]).map(|(name, _)| name.as_str()).collect();
    assert_eq!(all, vec!["bandpass", "science_cube"]);

    let wanted = vec!["science_cube".to_string(), "missing".to_string()];
    let some: Vec<&str> = targets.select(&wanted).map(|(name, _)| name.as_str()).collect();
    assert_eq!(some, vec!["science_cube"]);
}

#[test]
fn test_error_result_written_as_yaml() {
    let (_temp_dir, config_path) = create_test_config_dir();
    let targets: TargetList = serde_yaml_ng::from_str(TARGETS_YAML).unwrap();

    let report = ErrorResult {
        context: targets.targets["science_cube"].context(),
        error: "NGC_253/TARGET/spw19 clean error: width and nbin are mutually exclusive"
            .to_string(),
    };
    let path = config_path.join("science_cube.error.yaml");
    save_yaml(&path, &report).unwrap();

    let loaded: ErrorResult = serde_yaml_ng::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(loaded, report);
}

#[test]
fn test_config_directory_creation() {
    let (_temp_dir, base_path) = create_test_config_dir();
    let config_path = base_path.join("nested").join("config");

    assert!(!config_path.exists());
    let _manager = ConfigManager::new(&config_path).unwrap();
    assert!(config_path.exists());
}

#[test]
fn test_invalid_yaml_handling() {
    let (_temp_dir, config_path) = create_test_config_dir();
    let manager = ConfigManager::new(&config_path).unwrap();

    fs::write(config_path.join("targets.yaml"), "targets: {{ not yaml").unwrap();
    assert!(manager.load_targets().is_err(), "Should fail to parse invalid YAML");

    fs::write(config_path.join("imaging.yaml"), "engine: [1, 2").unwrap();
    assert!(manager.load_imaging_config().is_err());
}

#[test]
fn test_unknown_intent_is_rejected() {
    let (_temp_dir, config_path) = create_test_config_dir();
    let manager = ConfigManager::new(&config_path).unwrap();

    fs::write(
        config_path.join("targets.yaml"),
        "targets:\n  t:\n    field: X\n    intent: SCIENCE\n    spw: '1'\n    specmode: mfs\n",
    )
    .unwrap();
    assert!(manager.load_targets().is_err());
}
