//! ProcessingConfig, BatchOptions and settings-file tests.

use std::fs;

use screenmachine::{
    BatchOptions, CompositionMode, OutputFormat, ProcessingConfig, ResizeFilter,
    ScreenMachineError, Settings, TargetBox,
};

// ── ProcessingConfig ────────────────────────────────────────────────

#[test]
fn builder_round_trips_through_to_builder() {
    let config = ProcessingConfig::builder()
        .with_grid(5, 6)
        .with_max_screenshot_size(480, 270)
        .with_jpg_quality(90)
        .with_show_codec(true)
        .build()
        .unwrap();
    let rebuilt = config.to_builder().build().unwrap();
    assert_eq!(config, rebuilt);
    assert_eq!(rebuilt.total_screenshots(), 30);
    assert_eq!(rebuilt.cell_box(), TargetBox::new(480, 270));
}

#[test]
fn without_labels_clears_header_and_timestamps() {
    let config = ProcessingConfig::builder()
        .with_show_timestamps(true)
        .without_labels()
        .build()
        .unwrap();
    assert!(!config.any_header_label());
    assert!(!config.show_timestamps());
}

#[test]
fn zero_columns_is_config_invalid() {
    let error = ProcessingConfig::builder().with_columns(0).build().unwrap_err();
    assert!(matches!(error, ScreenMachineError::ConfigInvalid(_)));
    assert!(error.to_string().contains("at least 1"));
}

// ── BatchOptions ────────────────────────────────────────────────────

#[test]
fn batch_defaults() {
    let options = BatchOptions::default();
    assert_eq!(options.output_format, OutputFormat::Jpg);
    assert_eq!(options.workers, 2);
    assert!(options.follow_structure);
    assert!(options.suffix.is_empty());
    assert_eq!(options.composition_mode, CompositionMode::ResizeOnce);
    assert_eq!(options.resize_filter, ResizeFilter::Nearest);
}

#[test]
fn resize_filter_names() {
    assert_eq!("Lanczos3".parse::<ResizeFilter>().unwrap(), ResizeFilter::Lanczos3);
    assert_eq!("bilinear".parse::<ResizeFilter>().unwrap(), ResizeFilter::Triangle);
    assert!("cubic".parse::<ResizeFilter>().is_err());
}

#[test]
fn output_format_extensions() {
    assert_eq!(OutputFormat::Jpg.extension(), ".jpg");
    assert_eq!(OutputFormat::Png.extension(), ".png");
    assert_eq!(OutputFormat::Png.to_string(), "PNG");
}

// ── Settings files ──────────────────────────────────────────────────

#[test]
fn settings_file_overrides_only_named_values() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("settings.json");
    fs::write(
        &path,
        r#"{
            "processing": { "rows": 3, "show_timestamps": true },
            "batch": { "workers": 6, "suffix": "_thumb", "composition_mode": "resize_each", "resize_filter": "lanczos3" }
        }"#,
    )
    .unwrap();

    let settings = Settings::load(&path).unwrap();
    assert_eq!(settings.processing.rows(), 3);
    assert_eq!(settings.processing.columns(), 4);
    assert!(settings.processing.show_timestamps());
    assert_eq!(settings.batch.workers, 6);
    assert_eq!(settings.batch.suffix, "_thumb");
    assert_eq!(settings.batch.composition_mode, CompositionMode::ResizeEach);
    assert_eq!(settings.batch.resize_filter, ResizeFilter::Lanczos3);
    assert_eq!(settings.batch.output_format, OutputFormat::Jpg);
}

#[test]
fn settings_file_with_bad_values_fails_to_load() {
    let dir = tempfile::tempdir().unwrap();

    let quality = dir.path().join("quality.json");
    fs::write(&quality, r#"{ "processing": { "jpg_quality": 250 } }"#).unwrap();
    assert!(matches!(
        Settings::load(&quality),
        Err(ScreenMachineError::ConfigInvalid(_))
    ));

    let suffix = dir.path().join("suffix.json");
    fs::write(&suffix, r#"{ "batch": { "suffix": "a/b" } }"#).unwrap();
    assert!(matches!(
        Settings::load(&suffix),
        Err(ScreenMachineError::ConfigInvalid(_))
    ));
}

#[test]
fn missing_settings_file_is_io_error() {
    let result = Settings::load("tests/fixtures/no_such_settings.json");
    assert!(matches!(result, Err(ScreenMachineError::IoError(_))));
}
