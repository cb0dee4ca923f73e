use quadchain::backend::BackendMode;
use quadchain::config::Settings;
use std::env;
use std::fs;
use tempfile::TempDir;

// One test per binary: environment variables are process-wide.
#[test]
fn test_env_overrides_file_values() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("settings.toml");
    fs::write(
        &config_path,
        r#"
[generation]
worker_count = 8
max_retries = 1

[backend]
model = "from-file"
"#,
    )
    .unwrap();

    unsafe {
        // Double underscore separates nested levels
        env::set_var("QC_GENERATION__WORKER_COUNT", "48");
        env::set_var("QC_BACKEND__MODE", "remote");
        env::set_var("QC_BACKEND__API_KEY", "sk-env");
        env::set_var("QC_CHUNKING__CHUNK_SIZE", "900");
    }

    let settings = Settings::load_from(&config_path).unwrap();

    unsafe {
        env::remove_var("QC_GENERATION__WORKER_COUNT");
        env::remove_var("QC_BACKEND__MODE");
        env::remove_var("QC_BACKEND__API_KEY");
        env::remove_var("QC_CHUNKING__CHUNK_SIZE");
    }

    // Environment wins over the file
    assert_eq!(settings.generation.worker_count, 48);
    assert_eq!(settings.backend.mode, BackendMode::Remote);
    assert_eq!(settings.backend.api_key.as_deref(), Some("sk-env"));
    assert_eq!(settings.chunking.chunk_size, 900);
    // File values not named by the environment survive
    assert_eq!(settings.generation.max_retries, 1);
    assert_eq!(settings.backend.model, "from-file");
    // And defaults fill the rest
    assert_eq!(settings.chunking.overlap, 150);
    assert!(settings.validate().is_ok());
}
