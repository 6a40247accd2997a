//! The shipped configuration file.

use rust_cal::config::CalConfig;
use rust_cal::dispatch::DispatchMode;
use serial_test::serial;

#[test]
#[serial]
fn shipped_config_loads_and_validates() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/cal.toml");
    let config = CalConfig::load_from(path).unwrap();
    config.validate().unwrap();

    let defaults = CalConfig::default();
    assert_eq!(config.module, defaults.module);
    assert_eq!(config.dispatch.mode, DispatchMode::Sequential);
    assert!(!config.dispatch.persist_inputs);
    assert_eq!(config.storage.blob_dir, defaults.storage.blob_dir);
}

#[test]
#[serial]
fn dispatch_mode_can_be_overridden_from_environment() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cal.toml");
    std::fs::write(&path, "[dispatch]\nmode = \"sequential\"\nworkers = 2\n").unwrap();

    std::env::set_var("RUST_CAL_DISPATCH__MODE", "pooled");
    let loaded = CalConfig::load_from(&path);
    std::env::remove_var("RUST_CAL_DISPATCH__MODE");

    let config = loaded.unwrap();
    assert_eq!(config.dispatch.mode, DispatchMode::Pooled);
    assert_eq!(config.dispatch.effective_workers(), 2);
}
