use super::*;
use tempfile::TempDir;

fn setup_manager() -> (ConfigManager, TempDir) {
    let dir = TempDir::new().unwrap();
    let manager = ConfigManager::with_file(&dir.path().join("config.toml")).unwrap();
    (manager, dir)
}

#[test]
fn test_init_creates_config_once() {
    let (manager, _dir) = setup_manager();
    init(&manager).unwrap();
    assert!(manager.config_path().exists());

    let first = manager.load().unwrap();
    assert!(first.device.has_id());

    init(&manager).unwrap();
    assert_eq!(manager.load().unwrap().device.device_id, first.device.device_id);
}

#[test]
fn test_load_config_assigns_device_id() {
    let (manager, _dir) = setup_manager();
    let config = load_config(&manager).unwrap();
    assert!(config.device.has_id());
    // the id is persisted for the next run
    assert_eq!(manager.load().unwrap().device.device_id, config.device.device_id);
}

#[test]
fn test_load_config_rejects_invalid() {
    let (manager, _dir) = setup_manager();
    manager
        .update(|config| {
            config.cloud.enabled = true;
            config.cloud.provider = CloudProvider::Dropbox;
            config.cloud.access_token.clear();
        })
        .unwrap();
    assert!(load_config(&manager).is_err());
}

#[test]
fn test_redact_masks_only_set_secrets() {
    let mut config = Config::default();
    config.cloud.access_token = "sl.secret".to_string();
    config.broker.password = "hunter2".to_string();

    let redacted = redact(&config);
    assert_eq!(redacted.cloud.access_token, MASK);
    assert_eq!(redacted.broker.password, MASK);
    assert!(redacted.host.password.is_empty());
    assert_eq!(config.cloud.access_token, "sl.secret");
}

#[test]
fn test_rendered_config_parses_back() {
    let mut config = Config::default();
    config.broker.host = "mqtt.example.com".to_string();
    config.broker.password = "hunter2".to_string();

    let rendered = render_config(&config).unwrap();
    assert!(!rendered.contains("hunter2"));

    let parsed: Config = toml::from_str(&rendered).unwrap();
    assert_eq!(parsed.broker.host, "mqtt.example.com");
    assert_eq!(parsed.broker.password, MASK);
}

#[test]
fn test_reset_keeps_device_id() {
    let (manager, _dir) = setup_manager();
    init(&manager).unwrap();
    let id = manager.load().unwrap().device.device_id;
    manager.update(|config| config.sync.userdata = true).unwrap();

    reset_config(&manager).unwrap();
    let config = manager.load().unwrap();
    assert_eq!(config.device.device_id, id);
    assert!(!config.sync.userdata);
}
