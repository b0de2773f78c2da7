// tests/config.rs

use std::{io::Write, time::Duration};
use tempfile::NamedTempFile;

use udefx::config::{self, Config, ConfigError, EmulatorConfig, PipelineConfig};
use udefx::pipeline::SuspendPolicy;

#[test]
fn empty_file_yields_defaults() {
    let cfg = config::parse("").unwrap();
    assert!(!cfg.logging.enable);
    assert_eq!(cfg.logging.level, "INFO");
    assert_eq!(cfg.pipeline, PipelineConfig::default());
    assert_eq!(cfg.pipeline.max_transfer_size, 64 * 1024);
    assert_eq!(cfg.pipeline.mission_timeout, None);
    assert_eq!(cfg.pipeline.cancel_grace, Duration::from_secs(2));
    assert_eq!(cfg.pipeline.suspend_policy, SuspendPolicy::Drain);
    assert!(!cfg.capabilities.interface_property_data);
    assert_eq!(cfg.metrics.listen, None);
    assert_eq!(cfg.emulator, EmulatorConfig::default());
}

#[test]
fn full_document_parses() {
    let cfg = config::parse(
        r#"
        [logging]
        enable = true
        file   = "host.log"
        level  = "debug"

        [pipeline]
        max_transfer_size     = 512
        mission_timeout       = "30s"
        cancel_grace          = "250ms"
        suspend_policy        = "Cancel"
        suspend_drain_timeout = "1m"

        [capabilities]
        interface_property_data = true

        [metrics]
        listen = "127.0.0.1:9187"

        [emulator]
        response_delay = "5ms"
        pending_pulses = 3
        "#,
    )
    .unwrap();

    assert_eq!(cfg.logging.file.as_deref(), Some("host.log"));
    assert_eq!(cfg.logging.level_filter().unwrap(), log::LevelFilter::Debug);
    assert_eq!(
        cfg.pipeline,
        PipelineConfig {
            max_transfer_size: 512,
            mission_timeout: Some(Duration::from_secs(30)),
            cancel_grace: Duration::from_millis(250),
            suspend_policy: SuspendPolicy::Cancel,
            suspend_drain_timeout: Duration::from_secs(60),
        }
    );
    assert!(cfg.capabilities.interface_property_data);
    assert_eq!(cfg.metrics.listen, Some("127.0.0.1:9187".parse().unwrap()));
    assert_eq!(cfg.emulator, EmulatorConfig { response_delay: Duration::from_millis(5), pending_pulses: 3 });
}

#[test]
fn invalid_values_are_reported() {
    let err = config::parse("[pipeline]\ncancel_grace = \"soon\"").unwrap_err();
    assert!(matches!(err, ConfigError::InvalidDuration(ref s, _) if s == "soon"), "{err}");

    let err = config::parse("[pipeline]\nsuspend_policy = \"hibernate\"").unwrap_err();
    assert!(matches!(err, ConfigError::InvalidSuspendPolicy(ref s) if s == "hibernate"), "{err}");

    let err = config::parse("[logging]\nlevel = \"loud\"").unwrap_err();
    assert!(matches!(err, ConfigError::InvalidLevel(_)), "{err}");

    let err = config::parse("[metrics]\nlisten = \"localhost\"").unwrap_err();
    assert!(matches!(err, ConfigError::InvalidListen(..)), "{err}");

    let err = config::parse("[pipeline]\nmax_transfer_size = 0").unwrap_err();
    assert!(matches!(err, ConfigError::InvalidTransferSize { got: 0, .. }), "{err}");

    let err = config::parse("[pipeline]\nmax_transfer_size = 70000").unwrap_err();
    assert!(matches!(err, ConfigError::InvalidTransferSize { got: 70000, max: 65536 }), "{err}");

    let err = config::parse("[pipeline\n").unwrap_err();
    assert!(matches!(err, ConfigError::Toml(_)), "{err}");
}

#[test]
fn load_reads_from_disk() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "[pipeline]\nmission_timeout = \"2s\"").unwrap();

    let cfg: Config = config::load(file.path()).unwrap();
    assert_eq!(cfg.pipeline.mission_timeout, Some(Duration::from_secs(2)));

    let missing = file.path().with_extension("absent");
    assert!(matches!(config::load(&missing), Err(ConfigError::Io(_))));
}
