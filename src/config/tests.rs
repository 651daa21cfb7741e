use super::*;

#[test]
fn defaults_are_valid() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.server.addr.port(), DEFAULT_PORT);
    assert!(settings.cache.enabled);
    assert_eq!(settings.cache.ttl, Duration::from_secs(86_400));
    assert_eq!(settings.cache.tenant_quota_bytes, 100 * 1024 * 1024);
    assert_eq!(settings.jobs.max_attempts.get(), 3);
    assert_eq!(settings.jobs.backoff_base, Duration::from_secs(2));
    assert_eq!(settings.render.preview_timeout, Duration::from_secs(30));
    assert_eq!(settings.render.final_timeout, Duration::from_secs(120));
    assert_eq!(settings.storage.public_base_url, "/blobs");
    assert!(settings.render.chrome_executable.is_none());
}

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.server.port = Some(4000);
    raw.logging.level = Some("info".to_string());

    let overrides = ServeOverrides {
        server_port: Some(4321),
        log_level: Some("debug".to_string()),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.server.addr.port(), 4321);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = ServeOverrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn zero_concurrency_is_rejected() {
    let mut raw = RawSettings::default();
    raw.jobs.production_concurrency = Some(0);

    let err = Settings::from_raw(raw).expect_err("zero workers");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "jobs.production_concurrency",
            ..
        }
    ));
}

#[test]
fn sweep_cron_is_validated() {
    let mut raw = RawSettings::default();
    raw.jobs.sweep_cron = Some("whenever".to_string());

    let err = Settings::from_raw(raw).expect_err("bad cron");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "jobs.sweep_cron",
            ..
        }
    ));
}

#[test]
fn eviction_fraction_must_be_a_share() {
    for fraction in [0.0, 1.5, -0.1] {
        let mut raw = RawSettings::default();
        raw.cache.eviction_fraction = Some(fraction);
        assert!(Settings::from_raw(raw).is_err(), "fraction {fraction}");
    }
}

#[test]
fn public_base_url_drops_trailing_slash() {
    let mut raw = RawSettings::default();
    raw.storage.public_base_url = Some("https://cdn.example.com/books/".to_string());

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(
        settings.storage.public_base_url,
        "https://cdn.example.com/books"
    );
}

#[test]
fn retention_is_expressed_in_hours() {
    let mut raw = RawSettings::default();
    raw.jobs.completed_retention_hours = Some(2);

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.jobs.completed_retention, Duration::from_secs(7_200));
    assert_eq!(
        settings.jobs.failed_retention,
        Duration::from_secs(7 * 24 * 3_600)
    );
}

#[test]
fn default_to_serve_command() {
    let args = CliArgs::parse_from(["pressroom"]);
    let command = args
        .command
        .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
    assert!(matches!(command, Command::Serve(_)));
}

#[test]
fn parse_serve_overrides() {
    let args = CliArgs::parse_from([
        "pressroom",
        "serve",
        "--server-host",
        "0.0.0.0",
        "--server-port",
        "9000",
        "--render-no-sandbox",
        "true",
        "--cache-enabled",
        "false",
        "--jobs-render-3d-concurrency",
        "3",
    ]);

    let serve = match args.command.expect("serve command") {
        Command::Serve(serve) => serve,
        _ => panic!("wrong command parsed"),
    };

    let mut raw = RawSettings::default();
    raw.apply_serve_overrides(&serve.overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.server.addr.to_string(), "0.0.0.0:9000");
    assert!(settings.render.no_sandbox);
    assert!(!settings.cache.enabled);
    assert_eq!(settings.jobs.render_3d_concurrency.get(), 3);
}

#[test]
fn parse_preview_arguments() {
    let args = CliArgs::parse_from([
        "pressroom",
        "preview",
        "--page",
        "page.json",
        "--out",
        "page.jpg",
        "--format",
        "jpeg",
        "--dpi",
        "72",
    ]);

    match args.command.expect("preview command") {
        Command::Preview(preview) => {
            assert_eq!(preview.page, PathBuf::from("page.json"));
            assert_eq!(preview.out, PathBuf::from("page.jpg"));
            assert_eq!(preview.dpi, 72);
            assert_eq!(preview.format, FormatArg::Jpeg);
            assert_eq!(preview.quality, 90);
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_compose_arguments() {
    let args = CliArgs::parse_from([
        "pressroom",
        "compose",
        "--pages",
        "book.json",
        "--out",
        "book.pdf",
        "--bleed-mm",
        "3",
        "--crop-marks",
        "--standard",
        "x4",
        "--strict",
    ]);

    match args.command.expect("compose command") {
        Command::Compose(compose) => {
            assert_eq!(compose.pages, PathBuf::from("book.json"));
            assert_eq!(compose.bleed_mm, Some(3.0));
            assert!(compose.crop_marks);
            assert!(!compose.cmyk);
            assert!(compose.strict);
            assert_eq!(compose.standard, Some(StandardArg::X4));
            assert_eq!(compose.dpi, 300);
            assert!(compose.job_ticket.is_none());
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn compose_font_dir_lands_in_production_settings() {
    let mut raw = RawSettings::default();
    raw.production.font_dir = Some(PathBuf::from("/usr/share/fonts"));

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(
        settings.production.font_dir.as_deref(),
        Some(std::path::Path::new("/usr/share/fonts"))
    );
}
