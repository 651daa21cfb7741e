use std::{process, sync::Arc};

use pressroom::{
    application::{
        error::AppError,
        jobs::{JobQueue, JobRuntime, QueueSettings, RenderJobExecutor, WorkerSettings},
        layout::build_template,
        orchestrator::RenderOrchestrator,
        preview::PreviewService,
        production::{ComposerSettings, NoProgress, ProductionComposer, ProductionRequest},
        render::{RenderRequest, Renderer},
        repos::{BlobStore, ProjectStore},
    },
    cache::{CacheConfig, PreviewCache},
    config,
    domain::{
        error::DomainError,
        options::{ColorProfile, OutputFormat, RenderOptions},
        page::Page,
        project::Project,
    },
    infra::{
        blobs::{FsBlobStore, MemoryBlobStore},
        chromium::{BrowserSettings, ChromiumRenderer},
        error::InfraError,
        http::{self, ApiState, BlobState, RouterState},
        pdf::{FontLibrary, LopdfProcessor},
        projects::FsProjectStore,
        telemetry,
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;
use uuid::Uuid;

const LOCAL_TENANT: &str = "local";
const MEMORY_BLOB_URL: &str = "memory://pressroom";

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, code = error.code(), "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, code = error.code(), "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Preview(args) => run_preview(settings, args).await,
        config::Command::Compose(args) => run_compose(settings, args).await,
    }
}

fn load_fonts(settings: &config::ProductionSettings) -> Result<FontLibrary, AppError> {
    match settings.font_dir.as_ref() {
        Some(dir) => FontLibrary::load_dir(dir).map_err(|source| {
            AppError::from(InfraError::Fonts {
                path: dir.clone(),
                source,
            })
        }),
        None => Ok(FontLibrary::default()),
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let blobs: Arc<dyn BlobStore> = Arc::new(
        FsBlobStore::new(
            settings.storage.blob_root.clone(),
            settings.storage.public_base_url.clone(),
        )
        .map_err(InfraError::io("failed to open blob root"))?,
    );
    let projects: Arc<dyn ProjectStore> =
        Arc::new(FsProjectStore::new(settings.projects.root.clone()));
    let chromium = Arc::new(ChromiumRenderer::new(BrowserSettings::from(&settings.render)));
    let renderer: Arc<dyn Renderer> = chromium.clone();

    let cache = PreviewCache::new(blobs.clone(), CacheConfig::from(&settings.cache));
    let previews = PreviewService::new(projects.clone(), renderer.clone(), blobs.clone(), cache)
        .with_timeout(settings.render.preview_timeout);
    let processor = Arc::new(LopdfProcessor::new(load_fonts(&settings.production)?));
    let composer = ProductionComposer::new(
        renderer.clone(),
        processor,
        blobs.clone(),
        ComposerSettings::from_config(&settings.production, &settings.render),
    );

    let queue = JobQueue::new(QueueSettings::from(&settings.jobs));
    let executor = RenderJobExecutor::new(
        projects.clone(),
        renderer.clone(),
        blobs.clone(),
        previews.clone(),
        composer.clone(),
    )
    .with_page_concurrency(settings.production.page_concurrency.get() as usize)
    .with_page_timeout(settings.render.final_timeout);
    let jobs = JobRuntime::start(
        queue.clone(),
        Arc::new(executor),
        &WorkerSettings::from(&settings.jobs),
        settings.jobs.sweep_schedule.clone(),
    );

    let orchestrator = Arc::new(RenderOrchestrator::new(
        projects, renderer, previews, composer, queue,
    ));
    let router_state = RouterState {
        api: ApiState::new(orchestrator),
        blobs: BlobState { blobs },
    };

    let result = serve_http(&settings, router_state).await;

    if tokio::time::timeout(settings.server.graceful_shutdown, jobs.shutdown())
        .await
        .is_err()
    {
        warn!(
            target = "pressroom::serve",
            op = "shutdown",
            "job runtime did not stop within the graceful shutdown window"
        );
    }
    chromium.shutdown().await;

    result
}

async fn serve_http(settings: &config::Settings, state: RouterState) -> Result<(), AppError> {
    let router = http::build_router(state);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(InfraError::io(format!("failed to bind {}", settings.server.addr)))?;

    info!(
        target = "pressroom::serve",
        addr = %settings.server.addr,
        "HTTP server listening"
    );

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::from(InfraError::server(err.to_string())))
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(target = "pressroom::serve", error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!(target = "pressroom::serve", "shutdown signal received");
}

async fn read_json<T: serde::de::DeserializeOwned>(
    path: &std::path::Path,
    field: &'static str,
) -> Result<T, AppError> {
    let raw = tokio::fs::read(path)
        .await
        .map_err(InfraError::io(format!("failed to read {}", path.display())))?;
    serde_json::from_slice(&raw)
        .map_err(|err| AppError::from(DomainError::validation(field, err.to_string())))
}

async fn run_preview(settings: config::Settings, args: config::PreviewArgs) -> Result<(), AppError> {
    let page: Page = read_json(&args.page, "page").await?;
    let options = RenderOptions {
        dpi: args.dpi,
        format: OutputFormat::from(args.format),
        quality: args.quality,
        ..RenderOptions::default()
    };
    options.validate()?;
    let (width_px, height_px) = options.ensure_preview_size(&page)?;

    let renderer = ChromiumRenderer::new(BrowserSettings::from(&settings.render));
    let template = build_template(&page, &options);
    let request = RenderRequest::new(options.format, settings.render.preview_timeout)
        .with_quality(options.quality);
    let rendered = renderer.render(&template, &request).await;
    renderer.shutdown().await;
    let bytes = rendered?;

    tokio::fs::write(&args.out, &bytes)
        .await
        .map_err(InfraError::io(format!("failed to write {}", args.out.display())))?;

    info!(
        target = "pressroom::preview",
        page_id = %page.id,
        width_px,
        height_px,
        size_bytes = bytes.len(),
        out = %args.out.display(),
        "Preview written"
    );
    Ok(())
}

async fn run_compose(settings: config::Settings, args: config::ComposeArgs) -> Result<(), AppError> {
    let project: Project = read_json(&args.pages, "project").await?;

    let mut options = RenderOptions {
        dpi: args.dpi,
        format: OutputFormat::Pdf,
        ..RenderOptions::default()
    };
    if let Some(bleed_mm) = args.bleed_mm {
        options.production.include_bleed = true;
        options.production.bleed_mm = bleed_mm;
    }
    options.production.include_crop_marks = args.crop_marks;
    options.production.color_profile = if args.cmyk {
        ColorProfile::Cmyk
    } else {
        ColorProfile::Rgb
    };
    options.production.pdf_standard = args.standard.map(Into::into);
    options.production.strict_validation = args.strict;
    options.production.emit_job_ticket = args.job_ticket.is_some();

    let chromium = Arc::new(ChromiumRenderer::new(BrowserSettings::from(&settings.render)));
    let blobs = Arc::new(MemoryBlobStore::new(MEMORY_BLOB_URL));
    let composer = ProductionComposer::new(
        chromium.clone(),
        Arc::new(LopdfProcessor::new(load_fonts(&settings.production)?)),
        blobs.clone(),
        ComposerSettings::from_config(&settings.production, &settings.render),
    );

    let request = ProductionRequest {
        tenant_id: LOCAL_TENANT.to_string(),
        project_id: project.id.clone(),
        order_id: None,
        title: project.title.clone().unwrap_or_else(|| project.id.clone()),
        product_format: project.product_format.clone(),
        pages: project.pages,
        options,
    };
    let job_id = Uuid::new_v4().to_string();
    let composed = composer.compose(&job_id, request, &NoProgress).await;
    chromium.shutdown().await;
    let result = composed?;

    for entry in blobs.list("production/").await? {
        let target = if entry.key.ends_with(".pdf") {
            Some(&args.out)
        } else if entry.key.ends_with(".jdf") {
            args.job_ticket.as_ref()
        } else {
            None
        };
        if let Some(path) = target {
            let bytes = blobs.download(&entry.key).await?;
            tokio::fs::write(path, &bytes)
                .await
                .map_err(InfraError::io(format!("failed to write {}", path.display())))?;
        }
    }

    for warning in &result.validation.warnings {
        warn!(target = "pressroom::compose", warning = %warning, "validation warning");
    }
    info!(
        target = "pressroom::compose",
        project_id = %project.id,
        page_count = result.metadata.page_count,
        valid = result.validation.is_valid,
        elapsed_ms = result.processing_ms,
        out = %args.out.display(),
        "Production PDF written"
    );
    Ok(())
}
