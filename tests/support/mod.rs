#![allow(dead_code)]

use std::{
    io::Cursor,
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use bytes::Bytes;
use image::{ImageFormat, Rgb, RgbImage};
use lopdf::{Document, Object, Stream, dictionary};

use pressroom::{
    application::{
        jobs::{JobQueue, QueueSettings, RenderJobExecutor},
        layout::Template,
        orchestrator::RenderOrchestrator,
        preview::PreviewService,
        production::{ComposerSettings, ProductionComposer},
        render::{RenderError, RenderRequest, Renderer, RendererHealth},
    },
    cache::{CacheConfig, PreviewCache},
    domain::{
        options::OutputFormat,
        page::{MM_PER_INCH, Page},
        project::Project,
    },
    infra::{blobs::MemoryBlobStore, pdf::LopdfProcessor, projects::FsProjectStore},
};

pub const BLOB_BASE: &str = "mem://blobs";
pub const TENANT: &str = "acme";

/// Renderer double: rasters come out at the template's device size, PDFs as
/// one page sized to the template in points.
#[derive(Default)]
pub struct FakeRenderer {
    calls: AtomicUsize,
    extras: PageExtras,
}

/// Optional content drawn onto fake PDF pages.
#[derive(Debug, Default, Clone, Copy)]
pub struct PageExtras {
    /// Text set in a Helvetica reference with no font program.
    pub unembedded_font: bool,
    /// A 10 px RGB image stretched over two inches, 5 dpi.
    pub low_res_image: bool,
}

impl FakeRenderer {
    pub fn with_unembedded_font() -> Self {
        Self {
            extras: PageExtras {
                unembedded_font: true,
                ..PageExtras::default()
            },
            ..Self::default()
        }
    }

    pub fn with_low_res_image() -> Self {
        Self {
            extras: PageExtras {
                low_res_image: true,
                ..PageExtras::default()
            },
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Renderer for FakeRenderer {
    async fn render(
        &self,
        template: &Template,
        request: &RenderRequest,
    ) -> Result<Bytes, RenderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match request.format {
            OutputFormat::Png => Ok(raster(template, ImageFormat::Png)),
            OutputFormat::Jpeg => Ok(raster(template, ImageFormat::Jpeg)),
            OutputFormat::Pdf => Ok(page_pdf_with(
                template.width_mm,
                template.height_mm,
                self.extras,
            )),
        }
    }

    async fn health(&self) -> RendererHealth {
        RendererHealth {
            healthy: true,
            detail: "fake renderer".to_string(),
        }
    }
}

fn raster(template: &Template, format: ImageFormat) -> Bytes {
    let image = RgbImage::from_pixel(
        template.pixel_width,
        template.pixel_height,
        Rgb([240, 240, 240]),
    );
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, format).expect("encode raster");
    Bytes::from(out.into_inner())
}

fn mm_to_pt(mm: f64) -> i64 {
    (mm * 72.0 / MM_PER_INCH).round() as i64
}

/// Single page painted with one RGB fill, no fonts.
pub fn page_pdf(width_mm: f64, height_mm: f64) -> Bytes {
    page_pdf_with(width_mm, height_mm, PageExtras::default())
}

fn page_pdf_with(width_mm: f64, height_mm: f64, extras: PageExtras) -> Bytes {
    let (width_pt, height_pt) = (mm_to_pt(width_mm), mm_to_pt(height_mm));
    let mut doc = Document::with_version("1.4");
    let pages_id = doc.new_object_id();
    let mut content = format!("0.2 0.4 0.8 rg 0 0 {width_pt} {height_pt} re f");
    let mut resources = dictionary! {};
    if extras.unembedded_font {
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        resources.set("Font", dictionary! { "F1" => font_id });
        content.push_str(" BT /F1 12 Tf 0 g 20 20 Td (proof) Tj ET");
    }
    if extras.low_res_image {
        let image_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => 10,
                "Height" => 10,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
            },
            vec![180u8; 10 * 10 * 3],
        ));
        resources.set("XObject", dictionary! { "Im1" => image_id });
        content.push_str(" q 144 0 0 144 36 36 cm /Im1 Do Q");
    }
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
        "Resources" => resources,
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
            "MediaBox" => vec![0.into(), 0.into(), width_pt.into(), height_pt.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut out = Vec::new();
    doc.save_to(&mut out).expect("save page");
    Bytes::from(out)
}

pub fn a4_page(id: &str) -> Page {
    Page {
        id: id.to_string(),
        width_mm: 210.0,
        height_mm: 297.0,
        background: "#ffffff".to_string(),
        elements: Vec::new(),
    }
}

pub fn project(id: &str, pages: Vec<Page>) -> Project {
    Project {
        id: id.to_string(),
        version: 1,
        title: Some(format!("Book {id}")),
        product_format: None,
        pages,
    }
}

/// Write a project document where the file-backed store expects it.
pub fn write_project(root: &Path, tenant: &str, project: &Project) {
    let dir = root.join(tenant);
    std::fs::create_dir_all(&dir).expect("tenant dir");
    let json = serde_json::to_vec_pretty(project).expect("encode project");
    std::fs::write(dir.join(format!("{}.json", project.id)), json).expect("write project");
}

pub fn key_from_url(url: &str) -> &str {
    url.strip_prefix(BLOB_BASE)
        .and_then(|rest| rest.strip_prefix('/'))
        .expect("url served by the memory store")
}

/// Fully wired pipeline over a temp project root, an in-memory blob store
/// and the fake renderer.
pub struct Harness {
    pub _root: tempfile::TempDir,
    pub renderer: Arc<FakeRenderer>,
    pub blobs: Arc<MemoryBlobStore>,
    pub queue: JobQueue,
    pub executor: Arc<RenderJobExecutor>,
    pub orchestrator: Arc<RenderOrchestrator>,
}

impl Harness {
    pub fn new(projects: &[Project]) -> Self {
        Self::with_queue(projects, QueueSettings::default())
    }

    pub fn with_queue(projects: &[Project], queue_settings: QueueSettings) -> Self {
        Self::build(projects, queue_settings, FakeRenderer::default())
    }

    pub fn with_renderer(projects: &[Project], renderer: FakeRenderer) -> Self {
        Self::build(projects, QueueSettings::default(), renderer)
    }

    fn build(projects: &[Project], queue_settings: QueueSettings, renderer: FakeRenderer) -> Self {
        let root = tempfile::tempdir().expect("tempdir");
        for project in projects {
            write_project(root.path(), TENANT, project);
        }

        let renderer = Arc::new(renderer);
        let blobs = Arc::new(MemoryBlobStore::new(BLOB_BASE));
        let store = Arc::new(FsProjectStore::new(root.path().to_path_buf()));

        let cache = PreviewCache::new(blobs.clone(), CacheConfig::default());
        let previews = PreviewService::new(store.clone(), renderer.clone(), blobs.clone(), cache);
        let composer = ProductionComposer::new(
            renderer.clone(),
            Arc::new(LopdfProcessor::default()),
            blobs.clone(),
            ComposerSettings::default(),
        );
        let queue = JobQueue::new(queue_settings);
        let executor = Arc::new(RenderJobExecutor::new(
            store.clone(),
            renderer.clone(),
            blobs.clone(),
            previews.clone(),
            composer.clone(),
        ));
        let orchestrator = Arc::new(RenderOrchestrator::new(
            store,
            renderer.clone(),
            previews,
            composer,
            queue.clone(),
        ));

        Self {
            _root: root,
            renderer,
            blobs,
            queue,
            executor,
            orchestrator,
        }
    }
}
