//! Lifecycle of the shared headless browser.
//!
//! One browser process serves every render. It is launched on first use
//! and replaced once its event loop exits or a render crashes or times out.
//! The CDP liveness round trip only runs for the health endpoint. Callers only ever hold a [`SessionLease`], never the process.

use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use chromiumoxide::{
    Page,
    browser::{Browser, BrowserConfig},
    error::CdpError,
};
use futures::StreamExt;
use tokio::{sync::Mutex, task::JoinHandle, time::timeout};
use tracing::{info, warn};

use crate::application::render::{RenderError, RendererHealth};

const SOURCE: &str = "infra::chromium::supervisor";
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct BrowserSettings {
    pub executable: Option<PathBuf>,
    pub no_sandbox: bool,
    pub launch_timeout: Duration,
    pub user_data_dir: Option<PathBuf>,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            executable: None,
            no_sandbox: false,
            launch_timeout: Duration::from_secs(20),
            user_data_dir: None,
        }
    }
}

impl From<&crate::config::RenderSettings> for BrowserSettings {
    fn from(settings: &crate::config::RenderSettings) -> Self {
        Self {
            executable: settings.chrome_executable.clone(),
            no_sandbox: settings.no_sandbox,
            launch_timeout: settings.launch_timeout,
            user_data_dir: settings.user_data_dir.clone(),
        }
    }
}

struct Session {
    browser: Browser,
    handler: JoinHandle<()>,
    healthy: AtomicBool,
    launched_at: Instant,
}

impl Session {
    fn reusable(&self) -> bool {
        reusable(&self.healthy, &self.handler)
    }
}

/// Cheap local check run on every acquire: no failed render has flagged the
/// session and its event loop is still running.
fn reusable(healthy: &AtomicBool, handler: &JoinHandle<()>) -> bool {
    healthy.load(Ordering::Acquire) && !handler.is_finished()
}

impl Drop for Session {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

/// A borrowed handle on the live browser, valid for one render.
pub struct SessionLease {
    session: Arc<Session>,
}

impl SessionLease {
    pub(crate) async fn open_tab(&self) -> Result<Page, RenderError> {
        self.session
            .browser
            .new_page("about:blank")
            .await
            .map_err(map_cdp_error)
    }
}

pub struct SessionSupervisor {
    settings: BrowserSettings,
    slot: Mutex<Option<Arc<Session>>>,
}

impl SessionSupervisor {
    pub fn new(settings: BrowserSettings) -> Self {
        Self {
            settings,
            slot: Mutex::new(None),
        }
    }

    /// Return a lease on a healthy browser, launching or relaunching as needed.
    pub async fn acquire_session(&self) -> Result<SessionLease, RenderError> {
        let current = self.slot.lock().await.clone();
        if let Some(session) = current.filter(|session| session.reusable()) {
            return Ok(SessionLease { session });
        }

        let mut slot = self.slot.lock().await;
        if let Some(session) = slot.as_ref() {
            // Another caller may have relaunched while the lock was free.
            if session.reusable() {
                return Ok(SessionLease {
                    session: Arc::clone(session),
                });
            }
            warn!(
                target = SOURCE,
                op = "chromium::acquire_session",
                result = "discarded",
                uptime_ms = session.launched_at.elapsed().as_millis() as u64,
                "browser session is no longer usable"
            );
            slot.take();
        }

        let session = Arc::new(self.launch().await?);
        *slot = Some(Arc::clone(&session));
        Ok(SessionLease { session })
    }

    /// Return a lease. A failure that implicates the session marks it so the
    /// next acquire replaces the browser.
    pub fn release(&self, lease: SessionLease, failure: Option<&RenderError>) {
        if let Some(err) = failure.filter(|err| err.poisons_session()) {
            lease.session.healthy.store(false, Ordering::Release);
            warn!(
                target = SOURCE,
                op = "chromium::release",
                result = "unhealthy",
                error_code = err.code(),
                "browser session marked for replacement"
            );
        }
    }

    pub async fn health(&self) -> RendererHealth {
        let current = self.slot.lock().await.clone();
        match current {
            None => RendererHealth {
                healthy: true,
                detail: "browser not started".to_string(),
            },
            Some(session) if !session.healthy.load(Ordering::Acquire) => RendererHealth {
                healthy: false,
                detail: "browser awaiting restart".to_string(),
            },
            Some(session) => match browser_version(&session).await {
                Ok(product) => RendererHealth {
                    healthy: true,
                    detail: product,
                },
                Err(err) => RendererHealth {
                    healthy: false,
                    detail: err.to_string(),
                },
            },
        }
    }

    pub async fn shutdown(&self) {
        if let Some(session) = self.slot.lock().await.take() {
            info!(
                target = SOURCE,
                op = "chromium::shutdown",
                uptime_ms = session.launched_at.elapsed().as_millis() as u64,
                "closing browser session"
            );
            if let Ok(mut session) = Arc::try_unwrap(session) {
                if let Err(err) = session.browser.close().await {
                    warn!(target = SOURCE, op = "chromium::shutdown", error = %err, "browser close failed");
                }
            }
        }
    }

    async fn launch(&self) -> Result<Session, RenderError> {
        let started_at = Instant::now();
        let mut builder = BrowserConfig::builder();
        if let Some(executable) = &self.settings.executable {
            builder = builder.chrome_executable(executable);
        }
        if self.settings.no_sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(dir) = &self.settings.user_data_dir {
            builder = builder.user_data_dir(dir);
        }
        let config = builder
            .launch_timeout(self.settings.launch_timeout)
            .build()
            .map_err(|message| RenderError::Launch { message })?;

        let (browser, mut handler) = timeout(self.settings.launch_timeout, Browser::launch(config))
            .await
            .map_err(|_| RenderError::Launch {
                message: format!("browser did not start within {:?}", self.settings.launch_timeout),
            })?
            .map_err(|err| RenderError::Launch {
                message: err.to_string(),
            })?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    warn!(target = SOURCE, op = "chromium::handler", error = %err, "browser event loop ended");
                    break;
                }
            }
        });

        info!(
            target = SOURCE,
            op = "chromium::launch",
            result = "launched",
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "browser session started"
        );

        Ok(Session {
            browser,
            handler,
            healthy: AtomicBool::new(true),
            launched_at: Instant::now(),
        })
    }
}

async fn browser_version(session: &Session) -> Result<String, RenderError> {
    if session.handler.is_finished() {
        return Err(RenderError::SessionCrashed {
            message: "browser event loop has exited".to_string(),
        });
    }
    match timeout(HEALTH_CHECK_TIMEOUT, session.browser.version()).await {
        Ok(Ok(version)) => Ok(version.product),
        Ok(Err(err)) => Err(map_cdp_error(err)),
        Err(_) => Err(RenderError::Timeout {
            timeout: HEALTH_CHECK_TIMEOUT,
        }),
    }
}

pub(crate) fn map_cdp_error(err: CdpError) -> RenderError {
    match err {
        CdpError::Timeout => RenderError::Timeout {
            timeout: Duration::ZERO,
        },
        CdpError::Ws(_) | CdpError::ChannelSendError(_) | CdpError::NoResponse => {
            RenderError::SessionCrashed {
                message: err.to_string(),
            }
        }
        other => RenderError::Protocol {
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sessions_are_reused_until_flagged_or_their_loop_exits() {
        let healthy = AtomicBool::new(true);
        let running = tokio::spawn(std::future::pending::<()>());
        assert!(reusable(&healthy, &running));

        healthy.store(false, Ordering::Release);
        assert!(!reusable(&healthy, &running));
        running.abort();

        let healthy = AtomicBool::new(true);
        let exited = tokio::spawn(async {});
        while !exited.is_finished() {
            tokio::task::yield_now().await;
        }
        assert!(!reusable(&healthy, &exited));
    }

    #[test]
    fn transport_failures_poison_the_session() {
        assert!(map_cdp_error(CdpError::NoResponse).poisons_session());
        assert!(map_cdp_error(CdpError::Timeout).poisons_session());
    }
}
