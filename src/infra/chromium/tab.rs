use std::{future::Future, time::Duration};

use chromiumoxide::Page;
use tokio::{runtime::Handle, time::timeout};
use tracing::{debug, warn};

const SOURCE: &str = "infra::chromium::tab";
const TAB_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// A browser target that can be shut down once.
pub(crate) trait Tab: Clone + Send + 'static {
    fn close_tab(self) -> impl Future<Output = Result<(), String>> + Send;
}

impl Tab for Page {
    fn close_tab(self) -> impl Future<Output = Result<(), String>> + Send {
        async move { Page::close(self).await.map_err(|err| err.to_string()) }
    }
}

/// Owns an open tab for the length of one render call.
///
/// Dropping the guard without [`TabGuard::close`] (a cancelled render
/// future, a client disconnect) schedules the close on the runtime, so no
/// exit path leaves the target open.
pub(crate) struct TabGuard<T: Tab> {
    tab: T,
    closed: bool,
}

impl<T: Tab> TabGuard<T> {
    pub(crate) fn new(tab: T) -> Self {
        Self { tab, closed: false }
    }

    pub(crate) fn tab(&self) -> &T {
        &self.tab
    }

    pub(crate) async fn close(mut self) {
        close_with_deadline(self.tab.clone(), "chromium::close_tab").await;
        self.closed = true;
    }
}

impl<T: Tab> Drop for TabGuard<T> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let tab = self.tab.clone();
        match Handle::try_current() {
            Ok(handle) => {
                debug!(target = SOURCE, op = "chromium::close_tab", "render abandoned, closing tab");
                handle.spawn(close_with_deadline(tab, "chromium::close_abandoned_tab"));
            }
            Err(_) => {
                warn!(
                    target = SOURCE,
                    op = "chromium::close_tab",
                    "tab dropped outside the runtime and left open"
                );
            }
        }
    }
}

async fn close_with_deadline<T: Tab>(tab: T, op: &'static str) {
    match timeout(TAB_CLOSE_TIMEOUT, tab.close_tab()).await {
        Ok(Ok(())) => {}
        Ok(Err(error)) => {
            warn!(target = SOURCE, op, error = %error, "tab close failed");
        }
        Err(_) => {
            warn!(target = SOURCE, op, result = "timeout", "tab close timed out");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    #[derive(Clone, Default)]
    struct CountingTab {
        closes: Arc<AtomicUsize>,
    }

    impl Tab for CountingTab {
        fn close_tab(self) -> impl Future<Output = Result<(), String>> + Send {
            async move {
                self.closes.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn explicit_close_runs_once() {
        let tab = CountingTab::default();
        TabGuard::new(tab.clone()).close().await;
        tokio::task::yield_now().await;
        assert_eq!(tab.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn abandoned_render_still_closes_its_tab() {
        let tab = CountingTab::default();
        let render = {
            let guard = TabGuard::new(tab.clone());
            async move {
                let _open = guard.tab();
                std::future::pending::<()>().await;
            }
        };
        let outcome = timeout(Duration::from_millis(10), render).await;
        assert!(outcome.is_err());

        for _ in 0..10 {
            if tab.closes.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(tab.closes.load(Ordering::SeqCst), 1);
    }
}
