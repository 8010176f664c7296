use std::sync::Arc;
use std::thread;

use tokio::sync::{oneshot, Semaphore};

use crate::{DomShot, Error, RenderHost, Result};

/// An async-friendly renderer.
///
/// Each render is a blocking host invocation, so it runs on its own worker
/// thread and reports back through a oneshot channel. A semaphore bounds how
/// many host processes run at once.
pub struct AsyncRenderer<H> {
    host: Arc<H>,
    permits: Arc<Semaphore>,
}

impl<H> Clone for AsyncRenderer<H> {
    fn clone(&self) -> Self {
        Self {
            host: self.host.clone(),
            permits: self.permits.clone(),
        }
    }
}

impl<H: RenderHost + Send + Sync + 'static> AsyncRenderer<H> {
    /// One concurrent render per CPU.
    pub fn new(host: H) -> Self {
        Self::with_concurrency(host, num_cpus::get())
    }

    pub fn with_concurrency(host: H, max_concurrent: usize) -> Self {
        Self {
            host: Arc::new(host),
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    /// Render `shot` and return the image bytes.
    ///
    /// Dropping the returned future does not stop a render that has already
    /// started; it keeps its permit until the host returns.
    pub async fn render(&self, shot: DomShot) -> Result<Vec<u8>> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| Error::Other(format!("Renderer closed: {}", e)))?;

        let (tx, rx) = oneshot::channel();
        let host = self.host.clone();
        thread::spawn(move || {
            let _permit = permit;
            let _ = tx.send(shot.render(host.as_ref()));
        });

        rx.await
            .map_err(|e| Error::Other(format!("Render canceled: {}", e)))?
    }

    /// Render every shot, results in input order
    pub async fn render_all(&self, shots: Vec<DomShot>) -> Vec<Result<Vec<u8>>> {
        futures::future::join_all(shots.into_iter().map(|shot| self.render(shot))).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::RenderOutcome;
    use crate::script::RenderScript;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    // Writes the requested image itself and tracks peak concurrency
    struct StubHost {
        running: AtomicUsize,
        peak: AtomicUsize,
        delay: Duration,
    }

    impl StubHost {
        fn with_delay(ms: u64) -> Self {
            Self {
                running: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                delay: Duration::from_millis(ms),
            }
        }
    }

    impl Default for StubHost {
        fn default() -> Self {
            Self::with_delay(20)
        }
    }

    impl RenderHost for StubHost {
        fn execute(&self, script: &RenderScript) -> Result<RenderOutcome> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(self.delay);
            std::fs::write(script.output_path(), script.output_path().to_string_lossy().len().to_string())
                .map_err(|e| Error::io(script.output_path(), e))?;
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(RenderOutcome {
                success: true,
                exit_code: Some(0),
                diagnostics: vec![],
                output: Some(script.output_path().to_path_buf()),
            })
        }
    }

    #[tokio::test]
    async fn renders_through_worker_thread() {
        let renderer = AsyncRenderer::new(StubHost::default());
        let bytes = renderer.render(DomShot::new()).await.unwrap();
        assert!(!bytes.is_empty());
    }

    #[tokio::test]
    async fn render_all_respects_concurrency_limit() {
        let renderer = AsyncRenderer::with_concurrency(StubHost::default(), 2);
        let results = renderer.render_all(vec![DomShot::new(); 6]).await;
        assert_eq!(results.len(), 6);
        assert!(results.iter().all(|r| r.is_ok()));
        assert!(renderer.host().peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn abandoned_renders_still_count_against_the_limit() {
        let renderer = AsyncRenderer::with_concurrency(StubHost::with_delay(300), 1);
        for _ in 0..3 {
            let pending = renderer.render(DomShot::new());
            let _ = tokio::time::timeout(Duration::from_millis(20), pending).await;
        }

        // Waits for the abandoned render to release its permit
        let bytes = renderer.render(DomShot::new()).await.unwrap();
        assert!(!bytes.is_empty());
        assert_eq!(renderer.host().peak.load(Ordering::SeqCst), 1);
    }
}
