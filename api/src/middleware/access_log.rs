use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::extract::Request;
use axum::response::{IntoResponse, Response};
use gatekeep_core::MetricsCollector;
use tower::{Layer, Service, ServiceExt};

/// Tower Layer for access logging.
///
/// Logs method, path, status and latency of every `/v1/` request and feeds the
/// latency into the engine's rolling response-time samples.
#[derive(Clone)]
pub struct AccessLogLayer {
    metrics: Arc<MetricsCollector>,
}

impl AccessLogLayer {
    pub fn new(metrics: Arc<MetricsCollector>) -> Self {
        Self { metrics }
    }
}

impl<S> Layer<S> for AccessLogLayer {
    type Service = AccessLogService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AccessLogService {
            inner,
            metrics: self.metrics.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AccessLogService<S> {
    inner: S,
    metrics: Arc<MetricsCollector>,
}

impl<S> Service<Request> for AccessLogService<S>
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let not_ready = self.inner.clone();
        let ready = std::mem::replace(&mut self.inner, not_ready);
        let metrics = self.metrics.clone();

        Box::pin(async move {
            let path = req.uri().path().to_owned();

            // Only API endpoints count towards latency
            if !path.starts_with("/v1/") {
                return Ok(ready.oneshot(req).await.into_response());
            }

            let start = Instant::now();
            let method = req.method().to_string();
            let response = ready.oneshot(req).await.into_response();
            let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

            metrics.record_response_time(elapsed_ms).await;
            tracing::info!(
                method = %method,
                path = %path,
                status = response.status().as_u16(),
                elapsed_ms = elapsed_ms,
                "request served"
            );

            Ok(response)
        })
    }
}
