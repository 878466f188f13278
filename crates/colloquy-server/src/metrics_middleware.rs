use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::extract::MatchedPath;
use axum::http::{Request, Response};
use opentelemetry::metrics::{Counter, Histogram, UpDownCounter};
use opentelemetry::{global, KeyValue};
use tower::{Layer, Service};

/// Tower [`Layer`] that records HTTP request metrics via OpenTelemetry.
///
/// Recorded instruments:
/// - `http.server.request.count` - counter by method, route, status
/// - `http.server.request.duration` - histogram (seconds) by method, route, status
/// - `http.server.active_requests` - up-down counter by method, route
///
/// Install with `Router::layer` so the route template is known.
#[derive(Clone)]
pub struct HttpMetricsLayer {
    instruments: Instruments,
}

#[derive(Clone)]
struct Instruments {
    request_count: Counter<u64>,
    request_duration: Histogram<f64>,
    active_requests: UpDownCounter<i64>,
}

impl HttpMetricsLayer {
    pub fn new() -> Self {
        let meter = global::meter("colloquy-server");

        let instruments = Instruments {
            request_count: meter
                .u64_counter("http.server.request.count")
                .with_description("Total HTTP requests")
                .build(),
            request_duration: meter
                .f64_histogram("http.server.request.duration")
                .with_description("HTTP request duration in seconds")
                .with_unit("s")
                .build(),
            active_requests: meter
                .i64_up_down_counter("http.server.active_requests")
                .with_description("Number of in-flight HTTP requests")
                .build(),
        };

        Self { instruments }
    }
}

impl<S> Layer<S> for HttpMetricsLayer {
    type Service = HttpMetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        HttpMetricsService {
            inner,
            instruments: self.instruments.clone(),
        }
    }
}

#[derive(Clone)]
pub struct HttpMetricsService<S> {
    inner: S,
    instruments: Instruments,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for HttpMetricsService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    ReqBody: Send + 'static,
    ResBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let method = req.method().to_string();
        let route = route_label(req.extensions().get::<MatchedPath>());

        let active_attrs = [
            KeyValue::new("http.request.method", method.clone()),
            KeyValue::new("http.route", route.clone()),
        ];
        let instruments = self.instruments.clone();
        instruments.active_requests.add(1, &active_attrs);

        // Drive the clone that was polled ready, leave a fresh one behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let start = Instant::now();

        Box::pin(async move {
            let result = inner.call(req).await;

            let elapsed = start.elapsed().as_secs_f64();
            instruments.active_requests.add(-1, &active_attrs);

            let status = match &result {
                Ok(resp) => i64::from(resp.status().as_u16()),
                Err(_) => 500,
            };

            let attrs = [
                KeyValue::new("http.request.method", method),
                KeyValue::new("http.route", route),
                KeyValue::new("http.response.status_code", status),
            ];

            instruments.request_count.add(1, &attrs);
            instruments.request_duration.record(elapsed, &attrs);

            result
        })
    }
}

/// Route template for the metric attribute, e.g. `/api/chat/send`.
///
/// Requests that matched no route share one label so unknown paths cannot
/// blow up attribute cardinality.
fn route_label(matched: Option<&MatchedPath>) -> String {
    matched.map_or_else(|| "unmatched".to_string(), |m| m.as_str().to_string())
}
