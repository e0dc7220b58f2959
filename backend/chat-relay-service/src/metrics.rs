use std::time::Duration;

use actix_web::HttpResponse;
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, TextEncoder,
};

use crate::websocket::PresenceState;

static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "chat_relay_http_requests_total",
            "Total HTTP requests handled by chat-relay-service",
        ),
        &["method", "path", "status"],
    )
    .expect("failed to create chat_relay_http_requests_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register chat_relay_http_requests_total");
    counter
});

static HTTP_REQUEST_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    let histogram = HistogramVec::new(
        HistogramOpts::new(
            "chat_relay_http_request_duration_seconds",
            "HTTP request latency for chat-relay-service",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]),
        &["method", "path", "status"],
    )
    .expect("failed to create chat_relay_http_request_duration_seconds");
    prometheus::default_registry()
        .register(Box::new(histogram.clone()))
        .expect("failed to register chat_relay_http_request_duration_seconds");
    histogram
});

static CONNECTIONS: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new("chat_relay_connections", "Live WebSocket sessions")
        .expect("failed to create chat_relay_connections");
    prometheus::default_registry()
        .register(Box::new(gauge.clone()))
        .expect("failed to register chat_relay_connections");
    gauge
});

static PRESENCE_ONLINE: Lazy<IntGauge> = Lazy::new(|| {
    let gauge = IntGauge::new(
        "chat_relay_presence_online",
        "1 while at least one device is registered",
    )
    .expect("failed to create chat_relay_presence_online");
    prometheus::default_registry()
        .register(Box::new(gauge.clone()))
        .expect("failed to register chat_relay_presence_online");
    gauge
});

static MESSAGES_ACCEPTED: Lazy<IntCounter> = Lazy::new(|| {
    let counter = IntCounter::new(
        "chat_relay_messages_accepted_total",
        "Chat messages persisted and broadcast",
    )
    .expect("failed to create chat_relay_messages_accepted_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register chat_relay_messages_accepted_total");
    counter
});

static MESSAGES_REJECTED: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "chat_relay_messages_rejected_total",
            "Chat messages rejected before broadcast",
        ),
        &["reason"],
    )
    .expect("failed to create chat_relay_messages_rejected_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register chat_relay_messages_rejected_total");
    counter
});

static PUSH_DELIVERIES: Lazy<IntCounterVec> = Lazy::new(|| {
    let counter = IntCounterVec::new(
        Opts::new(
            "chat_relay_push_deliveries_total",
            "Push delivery attempts by outcome",
        ),
        &["outcome"],
    )
    .expect("failed to create chat_relay_push_deliveries_total");
    prometheus::default_registry()
        .register(Box::new(counter.clone()))
        .expect("failed to register chat_relay_push_deliveries_total");
    counter
});

pub fn observe_http_request(method: &str, path: &str, status: u16, elapsed: Duration) {
    let status_label = status.to_string();
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status_label])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path, &status_label])
        .observe(elapsed.as_secs_f64());
}

pub fn set_connections(count: usize) {
    CONNECTIONS.set(i64::try_from(count).unwrap_or(i64::MAX));
}

#[cfg(test)]
pub(crate) fn connections() -> i64 {
    CONNECTIONS.get()
}

pub fn set_presence(state: PresenceState) {
    PRESENCE_ONLINE.set(match state {
        PresenceState::Online => 1,
        PresenceState::Offline => 0,
    });
}

pub fn record_accepted() {
    MESSAGES_ACCEPTED.inc();
}

pub fn record_rejected(reason: &str) {
    MESSAGES_REJECTED.with_label_values(&[reason]).inc();
}

/// `outcome` is one of `delivered`, `transient`, `permanent`
pub fn record_push(outcome: &str) {
    PUSH_DELIVERIES.with_label_values(&[outcome]).inc();
}

pub async fn serve_metrics() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error,
};
use futures::future::{ready, LocalBoxFuture, Ready};
use std::rc::Rc;
use std::time::Instant;

pub struct MetricsMiddleware;

impl<S, B> Transform<S, ServiceRequest> for MetricsMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = MetricsMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(MetricsMiddlewareService {
            service: Rc::new(service),
        }))
    }
}

pub struct MetricsMiddlewareService<S> {
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for MetricsMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        // Matched route pattern keeps label cardinality bounded.
        let path = req
            .match_pattern()
            .unwrap_or_else(|| "unmatched".to_string());
        let method = req.method().to_string();
        let start = Instant::now();

        Box::pin(async move {
            let result = service.call(req).await;
            let elapsed = start.elapsed();
            match &result {
                Ok(response) => {
                    observe_http_request(&method, &path, response.status().as_u16(), elapsed);
                }
                Err(_) => {
                    observe_http_request(&method, &path, 500, elapsed);
                }
            }
            result
        })
    }
}
