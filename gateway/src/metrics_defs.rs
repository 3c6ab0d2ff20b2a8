use shared::metrics_defs::{MetricDef, MetricType};

pub const REQUEST_DURATION: MetricDef = MetricDef {
    name: "request.duration",
    metric_type: MetricType::Histogram,
    description: "Request duration in seconds. Tagged with operation, status.",
};

pub const REQUESTS_INFLIGHT: MetricDef = MetricDef {
    name: "requests.inflight",
    metric_type: MetricType::Gauge,
    description: "Number of requests currently being processed",
};

pub const AUTH_DENIED: MetricDef = MetricDef {
    name: "auth.denied",
    metric_type: MetricType::Counter,
    description: "Requests rejected by the permission service. Tagged with operation.",
};

pub const DUPLICATION_ENQUEUED: MetricDef = MetricDef {
    name: "duplication.enqueued",
    metric_type: MetricType::Counter,
    description: "Envelopes placed on the duplication queue",
};

pub const DUPLICATION_DROPPED: MetricDef = MetricDef {
    name: "duplication.dropped",
    metric_type: MetricType::Counter,
    description: "Envelopes discarded before reaching the queue. Tagged with reason.",
};

pub const DUPLICATION_FORWARDED: MetricDef = MetricDef {
    name: "duplication.forwarded",
    metric_type: MetricType::Counter,
    description: "Envelopes accepted by the duplication consumer",
};

pub const DUPLICATION_FORWARD_FAILED: MetricDef = MetricDef {
    name: "duplication.forward_failed",
    metric_type: MetricType::Counter,
    description: "Envelopes the duplication consumer did not accept",
};

pub const ALL_METRICS: &[MetricDef] = &[
    REQUEST_DURATION,
    REQUESTS_INFLIGHT,
    AUTH_DENIED,
    DUPLICATION_ENQUEUED,
    DUPLICATION_DROPPED,
    DUPLICATION_FORWARDED,
    DUPLICATION_FORWARD_FAILED,
];
