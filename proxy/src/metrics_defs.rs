//! Metrics definitions for the action router.

use shared::metrics_defs::{MetricDef, MetricType};

pub const PROXY_REQUESTS: MetricDef = MetricDef {
    name: "proxy.requests",
    metric_type: MetricType::Counter,
    description: "Number of router requests, tagged by action and response status",
};

pub const PROXY_REQUEST_DURATION: MetricDef = MetricDef {
    name: "proxy.request.duration",
    metric_type: MetricType::Histogram,
    description: "Time to answer a router request in seconds, tagged by action",
};

pub const PROXY_REJECTED: MetricDef = MetricDef {
    name: "proxy.rejected",
    metric_type: MetricType::Counter,
    description: "Requests rejected before any upstream call, tagged by error code",
};

pub const ALL_METRICS: &[MetricDef] = &[PROXY_REQUESTS, PROXY_REQUEST_DURATION, PROXY_REJECTED];
