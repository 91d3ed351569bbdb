//! Metrics definitions for the Dr. Green client.

use shared::metrics_defs::{MetricDef, MetricType};

pub const UPSTREAM_REQUESTS: MetricDef = MetricDef {
    name: "drgreen.upstream.requests",
    metric_type: MetricType::Counter,
    description: "Number of signed upstream requests, tagged by outcome",
};

pub const UPSTREAM_REQUEST_DURATION: MetricDef = MetricDef {
    name: "drgreen.upstream.duration",
    metric_type: MetricType::Histogram,
    description: "Time to complete an upstream request in seconds",
};

pub const STRAIN_CACHE_HIT: MetricDef = MetricDef {
    name: "strain_cache.hit",
    metric_type: MetricType::Counter,
    description: "Number of strain detail lookups served from the cache",
};

pub const STRAIN_CACHE_MISS: MetricDef = MetricDef {
    name: "strain_cache.miss",
    metric_type: MetricType::Counter,
    description: "Number of strain detail lookups that missed the cache",
};

pub const ALL_METRICS: &[MetricDef] = &[
    UPSTREAM_REQUESTS,
    UPSTREAM_REQUEST_DURATION,
    STRAIN_CACHE_HIT,
    STRAIN_CACHE_MISS,
];
