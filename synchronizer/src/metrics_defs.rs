//! Metrics definitions for the synchronization jobs.

use shared::metrics_defs::{MetricDef, MetricType};

pub const SYNC_RECORDS: MetricDef = MetricDef {
    name: "sync.records",
    metric_type: MetricType::Counter,
    description: "Records processed by a sync job, tagged by job and outcome",
};

pub const SYNC_RUN_DURATION: MetricDef = MetricDef {
    name: "sync.run.duration",
    metric_type: MetricType::Histogram,
    description: "Time to complete a sync job run in seconds, tagged by job",
};

pub const SYNC_SKIPPED: MetricDef = MetricDef {
    name: "sync.skipped",
    metric_type: MetricType::Counter,
    description: "Strain sync runs skipped because the catalog was fresh",
};

pub const REHOME_OUTCOMES: MetricDef = MetricDef {
    name: "rehome.outcomes",
    metric_type: MetricType::Counter,
    description: "Per-client rehome outcomes, tagged by outcome",
};

pub const ALL_METRICS: &[MetricDef] = &[
    SYNC_RECORDS,
    SYNC_RUN_DURATION,
    SYNC_SKIPPED,
    REHOME_OUTCOMES,
];
