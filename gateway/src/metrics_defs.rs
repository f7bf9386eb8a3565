use shared::metrics_defs::{MetricDef, MetricType};

pub const REQUEST_DURATION: MetricDef = MetricDef {
    name: "request.duration",
    metric_type: MetricType::Histogram,
    description: "End-to-end request duration in ms. Tagged with platform, status.",
};

pub const CACHE_HIT: MetricDef = MetricDef {
    name: "cache.hit",
    metric_type: MetricType::Counter,
    description: "Cache hits. Tagged with platform, layer (edge or kv).",
};

pub const CACHE_MISS: MetricDef = MetricDef {
    name: "cache.miss",
    metric_type: MetricType::Counter,
    description: "Cache misses. Tagged with platform, layer (edge or kv).",
};

pub const UPSTREAM_REQUESTS: MetricDef = MetricDef {
    name: "upstream.requests",
    metric_type: MetricType::Counter,
    description: "Upstream calls. Tagged with platform, transport.",
};

pub const UPSTREAM_RATE_LIMITED: MetricDef = MetricDef {
    name: "upstream.rate_limited",
    metric_type: MetricType::Counter,
    description: "429s observed from upstreams. Tagged with platform.",
};

pub const SESSION_POOL_SIZE: MetricDef = MetricDef {
    name: "session_pool.size",
    metric_type: MetricType::Gauge,
    description: "Current Hytale session pool size.",
};

pub const ALL_METRICS: &[MetricDef] = &[
    REQUEST_DURATION,
    CACHE_HIT,
    CACHE_MISS,
    UPSTREAM_REQUESTS,
    UPSTREAM_RATE_LIMITED,
    SESSION_POOL_SIZE,
];
