use shared::metrics_defs::{MetricDef, MetricType};

pub const RPC_REQUESTS: MetricDef = MetricDef {
    name: "sidecar_rpc_requests",
    metric_type: MetricType::Counter,
    description: "JSON-RPC requests handled on the primary path. Tagged with outcome.",
};

pub const RPC_DISPATCH_DURATION: MetricDef = MetricDef {
    name: "sidecar_rpc_dispatch_duration_seconds",
    metric_type: MetricType::Histogram,
    description: "Primary-path pipeline duration in seconds, from settings resolution to dispatch result.",
};

pub const SHADOW_DISPATCH_FAILURES: MetricDef = MetricDef {
    name: "sidecar_shadow_dispatch_failures",
    metric_type: MetricType::Counter,
    description: "Shadow dispatches on the /test path that ended in an error.",
};

pub const PROXY_RELAY_FAILURES: MetricDef = MetricDef {
    name: "sidecar_proxy_relay_failures",
    metric_type: MetricType::Counter,
    description: "Failures contacting or streaming from the legacy provider endpoint.",
};

pub const ALL_METRICS: &[MetricDef] = &[
    RPC_REQUESTS,
    RPC_DISPATCH_DURATION,
    SHADOW_DISPATCH_FAILURES,
    PROXY_RELAY_FAILURES,
];
