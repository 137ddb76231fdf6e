use prometheus::{
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub dispatch_total: IntCounterVec,
    pub dispatch_latency_seconds: HistogramVec,
    pub transitions_total: IntCounterVec,
    pub deliveries_active: IntGauge,
    pub location_updates_total: IntCounter,
    pub eta_degraded_total: IntCounter,
    pub payouts_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let dispatch_total = IntCounterVec::new(
            Opts::new("dispatch_total", "Courier assignment attempts by outcome"),
            &["outcome"],
        )
        .expect("valid dispatch_total metric");

        let dispatch_latency_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "dispatch_latency_seconds",
                "Latency of courier assignment in seconds",
            ),
            &["outcome"],
        )
        .expect("valid dispatch_latency_seconds metric");

        let transitions_total = IntCounterVec::new(
            Opts::new("transitions_total", "Applied delivery status transitions"),
            &["to"],
        )
        .expect("valid transitions_total metric");

        let deliveries_active =
            IntGauge::new("deliveries_active", "Deliveries in a non-terminal status")
                .expect("valid deliveries_active metric");

        let location_updates_total =
            IntCounter::new("location_updates_total", "Courier position reports ingested")
                .expect("valid location_updates_total metric");

        let eta_degraded_total = IntCounter::new(
            "eta_degraded_total",
            "ETA responses served from the straight-line fallback",
        )
        .expect("valid eta_degraded_total metric");

        let payouts_total = IntCounterVec::new(
            Opts::new("payouts_total", "Payout batch results by status"),
            &["status"],
        )
        .expect("valid payouts_total metric");

        registry
            .register(Box::new(dispatch_total.clone()))
            .expect("register dispatch_total");
        registry
            .register(Box::new(dispatch_latency_seconds.clone()))
            .expect("register dispatch_latency_seconds");
        registry
            .register(Box::new(transitions_total.clone()))
            .expect("register transitions_total");
        registry
            .register(Box::new(deliveries_active.clone()))
            .expect("register deliveries_active");
        registry
            .register(Box::new(location_updates_total.clone()))
            .expect("register location_updates_total");
        registry
            .register(Box::new(eta_degraded_total.clone()))
            .expect("register eta_degraded_total");
        registry
            .register(Box::new(payouts_total.clone()))
            .expect("register payouts_total");

        Self {
            registry,
            dispatch_total,
            dispatch_latency_seconds,
            transitions_total,
            deliveries_active,
            location_updates_total,
            eta_degraded_total,
            payouts_total,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}
