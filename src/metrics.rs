use crate::collectors::ScrapeStats;
use crate::snapshot::{MetricKind, Snapshot};
use prometheus::core::Collector;
use prometheus::proto::MetricFamily;
use prometheus::{opts, Counter, CounterVec, Encoder, Gauge, GaugeVec, Registry, TextEncoder};
use std::sync::Arc;

/// Exporter self-metrics. Device series are rebuilt from scratch on every
/// scrape, so only these survive between requests.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    prefix: String,
    pub exporter_scrapes_total: Counter,
    pub exporter_scrape_duration_seconds: Gauge,
    pub exporter_target_errors_total: CounterVec,
    pub exporter_targets: Gauge,
}

impl Metrics {
    pub fn new(prefix: &str) -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let exporter_scrapes_total = Counter::with_opts(opts!(
            format!("{prefix}exporter_scrapes_total"),
            "Number of device scrapes served"
        ))?;
        let exporter_scrape_duration_seconds = Gauge::with_opts(opts!(
            format!("{prefix}exporter_scrape_duration_seconds"),
            "Duration of the last scrape across all targets"
        ))?;
        let exporter_target_errors_total = CounterVec::new(
            opts!(
                format!("{prefix}exporter_target_errors_total"),
                "Failed target polls by reason"
            ),
            &["reason"],
        )?;
        let exporter_targets = Gauge::with_opts(opts!(
            format!("{prefix}exporter_targets"),
            "Number of configured targets"
        ))?;

        register(&registry, &exporter_scrapes_total)?;
        register(&registry, &exporter_scrape_duration_seconds)?;
        register(&registry, &exporter_target_errors_total)?;
        register(&registry, &exporter_targets)?;

        Ok(Arc::new(Self {
            registry,
            prefix: prefix.to_string(),
            exporter_scrapes_total,
            exporter_scrape_duration_seconds,
            exporter_target_errors_total,
            exporter_targets,
        }))
    }

    pub fn record_scrape(&self, snapshot: &Snapshot, stats: &ScrapeStats) {
        self.exporter_scrapes_total.inc();
        self.exporter_scrape_duration_seconds
            .set(snapshot.duration_seconds);
        self.exporter_targets
            .set(snapshot.reachability.len() as f64);
        for (reason, count) in stats.by_reason() {
            if count > 0 {
                self.exporter_target_errors_total
                    .with_label_values(&[reason])
                    .inc_by(count as f64);
            }
        }
    }

    pub fn encode_snapshot(&self, snapshot: &Snapshot) -> Result<Vec<u8>, prometheus::Error> {
        let mut families = snapshot_families(&self.prefix, snapshot)?;
        families.extend(self.registry.gather());
        families.sort_by(|a, b| a.get_name().cmp(b.get_name()));

        let mut buf = Vec::new();
        TextEncoder::new().encode(&families, &mut buf)?;
        Ok(buf)
    }
}

/// Gauges for one snapshot, labelled by target. Duplicate targets collapse
/// into a single series with the last written value.
fn snapshot_families(
    prefix: &str,
    snapshot: &Snapshot,
) -> Result<Vec<MetricFamily>, prometheus::Error> {
    let registry = Registry::new();

    let up = GaugeVec::new(
        opts!(format!("{prefix}up"), "Scrape of target was successful"),
        &["target"],
    )?;
    register(&registry, &up)?;

    let mut sensors = Vec::with_capacity(MetricKind::ALL.len());
    for kind in MetricKind::ALL {
        let gauge = GaugeVec::new(
            opts!(format!("{prefix}{}", kind.metric_suffix()), kind.help()),
            &["target"],
        )?;
        register(&registry, &gauge)?;
        sensors.push((kind, gauge));
    }

    for r in &snapshot.reachability {
        up.with_label_values(&[r.target.as_str()])
            .set(if r.up { 1.0 } else { 0.0 });
    }
    for reading in &snapshot.readings {
        if let Some((_, gauge)) = sensors.iter().find(|(kind, _)| *kind == reading.kind) {
            gauge
                .with_label_values(&[reading.target.as_str()])
                .set(reading.value);
        }
    }

    Ok(registry.gather())
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}
