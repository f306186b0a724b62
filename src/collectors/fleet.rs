use super::device::{self, PollFailure};
use crate::config::{Config, ConfigError};
use crate::snapshot::{DeviceReport, Snapshot, Target};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::{JoinError, JoinSet};
use tokio::time;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScrapeStats {
    pub connect_errors: u64,
    pub query_errors: u64,
    pub deadline_exceeded: u64,
    pub panicked: u64,
}

impl ScrapeStats {
    fn record(&mut self, failure: Option<PollFailure>) {
        match failure {
            Some(PollFailure::Connect) => self.connect_errors += 1,
            Some(PollFailure::Query) => self.query_errors += 1,
            None => {}
        }
    }

    pub fn by_reason(&self) -> [(&'static str, u64); 4] {
        [
            (PollFailure::Connect.as_str(), self.connect_errors),
            (PollFailure::Query.as_str(), self.query_errors),
            ("deadline", self.deadline_exceeded),
            ("panic", self.panicked),
        ]
    }
}

/// Polls every configured device concurrently and merges the results.
///
/// Duplicate addresses are not collapsed: each entry in the target list gets
/// its own poll and its own reachability entry. There are no retries; the
/// caller's scrape cadence decides how often devices are asked again.
pub struct FleetCollector {
    targets: Arc<[Target]>,
    community: Arc<str>,
    timeout: Duration,
    scrape_timeout: Duration,
}

impl FleetCollector {
    pub fn new(cfg: &Config) -> Result<Self, ConfigError> {
        Ok(Self::with_targets(
            cfg.parsed_targets()?,
            &cfg.snmp.community,
            cfg.timeout(),
            cfg.scrape_timeout(),
        ))
    }

    pub fn with_targets(
        targets: Vec<Target>,
        community: &str,
        timeout: Duration,
        scrape_timeout: Duration,
    ) -> Self {
        Self {
            targets: targets.into(),
            community: Arc::from(community),
            timeout,
            scrape_timeout,
        }
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    pub async fn scrape(&self) -> (Snapshot, ScrapeStats) {
        let started = Instant::now();
        let deadline = time::Instant::now() + self.scrape_timeout;

        let mut tasks = JoinSet::new();
        for (index, target) in self.targets.iter().enumerate() {
            let target = target.clone();
            let community = Arc::clone(&self.community);
            let timeout = self.timeout;
            tasks.spawn(async move {
                let outcome = device::poll_with_outcome(&target, &community, timeout).await;
                (index, outcome)
            });
        }

        let mut slots: Vec<Option<DeviceReport>> = (0..self.targets.len()).map(|_| None).collect();
        let mut stats = ScrapeStats::default();
        let deadline_hit = collect_until(&mut tasks, deadline, &mut slots, &mut stats).await;
        if deadline_hit {
            warn!(
                pending = slots.iter().filter(|s| s.is_none()).count(),
                scrape_timeout_ms = self.scrape_timeout.as_millis() as u64,
                "превышен дедлайн скрейпа, незавершённые опросы отменены"
            );
        }

        let mut snapshot = Snapshot::default();
        for (slot, target) in slots.into_iter().zip(self.targets.iter()) {
            match slot {
                Some(report) => snapshot.push(report),
                None => {
                    if deadline_hit {
                        stats.deadline_exceeded += 1;
                    }
                    snapshot.push(DeviceReport::unreachable(&target.address));
                }
            }
        }
        snapshot.duration_seconds = started.elapsed().as_secs_f64();

        debug!(
            targets = self.targets.len(),
            up = snapshot.up_count(),
            down = snapshot.down_count(),
            readings = snapshot.readings.len(),
            duration_seconds = snapshot.duration_seconds,
            "скрейп завершён"
        );
        (snapshot, stats)
    }
}

type IndexedOutcome = (usize, (DeviceReport, Option<PollFailure>));

/// Fills `slots` from finished tasks until the set is empty or `deadline` passes.
/// Returns `true` when the deadline cut the wait short; the remaining tasks are aborted.
async fn collect_until(
    tasks: &mut JoinSet<IndexedOutcome>,
    deadline: time::Instant,
    slots: &mut [Option<DeviceReport>],
    stats: &mut ScrapeStats,
) -> bool {
    loop {
        match time::timeout_at(deadline, tasks.join_next()).await {
            Ok(Some(joined)) => settle(joined, slots, stats),
            Ok(None) => return false,
            Err(_elapsed) => {
                // Tasks that finished while the deadline fired still count.
                while let Some(joined) = tasks.try_join_next() {
                    settle(joined, slots, stats);
                }
                tasks.abort_all();
                return true;
            }
        }
    }
}

fn settle(
    joined: Result<IndexedOutcome, JoinError>,
    slots: &mut [Option<DeviceReport>],
    stats: &mut ScrapeStats,
) {
    match joined {
        Ok((index, (report, failure))) => {
            stats.record(failure);
            slots[index] = Some(report);
        }
        Err(err) if err.is_cancelled() => {}
        Err(err) => {
            warn!(error = %err, "задача опроса устройства завершилась аварийно");
            stats.panicked += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::device::SENSOR_OIDS;
    use crate::snmp::fake::{Behaviour, FakeAgent};
    use crate::snmp::{Oid, Value, VarBind};

    fn all_sensors(raw: i64) -> Vec<VarBind> {
        SENSOR_OIDS
            .iter()
            .map(|s| VarBind {
                oid: Oid::from(s.oid),
                value: Value::Integer(raw),
            })
            .collect()
    }

    fn collector(targets: Vec<Target>, timeout: Duration, scrape_timeout: Duration) -> FleetCollector {
        FleetCollector::with_targets(targets, "public", timeout, scrape_timeout)
    }

    #[tokio::test]
    async fn one_reachability_per_target_and_failures_isolated() {
        let good = FakeAgent::spawn(Behaviour::Respond(all_sensors(215))).await;
        let silent = FakeAgent::spawn(Behaviour::Silent).await;
        let fleet = collector(
            vec![good.target(), silent.target()],
            Duration::from_millis(300),
            Duration::from_secs(5),
        );

        let (snapshot, stats) = fleet.scrape().await;

        assert_eq!(snapshot.reachability.len(), 2);
        assert_eq!(snapshot.readings_for(&good.address()).count(), 5);
        assert_eq!(snapshot.readings_for(&silent.address()).count(), 0);
        assert!(snapshot.reachability_for(&good.address()).all(|r| r.up));
        assert!(snapshot.reachability_for(&silent.address()).all(|r| !r.up));
        assert_eq!(stats.query_errors, 1);
        assert_eq!(stats.deadline_exceeded, 0);
    }

    #[tokio::test]
    async fn duplicate_targets_are_polled_independently() {
        let agent = FakeAgent::spawn(Behaviour::Respond(all_sensors(100))).await;
        let fleet = collector(
            vec![agent.target(), agent.target()],
            Duration::from_secs(1),
            Duration::from_secs(5),
        );

        let (snapshot, _) = fleet.scrape().await;

        assert_eq!(snapshot.reachability_for(&agent.address()).count(), 2);
        assert_eq!(snapshot.readings.len(), 10);
        assert_eq!(agent.requests().len(), 2);
    }

    #[tokio::test]
    async fn consecutive_scrapes_are_value_equal() {
        let agent = FakeAgent::spawn(Behaviour::Respond(all_sensors(-5))).await;
        let fleet = collector(
            vec![agent.target()],
            Duration::from_secs(1),
            Duration::from_secs(5),
        );

        let (first, _) = fleet.scrape().await;
        let (second, _) = fleet.scrape().await;

        assert_eq!(first.readings, second.readings);
        assert_eq!(first.reachability, second.reachability);
        assert!(first.readings.iter().all(|r| r.value == -0.5));
    }

    #[tokio::test]
    async fn one_hung_device_does_not_multiply_scrape_time() {
        let mut agents = Vec::new();
        for _ in 0..49 {
            agents.push(FakeAgent::spawn(Behaviour::Respond(all_sensors(215))).await);
        }
        let hung = FakeAgent::spawn(Behaviour::Silent).await;

        let mut targets: Vec<Target> = agents.iter().map(|a| a.target()).collect();
        targets.push(hung.target());
        let fleet = collector(targets, Duration::from_millis(500), Duration::from_secs(10));

        let started = Instant::now();
        let (snapshot, _) = fleet.scrape().await;
        let elapsed = started.elapsed();

        assert!(elapsed < Duration::from_secs(3), "скрейп занял {elapsed:?}");
        assert_eq!(snapshot.reachability.len(), 50);
        assert_eq!(snapshot.up_count(), 49);
        assert_eq!(snapshot.readings.len(), 49 * 5);
        assert!(snapshot.reachability_for(&hung.address()).all(|r| !r.up));
    }

    #[tokio::test]
    async fn overall_deadline_cancels_pending_devices() {
        let good = FakeAgent::spawn(Behaviour::Respond(all_sensors(215))).await;
        let silent = FakeAgent::spawn(Behaviour::Silent).await;
        let fleet = collector(
            vec![silent.target(), good.target()],
            Duration::from_secs(5),
            Duration::from_millis(300),
        );

        let started = Instant::now();
        let (snapshot, stats) = fleet.scrape().await;

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(snapshot.reachability.len(), 2);
        assert_eq!(snapshot.reachability[0].target, silent.address());
        assert!(!snapshot.reachability[0].up);
        assert!(snapshot.reachability[1].up);
        assert_eq!(stats.deadline_exceeded, 1);
    }

    #[tokio::test]
    async fn finished_devices_are_kept_when_deadline_fires() {
        let mut tasks: JoinSet<IndexedOutcome> = JoinSet::new();
        tasks.spawn(async {
            let report = DeviceReport {
                readings: Vec::new(),
                reachability: crate::snapshot::Reachability {
                    target: "done".to_string(),
                    up: true,
                },
            };
            (0, (report, None))
        });
        tasks.spawn(async {
            std::future::pending::<()>().await;
            (1, (DeviceReport::unreachable("hung"), None))
        });
        time::sleep(Duration::from_millis(50)).await;

        let mut slots = vec![None, None];
        let mut stats = ScrapeStats::default();
        let deadline_hit =
            collect_until(&mut tasks, time::Instant::now(), &mut slots, &mut stats).await;

        assert!(deadline_hit);
        assert!(slots[0].as_ref().is_some_and(|r| r.reachability.up));
        assert!(slots[1].is_none());
        assert_eq!(stats, ScrapeStats::default());
    }

    #[tokio::test]
    async fn empty_target_list_yields_empty_snapshot() {
        let fleet = collector(Vec::new(), Duration::from_secs(1), Duration::from_secs(1));
        let (snapshot, stats) = fleet.scrape().await;
        assert!(snapshot.reachability.is_empty());
        assert_eq!(stats, ScrapeStats::default());
    }
}
