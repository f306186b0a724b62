use crate::snapshot::{DeviceReport, MetricKind, Reachability, SensorReading, Target};
use crate::snmp::{Oid, Session, Value, VarBind};
use std::time::Duration;
use tracing::{debug, info};

/// Carel pCO firmware reports every sensor as a fixed-point integer with one decimal digit.
pub const FIXED_POINT_DIVISOR: f64 = 10.0;

#[derive(Debug, Clone, Copy)]
pub struct SensorOid {
    pub oid: &'static [u32],
    pub kind: MetricKind,
    pub divisor: f64,
}

pub const SENSOR_OIDS: [SensorOid; 5] = [
    SensorOid {
        oid: &[1, 3, 6, 1, 4, 1, 9839, 2, 1, 2, 3, 0],
        kind: MetricKind::WaterOutletTemp,
        divisor: FIXED_POINT_DIVISOR,
    },
    SensorOid {
        oid: &[1, 3, 6, 1, 4, 1, 9839, 2, 1, 2, 4, 0],
        kind: MetricKind::WaterInletTemp,
        divisor: FIXED_POINT_DIVISOR,
    },
    SensorOid {
        oid: &[1, 3, 6, 1, 4, 1, 9839, 2, 1, 2, 5, 0],
        kind: MetricKind::AirTemp,
        divisor: FIXED_POINT_DIVISOR,
    },
    SensorOid {
        oid: &[1, 3, 6, 1, 4, 1, 9839, 2, 1, 2, 15, 0],
        kind: MetricKind::FanSpeed,
        divisor: FIXED_POINT_DIVISOR,
    },
    SensorOid {
        oid: &[1, 3, 6, 1, 4, 1, 9839, 2, 1, 2, 164, 0],
        kind: MetricKind::CompressorFrequency,
        divisor: FIXED_POINT_DIVISOR,
    },
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollFailure {
    Connect,
    Query,
}

impl PollFailure {
    pub fn as_str(self) -> &'static str {
        match self {
            PollFailure::Connect => "connect",
            PollFailure::Query => "query",
        }
    }
}

pub async fn poll(target: &Target, community: &str, timeout: Duration) -> DeviceReport {
    poll_with_outcome(target, community, timeout).await.0
}

pub async fn poll_with_outcome(
    target: &Target,
    community: &str,
    timeout: Duration,
) -> (DeviceReport, Option<PollFailure>) {
    let mut session = match Session::connect(target, community, timeout).await {
        Ok(session) => session,
        Err(err) => {
            info!(device = %target, error = %err, "не удалось подключиться к устройству");
            return (
                DeviceReport::unreachable(&target.address),
                Some(PollFailure::Connect),
            );
        }
    };

    let oids: Vec<Oid> = SENSOR_OIDS.iter().map(|s| Oid::from(s.oid)).collect();
    let varbinds = match session.get(&oids).await {
        Ok(varbinds) => varbinds,
        Err(err) => {
            info!(device = %target, error = %err, "ошибка SNMP-запроса");
            return (
                DeviceReport::unreachable(&target.address),
                Some(PollFailure::Query),
            );
        }
    };
    drop(session);

    let readings = extract_readings(&target.address, &varbinds);
    debug!(device = %target, readings = readings.len(), "устройство опрошено");
    (
        DeviceReport {
            readings,
            reachability: Reachability {
                target: target.address.clone(),
                up: true,
            },
        },
        None,
    )
}

/// Maps response varbinds onto sensor readings. Unknown OIDs and values that
/// do not decode as integers are skipped.
pub fn extract_readings(target: &str, varbinds: &[VarBind]) -> Vec<SensorReading> {
    varbinds
        .iter()
        .filter_map(|varbind| {
            let sensor = SENSOR_OIDS
                .iter()
                .find(|s| varbind.oid.arcs() == s.oid)?;
            let raw = decode_raw(&varbind.value)?;
            Some(SensorReading {
                target: target.to_string(),
                kind: sensor.kind,
                value: raw as f64 / sensor.divisor,
            })
        })
        .collect()
}

pub fn decode_raw(value: &Value) -> Option<i64> {
    match value {
        Value::Integer(v) => Some(*v),
        Value::Counter32(v) | Value::Gauge32(v) => Some(i64::from(*v)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snmp::fake::{Behaviour, FakeAgent};

    fn varbind(arcs: &[u32], value: Value) -> VarBind {
        VarBind {
            oid: Oid::from(arcs),
            value,
        }
    }

    fn all_sensors(raw: i64) -> Vec<VarBind> {
        SENSOR_OIDS
            .iter()
            .map(|s| varbind(s.oid, Value::Integer(raw)))
            .collect()
    }

    #[test]
    fn raw_values_are_scaled_by_ten() {
        let readings = extract_readings("t", &all_sensors(215));
        assert_eq!(readings.len(), 5);
        assert!(readings.iter().all(|r| r.value == 21.5));

        let readings = extract_readings("t", &all_sensors(-5));
        assert!(readings.iter().all(|r| r.value == -0.5));
    }

    #[test]
    fn absent_and_odd_values_are_skipped() {
        let varbinds = vec![
            varbind(SENSOR_OIDS[0].oid, Value::Null),
            varbind(SENSOR_OIDS[1].oid, Value::NoSuchInstance),
            varbind(SENSOR_OIDS[2].oid, Value::OctetString(b"21.5".to_vec())),
            varbind(SENSOR_OIDS[3].oid, Value::Gauge32(1200)),
            varbind(SENSOR_OIDS[4].oid, Value::Integer(450)),
            varbind(&[1, 3, 6, 1, 4, 1, 9839, 2, 1, 2, 99, 0], Value::Integer(7)),
        ];
        let readings = extract_readings("t", &varbinds);

        assert_eq!(
            readings,
            vec![
                SensorReading {
                    target: "t".to_string(),
                    kind: MetricKind::FanSpeed,
                    value: 120.0,
                },
                SensorReading {
                    target: "t".to_string(),
                    kind: MetricKind::CompressorFrequency,
                    value: 45.0,
                },
            ]
        );
    }

    #[test]
    fn sensor_table_covers_every_kind_once() {
        for kind in MetricKind::ALL {
            assert_eq!(SENSOR_OIDS.iter().filter(|s| s.kind == kind).count(), 1);
        }
    }

    #[tokio::test]
    async fn poll_reports_all_five_readings_in_one_request() {
        let agent = FakeAgent::spawn(Behaviour::Respond(all_sensors(215))).await;
        let target = agent.target();

        let (report, failure) =
            poll_with_outcome(&target, "public", Duration::from_secs(1)).await;

        assert_eq!(failure, None);
        assert!(report.reachability.up);
        assert_eq!(report.reachability.target, agent.address());
        assert_eq!(report.readings.len(), 5);
        assert_eq!(agent.requests(), vec![5]);
    }

    #[tokio::test]
    async fn missing_value_keeps_other_readings_and_up() {
        let mut varbinds = all_sensors(100);
        varbinds[2].value = Value::Null;
        let agent = FakeAgent::spawn(Behaviour::Respond(varbinds)).await;

        let report = poll(&agent.target(), "public", Duration::from_secs(1)).await;

        assert!(report.reachability.up);
        assert_eq!(report.readings.len(), 4);
        assert!(report.readings.iter().all(|r| r.kind != MetricKind::AirTemp));
    }

    #[tokio::test]
    async fn malformed_value_does_not_take_device_down() {
        let varbinds = vec![
            varbind(SENSOR_OIDS[0].oid, Value::Integer(215)),
            varbind(SENSOR_OIDS[1].oid, Value::Other(0x02, Vec::new())),
            varbind(SENSOR_OIDS[2].oid, Value::Other(0x41, vec![1, 0, 0, 0, 0])),
        ];
        let agent = FakeAgent::spawn(Behaviour::Respond(varbinds)).await;

        let (report, failure) =
            poll_with_outcome(&agent.target(), "public", Duration::from_secs(1)).await;

        assert_eq!(failure, None);
        assert!(report.reachability.up);
        assert_eq!(report.readings.len(), 1);
        assert_eq!(report.readings[0].kind, MetricKind::WaterOutletTemp);
        assert_eq!(report.readings[0].value, 21.5);
    }

    #[tokio::test]
    async fn empty_response_is_still_up() {
        let agent = FakeAgent::spawn(Behaviour::Respond(Vec::new())).await;
        let report = poll(&agent.target(), "public", Duration::from_secs(1)).await;
        assert!(report.reachability.up);
        assert!(report.readings.is_empty());
    }

    #[tokio::test]
    async fn query_failures_mark_device_down() {
        for behaviour in [
            Behaviour::Silent,
            Behaviour::ErrorStatus(2),
            Behaviour::Garbage,
        ] {
            let agent = FakeAgent::spawn(behaviour).await;
            let (report, failure) =
                poll_with_outcome(&agent.target(), "public", Duration::from_millis(200)).await;

            assert_eq!(failure, Some(PollFailure::Query));
            assert!(!report.reachability.up);
            assert!(report.readings.is_empty());
        }
    }

    #[tokio::test]
    async fn unresolvable_host_marks_device_down() {
        let target: Target = "carel-unit.invalid".parse().unwrap();
        let report = poll(&target, "public", Duration::from_millis(300)).await;

        assert!(!report.reachability.up);
        assert!(report.readings.is_empty());
        assert_eq!(report.reachability.target, "carel-unit.invalid");
    }
}
