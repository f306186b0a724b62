use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const DEFAULT_SNMP_PORT: u16 = 161;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    /// Address exactly as configured; used as the `target` label.
    pub address: String,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TargetParseError {
    #[error("пустой адрес цели")]
    Empty,
    #[error("в адресе '{0}' не указан хост")]
    MissingHost(String),
    #[error("некорректный порт в адресе '{0}'")]
    InvalidPort(String),
}

impl FromStr for Target {
    type Err = TargetParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let address = s.trim();
        if address.is_empty() {
            return Err(TargetParseError::Empty);
        }

        let (host, port) = if let Some(rest) = address.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| TargetParseError::MissingHost(address.to_string()))?;
            let port = match tail {
                "" => None,
                tail => Some(
                    tail.strip_prefix(':')
                        .ok_or_else(|| TargetParseError::InvalidPort(address.to_string()))?,
                ),
            };
            (host, port)
        } else if address.matches(':').count() > 1 {
            (address, None)
        } else {
            match address.split_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (address, None),
            }
        };

        if host.is_empty() {
            return Err(TargetParseError::MissingHost(address.to_string()));
        }
        let port = match port {
            None => DEFAULT_SNMP_PORT,
            Some(p) => p
                .parse::<u16>()
                .ok()
                .filter(|p| *p != 0)
                .ok_or_else(|| TargetParseError::InvalidPort(address.to_string()))?,
        };

        Ok(Self {
            address: address.to_string(),
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    WaterOutletTemp,
    WaterInletTemp,
    AirTemp,
    FanSpeed,
    CompressorFrequency,
}

impl MetricKind {
    pub const ALL: [MetricKind; 5] = [
        MetricKind::WaterOutletTemp,
        MetricKind::WaterInletTemp,
        MetricKind::AirTemp,
        MetricKind::FanSpeed,
        MetricKind::CompressorFrequency,
    ];

    pub fn metric_suffix(self) -> &'static str {
        match self {
            MetricKind::WaterOutletTemp => "water_outlet_temp",
            MetricKind::WaterInletTemp => "water_inlet_temp",
            MetricKind::AirTemp => "air_temp",
            MetricKind::FanSpeed => "fan_speed",
            MetricKind::CompressorFrequency => "compressor_frequency",
        }
    }

    pub fn help(self) -> &'static str {
        match self {
            MetricKind::WaterOutletTemp => "Water outlet temperature",
            MetricKind::WaterInletTemp => "Water inlet temperature",
            MetricKind::AirTemp => "Air temperature",
            MetricKind::FanSpeed => "Fan speed",
            MetricKind::CompressorFrequency => "Compressor frequency",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorReading {
    pub target: String,
    pub kind: MetricKind,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reachability {
    pub target: String,
    pub up: bool,
}

/// Outcome of polling one device: zero to five readings plus exactly one reachability flag.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceReport {
    pub readings: Vec<SensorReading>,
    pub reachability: Reachability,
}

impl DeviceReport {
    pub fn unreachable(target: &str) -> Self {
        Self {
            readings: Vec::new(),
            reachability: Reachability {
                target: target.to_string(),
                up: false,
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Snapshot {
    pub readings: Vec<SensorReading>,
    pub reachability: Vec<Reachability>,
    pub duration_seconds: f64,
}

impl Snapshot {
    pub fn push(&mut self, report: DeviceReport) {
        self.readings.extend(report.readings);
        self.reachability.push(report.reachability);
    }

    pub fn readings_for<'a>(&'a self, target: &'a str) -> impl Iterator<Item = &'a SensorReading> {
        self.readings.iter().filter(move |r| r.target == target)
    }

    pub fn reachability_for<'a>(
        &'a self,
        target: &'a str,
    ) -> impl Iterator<Item = &'a Reachability> {
        self.reachability.iter().filter(move |r| r.target == target)
    }

    pub fn up_count(&self) -> usize {
        self.reachability.iter().filter(|r| r.up).count()
    }

    pub fn down_count(&self) -> usize {
        self.reachability.len() - self.up_count()
    }
}
