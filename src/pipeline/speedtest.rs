//! Network-performance headline metrics from speed-test samples

use super::buckets::MS_DAY;
use super::types::deserialize_timestamp_ms;
use serde::{Deserialize, Serialize};

/// One speed-test run; bandwidth in bytes per second
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "RawSpeedtest")]
pub struct SpeedtestSample {
    pub timestamp: i64,
    pub download_bandwidth: u64,
    pub upload_bandwidth: u64,
    pub ping_ms: f64,
    pub packet_loss: f64,
}

#[derive(Deserialize)]
struct Bandwidth {
    #[serde(default)]
    bandwidth: u64,
}

#[derive(Deserialize)]
struct PingResult {
    #[serde(default)]
    latency: f64,
}

/// Shape produced by the speed-test runner
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSpeedtest {
    #[serde(deserialize_with = "deserialize_timestamp_ms")]
    timestamp: i64,
    download: Bandwidth,
    upload: Bandwidth,
    ping: PingResult,
    #[serde(default)]
    packet_loss: f64,
}

impl From<RawSpeedtest> for SpeedtestSample {
    fn from(raw: RawSpeedtest) -> Self {
        Self {
            timestamp: raw.timestamp,
            download_bandwidth: raw.download.bandwidth,
            upload_bandwidth: raw.upload.bandwidth,
            ping_ms: raw.ping.latency,
            packet_loss: raw.packet_loss,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleTotals {
    #[serde(default)]
    pub sum: u64,
    /// Samples in the last 24 hours
    #[serde(default)]
    pub trending: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvgLast {
    /// Integer mean over the last 7 days
    #[serde(default)]
    pub avg: u64,
    /// Newest sample within the last 24 hours, 0 if none
    #[serde(default)]
    pub last: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeedtestTrend {
    #[serde(default)]
    pub total: SampleTotals,
    #[serde(default)]
    pub download: AvgLast,
    #[serde(default)]
    pub upload: AvgLast,
    #[serde(default)]
    pub ping: AvgLast,
}

impl SpeedtestTrend {
    pub fn compute(samples: &[SpeedtestSample], now: i64) -> Self {
        let day_ago = now - MS_DAY;
        let week_ago = now - 7 * MS_DAY;
        let in_window = |s: &&SpeedtestSample, from: i64| s.timestamp >= from && s.timestamp <= now;

        let week: Vec<&SpeedtestSample> = samples.iter().filter(|s| in_window(s, week_ago)).collect();
        let mean = |f: fn(&SpeedtestSample) -> u64| -> u64 {
            if week.is_empty() {
                0
            } else {
                week.iter().map(|&s| f(s)).sum::<u64>() / week.len() as u64
            }
        };

        let latest = samples
            .iter()
            .filter(|s| in_window(s, day_ago))
            .max_by_key(|s| s.timestamp);

        Self {
            total: SampleTotals {
                sum: samples.len() as u64,
                trending: samples.iter().filter(|s| in_window(s, day_ago)).count() as u64,
            },
            download: AvgLast {
                avg: mean(|s| s.download_bandwidth),
                last: latest.map_or(0, |s| s.download_bandwidth),
            },
            upload: AvgLast {
                avg: mean(|s| s.upload_bandwidth),
                last: latest.map_or(0, |s| s.upload_bandwidth),
            },
            ping: AvgLast {
                avg: mean(|s| s.ping_ms as u64),
                last: latest.map_or(0, |s| s.ping_ms as u64),
            },
        }
    }
}

/// Bytes per second to megabits per second, one decimal
pub fn bytes_to_mbps(bytes_per_sec: u64) -> f64 {
    let mbps = bytes_per_sec as f64 * 8.0 / 1_000_000.0;
    (mbps * 10.0).round() / 10.0
}

/// Relative change in percent; a zero baseline yields 0 (no change) or 100
pub fn percent_change(current: f64, baseline: f64) -> f64 {
    if baseline == 0.0 {
        if current == 0.0 {
            0.0
        } else {
            100.0
        }
    } else {
        (current - baseline) / baseline * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::buckets::MS_HOUR;

    const NOW: i64 = 1_704_067_200_000;

    fn sample(timestamp: i64, down: u64, up: u64, ping: f64) -> SpeedtestSample {
        SpeedtestSample {
            timestamp,
            download_bandwidth: down,
            upload_bandwidth: up,
            ping_ms: ping,
            packet_loss: 0.0,
        }
    }

    #[test]
    fn test_compute_trend() {
        let samples = vec![
            sample(NOW - 30 * MS_DAY, 9_000, 9_000, 90.0), // counted in sum only
            sample(NOW - 3 * MS_DAY, 1_000, 100, 20.0),
            sample(NOW - 2 * MS_HOUR, 2_000, 300, 10.0),
            sample(NOW - MS_HOUR, 3_000, 200, 15.9),
        ];

        let trend = SpeedtestTrend::compute(&samples, NOW);
        assert_eq!(trend.total, SampleTotals { sum: 4, trending: 2 });
        assert_eq!(trend.download, AvgLast { avg: 2_000, last: 3_000 });
        assert_eq!(trend.upload, AvgLast { avg: 200, last: 200 });
        assert_eq!(trend.ping, AvgLast { avg: 15, last: 15 });
    }

    #[test]
    fn test_no_recent_samples() {
        let samples = vec![sample(NOW - 3 * MS_DAY, 1_000, 100, 20.0)];
        let trend = SpeedtestTrend::compute(&samples, NOW);
        assert_eq!(trend.total.trending, 0);
        assert_eq!(trend.download.last, 0);
        assert_eq!(trend.download.avg, 1_000);

        assert_eq!(SpeedtestTrend::compute(&[], NOW), SpeedtestTrend::default());
    }

    #[test]
    fn test_decode_runner_sample() {
        let json = r#"{
            "timestamp": "2023-12-31T23:00:00Z",
            "download": {"bandwidth": 11750000, "bytes": 1, "elapsed": 2},
            "upload": {"bandwidth": 2500000},
            "ping": {"latency": 12.5, "jitter": 0.4},
            "packetLoss": 0.5,
            "isp": "ExampleNet"
        }"#;
        let s: SpeedtestSample = serde_json::from_str(json).unwrap();
        assert_eq!(s.timestamp, NOW - MS_HOUR);
        assert_eq!(s.download_bandwidth, 11_750_000);
        assert_eq!(s.ping_ms, 12.5);
        assert_eq!(s.packet_loss, 0.5);
    }

    #[test]
    fn test_bytes_to_mbps() {
        assert_eq!(bytes_to_mbps(11_750_000), 94.0);
        assert_eq!(bytes_to_mbps(1_234_567), 9.9);
        assert_eq!(bytes_to_mbps(0), 0.0);
    }

    #[test]
    fn test_percent_change() {
        assert_eq!(percent_change(0.0, 0.0), 0.0);
        assert_eq!(percent_change(5.0, 0.0), 100.0);
        assert_eq!(percent_change(150.0, 100.0), 50.0);
        assert_eq!(percent_change(50.0, 100.0), -50.0);
    }
}
