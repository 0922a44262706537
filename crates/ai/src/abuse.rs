//! Deterministic abuse scoring.
//!
//! Model:
//! - Look at one account's recent consumption timestamps and request traces.
//! - Each heuristic that trips contributes a fixed number of points.
//! - The total (capped at 100) maps to a [`RiskVerdict`].
//!
//! Heuristics:
//! - **burst**: too many consumptions inside a short window
//! - **hourly volume**: too many consumptions inside the last hour
//! - **regular intervals**: gaps between consumptions are near-constant
//!   (coefficient of variation below a threshold), which humans don't produce
//! - **ip fan-out**: one account seen from several addresses within the hour

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use creditgate_core::AccountId;

/// One inbound request as seen by the edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestTrace {
    pub at: DateTime<Utc>,
    pub ip: Option<String>,
}

/// Input to the detector. Order of the vectors does not matter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivitySnapshot {
    pub account_id: AccountId,
    pub observed_at: DateTime<Utc>,
    /// Timestamps of consuming ledger entries.
    pub consumptions: Vec<DateTime<Utc>>,
    pub requests: Vec<RequestTrace>,
}

impl ActivitySnapshot {
    pub fn new(account_id: AccountId, observed_at: DateTime<Utc>) -> Self {
        Self {
            account_id,
            observed_at,
            consumptions: Vec::new(),
            requests: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbuseThresholds {
    pub burst_window_secs: i64,
    pub burst_limit: usize,
    pub burst_points: u32,

    pub hourly_limit: usize,
    pub hourly_points: u32,

    /// Minimum number of gaps before regularity is judged.
    pub regularity_min_intervals: usize,
    pub regularity_max_cv: f64,
    pub regularity_points: u32,

    pub ip_window_secs: i64,
    pub ip_limit: usize,
    pub ip_points: u32,

    pub suspicious_score: u32,
    pub block_score: u32,
    pub block_duration_secs: i64,
}

impl Default for AbuseThresholds {
    fn default() -> Self {
        Self {
            burst_window_secs: 60,
            burst_limit: 10,
            burst_points: 40,
            hourly_limit: 50,
            hourly_points: 25,
            regularity_min_intervals: 5,
            regularity_max_cv: 0.1,
            regularity_points: 35,
            ip_window_secs: 3600,
            ip_limit: 3,
            ip_points: 20,
            suspicious_score: 50,
            block_score: 80,
            block_duration_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum RiskSignal {
    Burst { count: usize, window_secs: i64 },
    HourlyVolume { count: usize },
    RegularIntervals { mean_secs: f64, cv: f64 },
    IpFanOut { distinct: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredSignal {
    #[serde(flatten)]
    pub signal: RiskSignal,
    pub points: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskVerdict {
    Clear,
    Suspicious,
    Block,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub account_id: AccountId,
    pub assessed_at: DateTime<Utc>,
    pub score: u32,
    pub verdict: RiskVerdict,
    pub signals: Vec<ScoredSignal>,
}

impl RiskAssessment {
    /// Human-readable reason used when the assessment closes an account.
    pub fn reason(&self) -> String {
        let names: Vec<&str> = self
            .signals
            .iter()
            .map(|s| match s.signal {
                RiskSignal::Burst { .. } => "burst",
                RiskSignal::HourlyVolume { .. } => "hourly_volume",
                RiskSignal::RegularIntervals { .. } => "regular_intervals",
                RiskSignal::IpFanOut { .. } => "ip_fan_out",
            })
            .collect();
        format!("automated abuse score {} ({})", self.score, names.join(", "))
    }
}

#[derive(Debug, Clone, Default)]
pub struct AbuseDetector {
    thresholds: AbuseThresholds,
}

impl AbuseDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_thresholds(thresholds: AbuseThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &AbuseThresholds {
        &self.thresholds
    }

    pub fn block_duration(&self) -> Duration {
        Duration::seconds(self.thresholds.block_duration_secs)
    }

    pub fn assess(&self, snapshot: &ActivitySnapshot) -> RiskAssessment {
        let t = &self.thresholds;
        let now = snapshot.observed_at;
        let hour_ago = now - Duration::hours(1);

        let mut recent: Vec<DateTime<Utc>> = snapshot
            .consumptions
            .iter()
            .copied()
            .filter(|at| *at > hour_ago && *at <= now)
            .collect();
        recent.sort();

        let mut signals = Vec::new();

        let burst_start = now - Duration::seconds(t.burst_window_secs);
        let burst = recent.iter().filter(|at| **at > burst_start).count();
        if burst >= t.burst_limit {
            signals.push(ScoredSignal {
                signal: RiskSignal::Burst {
                    count: burst,
                    window_secs: t.burst_window_secs,
                },
                points: t.burst_points,
            });
        }

        if recent.len() >= t.hourly_limit {
            signals.push(ScoredSignal {
                signal: RiskSignal::HourlyVolume { count: recent.len() },
                points: t.hourly_points,
            });
        }

        let gaps: Vec<f64> = recent
            .windows(2)
            .map(|w| (w[1] - w[0]).num_milliseconds() as f64 / 1000.0)
            .collect();
        if gaps.len() >= t.regularity_min_intervals {
            let m = mean(&gaps);
            let sd = stddev_sample(&gaps, m);
            let cv = if m > 0.0 { sd / m } else { 0.0 };
            if cv <= t.regularity_max_cv {
                signals.push(ScoredSignal {
                    signal: RiskSignal::RegularIntervals { mean_secs: m, cv },
                    points: t.regularity_points,
                });
            }
        }

        let ip_start = now - Duration::seconds(t.ip_window_secs);
        let ips: BTreeSet<&str> = snapshot
            .requests
            .iter()
            .filter(|r| r.at > ip_start && r.at <= now)
            .filter_map(|r| r.ip.as_deref())
            .collect();
        if ips.len() >= t.ip_limit {
            signals.push(ScoredSignal {
                signal: RiskSignal::IpFanOut { distinct: ips.len() },
                points: t.ip_points,
            });
        }

        let score = signals.iter().map(|s| s.points).sum::<u32>().min(100);
        let verdict = if score >= t.block_score {
            RiskVerdict::Block
        } else if score >= t.suspicious_score {
            RiskVerdict::Suspicious
        } else {
            RiskVerdict::Clear
        };

        RiskAssessment {
            account_id: snapshot.account_id,
            assessed_at: now,
            score,
            verdict,
            signals,
        }
    }
}

fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    xs.iter().sum::<f64>() / (xs.len() as f64)
}

/// Sample standard deviation (n-1).
fn stddev_sample(xs: &[f64], mean: f64) -> f64 {
    if xs.len() < 2 {
        return 0.0;
    }
    let var = xs.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>() / ((xs.len() - 1) as f64);
    var.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> ActivitySnapshot {
        ActivitySnapshot::new(AccountId::new(), Utc::now())
    }

    #[test]
    fn quiet_account_is_clear() {
        let mut s = snapshot();
        let now = s.observed_at;
        s.consumptions = vec![now - Duration::minutes(40), now - Duration::minutes(7), now - Duration::seconds(30)];

        let a = AbuseDetector::new().assess(&s);
        assert_eq!(a.verdict, RiskVerdict::Clear);
        assert_eq!(a.score, 0);
        assert!(a.signals.is_empty());
    }

    #[test]
    fn metronomic_burst_is_suspicious() {
        let mut s = snapshot();
        let now = s.observed_at;
        s.consumptions = (0..12).map(|i| now - Duration::seconds(2 * i)).collect();

        let a = AbuseDetector::new().assess(&s);
        assert_eq!(a.score, 75);
        assert_eq!(a.verdict, RiskVerdict::Suspicious);
        assert!(matches!(a.signals[0].signal, RiskSignal::Burst { count: 12, .. }));
        assert!(matches!(a.signals[1].signal, RiskSignal::RegularIntervals { .. }));
    }

    #[test]
    fn ip_fan_out_pushes_to_block() {
        let mut s = snapshot();
        let now = s.observed_at;
        s.consumptions = (0..12).map(|i| now - Duration::seconds(2 * i)).collect();
        s.requests = ["10.0.0.1", "10.0.0.2", "10.0.0.3"]
            .iter()
            .map(|ip| RequestTrace {
                at: now - Duration::minutes(5),
                ip: Some((*ip).to_string()),
            })
            .collect();

        let a = AbuseDetector::new().assess(&s);
        assert_eq!(a.score, 95);
        assert_eq!(a.verdict, RiskVerdict::Block);
        assert!(a.reason().contains("ip_fan_out"));
    }

    #[test]
    fn irregular_gaps_are_not_flagged() {
        let mut s = snapshot();
        let now = s.observed_at;
        s.consumptions = [3, 50, 61, 300, 340, 900, 2000]
            .iter()
            .map(|secs| now - Duration::seconds(*secs))
            .collect();

        let a = AbuseDetector::new().assess(&s);
        assert!(a.signals.iter().all(|s| !matches!(s.signal, RiskSignal::RegularIntervals { .. })));
    }

    #[test]
    fn activity_outside_the_hour_is_ignored() {
        let mut s = snapshot();
        let now = s.observed_at;
        s.consumptions = (0..60).map(|i| now - Duration::hours(2) - Duration::seconds(i)).collect();

        let a = AbuseDetector::new().assess(&s);
        assert_eq!(a.verdict, RiskVerdict::Clear);
    }
}
