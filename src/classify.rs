//! Direction classification of flows against the local network.

use std::str::FromStr;

use crate::error::ClassificationAnomaly;
use crate::models::domain::{ClassifiedPoint, Direction, FlowEntry};
use crate::network::LocalNetwork;

/// What to do when neither endpoint of a flow is local.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnomalyPolicy {
    /// Drop only the offending entry and keep classifying.
    #[default]
    Skip,
    /// Drop the whole cycle, including entries already classified.
    /// This is how the legacy agent behaved.
    AbortBatch,
}

impl FromStr for AnomalyPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "skip" => Ok(AnomalyPolicy::Skip),
            "abort-batch" | "abort" => Ok(AnomalyPolicy::AbortBatch),
            other => Err(format!("unknown anomaly policy {other:?} (expected skip or abort-batch)")),
        }
    }
}

/// What to do when both endpoints are local (intra-LAN traffic).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IntraLanPolicy {
    /// Source wins: attribute to the sender as upload.
    #[default]
    Upload,
    /// Attribute to the receiver as download.
    Download,
    /// Not counted at all.
    Skip,
}

impl FromStr for IntraLanPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "upload" => Ok(IntraLanPolicy::Upload),
            "download" => Ok(IntraLanPolicy::Download),
            "skip" => Ok(IntraLanPolicy::Skip),
            other => Err(format!(
                "unknown intra-LAN policy {other:?} (expected upload, download or skip)"
            )),
        }
    }
}

/// Result of classifying a single entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Point(ClassifiedPoint),
    /// Intra-LAN flow dropped by [`IntraLanPolicy::Skip`].
    Ignored,
    Anomaly(ClassificationAnomaly),
}

/// Result of classifying one cycle's entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classified {
    pub points: Vec<ClassifiedPoint>,
    pub anomalies: Vec<ClassificationAnomaly>,
    pub ignored: usize,
    /// Set when [`AnomalyPolicy::AbortBatch`] threw the cycle away.
    pub aborted: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct Classifier {
    network: LocalNetwork,
    anomaly_policy: AnomalyPolicy,
    intra_lan: IntraLanPolicy,
}

impl Classifier {
    pub fn new(network: LocalNetwork) -> Self {
        Classifier {
            network,
            anomaly_policy: AnomalyPolicy::default(),
            intra_lan: IntraLanPolicy::default(),
        }
    }

    pub fn with_anomaly_policy(mut self, policy: AnomalyPolicy) -> Self {
        self.anomaly_policy = policy;
        self
    }

    pub fn with_intra_lan(mut self, policy: IntraLanPolicy) -> Self {
        self.intra_lan = policy;
        self
    }

    pub fn network(&self) -> &LocalNetwork {
        &self.network
    }

    /// Source membership is tested first, then destination.
    pub fn classify(&self, entry: &FlowEntry) -> Verdict {
        let src_local = self.network.contains_opt(entry.source.as_ref());
        let dst_local = self.network.contains_opt(entry.destination.as_ref());

        let (ip, direction) = match (entry.source, entry.destination, src_local, dst_local) {
            (Some(src), Some(dst), true, true) => match self.intra_lan {
                IntraLanPolicy::Upload => (src, Direction::Upload),
                IntraLanPolicy::Download => (dst, Direction::Download),
                IntraLanPolicy::Skip => return Verdict::Ignored,
            },
            (Some(src), _, true, _) => (src, Direction::Upload),
            (_, Some(dst), false, true) => (dst, Direction::Download),
            _ => return Verdict::Anomaly(ClassificationAnomaly::from_entry(entry)),
        };

        Verdict::Point(ClassifiedPoint {
            ip,
            direction,
            bytes: entry.bytes,
            packets: entry.packets,
        })
    }

    /// Classifies a cycle's entries, keeping their order.
    pub fn classify_all(&self, entries: &[FlowEntry]) -> Classified {
        let mut out = Classified::default();

        for entry in entries {
            match self.classify(entry) {
                Verdict::Point(point) => out.points.push(point),
                Verdict::Ignored => out.ignored += 1,
                Verdict::Anomaly(anomaly) => {
                    out.anomalies.push(anomaly);
                    if self.anomaly_policy == AnomalyPolicy::AbortBatch {
                        out.points.clear();
                        out.aborted = true;
                        break;
                    }
                }
            }
        }

        out
    }
}
