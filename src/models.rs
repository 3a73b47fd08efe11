pub mod domain {
    use std::fmt;
    use std::net::IpAddr;

    use chrono::{DateTime, Utc};

    /// One accounting record as reported by the router.
    ///
    /// Addresses that failed to parse are kept as `None` so the record still
    /// flows through classification, where it is rejected deterministically.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FlowEntry {
        pub source: Option<IpAddr>,
        pub destination: Option<IpAddr>,
        pub bytes: u64,
        pub packets: u64,
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum Direction {
        Upload,
        Download,
    }

    impl Direction {
        pub fn as_str(&self) -> &'static str {
            match self {
                Direction::Upload => "upload",
                Direction::Download => "download",
            }
        }
    }

    impl fmt::Display for Direction {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.as_str())
        }
    }

    /// A flow attributed to its local endpoint.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct ClassifiedPoint {
        pub ip: IpAddr,
        pub direction: Direction,
        pub bytes: u64,
        pub packets: u64,
    }

    /// The points of a single cycle, in parse order, stamped at write time.
    #[derive(Debug, Clone)]
    pub struct Batch {
        pub points: Vec<ClassifiedPoint>,
        pub timestamp: DateTime<Utc>,
    }

    impl Batch {
        pub fn new(points: Vec<ClassifiedPoint>) -> Self {
            Batch {
                points,
                timestamp: Utc::now(),
            }
        }

        pub fn len(&self) -> usize {
            self.points.len()
        }

        pub fn is_empty(&self) -> bool {
            self.points.is_empty()
        }

        /// Write-time instant in microseconds since the Unix epoch.
        pub fn timestamp_micros(&self) -> i64 {
            self.timestamp.timestamp_micros()
        }
    }
}

pub mod dto {
    use super::domain::ClassifiedPoint;

    pub const MEASUREMENT: &str = "usage";

    /// Tag/field view of a point, in the shape the sink expects.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct UsagePoint {
        pub ip: String,
        pub direction: &'static str,
        pub bytes: u64,
        pub packets: u64,
    }

    impl From<&ClassifiedPoint> for UsagePoint {
        fn from(point: &ClassifiedPoint) -> Self {
            UsagePoint {
                ip: point.ip.to_string(),
                direction: point.direction.as_str(),
                bytes: point.bytes,
                packets: point.packets,
            }
        }
    }
}
