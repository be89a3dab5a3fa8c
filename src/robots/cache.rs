use crate::robots::parser::ParsedRobots;
use chrono::{DateTime, Duration, Utc};

/// Parsed robots.txt with the time it was fetched and how long it stays valid
#[derive(Debug, Clone)]
pub struct CachedRobots {
    pub robots: ParsedRobots,
    pub fetched_at: DateTime<Utc>,
    pub ttl: Duration,
}

impl CachedRobots {
    pub fn new(robots: ParsedRobots, ttl: Duration) -> Self {
        Self {
            robots,
            fetched_at: Utc::now(),
            ttl,
        }
    }

    /// Whether the entry has outlived its TTL
    pub fn is_stale(&self) -> bool {
        self.age() > self.ttl
    }

    pub fn age(&self) -> Duration {
        Utc::now() - self.fetched_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_entry() {
        let cached = CachedRobots::new(ParsedRobots::allow_all(), Duration::hours(24));
        assert!(!cached.is_stale());
    }

    #[test]
    fn test_stale_after_ttl() {
        let mut cached = CachedRobots::new(ParsedRobots::allow_all(), Duration::hours(24));
        cached.fetched_at = Utc::now() - Duration::hours(25);
        assert!(cached.is_stale());

        cached.fetched_at = Utc::now() - Duration::hours(23);
        assert!(!cached.is_stale());
    }

    #[test]
    fn test_short_failure_ttl() {
        let mut cached = CachedRobots::new(ParsedRobots::allow_all(), Duration::hours(1));
        cached.fetched_at = Utc::now() - Duration::minutes(61);
        assert!(cached.is_stale());
        assert!(cached.age().num_minutes() >= 61);
    }
}
