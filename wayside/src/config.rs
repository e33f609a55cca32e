use std::str::FromStr;
use std::thread;
use std::time::Duration;

use crate::input::layout::BlockId;

/// Inclusive range of block ids owned by one controller.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Partition {
    pub first: BlockId,
    pub last: BlockId,
}

impl Partition {
    pub fn new(first: BlockId, last: BlockId) -> Partition {
        if first <= last {
            Partition { first, last }
        } else {
            Partition { first: last, last: first }
        }
    }

    pub fn contains(&self, block: BlockId) -> bool {
        self.first <= block && block <= self.last
    }
}

#[derive(Debug, Fail)]
pub enum ConfigError {
    #[fail(display = "partition must look like FIRST-LAST, got {:?}", _0)]
    Partition(String),
    #[fail(display = "unknown authority model {:?} (expected external or integrated)", _0)]
    AuthorityModel(String),
}

impl FromStr for Partition {
    type Err = ConfigError;
    fn from_str(s: &str) -> Result<Partition, ConfigError> {
        let err = || ConfigError::Partition(s.to_string());
        let mut parts = s.splitn(2, '-');
        let first = parts.next().ok_or_else(err)?.trim().parse::<BlockId>().map_err(|_| err())?;
        let last = match parts.next() {
            Some(x) => x.trim().parse::<BlockId>().map_err(|_| err())?,
            None => first,
        };
        Ok(Partition::new(first, last))
    }
}

/// Where the current authority of a train comes from.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AuthorityModel {
    /// Dispatch decrements authority; every decrease is distance traveled.
    External,
    /// The engine decays authority by speed times tick period between
    /// external updates.
    Integrated,
}

impl Default for AuthorityModel {
    fn default() -> AuthorityModel { AuthorityModel::External }
}

impl FromStr for AuthorityModel {
    type Err = ConfigError;
    fn from_str(s: &str) -> Result<AuthorityModel, ConfigError> {
        match s {
            "external" => Ok(AuthorityModel::External),
            "integrated" => Ok(AuthorityModel::Integrated),
            x => Err(ConfigError::AuthorityModel(x.to_string())),
        }
    }
}

/// Bounded exponential backoff for reads and writes on the state surface.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        let clamped_attempts = max_attempts.max(1);
        let clamped_base = base_delay_ms.max(1);
        let clamped_max_delay = max_delay_ms.max(clamped_base);
        RetryPolicy {
            max_attempts: clamped_attempts,
            base_delay_ms: clamped_base,
            max_delay_ms: clamped_max_delay,
        }
    }

    /// A policy whose sleeps all fit inside a quarter of the tick.
    pub fn within_tick(tick: Duration) -> Self {
        let budget = (tick.as_millis() as u64 / 4).max(1);
        RetryPolicy::new(3, (budget / 3).max(1), budget)
    }

    fn next_delay(&self, attempt: usize) -> Duration {
        let exp = 2_u64.saturating_pow(attempt as u32);
        let delay = self.base_delay_ms.saturating_mul(exp).min(self.max_delay_ms);
        Duration::from_millis(delay)
    }

    pub fn run<F, T, E>(&self, mut op: F) -> Result<T, E>
        where F: FnMut(usize) -> Result<T, E>
    {
        let mut attempt = 0;
        loop {
            match op(attempt) {
                Ok(val) => return Ok(val),
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.max_attempts {
                        return Err(err);
                    }
                    thread::sleep(self.next_delay(attempt - 1));
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::new(3, 10, 50)
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub partition: Partition,
    /// Name of the layout route every train in this partition follows.
    pub route: String,
    pub tick: Duration,
    /// Number of blocks checked down the target branch of a switch.
    pub lookahead: usize,
    pub authority_model: AuthorityModel,
    pub retry: RetryPolicy,
}

impl EngineConfig {
    pub fn new(partition: Partition, route: &str) -> EngineConfig {
        let tick = Duration::from_millis(250);
        EngineConfig {
            partition,
            route: route.to_string(),
            tick,
            lookahead: 3,
            authority_model: AuthorityModel::default(),
            retry: RetryPolicy::within_tick(tick),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_parse() {
        assert_eq!("1-76".parse::<Partition>().unwrap(), Partition::new(1, 76));
        assert_eq!("12".parse::<Partition>().unwrap(), Partition::new(12, 12));
        assert_eq!("9-3".parse::<Partition>().unwrap(), Partition::new(3, 9));
        assert!("a-b".parse::<Partition>().is_err());
        assert!(Partition::new(3, 9).contains(9));
        assert!(!Partition::new(3, 9).contains(10));
    }

    #[test]
    fn test_retry_gives_up() {
        let policy = RetryPolicy::new(3, 1, 1);
        let mut calls = 0;
        let r: Result<(), &str> = policy.run(|_| { calls += 1; Err("down") });
        assert!(r.is_err());
        assert_eq!(calls, 3);

        let r: Result<usize, &str> = policy.run(|attempt| if attempt < 1 { Err("down") } else { Ok(attempt) });
        assert_eq!(r, Ok(1));
    }

    #[test]
    fn test_retry_fits_tick() {
        let p = RetryPolicy::within_tick(Duration::from_millis(200));
        assert!(p.max_delay_ms <= 50);
        assert_eq!(p.max_attempts, 3);
    }
}
