use chrono::{DateTime, Duration, TimeZone, Utc};
use dashmap::DashSet;
use parking_lot::Mutex;
use rand::Rng;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

/// Trait for providing the current time.
/// Decouples session expiry from `Utc::now()` so tests can move the clock.
pub trait TimeProvider: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Trait for generating order ids (the merchant reference sent to the gateway).
pub trait OrderIdGenerator: Send + Sync {
    fn next_order_id(&self) -> String;
}

/// Providers shared by the session manager, orchestrator and coordinator.
#[derive(Clone)]
pub struct RuntimeContext {
    pub clock: Arc<dyn TimeProvider>,
    pub order_ids: Arc<dyn OrderIdGenerator>,
}

impl RuntimeContext {
    pub fn new_system() -> Self {
        let clock: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
        Self {
            order_ids: Arc::new(TimestampOrderIds::new(clock.clone())),
            clock,
        }
    }

    pub fn new_simulated(start_time_ms: i64) -> Self {
        Self {
            clock: Arc::new(SimulatedTimeProvider::new(start_time_ms)),
            order_ids: Arc::new(SequentialOrderIds::new("ORD")),
        }
    }
}

// --- Live Implementations ---

pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// `ORD` + `yyyyMMddHHmmss` + first millisecond digit + 6-digit random suffix.
///
/// Ids handed out are remembered for the life of the process, so a collision
/// on the random suffix is redrawn instead of returned twice.
pub struct TimestampOrderIds {
    clock: Arc<dyn TimeProvider>,
    issued: DashSet<String>,
}

impl TimestampOrderIds {
    pub fn new(clock: Arc<dyn TimeProvider>) -> Self {
        Self {
            clock,
            issued: DashSet::new(),
        }
    }

    fn candidate(&self) -> String {
        let now = self.clock.now();
        let tenths = now.timestamp_subsec_millis() / 100;
        let suffix: u32 = rand::thread_rng().gen_range(100_000..=999_999);
        format!("ORD{}{}{}", now.format("%Y%m%d%H%M%S"), tenths, suffix)
    }
}

impl OrderIdGenerator for TimestampOrderIds {
    fn next_order_id(&self) -> String {
        loop {
            let id = self.candidate();
            if self.issued.insert(id.clone()) {
                return id;
            }
        }
    }
}

// --- Simulated Implementations ---

pub struct SimulatedTimeProvider {
    current_time_ms: AtomicI64,
}

impl SimulatedTimeProvider {
    pub fn new(start_time_ms: i64) -> Self {
        Self {
            current_time_ms: AtomicI64::new(start_time_ms),
        }
    }

    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self::new(start.timestamp_millis())
    }

    pub fn set_time(&self, time: DateTime<Utc>) {
        self.current_time_ms
            .store(time.timestamp_millis(), Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.current_time_ms
            .fetch_add(by.num_milliseconds(), Ordering::SeqCst);
    }
}

impl TimeProvider for SimulatedTimeProvider {
    fn now(&self) -> DateTime<Utc> {
        let ms = self.current_time_ms.load(Ordering::SeqCst);
        Utc.timestamp_millis_opt(ms)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

pub struct SequentialOrderIds {
    prefix: String,
    counter: Mutex<u64>,
}

impl SequentialOrderIds {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: Mutex::new(0),
        }
    }
}

impl OrderIdGenerator for SequentialOrderIds {
    fn next_order_id(&self) -> String {
        let mut num = self.counter.lock();
        *num += 1;
        format!("{}{:06}", self.prefix, *num)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_timestamp_order_id_shape() {
        let start = "2024-03-05T07:08:09.456Z".parse::<DateTime<Utc>>().unwrap();
        let clock = Arc::new(SimulatedTimeProvider::starting_at(start));
        let ids = TimestampOrderIds::new(clock);

        let id = ids.next_order_id();
        assert!(id.starts_with("ORD202403050708094"), "got {}", id);
        assert_eq!(id.len(), 3 + 15 + 6);

        let suffix: u32 = id[18..].parse().unwrap();
        assert!((100_000..=999_999).contains(&suffix));
    }

    #[test]
    fn test_timestamp_order_ids_never_repeat_on_frozen_clock() {
        let clock = Arc::new(SimulatedTimeProvider::new(1_700_000_000_000));
        let ids = TimestampOrderIds::new(clock);
        let seen: HashSet<String> = (0..2_000).map(|_| ids.next_order_id()).collect();
        assert_eq!(seen.len(), 2_000);
    }

    #[test]
    fn test_simulated_clock_advances() {
        let clock = SimulatedTimeProvider::new(0);
        clock.advance(Duration::minutes(5));
        assert_eq!(clock.now().timestamp(), 300);

        let later = "2030-01-01T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        clock.set_time(later);
        assert_eq!(clock.now(), later);
    }

    #[test]
    fn test_sequential_ids() {
        let ctx = RuntimeContext::new_simulated(0);
        assert_eq!(ctx.order_ids.next_order_id(), "ORD000001");
        assert_eq!(ctx.order_ids.next_order_id(), "ORD000002");
    }
}
