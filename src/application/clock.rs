use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, Mutex};

pub type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn system_now() -> NowProvider {
    Arc::new(Utc::now)
}

/// Hand-driven time source for simulations and tests.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(now) => *now,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn set(&self, value: DateTime<Utc>) {
        match self.now.lock() {
            Ok(mut now) => *now = value,
            Err(poisoned) => *poisoned.into_inner() = value,
        }
    }

    pub fn advance(&self, seconds: i64) {
        self.set(self.now() + Duration::seconds(seconds));
    }

    pub fn provider(&self) -> NowProvider {
        let clock = self.clone();
        Arc::new(move || clock.now())
    }
}
