use chrono::{DateTime, TimeDelta, Utc};
use futures::future::{self, BoxFuture, FutureExt};
use std::time::Duration;
use tokio::sync::watch;

/// Source of wall-clock time for snapshot timestamps and scheduler deadlines
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Resolves once `now()` has reached `deadline`
    fn sleep_until(&self, deadline: DateTime<Utc>) -> BoxFuture<'static, ()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep_until(&self, deadline: DateTime<Utc>) -> BoxFuture<'static, ()> {
        let remaining = (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::time::sleep(remaining).boxed()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: watch::Sender<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        let (now, _) = watch::channel(start);
        Self { now }
    }

    pub fn advance(&self, by: Duration) {
        let delta = TimeDelta::from_std(by).unwrap_or_else(|_| TimeDelta::zero());
        self.now.send_modify(|now| *now += delta);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.borrow()
    }

    fn sleep_until(&self, deadline: DateTime<Utc>) -> BoxFuture<'static, ()> {
        let mut rx = self.now.subscribe();
        async move {
            if rx.wait_for(|now| *now >= deadline).await.is_err() {
                // Clock dropped: time never reaches the deadline
                future::pending::<()>().await;
            }
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_manual_clock_wakes_sleepers_on_advance() {
        let clock = ManualClock::default();
        let deadline = clock.now() + TimeDelta::seconds(30);
        let sleeper = tokio::spawn(clock.sleep_until(deadline));

        clock.advance(Duration::from_secs(10));
        tokio::task::yield_now().await;
        assert!(!sleeper.is_finished());

        clock.advance(Duration::from_secs(20));
        tokio::time::timeout(Duration::from_secs(1), sleeper)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_past_deadline_resolves_immediately() {
        let clock = SystemClock;
        let deadline = clock.now() - TimeDelta::seconds(5);
        tokio::time::timeout(Duration::from_millis(100), clock.sleep_until(deadline))
            .await
            .unwrap();
    }
}
