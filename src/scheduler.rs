//! Daily morning-routine invitations.
//!
//! One job per registered user. A job fires at most once per local calendar
//! day, at the first tick at or after its trigger time. Firing only sends an
//! invitation with a start button; the flow itself starts when the user
//! presses it, so the engine's busy check still applies.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDate, NaiveTime, Timelike};
use tokio::sync::mpsc;

use crate::channels::{Keyboard, OutgoingResponse};
use crate::error::ConfigError;
use crate::flows::prompts;
use crate::store::UserRegistry;

/// Label of the invitation's single button.
pub const START_ROUTINE_BUTTON: &str = "Iniciar Rotina Matinal";

/// A proactive message produced by the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invitation {
    pub user_id: String,
    pub response: OutgoingResponse,
}

impl Invitation {
    fn morning(user_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            response: OutgoingResponse::text(prompts::MORNING_INVITATION)
                .with_keyboard(Keyboard::single(START_ROUTINE_BUTTON)),
        }
    }
}

/// Recurring daily trigger at a fixed local wall-clock time.
#[derive(Debug, Clone)]
pub struct DailyTrigger {
    time: NaiveTime,
    schedule: cron::Schedule,
}

impl DailyTrigger {
    pub fn at(time: NaiveTime) -> Result<Self, ConfigError> {
        let expr = format!("0 {} {} * * *", time.minute(), time.hour());
        let schedule = cron::Schedule::from_str(&expr).map_err(|e| ConfigError::InvalidValue {
            key: "ALEX_MORNING_TIME".into(),
            message: format!("invalid cron '{expr}': {e}"),
        })?;
        Ok(Self { time, schedule })
    }

    pub fn time(&self) -> NaiveTime {
        self.time
    }

    /// First trigger instant strictly after `after`.
    pub fn next_after(&self, after: &DateTime<Local>) -> Option<DateTime<Local>> {
        self.schedule.after(after).next()
    }
}

#[derive(Debug, Clone)]
struct Job {
    next_fire: DateTime<Local>,
    last_fired: Option<NaiveDate>,
}

/// In-memory timeline of daily jobs, rebuilt from the registry on start.
pub struct Scheduler {
    trigger: DailyTrigger,
    jobs: Mutex<HashMap<String, Job>>,
    /// In single-contact mode arming a job replaces every other one.
    single_contact: bool,
    notify_tx: mpsc::Sender<Invitation>,
}

/// Handle the flow engine uses to arm jobs for new registrations.
pub type ScheduleHandle = Arc<Scheduler>;

impl Scheduler {
    pub fn new(
        trigger: DailyTrigger,
        single_contact: bool,
        notify_tx: mpsc::Sender<Invitation>,
    ) -> Self {
        Self {
            trigger,
            jobs: Mutex::new(HashMap::new()),
            single_contact,
            notify_tx,
        }
    }

    /// Arm jobs for the persisted registrations.
    ///
    /// A registry failure is logged and leaves the scheduler idle.
    pub async fn load_from(&self, registry: &dyn UserRegistry, now: DateTime<Local>) -> usize {
        let loaded = if self.single_contact {
            registry.load().await.map(|r| r.into_iter().collect::<Vec<_>>())
        } else {
            registry.list().await
        };

        match loaded {
            Ok(registrations) => {
                for registration in &registrations {
                    self.arm_at(&registration.user_id, now);
                }
                if registrations.is_empty() {
                    tracing::info!("No registered user; scheduler idle");
                }
                registrations.len()
            }
            Err(e) => {
                tracing::warn!("Could not load registrations, scheduler idle: {}", e);
                0
            }
        }
    }

    /// Arm (or re-arm) the daily job for `user_id`.
    pub fn arm(&self, user_id: &str) {
        self.arm_at(user_id, Local::now());
    }

    pub fn arm_at(&self, user_id: &str, now: DateTime<Local>) {
        let Some(next_fire) = self.trigger.next_after(&now) else {
            tracing::error!(user_id, "Daily trigger has no upcoming fire time");
            return;
        };
        let Ok(mut jobs) = self.jobs.lock() else {
            tracing::error!("Scheduler job table poisoned");
            return;
        };
        if self.single_contact {
            jobs.retain(|id, _| id == user_id);
        }
        let job = jobs.entry(user_id.to_string()).or_insert(Job {
            next_fire,
            last_fired: None,
        });
        job.next_fire = next_fire;
        tracing::info!(
            user_id,
            at = %self.trigger.time().format("%H:%M"),
            next_fire = %next_fire,
            "Morning invitation armed"
        );
    }

    /// Users with an armed job.
    pub fn armed_users(&self) -> Vec<String> {
        self.jobs
            .lock()
            .map(|jobs| jobs.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Fire every job due at `now`. Returns the number of invitations sent.
    pub async fn tick(&self, now: DateTime<Local>) -> usize {
        let today = now.date_naive();
        let due: Vec<String> = {
            let Ok(mut jobs) = self.jobs.lock() else {
                tracing::error!("Scheduler job table poisoned");
                return 0;
            };
            let mut due = Vec::new();
            for (user_id, job) in jobs.iter_mut() {
                if now < job.next_fire {
                    continue;
                }
                if job.last_fired != Some(today) {
                    job.last_fired = Some(today);
                    due.push(user_id.clone());
                }
                if let Some(next) = self.trigger.next_after(&now) {
                    job.next_fire = next;
                }
            }
            due
        };

        for user_id in &due {
            tracing::info!(user_id = %user_id, "Sending morning invitation");
            if let Err(e) = self.notify_tx.send(Invitation::morning(user_id)).await {
                tracing::error!(user_id = %user_id, "Failed to queue invitation: {}", e);
            }
        }
        due.len()
    }
}

/// Spawn the scheduler ticker background task.
pub fn spawn_ticker(scheduler: ScheduleHandle, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            scheduler.tick(Local::now()).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::error::DatabaseError;
    use crate::store::{MemoryRegistry, UserRegistration, UserRegistry};

    fn at(day: u32, h: u32, m: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 3, day, h, m, 0).single().unwrap()
    }

    fn scheduler(single: bool) -> (Scheduler, mpsc::Receiver<Invitation>) {
        let (tx, rx) = mpsc::channel(16);
        let trigger = DailyTrigger::at(NaiveTime::from_hms_opt(8, 0, 0).unwrap()).unwrap();
        (Scheduler::new(trigger, single, tx), rx)
    }

    #[test]
    fn trigger_next_after() {
        let trigger = DailyTrigger::at(NaiveTime::from_hms_opt(8, 0, 0).unwrap()).unwrap();
        assert_eq!(trigger.next_after(&at(10, 7, 0)), Some(at(10, 8, 0)));
        assert_eq!(trigger.next_after(&at(10, 8, 0)), Some(at(11, 8, 0)));
        assert_eq!(trigger.next_after(&at(10, 23, 59)), Some(at(11, 8, 0)));
    }

    #[test]
    fn trigger_honours_minutes() {
        let trigger = DailyTrigger::at(NaiveTime::from_hms_opt(7, 45, 0).unwrap()).unwrap();
        assert_eq!(trigger.next_after(&at(10, 7, 0)), Some(at(10, 7, 45)));
    }

    #[tokio::test]
    async fn fires_once_per_day() {
        let (sched, mut rx) = scheduler(true);
        sched.arm_at("42", at(10, 6, 0));

        assert_eq!(sched.tick(at(10, 7, 59)).await, 0);
        assert_eq!(sched.tick(at(10, 8, 0)).await, 1);
        assert_eq!(sched.tick(at(10, 8, 0)).await, 0);
        assert_eq!(sched.tick(at(10, 12, 0)).await, 0);
        assert_eq!(sched.tick(at(11, 8, 0)).await, 1);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.user_id, "42");
        assert_eq!(
            first.response.keyboard,
            Some(Keyboard::single(START_ROUTINE_BUTTON))
        );
        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn late_tick_fires_once_then_resumes_schedule() {
        let (sched, _rx) = scheduler(true);
        sched.arm_at("42", at(10, 6, 0));
        // Process was suspended over the trigger time.
        assert_eq!(sched.tick(at(10, 11, 30)).await, 1);
        assert_eq!(sched.tick(at(10, 11, 31)).await, 0);
        assert_eq!(sched.tick(at(11, 8, 0)).await, 1);
    }

    #[tokio::test]
    async fn rearming_same_day_does_not_fire_twice() {
        let (sched, _rx) = scheduler(true);
        sched.arm_at("42", at(10, 6, 0));
        assert_eq!(sched.tick(at(10, 8, 0)).await, 1);
        sched.arm_at("42", at(10, 9, 0));
        assert_eq!(sched.tick(at(10, 9, 1)).await, 0);
        assert_eq!(sched.tick(at(11, 8, 0)).await, 1);
    }

    #[tokio::test]
    async fn single_contact_replaces_job() {
        let (sched, _rx) = scheduler(true);
        sched.arm_at("1", at(10, 6, 0));
        sched.arm_at("2", at(10, 6, 0));
        assert_eq!(sched.armed_users(), vec!["2".to_string()]);
    }

    #[tokio::test]
    async fn multi_user_keeps_every_job() {
        let (sched, _rx) = scheduler(false);
        sched.arm_at("1", at(10, 6, 0));
        sched.arm_at("2", at(10, 6, 0));
        assert_eq!(sched.tick(at(10, 8, 0)).await, 2);
    }

    #[tokio::test]
    async fn load_from_empty_registry_stays_idle() {
        let (sched, _rx) = scheduler(true);
        let registry = MemoryRegistry::new(true);
        assert_eq!(sched.load_from(&registry, at(10, 6, 0)).await, 0);
        assert!(sched.armed_users().is_empty());
        assert_eq!(sched.tick(at(10, 8, 0)).await, 0);
    }

    #[tokio::test]
    async fn load_from_registry_arms_registered_user() {
        let (sched, _rx) = scheduler(true);
        let registry = MemoryRegistry::new(true);
        registry.register("42").await.unwrap();
        assert_eq!(sched.load_from(&registry, at(10, 6, 0)).await, 1);
        assert_eq!(sched.armed_users(), vec!["42".to_string()]);
    }

    /// Registry whose storage is unreachable.
    struct Unreachable;

    #[async_trait::async_trait]
    impl UserRegistry for Unreachable {
        async fn register(&self, _user_id: &str) -> Result<UserRegistration, DatabaseError> {
            Err(DatabaseError::Pool("offline".into()))
        }
        async fn load(&self) -> Result<Option<UserRegistration>, DatabaseError> {
            Err(DatabaseError::Pool("offline".into()))
        }
        async fn list(&self) -> Result<Vec<UserRegistration>, DatabaseError> {
            Err(DatabaseError::Pool("offline".into()))
        }
    }

    #[tokio::test]
    async fn load_from_failing_registry_stays_idle() {
        for single in [true, false] {
            let (sched, _rx) = scheduler(single);
            assert_eq!(sched.load_from(&Unreachable, at(10, 6, 0)).await, 0);
            assert!(sched.armed_users().is_empty());
            assert_eq!(sched.tick(at(10, 8, 0)).await, 0);
        }
    }
}
