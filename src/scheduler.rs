use std::io::Write;
use std::time::Duration;

use chrono::{DateTime, Local, TimeDelta};
use log::{error, info};
use rand::Rng;

use crate::pipeline::AccountPipeline;
use crate::session::Account;

const COUNTDOWN_TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleTiming {
    pub base_interval: Duration,
    pub jitter_bound: Duration,
    pub inter_account_delay: Duration,
}

/// When the next pass starts. `next_run` is strictly after `computed_at`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleWindow {
    pub base_interval: Duration,
    pub jitter_bound: Duration,
    pub computed_at: DateTime<Local>,
    pub next_run: DateTime<Local>,
}

impl ScheduleWindow {
    /// `base_interval` must be non-zero; jitter is uniform in `[0, jitter_bound]`.
    pub fn compute<R: Rng + ?Sized>(
        now: DateTime<Local>,
        base_interval: Duration,
        jitter_bound: Duration,
        rng: &mut R,
    ) -> Self {
        let jitter_ms = u64::try_from(jitter_bound.as_millis()).unwrap_or(u64::MAX);
        let jitter = Duration::from_millis(rng.gen_range(0..=jitter_ms));
        let delay = base_interval.saturating_add(jitter).max(Duration::from_millis(1));
        let next_run = now + TimeDelta::from_std(delay).unwrap_or_else(|_| TimeDelta::days(365));
        Self { base_interval, jitter_bound, computed_at: now, next_run }
    }

    pub fn delay(&self) -> Duration {
        (self.next_run - self.computed_at).to_std().unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerState {
    Running,
    Idle(ScheduleWindow),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub processed: usize,
    pub failed: usize,
}

/// Runs every account strictly one after another, then idles until the next pass.
pub struct Scheduler {
    pipeline: AccountPipeline,
    timing: ScheduleTiming,
    state: SchedulerState,
}

impl Scheduler {
    pub fn new(pipeline: AccountPipeline, timing: ScheduleTiming) -> Self {
        Self { pipeline, timing, state: SchedulerState::Running }
    }

    pub fn state(&self) -> &SchedulerState {
        &self.state
    }

    /// Never returns; the process is stopped from outside. `load_accounts` is called
    /// at the start of each pass so input edits are picked up.
    pub async fn run_forever<F, E>(&mut self, mut load_accounts: F)
    where
        F: FnMut() -> Result<Vec<Account>, E>,
        E: std::fmt::Display,
    {
        loop {
            let accounts = match load_accounts() {
                Ok(accounts) => accounts,
                Err(e) => {
                    error!("Could not load accounts for this pass: {}", e);
                    Vec::new()
                }
            };
            self.run_pass(&accounts).await;
            let window = self.plan_next_run(Local::now());
            self.idle(&window).await;
        }
    }

    pub async fn run_pass(&mut self, accounts: &[Account]) -> PassSummary {
        self.state = SchedulerState::Running;
        let mut summary = PassSummary::default();
        for (index, account) in accounts.iter().enumerate() {
            info!("Processing account {}/{}: {}", index + 1, accounts.len(), account.display_name);
            if !self.pipeline.process(account).await {
                summary.failed += 1;
            }
            summary.processed += 1;

            if index + 1 < accounts.len() {
                self.pipeline.executor().pacer().pause(self.timing.inter_account_delay).await;
            }
        }
        info!(
            "Pass finished: {} accounts processed, {} failed",
            summary.processed, summary.failed
        );
        summary
    }

    /// RUNNING → IDLE.
    pub fn plan_next_run(&mut self, now: DateTime<Local>) -> ScheduleWindow {
        let window = ScheduleWindow::compute(
            now,
            self.timing.base_interval,
            self.timing.jitter_bound,
            &mut rand::thread_rng(),
        );
        info!(
            "Next run at {} (every {}s, up to {}s jitter)",
            window.next_run.format("%Y-%m-%d %H:%M:%S"),
            window.base_interval.as_secs(),
            window.jitter_bound.as_secs()
        );
        self.state = SchedulerState::Idle(window.clone());
        window
    }

    /// Counts down the window with a live readout, then IDLE → RUNNING.
    pub async fn idle(&mut self, window: &ScheduleWindow) {
        self.idle_with_clock(window, Local::now).await;
    }

    /// Remaining time is re-read from `clock` on every tick, so the wake-up lands on
    /// `next_run` however long each tick really took.
    async fn idle_with_clock<C>(&mut self, window: &ScheduleWindow, clock: C)
    where
        C: Fn() -> DateTime<Local>,
    {
        let pacer = self.pipeline.executor().pacer().clone();
        loop {
            let remaining = (window.next_run - clock()).to_std().unwrap_or_default();
            if remaining.is_zero() {
                break;
            }
            print!("\rNext run in {}   ", format_remaining(remaining));
            let _ = std::io::stdout().flush();
            pacer.pause(remaining.min(COUNTDOWN_TICK)).await;
        }
        println!();
        self.state = SchedulerState::Running;
    }
}

fn format_remaining(remaining: Duration) -> String {
    let secs = remaining.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::IDENTITY_HEADER;
    use crate::test_support::{pipeline_with_pacer, test_account, RecordingPacer};
    use serde_json::json;
    use wiremock::matchers::{header, method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn timing() -> ScheduleTiming {
        ScheduleTiming {
            base_interval: Duration::from_secs(3600),
            jitter_bound: Duration::from_secs(600),
            inter_account_delay: Duration::from_secs(20),
        }
    }

    #[test]
    fn next_run_stays_within_base_and_jitter() {
        let mut rng = rand::thread_rng();
        let base = Duration::from_secs(3600);
        let jitter = Duration::from_secs(600);
        for _ in 0..500 {
            let now = Local::now();
            let window = ScheduleWindow::compute(now, base, jitter, &mut rng);
            assert!(window.next_run > now);
            assert!(window.next_run - now >= TimeDelta::from_std(base).unwrap());
            assert!(window.next_run - now <= TimeDelta::from_std(base + jitter).unwrap());
        }
    }

    #[test]
    fn zero_jitter_is_exactly_the_base_interval() {
        let now = Local::now();
        let window = ScheduleWindow::compute(now, Duration::from_secs(90), Duration::ZERO, &mut rand::thread_rng());
        assert_eq!(window.delay(), Duration::from_secs(90));
    }

    #[tokio::test]
    async fn failing_account_does_not_stop_the_pass() {
        let server = MockServer::start().await;
        let accounts: Vec<Account> = ["a1", "a2", "a3", "a4", "a5"].iter().map(|n| test_account(n)).collect();

        Mock::given(method("POST"))
            .and(path("/api/user/auth"))
            .and(header(IDENTITY_HEADER, accounts[1].token.as_str()))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({"message": "banned"})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/user/auth"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"user": {"daily_attempts": 0}})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/api/tasks/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let pacer = RecordingPacer::new();
        let mut scheduler = Scheduler::new(pipeline_with_pacer(&server, pacer.clone()), timing());
        let summary = scheduler.run_pass(&accounts).await;

        assert_eq!(summary, PassSummary { processed: 5, failed: 1 });
        let logins: Vec<String> = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|r| r.url.path() == "/api/user/auth")
            .filter_map(|r| r.headers.get(IDENTITY_HEADER).and_then(|v| v.to_str().ok()).map(str::to_string))
            .collect();
        let expected: Vec<String> = accounts.iter().map(|a| a.token.clone()).collect();
        assert_eq!(logins, expected);
        assert_eq!(pacer.waits(), vec![Duration::from_secs(20); 4]);
    }

    #[tokio::test]
    async fn idle_counts_down_the_whole_window_then_runs_again() {
        let server = MockServer::start().await;
        let pacer = RecordingPacer::new();
        let mut scheduler = Scheduler::new(pipeline_with_pacer(&server, pacer.clone()), timing());

        let window = scheduler.plan_next_run(Local::now());
        assert!(matches!(scheduler.state(), SchedulerState::Idle(w) if *w == window));

        let waited = pacer.clone();
        let start = window.computed_at;
        let clock = move || start + TimeDelta::from_std(waited.total()).unwrap();
        scheduler.idle_with_clock(&window, clock).await;
        assert_eq!(pacer.total(), window.delay());
        assert!(pacer.waits().iter().all(|d| *d <= COUNTDOWN_TICK));
        assert_eq!(scheduler.state(), &SchedulerState::Running);
    }

    #[tokio::test]
    async fn slow_ticks_still_wake_at_next_run() {
        let server = MockServer::start().await;
        let pacer = RecordingPacer::new();
        let mut scheduler = Scheduler::new(pipeline_with_pacer(&server, pacer.clone()), timing());
        let window = scheduler.plan_next_run(Local::now());

        // every tick costs twice its nominal length on the wall clock
        let waited = pacer.clone();
        let start = window.computed_at;
        let clock = move || start + TimeDelta::from_std(waited.total() * 2).unwrap();
        scheduler.idle_with_clock(&window, clock).await;

        assert!(pacer.total() * 2 >= window.delay());
        assert!(pacer.total() < window.delay());
        assert_eq!(scheduler.state(), &SchedulerState::Running);
    }

    #[test]
    fn remaining_time_readout() {
        assert_eq!(format_remaining(Duration::from_secs(3 * 3600 + 7 * 60 + 5)), "03:07:05");
    }
}
