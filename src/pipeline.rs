use log::{error, info, warn};

use crate::api::{ApiRoutes, LoginResponse, TaskCategory};
use crate::game::{GameSimulator, StepDelay};
use crate::network_client::{Executor, NetworkError};
use crate::session::{Account, ContextBuilder, ContextError, NetworkContext};
use crate::tasks::TaskReconciler;

#[derive(Debug)]
pub enum PipelineError {
    Context(ContextError),
    Network(NetworkError),
    LoginUnavailable,
    MalformedLogin(serde_json::Error),
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::Context(e) => write!(f, "Could not prepare session: {}", e),
            PipelineError::Network(e) => write!(f, "{}", e),
            PipelineError::LoginUnavailable => write!(f, "Login returned no data"),
            PipelineError::MalformedLogin(e) => write!(f, "Unexpected login payload: {}", e),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PipelineError::Context(e) => Some(e),
            PipelineError::Network(e) => Some(e),
            PipelineError::LoginUnavailable => None,
            PipelineError::MalformedLogin(e) => Some(e),
        }
    }
}

impl From<ContextError> for PipelineError {
    fn from(err: ContextError) -> Self {
        PipelineError::Context(err)
    }
}

impl From<NetworkError> for PipelineError {
    fn from(err: NetworkError) -> Self {
        PipelineError::Network(err)
    }
}

/// Game and task knobs the pipeline passes down unchanged.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub tiles: Vec<u32>,
    pub multiplier: u32,
    pub step_delay: StepDelay,
    pub excluded_task_ids: Vec<i64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccountReport {
    pub daily_claimed: bool,
    pub farming_claimed: bool,
    pub tasks_completed: usize,
    pub tasks_claimed: usize,
    pub task_rewards: f64,
    pub games_played: u32,
    pub game_tokens: f64,
}

pub struct AccountPipeline {
    contexts: ContextBuilder,
    executor: Executor,
    routes: ApiRoutes,
    settings: PipelineSettings,
}

impl AccountPipeline {
    pub fn new(contexts: ContextBuilder, executor: Executor, routes: ApiRoutes, settings: PipelineSettings) -> Self {
        Self { contexts, executor, routes, settings }
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    /// Failure boundary around [`AccountPipeline::run`]. Returns whether the account
    /// finished cleanly; errors are logged here and never propagate.
    pub async fn process(&self, account: &Account) -> bool {
        match self.run(account).await {
            Ok(report) => {
                info!(
                    "[{}] Account processed successfully: {} tasks claimed (+{}), {} games (+{})",
                    account.display_name,
                    report.tasks_claimed,
                    report.task_rewards,
                    report.games_played,
                    report.game_tokens
                );
                true
            }
            Err(e) => {
                error!("[{}] Error processing account: {}", account.display_name, e);
                false
            }
        }
    }

    pub async fn run(&self, account: &Account) -> Result<AccountReport, PipelineError> {
        let ctx = self.contexts.build(account)?;
        info!("[{}] Processing account (route: {})", ctx.account(), ctx.route().redacted());

        let mut report = AccountReport::default();
        let mut login = self.login(&ctx).await?;
        match login.user.tokens {
            Some(balance) => info!("[{}] Logged in successfully, balance: {}", ctx.account(), balance),
            None => info!("[{}] Logged in successfully", ctx.account()),
        }

        let mut mutated = false;
        if login.daily_reward_available() {
            match self.executor.execute(&ctx, &self.routes.claim_daily_reward()).await.into_payload()? {
                Some(_) => {
                    report.daily_claimed = true;
                    mutated = true;
                    info!("[{}] Daily reward claimed", ctx.account());
                }
                None => warn!("[{}] Daily reward claim went unanswered", ctx.account()),
            }
        } else {
            info!("[{}] Daily reward not available", ctx.account());
        }

        if login.user.can_claim {
            if self.executor.execute(&ctx, &self.routes.claim_balance()).await.into_payload()?.is_some() {
                report.farming_claimed = true;
                mutated = true;
                info!("[{}] Farming balance claimed", ctx.account());
            }
            match self.executor.execute(&ctx, &self.routes.start_farming()).await.into_payload()? {
                Some(_) => info!("[{}] Farming restarted", ctx.account()),
                None => warn!("[{}] Farming did not restart", ctx.account()),
            }
        }

        if mutated {
            // claims change the attempt counter; use the server's current view
            login = self.login(&ctx).await?;
        }

        let reconciler = TaskReconciler::new(&self.executor, &self.routes, &self.settings.excluded_task_ids);
        for category in TaskCategory::ALL {
            let tasks = reconciler.reconcile(&ctx, category).await?;
            report.tasks_completed += tasks.completed;
            report.tasks_claimed += tasks.claimed;
            report.task_rewards += tasks.rewards;
        }

        let attempts = login.user.daily_attempts;
        info!("[{}] Available game attempts: {}", ctx.account(), attempts);
        let simulator = GameSimulator::new(&self.executor, &self.routes, self.settings.step_delay);
        for attempt in 1..=attempts {
            if let Some(result) = simulator
                .play_session(&ctx, &self.settings.tiles, self.settings.multiplier)
                .await?
            {
                report.games_played += 1;
                report.game_tokens += result.tokens;
            }
            info!("[{}] Game {}/{} done", ctx.account(), attempt, attempts);
        }

        Ok(report)
    }

    async fn login(&self, ctx: &NetworkContext) -> Result<LoginResponse, PipelineError> {
        let payload = self
            .executor
            .execute(ctx, &self.routes.login())
            .await
            .into_payload()?
            .ok_or(PipelineError::LoginUnavailable)?;
        serde_json::from_value(payload).map_err(PipelineError::MalformedLogin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{pipeline_with_pacer, test_account, RecordingPacer};
    use serde_json::{json, Value};
    use wiremock::matchers::{method, path, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn pipeline_for(server: &MockServer) -> AccountPipeline {
        pipeline_with_pacer(server, RecordingPacer::new())
    }

    async fn mount(server: &MockServer, verb: &str, route: &str, status: u16, body: Value) {
        Mock::given(method(verb))
            .and(path(route))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .mount(server)
            .await;
    }

    async fn count(server: &MockServer, route: &str) -> usize {
        server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|r| r.url.path() == route)
            .count()
    }

    #[tokio::test]
    async fn daily_claim_then_one_session_per_attempt() {
        let server = MockServer::start().await;
        mount(
            &server,
            "POST",
            "/api/user/auth",
            200,
            json!({
                "user": {"daily_attempts": 2, "can_claim": false},
                "dailyReward": {"can_claim_today": true, "is_subscribed": true}
            }),
        )
        .await;
        mount(&server, "POST", "/api/user/daily-claim", 200, json!({"message": "ok"})).await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/api/tasks/[a-z]+-tasks$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;
        mount(&server, "POST", "/api/game/start", 200, json!({"session_id": 1})).await;
        mount(&server, "POST", "/api/game/save-tile", 200, json!({})).await;
        mount(&server, "POST", "/api/game/over", 200, json!({"earn": 10})).await;

        let report = pipeline_for(&server).run(&test_account("Ann")).await.unwrap();

        assert_eq!(count(&server, "/api/user/daily-claim").await, 1);
        assert_eq!(count(&server, "/api/user/auth").await, 2);
        assert_eq!(count(&server, "/api/game/start").await, 2);
        assert_eq!(count(&server, "/api/game/over").await, 2);
        assert_eq!(count(&server, "/api/game/save-tile").await, 6);
        assert_eq!(count(&server, "/api/user/claim").await, 0);
        assert!(report.daily_claimed);
        assert_eq!(report.games_played, 2);
        assert_eq!(report.game_tokens, 20.0);

        let list_paths: Vec<String> = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|r| r.method.as_str() == "GET")
            .map(|r| r.url.path().to_string())
            .collect();
        // fetched twice per category, partner → daily → other
        assert_eq!(
            list_paths,
            vec![
                "/api/tasks/partner-tasks",
                "/api/tasks/partner-tasks",
                "/api/tasks/daily-tasks",
                "/api/tasks/daily-tasks",
                "/api/tasks/default-tasks",
                "/api/tasks/default-tasks",
            ]
        );
    }

    #[tokio::test]
    async fn farming_claim_restarts_and_refreshes_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/user/auth"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"user": {"daily_attempts": 0, "can_claim": true}})))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        mount(&server, "POST", "/api/user/auth", 200, json!({"user": {"daily_attempts": 1}})).await;
        mount(&server, "POST", "/api/user/claim", 200, json!({"claimed": 3})).await;
        mount(&server, "POST", "/api/user/start", 200, json!({})).await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/api/tasks/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;
        mount(&server, "POST", "/api/game/start", 200, json!({})).await;
        mount(&server, "POST", "/api/game/save-tile", 200, json!({})).await;
        mount(&server, "POST", "/api/game/over", 200, json!({})).await;

        let report = pipeline_for(&server).run(&test_account("Bo")).await.unwrap();

        assert!(report.farming_claimed);
        assert!(!report.daily_claimed);
        assert_eq!(count(&server, "/api/user/start").await, 1);
        assert_eq!(count(&server, "/api/user/daily-claim").await, 0);
        // attempts come from the second login
        assert_eq!(count(&server, "/api/game/over").await, 1);
    }

    #[tokio::test]
    async fn rejected_login_is_contained_by_the_boundary() {
        let server = MockServer::start().await;
        mount(&server, "POST", "/api/user/auth", 401, json!({"message": "Invalid init data"})).await;

        let pipeline = pipeline_for(&server);
        assert!(matches!(
            pipeline.run(&test_account("Cy")).await,
            Err(PipelineError::Network(NetworkError::ApiError { .. }))
        ));
        assert!(!pipeline.process(&test_account("Cy")).await);
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn bad_proxy_fails_the_account_before_any_request() {
        let server = MockServer::start().await;
        let mut account = test_account("Di");
        account.proxy = Some("garbage".to_string());

        let result = pipeline_for(&server).run(&account).await;
        assert!(matches!(result, Err(PipelineError::Context(_))));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unanswered_login_is_an_account_failure() {
        let server = MockServer::start().await;
        mount(&server, "POST", "/api/user/auth", 503, json!({})).await;

        let result = pipeline_for(&server).run(&test_account("Ed")).await;
        assert!(matches!(result, Err(PipelineError::LoginUnavailable)));
    }
}
