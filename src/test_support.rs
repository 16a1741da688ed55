use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use url::Url;
use wiremock::MockServer;

use crate::api::ApiRoutes;
use crate::game::StepDelay;
use crate::network_client::{Executor, Pacer, RetryPolicy};
use crate::pipeline::{AccountPipeline, PipelineSettings};
use crate::session::{Account, ContextBuilder, NetworkContext};

/// Pacer that never sleeps and remembers every wait it was asked for.
#[derive(Default)]
pub(crate) struct RecordingPacer {
    waits: Mutex<Vec<Duration>>,
}

impl RecordingPacer {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn waits(&self) -> Vec<Duration> {
        self.waits.lock().expect("pacer lock should not be poisoned").clone()
    }

    pub(crate) fn total(&self) -> Duration {
        self.waits().into_iter().sum()
    }
}

#[async_trait]
impl Pacer for RecordingPacer {
    async fn pause(&self, duration: Duration) {
        self.waits.lock().expect("pacer lock should not be poisoned").push(duration);
    }
}

pub(crate) fn test_account(name: &str) -> Account {
    Account {
        token: format!("query_id=q&user=%7B%22first_name%22%3A%22{}%22%7D", name),
        display_name: name.to_string(),
        proxy: None,
        user_agent: None,
    }
}

pub(crate) fn context_for_url(base: &str) -> NetworkContext {
    let builder = ContextBuilder::new(Url::parse(base).expect("test base url"), "/games/game-512")
        .expect("test referer");
    builder.build(&test_account("tester")).expect("test context")
}

pub(crate) fn context_for(server: &MockServer) -> NetworkContext {
    context_for_url(&server.uri())
}

/// URL of a local port nothing listens on.
pub(crate) fn closed_local_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    let port = listener.local_addr().expect("local addr").port();
    drop(listener);
    format!("http://127.0.0.1:{}", port)
}

/// Pipeline against a mock server: two attempts per call, three tiles, task id 2 excluded.
pub(crate) fn pipeline_with_pacer(server: &MockServer, pacer: Arc<RecordingPacer>) -> AccountPipeline {
    let contexts = ContextBuilder::new(Url::parse(&server.uri()).expect("mock server url"), "/games/game-512")
        .expect("test referer");
    let policy = RetryPolicy {
        max_attempts: 2,
        server_error_backoff: Duration::from_secs(5),
        rate_limit_backoff: Duration::from_secs(60),
        max_rate_limit_waits: 1,
    };
    let settings = PipelineSettings {
        tiles: vec![2, 4, 8],
        multiplier: 1,
        step_delay: StepDelay::Fixed(Duration::from_secs(10)),
        excluded_task_ids: vec![2],
    };
    AccountPipeline::new(contexts, Executor::new(policy, pacer), ApiRoutes::new(None, false), settings)
}
