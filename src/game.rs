use std::time::Duration;

use log::{debug, info, warn};
use rand::Rng;
use serde_json::Value;

use crate::api::{ApiRoutes, GameOverResponse, GameStartResponse};
use crate::network_client::{Executor, NetworkError, RetryOutcome};
use crate::session::NetworkContext;

/// Wait before each progress report. The server rejects sessions that advance
/// faster than a person could play, so this is part of the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepDelay {
    Fixed(Duration),
    Range { min: Duration, max: Duration },
}

impl StepDelay {
    pub fn draw(&self) -> Duration {
        match *self {
            StepDelay::Fixed(d) => d,
            StepDelay::Range { min, max } if min < max => rand::thread_rng().gen_range(min..=max),
            StepDelay::Range { min, .. } => min,
        }
    }
}

/// Server-side session being driven through its tile progression.
#[derive(Debug, Clone)]
pub struct GameSession {
    /// Absent on deployments whose game endpoints are not session-keyed.
    pub session_id: Option<Value>,
    pub tiles: Vec<u32>,
    pub step: usize,
    pub multiplier: u32,
}

impl GameSession {
    fn max_tile(&self) -> u32 {
        self.tiles.last().copied().unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionResult {
    pub tokens: f64,
    pub experience: f64,
    pub level: Option<u32>,
}

pub struct GameSimulator<'a> {
    executor: &'a Executor,
    routes: &'a ApiRoutes,
    step_delay: StepDelay,
}

impl<'a> GameSimulator<'a> {
    pub fn new(executor: &'a Executor, routes: &'a ApiRoutes, step_delay: StepDelay) -> Self {
        Self { executor, routes, step_delay }
    }

    /// Start, one paced report per tile, end. Neither an unanswered start nor a missed
    /// report stops the session, and the end call is always made.
    ///
    /// `Ok(None)` means the server gave no usable end result.
    pub async fn play_session(
        &self,
        ctx: &NetworkContext,
        tiles: &[u32],
        multiplier: u32,
    ) -> Result<Option<SessionResult>, NetworkError> {
        let started = self.executor.execute(ctx, &self.routes.game_start()).await.into_payload()?;
        let start: GameStartResponse = match started {
            Some(payload) => serde_json::from_value(payload).unwrap_or_default(),
            None => {
                warn!("[{}] Game start went unanswered, playing without a session id", ctx.account());
                GameStartResponse::default()
            }
        };

        let mut session = GameSession {
            session_id: start.session_id,
            tiles: tiles.to_vec(),
            step: 0,
            multiplier,
        };
        match &session.session_id {
            Some(id) => debug!("[{}] Game session {} started", ctx.account(), id),
            None => debug!("[{}] Game started without a session id", ctx.account()),
        }

        while session.step < session.tiles.len() {
            let tile = session.tiles[session.step];
            let total = session.tiles.len();

            self.executor.pacer().pause(self.step_delay.draw()).await;
            info!("[{}] Game progress: {}/{}", ctx.account(), session.step + 1, total);

            let report = self.routes.save_tile(session.session_id.as_ref(), tile);
            match self.executor.execute(ctx, &report).await {
                RetryOutcome::Success(_) => debug!("[{}] Tile saved: {}", ctx.account(), tile),
                RetryOutcome::Fatal(e) => warn!("[{}] Tile {} rejected, continuing: {}", ctx.account(), tile, e),
                other => warn!("[{}] Tile {} not saved ({:?}), continuing", ctx.account(), tile, other),
            }
            session.step += 1;
        }

        let end = self
            .routes
            .game_over(session.session_id.as_ref(), session.multiplier, session.max_tile());
        let Some(payload) = self.executor.execute(ctx, &end).await.into_payload()? else {
            warn!("[{}] Game finished but the server reported no result", ctx.account());
            return Ok(None);
        };
        let over: GameOverResponse = serde_json::from_value(payload).unwrap_or_default();
        let result = SessionResult {
            tokens: over.earn.unwrap_or(0.0),
            experience: over.xp_earned.unwrap_or(0.0),
            level: over.level,
        };
        info!(
            "[{}] Game finished: +{} tokens, +{} XP{}",
            ctx.account(),
            result.tokens,
            result.experience,
            result.level.map(|l| format!(", level {}", l)).unwrap_or_default()
        );
        Ok(Some(result))
    }
}
