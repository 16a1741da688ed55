//! Endpoint table and wire types for the reward platform.
//!
//! Deployments differ only in an optional route discriminator inside the path
//! (`/api/<route>/...`) and in whether task ids travel in the body or the path,
//! so both are data here rather than separate code paths.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::network_client::RequestSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskCategory {
    Partner,
    Daily,
    Other,
}

impl TaskCategory {
    /// Reconciliation order within one account run.
    pub const ALL: [TaskCategory; 3] = [TaskCategory::Partner, TaskCategory::Daily, TaskCategory::Other];

    pub fn label(self) -> &'static str {
        match self {
            TaskCategory::Partner => "partner",
            TaskCategory::Daily => "daily",
            TaskCategory::Other => "other",
        }
    }

    fn list_segment(self) -> &'static str {
        match self {
            TaskCategory::Partner => "partner-tasks",
            TaskCategory::Daily => "daily-tasks",
            TaskCategory::Other => "default-tasks",
        }
    }
}

impl std::fmt::Display for TaskCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ApiRoutes {
    route_id: Option<String>,
    task_id_in_path: bool,
}

impl ApiRoutes {
    pub fn new(route_id: Option<String>, task_id_in_path: bool) -> Self {
        let route_id = route_id
            .map(|r| r.trim().trim_matches('/').to_string())
            .filter(|r| !r.is_empty());
        Self { route_id, task_id_in_path }
    }

    fn path(&self, tail: &str) -> String {
        match &self.route_id {
            Some(route) => format!("/api/{}/{}", route, tail),
            None => format!("/api/{}", tail),
        }
    }

    pub fn login(&self) -> RequestSpec {
        RequestSpec::post_empty(self.path("user/auth"))
    }

    pub fn claim_daily_reward(&self) -> RequestSpec {
        RequestSpec::post_empty(self.path("user/daily-claim"))
    }

    pub fn claim_balance(&self) -> RequestSpec {
        RequestSpec::post_empty(self.path("user/claim"))
    }

    pub fn start_farming(&self) -> RequestSpec {
        RequestSpec::post_empty(self.path("user/start"))
    }

    pub fn list_tasks(&self, category: TaskCategory) -> RequestSpec {
        RequestSpec::get(self.path(&format!("tasks/{}", category.list_segment())))
    }

    pub fn complete_task(&self, task_id: i64) -> RequestSpec {
        self.task_action(task_id, "complete")
    }

    pub fn claim_task(&self, task_id: i64) -> RequestSpec {
        self.task_action(task_id, "claim")
    }

    fn task_action(&self, task_id: i64, action: &str) -> RequestSpec {
        if self.task_id_in_path {
            RequestSpec::post_empty(self.path(&format!("tasks/{}/{}", task_id, action)))
        } else {
            RequestSpec::post(self.path(&format!("tasks/{}", action)), json!({ "task_id": task_id }))
        }
    }

    pub fn game_start(&self) -> RequestSpec {
        RequestSpec::post_empty(self.path("game/start"))
    }

    pub fn save_tile(&self, session_id: Option<&Value>, max_tile: u32) -> RequestSpec {
        let body = TileReport { session_id, max_tile: Some(max_tile), multiplier: None };
        RequestSpec::post(self.path("game/save-tile"), to_body(&body))
    }

    pub fn game_over(&self, session_id: Option<&Value>, multiplier: u32, max_tile: u32) -> RequestSpec {
        let body = TileReport { session_id, max_tile: Some(max_tile), multiplier: Some(multiplier) };
        RequestSpec::post(self.path("game/over"), to_body(&body))
    }
}

#[derive(Serialize)]
struct TileReport<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<&'a Value>,
    #[serde(rename = "maxTile", skip_serializing_if = "Option::is_none")]
    max_tile: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    multiplier: Option<u32>,
}

fn to_body(report: &TileReport<'_>) -> Value {
    // Serializing a struct of options and references into a Value cannot fail.
    serde_json::to_value(report).unwrap_or_else(|_| json!({}))
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoginResponse {
    #[serde(default)]
    pub user: UserState,
    #[serde(default, rename = "dailyReward")]
    pub daily_reward: DailyRewardState,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserState {
    #[serde(default)]
    pub daily_attempts: u32,
    /// Farming balance is ready to be collected.
    #[serde(default)]
    pub can_claim: bool,
    #[serde(default)]
    pub tokens: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DailyRewardState {
    #[serde(default)]
    pub can_claim_today: bool,
    #[serde(default)]
    pub is_subscribed: bool,
}

impl LoginResponse {
    pub fn daily_reward_available(&self) -> bool {
        self.daily_reward.can_claim_today && self.daily_reward.is_subscribed
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Task {
    pub task_id: i64,
    #[serde(default)]
    pub is_completed: bool,
    #[serde(default)]
    pub is_claimed: bool,
    /// Older deployments report the claim under this name.
    #[serde(default)]
    pub is_rewarded: bool,
    #[serde(default)]
    pub task: TaskDetails,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskDetails {
    #[serde(default)]
    pub title: Option<String>,
}

impl Task {
    pub fn claimed(&self) -> bool {
        self.is_claimed || self.is_rewarded
    }

    pub fn title(&self) -> &str {
        self.task.title.as_deref().unwrap_or("untitled")
    }
}

/// Response to completing or claiming a task.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskActionResponse {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub reward_tokens: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GameStartResponse {
    #[serde(default, alias = "sessionId")]
    pub session_id: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GameOverResponse {
    #[serde(default, alias = "tokens_earned")]
    pub earn: Option<f64>,
    #[serde(default, alias = "xp")]
    pub xp_earned: Option<f64>,
    #[serde(default, alias = "current_level")]
    pub level: Option<u32>,
}
