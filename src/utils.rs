use std::path::{Path, PathBuf};

use log::{info, warn};
use serde_json::Value;

use crate::session::Account;
use crate::user_agent::{assign_user_agent, load_cache, store_cache};

/// Where the input loader reads accounts from.
#[derive(Debug, Clone)]
pub struct AccountSources {
    pub tokens: PathBuf,
    pub proxies: PathBuf,
    pub user_agent_pool: PathBuf,
    pub user_agent_cache: PathBuf,
}

/// Trimmed, non-blank lines.
pub fn read_lines(path: &Path) -> std::io::Result<Vec<String>> {
    let raw = std::fs::read_to_string(path)?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

/// Trimmed lines with blanks kept, so line N still pairs with account N. A missing file is empty.
fn read_positional_lines(path: &Path) -> std::io::Result<Vec<String>> {
    match std::fs::read_to_string(path) {
        Ok(raw) => Ok(raw.lines().map(|line| line.trim().to_string()).collect()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}

/// The token is a URL-encoded query string whose `user` parameter is JSON carrying `first_name`.
pub fn display_name_from_token(token: &str) -> Option<String> {
    let user = url::form_urlencoded::parse(token.as_bytes())
        .find(|(key, _)| key == "user")
        .map(|(_, value)| value.into_owned())?;
    let user: Value = serde_json::from_str(&user).ok()?;
    user.get("first_name")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

/// Reads every input for one pass and rewrites the user-agent cache once.
pub fn load_accounts(sources: &AccountSources) -> std::io::Result<Vec<Account>> {
    let tokens = read_lines(&sources.tokens)?;
    let proxies = read_positional_lines(&sources.proxies)?;
    let pool = match read_lines(&sources.user_agent_pool) {
        Ok(pool) => pool,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(e) => return Err(e),
    };

    let mut cache = load_cache(&sources.user_agent_cache);
    let mut rng = rand::thread_rng();
    let mut accounts = Vec::with_capacity(tokens.len());

    for (index, token) in tokens.into_iter().enumerate() {
        let name = display_name_from_token(&token);
        let user_agent = match &name {
            Some(name) => {
                let (updated, agent) = assign_user_agent(cache, name, &pool, &mut rng);
                cache = updated;
                Some(agent)
            }
            None => {
                warn!("Could not derive a name for account {}, no user-agent assigned", index + 1);
                None
            }
        };
        let proxy = proxies.get(index).filter(|line| !line.is_empty()).cloned();

        accounts.push(Account {
            token,
            display_name: name.unwrap_or_else(|| format!("account-{}", index + 1)),
            proxy,
            user_agent,
        });
    }

    if let Err(e) = store_cache(&sources.user_agent_cache, &cache) {
        warn!("User-agent assignments not saved: {}", e);
    }
    info!("Loaded {} accounts", accounts.len());
    Ok(accounts)
}
