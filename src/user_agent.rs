use std::collections::BTreeMap;
use std::path::Path;

use log::warn;
use rand::seq::SliceRandom;
use rand::Rng;

/// Display name → assigned user-agent.
pub type UserAgentMap = BTreeMap<String, String>;

pub const FALLBACK_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

#[derive(Debug)]
pub enum CacheError {
    Io(std::io::Error),
    Json(serde_json::Error),
}

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheError::Io(e) => write!(f, "User-agent cache I/O error: {}", e),
            CacheError::Json(e) => write!(f, "User-agent cache encoding error: {}", e),
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CacheError::Io(e) => Some(e),
            CacheError::Json(e) => Some(e),
        }
    }
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Io(err)
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Json(err)
    }
}

/// Keeps an existing assignment; otherwise picks uniformly from `pool`, or the
/// fallback agent when the pool is empty. No I/O.
pub fn assign_user_agent<R: Rng + ?Sized>(
    mut map: UserAgentMap,
    display_name: &str,
    pool: &[String],
    rng: &mut R,
) -> (UserAgentMap, String) {
    if let Some(existing) = map.get(display_name) {
        let chosen = existing.clone();
        return (map, chosen);
    }
    let chosen = pool
        .choose(rng)
        .map(|agent| agent.trim().to_string())
        .unwrap_or_else(|| FALLBACK_USER_AGENT.to_string());
    map.insert(display_name.to_string(), chosen.clone());
    (map, chosen)
}

/// Missing file is an empty cache. So is a corrupt one, with a warning.
pub fn load_cache(path: &Path) -> UserAgentMap {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return UserAgentMap::new(),
        Err(e) => {
            warn!("Failed to read {}, starting a new one: {}", path.display(), e);
            return UserAgentMap::new();
        }
    };
    serde_json::from_str(&raw).unwrap_or_else(|e| {
        warn!("Failed to parse {}, starting a new one: {}", path.display(), e);
        UserAgentMap::new()
    })
}

/// Replaces the cache in one step: write a sibling temp file, then rename over the target.
pub fn store_cache(path: &Path, map: &UserAgentMap) -> Result<(), CacheError> {
    let encoded = serde_json::to_string_pretty(map)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp);
    std::fs::write(&tmp, encoded)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
