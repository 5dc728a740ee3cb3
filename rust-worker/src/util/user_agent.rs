//! User agent rotation for browser launches.

use rand::prelude::*;

/// Desktop Chromium user agents used when no pool is configured.
///
/// Only Chromium strings: the browser we drive is Chromium and a mismatched
/// engine string is an easy automation tell.
const DEFAULT_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
];

/// Pick a random user agent from the configured pool or defaults.
pub fn pick_user_agent(pool: Option<&[String]>) -> String {
    let mut rng = thread_rng();

    let configured = pool.and_then(|agents| agents.choose(&mut rng));
    match configured {
        Some(agent) => agent.clone(),
        None => DEFAULT_USER_AGENTS
            .choose(&mut rng)
            .copied()
            .unwrap_or(DEFAULT_USER_AGENTS[0])
            .to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pick_user_agent_default() {
        let ua = pick_user_agent(None);
        assert!(ua.contains("Chrome/"));
    }

    #[test]
    fn test_pick_user_agent_custom() {
        let custom = vec!["CustomAgent/1.0".to_string()];
        let ua = pick_user_agent(Some(&custom));
        assert_eq!(ua, "CustomAgent/1.0");
    }

    #[test]
    fn test_pick_user_agent_empty_pool() {
        let empty: Vec<String> = vec![];
        let ua = pick_user_agent(Some(&empty));
        assert!(ua.contains("Chrome/"));
    }
}
