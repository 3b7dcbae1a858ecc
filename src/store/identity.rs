// Anonymous user identity.
//
// There are no accounts: favorites and progress are scoped to the client's
// public IP address, looked up once per session and cached locally so the
// next session still finds its data when the lookup service is down.

use serde::Deserialize;

use super::local::LocalStore;
use crate::error::StoreResult;

pub const ANONYMOUS_USER: &str = "anonymous";

#[derive(Debug, Deserialize)]
struct IpLookup {
    ip: String,
}

async fn lookup_ip(http: &reqwest::Client, url: &str) -> StoreResult<String> {
    let body: IpLookup = http
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    Ok(body.ip)
}

pub async fn resolve_user_id(http: &reqwest::Client, lookup_url: &str, local: &LocalStore) -> String {
    match lookup_ip(http, lookup_url).await {
        Ok(ip) if !ip.trim().is_empty() => {
            if let Err(e) = local.set_user_id(&ip) {
                tracing::warn!(error = %e, "failed to cache user id");
            }
            ip
        }
        Ok(_) => cached_or_anonymous(local),
        Err(e) => {
            tracing::warn!(error = %e, "IP lookup failed, using cached identity");
            cached_or_anonymous(local)
        }
    }
}

fn cached_or_anonymous(local: &LocalStore) -> String {
    local
        .cached_user_id()
        .unwrap_or_else(|| ANONYMOUS_USER.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::local::temp_dir;

    #[tokio::test]
    async fn unreachable_lookup_uses_cache_then_anonymous() {
        let dir = temp_dir("identity");
        let local = LocalStore::in_dir(&dir);
        let http = reqwest::Client::new();
        let dead = "http://127.0.0.1:9/lookup";

        assert_eq!(resolve_user_id(&http, dead, &local).await, ANONYMOUS_USER);

        local.set_user_id("198.51.100.4").unwrap();
        assert_eq!(resolve_user_id(&http, dead, &local).await, "198.51.100.4");
        let _ = std::fs::remove_dir_all(dir);
    }
}
