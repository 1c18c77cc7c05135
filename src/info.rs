//! Cluster info (`GET /`) and license (`GET /_license`) documents.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::{json, Value};
use std::sync::LazyLock;
use uuid::Uuid;

/// `product/major[.minor[.patch]]` at the start of a `User-Agent`.
static AGENT_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*[^/\s]+/v?(\d+)(?:\.(\d+))?(?:\.(\d+))?")
        .expect("user agent pattern is valid")
});

/// Identity the mock reports to clients.
#[derive(Debug, Clone)]
pub struct ClusterInfo {
    cluster_uuid: String,
    default_version: String,
    license_uid: Uuid,
    expires_at: DateTime<Utc>,
}

impl ClusterInfo {
    pub fn new(
        cluster_uuid: impl Into<String>,
        default_version: impl Into<String>,
        license_uid: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            cluster_uuid: cluster_uuid.into(),
            default_version: default_version.into(),
            license_uid,
            expires_at,
        }
    }

    pub fn license_uid(&self) -> Uuid {
        self.license_uid
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Version to report to a client.
    ///
    /// Clients such as Beats refuse to talk to a cluster older than
    /// themselves, so the version of the calling product is echoed back as
    /// `major.minor.patch`. Without a usable `User-Agent` the configured
    /// version is used.
    pub fn version_for(&self, user_agent: Option<&str>) -> String {
        let Some(caps) = user_agent.and_then(|ua| AGENT_VERSION.captures(ua)) else {
            return self.default_version.clone();
        };
        let part = |i: usize| caps.get(i).map_or("0", |m| m.as_str());
        format!("{}.{}.{}", part(1), part(2), part(3))
    }

    /// Body for `GET /`.
    pub fn root(&self, user_agent: Option<&str>) -> Value {
        json!({
            "name": "mock",
            "cluster_uuid": self.cluster_uuid,
            "version": {
                "number": self.version_for(user_agent),
                "build_flavor": "default",
            },
        })
    }

    /// Body for `GET /_license`.
    pub fn license(&self) -> Value {
        json!({
            "license": {
                "status": "active",
                "uid": self.license_uid.to_string(),
                "type": "trial",
                "expiry_date_in_millis": self.expires_at.timestamp_millis(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn info() -> ClusterInfo {
        ClusterInfo::new(
            "cluster-1",
            "8.17.0",
            Uuid::nil(),
            Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
        )
    }

    #[test]
    fn test_version_from_user_agent() {
        let info = info();
        assert_eq!(
            info.version_for(Some("Elastic-filebeat/8.12.2 (linux; amd64; abc; 2024-01-01)")),
            "8.12.2"
        );
        assert_eq!(info.version_for(Some("Go-http-client/1.1")), "1.1.0");
        assert_eq!(info.version_for(Some("agent/9")), "9.0.0");
        assert_eq!(info.version_for(Some("nothing here")), "8.17.0");
        assert_eq!(info.version_for(Some("")), "8.17.0");
        assert_eq!(info.version_for(None), "8.17.0");
    }

    #[test]
    fn test_version_pattern_shared_across_instances() {
        let other = ClusterInfo::new("cluster-2", "7.10.0", Uuid::nil(), Utc::now());
        assert_eq!(info().version_for(Some("Elastic-filebeat/8.1")), "8.1.0");
        assert_eq!(other.version_for(Some("Elastic-filebeat/8.1")), "8.1.0");
        assert_eq!(other.version_for(Some("no version")), "7.10.0");
    }

    #[test]
    fn test_root_document() {
        let root = info().root(Some("Elastic-metricbeat/7.17.0"));
        assert_eq!(root["name"], "mock");
        assert_eq!(root["cluster_uuid"], "cluster-1");
        assert_eq!(root["version"]["number"], "7.17.0");
        assert_eq!(root["version"]["build_flavor"], "default");
    }

    #[test]
    fn test_license_document() {
        let license = info().license();
        assert_eq!(license["license"]["status"], "active");
        assert_eq!(license["license"]["type"], "trial");
        assert_eq!(
            license["license"]["uid"],
            "00000000-0000-0000-0000-000000000000"
        );
        assert_eq!(license["license"]["expiry_date_in_millis"], 1_700_000_000_000i64);
    }
}
