use chrono::{DateTime, Utc};
use std::time::SystemTime;

/// Synthesizes the default local image tag for a container when the request
/// doesn't name one: `localhost/checkpoint-{pod}-{container}:{YYYYMMDD-HHMMSS}`.
pub fn default_target_image(pod_name: &str, container_name: &str, build_time: DateTime<Utc>) -> String {
    format!(
        "localhost/checkpoint-{pod}-{container}:{ts}",
        pod = pod_name,
        container = container_name,
        ts = build_time.format("%Y%m%d-%H%M%S")
    )
}

/// Expected filesystem pattern for a checkpoint tarball for a given
/// container, used when the node agent's response body can't be parsed and
/// we fall back to scanning the checkpoint root.
pub fn checkpoint_file_pattern(namespace: &str, pod_name: &str, container_name: &str) -> String {
    format!("checkpoint-{namespace}_{pod_name}-{container_name}-")
}

/// Picks the artifact most likely to be the one just produced: prefer a file
/// modified within the last 30 seconds; otherwise fall back to the
/// lexicographically greatest match (filenames embed an ISO-like timestamp,
/// so this picks the most recent one even when clocks/mtimes are unreliable).
pub fn pick_most_recent_checkpoint_file(
    candidates: &[(String, SystemTime)],
    now: SystemTime,
    freshness_window: std::time::Duration,
) -> Option<String> {
    let fresh = candidates
        .iter()
        .filter(|(_, mtime)| {
            now.duration_since(*mtime)
                .map(|age| age <= freshness_window)
                .unwrap_or(false)
        })
        .max_by_key(|(_, mtime)| *mtime);

    if let Some((path, _)) = fresh {
        return Some(path.clone());
    }

    candidates.iter().map(|(path, _)| path).max().cloned()
}

/// Strips a `http://`/`https://` scheme prefix from a registry host value.
/// Path components (if any) are passed through verbatim.
pub fn strip_registry_scheme(registry: &str) -> &str {
    registry
        .strip_prefix("https://")
        .or_else(|| registry.strip_prefix("http://"))
        .unwrap_or(registry)
}

pub fn registry_host_or_default(registry: Option<&str>) -> &str {
    registry.map(strip_registry_scheme).unwrap_or("docker.io")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration;

    #[test]
    fn synthesizes_default_image_with_embedded_timestamp() {
        let ts = Utc.with_ymd_and_hms(2025, 1, 4, 14, 30, 22).unwrap();
        assert_eq!(
            default_target_image("app-0", "web", ts),
            "localhost/checkpoint-app-0-web:20250104-143022"
        );
    }

    #[test]
    fn prefers_fresh_file_over_lexicographic_max() {
        let now = SystemTime::now();
        let candidates = vec![
            ("checkpoint-t_app-0-web-2024-01-01T00-00-00Z.tar".to_string(), now - Duration::from_secs(5)),
            ("checkpoint-t_app-0-web-2023-01-01T00-00-00Z.tar".to_string(), now - Duration::from_secs(3600)),
        ];
        let picked = pick_most_recent_checkpoint_file(&candidates, now, Duration::from_secs(30));
        assert_eq!(picked, Some("checkpoint-t_app-0-web-2024-01-01T00-00-00Z.tar".to_string()));
    }

    #[test]
    fn falls_back_to_lexicographic_max_when_nothing_fresh() {
        let now = SystemTime::now();
        let candidates = vec![
            ("checkpoint-t_app-0-web-2023-01-01T00-00-00Z.tar".to_string(), now - Duration::from_secs(3600)),
            ("checkpoint-t_app-0-web-2024-06-01T00-00-00Z.tar".to_string(), now - Duration::from_secs(7200)),
        ];
        let picked = pick_most_recent_checkpoint_file(&candidates, now, Duration::from_secs(30));
        assert_eq!(picked, Some("checkpoint-t_app-0-web-2024-06-01T00-00-00Z.tar".to_string()));
    }

    #[test]
    fn strips_scheme_but_keeps_path() {
        assert_eq!(strip_registry_scheme("https://reg.example.com"), "reg.example.com");
        assert_eq!(strip_registry_scheme("http://reg.example.com/v2"), "reg.example.com/v2");
        assert_eq!(strip_registry_scheme("reg.example.com"), "reg.example.com");
    }

    #[test]
    fn defaults_to_docker_hub_when_no_registry_given() {
        assert_eq!(registry_host_or_default(None), "docker.io");
        assert_eq!(registry_host_or_default(Some("https://reg.example.com")), "reg.example.com");
    }
}
