use chrono::Utc;
use cron::Schedule;
use std::{collections::HashMap, str::FromStr, sync::Arc};
use tokio::sync::Mutex;

use crate::error::Error;

/// Process-wide map `requestKey -> scheduledEntryId`. Entry replacement is
/// atomic under the map's own lock: the old task is aborted only after the
/// new one has been inserted in its place, so no reconcile observes a gap.
#[derive(Default)]
pub struct Scheduler {
    entries: Mutex<HashMap<(String, String), tokio::task::JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Replaces any existing entry for `key` with one firing `f` on every
    /// tick of `expr`. `f` must be cheap to clone (it is re-invoked once per
    /// firing, never awaited concurrently with itself).
    pub async fn replace<F, Fut>(
        &self,
        key: (String, String),
        expr: &str,
        f: F,
    ) -> Result<(), Error>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let schedule = Schedule::from_str(&normalize_cron(expr)).map_err(|source| Error::Cron {
            expr: expr.to_string(),
            source,
        })?;

        let handle = tokio::spawn(async move {
            loop {
                let Some(next) = schedule.upcoming(Utc).next() else {
                    return;
                };
                let delay = (next - Utc::now())
                    .to_std()
                    .unwrap_or(std::time::Duration::from_secs(0));
                tokio::time::sleep(delay).await;
                f().await;
            }
        });

        let old = {
            let mut entries = self.entries.lock().await;
            entries.insert(key, handle)
        };
        if let Some(old) = old {
            old.abort();
        }
        Ok(())
    }

    pub async fn remove(&self, key: &(String, String)) {
        let old = {
            let mut entries = self.entries.lock().await;
            entries.remove(key)
        };
        if let Some(old) = old {
            old.abort();
        }
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

/// `cron` expects a leading seconds field; CheckpointRequests carry the
/// standard 5-field unix form, so a 5-field expression gets `0 ` prepended
/// before parsing. A 6-or-more-field expression passes through unchanged.
fn normalize_cron(expr: &str) -> String {
    if expr.split_whitespace().count() == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replacing_an_entry_does_not_grow_the_map() {
        let sched = Scheduler::new();
        let key = ("ns".to_string(), "req".to_string());
        sched
            .replace(key.clone(), "*/5 * * * *", || async {})
            .await
            .unwrap();
        assert_eq!(sched.len().await, 1);
        sched
            .replace(key.clone(), "*/10 * * * *", || async {})
            .await
            .unwrap();
        assert_eq!(sched.len().await, 1);
    }

    #[tokio::test]
    async fn removing_a_key_drops_its_entry() {
        let sched = Scheduler::new();
        let key = ("ns".to_string(), "req".to_string());
        sched
            .replace(key.clone(), "*/5 * * * *", || async {})
            .await
            .unwrap();
        sched.remove(&key).await;
        assert_eq!(sched.len().await, 0);
    }

    #[tokio::test]
    async fn rejects_malformed_cron_expression() {
        let sched = Scheduler::new();
        let key = ("ns".to_string(), "req".to_string());
        let result = sched.replace(key, "not a cron expr", || async {}).await;
        assert!(result.is_err());
    }

    #[test]
    fn normalizes_five_field_expressions() {
        assert_eq!(normalize_cron("*/5 * * * *"), "0 */5 * * * *");
        assert_eq!(normalize_cron("0 0 * * * *"), "0 0 * * * *");
    }
}
