use serde::Serialize;

#[derive(Serialize)]
struct CheckpointRequestKey<'a> {
    migration_spec: &'a str,
    pod: &'a str,
}

/// Deterministic name for the CheckpointRequest BO materializes for one
/// `(migrationSpec, pod)` pair. Stable across reconciles so repeated runs
/// converge rather than accumulating duplicates (SPEC_FULL.md §9(b)).
pub fn checkpoint_request_name(migration_spec_name: &str, pod_name: &str) -> String {
    let digest = migration_common::hash_spec(&CheckpointRequestKey {
        migration_spec: migration_spec_name,
        pod: pod_name,
    });
    format!("cr-{}", &digest[..16])
}

/// Name of the RestoreRequest replaying a given CheckpointRequest.
pub fn restore_request_name(checkpoint_request_name: &str) -> String {
    format!("{checkpoint_request_name}-restore")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_request_name_is_deterministic() {
        let a = checkpoint_request_name("spec1", "app-0");
        let b = checkpoint_request_name("spec1", "app-0");
        assert_eq!(a, b);
        assert!(a.starts_with("cr-"));
    }

    #[test]
    fn checkpoint_request_name_differs_per_pod() {
        let a = checkpoint_request_name("spec1", "app-0");
        let b = checkpoint_request_name("spec1", "app-1");
        assert_ne!(a, b);
    }

    #[test]
    fn restore_request_name_suffixes_backup_ref() {
        assert_eq!(restore_request_name("cr-abcd1234"), "cr-abcd1234-restore");
    }
}
