use std::collections::BTreeMap;

use migration_types::{CheckpointRequest, RestoreRequest, WorkloadRef};

/// Normalized view over whatever produced a set of target container images
/// for a pod: a [`CheckpointRequest`] (matched by workload or pod identity)
/// or a [`RestoreRequest`] (matched by pod identity only, since restores are
/// not modeled against a workload kind).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchCandidate {
    pub source_name: String,
    pub workload_ref: Option<WorkloadRef>,
    pub pod_name: Option<String>,
    pub pod_generate_name_prefix: Option<String>,
    pub container_images: BTreeMap<String, String>,
    pub default_image: Option<String>,
}

impl MatchCandidate {
    pub fn from_checkpoint_request(cr: &CheckpointRequest, name: &str) -> Self {
        let mut container_images = BTreeMap::new();
        for c in &cr.spec.containers {
            if let Some(image) = &c.target_image {
                container_images.insert(c.name.clone(), image.clone());
            }
        }
        if let Some(status) = &cr.status {
            for captured in &status.captured_images {
                container_images
                    .entry(captured.container_name.clone())
                    .or_insert_with(|| captured.image_name.clone());
            }
        }

        MatchCandidate {
            source_name: name.to_string(),
            workload_ref: cr.spec.workload_ref.clone(),
            pod_name: Some(cr.spec.pod_ref.name.clone()),
            pod_generate_name_prefix: None,
            container_images,
            default_image: None,
        }
    }

    pub fn from_restore_request(rr: &RestoreRequest, name: &str) -> Self {
        MatchCandidate {
            source_name: name.to_string(),
            workload_ref: None,
            pod_name: rr.spec.pod_ref.as_ref().map(|p| p.name.clone()),
            pod_generate_name_prefix: rr.spec.pod_generate_name_prefix.clone(),
            container_images: rr
                .spec
                .containers
                .iter()
                .map(|c| (c.name.clone(), c.image.clone()))
                .collect(),
            default_image: rr.spec.default_image.clone(),
        }
    }

    fn resolve_image(&self, container_name: &str) -> Option<&str> {
        self.container_images
            .get(container_name)
            .map(String::as_str)
            .or(self.default_image.as_deref())
    }
}

/// Identity of an incoming pod, as admission sees it before it is created.
pub struct PodIdentity<'a> {
    pub name: &'a str,
    pub generate_name: Option<&'a str>,
    pub owning_job_name: Option<&'a str>,
}

/// True if `candidate` should supply images for `pod`. Only pods owned by a
/// Job are eligible at all; within that, checked in order: workload/Job or
/// workload/CronJob reference, exact pod name, then a generateName prefix
/// match in either direction.
pub fn matches(candidate: &MatchCandidate, pod: &PodIdentity) -> bool {
    let Some(job_name) = pod.owning_job_name else {
        return false;
    };

    if let Some(workload_ref) = &candidate.workload_ref {
        match workload_ref.kind.as_str() {
            "Job" if workload_ref.name == job_name => return true,
            "CronJob" if job_name.starts_with(&format!("{}-", workload_ref.name)) => {
                return true;
            }
            _ => {}
        }
    }

    if let Some(pod_name) = &candidate.pod_name {
        if pod_name == pod.name {
            return true;
        }
    }

    if let (Some(prefix), Some(generate_name)) =
        (&candidate.pod_generate_name_prefix, pod.generate_name)
    {
        if generate_name.starts_with(prefix.as_str()) || prefix.starts_with(generate_name) {
            return true;
        }
    }

    false
}

/// First candidate that matches `pod`, in list order.
pub fn find_match<'a>(
    candidates: &'a [MatchCandidate],
    pod: &PodIdentity,
) -> Option<&'a MatchCandidate> {
    candidates.iter().find(|c| matches(c, pod))
}

/// One container whose image the matched candidate wants to rewrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePatch {
    pub container_index: usize,
    pub image: String,
}

/// Images that differ from what is currently set, for a JSON-pointer
/// container list (`/spec/containers` or `/spec/initContainers`).
pub fn resolve_image_patches(
    candidate: &MatchCandidate,
    containers: &[(String, String)],
) -> Vec<ImagePatch> {
    containers
        .iter()
        .enumerate()
        .filter_map(|(index, (name, current_image))| {
            let target = candidate.resolve_image(name)?;
            if target == current_image {
                None
            } else {
                Some(ImagePatch {
                    container_index: index,
                    image: target.to_string(),
                })
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use migration_types::ContainerEntry;

    fn workload_ref(kind: &str, name: &str) -> WorkloadRef {
        WorkloadRef {
            api_version: "batch/v1".to_string(),
            kind: kind.to_string(),
            namespace: "ns".to_string(),
            name: name.to_string(),
        }
    }

    fn candidate_with_workload(kind: &str, name: &str) -> MatchCandidate {
        MatchCandidate {
            source_name: "cr-1".to_string(),
            workload_ref: Some(workload_ref(kind, name)),
            pod_name: None,
            pod_generate_name_prefix: None,
            container_images: BTreeMap::new(),
            default_image: None,
        }
    }

    #[test]
    fn matches_job_by_exact_name() {
        let candidate = candidate_with_workload("Job", "backup-job");
        let pod = PodIdentity {
            name: "backup-job-abcde",
            generate_name: Some("backup-job-"),
            owning_job_name: Some("backup-job"),
        };
        assert!(matches(&candidate, &pod));
    }

    #[test]
    fn matches_cronjob_by_generated_job_prefix() {
        let candidate = candidate_with_workload("CronJob", "nightly-export");
        let pod = PodIdentity {
            name: "nightly-export-1690000000-abcde",
            generate_name: Some("nightly-export-1690000000-"),
            owning_job_name: Some("nightly-export-1690000000"),
        };
        assert!(matches(&candidate, &pod));
    }

    #[test]
    fn does_not_match_unrelated_job() {
        let candidate = candidate_with_workload("Job", "backup-job");
        let pod = PodIdentity {
            name: "other-job-abcde",
            generate_name: Some("other-job-"),
            owning_job_name: Some("other-job"),
        };
        assert!(!matches(&candidate, &pod));
    }

    #[test]
    fn matches_by_exact_pod_name_without_workload_ref() {
        let candidate = MatchCandidate {
            source_name: "rr-1".to_string(),
            workload_ref: None,
            pod_name: Some("standalone-pod".to_string()),
            pod_generate_name_prefix: None,
            container_images: BTreeMap::new(),
            default_image: None,
        };
        let pod = PodIdentity {
            name: "standalone-pod",
            generate_name: None,
            owning_job_name: Some("standalone-pod-job"),
        };
        assert!(matches(&candidate, &pod));
    }

    #[test]
    fn matches_by_generate_name_prefix() {
        let candidate = MatchCandidate {
            source_name: "rr-1".to_string(),
            workload_ref: None,
            pod_name: None,
            pod_generate_name_prefix: Some("web-".to_string()),
            container_images: BTreeMap::new(),
            default_image: None,
        };
        let pod = PodIdentity {
            name: "web-7f8d9-xyz",
            generate_name: Some("web-7f8d9-"),
            owning_job_name: Some("web-7f8d9"),
        };
        assert!(matches(&candidate, &pod));
    }

    #[test]
    fn pod_not_owned_by_a_job_never_matches() {
        let candidate = MatchCandidate {
            source_name: "rr-1".to_string(),
            workload_ref: None,
            pod_name: Some("standalone-pod".to_string()),
            pod_generate_name_prefix: Some("web-".to_string()),
            container_images: BTreeMap::new(),
            default_image: None,
        };
        let pod = PodIdentity {
            name: "standalone-pod",
            generate_name: Some("web-7f8d9-"),
            owning_job_name: None,
        };
        assert!(!matches(&candidate, &pod));
    }

    #[test]
    fn resolves_patches_only_for_differing_images() {
        let mut container_images = BTreeMap::new();
        container_images.insert("web".to_string(), "reg.example/ckpt/web:new".to_string());
        let candidate = MatchCandidate {
            source_name: "cr-1".to_string(),
            workload_ref: None,
            pod_name: None,
            pod_generate_name_prefix: None,
            container_images,
            default_image: None,
        };
        let containers = vec![
            ("web".to_string(), "reg.example/app/web:old".to_string()),
            ("sidecar".to_string(), "reg.example/app/sidecar:1".to_string()),
        ];
        let patches = resolve_image_patches(&candidate, &containers);
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].container_index, 0);
        assert_eq!(patches[0].image, "reg.example/ckpt/web:new");
    }

    #[test]
    fn falls_back_to_default_image_for_unmapped_containers() {
        let candidate = MatchCandidate {
            source_name: "rr-1".to_string(),
            workload_ref: None,
            pod_name: None,
            pod_generate_name_prefix: None,
            container_images: BTreeMap::new(),
            default_image: Some("reg.example/ckpt/default:abc".to_string()),
        };
        let containers = vec![("sidecar".to_string(), "reg.example/app/sidecar:1".to_string())];
        let patches = resolve_image_patches(&candidate, &containers);
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].image, "reg.example/ckpt/default:abc");
    }

    #[test]
    fn end_to_end_admission_rewrite_for_restored_job() {
        use migration_types::{CapturedImage, CheckpointRequestSpec, CheckpointRequestStatus, PodRef};

        let cr = CheckpointRequest {
            metadata: Default::default(),
            spec: CheckpointRequestSpec {
                pod_ref: PodRef {
                    namespace: "t".to_string(),
                    name: "app-0".to_string(),
                },
                workload_ref: Some(workload_ref("Job", "restore-xyz")),
                containers: vec![],
                schedule: "immediately".to_string(),
                stop_pod: false,
                registry: None,
            },
            status: Some(CheckpointRequestStatus {
                phase: Default::default(),
                message: None,
                checkpoint_files: vec![],
                captured_images: vec![CapturedImage {
                    container_name: "web".to_string(),
                    image_name: "reg.example/ckpt/web:abc".to_string(),
                    build_time: Default::default(),
                    pushed: true,
                }],
                last_checkpoint_time: None,
                last_updated: None,
            }),
        };

        let candidates = vec![MatchCandidate::from_checkpoint_request(&cr, "cr-1")];
        let pod = PodIdentity {
            name: "restore-xyz-r2d2",
            generate_name: Some("restore-xyz-"),
            owning_job_name: Some("restore-xyz"),
        };

        let matched = find_match(&candidates, &pod).expect("request should match admitted pod");
        let containers = vec![("web".to_string(), "nginx:1.25".to_string())];
        let patches = resolve_image_patches(matched, &containers);

        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].container_index, 0);
        assert_eq!(patches[0].image, "reg.example/ckpt/web:abc");
    }

    #[test]
    fn checkpoint_request_candidate_prefers_target_image_over_captured() {
        use migration_types::{CapturedImage, CheckpointRequestSpec, CheckpointRequestStatus, PodRef};

        let cr = CheckpointRequest {
            metadata: Default::default(),
            spec: CheckpointRequestSpec {
                pod_ref: PodRef {
                    namespace: "ns".to_string(),
                    name: "app-0".to_string(),
                },
                workload_ref: Some(workload_ref("Job", "app")),
                containers: vec![ContainerEntry {
                    name: "web".to_string(),
                    target_image: Some("reg.example/explicit:1".to_string()),
                }],
                schedule: "immediately".to_string(),
                stop_pod: false,
                registry: None,
            },
            status: Some(CheckpointRequestStatus {
                phase: Default::default(),
                message: None,
                checkpoint_files: vec![],
                captured_images: vec![CapturedImage {
                    container_name: "web".to_string(),
                    image_name: "reg.example/captured:2".to_string(),
                    build_time: Default::default(),
                    pushed: true,
                }],
                last_checkpoint_time: None,
                last_updated: None,
            }),
        };

        let candidate = MatchCandidate::from_checkpoint_request(&cr, "cr-1");
        assert_eq!(
            candidate.container_images.get("web").map(String::as_str),
            Some("reg.example/explicit:1")
        );
    }
}
