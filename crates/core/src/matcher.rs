//! Pod to deployment association
//!
//! Pods created by a Deployment are named `<deployment>-<replicaset hash>-<pod hash>`.
//! Matching strips the two trailing tokens and compares the remainder against
//! deployment names, longest name first, so that `svc-extra-abc12-xy789` is never
//! claimed by a deployment called `svc`.

use std::collections::BTreeMap;
use tracing::debug;

/// Number of dash-delimited tokens the controller appends to a deployment name
const GENERATED_SUFFIX_TOKENS: usize = 2;

/// The deployment part of a generated pod name, if the name has one
pub fn deployment_stem(pod_name: &str) -> Option<&str> {
    let mut end = pod_name.len();
    for _ in 0..GENERATED_SUFFIX_TOKENS {
        end = pod_name[..end].rfind('-')?;
    }

    if end == 0 {
        None
    } else {
        Some(&pod_name[..end])
    }
}

/// Deployment names that pass `keep_key`, longest first
fn candidate_deployments<'a>(deployment_names: &'a [String], keep_key: Option<&str>) -> Vec<&'a str> {
    let mut candidates: Vec<&str> = deployment_names
        .iter()
        .map(String::as_str)
        .filter(|name| keep_key.map_or(true, |key| name.contains(key)))
        .collect();

    candidates.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    candidates.dedup();
    candidates
}

/// Group pods under their owning deployment.
///
/// Every deployment that passes `keep_key` gets an entry, even when no pod
/// matches it. Pods that match no deployment are left out.
pub fn group_by_deployment<V>(
    pods: BTreeMap<String, V>,
    deployment_names: &[String],
    keep_key: Option<&str>,
) -> BTreeMap<String, BTreeMap<String, V>> {
    let candidates = candidate_deployments(deployment_names, keep_key);

    let mut grouped: BTreeMap<String, BTreeMap<String, V>> = candidates
        .iter()
        .map(|name| (name.to_string(), BTreeMap::new()))
        .collect();

    let mut unmatched = 0usize;
    for (pod_name, value) in pods {
        let owner = deployment_stem(&pod_name)
            .and_then(|stem| candidates.iter().find(|name| **name == stem));

        match owner {
            Some(name) => {
                if let Some(group) = grouped.get_mut(*name) {
                    group.insert(pod_name, value);
                }
            }
            None => unmatched += 1,
        }
    }

    if unmatched > 0 {
        debug!(
            unmatched,
            deployments = grouped.len(),
            "Pods left unassigned after deployment matching"
        );
    }

    grouped
}

/// Name-only form of [`group_by_deployment`]
pub fn match_pods<I, S>(
    pod_names: I,
    deployment_names: &[String],
    keep_key: Option<&str>,
) -> BTreeMap<String, Vec<String>>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let pods: BTreeMap<String, ()> = pod_names.into_iter().map(|name| (name.into(), ())).collect();

    group_by_deployment(pods, deployment_names, keep_key)
        .into_iter()
        .map(|(deployment, pods)| (deployment, pods.into_keys().collect()))
        .collect()
}
