use chrono::{DateTime, Utc};
use htnn_policy_controller_core::ResourceId;
use htnn_policy_controller_k8s_api::{self as k8s, policy};
use htnn_policy_controller_k8s_index::{PolicyState, PolicyStatus};

pub const CONDITION_ACCEPTED: &str = "Accepted";

const REASON_ACCEPTED: &str = "Accepted";
const REASON_INVALID: &str = "Invalid";
const REASON_TARGET_NOT_FOUND: &str = "TargetNotFound";

/// Builds the single condition reported for a policy.
pub fn condition(status: &PolicyStatus, now: DateTime<Utc>) -> k8s::Condition {
    let (status_, reason, message) = match &status.state {
        PolicyState::Accepted => ("True", REASON_ACCEPTED, "The policy has been accepted"),
        PolicyState::Invalid(message) => ("False", REASON_INVALID, message.as_str()),
        PolicyState::TargetNotFound(message) => {
            ("False", REASON_TARGET_NOT_FOUND, message.as_str())
        }
    };
    k8s::Condition {
        last_transition_time: k8s::Time(now),
        message: message.to_string(),
        observed_generation: status.generation,
        reason: reason.to_string(),
        status: status_.to_string(),
        type_: CONDITION_ACCEPTED.to_string(),
    }
}

/// Compares condition lists, ignoring transition times.
pub fn eq_time_insensitive(left: &[k8s::Condition], right: &[k8s::Condition]) -> bool {
    left.len() == right.len()
        && left.iter().zip(right.iter()).all(|(l, r)| {
            l.type_ == r.type_
                && l.status == r.status
                && l.reason == r.reason
                && l.message == r.message
                && l.observed_generation == r.observed_generation
        })
}

pub fn make_patch(
    id: &ResourceId,
    conditions: Vec<k8s::Condition>,
) -> k8s::Patch<serde_json::Value> {
    let status = policy::HttpFilterPolicyStatus { conditions };
    k8s::Patch::Merge(serde_json::json!({
        "apiVersion": format!("{}/v1", policy::GROUP),
        "kind": "HTTPFilterPolicy",
        "name": id.name,
        "status": status,
    }))
}
