//! API-server shaped errors for the in-memory backend, and predicates over
//! `kube::Error` that callers use to interpret store failures.

use kube::error::ErrorResponse;

fn api_error(code: u16, reason: &str, message: String) -> kube::Error {
    kube::Error::Api(ErrorResponse { status: "Failure".to_string(), message, reason: reason.to_string(), code })
}

pub fn not_found(resource: &str, name: &str) -> kube::Error {
    api_error(404, "NotFound", format!("{} \"{}\" not found", resource, name))
}

pub fn already_exists(resource: &str, name: &str) -> kube::Error {
    api_error(409, "AlreadyExists", format!("{} \"{}\" already exists", resource, name))
}

pub fn conflict(resource: &str, name: &str) -> kube::Error {
    api_error(
        409,
        "Conflict",
        format!(
            "Operation cannot be fulfilled on {} \"{}\": the object has been modified; please apply your changes to the latest version and try again",
            resource, name
        ),
    )
}

pub fn invalid(resource: &str, detail: &str) -> kube::Error {
    api_error(422, "Invalid", format!("{} is invalid: {}", resource, detail))
}

pub fn bad_request(detail: &str) -> kube::Error {
    api_error(400, "BadRequest", detail.to_string())
}

pub fn expired(detail: &str) -> kube::Error {
    api_error(410, "Expired", detail.to_string())
}

fn has_reason(err: &kube::Error, code: u16, reason: &str) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == code && ae.reason == reason)
}

pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

pub fn is_conflict(err: &kube::Error) -> bool { has_reason(err, 409, "Conflict") }

pub fn is_already_exists(err: &kube::Error) -> bool { has_reason(err, 409, "AlreadyExists") }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predicates_match_constructors() {
        assert!(is_not_found(&not_found("replicasets.apps", "web")));
        assert!(is_conflict(&conflict("replicasets.apps", "web")));
        assert!(is_already_exists(&already_exists("configmaps", "cfg")));
        assert!(!is_conflict(&already_exists("configmaps", "cfg")));
        assert!(!is_not_found(&invalid("configmaps", "name required")));
    }

    #[test]
    fn messages_mirror_api_server() {
        match not_found("replicasets.apps", "web") {
            kube::Error::Api(ae) => assert_eq!(ae.message, "replicasets.apps \"web\" not found"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
