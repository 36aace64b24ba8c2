//! Authorizer (§4.3): a request is allowed iff the authenticated username is in the accepted
//! set `{prefix+canonical_internal_subject} ∪ {prefix+username_override} ∪ {username_override}`.
//!
//! Callers resolve `kind`/`meta` straight from the request's target object rather than through
//! an intermediate attributes type: there's only ever one subject to check per call, and the
//! migration-annotation rewrite it needs already lives on `ObjectMeta` itself.

use crate::model::{internal_subject, ObjectMeta};

pub fn is_authorized(username: &str, prefix: &str, kind: &str, meta: &ObjectMeta, username_override: Option<&str>) -> bool {
    let canonical = internal_subject(kind, meta);
    if username == format!("{prefix}{canonical}") {
        return true;
    }
    if let Some(over) = username_override {
        if username == format!("{prefix}{over}") || username == over {
            return true;
        }
    }
    false
}
