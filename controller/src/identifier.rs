//! Bidirectional mapping between `namespaces/{ns}/{kind}/{name}` wire identifiers and
//! internal `(namespace, name)` keys (§4.1).

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentifierError {
    #[error("malformed identifier {0:?}: expected namespaces/{{ns}} or namespaces/{{ns}}/{{kind}}/{{name}}")]
    Malformed(String),
    #[error("unknown resource kind {0:?}: expected one of clients, exporters, leases")]
    UnknownKind(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kind {
    Clients,
    Exporters,
    Leases,
}

impl Kind {
    pub fn as_str(self) -> &'static str {
        match self {
            Kind::Clients => "clients",
            Kind::Exporters => "exporters",
            Kind::Leases => "leases",
        }
    }

    fn parse(s: &str) -> Result<Self, IdentifierError> {
        match s {
            "clients" => Ok(Kind::Clients),
            "exporters" => Ok(Kind::Exporters),
            "leases" => Ok(Kind::Leases),
            other => Err(IdentifierError::UnknownKind(other.to_string())),
        }
    }
}

/// A fully-qualified `namespaces/{ns}/{kind}/{name}` identifier once parsed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectKey {
    pub namespace: String,
    pub kind: Kind,
    pub name: String,
}

/// A bare `namespaces/{ns}` parent identifier, used by List* RPCs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NamespaceKey {
    pub namespace: String,
}

pub fn parse_object(id: &str) -> Result<ObjectKey, IdentifierError> {
    let segments: Vec<&str> = id.split('/').collect();
    match segments.as_slice() {
        ["namespaces", ns, kind, name] if !ns.is_empty() && !name.is_empty() => Ok(ObjectKey {
            namespace: (*ns).to_string(),
            kind: Kind::parse(kind)?,
            name: (*name).to_string(),
        }),
        _ => Err(IdentifierError::Malformed(id.to_string())),
    }
}

pub fn unparse_object(key: &ObjectKey) -> String {
    format!("namespaces/{}/{}/{}", key.namespace, key.kind.as_str(), key.name)
}

pub fn parse_namespace(id: &str) -> Result<NamespaceKey, IdentifierError> {
    let segments: Vec<&str> = id.split('/').collect();
    match segments.as_slice() {
        ["namespaces", ns] if !ns.is_empty() => Ok(NamespaceKey {
            namespace: (*ns).to_string(),
        }),
        _ => Err(IdentifierError::Malformed(id.to_string())),
    }
}

pub fn unparse_namespace(key: &NamespaceKey) -> String {
    format!("namespaces/{}", key.namespace)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_object_identifiers() {
        for id in [
            "namespaces/lab1/exporters/e1",
            "namespaces/lab1/clients/c1",
            "namespaces/lab1/leases/l1",
        ] {
            let parsed = parse_object(id).unwrap();
            assert_eq!(unparse_object(&parsed), id);
        }
    }

    #[test]
    fn round_trips_namespace_identifiers() {
        let parsed = parse_namespace("namespaces/lab1").unwrap();
        assert_eq!(unparse_namespace(&parsed), "namespaces/lab1");
    }

    #[test]
    fn rejects_wrong_segment_count() {
        assert!(parse_object("namespaces/lab1/exporters").is_err());
        assert!(parse_object("namespaces/lab1/exporters/e1/extra").is_err());
    }

    #[test]
    fn rejects_unknown_kind() {
        assert_eq!(
            parse_object("namespaces/lab1/widgets/w1"),
            Err(IdentifierError::UnknownKind("widgets".to_string()))
        );
    }

    #[test]
    fn rejects_wrong_fixed_segment() {
        assert!(parse_object("namespace/lab1/exporters/e1").is_err());
    }

    #[test]
    fn rejects_empty_name_or_namespace() {
        assert!(parse_object("namespaces//exporters/e1").is_err());
        assert!(parse_object("namespaces/lab1/exporters/").is_err());
    }
}
