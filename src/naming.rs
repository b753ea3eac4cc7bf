//! Deterministic names shared between the operator and Ceph RGW
//!
//! The RGW user id is a pure function of cluster name, namespace and claim
//! name. Both sides recompute it instead of storing a mapping, so the format
//! here must never drift:
//!
//! ```text
//! tenant     = sanitize(cluster) + "__" + sanitize(namespace)
//! user id    = tenant + "$" + claim
//! subuser id = user id + ":" + short name
//! ```

/// Short name of the read-only subuser every claim gets
pub const READONLY_SUBUSER: &str = "readonly";

/// Replace characters RGW tenants do not accept with underscores
pub fn sanitize(value: &str) -> String {
    value.replace(['.', '-'], "_")
}

/// Name of the cluster-scoped S3User mirroring a claim
pub fn s3_user_name(namespace: &str, claim: &str) -> String {
    format!("{namespace}.{claim}")
}

/// Name of the credential secret for one extra subuser of a claim
pub fn subuser_secret_name(claim: &str, subuser: &str) -> String {
    format!("{claim}-{subuser}")
}

/// RGW identity derived from a claim
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CephIdentity {
    /// RGW tenant (`cluster__namespace`)
    pub tenant: String,
    /// Full RGW user id (`tenant$claim`)
    pub user_id: String,
    /// Human-readable display name
    pub display_name: String,
}

impl CephIdentity {
    /// Derive the identity for a claim
    pub fn new(cluster: &str, namespace: &str, claim: &str) -> Self {
        let tenant = format!("{}__{}", sanitize(cluster), sanitize(namespace));
        Self {
            user_id: format!("{tenant}${claim}"),
            display_name: format!("{claim} in {namespace}.{cluster}"),
            tenant,
        }
    }

    /// Full id of a subuser given its short name
    pub fn subuser_id(&self, short: &str) -> String {
        format!("{}:{}", self.user_id, short)
    }

    /// Short name of a subuser if the full id belongs to this user
    pub fn subuser_short_name<'a>(&self, full_id: &'a str) -> Option<&'a str> {
        full_id
            .strip_prefix(self.user_id.as_str())
            .and_then(|rest| rest.strip_prefix(':'))
    }
}
