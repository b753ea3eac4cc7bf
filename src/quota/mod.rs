//! Quota aggregation
//!
//! Claims are accounted at two nested scopes:
//!
//! - **namespace**: every claim in the namespace, limited by the namespace's
//!   `ResourceQuota` objects
//! - **team**: every claim in every namespace labeled with the same team,
//!   limited by the team's `ClusterResourceQuota`
//!
//! [`aggregate`] is the pure summation shared by admission and status
//! projection. The claim being evaluated is always excluded from the sibling
//! list and optionally added back once, so the result does not depend on
//! whether the list already contains a stale copy of it.

mod projector;
mod usage;

use std::collections::BTreeMap;
use std::ops::{Add, AddAssign};

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::ResourceExt;

use crate::crd::{S3UserClaim, UserQuota};
use crate::{quantity, Result, RESOURCE_BUCKETS, RESOURCE_OBJECTS, RESOURCE_SIZE};

pub use projector::StatusProjector;
pub use usage::{namespace_usage, resolve_team, team_namespaces, team_usage};

/// Accounting scope
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scope {
    /// A single namespace
    Namespace,
    /// Every namespace of a team
    Team,
}

impl Scope {
    /// Quota kind named in rejection messages
    pub fn quota_name(&self) -> &'static str {
        match self {
            Self::Namespace => "namespace quota",
            Self::Team => "cluster quota",
        }
    }
}

/// One of the three quota dimensions
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Dimension {
    /// Total object size
    Size,
    /// Object count
    Objects,
    /// Bucket count
    Buckets,
}

impl Dimension {
    /// Every dimension, in reporting order
    pub const ALL: [Dimension; 3] = [Self::Size, Self::Objects, Self::Buckets];

    /// Resource name used in quota objects
    pub fn resource_name(&self) -> &'static str {
        match self {
            Self::Size => RESOURCE_SIZE,
            Self::Objects => RESOURCE_OBJECTS,
            Self::Buckets => RESOURCE_BUCKETS,
        }
    }

    /// Field path of the dimension in an S3UserClaim
    pub fn field_path(&self) -> &'static str {
        match self {
            Self::Size => "spec.quota.maxSize",
            Self::Objects => "spec.quota.maxObjects",
            Self::Buckets => "spec.quota.maxBuckets",
        }
    }
}

/// Summed quota over a set of claims, in integer base units
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QuotaTotals {
    /// Total requested size
    pub max_size: i128,
    /// Total requested object count
    pub max_objects: i128,
    /// Total requested bucket count
    pub max_buckets: i128,
}

impl QuotaTotals {
    /// Totals for a single claim quota
    pub fn from_quota(quota: &UserQuota) -> Result<Self> {
        Ok(Self {
            max_size: quantity::parse(&quota.max_size)?,
            max_objects: quantity::parse(&quota.max_objects)?,
            max_buckets: i128::from(quota.max_buckets),
        })
    }

    /// Value of one dimension
    pub fn get(&self, dimension: Dimension) -> i128 {
        match dimension {
            Dimension::Size => self.max_size,
            Dimension::Objects => self.max_objects,
            Dimension::Buckets => self.max_buckets,
        }
    }

    /// Render as quota resource entries (`s3/size`, `s3/objects`, `s3/buckets`)
    pub fn to_resource_list(&self) -> BTreeMap<String, Quantity> {
        Dimension::ALL
            .iter()
            .map(|d| (d.resource_name().to_string(), quantity::to_quantity(self.get(*d))))
            .collect()
    }

    /// Returns true if every dimension in `used` already equals these totals
    pub fn matches_resource_list(&self, used: Option<&BTreeMap<String, Quantity>>) -> bool {
        let Some(used) = used else {
            return false;
        };
        Dimension::ALL.iter().all(|d| {
            used.get(d.resource_name())
                .and_then(|q| quantity::parse(q).ok())
                == Some(self.get(*d))
        })
    }
}

impl Add for QuotaTotals {
    type Output = QuotaTotals;

    fn add(self, rhs: QuotaTotals) -> QuotaTotals {
        QuotaTotals {
            max_size: self.max_size + rhs.max_size,
            max_objects: self.max_objects + rhs.max_objects,
            max_buckets: self.max_buckets + rhs.max_buckets,
        }
    }
}

impl AddAssign for QuotaTotals {
    fn add_assign(&mut self, rhs: QuotaTotals) {
        *self = *self + rhs;
    }
}

/// Returns true if `sibling` is the claim being evaluated
///
/// Namespace scope compares names only (siblings share the namespace).
/// Team scope compares the exact (namespace, name) pair, so same-named
/// claims in other namespaces of the team are still counted.
pub fn is_target(sibling: &S3UserClaim, target: &S3UserClaim, scope: Scope) -> bool {
    let same_name = sibling.name_any() == target.name_any();
    match scope {
        Scope::Namespace => same_name,
        Scope::Team => same_name && sibling.namespace() == target.namespace(),
    }
}

/// Sum the quota of every sibling except the target, plus the target once if requested
pub fn aggregate(
    siblings: &[S3UserClaim],
    target: &S3UserClaim,
    scope: Scope,
    include_target: bool,
) -> Result<QuotaTotals> {
    let mut totals = QuotaTotals::default();
    for sibling in siblings.iter().filter(|s| !is_target(s, target, scope)) {
        totals += QuotaTotals::from_quota(&sibling.spec.quota)?;
    }
    if include_target {
        totals += QuotaTotals::from_quota(&target.spec.quota)?;
    }
    Ok(totals)
}

/// Dimensions whose hard limit is below the totals
///
/// Dimensions without a limit in `hard` are unconstrained. A limit that does
/// not parse is an error rather than a silent pass.
pub fn exceeded(
    totals: &QuotaTotals,
    hard: Option<&BTreeMap<String, Quantity>>,
) -> Result<Vec<(Dimension, i128)>> {
    let Some(hard) = hard else {
        return Ok(Vec::new());
    };
    let mut violated = Vec::new();
    for dimension in Dimension::ALL {
        if let Some(limit) = hard.get(dimension.resource_name()) {
            let limit = quantity::parse(limit)?;
            if totals.get(dimension) > limit {
                violated.push((dimension, limit));
            }
        }
    }
    Ok(violated)
}
