//! Typed binding for OpenShift's ClusterResourceQuota
//!
//! Team quotas live in a platform-owned `ClusterResourceQuota` named after
//! the team. The operator only reads `spec.quota.hard` and writes the s3
//! entries of `status.total.used` and `status.namespaces[].status.used`.
//! The CRD itself is installed by the platform, so no schema is generated.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{ResourceQuotaSpec, ResourceQuotaStatus};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use serde::{Deserialize, Serialize};

/// Specification for a ClusterResourceQuota
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[kube(
    group = "quota.openshift.io",
    version = "v1",
    kind = "ClusterResourceQuota",
    plural = "clusterresourcequotas",
    status = "ClusterResourceQuotaStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterResourceQuotaSpec {
    /// Which namespaces the quota spans
    #[serde(default)]
    pub selector: ClusterResourceQuotaSelector,

    /// Hard limits
    #[serde(default)]
    pub quota: ResourceQuotaSpec,
}

/// Namespace selector of a ClusterResourceQuota
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterResourceQuotaSelector {
    /// Label selector over namespaces
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<LabelSelector>,

    /// Annotation selector over namespaces
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

/// Observed usage of a ClusterResourceQuota
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterResourceQuotaStatus {
    /// Usage summed over every selected namespace
    #[serde(default)]
    pub total: ResourceQuotaStatus,

    /// Per-namespace usage breakdown
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespaces: Vec<ResourceQuotaStatusByNamespace>,
}

/// Usage contributed by one namespace
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceQuotaStatusByNamespace {
    /// Namespace name
    pub namespace: String,

    /// Usage within that namespace
    #[serde(default)]
    pub status: ResourceQuotaStatus,
}

impl ClusterResourceQuota {
    /// Hard limits declared by the quota
    pub fn hard(&self) -> Option<&BTreeMap<String, Quantity>> {
        self.spec.quota.hard.as_ref()
    }
}
