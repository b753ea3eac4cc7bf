//! Integration tests for quota admission
//!
//! These tests tell the story of a team sharing S3 quota across namespaces.
//! The admission gates read live claims, ResourceQuotas and the team's
//! ClusterResourceQuota from the API server.

use std::time::Duration;

use k8s_openapi::api::core::v1::ResourceQuotaSpec;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::{Api, DeleteParams, ObjectMeta, Patch, PatchParams, PostParams};
use kube::Client;

use s3_claim_operator::crd::{
    ClusterResourceQuota, ClusterResourceQuotaSpec, DeletionPolicy, S3Bucket, S3BucketSpec,
    S3UserClaim, S3UserClaimSpec, UserQuota,
};
use s3_claim_operator::quota::Scope;
use s3_claim_operator::store::KubeObjectStore;
use s3_claim_operator::webhook::{AdmissionGate, BucketAdmissionGate, Rejection, Violation};
use s3_claim_operator::{DEFAULT_S3_USER_CLASS, FIELD_MANAGER};

use super::helpers::{create_resource_quota, delete_namespace, ensure_test_cluster, fresh_namespace};

const GATE_TIMEOUT: Duration = Duration::from_secs(10);

fn claim(name: &str, namespace: &str, max_size: &str) -> S3UserClaim {
    S3UserClaim {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: S3UserClaimSpec {
            s3_user_class: String::new(),
            readonly_secret: format!("{name}-readonly"),
            admin_secret: format!("{name}-admin"),
            quota: UserQuota {
                max_size: Quantity(max_size.to_string()),
                max_objects: Quantity("100".to_string()),
                max_buckets: 1,
            },
            sub_users: Vec::new(),
        },
        status: None,
    }
}

async fn persist(client: &Client, claim: &S3UserClaim) -> S3UserClaim {
    let namespace = claim.metadata.namespace.clone().unwrap_or_default();
    let api: Api<S3UserClaim> = Api::namespaced(client.clone(), &namespace);
    api.create(&PostParams::default(), claim)
        .await
        .expect("failed to create claim")
}

async fn apply_team_quota(client: &Client, team: &str, size: &str) {
    let api: Api<ClusterResourceQuota> = Api::all(client.clone());
    let quota = ClusterResourceQuota::new(
        team,
        ClusterResourceQuotaSpec {
            quota: ResourceQuotaSpec {
                hard: Some([("s3/size".to_string(), Quantity(size.to_string()))].into()),
                ..Default::default()
            },
            ..Default::default()
        },
    );
    api.patch(team, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(&quota))
        .await
        .expect("failed to apply team quota");
}

async fn delete_team_quota(client: &Client, team: &str) {
    let api: Api<ClusterResourceQuota> = Api::all(client.clone());
    let _ = api.delete(team, &DeleteParams::default()).await;
}

fn exceeded_scopes(rejection: &Rejection) -> Vec<Scope> {
    match rejection {
        Rejection::Denied(violations) => violations
            .iter()
            .filter_map(|v| match v {
                Violation::Exceeded { scope, .. } => Some(*scope),
                _ => None,
            })
            .collect(),
        Rejection::Internal(msg) => panic!("expected a denial, got internal error: {msg}"),
    }
}

// =============================================================================
// Team Quota Stories
// =============================================================================

/// Story: A team without a ClusterResourceQuota cannot claim storage
///
/// Expected behavior:
/// - The claim is denied with a message pointing the tenant at the cloud team
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_team_without_quota_is_denied() {
    let client = ensure_test_cluster().await.expect("failed to set up test cluster");
    let namespace = "s3-admission-noquota";
    fresh_namespace(&client, namespace, "team-noquota")
        .await
        .expect("failed to create namespace");
    let store = KubeObjectStore::new(client.clone());
    let gate = AdmissionGate::new(&store, DEFAULT_S3_USER_CLASS, GATE_TIMEOUT);

    let rejection = gate
        .validate_create(&claim("app", namespace, "1k"))
        .await
        .expect_err("claim must be denied");
    assert_eq!(
        rejection,
        Rejection::Denied(vec![Violation::QuotaNotDefined {
            team: "team-noquota".to_string()
        }])
    );
    assert!(rejection.message().contains("please contact the cloud team"));

    delete_namespace(&client, namespace).await;
}

/// Story: Claims across a team's namespaces share one team quota
///
/// Two namespaces of the same team each hold a claim. A third claim fits its
/// own namespace quota but would push the team total past its limit.
///
/// Expected behavior:
/// - Claims within both limits are admitted
/// - The namespace limit is enforced against the namespace's claims only
/// - The team limit is enforced against the claims of every team namespace
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_team_quota_spans_namespaces() {
    let client = ensure_test_cluster().await.expect("failed to set up test cluster");
    let team = "team-shared";
    let (payments, billing) = ("s3-admission-payments", "s3-admission-billing");
    for ns in [payments, billing] {
        fresh_namespace(&client, ns, team)
            .await
            .expect("failed to create namespace");
    }
    create_resource_quota(&client, payments, "s3-quota", &[("s3/size", "5k")])
        .await
        .expect("failed to create resource quota");
    apply_team_quota(&client, team, "8k").await;

    let store = KubeObjectStore::new(client.clone());
    let gate = AdmissionGate::new(&store, DEFAULT_S3_USER_CLASS, GATE_TIMEOUT);

    let app = claim("app", payments, "3k");
    gate.validate_create(&app)
        .await
        .expect("first claim fits both quotas");
    persist(&client, &app).await;

    let ledger = claim("ledger", billing, "4k");
    gate.validate_create(&ledger)
        .await
        .expect("billing claim fits the team quota");
    persist(&client, &ledger).await;

    println!("Requesting 3k more in payments: namespace 6k/5k, team 10k/8k");
    let rejection = gate
        .validate_create(&claim("jobs", payments, "3k"))
        .await
        .expect_err("claim must be denied");
    assert_eq!(exceeded_scopes(&rejection), vec![Scope::Namespace, Scope::Team]);

    println!("Requesting 2k in billing: team 9k/8k, billing has no namespace quota");
    let rejection = gate
        .validate_create(&claim("reports", billing, "2k"))
        .await
        .expect_err("claim must be denied");
    assert_eq!(exceeded_scopes(&rejection), vec![Scope::Team]);

    println!("Shrinking the existing payments claim frees room");
    gate.validate_update(&claim("app", payments, "2k"), &app)
        .await
        .expect("shrinking a claim is admitted");

    delete_team_quota(&client, team).await;
    for ns in [payments, billing] {
        delete_namespace(&client, ns).await;
    }
}

// =============================================================================
// Bucket Dependency Stories
// =============================================================================

/// Story: Buckets keep their claim alive
///
/// Expected behavior:
/// - A bucket naming a missing claim is denied
/// - A claim with a bucket cannot be deleted until the bucket is gone
#[tokio::test]
#[ignore = "requires kind cluster - run with: cargo test --test kind -- --ignored"]
async fn story_buckets_pin_their_claim() {
    let client = ensure_test_cluster().await.expect("failed to set up test cluster");
    let namespace = "s3-admission-buckets";
    fresh_namespace(&client, namespace, "team-buckets-gate")
        .await
        .expect("failed to create namespace");
    let store = KubeObjectStore::new(client.clone());
    let claims = AdmissionGate::new(&store, DEFAULT_S3_USER_CLASS, GATE_TIMEOUT);
    let bucket_gate = BucketAdmissionGate::new(&store, GATE_TIMEOUT);

    let logs = S3Bucket {
        metadata: ObjectMeta {
            name: Some("logs".to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: S3BucketSpec {
            s3_user_ref: "app".to_string(),
            s3_deletion_policy: DeletionPolicy::Retain,
            s3_subuser_binding: Vec::new(),
        },
        status: None,
    };

    let rejection = bucket_gate
        .validate_create(&logs)
        .await
        .expect_err("bucket without claim must be denied");
    assert_eq!(
        rejection,
        Rejection::Denied(vec![Violation::UserRefNotFound {
            claim: "app".to_string()
        }])
    );

    let app = persist(&client, &claim("app", namespace, "1k")).await;
    bucket_gate
        .validate_create(&logs)
        .await
        .expect("bucket with claim is admitted");

    let buckets: Api<S3Bucket> = Api::namespaced(client.clone(), namespace);
    buckets
        .create(&PostParams::default(), &logs)
        .await
        .expect("failed to create bucket");

    let rejection = claims
        .validate_delete(&app)
        .await
        .expect_err("claim with buckets must not be deleted");
    assert!(rejection.message().contains("logs"));

    buckets
        .delete("logs", &DeleteParams::default())
        .await
        .expect("failed to delete bucket");
    claims
        .validate_delete(&app)
        .await
        .expect("claim without buckets can be deleted");

    delete_namespace(&client, namespace).await;
}
