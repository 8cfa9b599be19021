//! Integration tests for the certificate manager
//!
//! Drives issuance, coalescing, and renewal through real providers backed by
//! in-memory secrets.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{secret_store_with_root, SigningRequestClient, TestCa, CONTROL_PLANE_NAMESPACE};
use meshplane::certificate::{
    CertificateIssuer, CertificateManager, CommonName, FixedJitter, Provider, ProviderContext,
};
use meshplane::config::{CertManagerProviderSpec, ProviderConfig, TresorProviderSpec};
use meshplane::secrets::InMemorySecretStore;
use meshplane::utils::BackoffPolicy;
use tokio_util::sync::CancellationToken;
use tracing_test::traced_test;

async fn tresor() -> Arc<Provider> {
    let ctx = ProviderContext::new(CONTROL_PLANE_NAMESPACE, Arc::new(InMemorySecretStore::new()));
    let config = ProviderConfig::Tresor(TresorProviderSpec { secret_name: "mesh-root".into() });
    Arc::new(Provider::from_config(&config, &ctx).await.unwrap())
}

fn manager(provider: Arc<Provider>) -> CertificateManager {
    CertificateManager::with_jitter(provider, Arc::new(FixedJitter::none()))
}

#[tokio::test]
async fn test_concurrent_requests_share_one_certificate() {
    let manager = manager(tresor().await);
    let cn = CommonName::from("bookstore.default.svc");

    let mut handles = Vec::new();
    for _ in 0..16 {
        let manager = manager.clone();
        let cn = cn.clone();
        handles.push(tokio::spawn(async move {
            manager.issue_certificate(&cn, Duration::from_secs(3600)).await.unwrap()
        }));
    }

    let mut serials = Vec::new();
    for handle in handles {
        serials.push(handle.await.unwrap().serial_number().clone());
    }
    serials.dedup();
    assert_eq!(serials.len(), 1);
    assert_eq!(manager.list_issued(), vec![cn]);
}

#[tokio::test]
async fn test_distinct_names_get_distinct_certificates() {
    let manager = manager(tresor().await);
    let a = manager
        .issue_certificate(&CommonName::from("a.ns.svc"), Duration::from_secs(3600))
        .await
        .unwrap();
    let b = manager
        .issue_certificate(&CommonName::from("b.ns.svc"), Duration::from_secs(3600))
        .await
        .unwrap();

    assert_ne!(a.serial_number(), b.serial_number());
    assert_eq!(a.issuing_ca(), b.issuing_ca());
    assert_eq!(manager.root_certificate().await.unwrap().pem(), a.issuing_ca());
}

#[tokio::test]
#[traced_test]
async fn test_renewal_loop_replaces_expiring_certificates() {
    let manager = manager(tresor().await);
    let mut rotations = manager.subscribe_rotations();

    // Inside the renewal window from the start.
    let short = CommonName::from("short.ns.svc");
    let first = manager.issue_certificate(&short, Duration::from_secs(20)).await.unwrap();
    let long = CommonName::from("long.ns.svc");
    let kept = manager.issue_certificate(&long, Duration::from_secs(3600)).await.unwrap();

    let cancel = CancellationToken::new();
    let handle = manager.start(Duration::from_millis(20), cancel.clone());

    let rotated = tokio::time::timeout(Duration::from_secs(5), rotations.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(rotated.common_name(), &short);
    assert_ne!(rotated.serial_number(), first.serial_number());

    cancel.cancel();
    handle.await.unwrap();

    let current = manager.get_certificate(&long).unwrap();
    assert_eq!(current.serial_number(), kept.serial_number());
    assert!(logs_contain("Certificate renewal loop stopped"));
}

#[tokio::test]
async fn test_released_certificate_is_reissued() {
    let manager = manager(tresor().await);
    let cn = CommonName::from("a.ns.svc");

    let first = manager.issue_certificate(&cn, Duration::from_secs(3600)).await.unwrap();
    manager.release_certificate(&cn);
    assert!(manager.get_certificate(&cn).is_none());

    let second = manager.issue_certificate(&cn, Duration::from_secs(3600)).await.unwrap();
    assert_ne!(first.serial_number(), second.serial_number());
}

#[tokio::test]
async fn test_cert_manager_issuance_signs_and_cleans_up() {
    let ca = TestCa::new("issuer-root");
    let store = secret_store_with_root("issuer-root", &ca).await;
    let client = Arc::new(SigningRequestClient::new(ca));

    let ctx = ProviderContext::new(CONTROL_PLANE_NAMESPACE, store)
        .with_certificate_requests(client.clone())
        .with_poll(BackoffPolicy::immediate(3));
    let config = ProviderConfig::CertManager(CertManagerProviderSpec {
        secret_name: "issuer-root".to_string(),
        issuer_name: "mesh-issuer".to_string(),
        issuer_kind: "Issuer".to_string(),
        issuer_group: "cert-manager.io".to_string(),
    });
    let provider = Arc::new(Provider::from_config(&config, &ctx).await.unwrap());
    let root = provider.root_certificate().await.unwrap();

    let manager = manager(provider);
    let cn = CommonName::from("bookstore.default.svc");
    let cert = manager.issue_certificate(&cn, Duration::from_secs(3600)).await.unwrap();

    assert_eq!(cert.common_name(), &cn);
    assert_eq!(cert.issuing_ca().trim(), root.pem().trim());
    assert!(cert.private_key().expose_str().unwrap().contains("PRIVATE KEY"));
    assert_eq!(client.created.lock().await.len(), 1);
    assert_eq!(*client.created.lock().await, *client.deleted.lock().await);
    assert_eq!(client.outstanding().await, 0);
}
