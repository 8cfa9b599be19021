//! Common test utilities for all integration tests.
//!
//! Provides a throwaway signing authority and a cert-manager request client
//! that signs requests with it.

#![allow(dead_code)]
#![allow(clippy::duplicate_mod)]

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use meshplane::certificate::providers::{
    CertificateRequest, CertificateRequestClient, RequestCondition, RequestConditionType,
};
use meshplane::errors::IssuanceError;
use meshplane::secrets::{InMemorySecretStore, SecretData, SecretStore, CA_CERT_KEY};
use rcgen::{
    BasicConstraints, CertificateParams, CertificateSigningRequestParams, DnType, IsCa, KeyPair,
};
use tokio::sync::Mutex;

pub const CONTROL_PLANE_NAMESPACE: &str = "mesh-system";

/// Self-signed CA used to sign test certificates.
pub struct TestCa {
    pub cert: rcgen::Certificate,
    pub key: KeyPair,
}

impl std::fmt::Debug for TestCa {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestCa").finish_non_exhaustive()
    }
}

impl TestCa {
    pub fn new(common_name: &str) -> Self {
        let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
        params.distinguished_name.push(DnType::CommonName, common_name);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let key = KeyPair::generate().unwrap();
        let cert = params.self_signed(&key).unwrap();
        Self { cert, key }
    }

    pub fn pem(&self) -> String {
        self.cert.pem()
    }

    /// Sign a leaf for `common_name` valid for `validity`.
    pub fn sign_leaf(&self, common_name: &str, validity: std::time::Duration) -> (String, String) {
        let mut params = CertificateParams::new(vec![common_name.to_string()]).unwrap();
        params.distinguished_name.push(DnType::CommonName, common_name);
        let now = time::OffsetDateTime::now_utc();
        params.not_before = now;
        params.not_after = now + validity;
        let key = KeyPair::generate().unwrap();
        let cert = params.signed_by(&key, &self.cert, &self.key).unwrap();
        (cert.pem(), key.serialize_pem())
    }

    /// Sign a PEM-encoded CSR.
    pub fn sign_request(&self, csr_pem: &str, validity: std::time::Duration) -> String {
        let mut csr = CertificateSigningRequestParams::from_pem(csr_pem).unwrap();
        let now = time::OffsetDateTime::now_utc();
        csr.params.not_before = now;
        csr.params.not_after = now + validity;
        csr.signed_by(&self.cert, &self.key).unwrap().pem()
    }
}

/// Secret store holding `ca` under `secret_name` in the control-plane namespace.
pub async fn secret_store_with_root(secret_name: &str, ca: &TestCa) -> Arc<InMemorySecretStore> {
    let store = Arc::new(InMemorySecretStore::new());
    let data = SecretData::new().with_entry(CA_CERT_KEY, ca.pem());
    store.create_secret(CONTROL_PLANE_NAMESPACE, secret_name, data).await.unwrap();
    store
}

/// `CertificateRequestClient` that signs every request as soon as it is
/// created.
#[derive(Debug)]
pub struct SigningRequestClient {
    ca: TestCa,
    requests: Mutex<HashMap<String, CertificateRequest>>,
    pub created: Mutex<Vec<String>>,
    pub deleted: Mutex<Vec<String>>,
}

impl SigningRequestClient {
    pub fn new(ca: TestCa) -> Self {
        Self {
            ca,
            requests: Mutex::new(HashMap::new()),
            created: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
        }
    }

    pub async fn outstanding(&self) -> usize {
        self.requests.lock().await.len()
    }
}

#[async_trait]
impl CertificateRequestClient for SigningRequestClient {
    async fn create(
        &self,
        mut request: CertificateRequest,
    ) -> Result<CertificateRequest, IssuanceError> {
        let signed = self.ca.sign_request(&request.spec.request, request.spec.duration);
        request.status.certificate = Some(signed);
        request.status.ca = Some(self.ca.pem());
        request.status.conditions = vec![RequestCondition {
            condition_type: RequestConditionType::Ready,
            status: true,
            reason: "Issued".to_string(),
            message: String::new(),
        }];

        self.created.lock().await.push(request.name.clone());
        self.requests.lock().await.insert(request.name.clone(), request.clone());
        Ok(request)
    }

    async fn get(&self, _namespace: &str, name: &str) -> Result<CertificateRequest, IssuanceError> {
        self.requests
            .lock()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| IssuanceError::unavailable("cert-manager", "request not found"))
    }

    async fn delete(&self, _namespace: &str, name: &str) -> Result<(), IssuanceError> {
        self.requests.lock().await.remove(name);
        self.deleted.lock().await.push(name.to_string());
        Ok(())
    }
}
