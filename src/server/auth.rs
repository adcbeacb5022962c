// ABOUTME: Customer bind authentication behind the CredentialStore trait
// ABOUTME: StaticCredentials checks configured system_id/password pairs; AllowAll accepts any bind

use async_trait::async_trait;
use std::collections::HashMap;

/// Decides whether a customer bind is accepted
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn authenticate(&self, system_id: &str, password: &str) -> bool;
}

/// Fixed `system_id -> password` table. Unknown system IDs are rejected.
#[derive(Debug, Default, Clone)]
pub struct StaticCredentials {
    credentials: HashMap<String, String>,
}

impl StaticCredentials {
    pub fn new<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            credentials: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }
}

#[async_trait]
impl CredentialStore for StaticCredentials {
    async fn authenticate(&self, system_id: &str, password: &str) -> bool {
        self.credentials
            .get(system_id)
            .is_some_and(|expected| expected == password)
    }
}

/// Accepts every bind. Development only.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

#[async_trait]
impl CredentialStore for AllowAll {
    async fn authenticate(&self, _system_id: &str, _password: &str) -> bool {
        true
    }
}
