//! Account registration and lookup
//!
//! Registration generates the RSA-4096 account key, signs the `newAccount`
//! request with the embedded `jwk`, and persists the CA-issued account URL
//! as the `kid` for every later request. The key never changes after
//! creation.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::acme::{AcmeClient, JwsSigner, NewAccountRequest};
use crate::keys;
use crate::model::Account;
use crate::store::AccountRepo;

use super::ServiceError;

/// Result of a registration request
#[derive(Debug)]
pub enum RegisterOutcome {
    Created(Account),
    /// The uuid is already registered locally; nothing was sent to the CA.
    AlreadyExists,
}

/// Account business rules
pub struct AccountService {
    acme: AcmeClient,
    accounts: Arc<dyn AccountRepo>,
}

impl AccountService {
    pub fn new(acme: AcmeClient, accounts: Arc<dyn AccountRepo>) -> Self {
        Self { acme, accounts }
    }

    /// Register `user_uuid` with the CA. Contact entries arrive as bare
    /// email addresses and are prefixed with `mailto:`.
    pub async fn register(
        &self,
        user_uuid: &str,
        contact: &[String],
    ) -> Result<RegisterOutcome, ServiceError> {
        if self.accounts.exists_by_uuid(user_uuid).await? {
            return Ok(RegisterOutcome::AlreadyExists);
        }

        // 4096-bit generation takes seconds; keep it off the runtime
        // threads.
        let key = tokio::task::spawn_blocking(keys::generate_rsa_key)
            .await
            .map_err(|_| ServiceError::KeygenAborted)??;
        let private_key_pem = keys::private_key_to_pem(&key)?;

        let contact_uris = normalize_contacts(contact);
        let request = NewAccountRequest {
            contact: contact_uris.clone(),
            terms_of_service_agreed: true,
            only_return_existing: false,
        };

        let mut conversation = self
            .acme
            .conversation(JwsSigner::for_registration(key))
            .await?;
        let (response, account_url) = conversation.new_account(&request).await?;

        let account = Account {
            uuid: user_uuid.to_string(),
            // Prefer the CA's echoed contact list; fall back to what we
            // sent.
            contact: if response.contact.is_empty() {
                contact_uris
            } else {
                response.contact
            },
            terms_of_service_agreed: true,
            private_key: private_key_pem,
            status: response.status,
            url: account_url,
            create_time: Utc::now().timestamp(),
        };

        self.accounts.create(&account).await?;

        info!(
            user_uuid = %user_uuid,
            account_url = %account.url,
            status = %account.status,
            "Registered ACME account"
        );

        Ok(RegisterOutcome::Created(account))
    }

    pub async fn get(&self, user_uuid: &str) -> Result<Account, ServiceError> {
        Ok(self.accounts.get_by_uuid(user_uuid).await?)
    }

    /// Delete the local record. The CA-side account is left as-is: its key
    /// is destroyed with this row, so it cannot be used again.
    pub async fn delete(&self, user_uuid: &str) -> Result<(), ServiceError> {
        self.accounts.delete(user_uuid).await?;
        warn!(user_uuid = %user_uuid, "Deleted local account; CA account was not deactivated");
        Ok(())
    }
}

/// Prefix bare email addresses with `mailto:`; entries that already carry a
/// scheme are passed through.
pub(crate) fn normalize_contacts(contact: &[String]) -> Vec<String> {
    contact
        .iter()
        .map(|entry| {
            if entry.contains(':') {
                entry.clone()
            } else {
                format!("mailto:{entry}")
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_emails_get_mailto_prefix() {
        let contacts = normalize_contacts(&["ops@example.test".to_string()]);
        assert_eq!(contacts, vec!["mailto:ops@example.test"]);
    }

    #[test]
    fn existing_scheme_is_preserved() {
        let contacts = normalize_contacts(&[
            "mailto:ops@example.test".to_string(),
            "a@x.test".to_string(),
        ]);
        assert_eq!(contacts, vec!["mailto:ops@example.test", "mailto:a@x.test"]);
    }
}
