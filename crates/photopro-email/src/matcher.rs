use crate::EmailError;
use photopro_core::EmailAccount;
use photopro_storage::Storage;
use uuid::Uuid;

/// Resolves a thread's participants to a known client of the organization.
#[derive(Clone)]
pub struct ClientMatcher {
    storage: Storage,
}

impl ClientMatcher {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    /// Participants minus the mailbox's own address, lower-cased and
    /// de-duplicated in first-seen order.
    pub fn candidate_emails(own_address: &str, participants: &[String]) -> Vec<String> {
        let own = own_address.trim().to_lowercase();
        let mut candidates: Vec<String> = Vec::with_capacity(participants.len());
        for participant in participants {
            let email = participant.trim().to_lowercase();
            if email.is_empty() || email == own || candidates.contains(&email) {
                continue;
            }
            candidates.push(email);
        }
        candidates
    }

    /// The oldest matching client wins when several participants are known.
    pub async fn match_client(
        &self,
        account: &EmailAccount,
        participants: &[String],
    ) -> Result<Option<Uuid>, EmailError> {
        let candidates = Self::candidate_emails(&account.email_address, participants);
        if candidates.is_empty() {
            return Ok(None);
        }

        let client_id = self
            .storage
            .find_client_by_emails(&account.organization_id, &candidates)
            .await?;
        if let Some(client_id) = client_id {
            tracing::debug!(account_id = %account.id, %client_id, "thread matched to client");
        }
        Ok(client_id)
    }
}
