//! Recipient resolution: expands a notification target into channel addresses.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use herald_common::types::{AddressField, Member, RecipientTarget};

/// Failures while reading group membership.
#[derive(Debug, Error)]
pub enum MembershipError {
    #[error("recipient group {0} not found")]
    GroupNotFound(Uuid),

    #[error("membership lookup failed: {0}")]
    Backend(String),
}

/// Read-only view of recipient groups and users.
#[async_trait]
pub trait GroupMembership: Send + Sync {
    /// Members of `group`, in the store's stable order.
    async fn members(&self, group: Uuid) -> Result<Vec<Member>, MembershipError>;

    /// A single recipient identity, if known.
    async fn user(&self, user_id: Uuid) -> Result<Option<Member>, MembershipError>;
}

/// Expands recipient targets for one channel's address field.
#[derive(Clone)]
pub struct RecipientResolver {
    membership: Arc<dyn GroupMembership>,
    field: AddressField,
}

impl RecipientResolver {
    pub fn new(membership: Arc<dyn GroupMembership>, field: AddressField) -> Self {
        Self { membership, field }
    }

    pub fn field(&self) -> AddressField {
        self.field
    }

    /// Addresses of every member of the target's groups.
    ///
    /// Members without an address are skipped and duplicates are dropped,
    /// keeping first-seen order. An empty result means the caller should use
    /// `fallback_address` instead.
    pub async fn resolve(&self, target: &RecipientTarget) -> Result<Vec<String>, MembershipError> {
        let mut seen = HashSet::new();
        let mut addresses = Vec::new();

        for group in &target.groups {
            let members = self.membership.members(*group).await?;
            let total = members.len();
            let mut skipped = 0usize;

            for member in &members {
                match member.address(self.field) {
                    Some(address) => {
                        if seen.insert(address.to_string()) {
                            addresses.push(address.to_string());
                        }
                    }
                    None => skipped += 1,
                }
            }

            if skipped > 0 {
                tracing::debug!(
                    group_id = %group,
                    field = %self.field,
                    skipped,
                    total,
                    "Skipped group members without an address"
                );
            }
        }

        Ok(addresses)
    }

    /// The single direct address of the target: the stored address, or the
    /// address of the explicit recipient identity.
    pub async fn fallback_address(
        &self,
        target: &RecipientTarget,
    ) -> Result<Option<String>, MembershipError> {
        if let Some(address) = target
            .address
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
        {
            return Ok(Some(address.to_string()));
        }

        let Some(user_id) = target.user_id else {
            return Ok(None);
        };

        let user = self.membership.user(user_id).await?;
        Ok(user.and_then(|u| u.address(self.field).map(str::to_string)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct StaticMembership {
        groups: HashMap<Uuid, Vec<Member>>,
        users: Vec<Member>,
    }

    #[async_trait]
    impl GroupMembership for StaticMembership {
        async fn members(&self, group: Uuid) -> Result<Vec<Member>, MembershipError> {
            self.groups
                .get(&group)
                .cloned()
                .ok_or(MembershipError::GroupNotFound(group))
        }

        async fn user(&self, user_id: Uuid) -> Result<Option<Member>, MembershipError> {
            Ok(self.users.iter().find(|u| u.user_id == user_id).cloned())
        }
    }

    fn member(phone: Option<&str>) -> Member {
        Member {
            user_id: Uuid::new_v4(),
            phone: phone.map(str::to_string),
            email: None,
        }
    }

    fn resolver(groups: HashMap<Uuid, Vec<Member>>, users: Vec<Member>) -> RecipientResolver {
        RecipientResolver::new(
            Arc::new(StaticMembership { groups, users }),
            AddressField::Phone,
        )
    }

    #[tokio::test]
    async fn test_dedup_keeps_first_seen_order() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let groups = HashMap::from([
            (a, vec![member(Some("+2")), member(None), member(Some("+1"))]),
            (b, vec![member(Some("+1")), member(Some("+3")), member(Some("+2"))]),
        ]);

        let addresses = resolver(groups, vec![])
            .resolve(&RecipientTarget::groups(vec![a, b]))
            .await
            .unwrap();
        assert_eq!(addresses, vec!["+2", "+1", "+3"]);
    }

    #[tokio::test]
    async fn test_group_without_addresses_is_empty() {
        let a = Uuid::new_v4();
        let groups = HashMap::from([(a, vec![member(None), member(Some(" "))])]);

        let addresses = resolver(groups, vec![])
            .resolve(&RecipientTarget::groups(vec![a]))
            .await
            .unwrap();
        assert!(addresses.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_group_is_an_error() {
        let result = resolver(HashMap::new(), vec![])
            .resolve(&RecipientTarget::groups(vec![Uuid::new_v4()]))
            .await;
        assert!(matches!(result, Err(MembershipError::GroupNotFound(_))));
    }

    #[tokio::test]
    async fn test_fallback_prefers_stored_address() {
        let user = member(Some("+9"));
        let target = RecipientTarget {
            address: Some("+5".to_string()),
            user_id: Some(user.user_id),
            groups: vec![],
        };
        let resolver = resolver(HashMap::new(), vec![user.clone()]);
        assert_eq!(
            resolver.fallback_address(&target).await.unwrap().as_deref(),
            Some("+5")
        );

        let by_user = RecipientTarget::user(user.user_id);
        assert_eq!(
            resolver.fallback_address(&by_user).await.unwrap().as_deref(),
            Some("+9")
        );
        assert_eq!(
            resolver
                .fallback_address(&RecipientTarget::default())
                .await
                .unwrap(),
            None
        );
    }
}
