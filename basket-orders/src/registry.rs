use basket_core::identity::IdOrigin;
use basket_core::{BasketError, BasketResult, EntityType, IdentityAllocator};
use serde::Serialize;
use std::sync::Arc;
use tracing;
use uuid::Uuid;

use crate::store::{NewCart, NewUser, RecordStore};

/// Freshly created record. Only `external_id` leaves the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RecordRef {
    #[serde(skip)]
    pub id: i64,
    #[serde(rename = "id")]
    pub external_id: Uuid,
}

/// Creates users and carts with allocated internal and external ids.
pub struct Registry {
    store: Arc<dyn RecordStore>,
    ids: Arc<IdentityAllocator>,
}

impl Registry {
    pub fn new(store: Arc<dyn RecordStore>, ids: Arc<IdentityAllocator>) -> Self {
        Self { store, ids }
    }

    pub async fn register_user(
        &self,
        email: &str,
        display_name: Option<String>,
        origin: IdOrigin,
    ) -> BasketResult<RecordRef> {
        let email = email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(BasketError::InvalidSettings(format!("invalid email: {:?}", email)));
        }

        let id = self.ids.allocate_internal_id(EntityType::User, origin)?;
        let external_id = self.ids.issue_external_id(EntityType::User).await?;
        self.store
            .insert_user(NewUser {
                id,
                external_id,
                email: email.to_string(),
                display_name,
                imported: matches!(origin, IdOrigin::Historical(_)),
            })
            .await?;

        tracing::info!("Registered user {}", external_id);
        Ok(RecordRef { id, external_id })
    }

    pub async fn open_cart(&self, external_user_id: &str) -> BasketResult<RecordRef> {
        let user_id = self.ids.resolve_str(EntityType::User, external_user_id).await?;
        let id = self.ids.allocate_internal_id(EntityType::Cart, IdOrigin::New)?;
        let external_id = self.ids.issue_external_id(EntityType::Cart).await?;
        self.store
            .insert_cart(NewCart {
                id,
                external_id,
                user_id,
                imported: false,
            })
            .await?;

        tracing::debug!("Opened cart {} for user {}", external_id, external_user_id);
        Ok(RecordRef { id, external_id })
    }
}
