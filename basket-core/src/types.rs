use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::BasketError;
use crate::schema::{carts, order_status_history, orders, users};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    User,
    Order,
    Cart,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::User => "user",
            EntityType::Order => "order",
            EntityType::Cart => "cart",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether status changes write history. Chosen per state machine instance;
/// nothing switches it implicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditMode {
    /// Every status change writes exactly one history row.
    Record,
    /// History rows are suppressed; used for historical backfills.
    Bulk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
    Failed,
    ReturnRequested,
    Returned,
    Refunded,
}

impl OrderStatus {
    pub const INITIAL: OrderStatus = OrderStatus::Pending;

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Failed => "failed",
            OrderStatus::ReturnRequested => "return_requested",
            OrderStatus::Returned => "returned",
            OrderStatus::Refunded => "refunded",
        }
    }

    /// Whether `self -> next` is one of the expected business paths. Other
    /// changes are still accepted and audited.
    pub fn is_sanctioned(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Processing, Shipped)
                | (Shipped, Delivered)
                | (Delivered, ReturnRequested)
                | (ReturnRequested, Returned)
                | (Returned, Refunded)
                | (Pending | Processing, Cancelled | Failed)
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = BasketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "processing" => Ok(OrderStatus::Processing),
            "shipped" => Ok(OrderStatus::Shipped),
            "delivered" => Ok(OrderStatus::Delivered),
            "cancelled" => Ok(OrderStatus::Cancelled),
            "failed" => Ok(OrderStatus::Failed),
            "return_requested" => Ok(OrderStatus::ReturnRequested),
            "returned" => Ok(OrderStatus::Returned),
            "refunded" => Ok(OrderStatus::Refunded),
            other => Err(BasketError::InvalidStatus(other.to_string())),
        }
    }
}

/// Order as seen by callers. Internal keys are carried for in-process use
/// and never serialized.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderSnapshot {
    #[serde(skip)]
    pub id: i64,
    #[serde(rename = "id")]
    pub external_id: Uuid,
    #[serde(skip)]
    pub user_id: i64,
    #[serde(rename = "user_id")]
    pub user_external_id: Uuid,
    pub status: OrderStatus,
    pub total_items: i32,
    pub imported: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One row of the status audit trail.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    #[serde(skip)]
    pub id: i64,
    #[serde(skip)]
    pub order_id: i64,
    #[serde(rename = "order_id")]
    pub order_external_id: Uuid,
    pub old_status: Option<OrderStatus>,
    pub new_status: OrderStatus,
    pub changed_at: DateTime<Utc>,
    #[serde(skip)]
    pub changed_by: Option<i64>,
    #[serde(rename = "changed_by")]
    pub changed_by_external_id: Option<Uuid>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = orders)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct OrderRow {
    pub id: i64,
    pub external_id: Uuid,
    pub user_id: i64,
    pub status: String,
    pub total_items: i32,
    pub imported: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderRow {
    pub fn into_snapshot(self, user_external_id: Uuid) -> Result<OrderSnapshot, BasketError> {
        Ok(OrderSnapshot {
            id: self.id,
            external_id: self.external_id,
            user_id: self.user_id,
            user_external_id,
            status: self.status.parse()?,
            total_items: self.total_items,
            imported: self.imported,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = orders)]
pub struct NewOrderRow<'a> {
    pub id: i64,
    pub external_id: Uuid,
    pub user_id: i64,
    pub status: &'a str,
    pub total_items: i32,
    pub imported: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = order_status_history)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct HistoryRow {
    pub id: i64,
    pub order_id: i64,
    pub old_status: Option<String>,
    pub new_status: String,
    pub changed_at: DateTime<Utc>,
    pub changed_by: Option<i64>,
    pub note: Option<String>,
}

impl HistoryRow {
    pub fn into_entry(
        self,
        order_external_id: Uuid,
        changed_by_external_id: Option<Uuid>,
    ) -> Result<AuditEntry, BasketError> {
        Ok(AuditEntry {
            id: self.id,
            order_id: self.order_id,
            order_external_id,
            old_status: self.old_status.as_deref().map(str::parse).transpose()?,
            new_status: self.new_status.parse()?,
            changed_at: self.changed_at,
            changed_by: self.changed_by,
            changed_by_external_id,
            note: self.note,
        })
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = order_status_history)]
pub struct NewHistoryRow<'a> {
    pub order_id: i64,
    pub old_status: Option<&'a str>,
    pub new_status: &'a str,
    pub changed_at: DateTime<Utc>,
    pub changed_by: Option<i64>,
    pub note: Option<&'a str>,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct UserRow {
    pub id: i64,
    pub external_id: Uuid,
    pub email: String,
    pub display_name: Option<String>,
    pub imported: bool,
    pub days_between_notifications: Option<i32>,
    pub notifications_start_at: Option<DateTime<Utc>>,
    pub next_scheduled_at: Option<DateTime<Utc>>,
    pub pending_notification: bool,
    pub last_notification_sent_at: Option<DateTime<Utc>>,
    pub notify_via_email: bool,
    pub notification_claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUserRow<'a> {
    pub id: i64,
    pub external_id: Uuid,
    pub email: &'a str,
    pub display_name: Option<&'a str>,
    pub imported: bool,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = carts)]
pub struct NewCartRow {
    pub id: i64,
    pub external_id: Uuid,
    pub user_id: i64,
    pub imported: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATUSES: [OrderStatus; 9] = [
        OrderStatus::Pending,
        OrderStatus::Processing,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
        OrderStatus::Failed,
        OrderStatus::ReturnRequested,
        OrderStatus::Returned,
        OrderStatus::Refunded,
    ];

    #[test]
    fn status_text_matches_storage_values() {
        for status in ALL_STATUSES {
            assert_eq!(status.as_str().parse::<OrderStatus>().unwrap(), status);
        }
        assert_eq!(
            serde_json::to_string(&OrderStatus::ReturnRequested).unwrap(),
            "\"return_requested\""
        );
    }

    #[test]
    fn unknown_status_is_rejected() {
        let err = "lost_in_transit".parse::<OrderStatus>().unwrap_err();
        assert!(matches!(err, BasketError::InvalidStatus(s) if s == "lost_in_transit"));
        assert!("Pending".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn sanctioned_paths() {
        assert!(OrderStatus::Pending.is_sanctioned(OrderStatus::Processing));
        assert!(OrderStatus::Processing.is_sanctioned(OrderStatus::Cancelled));
        assert!(OrderStatus::Delivered.is_sanctioned(OrderStatus::ReturnRequested));
        assert!(OrderStatus::Returned.is_sanctioned(OrderStatus::Refunded));
        assert!(!OrderStatus::Shipped.is_sanctioned(OrderStatus::Cancelled));
        assert!(!OrderStatus::Refunded.is_sanctioned(OrderStatus::Pending));
    }

    #[test]
    fn snapshot_hides_internal_ids() {
        let now = Utc::now();
        let snapshot = OrderSnapshot {
            id: 10_000_001,
            external_id: Uuid::new_v4(),
            user_id: 42,
            user_external_id: Uuid::new_v4(),
            status: OrderStatus::Shipped,
            total_items: 3,
            imported: false,
            created_at: now,
            updated_at: now,
        };
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["id"], serde_json::json!(snapshot.external_id));
        assert_eq!(json["user_id"], serde_json::json!(snapshot.user_external_id));
        assert_eq!(json["status"], "shipped");
        let fields = json.as_object().unwrap();
        assert!(!fields.values().any(|v| v == &serde_json::json!(10_000_001)));
        assert!(!fields.values().any(|v| v == &serde_json::json!(42)));
    }
}
