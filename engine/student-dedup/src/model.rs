//! Records loaded from the academy datastore

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An enrolled student joined with its identity/login record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentRecord {
    pub id: Uuid,
    /// Identity/login record owning the personal data
    pub user_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    /// National ID (CPF) as stored, possibly formatted
    pub national_id: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl StudentRecord {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name).trim().to_string()
    }

    /// First eight characters of the id, enough to find the row by hand
    pub fn short_id(&self) -> String {
        self.id.to_string().chars().take(8).collect()
    }
}

/// A billing plan instance owned by exactly one student
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct SubscriptionRecord {
    pub id: Uuid,
    pub student_id: Uuid,
    pub plan_id: Uuid,
    pub plan_name: String,
    pub is_active: bool,
    pub current_price: Option<Decimal>,
}

/// A single class check-in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub id: Uuid,
    pub student_id: Uuid,
}

/// Link between a student and its customer record in the payment gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalCustomerLink {
    pub id: Uuid,
    pub student_id: Uuid,
    /// Customer id in the payment gateway, unique across the dataset
    pub external_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingPlan {
    pub id: Uuid,
    pub name: String,
    pub is_active: bool,
}

/// A plan with the number of active subscriptions pointing at it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanUsage {
    pub plan: BillingPlan,
    pub active_subscriptions: u64,
}

/// A student together with what hangs off it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentSummary {
    pub student: StudentRecord,
    pub link: Option<ExternalCustomerLink>,
    pub active_subscriptions: u64,
    pub total_subscriptions: u64,
    pub attendance_count: u64,
}

impl StudentSummary {
    pub fn id(&self) -> Uuid {
        self.student.id
    }

    pub fn has_link(&self) -> bool {
        self.link.is_some()
    }

    pub fn has_active_subscription(&self) -> bool {
        self.active_subscriptions > 0
    }

    /// Inactive with nothing attached: a soft-deleted loser from an earlier run
    pub fn is_settled(&self) -> bool {
        !self.student.is_active
            && self.link.is_none()
            && self.total_subscriptions == 0
            && self.attendance_count == 0
    }
}

/// Aggregate counts printed after a mutating run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationCounts {
    pub students: u64,
    pub active_students: u64,
    pub active_subscriptions: u64,
}
