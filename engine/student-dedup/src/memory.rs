//! In-memory student store (for testing and rehearsals)
//!
//! Enforces the same referential rules as the relational schema: dependents
//! must point at an existing student, a gateway link referenced by payments
//! cannot be deleted, a user shared by another student cannot be deleted, and
//! external customer ids are unique.

use crate::error::{DedupError, Result};
use crate::model::{
    AttendanceRecord, BillingPlan, ExternalCustomerLink, OrganizationCounts, PlanUsage,
    StudentRecord, StudentSummary, SubscriptionRecord,
};
use crate::store::{
    expect_row, DependentTransfer, PurgeCounts, StudentStore, SubscriptionAction, TransferCounts,
};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredStudent {
    pub organization_id: Uuid,
    pub record: StudentRecord,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredPlan {
    pub organization_id: Uuid,
    pub plan: BillingPlan,
}

/// A gateway payment; it pins the customer link it references
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredPayment {
    pub id: Uuid,
    pub link_id: Uuid,
}

/// Plain table contents, comparable record-for-record
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dataset {
    pub users: Vec<Uuid>,
    pub students: Vec<StoredStudent>,
    pub subscriptions: Vec<SubscriptionRecord>,
    pub attendances: Vec<AttendanceRecord>,
    pub links: Vec<ExternalCustomerLink>,
    pub payments: Vec<StoredPayment>,
    pub plans: Vec<StoredPlan>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a student; its user record is created if not already present
    pub fn insert_student(&mut self, organization_id: Uuid, record: StudentRecord) -> Uuid {
        if !self.users.contains(&record.user_id) {
            self.users.push(record.user_id);
        }
        let id = record.id;
        self.students.push(StoredStudent { organization_id, record });
        id
    }

    pub fn insert_plan(&mut self, organization_id: Uuid, plan: BillingPlan) -> Uuid {
        let id = plan.id;
        self.plans.push(StoredPlan { organization_id, plan });
        id
    }

    pub fn insert_subscription(&mut self, subscription: SubscriptionRecord) -> Uuid {
        let id = subscription.id;
        self.subscriptions.push(subscription);
        id
    }

    pub fn insert_attendance(&mut self, student_id: Uuid) -> Uuid {
        let id = Uuid::new_v4();
        self.attendances.push(AttendanceRecord { id, student_id });
        id
    }

    /// Add a gateway link, enforcing one per student and one per external id
    pub fn insert_link(&mut self, student_id: Uuid, external_id: &str) -> Result<Uuid> {
        if self.links.iter().any(|l| l.external_id == external_id) {
            return Err(DedupError::constraint(format!(
                "external customer {external_id} already linked"
            )));
        }
        if self.links.iter().any(|l| l.student_id == student_id) {
            return Err(DedupError::constraint(format!("student {student_id} already linked")));
        }
        let id = Uuid::new_v4();
        self.links.push(ExternalCustomerLink {
            id,
            student_id,
            external_id: external_id.to_string(),
        });
        Ok(id)
    }

    pub fn insert_payment(&mut self, link_id: Uuid) -> Uuid {
        let id = Uuid::new_v4();
        self.payments.push(StoredPayment { id, link_id });
        id
    }

    pub fn student(&self, id: Uuid) -> Option<&StudentRecord> {
        self.students.iter().find(|s| s.record.id == id).map(|s| &s.record)
    }

    fn student_mut(&mut self, id: Uuid) -> Option<&mut StudentRecord> {
        self.students.iter_mut().find(|s| s.record.id == id).map(|s| &mut s.record)
    }

    fn summarize(&self, record: &StudentRecord) -> StudentSummary {
        let subscriptions = self.subscriptions.iter().filter(|s| s.student_id == record.id);
        let (active, total) = subscriptions
            .fold((0u64, 0u64), |(active, total), s| (active + s.is_active as u64, total + 1));

        StudentSummary {
            student: record.clone(),
            link: self.links.iter().find(|l| l.student_id == record.id).cloned(),
            active_subscriptions: active,
            total_subscriptions: total,
            attendance_count: self
                .attendances
                .iter()
                .filter(|a| a.student_id == record.id)
                .count() as u64,
        }
    }

    fn organization_students(&self, organization_id: Uuid) -> Vec<&StudentRecord> {
        let mut students: Vec<&StudentRecord> = self
            .students
            .iter()
            .filter(|s| s.organization_id == organization_id)
            .map(|s| &s.record)
            .collect();
        students.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        students
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    data: Dataset,
    writes: u64,
    failing: HashSet<Uuid>,
}

impl MemoryState {
    fn check_failure(&self, student_id: Uuid) -> Result<()> {
        if self.failing.contains(&student_id) {
            return Err(DedupError::constraint(format!(
                "write rejected for student {student_id}"
            )));
        }
        Ok(())
    }
}

/// Student store backed by a [`Dataset`] behind an async mutex
#[derive(Debug, Clone, Default)]
pub struct InMemoryStudentStore {
    state: Arc<Mutex<MemoryState>>,
}

impl InMemoryStudentStore {
    pub fn new(data: Dataset) -> Self {
        Self { state: Arc::new(Mutex::new(MemoryState { data, ..MemoryState::default() })) }
    }

    /// Copy of the current table contents
    pub async fn snapshot(&self) -> Dataset {
        self.state.lock().await.data.clone()
    }

    /// Number of successful mutating calls
    pub async fn write_count(&self) -> u64 {
        self.state.lock().await.writes
    }

    /// Make every mutation touching this student fail with a constraint error
    pub async fn fail_mutations_for(&self, student_id: Uuid) {
        self.state.lock().await.failing.insert(student_id);
    }
}

#[async_trait::async_trait]
impl StudentStore for InMemoryStudentStore {
    async fn load_students(&self, organization_id: Uuid) -> Result<Vec<StudentSummary>> {
        let state = self.state.lock().await;
        let data = &state.data;
        Ok(data
            .organization_students(organization_id)
            .into_iter()
            .map(|record| data.summarize(record))
            .collect())
    }

    async fn transfer_dependents(&self, transfer: &DependentTransfer) -> Result<TransferCounts> {
        let mut state = self.state.lock().await;
        state.check_failure(transfer.from)?;

        let data = &mut state.data;
        if data.student(transfer.from).is_none() {
            return Err(DedupError::not_found("student", transfer.from));
        }
        if data.student(transfer.to).is_none() {
            return Err(DedupError::constraint(format!(
                "keeper {} does not exist",
                transfer.to
            )));
        }

        let mut counts = TransferCounts::default();
        match transfer.subscriptions {
            SubscriptionAction::Reassign => {
                for sub in data.subscriptions.iter_mut().filter(|s| s.student_id == transfer.from) {
                    sub.student_id = transfer.to;
                    counts.subscriptions += 1;
                }
            }
            SubscriptionAction::Delete => {
                let before = data.subscriptions.len();
                data.subscriptions.retain(|s| s.student_id != transfer.from);
                counts.subscriptions = (before - data.subscriptions.len()) as u64;
            }
        }

        for attendance in data.attendances.iter_mut().filter(|a| a.student_id == transfer.from) {
            attendance.student_id = transfer.to;
            counts.attendances += 1;
        }

        state.writes += 1;
        Ok(counts)
    }

    async fn delete_external_link(&self, link_id: Uuid) -> Result<()> {
        let mut state = self.state.lock().await;
        let link = state
            .data
            .links
            .iter()
            .find(|l| l.id == link_id)
            .cloned()
            .ok_or_else(|| DedupError::not_found("external customer link", link_id))?;
        state.check_failure(link.student_id)?;

        if state.data.payments.iter().any(|p| p.link_id == link_id) {
            return Err(DedupError::constraint(format!(
                "payments still reference customer {}",
                link.external_id
            )));
        }

        state.data.links.retain(|l| l.id != link_id);
        state.writes += 1;
        Ok(())
    }

    async fn deactivate_student(&self, student_id: Uuid) -> Result<()> {
        let mut state = self.state.lock().await;
        state.check_failure(student_id)?;
        let student = state
            .data
            .student_mut(student_id)
            .ok_or_else(|| DedupError::not_found("student", student_id))?;
        student.is_active = false;
        state.writes += 1;
        Ok(())
    }

    async fn activate_student(&self, student_id: Uuid) -> Result<()> {
        let mut state = self.state.lock().await;
        state.check_failure(student_id)?;
        let student = state
            .data
            .student_mut(student_id)
            .ok_or_else(|| DedupError::not_found("student", student_id))?;
        student.is_active = true;
        state.writes += 1;
        Ok(())
    }

    async fn purge_student(&self, student_id: Uuid, user_id: Uuid) -> Result<PurgeCounts> {
        let mut state = self.state.lock().await;
        state.check_failure(student_id)?;

        let data = &mut state.data;
        if data.student(student_id).is_none() {
            return Err(DedupError::not_found("student", student_id));
        }

        // Check every constraint up front so a refusal leaves nothing half-deleted
        let link = data.links.iter().find(|l| l.student_id == student_id).cloned();
        if let Some(link) = &link {
            if data.payments.iter().any(|p| p.link_id == link.id) {
                return Err(DedupError::constraint(format!(
                    "payments still reference customer {}",
                    link.external_id
                )));
            }
        }
        if data.students.iter().any(|s| s.record.user_id == user_id && s.record.id != student_id)
        {
            return Err(DedupError::constraint(format!(
                "user {user_id} is still referenced by another student"
            )));
        }

        let mut counts = PurgeCounts::default();

        let before = data.subscriptions.len();
        data.subscriptions.retain(|s| s.student_id != student_id);
        counts.subscriptions = (before - data.subscriptions.len()) as u64;

        let before = data.attendances.len();
        data.attendances.retain(|a| a.student_id != student_id);
        counts.attendances = (before - data.attendances.len()) as u64;

        if let Some(link) = link {
            data.links.retain(|l| l.id != link.id);
            counts.links = 1;
        }

        data.students.retain(|s| s.record.id != student_id);
        data.users.retain(|u| *u != user_id);

        state.writes += 1;
        Ok(counts)
    }

    async fn inactive_students_with_active_subscriptions(
        &self,
        organization_id: Uuid,
    ) -> Result<Vec<StudentSummary>> {
        Ok(self
            .load_students(organization_id)
            .await?
            .into_iter()
            .filter(|s| !s.student.is_active && s.has_active_subscription())
            .collect())
    }

    async fn deactivate_active_subscriptions(&self, student_id: Uuid) -> Result<u64> {
        let mut state = self.state.lock().await;
        state.check_failure(student_id)?;

        let mut changed = 0;
        for sub in state
            .data
            .subscriptions
            .iter_mut()
            .filter(|s| s.student_id == student_id && s.is_active)
        {
            sub.is_active = false;
            changed += 1;
        }

        state.writes += 1;
        Ok(changed)
    }

    async fn active_subscriptions(
        &self,
        organization_id: Uuid,
    ) -> Result<Vec<SubscriptionRecord>> {
        let state = self.state.lock().await;
        let data = &state.data;
        Ok(data
            .organization_students(organization_id)
            .into_iter()
            .flat_map(move |student| {
                data.subscriptions
                    .iter()
                    .filter(move |s| s.student_id == student.id && s.is_active)
                    .cloned()
            })
            .collect())
    }

    async fn deactivate_subscription(&self, subscription_id: Uuid) -> Result<()> {
        let mut state = self.state.lock().await;
        let owner = state
            .data
            .subscriptions
            .iter()
            .find(|s| s.id == subscription_id)
            .map(|s| s.student_id)
            .ok_or_else(|| DedupError::not_found("subscription", subscription_id))?;
        state.check_failure(owner)?;

        if let Some(sub) = state.data.subscriptions.iter_mut().find(|s| s.id == subscription_id) {
            sub.is_active = false;
        }
        state.writes += 1;
        Ok(())
    }

    async fn plan_usage(&self, organization_id: Uuid) -> Result<Vec<PlanUsage>> {
        let state = self.state.lock().await;
        let data = &state.data;
        Ok(data
            .plans
            .iter()
            .filter(|p| p.organization_id == organization_id)
            .map(|p| PlanUsage {
                plan: p.plan.clone(),
                active_subscriptions: data
                    .subscriptions
                    .iter()
                    .filter(|s| s.plan_id == p.plan.id && s.is_active)
                    .count() as u64,
            })
            .collect())
    }

    async fn deactivate_plan(&self, plan_id: Uuid) -> Result<()> {
        let mut state = self.state.lock().await;
        let mut rows = 0;
        for stored in state.data.plans.iter_mut().filter(|p| p.plan.id == plan_id) {
            stored.plan.is_active = false;
            rows += 1;
        }
        expect_row(rows, "billing plan", plan_id)?;
        state.writes += 1;
        Ok(())
    }

    async fn counts(&self, organization_id: Uuid) -> Result<OrganizationCounts> {
        let state = self.state.lock().await;
        let data = &state.data;
        let students = data.organization_students(organization_id);
        let ids: HashSet<Uuid> = students.iter().map(|s| s.id).collect();

        Ok(OrganizationCounts {
            students: students.len() as u64,
            active_students: students.iter().filter(|s| s.is_active).count() as u64,
            active_subscriptions: data
                .subscriptions
                .iter()
                .filter(|s| s.is_active && ids.contains(&s.student_id))
                .count() as u64,
        })
    }
}
