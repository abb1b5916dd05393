//! In-memory doubles for the store and gateway seams.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use yogvaidya_shared::BillingPeriod;

use crate::client::{
    GatewaySubscription, OrderHandle, PaymentGateway, PaymentRecord, PlanHandle,
};
use crate::error::{BillingError, BillingResult};
use crate::store::{
    SubscriptionPatch, SubscriptionRecord, SubscriptionSnapshot, UserRecord, UserStore,
};

pub fn payment(id: &str, amount_paise: i64, email: Option<&str>, created_at: i64) -> PaymentRecord {
    let mut value = serde_json::json!({
        "id": id,
        "amount": amount_paise,
        "currency": "INR",
        "status": "captured",
        "method": "card",
        "created_at": created_at,
        "notes": {},
    });
    if let Some(email) = email {
        value["email"] = serde_json::json!(email);
    }
    serde_json::from_value(value).unwrap()
}

/// Store double. `fail_updates` makes `update_subscription` error so
/// tests can exercise the write-failure paths.
#[derive(Default)]
pub struct InMemoryUserStore {
    users: Mutex<HashMap<String, UserRecord>>,
    bookings: Mutex<HashMap<String, i64>>,
    pub update_calls: AtomicUsize,
    pub fail_updates: AtomicBool,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_user(&self, id: &str, email: &str) {
        self.set_user(UserRecord {
            id: id.to_string(),
            email: Some(email.to_string()),
            name: None,
            subscription: SubscriptionRecord::default(),
        });
    }

    pub fn set_user(&self, user: UserRecord) {
        self.users.lock().unwrap().insert(user.id.clone(), user);
    }

    pub fn set_subscription(&self, user_id: &str, subscription: SubscriptionRecord) {
        let mut users = self.users.lock().unwrap();
        if let Some(user) = users.get_mut(user_id) {
            user.subscription = subscription;
        }
    }

    pub fn set_paid_bookings(&self, user_id: &str, count: i64) {
        self.bookings
            .lock()
            .unwrap()
            .insert(user_id.to_string(), count);
    }

    pub fn set_fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn find_user(&self, user_id: &str) -> BillingResult<Option<UserRecord>> {
        Ok(self.users.lock().unwrap().get(user_id).cloned())
    }

    async fn update_subscription(
        &self,
        user_id: &str,
        patch: &SubscriptionPatch,
    ) -> BillingResult<UserRecord> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(BillingError::Database(
                "simulated database outage".to_string(),
            ));
        }
        let mut users = self.users.lock().unwrap();
        let user = users
            .get_mut(user_id)
            .ok_or_else(|| BillingError::UserNotFound(user_id.to_string()))?;
        patch.apply(&mut user.subscription);
        Ok(user.clone())
    }

    async fn list_subscription_snapshots(&self) -> BillingResult<Vec<SubscriptionSnapshot>> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .values()
            .map(|user| SubscriptionSnapshot {
                user_id: user.id.clone(),
                subscription: user.subscription.clone(),
            })
            .collect())
    }

    async fn count_paid_session_bookings(&self, user_id: &str) -> BillingResult<i64> {
        Ok(self
            .bookings
            .lock()
            .unwrap()
            .get(user_id)
            .copied()
            .unwrap_or(0))
    }
}

/// Gateway double. `fail_all` makes every call error so tests can
/// exercise the best-effort paths.
#[derive(Default)]
pub struct InMemoryGateway {
    payments: Mutex<Vec<PaymentRecord>>,
    subscriptions: Mutex<HashMap<String, GatewaySubscription>>,
    pub list_calls: AtomicUsize,
    pub create_plan_calls: AtomicUsize,
    pub fail_all: AtomicBool,
    seq: AtomicUsize,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_payment(&self, record: PaymentRecord) {
        self.payments.lock().unwrap().push(record);
    }

    pub fn add_subscription(&self, id: &str, status: &str) {
        self.subscriptions.lock().unwrap().insert(
            id.to_string(),
            GatewaySubscription {
                id: id.to_string(),
                status: status.to_string(),
                plan_id: None,
                customer_id: Some(format!("cust_{id}")),
                current_end: None,
            },
        );
    }

    pub fn set_fail_all(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    fn check_fail(&self) -> BillingResult<()> {
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(BillingError::Gateway {
                code: "SERVER_ERROR".to_string(),
                message: "simulated gateway outage".to_string(),
            });
        }
        Ok(())
    }

    fn next_id(&self, prefix: &str) -> String {
        format!("{prefix}_{}", self.seq.fetch_add(1, Ordering::SeqCst))
    }
}

#[async_trait]
impl PaymentGateway for InMemoryGateway {
    async fn list_payments(&self, limit: usize) -> BillingResult<Vec<PaymentRecord>> {
        self.check_fail()?;
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .payments
            .lock()
            .unwrap()
            .iter()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn fetch_payment(&self, payment_id: &str) -> BillingResult<PaymentRecord> {
        self.check_fail()?;
        self.payments
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.id == payment_id)
            .cloned()
            .ok_or_else(|| BillingError::NotFound(payment_id.to_string()))
    }

    async fn create_subscription(
        &self,
        plan_id: &str,
        _period: BillingPeriod,
        _notes: serde_json::Value,
    ) -> BillingResult<GatewaySubscription> {
        self.check_fail()?;
        let id = self.next_id("sub_test");
        let subscription = GatewaySubscription {
            id: id.clone(),
            status: "created".to_string(),
            plan_id: Some(plan_id.to_string()),
            customer_id: Some(format!("cust_{id}")),
            current_end: None,
        };
        self.subscriptions
            .lock()
            .unwrap()
            .insert(id, subscription.clone());
        Ok(subscription)
    }

    async fn cancel_subscription(
        &self,
        subscription_id: &str,
        at_cycle_end: bool,
    ) -> BillingResult<GatewaySubscription> {
        self.check_fail()?;
        let mut subscriptions = self.subscriptions.lock().unwrap();
        let subscription = subscriptions
            .get_mut(subscription_id)
            .ok_or_else(|| BillingError::NotFound(subscription_id.to_string()))?;
        subscription.status = if at_cycle_end {
            "active".to_string()
        } else {
            "cancelled".to_string()
        };
        Ok(subscription.clone())
    }

    async fn fetch_subscription(
        &self,
        subscription_id: &str,
    ) -> BillingResult<GatewaySubscription> {
        self.check_fail()?;
        self.subscriptions
            .lock()
            .unwrap()
            .get(subscription_id)
            .cloned()
            .ok_or_else(|| BillingError::NotFound(subscription_id.to_string()))
    }

    async fn update_subscription(
        &self,
        subscription_id: &str,
        new_plan_id: &str,
    ) -> BillingResult<GatewaySubscription> {
        self.check_fail()?;
        let mut subscriptions = self.subscriptions.lock().unwrap();
        let subscription = subscriptions
            .get_mut(subscription_id)
            .ok_or_else(|| BillingError::NotFound(subscription_id.to_string()))?;
        subscription.plan_id = Some(new_plan_id.to_string());
        Ok(subscription.clone())
    }

    async fn create_plan(
        &self,
        _name: &str,
        _amount_minor_units: i64,
        _currency: &str,
        _period: BillingPeriod,
    ) -> BillingResult<PlanHandle> {
        self.check_fail()?;
        self.create_plan_calls.fetch_add(1, Ordering::SeqCst);
        Ok(PlanHandle {
            id: self.next_id("plan_test"),
        })
    }

    async fn create_order(
        &self,
        amount_minor_units: i64,
        receipt: &str,
        _notes: serde_json::Value,
    ) -> BillingResult<OrderHandle> {
        self.check_fail()?;
        Ok(OrderHandle {
            id: self.next_id("order_test"),
            amount: amount_minor_units,
            currency: Some("INR".to_string()),
            receipt: Some(receipt.to_string()),
        })
    }
}
