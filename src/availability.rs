//! Bookable slots for a plan, grouped by local day.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::engine::{Engine, SlotWatch};
use crate::model::*;
use crate::observability::SUBSCRIPTIONS_ACTIVE;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanInfo {
    pub available: bool,
    #[serde(default)]
    pub price: Option<u64>,
}

/// Plan tag → availability and price. Maintained outside this service and
/// handed in through configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanCatalog {
    plans: HashMap<String, PlanInfo>,
}

impl PlanCatalog {
    /// The three plans the funnel sells, all open, prices unset.
    pub fn standard() -> Self {
        ["service", "product", "maang"]
            .into_iter()
            .map(|p| {
                (
                    p.to_string(),
                    PlanInfo {
                        available: true,
                        price: None,
                    },
                )
            })
            .collect()
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let raw: HashMap<String, PlanInfo> = serde_json::from_str(json)?;
        Ok(raw.into_iter().collect())
    }

    pub fn get(&self, plan: &str) -> Option<PlanInfo> {
        self.plans.get(&normalize_plan(plan)).copied()
    }

    pub fn is_available(&self, plan: &str) -> bool {
        self.get(plan).is_some_and(|p| p.available)
    }

    pub fn len(&self) -> usize {
        self.plans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }
}

impl FromIterator<(String, PlanInfo)> for PlanCatalog {
    fn from_iter<I: IntoIterator<Item = (String, PlanInfo)>>(iter: I) -> Self {
        Self {
            plans: iter
                .into_iter()
                .map(|(plan, info)| (normalize_plan(&plan), info))
                .collect(),
        }
    }
}

fn normalize_plan(plan: &str) -> String {
    plan.trim().to_lowercase()
}

/// Slots starting on one local calendar day, ordered by start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayGroup {
    pub day: NaiveDate,
    pub slots: Vec<Slot>,
}

/// Group start-ordered slots by the local day of their start. Groups come out
/// in ascending day order.
pub fn group_by_day(slots: &[Slot], offset: FixedOffset) -> Vec<DayGroup> {
    let mut groups: Vec<DayGroup> = Vec::new();
    for slot in slots {
        let Some(utc) = DateTime::from_timestamp_millis(slot.start) else {
            continue;
        };
        let day = utc.with_timezone(&offset).date_naive();
        match groups.last_mut() {
            Some(group) if group.day == day => group.slots.push(slot.clone()),
            _ => groups.push(DayGroup {
                day,
                slots: vec![slot.clone()],
            }),
        }
    }
    groups
}

/// Availability errors are all the same thing: the plan cannot be browsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanUnavailable(pub String);

impl std::fmt::Display for PlanUnavailable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "plan {:?} is not currently offered", self.0)
    }
}

impl std::error::Error for PlanUnavailable {}

#[derive(Clone)]
pub struct AvailabilityQuery {
    engine: Arc<Engine>,
    plans: Arc<PlanCatalog>,
    offset: FixedOffset,
}

impl AvailabilityQuery {
    pub fn new(engine: Arc<Engine>, plans: Arc<PlanCatalog>, offset: FixedOffset) -> Self {
        Self {
            engine,
            plans,
            offset,
        }
    }

    pub fn plans(&self) -> &PlanCatalog {
        &self.plans
    }

    fn filter_for(&self, plan: &str) -> Result<SlotFilter, PlanUnavailable> {
        if !self.plans.is_available(plan) {
            return Err(PlanUnavailable(plan.to_string()));
        }
        Ok(SlotFilter::bookable(
            normalize_plan(plan),
            self.engine.now_ms(),
        ))
    }

    /// One-off evaluation at the store's current instant.
    pub async fn snapshot(&self, plan: &str) -> Result<Vec<DayGroup>, PlanUnavailable> {
        let filter = self.filter_for(plan)?;
        let slots = self.engine.list_slots(&filter).await;
        Ok(group_by_day(&slots, self.offset))
    }

    /// Live evaluation. The `start >= now` cut-off is fixed at subscribe time,
    /// so slots that begin while subscribed stay listed.
    pub async fn subscribe(&self, plan: &str) -> Result<Subscription, PlanUnavailable> {
        let filter = self.filter_for(plan)?;
        let watch = self.engine.watch_slots(filter).await;
        metrics::gauge!(SUBSCRIPTIONS_ACTIVE).increment(1.0);
        Ok(Subscription {
            plan: normalize_plan(plan),
            offset: self.offset,
            watch,
        })
    }
}

/// A live availability query. Dropping it unsubscribes.
pub struct Subscription {
    plan: String,
    offset: FixedOffset,
    watch: SlotWatch,
}

impl Subscription {
    pub fn plan(&self) -> &str {
        &self.plan
    }

    /// The subscribe-time result first, then one full result per change.
    pub async fn next(&mut self) -> Option<Vec<DayGroup>> {
        let slots = self.watch.next().await?;
        Some(group_by_day(&slots, self.offset))
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        metrics::gauge!(SUBSCRIPTIONS_ACTIVE).decrement(1.0);
    }
}

/// One consumer's availability view: at most one live subscription.
pub struct AvailabilityFeed {
    query: AvailabilityQuery,
    current: Option<Subscription>,
}

impl AvailabilityFeed {
    pub fn new(query: AvailabilityQuery) -> Self {
        Self {
            query,
            current: None,
        }
    }

    /// Switch to `plan`, tearing down whatever was running before. On error
    /// the previous subscription is gone as well.
    pub async fn select_plan(&mut self, plan: &str) -> Result<(), PlanUnavailable> {
        self.current = None;
        self.current = Some(self.query.subscribe(plan).await?);
        Ok(())
    }

    pub fn clear(&mut self) -> bool {
        self.current.take().is_some()
    }

    pub fn plan(&self) -> Option<&str> {
        self.current.as_ref().map(|s| s.plan())
    }

    /// Next result of the live subscription. Pending forever when there is
    /// none, so it can sit in a `select!` unconditionally.
    pub async fn next(&mut self) -> Option<Vec<DayGroup>> {
        match self.current.as_mut() {
            Some(sub) => sub.next().await,
            None => std::future::pending().await,
        }
    }
}
