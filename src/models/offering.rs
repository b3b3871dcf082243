use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferingKind {
    AutoRenewableSubscription,
    NonConsumableUnlock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodUnit {
    Day,
    Week,
    Month,
    Year,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionPeriod {
    pub unit: PeriodUnit,
    pub count: u32,
}

impl SubscriptionPeriod {
    pub fn new(unit: PeriodUnit, count: u32) -> Self {
        Self { unit, count }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMode {
    FreeTrial,
    PayAsYouGo,
    PayUpFront,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IntroductoryOffer {
    pub period: SubscriptionPeriod,
    pub payment_mode: PaymentMode,
}

/// A purchasable product as declared by the catalog. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Offering {
    pub id: String,
    pub kind: OfferingKind,
    /// Higher tiers are more capable and win ties against lower ones.
    pub tier: i32,
    #[serde(default)]
    pub period: Option<SubscriptionPeriod>,
    #[serde(default)]
    pub introductory_offer: Option<IntroductoryOffer>,
    #[serde(default)]
    pub is_special_offer: bool,
}

impl Offering {
    pub fn subscription(id: &str, tier: i32, period: SubscriptionPeriod) -> Self {
        Self {
            id: id.to_string(),
            kind: OfferingKind::AutoRenewableSubscription,
            tier,
            period: Some(period),
            introductory_offer: None,
            is_special_offer: false,
        }
    }

    pub fn unlock(id: &str, tier: i32) -> Self {
        Self {
            id: id.to_string(),
            kind: OfferingKind::NonConsumableUnlock,
            tier,
            period: None,
            introductory_offer: None,
            is_special_offer: false,
        }
    }

    pub fn is_subscription(&self) -> bool {
        self.kind == OfferingKind::AutoRenewableSubscription
    }

    pub fn is_unlock(&self) -> bool {
        self.kind == OfferingKind::NonConsumableUnlock
    }
}
