//! Topic to notification rule table.
//!
//! Each row maps a webhook topic to an immediate template and, optionally,
//! a conditional template sent after a delay. New flows are new rows.

use std::collections::BTreeMap;
use std::time::Duration;

use orderalert_common::types::{ShopSettings, Topic};
use orderalert_decoders::OrderSnapshot;

pub const ORDER_CREATED: &str = "order_created_v1";
pub const ORDER_CONFIRM: &str = "order_confirm_v1";
pub const ORDER_DISPATCHED: &str = "order_dispatched_v1";
pub const ORDER_CANCELLED: &str = "order_cancelled_v1";

/// First name used when the payload has none.
pub const FALLBACK_FIRST_NAME: &str = "Valued Customer";

/// Where a conditional message takes its delay from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelaySource {
    /// The shop's COD confirmation delay setting.
    ConfirmDelay,
}

#[derive(Debug, Clone, Copy)]
pub struct ConditionalAction {
    pub template_key: &'static str,
    pub condition: fn(&OrderSnapshot) -> bool,
    pub delay: DelaySource,
}

#[derive(Debug, Clone, Copy)]
pub struct Rule {
    pub topic: Topic,
    pub immediate: Option<&'static str>,
    pub conditional: Option<ConditionalAction>,
}

pub const RULES: &[Rule] = &[
    Rule {
        topic: Topic::OrderCreated,
        immediate: Some(ORDER_CREATED),
        conditional: Some(ConditionalAction {
            template_key: ORDER_CONFIRM,
            condition: OrderSnapshot::is_cash_on_delivery,
            delay: DelaySource::ConfirmDelay,
        }),
    },
    Rule {
        topic: Topic::FulfillmentCreated,
        immediate: Some(ORDER_DISPATCHED),
        conditional: None,
    },
    Rule {
        topic: Topic::OrderCancelled,
        immediate: Some(ORDER_CANCELLED),
        conditional: None,
    },
    Rule {
        topic: Topic::OrderUpdated,
        immediate: None,
        conditional: None,
    },
];

/// One notification the rules decided to send.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedMessage {
    pub template_key: &'static str,
    pub delay: Duration,
}

pub fn rule_for(topic: Topic) -> Option<&'static Rule> {
    RULES.iter().find(|r| r.topic == topic)
}

/// Whether any rule for `topic` can produce a message.
pub fn has_actions(topic: Topic) -> bool {
    rule_for(topic).is_some_and(|r| r.immediate.is_some() || r.conditional.is_some())
}

/// Messages to schedule for an event, in rule order.
pub fn plan(topic: Topic, snapshot: &OrderSnapshot, settings: &ShopSettings) -> Vec<PlannedMessage> {
    let Some(rule) = rule_for(topic) else {
        return Vec::new();
    };

    let mut planned = Vec::new();
    if let Some(key) = rule.immediate {
        planned.push(PlannedMessage {
            template_key: key,
            delay: Duration::ZERO,
        });
    }
    if let Some(action) = &rule.conditional {
        if (action.condition)(snapshot) {
            let delay = match action.delay {
                DelaySource::ConfirmDelay => settings.confirm_delay(),
            };
            planned.push(PlannedMessage {
                template_key: action.template_key,
                delay,
            });
        }
    }
    planned
}

/// Template variables extracted from the payload. Absent values are left out
/// so that rendering can report them, except the first name which falls back.
pub fn template_variables(snapshot: &OrderSnapshot) -> BTreeMap<String, String> {
    let mut vars = BTreeMap::new();
    vars.insert(
        "first_name".to_string(),
        snapshot
            .first_name
            .clone()
            .unwrap_or_else(|| FALLBACK_FIRST_NAME.to_string()),
    );

    let optional = [
        ("order_number", &snapshot.order_number),
        ("total", &snapshot.total),
        ("currency", &snapshot.currency),
        ("tracking_url", &snapshot.tracking_url),
    ];
    for (name, value) in optional {
        if let Some(v) = value {
            vars.insert(name.to_string(), v.clone());
        }
    }
    vars
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    fn settings(minutes: u32) -> ShopSettings {
        ShopSettings::defaults(Uuid::new_v4(), minutes)
    }

    fn cod_order() -> OrderSnapshot {
        OrderSnapshot {
            customer_phone: Some("+923001234567".into()),
            first_name: Some("Ayesha".into()),
            order_number: Some("1001".into()),
            total: Some("2899.00".into()),
            currency: Some("PKR".into()),
            financial_status: Some("pending".into()),
            payment_gateways: vec!["Cash on Delivery (COD)".into()],
            tracking_url: None,
        }
    }

    #[test]
    fn test_cod_order_plans_two_messages() {
        let planned = plan(Topic::OrderCreated, &cod_order(), &settings(120));
        assert_eq!(
            planned,
            vec![
                PlannedMessage {
                    template_key: ORDER_CREATED,
                    delay: Duration::ZERO
                },
                PlannedMessage {
                    template_key: ORDER_CONFIRM,
                    delay: Duration::from_secs(120 * 60)
                },
            ]
        );
    }

    #[test]
    fn test_confirm_delay_follows_shop_setting() {
        let planned = plan(Topic::OrderCreated, &cod_order(), &settings(15));
        assert_eq!(planned[1].delay, Duration::from_secs(15 * 60));
    }

    #[test]
    fn test_prepaid_order_plans_one_message() {
        let mut order = cod_order();
        order.payment_gateways = vec!["shopify_payments".into()];
        order.financial_status = Some("paid".into());

        let planned = plan(Topic::OrderCreated, &order, &settings(120));
        assert_eq!(planned.len(), 1);
        assert_eq!(planned[0].template_key, ORDER_CREATED);
    }

    #[test]
    fn test_other_topics() {
        let order = cod_order();
        let s = settings(120);
        assert_eq!(
            plan(Topic::FulfillmentCreated, &order, &s)[0].template_key,
            ORDER_DISPATCHED
        );
        assert_eq!(
            plan(Topic::OrderCancelled, &order, &s)[0].template_key,
            ORDER_CANCELLED
        );
        assert!(plan(Topic::OrderUpdated, &order, &s).is_empty());
        assert!(!has_actions(Topic::OrderUpdated));
        assert!(has_actions(Topic::OrderCreated));
    }

    #[test]
    fn test_variables_fallback_first_name() {
        let mut order = cod_order();
        order.first_name = None;
        let vars = template_variables(&order);
        assert_eq!(vars["first_name"], "Valued Customer");
        assert_eq!(vars["total"], "2899.00");
        assert_eq!(vars["currency"], "PKR");
        assert!(!vars.contains_key("tracking_url"));
    }
}
