//! External payment gateway: settings and the redirect form.
//!
//! The gateway is consumed only as "build a form, submit it, redirect the
//! browser". Completion comes back through the success and cancel routes.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Admin-configured gateway credentials (`payment_settings` row).
#[derive(Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PaymentSettings {
    /// Merchant id issued by the gateway.
    pub merchant_id: String,
    /// Merchant key issued by the gateway.
    pub merchant_key: String,
    /// Optional signing passphrase.
    #[serde(default)]
    pub passphrase: Option<String>,
    /// Route payments to the sandbox.
    #[serde(default)]
    pub is_test_mode: bool,
}

impl std::fmt::Debug for PaymentSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentSettings")
            .field("merchant_id", &self.merchant_id)
            .field("merchant_key", &"***")
            .field("passphrase", &self.passphrase.as_ref().map(|_| "***"))
            .field("is_test_mode", &self.is_test_mode)
            .finish()
    }
}

impl PaymentSettings {
    /// Copy safe to show in the admin panel: secrets reduced to their last
    /// four characters.
    #[must_use]
    pub fn masked(&self) -> Self {
        Self {
            merchant_id: self.merchant_id.clone(),
            merchant_key: mask(&self.merchant_key),
            passphrase: self.passphrase.as_deref().map(mask),
            is_test_mode: self.is_test_mode,
        }
    }

    /// Returns `true` when both merchant credentials are present.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        !self.merchant_id.trim().is_empty() && !self.merchant_key.trim().is_empty()
    }
}

fn mask(secret: &str) -> String {
    let count = secret.chars().count();
    let tail: String = secret.chars().skip(count.saturating_sub(4)).collect();
    format!("{}{tail}", "*".repeat(count.saturating_sub(4)))
}

/// What a payment settles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PaymentKind {
    /// Wallet top-up; reference is a wallet transaction id.
    Wallet,
    /// Ticket purchase; reference is a purchase id.
    Ticket,
}

impl PaymentKind {
    /// Stored string form.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Wallet => "wallet",
            Self::Ticket => "ticket",
        }
    }
}

/// Gateway endpoints and the public base URL used for return routes.
#[derive(Debug, Clone)]
pub struct PaymentUrls {
    /// Live processing endpoint.
    pub live_url: String,
    /// Sandbox processing endpoint.
    pub sandbox_url: String,
    /// Public base URL of this marketplace (no trailing slash).
    pub public_base_url: String,
    /// Server-to-server notification endpoint, sent only when set.
    pub notify_url: Option<String>,
}

/// Parameters of one redirect payment.
#[derive(Debug, Clone)]
pub struct PaymentIntent {
    /// What is being paid for.
    pub kind: PaymentKind,
    /// Pending row the payment settles (transaction or purchase id).
    pub reference: String,
    /// Amount to charge.
    pub amount: Decimal,
    /// Line item shown by the gateway.
    pub item_name: String,
    /// Extra pass-through values (e.g. ticket, buyer, seller ids).
    pub custom: Vec<String>,
}

/// One hidden input of the redirect form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct FormField {
    /// Input name.
    pub name: String,
    /// Input value.
    pub value: String,
}

/// Auto-submitting redirect form for the payment gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct PaymentForm {
    /// Form `action`.
    pub action: String,
    /// Always `POST`.
    pub method: String,
    /// Hidden inputs in gateway order.
    pub fields: Vec<FormField>,
}

impl PaymentForm {
    /// Builds the redirect form for `intent`.
    #[must_use]
    pub fn build(settings: &PaymentSettings, urls: &PaymentUrls, intent: &PaymentIntent) -> Self {
        let action = if settings.is_test_mode {
            urls.sandbox_url.clone()
        } else {
            urls.live_url.clone()
        };
        let base = urls.public_base_url.trim_end_matches('/');
        let query = format!("kind={}&reference={}", intent.kind.as_str(), intent.reference);

        let mut fields = vec![
            field("merchant_id", &settings.merchant_id),
            field("merchant_key", &settings.merchant_key),
            field("return_url", &format!("{base}/payment/success?{query}")),
            field("cancel_url", &format!("{base}/payment/cancel?{query}")),
        ];
        if let Some(notify) = urls.notify_url.as_deref().filter(|u| !u.trim().is_empty()) {
            fields.push(field("notify_url", notify));
        }
        fields.extend([
            field("m_payment_id", &intent.reference),
            field("amount", &format!("{:.2}", intent.amount.round_dp(2))),
            field("item_name", &intent.item_name),
        ]);
        for (index, value) in intent.custom.iter().take(5).enumerate() {
            fields.push(field(&format!("custom_str{}", index + 1), value));
        }

        Self {
            action,
            method: "POST".to_string(),
            fields,
        }
    }

    /// Looks up a field value by name.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.value.as_str())
    }
}

fn field(name: &str, value: &str) -> FormField {
    FormField {
        name: name.to_string(),
        value: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(test_mode: bool) -> PaymentSettings {
        PaymentSettings {
            merchant_id: "10000100".to_string(),
            merchant_key: "46f0cd694581a".to_string(),
            passphrase: Some("jt7NOE43FZPn".to_string()),
            is_test_mode: test_mode,
        }
    }

    fn urls() -> PaymentUrls {
        PaymentUrls {
            live_url: "https://pay.example/eng/process".to_string(),
            sandbox_url: "https://sandbox.pay.example/eng/process".to_string(),
            public_base_url: "https://tips.example/".to_string(),
            notify_url: None,
        }
    }

    #[test]
    fn form_carries_amount_and_reference() {
        let intent = PaymentIntent {
            kind: PaymentKind::Ticket,
            reference: "p-1".to_string(),
            amount: Decimal::new(505, 1),
            item_name: "Ticket: Weekend acca".to_string(),
            custom: vec!["t-1".to_string(), "b-1".to_string(), "s-1".to_string()],
        };
        let form = PaymentForm::build(&settings(false), &urls(), &intent);
        assert_eq!(form.action, "https://pay.example/eng/process");
        assert_eq!(form.value("amount"), Some("50.50"));
        assert_eq!(form.value("m_payment_id"), Some("p-1"));
        assert_eq!(
            form.value("return_url"),
            Some("https://tips.example/payment/success?kind=ticket&reference=p-1")
        );
        assert_eq!(form.value("custom_str3"), Some("s-1"));
    }

    #[test]
    fn test_mode_uses_sandbox() {
        let intent = PaymentIntent {
            kind: PaymentKind::Wallet,
            reference: "tx-1".to_string(),
            amount: Decimal::from(100),
            item_name: "Wallet top-up".to_string(),
            custom: Vec::new(),
        };
        let form = PaymentForm::build(&settings(true), &urls(), &intent);
        assert_eq!(form.action, "https://sandbox.pay.example/eng/process");
        assert_eq!(form.value("amount"), Some("100.00"));
    }

    #[test]
    fn notify_url_follows_cancel_url_when_configured() {
        let intent = PaymentIntent {
            kind: PaymentKind::Wallet,
            reference: "tx-2".to_string(),
            amount: Decimal::from(20),
            item_name: "Wallet top-up".to_string(),
            custom: Vec::new(),
        };
        let form = PaymentForm::build(&settings(false), &urls(), &intent);
        assert_eq!(form.value("notify_url"), None);

        let with_notify = PaymentUrls {
            notify_url: Some("https://tips.example/payment/notify".to_string()),
            ..urls()
        };
        let form = PaymentForm::build(&settings(false), &with_notify, &intent);
        let names: Vec<&str> = form.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(
            names.get(..5),
            Some(&["merchant_id", "merchant_key", "return_url", "cancel_url", "notify_url"][..])
        );
        assert_eq!(form.value("notify_url"), Some("https://tips.example/payment/notify"));
    }

    #[test]
    fn masked_hides_secrets() {
        let masked = settings(false).masked();
        assert_eq!(masked.merchant_key, "*********581a");
        assert_eq!(masked.passphrase.as_deref(), Some("********FZPn"));
        assert!(!format!("{:?}", settings(false)).contains("46f0cd694581a"));
    }
}
