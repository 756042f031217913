//! Braintree gateway client
//!
//! Thin HTTP wrapper around the Braintree server API, implementing
//! `SubscriptionGateway`. Monetary amounts cross the wire as decimal
//! strings and are converted to integer cents at the boundary; nothing
//! past this module handles floating point money.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use time::OffsetDateTime;
use uuid::Uuid;

use async_trait::async_trait;

use crate::error::{BillingError, BillingResult};
use crate::gateway::{
    AddonUpdates, GatewayAddon, GatewayCustomer, GatewayPaymentMethod, GatewaySubscription,
    GatewaySubscriptionStatus, SubscriptionGateway, WebhookNotification,
};

type HmacSha256 = Hmac<Sha256>;

/// Braintree credentials and environment selection
#[derive(Debug, Clone)]
pub struct BraintreeConfig {
    pub merchant_id: String,
    pub public_key: String,
    pub private_key: String,
    pub environment: String,
}

impl BraintreeConfig {
    pub fn from_env() -> BillingResult<Self> {
        Ok(Self {
            merchant_id: require_env("BRAINTREE_MERCHANT_ID")?,
            public_key: require_env("BRAINTREE_PUBLIC_KEY")?,
            private_key: require_env("BRAINTREE_PRIVATE_KEY")?,
            environment: std::env::var("BRAINTREE_ENVIRONMENT")
                .unwrap_or_else(|_| "sandbox".to_string()),
        })
    }

    fn base_url(&self) -> String {
        match self.environment.as_str() {
            "production" => format!(
                "https://api.braintreegateway.com/merchants/{}",
                self.merchant_id
            ),
            _ => format!(
                "https://api.sandbox.braintreegateway.com/merchants/{}",
                self.merchant_id
            ),
        }
    }
}

fn require_env(name: &str) -> BillingResult<String> {
    std::env::var(name)
        .map_err(|_| BillingError::Config(format!("{name} environment variable not set")))
}

/// HTTP client for the Braintree server API
pub struct BraintreeClient {
    config: BraintreeConfig,
    http: reqwest::Client,
}

impl BraintreeClient {
    pub fn new(config: BraintreeConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    pub fn from_env() -> BillingResult<Self> {
        Ok(Self::new(BraintreeConfig::from_env()?))
    }

    pub fn config(&self) -> &BraintreeConfig {
        &self.config
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> BillingResult<T> {
        let url = format!("{}{path}", self.config.base_url());
        let response = self
            .http
            .post(&url)
            .basic_auth(&self.config.public_key, Some(&self.config.private_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| BillingError::Gateway(format!("request to {path} failed: {e}")))?;

        decode_response(path, response).await
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> BillingResult<T> {
        let url = format!("{}{path}", self.config.base_url());
        let response = self
            .http
            .get(&url)
            .basic_auth(&self.config.public_key, Some(&self.config.private_key))
            .send()
            .await
            .map_err(|e| BillingError::Gateway(format!("request to {path} failed: {e}")))?;

        decode_response(path, response).await
    }

    async fn put_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> BillingResult<T> {
        let url = format!("{}{path}", self.config.base_url());
        let response = self
            .http
            .put(&url)
            .basic_auth(&self.config.public_key, Some(&self.config.private_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| BillingError::Gateway(format!("request to {path} failed: {e}")))?;

        decode_response(path, response).await
    }
}

async fn decode_response<T: serde::de::DeserializeOwned>(
    path: &str,
    response: reqwest::Response,
) -> BillingResult<T> {
    let status = response.status();
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(BillingError::NotFound(format!(
            "gateway resource not found: {path}"
        )));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        tracing::error!(%status, path, body = %body, "Gateway request failed");
        return Err(BillingError::Gateway(format!(
            "gateway returned {status} for {path}"
        )));
    }

    response
        .json::<T>()
        .await
        .map_err(|e| BillingError::Gateway(format!("malformed gateway response from {path}: {e}")))
}

/// Parse a gateway decimal amount string ("29.00", "2.5", "49") into cents.
pub fn parse_decimal_cents(amount: &str) -> BillingResult<i64> {
    let malformed =
        || BillingError::Gateway(format!("malformed gateway amount: '{amount}'"));

    let (sign, digits) = match amount.strip_prefix('-') {
        Some(rest) => (-1i64, rest),
        None => (1i64, amount),
    };

    let (whole, frac) = match digits.split_once('.') {
        Some((w, f)) => (w, f),
        None => (digits, ""),
    };

    if whole.is_empty() || frac.len() > 2 {
        return Err(malformed());
    }
    if !whole.bytes().all(|b| b.is_ascii_digit()) || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed());
    }

    let whole: i64 = whole.parse().map_err(|_| malformed())?;
    let frac_cents: i64 = match frac.len() {
        0 => 0,
        1 => frac.parse::<i64>().map_err(|_| malformed())? * 10,
        _ => frac.parse().map_err(|_| malformed())?,
    };

    let cents = whole
        .checked_mul(100)
        .and_then(|w| w.checked_add(frac_cents))
        .ok_or_else(malformed)?;

    Ok(sign * cents)
}

fn map_status(status: &str) -> GatewaySubscriptionStatus {
    match status {
        "Active" | "active" => GatewaySubscriptionStatus::Active,
        "PastDue" | "past_due" => GatewaySubscriptionStatus::PastDue,
        "Canceled" | "canceled" | "Expired" | "expired" => GatewaySubscriptionStatus::Canceled,
        other => GatewaySubscriptionStatus::Other(other.to_string()),
    }
}

// Wire-format structs. Dates arrive as unix seconds.

#[derive(Debug, Deserialize)]
struct ClientTokenWire {
    #[serde(rename = "clientToken")]
    client_token: String,
}

#[derive(Debug, Deserialize)]
struct CustomerWire {
    id: String,
}

#[derive(Debug, Deserialize)]
struct PaymentMethodWire {
    token: String,
}

#[derive(Debug, Deserialize)]
struct PaymentMethodListWire {
    #[serde(rename = "paymentMethods", default)]
    payment_methods: Vec<PaymentMethodWire>,
}

#[derive(Debug, Deserialize)]
struct AddonWire {
    id: String,
    amount: String,
    quantity: i32,
}

#[derive(Debug, Deserialize)]
struct SubscriptionWire {
    id: String,
    #[serde(rename = "planId")]
    plan_id: String,
    status: String,
    price: String,
    #[serde(rename = "addOns", default)]
    add_ons: Vec<AddonWire>,
    #[serde(rename = "nextBillingDate")]
    next_billing_date: Option<i64>,
    #[serde(rename = "paidThroughDate")]
    paid_through_date: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct WebhookPayloadWire {
    kind: String,
    timestamp: i64,
    subscription: Option<SubscriptionWire>,
}

fn unix_date(seconds: Option<i64>) -> Option<OffsetDateTime> {
    seconds.and_then(|s| OffsetDateTime::from_unix_timestamp(s).ok())
}

impl SubscriptionWire {
    fn into_subscription(self) -> BillingResult<GatewaySubscription> {
        let add_ons = self
            .add_ons
            .into_iter()
            .map(|a| {
                Ok(GatewayAddon {
                    amount_cents: parse_decimal_cents(&a.amount)?,
                    id: a.id,
                    quantity: a.quantity,
                })
            })
            .collect::<BillingResult<Vec<_>>>()?;

        Ok(GatewaySubscription {
            price_cents: parse_decimal_cents(&self.price)?,
            status: map_status(&self.status),
            next_billing_date: unix_date(self.next_billing_date),
            paid_through_date: unix_date(self.paid_through_date),
            id: self.id,
            plan_id: self.plan_id,
            add_ons,
        })
    }
}

#[async_trait]
impl SubscriptionGateway for BraintreeClient {
    async fn generate_client_token(&self, customer_id: Option<&str>) -> BillingResult<String> {
        let body = match customer_id {
            Some(id) => serde_json::json!({ "customerId": id }),
            None => serde_json::json!({}),
        };
        let wire: ClientTokenWire = self.post_json("/client_token", body).await?;
        Ok(wire.client_token)
    }

    async fn create_customer(
        &self,
        company_id: Uuid,
        company_name: &str,
    ) -> BillingResult<GatewayCustomer> {
        let wire: CustomerWire = self
            .post_json(
                "/customers",
                serde_json::json!({
                    "company": company_name,
                    "customFields": { "companyId": company_id.to_string() },
                }),
            )
            .await?;
        Ok(GatewayCustomer { id: wire.id })
    }

    async fn vault_payment_method(
        &self,
        customer_id: &str,
        payment_method_nonce: &str,
    ) -> BillingResult<GatewayPaymentMethod> {
        let wire: PaymentMethodWire = self
            .post_json(
                "/payment_methods",
                serde_json::json!({
                    "customerId": customer_id,
                    "paymentMethodNonce": payment_method_nonce,
                    "options": { "makeDefault": true },
                }),
            )
            .await?;
        Ok(GatewayPaymentMethod { token: wire.token })
    }

    async fn first_payment_method(
        &self,
        customer_id: &str,
    ) -> BillingResult<Option<GatewayPaymentMethod>> {
        let wire: PaymentMethodListWire = self
            .get_json(&format!("/customers/{customer_id}/payment_methods"))
            .await?;
        Ok(wire
            .payment_methods
            .into_iter()
            .next()
            .map(|p| GatewayPaymentMethod { token: p.token }))
    }

    async fn create_subscription(
        &self,
        payment_method_token: &str,
        gateway_plan_id: &str,
    ) -> BillingResult<GatewaySubscription> {
        let wire: SubscriptionWire = self
            .post_json(
                "/subscriptions",
                serde_json::json!({
                    "paymentMethodToken": payment_method_token,
                    "planId": gateway_plan_id,
                }),
            )
            .await?;
        wire.into_subscription()
    }

    async fn find_subscription(&self, subscription_id: &str) -> BillingResult<GatewaySubscription> {
        let wire: SubscriptionWire = self
            .get_json(&format!("/subscriptions/{subscription_id}"))
            .await?;
        wire.into_subscription()
    }

    async fn update_addons(
        &self,
        subscription_id: &str,
        updates: AddonUpdates,
        prorate: bool,
    ) -> BillingResult<GatewaySubscription> {
        let add: Vec<_> = updates
            .add
            .iter()
            .map(|(id, qty)| serde_json::json!({ "inheritedFromId": id, "quantity": qty }))
            .collect();
        let update: Vec<_> = updates
            .update
            .iter()
            .map(|(id, qty)| serde_json::json!({ "existingId": id, "quantity": qty }))
            .collect();

        let wire: SubscriptionWire = self
            .put_json(
                &format!("/subscriptions/{subscription_id}"),
                serde_json::json!({
                    "addOns": {
                        "add": add,
                        "update": update,
                        "remove": updates.remove,
                    },
                    "options": { "prorateCharges": prorate },
                }),
            )
            .await?;
        wire.into_subscription()
    }

    async fn cancel_subscription(&self, subscription_id: &str) -> BillingResult<()> {
        let _: serde_json::Value = self
            .put_json(
                &format!("/subscriptions/{subscription_id}/cancel"),
                serde_json::json!({}),
            )
            .await?;
        Ok(())
    }

    /// Verify `bt_signature` against `bt_payload` and decode the payload.
    ///
    /// The signature is "{public_key}|{hex hmac-sha256(private_key, payload)}".
    /// Uses constant-time comparison for the digest.
    fn parse_webhook(&self, signature: &str, payload: &str) -> BillingResult<WebhookNotification> {
        let (key_id, received_digest) = signature
            .split_once('|')
            .ok_or(BillingError::WebhookSignatureInvalid)?;

        if key_id != self.config.public_key {
            tracing::warn!("Webhook signed with unknown public key");
            return Err(BillingError::WebhookSignatureInvalid);
        }

        let mut mac = HmacSha256::new_from_slice(self.config.private_key.as_bytes())
            .map_err(|_| BillingError::WebhookSignatureInvalid)?;
        mac.update(payload.as_bytes());
        let computed = hex::encode(mac.finalize().into_bytes());

        if computed
            .as_bytes()
            .ct_eq(received_digest.as_bytes())
            .unwrap_u8()
            != 1
        {
            tracing::warn!("Webhook signature mismatch");
            return Err(BillingError::WebhookSignatureInvalid);
        }

        let wire: WebhookPayloadWire = serde_json::from_str(payload).map_err(|e| {
            tracing::error!(parse_error = %e, "Failed to parse webhook payload");
            BillingError::WebhookSignatureInvalid
        })?;

        Ok(WebhookNotification {
            kind: wire.kind,
            timestamp: unix_date(Some(wire.timestamp))
                .unwrap_or_else(OffsetDateTime::now_utc),
            subscription: wire
                .subscription
                .map(SubscriptionWire::into_subscription)
                .transpose()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_two_fraction_digits() {
        assert_eq!(parse_decimal_cents("29.00").unwrap(), 2900);
        assert_eq!(parse_decimal_cents("2.50").unwrap(), 250);
        assert_eq!(parse_decimal_cents("0.05").unwrap(), 5);
    }

    #[test]
    fn parses_short_forms() {
        assert_eq!(parse_decimal_cents("49").unwrap(), 4900);
        assert_eq!(parse_decimal_cents("2.5").unwrap(), 250);
        assert_eq!(parse_decimal_cents("-10.25").unwrap(), -1025);
    }

    #[test]
    fn rejects_malformed_amounts() {
        for bad in ["", ".", "1.234", "12.3x", "abc", "1,00", "-"] {
            assert!(parse_decimal_cents(bad).is_err(), "accepted '{bad}'");
        }
    }

    #[test]
    fn rejects_amounts_that_overflow_cents() {
        // Parses as i64 but cannot be expressed in cents.
        assert!(parse_decimal_cents("92233720368547759.00").is_err());
        assert!(parse_decimal_cents(&i64::MAX.to_string()).is_err());
        // Too large for i64 entirely.
        assert!(parse_decimal_cents("99999999999999999999").is_err());
    }

    #[test]
    fn unknown_status_is_carried_through() {
        assert_eq!(map_status("Active"), GatewaySubscriptionStatus::Active);
        assert_eq!(map_status("past_due"), GatewaySubscriptionStatus::PastDue);
        assert_eq!(map_status("Expired"), GatewaySubscriptionStatus::Canceled);
        assert_eq!(
            map_status("Pending"),
            GatewaySubscriptionStatus::Other("Pending".to_string())
        );
    }

    #[test]
    fn webhook_signature_round_trip() {
        let client = BraintreeClient::new(BraintreeConfig {
            merchant_id: "m_test".to_string(),
            public_key: "pub_test".to_string(),
            private_key: "priv_test".to_string(),
            environment: "sandbox".to_string(),
        });

        let payload = r#"{"kind":"subscription_canceled","timestamp":1700000000,"subscription":{"id":"sub_1","planId":"shelfshare-team","status":"Canceled","price":"29.00","addOns":[],"nextBillingDate":null,"paidThroughDate":1702000000}}"#;

        let mut mac = HmacSha256::new_from_slice(b"priv_test").unwrap();
        mac.update(payload.as_bytes());
        let signature = format!("pub_test|{}", hex::encode(mac.finalize().into_bytes()));

        let event = client.parse_webhook(&signature, payload).unwrap();
        assert_eq!(event.kind, "subscription_canceled");
        let sub = event.subscription.unwrap();
        assert_eq!(sub.price_cents, 2900);
        assert_eq!(sub.status, GatewaySubscriptionStatus::Canceled);
    }

    #[test]
    fn webhook_rejects_bad_signature() {
        let client = BraintreeClient::new(BraintreeConfig {
            merchant_id: "m_test".to_string(),
            public_key: "pub_test".to_string(),
            private_key: "priv_test".to_string(),
            environment: "sandbox".to_string(),
        });

        let err = client
            .parse_webhook("pub_test|deadbeef", r#"{"kind":"x","timestamp":0}"#)
            .unwrap_err();
        assert!(matches!(err, BillingError::WebhookSignatureInvalid));

        let err = client.parse_webhook("no-separator", "{}").unwrap_err();
        assert!(matches!(err, BillingError::WebhookSignatureInvalid));
    }
}
