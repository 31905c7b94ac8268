use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    claims::{
        get_bool, get_i64, get_millis, get_object, get_string, require_millis, require_str,
    },
    error::{Error, Result},
    token::JsonMap,
    verifier::ChainVerifier,
};

/// A single purchase, decoded from a verified `signedTransactionInfo`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionInfo {
    /// Unique id of this transaction
    pub transaction_id: String,
    /// Id of the first transaction in a subscription or restore chain
    pub original_transaction_id: String,
    /// Bundle id of the app
    pub bundle_id: String,
    /// Product identifier of the purchase
    pub product_id: String,
    /// When the store charged the customer
    pub purchase_date: DateTime<Utc>,
    /// Purchase date of the original transaction
    pub original_purchase_date: Option<DateTime<Utc>>,
    /// Subscription expiry; absent for non-expiring purchases
    pub expires_date: Option<DateTime<Utc>>,
    /// Number of consumable items purchased
    pub quantity: i64,
    /// Product type, e.g. `Auto-Renewable Subscription`
    #[serde(rename = "type")]
    pub transaction_type: Option<String>,
    /// Server environment, `Production` or `Sandbox`
    pub environment: Option<String>,
    /// When the store signed the payload
    pub signed_date: Option<DateTime<Utc>>,
    /// When the purchase was refunded or revoked
    pub revocation_date: Option<DateTime<Utc>>,
    /// UUID the app attached to the purchase
    pub app_account_token: Option<String>,
    /// `PURCHASED` or `FAMILY_SHARED`
    pub in_app_ownership_type: Option<String>,
    /// Id of subscription purchase events across devices
    pub web_order_line_item_id: Option<String>,
}

impl TransactionInfo {
    /// Builds a transaction from verified claims.
    ///
    /// `quantity` defaults to 1 when absent.
    pub fn from_claims(claims: &JsonMap) -> Result<Self> {
        Ok(TransactionInfo {
            transaction_id: require_str(claims, "transactionId")?.to_owned(),
            original_transaction_id: require_str(claims, "originalTransactionId")?.to_owned(),
            bundle_id: require_str(claims, "bundleId")?.to_owned(),
            product_id: require_str(claims, "productId")?.to_owned(),
            purchase_date: require_millis(claims, "purchaseDate")?,
            original_purchase_date: get_millis(claims, "originalPurchaseDate")?,
            expires_date: get_millis(claims, "expiresDate")?,
            quantity: get_i64(claims, "quantity")?.unwrap_or(1),
            transaction_type: get_string(claims, "type")?,
            environment: get_string(claims, "environment")?,
            signed_date: get_millis(claims, "signedDate")?,
            revocation_date: get_millis(claims, "revocationDate")?,
            app_account_token: get_string(claims, "appAccountToken")?,
            in_app_ownership_type: get_string(claims, "inAppOwnershipType")?,
            web_order_line_item_id: get_string(claims, "webOrderLineItemId")?,
        })
    }

    /// True when the store refunded or revoked the purchase.
    pub fn is_revoked(&self) -> bool {
        self.revocation_date.is_some()
    }

    /// True when the transaction has an expiry at or before `at`.
    /// Non-expiring purchases never expire.
    pub fn is_expired_at(&self, at: DateTime<Utc>) -> bool {
        self.expires_date.is_some_and(|expires| expires <= at)
    }
}

/// Renewal state of an auto-renewable subscription, decoded from a verified
/// `signedRenewalInfo`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenewalInfo {
    /// Original transaction id of the subscription
    pub original_transaction_id: String,
    /// Product the subscription renews into
    pub auto_renew_product_id: Option<String>,
    /// Product currently subscribed to
    pub product_id: String,
    /// Whether the subscription renews automatically
    pub auto_renew_status: bool,
    /// Why the subscription expired (store reason code)
    pub expiration_intent: Option<i64>,
    /// Whether the store is still trying to bill
    pub is_in_billing_retry_period: Option<bool>,
    /// End of the billing grace period
    pub grace_period_expires_date: Option<DateTime<Utc>>,
    /// When the store signed the payload
    pub signed_date: Option<DateTime<Utc>>,
    /// Server environment, `Production` or `Sandbox`
    pub environment: Option<String>,
}

impl RenewalInfo {
    /// Builds renewal info from verified claims.
    pub fn from_claims(claims: &JsonMap) -> Result<Self> {
        Ok(RenewalInfo {
            original_transaction_id: require_str(claims, "originalTransactionId")?.to_owned(),
            auto_renew_product_id: get_string(claims, "autoRenewProductId")?,
            product_id: require_str(claims, "productId")?.to_owned(),
            auto_renew_status: get_bool(claims, "autoRenewStatus")?.unwrap_or(false),
            expiration_intent: get_i64(claims, "expirationIntent")?,
            is_in_billing_retry_period: get_bool(claims, "isInBillingRetryPeriod")?,
            grace_period_expires_date: get_millis(claims, "gracePeriodExpiresDate")?,
            signed_date: get_millis(claims, "signedDate")?,
            environment: get_string(claims, "environment")?,
        })
    }
}

/// Server notification type (`notificationType`).
///
/// Names the store adds later parse as [`NotificationType::Unknown`] rather
/// than failing the whole notification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, strum::EnumString)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    /// Customer subscribed to a group for the first time or resubscribed
    Subscribed,
    /// Customer changed the product the subscription renews into
    DidChangeRenewalPref,
    /// Auto-renew was switched on or off
    DidChangeRenewalStatus,
    /// A subscription offer was redeemed
    OfferRedeemed,
    /// Subscription renewed
    DidRenew,
    /// Subscription expired
    Expired,
    /// Renewal failed because of a billing issue
    DidFailToRenew,
    /// Billing grace period ended without renewal
    GracePeriodExpired,
    /// Customer was notified of a price increase
    PriceIncrease,
    /// Purchase was refunded
    Refund,
    /// Refund request was declined
    RefundDeclined,
    /// Store asks for consumption data for a refund request
    ConsumptionRequest,
    /// Renewal date of one subscription was extended
    RenewalExtended,
    /// Family Sharing access was revoked
    Revoke,
    /// Requested through the test notification endpoint
    Test,
    /// Progress of a bulk renewal date extension
    RenewalExtension,
    /// A refund was reversed
    RefundReversed,
    /// External purchase token was created but not reported
    ExternalPurchaseToken,
    /// Customer bought a consumable or non-consumable product
    OneTimeCharge,
    /// Any type name not listed above
    #[strum(default)]
    Unknown(String),
}

impl NotificationType {
    /// Wire name of the type.
    pub fn as_str(&self) -> &str {
        match self {
            NotificationType::Subscribed => "SUBSCRIBED",
            NotificationType::DidChangeRenewalPref => "DID_CHANGE_RENEWAL_PREF",
            NotificationType::DidChangeRenewalStatus => "DID_CHANGE_RENEWAL_STATUS",
            NotificationType::OfferRedeemed => "OFFER_REDEEMED",
            NotificationType::DidRenew => "DID_RENEW",
            NotificationType::Expired => "EXPIRED",
            NotificationType::DidFailToRenew => "DID_FAIL_TO_RENEW",
            NotificationType::GracePeriodExpired => "GRACE_PERIOD_EXPIRED",
            NotificationType::PriceIncrease => "PRICE_INCREASE",
            NotificationType::Refund => "REFUND",
            NotificationType::RefundDeclined => "REFUND_DECLINED",
            NotificationType::ConsumptionRequest => "CONSUMPTION_REQUEST",
            NotificationType::RenewalExtended => "RENEWAL_EXTENDED",
            NotificationType::Revoke => "REVOKE",
            NotificationType::Test => "TEST",
            NotificationType::RenewalExtension => "RENEWAL_EXTENSION",
            NotificationType::RefundReversed => "REFUND_REVERSED",
            NotificationType::ExternalPurchaseToken => "EXTERNAL_PURCHASE_TOKEN",
            NotificationType::OneTimeCharge => "ONE_TIME_CHARGE",
            NotificationType::Unknown(name) => name,
        }
    }

    /// True for notifications that change whether a subscription grants
    /// access: start, renewal, lapse, refund and revocation.
    pub fn is_lifecycle_event(&self) -> bool {
        match self {
            NotificationType::Subscribed
            | NotificationType::DidRenew
            | NotificationType::Expired
            | NotificationType::DidFailToRenew
            | NotificationType::GracePeriodExpired
            | NotificationType::Refund
            | NotificationType::RefundReversed
            | NotificationType::Revoke
            | NotificationType::RenewalExtended
            | NotificationType::OfferRedeemed => true,
            NotificationType::DidChangeRenewalPref
            | NotificationType::DidChangeRenewalStatus
            | NotificationType::PriceIncrease
            | NotificationType::RefundDeclined
            | NotificationType::ConsumptionRequest
            | NotificationType::Test
            | NotificationType::RenewalExtension
            | NotificationType::ExternalPurchaseToken
            | NotificationType::OneTimeCharge
            | NotificationType::Unknown(_) => false,
        }
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `data` block of a server notification. The nested payloads are still
/// signed strings here; [`SignedPayloadDecoder::decode_notification`]
/// verifies them separately.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NotificationData {
    /// Bundle id of the app
    pub bundle_id: Option<String>,
    /// Server environment
    pub environment: Option<String>,
    /// Signed transaction, still unverified
    pub signed_transaction_info: Option<String>,
    /// Signed renewal info, still unverified
    pub signed_renewal_info: Option<String>,
}

impl NotificationData {
    fn from_claims(data: &JsonMap) -> Result<Self> {
        Ok(NotificationData {
            bundle_id: get_string(data, "bundleId")?,
            environment: get_string(data, "environment")?,
            signed_transaction_info: get_string(data, "signedTransactionInfo")?,
            signed_renewal_info: get_string(data, "signedRenewalInfo")?,
        })
    }
}

/// App Store Server Notification (V2) payload.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationPayload {
    /// What happened
    pub notification_type: NotificationType,
    /// Further detail, e.g. `BILLING_RECOVERY`
    pub subtype: Option<String>,
    /// Unique id, used to drop duplicate deliveries
    pub notification_uuid: String,
    /// Notification format version
    pub version: Option<String>,
    /// When the store signed the notification
    pub signed_date: Option<DateTime<Utc>>,
    /// App and purchase data, absent for summary notifications
    pub data: Option<NotificationData>,
}

impl NotificationPayload {
    /// Builds a notification from verified claims. Nested payloads are not
    /// verified here.
    pub fn from_claims(claims: &JsonMap) -> Result<Self> {
        let notification_type = NotificationType::from_str(require_str(claims, "notificationType")?)
            .map_err(|e| Error::invalid_claim("notificationType", e.to_string()))?;

        Ok(NotificationPayload {
            notification_type,
            subtype: get_string(claims, "subtype")?,
            notification_uuid: require_str(claims, "notificationUUID")?.to_owned(),
            version: get_string(claims, "version")?,
            signed_date: get_millis(claims, "signedDate")?,
            data: get_object(claims, "data")?
                .map(NotificationData::from_claims)
                .transpose()?,
        })
    }
}

/// A notification with its nested transaction and renewal info verified
/// and decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedNotification {
    /// Outer notification
    pub payload: NotificationPayload,
    /// Verified `signedTransactionInfo`, if present
    pub transaction: Option<TransactionInfo>,
    /// Verified `signedRenewalInfo`, if present
    pub renewal: Option<RenewalInfo>,
}

/// Turns store-signed strings into domain objects.
///
/// Every string goes through the full [`ChainVerifier`] pipeline before a
/// single claim is read. When an expected bundle id is set, payloads for any
/// other app are rejected with [`Error::InvalidClaim`].
#[derive(Debug, Clone, Default)]
pub struct SignedPayloadDecoder {
    verifier: ChainVerifier,
    expected_bundle_id: Option<String>,
}

impl SignedPayloadDecoder {
    /// Decoder accepting any bundle id.
    pub fn new(verifier: ChainVerifier) -> Self {
        SignedPayloadDecoder {
            verifier,
            expected_bundle_id: None,
        }
    }

    /// Rejects payloads whose bundle id differs from `bundle_id`.
    pub fn with_expected_bundle_id(mut self, bundle_id: impl Into<String>) -> Self {
        self.expected_bundle_id = Some(bundle_id.into());
        self
    }

    /// Verifier every payload goes through.
    pub fn verifier(&self) -> &ChainVerifier {
        &self.verifier
    }

    /// Verifies a signed payload and returns its raw claims.
    pub fn verify_claims(&self, signed: &str) -> Result<JsonMap> {
        Ok(self.verifier.verify_str(signed)?.into_claims())
    }

    /// Verifies and decodes a `signedTransactionInfo`.
    pub fn decode_transaction(&self, signed: &str) -> Result<TransactionInfo> {
        let transaction = TransactionInfo::from_claims(&self.verify_claims(signed)?)?;
        self.check_bundle(Some(&transaction.bundle_id))?;

        Ok(transaction)
    }

    /// Verifies and decodes a `signedRenewalInfo`.
    pub fn decode_renewal_info(&self, signed: &str) -> Result<RenewalInfo> {
        RenewalInfo::from_claims(&self.verify_claims(signed)?)
    }

    /// Verifies and decodes a `signedPayload` notification, including any
    /// nested signed transaction and renewal info.
    pub fn decode_notification(&self, signed: &str) -> Result<VerifiedNotification> {
        let payload = NotificationPayload::from_claims(&self.verify_claims(signed)?)?;
        let data = payload.data.as_ref();
        self.check_bundle(data.and_then(|d| d.bundle_id.as_deref()))?;

        let transaction = data
            .and_then(|d| d.signed_transaction_info.as_deref())
            .map(|nested| self.decode_transaction(nested))
            .transpose()?;
        let renewal = data
            .and_then(|d| d.signed_renewal_info.as_deref())
            .map(|nested| self.decode_renewal_info(nested))
            .transpose()?;

        log::debug!(
            "Decoded {} notification {}",
            payload.notification_type,
            payload.notification_uuid
        );

        Ok(VerifiedNotification {
            payload,
            transaction,
            renewal,
        })
    }

    fn check_bundle(&self, actual: Option<&str>) -> Result<()> {
        let Some(expected) = self.expected_bundle_id.as_deref() else {
            return Ok(());
        };
        match actual {
            Some(actual) if actual == expected => Ok(()),
            Some(actual) => Err(Error::invalid_claim(
                "bundleId",
                format!("expected '{expected}', found '{actual}'"),
            )),
            None => Err(Error::MissingClaim("bundleId".to_owned())),
        }
    }
}
