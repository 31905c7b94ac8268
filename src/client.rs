use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Deserialize};

use crate::{
    api::{ApiRequest, Endpoint, Environment},
    config::ValidatorConfig,
    generator::TokenGenerator,
    payload::{RenewalInfo, SignedPayloadDecoder, TransactionInfo},
    transport::{Transport, TransportResponse},
    verifier::ChainVerifier,
};

/// Non-2xx answer from the App Store Server API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error(
    "App Store Server API returned status {status} ({}): {error_message}",
    .error_code.map_or_else(|| "no error code".to_owned(), |code| format!("error code {code}"))
)]
pub struct ApiError {
    /// HTTP status code
    pub status: u16,
    /// `errorCode` from the response body
    pub error_code: Option<i64>,
    /// `errorMessage` from the response body, or the raw body
    pub error_message: String,
}

impl ApiError {
    fn from_response(response: &TransportResponse) -> Self {
        match serde_json::from_str::<ErrorResponse>(&response.body) {
            Ok(body) => ApiError {
                status: response.status,
                error_code: body.error_code,
                error_message: body.error_message.unwrap_or_default(),
            },
            Err(_) => ApiError {
                status: response.status,
                error_code: None,
                error_message: response.body.clone(),
            },
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorResponse {
    error_code: Option<i64>,
    error_message: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionInfoResponse {
    signed_transaction_info: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryResponse {
    revision: Option<String>,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    signed_transactions: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    #[serde(default)]
    data: Vec<SubscriptionGroupResponse>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscriptionGroupResponse {
    subscription_group_identifier: String,
    #[serde(default)]
    last_transactions: Vec<LastTransactionResponse>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LastTransactionResponse {
    original_transaction_id: String,
    status: i64,
    signed_transaction_info: String,
    signed_renewal_info: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TestNotificationResponse {
    test_notification_token: String,
}

/// One page of a customer's transaction history.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionHistory {
    /// Pass back as `revision` to fetch the next page.
    pub revision: Option<String>,
    /// Whether more pages follow
    pub has_more: bool,
    /// Verified transactions on this page
    pub transactions: Vec<TransactionInfo>,
}

/// Subscription status code reported per subscription group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum SubscriptionStatus {
    /// 1
    Active,
    /// 2
    Expired,
    /// 3, the store is retrying a failed charge
    BillingRetry,
    /// 4, access continues while billing is retried
    BillingGracePeriod,
    /// 5, access was removed through Family Sharing
    Revoked,
    /// A code not listed above
    Unknown(i64),
}

impl SubscriptionStatus {
    /// Maps the numeric `status` of a response.
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => SubscriptionStatus::Active,
            2 => SubscriptionStatus::Expired,
            3 => SubscriptionStatus::BillingRetry,
            4 => SubscriptionStatus::BillingGracePeriod,
            5 => SubscriptionStatus::Revoked,
            other => SubscriptionStatus::Unknown(other),
        }
    }
}

/// Latest verified state of one subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct LastTransaction {
    /// Original transaction id of the subscription
    pub original_transaction_id: String,
    /// Current status
    pub status: SubscriptionStatus,
    /// Latest verified transaction
    pub transaction: TransactionInfo,
    /// Verified renewal info
    pub renewal: RenewalInfo,
}

/// Statuses of the subscriptions in one subscription group.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionGroupStatus {
    /// Group identifier from App Store Connect
    pub subscription_group_identifier: String,
    /// One entry per subscription in the group
    pub last_transactions: Vec<LastTransaction>,
}

/// Client for the App Store Server API.
///
/// Each call signs a fresh bearer token. Every signed field in a response is
/// verified against the pinned chain before it is returned; an unverifiable
/// payload fails the whole call.
pub struct AppStoreServerClient<T: Transport> {
    transport: T,
    generator: TokenGenerator,
    environment: Environment,
    decoder: SignedPayloadDecoder,
}

impl<T: Transport> AppStoreServerClient<T> {
    /// Creates a client verifying payloads against the App Store pins and
    /// the issuer's bundle id.
    pub fn new(transport: T, generator: TokenGenerator, environment: Environment) -> Self {
        let decoder = SignedPayloadDecoder::new(ChainVerifier::new())
            .with_expected_bundle_id(generator.issuer().bundle_id());

        AppStoreServerClient {
            transport,
            generator,
            environment,
            decoder,
        }
    }

    /// Builds a client from a [`ValidatorConfig`].
    pub fn from_config(config: ValidatorConfig, transport: T) -> Result<Self> {
        let environment = config.environment;
        let issuer = Arc::new(config.into_issuer()?);

        Ok(Self::new(
            transport,
            TokenGenerator::with_system_clock(issuer),
            environment,
        ))
    }

    /// Replaces the payload decoder, for example to trust a private chain.
    pub fn with_decoder(mut self, decoder: SignedPayloadDecoder) -> Self {
        self.decoder = decoder;
        self
    }

    /// Environment requests are sent to.
    pub fn environment(&self) -> Environment {
        self.environment
    }

    /// Decoder used for signed response fields.
    pub fn decoder(&self) -> &SignedPayloadDecoder {
        &self.decoder
    }

    /// Fetches and verifies a single transaction.
    pub async fn get_transaction_info(&self, transaction_id: &str) -> Result<TransactionInfo> {
        let response: TransactionInfoResponse = self
            .execute(Endpoint::TransactionInfo {
                transaction_id: transaction_id.to_owned(),
            })
            .await?;

        Ok(self
            .decoder
            .decode_transaction(&response.signed_transaction_info)?)
    }

    /// Fetches one page of transaction history.
    pub async fn get_transaction_history(
        &self,
        transaction_id: &str,
        revision: Option<&str>,
    ) -> Result<TransactionHistory> {
        let response: HistoryResponse = self
            .execute(Endpoint::TransactionHistory {
                transaction_id: transaction_id.to_owned(),
                revision: revision.map(ToOwned::to_owned),
            })
            .await?;

        let transactions = response
            .signed_transactions
            .iter()
            .map(|signed| self.decoder.decode_transaction(signed))
            .collect::<crate::Result<Vec<_>>>()?;

        Ok(TransactionHistory {
            revision: response.revision,
            has_more: response.has_more,
            transactions,
        })
    }

    /// Fetches the status of every subscription the customer has.
    pub async fn get_all_subscription_statuses(
        &self,
        transaction_id: &str,
    ) -> Result<Vec<SubscriptionGroupStatus>> {
        let response: StatusResponse = self
            .execute(Endpoint::SubscriptionStatuses {
                transaction_id: transaction_id.to_owned(),
            })
            .await?;

        let mut groups = Vec::with_capacity(response.data.len());
        for group in response.data {
            let mut last_transactions = Vec::with_capacity(group.last_transactions.len());
            for last in group.last_transactions {
                last_transactions.push(LastTransaction {
                    original_transaction_id: last.original_transaction_id,
                    status: SubscriptionStatus::from_code(last.status),
                    transaction: self
                        .decoder
                        .decode_transaction(&last.signed_transaction_info)?,
                    renewal: self.decoder.decode_renewal_info(&last.signed_renewal_info)?,
                });
            }
            groups.push(SubscriptionGroupStatus {
                subscription_group_identifier: group.subscription_group_identifier,
                last_transactions,
            });
        }

        Ok(groups)
    }

    /// Asks the store to send a `TEST` notification to the configured URL.
    ///
    /// # Returns
    ///
    /// The test notification token.
    pub async fn request_test_notification(&self) -> Result<String> {
        let response: TestNotificationResponse = self
            .execute(Endpoint::RequestTestNotification)
            .await?;

        Ok(response.test_notification_token)
    }

    async fn execute<R: DeserializeOwned>(&self, endpoint: Endpoint) -> Result<R> {
        let token = self.generator.generate()?;
        let request = ApiRequest::new(self.environment, &endpoint, &token);

        log::debug!("Calling {} {}", request.method, request.url);
        let response = self.transport.send(&request).await?;

        if !response.is_success() {
            let err = ApiError::from_response(&response);
            log::warn!("{} {} failed: {err}", request.method, request.url);
            return Err(err.into());
        }

        serde_json::from_str(&response.body)
            .with_context(|| format!("unexpected response body from {}", request.url))
    }
}

impl<T: Transport> std::fmt::Debug for AppStoreServerClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppStoreServerClient")
            .field("generator", &self.generator)
            .field("environment", &self.environment)
            .field("decoder", &self.decoder)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::VecDeque, sync::Mutex};

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use super::*;
    use crate::{
        api::HttpMethod,
        clock::FixedClock,
        error::Error,
        generator::AUDIENCE,
        test_support::{renewal_claims, test_issuer, transaction_claims, TestChain},
        token::SignedToken,
    };

    #[derive(Default)]
    struct MockTransport {
        responses: Mutex<VecDeque<TransportResponse>>,
        requests: Mutex<Vec<ApiRequest>>,
    }

    impl MockTransport {
        fn replying(status: u16, body: Value) -> Self {
            let transport = MockTransport::default();
            transport.push(status, body.to_string());
            transport
        }

        fn push(&self, status: u16, body: String) {
            self.responses
                .lock()
                .unwrap()
                .push_back(TransportResponse { status, body });
        }

        fn requests(&self) -> Vec<ApiRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(&self, request: &ApiRequest) -> anyhow::Result<TransportResponse> {
            self.requests.lock().unwrap().push(request.clone());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| anyhow::anyhow!("no response queued"))
        }
    }

    fn client(chain: &TestChain, transport: MockTransport) -> AppStoreServerClient<MockTransport> {
        let generator = TokenGenerator::new(
            Arc::new(test_issuer()),
            Arc::new(FixedClock::from_timestamp(1_704_067_200).unwrap()),
        );
        let decoder = SignedPayloadDecoder::new(ChainVerifier::with_pins(chain.pins()))
            .with_expected_bundle_id("com.example");

        AppStoreServerClient::new(transport, generator, Environment::Sandbox).with_decoder(decoder)
    }

    #[tokio::test]
    async fn fetches_verified_transaction() {
        let _ = env_logger::builder().is_test(true).try_init();
        let chain = TestChain::generate();
        let transport = MockTransport::replying(
            200,
            json!({"signedTransactionInfo": chain.sign(transaction_claims())}),
        );
        let client = client(&chain, transport);

        let transaction = client.get_transaction_info("2000000123456789").await.unwrap();
        assert_eq!(transaction.product_id, "com.example.monthly");

        let requests = client.transport.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, HttpMethod::Get);
        assert_eq!(
            requests[0].url,
            "https://api.storekit-sandbox.itunes.apple.com/inApps/v1/transactions/2000000123456789"
        );

        let bearer = requests[0].authorization.strip_prefix("Bearer ").unwrap();
        let token: SignedToken = bearer.parse().unwrap();
        assert_eq!(token.claim("aud"), Some(&json!(AUDIENCE)));
        assert_eq!(token.claim("bid"), Some(&json!("com.example")));
    }

    #[tokio::test]
    async fn unverified_transaction_fails_the_call() {
        let chain = TestChain::generate();
        let impostor = TestChain::generate();
        let transport = MockTransport::replying(
            200,
            json!({"signedTransactionInfo": impostor.sign(transaction_claims())}),
        );

        let err = client(&chain, transport)
            .get_transaction_info("2000000123456789")
            .await
            .unwrap_err();
        let err = err.downcast_ref::<Error>().unwrap();
        assert!(err.is_trust_failure(), "{err:?}");
    }

    #[tokio::test]
    async fn error_status_carries_api_code() {
        let chain = TestChain::generate();
        let transport = MockTransport::replying(
            404,
            json!({"errorCode": 4040010, "errorMessage": "Transaction id not found."}),
        );

        let err = client(&chain, transport)
            .get_transaction_info("1")
            .await
            .unwrap_err();
        let api_error = err.downcast_ref::<ApiError>().unwrap();
        assert_eq!(api_error.status, 404);
        assert_eq!(api_error.error_code, Some(4_040_010));
        assert_eq!(api_error.error_message, "Transaction id not found.");
        assert!(err.to_string().contains("error code 4040010"));
    }

    #[tokio::test]
    async fn error_status_without_json_body() {
        let chain = TestChain::generate();
        let transport = MockTransport::default();
        transport.push(401, "Unauthenticated".to_owned());

        let err = client(&chain, transport)
            .request_test_notification()
            .await
            .unwrap_err();
        let api_error = err.downcast_ref::<ApiError>().unwrap();
        assert_eq!(api_error.status, 401);
        assert_eq!(api_error.error_code, None);
        assert_eq!(api_error.error_message, "Unauthenticated");
    }

    #[tokio::test]
    async fn pages_transaction_history() {
        let chain = TestChain::generate();
        let mut second = transaction_claims();
        second["transactionId"] = json!("2000000123456790");
        let transport = MockTransport::replying(
            200,
            json!({
                "revision": "revision_output",
                "bundleId": "com.example",
                "environment": "Sandbox",
                "hasMore": true,
                "signedTransactions": [
                    chain.sign(transaction_claims()),
                    chain.sign(second),
                ],
            }),
        );
        let client = client(&chain, transport);

        let history = client
            .get_transaction_history("2000000000000001", Some("revision_input"))
            .await
            .unwrap();
        assert!(history.has_more);
        assert_eq!(history.revision.as_deref(), Some("revision_output"));
        assert_eq!(history.transactions.len(), 2);
        assert_eq!(history.transactions[1].transaction_id, "2000000123456790");
        assert!(client.transport.requests()[0]
            .url
            .ends_with("/inApps/v2/history/2000000000000001?revision=revision_input"));
    }

    #[tokio::test]
    async fn reads_subscription_statuses() {
        let chain = TestChain::generate();
        let transport = MockTransport::replying(
            200,
            json!({
                "environment": "Sandbox",
                "bundleId": "com.example",
                "data": [{
                    "subscriptionGroupIdentifier": "21000000",
                    "lastTransactions": [{
                        "originalTransactionId": "2000000000000001",
                        "status": 1,
                        "signedTransactionInfo": chain.sign(transaction_claims()),
                        "signedRenewalInfo": chain.sign(renewal_claims()),
                    }],
                }],
            }),
        );

        let groups = client(&chain, transport)
            .get_all_subscription_statuses("2000000000000001")
            .await
            .unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].subscription_group_identifier, "21000000");

        let last = &groups[0].last_transactions[0];
        assert_eq!(last.status, SubscriptionStatus::Active);
        assert_eq!(last.transaction.original_transaction_id, "2000000000000001");
        assert!(last.renewal.auto_renew_status);
    }

    #[tokio::test]
    async fn requests_test_notification() {
        let chain = TestChain::generate();
        let transport = MockTransport::replying(
            200,
            json!({"testNotificationToken": "ce3af791-365e-4c60-841b-1674b43c1609_1704067200000"}),
        );
        let client = client(&chain, transport);

        let token = client.request_test_notification().await.unwrap();
        assert!(token.starts_with("ce3af791"));
        assert_eq!(client.transport.requests()[0].method, HttpMethod::Post);
    }

    #[tokio::test]
    async fn transport_failure_propagates() {
        let chain = TestChain::generate();
        let err = client(&chain, MockTransport::default())
            .get_transaction_info("1")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no response queued"));
    }

    #[test]
    fn builds_from_config() {
        let config = ValidatorConfig::from_json_str(
            &json!({
                "issuer_id": "DEF456UVW",
                "bundle_id": "com.example",
                "key_id": "ABC123DEFG",
                "private_key": crate::test_support::test_key_pem(),
                "environment": "sandbox",
            })
            .to_string(),
        )
        .unwrap();
        let client = AppStoreServerClient::from_config(config, MockTransport::default()).unwrap();

        assert_eq!(client.environment(), Environment::Sandbox);
        assert_eq!(SubscriptionStatus::from_code(9), SubscriptionStatus::Unknown(9));
    }
}
