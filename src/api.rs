use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};

use crate::token::SignedToken;

/// App Store Server API environment.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Environment {
    /// Live purchases
    #[default]
    Production,
    /// Sandbox and TestFlight purchases
    Sandbox,
}

impl Environment {
    /// Base URL of the API in this environment, without a trailing slash.
    pub fn base_url(&self) -> &'static str {
        match self {
            Environment::Production => "https://api.storekit.itunes.apple.com",
            Environment::Sandbox => "https://api.storekit-sandbox.itunes.apple.com",
        }
    }
}

/// HTTP method of an [`Endpoint`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum HttpMethod {
    /// `GET`
    #[strum(serialize = "GET")]
    Get,
    /// `POST`
    #[strum(serialize = "POST")]
    Post,
}

/// Operations of the App Store Server API this crate calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// `GET /inApps/v1/transactions/{transactionId}`
    TransactionInfo {
        /// Any transaction id of the customer
        transaction_id: String,
    },
    /// `GET /inApps/v2/history/{transactionId}`, paged by `revision`.
    TransactionHistory {
        /// Any transaction id of the customer
        transaction_id: String,
        /// `revision` from the previous page
        revision: Option<String>,
    },
    /// `GET /inApps/v1/subscriptions/{transactionId}`
    SubscriptionStatuses {
        /// Any transaction id of the customer
        transaction_id: String,
    },
    /// `POST /inApps/v1/notifications/test`
    RequestTestNotification,
}

impl Endpoint {
    /// HTTP method of the endpoint.
    pub fn method(&self) -> HttpMethod {
        match self {
            Endpoint::RequestTestNotification => HttpMethod::Post,
            Endpoint::TransactionInfo { .. }
            | Endpoint::TransactionHistory { .. }
            | Endpoint::SubscriptionStatuses { .. } => HttpMethod::Get,
        }
    }

    /// Path and query, relative to [`Environment::base_url`].
    pub fn path(&self) -> String {
        match self {
            Endpoint::TransactionInfo { transaction_id } => {
                format!("/inApps/v1/transactions/{}", encode_segment(transaction_id))
            }
            Endpoint::TransactionHistory {
                transaction_id,
                revision,
            } => {
                let path = format!("/inApps/v2/history/{}", encode_segment(transaction_id));
                match revision {
                    Some(revision) => {
                        let query = form_urlencoded::Serializer::new(String::new())
                            .append_pair("revision", revision)
                            .finish();
                        format!("{path}?{query}")
                    }
                    None => path,
                }
            }
            Endpoint::SubscriptionStatuses { transaction_id } => {
                format!("/inApps/v1/subscriptions/{}", encode_segment(transaction_id))
            }
            Endpoint::RequestTestNotification => "/inApps/v1/notifications/test".to_owned(),
        }
    }
}

/// Everything except RFC 3986 unreserved characters.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

fn encode_segment(segment: &str) -> String {
    utf8_percent_encode(segment, PATH_SEGMENT).to_string()
}

/// Everything a transport needs to issue one authenticated call.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiRequest {
    /// HTTP method
    pub method: HttpMethod,
    /// Absolute URL including any query
    pub url: String,
    /// `Authorization` header value (`Bearer <jwt>`).
    pub authorization: String,
}

impl ApiRequest {
    /// Builds a request for `endpoint` authorized by `token`.
    pub fn new(environment: Environment, endpoint: &Endpoint, token: &SignedToken) -> Self {
        ApiRequest {
            method: endpoint.method(),
            url: format!("{}{}", environment.base_url(), endpoint.path()),
            authorization: token.bearer(),
        }
    }
}

impl std::fmt::Debug for ApiRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiRequest")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("authorization", &"Bearer <redacted>")
            .finish()
    }
}
