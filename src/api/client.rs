use crate::api::classify::{classify_graphql, Classified};
use crate::api::error::ApiError;
use crate::api::executor::{HttpRequest, ReqwestExecutor, RequestExecutor};
use crate::api::queries;
use crate::api::token::{AuthConfig, TokenManager};
use crate::api::AccountApi;
use crate::core::models::{Address, HolidayMode, Product, Subscription};
use crate::core::settings::{AccountConfig, ApiSettings};
use crate::core::AccountSnapshot;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, info};

// ============================================================================
// GraphQL Types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CustomerPayload {
    holiday_mode: Option<HolidayModePayload>,
    #[serde(default)]
    subscriptions: Vec<SubscriptionPayload>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HolidayModePayload {
    config: Option<HolidayModeConfigPayload>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HolidayModeConfigPayload {
    end_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscriptionPayload {
    id: String,
    next_charge_scheduled_at: Option<DateTime<Utc>>,
    product: ProductPayload,
    address: AddressPayload,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProductPayload {
    type_id: String,
    name: String,
    pack_size: u32,
}

#[derive(Debug, Deserialize)]
struct AddressPayload {
    id: String,
}

impl From<CustomerPayload> for AccountSnapshot {
    fn from(customer: CustomerPayload) -> Self {
        Self {
            holiday_mode: customer
                .holiday_mode
                .and_then(|h| h.config)
                .map(|config| HolidayMode {
                    end_date: config.end_date,
                }),
            subscriptions: customer
                .subscriptions
                .into_iter()
                .map(|s| Subscription {
                    id: s.id,
                    next_charge_scheduled_at: s.next_charge_scheduled_at,
                    product: Product {
                        type_id: s.product.type_id,
                        name: s.product.name,
                        pack_size: s.product.pack_size,
                    },
                    address: Address { id: s.address.id },
                })
                .collect(),
        }
    }
}

// ============================================================================
// Client
// ============================================================================

/// Authenticated access to one Smol customer account.
pub struct SmolApiClient {
    executor: Arc<dyn RequestExecutor>,
    tokens: TokenManager,
    graphql_url: String,
    market: String,
}

impl SmolApiClient {
    pub fn new(account: &AccountConfig, api: &ApiSettings) -> Self {
        let executor = Arc::new(ReqwestExecutor::new(api.timeout()));
        Self::with_executor(executor, account, api)
    }

    pub fn with_executor(
        executor: Arc<dyn RequestExecutor>,
        account: &AccountConfig,
        api: &ApiSettings,
    ) -> Self {
        let tokens = TokenManager::new(
            executor.clone(),
            AuthConfig {
                token_url: api.token_url.clone(),
                username: account.username.clone(),
                password: account.password.clone(),
            },
        );

        Self {
            executor,
            tokens,
            graphql_url: format!("{}/v2/graphql", api.base_url.trim_end_matches('/')),
            market: account.market.clone(),
        }
    }

    /// Current holiday mode and subscriptions. `Absent` when the API has no
    /// customer for these credentials.
    pub async fn get_account(&self) -> Result<Classified<AccountSnapshot>, ApiError> {
        let body = match self.execute(queries::account_query(&self.market), &[]).await? {
            Classified::Data(body) => body,
            Classified::Absent => return Ok(Classified::Absent),
        };

        let customer = match body.get("data").and_then(|d| d.get("customer")) {
            Some(customer) if !customer.is_null() => customer.clone(),
            _ => {
                error!(market = %self.market, "Failed to retrieve account");
                return Ok(Classified::Absent);
            }
        };

        let customer: CustomerPayload = serde_json::from_value(customer)
            .map_err(|e| ApiError::malformed(&self.graphql_url, format!("invalid customer: {e}")))?;

        let snapshot = AccountSnapshot::from(customer);
        debug!(
            subscriptions = snapshot.subscriptions.len(),
            on_holiday = snapshot.holiday_mode.is_some(),
            "Retrieved account"
        );
        Ok(Classified::Data(snapshot))
    }

    pub async fn start_holiday(&self, end_date: DateTime<Utc>) -> Result<bool, ApiError> {
        self.mutate(
            queries::start_holiday_mode_mutation(end_date, &self.market),
            queries::START_HOLIDAY_MODE_FIELD,
            &[queries::HOLIDAY_MODE_ALREADY_ACTIVE],
        )
        .await
    }

    pub async fn end_holiday(&self) -> Result<bool, ApiError> {
        self.mutate(
            queries::end_holiday_mode_mutation(&self.market),
            queries::END_HOLIDAY_MODE_FIELD,
            &[queries::HOLIDAY_MODE_NOT_ACTIVE],
        )
        .await
    }

    pub async fn change_next_charge_date(
        &self,
        subscription_id: &str,
        address_id: &str,
        next_charge_date: DateTime<Utc>,
    ) -> Result<bool, ApiError> {
        self.mutate(
            queries::update_next_charge_date_mutation(
                subscription_id,
                address_id,
                next_charge_date,
                &self.market,
            ),
            queries::UPDATE_NEXT_CHARGE_DATE_FIELD,
            &[],
        )
        .await
    }

    /// Drops the cached credential. Later calls authenticate again.
    pub async fn close(&self) {
        self.tokens.clear().await;
    }

    /// A mutation succeeded when its result object carries an id.
    async fn mutate(
        &self,
        query: String,
        field: &str,
        accepted_error_codes: &[&str],
    ) -> Result<bool, ApiError> {
        let body = match self.execute(query, accepted_error_codes).await? {
            Classified::Data(body) => body,
            Classified::Absent => {
                info!(field, "Mutation had no effect");
                return Ok(false);
            }
        };

        let applied = body
            .get("data")
            .and_then(|d| d.get(field))
            .and_then(|f| f.get("id"))
            .is_some_and(|id| !id.is_null());

        if !applied {
            error!(field, "Mutation returned no result");
        }
        Ok(applied)
    }

    async fn execute(
        &self,
        query: String,
        accepted_error_codes: &[&str],
    ) -> Result<Classified<Value>, ApiError> {
        let credential = self.tokens.ensure_valid_token().await?;

        let request = HttpRequest::post_json(
            &self.graphql_url,
            json!({ "query": query, "variables": { "market": self.market } }),
        )
        .bearer(credential.token());

        let response = self
            .executor
            .post(&request)
            .await
            .map_err(|e| ApiError::from_executor(e, &self.graphql_url, request.context()))?;

        classify_graphql(
            &response,
            &self.graphql_url,
            request.context(),
            accepted_error_codes,
        )
    }
}

#[async_trait]
impl AccountApi for SmolApiClient {
    async fn fetch_account(&self) -> Result<Classified<AccountSnapshot>, ApiError> {
        self.get_account().await
    }

    async fn close(&self) {
        SmolApiClient::close(self).await;
    }
}
