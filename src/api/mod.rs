pub mod classify;
pub mod client;
pub mod error;
pub mod executor;
pub mod queries;
pub mod token;

pub use classify::Classified;
pub use client::SmolApiClient;
pub use error::ApiError;

use crate::core::AccountSnapshot;
use async_trait::async_trait;

/// What the refresh coordinator needs from the API.
#[async_trait]
pub trait AccountApi: Send + Sync {
    async fn fetch_account(&self) -> Result<Classified<AccountSnapshot>, ApiError>;

    /// Releases credentials held for the account.
    async fn close(&self) {}
}
