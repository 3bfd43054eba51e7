pub mod error;
pub mod models;
pub mod notifications;
pub mod retry;
pub mod settings;
pub mod store;

pub use error::ErrorKind;
pub use models::{AccountDiagnostics, AccountSnapshot, RefreshPolicy, RefreshState};
