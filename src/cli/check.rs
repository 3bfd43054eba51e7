use crate::api::{ApiError, Classified, SmolApiClient};
use crate::cli::load_settings;
use crate::core::{AccountSnapshot, ErrorKind};
use anyhow::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CheckOutcome {
    Ok,
    ServerError,
    AccountNotFound,
}

impl CheckOutcome {
    fn label(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::ServerError => "server_error",
            Self::AccountNotFound => "account_not_found",
        }
    }
}

/// Checks every configured account can log in and see its data.
pub async fn run(account_filter: Option<String>) -> Result<()> {
    let settings = load_settings()?;
    let accounts = settings.select_accounts(account_filter.as_deref())?;

    let mut failed = 0;
    for account in &accounts {
        let client = SmolApiClient::new(account, &settings.api);
        let result = client.get_account().await;
        client.close().await;

        let outcome = outcome(&result);
        match &result {
            Err(e) => println!("{:<16} {}: {}", account.name, outcome.label(), e),
            Ok(_) => println!("{:<16} {}", account.name, outcome.label()),
        }
        if outcome != CheckOutcome::Ok {
            failed += 1;
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {} account(s) failed the check", accounts.len());
    }
    Ok(())
}

/// Request errors count as a bad account: the API rejected what it was
/// asked for that user.
fn outcome(result: &Result<Classified<AccountSnapshot>, ApiError>) -> CheckOutcome {
    match result {
        Ok(Classified::Data(_)) => CheckOutcome::Ok,
        Ok(Classified::Absent) => CheckOutcome::AccountNotFound,
        Err(e) => match e.kind() {
            Some(ErrorKind::Request { .. }) | Some(ErrorKind::Authentication { .. }) => {
                CheckOutcome::AccountNotFound
            }
            Some(ErrorKind::Server) | Some(ErrorKind::Timeout) | None => CheckOutcome::ServerError,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::fixtures::snapshot;

    #[test]
    fn test_outcomes() {
        assert_eq!(outcome(&Ok(Classified::Data(snapshot("X")))), CheckOutcome::Ok);
        assert_eq!(outcome(&Ok(Classified::Absent)), CheckOutcome::AccountNotFound);
        assert_eq!(
            outcome(&Err(ErrorKind::authentication(Vec::new()).into())),
            CheckOutcome::AccountNotFound
        );
        assert_eq!(
            outcome(&Err(ErrorKind::request(vec!["x".to_string()]).into())),
            CheckOutcome::AccountNotFound
        );
        assert_eq!(outcome(&Err(ErrorKind::Server.into())), CheckOutcome::ServerError);
        assert_eq!(outcome(&Err(ErrorKind::Timeout.into())), CheckOutcome::ServerError);
        assert_eq!(
            outcome(&Err(ApiError::malformed("http://x", "eof"))),
            CheckOutcome::ServerError
        );
    }
}
