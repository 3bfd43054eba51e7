//! GraphQL documents sent to the customer API.
//!
//! The market is substituted as a bare enum literal (it is validated as a
//! plain code when the config loads). Free-form values are quoted through
//! [`graphql_string`].

use chrono::{DateTime, SecondsFormat, Utc};

/// Starting holiday mode while it is already active.
pub const HOLIDAY_MODE_ALREADY_ACTIVE: &str = "HOLIDAY_MODE_ALREADY_ACTIVE";
/// Ending holiday mode while it is not active.
pub const HOLIDAY_MODE_NOT_ACTIVE: &str = "HOLIDAY_MODE_NOT_ACTIVE";

pub const START_HOLIDAY_MODE_FIELD: &str = "startHolidayMode";
pub const END_HOLIDAY_MODE_FIELD: &str = "endHolidayModeEarly";
pub const UPDATE_NEXT_CHARGE_DATE_FIELD: &str = "updateSubscriptionNextChargeDate";

const HOLIDAY_MODE_FRAGMENT: &str = r#"
fragment HolidayMode on HolidayMode {
  id
  __typename
}
"#;

/// Quotes a value as a GraphQL string literal. JSON string escaping is a
/// subset GraphQL accepts.
pub fn graphql_string(value: &str) -> String {
    serde_json::Value::from(value).to_string()
}

pub fn format_date(date: DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Secs, false)
}

pub fn account_query(market: &str) -> String {
    format!(
        r#"query GetAccount {{
  customer(market: {market}) {{
    holidayMode {{
      config {{
        endDate
      }}
    }}
    subscriptions(orderBy: NEXT_CHARGE_DATE_ASC) {{
      id
      nextChargeScheduledAt
      product {{
        typeId
        name
        packSize
      }}
      address {{
        id
      }}
    }}
  }}
}}"#
    )
}

pub fn start_holiday_mode_mutation(end_date: DateTime<Utc>, market: &str) -> String {
    let end_date = graphql_string(&format_date(end_date));
    format!(
        r#"mutation StartHolidayMode {{
  {START_HOLIDAY_MODE_FIELD}(input: {{
    endDate: {end_date}
    market: {market}
  }}) {{
    ...HolidayMode
    __typename
  }}
}}
{HOLIDAY_MODE_FRAGMENT}"#
    )
}

pub fn end_holiday_mode_mutation(market: &str) -> String {
    format!(
        r#"mutation EndHolidayMode {{
  {END_HOLIDAY_MODE_FIELD}(input: {{
    market: {market}
  }}) {{
    ...HolidayMode
    __typename
  }}
}}
{HOLIDAY_MODE_FRAGMENT}"#
    )
}

pub fn update_next_charge_date_mutation(
    subscription_id: &str,
    address_id: &str,
    next_charge_date: DateTime<Utc>,
    market: &str,
) -> String {
    let subscription_id = graphql_string(subscription_id);
    let address_id = graphql_string(address_id);
    let next_charge_date = graphql_string(&format_date(next_charge_date));
    format!(
        r#"mutation UpdateSubscriptionNextChargeDate {{
  {UPDATE_NEXT_CHARGE_DATE_FIELD}(input: {{
    subscriptionId: {subscription_id}
    addressId: {address_id}
    nextChargeDate: {next_charge_date}
    market: {market}
  }}) {{
    id
    __typename
  }}
}}"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_account_query_substitutes_market_literal() {
        let query = account_query("GB");
        assert!(query.contains("customer(market: GB)"));
        assert!(query.contains("nextChargeScheduledAt"));
        assert!(query.contains("endDate"));
    }

    #[test]
    fn test_start_holiday_quotes_date() {
        let end = Utc.with_ymd_and_hms(2026, 12, 24, 0, 0, 0).unwrap();
        let mutation = start_holiday_mode_mutation(end, "US");
        assert!(mutation.contains(r#"endDate: "2026-12-24T00:00:00+00:00""#));
        assert!(mutation.contains("market: US"));
        assert!(mutation.contains("fragment HolidayMode on HolidayMode"));
    }

    #[test]
    fn test_ids_are_escaped() {
        let date = Utc.with_ymd_and_hms(2026, 11, 20, 5, 0, 0).unwrap();
        let mutation = update_next_charge_date_mutation(r#"sub"1"#, "addr-1", date, "GB");
        assert!(mutation.contains(r#"subscriptionId: "sub\"1""#));
        assert!(mutation.contains(r#"addressId: "addr-1""#));
        assert!(mutation.contains(r#"nextChargeDate: "2026-11-20T05:00:00+00:00""#));
    }
}
