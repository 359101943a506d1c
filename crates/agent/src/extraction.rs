//! Normalizes the loosely-typed quote payload both backends return.
//!
//! Field names are accepted in camelCase (runner) and snake_case (RPA
//! service). Premiums may arrive as numbers or as display strings such as
//! `"$1,842.50"`.

use std::collections::BTreeMap;

use autoquote_core::domain::result::QuoteData;
use chrono::{DateTime, NaiveDateTime, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde_json::Value;

pub fn quote_data_from_value(value: &Value) -> QuoteData {
    QuoteData {
        premium_annual: field(value, "premiumAnnual", "premium_annual").and_then(money),
        premium_monthly: field(value, "premiumMonthly", "premium_monthly").and_then(money),
        coverages: string_map(field(value, "coverages", "coverages")),
        deductibles: string_map(field(value, "deductibles", "deductibles")),
        reference_id: field(value, "referenceId", "reference_id").and_then(text),
        raw: field(value, "rawExtractedData", "raw_extracted_data")
            .cloned()
            .or_else(|| Some(value.clone())),
        extracted_at: field(value, "extractedAt", "extracted_at")
            .and_then(Value::as_str)
            .and_then(timestamp)
            .unwrap_or_else(Utc::now),
    }
    .with_derived_monthly()
}

fn field<'a>(value: &'a Value, camel: &str, snake: &str) -> Option<&'a Value> {
    value.get(camel).or_else(|| value.get(snake)).filter(|found| !found.is_null())
}

fn money(value: &Value) -> Option<Decimal> {
    let amount = match value {
        Value::Number(number) => number.as_f64().and_then(Decimal::from_f64)?,
        Value::String(raw) => {
            let cleaned: String =
                raw.chars().filter(|ch| ch.is_ascii_digit() || *ch == '.' || *ch == '-').collect();
            cleaned.parse::<Decimal>().ok()?
        }
        _ => return None,
    };
    Some(amount.round_dp(2))
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(raw) if !raw.trim().is_empty() => Some(raw.trim().to_string()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn string_map(value: Option<&Value>) -> BTreeMap<String, String> {
    let Some(Value::Object(entries)) = value else {
        return BTreeMap::new();
    };
    entries
        .iter()
        .filter(|(_, entry)| !entry.is_null())
        .map(|(key, entry)| {
            let rendered = match entry {
                Value::String(raw) => raw.clone(),
                other => other.to_string(),
            };
            (key.clone(), rendered)
        })
        .collect()
}

fn timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").ok().map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use serde_json::json;

    use super::quote_data_from_value;

    #[test]
    fn runner_payload_is_normalized_and_monthly_is_derived() {
        let data = quote_data_from_value(&json!({
            "carrierCode": "progressive",
            "premiumAnnual": 1842.5,
            "premiumMonthly": null,
            "coverages": { "bodilyInjury": "100/300", "collision": 500 },
            "deductibles": {},
            "rawExtractedData": { "agentResponse": "Annual premium: $1,842.50" },
            "extractedAt": "2026-03-04T10:15:30.123456"
        }));

        assert_eq!(data.premium_annual, Some(Decimal::new(184_250, 2)));
        assert_eq!(data.premium_monthly, Some(Decimal::new(15_354, 2)));
        assert_eq!(data.coverages.get("bodilyInjury").map(String::as_str), Some("100/300"));
        assert_eq!(data.coverages.get("collision").map(String::as_str), Some("500"));
        assert_eq!(data.extracted_at.format("%Y-%m-%d").to_string(), "2026-03-04");
        assert!(data.raw.is_some());
    }

    #[test]
    fn snake_case_and_display_strings_are_accepted() {
        let data = quote_data_from_value(&json!({
            "premium_annual": "$2,400.00",
            "premium_monthly": "$205.10",
            "reference_id": "TRV-9912"
        }));

        assert_eq!(data.premium_annual, Some(Decimal::new(240_000, 2)));
        assert_eq!(data.premium_monthly, Some(Decimal::new(20_510, 2)));
        assert_eq!(data.reference_id.as_deref(), Some("TRV-9912"));
    }
}
