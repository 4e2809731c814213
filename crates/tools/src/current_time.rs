//! Current time in a known city.
//!
//! Cities map to IANA zones, so daylight saving follows the tz database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde_json::{Value, json};
use wayfarer_core::error::ToolError;
use wayfarer_core::tool::{Tool, ToolContext, ToolResult};

/// City → IANA zone name.
const CITY_ZONES: &[(&str, &str)] = &[
    ("New York", "America/New_York"),
    ("Los Angeles", "America/Los_Angeles"),
    ("Chicago", "America/Chicago"),
    ("Houston", "America/Chicago"),
    ("Phoenix", "America/Phoenix"),
    ("Philadelphia", "America/New_York"),
    ("San Antonio", "America/Chicago"),
    ("San Diego", "America/Los_Angeles"),
    ("Dallas", "America/Chicago"),
    ("San Jose", "America/Los_Angeles"),
    ("London", "Europe/London"),
    ("Paris", "Europe/Paris"),
    ("Berlin", "Europe/Berlin"),
    ("Moscow", "Europe/Moscow"),
    ("Dubai", "Asia/Dubai"),
    ("New Delhi", "Asia/Kolkata"),
    ("Mumbai", "Asia/Kolkata"),
    ("Bengaluru", "Asia/Kolkata"),
    ("Kolkata", "Asia/Kolkata"),
    ("Chennai", "Asia/Kolkata"),
    ("Hyderabad", "Asia/Kolkata"),
    ("Bangkok", "Asia/Bangkok"),
    ("Tokyo", "Asia/Tokyo"),
    ("Sydney", "Australia/Sydney"),
];

pub struct CurrentTimeTool;

#[async_trait]
impl Tool for CurrentTimeTool {
    fn name(&self) -> &str {
        "current_time"
    }

    fn description(&self) -> &str {
        "Get the current time (HH:MM:SS) in a city."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "city": { "type": "string", "description": "City name, e.g. \"Mumbai\"" }
            },
            "required": ["city"]
        })
    }

    async fn execute(&self, arguments: Value, _ctx: &mut ToolContext) -> Result<ToolResult, ToolError> {
        let city = arguments["city"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'city' argument".into()))?;

        let payload = time_in(city, Utc::now());
        if payload.get("error").is_some() {
            Ok(ToolResult::failure(payload.to_string()))
        } else {
            Ok(ToolResult::json(payload))
        }
    }
}

/// Time in `city` at the instant `now`.
pub fn time_in(city: &str, now: DateTime<Utc>) -> Value {
    let city = title_case(city.trim());
    let Some((_, zone)) = CITY_ZONES.iter().find(|(name, _)| *name == city) else {
        return json!({ "error": format!("Sorry, I don't know the time in {city}.") });
    };
    let Ok(tz) = zone.parse::<Tz>() else {
        return json!({ "error": format!("Sorry, I don't have timezone information for {city}.") });
    };

    json!({
        "status": "success",
        "city": city,
        "timezone": zone,
        "time": now.with_timezone(&tz).format("%H:%M:%S").to_string(),
    })
}

/// "san jose" → "San Jose".
fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn noon_utc() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn known_city_with_half_hour_offset() {
        let out = time_in("mumbai", noon_utc());
        assert_eq!(out["status"], "success");
        assert_eq!(out["city"], "Mumbai");
        assert_eq!(out["time"], "17:30:00");
    }

    #[test]
    fn negative_offset_and_title_casing() {
        let out = time_in("  new YORK ", noon_utc());
        assert_eq!(out["city"], "New York");
        assert_eq!(out["time"], "07:00:00");
    }

    #[test]
    fn daylight_saving_applies_in_summer() {
        let july = Utc.with_ymd_and_hms(2025, 7, 15, 12, 0, 0).unwrap();
        assert_eq!(time_in("New York", july)["time"], "08:00:00");
        assert_eq!(time_in("London", july)["time"], "13:00:00");
        assert_eq!(time_in("Paris", july)["time"], "14:00:00");
        // Southern hemisphere is on standard time in July
        assert_eq!(time_in("Sydney", july)["time"], "22:00:00");
        assert_eq!(time_in("Mumbai", july)["time"], "17:30:00");
    }

    #[test]
    fn every_city_zone_parses() {
        for (city, zone) in CITY_ZONES {
            assert!(zone.parse::<Tz>().is_ok(), "{city}: {zone}");
        }
    }

    #[test]
    fn unknown_city_reports_error() {
        let out = time_in("atlantis", noon_utc());
        assert_eq!(out["error"], "Sorry, I don't know the time in Atlantis.");
    }

    #[test]
    fn title_case_words() {
        assert_eq!(title_case("san francisco"), "San Francisco");
        assert_eq!(title_case("BENGALURU"), "Bengaluru");
    }
}
