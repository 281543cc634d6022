//! Shared request validation.
//!
//! Every request body implements [`Validate`], which feeds a [`Validator`] that accumulates
//! [`FieldError`]s instead of stopping at the first problem. Handlers take bodies through
//! the [`ValidatedJson`] extractor, so a handler only ever sees a body that passed its rules.
//!
//! Rules that depend on runtime configuration (the image cap, the minimum contract length)
//! are checked in the handlers with [`Validator::finish`] on a fresh validator, so the error
//! envelope is the same either way.

use crate::errors::Error;
use axum::{
    Json,
    extract::{FromRequest, Request},
};
use chrono::{Months, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::collections::HashSet;
use url::Url;
use utoipa::ToSchema;

/// A single failed rule, reported back to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Request bodies that can check themselves.
pub trait Validate {
    fn validate(&self, v: &mut Validator);

    fn validate_request(&self) -> Result<(), Error> {
        let mut v = Validator::new();
        self.validate(&mut v);
        v.finish()
    }
}

/// Accumulates field errors for one request.
#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<FieldError>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(&mut self, field: &str, message: impl Into<String>) -> &mut Self {
        self.errors.push(FieldError::new(field, message));
        self
    }

    pub fn check(&mut self, ok: bool, field: &str, message: &str) -> &mut Self {
        if !ok {
            self.error(field, message);
        }
        self
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn errors(&self) -> &[FieldError] {
        &self.errors
    }

    pub fn finish(self) -> Result<(), Error> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation { errors: self.errors })
        }
    }

    /// Required text, length counted in characters after trimming.
    pub fn text(&mut self, field: &str, value: &str, min: usize, max: usize) -> &mut Self {
        let len = value.trim().chars().count();
        if len < min || len > max {
            if min <= 1 && len == 0 {
                self.error(field, "must not be empty");
            } else {
                self.error(field, format!("must be between {min} and {max} characters"));
            }
        }
        self
    }

    pub fn optional_text(&mut self, field: &str, value: Option<&str>, max: usize) -> &mut Self {
        if let Some(value) = value
            && value.chars().count() > max
        {
            self.error(field, format!("must be at most {max} characters"));
        }
        self
    }

    pub fn positive(&mut self, field: &str, value: i64) -> &mut Self {
        self.check(value > 0, field, "must be greater than 0")
    }

    pub fn non_negative(&mut self, field: &str, value: i64) -> &mut Self {
        self.check(value >= 0, field, "must not be negative")
    }

    pub fn range(&mut self, field: &str, value: i64, min: i64, max: i64) -> &mut Self {
        if value < min || value > max {
            self.error(field, format!("must be between {min} and {max}"));
        }
        self
    }

    /// Decimal in the half-open interval (0, max].
    pub fn positive_decimal(&mut self, field: &str, value: Decimal, max: Decimal) -> &mut Self {
        if value <= Decimal::ZERO || value > max {
            self.error(field, format!("must be greater than 0 and at most {max}"));
        }
        self
    }

    pub fn url(&mut self, field: &str, value: &str) -> &mut Self {
        if !is_http_url(value) {
            self.error(field, "must be an http or https URL");
        }
        self
    }

    pub fn urls(&mut self, field: &str, values: &[String], max: usize) -> &mut Self {
        if values.len() > max {
            self.error(field, format!("must contain at most {max} entries"));
        }
        for (index, value) in values.iter().enumerate() {
            if !is_http_url(value) {
                self.error(&format!("{field}[{index}]"), "must be an http or https URL");
            }
        }
        self
    }

    /// Short labels such as facilities or amenities: bounded count and length, no duplicates.
    pub fn tags(&mut self, field: &str, values: &[String], max_count: usize, max_len: usize) -> &mut Self {
        if values.len() > max_count {
            self.error(field, format!("must contain at most {max_count} entries"));
        }
        let mut seen = HashSet::new();
        for (index, value) in values.iter().enumerate() {
            let trimmed = value.trim();
            let len = trimmed.chars().count();
            if len == 0 || len > max_len {
                self.error(
                    &format!("{field}[{index}]"),
                    format!("must be between 1 and {max_len} characters"),
                );
            } else if !seen.insert(trimmed.to_lowercase()) {
                self.error(&format!("{field}[{index}]"), "is a duplicate");
            }
        }
        self
    }

    pub fn phone(&mut self, field: &str, value: &str) -> &mut Self {
        if !is_phone(value) {
            self.error(field, "must be 9 to 15 digits with an optional leading +");
        }
        self
    }

    pub fn email(&mut self, field: &str, value: &str) -> &mut Self {
        if !is_email(value) {
            self.error(field, "must be a valid email address");
        }
        self
    }

    /// Latitude and longitude are optional, but only as a pair.
    pub fn coordinates(&mut self, latitude: Option<f64>, longitude: Option<f64>) -> &mut Self {
        match (latitude, longitude) {
            (Some(lat), Some(lng)) => {
                self.check((-90.0..=90.0).contains(&lat), "latitude", "must be between -90 and 90");
                self.check((-180.0..=180.0).contains(&lng), "longitude", "must be between -180 and 180");
            }
            (None, None) => {}
            (Some(_), None) => {
                self.error("longitude", "is required when latitude is given");
            }
            (None, Some(_)) => {
                self.error("latitude", "is required when longitude is given");
            }
        }
        self
    }

    pub fn date_not_before(&mut self, field: &str, value: NaiveDate, earliest: NaiveDate) -> &mut Self {
        if value < earliest {
            self.error(field, format!("must not be before {earliest}"));
        }
        self
    }

    /// Birth date at least `min_age` whole years before `today`.
    pub fn birth_date(&mut self, field: &str, value: NaiveDate, today: NaiveDate, min_age: u32) -> &mut Self {
        let latest = today.checked_sub_months(Months::new(min_age * 12)).unwrap_or(NaiveDate::MIN);
        if value >= today {
            self.error(field, "must be in the past");
        } else if value > latest {
            self.error(field, format!("must be at least {min_age} years ago"));
        }
        self
    }

    /// Patch bodies must change something.
    pub fn any_present(&mut self, present: bool) -> &mut Self {
        self.check(present, "body", "at least one field must be provided")
    }
}

fn is_http_url(value: &str) -> bool {
    Url::parse(value)
        .map(|url| matches!(url.scheme(), "http" | "https") && url.host_str().is_some())
        .unwrap_or(false)
}

fn is_phone(value: &str) -> bool {
    let digits = value.strip_prefix('+').unwrap_or(value);
    (9..=15).contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_digit())
}

fn is_email(value: &str) -> bool {
    if value.len() > 254 || value.chars().any(char::is_whitespace) {
        return false;
    }
    match value.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    }
}

/// JSON body extractor that runs [`Validate`] before the handler sees the value.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidatedJson<T>(pub T);

impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| Error::BadRequest {
                message: rejection.body_text(),
            })?;
        value.validate_request()?;
        Ok(Self(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(v: &Validator) -> Vec<&str> {
        v.errors().iter().map(|e| e.field.as_str()).collect()
    }

    #[test]
    fn test_text_bounds_count_characters_after_trim() {
        let mut v = Validator::new();
        v.text("name", "   ", 1, 10)
            .text("title", "Phòng trọ", 1, 9)
            .text("long", &"x".repeat(11), 1, 10);
        assert_eq!(fields(&v), vec!["name", "long"]);
        assert_eq!(v.errors()[0].message, "must not be empty");
    }

    #[test]
    fn test_errors_accumulate_rather_than_short_circuit() {
        let mut v = Validator::new();
        v.positive("price", 0).non_negative("deposit", -1).range("occupants", 25, 1, 20);
        assert_eq!(v.errors().len(), 3);
        assert!(matches!(v.finish(), Err(Error::Validation { errors }) if errors.len() == 3));
    }

    #[test]
    fn test_urls_reject_other_schemes_and_overflow() {
        let urls = vec![
            "https://cdn.example.com/a.jpg".to_string(),
            "ftp://example.com/b.jpg".to_string(),
            "not a url".to_string(),
        ];
        let mut v = Validator::new();
        v.urls("images", &urls, 2);
        assert_eq!(fields(&v), vec!["images", "images[1]", "images[2]"]);
    }

    #[test]
    fn test_tags_reject_duplicates_case_insensitively() {
        let tags = vec!["Wifi".to_string(), "wifi".to_string(), "".to_string()];
        let mut v = Validator::new();
        v.tags("facilities", &tags, 30, 50);
        assert_eq!(fields(&v), vec!["facilities[1]", "facilities[2]"]);
    }

    #[test]
    fn test_phone_shapes() {
        assert!(is_phone("0901234567"));
        assert!(is_phone("+84901234567"));
        assert!(!is_phone("12345678"));
        assert!(!is_phone("090-123-4567"));
        assert!(!is_phone("+"));
    }

    #[test]
    fn test_email_shapes() {
        assert!(is_email("an@example.vn"));
        assert!(!is_email("an@example"));
        assert!(!is_email("@example.com"));
        assert!(!is_email("a b@example.com"));
        assert!(!is_email("a@b@example.com"));
    }

    #[test]
    fn test_coordinates_must_come_in_pairs() {
        let mut v = Validator::new();
        v.coordinates(Some(10.77), None);
        assert_eq!(fields(&v), vec!["longitude"]);

        let mut v = Validator::new();
        v.coordinates(Some(91.0), Some(106.7));
        assert_eq!(fields(&v), vec!["latitude"]);

        let mut v = Validator::new();
        v.coordinates(Some(10.77), Some(106.7));
        assert!(v.is_valid());
    }

    #[test]
    fn test_birth_date_minimum_age() {
        let today = NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();
        let mut v = Validator::new();
        v.birth_date("dob", NaiveDate::from_ymd_opt(2010, 6, 2).unwrap(), today, 16);
        assert_eq!(v.errors()[0].message, "must be at least 16 years ago");

        let mut v = Validator::new();
        v.birth_date("dob", NaiveDate::from_ymd_opt(2010, 6, 1).unwrap(), today, 16);
        assert!(v.is_valid());

        let mut v = Validator::new();
        v.birth_date("dob", today, today, 16);
        assert_eq!(v.errors()[0].message, "must be in the past");
    }

    #[test]
    fn test_positive_decimal_bounds() {
        let mut v = Validator::new();
        v.positive_decimal("area_m2", Decimal::ZERO, Decimal::from(10_000))
            .positive_decimal("ok", Decimal::new(255, 1), Decimal::from(10_000))
            .positive_decimal("huge", Decimal::from(10_001), Decimal::from(10_000));
        assert_eq!(fields(&v), vec!["area_m2", "huge"]);
    }
}
