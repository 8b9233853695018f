use chrono::{DateTime, FixedOffset};
use thiserror::Error;

const MAX_TEXT_LEN: usize = 64 * 1024;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("{field} is required")]
    Missing { field: String },

    #[error("{field} must contain at least {min} character(s)")]
    TooShort { field: String, min: usize },

    #[error("{field} exceeds max length of {max}")]
    TooLong { field: String, max: usize },

    #[error("{field} must be one of: {allowed}")]
    NotOneOf { field: String, allowed: String },

    #[error("{field} must be {bound}")]
    OutOfRange { field: String, bound: String },

    #[error("{field} must be a valid {kind}")]
    Malformed { field: String, kind: &'static str },

    #[error("{message}")]
    Custom { field: String, message: String },
}

impl ValidationError {
    pub fn custom(field: &str, message: impl Into<String>) -> Self {
        Self::Custom {
            field: field.to_string(),
            message: message.into(),
        }
    }

    pub fn field(&self) -> &str {
        match self {
            Self::Missing { field }
            | Self::TooShort { field, .. }
            | Self::TooLong { field, .. }
            | Self::NotOneOf { field, .. }
            | Self::OutOfRange { field, .. }
            | Self::Malformed { field, .. }
            | Self::Custom { field, .. } => field,
        }
    }

    /// Check if the error message contains a substring (convenience for tests).
    pub fn contains(&self, s: &str) -> bool {
        self.to_string().contains(s)
    }
}

pub fn required<'a, T: ?Sized>(field: &str, value: Option<&'a T>) -> Result<&'a T, ValidationError> {
    value.ok_or_else(|| ValidationError::Missing {
        field: field.to_string(),
    })
}

pub fn validate_text(field: &str, value: &str, min: usize) -> Result<(), ValidationError> {
    let len = value.chars().count();
    if len < min || (min > 0 && value.trim().is_empty()) {
        return Err(ValidationError::TooShort {
            field: field.to_string(),
            min,
        });
    }
    if value.len() > MAX_TEXT_LEN {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: MAX_TEXT_LEN,
        });
    }
    Ok(())
}

/// A present text field with a minimum length.
pub fn required_text<'a>(
    field: &str,
    value: Option<&'a str>,
    min: usize,
) -> Result<&'a str, ValidationError> {
    let value = required(field, value)?;
    validate_text(field, value, min)?;
    Ok(value)
}

/// Length check that only applies when the field was sent.
pub fn optional_text(field: &str, value: Option<&str>, min: usize) -> Result<(), ValidationError> {
    match value {
        Some(value) => validate_text(field, value, min),
        None => Ok(()),
    }
}

pub fn validate_one_of(field: &str, value: &str, allowed: &[&str]) -> Result<(), ValidationError> {
    if allowed.contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::NotOneOf {
            field: field.to_string(),
            allowed: allowed.join(", "),
        })
    }
}

pub fn validate_at_least(field: &str, value: f64, min: f64) -> Result<(), ValidationError> {
    if value.is_finite() && value >= min {
        Ok(())
    } else {
        Err(ValidationError::OutOfRange {
            field: field.to_string(),
            bound: format!("at least {min}"),
        })
    }
}

pub fn validate_positive(field: &str, value: f64) -> Result<(), ValidationError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ValidationError::OutOfRange {
            field: field.to_string(),
            bound: "greater than 0".into(),
        })
    }
}

pub fn validate_between(field: &str, value: f64, min: f64, max: f64) -> Result<(), ValidationError> {
    if value.is_finite() && (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::OutOfRange {
            field: field.to_string(),
            bound: format!("between {min} and {max}"),
        })
    }
}

/// An integral count (stock, quantity, usage limit) of at least `min`.
pub fn whole_number(field: &str, value: f64, min: i64) -> Result<i64, ValidationError> {
    if value.is_finite() && value.fract() == 0.0 && value >= min as f64 && value <= i64::MAX as f64 {
        Ok(value as i64)
    } else {
        Err(ValidationError::OutOfRange {
            field: field.to_string(),
            bound: format!("a whole number of at least {min}"),
        })
    }
}

/// An absolute `http`/`https` URL with a host.
pub fn validate_url(field: &str, value: &str) -> Result<(), ValidationError> {
    let valid = url::Url::parse(value).is_ok_and(|parsed| {
        matches!(parsed.scheme(), "http" | "https")
            && parsed.host_str().is_some_and(|host| !host.is_empty())
    });
    if valid {
        Ok(())
    } else {
        Err(ValidationError::Malformed {
            field: field.to_string(),
            kind: "URL",
        })
    }
}

pub fn validate_email(field: &str, value: &str) -> Result<(), ValidationError> {
    let valid = value.split_once('@').is_some_and(|(local, domain)| {
        !local.is_empty()
            && domain.contains('.')
            && !domain.starts_with('.')
            && !domain.ends_with('.')
            && !value.chars().any(char::is_whitespace)
    });
    if valid {
        Ok(())
    } else {
        Err(ValidationError::Malformed {
            field: field.to_string(),
            kind: "email",
        })
    }
}

pub fn parse_datetime(field: &str, value: &str) -> Result<DateTime<FixedOffset>, ValidationError> {
    DateTime::parse_from_rfc3339(value).map_err(|_| ValidationError::Malformed {
        field: field.to_string(),
        kind: "RFC 3339 datetime",
    })
}
