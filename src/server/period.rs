use crate::server::error::ApiError;

/// A user-supplied lookback window like `24h`, `7d` or `4w`. Stored with
/// its original label so it can key the insight cache verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct Period {
    pub label: String,
    pub seconds: i64,
}

impl Period {
    pub fn parse(raw: &str) -> Result<Period, ApiError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || !trimmed.is_ascii() {
            return Err(ApiError::validation(format!("invalid period '{trimmed}'")));
        }
        let (digits, suffix) = trimmed.split_at(trimmed.len() - 1);
        let value: i64 = digits
            .parse()
            .map_err(|_| ApiError::validation(format!("invalid period '{trimmed}'")))?;
        if value <= 0 {
            return Err(ApiError::validation("period must be positive"));
        }
        let seconds = match suffix {
            "h" => value * 3600,
            "d" => value * 86_400,
            "w" => value * 7 * 86_400,
            _ => {
                return Err(ApiError::validation(format!(
                    "invalid period '{trimmed}', expected e.g. 24h, 7d or 4w"
                )))
            }
        };
        if seconds > 365 * 86_400 {
            return Err(ApiError::validation("period must be at most one year"));
        }
        Ok(Period {
            label: trimmed.to_string(),
            seconds,
        })
    }

    pub fn parse_or_default(raw: Option<&str>) -> Result<Period, ApiError> {
        match raw {
            Some(raw) => Period::parse(raw),
            None => Ok(Period::default()),
        }
    }

    /// Whole days, at least one; the aggregation window is day-grained.
    pub fn days(&self) -> i64 {
        (self.seconds / 86_400).max(1)
    }

    pub fn since(&self, now: i64) -> i64 {
        now - self.seconds
    }
}

impl Default for Period {
    fn default() -> Self {
        Period {
            label: "7d".into(),
            seconds: 7 * 86_400,
        }
    }
}
