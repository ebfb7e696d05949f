use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const IMEI_LENGTH: usize = 15;

/// State of the collar as reported by the device or set by an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CollarStatus {
    Active,
    Inactive,
    Stolen,
    Destroyed,
}

impl CollarStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CollarStatus::Active => "ACTIVE",
            CollarStatus::Inactive => "INACTIVE",
            CollarStatus::Stolen => "STOLEN",
            CollarStatus::Destroyed => "DESTROYED",
        }
    }

    /// Statuses that count as a theft on their own, whatever the strap
    /// pressure says.
    pub fn indicates_theft(&self) -> bool {
        matches!(self, CollarStatus::Stolen | CollarStatus::Destroyed)
    }
}

impl fmt::Display for CollarStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CollarStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ACTIVE" => Ok(CollarStatus::Active),
            "INACTIVE" => Ok(CollarStatus::Inactive),
            "STOLEN" => Ok(CollarStatus::Stolen),
            "DESTROYED" => Ok(CollarStatus::Destroyed),
            other => Err(format!("unknown collar status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub id: Uuid,
    pub imei: String,
    pub collar_status: CollarStatus,
    /// At most one animal wears a given collar.
    pub animal_id: Option<Uuid>,
}

impl Device {
    /// The status used by the theft rules: the reading's override when it
    /// carries one, the stored status otherwise.
    pub fn effective_status(&self, reported: Option<CollarStatus>) -> CollarStatus {
        reported.unwrap_or(self.collar_status)
    }
}

pub fn is_valid_imei(candidate: &str) -> bool {
    candidate.len() == IMEI_LENGTH && candidate.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn imei_must_be_fifteen_digits() {
        assert!(is_valid_imei("123456789012345"));
        assert!(!is_valid_imei("12345678901234"));
        assert!(!is_valid_imei("1234567890123456"));
        assert!(!is_valid_imei("12345678901234a"));
        assert!(!is_valid_imei(""));
    }

    #[test]
    fn reported_status_overrides_stored_status() {
        let device = Device {
            id: Uuid::new_v4(),
            imei: "123456789012345".to_string(),
            collar_status: CollarStatus::Active,
            animal_id: None,
        };
        assert_eq!(device.effective_status(None), CollarStatus::Active);
        assert_eq!(
            device.effective_status(Some(CollarStatus::Stolen)),
            CollarStatus::Stolen
        );
    }

    #[test]
    fn parses_status_case_insensitively() {
        assert_eq!("destroyed".parse::<CollarStatus>(), Ok(CollarStatus::Destroyed));
        assert!("LOST".parse::<CollarStatus>().is_err());
    }
}
