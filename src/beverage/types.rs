//! Type definitions for the beverage preference service.
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

/// Registered name of the `GetBeverage` operation.
pub const GET_BEVERAGE: &str = "BeveragePreference.GetBeverage";

/// Beverage category a caller asks for.
///
/// On the wire the category travels as an `i32` code: `0` is hot, `1` is cold.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BeverageType {
    Hot,
    Cold,
}

impl BeverageType {
    pub const ALL: [BeverageType; 2] = [BeverageType::Hot, BeverageType::Cold];

    pub fn code(self) -> i32 {
        match self {
            BeverageType::Hot => 0,
            BeverageType::Cold => 1,
        }
    }

    pub fn from_code(code: i32) -> Result<Self, SelectionError> {
        match code {
            0 => Ok(BeverageType::Hot),
            1 => Ok(BeverageType::Cold),
            other => Err(SelectionError::UnknownBeverageType(other)),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BeverageType::Hot => "HOT",
            BeverageType::Cold => "COLD",
        }
    }
}

impl From<BeverageType> for i32 {
    fn from(btype: BeverageType) -> Self {
        btype.code()
    }
}

impl TryFrom<i32> for BeverageType {
    type Error = SelectionError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        BeverageType::from_code(code)
    }
}

impl fmt::Display for BeverageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognized beverage type: {0:?} (expected HOT, COLD, 0 or 1)")]
pub struct ParseBeverageTypeError(String);

impl FromStr for BeverageType {
    type Err = ParseBeverageTypeError;

    /// Accepts `HOT`/`COLD` in any case, or the numeric wire code.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("hot") {
            return Ok(BeverageType::Hot);
        }
        if trimmed.eq_ignore_ascii_case("cold") {
            return Ok(BeverageType::Cold);
        }
        trimmed
            .parse::<i32>()
            .ok()
            .and_then(|code| BeverageType::from_code(code).ok())
            .ok_or_else(|| ParseBeverageTypeError(s.to_string()))
    }
}

/// Request for the `GetBeverage` operation.
///
/// `btype` carries the raw wire code so that the server, not the decoder,
/// decides what an unrecognized code means.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetBeverageRequest {
    pub btype: i32,
}

impl GetBeverageRequest {
    pub fn new(btype: BeverageType) -> Self {
        Self { btype: btype.code() }
    }

    pub fn from_code(btype: i32) -> Self {
        Self { btype }
    }

    pub fn beverage_type(&self) -> Result<BeverageType, SelectionError> {
        BeverageType::from_code(self.btype)
    }
}

impl From<BeverageType> for GetBeverageRequest {
    fn from(btype: BeverageType) -> Self {
        Self::new(btype)
    }
}

/// The one error the `GetBeverage` operation declares.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ServiceException {
    pub message: String,
}

impl ServiceException {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Why a selection could not produce a beverage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    #[error("unrecognized beverage type code: {0}")]
    UnknownBeverageType(i32),

    #[error("no {0} beverages are configured")]
    NoCandidates(BeverageType),

    #[error("random source picked index {index} from {len} candidates")]
    SourceOutOfRange { index: usize, len: usize },
}

impl From<SelectionError> for ServiceException {
    fn from(err: SelectionError) -> Self {
        ServiceException::new(err.to_string())
    }
}
