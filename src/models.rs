use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaseType {
    Direct,
    Sublease,
    Bridge,
    /// Intermediary holds the head lease; ledger treats it like `Direct`.
    Master,
}

impl LeaseType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Sublease => "sublease",
            Self::Bridge => "bridge",
            Self::Master => "master",
        }
    }

    pub fn parse(field: &str, raw: &str) -> AppResult<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "direct" => Ok(Self::Direct),
            "sublease" => Ok(Self::Sublease),
            "bridge" => Ok(Self::Bridge),
            "master" => Ok(Self::Master),
            other => Err(AppError::validation(
                field,
                format!("'{other}' is not a valid lease type."),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaseStatus {
    Pending,
    Active,
    Completed,
    Terminated,
}

impl LeaseStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Terminated => "terminated",
        }
    }

    pub fn parse(field: &str, raw: &str) -> AppResult<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "terminated" => Ok(Self::Terminated),
            other => Err(AppError::validation(
                field,
                format!("'{other}' is not a valid lease status."),
            )),
        }
    }

    /// Terminal leases keep their ledger history but accept no financial edits.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Terminated)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionMethod {
    Cash,
    Check,
    BankTransfer,
}

impl CollectionMethod {
    pub fn parse(field: &str, raw: &str) -> AppResult<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "cash" => Ok(Self::Cash),
            "check" => Ok(Self::Check),
            "bank_transfer" => Ok(Self::BankTransfer),
            other => Err(AppError::validation(
                field,
                format!("'{other}' is not a valid collection method."),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LandlordPaymentMethod {
    Check,
    Ach,
    Wire,
}

impl LandlordPaymentMethod {
    pub fn parse(field: &str, raw: &str) -> AppResult<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "check" => Ok(Self::Check),
            "ach" => Ok(Self::Ach),
            "wire" => Ok(Self::Wire),
            other => Err(AppError::validation(
                field,
                format!("'{other}' is not a valid landlord payment method."),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lease {
    pub id: String,
    pub household_id: String,
    pub unit_id: String,
    pub lease_type: LeaseType,
    pub status: LeaseStatus,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub monthly_rent: Decimal,
    pub subsidy_amount: Decimal,
    pub tenant_pays: Decimal,
    pub program_month: Option<i32>,
    pub total_program_months: Option<i32>,
    pub notes: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RentLedgerEntry {
    pub id: String,
    pub lease_id: String,
    pub ledger_month: NaiveDate,
    pub rent_due_from_tenant: Decimal,
    pub rent_due_to_landlord: Decimal,
    pub amount_collected_from_tenant: Decimal,
    pub collection_date: Option<NaiveDate>,
    pub collection_method: Option<CollectionMethod>,
    pub amount_paid_to_landlord: Decimal,
    pub landlord_payment_date: Option<NaiveDate>,
    pub landlord_payment_method: Option<LandlordPaymentMethod>,
    pub tenant_paid: bool,
    pub landlord_paid: bool,
    pub notes: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Decode a store row into a typed record.
pub fn from_row<T>(row: Value, table: &str) -> AppResult<T>
where
    T: serde::de::DeserializeOwned,
{
    serde_json::from_value(row).map_err(|error| {
        tracing::error!(table, error = %error, "Stored row does not match the model");
        AppError::Internal(format!("Could not decode {table} record."))
    })
}

/// Store representation of a calendar date.
pub fn date_value(date: NaiveDate) -> Value {
    Value::String(date.format("%Y-%m-%d").to_string())
}

pub fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// Accepts `YYYY-MM` or `YYYY-MM-DD` and returns the first day of that month.
pub fn parse_ledger_month(raw: &str) -> AppResult<NaiveDate> {
    let trimmed = raw.trim();
    let parsed = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(&format!("{trimmed}-01"), "%Y-%m-%d"))
        .map_err(|_| {
            AppError::validation("ledger_month", "Expected YYYY-MM or YYYY-MM-DD.")
        })?;
    Ok(first_of_month(parsed))
}
