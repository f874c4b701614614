use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::models::{CollectionMethod, LandlordPaymentMethod, LeaseStatus, LeaseType};
use crate::services::lease_mutator::{LeaseFilters, LeaseUpdate, NewLease};
use crate::services::payment_recorder::PaymentInput;

pub fn validate_input<T: Validate>(input: &T) -> Result<(), AppError> {
    input
        .validate()
        .map_err(|errors| AppError::UnprocessableEntity(format!("Validation failed: {errors}")))
}

pub fn clamp_limit_in_range(limit: i64, minimum: i64, maximum: i64) -> i64 {
    limit.clamp(minimum, maximum)
}

fn default_lease_status_pending() -> String {
    "pending".to_string()
}
fn default_limit_100() -> i64 {
    100
}

/// Keeps an explicit `null` apart from an absent field: absent stays `None`,
/// `null` becomes `Some(None)`.
fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateLeaseInput {
    #[validate(length(min = 1, max = 255))]
    pub household_id: String,
    #[validate(length(min = 1, max = 255))]
    pub unit_id: String,
    pub lease_type: String,
    #[serde(default = "default_lease_status_pending")]
    pub status: String,
    pub monthly_rent: Decimal,
    #[serde(default)]
    pub subsidy_amount: Decimal,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub program_month: Option<i32>,
    pub total_program_months: Option<i32>,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

impl TryFrom<CreateLeaseInput> for NewLease {
    type Error = AppError;

    fn try_from(input: CreateLeaseInput) -> AppResult<Self> {
        Ok(Self {
            household_id: input.household_id,
            unit_id: input.unit_id,
            lease_type: LeaseType::parse("lease_type", &input.lease_type)?,
            status: LeaseStatus::parse("status", &input.status)?,
            monthly_rent: input.monthly_rent,
            subsidy_amount: input.subsidy_amount,
            start_date: parse_date_opt("start_date", input.start_date.as_deref())?,
            end_date: parse_date_opt("end_date", input.end_date.as_deref())?,
            program_month: input.program_month,
            total_program_months: input.total_program_months,
            notes: non_empty_opt(input.notes.as_deref()),
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateLeaseInput {
    pub monthly_rent: Option<Decimal>,
    pub subsidy_amount: Option<Decimal>,
    #[serde(default, deserialize_with = "nullable")]
    pub start_date: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub end_date: Option<Option<String>>,
    pub status: Option<String>,
    pub lease_type: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    #[validate(length(max = 2000))]
    pub notes: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub program_month: Option<Option<i32>>,
    #[serde(default, deserialize_with = "nullable")]
    pub total_program_months: Option<Option<i32>>,
}

impl TryFrom<UpdateLeaseInput> for LeaseUpdate {
    type Error = AppError;

    fn try_from(input: UpdateLeaseInput) -> AppResult<Self> {
        Ok(Self {
            monthly_rent: input.monthly_rent,
            subsidy_amount: input.subsidy_amount,
            start_date: input
                .start_date
                .map(|raw| parse_date_opt("start_date", raw.as_deref()))
                .transpose()?,
            end_date: input
                .end_date
                .map(|raw| parse_date_opt("end_date", raw.as_deref()))
                .transpose()?,
            status: input
                .status
                .as_deref()
                .map(|raw| LeaseStatus::parse("status", raw))
                .transpose()?,
            lease_type: input
                .lease_type
                .as_deref()
                .map(|raw| LeaseType::parse("lease_type", raw))
                .transpose()?,
            notes: input.notes.map(|raw| non_empty_opt(raw.as_deref())),
            program_month: input.program_month,
            total_program_months: input.total_program_months,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct RecordPaymentInput {
    #[serde(default)]
    pub amount_collected_from_tenant: Decimal,
    pub collection_method: Option<String>,
    #[serde(default)]
    pub amount_paid_to_landlord: Decimal,
    pub landlord_payment_method: Option<String>,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

impl TryFrom<RecordPaymentInput> for PaymentInput {
    type Error = AppError;

    fn try_from(input: RecordPaymentInput) -> AppResult<Self> {
        Ok(Self {
            amount_collected_from_tenant: input.amount_collected_from_tenant,
            collection_method: non_empty_opt(input.collection_method.as_deref())
                .map(|raw| CollectionMethod::parse("collection_method", &raw))
                .transpose()?,
            amount_paid_to_landlord: input.amount_paid_to_landlord,
            landlord_payment_method: non_empty_opt(input.landlord_payment_method.as_deref())
                .map(|raw| LandlordPaymentMethod::parse("landlord_payment_method", &raw))
                .transpose()?,
            notes: non_empty_opt(input.notes.as_deref()),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LeasesQuery {
    pub household_id: Option<String>,
    pub unit_id: Option<String>,
    pub status: Option<String>,
    #[serde(default = "default_limit_100")]
    pub limit: i64,
}

impl TryFrom<&LeasesQuery> for LeaseFilters {
    type Error = AppError;

    fn try_from(query: &LeasesQuery) -> AppResult<Self> {
        Ok(Self {
            household_id: non_empty_opt(query.household_id.as_deref()),
            unit_id: non_empty_opt(query.unit_id.as_deref()),
            status: non_empty_opt(query.status.as_deref())
                .map(|raw| LeaseStatus::parse("status", &raw))
                .transpose()?,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LeasePath {
    pub lease_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerMonthPath {
    pub lease_id: String,
    pub month: String,
}

fn parse_date_opt(field: &str, raw: Option<&str>) -> AppResult<Option<NaiveDate>> {
    let Some(value) = non_empty_opt(raw) else {
        return Ok(None);
    };
    NaiveDate::parse_from_str(&value, "%Y-%m-%d")
        .map(Some)
        .map_err(|_| AppError::validation(field, "Expected a date as YYYY-MM-DD."))
}

fn non_empty_opt(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToOwned::to_owned)
}
