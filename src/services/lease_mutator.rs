use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::{json, Map, Value};
use tracing::info;

use crate::error::{AppError, AppResult};
use crate::models::{date_value, from_row, Lease, LeaseStatus, LeaseType};
use crate::repository::{json_map, TableStore, LEASES_TABLE};

const MONEY_DECIMAL_PLACES: u32 = 2;

/// Fields accepted by [`update_lease`]. `None` leaves the stored value as is;
/// `Some(None)` clears a nullable column.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LeaseUpdate {
    pub monthly_rent: Option<Decimal>,
    pub subsidy_amount: Option<Decimal>,
    pub start_date: Option<Option<NaiveDate>>,
    pub end_date: Option<Option<NaiveDate>>,
    pub status: Option<LeaseStatus>,
    pub lease_type: Option<LeaseType>,
    pub notes: Option<Option<String>>,
    pub program_month: Option<Option<i32>>,
    pub total_program_months: Option<Option<i32>>,
}

impl LeaseUpdate {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    fn touches_financials(&self) -> bool {
        self.monthly_rent.is_some() || self.subsidy_amount.is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewLease {
    pub household_id: String,
    pub unit_id: String,
    pub lease_type: LeaseType,
    pub status: LeaseStatus,
    pub monthly_rent: Decimal,
    pub subsidy_amount: Decimal,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub program_month: Option<i32>,
    pub total_program_months: Option<i32>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct LeaseFilters {
    pub household_id: Option<String>,
    pub unit_id: Option<String>,
    pub status: Option<LeaseStatus>,
}

pub async fn load_lease(store: &dyn TableStore, lease_id: &str) -> AppResult<Lease> {
    let row = store.get_row(LEASES_TABLE, lease_id).await?;
    from_row(row, LEASES_TABLE)
}

pub async fn list_leases(
    store: &dyn TableStore,
    filters: &LeaseFilters,
    limit: i64,
) -> AppResult<Vec<Lease>> {
    let mut filter_map = Map::new();
    if let Some(household_id) = &filters.household_id {
        filter_map.insert(
            "household_id".to_string(),
            Value::String(household_id.clone()),
        );
    }
    if let Some(unit_id) = &filters.unit_id {
        filter_map.insert("unit_id".to_string(), Value::String(unit_id.clone()));
    }
    if let Some(status) = filters.status {
        filter_map.insert(
            "status".to_string(),
            Value::String(status.as_str().to_string()),
        );
    }

    let rows = store
        .list_rows(LEASES_TABLE, Some(&filter_map), limit, 0, "created_at", false)
        .await?;
    rows.into_iter()
        .map(|row| from_row(row, LEASES_TABLE))
        .collect()
}

pub async fn create_lease(store: &dyn TableStore, input: NewLease) -> AppResult<Lease> {
    let household_id = required_reference("household_id", &input.household_id)?;
    let unit_id = required_reference("unit_id", &input.unit_id)?;
    validate_financials(input.monthly_rent, input.subsidy_amount)?;
    validate_dates(input.start_date, input.end_date)?;
    validate_program(input.program_month, input.total_program_months)?;

    let mut payload = json_map(&[
        ("household_id", Value::String(household_id)),
        ("unit_id", Value::String(unit_id)),
        ("lease_type", Value::String(input.lease_type.as_str().to_string())),
        ("status", Value::String(input.status.as_str().to_string())),
        ("monthly_rent", json!(input.monthly_rent)),
        ("subsidy_amount", json!(input.subsidy_amount)),
    ]);
    insert_opt(&mut payload, "start_date", input.start_date.map(date_value));
    insert_opt(&mut payload, "end_date", input.end_date.map(date_value));
    insert_opt(&mut payload, "program_month", input.program_month.map(Value::from));
    insert_opt(
        &mut payload,
        "total_program_months",
        input.total_program_months.map(Value::from),
    );
    insert_opt(&mut payload, "notes", input.notes.map(Value::String));

    let row = store.create_row(LEASES_TABLE, &payload).await?;
    let lease: Lease = from_row(row, LEASES_TABLE)?;
    info!(
        lease_id = %lease.id,
        lease_type = lease.lease_type.as_str(),
        monthly_rent = %lease.monthly_rent,
        tenant_pays = %lease.tenant_pays,
        "Lease created"
    );
    Ok(lease)
}

/// Apply `update`. The store derives `tenant_pays` from the rent and subsidy
/// it holds at write time, so concurrent edits to either field still leave
/// the row consistent. Ledger entry snapshots are left alone.
pub async fn update_lease(
    store: &dyn TableStore,
    lease_id: &str,
    update: LeaseUpdate,
) -> AppResult<Lease> {
    let current = load_lease(store, lease_id).await?;
    if update.is_empty() {
        return Ok(current);
    }

    if current.status.is_terminal() {
        if update.touches_financials() {
            return Err(AppError::Conflict(format!(
                "Lease is {}; rent and subsidy can no longer change.",
                current.status.as_str()
            )));
        }
        if update.status.is_some_and(|status| status != current.status) {
            return Err(AppError::Conflict(format!(
                "Lease is {}; its status is final.",
                current.status.as_str()
            )));
        }
    }

    let monthly_rent = update.monthly_rent.unwrap_or(current.monthly_rent);
    let subsidy_amount = update.subsidy_amount.unwrap_or(current.subsidy_amount);
    let start_date = update.start_date.unwrap_or(current.start_date);
    let end_date = update.end_date.unwrap_or(current.end_date);
    validate_financials(monthly_rent, subsidy_amount)?;
    validate_dates(start_date, end_date)?;
    validate_program(
        update.program_month.unwrap_or(current.program_month),
        update
            .total_program_months
            .unwrap_or(current.total_program_months),
    )?;

    let mut patch = Map::new();
    insert_opt(&mut patch, "monthly_rent", update.monthly_rent.map(|v| json!(v)));
    insert_opt(
        &mut patch,
        "subsidy_amount",
        update.subsidy_amount.map(|v| json!(v)),
    );
    insert_nullable(
        &mut patch,
        "start_date",
        update.start_date.map(|date| date.map(date_value)),
    );
    insert_nullable(
        &mut patch,
        "end_date",
        update.end_date.map(|date| date.map(date_value)),
    );
    insert_opt(
        &mut patch,
        "status",
        update
            .status
            .map(|status| Value::String(status.as_str().to_string())),
    );
    insert_opt(
        &mut patch,
        "lease_type",
        update
            .lease_type
            .map(|lease_type| Value::String(lease_type.as_str().to_string())),
    );
    insert_nullable(
        &mut patch,
        "notes",
        update.notes.map(|notes| notes.map(Value::String)),
    );
    insert_nullable(
        &mut patch,
        "program_month",
        update.program_month.map(|month| month.map(Value::from)),
    );
    insert_nullable(
        &mut patch,
        "total_program_months",
        update.total_program_months.map(|total| total.map(Value::from)),
    );
    patch.insert(
        "updated_at".to_string(),
        Value::String(Utc::now().to_rfc3339()),
    );

    let row = store.update_row(LEASES_TABLE, lease_id, &patch).await?;
    let updated: Lease = from_row(row, LEASES_TABLE)?;
    info!(
        lease_id,
        fields = ?patch.keys().collect::<Vec<_>>(),
        tenant_pays = %updated.tenant_pays,
        "Lease updated"
    );
    Ok(updated)
}

/// Removes the lease; the store cascades its ledger entries.
pub async fn delete_lease(store: &dyn TableStore, lease_id: &str) -> AppResult<Lease> {
    let row = store.delete_row(LEASES_TABLE, lease_id).await?;
    let deleted: Lease = from_row(row, LEASES_TABLE)?;
    info!(lease_id, "Lease deleted with its ledger entries");
    Ok(deleted)
}

/// Money columns are `numeric(12, 2)`: non-negative, whole cents only.
pub(crate) fn ensure_money(field: &str, amount: Decimal) -> AppResult<()> {
    if amount < Decimal::ZERO {
        return Err(AppError::validation(
            field,
            format!("{field} must be greater than or equal to 0."),
        ));
    }
    if amount.round_dp(MONEY_DECIMAL_PLACES) != amount {
        return Err(AppError::validation(
            field,
            format!("{field} must have at most {MONEY_DECIMAL_PLACES} decimal places."),
        ));
    }
    Ok(())
}

// A subsidy larger than the rent would make the tenant's share negative.
fn validate_financials(monthly_rent: Decimal, subsidy_amount: Decimal) -> AppResult<()> {
    ensure_money("monthly_rent", monthly_rent)?;
    ensure_money("subsidy_amount", subsidy_amount)?;
    if subsidy_amount > monthly_rent {
        return Err(AppError::validation(
            "subsidy_amount",
            "subsidy_amount cannot exceed monthly_rent.",
        ));
    }
    Ok(())
}

fn validate_dates(start_date: Option<NaiveDate>, end_date: Option<NaiveDate>) -> AppResult<()> {
    if let (Some(start), Some(end)) = (start_date, end_date) {
        if end < start {
            return Err(AppError::validation(
                "end_date",
                "end_date must be on or after start_date.",
            ));
        }
    }
    Ok(())
}

fn validate_program(program_month: Option<i32>, total_program_months: Option<i32>) -> AppResult<()> {
    if program_month.is_some_and(|month| month <= 0) {
        return Err(AppError::validation(
            "program_month",
            "program_month must be a positive number of months.",
        ));
    }
    if total_program_months.is_some_and(|total| total <= 0) {
        return Err(AppError::validation(
            "total_program_months",
            "total_program_months must be a positive number of months.",
        ));
    }
    Ok(())
}

fn required_reference(field: &str, value: &str) -> AppResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::validation(field, format!("{field} is required.")));
    }
    Ok(trimmed.to_string())
}

fn insert_opt(payload: &mut Map<String, Value>, key: &str, value: Option<Value>) {
    if let Some(value) = value {
        payload.insert(key.to_string(), value);
    }
}

fn insert_nullable(payload: &mut Map<String, Value>, key: &str, value: Option<Option<Value>>) {
    if let Some(value) = value {
        payload.insert(key.to_string(), value.unwrap_or(Value::Null));
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use super::{
        create_lease, delete_lease, list_leases, load_lease, update_lease, LeaseFilters,
        LeaseUpdate, NewLease,
    };
    use crate::error::AppError;
    use crate::models::{Lease, LeaseStatus, LeaseType};
    use crate::repository::memory::MemoryStore;
    use crate::repository::yielding::YieldingStore;

    pub(crate) fn new_lease(monthly_rent: Decimal, subsidy_amount: Decimal) -> NewLease {
        NewLease {
            household_id: "household-1".to_string(),
            unit_id: "unit-1".to_string(),
            lease_type: LeaseType::Direct,
            status: LeaseStatus::Active,
            monthly_rent,
            subsidy_amount,
            start_date: NaiveDate::from_ymd_opt(2025, 1, 1),
            end_date: NaiveDate::from_ymd_opt(2025, 12, 31),
            program_month: None,
            total_program_months: None,
            notes: None,
        }
    }

    pub(crate) async fn seeded_lease(store: &MemoryStore) -> Lease {
        create_lease(store, new_lease(dec!(1200), dec!(300)))
            .await
            .expect("lease created")
    }

    #[tokio::test]
    async fn create_derives_tenant_pays() {
        let store = MemoryStore::new();
        let lease = seeded_lease(&store).await;
        assert_eq!(lease.tenant_pays, dec!(900));
        assert!(!lease.id.is_empty());
    }

    #[tokio::test]
    async fn rent_change_recomputes_tenant_pays_with_stored_subsidy() {
        let store = MemoryStore::new();
        let lease = seeded_lease(&store).await;

        let updated = update_lease(
            &store,
            &lease.id,
            LeaseUpdate {
                monthly_rent: Some(dec!(1000)),
                ..LeaseUpdate::default()
            },
        )
        .await
        .expect("update succeeds");

        assert_eq!(updated.monthly_rent, dec!(1000));
        assert_eq!(updated.subsidy_amount, dec!(300));
        assert_eq!(updated.tenant_pays, dec!(700));

        let reloaded = load_lease(&store, &lease.id).await.expect("reload");
        assert_eq!(reloaded.tenant_pays, dec!(700));
    }

    #[tokio::test]
    async fn subsidy_change_alone_recomputes_tenant_pays() {
        let store = MemoryStore::new();
        let lease = seeded_lease(&store).await;

        let updated = update_lease(
            &store,
            &lease.id,
            LeaseUpdate {
                subsidy_amount: Some(dec!(450.50)),
                ..LeaseUpdate::default()
            },
        )
        .await
        .expect("update succeeds");
        assert_eq!(updated.tenant_pays, dec!(749.50));
        assert_eq!(
            updated.tenant_pays,
            updated.monthly_rent - updated.subsidy_amount
        );
    }

    #[tokio::test]
    async fn tenant_pays_holds_across_many_edits() {
        let store = MemoryStore::new();
        let lease = seeded_lease(&store).await;
        let edits = [
            (Some(dec!(1500)), None),
            (None, Some(dec!(0))),
            (Some(dec!(800)), Some(dec!(800))),
            (Some(dec!(950.25)), Some(dec!(100.10))),
        ];
        for (monthly_rent, subsidy_amount) in edits {
            let updated = update_lease(
                &store,
                &lease.id,
                LeaseUpdate {
                    monthly_rent,
                    subsidy_amount,
                    ..LeaseUpdate::default()
                },
            )
            .await
            .expect("update succeeds");
            assert_eq!(
                updated.tenant_pays,
                updated.monthly_rent - updated.subsidy_amount
            );
        }
    }

    #[tokio::test]
    async fn interleaved_rent_and_subsidy_edits_keep_tenant_pays_derived() {
        let store = YieldingStore::default();
        let lease = seeded_lease(store.inner()).await;

        let (rent_edit, subsidy_edit) = tokio::join!(
            update_lease(
                &store,
                &lease.id,
                LeaseUpdate {
                    monthly_rent: Some(dec!(1000)),
                    ..LeaseUpdate::default()
                },
            ),
            update_lease(
                &store,
                &lease.id,
                LeaseUpdate {
                    subsidy_amount: Some(dec!(400)),
                    ..LeaseUpdate::default()
                },
            ),
        );
        rent_edit.expect("rent edit");
        subsidy_edit.expect("subsidy edit");

        let reloaded = load_lease(&store, &lease.id).await.expect("reload");
        assert_eq!(reloaded.monthly_rent, dec!(1000));
        assert_eq!(reloaded.subsidy_amount, dec!(400));
        assert_eq!(reloaded.tenant_pays, dec!(600));
    }

    #[tokio::test]
    async fn interleaved_edits_that_would_go_negative_conflict() {
        let store = YieldingStore::default();
        let lease = seeded_lease(store.inner()).await;

        let (rent_edit, subsidy_edit) = tokio::join!(
            update_lease(
                &store,
                &lease.id,
                LeaseUpdate {
                    monthly_rent: Some(dec!(500)),
                    ..LeaseUpdate::default()
                },
            ),
            update_lease(
                &store,
                &lease.id,
                LeaseUpdate {
                    subsidy_amount: Some(dec!(800)),
                    ..LeaseUpdate::default()
                },
            ),
        );
        // Whichever write lands second would push tenant_pays below zero.
        let conflicts = [rent_edit.is_err(), subsidy_edit.is_err()];
        assert_eq!(conflicts.iter().filter(|failed| **failed).count(), 1);
        for result in [rent_edit, subsidy_edit] {
            if let Err(error) = result {
                assert!(matches!(error, AppError::Conflict(_)));
            }
        }

        let reloaded = load_lease(&store, &lease.id).await.expect("reload");
        assert!(reloaded.tenant_pays >= dec!(0));
        assert_eq!(
            reloaded.tenant_pays,
            reloaded.monthly_rent - reloaded.subsidy_amount
        );
    }

    #[tokio::test]
    async fn rejects_sub_cent_amounts_naming_the_field() {
        let store = MemoryStore::new();
        let create_error = create_lease(&store, new_lease(dec!(1200.001), dec!(0)))
            .await
            .expect_err("sub-cent rent");
        assert!(matches!(
            create_error,
            AppError::Validation { ref field, .. } if field == "monthly_rent"
        ));

        let lease = seeded_lease(&store).await;
        let error = update_lease(
            &store,
            &lease.id,
            LeaseUpdate {
                subsidy_amount: Some(dec!(300.005)),
                ..LeaseUpdate::default()
            },
        )
        .await
        .expect_err("sub-cent subsidy");
        assert!(matches!(error, AppError::Validation { ref field, .. } if field == "subsidy_amount"));

        let trailing_zeros = update_lease(
            &store,
            &lease.id,
            LeaseUpdate {
                subsidy_amount: Some(dec!(300.500)),
                ..LeaseUpdate::default()
            },
        )
        .await
        .expect("whole cents with trailing zeros");
        assert_eq!(trailing_zeros.tenant_pays, dec!(899.50));
    }

    #[tokio::test]
    async fn nullable_fields_can_be_cleared() {
        let store = MemoryStore::new();
        let mut input = new_lease(dec!(1200), dec!(300));
        input.notes = Some("keys at the office".to_string());
        input.program_month = Some(4);
        input.total_program_months = Some(12);
        let lease = create_lease(&store, input).await.expect("lease created");

        let cleared = update_lease(
            &store,
            &lease.id,
            LeaseUpdate {
                end_date: Some(None),
                notes: Some(None),
                program_month: Some(None),
                ..LeaseUpdate::default()
            },
        )
        .await
        .expect("clear");
        assert_eq!(cleared.end_date, None);
        assert_eq!(cleared.notes, None);
        assert_eq!(cleared.program_month, None);
        assert_eq!(cleared.total_program_months, Some(12));
        assert_eq!(cleared.start_date, lease.start_date);

        let reloaded = load_lease(&store, &lease.id).await.expect("reload");
        assert_eq!(reloaded, cleared);
    }

    #[tokio::test]
    async fn rejects_negative_amounts_without_writing() {
        let store = MemoryStore::new();
        let lease = seeded_lease(&store).await;

        let error = update_lease(
            &store,
            &lease.id,
            LeaseUpdate {
                monthly_rent: Some(dec!(-1)),
                notes: Some(Some("should not land".to_string())),
                ..LeaseUpdate::default()
            },
        )
        .await
        .expect_err("negative rent rejected");
        assert!(matches!(error, AppError::Validation { ref field, .. } if field == "monthly_rent"));

        let reloaded = load_lease(&store, &lease.id).await.expect("reload");
        assert_eq!(reloaded, lease);
    }

    #[tokio::test]
    async fn rejects_subsidy_above_rent() {
        let store = MemoryStore::new();
        let lease = seeded_lease(&store).await;

        let error = update_lease(
            &store,
            &lease.id,
            LeaseUpdate {
                subsidy_amount: Some(dec!(1300)),
                ..LeaseUpdate::default()
            },
        )
        .await
        .expect_err("negative tenant share rejected");
        assert!(
            matches!(error, AppError::Validation { ref field, .. } if field == "subsidy_amount")
        );

        let create_error = create_lease(&store, new_lease(dec!(500), dec!(600)))
            .await
            .expect_err("create rejects it too");
        assert!(matches!(create_error, AppError::Validation { .. }));
    }

    #[tokio::test]
    async fn checks_date_order_against_stored_start() {
        let store = MemoryStore::new();
        let lease = seeded_lease(&store).await;

        let error = update_lease(
            &store,
            &lease.id,
            LeaseUpdate {
                end_date: Some(NaiveDate::from_ymd_opt(2024, 12, 31)),
                ..LeaseUpdate::default()
            },
        )
        .await
        .expect_err("end before start");
        assert!(matches!(error, AppError::Validation { ref field, .. } if field == "end_date"));

        let same_day = update_lease(
            &store,
            &lease.id,
            LeaseUpdate {
                end_date: Some(NaiveDate::from_ymd_opt(2025, 1, 1)),
                ..LeaseUpdate::default()
            },
        )
        .await
        .expect("end on start day is allowed");
        assert_eq!(same_day.end_date, NaiveDate::from_ymd_opt(2025, 1, 1));
    }

    #[tokio::test]
    async fn unknown_lease_is_not_found() {
        let store = MemoryStore::new();
        let error = update_lease(
            &store,
            "missing",
            LeaseUpdate {
                notes: Some(Some("x".to_string())),
                ..LeaseUpdate::default()
            },
        )
        .await
        .expect_err("missing lease");
        assert!(matches!(error, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn terminal_lease_freezes_financials_but_accepts_notes() {
        let store = MemoryStore::new();
        let lease = seeded_lease(&store).await;
        update_lease(
            &store,
            &lease.id,
            LeaseUpdate {
                status: Some(LeaseStatus::Completed),
                ..LeaseUpdate::default()
            },
        )
        .await
        .expect("complete lease");

        let error = update_lease(
            &store,
            &lease.id,
            LeaseUpdate {
                monthly_rent: Some(dec!(1300)),
                ..LeaseUpdate::default()
            },
        )
        .await
        .expect_err("frozen");
        assert!(matches!(error, AppError::Conflict(_)));

        let reopen = update_lease(
            &store,
            &lease.id,
            LeaseUpdate {
                status: Some(LeaseStatus::Active),
                ..LeaseUpdate::default()
            },
        )
        .await;
        assert!(matches!(reopen, Err(AppError::Conflict(_))));

        let noted = update_lease(
            &store,
            &lease.id,
            LeaseUpdate {
                notes: Some(Some("moved out".to_string())),
                ..LeaseUpdate::default()
            },
        )
        .await
        .expect("notes still editable");
        assert_eq!(noted.notes.as_deref(), Some("moved out"));
        assert_eq!(noted.tenant_pays, dec!(900));
    }

    #[tokio::test]
    async fn lists_by_equality_filters() {
        let store = MemoryStore::new();
        seeded_lease(&store).await;
        let mut other = new_lease(dec!(700), dec!(0));
        other.household_id = "household-2".to_string();
        other.status = LeaseStatus::Pending;
        create_lease(&store, other).await.expect("second lease");

        let pending = list_leases(
            &store,
            &LeaseFilters {
                status: Some(LeaseStatus::Pending),
                ..LeaseFilters::default()
            },
            100,
        )
        .await
        .expect("list");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].household_id, "household-2");

        let all = list_leases(&store, &LeaseFilters::default(), 100)
            .await
            .expect("list");
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn delete_returns_the_removed_lease() {
        let store = MemoryStore::new();
        let lease = seeded_lease(&store).await;
        let deleted = delete_lease(&store, &lease.id).await.expect("delete");
        assert_eq!(deleted.id, lease.id);
        assert!(matches!(
            load_lease(&store, &lease.id).await,
            Err(AppError::NotFound(_))
        ));
    }
}
