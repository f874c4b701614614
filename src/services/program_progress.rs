use serde::Serialize;

use crate::models::{Lease, LeaseType};

pub const DEFAULT_TOTAL_PROGRAM_MONTHS: i32 = 24;

/// Share of a bridge program already elapsed, rounded to a whole percent in
/// `[0, 100]`. A missing or non-positive total falls back to 24 months.
pub fn percent_complete(program_month: Option<i32>, total_program_months: Option<i32>) -> u8 {
    let Some(month) = program_month.filter(|month| *month > 0) else {
        return 0;
    };
    let total = total_program_months
        .filter(|total| *total > 0)
        .unwrap_or(DEFAULT_TOTAL_PROGRAM_MONTHS);
    if month >= total {
        return 100;
    }

    let percent = (f64::from(month) / f64::from(total) * 100.0).round();
    percent.clamp(0.0, 100.0) as u8
}

/// Progress data that only bridge leases carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BridgeProgram {
    pub program_month: Option<i32>,
    pub total_program_months: i32,
    pub percent_complete: u8,
}

impl Lease {
    pub fn bridge_program(&self) -> Option<BridgeProgram> {
        if self.lease_type != LeaseType::Bridge {
            return None;
        }
        let total_program_months = self
            .total_program_months
            .filter(|total| *total > 0)
            .unwrap_or(DEFAULT_TOTAL_PROGRAM_MONTHS);
        Some(BridgeProgram {
            program_month: self.program_month,
            total_program_months,
            percent_complete: percent_complete(self.program_month, Some(total_program_months)),
        })
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::{percent_complete, DEFAULT_TOTAL_PROGRAM_MONTHS};
    use crate::models::{Lease, LeaseStatus, LeaseType};

    fn lease(lease_type: LeaseType, program_month: Option<i32>, total: Option<i32>) -> Lease {
        Lease {
            id: "lease-1".to_string(),
            household_id: "household-1".to_string(),
            unit_id: "unit-1".to_string(),
            lease_type,
            status: LeaseStatus::Active,
            start_date: None,
            end_date: None,
            monthly_rent: dec!(1200),
            subsidy_amount: dec!(1200),
            tenant_pays: dec!(0),
            program_month,
            total_program_months: total,
            notes: None,
            created_at: None,
            updated_at: None,
        }
    }

    #[test]
    fn known_values() {
        assert_eq!(percent_complete(Some(6), Some(24)), 25);
        assert_eq!(percent_complete(Some(24), Some(24)), 100);
        assert_eq!(percent_complete(Some(30), Some(24)), 100);
        assert_eq!(percent_complete(Some(0), Some(24)), 0);
    }

    #[test]
    fn absent_or_negative_month_is_zero() {
        assert_eq!(percent_complete(None, Some(12)), 0);
        assert_eq!(percent_complete(Some(-3), Some(12)), 0);
    }

    #[test]
    fn rounds_to_nearest_percent() {
        assert_eq!(percent_complete(Some(1), Some(18)), 6);
        assert_eq!(percent_complete(Some(1), Some(12)), 8);
        assert_eq!(percent_complete(Some(5), Some(18)), 28);
    }

    #[test]
    fn missing_total_uses_default() {
        assert_eq!(DEFAULT_TOTAL_PROGRAM_MONTHS, 24);
        assert_eq!(percent_complete(Some(12), None), 50);
        assert_eq!(percent_complete(Some(12), Some(0)), 50);
    }

    #[test]
    fn output_is_always_bounded() {
        for total in [1, 12, 18, 24, 36] {
            for month in -5..=60 {
                let value = percent_complete(Some(month), Some(total));
                assert!(value <= 100, "month {month} of {total} gave {value}");
            }
        }
    }

    #[test]
    fn only_bridge_leases_have_a_program() {
        assert!(lease(LeaseType::Direct, Some(6), Some(24))
            .bridge_program()
            .is_none());
        assert!(lease(LeaseType::Sublease, Some(6), Some(24))
            .bridge_program()
            .is_none());

        let program = lease(LeaseType::Bridge, Some(9), Some(18))
            .bridge_program()
            .expect("bridge lease");
        assert_eq!(program.total_program_months, 18);
        assert_eq!(program.percent_complete, 50);

        let defaulted = lease(LeaseType::Bridge, Some(6), None)
            .bridge_program()
            .expect("bridge lease");
        assert_eq!(defaulted.total_program_months, 24);
        assert_eq!(defaulted.percent_complete, 25);
    }
}
