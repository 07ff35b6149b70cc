//! Hybrid-group combination.
//!
//! Assets sharing a `hybrid_group` tag (e.g. co-located solar + storage) are
//! combined into one composite entity whose series is the element-wise sum
//! of the members over the union of their period keys, zero-filling periods
//! a member does not cover. Composite economics (equity IRR in particular)
//! are always computed from the summed series, never by averaging member
//! results.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::cashflow::waterfall::aggregate;
use crate::error::ModelError;
use crate::periods::{Granularity, PeriodKey};
use crate::types::{AssetId, AssetRecord, CashFlowLine};
use crate::ModelResult;

/// Combined cash flows of one hybrid group. The first member is the
/// primary; its id keys the composite lines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HybridCashFlow {
    /// `"{group} (Hybrid)"`
    pub name: String,
    pub group: String,
    pub primary_id: AssetId,
    pub member_ids: Vec<AssetId>,
    pub member_names: Vec<String>,
    pub granularity: Granularity,
    pub lines: Vec<CashFlowLine>,
}

/// Combine all hybrid groups found in `assets`.
///
/// Groups with fewer than two members are passed over with a warning rather
/// than an error. Members at different granularities are reconciled by
/// re-aggregating the finer ones to the coarsest member granularity; if two
/// distinct granularities are equally coarse (yearly vs fiscal) the group
/// cannot be reconciled and combination fails.
pub fn combine_hybrids(
    assets: &[AssetRecord],
    lines_by_asset: &BTreeMap<AssetId, (Granularity, Vec<CashFlowLine>)>,
) -> ModelResult<(Vec<HybridCashFlow>, Vec<String>)> {
    let mut groups: BTreeMap<&str, Vec<&AssetRecord>> = BTreeMap::new();
    for asset in assets {
        if let Some(tag) = asset.hybrid_group.as_deref() {
            groups.entry(tag).or_default().push(asset);
        }
    }

    let mut combined = Vec::new();
    let mut warnings = Vec::new();

    for (tag, members) in groups {
        if members.len() < 2 {
            warnings.push(format!(
                "Hybrid group '{tag}' has {} member(s); passing the asset through uncombined",
                members.len()
            ));
            continue;
        }

        let mut member_lines = Vec::with_capacity(members.len());
        for member in &members {
            let (granularity, lines) =
                lines_by_asset
                    .get(&member.id)
                    .ok_or_else(|| ModelError::InsufficientData(format!(
                        "No cash flows for hybrid member '{}' (id {})",
                        member.name, member.id
                    )))?;
            member_lines.push((member, *granularity, lines));
        }

        let target = coarsest_granularity(tag, &member_lines)?;

        let primary_id = members[0].id;
        let mut buckets: BTreeMap<PeriodKey, CashFlowLine> = BTreeMap::new();

        for (_, granularity, lines) in &member_lines {
            let at_target = aggregate(lines, *granularity, target)?;
            for line in at_target {
                buckets
                    .entry(line.period)
                    .and_modify(|agg| {
                        agg.revenue += line.revenue;
                        agg.opex += line.opex;
                        agg.capex += line.capex;
                        agg.depreciation += line.depreciation;
                        agg.interest += line.interest;
                        agg.principal += line.principal;
                        agg.equity_cash_flow += line.equity_cash_flow;
                    })
                    .or_insert_with(|| CashFlowLine {
                        asset_id: primary_id,
                        ..line.clone()
                    });
            }
        }

        combined.push(HybridCashFlow {
            name: format!("{tag} (Hybrid)"),
            group: tag.to_string(),
            primary_id,
            member_ids: members.iter().map(|m| m.id).collect(),
            member_names: members.iter().map(|m| m.name.clone()).collect(),
            granularity: target,
            lines: buckets.into_values().collect(),
        });
    }

    Ok((combined, warnings))
}

/// Coarsest member granularity, or an alignment error when two distinct
/// granularities tie for coarsest and so cannot nest into one another.
fn coarsest_granularity(
    tag: &str,
    member_lines: &[(&&AssetRecord, Granularity, &Vec<CashFlowLine>)],
) -> ModelResult<Granularity> {
    let mut target = member_lines[0].1;
    for (_, granularity, _) in &member_lines[1..] {
        if *granularity == target {
            continue;
        }
        if granularity.periods_per_year() == target.periods_per_year() {
            return Err(ModelError::Alignment {
                context: format!("hybrid group '{tag}'"),
                reason: format!(
                    "Member granularities {granularity:?} and {target:?} cannot be reconciled"
                ),
            });
        }
        if granularity.periods_per_year() < target.periods_per_year() {
            target = *granularity;
        }
    }
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use crate::types::{FinancingTerms, SizingMode};

    fn key(y: i32, m: u32) -> PeriodKey {
        PeriodKey(NaiveDate::from_ymd_opt(y, m, 1).unwrap())
    }

    fn asset(id: AssetId, name: &str, group: Option<&str>) -> AssetRecord {
        AssetRecord {
            id,
            name: name.to_string(),
            asset_type: "solar".to_string(),
            capacity_mw: dec!(50),
            hybrid_group: group.map(str::to_string),
            operating_start: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            lifetime_years: 25,
            financing: FinancingTerms {
                interest_rate: dec!(0.06),
                tenor_years: 10,
                target_dscr: dec!(1.30),
                dscr_floor: None,
                max_gearing: dec!(0.80),
                sizing_mode: SizingMode::Sculpted,
            },
        }
    }

    fn line(id: AssetId, period: PeriodKey, revenue: Decimal) -> CashFlowLine {
        CashFlowLine::balanced(
            id,
            period,
            revenue,
            dec!(0),
            dec!(0),
            dec!(0),
            dec!(0),
            dec!(0),
        )
    }

    fn yearly(lines: Vec<CashFlowLine>) -> (Granularity, Vec<CashFlowLine>) {
        (Granularity::Yearly, lines)
    }

    #[test]
    fn test_combined_series_is_elementwise_sum_with_zero_fill() {
        let assets = vec![
            asset(1, "solar-a", Some("park-1")),
            asset(2, "storage-a", Some("park-1")),
        ];
        let mut by_asset = BTreeMap::new();
        by_asset.insert(
            1,
            yearly(vec![line(1, key(2025, 1), dec!(100)), line(1, key(2026, 1), dec!(100))]),
        );
        // Storage starts a year later: 2025 zero-fills on its side
        by_asset.insert(2, yearly(vec![line(2, key(2026, 1), dec!(40))]));

        let (hybrids, warnings) = combine_hybrids(&assets, &by_asset).unwrap();
        assert!(warnings.is_empty());
        assert_eq!(hybrids.len(), 1);

        let h = &hybrids[0];
        assert_eq!(h.name, "park-1 (Hybrid)");
        assert_eq!(h.primary_id, 1);
        assert_eq!(h.member_ids, vec![1, 2]);
        assert_eq!(h.member_names, vec!["solar-a", "storage-a"]);
        assert_eq!(h.lines.len(), 2);
        assert_eq!(h.lines[0].revenue, dec!(100));
        assert_eq!(h.lines[1].revenue, dec!(140));
        for l in &h.lines {
            assert_eq!(l.identity_residual(), dec!(0));
        }
    }

    #[test]
    fn test_single_member_group_warns_and_passes_through() {
        let assets = vec![asset(1, "lone", Some("park-2")), asset(2, "plain", None)];
        let mut by_asset = BTreeMap::new();
        by_asset.insert(1, yearly(vec![line(1, key(2025, 1), dec!(10))]));
        by_asset.insert(2, yearly(vec![line(2, key(2025, 1), dec!(10))]));

        let (hybrids, warnings) = combine_hybrids(&assets, &by_asset).unwrap();
        assert!(hybrids.is_empty());
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("park-2"));
    }

    #[test]
    fn test_mixed_granularities_reconcile_to_coarsest() {
        let assets = vec![
            asset(1, "solar-b", Some("park-3")),
            asset(2, "storage-b", Some("park-3")),
        ];
        let mut monthly_lines = Vec::new();
        for m in 1..=12 {
            monthly_lines.push(line(1, key(2025, m), dec!(10)));
        }
        let mut by_asset = BTreeMap::new();
        by_asset.insert(1, (Granularity::Monthly, monthly_lines));
        by_asset.insert(2, yearly(vec![line(2, key(2025, 1), dec!(40))]));

        let (hybrids, _) = combine_hybrids(&assets, &by_asset).unwrap();
        assert_eq!(hybrids[0].granularity, Granularity::Yearly);
        assert_eq!(hybrids[0].lines.len(), 1);
        assert_eq!(hybrids[0].lines[0].revenue, dec!(160));
    }

    #[test]
    fn test_irreconcilable_granularities_fail() {
        let assets = vec![
            asset(1, "solar-c", Some("park-4")),
            asset(2, "storage-c", Some("park-4")),
        ];
        let mut by_asset = BTreeMap::new();
        by_asset.insert(1, yearly(vec![line(1, key(2025, 1), dec!(10))]));
        by_asset.insert(
            2,
            (
                Granularity::Fiscal { start_month: 7 },
                vec![line(2, key(2024, 7), dec!(10))],
            ),
        );

        let result = combine_hybrids(&assets, &by_asset);
        assert!(matches!(result, Err(ModelError::Alignment { .. })));
    }

    #[test]
    fn test_missing_member_lines_is_an_error() {
        let assets = vec![
            asset(1, "solar-d", Some("park-5")),
            asset(2, "storage-d", Some("park-5")),
        ];
        let mut by_asset = BTreeMap::new();
        by_asset.insert(1, yearly(vec![line(1, key(2025, 1), dec!(10))]));

        let result = combine_hybrids(&assets, &by_asset);
        assert!(matches!(result, Err(ModelError::InsufficientData(_))));
    }
}
