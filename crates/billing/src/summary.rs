//! Reconciliation view over calculated costs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use stockledger_core::{Currency, Money, MoneyError};

use crate::cost::{CalculatedCost, CostId};
use crate::rate::CostCategory;

/// Costs of one (category, rate name) group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostSummaryLine {
    pub category: CostCategory,
    pub rate_name: String,
    pub total_quantity: i64,
    pub total_amount: Money,
    /// Rate of the first cost seen in the group.
    pub unit_rate: Money,
    pub cost_ids: Vec<CostId>,
}

/// Group costs by (category, rate name), ordered by that pair.
pub fn summarize<'a, I>(costs: I, currency: Currency) -> Result<Vec<CostSummaryLine>, MoneyError>
where
    I: IntoIterator<Item = &'a CalculatedCost>,
{
    let mut groups: BTreeMap<(CostCategory, String), CostSummaryLine> = BTreeMap::new();
    for cost in costs {
        let line = groups
            .entry((cost.category, cost.rate_name.clone()))
            .or_insert_with(|| CostSummaryLine {
                category: cost.category,
                rate_name: cost.rate_name.clone(),
                total_quantity: 0,
                total_amount: Money::zero(currency),
                unit_rate: cost.unit_rate,
                cost_ids: Vec::new(),
            });
        line.total_quantity += cost.quantity;
        line.total_amount = line.total_amount.add(&cost.amount)?;
        line.cost_ids.push(cost.id.clone());
    }
    Ok(groups.into_values().collect())
}
