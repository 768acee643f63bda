//! Whole-unit order sizing.
//!
//! Guidance only: suggestions are never sent anywhere.

use serde::{Deserialize, Serialize};

use crate::portfolio::{ActionKind, CapitalSplitPlan, Portfolio, RebalanceAction};

/// Suggested order for one instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSuggestion {
    pub instrument_id: String,
    /// BUY or SELL
    pub side: ActionKind,
    /// Whole units
    pub quantity: f64,
    pub unit_price: f64,
    /// `quantity × unit_price`
    pub estimated_value: f64,
}

/// Turn band actions into whole-unit orders, in action order.
///
/// BUY orders are funded by the capital plan when one is given, otherwise
/// by the suggested trade value. With a capital plan, a SELL only trims what
/// is still above the band's upper edge once the new capital is invested.
/// SELL orders never exceed the units held. Instruments without a usable
/// price and orders rounding to zero units are skipped.
pub fn suggest_orders(
    actions: &[RebalanceAction],
    portfolio: &Portfolio,
    capital_plan: Option<&CapitalSplitPlan>,
    max_orders: usize,
) -> Vec<OrderSuggestion> {
    let mut orders = Vec::new();

    for action in actions {
        if orders.len() >= max_orders {
            break;
        }
        let Some(instrument) = portfolio.get(&action.instrument_id) else {
            continue;
        };
        let Some(unit_price) = instrument.unit_price() else {
            tracing::debug!(instrument = %action.instrument_id, "No unit price, skipping order");
            continue;
        };

        let quantity = match action.kind {
            ActionKind::Hold => continue,
            ActionKind::Buy => {
                let amount = match capital_plan {
                    Some(plan) => plan.allocated_to(&action.instrument_id),
                    None => action.suggested_trade_value,
                };
                (amount / unit_price).floor()
            }
            ActionKind::Sell => {
                let amount = match capital_plan {
                    Some(plan) => excess_after_injection(
                        action,
                        instrument.market_value,
                        portfolio.invested_value(),
                        plan,
                    ),
                    None => -action.suggested_trade_value,
                };
                (amount / unit_price).floor().min(instrument.quantity.floor())
            }
        };

        if quantity >= 1.0 {
            orders.push(OrderSuggestion {
                instrument_id: action.instrument_id.clone(),
                side: action.kind,
                quantity,
                unit_price,
                estimated_value: quantity * unit_price,
            });
        }
    }

    orders
}

/// Value above the upper band edge after the plan's investments land.
///
/// Zero when the injection alone dilutes the position back into its band.
fn excess_after_injection(
    action: &RebalanceAction,
    market_value: f64,
    invested_value: f64,
    plan: &CapitalSplitPlan,
) -> f64 {
    let projected_total = invested_value + plan.to_investments;
    let projected_value = market_value + plan.allocated_to(&action.instrument_id);
    let upper = (action.target_weight + action.tolerance) * projected_total;
    if projected_value <= upper {
        tracing::debug!(
            instrument = %action.instrument_id,
            "New capital brings position inside its band, no sell"
        );
        return 0.0;
    }
    projected_value - upper
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portfolio::{AssetClass, Instrument};

    fn portfolio() -> Portfolio {
        let mut fresh = Instrument::new("IVVB11", AssetClass::Equities, 0.0, 0.0);
        fresh.unit_price = Some(300.0);
        Portfolio::new(
            vec![
                Instrument::new("BOVA11", AssetClass::Equities, 65_000.0, 500.0),
                Instrument::new("TESOURO_SELIC", AssetClass::GovernmentBonds, 35_000.0, 2.5),
                fresh,
                Instrument::new("BTC", AssetClass::Crypto, 0.0, 0.0),
            ],
            0.0,
        )
        .unwrap()
    }

    fn action(id: &str, kind: ActionKind, trade: f64) -> RebalanceAction {
        RebalanceAction {
            instrument_id: id.into(),
            asset_class: AssetClass::Equities,
            kind,
            current_weight: 0.0,
            target_weight: 0.0,
            deviation: 0.0,
            tolerance: 0.0,
            suggested_trade_value: trade,
        }
    }

    #[test]
    fn test_sell_and_buy_sizing() {
        let actions = vec![
            action("BOVA11", ActionKind::Sell, -15_000.0),
            action("TESOURO_SELIC", ActionKind::Buy, 15_000.0),
            action("IVVB11", ActionKind::Buy, 1_000.0),
        ];
        let orders = suggest_orders(&actions, &portfolio(), None, 5);

        assert_eq!(orders.len(), 3);
        assert_eq!(orders[0].side, ActionKind::Sell);
        assert_eq!(orders[0].quantity, 115.0);
        // 15 000 / 14 000 per unit
        assert_eq!(orders[1].quantity, 1.0);
        assert_eq!(orders[2].quantity, 3.0);
        assert_eq!(orders[2].estimated_value, 900.0);
    }

    #[test]
    fn test_sell_capped_at_holdings() {
        let actions = vec![action("TESOURO_SELIC", ActionKind::Sell, -70_000.0)];
        let orders = suggest_orders(&actions, &portfolio(), None, 5);
        assert_eq!(orders[0].quantity, 2.0);
    }

    #[test]
    fn test_skips_hold_unpriced_and_fractional() {
        let actions = vec![
            action("BOVA11", ActionKind::Hold, 0.0),
            action("BTC", ActionKind::Buy, 5_000.0),
            action("IVVB11", ActionKind::Buy, 250.0),
        ];
        assert!(suggest_orders(&actions, &portfolio(), None, 5).is_empty());
    }

    #[test]
    fn test_capital_plan_funds_buys() {
        let plan = CapitalSplitPlan {
            new_capital: 1_000.0,
            to_reserve: 0.0,
            to_investments: 1_000.0,
            allocations: vec![crate::portfolio::CapitalAllocation {
                instrument_id: "IVVB11".into(),
                amount: 650.0,
                shortfall: 650.0,
                resulting_weight: 0.01,
            }],
        };
        let actions = vec![
            action("TESOURO_SELIC", ActionKind::Buy, 15_000.0),
            action("IVVB11", ActionKind::Buy, 5_000.0),
        ];
        let orders = suggest_orders(&actions, &portfolio(), Some(&plan), 5);
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].instrument_id, "IVVB11");
        assert_eq!(orders[0].quantity, 2.0);
    }

    fn injection(to_investments: f64, allocations: &[(&str, f64)]) -> CapitalSplitPlan {
        CapitalSplitPlan {
            new_capital: to_investments,
            to_reserve: 0.0,
            to_investments,
            allocations: allocations
                .iter()
                .map(|(id, amount)| crate::portfolio::CapitalAllocation {
                    instrument_id: (*id).into(),
                    amount: *amount,
                    shortfall: *amount,
                    resulting_weight: 0.5,
                })
                .collect(),
        }
    }

    fn banded_sell(id: &str, current_weight: f64, trade: f64) -> RebalanceAction {
        RebalanceAction {
            current_weight,
            target_weight: 0.5,
            deviation: current_weight - 0.5,
            tolerance: 0.05,
            ..action(id, ActionKind::Sell, trade)
        }
    }

    #[test]
    fn test_injection_dilutes_overweight_into_band() {
        let portfolio = Portfolio::new(
            vec![
                Instrument::new("BOVA11", AssetClass::Equities, 56_000.0, 560.0),
                Instrument::new("TESOURO_SELIC", AssetClass::GovernmentBonds, 44_000.0, 4.0),
            ],
            0.0,
        )
        .unwrap();
        // 60 000 of 120 000 after the injection sits at 0.5, under the 0.55 edge.
        let plan = injection(20_000.0, &[("TESOURO_SELIC", 16_000.0), ("BOVA11", 4_000.0)]);
        let actions = vec![banded_sell("BOVA11", 0.56, -6_000.0)];

        assert!(suggest_orders(&actions, &portfolio, Some(&plan), 5).is_empty());
        assert_eq!(suggest_orders(&actions, &portfolio, None, 5)[0].quantity, 60.0);
    }

    #[test]
    fn test_injection_trims_sell_to_band_edge() {
        let portfolio = Portfolio::new(
            vec![
                Instrument::new("BOVA11", AssetClass::Equities, 70_000.0, 1_000.0),
                Instrument::new("TESOURO_SELIC", AssetClass::GovernmentBonds, 30_000.0, 3.0),
            ],
            0.0,
        )
        .unwrap();
        // Upper edge 0.55 × 110 000 = 60 500, so 9 500 is sold instead of 20 000.
        // At 70 per unit that is 135 whole units.
        let plan = injection(10_000.0, &[("TESOURO_SELIC", 10_000.0)]);
        let actions = vec![banded_sell("BOVA11", 0.70, -20_000.0)];

        let orders = suggest_orders(&actions, &portfolio, Some(&plan), 5);
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].side, ActionKind::Sell);
        assert_eq!(orders[0].quantity, 135.0);
    }

    #[test]
    fn test_max_orders() {
        let actions = vec![
            action("BOVA11", ActionKind::Sell, -15_000.0),
            action("IVVB11", ActionKind::Buy, 1_000.0),
        ];
        let orders = suggest_orders(&actions, &portfolio(), None, 1);
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].instrument_id, "BOVA11");
    }
}
