//! End-to-end tests for the rebalancing pipeline.
//!
//! Snapshot → class targets → intra-class weights → bands → capital split → orders
//!
//! Return histories come from a deterministic generator so every run sees
//! the same market.

use std::collections::BTreeMap;

use proptest::prelude::*;

use folio_common::config::Config;
use folio_engine::optimizer::{
    DegradationScope, MarkowitzOptimizer, OptimizationInput, OptimizerSettings, SolverFailure,
};
use folio_engine::portfolio::{ActionKind, AssetClass, Instrument, PortfolioSnapshot};
use folio_engine::returns::ReturnSeries;
use folio_engine::RebalanceEngine;

// ============================================================================
// Test Data Generators
// ============================================================================

/// Deterministic uniform noise in [0, 1).
fn noise(seed: u64) -> f64 {
    let mut z = seed.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^= z >> 31;
    (z >> 11) as f64 / (1u64 << 53) as f64
}

/// Daily returns with the given drift and volatility.
fn daily_returns(seed: u64, count: usize, drift: f64, volatility: f64) -> Vec<f64> {
    (0..count)
        .map(|i| drift + (noise(seed * 10_000 + i as u64) - 0.5) * 2.0 * volatility)
        .collect()
}

fn config(json: &str) -> Config {
    serde_json::from_str(json).unwrap()
}

fn static_config() -> Config {
    config(
        r#"{
            "policy": {
                "rebalance_policy": "static",
                "static_class_targets": { "equities": 0.5, "government_bonds": 0.5 },
                "default_band": { "relative_pct": 0.10, "absolute_value": 0.03 }
            }
        }"#,
    )
}

fn markowitz_config(blend_alpha: f64) -> Config {
    config(&format!(
        r#"{{
            "policy": {{
                "rebalance_policy": "markowitz",
                "intra_class_policy": "markowitz",
                "blend_alpha": {blend_alpha},
                "risk_free_rate": 0.02
            }}
        }}"#
    ))
}

fn balanced_snapshot() -> PortfolioSnapshot {
    PortfolioSnapshot::new(vec![
        Instrument::new("BOVA11", AssetClass::Equities, 65_000.0, 500.0),
        Instrument::new("TESOURO_SELIC", AssetClass::GovernmentBonds, 35_000.0, 2.5),
    ])
    .with_reserve(Some(18_000.0), 14_000.0)
}

/// Three classes, two members in equities, daily history for everything.
fn market_snapshot() -> PortfolioSnapshot {
    PortfolioSnapshot::new(vec![
        Instrument::new("PETR4", AssetClass::Equities, 30_000.0, 800.0),
        Instrument::new("ITUB4", AssetClass::Equities, 20_000.0, 600.0),
        Instrument::new("HGLG11", AssetClass::Reits, 20_000.0, 120.0),
        Instrument::new("TESOURO_IPCA", AssetClass::GovernmentBonds, 30_000.0, 9.0),
    ])
    .with_returns("PETR4", daily_returns(1, 120, 0.0009, 0.030))
    .with_returns("ITUB4", daily_returns(2, 120, 0.0006, 0.018))
    .with_returns("HGLG11", daily_returns(3, 120, 0.0005, 0.012))
    .with_returns("TESOURO_IPCA", daily_returns(4, 120, 0.0004, 0.004))
    .with_reserve(None, 18_000.0)
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn test_overweight_equities_sell() {
    let engine = RebalanceEngine::new(&static_config()).unwrap();
    let plan = engine.run(&balanced_snapshot(), None).unwrap();

    let sell = plan
        .actions
        .iter()
        .find(|a| a.instrument_id == "BOVA11")
        .unwrap();
    assert_eq!(sell.kind, ActionKind::Sell);
    assert!((sell.suggested_trade_value + 15_000.0).abs() < 1e-6);
    assert!((sell.tolerance - 0.05).abs() < 1e-12);

    let buy = plan
        .actions
        .iter()
        .find(|a| a.instrument_id == "TESOURO_SELIC")
        .unwrap();
    assert_eq!(buy.kind, ActionKind::Buy);

    let equities = plan
        .class_drift
        .iter()
        .find(|d| d.asset_class == AssetClass::Equities)
        .unwrap();
    assert_eq!(equities.kind, ActionKind::Sell);
}

#[test]
fn test_new_capital_fills_reserve_first() {
    let engine = RebalanceEngine::new(&static_config()).unwrap();
    let plan = engine.run(&balanced_snapshot(), Some(10_000.0)).unwrap();
    let capital = plan.capital_plan.as_ref().unwrap();

    assert_eq!(capital.to_reserve, 4_000.0);
    assert_eq!(capital.to_investments, 6_000.0);
    assert_eq!(capital.to_reserve + capital.to_investments, 10_000.0);
    for allocation in &capital.allocations {
        let target = plan.target_allocation.weight(&allocation.instrument_id);
        assert!(allocation.resulting_weight <= target + 1e-9);
    }
}

#[test]
fn test_target_weights_sum_to_one() {
    let engine = RebalanceEngine::new(&markowitz_config(0.5)).unwrap();
    let plan = engine.run(&market_snapshot(), None).unwrap();

    let total: f64 = plan.target_allocation.instruments.values().sum();
    assert!((total - 1.0).abs() < 1e-6);
    let class_total: f64 = plan.target_allocation.classes.values().sum();
    assert!((class_total - 1.0).abs() < 1e-6);
    for weights in plan.target_allocation.within_class.values() {
        let inner: f64 = weights.values().sum();
        assert!((inner - 1.0).abs() < 1e-6);
    }
    assert!(plan.target_allocation.instruments.values().all(|w| *w >= 0.0));
}

#[test]
fn test_zero_blend_keeps_current_weights() {
    let engine = RebalanceEngine::new(&markowitz_config(0.0)).unwrap();
    let snapshot = market_snapshot();
    let plan = engine.run(&snapshot, None).unwrap();

    for instrument in &snapshot.instruments {
        let current = instrument.market_value / plan.invested_value;
        let target = plan.target_allocation.weight(&instrument.id);
        assert!((current - target).abs() < 1e-9, "{}", instrument.id);
    }
    assert!(plan.actions.iter().all(|a| a.kind == ActionKind::Hold));
    assert!(plan.orders.is_empty());
}

#[test]
fn test_full_blend_takes_optimizer_output() {
    // One member per class, so class aggregates equal the member series.
    let snapshot = PortfolioSnapshot::new(vec![
        Instrument::new("BOVA11", AssetClass::Equities, 40_000.0, 300.0),
        Instrument::new("HGLG11", AssetClass::Reits, 25_000.0, 150.0),
        Instrument::new("TESOURO_IPCA", AssetClass::GovernmentBonds, 35_000.0, 10.0),
    ])
    .with_returns("BOVA11", daily_returns(11, 150, 0.0010, 0.025))
    .with_returns("HGLG11", daily_returns(12, 150, 0.0006, 0.012))
    .with_returns("TESOURO_IPCA", daily_returns(13, 150, 0.0004, 0.004));

    let engine = RebalanceEngine::new(&markowitz_config(1.0)).unwrap();
    let plan = engine.run(&snapshot, None).unwrap();
    assert!(!plan.is_degraded());

    let returns = snapshot.return_series().unwrap();
    let ids: Vec<String> = ["BOVA11", "HGLG11", "TESOURO_IPCA"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let estimates = returns.estimate(&ids, 252).unwrap();
    let settings = OptimizerSettings {
        risk_free_rate: 0.02,
        ..OptimizerSettings::with_blend(1.0)
    };
    let direct = MarkowitzOptimizer::new()
        .optimize(
            &OptimizationInput {
                expected_returns: &estimates.expected_returns,
                covariance: &estimates.covariance,
                current_weights: &[40_000.0, 25_000.0, 35_000.0],
                caps: None,
            },
            &settings,
        )
        .unwrap();
    let optimal = direct.optimal.unwrap();

    for (class, expected) in [
        AssetClass::Equities,
        AssetClass::Reits,
        AssetClass::GovernmentBonds,
    ]
    .into_iter()
    .zip(optimal)
    {
        let actual = plan.target_allocation.class_weight(class);
        assert!((actual - expected).abs() < 1e-9, "{class}: {actual} vs {expected}");
    }
}

#[test]
fn test_runs_are_idempotent() {
    let engine = RebalanceEngine::new(&markowitz_config(0.7)).unwrap();
    let snapshot = market_snapshot();

    let first = engine.run(&snapshot, Some(25_000.0)).unwrap();
    let second = engine.run(&snapshot, Some(25_000.0)).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_single_member_class_takes_whole_target() {
    let engine = RebalanceEngine::new(&markowitz_config(0.5)).unwrap();
    let plan = engine.run(&market_snapshot(), None).unwrap();

    for class in [AssetClass::Reits, AssetClass::GovernmentBonds] {
        let members = &plan.target_allocation.within_class[&class];
        assert_eq!(members.len(), 1);
        assert_eq!(members.values().copied().sum::<f64>(), 1.0);
    }
}

#[test]
fn test_flat_history_degrades_to_current_weights() {
    let snapshot = PortfolioSnapshot::new(vec![
        Instrument::new("BOVA11", AssetClass::Equities, 60_000.0, 500.0),
        Instrument::new("TESOURO_SELIC", AssetClass::GovernmentBonds, 40_000.0, 2.8),
    ])
    .with_returns("BOVA11", vec![0.001; 30])
    .with_returns("TESOURO_SELIC", vec![0.0005; 30]);

    let engine = RebalanceEngine::new(&markowitz_config(1.0)).unwrap();
    let plan = engine.run(&snapshot, None).unwrap();

    assert!(plan.is_degraded());
    assert_eq!(plan.degradations[0].scope, DegradationScope::ClassLevel);
    assert_eq!(plan.degradations[0].reason, SolverFailure::InsufficientVariance);
    assert!((plan.target_allocation.class_weight(AssetClass::Equities) - 0.6).abs() < 1e-9);
    assert!(plan.actions.iter().all(|a| a.kind == ActionKind::Hold));
}

#[test]
fn test_reserve_target_from_expenses() {
    let engine = RebalanceEngine::new(&static_config()).unwrap();
    let snapshot = balanced_snapshot().with_reserve(None, 9_000.0);
    let status = engine.reserve_status(&snapshot).unwrap();

    assert_eq!(status.target_value, 18_000.0);
    assert_eq!(status.gap, 9_000.0);
    assert_eq!(status.coverage_months, Some(3.0));
    assert!((status.pct_complete - 50.0).abs() < 1e-9);
}

#[test]
fn test_class_frontier() {
    let engine = RebalanceEngine::new(&markowitz_config(1.0)).unwrap();
    let frontier = engine.frontier(&market_snapshot(), 10).unwrap();

    assert!(frontier.degraded.is_none());
    assert_eq!(frontier.ids, vec!["equities", "reits", "government_bonds"]);
    assert!(frontier.points.len() >= 2);
    for pair in frontier.points.windows(2) {
        assert!(pair[0].volatility <= pair[1].volatility);
    }
    assert!(frontier.tangency().is_some());
}

#[test]
fn test_weight_caps_bound_blended_targets() {
    let mut config = markowitz_config(0.5);
    config
        .policy
        .weight_caps
        .insert("class:government_bonds".into(), 0.2);
    config.policy.weight_caps.insert("PETR4".into(), 0.15);

    let engine = RebalanceEngine::new(&config).unwrap();
    let plan = engine.run(&market_snapshot(), None).unwrap();
    let target = &plan.target_allocation;

    // Bonds hold 0.3 today, so the blend alone would overshoot the cap.
    assert!(target.class_weight(AssetClass::GovernmentBonds) <= 0.2 + 1e-9);
    assert!(target.weight("PETR4") <= 0.15 + 1e-9);
    let total: f64 = target.instruments.values().sum();
    assert!((total - 1.0).abs() < 1e-6);
}

#[test]
fn test_new_capital_dilutes_overweight_without_selling() {
    let snapshot = PortfolioSnapshot::new(vec![
        Instrument::new("BOVA11", AssetClass::Equities, 56_000.0, 560.0),
        Instrument::new("TESOURO_SELIC", AssetClass::GovernmentBonds, 44_000.0, 4.0),
    ])
    .with_reserve(Some(10_000.0), 10_000.0);

    let engine = RebalanceEngine::new(&static_config()).unwrap();
    let plan = engine.run(&snapshot, Some(20_000.0)).unwrap();

    let bova = plan
        .actions
        .iter()
        .find(|a| a.instrument_id == "BOVA11")
        .unwrap();
    assert_eq!(bova.kind, ActionKind::Sell);

    let capital = plan.capital_plan.as_ref().unwrap();
    assert!((capital.allocated_to("BOVA11") - 4_000.0).abs() < 1e-6);
    assert!(plan
        .orders
        .iter()
        .all(|o| !(o.instrument_id == "BOVA11" && o.side == ActionKind::Sell)));
}

// ============================================================================
// Input and configuration errors
// ============================================================================

#[test]
fn test_unreachable_caps_are_policy_violations() {
    // BOVA11 is the only equity, so a 0.3 cap cannot hold a 0.5 class.
    let mut config = static_config();
    config.policy.weight_caps.insert("BOVA11".into(), 0.3);
    let engine = RebalanceEngine::new(&config).unwrap();
    let err = engine.run(&balanced_snapshot(), None).unwrap_err();
    assert!(err.is_policy_violation());

    let mut config = static_config();
    config.policy.weight_caps.insert("class:equities".into(), 0.4);
    let engine = RebalanceEngine::new(&config).unwrap();
    let err = engine.run(&balanced_snapshot(), None).unwrap_err();
    assert!(err.is_policy_violation());
}

#[test]
fn test_snapshot_from_json() {
    let snapshot = PortfolioSnapshot::from_json(
        r#"{
            "as_of": "2026-03-31T21:00:00Z",
            "instruments": [
                { "id": "BOVA11", "asset_class": "ETF", "market_value": 65000.0, "quantity": 500 },
                { "id": "TESOURO_SELIC", "asset_class": "tesouro", "market_value": 35000.0, "quantity": 2.5 }
            ],
            "reserve": { "target_value": 18000.0, "current_value": 14000.0 }
        }"#,
    )
    .unwrap();

    let engine = RebalanceEngine::new(&static_config()).unwrap();
    let plan = engine.run(&snapshot, None).unwrap();
    assert_eq!(plan.as_of.to_rfc3339(), "2026-03-31T21:00:00+00:00");
    assert_eq!(plan.actions[0].instrument_id, "BOVA11");
    assert_eq!(plan.reserve.gap, 4_000.0);

    let json = serde_json::to_value(&plan).unwrap();
    assert_eq!(json["actions"][0]["kind"], "SELL");
    assert_eq!(json["target_allocation"]["classes"]["equities"], 0.5);
}

#[test]
fn test_missing_returns_is_data_error() {
    let engine = RebalanceEngine::new(&markowitz_config(0.5)).unwrap();
    let err = engine.run(&balanced_snapshot(), None).unwrap_err();
    assert!(err.is_data());
}

#[test]
fn test_negative_market_value_rejected() {
    let engine = RebalanceEngine::new(&static_config()).unwrap();
    let snapshot = PortfolioSnapshot::new(vec![
        Instrument::new("BOVA11", AssetClass::Equities, -1.0, 1.0),
        Instrument::new("TESOURO_SELIC", AssetClass::GovernmentBonds, 35_000.0, 2.5),
    ]);
    assert!(engine.run(&snapshot, None).unwrap_err().is_data());
}

#[test]
fn test_optimizer_without_blend_alpha_is_config_error() {
    let config = config(r#"{ "policy": { "rebalance_policy": "markowitz" } }"#);
    let err = RebalanceEngine::new(&config).err().unwrap();
    assert!(err.to_string().contains("blend_alpha"));
}

#[test]
fn test_config_file_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, serde_json::to_string(&static_config()).unwrap()).unwrap();

    let loaded = Config::load_from(&path).unwrap();
    let engine = RebalanceEngine::new(&loaded).unwrap();
    let plan = engine.run(&balanced_snapshot(), None).unwrap();
    assert_eq!(plan.actions[0].kind, ActionKind::Sell);
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn prop_static_targets_fully_invested(
        petr in 1.0f64..1e6,
        itub in 0.0f64..1e6,
        bonds in 1.0f64..1e6,
        equity_target in 0.05f64..0.95,
    ) {
        let mut engine_config = static_config();
        engine_config.policy.static_class_targets = BTreeMap::from([
            ("equities".to_string(), equity_target),
            ("government_bonds".to_string(), 1.0 - equity_target),
        ]);
        let engine = RebalanceEngine::new(&engine_config).unwrap();
        let snapshot = PortfolioSnapshot::new(vec![
            Instrument::new("PETR4", AssetClass::Equities, petr, 10.0),
            Instrument::new("ITUB4", AssetClass::Equities, itub, 10.0),
            Instrument::new("TESOURO_IPCA", AssetClass::GovernmentBonds, bonds, 1.0),
        ]);
        let plan = engine.run(&snapshot, None).unwrap();

        let total: f64 = plan.target_allocation.instruments.values().sum();
        prop_assert!((total - 1.0).abs() < 1e-6);
        prop_assert_eq!(plan.actions.len(), 3);
        for pair in plan.actions.windows(2) {
            prop_assert!(pair[0].deviation >= pair[1].deviation);
        }
        let traded: f64 = plan.actions.iter().map(|a| a.suggested_trade_value).sum();
        prop_assert!(traded.abs() < 1e-6 * plan.invested_value);
    }

    #[test]
    fn prop_capital_split_exact(capital in 0.0f64..1e7, reserve in 0.0f64..40_000.0) {
        let engine = RebalanceEngine::new(&static_config()).unwrap();
        let snapshot = balanced_snapshot().with_reserve(Some(18_000.0), reserve);
        let plan = engine.run(&snapshot, Some(capital)).unwrap();
        let split = plan.capital_plan.unwrap();
        prop_assert_eq!(split.to_reserve + split.to_investments, capital);
        prop_assert!(split.to_reserve <= plan.reserve.gap);
    }
}

#[test]
fn test_series_lengths_must_match() {
    let series = BTreeMap::from([
        ("A".to_string(), vec![0.01, 0.02]),
        ("B".to_string(), vec![0.01]),
    ]);
    assert!(ReturnSeries::new(series).unwrap_err().is_data());
}
