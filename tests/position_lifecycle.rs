//! End-to-end lifecycle checks through the public API: geometry, exit
//! ordering, ladder progression, and PnL accounting.

use ladderbot::engine::{pnl_pct, LadderConfig, PositionBuilder, PositionEvaluator};
use ladderbot::types::{Bar, ExitReason, PositionStatus, Side, Signal};

fn signal(side: Side) -> Signal {
    Signal {
        symbol: "BTCUSDT".to_string(),
        side,
        confidence: 0.004,
        strategy: "SmartTrendStrategy".to_string(),
    }
}

fn bar(high: f64, low: f64, close: f64, close_time: i64) -> Bar {
    Bar {
        open_time: close_time - 60_000,
        close_time,
        symbol: "BTCUSDT".to_string(),
        open: close,
        high,
        low,
        close,
        volume: 25.0,
    }
}

fn wide_ladder() -> LadderConfig {
    LadderConfig {
        tp_multipliers: [3.0, 5.0, 8.0],
        sl_multiplier: 1.5,
        ..LadderConfig::default()
    }
}

#[test]
fn ladder_geometry_for_long_entry() {
    let builder = PositionBuilder::new(wide_ladder());
    let position = builder
        .build(&signal(Side::Long), &bar(100.2, 99.8, 100.0, 60_000), 2.0)
        .unwrap();

    assert_eq!(position.target_levels, vec![106.0, 110.0, 116.0]);
    assert_eq!(position.stop_level, 97.0);
    assert_eq!(position.status, PositionStatus::Open);
    assert!(position.hit_levels.is_empty());
    assert!(!position.trailing.enabled);
}

#[test]
fn hard_stop_wins_over_first_target_in_same_bar() {
    let builder = PositionBuilder::new(wide_ladder());
    let evaluator = PositionEvaluator::new(wide_ladder());
    let position = builder
        .build(&signal(Side::Long), &bar(100.2, 99.8, 100.0, 60_000), 2.0)
        .unwrap();

    // The bar pierces both the 97 stop and the 106 first target. The stop
    // is evaluated first, so the position closes SL at the stop level.
    let evaluation = evaluator.evaluate(position, &bar(101.0, 95.0, 96.0, 120_000), None);
    let closed = evaluation.position;

    assert_eq!(closed.status, PositionStatus::Closed);
    assert_eq!(closed.exit_reason, Some(ExitReason::Sl));
    assert_eq!(closed.exit_price, Some(97.0));
    assert!(closed.hit_levels.is_empty());
    assert!(evaluation.partial_credits.is_empty());
}

#[test]
fn ladder_progression_partials_then_terminal_close() {
    let builder = PositionBuilder::new(wide_ladder());
    let evaluator = PositionEvaluator::new(wide_ladder());
    let position = builder
        .build(&signal(Side::Long), &bar(100.2, 99.8, 100.0, 60_000), 2.0)
        .unwrap();

    // Bar 1: high 107 clears the 106 rung. Partial, still open, trailing
    // not yet enabled with activation index 2.
    let e1 = evaluator.evaluate(position, &bar(107.0, 105.0, 106.5, 120_000), None);
    assert_eq!(e1.position.hit_levels, vec![0]);
    assert_eq!(e1.partial_credits.len(), 1);
    assert_eq!(e1.partial_credits[0].index, 0);
    assert!(e1.position.is_open());
    assert!(!e1.position.trailing.enabled);

    // Bar 2: high 111 clears the 110 rung and enables trailing. The low
    // stays above the fresh trailing level (111 - 1.0 ATR gap = 110) so
    // the position survives the same-call ratchet check.
    let e2 = evaluator.evaluate(e1.position, &bar(111.0, 110.2, 110.8, 180_000), None);
    assert_eq!(e2.position.hit_levels, vec![0, 1]);
    assert_eq!(e2.partial_credits.len(), 1);
    assert_eq!(e2.partial_credits[0].index, 1);
    assert!(e2.position.is_open());
    assert!(e2.position.trailing.enabled);

    // Bar 3: high 117 clears the terminal 116 rung and closes TP3 there.
    let e3 = evaluator.evaluate(e2.position, &bar(117.0, 114.5, 116.5, 240_000), None);
    let closed = e3.position;
    assert_eq!(closed.status, PositionStatus::Closed);
    assert_eq!(closed.exit_reason, Some(ExitReason::Tp3));
    assert_eq!(closed.exit_price, Some(116.0));
    assert_eq!(closed.hit_levels, vec![0, 1, 2]);
    let realized = closed.realized_pnl_pct.unwrap();
    assert!((realized - 16.0).abs() < 1e-9);
}

#[test]
fn hit_levels_grow_monotonically_and_partials_exclude_terminal() {
    let builder = PositionBuilder::new(wide_ladder());
    let evaluator = PositionEvaluator::new(wide_ladder());
    let mut position = builder
        .build(&signal(Side::Long), &bar(100.2, 99.8, 100.0, 60_000), 2.0)
        .unwrap();

    let bars = [
        bar(107.0, 105.0, 106.5, 120_000),
        bar(111.0, 110.2, 110.8, 180_000),
        bar(117.0, 114.5, 116.5, 240_000),
    ];
    let mut seen = Vec::new();
    for b in &bars {
        let evaluation = evaluator.evaluate(position, b, None);
        position = evaluation.position;
        assert!(position.hit_levels.len() >= seen.len());
        assert!(position.hit_levels.starts_with(&seen));
        seen = position.hit_levels.clone();
    }

    let unique: std::collections::HashSet<_> = position.hit_levels.iter().collect();
    assert_eq!(unique.len(), position.hit_levels.len(), "no rung hit twice");
    for index in &position.partial_credits_applied {
        assert!(position.hit_levels.contains(index));
        assert_ne!(*index, 2, "terminal rung never partial-credits");
    }
}

#[test]
fn trailing_level_only_ratchets_in_favor() {
    let ladder = LadderConfig {
        trailing_activation_index: 1,
        ..wide_ladder()
    };
    let builder = PositionBuilder::new(ladder.clone());
    let evaluator = PositionEvaluator::new(ladder);
    let position = builder
        .build(&signal(Side::Long), &bar(100.2, 99.8, 100.0, 60_000), 2.0)
        .unwrap();

    // Rung 0 enables trailing immediately with activation index 1.
    let e1 = evaluator.evaluate(position, &bar(107.0, 106.2, 106.8, 120_000), None);
    assert!(e1.position.trailing.enabled);
    let first_level = e1.position.trailing.level.unwrap();
    assert!((first_level - 106.0).abs() < 1e-9);

    // Higher extreme ratchets the level up.
    let e2 = evaluator.evaluate(e1.position, &bar(108.5, 107.8, 108.2, 180_000), None);
    let second_level = e2.position.trailing.level.unwrap();
    assert!(second_level > first_level);

    // A quieter bar must never loosen it.
    let e3 = evaluator.evaluate(e2.position, &bar(108.0, 107.6, 107.9, 240_000), None);
    assert_eq!(e3.position.trailing.level.unwrap(), second_level);
    assert!(e3.position.trailing.enabled);
}

#[test]
fn evaluate_on_closed_position_is_identity() {
    let builder = PositionBuilder::new(wide_ladder());
    let evaluator = PositionEvaluator::new(wide_ladder());
    let position = builder
        .build(&signal(Side::Long), &bar(100.2, 99.8, 100.0, 60_000), 2.0)
        .unwrap();

    let closed = evaluator
        .evaluate(position, &bar(101.0, 95.0, 96.0, 120_000), None)
        .position;
    assert_eq!(closed.status, PositionStatus::Closed);

    let again = evaluator.evaluate(closed.clone(), &bar(120.0, 90.0, 100.0, 180_000), Some(3.0));
    assert_eq!(again.position, closed);
    assert!(again.partial_credits.is_empty());
}

#[test]
fn pnl_signs_for_both_sides() {
    assert!((pnl_pct(100.0, 110.0, Side::Long, 1.0) - 10.0).abs() < 1e-9);
    assert!((pnl_pct(100.0, 90.0, Side::Short, 1.0) - 10.0).abs() < 1e-9);
    assert!((pnl_pct(100.0, 110.0, Side::Short, 1.0) + 10.0).abs() < 1e-9);
    assert!((pnl_pct(100.0, 110.0, Side::Long, 3.0) - 30.0).abs() < 1e-9);
}

#[test]
fn short_position_mirror_geometry_and_stop() {
    let builder = PositionBuilder::new(wide_ladder());
    let evaluator = PositionEvaluator::new(wide_ladder());
    let position = builder
        .build(&signal(Side::Short), &bar(100.2, 99.8, 100.0, 60_000), 2.0)
        .unwrap();

    assert_eq!(position.target_levels, vec![94.0, 90.0, 84.0]);
    assert_eq!(position.stop_level, 103.0);

    // Rally through the stop closes SL at 103.
    let closed = evaluator
        .evaluate(position, &bar(104.0, 101.0, 103.5, 120_000), None)
        .position;
    assert_eq!(closed.exit_reason, Some(ExitReason::Sl));
    assert_eq!(closed.exit_price, Some(103.0));
    assert!(closed.realized_pnl_pct.unwrap() < 0.0);
}
