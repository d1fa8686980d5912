//! Fan-out of many urgent positions through one token bucket.

mod common;

use algo_trade_exits::{ExitEngineConfig, Frequency, MonitorConfig, StrategyParams};
use common::{engine, open_position, MockExchange};
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

const POSITIONS: usize = 200;
const PER_MINUTE: u32 = 100;
const BURST: u32 = 100;

#[tokio::test(start_paused = true)]
async fn test_urgent_fan_out_stays_within_bucket() {
    let exchange = Arc::new(MockExchange::rate_limited(
        PER_MINUTE,
        BURST,
        Duration::ZERO,
    ));
    // Every position sits just above its 0.35 stop-loss price, far from the
    // trailing stop and profit target.
    let params = StrategyParams {
        stop_loss_pct: dec!(0.30),
        trailing_stop_distance: dec!(0.50),
        partial_exits: vec![],
        ..StrategyParams::default()
    };
    let config = ExitEngineConfig {
        monitor: MonitorConfig {
            max_concurrent_ticks: 10,
            ..MonitorConfig::default()
        },
        ..ExitEngineConfig::default()
    };
    let engine = engine(&exchange, params.clone(), config, None);
    let handle = engine.start();

    for i in 0..POSITIONS {
        let market = format!("KX-{i:03}");
        exchange.set_quote(&market, dec!(0.355), dec!(0.365));
        handle
            .track(open_position(&format!("p{i:03}"), &market, &params, 10, dec!(0.50)))
            .await
            .unwrap();
    }

    sleep(Duration::from_secs(600)).await;

    // No rolling minute admits more than the burst plus one minute of refill.
    let calls = exchange.quote_calls();
    let window = Duration::from_secs(60);
    let ceiling = (BURST + PER_MINUTE) as usize;
    for (i, (start, _)) in calls.iter().enumerate() {
        let in_window = calls[i..]
            .iter()
            .take_while(|(at, _)| *at < *start + window)
            .count();
        assert!(
            in_window <= ceiling,
            "{in_window} calls in the minute after call {i}"
        );
    }

    // Everyone was served at least once despite the shortage.
    assert_eq!(exchange.fetched_markets().len(), POSITIONS);

    let snapshots = handle.monitor().snapshot().await.unwrap();
    assert_eq!(snapshots.len(), POSITIONS);
    assert!(snapshots.iter().all(|s| s.frequency == Frequency::Urgent));
    assert!(exchange.placed().is_empty());

    handle.shutdown().await.unwrap();
}
