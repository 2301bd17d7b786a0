//! Pipeline integration tests
//!
//! Drives single triggers through gate, search and dispatch with in-memory
//! chain, relay, signer and intelligence fakes.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use common::*;
use ethers::types::U256;
use vesper_dataplane::Chain;
use vesper_intelligence::gate::StaticIntelFeed;
use vesper_intelligence::{ChainContext, SkipReason, StrikeChannel, TriggerState};

#[tokio::test]
async fn test_confident_profitable_trigger_strikes_aggressively() {
    let harness = Harness::default();
    let config = test_config(Chain::Base);
    let context = harness.context(Chain::Base, &config, BULLISH_TEXT, false);
    load_triangle(context.graph());

    let outcome = context.pipeline().process(trigger(1)).await;

    assert_eq!(outcome.state, TriggerState::Submitted);
    assert!((outcome.confidence - 0.8).abs() < 1e-12);
    let signal = outcome.signal.as_ref().unwrap();
    assert_eq!(signal.path, vec!["a", "b", "c", "a"]);
    assert!((signal.margin - 0.0302).abs() < 1e-9);

    let receipt = outcome.receipt.as_ref().unwrap();
    assert_eq!(receipt.fee_tier, "aggressive");
    assert_eq!(receipt.channel, StrikeChannel::Public);
    assert_eq!(receipt.nonce, U256::from(7u64));
    assert!(receipt.tx_hash.is_some());
    assert_eq!(harness.chain.submissions(), 1);

    let signed = harness.signer.signed.lock();
    assert_eq!(signed.len(), 1);
    let tx = signed[0].as_eip1559_ref().unwrap();
    assert_eq!(tx.max_priority_fee_per_gas, Some(gwei(40)));
    assert_eq!(tx.max_fee_per_gas, Some(gwei(80)));
    assert_eq!(tx.gas, Some(U256::from(1_200_000u64)));

    let stats = context.stats().snapshot();
    assert_eq!(stats.received, 1);
    assert_eq!(stats.submitted, 1);
}

#[tokio::test]
async fn test_low_confidence_is_skipped_without_submission() {
    let harness = Harness::default();
    let config = test_config(Chain::Ethereum);
    let context = harness.context(Chain::Ethereum, &config, BEARISH_TEXT, true);
    load_triangle(context.graph());

    let outcome = context.pipeline().process(trigger(2)).await;

    assert!((outcome.confidence + 0.5).abs() < 1e-12);
    assert_eq!(outcome.state, TriggerState::Skipped(SkipReason::LowConfidence));
    assert!(outcome.receipt.is_none());
    assert_eq!(harness.chain.submissions(), 0);
    assert_eq!(harness.relay.submissions(), 0);
    assert!(harness.signer.signed.lock().is_empty());
    assert_eq!(context.stats().snapshot().skipped_confidence, 1);
}

#[tokio::test]
async fn test_empty_graph_is_unprofitable() {
    let harness = Harness::default();
    let config = test_config(Chain::Base);
    let context = harness.context(Chain::Base, &config, BULLISH_TEXT, false);

    let outcome = context.pipeline().process(trigger(3)).await;

    assert_eq!(outcome.state, TriggerState::Skipped(SkipReason::Unprofitable));
    assert_eq!(harness.chain.submissions(), 0);
}

#[tokio::test]
async fn test_gate_timeout_scores_neutral_and_still_finishes() {
    let harness = Harness::default();
    let mut config = test_config(Chain::Base);
    config.gate.timeout_ms = 20;
    let adapters = harness.adapters(
        Arc::new(ScriptedFeed::open(Vec::new())),
        Arc::new(SlowIntelFeed {
            delay: Duration::from_secs(5),
        }),
        false,
    );
    let context = ChainContext::assemble(Chain::Base, &config, adapters).unwrap();
    load_triangle(context.graph());

    let outcome = tokio::time::timeout(Duration::from_secs(2), context.pipeline().process(trigger(4)))
        .await
        .expect("trigger must not wait for the slow feed");

    assert_eq!(outcome.confidence, 0.0);
    assert!(outcome.state.is_terminal());
    // Neutral clears the default -0.1 threshold and bids conservatively
    assert_eq!(outcome.state, TriggerState::Submitted);
    assert_eq!(outcome.receipt.unwrap().fee_tier, "conservative");
    assert_eq!(context.stats().snapshot().gate_fallbacks, 1);
}

#[tokio::test]
async fn test_feed_error_scores_neutral() {
    let harness = Harness::default();
    let config = test_config(Chain::Base);
    let adapters = harness.adapters(Arc::new(ScriptedFeed::open(Vec::new())), Arc::new(FailingIntelFeed), false);
    let context = ChainContext::assemble(Chain::Base, &config, adapters).unwrap();

    let outcome = context.pipeline().process(trigger(5)).await;

    assert_eq!(outcome.confidence, 0.0);
    assert_eq!(context.stats().snapshot().gate_fallbacks, 1);
}

#[tokio::test]
async fn test_ethereum_goes_through_relay() {
    let harness = Harness::default();
    let config = test_config(Chain::Ethereum);
    let context = harness.context(Chain::Ethereum, &config, BULLISH_TEXT, true);
    load_triangle(context.graph());

    let outcome = context.pipeline().process(trigger(6)).await;

    assert_eq!(outcome.state, TriggerState::Submitted);
    let receipt = outcome.receipt.unwrap();
    assert_eq!(
        receipt.channel,
        StrikeChannel::PrivateRelay {
            target_block: harness.chain.block + 1
        }
    );
    assert!(receipt.bundle_hash.is_some());
    assert_eq!(harness.chain.submissions(), 0);

    let bundles = harness.relay.bundles.lock();
    assert_eq!(bundles.len(), 1);
    assert_eq!(bundles[0].0.len(), 1);
    assert_eq!(bundles[0].1, 19_000_001);
}

#[tokio::test]
async fn test_relay_ignored_on_base() {
    let harness = Harness::default();
    let config = test_config(Chain::Base);
    let context = harness.context(Chain::Base, &config, BULLISH_TEXT, true);
    load_triangle(context.graph());

    let outcome = context.pipeline().process(trigger(7)).await;

    assert_eq!(outcome.receipt.unwrap().channel, StrikeChannel::Public);
    assert_eq!(harness.relay.submissions(), 0);
    assert_eq!(harness.chain.submissions(), 1);
}

#[tokio::test]
async fn test_dry_run_never_submits() {
    let harness = Harness::default();
    let mut config = test_config(Chain::Base);
    config.global.dry_run = true;
    let context = harness.context(Chain::Base, &config, BULLISH_TEXT, false);
    load_triangle(context.graph());

    let outcome = context.pipeline().process(trigger(8)).await;

    assert_eq!(outcome.state, TriggerState::Skipped(SkipReason::DryRun));
    assert!(outcome.signal.unwrap().profitable);
    assert_eq!(harness.chain.submissions(), 0);
    assert!(harness.signer.signed.lock().is_empty());
    assert_eq!(harness.chain.nonce_reads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_failed_submission_is_terminal_and_resyncs_nonce() {
    let harness = Harness::default();
    harness.chain.fail_submit.store(true, Ordering::SeqCst);
    let config = test_config(Chain::Base);
    let context = harness.context(Chain::Base, &config, BULLISH_TEXT, false);
    load_triangle(context.graph());

    let failed = context.pipeline().process(trigger(9)).await;
    assert_eq!(failed.state, TriggerState::Failed);
    assert!(failed.error.is_some());
    assert_eq!(harness.chain.submissions(), 0);

    harness.chain.fail_submit.store(false, Ordering::SeqCst);
    let retried = context.pipeline().process(trigger(10)).await;
    assert_eq!(retried.state, TriggerState::Submitted);
    // The failed attempt dropped the cached nonce
    assert_eq!(retried.receipt.unwrap().nonce, U256::from(7u64));
    assert_eq!(harness.chain.nonce_reads.load(Ordering::SeqCst), 2);

    let stats = context.stats().snapshot();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.submitted, 1);
}

#[tokio::test]
async fn test_simultaneous_triggers_both_finish_with_distinct_nonces() {
    let harness = Harness::default();
    let config = test_config(Chain::Base);
    let context = harness.context(Chain::Base, &config, BULLISH_TEXT, false);
    load_triangle(context.graph());

    let pipeline = context.pipeline().clone();
    let (first, second) = tokio::join!(pipeline.process(trigger(11)), pipeline.process(trigger(12)));

    assert!(first.state.is_terminal());
    assert!(second.state.is_terminal());
    let mut nonces = vec![first.receipt.unwrap().nonce, second.receipt.unwrap().nonce];
    nonces.sort();
    assert_eq!(nonces, vec![U256::from(7u64), U256::from(8u64)]);
    assert_eq!(harness.chain.submissions(), 2);
    assert_eq!(harness.chain.nonce_reads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_graph_updates_do_not_disturb_an_in_flight_snapshot() {
    let harness = Harness::default();
    let config = test_config(Chain::Base);
    let context = harness.context(Chain::Base, &config, BULLISH_TEXT, false);
    load_triangle(context.graph());

    let before = context.graph().snapshot();
    context
        .graph()
        .upsert_edge("c", "a", 0.5, chrono::Utc::now())
        .unwrap();

    // The old snapshot still holds the profitable cycle
    assert_eq!(before.edge("c", "a").unwrap().weight, 1.0);
    let outcome = context.pipeline().process(trigger(13)).await;
    assert_eq!(outcome.state, TriggerState::Skipped(SkipReason::Unprofitable));
}

#[tokio::test]
async fn test_static_feed_scores_are_deterministic() {
    let harness = Harness::default();
    let config = test_config(Chain::Base);
    let adapters = harness.adapters(
        Arc::new(ScriptedFeed::open(Vec::new())),
        Arc::new(StaticIntelFeed::new("not good, not bad")),
        false,
    );
    let context = ChainContext::assemble(Chain::Base, &config, adapters).unwrap();

    let first = context.pipeline().process(trigger(14)).await;
    let second = context.pipeline().process(trigger(15)).await;
    assert_eq!(first.confidence, second.confidence);
    assert_eq!(first.confidence, 0.0);
}

#[tokio::test]
async fn test_search_deadline_bounds_a_slow_gate() {
    let harness = Harness::default();
    let mut config = test_config(Chain::Base);
    config.gate.timeout_ms = 10_000;
    config.search.deadline_ms = 30;
    let adapters = harness.adapters(
        Arc::new(ScriptedFeed::open(Vec::new())),
        Arc::new(SlowIntelFeed {
            delay: Duration::from_secs(5),
        }),
        false,
    );
    let context = ChainContext::assemble(Chain::Base, &config, adapters).unwrap();
    load_triangle(context.graph());

    let started = std::time::Instant::now();
    let outcome = context.pipeline().process(trigger(16)).await;

    assert!(started.elapsed() < Duration::from_secs(1), "scoring took {:?}", started.elapsed());
    assert_eq!(outcome.confidence, 0.0);
    assert_eq!(outcome.state, TriggerState::Submitted);
    assert_eq!(context.stats().snapshot().gate_fallbacks, 1);
}

#[tokio::test]
async fn test_triangle_found_at_three_hops() {
    let harness = Harness::default();
    let mut config = test_config(Chain::Base);
    config.search.max_hops = 3;
    let context = harness.context(Chain::Base, &config, BULLISH_TEXT, false);
    load_triangle(context.graph());

    let outcome = context.pipeline().process(trigger(17)).await;
    assert_eq!(outcome.state, TriggerState::Submitted);
    assert_eq!(outcome.signal.unwrap().path, vec!["a", "b", "c", "a"]);

    let mut config = test_config(Chain::Base);
    config.search.max_hops = 2;
    let context = harness.context(Chain::Base, &config, BULLISH_TEXT, false);
    load_triangle(context.graph());
    let outcome = context.pipeline().process(trigger(18)).await;
    assert_eq!(outcome.state, TriggerState::Skipped(SkipReason::Unprofitable));
}
