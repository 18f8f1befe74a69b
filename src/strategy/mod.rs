//! Strategy module for trade decision making
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Session (one task)                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  cancel open orders → wait for open                         │
//! │       │                                                     │
//! │       ▼  every tick                                         │
//! │  clock near close? ──yes──▶ on_wind_down → sleep → restart  │
//! │       │ no                                                  │
//! │       ▼                                                     │
//! │  SessionStrategy.on_tick()                                  │
//! │    - fans out per-symbol gateway calls with join_all        │
//! │    - joins before the next phase                            │
//! │       │                                                     │
//! │       ▼                                                     │
//! │  TelemetrySink (equity curve, snapshot, event log)          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`SessionStrategy`]: Trait for strategies driven by a [`Session`]
//! - [`LongShort`]: Quartile long-short equity rebalancer
//! - [`MeanReversion`]: Single-symbol running-average strategy
//! - [`TelemetrySink`]: Observer for events and the equity curve
//! - [`CycleContext`]: Per-cycle state shared by the rebalance phases

mod batch;
mod long_short;
mod mean_reversion;
mod ranking;
mod reconcile;
mod session;
mod telemetry;
mod traits;
mod types;

pub use batch::{
    adjusted_quantity, cancel_open_orders, close_positions, reorder, send_batch,
    submit_limit_order, submit_order,
};

pub use long_short::LongShort;

pub use mean_reversion::{decide, Decision, MarketState, MeanReversion};

pub use ranking::{
    aggregate_price, bucket_quantity, fetch_equity, latest_close, percent_change, rank,
    size_buckets, split_buckets,
};

pub use reconcile::{classify, reconcile_positions, PositionAction, ReconcileSummary};

pub use session::{
    liquidate_all, MarketPhase, Session, SessionTiming, SessionWindow, TickOutcome,
};

pub use telemetry::{InMemoryTelemetry, LogTelemetry, Snapshot, TelemetrySink};

pub use traits::SessionStrategy;

pub use types::{
    BatchResult, Bucket, BucketSizing, CycleContext, CycleReport, TargetSets,
    Universe, UniverseEntry,
};
