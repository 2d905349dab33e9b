//! Opportunity engine for multi-chain flash-loan arbitrage
//!
//! The hot path of a DEX arbitrage system: concurrent per-chain scanners
//! walk a routing graph of (chain, token) nodes, quote candidate loops
//! across v2/v3/stable pools, size flash loans against live liquidity,
//! screen everything through a TWAP manipulation filter and a circuit
//! breaker, and hand signed-ready intents to a downstream executor over
//! an at-most-once dispatch bus with a file-spool fallback.
//!
//! The crate is a library: the embedding service builds an
//! [`EngineConfig`], injects its collaborators through [`EngineDeps`],
//! and drives an [`EngineSupervisor`].

pub mod bus;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod gas;
pub mod graph;
pub mod intent;
pub mod oracle;
pub mod profit;
pub mod quoter;
pub mod safety;
pub mod scanner;
pub mod sizer;
pub mod stats;
pub mod supervisor;
pub mod twap;
pub mod types;

pub use bus::{ChannelPublisher, EmitOutcome, IntentBus, IntentPublisher};
pub use config::{ChainConfig, EngineConfig, TierAssignment, TierSchedule};
pub use error::{BusError, EngineError, PriceError, QuoteError, RejectReason, SizerError};
pub use fingerprint::Fingerprint;
pub use gas::{GasForecast, GasForecaster, GasTrend};
pub use graph::{BridgeLink, GraphSnapshot, PoolRate, RoutingGraph};
pub use intent::ExecutionIntent;
pub use oracle::{PriceOracle, UsdPricer};
pub use profit::{ProfitConfig, ProfitEngine, ProfitReport};
pub use quoter::{BridgeInfo, DexQuoter, QuoterConfig, RouteQuoter};
pub use safety::{AdmitDecision, CircuitState, SafetyGate};
pub use scanner::{OpportunityScanner, ScannerState};
pub use sizer::{LoanSizer, SizerConfig};
pub use stats::{EngineStats, StatsSnapshot};
pub use supervisor::{EngineDeps, EngineSupervisor};
pub use twap::TwapAccumulator;
pub use types::{
    ChainId, Clock, ExecutionFeedback, ExecutionOutcome, Opportunity, PoolEntry, Protocol,
    Quote, QuotedRoute, Route, RouteHop, SystemClock, TokenId, TokenRegistry, TokenVariant,
};
