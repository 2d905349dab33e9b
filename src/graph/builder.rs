//! Routing graph construction with copy-on-write refresh epochs
//!
//! The graph is read-mostly: scanners hold an `Arc<GraphSnapshot>` for the
//! duration of a tick while refreshes build a fresh snapshot and swap it in.
//! Edge versions increase monotonically across refreshes.

use alloy::primitives::Address;
use parking_lot::RwLock;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{trace, warn};

use super::types::{EdgeData, NodeKey};
use crate::types::{ChainId, HopExtra, HopKind, PoolEntry, PoolMeta, Protocol, TokenId, TokenRegistry};

/// Sanity range for effective prices on an edge
const MIN_EDGE_PRICE: f64 = 1e-10;
const MAX_EDGE_PRICE: f64 = 1e10;

/// Observed pool pricing for one refresh epoch
#[derive(Debug, Clone)]
pub struct PoolRate {
    pub pool: PoolEntry,
    /// Effective price token0 -> token1, after fees
    pub price_0_to_1: f64,
    /// Effective price token1 -> token0, after fees
    pub price_1_to_0: f64,
    /// Normalized liquidity (USD-ish scale)
    pub liquidity: f64,
    /// False when TWAP volatility flags the pair
    pub twap_ok: bool,
}

/// Bridge connectivity for one refresh epoch
#[derive(Debug, Clone)]
pub struct BridgeLink {
    pub bridge: Address,
    pub from: NodeKey,
    pub to: NodeKey,
    /// Transfer keeps the token: price is 1 minus the proportional fee
    pub fee_bps: u32,
    pub liquidity: f64,
}

/// One immutable graph epoch
pub struct GraphSnapshot {
    pub graph: DiGraph<NodeKey, EdgeData>,
    index: HashMap<NodeKey, NodeIndex>,
    pub epoch: u64,
}

impl GraphSnapshot {
    fn empty() -> Self {
        Self {
            graph: DiGraph::new(),
            index: HashMap::new(),
            epoch: 0,
        }
    }

    pub fn node(&self, key: &NodeKey) -> Option<NodeIndex> {
        self.index.get(key).copied()
    }

    /// All nodes for a token on a chain (any variant)
    pub fn nodes_for_token(&self, chain_id: ChainId, token: TokenId) -> Vec<NodeIndex> {
        self.index
            .iter()
            .filter(|(k, _)| k.chain_id == chain_id && k.token == token)
            .map(|(_, idx)| *idx)
            .collect()
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Smallest per-venue liquidity along a route (0 when a venue is unknown)
    pub fn route_min_liquidity(&self, route: &crate::types::Route) -> f64 {
        let mut min = f64::MAX;
        for hop in route.hops() {
            let venue_liq = self
                .graph
                .edge_weights()
                .filter(|e| e.venue == hop.pool_or_bridge)
                .map(|e| e.liquidity)
                .fold(f64::MAX, f64::min);
            min = min.min(venue_liq);
        }
        if min == f64::MAX {
            0.0
        } else {
            min
        }
    }
}

/// Shared routing graph with copy-on-write refresh
pub struct RoutingGraph {
    snapshot: RwLock<Arc<GraphSnapshot>>,
    registry: Arc<TokenRegistry>,
    epoch: AtomicU64,
    version: AtomicU64,
}

impl RoutingGraph {
    pub fn new(registry: Arc<TokenRegistry>) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(GraphSnapshot::empty())),
            registry,
            epoch: AtomicU64::new(0),
            version: AtomicU64::new(0),
        }
    }

    /// Current snapshot; cheap clone, stable for the caller's lifetime
    pub fn snapshot(&self) -> Arc<GraphSnapshot> {
        self.snapshot.read().clone()
    }

    /// Build and swap in a fresh snapshot from observed pool rates
    pub fn refresh(&self, rates: &[PoolRate], bridges: &[BridgeLink]) -> Arc<GraphSnapshot> {
        let epoch = self.epoch.fetch_add(1, Ordering::Relaxed) + 1;
        let version = self.version.fetch_add(1, Ordering::Relaxed) + 1;

        let mut graph = DiGraph::new();
        let mut index: HashMap<NodeKey, NodeIndex> = HashMap::new();

        let mut node_of = |graph: &mut DiGraph<NodeKey, EdgeData>,
                           index: &mut HashMap<NodeKey, NodeIndex>,
                           key: NodeKey| {
            *index.entry(key).or_insert_with(|| graph.add_node(key))
        };

        for rate in rates {
            let pool = &rate.pool;
            let Some((token0, variant0)) = self.registry.resolve(pool.chain_id, pool.token0)
            else {
                warn!(pool = %pool.address, "skipping pool: token0 not in registry");
                continue;
            };
            let Some((token1, variant1)) = self.registry.resolve(pool.chain_id, pool.token1)
            else {
                warn!(pool = %pool.address, "skipping pool: token1 not in registry");
                continue;
            };

            let key0 = NodeKey {
                chain_id: pool.chain_id,
                token: token0,
                variant: variant0,
            };
            let key1 = NodeKey {
                chain_id: pool.chain_id,
                token: token1,
                variant: variant1,
            };
            // No self-loops, ever
            if key0 == key1 {
                warn!(pool = %pool.address, "skipping pool: would create a self-loop");
                continue;
            }

            let extra = match pool.meta {
                PoolMeta::V3 { fee_tier } => HopExtra::V3 { fee_tier },
                PoolMeta::Stable { index0, index1, .. } => HopExtra::Stable {
                    i: index0,
                    j: index1,
                },
                PoolMeta::V2 => HopExtra::None {},
            };
            let extra_rev = match pool.meta {
                PoolMeta::Stable { index0, index1, .. } => HopExtra::Stable {
                    i: index1,
                    j: index0,
                },
                _ => extra,
            };

            let n0 = node_of(&mut graph, &mut index, key0);
            let n1 = node_of(&mut graph, &mut index, key1);

            if price_in_range(rate.price_0_to_1) {
                graph.add_edge(
                    n0,
                    n1,
                    EdgeData::new(
                        pool.address,
                        HopKind::Swap(pool.protocol),
                        pool.fee_bps,
                        rate.price_0_to_1,
                        rate.liquidity,
                        version,
                        rate.twap_ok,
                        extra,
                    ),
                );
            } else {
                trace!(pool = %pool.address, price = rate.price_0_to_1, "edge price out of range");
            }
            if price_in_range(rate.price_1_to_0) {
                graph.add_edge(
                    n1,
                    n0,
                    EdgeData::new(
                        pool.address,
                        HopKind::Swap(pool.protocol),
                        pool.fee_bps,
                        rate.price_1_to_0,
                        rate.liquidity,
                        version,
                        rate.twap_ok,
                        extra_rev,
                    ),
                );
            }
        }

        for link in bridges {
            if link.from == link.to {
                continue;
            }
            let n_from = node_of(&mut graph, &mut index, link.from);
            let n_to = node_of(&mut graph, &mut index, link.to);
            let price = 1.0 - link.fee_bps as f64 / 10_000.0;
            graph.add_edge(
                n_from,
                n_to,
                EdgeData::new(
                    link.bridge,
                    HopKind::Bridge,
                    link.fee_bps,
                    price,
                    link.liquidity,
                    version,
                    true,
                    HopExtra::None {},
                ),
            );
        }

        let fresh = Arc::new(GraphSnapshot {
            graph,
            index,
            epoch,
        });
        *self.snapshot.write() = fresh.clone();
        fresh
    }

    pub fn registry(&self) -> &Arc<TokenRegistry> {
        &self.registry
    }

    /// Build a PoolRate from v2 reserves, applying the decimal adjustment
    pub fn v2_rate(
        pool: &PoolEntry,
        reserve0: f64,
        reserve1: f64,
        decimals0: u8,
        decimals1: u8,
        liquidity_usd: f64,
        twap_ok: bool,
    ) -> PoolRate {
        let fee = 1.0 - pool.fee_bps as f64 / 10_000.0;
        let adj = 10_f64.powi(decimals0 as i32 - decimals1 as i32);
        let raw = if reserve0 > 0.0 { reserve1 / reserve0 } else { 0.0 };
        let price_0_to_1 = raw * adj * fee;
        let price_1_to_0 = if price_0_to_1 > 0.0 {
            (1.0 / (raw * adj)) * fee
        } else {
            0.0
        };
        PoolRate {
            pool: pool.clone(),
            price_0_to_1,
            price_1_to_0,
            liquidity: liquidity_usd,
            twap_ok,
        }
    }
}

fn price_in_range(price: f64) -> bool {
    price.is_finite() && price > MIN_EDGE_PRICE && price < MAX_EDGE_PRICE
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TokenDeployment, TokenVariant};
    use alloy::primitives::address;

    const USDC: Address = address!("0000000000000000000000000000000000000010");
    const WMATIC: Address = address!("0000000000000000000000000000000000000020");
    const POOL: Address = address!("00000000000000000000000000000000000000d1");

    fn registry() -> Arc<TokenRegistry> {
        Arc::new(TokenRegistry::new(vec![
            TokenDeployment {
                token: TokenId(0),
                chain_id: 137,
                variant: TokenVariant::Bridged,
                address: USDC,
                decimals: 6,
                symbol: "USDC".into(),
            },
            TokenDeployment {
                token: TokenId(1),
                chain_id: 137,
                variant: TokenVariant::Wrapped,
                address: WMATIC,
                decimals: 18,
                symbol: "WMATIC".into(),
            },
        ]))
    }

    fn pool() -> PoolEntry {
        PoolEntry::new(137, Protocol::V2, POOL, USDC, WMATIC, 30, PoolMeta::V2)
    }

    #[test]
    fn refresh_builds_bidirectional_edges() {
        let g = RoutingGraph::new(registry());
        let rate = PoolRate {
            pool: pool(),
            price_0_to_1: 2.0,
            price_1_to_0: 0.5,
            liquidity: 1_000_000.0,
            twap_ok: true,
        };
        let snap = g.refresh(&[rate], &[]);
        assert_eq!(snap.node_count(), 2);
        assert_eq!(snap.edge_count(), 2);
        assert_eq!(snap.epoch, 1);
    }

    #[test]
    fn versions_increase_across_refreshes() {
        let g = RoutingGraph::new(registry());
        let rate = PoolRate {
            pool: pool(),
            price_0_to_1: 2.0,
            price_1_to_0: 0.5,
            liquidity: 1.0,
            twap_ok: true,
        };
        let s1 = g.refresh(std::slice::from_ref(&rate), &[]);
        let s2 = g.refresh(&[rate], &[]);
        let v1 = s1.graph.edge_weights().next().unwrap().version;
        let v2 = s2.graph.edge_weights().next().unwrap().version;
        assert!(v2 > v1);
    }

    #[test]
    fn unknown_tokens_are_skipped() {
        let g = RoutingGraph::new(registry());
        let stranger = PoolEntry::new(
            137,
            Protocol::V2,
            POOL,
            USDC,
            address!("00000000000000000000000000000000000000ff"),
            30,
            PoolMeta::V2,
        );
        let snap = g.refresh(
            &[PoolRate {
                pool: stranger,
                price_0_to_1: 1.0,
                price_1_to_0: 1.0,
                liquidity: 1.0,
                twap_ok: true,
            }],
            &[],
        );
        assert_eq!(snap.edge_count(), 0);
    }

    #[test]
    fn out_of_range_prices_are_dropped() {
        let g = RoutingGraph::new(registry());
        let snap = g.refresh(
            &[PoolRate {
                pool: pool(),
                price_0_to_1: f64::INFINITY,
                price_1_to_0: 0.0,
                liquidity: 1.0,
                twap_ok: true,
            }],
            &[],
        );
        assert_eq!(snap.edge_count(), 0);
    }

    #[test]
    fn v2_rate_decimal_adjustment() {
        // Raw reserves: 1,000,000 USDC (6 dec) vs 2,000,000 WMATIC (18 dec)
        let r = RoutingGraph::v2_rate(&pool(), 1e12, 2e24, 6, 18, 3_000_000.0, true);
        assert!((r.price_0_to_1 - 2.0 * 0.997).abs() < 1e-9);
        assert!((r.price_1_to_0 - 0.5 * 0.997).abs() < 1e-9);
    }
}
