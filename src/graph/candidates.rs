//! Candidate closed-loop enumeration over the routing graph
//!
//! Loops start and end at a base token: 2-3 hops on one chain, up to 4
//! when the path crosses a bridge (at most one bridge out and one back).
//! Candidates come out in decreasing estimated-profitability order with
//! ties broken by fewer hops, then higher aggregate liquidity, then lower
//! estimated gas.

use petgraph::graph::{EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use tracing::trace;

use super::builder::GraphSnapshot;
use super::types::NodeKey;
use crate::types::{
    ChainId, Route, RouteHop, TokenId, TokenRef, TokenRegistry, MAX_HOPS_CROSS_CHAIN,
    MAX_HOPS_SAME_CHAIN,
};

/// A discovered loop before conversion into a Route
#[derive(Debug, Clone)]
struct RawCycle {
    edges: Vec<EdgeIndex>,
    /// Product of edge prices: > 1 means the loop looks profitable pre-cost
    expected_return: f64,
    min_liquidity: f64,
    gas_units: u64,
}

impl GraphSnapshot {
    /// Enumerate candidate loops for `base_token` on `chain_id`
    ///
    /// Returns at most `max_candidates` routes, best first.
    pub fn candidates(
        &self,
        chain_id: ChainId,
        base_token: TokenId,
        registry: &TokenRegistry,
        max_candidates: usize,
    ) -> Vec<Route> {
        let mut cycles: Vec<RawCycle> = Vec::new();

        for start in self.nodes_for_token(chain_id, base_token) {
            self.collect_cycles(start, chain_id, &mut cycles);
        }

        // Best first: higher return, then fewer hops, more liquidity, less gas
        cycles.sort_by(|a, b| {
            b.expected_return
                .partial_cmp(&a.expected_return)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.edges.len().cmp(&b.edges.len()))
                .then(
                    b.min_liquidity
                        .partial_cmp(&a.min_liquidity)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
                .then(a.gas_units.cmp(&b.gas_units))
        });

        cycles
            .into_iter()
            .filter_map(|c| self.to_route(&c, registry))
            .take(max_candidates)
            .collect()
    }

    fn collect_cycles(&self, start: NodeIndex, home_chain: ChainId, out: &mut Vec<RawCycle>) {
        // Iterative DFS over partial paths; depth is bounded by the hop caps
        struct Frame {
            at: NodeIndex,
            edges: Vec<EdgeIndex>,
            visited: Vec<NodeIndex>,
            bridges_out: u8,
            bridges_back: u8,
            return_product: f64,
            min_liquidity: f64,
            gas_units: u64,
        }

        let mut stack = vec![Frame {
            at: start,
            edges: Vec::new(),
            visited: vec![start],
            bridges_out: 0,
            bridges_back: 0,
            return_product: 1.0,
            min_liquidity: f64::MAX,
            gas_units: 0,
        }];

        while let Some(frame) = stack.pop() {
            let has_bridge = frame.bridges_out > 0;
            let max_hops = if has_bridge {
                MAX_HOPS_CROSS_CHAIN
            } else {
                MAX_HOPS_SAME_CHAIN
            };

            for edge in self.graph.edges(frame.at) {
                let data = edge.weight();
                if !data.twap_ok {
                    continue;
                }
                // Never reuse a venue within one loop
                if frame
                    .edges
                    .iter()
                    .any(|e| self.graph[*e].venue == data.venue)
                {
                    continue;
                }

                let target = edge.target();
                let target_key = self.graph[target];
                let at_key = self.graph[frame.at];

                let (bridges_out, bridges_back) = if data.is_bridge() {
                    if at_key.chain_id == home_chain {
                        if frame.bridges_out > 0 {
                            continue; // one bridge out only
                        }
                        (frame.bridges_out + 1, frame.bridges_back)
                    } else {
                        if frame.bridges_back > 0 || target_key.chain_id != home_chain {
                            continue; // one bridge back, straight home
                        }
                        (frame.bridges_out, frame.bridges_back + 1)
                    }
                } else {
                    (frame.bridges_out, frame.bridges_back)
                };

                let hop_count = frame.edges.len() + 1;
                let crossing = bridges_out > 0;
                let cap = if crossing {
                    MAX_HOPS_CROSS_CHAIN
                } else {
                    max_hops
                };
                if hop_count > cap {
                    continue;
                }

                let return_product = frame.return_product * data.price;
                let min_liquidity = frame.min_liquidity.min(data.liquidity);
                let gas_units = frame.gas_units + data.gas_units();

                if target == start {
                    if hop_count >= 2 && bridges_out == bridges_back {
                        let mut edges = frame.edges.clone();
                        edges.push(edge.id());
                        out.push(RawCycle {
                            edges,
                            expected_return: return_product,
                            min_liquidity,
                            gas_units,
                        });
                    }
                    continue;
                }

                // Intermediate nodes must be unique
                if frame.visited.contains(&target) {
                    continue;
                }
                if hop_count >= cap {
                    continue; // no room left to close the loop
                }

                let mut edges = frame.edges.clone();
                edges.push(edge.id());
                let mut visited = frame.visited.clone();
                visited.push(target);
                stack.push(Frame {
                    at: target,
                    edges,
                    visited,
                    bridges_out,
                    bridges_back,
                    return_product,
                    min_liquidity,
                    gas_units,
                });
            }
        }
    }

    fn to_route(&self, cycle: &RawCycle, registry: &TokenRegistry) -> Option<Route> {
        let mut hops = Vec::with_capacity(cycle.edges.len());
        for edge_idx in &cycle.edges {
            let (from, to) = self.graph.edge_endpoints(*edge_idx)?;
            let data = &self.graph[*edge_idx];
            let token_in = node_token_ref(&self.graph[from], registry)?;
            let token_out = node_token_ref(&self.graph[to], registry)?;
            hops.push(RouteHop {
                pool_or_bridge: data.venue,
                kind: data.kind,
                token_in,
                token_out,
                extra: data.extra,
            });
        }
        match Route::new(hops) {
            Ok(route) => Some(route),
            Err(e) => {
                trace!(error = %e, "discarding malformed cycle");
                None
            }
        }
    }
}

fn node_token_ref(key: &NodeKey, registry: &TokenRegistry) -> Option<TokenRef> {
    registry.token_ref(key.token, key.chain_id, key.variant)
}
