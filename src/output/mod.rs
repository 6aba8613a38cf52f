//! Output module for crawl statistics
//!
//! This module handles:
//! - Collecting per-domain and per-route dispatch counters
//! - Snapshotting them for `get_stats`
//! - Rendering a final report

pub mod stats;

pub use stats::{print_statistics, CrawlStats, DomainStats, RecentError, RouteStats, StatsCollector};

use crate::routes::RouteSnapshot;

/// Prints the route health table
pub fn print_route_health(routes: &[RouteSnapshot]) {
    if routes.is_empty() {
        println!("No egress routes configured (direct dispatch).");
        return;
    }

    println!("=== Route Health ===\n");
    println!(
        "  {:<16} {:>7} {:>7} {:>7} {:>9} {:>6}  {}",
        "route", "ok", "fail", "403/429", "avg ms", "score", "state"
    );
    for route in routes {
        println!(
            "  {:<16} {:>7} {:>7} {:>7} {:>9.0} {:>6.1}  {}",
            route.id,
            route.success_count,
            route.failure_count,
            route.policy_blocks,
            route.avg_latency_ms,
            route.score,
            if route.blacklisted { "blacklisted" } else { "healthy" }
        );
    }
    println!();
}
