use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::server::models::{ActivityRole, NetworkActivityKind};
use crate::server::services::activity_store::{window_date_today, ActivityStore};
use crate::server::services::tenant_store::TenantStore;

/// Candidate widths for the zone of maximum participation.
const ZONE_WIDTHS: [usize; 4] = [3, 4, 5, 6];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Zone {
    pub start_hour: u8,
    pub width: u8,
    pub total: i64,
    pub percentage_of_total: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HourScore {
    pub hour: u8,
    pub score: i64,
    pub reason: String,
    pub reach: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct BestPostingTimes {
    pub slots: Vec<HourScore>,
    pub confidence: &'static str,
    pub data_points: i64,
}

/// Rolls post activity and raw events into the 24-bucket GMT histograms in
/// `network_activity` and derives the timing features served by the API.
#[derive(Clone)]
pub struct TimingAggregator {
    activity: ActivityStore,
}

impl TimingAggregator {
    pub fn new(activity: ActivityStore) -> Self {
        Self { activity }
    }

    /// One aggregation pass for a tenant: recount each (kind, hour) over
    /// the window and overwrite today's rows. Safe to re-run at any time.
    pub async fn aggregate_tenant(&self, tenant_id: i64, window_days: i64) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let since = now - window_days * 86_400;
        let today = window_date_today();

        let follower = self
            .activity
            .hourly_post_activity(tenant_id, ActivityRole::Follower, since)
            .await?;
        let following = self
            .activity
            .hourly_post_activity(tenant_id, ActivityRole::Following, since)
            .await?;
        let engagement = self.activity.hourly_engagement(tenant_id, since).await?;

        for (kind, histogram) in [
            (NetworkActivityKind::FollowerPost, &follower),
            (NetworkActivityKind::FollowingPost, &following),
            (NetworkActivityKind::Engagement, &engagement),
        ] {
            for (hour, &count) in histogram.iter().enumerate() {
                self.activity
                    .upsert_network_activity(tenant_id, kind, hour as i64, count, &today)
                    .await?;
            }
        }

        debug!(tenant_id, window_days, "aggregated network activity");
        Ok(())
    }

    pub async fn best_posting_times(
        &self,
        tenant_id: i64,
        window_days: i64,
    ) -> Result<BestPostingTimes> {
        let now = chrono::Utc::now().timestamp();
        let since = now - window_days * 86_400;
        let follower = self
            .activity
            .hourly_post_activity(tenant_id, ActivityRole::Follower, since)
            .await?;
        let engagement = self.activity.hourly_engagement(tenant_id, since).await?;
        Ok(score_posting_times(&follower, &engagement))
    }
}

/// Periodic aggregation over every tenant. Each pass is a set of idempotent
/// upserts, so an interrupted run resumes cleanly on the next tick.
pub async fn run_aggregation_loop(
    tenants: TenantStore,
    aggregator: TimingAggregator,
    window_days: i64,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => {
                info!("aggregation loop shutting down");
                return;
            }
        }
        let all = match tenants.all().await {
            Ok(all) => all,
            Err(e) => {
                error!(error = ?e, "failed to list tenants for aggregation");
                continue;
            }
        };
        for tenant in all {
            if let Err(e) = aggregator.aggregate_tenant(tenant.id, window_days).await {
                error!(tenant_id = tenant.id, error = ?e, "aggregation pass failed");
            }
        }
    }
}

/// The 3-6 hour circular window with the highest activity density. Density
/// (window sum over width) rather than the raw sum is what makes narrow
/// concentrated windows beat any wider superset of themselves; ties break
/// to the smaller width, then the smaller start hour.
pub fn zone_of_participation(histogram: &[i64; 24]) -> Option<Zone> {
    let total: i64 = histogram.iter().sum();
    if total == 0 {
        return None;
    }

    // (sum, width, start); a candidate wins when sum/width is strictly
    // greater, compared exactly as sum_a * w_b > sum_b * w_a.
    let mut best: Option<(i64, usize, usize)> = None;
    for width in ZONE_WIDTHS {
        for start in 0..24 {
            let sum: i64 = (0..width).map(|i| histogram[(start + i) % 24]).sum();
            let wins = match best {
                None => true,
                Some((best_sum, best_width, _)) => {
                    sum * best_width as i64 > best_sum * width as i64
                }
            };
            if wins {
                best = Some((sum, width, start));
            }
        }
    }

    let (sum, width, start) = best?;
    Some(Zone {
        start_hour: start as u8,
        width: width as u8,
        total: sum,
        percentage_of_total: (sum as f64 / total as f64) * 100.0,
    })
}

/// Up to three hours with the highest counts, descending; the lower hour
/// index wins ties. Hours with zero activity never qualify.
pub fn peak_hours(histogram: &[i64; 24]) -> Vec<u8> {
    let mut hours: Vec<(usize, i64)> = histogram
        .iter()
        .copied()
        .enumerate()
        .filter(|&(_, count)| count > 0)
        .collect();
    hours.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    hours.into_iter().take(3).map(|(hour, _)| hour as u8).collect()
}

/// Weighted blend of follower presence (0.6) and historical engagement
/// (0.4), normalized 0-100 against the best hour.
pub fn score_posting_times(follower: &[i64; 24], engagement: &[i64; 24]) -> BestPostingTimes {
    let data_points: i64 = follower.iter().sum::<i64>() + engagement.iter().sum::<i64>();
    let confidence = match data_points {
        n if n >= 1000 => "high",
        n if n >= 500 => "medium",
        _ => "low",
    };

    let raw: Vec<f64> = (0..24)
        .map(|h| 0.6 * follower[h] as f64 + 0.4 * engagement[h] as f64)
        .collect();
    let max = raw.iter().cloned().fold(0.0_f64, f64::max);
    if max <= 0.0 {
        return BestPostingTimes {
            slots: Vec::new(),
            confidence,
            data_points,
        };
    }

    let mut ranked: Vec<(usize, f64)> = raw
        .iter()
        .copied()
        .enumerate()
        .filter(|&(_, score)| score > 0.0)
        .collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap().then(a.0.cmp(&b.0)));

    let slots = ranked
        .into_iter()
        .take(5)
        .map(|(hour, score)| {
            let normalized = ((score / max) * 100.0).round() as i64;
            let reach = match normalized {
                n if n >= 80 => "high",
                n if n >= 60 => "medium-high",
                n if n >= 40 => "medium",
                _ => "low",
            };
            let reason = if follower[hour] >= engagement[hour] {
                format!("{} of your followers are active around {hour:02}:00 GMT", follower[hour])
            } else {
                format!("your posts earn the most engagement around {hour:02}:00 GMT")
            };
            HourScore {
                hour: hour as u8,
                score: normalized,
                reason,
                reach,
            }
        })
        .collect();

    BestPostingTimes {
        slots,
        confidence,
        data_points,
    }
}
