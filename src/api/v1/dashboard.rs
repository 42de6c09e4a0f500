use axum::extract::{Query, State};
use serde::{Deserialize, Serialize};

use crate::{error::Error, store::Parcels, util::Json};

use super::parcel::delivery_status;

/// Placeholder rider used when the dashboard request names none.
pub const DEMO_RIDER_ID: &str = "demoRiderId";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StatusCount {
    pub status: Option<String>,
    pub count: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StatusEarnings {
    pub status: Option<String>,
    pub count: i64,
    #[serde(rename = "totalEarnings", default)]
    pub total_earnings: f64,
}

pub async fn status_count(State(parcels): State<Parcels>) -> Result<Json<Vec<StatusCount>>, Error> {
    Ok(Json(parcels.count_by_delivery_status().await?))
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct RiderDashboardQuery {
    pub rider_id: Option<String>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct RiderDashboard {
    pub pending: i64,
    pub completed: i64,
    pub earnings: f64,
}

impl RiderDashboard {
    /// Earnings add up every group, not only delivered parcels.
    pub fn summarize(groups: &[StatusEarnings]) -> Self {
        let count_of = |status: &str| {
            groups
                .iter()
                .find(|it| it.status.as_deref() == Some(status))
                .map(|it| it.count)
                .unwrap_or(0)
        };

        Self {
            pending: count_of(delivery_status::PENDING),
            completed: count_of(delivery_status::DELIVERED),
            earnings: groups.iter().map(|it| it.total_earnings).sum(),
        }
    }
}

pub async fn rider_dashboard(
    State(parcels): State<Parcels>,
    Query(query): Query<RiderDashboardQuery>,
) -> Result<Json<RiderDashboard>, Error> {
    let rider_id = query
        .rider_id
        .filter(|it| !it.is_empty())
        .unwrap_or_else(|| DEMO_RIDER_ID.to_string());

    let groups = parcels.earnings_by_status(&rider_id).await?;

    Ok(Json(RiderDashboard::summarize(&groups)))
}
