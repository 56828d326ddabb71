//! Risk hotspots: incidents clustered by coordinates rounded to three
//! decimal places (roughly 100 m).

use serde::Serialize;
use std::collections::HashMap;

use crate::models::IncidentRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn for_count(count: usize) -> Self {
        match count {
            c if c >= 5 => RiskLevel::High,
            c if c >= 3 => RiskLevel::Medium,
            _ => RiskLevel::Low,
        }
    }

    /// Marker radius used by map clients.
    pub fn radius(&self) -> u32 {
        match self {
            RiskLevel::High => 12,
            RiskLevel::Medium => 10,
            RiskLevel::Low => 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Hotspot {
    pub lat: f64,
    pub lon: f64,
    pub count: usize,
    /// Type of the first incident seen in the cluster.
    #[serde(rename = "type")]
    pub incident_type: String,
    pub name: String,
    pub level: RiskLevel,
    pub radius: u32,
}

fn round3(value: f64) -> i64 {
    (value * 1000.0).round() as i64
}

/// Cluster incidents with coordinate locations. Largest clusters first;
/// ties keep first-seen order.
pub fn cluster(incidents: &[IncidentRecord]) -> Vec<Hotspot> {
    let mut order: Vec<(i64, i64)> = Vec::new();
    let mut clusters: HashMap<(i64, i64), (usize, &str)> = HashMap::new();
    let mut skipped = 0usize;

    for incident in incidents {
        let Some((lat, lon)) = incident.parsed_location().and_then(|l| l.coordinates()) else {
            skipped += 1;
            continue;
        };

        let key = (round3(lat), round3(lon));
        clusters
            .entry(key)
            .and_modify(|(count, _)| *count += 1)
            .or_insert_with(|| {
                order.push(key);
                (1, incident.incident_type.as_str())
            });
    }

    if skipped > 0 {
        tracing::debug!(skipped, "Incidents without coordinates left out of hotspots");
    }

    let mut hotspots: Vec<Hotspot> = order
        .into_iter()
        .filter_map(|key| {
            let (count, incident_type) = clusters.get(&key)?;
            let level = RiskLevel::for_count(*count);
            Some(Hotspot {
                lat: key.0 as f64 / 1000.0,
                lon: key.1 as f64 / 1000.0,
                count: *count,
                incident_type: incident_type.to_string(),
                name: format!("{} Risk Zone", incident_type),
                level,
                radius: level.radius(),
            })
        })
        .collect();

    hotspots.sort_by(|a, b| b.count.cmp(&a.count));
    hotspots
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::IncidentStatus;
    use chrono::Utc;
    use uuid::Uuid;

    fn incident(incident_type: &str, location: Option<&str>) -> IncidentRecord {
        IncidentRecord {
            id: Uuid::new_v4(),
            user_id: None,
            reporter_name: None,
            incident_type: incident_type.to_string(),
            description: "d".to_string(),
            location: location.map(str::to_string),
            evidence_file: None,
            status: IncidentStatus::Pending,
            reported_at: Utc::now(),
            is_anonymous: true,
            log: String::new(),
        }
    }

    #[test]
    fn test_levels_follow_counts() {
        assert_eq!(RiskLevel::for_count(1), RiskLevel::Low);
        assert_eq!(RiskLevel::for_count(2), RiskLevel::Low);
        assert_eq!(RiskLevel::for_count(3), RiskLevel::Medium);
        assert_eq!(RiskLevel::for_count(4), RiskLevel::Medium);
        assert_eq!(RiskLevel::for_count(5), RiskLevel::High);
        assert_eq!(RiskLevel::High.radius(), 12);
    }

    #[test]
    fn test_nearby_points_share_a_cluster() {
        let incidents = vec![
            incident("Stalking", Some("18.52041,73.85671")),
            incident("Harassment", Some("18.52049,73.85669|FC Road")),
            incident("Other", Some("18.5204,73.8567")),
            incident("Other", Some("19.0760,72.8777")),
        ];

        let hotspots = cluster(&incidents);
        assert_eq!(hotspots.len(), 2);

        let first = &hotspots[0];
        assert_eq!(first.count, 3);
        assert_eq!(first.lat, 18.52);
        assert_eq!(first.lon, 73.857);
        assert_eq!(first.incident_type, "Stalking");
        assert_eq!(first.name, "Stalking Risk Zone");
        assert_eq!(first.level, RiskLevel::Medium);

        assert_eq!(hotspots[1].count, 1);
        assert_eq!(hotspots[1].level, RiskLevel::Low);
    }

    #[test]
    fn test_text_locations_are_skipped() {
        let incidents = vec![
            incident("Other", Some("Near the old market")),
            incident("Other", None),
            incident("Other", Some("120.0,10.0")),
        ];
        assert!(cluster(&incidents).is_empty());
    }

    #[test]
    fn test_high_level_cluster_serializes() {
        let incidents: Vec<_> = (0..5)
            .map(|_| incident("Unsafe Environment", Some("12.9716,77.5946")))
            .collect();

        let hotspots = cluster(&incidents);
        assert_eq!(hotspots.len(), 1);
        let json = serde_json::to_value(&hotspots[0]).unwrap();
        assert_eq!(json["level"], "high");
        assert_eq!(json["type"], "Unsafe Environment");
        assert_eq!(json["count"], 5);
        assert_eq!(json["radius"], 12);
    }
}
