//! Batch analysis (§4.7.2)

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::queue::{DelayedInvalidationQueue, InvalidationTask};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueHealth {
    Excellent,
    Attention,
    Warning,
    Critical,
}

impl QueueHealth {
    fn from_length(len: u64) -> Self {
        if len >= 1000 {
            QueueHealth::Critical
        } else if len >= 500 {
            QueueHealth::Warning
        } else if len >= 100 {
            QueueHealth::Attention
        } else {
            QueueHealth::Excellent
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub r#type: String,
    pub key: String,
    pub count: u64,
    pub priority: String,
    pub estimated_impact: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueAnalysis {
    pub queue_health: QueueHealth,
    pub queue_length: u64,
    pub by_pattern: HashMap<String, Vec<String>>,
    pub by_reason: HashMap<String, Vec<String>>,
    pub by_user: HashMap<String, Vec<String>>,
    pub urgent_timeout_count: usize,
    pub urgent_overflow: bool,
    pub recommendations: Vec<Recommendation>,
}

const TIMEOUT_THRESHOLD_S: f64 = 3600.0;

/// Reads up to `sample_size` oldest tasks, groups them by pattern/reason/
/// inferred-user, and produces the health/urgency/recommendation report.
pub async fn analyze(queue: &DelayedInvalidationQueue, sample_size: usize) -> Result<QueueAnalysis> {
    let queue_length = queue.pending_count().await?;
    let tasks = queue.oldest(sample_size).await?;
    let now = Utc::now().timestamp_millis() as f64 / 1000.0;

    let mut by_pattern: HashMap<String, Vec<String>> = HashMap::new();
    let mut by_reason: HashMap<String, Vec<String>> = HashMap::new();
    let mut by_user: HashMap<String, Vec<String>> = HashMap::new();
    let mut urgent_timeout_count = 0;

    for task in &tasks {
        let pattern = key_pattern(&task.cache_key);
        by_pattern.entry(pattern).or_default().push(task.cache_key.clone());
        by_reason
            .entry(task.reason.clone())
            .or_default()
            .push(task.cache_key.clone());
        if let Some(user_id) = super::queue::parse_user_id(&task.cache_key) {
            by_user.entry(user_id).or_default().push(task.cache_key.clone());
        }
        if now - task.timestamp > TIMEOUT_THRESHOLD_S {
            urgent_timeout_count += 1;
        }
    }

    let queue_health = QueueHealth::from_length(queue_length);
    let urgent_overflow = queue_health == QueueHealth::Critical;

    let mut recommendations = Vec::new();
    for (pattern, keys) in &by_pattern {
        if keys.len() >= 10 {
            recommendations.push(Recommendation {
                r#type: "pattern".to_string(),
                key: pattern.clone(),
                count: keys.len() as u64,
                priority: priority_for(keys.len()),
                estimated_impact: format!("{} keys", keys.len()),
            });
        }
    }
    for (reason, keys) in &by_reason {
        if keys.len() >= 10 {
            recommendations.push(Recommendation {
                r#type: "reason".to_string(),
                key: reason.clone(),
                count: keys.len() as u64,
                priority: priority_for(keys.len()),
                estimated_impact: format!("{} keys", keys.len()),
            });
        }
    }
    for (user_id, keys) in &by_user {
        if keys.len() >= 5 {
            recommendations.push(Recommendation {
                r#type: "user".to_string(),
                key: user_id.clone(),
                count: keys.len() as u64,
                priority: priority_for(keys.len()),
                estimated_impact: format!("{} keys", keys.len()),
            });
        }
    }

    Ok(QueueAnalysis {
        queue_health,
        queue_length,
        by_pattern,
        by_reason,
        by_user,
        urgent_timeout_count,
        urgent_overflow,
        recommendations,
    })
}

fn priority_for(count: usize) -> String {
    if count >= 100 {
        "high".to_string()
    } else if count >= 25 {
        "medium".to_string()
    } else {
        "low".to_string()
    }
}

fn key_pattern(cache_key: &str) -> String {
    cache_key.split(':').next().unwrap_or(cache_key).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_thresholds_match_spec() {
        assert_eq!(QueueHealth::from_length(50), QueueHealth::Excellent);
        assert_eq!(QueueHealth::from_length(100), QueueHealth::Attention);
        assert_eq!(QueueHealth::from_length(500), QueueHealth::Warning);
        assert_eq!(QueueHealth::from_length(1000), QueueHealth::Critical);
    }

    #[test]
    fn priority_buckets() {
        assert_eq!(priority_for(150), "high");
        assert_eq!(priority_for(30), "medium");
        assert_eq!(priority_for(5), "low");
    }
}
