use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// AI-generated summary of one email.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailSummary {
    pub email_id: String,
    pub summary: String,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanItem {
    pub title: String,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub starts_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_minutes: Option<u32>,
}

/// The generated plan for one day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayPlan {
    pub date: NaiveDate,
    #[serde(default)]
    pub items: Vec<PlanItem>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// Plan tier as the billing backend names it ("free", "pro", ...).
    pub tier: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    #[serde(default)]
    pub kind: String,
    pub title: String,
    #[serde(default)]
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_parses_with_missing_optional_fields() {
        let json = r#"{
            "date": "2026-03-14",
            "items": [{"title": "Reply to Sam"}],
            "generated_at": "2026-03-14T07:00:00Z"
        }"#;
        let plan: DayPlan = serde_json::from_str(json).unwrap();
        assert_eq!(plan.items.len(), 1);
        assert_eq!(plan.items[0].task_id, None);
        assert_eq!(plan.date, NaiveDate::from_ymd_opt(2026, 3, 14).unwrap());
    }

    #[test]
    fn notification_defaults() {
        let json = r#"{"id": "n1", "title": "Plan ready", "created_at": "2026-03-14T07:00:00Z"}"#;
        let n: Notification = serde_json::from_str(json).unwrap();
        assert_eq!(n.kind, "");
        assert_eq!(n.body, "");
    }
}
