use std::time::SystemTime;

use mongodb::bson::{DateTime, Document, doc};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::dao::models::{RoundEntity, ScoreEntity};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoRoundDocument {
    #[serde(rename = "_id")]
    pub id: String,
    pub start_at: DateTime,
    pub end_at: DateTime,
    #[serde(default)]
    pub total_points: i64,
    pub created_at: DateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoScoreDocument {
    pub round_id: String,
    pub user_id: String,
    pub username: String,
    pub taps: i64,
    pub points: i64,
    #[serde(default)]
    pub zero_score: bool,
    pub updated_at: DateTime,
}

pub fn to_bson_datetime(value: OffsetDateTime) -> DateTime {
    DateTime::from_system_time(SystemTime::from(value))
}

pub fn from_bson_datetime(value: DateTime) -> OffsetDateTime {
    OffsetDateTime::from(value.to_system_time())
}

pub fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

impl From<&RoundEntity> for MongoRoundDocument {
    fn from(value: &RoundEntity) -> Self {
        Self {
            id: value.id.clone(),
            start_at: to_bson_datetime(value.starts_at),
            end_at: to_bson_datetime(value.ends_at),
            total_points: to_i64(value.total_points),
            created_at: to_bson_datetime(value.created_at),
        }
    }
}

impl From<MongoRoundDocument> for RoundEntity {
    fn from(value: MongoRoundDocument) -> Self {
        Self {
            id: value.id,
            starts_at: from_bson_datetime(value.start_at),
            ends_at: from_bson_datetime(value.end_at),
            total_points: to_u64(value.total_points),
            created_at: from_bson_datetime(value.created_at),
        }
    }
}

impl From<MongoScoreDocument> for ScoreEntity {
    fn from(value: MongoScoreDocument) -> Self {
        Self {
            round_id: value.round_id,
            user_id: value.user_id,
            username: value.username,
            taps: to_u64(value.taps),
            points: to_u64(value.points),
            zero_score: value.zero_score,
            updated_at: from_bson_datetime(value.updated_at),
        }
    }
}

pub fn doc_id(id: &str) -> Document {
    doc! { "_id": id }
}

/// Upsert document that only ever raises taps, points and the update time.
pub fn score_upsert(score: &ScoreEntity) -> Document {
    doc! {
        "$max": {
            "taps": to_i64(score.taps),
            "points": to_i64(score.points),
            "updated_at": to_bson_datetime(score.updated_at),
        },
        "$set": {
            "username": score.username.as_str(),
            "zero_score": score.zero_score,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn datetimes_round_trip_at_millisecond_precision() {
        let instant = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap()
            + time::Duration::milliseconds(123);
        assert_eq!(from_bson_datetime(to_bson_datetime(instant)), instant);
    }

    #[test]
    fn counters_saturate_instead_of_wrapping() {
        assert_eq!(to_i64(u64::MAX), i64::MAX);
        assert_eq!(to_u64(-4), 0);
    }

    #[test]
    fn upsert_uses_max_for_counters() {
        let score = ScoreEntity {
            round_id: "r".into(),
            user_id: "u".into(),
            username: "name".into(),
            taps: 3,
            points: 3,
            zero_score: false,
            updated_at: OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap(),
        };
        let update = score_upsert(&score);
        let max = update.get_document("$max").unwrap();
        assert_eq!(max.get_i64("taps").unwrap(), 3);
        assert!(update.get_document("$set").unwrap().contains_key("username"));
    }
}
