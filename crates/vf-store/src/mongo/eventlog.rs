//! `EventLogStore` over the `event_logs` collection.

use super::{map_err, MongoStore};
use crate::documents::EventLogDoc;
use crate::traits::{EventLogFilter, EventLogStore, StoreResult};
use async_trait::async_trait;
use bson::{doc, Bson, Document};
use chrono::{DateTime, Duration, Utc};
use futures_util::TryStreamExt;
use vf_model::EventLogRecord;
use vf_protocol::{EventLogStats, StatBucket};

#[async_trait]
impl EventLogStore for MongoStore {
    async fn insert(&self, record: &EventLogRecord) -> StoreResult<()> {
        self.event_logs()
            .insert_one(EventLogDoc::from_record(record))
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn query(&self, filter: &EventLogFilter) -> StoreResult<(Vec<EventLogRecord>, u64)> {
        let query = build_filter(filter);
        let total = self
            .event_logs()
            .count_documents(query.clone())
            .await
            .map_err(map_err)?;
        let page = filter.page.max(1);
        let skip = (page - 1) * filter.limit;
        let mut cursor = self
            .event_logs()
            .find(query)
            .sort(doc! { "server_timestamp": -1 })
            .skip(skip)
            .limit(i64::try_from(filter.limit).unwrap_or(i64::MAX))
            .await
            .map_err(map_err)?;
        let mut records = Vec::new();
        while let Some(row) = cursor.try_next().await.map_err(map_err)? {
            records.push(row.into_record());
        }
        Ok((records, total))
    }

    async fn stats_24h(&self, now: DateTime<Utc>) -> StoreResult<EventLogStats> {
        let window = doc! {
            "server_timestamp": { "$gte": bson::DateTime::from_chrono(now - Duration::hours(24)) }
        };
        let total_24h = self
            .event_logs()
            .count_documents(window.clone())
            .await
            .map_err(map_err)?;
        let sources = self.grouped_counts(&window, "$source").await?;
        let statuses = self.grouped_counts(&window, "$status").await?;
        Ok(EventLogStats {
            total_24h,
            sources,
            statuses,
        })
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let result = self
            .event_logs()
            .delete_many(doc! {
                "server_timestamp": { "$lt": bson::DateTime::from_chrono(cutoff) }
            })
            .await
            .map_err(map_err)?;
        Ok(result.deleted_count)
    }
}

impl MongoStore {
    async fn grouped_counts(
        &self,
        window: &Document,
        group_key: &str,
    ) -> StoreResult<Vec<StatBucket>> {
        let pipeline = vec![
            doc! { "$match": window.clone() },
            doc! { "$group": { "_id": group_key, "count": { "$sum": 1 } } },
            doc! { "$sort": { "count": -1 } },
        ];
        let mut cursor = self
            .event_logs()
            .aggregate(pipeline)
            .await
            .map_err(map_err)?;
        let mut buckets = Vec::new();
        while let Some(row) = cursor.try_next().await.map_err(map_err)? {
            let id = row.get_str("_id").unwrap_or_default().to_owned();
            let count = match row.get("count") {
                Some(Bson::Int32(n)) => u64::try_from(*n).unwrap_or(0),
                Some(Bson::Int64(n)) => u64::try_from(*n).unwrap_or(0),
                _ => 0,
            };
            buckets.push(StatBucket { id, count });
        }
        Ok(buckets)
    }
}

fn build_filter(filter: &EventLogFilter) -> Document {
    let mut query = Document::new();
    if let Some(source) = &filter.source {
        query.insert("source", source.as_str());
    }
    if let Some(status) = &filter.status {
        query.insert("status", status.as_str());
    }
    if let Some(step) = &filter.step {
        query.insert("step", step.as_str());
    }
    if let Some(device_family) = &filter.device_family {
        query.insert("device_family", device_family.as_str());
    }
    let mut window = Document::new();
    if let Some(from) = filter.from {
        window.insert("$gte", bson::DateTime::from_chrono(from));
    }
    if let Some(to) = filter.to {
        window.insert("$lte", bson::DateTime::from_chrono(to));
    }
    if !window.is_empty() {
        query.insert("server_timestamp", window);
    }
    if let Some(text) = &filter.text {
        let regex = Bson::RegularExpression(bson::Regex {
            pattern: escape_regex(text),
            options: "i".to_owned(),
        });
        query.insert(
            "$or",
            vec![
                doc! { "error_message": regex.clone() },
                doc! { "patient_ref": regex },
            ],
        );
    }
    query
}

/// Escape regex metacharacters so `q` stays a substring match.
fn escape_regex(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if "\\^$.|?*+()[]{}".contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_builds_conjunctive_query() {
        let filter = EventLogFilter {
            source: Some("watch_pipeline".to_owned()),
            status: Some("error".to_owned()),
            text: Some("P1".to_owned()),
            page: 1,
            limit: 50,
            ..EventLogFilter::default()
        };
        let query = build_filter(&filter);
        assert_eq!(query.get_str("source").unwrap(), "watch_pipeline");
        assert_eq!(query.get_str("status").unwrap(), "error");
        assert!(query.contains_key("$or"));
        assert!(!query.contains_key("server_timestamp"));
    }

    #[test]
    fn regex_metacharacters_are_escaped() {
        assert_eq!(escape_regex("a.b*c"), "a\\.b\\*c");
        assert_eq!(escape_regex("plain"), "plain");
    }
}
