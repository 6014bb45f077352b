//! End-to-end: raw ALM entities → normalize → publish → query.

use chrono::{TimeZone, Utc};
use defect_harness::filter::{count_defects, get_defect, list_defects, DefectFilter};
use defect_harness::models::{Defect, RawEntity};
use defect_harness::normalize::normalize;
use defect_harness::search::{search_defects, search_filtered};
use defect_harness::sql::{execute_query, QueryError};
use defect_harness::stats::get_stats;
use defect_harness::store::{self, DataDir};
use serde_json::json;
use tempfile::TempDir;

fn entity(pairs: &[(&str, &str)]) -> RawEntity {
    RawEntity::from_pairs(pairs.iter().map(|(k, v)| (*k, Some(*v))))
}

fn fixture() -> Vec<RawEntity> {
    vec![
        entity(&[
            ("id", "101"),
            ("name", "Invoice totals wrong"),
            ("status", "Open"),
            ("priority", "P1-Critical"),
            ("owner", "alice.smith_example.com"),
            ("detected-by", "qa.bob"),
            ("creation-time", "2026-01-10"),
            ("description", "<p>Totals on the <b>invoice</b> screen</p>\n<p>are off</p>"),
            ("user-template-03", "Functional"),
            ("user-template-08", "01_Code"),
            ("user-template-02", "Billing"),
        ]),
        entity(&[
            ("id", "102"),
            ("name", "Login page slow"),
            ("status", "Closed"),
            ("priority", "P3-Medium"),
            ("owner", "carol"),
            ("creation-time", "2026-01-01"),
            ("closing-date", "2026-01-05"),
            ("user-template-03", "Integration"),
        ]),
        entity(&[
            ("id", "103"),
            ("name", "Robot export fails"),
            ("status", "Open"),
            ("priority", "P1-Critical"),
            ("owner", "Alice.Jones"),
            ("creation-time", "2026-01-03"),
            ("user-template-03", "Functional"),
        ]),
        entity(&[
            ("id", "104"),
            ("name", "Typo in footer"),
            ("status", "Rejected"),
            ("priority", "Someday"),
            ("creation-time", "2026-01-02"),
            ("closing-date", "2026-01-03"),
        ]),
        entity(&[
            ("id", "105"),
            ("name", "Data load drops rows"),
            ("status", "New"),
            ("priority", "P2-High"),
            ("creation-time", "2026-01-04"),
            ("user-template-03", "Data"),
        ]),
    ]
}

async fn published() -> (TempDir, DataDir, Vec<Defect>) {
    let tmp = TempDir::new().unwrap();
    let data = DataDir::new(tmp.path().join("data"));
    let defects = normalize(&fixture()).unwrap();
    store::publish(&data, &defects).await.unwrap();
    (tmp, data, defects)
}

fn ids(defects: &[Defect]) -> Vec<i64> {
    defects.iter().map(|d| d.id).collect()
}

#[tokio::test]
async fn get_reproduces_every_field() {
    let (_tmp, data, defects) = published().await;
    for expected in &defects {
        let got = get_defect(&data, expected.id).await.unwrap().unwrap();
        assert_eq!(&got, expected);
    }
    assert!(get_defect(&data, 9999).await.unwrap().is_none());

    let first = get_defect(&data, 101).await.unwrap().unwrap();
    assert_eq!(first.description.as_deref(), Some("Totals on the invoice screen are off"));
    assert!(first.description_html.unwrap().contains("<b>invoice</b>"));
    assert_eq!(first.module.as_deref(), Some("Functional"));
    assert_eq!(first.defect_type.as_deref(), Some("01_Code"));
    assert!(first.closed.is_none());
}

#[tokio::test]
async fn status_filter_is_case_insensitive_exact_and_sorted() {
    let (_tmp, data, _) = published().await;
    let filter = DefectFilter {
        status: vec!["open".to_string()],
        ..Default::default()
    };
    let open = list_defects(&data, &filter, None, 0).await.unwrap();
    // Both P1; earlier creation first.
    assert_eq!(ids(&open), vec![103, 101]);
    assert_eq!(count_defects(&data, &filter).await.unwrap(), 2);
}

#[tokio::test]
async fn list_sorts_by_priority_rank_with_unknown_last() {
    let (_tmp, data, _) = published().await;
    let all = list_defects(&data, &DefectFilter::default(), None, 0).await.unwrap();
    assert_eq!(ids(&all), vec![103, 101, 105, 102, 104]);

    let page = list_defects(&data, &DefectFilter::default(), Some(2), 1).await.unwrap();
    assert_eq!(ids(&page), vec![101, 105]);

    let tail = list_defects(&data, &DefectFilter::default(), None, 3).await.unwrap();
    assert_eq!(ids(&tail), vec![102, 104]);
}

#[tokio::test]
async fn substring_and_combined_filters() {
    let (_tmp, data, _) = published().await;

    let alice = DefectFilter {
        owner: vec!["ALICE".to_string()],
        ..Default::default()
    };
    assert_eq!(ids(&list_defects(&data, &alice, None, 0).await.unwrap()), vec![103, 101]);

    let either = DefectFilter {
        module: vec!["data".to_string(), "integr".to_string()],
        ..Default::default()
    };
    assert_eq!(ids(&list_defects(&data, &either, None, 0).await.unwrap()), vec![105, 102]);

    let anded = DefectFilter {
        owner: vec!["alice".to_string()],
        workstream: vec!["bill".to_string()],
        ..Default::default()
    };
    assert_eq!(ids(&list_defects(&data, &anded, None, 0).await.unwrap()), vec![101]);

    let percent_is_literal = DefectFilter {
        owner: vec!["%".to_string()],
        ..Default::default()
    };
    assert_eq!(count_defects(&data, &percent_is_literal).await.unwrap(), 0);
}

#[tokio::test]
async fn active_and_excluded_statuses() {
    let (_tmp, data, _) = published().await;

    let active = DefectFilter {
        active_only: true,
        ..Default::default()
    };
    assert_eq!(ids(&list_defects(&data, &active, None, 0).await.unwrap()), vec![103, 101, 105]);

    let not_closed = DefectFilter {
        exclude_status: vec!["CLOSED".to_string()],
        ..Default::default()
    };
    assert_eq!(count_defects(&data, &not_closed).await.unwrap(), 4);
}

#[tokio::test]
async fn search_uses_prefixes_and_ands_words() {
    let (_tmp, data, _) = published().await;

    let hits = search_defects(&data, "invo", 10).await.unwrap();
    assert_eq!(ids(&hits), vec![101]);

    // Matches the owner column too.
    let hits = search_defects(&data, "alice", 10).await.unwrap();
    assert_eq!(hits.len(), 2);

    let hits = search_defects(&data, "robot exp", 10).await.unwrap();
    assert_eq!(ids(&hits), vec![103]);
    assert!(search_defects(&data, "robot invoice", 10).await.unwrap().is_empty());

    assert!(search_defects(&data, "  ", 10).await.unwrap().is_empty());
    assert_eq!(search_defects(&data, "alice", 1).await.unwrap().len(), 1);

    let closed_only = DefectFilter {
        status: vec!["closed".to_string()],
        ..Default::default()
    };
    assert!(search_filtered(&data, "alice", &closed_only, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn stats_over_published_generation() {
    let (_tmp, data, _) = published().await;

    let stats = get_stats(&data, false, 5).await.unwrap().unwrap();
    assert_eq!(stats.total, 5);
    assert_eq!(stats.open_count, 2);
    assert_eq!(stats.closed_count, 3);
    assert_eq!(stats.by_priority.len(), 1);
    assert_eq!(stats.by_priority[0].name, "P1-Critical");
    assert_eq!(stats.by_priority[0].count, 2);
    assert_eq!(stats.by_module[0].name, "Functional");

    let oldest = stats.oldest_open.unwrap();
    assert_eq!(oldest.id, 103);
    assert_eq!(oldest.created, "2026-01-03");

    // 102: 4 days, 104: 1 day.
    let ct = stats.close_time.unwrap();
    assert_eq!(ct.p50, 4.0);
    assert_eq!(ct.p75, 4.0);
    assert_eq!(ct.avg, 2.5);

    let all = get_stats(&data, true, 2).await.unwrap().unwrap();
    let priorities: Vec<&str> = all.by_priority.iter().map(|b| b.name.as_str()).collect();
    assert_eq!(priorities, vec!["P1-Critical", "P2-High", "P3-Medium", "Someday"]);
    assert_eq!(all.by_module.len(), 2);
    assert_eq!(all.by_owner.len(), 2);

    // Zero means no cap.
    let uncapped = get_stats(&data, true, 0).await.unwrap().unwrap();
    let modules: Vec<&str> = uncapped.by_module.iter().map(|b| b.name.as_str()).collect();
    assert_eq!(modules, vec!["Functional", "Integration", "(none)", "Data"]);
    assert_eq!(uncapped.by_owner.len(), 4);
    assert_eq!(uncapped.by_workstream.len(), 2);
}

#[tokio::test]
async fn adhoc_queries_are_read_only() {
    let (_tmp, data, _) = published().await;

    let result = execute_query(&data, "SELECT COUNT(*) AS n FROM defects").await.unwrap();
    assert_eq!(result.columns, vec!["n"]);
    assert_eq!(result.rows, vec![vec![json!(5)]]);

    let empty = execute_query(&data, "SELECT id, name FROM defects WHERE id < 0").await.unwrap();
    assert_eq!(empty.columns, vec!["id", "name"]);
    assert!(empty.rows.is_empty());

    let joined = execute_query(
        &data,
        "SELECT d.id, f.rowid AS id FROM defects d JOIN defects_fts f ON f.rowid = d.id WHERE d.id = 101",
    )
    .await
    .unwrap();
    assert_eq!(joined.columns, vec!["id", "id"]);
    let objects: serde_json::Value = serde_json::from_str(&joined.to_json()).unwrap();
    assert_eq!(objects, json!([{ "id": 101, "id_2": 101 }]));

    assert!(matches!(
        execute_query(&data, "DROP TABLE defects").await,
        Err(QueryError::PolicyViolation)
    ));
    assert!(matches!(
        execute_query(&data, "DELETE FROM defects").await,
        Err(QueryError::PolicyViolation)
    ));
    assert!(matches!(
        execute_query(&data, "WITH x AS (SELECT 1) DELETE FROM defects").await,
        Err(QueryError::Sql(_))
    ));
    assert!(matches!(
        execute_query(&data, "SELECT nope FROM defects").await,
        Err(QueryError::Sql(_))
    ));

    assert_eq!(count_defects(&data, &DefectFilter::default()).await.unwrap(), 5);
}

#[tokio::test]
async fn empty_store_gives_neutral_results() {
    let tmp = TempDir::new().unwrap();
    let data = DataDir::new(tmp.path());

    assert!(get_defect(&data, 1).await.unwrap().is_none());
    assert!(list_defects(&data, &DefectFilter::default(), None, 0).await.unwrap().is_empty());
    assert_eq!(count_defects(&data, &DefectFilter::default()).await.unwrap(), 0);
    assert!(search_defects(&data, "anything", 10).await.unwrap().is_empty());
    assert!(get_stats(&data, false, 5).await.unwrap().is_none());
    assert!(matches!(
        execute_query(&data, "SELECT 1").await,
        Err(QueryError::NotFound(_))
    ));
}

#[tokio::test]
async fn uncommitted_generation_is_invisible_to_readers() {
    let (_tmp, data, _) = published().await;
    let before = store::current_generation(&data).await.unwrap().unwrap();

    let replacement = normalize(&[entity(&[("id", "900"), ("name", "Only one")])]).unwrap();
    let staged = store::stage(&data, &replacement, Utc.with_ymd_and_hms(2099, 1, 1, 0, 0, 0).unwrap())
        .await
        .unwrap();

    // Builder "killed" here: temps exist, aliases untouched.
    assert_eq!(store::current_generation(&data).await.unwrap().unwrap(), before);
    assert_eq!(count_defects(&data, &DefectFilter::default()).await.unwrap(), 5);
    assert!(get_defect(&data, 900).await.unwrap().is_none());

    let generation = staged.commit().await.unwrap();
    assert_eq!(generation.generation_id, "20990101-000000");
    assert_eq!(count_defects(&data, &DefectFilter::default()).await.unwrap(), 1);
    assert!(get_defect(&data, 900).await.unwrap().is_some());

    // Older generation is retained.
    let history = store::list_generations(&data).await.unwrap();
    assert_eq!(history, vec![before, generation.generation_id.clone()]);
}

#[tokio::test]
async fn interrupted_stage_is_cleaned_by_next_sync() {
    let (_tmp, data, _) = published().await;

    let replacement = normalize(&[entity(&[("id", "1"), ("name", "x")])]).unwrap();
    let abandoned = store::stage(&data, &replacement, Utc.with_ymd_and_hms(2099, 6, 1, 0, 0, 0).unwrap())
        .await
        .unwrap();
    drop(abandoned);

    store::publish(&data, &replacement).await.unwrap();
    let leftovers: Vec<String> = std::fs::read_dir(data.history_dir())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|n| n.contains(".tmp"))
        .collect();
    assert!(leftovers.is_empty(), "stale temps: {leftovers:?}");
}

#[test]
fn malformed_fix_time_aborts_normalization() {
    let mut raw = fixture();
    raw.push(entity(&[("id", "200"), ("name", "bad"), ("actual-fix-time", "3.5")]));
    assert!(normalize(&raw).is_err());
}
