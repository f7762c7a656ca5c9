// tests/store_properties.rs

//! Catalog store behavior shared by every backend.

mod common;

use chartsync::models::chart_files_id;
use chartsync::repository::{charts_from_index, parse_repo_index};
use chartsync::store::CHARTS;
use chartsync::{CatalogStore, Chart, ChartFiles, ChartVersion, DocumentStore, Repo, SqliteStore};
use chrono::{TimeZone, Utc};
use common::{INDEX_WITHOUT_ACS, INDEX_YAML, REPO_URL, backends};

fn repo(name: &str) -> Repo {
    Repo::new(name, "default", REPO_URL)
}

fn charts_for(repo: &Repo, index: &str) -> Vec<Chart> {
    charts_from_index(&parse_repo_index(index.as_bytes()).unwrap(), repo)
}

fn files(repo: &Repo, chart_id: &str, version: &str, digest: &str) -> ChartFiles {
    ChartFiles {
        id: chart_files_id(chart_id, version),
        readme: "# readme".to_string(),
        values: "image: test".to_string(),
        schema: String::new(),
        repo: repo.reference(),
        digest: digest.to_string(),
    }
}

#[tokio::test]
async fn test_sync_is_idempotent() {
    for (backend, store) in backends() {
        let repo = repo("stable");
        let charts = charts_for(&repo, INDEX_YAML);

        store.sync(&repo, &charts).await.unwrap();
        let once = store.list_charts("stable").await.unwrap();
        store.sync(&repo, &charts).await.unwrap();
        let twice = store.list_charts("stable").await.unwrap();

        assert_eq!(once.len(), 2, "{backend}");
        assert_eq!(once, twice, "{backend}");
    }
}

#[tokio::test]
async fn test_repeated_sync_keeps_row_count() {
    let repo = repo("stable");
    let charts = charts_for(&repo, INDEX_YAML);

    let sqlite = SqliteStore::open_in_memory().unwrap();
    for _ in 0..3 {
        sqlite.sync(&repo, &charts).await.unwrap();
        assert_eq!(sqlite.count_rows(CHARTS).await.unwrap(), 2);
    }

    let document = DocumentStore::new();
    for _ in 0..3 {
        document.sync(&repo, &charts).await.unwrap();
        assert_eq!(document.collection(CHARTS).unwrap().len(), 2);
    }
}

#[tokio::test]
async fn test_sync_removes_unlisted_charts() {
    for (backend, store) in backends() {
        let repo = repo("stable");
        store.sync(&repo, &charts_for(&repo, INDEX_YAML)).await.unwrap();

        let removed = store
            .sync(&repo, &charts_for(&repo, INDEX_WITHOUT_ACS))
            .await
            .unwrap();

        assert_eq!(removed, 1, "{backend}");
        let ids: Vec<String> = store
            .list_charts("stable")
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec!["stable/wordpress"], "{backend}");
    }
}

#[tokio::test]
async fn test_reconcile_is_scoped_to_repository() {
    for (backend, store) in backends() {
        let stable = repo("stable");
        let other = repo("other");
        store.sync(&stable, &charts_for(&stable, INDEX_YAML)).await.unwrap();
        store.sync(&other, &charts_for(&other, INDEX_YAML)).await.unwrap();

        store.sync(&stable, &[]).await.unwrap();

        assert!(store.list_charts("stable").await.unwrap().is_empty(), "{backend}");
        assert_eq!(store.list_charts("other").await.unwrap().len(), 2, "{backend}");
    }
}

#[tokio::test]
async fn test_import_updates_existing_chart() {
    for (backend, store) in backends() {
        let repo = repo("stable");
        let mut charts = charts_for(&repo, INDEX_WITHOUT_ACS);
        store.import_charts(&repo, &charts).await.unwrap();

        charts[0].description = "changed".to_string();
        charts[0].chart_versions.insert(
            0,
            ChartVersion {
                version: "0.8.0".to_string(),
                ..Default::default()
            },
        );
        store.import_charts(&repo, &charts).await.unwrap();

        let stored = store.get_chart("stable/wordpress").await.unwrap().unwrap();
        assert_eq!(stored.description, "changed", "{backend}");
        assert_eq!(stored.latest_version().unwrap().version, "0.8.0", "{backend}");
        assert_eq!(store.list_charts("stable").await.unwrap().len(), 1, "{backend}");
    }
}

#[tokio::test]
async fn test_repo_already_processed() {
    for (backend, store) in backends() {
        let repo = repo("stable");
        assert!(!store.repo_already_processed("stable", "abc").await, "{backend}");

        let now = Utc.with_ymd_and_hms(2021, 3, 4, 5, 6, 7).unwrap();
        store.update_last_check(&repo, "abc", now).await.unwrap();
        assert!(store.repo_already_processed("stable", "abc").await, "{backend}");
        assert!(!store.repo_already_processed("stable", "def").await, "{backend}");
        assert!(!store.repo_already_processed("other", "abc").await, "{backend}");

        let checkpoint = store.get_checkpoint("stable").await.unwrap().unwrap();
        assert_eq!(checkpoint.checksum, "abc", "{backend}");
        assert_eq!(checkpoint.last_update, now, "{backend}");

        store.update_last_check(&repo, "def", Utc::now()).await.unwrap();
        assert!(store.repo_already_processed("stable", "def").await, "{backend}");
        assert!(!store.repo_already_processed("stable", "abc").await, "{backend}");
    }
}

#[tokio::test]
async fn test_delete_repo_only_touches_that_repo() {
    for (backend, store) in backends() {
        let stable = repo("stable");
        let other = repo("other");

        for r in [&stable, &other] {
            store.sync(r, &charts_for(r, INDEX_YAML)).await.unwrap();
            store.update_last_check(r, "abc", Utc::now()).await.unwrap();
            let chart_id = format!("{}/wordpress", r.name);
            store
                .insert_chart_files(&chart_id, &files(r, &chart_id, "0.7.5", "d1"))
                .await
                .unwrap();
        }

        store.delete_repo("stable").await.unwrap();

        assert!(store.list_charts("stable").await.unwrap().is_empty(), "{backend}");
        assert!(store.get_checkpoint("stable").await.unwrap().is_none(), "{backend}");
        assert!(
            store.get_chart_files("stable/wordpress-0.7.5").await.unwrap().is_none(),
            "{backend}"
        );

        assert_eq!(store.list_charts("other").await.unwrap().len(), 2, "{backend}");
        assert!(store.get_checkpoint("other").await.unwrap().is_some(), "{backend}");
        assert!(
            store.get_chart_files("other/wordpress-0.7.5").await.unwrap().is_some(),
            "{backend}"
        );
    }
}

#[tokio::test]
async fn test_chart_files_existence_is_keyed_by_digest() {
    for (backend, store) in backends() {
        let repo = repo("stable");
        let record = files(&repo, "stable/wordpress", "0.7.5", "d1");

        assert!(
            !store
                .chart_files_exist(&record.id, "stable", "default", "d1")
                .await
                .unwrap(),
            "{backend}"
        );

        store.insert_chart_files("stable/wordpress", &record).await.unwrap();
        store.insert_chart_files("stable/wordpress", &record).await.unwrap();

        assert!(
            store
                .chart_files_exist(&record.id, "stable", "default", "d1")
                .await
                .unwrap(),
            "{backend}"
        );
        assert!(
            !store
                .chart_files_exist(&record.id, "stable", "default", "d2")
                .await
                .unwrap(),
            "{backend}"
        );
        assert!(
            !store
                .chart_files_exist(&record.id, "stable", "kube-system", "d1")
                .await
                .unwrap(),
            "{backend}"
        );
        assert_eq!(
            store.get_chart_files(&record.id).await.unwrap(),
            Some(record),
            "{backend}"
        );
    }
}

#[tokio::test]
async fn test_update_icon() {
    for (backend, store) in backends() {
        let repo = repo("stable");
        store.sync(&repo, &charts_for(&repo, INDEX_YAML)).await.unwrap();

        store
            .update_icon(&repo, "stable/wordpress", b"\x89PNG", "image/png")
            .await
            .unwrap();

        let chart = store.get_chart("stable/wordpress").await.unwrap().unwrap();
        assert_eq!(chart.raw_icon.as_deref(), Some(&b"\x89PNG"[..]), "{backend}");
        assert_eq!(chart.icon_content_type.as_deref(), Some("image/png"), "{backend}");
        assert_eq!(chart.chart_versions.len(), 2, "{backend}");

        assert!(
            store
                .update_icon(&repo, "stable/missing", b"x", "image/png")
                .await
                .is_err(),
            "{backend}"
        );
    }
}
