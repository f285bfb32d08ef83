use tracing::warn;
use vaultsync_core::StoreError;

use super::context::SyncContext;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Removal {
    Removed,
    AlreadyGone,
    Failed(String),
}

impl Removal {
    fn from_result(result: Result<(), StoreError>) -> Self {
        match result {
            Ok(()) => Removal::Removed,
            Err(err) if err.is_not_found() => Removal::AlreadyGone,
            Err(err) => Removal::Failed(err.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteReport {
    pub record: Removal,
    pub blob: Removal,
}

/// Removes the catalog record and blob for a locally deleted file. The two
/// removals are attempted independently; absence of either is not an error.
pub async fn delete_remote(ctx: &SyncContext, name: &str) -> DeleteReport {
    ctx.status().set(format!("Deleting: {name} from cloud..."));
    let owner_id = ctx.owner_id();

    let record = match ctx.store.find_record(owner_id, name).await {
        Ok(Some(record)) => Removal::from_result(ctx.store.delete_record(&record).await),
        Ok(None) => Removal::AlreadyGone,
        Err(err) => Removal::Failed(err.to_string()),
    };
    let blob = Removal::from_result(ctx.store.delete_blob(owner_id, name).await);

    let report = DeleteReport { record, blob };
    ctx.status().set(status_line(name, &report));
    if report.record != Removal::Removed || report.blob != Removal::Removed {
        warn!(name = %name, record = ?report.record, blob = ?report.blob, "remote delete incomplete");
    }
    report
}

fn status_line(name: &str, report: &DeleteReport) -> String {
    match (&report.record, &report.blob) {
        (Removal::Failed(err), _) | (_, Removal::Failed(err)) => {
            format!("Error deleting {name}: {err}")
        }
        (Removal::AlreadyGone, _) => format!("Warning: {name} not found in cloud db."),
        (Removal::Removed, Removal::AlreadyGone) => {
            format!("Warning: {name} not in storage, DB entry removed.")
        }
        (Removal::Removed, Removal::Removed) => format!("Deleted: {name} from cloud."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::test_support::{TestEnv, record_json};
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, ResponseTemplate};

    #[test]
    fn status_lines_follow_removal_results() {
        let line = |record, blob| status_line("a.xml", &DeleteReport { record, blob });
        assert_eq!(
            line(Removal::Removed, Removal::Removed),
            "Deleted: a.xml from cloud."
        );
        assert_eq!(
            line(Removal::AlreadyGone, Removal::Removed),
            "Warning: a.xml not found in cloud db."
        );
        assert_eq!(
            line(Removal::Removed, Removal::AlreadyGone),
            "Warning: a.xml not in storage, DB entry removed."
        );
        assert_eq!(
            line(Removal::Removed, Removal::Failed("boom".into())),
            "Error deleting a.xml: boom"
        );
    }

    #[tokio::test]
    async fn removes_record_and_blob() {
        let env = TestEnv::start().await;
        env.mock_find(
            "a.xml",
            json!([record_json("r1", "a.xml", "2024-01-01T00:00:00Z")]),
        )
        .await;
        Mock::given(method("DELETE"))
            .and(path("/v1/files/r1"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&env.server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/v1/blobs/owner-1/a.xml"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&env.server)
            .await;

        let ctx = env.context();
        let report = delete_remote(&ctx, "a.xml").await;

        assert_eq!(report.record, Removal::Removed);
        assert_eq!(report.blob, Removal::Removed);
        assert_eq!(ctx.status().current(), "Deleted: a.xml from cloud.");
    }

    #[tokio::test]
    async fn missing_record_still_removes_blob() {
        let env = TestEnv::start().await;
        env.mock_find("a.xml", json!([])).await;
        Mock::given(method("DELETE"))
            .and(path("/v1/blobs/owner-1/a.xml"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&env.server)
            .await;

        let ctx = env.context();
        let report = delete_remote(&ctx, "a.xml").await;

        assert_eq!(report.record, Removal::AlreadyGone);
        assert_eq!(report.blob, Removal::Removed);
        assert_eq!(ctx.status().current(), "Warning: a.xml not found in cloud db.");
    }

    #[tokio::test]
    async fn missing_blob_is_already_gone() {
        let env = TestEnv::start().await;
        env.mock_find(
            "a.xml",
            json!([record_json("r1", "a.xml", "2024-01-01T00:00:00Z")]),
        )
        .await;
        Mock::given(method("DELETE"))
            .and(path("/v1/files/r1"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&env.server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/v1/blobs/owner-1/a.xml"))
            .respond_with(ResponseTemplate::new(404).set_body_string("object-not-found"))
            .mount(&env.server)
            .await;

        let ctx = env.context();
        let report = delete_remote(&ctx, "a.xml").await;

        assert_eq!(report.blob, Removal::AlreadyGone);
        assert_eq!(
            ctx.status().current(),
            "Warning: a.xml not in storage, DB entry removed."
        );
    }
}
