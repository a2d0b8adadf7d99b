use contact_identity_api::{cluster, identify, IdentifyRequest, IdentityConfig, ResponseStatus};
use std::time::Duration;
use tempfile::TempDir;

// Single test: the installed config is process-wide.
#[test]
fn installed_config_drives_identify_and_cluster() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("configured.sqlite3");
    let config = IdentityConfig {
        db_path: db_path.clone(),
        resolve_timeout: Some(Duration::from_secs(30)),
        ..IdentityConfig::default()
    };
    config.clone().install().unwrap();
    assert_eq!(IdentityConfig::global(), &config);
    assert!(config.install().is_err());

    let created = identify(&IdentifyRequest::new(Some("doc@hillvalley.edu"), Some("88")));
    assert_eq!(created.status, ResponseStatus::CreatedNew);
    assert!(db_path.exists());

    let linked = identify(&IdentifyRequest::new(Some("emmett@hillvalley.edu"), Some("88")));
    assert_eq!(linked.status, ResponseStatus::LinkedNewSecondary);
    let view = linked.contact.unwrap();

    let found = cluster(view.secondary_contact_ids[0]);
    assert!(found.ok);
    assert_eq!(found.contact.unwrap(), view);

    let missing = cluster(view.primary_contact_id + 100);
    assert_eq!(missing.status, ResponseStatus::NotFound);
}
