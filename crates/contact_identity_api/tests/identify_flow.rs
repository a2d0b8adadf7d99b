use contact_identity_api::{
    cluster_with, identify_with, IdentifyRequest, IdentifyResponse, ResponseStatus,
};
use contact_identity_core::db::open_db;
use contact_identity_core::ResolveOptions;
use rusqlite::Connection;
use tempfile::TempDir;

fn send(conn: &mut Connection, email: Option<&str>, phone: Option<&str>) -> IdentifyResponse {
    identify_with(
        conn,
        &IdentifyRequest::new(email, phone),
        &ResolveOptions::default(),
    )
}

#[test]
fn clusters_survive_reopening_the_database() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("identity.sqlite3");

    let primary_id = {
        let mut conn = open_db(&db_path).unwrap();
        let created = send(&mut conn, Some("lorraine@hillvalley.edu"), Some("123456"));
        assert_eq!(created.status, ResponseStatus::CreatedNew);
        let linked = send(&mut conn, Some("mcfly@hillvalley.edu"), Some("123456"));
        assert_eq!(linked.status, ResponseStatus::LinkedNewSecondary);
        linked.contact.unwrap().primary_contact_id
    };

    let mut conn = open_db(&db_path).unwrap();
    let known = send(&mut conn, Some("mcfly@hillvalley.edu"), None);
    assert_eq!(known.status, ResponseStatus::AlreadyKnown);
    let view = known.contact.unwrap();
    assert_eq!(view.primary_contact_id, primary_id);
    assert_eq!(
        view.emails,
        vec!["lorraine@hillvalley.edu", "mcfly@hillvalley.edu"]
    );
    assert_eq!(view.phone_numbers, vec!["123456"]);
}

#[test]
fn bridging_request_merges_into_oldest_primary() {
    let dir = TempDir::new().unwrap();
    let mut conn = open_db(dir.path().join("identity.sqlite3")).unwrap();

    let george = send(&mut conn, Some("george@hillvalley.edu"), Some("919191"))
        .contact
        .unwrap();
    let biff = send(&mut conn, Some("biffsucks@hillvalley.edu"), Some("717171"))
        .contact
        .unwrap();
    assert_ne!(george.primary_contact_id, biff.primary_contact_id);

    let merged = send(&mut conn, Some("george@hillvalley.edu"), Some("717171"));
    assert!(merged.ok);
    assert_eq!(merged.status, ResponseStatus::AlreadyKnown);
    let view = merged.contact.unwrap();
    assert_eq!(view.primary_contact_id, george.primary_contact_id);
    assert_eq!(
        view.emails,
        vec!["george@hillvalley.edu", "biffsucks@hillvalley.edu"]
    );
    assert_eq!(view.phone_numbers, vec!["919191", "717171"]);
    assert_eq!(view.secondary_contact_ids, vec![biff.primary_contact_id]);

    let from_demoted = cluster_with(&mut conn, biff.primary_contact_id);
    assert_eq!(from_demoted.contact.unwrap(), view);
}

#[test]
fn rejected_request_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let mut conn = open_db(dir.path().join("identity.sqlite3")).unwrap();

    let response = send(&mut conn, Some(""), None);
    assert_eq!(response.status, ResponseStatus::ValidationError);

    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM contacts", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 0);
}
