use super::*;
use tempfile::TempDir;

fn test_workspace() -> (Workspace, TempDir) {
    let temp = TempDir::new().expect("can create temp dir");
    let workspace = Workspace::new(temp.path(), &WorkspaceConfig::default())
        .expect("can create workspace");
    (workspace, temp)
}

#[test]
fn create_and_list_issues() {
    let (workspace, _temp) = test_workspace();

    workspace.create_issue("incident-42").expect("can create issue");
    workspace.create_issue("incident-7").expect("can create issue");

    let issues = workspace.list_issues().expect("can list issues");
    assert_eq!(issues, vec!["incident-42", "incident-7"]);
}

#[test]
fn create_duplicate_issue_fails() {
    let (workspace, _temp) = test_workspace();

    workspace.create_issue("incident-42").expect("can create issue");
    assert!(matches!(
        workspace.create_issue("incident-42"),
        Err(LensError::Workspace(_))
    ));
}

#[test]
fn invalid_issue_ids_are_rejected() {
    let (workspace, _temp) = test_workspace();

    assert!(workspace.create_issue("").is_err());
    assert!(workspace.create_issue("../escape").is_err());
    assert!(workspace.create_issue("has space").is_err());
}

#[test]
fn new_issue_has_empty_metadata() {
    let (workspace, _temp) = test_workspace();
    workspace.create_issue("incident-42").expect("can create issue");

    let metadata = workspace.load_metadata("incident-42").expect("can load metadata");
    assert_eq!(metadata.issue_id, "incident-42");
    assert_eq!(metadata.model_id, None);
    assert_eq!(metadata.chunk_count, 0);
    assert_eq!(metadata.last_build_status, BuildStatus::NeverBuilt);
    assert_eq!(metadata.index_dir, None);
}

#[test]
fn raw_logs_are_append_only() {
    let (workspace, _temp) = test_workspace();
    workspace.create_issue("incident-42").expect("can create issue");

    workspace
        .add_raw_log("incident-42", "app.log", b"line one\n")
        .expect("can add log");

    assert!(matches!(
        workspace.add_raw_log("incident-42", "app.log", b"other content\n"),
        Err(LensError::Workspace(_))
    ));
}

#[test]
fn raw_log_files_filter_by_extension() {
    let (workspace, _temp) = test_workspace();
    workspace.create_issue("incident-42").expect("can create issue");

    workspace
        .add_raw_log("incident-42", "app.log", b"logs\n")
        .expect("can add log");
    workspace
        .add_raw_log("incident-42", "trace.txt", b"trace\n")
        .expect("can add log");
    workspace
        .add_raw_log("incident-42", "core.dump", b"\x7fELF")
        .expect("can add log");

    let files = workspace.raw_log_files("incident-42").expect("can list files");
    let names: Vec<String> = files
        .iter()
        .map(|p| p.file_name().expect("has name").to_string_lossy().into_owned())
        .collect();

    assert_eq!(names, vec!["app.log", "trace.txt"]);
}

#[test]
fn filenames_are_sanitized() {
    let (workspace, _temp) = test_workspace();
    workspace.create_issue("incident-42").expect("can create issue");

    let path = workspace
        .add_raw_log("incident-42", "../../etc/passwd.log", b"nope\n")
        .expect("can add log");

    let name = path.file_name().expect("has name").to_string_lossy().into_owned();
    assert!(!name.contains('/'));
    assert!(path.starts_with(workspace.raw_logs_dir("incident-42")));
}

#[test]
fn metadata_round_trips() {
    let (workspace, _temp) = test_workspace();
    workspace.create_issue("incident-42").expect("can create issue");

    let mut metadata = workspace.load_metadata("incident-42").expect("can load metadata");
    metadata.model_id = Some("local:token-hash:64".to_string());
    metadata.chunk_count = 12;
    metadata.last_build_status = BuildStatus::Ok;
    metadata.index_dir = Some("build-20240115T103045".to_string());
    workspace
        .save_metadata("incident-42", &metadata)
        .expect("can save metadata");

    let reloaded = workspace.load_metadata("incident-42").expect("can load metadata");
    assert_eq!(reloaded, metadata);
}

#[test]
fn missing_issue_metadata_is_no_knowledge_base() {
    let (workspace, _temp) = test_workspace();
    assert!(matches!(
        workspace.load_metadata("ghost"),
        Err(LensError::NoKnowledgeBase(_))
    ));
}

#[test]
fn prune_keeps_the_committed_index() {
    let (workspace, _temp) = test_workspace();
    workspace.create_issue("incident-42").expect("can create issue");

    let (first_id, first_path) = workspace
        .allocate_index_dir("incident-42")
        .expect("can allocate");
    let (second_id, second_path) = workspace
        .allocate_index_dir("incident-42")
        .expect("can allocate");
    assert_ne!(first_id, second_id);

    workspace.prune_index_dirs("incident-42", &second_id);

    assert!(!first_path.exists());
    assert!(second_path.exists());
}

#[test]
fn delete_issue_removes_everything() {
    let (workspace, _temp) = test_workspace();
    workspace.create_issue("incident-42").expect("can create issue");
    workspace
        .add_raw_log("incident-42", "app.log", b"logs\n")
        .expect("can add log");

    workspace.delete_issue("incident-42").expect("can delete issue");

    assert!(!workspace.issue_exists("incident-42"));
    assert!(workspace.list_issues().expect("can list").is_empty());
}
