use assert_cmd::Command;
use assert_cmd::cargo;
use mockito::Server;
use predicates::prelude::*;
use std::io::Write;
use std::path::Path;
use tempfile::tempdir;

const HOST: &str = "com.test.host";

fn bundle_bytes(manifest: &str, files: &[(&str, &str)]) -> Vec<u8> {
    use zip::write::FileOptions;

    let mut zip = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options: FileOptions<()> = FileOptions::default();

    zip.start_file("mod.json", options).unwrap();
    zip.write_all(manifest.as_bytes()).unwrap();
    for (name, content) in files {
        zip.start_file(*name, options).unwrap();
        zip.write_all(content.as_bytes()).unwrap();
    }

    zip.finish().unwrap().into_inner()
}

fn create_bundle(path: &Path, manifest: &str, files: &[(&str, &str)]) {
    std::fs::write(path, bundle_bytes(manifest, files)).unwrap();
}

fn qpkg(root: &Path) -> Command {
    let mut cmd = Command::new(cargo::cargo_bin!("qpkg"));
    cmd.arg("--root")
        .arg(root)
        .arg("--host-package")
        .arg(HOST)
        .env_remove("QPKG_ROOT");
    cmd
}

fn read_ledger(root: &Path) -> serde_json::Value {
    let raw = std::fs::read_to_string(root.join("config.json")).unwrap();
    serde_json::from_str(&raw).unwrap()
}

#[test]
fn test_end_to_end_install() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("root");

    let bundle = dir.path().join("Example Mod.qmod");
    create_bundle(
        &bundle,
        &format!(
            r#"{{
                "name": "Example Mod",
                "id": "example-mod",
                "version": "1.0.0",
                "author": "someone",
                "packageId": "{}",
                "modFiles": ["libexample.so"],
                "libraryFiles": ["libcore.so"]
            }}"#,
            HOST
        ),
        &[("libexample.so", "mod binary"), ("libcore.so", "lib binary")],
    );

    qpkg(&root)
        .arg("install")
        .arg(&bundle)
        .assert()
        .success()
        .stdout(predicate::str::contains("installed example-mod 1.0.0"));

    // files placed into the managed folders
    assert!(root.join("files/mods/libexample.so").exists());
    assert!(root.join("files/libs/libcore.so").exists());

    // bundle relocated into storage under its display name
    assert!(root.join("Mods/Example_Mod.qmod").exists());
    assert!(!bundle.exists());

    // exactly one ledger entry, marked installed
    let ledger = read_ledger(&root);
    let mods = ledger["Mods"].as_array().unwrap();
    assert_eq!(mods.len(), 1);
    assert_eq!(mods[0]["Id"], "example-mod");
    assert_eq!(mods[0]["Version"], "1.0.0");
    assert_eq!(mods[0]["Installed"], true);
    assert_eq!(mods[0]["TogglingOnSync"], false);
    assert_eq!(mods[0]["Porter"], serde_json::Value::Null);

    // scratch space cleaned
    assert!(!root.join("Mods/Temp").exists());
}

#[test]
fn test_install_fetches_missing_dependency() {
    let mut server = Server::new();
    let url = server.url();

    let dep_bytes = bundle_bytes(
        &format!(
            r#"{{"id": "core-lib", "version": "1.2.0", "packageId": "{}", "modFiles": ["libcore-lib.so"]}}"#,
            HOST
        ),
        &[("libcore-lib.so", "core binary")],
    );
    let mock_download = server
        .mock("GET", "/core-lib.qmod")
        .with_status(200)
        .with_body(&dep_bytes)
        .create();

    let dir = tempdir().unwrap();
    let root = dir.path().join("root");

    let bundle = dir.path().join("needy.qmod");
    create_bundle(
        &bundle,
        &format!(
            r#"{{
                "id": "needy",
                "version": "1.0.0",
                "packageId": "{}",
                "modFiles": ["libneedy.so"],
                "dependencies": [
                    {{"id": "core-lib", "version": "^1.0.0", "downloadIfMissing": "{}/core-lib.qmod"}}
                ]
            }}"#,
            HOST, url
        ),
        &[("libneedy.so", "needy binary")],
    );

    qpkg(&root).arg("install").arg(&bundle).assert().success();

    mock_download.assert();

    // dependency fetched, installed first, then the requesting package
    assert!(root.join("files/mods/libcore-lib.so").exists());
    assert!(root.join("files/mods/libneedy.so").exists());
    assert!(root.join("Mods/core-lib.qmod").exists());

    let ledger = read_ledger(&root);
    let mods = ledger["Mods"].as_array().unwrap();
    assert_eq!(mods.len(), 2);
    assert_eq!(mods[0]["Id"], "core-lib");
    assert_eq!(mods[1]["Id"], "needy");
}

#[test]
fn test_install_fails_without_dependency_source() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("root");

    let bundle = dir.path().join("needy.qmod");
    create_bundle(
        &bundle,
        &format!(
            r#"{{
                "id": "needy",
                "version": "1.0.0",
                "packageId": "{}",
                "dependencies": [{{"id": "nowhere", "version": "^1.0.0"}}]
            }}"#,
            HOST
        ),
        &[],
    );

    qpkg(&root)
        .arg("install")
        .arg(&bundle)
        .assert()
        .failure()
        .stderr(predicate::str::contains("nowhere"));

    // nothing recorded
    assert!(!root.join("config.json").exists());
}

#[test]
fn test_install_rejects_bundle_for_other_host() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("root");

    let bundle = dir.path().join("foreign.qmod");
    create_bundle(
        &bundle,
        r#"{"id": "foreign", "version": "1.0.0", "packageId": "com.other.app"}"#,
        &[],
    );

    qpkg(&root)
        .arg("install")
        .arg(&bundle)
        .assert()
        .failure()
        .stderr(predicate::str::contains("com.other.app"));

    assert!(bundle.exists());
}

#[test]
fn test_install_url_command() {
    let mut server = Server::new();
    let url = server.url();

    let bytes = bundle_bytes(
        &format!(
            r#"{{"id": "remote-mod", "version": "0.4.0", "packageId": "{}", "modFiles": ["libremote.so"]}}"#,
            HOST
        ),
        &[("libremote.so", "remote binary")],
    );
    let mock_download = server
        .mock("GET", "/remote.qmod")
        .with_status(200)
        .with_body(&bytes)
        .create();

    let dir = tempdir().unwrap();
    let root = dir.path().join("root");

    qpkg(&root)
        .arg("install-url")
        .arg("remote.qmod")
        .arg(format!("{}/remote.qmod", url))
        .assert()
        .success()
        .stdout(predicate::str::contains("installed remote-mod 0.4.0"));

    mock_download.assert();
    assert!(root.join("files/mods/libremote.so").exists());
    assert!(root.join("Mods/remote.qmod").exists());

    let ledger = read_ledger(&root);
    assert_eq!(ledger["Mods"].as_array().unwrap().len(), 1);
}

#[test]
fn test_list_command_reads_ledger() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("root");

    let bundle = dir.path().join("example.qmod");
    create_bundle(
        &bundle,
        &format!(
            r#"{{"id": "example", "version": "1.0.0", "packageId": "{}"}}"#,
            HOST
        ),
        &[],
    );

    qpkg(&root).arg("install").arg(&bundle).assert().success();

    qpkg(&root)
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("example 1.0.0 installed"));
}

#[test]
fn test_reinstall_is_idempotent_across_runs() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("root");

    let bundle = dir.path().join("example.qmod");
    create_bundle(
        &bundle,
        &format!(
            r#"{{"id": "example", "version": "1.0.0", "packageId": "{}", "modFiles": ["libexample.so"]}}"#,
            HOST
        ),
        &[("libexample.so", "x")],
    );

    qpkg(&root).arg("install").arg(&bundle).assert().success();

    // second run: the bundle now lives in storage; installing it again is a
    // no-op because the ledger already records it as installed
    let stored = root.join("Mods/example.qmod");
    assert!(stored.exists());
    qpkg(&root).arg("install").arg(&stored).assert().success();

    let ledger = read_ledger(&root);
    assert_eq!(ledger["Mods"].as_array().unwrap().len(), 1);
}
