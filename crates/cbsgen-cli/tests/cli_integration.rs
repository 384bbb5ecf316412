//! CLI subprocess integration tests.
//!
//! These tests invoke the `cbsgen` binary as a subprocess and check exit
//! codes, human output, and JSON payloads.

use cbsgen_store::ContentDigest;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

const FOO_DLL: &[u8] = b"foo.dll as shipped on the device";

fn cbsgen_bin() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_cbsgen"));
    // keep a developer's ~/.config/cbsgen out of the tests
    cmd.env("HOME", "/nonexistent-cbsgen-home");
    cmd.env_remove("CBSGEN_LOG");
    cmd
}

fn write(path: &Path, data: &[u8]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, data).unwrap();
}

/// Extracted image with one servicing package on `MainOS`.
fn write_image(root: &Path, foo_dll: &[u8]) {
    let main = root.join("MainOS");
    let mum = r#"<assembly><assemblyIdentity name="Microsoft-Foo" version="10.0.1.0" processorArchitecture="arm64" language="neutral" publicKeyToken="31bf3856ad364e35"/>
<package targetPartition="MainOS"><customInformation>
<file name="update.mum" cabpath="update.mum"/>
<file name="$(runtime.system32)\foo.dll" cabpath="foo\foo.dll"/>
<file name="foo.manifest" cabpath="foo.manifest"/>
</customInformation></package></assembly>"#;
    let manifest = format!(
        r#"<assembly xmlns:dsig="http://www.w3.org/2000/09/xmldsig#"><assemblyIdentity name="foo"/>
<file name="foo.dll"><hash><dsig:DigestValue>{}</dsig:DigestValue></hash></file></assembly>"#,
        ContentDigest::sha256(FOO_DLL).to_base64()
    );
    write(
        &main.join("Windows/servicing/Packages/Microsoft-Foo~31bf3856ad364e35~arm64~~10.0.1.0.mum"),
        mum.as_bytes(),
    );
    write(&main.join("Windows/System32/foo.dll"), foo_dll);
    write(&main.join("Windows/WinSxS/Manifests/foo.manifest"), manifest.as_bytes());
}

fn build(image: &Path, out: &Path, extra: &[&str]) -> std::process::Output {
    cbsgen_bin()
        .arg("build")
        .arg(image)
        .arg("-o")
        .arg(out)
        .args(extra)
        .output()
        .unwrap()
}

fn container(out: &Path) -> PathBuf {
    out.join("MainOS/Microsoft-Foo~31bf3856ad364e35~arm64~~.cab")
}

#[test]
fn cli_version_exits_zero() {
    let output = cbsgen_bin().arg("--version").output().unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("cbsgen"));
}

#[test]
fn cli_help_lists_commands() {
    let output = cbsgen_bin().arg("--help").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for command in ["build", "verify", "pack", "packages", "completions"] {
        assert!(stdout.contains(command), "help must list '{command}'");
    }
}

#[test]
fn cli_build_then_verify_succeeds() {
    let image = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_image(image.path(), FOO_DLL);

    let output = build(image.path(), out.path(), &[]);
    assert!(
        output.status.success(),
        "build must exit 0. stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(container(out.path()).is_file());

    let output = cbsgen_bin().arg("verify").arg(out.path()).output().unwrap();
    assert!(
        output.status.success(),
        "verify must exit 0. stdout: {}",
        String::from_utf8_lossy(&output.stdout)
    );
    assert!(String::from_utf8_lossy(&output.stdout).contains("1 packages checked, 0 failed"));
}

#[test]
fn cli_build_json_reports_outcome() {
    let image = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_image(image.path(), FOO_DLL);

    let output = build(image.path(), out.path(), &["--json", "--jobs", "1"]);
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let package = &json["packages"][0];
    assert_eq!(package["partition"], "MainOS");
    assert_eq!(package["kind"], "package");
    assert_eq!(package["outcome"]["status"], "built");
    assert_eq!(package["outcome"]["entries"], 3);

    let again = build(image.path(), out.path(), &["--json"]);
    let json: serde_json::Value = serde_json::from_slice(&again.stdout).unwrap();
    assert_eq!(json["packages"][0]["outcome"]["status"], "skipped");
}

#[test]
fn cli_verify_reports_mismatch_with_exit_code() {
    let image = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_image(image.path(), b"patched foo.dll");
    assert!(build(image.path(), out.path(), &[]).status.success());

    let output = cbsgen_bin().arg("verify").arg(container(out.path())).output().unwrap();
    assert_eq!(output.status.code(), Some(4));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(r"foo\foo.dll"));
    assert!(stdout.contains(&ContentDigest::sha256(FOO_DLL).to_hex_upper()));
    assert!(stdout.contains(&ContentDigest::sha256(b"patched foo.dll").to_hex_upper()));
}

#[test]
fn cli_verify_json_payload() {
    let image = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_image(image.path(), FOO_DLL);
    assert!(build(image.path(), out.path(), &[]).status.success());

    let output = cbsgen_bin()
        .args(["verify", "--json"])
        .arg(out.path())
        .output()
        .unwrap();
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let result = &json["packages"][0]["results"][0];
    assert_eq!(result["placement_path"], r"foo\foo.dll");
    assert_eq!(result["verdict"], "match");
}

#[test]
fn cli_pack_then_verify_packed_tree() {
    let src = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_image(src.path(), FOO_DLL);
    let main = src.path().join("MainOS");
    let tree = tempfile::tempdir().unwrap();
    fs::copy(
        main.join("Windows/servicing/Packages/Microsoft-Foo~31bf3856ad364e35~arm64~~10.0.1.0.mum"),
        tree.path().join("update.mum"),
    )
    .unwrap();
    fs::copy(main.join("Windows/WinSxS/Manifests/foo.manifest"), tree.path().join("foo.manifest")).unwrap();
    write(&tree.path().join("foo/foo.dll"), FOO_DLL);

    let dest = out.path().join("packed.cab");
    let output = cbsgen_bin().arg("pack").arg(&dest).arg(tree.path()).output().unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("packed 3 files"));

    let output = cbsgen_bin().arg("verify").arg(&dest).output().unwrap();
    assert!(output.status.success());
}

#[test]
fn cli_packages_lists_manifests() {
    let image = tempfile::tempdir().unwrap();
    write_image(image.path(), FOO_DLL);
    let output = cbsgen_bin().arg("packages").arg(image.path()).output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Microsoft-Foo~31bf3856ad364e35~arm64~~10.0.1.0.mum"));
    assert!(stdout.contains("1 packages"));
}

#[test]
fn cli_invalid_config_is_a_manifest_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.toml");
    fs::write(&config, "jobs = 0\n").unwrap();
    let output = cbsgen_bin()
        .arg("--config")
        .arg(&config)
        .arg("verify")
        .arg(dir.path())
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn cli_missing_image_fails() {
    let out = tempfile::tempdir().unwrap();
    let output = build(&out.path().join("no-such-image"), &out.path().join("out"), &[]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("error:"));
}

#[test]
fn cli_completions_bash() {
    let output = cbsgen_bin().args(["completions", "bash"]).output().unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("cbsgen"));
}
