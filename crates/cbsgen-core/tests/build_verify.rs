use cbsgen_core::{AssembleOutcome, Builder, Config, Verdict, Verifier, VerifyOptions};
use cbsgen_image::{Disk, MemoryDisk, MemoryFileSystem, MemoryPartition};
use cbsgen_store::{ContainerCodec, ContentDigest, TarCodec};

const FOO_DLL: &[u8] = b"arm32 build of foo.dll";
const SETTINGS: &[u8] = b"<settings/>";
const CANONICAL: &str = "Microsoft-Foo~31bf3856ad364e35~arm64.arm~~10.0.1.0";

fn package_manifest() -> String {
    r#"<?xml version="1.0" encoding="utf-8"?>
<assembly xmlns="urn:schemas-microsoft-com:asm.v3" manifestVersion="1.0">
  <assemblyIdentity name="Microsoft-Foo" version="10.0.1.0" processorArchitecture="arm64.arm" language="neutral" publicKeyToken="31bf3856ad364e35" />
  <package identifier="Microsoft-Foo" targetPartition="MainOS">
    <customInformation>
      <file name="update.mum" cabpath="update.mum" />
      <file name="$(runtime.system32)\foo.dll" cabpath="foo\foo.dll" size="22" />
      <file name="data\config\settings.xml" cabpath="foo\settings.xml" size="11" />
      <file name="$(runtime.system32)\missing.dll" cabpath="foo\missing.dll" />
      <file name="foo.manifest" cabpath="foo.manifest" />
    </customInformation>
  </package>
</assembly>"#
        .to_owned()
}

fn component_manifest() -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?>
<assembly xmlns="urn:schemas-microsoft-com:asm.v3" xmlns:dsig="http://www.w3.org/2000/09/xmldsig#" manifestVersion="1.0">
  <assemblyIdentity name="foo" version="10.0.1.0" processorArchitecture="arm64.arm" language="neutral" publicKeyToken="31bf3856ad364e35" />
  <file name="foo.dll" destinationPath="$(runtime.system32)\">
    <asmv2:hash xmlns:asmv2="urn:schemas-microsoft-com:asm.v2">
      <dsig:DigestMethod Algorithm="http://www.w3.org/2000/09/xmldsig#sha256" />
      <dsig:DigestValue>{}</dsig:DigestValue>
    </asmv2:hash>
  </file>
  <file name="settings.xml">
    <asmv2:hash xmlns:asmv2="urn:schemas-microsoft-com:asm.v2">
      <dsig:DigestValue>{}</dsig:DigestValue>
    </asmv2:hash>
  </file>
</assembly>"#,
        ContentDigest::sha256(FOO_DLL).to_base64(),
        ContentDigest::sha256(SETTINGS).to_base64(),
    )
}

fn image(foo_dll: &[u8], history: Option<&str>) -> Vec<Box<dyn Disk>> {
    let mut main = MemoryFileSystem::new()
        .with_file(
            &format!(r"Windows\servicing\Packages\{CANONICAL}.mum"),
            package_manifest().into_bytes(),
        )
        .with_file(r"Windows\SysArm32\foo.dll", foo_dll.to_vec())
        .with_file(r"Windows\WinSxS\Manifests\foo.manifest", component_manifest().into_bytes());
    if let Some(history) = history {
        main = main.with_file(r"Windows\ImageUpdate\UpdateHistory.xml", history.as_bytes().to_vec());
    }
    let data = MemoryFileSystem::new().with_file(r"Config\Settings.xml", SETTINGS.to_vec());
    vec![Box::new(MemoryDisk::new(vec![
        MemoryPartition::with_filesystem("MainOS", main),
        MemoryPartition::with_filesystem("Data\0\0\0", data),
    ]))]
}

fn config() -> Config {
    Config {
        jobs: Some(2),
        ..Config::default()
    }
}

fn verify_options() -> VerifyOptions {
    VerifyOptions {
        jobs: 2,
        unit_timeout: None,
    }
}

#[test]
fn rebuilt_package_verifies() {
    let disks = image(FOO_DLL, None);
    let codec = TarCodec::default();
    let out = tempfile::tempdir().unwrap();

    let report = Builder::new(&disks, config(), &codec)
        .build_all(out.path(), None)
        .unwrap();
    assert!(report.is_success());
    assert_eq!(report.built(), 1);
    assert_eq!(report.missing_files(), 1);
    match &report.packages[0].outcome {
        Some(AssembleOutcome::Built { entries, missing, .. }) => {
            assert_eq!(*entries, 4);
            assert_eq!(missing, &vec![r"$(runtime.system32)\missing.dll".to_owned()]);
        }
        other => panic!("unexpected outcome {other:?}"),
    }

    let container = out
        .path()
        .join("MainOS/Microsoft-Foo~31bf3856ad364e35~arm64.arm~~.cab");
    assert_eq!(
        codec.enumerate_entries(&container).unwrap(),
        vec![
            "update.mum".to_owned(),
            r"foo\foo.dll".to_owned(),
            r"foo\settings.xml".to_owned(),
            "foo.manifest".to_owned(),
        ]
    );
    assert_eq!(codec.extract_entry(&container, r"foo\foo.dll").unwrap(), FOO_DLL);

    let batch = Verifier::new(&codec, verify_options())
        .verify_path(out.path(), |_| {})
        .unwrap();
    assert!(batch.is_valid());
    assert_eq!(batch.packages.len(), 1);
    let results = &batch.packages[0].results;
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.verdict == Verdict::Match));
}

#[test]
fn tampered_file_fails_verification() {
    let disks = image(b"arm32 build of foo.dlX", None);
    let codec = TarCodec::default();
    let out = tempfile::tempdir().unwrap();
    Builder::new(&disks, config(), &codec)
        .build_all(out.path(), None)
        .unwrap();

    let batch = Verifier::new(&codec, verify_options())
        .verify_path(out.path(), |_| {})
        .unwrap();
    assert!(!batch.is_valid());
    let failures: Vec<_> = batch.packages[0].failures().collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].placement_path, r"foo\foo.dll");
    assert_eq!(failures[0].verdict, Verdict::Mismatch);
    assert_eq!(
        failures[0].declared_digest,
        ContentDigest::sha256(FOO_DLL).to_hex_upper()
    );
}

#[test]
fn update_history_names_the_container() {
    let history = format!(
        r"<UpdateHistory><UpdateEvents><UpdateEvent><Packages><Package>
<PackageFile>C:\Drop\Foo.cab</PackageFile><PackageIdentity>{CANONICAL}</PackageIdentity>
</Package></Packages></UpdateEvent></UpdateEvents></UpdateHistory>"
    );
    let disks = image(FOO_DLL, Some(&history));
    let codec = TarCodec::default();
    let out = tempfile::tempdir().unwrap();
    let report = Builder::new(&disks, config(), &codec)
        .build_all(out.path(), None)
        .unwrap();
    let expected = out.path().join("DriveC/Drop/Foo.cab");
    assert_eq!(report.packages[0].destination.as_deref(), Some(expected.as_path()));
    assert!(expected.is_file());
}
