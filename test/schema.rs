// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::TreeFixture;

use anyhow::Result;
use indoc::indoc;
use osinfo_db_tools::{
    validate::{Error, SCHEMA_FILE},
    ArchiveReader, DatabaseLocation, ErrorKind, LocationResolver, Tier, Validator,
};
use pretty_assertions::assert_eq;
use std::io::Cursor;

const OSINFO_RNG: &str = indoc! {r#"
    <?xml version="1.0"?>
    <grammar xmlns="http://relaxng.org/ns/structure/1.0"
             datatypeLibrary="http://www.w3.org/2001/XMLSchema-datatypes">
      <start>
        <ref name="libosinfo"/>
      </start>

      <define name="libosinfo">
        <element name="libosinfo">
          <attribute name="version">
            <value>0.0.1</value>
          </attribute>
          <zeroOrMore>
            <choice>
              <ref name="os"/>
              <ref name="device"/>
            </choice>
          </zeroOrMore>
        </element>
      </define>

      <define name="identifier">
        <attribute name="id">
          <data type="anyURI"/>
        </attribute>
      </define>

      <define name="os">
        <element name="os">
          <ref name="identifier"/>
          <interleave>
            <element name="short-id"><text/></element>
            <element name="name"><text/></element>
            <optional>
              <element name="release-date">
                <data type="date"/>
              </element>
            </optional>
          </interleave>
        </element>
      </define>

      <define name="device">
        <element name="device">
          <ref name="identifier"/>
          <element name="name"><text/></element>
        </element>
      </define>
    </grammar>
"#};

const DEBIAN: &str = indoc! {r#"
    <?xml version="1.0" encoding="UTF-8"?>
    <libosinfo version="0.0.1">
      <!-- Debian stable -->
      <os id="http://debian.org/debian/12">
        <name>Debian 12</name>
        <short-id>debian12</short-id>
        <release-date>2023-06-10</release-date>
      </os>
    </libosinfo>
"#};

const VIRTIO: &str = indoc! {r#"
    <libosinfo version="0.0.1">
      <device id="http://pcisig.com/pci/1af4/1000">
        <name>Virtio network device</name>
      </device>
    </libosinfo>
"#};

fn database() -> Result<TreeFixture> {
    let tree = TreeFixture::new()?;
    tree.write(SCHEMA_FILE, OSINFO_RNG)?;
    tree.write("os/debian.org/debian-12.xml", DEBIAN)?;
    tree.write("device/pci.ids", "1af4 Red Hat, Inc.")?;
    tree.write("device/pci/virtio-net.xml", VIRTIO)?;
    Ok(tree)
}

fn validator(tree: &TreeFixture) -> Result<Validator> {
    let resolver = LocationResolver::new("").with_privileged(false);
    let schema = resolver.find_with_fallback(&Tier::Custom(tree.path().into()), SCHEMA_FILE)?;
    Ok(Validator::new(schema)?)
}

#[test]
fn validates_imported_database() -> Result<()> {
    let tree = database()?;
    let archive = tree.export("20240101")?;

    let target = TreeFixture::new()?;
    let location = DatabaseLocation::new(target.path());
    ArchiveReader::new().unpack(Cursor::new(archive), &location)?;

    validator(&target)?.validate_all(&[target.path()])?;

    Ok(())
}

#[test]
fn reports_first_invalid_document() -> Result<()> {
    let tree = database()?;
    tree.write(
        "os/debian.org/debian-13.xml",
        indoc! {r#"
            <libosinfo version="0.0.1">
              <os id="http://debian.org/debian/13">
                <short-id>debian13</short-id>
                <release-date>not a date</release-date>
              </os>
            </libosinfo>
        "#},
    )?;

    let error = validator(&tree)?.validate_all(&[tree.path()]).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Format);
    match error {
        Error::Invalid { uri, line, .. } => {
            assert!(uri.starts_with("file://"), "{uri}");
            assert!(uri.ends_with("os/debian.org/debian-13.xml"), "{uri}");
            assert_eq!(line, 4);
        }
        other => panic!("unexpected error {other:?}"),
    }

    Ok(())
}

#[test]
fn unparsed_files_pass_suffix_gate() -> Result<()> {
    let tree = database()?;
    tree.write("x.rng", "<grammar><unterminated")?;
    tree.write("notes.txt", "<<<")?;

    validator(&tree)?.validate_all(&[tree.path().join("x.rng"), tree.path().to_path_buf()])?;

    Ok(())
}

#[test]
fn explicit_file_targets() -> Result<()> {
    let tree = database()?;
    tree.write("broken.xml", "<libosinfo version=\"0.0.2\"/>")?;
    let validator = validator(&tree)?;

    validator.validate_all(&[tree.path().join("device/pci/virtio-net.xml")])?;
    let error = validator
        .validate_all(&[tree.path().join("broken.xml")])
        .unwrap_err();
    assert!(matches!(error, Error::Invalid { line: 1, .. }), "{error:?}");

    Ok(())
}
