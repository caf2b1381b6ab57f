//! Reader tests against generated MDX/MDD files

mod common;

use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use tempfile::TempDir;

use mdict_hub::{DictionaryBackend, MdictBackend, MdictError, Mdd, Mdx, ResourceArchive};

const ENTRIES: &[(&str, &str)] = &[
    ("apple", "a fruit"),
    ("apply", "to put to use"),
    ("banana", "<b>yellow</b>"),
    ("color", "hue"),
    ("colour", "@@@LINK=color"),
];

fn fixture_mdx(dir: &Path) -> PathBuf {
    let path = dir.join("fixture.mdx");
    common::write_mdx(&path, "Fixture One", ENTRIES);
    path
}

fn fixture_mdd(dir: &Path) -> PathBuf {
    let path = dir.join("fixture.mdd");
    common::write_mdd(
        &path,
        &[
            ("\\hi.png", b"PNG-DATA"),
            ("\\hi.spx", b"SPX-DATA"),
            ("\\img\\logo.jpg", b"JPG-DATA"),
        ],
    );
    path
}

#[test]
fn test_mdx_header_and_keywords() {
    let tmp = TempDir::new().unwrap();
    let mdx = Mdx::new(fixture_mdx(tmp.path())).unwrap();

    assert_eq!(mdx.title(), Some("Fixture One"));
    assert_eq!(mdx.meta().version, 2.0);
    assert_eq!(mdx.keyword_count(), ENTRIES.len());
    assert_eq!(mdx.keywords(), ["apple", "apply", "banana", "color", "colour"]);
}

#[test]
fn test_mdx_lookup_across_blocks() {
    let tmp = TempDir::new().unwrap();
    let mut mdx = Mdx::new(fixture_mdx(tmp.path())).unwrap();

    for (word, definition) in ENTRIES {
        let result = mdx.lookup(word).unwrap().unwrap();
        assert_eq!(result.key_text, *word);
        assert_eq!(result.definition.trim_end(), *definition);
    }
    assert!(mdx.lookup("missing").unwrap().is_none());
}

#[test]
fn test_mdx_lookup_ignores_case_and_punctuation() {
    let tmp = TempDir::new().unwrap();
    let mut mdx = Mdx::new(fixture_mdx(tmp.path())).unwrap();

    let result = mdx.lookup("Ba-nana").unwrap().unwrap();
    assert_eq!(result.key_text, "banana");
    assert!(mdx.contains("APPLE"));
}

#[test]
fn test_mdx_prefix_associate_suggest_fuzzy() {
    let tmp = TempDir::new().unwrap();
    let mdx = Mdx::new(fixture_mdx(tmp.path())).unwrap();

    assert_eq!(mdx.prefix_keys("app"), ["apple", "apply"]);

    let associated: Vec<_> = mdx.associate("appl").iter().map(|k| k.key_text.clone()).collect();
    assert_eq!(associated, ["apple", "apply"]);

    assert_eq!(mdx.suggest("aple", 1), ["apple"]);
    assert!(mdx.suggest("aple", 6).is_empty());

    let fuzzy = mdx.fuzzy_search("colour", 5, 1);
    assert_eq!(fuzzy.len(), 1);
    assert_eq!(fuzzy[0].item.key_text, "colour");
    assert_eq!(fuzzy[0].edit_distance, 0);
}

#[test]
fn test_mdd_locate() {
    let tmp = TempDir::new().unwrap();
    let mut mdd = Mdd::new(fixture_mdd(tmp.path())).unwrap();

    assert_eq!(mdd.resource_count(), 3);

    let png = mdd.locate("\\hi.png").unwrap().unwrap();
    assert_eq!(png.key_text, "\\hi.png");
    assert_eq!(BASE64.decode(png.definition).unwrap(), b"PNG-DATA");

    // Same key once the extension is stripped; the exact key still wins
    let (key, data) = mdd.locate_raw("\\HI.SPX").unwrap().unwrap();
    assert_eq!(key, "\\hi.spx");
    assert_eq!(data, b"SPX-DATA");

    let (_, data) = mdd.locate_raw("\\img\\logo.jpg").unwrap().unwrap();
    assert_eq!(data, b"JPG-DATA");

    assert!(mdd.locate("\\nope.png").unwrap().is_none());
}

#[test]
fn test_backend_adapters() {
    let tmp = TempDir::new().unwrap();
    let backend = MdictBackend;

    let reader = backend.open_dictionary(&fixture_mdx(tmp.path())).unwrap();
    assert_eq!(reader.title().as_deref(), Some("Fixture One"));
    let entry = reader.lookup("colour").unwrap().unwrap();
    assert!(entry.content.starts_with("@@@LINK=color"));
    assert_eq!(reader.prefix("ban").unwrap(), ["banana"]);

    let archive = backend.open_archive(&fixture_mdd(tmp.path())).unwrap();
    let located = archive.locate("\\hi.png").unwrap().unwrap();
    assert_eq!(BASE64.decode(located.payload).unwrap(), b"PNG-DATA");
}

#[test]
fn test_truncated_file_is_an_error() {
    let tmp = TempDir::new().unwrap();
    let full = std::fs::read(fixture_mdx(tmp.path())).unwrap();

    for len in [2, 40, 100] {
        let path = tmp.path().join(format!("cut{}.mdx", len));
        std::fs::write(&path, &full[..len]).unwrap();
        assert!(Mdx::new(&path).is_err(), "{} bytes should not parse", len);
    }
}

#[test]
fn test_missing_file_is_io_error() {
    let tmp = TempDir::new().unwrap();
    assert!(matches!(
        Mdx::new(tmp.path().join("absent.mdx")),
        Err(MdictError::Io(_))
    ));
}

fn patch_u64(bytes: &mut [u8], offset: usize, value: u64) {
    bytes[offset..offset + 8].copy_from_slice(&value.to_be_bytes());
}

#[test]
fn test_oversized_size_fields_are_rejected() {
    let tmp = TempDir::new().unwrap();
    let full = std::fs::read(fixture_mdx(tmp.path())).unwrap();
    let header_len = u32::from_be_bytes(full[..4].try_into().unwrap()) as usize;
    let key_header = 4 + header_len + 4;

    // Key header fields 2 and 3: key info unpacked and packed sizes
    for field in [2, 3] {
        let mut bytes = full.clone();
        patch_u64(&mut bytes, key_header + field * 8, 1 << 44);
        let path = tmp.path().join(format!("huge{}.mdx", field));
        std::fs::write(&path, &bytes).unwrap();

        assert!(
            matches!(
                MdictBackend.open_dictionary(&path),
                Err(MdictError::InvalidFormat(_))
            ),
            "field {} was accepted",
            field
        );
    }
}
